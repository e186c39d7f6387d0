//! Notification entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Notification kinds emitted by the reservation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// To the partner: a customer reserved one of their offers.
    #[sea_orm(string_value = "reservation_created")]
    ReservationCreated,
    /// To the other party of a cancelled reservation.
    #[sea_orm(string_value = "reservation_cancelled")]
    ReservationCancelled,
    /// To the customer: pickup confirmed.
    #[sea_orm(string_value = "pickup_confirmed")]
    PickupConfirmed,
    /// To the customer: reservation window elapsed.
    #[sea_orm(string_value = "missed_pickup")]
    MissedPickup,
    /// To the customer: a penalty was recorded.
    #[sea_orm(string_value = "penalty_issued")]
    PenaltyIssued,
    /// To the partner: a customer asked for forgiveness.
    #[sea_orm(string_value = "forgiveness_requested")]
    ForgivenessRequested,
    /// To the customer: the partner decided (or the request timed out).
    #[sea_orm(string_value = "forgiveness_decided")]
    ForgivenessDecided,
    /// To the customer: suspension lifted with points.
    #[sea_orm(string_value = "cooldown_lifted")]
    CooldownLifted,
}

impl NotificationKind {
    /// Stable lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReservationCreated => "reservation_created",
            Self::ReservationCancelled => "reservation_cancelled",
            Self::PickupConfirmed => "pickup_confirmed",
            Self::MissedPickup => "missed_pickup",
            Self::PenaltyIssued => "penalty_issued",
            Self::ForgivenessRequested => "forgiveness_requested",
            Self::ForgivenessDecided => "forgiveness_decided",
            Self::CooldownLifted => "cooldown_lifted",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The user receiving the notification
    #[sea_orm(indexed)]
    pub user_id: String,

    pub kind: NotificationKind,

    /// Kind-specific data
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Json,

    /// Has this notification been read?
    #[sea_orm(default_value = false)]
    pub is_read: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
