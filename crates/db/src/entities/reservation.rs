//! Reservation entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Reservation lifecycle status.
///
/// `Active` is the only non-terminal state; every transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "picked_up")]
    PickedUp,
    #[sea_orm(string_value = "failed_pickup")]
    FailedPickup,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl ReservationStatus {
    /// Whether no further status transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Active,
                Self::PickedUp | Self::FailedPickup | Self::Cancelled
            )
        )
    }

    /// Stable lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PickedUp => "picked_up",
            Self::FailedPickup => "failed_pickup",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Forgiveness sub-state of a failed pickup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ForgivenessStatus {
    #[sea_orm(string_value = "not_requested")]
    NotRequested,
    /// Waiting for the partner.
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "granted")]
    Granted,
    #[sea_orm(string_value = "denied")]
    Denied,
    /// Partner did not answer in time; treated as denied.
    #[sea_orm(string_value = "timed_out")]
    TimedOut,
}

impl Default for ForgivenessStatus {
    fn default() -> Self {
        Self::NotRequested
    }
}

impl ForgivenessStatus {
    /// Whether a decision (explicit or by timeout) has been reached.
    #[must_use]
    pub const fn is_decided(self) -> bool {
        matches!(self, Self::Granted | Self::Denied | Self::TimedOut)
    }
}

/// A customer's claim on units of an offer.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reservation")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub customer_id: String,

    #[sea_orm(indexed)]
    pub partner_id: String,

    #[sea_orm(indexed)]
    pub offer_id: String,

    pub quantity: i32,

    /// One-time pickup code (`SP-####-#####`)
    #[sea_orm(unique)]
    pub qr_code: String,

    pub status: ReservationStatus,

    /// `smart_price * quantity` at creation, in minor currency units
    pub total_price: i64,

    pub created_at: DateTimeWithTimeZone,

    /// Pickup deadline, copied from the offer's `pickup_end`
    pub expires_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub picked_up_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub cancelled_at: Option<DateTimeWithTimeZone>,

    pub forgiveness_status: ForgivenessStatus,

    #[sea_orm(nullable)]
    pub forgiveness_requested_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub forgiveness_reason: Option<String>,

    #[sea_orm(nullable)]
    pub forgiveness_decided_at: Option<DateTimeWithTimeZone>,

    /// Partner's note on the decision
    #[sea_orm(column_type = "Text", nullable)]
    pub forgiveness_message: Option<String>,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Whether the pickup deadline has passed at `now`.
    #[must_use]
    pub fn is_past_deadline(&self, now: DateTimeWithTimeZone) -> bool {
        now > self.expires_at
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::offer::Entity",
        from = "Column::OfferId",
        to = "super::offer::Column::Id",
        on_delete = "Restrict"
    )]
    Offer,
}

impl Related<super::offer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Offer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
