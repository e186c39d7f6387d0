//! User penalty entity.

use chrono::Duration;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Consequence attached to one missed pickup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PenaltyType {
    #[sea_orm(string_value = "warning")]
    Warning,
    #[sea_orm(string_value = "suspension_1h")]
    Suspension1h,
    #[sea_orm(string_value = "suspension_24h")]
    Suspension24h,
    #[sea_orm(string_value = "permanent_ban")]
    PermanentBan,
}

impl PenaltyType {
    /// Escalation table: the penalty for the `offense_number`-th offense.
    #[must_use]
    pub const fn for_offense(offense_number: i32) -> Self {
        match offense_number {
            i32::MIN..=1 => Self::Warning,
            2 => Self::Suspension1h,
            3 => Self::Suspension24h,
            _ => Self::PermanentBan,
        }
    }

    /// Length of a timed suspension; `None` for warnings and bans.
    #[must_use]
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::Suspension1h => Some(Duration::hours(1)),
            Self::Suspension24h => Some(Duration::hours(24)),
            Self::Warning | Self::PermanentBan => None,
        }
    }

    /// Whether an active penalty of this type blocks new reservations.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        !matches!(self, Self::Warning)
    }

    /// Stable lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Suspension1h => "suspension_1h",
            Self::Suspension24h => "suspension_24h",
            Self::PermanentBan => "permanent_ban",
        }
    }
}

/// Why an active penalty was cleared early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum LiftReason {
    /// Partner granted forgiveness.
    #[sea_orm(string_value = "forgiven")]
    Forgiven,
    /// Customer paid points.
    #[sea_orm(string_value = "points_paid")]
    PointsPaid,
}

/// Penalty record, one per failed reservation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_penalty")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub user_id: String,

    pub penalty_type: PenaltyType,

    #[sea_orm(column_type = "Text")]
    pub reason: String,

    /// Failed reservation this penalty was recorded for
    #[sea_orm(unique)]
    pub reservation_id: String,

    pub offer_id: String,

    pub partner_id: String,

    /// 1-based, gapless per user
    pub offense_number: i32,

    /// End of a timed suspension (None for warnings and bans)
    #[sea_orm(nullable)]
    pub ends_at: Option<DateTimeWithTimeZone>,

    pub is_active: bool,

    /// Whether the user dismissed the penalty notice
    pub acknowledged: bool,

    #[sea_orm(nullable)]
    pub lifted_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub lift_reason: Option<LiftReason>,

    #[sea_orm(nullable)]
    pub points_spent: Option<i64>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether this penalty blocks reservations at `now`.
    #[must_use]
    pub fn blocks_at(&self, now: DateTimeWithTimeZone) -> bool {
        if !self.is_active || !self.penalty_type.is_blocking() {
            return false;
        }
        self.penalty_type == PenaltyType::PermanentBan
            || self.ends_at.is_some_and(|ends_at| ends_at > now)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::reservation::Entity",
        from = "Column::ReservationId",
        to = "super::reservation::Column::Id",
        on_delete = "Cascade"
    )]
    Reservation,
}

impl Related<super::reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
