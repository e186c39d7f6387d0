//! Offer entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Offer listing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    /// Open for reservations.
    #[sea_orm(string_value = "active")]
    Active,
    /// Hidden by the partner.
    #[sea_orm(string_value = "paused")]
    Paused,
    /// No units left.
    #[sea_orm(string_value = "sold_out")]
    SoldOut,
    /// Past its listing lifetime.
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl Default for OfferStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// Surplus batch listed by a partner for timed pickup.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "offer")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Partner (business) that owns the offer
    #[sea_orm(indexed)]
    pub partner_id: String,

    pub title: String,

    pub status: OfferStatus,

    /// Units listed in total
    pub quantity_total: i32,

    /// Units still reservable; never negative
    pub quantity_available: i32,

    /// Price before discount, in minor currency units
    pub original_price: i64,

    /// Discounted price, in minor currency units
    pub smart_price: i64,

    pub pickup_start: DateTimeWithTimeZone,

    /// Snapshotted into each reservation as its deadline
    pub pickup_end: DateTimeWithTimeZone,

    pub expires_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Whether the offer can still be reserved at `now`.
    #[must_use]
    pub fn is_reservable_at(&self, now: DateTimeWithTimeZone) -> bool {
        self.status == OfferStatus::Active && self.expires_at > now && self.pickup_end > now
    }

    /// Savings for `quantity` units, in minor currency units.
    #[must_use]
    pub fn savings_for(&self, quantity: i32) -> i64 {
        (self.original_price - self.smart_price).max(0) * i64::from(quantity)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::reservation::Entity")]
    Reservation,
}

impl Related<super::reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
