//! Penalty offense history entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-user escalation ratchet.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "penalty_offense_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,

    /// Current escalation level; never decremented automatically
    pub offense_count: i32,

    /// Lifetime number of penalties
    pub total_penalties_received: i32,

    #[sea_orm(nullable)]
    pub last_offense_at: Option<DateTimeWithTimeZone>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
