//! Point transaction entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Audit row for one balance change.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "point_transaction")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub user_id: String,

    /// Signed change; negative for spending
    pub change: i64,

    pub reason: String,

    /// Entity the change was made for (e.g. a penalty ID)
    #[sea_orm(nullable)]
    pub reference_id: Option<String>,

    pub balance_before: i64,

    pub balance_after: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
