//! Points ledger repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, TransactionTrait, sea_query::Expr,
};
use surplus_common::{AppError, AppResult};

use crate::entities::{PointTransaction, UserPoints, point_transaction, user_points};

/// Repository for point balances and their audit trail.
#[derive(Clone)]
pub struct PointsRepository {
    db: Arc<DatabaseConnection>,
}

impl PointsRepository {
    /// Create a new points repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Start a transaction on the underlying connection.
    pub async fn begin(&self) -> AppResult<DatabaseTransaction> {
        self.db
            .begin()
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// The shared connection, for reads outside a transaction.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Current balance; users without a ledger row have zero points.
    pub async fn get_balance<C: ConnectionTrait>(&self, conn: &C, user_id: &str) -> AppResult<i64> {
        let row = UserPoints::find_by_id(user_id)
            .one(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(row.map_or(0, |r| r.balance))
    }

    /// Subtract `amount` if the balance covers it.
    pub async fn debit<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = UserPoints::update_many()
            .col_expr(
                user_points::Column::Balance,
                Expr::col(user_points::Column::Balance).sub(amount),
            )
            .col_expr(user_points::Column::UpdatedAt, Expr::value(now))
            .filter(user_points::Column::UserId.eq(user_id))
            .filter(user_points::Column::Balance.gte(amount))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// Append an audit row.
    pub async fn record_transaction<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: point_transaction::ActiveModel,
    ) -> AppResult<()> {
        PointTransaction::insert(model)
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(())
    }
}
