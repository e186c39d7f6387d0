//! Offer repository.
//!
//! Stock changes are single conditional `UPDATE`s so two requests for the
//! last unit cannot both succeed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    sea_query::Expr,
};
use surplus_common::{AppError, AppResult};

use crate::entities::{Offer, offer, offer::OfferStatus};

/// Offer inventory gateway.
#[derive(Clone)]
pub struct OfferRepository {
    db: Arc<DatabaseConnection>,
}

impl OfferRepository {
    /// Create a new offer repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an offer by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<offer::Model>> {
        Offer::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Get an offer by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<offer::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Offer not found: {id}")))
    }

    /// Create a new offer.
    pub async fn create(&self, model: offer::ActiveModel) -> AppResult<offer::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Atomically take `quantity` units if the offer is active, unexpired and
    /// still has them.
    ///
    /// Returns `false` when no row matched; the caller decides which
    /// precondition failed.
    pub async fn decrement_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        offer_id: &str,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = Offer::update_many()
            .col_expr(
                offer::Column::QuantityAvailable,
                Expr::col(offer::Column::QuantityAvailable).sub(quantity),
            )
            .col_expr(offer::Column::UpdatedAt, Expr::value(now))
            .filter(offer::Column::Id.eq(offer_id))
            .filter(offer::Column::Status.eq(OfferStatus::Active))
            .filter(offer::Column::QuantityAvailable.gte(quantity))
            .filter(offer::Column::ExpiresAt.gt(now))
            .filter(offer::Column::PickupEnd.gt(now))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// Flip an active offer with no units left to sold out.
    pub async fn mark_sold_out_if_empty<C: ConnectionTrait>(
        &self,
        conn: &C,
        offer_id: &str,
    ) -> AppResult<bool> {
        let result = Offer::update_many()
            .col_expr(offer::Column::Status, Expr::value(OfferStatus::SoldOut))
            .filter(offer::Column::Id.eq(offer_id))
            .filter(offer::Column::Status.eq(OfferStatus::Active))
            .filter(offer::Column::QuantityAvailable.eq(0))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// Return `quantity` units to the offer, reopening it if it had sold out.
    pub async fn restore_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        offer_id: &str,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = Offer::update_many()
            .col_expr(
                offer::Column::QuantityAvailable,
                Expr::cust_with_values(
                    "LEAST(quantity_available + $1, quantity_total)",
                    [quantity],
                ),
            )
            .col_expr(
                offer::Column::Status,
                Expr::cust("CASE WHEN status = 'sold_out' THEN 'active' ELSE status END"),
            )
            .col_expr(offer::Column::UpdatedAt, Expr::value(now))
            .filter(offer::Column::Id.eq(offer_id))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn test_get_by_id_not_found() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<offer::Model>::new()])
                .into_connection(),
        );

        let repo = OfferRepository::new(db);
        let result = repo.get_by_id("missing").await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let offer = fixtures::offer("offer1", "partner1", 3);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[offer.clone()]])
                .into_connection(),
        );

        let repo = OfferRepository::new(db);
        let result = repo.find_by_id("offer1").await.unwrap();

        assert_eq!(result.unwrap().quantity_available, 3);
    }

    #[tokio::test]
    async fn test_decrement_stock_reports_lost_race() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                ])
                .into_connection(),
        );

        let repo = OfferRepository::new(db.clone());
        let now = Utc::now();

        assert!(repo.decrement_stock(db.as_ref(), "offer1", 1, now).await.unwrap());
        assert!(!repo.decrement_stock(db.as_ref(), "offer1", 1, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_stock() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = OfferRepository::new(db.clone());
        let restored = repo
            .restore_stock(db.as_ref(), "offer1", 2, Utc::now())
            .await
            .unwrap();

        assert!(restored);
    }
}
