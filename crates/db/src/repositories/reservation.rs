//! Reservation repository.
//!
//! Every status change is a compare-and-set on the current status, so
//! concurrent redeem, cancel and sweep calls serialize on the row and
//! exactly one of them wins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseBackend,
    DatabaseConnection, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Statement, TransactionTrait, sea_query::Expr,
};
use surplus_common::{AppError, AppResult};

use crate::entities::{
    Reservation, reservation,
    reservation::{ForgivenessStatus, ReservationStatus},
};

/// Repository for reservation operations.
#[derive(Clone)]
pub struct ReservationRepository {
    db: Arc<DatabaseConnection>,
}

impl ReservationRepository {
    /// Create a new reservation repository.
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

    /// The shared connection, for single-statement writes outside a transaction.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    // ==================== Lookups ====================

    /// Find a reservation by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<reservation::Model>> {
        self.find_by_id_in(self.db.as_ref(), id).await
    }

    /// Find a reservation by ID on the given connection.
    pub async fn find_by_id_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> AppResult<Option<reservation::Model>> {
        Reservation::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Get a reservation by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<reservation::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reservation not found: {id}")))
    }

    /// Find a reservation by its pickup code.
    pub async fn find_by_code<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
    ) -> AppResult<Option<reservation::Model>> {
        Reservation::find()
            .filter(reservation::Column::QrCode.eq(code))
            .one(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// List a customer's reservations, newest first.
    pub async fn find_by_customer(
        &self,
        customer_id: &str,
        status: Option<ReservationStatus>,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<reservation::Model>> {
        let mut query = Reservation::find()
            .filter(reservation::Column::CustomerId.eq(customer_id))
            .order_by_desc(reservation::Column::Id);

        if let Some(status) = status {
            query = query.filter(reservation::Column::Status.eq(status));
        }

        if let Some(id) = until_id {
            query = query.filter(reservation::Column::Id.lt(id));
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Count a customer's active reservations.
    pub async fn count_active_for_customer<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: &str,
    ) -> AppResult<u64> {
        Reservation::find()
            .filter(reservation::Column::CustomerId.eq(customer_id))
            .filter(reservation::Column::Status.eq(ReservationStatus::Active))
            .count(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Active reservations whose deadline passed before `now`, ordered by
    /// `(expires_at, id)`.
    ///
    /// `after` is the last row of the previous page; rows at or before it are
    /// skipped even if they are still active.
    pub async fn find_expired_active(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, &str)>,
        limit: u64,
    ) -> AppResult<Vec<reservation::Model>> {
        let mut query = Reservation::find()
            .filter(reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(reservation::Column::ExpiresAt.lt(now));

        if let Some((expires_at, id)) = after {
            query = query.filter(
                Condition::any()
                    .add(reservation::Column::ExpiresAt.gt(expires_at))
                    .add(
                        Condition::all()
                            .add(reservation::Column::ExpiresAt.eq(expires_at))
                            .add(reservation::Column::Id.gt(id)),
                    ),
            );
        }

        query
            .order_by_asc(reservation::Column::ExpiresAt)
            .order_by_asc(reservation::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    // ==================== Writes ====================

    /// Serialize reservation creation per customer for the rest of the
    /// transaction.
    pub async fn lock_customer<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: &str,
    ) -> AppResult<()> {
        conn.execute(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT pg_advisory_xact_lock(hashtext($1))",
            [customer_id.into()],
        ))
        .await
        .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(())
    }

    /// Insert a new reservation.
    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: reservation::ActiveModel,
    ) -> AppResult<reservation::Model> {
        model
            .insert(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// `Active -> PickedUp`, only while the deadline has not passed.
    pub async fn mark_picked_up<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = Reservation::update_many()
            .col_expr(
                reservation::Column::Status,
                Expr::value(ReservationStatus::PickedUp),
            )
            .col_expr(reservation::Column::PickedUpAt, Expr::value(now))
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.eq(id))
            .filter(reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(reservation::Column::ExpiresAt.gte(now))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// `Active -> Cancelled`, only while the deadline has not passed.
    pub async fn mark_cancelled<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = Reservation::update_many()
            .col_expr(
                reservation::Column::Status,
                Expr::value(ReservationStatus::Cancelled),
            )
            .col_expr(reservation::Column::CancelledAt, Expr::value(now))
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.eq(id))
            .filter(reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(reservation::Column::ExpiresAt.gte(now))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// `Active -> FailedPickup`, only once the deadline has passed.
    pub async fn mark_failed_pickup<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = Reservation::update_many()
            .col_expr(
                reservation::Column::Status,
                Expr::value(ReservationStatus::FailedPickup),
            )
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.eq(id))
            .filter(reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(reservation::Column::ExpiresAt.lt(now))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    // ==================== Forgiveness ====================

    /// `NotRequested -> Pending` on a failed pickup.
    pub async fn request_forgiveness(
        &self,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = Reservation::update_many()
            .col_expr(
                reservation::Column::ForgivenessStatus,
                Expr::value(ForgivenessStatus::Pending),
            )
            .col_expr(reservation::Column::ForgivenessRequestedAt, Expr::value(now))
            .col_expr(reservation::Column::ForgivenessReason, Expr::value(reason))
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.eq(id))
            .filter(reservation::Column::Status.eq(ReservationStatus::FailedPickup))
            .filter(reservation::Column::ForgivenessStatus.eq(ForgivenessStatus::NotRequested))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// `Pending -> decision`, only for requests made after `requested_after`.
    pub async fn decide_forgiveness<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        decision: ForgivenessStatus,
        message: Option<&str>,
        requested_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = Reservation::update_many()
            .col_expr(reservation::Column::ForgivenessStatus, Expr::value(decision))
            .col_expr(reservation::Column::ForgivenessDecidedAt, Expr::value(now))
            .col_expr(
                reservation::Column::ForgivenessMessage,
                Expr::value(message.map(ToString::to_string)),
            )
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.eq(id))
            .filter(reservation::Column::ForgivenessStatus.eq(ForgivenessStatus::Pending))
            .filter(reservation::Column::ForgivenessRequestedAt.gt(requested_after))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// `Pending -> TimedOut` for a request made at or before `cutoff`.
    pub async fn mark_forgiveness_timed_out(
        &self,
        id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = Reservation::update_many()
            .col_expr(
                reservation::Column::ForgivenessStatus,
                Expr::value(ForgivenessStatus::TimedOut),
            )
            .col_expr(reservation::Column::ForgivenessDecidedAt, Expr::value(now))
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.eq(id))
            .filter(reservation::Column::ForgivenessStatus.eq(ForgivenessStatus::Pending))
            .filter(reservation::Column::ForgivenessRequestedAt.lte(cutoff))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// Pending requests made at or before `cutoff`.
    pub async fn find_stale_forgiveness(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<reservation::Model>> {
        Reservation::find()
            .filter(reservation::Column::ForgivenessStatus.eq(ForgivenessStatus::Pending))
            .filter(reservation::Column::ForgivenessRequestedAt.lte(cutoff))
            .order_by_asc(reservation::Column::ForgivenessRequestedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Pending requests addressed to a partner that have not timed out.
    pub async fn find_pending_forgiveness_for_partner(
        &self,
        partner_id: &str,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<reservation::Model>> {
        Reservation::find()
            .filter(reservation::Column::PartnerId.eq(partner_id))
            .filter(
                Condition::all()
                    .add(reservation::Column::ForgivenessStatus.eq(ForgivenessStatus::Pending))
                    .add(reservation::Column::ForgivenessRequestedAt.gt(cutoff)),
            )
            .order_by_asc(reservation::Column::ForgivenessRequestedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    #[tokio::test]
    async fn test_find_by_code() {
        let reservation = fixtures::reservation("r1", "customer1", "partner1", "offer1");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[reservation.clone()]])
                .into_connection(),
        );

        let repo = ReservationRepository::new(db.clone());
        let found = repo
            .find_by_code(db.as_ref(), &reservation.qr_code)
            .await
            .unwrap();

        assert_eq!(found.unwrap().id, "r1");
    }

    #[tokio::test]
    async fn test_count_active_for_customer() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[maplit::btreemap! {
                    "num_items" => sea_orm::Value::BigInt(Some(1))
                }]])
                .into_connection(),
        );

        let repo = ReservationRepository::new(db.clone());
        let count = repo
            .count_active_for_customer(db.as_ref(), "customer1")
            .await
            .unwrap();

        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_mark_picked_up_once() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(1), exec(0)])
                .into_connection(),
        );

        let repo = ReservationRepository::new(db.clone());
        let now = Utc::now();

        assert!(repo.mark_picked_up(db.as_ref(), "r1", now).await.unwrap());
        assert!(!repo.mark_picked_up(db.as_ref(), "r1", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_expired_active() {
        let mut expired = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        expired.expires_at = (Utc::now() - Duration::minutes(5)).into();

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[expired]])
                .into_connection(),
        );

        let repo = ReservationRepository::new(db);
        let rows = repo
            .find_expired_active(Utc::now(), None, 100)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_find_expired_active_after_cursor() {
        let now = Utc::now();
        let mut later = fixtures::reservation("r2", "customer1", "partner1", "offer1");
        later.expires_at = (now - Duration::minutes(1)).into();

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[later]])
                .into_connection(),
        );

        let repo = ReservationRepository::new(db);
        let cursor = now - Duration::minutes(5);
        let rows = repo
            .find_expired_active(now, Some((cursor, "r1")), 1)
            .await
            .unwrap();

        assert_eq!(rows[0].id, "r2");
    }

    #[tokio::test]
    async fn test_request_forgiveness_conflict() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .into_connection(),
        );

        let repo = ReservationRepository::new(db);
        let updated = repo
            .request_forgiveness("r1", "bus was late", Utc::now())
            .await
            .unwrap();

        assert!(!updated);
    }
}
