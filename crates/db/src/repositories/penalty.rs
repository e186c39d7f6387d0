//! Penalty repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, sea_query::Expr, sea_query::OnConflict,
};
use surplus_common::{AppError, AppResult};

use crate::entities::{
    PenaltyOffenseHistory, UserPenalty, penalty_offense_history, user_penalty,
    user_penalty::{LiftReason, PenaltyType},
};

/// Repository for penalties and the per-user offense history.
#[derive(Clone)]
pub struct PenaltyRepository {
    db: Arc<DatabaseConnection>,
}

impl PenaltyRepository {
    /// Create a new penalty repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    // ==================== Penalties ====================

    /// Find a penalty by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<user_penalty::Model>> {
        UserPenalty::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Get a penalty by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<user_penalty::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Penalty not found: {id}")))
    }

    /// Find the penalty recorded for a reservation.
    pub async fn find_by_reservation<C: ConnectionTrait>(
        &self,
        conn: &C,
        reservation_id: &str,
    ) -> AppResult<Option<user_penalty::Model>> {
        UserPenalty::find()
            .filter(user_penalty::Column::ReservationId.eq(reservation_id))
            .one(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// List a user's penalties, most recent offense first.
    pub async fn find_by_user(
        &self,
        user_id: &str,
        limit: u64,
    ) -> AppResult<Vec<user_penalty::Model>> {
        UserPenalty::find()
            .filter(user_penalty::Column::UserId.eq(user_id))
            .order_by_desc(user_penalty::Column::OffenseNumber)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Active penalties that block reservations at `now`.
    pub async fn find_blocking(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<user_penalty::Model>> {
        UserPenalty::find()
            .filter(user_penalty::Column::UserId.eq(user_id))
            .filter(user_penalty::Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(user_penalty::Column::PenaltyType.eq(PenaltyType::PermanentBan))
                    .add(
                        Condition::all()
                            .add(user_penalty::Column::PenaltyType.is_in([
                                PenaltyType::Suspension1h,
                                PenaltyType::Suspension24h,
                            ]))
                            .add(user_penalty::Column::EndsAt.gt(now)),
                    ),
            )
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// The user's most recent timed suspension still running at `now`,
    /// whether or not it has been lifted.
    pub async fn find_current_suspension(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<user_penalty::Model>> {
        UserPenalty::find()
            .filter(user_penalty::Column::UserId.eq(user_id))
            .filter(user_penalty::Column::PenaltyType.is_in([
                PenaltyType::Suspension1h,
                PenaltyType::Suspension24h,
            ]))
            .filter(user_penalty::Column::EndsAt.gt(now))
            .order_by_desc(user_penalty::Column::OffenseNumber)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Insert a new penalty.
    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: user_penalty::ActiveModel,
    ) -> AppResult<user_penalty::Model> {
        model
            .insert(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Clear an active penalty. Returns `false` if it was already inactive.
    pub async fn deactivate<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        reason: LiftReason,
        points_spent: Option<i64>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = UserPenalty::update_many()
            .col_expr(user_penalty::Column::IsActive, Expr::value(false))
            .col_expr(user_penalty::Column::LiftedAt, Expr::value(now))
            .col_expr(user_penalty::Column::LiftReason, Expr::value(reason))
            .col_expr(user_penalty::Column::PointsSpent, Expr::value(points_spent))
            .filter(user_penalty::Column::Id.eq(id))
            .filter(user_penalty::Column::IsActive.eq(true))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// Clear the active penalty recorded for a reservation.
    pub async fn deactivate_for_reservation<C: ConnectionTrait>(
        &self,
        conn: &C,
        reservation_id: &str,
        reason: LiftReason,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = UserPenalty::update_many()
            .col_expr(user_penalty::Column::IsActive, Expr::value(false))
            .col_expr(user_penalty::Column::LiftedAt, Expr::value(now))
            .col_expr(user_penalty::Column::LiftReason, Expr::value(reason))
            .filter(user_penalty::Column::ReservationId.eq(reservation_id))
            .filter(user_penalty::Column::IsActive.eq(true))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// Mark a user's own penalty as acknowledged.
    pub async fn acknowledge(&self, id: &str, user_id: &str) -> AppResult<bool> {
        let result = UserPenalty::update_many()
            .col_expr(user_penalty::Column::Acknowledged, Expr::value(true))
            .filter(user_penalty::Column::Id.eq(id))
            .filter(user_penalty::Column::UserId.eq(user_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    // ==================== Offense History ====================

    /// Find a user's offense history.
    pub async fn find_history(
        &self,
        user_id: &str,
    ) -> AppResult<Option<penalty_offense_history::Model>> {
        PenaltyOffenseHistory::find_by_id(user_id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Lock a user's history row for the rest of the transaction, creating
    /// an empty one first if needed.
    pub async fn lock_history<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<penalty_offense_history::Model> {
        let empty = penalty_offense_history::ActiveModel {
            user_id: Set(user_id.to_string()),
            offense_count: Set(0),
            total_penalties_received: Set(0),
            last_offense_at: Set(None),
            updated_at: Set(now.into()),
        };

        PenaltyOffenseHistory::insert(empty)
            .on_conflict(
                OnConflict::column(penalty_offense_history::Column::UserId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        PenaltyOffenseHistory::find_by_id(user_id)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?
            .ok_or_else(|| AppError::Internal(format!("Offense history missing for {user_id}")))
    }

    /// Record one more offense on a locked history row.
    pub async fn record_offense<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: &str,
        offense_count: i32,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        PenaltyOffenseHistory::update_many()
            .col_expr(
                penalty_offense_history::Column::OffenseCount,
                Expr::value(offense_count),
            )
            .col_expr(
                penalty_offense_history::Column::TotalPenaltiesReceived,
                Expr::col(penalty_offense_history::Column::TotalPenaltiesReceived).add(1),
            )
            .col_expr(
                penalty_offense_history::Column::LastOffenseAt,
                Expr::value(now),
            )
            .col_expr(penalty_offense_history::Column::UpdatedAt, Expr::value(now))
            .filter(penalty_offense_history::Column::UserId.eq(user_id))
            .exec(conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn test_lock_history_creates_row() {
        let history = fixtures::history("user1", 2);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .append_query_results([[history]])
                .into_connection(),
        );

        let repo = PenaltyRepository::new(db.clone());
        let locked = repo
            .lock_history(db.as_ref(), "user1", Utc::now())
            .await
            .unwrap();

        assert_eq!(locked.offense_count, 2);
    }

    #[tokio::test]
    async fn test_find_blocking() {
        let now = Utc::now();
        let mut penalty = fixtures::penalty("p1", "user1", "r1", 2);
        penalty.ends_at = Some((now + Duration::minutes(30)).into());

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[penalty]])
                .into_connection(),
        );

        let repo = PenaltyRepository::new(db);
        let blocking = repo.find_blocking("user1", now).await.unwrap();

        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].penalty_type, PenaltyType::Suspension1h);
    }

    #[tokio::test]
    async fn test_deactivate_only_once() {
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

        let repo = PenaltyRepository::new(db.clone());
        let now = Utc::now();

        assert!(
            repo.deactivate(db.as_ref(), "p1", LiftReason::PointsPaid, Some(100), now)
                .await
                .unwrap()
        );
        assert!(
            !repo
                .deactivate(db.as_ref(), "p1", LiftReason::PointsPaid, Some(100), now)
                .await
                .unwrap()
        );
    }
}
