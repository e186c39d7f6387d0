//! Penalty engine.
//!
//! Each missed pickup becomes exactly one offense. The offense number picks
//! the consequence from a fixed escalation table: a warning, a one-hour
//! suspension, a 24-hour suspension, then a permanent ban.

use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, Set, prelude::DateTimeWithTimeZone};
use serde::Serialize;
use serde_json::json;
use surplus_common::{AppError, AppResult, IdGenerator, PolicyConfig, SharedClock, get_metrics};
use surplus_db::{
    entities::{
        notification::NotificationKind,
        reservation::{self, ReservationStatus},
        user_penalty::{self, PenaltyType},
    },
    repositories::PenaltyRepository,
};

use crate::services::notifier::{Notice, NotifierService, dispatch, noop_notifier};

/// Outcome of recording an offense.
#[derive(Debug, Clone)]
pub struct RecordedOffense {
    pub penalty: user_penalty::Model,
    /// `false` when the reservation had already been penalized.
    pub newly_created: bool,
}

/// A customer's current standing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyStatus {
    pub blocked: bool,
    pub permanent: bool,
    pub blocked_until: Option<DateTime<Utc>>,
    pub remaining_seconds: Option<i64>,
    pub offense_count: i32,
    pub total_penalties_received: i32,
    pub active_penalty: Option<user_penalty::Model>,
    pub can_lift_with_points: bool,
    pub lift_cost: i64,
    pub recent_penalties: Vec<user_penalty::Model>,
}

/// Penalty service for business logic.
#[derive(Clone)]
pub struct PenaltyService {
    penalty_repo: PenaltyRepository,
    policy: PolicyConfig,
    clock: SharedClock,
    notifier: NotifierService,
    id_gen: IdGenerator,
}

impl PenaltyService {
    /// Create a new penalty service.
    #[must_use]
    pub fn new(penalty_repo: PenaltyRepository, policy: PolicyConfig, clock: SharedClock) -> Self {
        Self {
            penalty_repo,
            policy,
            clock,
            notifier: noop_notifier(),
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the notifier.
    pub fn set_notifier(&mut self, notifier: NotifierService) {
        self.notifier = notifier;
    }

    /// Record the offense for a failed reservation on the caller's
    /// connection, normally the transaction that marked it failed.
    ///
    /// Idempotent per reservation. The history row is locked for the rest of
    /// the transaction so offense numbers stay gapless per user. Notifying
    /// is left to the caller once the transaction commits.
    pub async fn record_offense_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        reservation: &reservation::Model,
        now: DateTime<Utc>,
    ) -> AppResult<RecordedOffense> {
        if reservation.status != ReservationStatus::FailedPickup {
            return Err(AppError::NotEligible(format!(
                "Reservation {} is not a missed pickup",
                reservation.id
            )));
        }

        if let Some(existing) = self
            .penalty_repo
            .find_by_reservation(conn, &reservation.id)
            .await?
        {
            return Ok(RecordedOffense {
                penalty: existing,
                newly_created: false,
            });
        }

        let history = self
            .penalty_repo
            .lock_history(conn, &reservation.customer_id, now)
            .await?;
        let offense_number = history.offense_count + 1;
        let penalty_type = PenaltyType::for_offense(offense_number);

        let model = user_penalty::ActiveModel {
            id: Set(self.id_gen.generate()),
            user_id: Set(reservation.customer_id.clone()),
            penalty_type: Set(penalty_type),
            reason: Set(format!("Missed pickup for reservation {}", reservation.id)),
            reservation_id: Set(reservation.id.clone()),
            offer_id: Set(reservation.offer_id.clone()),
            partner_id: Set(reservation.partner_id.clone()),
            offense_number: Set(offense_number),
            ends_at: Set(penalty_type.duration().map(|d| (now + d).into())),
            is_active: Set(true),
            acknowledged: Set(false),
            lifted_at: Set(None),
            lift_reason: Set(None),
            points_spent: Set(None),
            created_at: Set(now.into()),
        };

        let penalty = self.penalty_repo.create(conn, model).await?;
        self.penalty_repo
            .record_offense(conn, &reservation.customer_id, offense_number, now)
            .await?;

        get_metrics().record_penalty(penalty_type.as_str());
        tracing::info!(
            user_id = %reservation.customer_id,
            reservation_id = %reservation.id,
            offense_number,
            penalty = penalty_type.as_str(),
            "Recorded missed-pickup offense"
        );

        Ok(RecordedOffense {
            penalty,
            newly_created: true,
        })
    }

    /// Tell the customer about a new penalty.
    pub async fn notify_penalty(&self, penalty: &user_penalty::Model) {
        let notice = Notice::new(
            &penalty.user_id,
            NotificationKind::PenaltyIssued,
            json!({
                "penaltyId": penalty.id,
                "reservationId": penalty.reservation_id,
                "penaltyType": penalty.penalty_type,
                "offenseNumber": penalty.offense_number,
                "endsAt": penalty.ends_at,
                "message": self.penalty_message(penalty.penalty_type),
            }),
        );
        dispatch(&self.notifier, notice).await;
    }

    fn penalty_message(&self, penalty_type: PenaltyType) -> String {
        match penalty_type {
            PenaltyType::Warning => {
                "You missed a pickup. This is a warning; further missed pickups lead to suspensions."
                    .to_string()
            }
            PenaltyType::Suspension1h => {
                "You missed another pickup and cannot reserve for 1 hour.".to_string()
            }
            PenaltyType::Suspension24h => format!(
                "You missed a third pickup and cannot reserve for 24 hours. You can lift this suspension early for {} points.",
                self.policy.cooldown_lift_cost
            ),
            PenaltyType::PermanentBan => {
                "Your account can no longer make reservations after repeated missed pickups."
                    .to_string()
            }
        }
    }

    /// The penalty currently blocking a user, if any.
    ///
    /// A permanent ban outranks any suspension; among suspensions the one
    /// ending last wins.
    pub async fn blocking_penalty(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<user_penalty::Model>> {
        let now_tz: DateTimeWithTimeZone = now.into();
        let blocking = self.penalty_repo.find_blocking(user_id, now).await?;

        Ok(blocking
            .into_iter()
            .filter(|p| p.blocks_at(now_tz))
            .max_by_key(|p| {
                (
                    p.penalty_type == PenaltyType::PermanentBan,
                    p.ends_at.map(|t| t.timestamp()),
                )
            }))
    }

    /// Fail with [`AppError::CustomerBlocked`] while a blocking penalty runs.
    pub async fn ensure_not_blocked(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<()> {
        match self.blocking_penalty(user_id, now).await? {
            None => Ok(()),
            Some(penalty) => {
                get_metrics()
                    .blocked_attempts
                    .fetch_add(1, Ordering::Relaxed);
                let until = match penalty.penalty_type {
                    PenaltyType::PermanentBan => None,
                    _ => penalty.ends_at.map(|t| t.with_timezone(&Utc)),
                };
                Err(AppError::CustomerBlocked {
                    until,
                    remaining_seconds: until.map(|u| (u - now).num_seconds().max(0)),
                })
            }
        }
    }

    /// A user's standing, including whether points can lift the block.
    pub async fn status(&self, user_id: &str) -> AppResult<PenaltyStatus> {
        let now = self.clock.now();
        let active = self.blocking_penalty(user_id, now).await?;
        let history = self.penalty_repo.find_history(user_id).await?;
        let recent_penalties = self.penalty_repo.find_by_user(user_id, 10).await?;

        let permanent = active
            .as_ref()
            .is_some_and(|p| p.penalty_type == PenaltyType::PermanentBan);
        let blocked_until = active
            .as_ref()
            .filter(|_| !permanent)
            .and_then(|p| p.ends_at)
            .map(|t| t.with_timezone(&Utc));
        let remaining_seconds = blocked_until.map(|until| (until - now).num_seconds().max(0));
        let can_lift_with_points = active.as_ref().is_some_and(|p| {
            p.penalty_type.duration().is_some()
                && p.offense_number >= self.policy.cooldown_lift_min_offense
        });

        Ok(PenaltyStatus {
            blocked: active.is_some(),
            permanent,
            blocked_until,
            remaining_seconds,
            offense_count: history.as_ref().map_or(0, |h| h.offense_count),
            total_penalties_received: history.as_ref().map_or(0, |h| h.total_penalties_received),
            active_penalty: active,
            can_lift_with_points,
            lift_cost: self.policy.cooldown_lift_cost,
            recent_penalties,
        })
    }

    /// Mark a penalty notice as seen by its owner.
    pub async fn acknowledge(&self, penalty_id: &str, user_id: &str) -> AppResult<()> {
        let penalty = self.penalty_repo.get_by_id(penalty_id).await?;
        if penalty.user_id != user_id {
            return Err(AppError::Forbidden(
                "Cannot acknowledge another user's penalty".to_string(),
            ));
        }

        self.penalty_repo.acknowledge(penalty_id, user_id).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};
    use std::sync::Arc;
    use surplus_common::ManualClock;
    use surplus_db::test_utils::fixtures;

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    fn failed_reservation() -> reservation::Model {
        let mut r = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        r.status = ReservationStatus::FailedPickup;
        r
    }

    fn service(db: MockDatabase, now: DateTime<Utc>) -> PenaltyService {
        service_on(Arc::new(db.into_connection()), now)
    }

    fn service_on(conn: Arc<DatabaseConnection>, now: DateTime<Utc>) -> PenaltyService {
        PenaltyService::new(
            PenaltyRepository::new(conn),
            PolicyConfig::default(),
            Arc::new(ManualClock::new(now)),
        )
    }

    #[tokio::test]
    async fn test_third_offense_is_24h_suspension() {
        let now = Utc::now();
        let created = fixtures::penalty("p3", "customer1", "r1", 3);

        let conn = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<user_penalty::Model>::new()])
                .append_exec_results([exec(1)])
                .append_query_results([[fixtures::history("customer1", 2)]])
                .append_query_results([[created]])
                .append_exec_results([exec(1)])
                .into_connection(),
        );

        let recorded = service_on(conn.clone(), now)
            .record_offense_in(conn.as_ref(), &failed_reservation(), now)
            .await
            .unwrap();

        assert!(recorded.newly_created);
        assert_eq!(recorded.penalty.offense_number, 3);
        assert_eq!(recorded.penalty.penalty_type, PenaltyType::Suspension24h);
    }

    #[tokio::test]
    async fn test_record_offense_is_idempotent() {
        let existing = fixtures::penalty("p1", "customer1", "r1", 1);

        let conn = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[existing.clone()]])
                .into_connection(),
        );

        let now = Utc::now();
        let recorded = service_on(conn.clone(), now)
            .record_offense_in(conn.as_ref(), &failed_reservation(), now)
            .await
            .unwrap();

        assert!(!recorded.newly_created);
        assert_eq!(recorded.penalty, existing);
    }

    #[tokio::test]
    async fn test_record_offense_rejects_active_reservation() {
        let conn = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let active = fixtures::reservation("r1", "customer1", "partner1", "offer1");

        let now = Utc::now();
        let result = service_on(conn.clone(), now)
            .record_offense_in(conn.as_ref(), &active, now)
            .await;

        assert!(matches!(result, Err(AppError::NotEligible(_))));
    }

    #[tokio::test]
    async fn test_suspended_customer_is_blocked_until_end() {
        let now = Utc::now();
        let mut suspension = fixtures::penalty("p2", "customer1", "r2", 2);
        suspension.ends_at = Some((now + Duration::minutes(30)).into());

        let db = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[suspension]]);

        let result = service(db, now).ensure_not_blocked("customer1", now).await;

        match result {
            Err(AppError::CustomerBlocked {
                until: Some(until),
                remaining_seconds,
            }) => {
                assert_eq!(until.timestamp(), (now + Duration::minutes(30)).timestamp());
                assert_eq!(remaining_seconds, Some(30 * 60));
            }
            other => panic!("expected timed block, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remaining_seconds_follow_the_given_time() {
        let start = Utc::now();
        let mut suspension = fixtures::penalty("p2", "customer1", "r2", 2);
        suspension.ends_at = Some((start + Duration::hours(1)).into());

        let db = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[suspension]]);

        // Twenty minutes into the suspension, with the wall clock untouched.
        let later = start + Duration::minutes(20);
        let result = service(db, later).ensure_not_blocked("customer1", later).await;

        assert!(matches!(
            result,
            Err(AppError::CustomerBlocked {
                remaining_seconds: Some(2400),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_permanent_ban_outranks_suspension() {
        let now = Utc::now();
        let suspension = fixtures::penalty("p3", "customer1", "r3", 3);
        let ban = fixtures::penalty("p4", "customer1", "r4", 4);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[suspension, ban]]);

        let result = service(db, now).ensure_not_blocked("customer1", now).await;

        assert!(matches!(
            result,
            Err(AppError::CustomerBlocked {
                until: None,
                remaining_seconds: None
            })
        ));
    }

    #[tokio::test]
    async fn test_elapsed_suspension_does_not_block() {
        let now = Utc::now();
        let suspension = fixtures::penalty("p2", "customer1", "r2", 2);

        let db = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[suspension]]);

        // The store already filters on ends_at; the service re-checks
        // against the clock it was given.
        let later = now + Duration::hours(2);
        let result = service(db, later).ensure_not_blocked("customer1", later).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_acknowledge_other_users_penalty_is_forbidden() {
        let penalty = fixtures::penalty("p1", "customer1", "r1", 1);

        let db = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[penalty]]);

        let result = service(db, Utc::now()).acknowledge("p1", "someone-else").await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn test_penalty_message_mentions_lift_cost() {
        let db = MockDatabase::new(DatabaseBackend::Postgres);
        let svc = service(db, Utc::now());

        assert!(
            svc.penalty_message(PenaltyType::Suspension24h)
                .contains("100 points")
        );
    }
}
