//! Forgiveness workflow.
//!
//! A customer with a missed pickup may ask the partner once to forgive it.
//! The partner grants or denies; silence for longer than the configured
//! timeout counts as a denial. Granting clears the penalty recorded for that
//! reservation. The reservation itself stays a failed pickup.

use std::sync::atomic::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use surplus_common::{AppError, AppResult, PolicyConfig, SharedClock, get_metrics};
use surplus_db::{
    entities::{
        notification::NotificationKind,
        reservation::{self, ForgivenessStatus, ReservationStatus},
        user_penalty::LiftReason,
    },
    repositories::{PenaltyRepository, ReservationRepository},
};

use crate::services::notifier::{Notice, NotifierService, dispatch, noop_notifier};

/// Longest reason or reply accepted, in characters.
pub const MAX_FORGIVENESS_TEXT: usize = 500;

/// A partner's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgivenessDecision {
    Grant,
    Deny,
}

impl ForgivenessDecision {
    const fn status(self) -> ForgivenessStatus {
        match self {
            Self::Grant => ForgivenessStatus::Granted,
            Self::Deny => ForgivenessStatus::Denied,
        }
    }
}

/// Forgiveness status as it stands at `now`: a pending request older than
/// `timeout` reads as timed out even before the expiry job has written it.
#[must_use]
pub fn effective_forgiveness_status(
    reservation: &reservation::Model,
    now: DateTime<Utc>,
    timeout: Duration,
) -> ForgivenessStatus {
    match (reservation.forgiveness_status, reservation.forgiveness_requested_at) {
        (ForgivenessStatus::Pending, Some(requested_at))
            if requested_at.with_timezone(&Utc) + timeout <= now =>
        {
            ForgivenessStatus::TimedOut
        }
        (status, _) => status,
    }
}

/// Forgiveness service for business logic.
#[derive(Clone)]
pub struct ForgivenessService {
    reservation_repo: ReservationRepository,
    penalty_repo: PenaltyRepository,
    policy: PolicyConfig,
    batch_size: u64,
    clock: SharedClock,
    notifier: NotifierService,
}

impl ForgivenessService {
    /// Create a new forgiveness service.
    #[must_use]
    pub fn new(
        reservation_repo: ReservationRepository,
        penalty_repo: PenaltyRepository,
        policy: PolicyConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            reservation_repo,
            penalty_repo,
            policy,
            batch_size: 500,
            clock,
            notifier: noop_notifier(),
        }
    }

    /// Set the notifier.
    pub fn set_notifier(&mut self, notifier: NotifierService) {
        self.notifier = notifier;
    }

    /// Set how many stale requests one expiry run handles.
    pub const fn set_batch_size(&mut self, batch_size: u64) {
        self.batch_size = batch_size;
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.policy.forgiveness_timeout()
    }

    /// Ask the partner to forgive a missed pickup.
    pub async fn request(
        &self,
        reservation_id: &str,
        customer_id: &str,
        reason: &str,
    ) -> AppResult<reservation::Model> {
        let reason = reason.trim();
        if reason.is_empty() || reason.chars().count() > MAX_FORGIVENESS_TEXT {
            return Err(AppError::Validation(format!(
                "Reason must be between 1 and {MAX_FORGIVENESS_TEXT} characters"
            )));
        }

        let current = self.reservation_repo.get_by_id(reservation_id).await?;
        if current.customer_id != customer_id {
            return Err(AppError::Forbidden(
                "Only the customer can ask for forgiveness".to_string(),
            ));
        }
        if current.status != ReservationStatus::FailedPickup {
            return Err(AppError::NotEligible(
                "Only missed pickups can be forgiven".to_string(),
            ));
        }
        if current.forgiveness_status != ForgivenessStatus::NotRequested {
            return Err(AppError::AlreadyRequested);
        }

        let now = self.clock.now();
        if !self
            .reservation_repo
            .request_forgiveness(&current.id, reason, now)
            .await?
        {
            return Err(AppError::AlreadyRequested);
        }

        get_metrics()
            .forgiveness_requested
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(reservation_id = %current.id, "Forgiveness requested");

        let mut updated = current;
        updated.forgiveness_status = ForgivenessStatus::Pending;
        updated.forgiveness_requested_at = Some(now.into());
        updated.forgiveness_reason = Some(reason.to_string());
        updated.updated_at = Some(now.into());

        dispatch(
            &self.notifier,
            Notice::new(
                &updated.partner_id,
                NotificationKind::ForgivenessRequested,
                json!({
                    "reservationId": updated.id,
                    "customerId": updated.customer_id,
                    "reason": reason,
                    "respondBy": now + self.policy.forgiveness_timeout(),
                }),
            ),
        )
        .await;

        Ok(updated)
    }

    /// Grant or deny a pending request.
    pub async fn decide(
        &self,
        reservation_id: &str,
        partner_id: &str,
        decision: ForgivenessDecision,
        message: Option<&str>,
    ) -> AppResult<reservation::Model> {
        let message = message.map(str::trim).filter(|m| !m.is_empty());
        if message.is_some_and(|m| m.chars().count() > MAX_FORGIVENESS_TEXT) {
            return Err(AppError::Validation(format!(
                "Message must be at most {MAX_FORGIVENESS_TEXT} characters"
            )));
        }

        let current = self.reservation_repo.get_by_id(reservation_id).await?;
        if current.partner_id != partner_id {
            return Err(AppError::WrongPartner);
        }

        let now = self.clock.now();
        let cutoff = self.cutoff(now);
        let effective =
            effective_forgiveness_status(&current, now, self.policy.forgiveness_timeout());
        if effective == ForgivenessStatus::NotRequested {
            return Err(AppError::NotEligible(
                "No forgiveness request to decide".to_string(),
            ));
        }
        if effective.is_decided() {
            if current.forgiveness_status == ForgivenessStatus::Pending {
                // Lazily persist the timeout before refusing.
                self.time_out(&current, cutoff, now).await?;
            }
            return Err(AppError::AlreadyDecided);
        }

        let status = decision.status();
        let txn = self.reservation_repo.begin().await?;
        if !self
            .reservation_repo
            .decide_forgiveness(&txn, &current.id, status, message, cutoff, now)
            .await?
        {
            return Err(AppError::AlreadyDecided);
        }
        if decision == ForgivenessDecision::Grant {
            self.penalty_repo
                .deactivate_for_reservation(&txn, &current.id, LiftReason::Forgiven, now)
                .await?;
        }
        txn.commit()
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        let counter = match decision {
            ForgivenessDecision::Grant => &get_metrics().forgiveness_granted,
            ForgivenessDecision::Deny => &get_metrics().forgiveness_denied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            reservation_id = %current.id,
            decision = ?decision,
            "Forgiveness decided"
        );

        let mut updated = current;
        updated.forgiveness_status = status;
        updated.forgiveness_decided_at = Some(now.into());
        updated.forgiveness_message = message.map(ToString::to_string);
        updated.updated_at = Some(now.into());

        self.notify_decision(&updated).await;
        Ok(updated)
    }

    async fn time_out(
        &self,
        reservation: &reservation::Model,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let timed_out = self
            .reservation_repo
            .mark_forgiveness_timed_out(&reservation.id, cutoff, now)
            .await?;
        if timed_out {
            get_metrics()
                .forgiveness_timed_out
                .fetch_add(1, Ordering::Relaxed);
            let mut updated = reservation.clone();
            updated.forgiveness_status = ForgivenessStatus::TimedOut;
            updated.forgiveness_decided_at = Some(now.into());
            self.notify_decision(&updated).await;
        }
        Ok(timed_out)
    }

    async fn notify_decision(&self, reservation: &reservation::Model) {
        dispatch(
            &self.notifier,
            Notice::new(
                &reservation.customer_id,
                NotificationKind::ForgivenessDecided,
                json!({
                    "reservationId": reservation.id,
                    "status": reservation.forgiveness_status,
                    "message": reservation.forgiveness_message,
                    "penaltyLifted": reservation.forgiveness_status == ForgivenessStatus::Granted,
                }),
            ),
        )
        .await;
    }

    /// Write `TimedOut` on every request the partner left unanswered.
    pub async fn expire_stale_requests(&self) -> AppResult<u64> {
        let now = self.clock.now();
        let cutoff = self.cutoff(now);
        let stale = self
            .reservation_repo
            .find_stale_forgiveness(cutoff, self.batch_size)
            .await?;

        let mut expired = 0;
        for reservation in &stale {
            match self.time_out(reservation, cutoff, now).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        reservation_id = %reservation.id,
                        "Failed to time out forgiveness request"
                    );
                }
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Timed out forgiveness requests");
        }
        Ok(expired)
    }

    /// Requests still waiting on a partner, oldest first.
    pub async fn list_pending_for_partner(
        &self,
        partner_id: &str,
        limit: u64,
    ) -> AppResult<Vec<reservation::Model>> {
        let cutoff = self.cutoff(self.clock.now());
        self.reservation_repo
            .find_pending_forgiveness_for_partner(partner_id, cutoff, limit)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::notifier::RecordingNotifier;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::Arc;
    use surplus_common::ManualClock;
    use surplus_db::test_utils::fixtures;

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    fn failed(
        forgiveness: ForgivenessStatus,
        requested_at: Option<DateTime<Utc>>,
    ) -> reservation::Model {
        let mut r = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        r.status = ReservationStatus::FailedPickup;
        r.forgiveness_status = forgiveness;
        r.forgiveness_requested_at = requested_at.map(Into::into);
        r
    }

    fn service(
        reservations: MockDatabase,
        now: DateTime<Utc>,
    ) -> (ForgivenessService, RecordingNotifier) {
        let mut svc = ForgivenessService::new(
            ReservationRepository::new(Arc::new(reservations.into_connection())),
            PenaltyRepository::new(Arc::new(
                MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            )),
            PolicyConfig::default(),
            Arc::new(ManualClock::new(now)),
        );
        let recorder = RecordingNotifier::new();
        svc.set_notifier(Arc::new(recorder.clone()));
        (svc, recorder)
    }

    #[test]
    fn test_effective_status_times_out_after_24h() {
        let now = Utc::now();
        let fresh = failed(ForgivenessStatus::Pending, Some(now - Duration::hours(23)));
        let stale = failed(ForgivenessStatus::Pending, Some(now - Duration::hours(24)));

        assert_eq!(
            effective_forgiveness_status(&fresh, now, Duration::hours(24)),
            ForgivenessStatus::Pending
        );
        assert_eq!(
            effective_forgiveness_status(&stale, now, Duration::hours(24)),
            ForgivenessStatus::TimedOut
        );
    }

    #[tokio::test]
    async fn test_request_notifies_partner() {
        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[failed(ForgivenessStatus::NotRequested, None)]])
            .append_exec_results([exec(1)]);

        let (svc, recorder) = service(reservations, Utc::now());
        let updated = svc
            .request("r1", "customer1", "  The bus broke down  ")
            .await
            .unwrap();

        assert_eq!(updated.forgiveness_status, ForgivenessStatus::Pending);
        assert_eq!(updated.forgiveness_reason.as_deref(), Some("The bus broke down"));
        assert_eq!(recorder.notices()[0].user_id, "partner1");
        assert_eq!(recorder.kinds(), vec![NotificationKind::ForgivenessRequested]);
    }

    #[tokio::test]
    async fn test_second_request_is_rejected() {
        let reservations = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[
            failed(ForgivenessStatus::Pending, Some(Utc::now())),
        ]]);

        let (svc, _) = service(reservations, Utc::now());
        let result = svc.request("r1", "customer1", "again").await;

        assert!(matches!(result, Err(AppError::AlreadyRequested)));
    }

    #[tokio::test]
    async fn test_request_on_picked_up_is_not_eligible() {
        let mut picked_up = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        picked_up.status = ReservationStatus::PickedUp;
        let reservations =
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[picked_up]]);

        let (svc, _) = service(reservations, Utc::now());
        let result = svc.request("r1", "customer1", "please").await;

        assert!(matches!(result, Err(AppError::NotEligible(_))));
    }

    #[tokio::test]
    async fn test_request_with_empty_reason_is_invalid() {
        let (svc, _) = service(MockDatabase::new(DatabaseBackend::Postgres), Utc::now());
        let result = svc.request("r1", "customer1", "   ").await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_grant_lifts_penalty() {
        let now = Utc::now();
        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[failed(
                ForgivenessStatus::Pending,
                Some(now - Duration::hours(2)),
            )]])
            .append_exec_results([exec(1), exec(1)]);

        let (svc, recorder) = service(reservations, now);
        let updated = svc
            .decide("r1", "partner1", ForgivenessDecision::Grant, Some("No worries"))
            .await
            .unwrap();

        assert_eq!(updated.forgiveness_status, ForgivenessStatus::Granted);
        assert_eq!(updated.status, ReservationStatus::FailedPickup);
        assert_eq!(recorder.notices()[0].user_id, "customer1");
        assert_eq!(recorder.notices()[0].payload["penaltyLifted"], true);
    }

    #[tokio::test]
    async fn test_deny_keeps_penalty() {
        let now = Utc::now();
        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[failed(
                ForgivenessStatus::Pending,
                Some(now - Duration::hours(1)),
            )]])
            .append_exec_results([exec(1)]);

        let (svc, recorder) = service(reservations, now);
        let updated = svc
            .decide("r1", "partner1", ForgivenessDecision::Deny, None)
            .await
            .unwrap();

        assert_eq!(updated.forgiveness_status, ForgivenessStatus::Denied);
        assert_eq!(recorder.notices()[0].payload["penaltyLifted"], false);
    }

    #[tokio::test]
    async fn test_decide_by_other_partner_is_wrong_partner() {
        let reservations = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[
            failed(ForgivenessStatus::Pending, Some(Utc::now())),
        ]]);

        let (svc, _) = service(reservations, Utc::now());
        let result = svc
            .decide("r1", "partner2", ForgivenessDecision::Grant, None)
            .await;

        assert!(matches!(result, Err(AppError::WrongPartner)));
    }

    #[tokio::test]
    async fn test_decide_after_timeout_is_already_decided() {
        let now = Utc::now();
        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[failed(
                ForgivenessStatus::Pending,
                Some(now - Duration::hours(25)),
            )]])
            .append_exec_results([exec(1)]);

        let (svc, recorder) = service(reservations, now);
        let result = svc
            .decide("r1", "partner1", ForgivenessDecision::Grant, None)
            .await;

        assert!(matches!(result, Err(AppError::AlreadyDecided)));
        assert_eq!(
            recorder.notices()[0].payload["status"],
            serde_json::json!("timed_out")
        );
    }

    #[tokio::test]
    async fn test_decide_twice_is_already_decided() {
        let reservations = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[
            failed(ForgivenessStatus::Denied, Some(Utc::now())),
        ]]);

        let (svc, _) = service(reservations, Utc::now());
        let result = svc
            .decide("r1", "partner1", ForgivenessDecision::Grant, None)
            .await;

        assert!(matches!(result, Err(AppError::AlreadyDecided)));
    }

    #[tokio::test]
    async fn test_decide_without_request_is_not_eligible() {
        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[failed(ForgivenessStatus::NotRequested, None)]]);

        let (svc, _) = service(reservations, Utc::now());
        let result = svc
            .decide("r1", "partner1", ForgivenessDecision::Deny, None)
            .await;

        assert!(matches!(result, Err(AppError::NotEligible(_))));
    }

    #[tokio::test]
    async fn test_expire_stale_requests() {
        let now = Utc::now();
        let mut other = failed(ForgivenessStatus::Pending, Some(now - Duration::hours(30)));
        other.id = "r2".to_string();

        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[
                failed(ForgivenessStatus::Pending, Some(now - Duration::hours(26))),
                other,
            ]])
            .append_exec_results([exec(1), exec(0)]);

        let (svc, recorder) = service(reservations, now);
        let expired = svc.expire_stale_requests().await.unwrap();

        assert_eq!(expired, 1);
        assert_eq!(recorder.kinds(), vec![NotificationKind::ForgivenessDecided]);
    }
}
