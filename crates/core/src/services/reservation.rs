//! Reservation service.
//!
//! Creation and cancellation move stock and reservation status together in
//! one transaction, so stock never drops below zero and a cancelled
//! reservation returns its units exactly once.

use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, Set, prelude::DateTimeWithTimeZone};
use serde::{Deserialize, Serialize};
use serde_json::json;
use surplus_common::{AppError, AppResult, IdGenerator, PolicyConfig, SharedClock, get_metrics};
use surplus_db::{
    entities::{
        notification::NotificationKind,
        offer::{self, OfferStatus},
        reservation::{self, ForgivenessStatus, ReservationStatus},
    },
    repositories::{OfferRepository, ReservationRepository},
};
use validator::Validate;

use crate::services::forgiveness::effective_forgiveness_status;
use crate::services::notifier::{Notice, NotifierService, dispatch, noop_notifier};
use crate::services::penalty::PenaltyService;

/// Attempts at drawing an unused pickup code before giving up.
const PICKUP_CODE_ATTEMPTS: usize = 5;

/// Input for creating a reservation.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationInput {
    #[validate(length(min = 1, max = 64))]
    pub customer_id: String,
    #[validate(length(min = 1, max = 64))]
    pub offer_id: String,
    pub quantity: i32,
}

/// A reservation together with the flags clients render from it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    pub reservation: reservation::Model,
    /// Forgiveness status with an unanswered, overdue request shown as timed out.
    pub forgiveness_status: ForgivenessStatus,
    pub can_request_forgiveness: bool,
    pub forgiveness_pending: bool,
    pub deadline_passed: bool,
}

/// Reservation service for business logic.
#[derive(Clone)]
pub struct ReservationService {
    reservation_repo: ReservationRepository,
    offer_repo: OfferRepository,
    penalty_service: PenaltyService,
    policy: PolicyConfig,
    clock: SharedClock,
    notifier: NotifierService,
    id_gen: IdGenerator,
}

impl ReservationService {
    /// Create a new reservation service.
    #[must_use]
    pub fn new(
        reservation_repo: ReservationRepository,
        offer_repo: OfferRepository,
        penalty_service: PenaltyService,
        policy: PolicyConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            reservation_repo,
            offer_repo,
            penalty_service,
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

    /// Reserve units of an offer.
    ///
    /// Checks run in a fixed order so a request failing several of them
    /// always gets the same error: quantity, offer existence, offer
    /// availability, stock, customer block, existing active reservation.
    pub async fn create(&self, input: CreateReservationInput) -> AppResult<reservation::Model> {
        input.validate()?;
        if input.quantity < 1 || input.quantity > self.policy.max_quantity_per_reservation {
            return Err(AppError::Validation(format!(
                "Quantity must be between 1 and {}",
                self.policy.max_quantity_per_reservation
            )));
        }

        let now = self.clock.now();
        let offer = self.offer_repo.get_by_id(&input.offer_id).await?;
        Self::check_offer(&offer, input.quantity, now)?;

        self.penalty_service
            .ensure_not_blocked(&input.customer_id, now)
            .await?;

        let txn = self.reservation_repo.begin().await?;

        if !self.policy.allow_concurrent_reservations {
            self.reservation_repo
                .lock_customer(&txn, &input.customer_id)
                .await?;
            let active = self
                .reservation_repo
                .count_active_for_customer(&txn, &input.customer_id)
                .await?;
            if active > 0 {
                return Err(AppError::DuplicateActiveReservation);
            }
        }

        if !self
            .offer_repo
            .decrement_stock(&txn, &offer.id, input.quantity, now)
            .await?
        {
            get_metrics()
                .reservations_out_of_stock
                .fetch_add(1, Ordering::Relaxed);
            return Err(AppError::OutOfStock);
        }
        self.offer_repo
            .mark_sold_out_if_empty(&txn, &offer.id)
            .await?;

        let qr_code = self.unused_pickup_code(&txn).await?;
        let model = reservation::ActiveModel {
            id: Set(self.id_gen.generate()),
            customer_id: Set(input.customer_id.clone()),
            partner_id: Set(offer.partner_id.clone()),
            offer_id: Set(offer.id.clone()),
            quantity: Set(input.quantity),
            qr_code: Set(qr_code),
            status: Set(ReservationStatus::Active),
            total_price: Set(offer.smart_price * i64::from(input.quantity)),
            created_at: Set(now.into()),
            expires_at: Set(offer.pickup_end),
            picked_up_at: Set(None),
            cancelled_at: Set(None),
            forgiveness_status: Set(ForgivenessStatus::NotRequested),
            forgiveness_requested_at: Set(None),
            forgiveness_reason: Set(None),
            forgiveness_decided_at: Set(None),
            forgiveness_message: Set(None),
            updated_at: Set(None),
        };

        let created = self.reservation_repo.create(&txn, model).await?;
        txn.commit()
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        get_metrics()
            .reservations_created
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            reservation_id = %created.id,
            customer_id = %created.customer_id,
            offer_id = %created.offer_id,
            quantity = created.quantity,
            "Reservation created"
        );

        dispatch(
            &self.notifier,
            Notice::new(
                &created.partner_id,
                NotificationKind::ReservationCreated,
                json!({
                    "reservationId": created.id,
                    "offerId": created.offer_id,
                    "offerTitle": offer.title,
                    "quantity": created.quantity,
                    "expiresAt": created.expires_at,
                }),
            ),
        )
        .await;

        Ok(created)
    }

    fn check_offer(offer: &offer::Model, quantity: i32, now: DateTime<Utc>) -> AppResult<()> {
        let now_tz: DateTimeWithTimeZone = now.into();
        match offer.status {
            OfferStatus::SoldOut => return Err(AppError::OutOfStock),
            OfferStatus::Paused | OfferStatus::Expired => return Err(AppError::OfferExpired),
            OfferStatus::Active => {}
        }
        if !offer.is_reservable_at(now_tz) {
            return Err(AppError::OfferExpired);
        }
        if offer.quantity_available < quantity {
            return Err(AppError::OutOfStock);
        }
        Ok(())
    }

    async fn unused_pickup_code<C: ConnectionTrait>(&self, conn: &C) -> AppResult<String> {
        for _ in 0..PICKUP_CODE_ATTEMPTS {
            let code = self.id_gen.generate_pickup_code();
            if self
                .reservation_repo
                .find_by_code(conn, &code)
                .await?
                .is_none()
            {
                return Ok(code);
            }
            tracing::debug!("Pickup code collision, drawing another");
        }
        Err(AppError::Internal(
            "Could not allocate a unique pickup code".to_string(),
        ))
    }

    /// Cancel an active reservation and return its units to the offer.
    ///
    /// Either party may cancel until the pickup deadline. Cancelling an
    /// already cancelled reservation succeeds without side effects.
    pub async fn cancel(
        &self,
        reservation_id: &str,
        actor_id: &str,
    ) -> AppResult<reservation::Model> {
        let current = self.reservation_repo.get_by_id(reservation_id).await?;
        if current.customer_id != actor_id && current.partner_id != actor_id {
            return Err(AppError::Forbidden(
                "Only the customer or the partner can cancel this reservation".to_string(),
            ));
        }

        let now = self.clock.now();
        if let Some(outcome) = Self::cancel_precondition(&current, now) {
            return outcome;
        }

        let txn = self.reservation_repo.begin().await?;
        if !self
            .reservation_repo
            .mark_cancelled(&txn, &current.id, now)
            .await?
        {
            drop(txn);
            // Lost the race to a redeem, sweep or another cancel.
            let latest = self.reservation_repo.get_by_id(reservation_id).await?;
            return Self::cancel_precondition(&latest, now).unwrap_or(Err(
                AppError::StorageUnavailable("Reservation changed during cancel".to_string()),
            ));
        }
        self.offer_repo
            .restore_stock(&txn, &current.offer_id, current.quantity, now)
            .await?;
        txn.commit()
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        get_metrics()
            .reservations_cancelled
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            reservation_id = %current.id,
            actor_id = %actor_id,
            "Reservation cancelled"
        );

        let mut cancelled = current;
        cancelled.status = ReservationStatus::Cancelled;
        cancelled.cancelled_at = Some(now.into());
        cancelled.updated_at = Some(now.into());

        let recipient = if actor_id == cancelled.customer_id {
            &cancelled.partner_id
        } else {
            &cancelled.customer_id
        };
        dispatch(
            &self.notifier,
            Notice::new(
                recipient,
                NotificationKind::ReservationCancelled,
                json!({
                    "reservationId": cancelled.id,
                    "offerId": cancelled.offer_id,
                    "cancelledBy": actor_id,
                }),
            ),
        )
        .await;

        Ok(cancelled)
    }

    /// The result of cancelling `r` without touching the store, or `None`
    /// when the cancel should go ahead.
    fn cancel_precondition(
        r: &reservation::Model,
        now: DateTime<Utc>,
    ) -> Option<AppResult<reservation::Model>> {
        if r.status == ReservationStatus::Cancelled {
            return Some(Ok(r.clone()));
        }
        if !r.status.can_transition_to(ReservationStatus::Cancelled) {
            return Some(Err(AppError::InvalidStateTransition {
                from: r.status.as_str().to_string(),
                to: ReservationStatus::Cancelled.as_str().to_string(),
            }));
        }
        r.is_past_deadline(now.into())
            .then_some(Err(AppError::ReservationExpired))
    }

    /// Fetch a reservation visible to `viewer_id`.
    pub async fn show(&self, reservation_id: &str, viewer_id: &str) -> AppResult<ReservationView> {
        let r = self.reservation_repo.get_by_id(reservation_id).await?;
        if r.customer_id != viewer_id && r.partner_id != viewer_id {
            return Err(AppError::Forbidden(
                "Reservation belongs to someone else".to_string(),
            ));
        }
        Ok(self.view(r))
    }

    /// List a customer's reservations, newest first.
    pub async fn list_for_customer(
        &self,
        customer_id: &str,
        status: Option<ReservationStatus>,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<ReservationView>> {
        let rows = self
            .reservation_repo
            .find_by_customer(customer_id, status, limit, until_id)
            .await?;
        Ok(rows.into_iter().map(|r| self.view(r)).collect())
    }

    /// Attach derived flags to a reservation.
    #[must_use]
    pub fn view(&self, reservation: reservation::Model) -> ReservationView {
        let now = self.clock.now();
        let forgiveness_status =
            effective_forgiveness_status(&reservation, now, self.policy.forgiveness_timeout());
        ReservationView {
            can_request_forgiveness: reservation.status == ReservationStatus::FailedPickup
                && forgiveness_status == ForgivenessStatus::NotRequested,
            forgiveness_pending: forgiveness_status == ForgivenessStatus::Pending,
            deadline_passed: reservation.is_past_deadline(now.into()),
            forgiveness_status,
            reservation,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::notifier::RecordingNotifier;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::Arc;
    use surplus_common::ManualClock;
    use surplus_db::{
        entities::user_penalty, repositories::PenaltyRepository, test_utils::fixtures,
    };

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    fn count(n: i64) -> std::collections::BTreeMap<&'static str, sea_orm::Value> {
        maplit::btreemap! { "num_items" => sea_orm::Value::BigInt(Some(n)) }
    }

    fn no_penalties() -> MockDatabase {
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user_penalty::Model>::new()])
    }

    fn service(
        reservations: MockDatabase,
        offers: MockDatabase,
        penalties: MockDatabase,
        now: DateTime<Utc>,
    ) -> (ReservationService, RecordingNotifier) {
        let clock: SharedClock = Arc::new(ManualClock::new(now));
        let penalty_service = PenaltyService::new(
            PenaltyRepository::new(Arc::new(penalties.into_connection())),
            PolicyConfig::default(),
            clock.clone(),
        );
        let mut svc = ReservationService::new(
            ReservationRepository::new(Arc::new(reservations.into_connection())),
            OfferRepository::new(Arc::new(offers.into_connection())),
            penalty_service,
            PolicyConfig::default(),
            clock,
        );
        let recorder = RecordingNotifier::new();
        svc.set_notifier(Arc::new(recorder.clone()));
        (svc, recorder)
    }

    fn input(quantity: i32) -> CreateReservationInput {
        CreateReservationInput {
            customer_id: "customer1".to_string(),
            offer_id: "offer1".to_string(),
            quantity,
        }
    }

    #[tokio::test]
    async fn test_create_reservation() {
        let offer = fixtures::offer("offer1", "partner1", 3);
        let mut created = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        created.quantity = 2;
        created.total_price = 800;

        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(1), exec(1), exec(0)])
            .append_query_results([[count(0)]])
            .append_query_results([Vec::<reservation::Model>::new()])
            .append_query_results([[created]]);
        let offers = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[offer]]);

        let (svc, recorder) = service(reservations, offers, no_penalties(), Utc::now());
        let result = svc.create(input(2)).await.unwrap();

        assert_eq!(result.id, "r1");
        assert_eq!(result.total_price, 800);
        assert_eq!(recorder.kinds(), vec![NotificationKind::ReservationCreated]);
        assert_eq!(recorder.notices()[0].user_id, "partner1");
    }

    #[tokio::test]
    async fn test_create_rejects_zero_quantity() {
        let (svc, _) = service(
            MockDatabase::new(DatabaseBackend::Postgres),
            MockDatabase::new(DatabaseBackend::Postgres),
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now(),
        );

        let result = svc.create(input(0)).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_missing_offer() {
        let offers = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<offer::Model>::new()]);

        let (svc, _) = service(
            MockDatabase::new(DatabaseBackend::Postgres),
            offers,
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now(),
        );

        let result = svc.create(input(1)).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_after_pickup_window_is_offer_expired() {
        let offer = fixtures::offer("offer1", "partner1", 3);
        let offers = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[offer]]);

        let (svc, _) = service(
            MockDatabase::new(DatabaseBackend::Postgres),
            offers,
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now() + Duration::hours(5),
        );

        let result = svc.create(input(1)).await;

        assert!(matches!(result, Err(AppError::OfferExpired)));
    }

    #[tokio::test]
    async fn test_create_more_than_available_is_out_of_stock() {
        let offer = fixtures::offer("offer1", "partner1", 1);
        let offers = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[offer]]);

        let (svc, _) = service(
            MockDatabase::new(DatabaseBackend::Postgres),
            offers,
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now(),
        );

        let result = svc.create(input(2)).await;

        assert!(matches!(result, Err(AppError::OutOfStock)));
    }

    #[tokio::test]
    async fn test_blocked_customer_cannot_reserve() {
        let now = Utc::now();
        let offer = fixtures::offer("offer1", "partner1", 3);
        let mut suspension = fixtures::penalty("p2", "customer1", "r0", 2);
        suspension.ends_at = Some((now + Duration::minutes(45)).into());

        let offers = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[offer]]);
        let penalties =
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[suspension]]);

        let (svc, recorder) = service(
            MockDatabase::new(DatabaseBackend::Postgres),
            offers,
            penalties,
            now,
        );

        let result = svc.create(input(1)).await;

        assert!(matches!(
            result,
            Err(AppError::CustomerBlocked { until: Some(_), .. })
        ));
        assert!(recorder.notices().is_empty());
    }

    #[tokio::test]
    async fn test_second_active_reservation_is_rejected() {
        let offer = fixtures::offer("offer1", "partner1", 3);

        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(1)])
            .append_query_results([[count(1)]]);
        let offers = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[offer]]);

        let (svc, _) = service(reservations, offers, no_penalties(), Utc::now());
        let result = svc.create(input(1)).await;

        assert!(matches!(result, Err(AppError::DuplicateActiveReservation)));
    }

    #[tokio::test]
    async fn test_losing_stock_race_is_out_of_stock() {
        let offer = fixtures::offer("offer1", "partner1", 1);

        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(1), exec(0)])
            .append_query_results([[count(0)]]);
        let offers = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[offer]]);

        let (svc, recorder) = service(reservations, offers, no_penalties(), Utc::now());
        let result = svc.create(input(1)).await;

        assert!(matches!(result, Err(AppError::OutOfStock)));
        assert!(recorder.notices().is_empty());
    }

    #[tokio::test]
    async fn test_customer_cancels_and_partner_is_notified() {
        let active = fixtures::reservation("r1", "customer1", "partner1", "offer1");

        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[active]])
            .append_exec_results([exec(1), exec(1)]);

        let (svc, recorder) = service(
            reservations,
            MockDatabase::new(DatabaseBackend::Postgres),
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now(),
        );
        let cancelled = svc.cancel("r1", "customer1").await.unwrap();

        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(recorder.notices()[0].user_id, "partner1");
        assert_eq!(
            recorder.kinds(),
            vec![NotificationKind::ReservationCancelled]
        );
    }

    #[tokio::test]
    async fn test_cancel_twice_is_noop() {
        let mut cancelled = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        cancelled.status = ReservationStatus::Cancelled;

        let reservations =
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[cancelled]]);

        let (svc, recorder) = service(
            reservations,
            MockDatabase::new(DatabaseBackend::Postgres),
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now(),
        );
        let result = svc.cancel("r1", "customer1").await.unwrap();

        assert_eq!(result.status, ReservationStatus::Cancelled);
        assert!(recorder.notices().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_picked_up_is_invalid_transition() {
        let mut picked_up = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        picked_up.status = ReservationStatus::PickedUp;

        let reservations =
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[picked_up]]);

        let (svc, _) = service(
            reservations,
            MockDatabase::new(DatabaseBackend::Postgres),
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now(),
        );
        let result = svc.cancel("r1", "partner1").await;

        assert!(matches!(
            result,
            Err(AppError::InvalidStateTransition { ref from, .. }) if from == "picked_up"
        ));
    }

    #[tokio::test]
    async fn test_cancel_after_deadline_is_expired() {
        let active = fixtures::reservation("r1", "customer1", "partner1", "offer1");

        let reservations =
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[active]]);

        let (svc, _) = service(
            reservations,
            MockDatabase::new(DatabaseBackend::Postgres),
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now() + Duration::hours(3),
        );
        let result = svc.cancel("r1", "customer1").await;

        assert!(matches!(result, Err(AppError::ReservationExpired)));
    }

    #[tokio::test]
    async fn test_cancel_by_stranger_is_forbidden() {
        let active = fixtures::reservation("r1", "customer1", "partner1", "offer1");

        let reservations =
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[active]]);

        let (svc, _) = service(
            reservations,
            MockDatabase::new(DatabaseBackend::Postgres),
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now(),
        );
        let result = svc.cancel("r1", "customer2").await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_cancel_losing_race_to_pickup() {
        let active = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        let mut picked_up = active.clone();
        picked_up.status = ReservationStatus::PickedUp;

        let reservations = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[active], [picked_up]])
            .append_exec_results([exec(0)]);

        let (svc, recorder) = service(
            reservations,
            MockDatabase::new(DatabaseBackend::Postgres),
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now(),
        );
        let result = svc.cancel("r1", "customer1").await;

        assert!(matches!(
            result,
            Err(AppError::InvalidStateTransition { .. })
        ));
        assert!(recorder.notices().is_empty());
    }

    #[test]
    fn test_view_flags_failed_pickup_as_forgivable() {
        let mut failed = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        failed.status = ReservationStatus::FailedPickup;

        let (svc, _) = service(
            MockDatabase::new(DatabaseBackend::Postgres),
            MockDatabase::new(DatabaseBackend::Postgres),
            MockDatabase::new(DatabaseBackend::Postgres),
            Utc::now() + Duration::hours(3),
        );
        let view = svc.view(failed);

        assert!(view.can_request_forgiveness);
        assert!(!view.forgiveness_pending);
        assert!(view.deadline_passed);
    }
}
