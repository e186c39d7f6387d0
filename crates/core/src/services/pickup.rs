//! Pickup code validation.
//!
//! A partner scans or types the customer's code at the counter. Redemption
//! succeeds once per reservation, only for the partner who owns it and only
//! before the pickup deadline.

use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use surplus_common::{
    AppError, AppResult, SharedClock, get_metrics, is_valid_pickup_code, normalize_pickup_code,
};
use surplus_db::{
    entities::{
        notification::NotificationKind,
        offer,
        reservation::{self, ReservationStatus},
    },
    repositories::{OfferRepository, ReservationRepository},
};

use crate::services::notifier::{Notice, NotifierService, dispatch, noop_notifier};

/// A redeemed reservation and what the customer saved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemedPickup {
    pub reservation: reservation::Model,
    pub offer: offer::Model,
    pub savings: i64,
}

/// Pickup service for business logic.
#[derive(Clone)]
pub struct PickupService {
    reservation_repo: ReservationRepository,
    offer_repo: OfferRepository,
    clock: SharedClock,
    notifier: NotifierService,
}

impl PickupService {
    /// Create a new pickup service.
    #[must_use]
    pub fn new(
        reservation_repo: ReservationRepository,
        offer_repo: OfferRepository,
        clock: SharedClock,
    ) -> Self {
        Self {
            reservation_repo,
            offer_repo,
            clock,
            notifier: noop_notifier(),
        }
    }

    /// Set the notifier.
    pub fn set_notifier(&mut self, notifier: NotifierService) {
        self.notifier = notifier;
    }

    /// Validate a pickup code for `partner_id` and mark it picked up.
    pub async fn redeem(&self, code: &str, partner_id: &str) -> AppResult<RedeemedPickup> {
        let code = normalize_pickup_code(code);
        if !is_valid_pickup_code(&code) {
            return Err(AppError::CodeNotFound);
        }

        let current = self
            .reservation_repo
            .find_by_code(self.reservation_repo.connection(), &code)
            .await?
            .ok_or(AppError::CodeNotFound)?;
        if current.partner_id != partner_id {
            tracing::warn!(
                reservation_id = %current.id,
                partner_id = %partner_id,
                "Pickup code presented to the wrong partner"
            );
            return Err(AppError::WrongPartner);
        }

        let now = self.clock.now();
        Self::check_redeemable(&current, now)?;

        let offer = self.offer_repo.get_by_id(&current.offer_id).await?;

        if !self
            .reservation_repo
            .mark_picked_up(self.reservation_repo.connection(), &current.id, now)
            .await?
        {
            // Another redeem, cancel or the sweep got there first.
            let latest = self.reservation_repo.get_by_id(&current.id).await?;
            return Err(match latest.status {
                ReservationStatus::PickedUp => AppError::AlreadyRedeemed,
                _ => AppError::ReservationExpired,
            });
        }

        let mut redeemed = current;
        redeemed.status = ReservationStatus::PickedUp;
        redeemed.picked_up_at = Some(now.into());
        redeemed.updated_at = Some(now.into());
        let savings = offer.savings_for(redeemed.quantity);

        get_metrics()
            .pickups_redeemed
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            reservation_id = %redeemed.id,
            partner_id = %partner_id,
            savings,
            "Pickup redeemed"
        );

        dispatch(
            &self.notifier,
            Notice::new(
                &redeemed.customer_id,
                NotificationKind::PickupConfirmed,
                json!({
                    "reservationId": redeemed.id,
                    "offerId": offer.id,
                    "offerTitle": offer.title,
                    "quantity": redeemed.quantity,
                    "savings": savings,
                }),
            ),
        )
        .await;

        Ok(RedeemedPickup {
            reservation: redeemed,
            offer,
            savings,
        })
    }

    fn check_redeemable(r: &reservation::Model, now: DateTime<Utc>) -> AppResult<()> {
        if r.status == ReservationStatus::PickedUp {
            return Err(AppError::AlreadyRedeemed);
        }
        if r.status.is_terminal() || r.is_past_deadline(now.into()) {
            return Err(AppError::ReservationExpired);
        }
        Ok(())
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
    use surplus_db::test_utils::fixtures;

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    fn service(
        reservations: MockDatabase,
        offers: MockDatabase,
        now: DateTime<Utc>,
    ) -> (PickupService, RecordingNotifier) {
        let mut svc = PickupService::new(
            ReservationRepository::new(Arc::new(reservations.into_connection())),
            OfferRepository::new(Arc::new(offers.into_connection())),
            Arc::new(ManualClock::new(now)),
        );
        let recorder = RecordingNotifier::new();
        svc.set_notifier(Arc::new(recorder.clone()));
        (svc, recorder)
    }

    fn empty() -> MockDatabase {
        MockDatabase::new(DatabaseBackend::Postgres)
    }

    #[tokio::test]
    async fn test_redeem_reports_savings() {
        let active = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        let offer = fixtures::offer("offer1", "partner1", 2);

        let reservations = empty()
            .append_query_results([[active]])
            .append_exec_results([exec(1)]);
        let offers = empty().append_query_results([[offer]]);

        let (svc, recorder) = service(reservations, offers, Utc::now());
        let redeemed = svc.redeem(" sp-1234-56789 ", "partner1").await.unwrap();

        assert_eq!(redeemed.reservation.status, ReservationStatus::PickedUp);
        assert!(redeemed.reservation.picked_up_at.is_some());
        assert_eq!(redeemed.savings, 800);
        assert_eq!(recorder.notices()[0].user_id, "customer1");
        assert_eq!(recorder.kinds(), vec![NotificationKind::PickupConfirmed]);
    }

    #[tokio::test]
    async fn test_malformed_code_is_not_found() {
        let (svc, _) = service(empty(), empty(), Utc::now());

        let result = svc.redeem("hello", "partner1").await;

        assert!(matches!(result, Err(AppError::CodeNotFound)));
    }

    #[tokio::test]
    async fn test_unknown_code_is_not_found() {
        let reservations = empty().append_query_results([Vec::<reservation::Model>::new()]);

        let (svc, _) = service(reservations, empty(), Utc::now());
        let result = svc.redeem("SP-0000-00000", "partner1").await;

        assert!(matches!(result, Err(AppError::CodeNotFound)));
    }

    #[tokio::test]
    async fn test_other_partner_cannot_redeem() {
        let active = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        let reservations = empty().append_query_results([[active]]);

        let (svc, recorder) = service(reservations, empty(), Utc::now());
        let result = svc.redeem("SP-1234-56789", "partner2").await;

        assert!(matches!(result, Err(AppError::WrongPartner)));
        assert!(recorder.notices().is_empty());
    }

    #[tokio::test]
    async fn test_second_redeem_is_already_redeemed() {
        let mut picked_up = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        picked_up.status = ReservationStatus::PickedUp;
        let reservations = empty().append_query_results([[picked_up]]);

        let (svc, _) = service(reservations, empty(), Utc::now());
        let result = svc.redeem("SP-1234-56789", "partner1").await;

        assert!(matches!(result, Err(AppError::AlreadyRedeemed)));
    }

    #[tokio::test]
    async fn test_late_redeem_is_expired() {
        let active = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        let reservations = empty().append_query_results([[active]]);

        let (svc, _) = service(reservations, empty(), Utc::now() + Duration::hours(3));
        let result = svc.redeem("SP-1234-56789", "partner1").await;

        assert!(matches!(result, Err(AppError::ReservationExpired)));
    }

    #[tokio::test]
    async fn test_cancelled_reservation_is_expired() {
        let mut cancelled = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        cancelled.status = ReservationStatus::Cancelled;
        let reservations = empty().append_query_results([[cancelled]]);

        let (svc, _) = service(reservations, empty(), Utc::now());
        let result = svc.redeem("SP-1234-56789", "partner1").await;

        assert!(matches!(result, Err(AppError::ReservationExpired)));
    }

    #[tokio::test]
    async fn test_concurrent_redeem_loser_sees_already_redeemed() {
        let active = fixtures::reservation("r1", "customer1", "partner1", "offer1");
        let mut picked_up = active.clone();
        picked_up.status = ReservationStatus::PickedUp;
        let offer = fixtures::offer("offer1", "partner1", 2);

        let reservations = empty()
            .append_query_results([[active], [picked_up]])
            .append_exec_results([exec(0)]);
        let offers = empty().append_query_results([[offer]]);

        let (svc, recorder) = service(reservations, offers, Utc::now());
        let result = svc.redeem("SP-1234-56789", "partner1").await;

        assert!(matches!(result, Err(AppError::AlreadyRedeemed)));
        assert!(recorder.notices().is_empty());
    }
}
