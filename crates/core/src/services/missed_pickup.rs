//! Missed-pickup detection.
//!
//! Active reservations whose deadline has passed become failed pickups, and
//! each one records exactly one offense. Every reservation is handled in its
//! own transaction so one bad row does not hold back the rest of the batch.

use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use surplus_common::{AppError, AppResult, SharedClock, get_metrics};
use surplus_db::{
    entities::{
        notification::NotificationKind,
        reservation::{self, ReservationStatus},
        user_penalty,
    },
    repositories::ReservationRepository,
};

use crate::services::notifier::{Notice, NotifierService, dispatch, noop_notifier};
use crate::services::penalty::{PenaltyService, RecordedOffense};

/// A reservation the sweep could not process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepFailure {
    pub reservation_id: String,
    pub error: String,
}

/// What one sweep did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Overdue reservations found.
    pub scanned: u64,
    /// Reservations this sweep moved to failed pickup.
    pub transitioned: u64,
    /// Reservations another writer changed first.
    pub skipped: u64,
    pub penalties: Vec<user_penalty::Model>,
    pub failures: Vec<SweepFailure>,
}

/// Missed-pickup detector.
#[derive(Clone)]
pub struct MissedPickupService {
    reservation_repo: ReservationRepository,
    penalty_service: PenaltyService,
    batch_size: u64,
    clock: SharedClock,
    notifier: NotifierService,
}

impl MissedPickupService {
    /// Create a new missed-pickup service.
    #[must_use]
    pub fn new(
        reservation_repo: ReservationRepository,
        penalty_service: PenaltyService,
        batch_size: u64,
        clock: SharedClock,
    ) -> Self {
        Self {
            reservation_repo,
            penalty_service,
            batch_size: batch_size.max(1),
            clock,
            notifier: noop_notifier(),
        }
    }

    /// Set the notifier.
    pub fn set_notifier(&mut self, notifier: NotifierService) {
        self.notifier = notifier;
    }

    /// Sweep at the current time.
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        self.sweep_once(self.clock.now()).await
    }

    /// Move every reservation overdue at `now` to failed pickup.
    ///
    /// Overdue rows are read in pages of `batch_size` ordered by deadline. A
    /// row that fails stays active for the next sweep but does not block the
    /// rows behind it. Running it again at the same `now` changes nothing.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut cursor: Option<(DateTime<Utc>, String)> = None;

        loop {
            let page = self
                .reservation_repo
                .find_expired_active(
                    now,
                    cursor.as_ref().map(|(at, id)| (*at, id.as_str())),
                    self.batch_size,
                )
                .await?;
            let exhausted = (page.len() as u64) < self.batch_size;
            if let Some(last) = page.last() {
                cursor = Some((last.expires_at.with_timezone(&Utc), last.id.clone()));
            }
            report.scanned += page.len() as u64;

            for reservation in page {
                self.sweep_row(&reservation, now, &mut report).await;
            }

            if exhausted {
                break;
            }
        }

        get_metrics().record_sweep(report.transitioned, report.failures.len() as u64);
        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                transitioned = report.transitioned,
                skipped = report.skipped,
                failures = report.failures.len(),
                "Missed-pickup sweep finished"
            );
        }

        Ok(report)
    }

    async fn sweep_row(
        &self,
        reservation: &reservation::Model,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        match self.fail_one(reservation, now).await {
            Ok(Some(recorded)) => {
                report.transitioned += 1;
                self.notify_missed(reservation, &recorded).await;
                report.penalties.push(recorded.penalty);
            }
            Ok(None) => report.skipped += 1,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    reservation_id = %reservation.id,
                    "Failed to process missed pickup"
                );
                report.failures.push(SweepFailure {
                    reservation_id: reservation.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Returns `None` when the reservation left `Active` before we got to it.
    async fn fail_one(
        &self,
        reservation: &reservation::Model,
        now: DateTime<Utc>,
    ) -> AppResult<Option<RecordedOffense>> {
        let txn = self.reservation_repo.begin().await?;
        if !self
            .reservation_repo
            .mark_failed_pickup(&txn, &reservation.id, now)
            .await?
        {
            return Ok(None);
        }

        let mut failed = reservation.clone();
        failed.status = ReservationStatus::FailedPickup;
        let recorded = self
            .penalty_service
            .record_offense_in(&txn, &failed, now)
            .await?;

        txn.commit()
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        get_metrics().missed_pickups.fetch_add(1, Ordering::Relaxed);
        Ok(Some(recorded))
    }

    async fn notify_missed(&self, reservation: &reservation::Model, recorded: &RecordedOffense) {
        dispatch(
            &self.notifier,
            Notice::new(
                &reservation.customer_id,
                NotificationKind::MissedPickup,
                json!({
                    "reservationId": reservation.id,
                    "offerId": reservation.offer_id,
                    "deadline": reservation.expires_at,
                    "canRequestForgiveness": true,
                }),
            ),
        )
        .await;

        if recorded.newly_created {
            self.penalty_service.notify_penalty(&recorded.penalty).await;
        }
    }
}
