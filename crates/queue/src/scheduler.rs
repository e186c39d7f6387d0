//! Periodic jobs: the missed-pickup sweep and forgiveness expiry.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surplus_common::{AppResult, SchedulerSettings};
use surplus_core::{ForgivenessService, MissedPickupService, SweepReport};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Scheduled job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledJob {
    /// Move overdue reservations to failed pickup.
    SweepMissedPickups,
    /// Time out forgiveness requests nobody answered.
    ExpireForgivenessRequests,
}

impl ScheduledJob {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SweepMissedPickups => "sweep_missed_pickups",
            Self::ExpireForgivenessRequests => "expire_forgiveness_requests",
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval for the missed-pickup sweep (default: 2 minutes).
    pub missed_pickup_interval: Duration,
    /// Interval for forgiveness expiry (default: 10 minutes).
    pub forgiveness_expiry_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            missed_pickup_interval: settings.missed_pickup_interval(),
            forgiveness_expiry_interval: settings.forgiveness_expiry_interval(),
        }
    }
}

/// Job executor trait for scheduled jobs.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run one missed-pickup sweep.
    async fn sweep_missed_pickups(&self) -> AppResult<SweepReport>;

    /// Time out stale forgiveness requests, returning how many changed.
    async fn expire_forgiveness_requests(&self) -> AppResult<u64>;
}

/// Executor backed by the core services.
#[derive(Clone)]
pub struct ServiceJobExecutor {
    missed_pickups: MissedPickupService,
    forgiveness: ForgivenessService,
}

impl ServiceJobExecutor {
    #[must_use]
    pub const fn new(missed_pickups: MissedPickupService, forgiveness: ForgivenessService) -> Self {
        Self {
            missed_pickups,
            forgiveness,
        }
    }
}

#[async_trait]
impl JobExecutor for ServiceJobExecutor {
    async fn sweep_missed_pickups(&self) -> AppResult<SweepReport> {
        self.missed_pickups.sweep().await
    }

    async fn expire_forgiveness_requests(&self) -> AppResult<u64> {
        self.forgiveness.expire_stale_requests().await
    }
}

/// Run a scheduled job once, logging the outcome.
pub async fn run_job<E: JobExecutor + ?Sized>(executor: &E, job: ScheduledJob) {
    match job {
        ScheduledJob::SweepMissedPickups => match executor.sweep_missed_pickups().await {
            Ok(report) => {
                if !report.failures.is_empty() {
                    tracing::warn!(
                        job = job.name(),
                        failures = report.failures.len(),
                        "Sweep left reservations for the next run"
                    );
                }
            }
            Err(e) => {
                tracing::error!(job = job.name(), error = %e, "Missed-pickup sweep failed");
            }
        },
        ScheduledJob::ExpireForgivenessRequests => {
            match executor.expire_forgiveness_requests().await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(job = job.name(), count, "Timed out forgiveness requests");
                    }
                }
                Err(e) => {
                    tracing::error!(job = job.name(), error = %e, "Forgiveness expiry failed");
                }
            }
        }
    }
}

fn spawn_periodic<E: JobExecutor + 'static>(
    executor: Arc<E>,
    job: ScheduledJob,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(every);
        // A run that overlaps the next tick delays it instead of bunching up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            run_job(executor.as_ref(), job).await;
        }
    })
}

/// Run the scheduler with the given configuration and executor.
///
/// Each job runs on its own task, one run at a time. Abort the returned
/// handles to stop the scheduler.
pub fn run_scheduler<E: JobExecutor + 'static>(
    config: &SchedulerConfig,
    executor: Arc<E>,
) -> Vec<JoinHandle<()>> {
    tracing::info!(
        missed_pickup_interval_secs = config.missed_pickup_interval.as_secs(),
        forgiveness_expiry_interval_secs = config.forgiveness_expiry_interval.as_secs(),
        "Starting scheduler"
    );

    vec![
        spawn_periodic(
            executor.clone(),
            ScheduledJob::SweepMissedPickups,
            config.missed_pickup_interval,
        ),
        spawn_periodic(
            executor,
            ScheduledJob::ExpireForgivenessRequests,
            config.forgiveness_expiry_interval,
        ),
    ]
}
