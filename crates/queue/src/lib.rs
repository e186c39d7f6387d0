//! Background jobs for surplus.
//!
//! This crate provides asynchronous work outside the request path:
//!
//! - **Jobs**: notification delivery through Redis
//! - **Workers**: apalis worker that stores queued notices
//! - **Notifier**: [`RedisNotifier`], the queue-backed notifier for core services
//! - **Scheduler**: the periodic missed-pickup sweep and forgiveness expiry

pub mod jobs;
pub mod notifier_impl;
pub mod scheduler;
pub mod workers;

pub use jobs::*;
pub use notifier_impl::RedisNotifier;
pub use scheduler::{
    JobExecutor, ScheduledJob, SchedulerConfig, ServiceJobExecutor, run_job, run_scheduler,
};
pub use workers::*;
