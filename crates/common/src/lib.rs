//! Common utilities and shared types for surplus.
//!
//! This crate provides foundational components used across all surplus crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Time**: Injectable time source via [`Clock`]
//! - **ID Generation**: ULID-based identifiers and pickup codes via [`IdGenerator`]
//! - **Metrics**: Lifecycle counters via [`Metrics`]
//!
//! # Example
//!
//! ```no_run
//! use surplus_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     let code = id_gen.generate_pickup_code();
//!     println!("Pickup code: {code} (lift cost {})", config.policy.cooldown_lift_cost);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod id;
pub mod metrics;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{Config, PolicyConfig, RateLimitSettings, SchedulerSettings};
pub use error::{AppError, AppResult};
pub use id::{IdGenerator, is_valid_pickup_code, normalize_pickup_code};
pub use metrics::{Metrics, MetricsSnapshot, Timer, get_metrics};
