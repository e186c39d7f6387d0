//! HTTP API layer for surplus.
//!
//! This crate exposes the reservation core over JSON:
//!
//! - **Endpoints**: reservations, pickup, forgiveness, cooldown lifts,
//!   penalties, notifications and metrics
//! - **Middleware**: request metrics
//! - **Rate limiting**: per-address budgets, with a strict per-partner one for
//!   pickup redemption
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod middleware;
pub mod rate_limit;
pub mod response;

pub use endpoints::router;
pub use middleware::AppState;
pub use rate_limit::{Budget, RateLimiterState, Throttle};
