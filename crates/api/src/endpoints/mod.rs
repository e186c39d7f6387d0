//! API endpoints.

mod cooldown;
mod forgiveness;
mod metrics;
mod notifications;
mod penalties;
mod pickup;
mod reservations;

use axum::Router;

use crate::middleware::AppState;
use crate::rate_limit::RateLimiterState;

/// Create the API router.
///
/// `limiter` backs the strict bucket in front of pickup redemption.
pub fn router(limiter: RateLimiterState) -> Router<AppState> {
    Router::new()
        .nest("/reservations", reservations::router())
        .nest("/pickup", pickup::router(limiter))
        .nest("/forgiveness", forgiveness::router())
        .nest("/cooldown", cooldown::router())
        .nest("/penalties", penalties::router())
        .nest("/notifications", notifications::router())
        .nest("/metrics", metrics::router())
}
