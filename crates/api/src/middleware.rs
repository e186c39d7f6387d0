//! API middleware.

#![allow(missing_docs)]

use std::sync::Arc;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use sea_orm::DatabaseConnection;
use surplus_common::{Timer, get_metrics};
use surplus_core::{
    CooldownService, ForgivenessService, NotificationService, PenaltyService, PickupService,
    ReservationService,
};

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub reservation_service: ReservationService,
    pub pickup_service: PickupService,
    pub forgiveness_service: ForgivenessService,
    pub cooldown_service: CooldownService,
    pub penalty_service: PenaltyService,
    pub notification_service: NotificationService,
}

/// Request metrics middleware.
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let metrics = get_metrics();
    let timer = Timer::start();
    metrics.start_request();

    let response = next.run(req).await;

    metrics.end_request();
    metrics.record_http_request(response.status().as_u16(), timer.elapsed());
    response
}
