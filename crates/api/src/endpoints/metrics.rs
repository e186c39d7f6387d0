//! Metrics endpoints for monitoring and observability.
//!
//! Provides endpoints for:
//! - Prometheus metrics export
//! - Health checks
//! - Reservation lifecycle statistics

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use surplus_common::metrics::{MetricsSnapshot, get_metrics};

use crate::middleware::AppState;

/// Create the metrics router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_metrics_json))
        .route("/prometheus", get(get_metrics_prometheus))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
}

/// JSON metrics response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub http: HttpMetrics,
    pub reservations: ReservationMetrics,
    pub penalties: PenaltyMetrics,
    pub forgiveness: ForgivenessMetrics,
    pub jobs: JobMetrics,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMetrics {
    pub requests_total: u64,
    pub requests_active: u64,
    pub requests_2xx: u64,
    pub requests_4xx: u64,
    pub requests_5xx: u64,
    pub latency_avg_us: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationMetrics {
    pub created: u64,
    pub cancelled: u64,
    pub out_of_stock: u64,
    pub picked_up: u64,
    pub missed: u64,
    /// Picked up over picked up plus missed.
    pub pickup_rate: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltyMetrics {
    pub warnings: u64,
    pub suspensions_1h: u64,
    pub suspensions_24h: u64,
    pub permanent_bans: u64,
    pub blocked_attempts: u64,
    pub cooldowns_lifted: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgivenessMetrics {
    pub requested: u64,
    pub granted: u64,
    pub denied: u64,
    pub timed_out: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetrics {
    pub sweep_runs: u64,
    pub sweep_failures: u64,
    pub notifications_enqueued: u64,
    pub notifications_failed: u64,
}

impl From<MetricsSnapshot> for MetricsResponse {
    fn from(s: MetricsSnapshot) -> Self {
        Self {
            http: HttpMetrics {
                requests_total: s.http_requests_total,
                requests_active: s.http_requests_active,
                requests_2xx: s.http_requests_2xx,
                requests_4xx: s.http_requests_4xx,
                requests_5xx: s.http_requests_5xx,
                latency_avg_us: s.http_request_latency_avg_us,
            },
            reservations: ReservationMetrics {
                created: s.reservations_created,
                cancelled: s.reservations_cancelled,
                out_of_stock: s.reservations_out_of_stock,
                picked_up: s.pickups_redeemed,
                missed: s.missed_pickups,
                pickup_rate: s.pickup_rate,
            },
            penalties: PenaltyMetrics {
                warnings: s.penalties_warning,
                suspensions_1h: s.penalties_suspension_1h,
                suspensions_24h: s.penalties_suspension_24h,
                permanent_bans: s.penalties_permanent_ban,
                blocked_attempts: s.blocked_attempts,
                cooldowns_lifted: s.cooldowns_lifted,
            },
            forgiveness: ForgivenessMetrics {
                requested: s.forgiveness_requested,
                granted: s.forgiveness_granted,
                denied: s.forgiveness_denied,
                timed_out: s.forgiveness_timed_out,
            },
            jobs: JobMetrics {
                sweep_runs: s.sweep_runs,
                sweep_failures: s.sweep_failures,
                notifications_enqueued: s.notifications_enqueued,
                notifications_failed: s.notifications_failed,
            },
        }
    }
}

/// Get metrics in JSON format.
async fn get_metrics_json() -> Json<MetricsResponse> {
    let snapshot = get_metrics().snapshot();
    Json(MetricsResponse::from(snapshot))
}

/// Get metrics in Prometheus text format.
async fn get_metrics_prometheus() -> Response {
    let prometheus_output = get_metrics().to_prometheus();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        prometheus_output,
    )
        .into_response()
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Simple health check (liveness probe).
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub database: CheckResult,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub status: String,
    pub latency_ms: Option<u64>,
}

/// Readiness check (readiness probe).
#[allow(clippy::cast_possible_truncation)]
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let start = std::time::Instant::now();

    let db_check = match state.db.ping().await {
        Ok(()) => CheckResult {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => CheckResult {
            status: format!("error: {e}"),
            latency_ms: None,
        },
    };

    let ready = db_check.status == "ok";
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            checks: ReadinessChecks { database: db_check },
        }),
    )
}
