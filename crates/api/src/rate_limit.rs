//! Request throttling.
//!
//! Every client address gets a fixed-window budget for the whole API.
//! Redeeming pickup codes has a much smaller budget, charged per partner
//! and client address, so nobody can walk the code space by brute force.
//!
//! The client address is the TCP peer. Forwarding headers are only honored
//! when [`RateLimitSettings::trust_proxy_headers`] is set.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use surplus_common::{AppError, RateLimitSettings};
use tokio::sync::Mutex;

/// Largest redeem body read while looking for the partner id.
const MAX_REDEEM_BODY: usize = 16 * 1024;

/// Key used when the peer address is unavailable.
const UNKNOWN_CLIENT: &str = "unknown";

/// `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Requests admitted per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
}

impl Budget {
    /// `limit` requests per minute.
    #[must_use]
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
        }
    }
}

/// Budget left after an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    /// Requests still allowed in this window.
    pub remaining: u32,
    /// Seconds until the window reopens.
    pub reset_secs: u64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at: Instant,
    hits: u32,
}

/// Fixed-window counters, one per key.
#[derive(Clone)]
pub struct Throttle {
    budget: Budget,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl Throttle {
    /// Create an empty throttle.
    #[must_use]
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The configured budget.
    #[must_use]
    pub const fn budget(&self) -> Budget {
        self.budget
    }

    /// Count one request for `key` at `now`.
    pub async fn admit(&self, key: &str, now: Instant) -> Result<Admitted, AppError> {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key.to_string()).or_insert(Window {
            opened_at: now,
            hits: 0,
        });

        if now.saturating_duration_since(window.opened_at) >= self.budget.window {
            *window = Window {
                opened_at: now,
                hits: 0,
            };
        }
        let reset = self
            .budget
            .window
            .saturating_sub(now.saturating_duration_since(window.opened_at));

        if window.hits >= self.budget.limit {
            return Err(AppError::RateLimited {
                retry_after_secs: reset.as_secs().max(1),
            });
        }

        window.hits += 1;
        Ok(Admitted {
            remaining: self.budget.limit - window.hits,
            reset_secs: reset.as_secs(),
        })
    }

    /// Drop keys whose window closed before `now`.
    pub async fn evict_idle(&self, now: Instant) {
        let window = self.budget.window;
        self.windows
            .lock()
            .await
            .retain(|_, w| now.saturating_duration_since(w.opened_at) < window);
    }

    /// Number of keys currently tracked.
    pub async fn tracked(&self) -> usize {
        self.windows.lock().await.len()
    }
}

/// Shared limiter state handed to both middlewares.
#[derive(Clone)]
pub struct RateLimiterState {
    /// Whole-API bucket, keyed by client address.
    pub standard: Throttle,
    /// Redeem bucket, keyed by partner and client address.
    pub pickup: Throttle,
    trust_proxy_headers: bool,
}

impl RateLimiterState {
    /// Build both buckets from settings.
    #[must_use]
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            standard: Throttle::new(Budget::per_minute(settings.standard_per_minute)),
            pickup: Throttle::new(Budget::per_minute(settings.pickup_per_minute)),
            trust_proxy_headers: settings.trust_proxy_headers,
        }
    }

    /// Drop idle keys from both buckets.
    pub async fn evict_idle(&self) {
        let now = Instant::now();
        self.standard.evict_idle(now).await;
        self.pickup.evict_idle(now).await;
    }

    fn client(&self, req: &Request) -> String {
        client_ip(req, self.trust_proxy_headers)
            .map_or_else(|| UNKNOWN_CLIENT.to_string(), |ip| ip.to_string())
    }
}

/// Address the request is charged to.
fn client_ip(req: &Request, trust_proxy_headers: bool) -> Option<IpAddr> {
    trust_proxy_headers
        .then(|| forwarded_ip(req.headers()))
        .flatten()
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
}

/// The hop our proxy appended last, then `X-Real-IP`.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header_ip = |name: &str, pick_last: bool| -> Option<IpAddr> {
        let value = headers.get(name)?.to_str().ok()?;
        let hop = if pick_last {
            value.rsplit(',').next()?
        } else {
            value
        };
        hop.trim().parse().ok()
    };
    header_ip("x-forwarded-for", true).or_else(|| header_ip("x-real-ip", false))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedeemPartner {
    partner_id: Option<String>,
}

fn with_budget_headers(mut response: Response, budget: Budget, admitted: Admitted) -> Response {
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(budget.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(admitted.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(admitted.reset_secs));
    response
}

/// Whole-API budget per client address.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiterState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = limiter.client(&req);
    let admitted = limiter
        .standard
        .admit(&client, Instant::now())
        .await
        .inspect_err(|_| tracing::debug!(client = %client, "Rate limited"))?;

    Ok(with_budget_headers(
        next.run(req).await,
        limiter.standard.budget(),
        admitted,
    ))
}

/// Redeem budget per partner and client address.
///
/// The body is buffered to read `partnerId` and handed on unchanged.
pub async fn rate_limit_pickup_middleware(
    State(limiter): State<RateLimiterState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = limiter.client(&req);
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_REDEEM_BODY)
        .await
        .map_err(|_| AppError::BadRequest("Request body too large".to_string()))?;

    let partner = serde_json::from_slice::<RedeemPartner>(&bytes)
        .ok()
        .and_then(|p| p.partner_id)
        .unwrap_or_default();
    let key = format!("{partner}@{client}");

    let admitted = limiter
        .pickup
        .admit(&key, Instant::now())
        .await
        .inspect_err(|_| {
            tracing::warn!(partner_id = %partner, client = %client, "Redeem attempts throttled");
        })?;

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(with_budget_headers(
        next.run(req).await,
        limiter.pickup.budget(),
        admitted,
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http;

    fn request(peer: Option<[u8; 4]>, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().uri("/api/pickup/redeem");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Some(ip) = peer {
            builder = builder.extension(ConnectInfo(SocketAddr::from((ip, 40_000))));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_budget_counts_down_then_refuses() {
        let throttle = Throttle::new(Budget::per_minute(3));
        let now = Instant::now();

        let remaining: Vec<u32> = [
            throttle.admit("partner1@10.0.0.1", now).await.unwrap(),
            throttle.admit("partner1@10.0.0.1", now).await.unwrap(),
            throttle.admit("partner1@10.0.0.1", now).await.unwrap(),
        ]
        .iter()
        .map(|a| a.remaining)
        .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let refused = throttle
            .admit("partner1@10.0.0.1", now + Duration::from_secs(15))
            .await;
        assert!(matches!(
            refused,
            Err(AppError::RateLimited {
                retry_after_secs: 45
            })
        ));
    }

    #[tokio::test]
    async fn test_window_reopens_after_a_minute() {
        let throttle = Throttle::new(Budget::per_minute(1));
        let start = Instant::now();

        throttle.admit("10.0.0.1", start).await.unwrap();
        assert!(throttle.admit("10.0.0.1", start).await.is_err());

        let admitted = throttle
            .admit("10.0.0.1", start + Duration::from_secs(61))
            .await
            .unwrap();
        assert_eq!(admitted.remaining, 0);
        assert_eq!(admitted.reset_secs, 60);
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_open_windows() {
        let throttle = Throttle::new(Budget::per_minute(5));
        let start = Instant::now();

        throttle.admit("old", start).await.unwrap();
        throttle
            .admit("fresh", start + Duration::from_secs(50))
            .await
            .unwrap();
        throttle.evict_idle(start + Duration::from_secs(70)).await;

        assert_eq!(throttle.tracked().await, 1);
    }

    #[test]
    fn test_peer_address_is_the_client() {
        let req = request(Some([10, 0, 0, 7]), &[]);
        assert_eq!(client_ip(&req, false), Some(IpAddr::from([10, 0, 0, 7])));
        assert_eq!(client_ip(&request(None, &[]), false), None);
    }

    #[test]
    fn test_forwarded_headers_ignored_unless_trusted() {
        let req = request(
            Some([10, 0, 0, 7]),
            &[("x-forwarded-for", "203.0.113.9"), ("x-real-ip", "203.0.113.10")],
        );

        assert_eq!(client_ip(&req, false), Some(IpAddr::from([10, 0, 0, 7])));
    }

    #[test]
    fn test_trusted_proxy_uses_last_forwarded_hop() {
        let req = request(
            Some([10, 0, 0, 7]),
            &[("x-forwarded-for", "1.2.3.4, 203.0.113.9")],
        );
        assert_eq!(
            client_ip(&req, true),
            Some(IpAddr::from([203, 0, 113, 9]))
        );

        let real_ip = request(Some([10, 0, 0, 7]), &[("x-real-ip", "203.0.113.10")]);
        assert_eq!(
            client_ip(&real_ip, true),
            Some(IpAddr::from([203, 0, 113, 10]))
        );
    }

    #[test]
    fn test_settings_shape_both_budgets() {
        let limiter = RateLimiterState::new(&RateLimitSettings {
            standard_per_minute: 100,
            pickup_per_minute: 5,
            trust_proxy_headers: false,
        });

        assert_eq!(limiter.standard.budget(), Budget::per_minute(100));
        assert_eq!(limiter.pickup.budget(), Budget::per_minute(5));
    }
}
