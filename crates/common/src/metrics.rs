//! Metrics collection for surplus.
//!
//! Counters for the reservation lifecycle, the penalty engine and the
//! background jobs, exported as JSON snapshots or Prometheus text.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new()))
}

/// Application metrics collector.
#[derive(Debug)]
pub struct Metrics {
    // === Request Metrics ===
    /// Total HTTP requests received
    pub http_requests_total: AtomicU64,
    /// Active HTTP requests
    pub http_requests_active: AtomicU64,
    /// HTTP requests by status code category (2xx, 4xx, 5xx)
    pub http_requests_2xx: AtomicU64,
    pub http_requests_4xx: AtomicU64,
    pub http_requests_5xx: AtomicU64,
    /// Total request latency in microseconds
    pub http_request_latency_us_total: AtomicU64,
    /// Request count for average calculation
    pub http_request_latency_count: AtomicU64,

    // === Reservation Metrics ===
    /// Reservations created
    pub reservations_created: AtomicU64,
    /// Reservations cancelled
    pub reservations_cancelled: AtomicU64,
    /// Reservations rejected because the offer ran out
    pub reservations_out_of_stock: AtomicU64,
    /// Pickups confirmed with a valid code
    pub pickups_redeemed: AtomicU64,
    /// Reservations transitioned to failed pickup
    pub missed_pickups: AtomicU64,

    // === Penalty Metrics ===
    pub penalties_warning: AtomicU64,
    pub penalties_suspension_1h: AtomicU64,
    pub penalties_suspension_24h: AtomicU64,
    pub penalties_permanent_ban: AtomicU64,
    /// Reservation attempts rejected by an active penalty
    pub blocked_attempts: AtomicU64,
    /// Suspensions lifted with points
    pub cooldowns_lifted: AtomicU64,

    // === Forgiveness Metrics ===
    pub forgiveness_requested: AtomicU64,
    pub forgiveness_granted: AtomicU64,
    pub forgiveness_denied: AtomicU64,
    pub forgiveness_timed_out: AtomicU64,

    // === Job Metrics ===
    /// Missed-pickup sweeps completed
    pub sweep_runs: AtomicU64,
    /// Reservations a sweep failed to process
    pub sweep_failures: AtomicU64,
    /// Notifications enqueued
    pub notifications_enqueued: AtomicU64,
    /// Notifications that could not be enqueued
    pub notifications_failed: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            http_requests_total: AtomicU64::new(0),
            http_requests_active: AtomicU64::new(0),
            http_requests_2xx: AtomicU64::new(0),
            http_requests_4xx: AtomicU64::new(0),
            http_requests_5xx: AtomicU64::new(0),
            http_request_latency_us_total: AtomicU64::new(0),
            http_request_latency_count: AtomicU64::new(0),

            reservations_created: AtomicU64::new(0),
            reservations_cancelled: AtomicU64::new(0),
            reservations_out_of_stock: AtomicU64::new(0),
            pickups_redeemed: AtomicU64::new(0),
            missed_pickups: AtomicU64::new(0),

            penalties_warning: AtomicU64::new(0),
            penalties_suspension_1h: AtomicU64::new(0),
            penalties_suspension_24h: AtomicU64::new(0),
            penalties_permanent_ban: AtomicU64::new(0),
            blocked_attempts: AtomicU64::new(0),
            cooldowns_lifted: AtomicU64::new(0),

            forgiveness_requested: AtomicU64::new(0),
            forgiveness_granted: AtomicU64::new(0),
            forgiveness_denied: AtomicU64::new(0),
            forgiveness_timed_out: AtomicU64::new(0),

            sweep_runs: AtomicU64::new(0),
            sweep_failures: AtomicU64::new(0),
            notifications_enqueued: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
        }
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, status_code: u16, latency: Duration) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);

        match status_code {
            200..=299 => self.http_requests_2xx.fetch_add(1, Ordering::Relaxed),
            400..=499 => self.http_requests_4xx.fetch_add(1, Ordering::Relaxed),
            500..=599 => self.http_requests_5xx.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };

        self.http_request_latency_us_total
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.http_request_latency_count
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Start tracking an active request.
    pub fn start_request(&self) {
        self.http_requests_active.fetch_add(1, Ordering::Relaxed);
    }

    /// End tracking an active request.
    pub fn end_request(&self) {
        self.http_requests_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a penalty by its type name (`warning`, `suspension_1h`, ...).
    pub fn record_penalty(&self, penalty_type: &str) {
        let counter = match penalty_type {
            "warning" => &self.penalties_warning,
            "suspension_1h" => &self.penalties_suspension_1h,
            "suspension_24h" => &self.penalties_suspension_24h,
            "permanent_ban" => &self.penalties_permanent_ban,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed missed-pickup sweep.
    pub fn record_sweep(&self, transitioned: u64, failures: u64) {
        self.sweep_runs.fetch_add(1, Ordering::Relaxed);
        self.missed_pickups.fetch_add(transitioned, Ordering::Relaxed);
        self.sweep_failures.fetch_add(failures, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            http_requests_total: self.http_requests_total.load(Ordering::Relaxed),
            http_requests_active: self.http_requests_active.load(Ordering::Relaxed),
            http_requests_2xx: self.http_requests_2xx.load(Ordering::Relaxed),
            http_requests_4xx: self.http_requests_4xx.load(Ordering::Relaxed),
            http_requests_5xx: self.http_requests_5xx.load(Ordering::Relaxed),
            http_request_latency_avg_us: self.average_latency_us(),

            reservations_created: self.reservations_created.load(Ordering::Relaxed),
            reservations_cancelled: self.reservations_cancelled.load(Ordering::Relaxed),
            reservations_out_of_stock: self.reservations_out_of_stock.load(Ordering::Relaxed),
            pickups_redeemed: self.pickups_redeemed.load(Ordering::Relaxed),
            missed_pickups: self.missed_pickups.load(Ordering::Relaxed),
            pickup_rate: self.pickup_rate(),

            penalties_warning: self.penalties_warning.load(Ordering::Relaxed),
            penalties_suspension_1h: self.penalties_suspension_1h.load(Ordering::Relaxed),
            penalties_suspension_24h: self.penalties_suspension_24h.load(Ordering::Relaxed),
            penalties_permanent_ban: self.penalties_permanent_ban.load(Ordering::Relaxed),
            blocked_attempts: self.blocked_attempts.load(Ordering::Relaxed),
            cooldowns_lifted: self.cooldowns_lifted.load(Ordering::Relaxed),

            forgiveness_requested: self.forgiveness_requested.load(Ordering::Relaxed),
            forgiveness_granted: self.forgiveness_granted.load(Ordering::Relaxed),
            forgiveness_denied: self.forgiveness_denied.load(Ordering::Relaxed),
            forgiveness_timed_out: self.forgiveness_timed_out.load(Ordering::Relaxed),

            sweep_runs: self.sweep_runs.load(Ordering::Relaxed),
            sweep_failures: self.sweep_failures.load(Ordering::Relaxed),
            notifications_enqueued: self.notifications_enqueued.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }

    /// Calculate average HTTP request latency.
    fn average_latency_us(&self) -> u64 {
        let total = self.http_request_latency_us_total.load(Ordering::Relaxed);
        let count = self.http_request_latency_count.load(Ordering::Relaxed);
        if count > 0 {
            total / count
        } else {
            0
        }
    }

    /// Share of closed-out reservations that were picked up.
    fn pickup_rate(&self) -> f64 {
        let picked = self.pickups_redeemed.load(Ordering::Relaxed);
        let missed = self.missed_pickups.load(Ordering::Relaxed);
        let total = picked + missed;
        if total > 0 {
            picked as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Export metrics in Prometheus format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        // HTTP metrics
        push_metric(
            &mut output,
            "surplus_http_requests_total",
            "counter",
            "Total HTTP requests",
            snapshot.http_requests_total,
        );
        push_metric(
            &mut output,
            "surplus_http_requests_active",
            "gauge",
            "Active HTTP requests",
            snapshot.http_requests_active,
        );

        output.push_str("# HELP surplus_http_requests_by_status HTTP requests by status\n");
        output.push_str("# TYPE surplus_http_requests_by_status counter\n");
        output.push_str(&format!(
            "surplus_http_requests_by_status{{status=\"2xx\"}} {}\n",
            snapshot.http_requests_2xx
        ));
        output.push_str(&format!(
            "surplus_http_requests_by_status{{status=\"4xx\"}} {}\n",
            snapshot.http_requests_4xx
        ));
        output.push_str(&format!(
            "surplus_http_requests_by_status{{status=\"5xx\"}} {}\n",
            snapshot.http_requests_5xx
        ));

        // Reservation metrics
        push_metric(
            &mut output,
            "surplus_reservations_created",
            "counter",
            "Reservations created",
            snapshot.reservations_created,
        );
        push_metric(
            &mut output,
            "surplus_reservations_cancelled",
            "counter",
            "Reservations cancelled",
            snapshot.reservations_cancelled,
        );
        push_metric(
            &mut output,
            "surplus_pickups_redeemed",
            "counter",
            "Pickups confirmed",
            snapshot.pickups_redeemed,
        );
        push_metric(
            &mut output,
            "surplus_missed_pickups",
            "counter",
            "Reservations marked as failed pickup",
            snapshot.missed_pickups,
        );

        // Penalty metrics
        output.push_str("# HELP surplus_penalties_total Penalties recorded by type\n");
        output.push_str("# TYPE surplus_penalties_total counter\n");
        for (kind, value) in [
            ("warning", snapshot.penalties_warning),
            ("suspension_1h", snapshot.penalties_suspension_1h),
            ("suspension_24h", snapshot.penalties_suspension_24h),
            ("permanent_ban", snapshot.penalties_permanent_ban),
        ] {
            output.push_str(&format!(
                "surplus_penalties_total{{type=\"{kind}\"}} {value}\n"
            ));
        }
        push_metric(
            &mut output,
            "surplus_cooldowns_lifted",
            "counter",
            "Suspensions lifted with points",
            snapshot.cooldowns_lifted,
        );

        // Forgiveness metrics
        output.push_str("# HELP surplus_forgiveness_decisions Forgiveness outcomes\n");
        output.push_str("# TYPE surplus_forgiveness_decisions counter\n");
        for (outcome, value) in [
            ("granted", snapshot.forgiveness_granted),
            ("denied", snapshot.forgiveness_denied),
            ("timed_out", snapshot.forgiveness_timed_out),
        ] {
            output.push_str(&format!(
                "surplus_forgiveness_decisions{{outcome=\"{outcome}\"}} {value}\n"
            ));
        }

        // Job metrics
        push_metric(
            &mut output,
            "surplus_sweep_runs",
            "counter",
            "Missed-pickup sweeps completed",
            snapshot.sweep_runs,
        );
        push_metric(
            &mut output,
            "surplus_sweep_failures",
            "counter",
            "Reservations a sweep failed to process",
            snapshot.sweep_failures,
        );
        push_metric(
            &mut output,
            "surplus_notifications_enqueued",
            "counter",
            "Notifications enqueued",
            snapshot.notifications_enqueued,
        );

        output
    }
}

fn push_metric(output: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    output.push_str(&format!("# HELP {name} {help}\n"));
    output.push_str(&format!("# TYPE {name} {kind}\n"));
    output.push_str(&format!("{name} {value}\n"));
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    // HTTP
    pub http_requests_total: u64,
    pub http_requests_active: u64,
    pub http_requests_2xx: u64,
    pub http_requests_4xx: u64,
    pub http_requests_5xx: u64,
    pub http_request_latency_avg_us: u64,

    // Reservations
    pub reservations_created: u64,
    pub reservations_cancelled: u64,
    pub reservations_out_of_stock: u64,
    pub pickups_redeemed: u64,
    pub missed_pickups: u64,
    pub pickup_rate: f64,

    // Penalties
    pub penalties_warning: u64,
    pub penalties_suspension_1h: u64,
    pub penalties_suspension_24h: u64,
    pub penalties_permanent_ban: u64,
    pub blocked_attempts: u64,
    pub cooldowns_lifted: u64,

    // Forgiveness
    pub forgiveness_requested: u64,
    pub forgiveness_granted: u64,
    pub forgiveness_denied: u64,
    pub forgiveness_timed_out: u64,

    // Jobs
    pub sweep_runs: u64,
    pub sweep_failures: u64,
    pub notifications_enqueued: u64,
    pub notifications_failed: u64,
}

/// Timer guard for measuring operation duration.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        let metrics = Metrics::new();

        metrics.record_http_request(200, Duration::from_millis(50));
        metrics.record_http_request(409, Duration::from_millis(10));
        metrics.record_http_request(503, Duration::from_millis(100));

        assert_eq!(metrics.http_requests_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.http_requests_2xx.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.http_requests_4xx.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.http_requests_5xx.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_active_request_tracking() {
        let metrics = Metrics::new();

        metrics.start_request();
        metrics.start_request();
        assert_eq!(metrics.http_requests_active.load(Ordering::Relaxed), 2);

        metrics.end_request();
        assert_eq!(metrics.http_requests_active.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_record_penalty_by_type() {
        let metrics = Metrics::new();

        metrics.record_penalty("warning");
        metrics.record_penalty("suspension_24h");
        metrics.record_penalty("suspension_24h");
        metrics.record_penalty("unknown");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.penalties_warning, 1);
        assert_eq!(snapshot.penalties_suspension_24h, 2);
        assert_eq!(snapshot.penalties_permanent_ban, 0);
    }

    #[test]
    fn test_pickup_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.pickup_rate(), 0.0);

        metrics.pickups_redeemed.fetch_add(3, Ordering::Relaxed);
        metrics.record_sweep(1, 0);

        assert!((metrics.pickup_rate() - 0.75).abs() < 0.001);
        assert_eq!(metrics.snapshot().sweep_runs, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.record_http_request(200, Duration::from_millis(50));
        metrics.record_penalty("permanent_ban");

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("surplus_http_requests_total 1"));
        assert!(prometheus.contains("surplus_http_requests_by_status{status=\"2xx\"} 1"));
        assert!(prometheus.contains("surplus_penalties_total{type=\"permanent_ban\"} 1"));
    }

    #[test]
    fn test_average_latency() {
        let metrics = Metrics::new();
        assert_eq!(metrics.average_latency_us(), 0);

        metrics.record_http_request(200, Duration::from_micros(100));
        metrics.record_http_request(200, Duration::from_micros(200));
        assert_eq!(metrics.average_latency_us(), 150);
    }
}
