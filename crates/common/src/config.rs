//! Application configuration.

use serde::Deserialize;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration. Without it notices are stored inline.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Reservation and penalty policy.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Background job intervals.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Request throttling.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Reservation and penalty policy knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Allow a customer to hold several active reservations at once.
    #[serde(default)]
    pub allow_concurrent_reservations: bool,
    /// Largest quantity a single reservation may claim.
    #[serde(default = "default_max_quantity")]
    pub max_quantity_per_reservation: i32,
    /// Points charged to lift an active suspension.
    #[serde(default = "default_cooldown_lift_cost")]
    pub cooldown_lift_cost: i64,
    /// Lowest offense number whose suspension may be lifted with points.
    #[serde(default = "default_cooldown_lift_min_offense")]
    pub cooldown_lift_min_offense: i32,
    /// Hours a partner has to answer a forgiveness request.
    #[serde(default = "default_forgiveness_timeout_hours")]
    pub forgiveness_timeout_hours: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_concurrent_reservations: false,
            max_quantity_per_reservation: default_max_quantity(),
            cooldown_lift_cost: default_cooldown_lift_cost(),
            cooldown_lift_min_offense: default_cooldown_lift_min_offense(),
            forgiveness_timeout_hours: default_forgiveness_timeout_hours(),
        }
    }
}

impl PolicyConfig {
    /// Forgiveness timeout as a chrono duration.
    #[must_use]
    pub fn forgiveness_timeout(&self) -> chrono::Duration {
        chrono::Duration::hours(self.forgiveness_timeout_hours)
    }
}

/// Background job settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between missed-pickup sweeps.
    #[serde(default = "default_missed_pickup_interval")]
    pub missed_pickup_interval_secs: u64,
    /// Seconds between forgiveness expiry runs.
    #[serde(default = "default_forgiveness_expiry_interval")]
    pub forgiveness_expiry_interval_secs: u64,
    /// Overdue reservations read per page during a sweep.
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            missed_pickup_interval_secs: default_missed_pickup_interval(),
            forgiveness_expiry_interval_secs: default_forgiveness_expiry_interval(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

impl SchedulerSettings {
    /// Missed-pickup sweep interval.
    #[must_use]
    pub const fn missed_pickup_interval(&self) -> Duration {
        Duration::from_secs(self.missed_pickup_interval_secs)
    }

    /// Forgiveness expiry interval.
    #[must_use]
    pub const fn forgiveness_expiry_interval(&self) -> Duration {
        Duration::from_secs(self.forgiveness_expiry_interval_secs)
    }
}

/// Request throttling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Requests per minute per client address across the API.
    #[serde(default = "default_standard_per_minute")]
    pub standard_per_minute: u32,
    /// Redeem attempts per minute per partner and client address.
    #[serde(default = "default_pickup_per_minute")]
    pub pickup_per_minute: u32,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    ///
    /// Only enable behind a reverse proxy that overwrites these headers;
    /// otherwise clients can pick their own address.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            standard_per_minute: default_standard_per_minute(),
            pickup_per_minute: default_pickup_per_minute(),
            trust_proxy_headers: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "surplus".to_string()
}

const fn default_max_quantity() -> i32 {
    10
}

const fn default_cooldown_lift_cost() -> i64 {
    100
}

const fn default_cooldown_lift_min_offense() -> i32 {
    3
}

const fn default_forgiveness_timeout_hours() -> i64 {
    24
}

const fn default_missed_pickup_interval() -> u64 {
    120
}

const fn default_forgiveness_expiry_interval() -> u64 {
    600
}

const fn default_sweep_batch_size() -> u64 {
    500
}

const fn default_standard_per_minute() -> u32 {
    300
}

const fn default_pickup_per_minute() -> u32 {
    20
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `SURPLUS_ENV`)
    /// 4. Environment variables with `SURPLUS__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("SURPLUS_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("SURPLUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_policy_defaults() {
        let config = parse(
            r#"
            [server]
            host = "127.0.0.1"
            [database]
            url = "postgres://localhost/surplus"
            "#,
        );

        assert!(config.redis.is_none());
        assert!(!config.policy.allow_concurrent_reservations);
        assert_eq!(config.policy.cooldown_lift_cost, 100);
        assert_eq!(config.policy.cooldown_lift_min_offense, 3);
        assert_eq!(config.policy.forgiveness_timeout(), chrono::Duration::hours(24));
        assert_eq!(
            config.scheduler.missed_pickup_interval(),
            Duration::from_secs(120)
        );
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.rate_limit.pickup_per_minute, 20);
        assert!(!config.rate_limit.trust_proxy_headers);
    }

    #[test]
    fn test_policy_overrides() {
        let config = parse(
            r#"
            [server]
            port = 8080
            [database]
            url = "postgres://localhost/surplus"
            [redis]
            url = "redis://localhost"
            [policy]
            allow_concurrent_reservations = true
            cooldown_lift_cost = 250
            [scheduler]
            sweep_batch_size = 50
            [rate_limit]
            trust_proxy_headers = true
            "#,
        );

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.redis.unwrap().prefix, "surplus");
        assert!(config.policy.allow_concurrent_reservations);
        assert_eq!(config.policy.cooldown_lift_cost, 250);
        assert_eq!(config.policy.max_quantity_per_reservation, 10);
        assert_eq!(config.scheduler.sweep_batch_size, 50);
        assert!(config.rate_limit.trust_proxy_headers);
        assert_eq!(config.rate_limit.standard_per_minute, 300);
    }
}
