//! Application configuration loaded from environment variables.

use std::time::Duration;

use consumer::{ConsumerSettings, SweepSettings};
use domain::Money;
use saga::SagaSettings;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — PostgreSQL URL; unset runs on the in-memory store
/// - `PAYMENT_EXPIRY_SECS` — age at which a pending online payment fails (default: `900`)
/// - `SWEEP_INTERVAL_SECS` — payment expiry sweep period (default: `60`)
/// - `STOCK_TASK_LEASE_SECS` — how long a worker owns a claimed stock task (default: `300`)
/// - `CONSUMER_PARTITIONS` — payment event partitions (default: `4`)
/// - `CATALOG_CONCURRENCY` — parallel catalog lookups per checkout (default: `8`)
/// - `SHIPPING_FEE_PER_SHOP` — flat shipping fee per shop order (default: `30000`)
/// - `COMMISSION_RATE_BPS` — platform commission in basis points (default: `1000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub payment_expiry_secs: u64,
    pub sweep_interval_secs: u64,
    pub stock_task_lease_secs: u64,
    pub consumer_partitions: usize,
    pub catalog_concurrency: usize,
    pub shipping_fee_per_shop: i64,
    pub commission_rate_bps: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parse_env("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: std::env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            payment_expiry_secs: parse_env("PAYMENT_EXPIRY_SECS")
                .unwrap_or(defaults.payment_expiry_secs),
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval_secs),
            stock_task_lease_secs: parse_env("STOCK_TASK_LEASE_SECS")
                .unwrap_or(defaults.stock_task_lease_secs),
            consumer_partitions: parse_env("CONSUMER_PARTITIONS")
                .unwrap_or(defaults.consumer_partitions),
            catalog_concurrency: parse_env("CATALOG_CONCURRENCY")
                .unwrap_or(defaults.catalog_concurrency),
            shipping_fee_per_shop: parse_env("SHIPPING_FEE_PER_SHOP")
                .unwrap_or(defaults.shipping_fee_per_shop),
            commission_rate_bps: parse_env("COMMISSION_RATE_BPS")
                .unwrap_or(defaults.commission_rate_bps),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn saga_settings(&self) -> SagaSettings {
        SagaSettings {
            shipping_fee_per_shop: Money::new(self.shipping_fee_per_shop),
            commission_bps: self.commission_rate_bps,
            catalog_concurrency: self.catalog_concurrency.max(1),
        }
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings::default()
    }

    /// Lease on claimed stock tasks; never shorter than one second.
    pub fn stock_task_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stock_task_lease_secs.clamp(1, MAX_EXPIRY_SECS) as i64)
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            payment_expiry: chrono::Duration::seconds(
                self.payment_expiry_secs.min(MAX_EXPIRY_SECS) as i64,
            ),
            interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        }
    }
}

/// Upper bound keeping the expiry representable as a `chrono::Duration`.
const MAX_EXPIRY_SECS: u64 = 10 * 365 * 24 * 3600;

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            payment_expiry_secs: 900,
            sweep_interval_secs: 60,
            stock_task_lease_secs: 300,
            consumer_partitions: 4,
            catalog_concurrency: 8,
            shipping_fee_per_shop: 30_000,
            commission_rate_bps: 1_000,
        }
    }
}
