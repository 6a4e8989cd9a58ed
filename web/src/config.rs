//! Server configuration.
//!
//! Loaded from environment variables with defaults suitable for local
//! development. The server binary loads `.env` first via `dotenvy`.

use std::env;
use std::str::FromStr;
use crate::signature::DEFAULT_TOLERANCE;
use std::time::Duration;
use ticket_queue_core::{CheckoutConfig, EngineConfig, RetryPolicy};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP and metrics listeners
    pub server: ServerConfig,
    /// `PostgreSQL` storage; `None` selects the in-memory store
    pub postgres: Option<PostgresConfig>,
    /// Payment processor and checkout settings
    pub payments: PaymentsConfig,
    /// Offer, rate-limit and sweep policy
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Allowed CORS origin, any origin when unset
    pub cors_origin: Option<String>,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Connection URL
    pub url: String,
    /// Maximum pooled connections
    pub max_connections: u32,
    /// Run migrations at startup
    pub run_migrations: bool,
}

/// Payment processor configuration
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// Stripe secret key; the mock processor is used when unset
    pub stripe_secret_key: Option<String>,
    /// Stripe API base URL
    pub stripe_api_base: String,
    /// Endpoint signing secret (`whsec_...`) checked against `Stripe-Signature`
    pub webhook_secret: Option<String>,
    /// Allowed distance between a callback's signed timestamp and now
    pub webhook_tolerance: Duration,
    /// Currency, fee and redirect settings for checkout sessions
    pub checkout: CheckoutConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to their defaults with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        let checkout_defaults = CheckoutConfig::default();

        Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_or("PORT", 8080),
                metrics_host: env::var("METRICS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                metrics_port: parse_or("METRICS_PORT", 9090),
                shutdown_timeout: Duration::from_secs(parse_or("SHUTDOWN_TIMEOUT_SECS", 30)),
                cors_origin: env::var("CORS_ORIGIN").ok(),
            },
            postgres: env::var("DATABASE_URL").ok().map(|url| PostgresConfig {
                url,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),
                run_migrations: parse_or("DATABASE_RUN_MIGRATIONS", true),
            }),
            payments: PaymentsConfig {
                stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok(),
                stripe_api_base: env::var("STRIPE_API_BASE")
                    .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
                webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok(),
                webhook_tolerance: Duration::from_secs(parse_or(
                    "STRIPE_WEBHOOK_TOLERANCE_SECS",
                    DEFAULT_TOLERANCE.as_secs(),
                )),
                checkout: CheckoutConfig {
                    currency: env::var("CHECKOUT_CURRENCY").unwrap_or(checkout_defaults.currency),
                    application_fee_bps: parse_or(
                        "APPLICATION_FEE_BPS",
                        checkout_defaults.application_fee_bps,
                    ),
                    public_base_url: env::var("PUBLIC_BASE_URL")
                        .unwrap_or(checkout_defaults.public_base_url),
                },
            },
            engine: EngineConfig {
                offer_ttl: Duration::from_secs(parse_or(
                    "OFFER_TTL_SECS",
                    defaults.offer_ttl.as_secs(),
                )),
                max_expired_claims: parse_or("MAX_EXPIRED_CLAIMS", defaults.max_expired_claims),
                claim_window: Duration::from_secs(parse_or(
                    "CLAIM_WINDOW_SECS",
                    defaults.claim_window.as_secs(),
                )),
                sweep_interval: Duration::from_secs(parse_or(
                    "SWEEP_INTERVAL_SECS",
                    defaults.sweep_interval.as_secs(),
                )),
                conflict_retry: RetryPolicy::builder()
                    .max_retries(parse_or(
                        "CONFLICT_MAX_RETRIES",
                        defaults.conflict_retry.max_retries,
                    ))
                    .build(),
                notification_capacity: parse_or(
                    "NOTIFICATION_CAPACITY",
                    defaults.notification_capacity,
                ),
            },
        }
    }

    /// `host:port` of the HTTP listener
    #[must_use]
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// `host:port` of the metrics listener
    #[must_use]
    pub fn metrics_addr(&self) -> String {
        format!("{}:{}", self.server.metrics_host, self.server.metrics_port)
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_falls_back_on_missing_key() {
        assert_eq!(parse_or("TICKET_QUEUE_TEST_SURELY_UNSET", 42u16), 42);
    }

    #[test]
    fn test_addresses() {
        let mut config = Config::from_env();
        config.server.host = "127.0.0.1".into();
        config.server.port = 3000;
        config.server.metrics_port = 9100;
        config.server.metrics_host = "127.0.0.1".into();
        assert_eq!(config.http_addr(), "127.0.0.1:3000");
        assert_eq!(config.metrics_addr(), "127.0.0.1:9100");
    }
}
