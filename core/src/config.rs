//! Engine tuning knobs.

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Policy constants for offers, rate limiting and sweeping.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How long an offer stays valid (30 minutes by default, the minimum
    /// lifetime the payment processor accepts for a checkout session)
    pub offer_ttl: Duration,
    /// Expired or released entries tolerated per buyer and event inside the
    /// window before joins are refused
    pub max_expired_claims: u32,
    /// Sliding window for the join rate limit
    pub claim_window: Duration,
    /// Interval between background sweeps
    pub sweep_interval: Duration,
    /// Backoff applied when a ledger save loses the compare-and-swap
    pub conflict_retry: RetryPolicy,
    /// Buffer of the notification channel
    pub notification_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            offer_ttl: Duration::from_secs(30 * 60),
            max_expired_claims: 3,
            claim_window: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(30),
            conflict_retry: RetryPolicy::default(),
            notification_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Offer TTL as a chrono duration
    #[must_use]
    pub fn offer_ttl_chrono(&self) -> chrono::Duration {
        to_chrono(self.offer_ttl)
    }

    /// Rate-limit window as a chrono duration
    #[must_use]
    pub fn claim_window_chrono(&self) -> chrono::Duration {
        to_chrono(self.claim_window)
    }
}

/// Settings forwarded to the payment processor when opening a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// ISO currency code, lowercase (e.g. "usd")
    pub currency: String,
    /// Platform fee in basis points of the ticket price
    pub application_fee_bps: u32,
    /// Public base URL used to build the success and cancel redirects
    pub public_base_url: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            application_fee_bps: 100,
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
