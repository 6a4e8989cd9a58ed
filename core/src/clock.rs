//! Time source for the engine.
//!
//! Offer expiry is enforced by comparing stored deadlines against
//! [`Clock::now`], so every time-dependent decision goes through this trait.
//! Tests swap in a fixed or manually advanced clock.

use chrono::{DateTime, Utc};

/// Clock abstraction for deterministic time
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
