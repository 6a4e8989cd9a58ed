//! Shared handler state.

use crate::signature::WebhookVerifier;
use sqlx::PgPool;
use std::sync::Arc;
use ticket_queue_core::TicketEngine;

/// Application state shared across all HTTP handlers.
///
/// Cheap to clone; the engine and the webhook secret are reference counted.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The reservation engine
    pub engine: TicketEngine,
    /// Signature check for payment callbacks; callbacks are accepted
    /// unauthenticated when `None` (development only)
    pub webhook: Option<WebhookVerifier>,
    /// Database pool probed by the readiness check, if one is in use
    pub database: Option<PgPool>,
}

impl AppState {
    /// State around an engine, without webhook authentication or database
    #[must_use]
    pub const fn new(engine: TicketEngine) -> Self {
        Self {
            engine,
            webhook: None,
            database: None,
        }
    }

    /// Require callbacks signed with `secret`, default tolerance
    #[must_use]
    pub fn with_webhook_secret(self, secret: impl Into<Arc<str>>) -> Self {
        self.with_webhook_verifier(WebhookVerifier::new(secret))
    }

    /// Require callbacks accepted by `verifier`
    #[must_use]
    pub fn with_webhook_verifier(mut self, verifier: WebhookVerifier) -> Self {
        self.webhook = Some(verifier);
        self
    }

    /// Probe `pool` in the readiness check
    #[must_use]
    pub fn with_database(mut self, pool: PgPool) -> Self {
        self.database = Some(pool);
        self
    }
}
