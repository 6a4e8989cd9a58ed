//! Payment processor callbacks.
//!
//! The processor posts a Stripe-shaped envelope:
//!
//! ```json
//! {
//!   "type": "checkout.session.completed",
//!   "data": { "object": {
//!     "id": "cs_...",
//!     "payment_intent": "pi_...",
//!     "amount_total": 5000,
//!     "metadata": { "eventId": "...", "userId": "...", "waitingListId": "..." }
//!   } }
//! }
//! ```
//!
//! Only completed checkout sessions are acted on; other event types are
//! acknowledged so the processor stops retrying them. When a webhook secret
//! is configured, the raw body must carry a valid `Stripe-Signature`
//! (see [`crate::signature`]).

use crate::error::AppError;
use crate::signature::SIGNATURE_HEADER;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use ticket_queue_core::{CheckoutMetadata, Money, PaymentConfirmation, PurchaseOutcome};

/// Callback event type that confirms a payment
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Processor callback envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Event type, e.g. `checkout.session.completed`
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload; only read for completed sessions
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    object: CompletedSession,
}

/// Completed checkout session as reported by the processor
#[derive(Debug, Serialize, Deserialize)]
pub struct CompletedSession {
    /// Session id
    pub id: String,
    /// Captured payment; refunds are issued against it
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Amount captured in minor units
    #[serde(default)]
    pub amount_total: Option<u64>,
    /// Metadata attached when the session was opened
    pub metadata: CheckoutMetadata,
}

/// Acknowledgement returned to the processor
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// The callback was accepted
    pub received: bool,
    /// What happened to the payment, for completed sessions
    pub outcome: Option<PurchaseOutcome>,
}

/// Handle a processor callback.
///
/// ```text
/// POST /api/webhooks/payments
/// ```
///
/// # Errors
///
/// 401 for a missing, stale or wrong signature, 400 for an unreadable body, and the
/// engine's mapping when the metadata names unknown records.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    if let Some(verifier) = &state.webhook {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        let now = state.engine.now().timestamp();
        if let Err(e) = verifier.verify(signature, &body, now) {
            tracing::warn!(error = %e, "Payment callback rejected");
            return Err(AppError::unauthorized(format!("Invalid webhook signature: {e}")));
        }
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Unreadable payment callback");
        AppError::bad_request(format!("Invalid callback payload: {e}"))
    })?;

    if envelope.kind != CHECKOUT_COMPLETED {
        tracing::debug!(kind = %envelope.kind, "Ignoring payment callback");
        return Ok(Json(WebhookResponse {
            received: true,
            outcome: None,
        }));
    }

    let SessionData { object: session } = serde_json::from_value(envelope.data).map_err(|e| {
        tracing::warn!(error = %e, "Completed session without usable metadata");
        AppError::bad_request(format!("Invalid checkout session: {e}"))
    })?;
    let confirmation = PaymentConfirmation {
        payment_reference: session.payment_intent.unwrap_or_else(|| session.id.clone()),
        amount: session.amount_total.map(Money::from_minor),
    };
    tracing::info!(
        session_id = %session.id,
        event_id = %session.metadata.event_id,
        entry_id = %session.metadata.waiting_list_entry_id,
        "Payment confirmed"
    );

    let outcome = state
        .engine
        .complete_purchase(&session.metadata, &confirmation)
        .await?;

    Ok(Json(WebhookResponse {
        received: true,
        outcome: Some(outcome),
    }))
}
