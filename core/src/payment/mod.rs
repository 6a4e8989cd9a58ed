//! Contract with the external payment processor.
//!
//! The engine opens checkout sessions and issues refunds through a
//! [`PaymentProcessor`]. Calls are network round-trips and are always awaited
//! outside the per-event lock.
//!
//! Implementations:
//!
//! - [`StripeProcessor`]: Stripe Checkout with Connect destination accounts
//! - [`MockPaymentProcessor`]: always succeeds, for local development

mod mock;
mod stripe;

pub use mock::MockPaymentProcessor;
pub use stripe::{StripeConfig, StripeProcessor};

use crate::types::{EntryId, EventId, Money, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Payment processor result
pub type PaymentResult<T> = Result<T, PaymentError>;

/// Failures reported by the payment processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// The processor refused the request (card, account or refund rules)
    #[error("Request declined: {reason}")]
    Declined {
        /// Processor message
        reason: String,
    },

    /// The processor rejected the request as malformed or unauthorized
    #[error("Request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status returned
        status: u16,
        /// Processor message
        message: String,
    },

    /// The processor is temporarily unavailable
    #[error("Payment processor unavailable: {0}")]
    Unavailable(String),

    /// Network failure talking to the processor
    #[error("Transport error: {0}")]
    Transport(String),

    /// The processor answered with something we could not interpret
    #[error("Invalid processor response: {0}")]
    InvalidResponse(String),
}

/// Binds a checkout session to the entry it pays for.
///
/// The processor hands this back verbatim on completion. `buyerId` and
/// `waitingListEntryId` also accept the `userId` / `waitingListId` keys
/// written into Stripe session metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutMetadata {
    /// Event being purchased
    pub event_id: EventId,
    /// Buyer completing the purchase
    #[serde(alias = "userId")]
    pub buyer_id: UserId,
    /// Offered entry the payment converts
    #[serde(alias = "waitingListId")]
    pub waiting_list_entry_id: EntryId,
}

/// Everything the processor needs to open a checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    /// Line item name
    pub item_name: String,
    /// Line item description
    pub item_description: String,
    /// Unit price, quantity is always one
    pub amount: Money,
    /// Lowercase ISO currency code
    pub currency: String,
    /// Platform fee withheld from the seller
    pub application_fee: Money,
    /// Session deadline, aligned with the offer expiry
    pub expires_at: DateTime<Utc>,
    /// Redirect after successful payment
    pub success_url: String,
    /// Redirect when the buyer abandons checkout
    pub cancel_url: String,
    /// Binding returned on completion
    pub metadata: CheckoutMetadata,
    /// Seller's connected account receiving the funds
    pub destination_account: String,
}

/// Opened checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    /// Processor session id
    pub session_id: String,
    /// URL the buyer is redirected to
    pub session_url: String,
}

/// Refund of a completed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    /// Processor reference of the original payment
    pub payment_reference: String,
    /// Connected account that received the payment
    pub destination_account: Option<String>,
    /// Amount to return
    pub amount: Money,
}

/// Completed refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundResult {
    /// Processor refund id
    pub refund_reference: String,
}

/// Payment processor abstraction
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the engine can hold an
/// `Arc<dyn PaymentProcessor>`.
pub trait PaymentProcessor: Send + Sync {
    /// Open a hosted checkout session for a single ticket
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] if the processor refuses or cannot be reached
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Pin<Box<dyn Future<Output = PaymentResult<CheckoutSession>> + Send>>;

    /// Refund a completed payment in full
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] if the refund is refused or cannot be issued
    fn create_refund(
        &self,
        request: RefundRequest,
    ) -> Pin<Box<dyn Future<Output = PaymentResult<RefundResult>> + Send>>;
}
