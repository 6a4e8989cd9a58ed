//! Domain error taxonomy.
//!
//! Every [`EngineError`] variant carries a stable machine code
//! ([`EngineError::code`]) and a human-readable message suitable for buyers
//! and sellers. Infrastructure failures wrap [`StoreError`] and
//! [`PaymentError`].

use crate::payment::PaymentError;
use crate::store::StoreError;
use crate::types::{EntryId, EventId, TicketId, TicketStatus};
use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The buyer already holds a live entry or a ticket for the event
    #[error("You already have a place in the queue or a ticket for this event")]
    DuplicateClaim,

    /// Too many offers expired or were released inside the window
    #[error("You have had too many offers expire recently. Please wait {retry_after_minutes} minutes before trying again")]
    TooManyAttempts {
        /// Minutes until the window resets
        retry_after_minutes: i64,
    },

    /// Every ticket has been sold
    #[error("Sorry, this event is sold out")]
    NoCapacity,

    /// The event was cancelled by its owner
    #[error("This event has been cancelled")]
    EventCancelled,

    /// The event date has passed
    #[error("This event has already taken place")]
    EventOccurred,

    /// Checkout without an offered, unexpired entry
    #[error("You do not have a valid ticket offer for this event")]
    NoValidOffer,

    /// The event owner has not registered a payment account
    #[error("The seller is not set up to receive payments yet")]
    SellerNotPayable,

    /// A single refund failed
    #[error("Refund for ticket {ticket_id} failed: {reason}")]
    RefundFailed {
        /// Ticket whose refund failed
        ticket_id: TicketId,
        /// Processor message
        reason: String,
    },

    /// Unknown event
    #[error("Event {0} not found")]
    EventNotFound(EventId),

    /// Unknown waiting-list entry
    #[error("Waiting list entry {0} not found")]
    EntryNotFound(EntryId),

    /// Unknown ticket
    #[error("Ticket {0} not found")]
    TicketNotFound(TicketId),

    /// Caller is not allowed to act on the resource
    #[error("You are not allowed to {action}")]
    NotOwner {
        /// What the caller attempted
        action: &'static str,
    },

    /// Event creation or update payload failed validation
    #[error("{0}")]
    InvalidEvent(String),

    /// The ticket is not in a status that allows the operation
    #[error("Ticket is {status} and cannot be {action}")]
    InvalidTicketState {
        /// Current status
        status: TicketStatus,
        /// Attempted transition, past tense ("used", "refunded")
        action: &'static str,
    },

    /// Persistence failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Payment processor failure
    #[error("Payment processor error: {0}")]
    Payment(#[from] PaymentError),
}

impl EngineError {
    /// Stable machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DuplicateClaim => "DUPLICATE_CLAIM",
            Self::TooManyAttempts { .. } => "TOO_MANY_ATTEMPTS",
            Self::NoCapacity => "NO_CAPACITY",
            Self::EventCancelled => "EVENT_CANCELLED",
            Self::EventOccurred => "EVENT_OCCURRED",
            Self::NoValidOffer => "NO_VALID_OFFER",
            Self::SellerNotPayable => "SELLER_NOT_PAYABLE",
            Self::RefundFailed { .. } => "REFUND_FAILED",
            Self::EventNotFound(_) => "EVENT_NOT_FOUND",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::TicketNotFound(_) => "TICKET_NOT_FOUND",
            Self::NotOwner { .. } => "NOT_OWNER",
            Self::InvalidEvent(_) => "INVALID_EVENT",
            Self::InvalidTicketState { .. } => "INVALID_TICKET_STATE",
            Self::Store(_) => "STORE_ERROR",
            Self::Payment(_) => "PAYMENT_ERROR",
        }
    }

    /// Whether the failure is the caller's to fix (as opposed to infrastructure)
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::Payment(_))
    }
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
