//! Facts recorded against an event ledger.
//!
//! Every mutation of an [`EventLedger`](crate::ledger::EventLedger) is
//! expressed as a [`LedgerEvent`]: commands validate against current state,
//! record facts, and the ledger applies them. Committed facts are then
//! broadcast as notifications and recorded as metrics.

use crate::types::{EntryId, EventId, Money, Ticket, TicketId, UserId, WaitingListEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Facts recorded by one ledger transaction
pub type Changes = SmallVec<[LedgerEvent; 4]>;

/// Why an entry moved to `expired`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// Offer deadline passed without payment
    OfferTimedOut,
    /// Buyer gave the offer back
    Released,
    /// Owner cancelled the event
    EventCancelled,
}

impl ExpiryReason {
    /// Metric / log label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OfferTimedOut => "timed_out",
            Self::Released => "released",
            Self::EventCancelled => "event_cancelled",
        }
    }
}

/// A state change of an event ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A buyer joined, either directly offered or waiting
    EntryJoined {
        /// The new entry
        entry: WaitingListEntry,
    },

    /// A waiting entry was promoted into an offer
    OfferGranted {
        /// Promoted entry
        entry_id: EntryId,
        /// Buyer receiving the offer
        buyer: UserId,
        /// Offer deadline
        expires_at: DateTime<Utc>,
    },

    /// A live entry reached `expired`
    EntryExpired {
        /// Closed entry
        entry_id: EntryId,
        /// Entry holder
        buyer: UserId,
        /// What closed it
        reason: ExpiryReason,
        /// When it closed
        at: DateTime<Utc>,
    },

    /// Payment confirmed, the offered entry converted into a ticket
    TicketIssued {
        /// The new ticket
        ticket: Ticket,
    },

    /// A valid ticket was refunded
    TicketRefunded {
        /// Refunded ticket
        ticket_id: TicketId,
        /// Ticket holder
        buyer: UserId,
        /// Amount returned
        amount: Money,
        /// Processor refund id
        refund_reference: String,
    },

    /// A valid ticket was invalidated by cancellation but its refund failed
    TicketCancelled {
        /// Invalidated ticket
        ticket_id: TicketId,
        /// Ticket holder
        buyer: UserId,
        /// Processor failure
        reason: String,
    },

    /// A ticket was scanned at the door
    TicketUsed {
        /// Scanned ticket
        ticket_id: TicketId,
    },

    /// The owner cancelled the event
    EventCancelled {
        /// When the flag was set
        at: DateTime<Utc>,
    },

    /// The owner edited the event
    EventUpdated {
        /// New name
        name: String,
        /// New description
        description: String,
        /// New location
        location: String,
        /// New date
        event_date: DateTime<Utc>,
        /// New price
        price: Money,
        /// New total (never lower than before)
        total_tickets: u32,
    },

    /// A payment arrived after its offer closed and was returned.
    ///
    /// Notification only; the ledger state does not change.
    LatePaymentRefunded {
        /// Entry the payment was bound to
        entry_id: EntryId,
        /// Payer
        buyer: UserId,
        /// Processor reference of the returned payment
        payment_reference: String,
    },
}

impl LedgerEvent {
    /// Short name used for notifications, logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EntryJoined { .. } => "entry_joined",
            Self::OfferGranted { .. } => "offer_granted",
            Self::EntryExpired {
                reason: ExpiryReason::Released,
                ..
            } => "offer_released",
            Self::EntryExpired { .. } => "offer_expired",
            Self::TicketIssued { .. } => "ticket_issued",
            Self::TicketRefunded { .. } => "ticket_refunded",
            Self::TicketCancelled { .. } => "ticket_cancelled",
            Self::TicketUsed { .. } => "ticket_used",
            Self::EventCancelled { .. } => "event_cancelled",
            Self::EventUpdated { .. } => "event_updated",
            Self::LatePaymentRefunded { .. } => "late_payment_refunded",
        }
    }
}

/// A committed change, published to subscribers of the event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerNotification {
    /// Event the change belongs to
    pub event_id: EventId,
    /// The change itself
    pub change: LedgerEvent,
}
