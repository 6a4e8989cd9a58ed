//! Domain types for the ticket queue.
//!
//! Identifiers, money, and the three stored entities: [`Event`],
//! [`WaitingListEntry`] and [`Ticket`]. Availability and queue positions are
//! derived values and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a waiting-list entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Creates a new random `EntryId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EntryId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque user identity supplied by the external identity provider.
///
/// The engine never interprets the value; it only compares identities for
/// equality (owner checks, one live claim per buyer).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps an identity token
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity token
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Version of an event ledger, used for compare-and-swap writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Creates a version from a raw counter
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw counter value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version that follows this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// Amount in the minor currency unit (cents, đồng, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates an amount from minor units
    #[must_use]
    pub const fn from_minor(units: u64) -> Self {
        Self(units)
    }

    /// Amount in minor units
    #[must_use]
    pub const fn minor_units(self) -> u64 {
        self.0
    }

    /// Share of this amount expressed in basis points, rounded half up.
    ///
    /// `Money::from_minor(10_000).basis_points(100)` is 1% = 100.
    #[must_use]
    pub fn basis_points(self, bps: u32) -> Self {
        let scaled = u128::from(self.0) * u128::from(bps) + 5_000;
        Self(u64::try_from(scaled / 10_000).unwrap_or(u64::MAX))
    }

    /// Saturating sum
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event
// ============================================================================

/// An event listed by a seller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier
    pub id: EventId,
    /// Seller who listed the event
    pub owner: UserId,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Venue / location
    pub location: String,
    /// When the event takes place
    pub event_date: DateTime<Utc>,
    /// Ticket price in minor units
    pub price: Money,
    /// Total sellable tickets (only ever increases)
    pub total_tickets: u32,
    /// Set once the owner cancels the event
    pub is_cancelled: bool,
    /// When the event was listed
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// True once the event date has passed
    #[must_use]
    pub fn has_occurred(&self, now: DateTime<Utc>) -> bool {
        self.event_date <= now
    }
}

// ============================================================================
// Waiting list
// ============================================================================

/// Status of a waiting-list entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Queued behind other buyers
    Waiting,
    /// Holding a time-boxed right to buy one ticket
    Offered,
    /// Offer lapsed, was released, or the event was cancelled (terminal)
    Expired,
    /// Converted into a ticket (terminal)
    Purchased,
}

impl EntryStatus {
    /// Stable storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Offered => "offered",
            Self::Expired => "expired",
            Self::Purchased => "purchased",
        }
    }

    /// Terminal statuses never change again
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Purchased)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "offered" => Ok(Self::Offered),
            "expired" => Ok(Self::Expired),
            "purchased" => Ok(Self::Purchased),
            other => Err(format!("unknown waiting-list status '{other}'")),
        }
    }
}

/// A buyer's claim on an event: queued, offered, or closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingListEntry {
    /// Entry identifier
    pub id: EntryId,
    /// Event the entry belongs to
    pub event_id: EventId,
    /// Buyer holding the claim
    pub buyer: UserId,
    /// Current status
    pub status: EntryStatus,
    /// Offer deadline; `Some` exactly while `status == Offered`
    pub offer_expires_at: Option<DateTime<Utc>>,
    /// When the buyer joined
    pub created_at: DateTime<Utc>,
    /// Join order within the event, breaks creation-time ties
    pub sequence: u64,
    /// When the entry reached a terminal status
    pub closed_at: Option<DateTime<Utc>>,
}

impl WaitingListEntry {
    /// Offered with a deadline still in the future
    #[must_use]
    pub fn holds_active_offer(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Offered && self.offer_expires_at.is_some_and(|at| at > now)
    }

    /// Offered but the deadline has passed (awaiting sweep)
    #[must_use]
    pub fn offer_is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Offered && self.offer_expires_at.is_none_or(|at| at <= now)
    }

    /// Waiting, or holding an active offer
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Waiting || self.holds_active_offer(now)
    }

    /// FIFO ordering key
    #[must_use]
    pub const fn queue_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.sequence)
    }

    /// Status as seen by a reader at `now` (past-due offers read as expired)
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> EntryStatus {
        if self.offer_is_past_due(now) {
            EntryStatus::Expired
        } else {
            self.status
        }
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Status of an issued ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Paid and usable
    Valid,
    /// Scanned at the door
    Used,
    /// Money returned to the buyer
    Refunded,
    /// Invalidated by event cancellation without a completed refund
    Cancelled,
}

impl TicketStatus {
    /// Stable storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Used => "used",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }

    /// Valid and used tickets hold a unit of inventory
    #[must_use]
    pub const fn holds_inventory(self) -> bool {
        matches!(self, Self::Valid | Self::Used)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Self::Valid),
            "used" => Ok(Self::Used),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

/// A purchased ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Event the ticket admits to
    pub event_id: EventId,
    /// Waiting-list entry the ticket was issued against
    pub entry_id: EntryId,
    /// Ticket holder
    pub buyer: UserId,
    /// Current status
    pub status: TicketStatus,
    /// Price paid
    pub amount: Money,
    /// Processor reference used for refunds
    pub payment_reference: String,
    /// When payment was confirmed
    pub purchased_at: DateTime<Utc>,
}

// ============================================================================
// Derived views
// ============================================================================

/// Inventory snapshot for an event, derived from tickets and entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Event the snapshot describes
    pub event_id: EventId,
    /// Total sellable tickets
    pub total: u32,
    /// Valid or used tickets
    pub purchased: u32,
    /// Unexpired offers holding a unit in reserve
    pub active_offers: u32,
}

impl Availability {
    /// Units neither sold nor reserved
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.total.saturating_sub(self.purchased + self.active_offers)
    }

    /// A new offer can be granted
    #[must_use]
    pub const fn has_capacity(&self) -> bool {
        self.purchased + self.active_offers < self.total
    }

    /// Every unit has been paid for
    #[must_use]
    pub const fn is_sold_out(&self) -> bool {
        self.purchased >= self.total
    }
}

/// A buyer's place in an event's queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePosition {
    /// Entry the position describes
    pub entry_id: EntryId,
    /// Status as of the read (past-due offers read as expired)
    pub status: EntryStatus,
    /// 1 + live entries created earlier; only for waiting entries
    pub position: Option<u32>,
    /// 1 + waiting entries created earlier; only for waiting entries
    pub waiting_rank: Option<u32>,
    /// Offer deadline; only for offered entries
    pub offer_expires_at: Option<DateTime<Utc>>,
}

/// Sales figures for one of a seller's events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetrics {
    /// Valid or used tickets
    pub sold: u32,
    /// Refunded tickets
    pub refunded: u32,
    /// Tickets invalidated without a completed refund
    pub cancelled: u32,
    /// Sum paid for valid and used tickets
    pub revenue: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis_points_rounds_half_up() {
        assert_eq!(Money::from_minor(10_000).basis_points(100), Money::from_minor(100));
        assert_eq!(Money::from_minor(150).basis_points(100), Money::from_minor(2));
        assert_eq!(Money::from_minor(149).basis_points(100), Money::from_minor(1));
        assert_eq!(Money::ZERO.basis_points(100), Money::ZERO);
    }

    #[test]
    fn test_status_parsing_matches_storage_names() {
        for status in [
            EntryStatus::Waiting,
            EntryStatus::Offered,
            EntryStatus::Expired,
            EntryStatus::Purchased,
        ] {
            assert_eq!(status.as_str().parse::<EntryStatus>(), Ok(status));
        }
        assert!("pending".parse::<EntryStatus>().is_err());
        assert_eq!("used".parse::<TicketStatus>(), Ok(TicketStatus::Used));
    }

    #[test]
    fn test_availability_capacity() {
        let availability = Availability {
            event_id: EventId::new(),
            total: 3,
            purchased: 1,
            active_offers: 1,
        };
        assert!(availability.has_capacity());
        assert_eq!(availability.remaining(), 1);
        assert!(!availability.is_sold_out());

        let full = Availability {
            active_offers: 2,
            ..availability
        };
        assert!(!full.has_capacity());
        assert_eq!(full.remaining(), 0);
    }
}
