//! The per-event aggregate.
//!
//! An [`EventLedger`] holds an event together with every waiting-list entry
//! and ticket ever recorded against it, plus the version used for
//! compare-and-swap writes. Availability is always derived by scanning
//! entries and tickets; there is no stored counter that could drift.
//!
//! State only changes through [`EventLedger::record`], which applies a
//! [`LedgerEvent`] and appends it to the transaction's [`Changes`].

use crate::events::{Changes, LedgerEvent};
use crate::types::{
    Availability, EntryId, EntryStatus, Event, EventMetrics, QueuePosition, Ticket, TicketId,
    TicketStatus, UserId, Version, WaitingListEntry,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event plus its entries and tickets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLedger {
    /// The event record
    pub event: Event,
    /// Waiting-list entries in join order
    pub entries: Vec<WaitingListEntry>,
    /// Tickets in issue order
    pub tickets: Vec<Ticket>,
    /// Version at load time; bumped by every committed write
    pub version: Version,
}

impl EventLedger {
    /// Fresh ledger for a newly listed event
    #[must_use]
    pub const fn new(event: Event) -> Self {
        Self {
            event,
            entries: Vec::new(),
            tickets: Vec::new(),
            version: Version::new(0),
        }
    }

    // ========================================================================
    // Inventory
    // ========================================================================

    /// Derived inventory snapshot at `now`
    #[must_use]
    pub fn availability(&self, now: DateTime<Utc>) -> Availability {
        Availability {
            event_id: self.event.id,
            total: self.event.total_tickets,
            purchased: self.purchased_count(),
            active_offers: count(self.entries.iter().filter(|e| e.holds_active_offer(now))),
        }
    }

    /// `purchased + activeOffers < total`
    #[must_use]
    pub fn has_capacity(&self, now: DateTime<Utc>) -> bool {
        self.availability(now).has_capacity()
    }

    /// Tickets holding inventory (valid or used)
    #[must_use]
    pub fn purchased_count(&self) -> u32 {
        count(self.tickets.iter().filter(|t| t.status.holds_inventory()))
    }

    /// Sales figures for the seller dashboard
    #[must_use]
    pub fn metrics(&self) -> EventMetrics {
        self.tickets
            .iter()
            .fold(EventMetrics::default(), |mut metrics, ticket| {
                match ticket.status {
                    TicketStatus::Valid | TicketStatus::Used => {
                        metrics.sold += 1;
                        metrics.revenue = metrics.revenue.saturating_add(ticket.amount);
                    }
                    TicketStatus::Refunded => metrics.refunded += 1,
                    TicketStatus::Cancelled => metrics.cancelled += 1,
                }
                metrics
            })
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Entry by id
    #[must_use]
    pub fn entry(&self, entry_id: EntryId) -> Option<&WaitingListEntry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    /// Ticket by id
    #[must_use]
    pub fn ticket(&self, ticket_id: TicketId) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.id == ticket_id)
    }

    /// Ticket issued against an entry
    #[must_use]
    pub fn ticket_for_entry(&self, entry_id: EntryId) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.entry_id == entry_id)
    }

    /// The buyer's waiting or actively offered entry
    #[must_use]
    pub fn live_entry_for(&self, buyer: &UserId, now: DateTime<Utc>) -> Option<&WaitingListEntry> {
        self.entries
            .iter()
            .find(|e| &e.buyer == buyer && e.is_live(now))
    }

    /// The buyer's most relevant entry: the live one, else the latest
    #[must_use]
    pub fn current_entry_for(&self, buyer: &UserId, now: DateTime<Utc>) -> Option<&WaitingListEntry> {
        self.live_entry_for(buyer, now).or_else(|| {
            self.entries
                .iter()
                .filter(|e| &e.buyer == buyer)
                .max_by_key(|e| e.queue_key())
        })
    }

    /// The buyer's valid or used ticket
    #[must_use]
    pub fn held_ticket_for(&self, buyer: &UserId) -> Option<&Ticket> {
        self.tickets
            .iter()
            .find(|t| &t.buyer == buyer && t.status.holds_inventory())
    }

    /// The buyer's ticket for this event, held tickets first, then the latest
    #[must_use]
    pub fn ticket_for_buyer(&self, buyer: &UserId) -> Option<&Ticket> {
        self.held_ticket_for(buyer).or_else(|| {
            self.tickets
                .iter()
                .filter(|t| &t.buyer == buyer)
                .max_by_key(|t| t.purchased_at)
        })
    }

    /// Earliest waiting entry
    #[must_use]
    pub fn next_waiting(&self) -> Option<&WaitingListEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Waiting)
            .min_by_key(|e| e.queue_key())
    }

    /// Offered entries whose deadline has passed
    #[must_use]
    pub fn offers_due(&self, now: DateTime<Utc>) -> Vec<&WaitingListEntry> {
        self.entries
            .iter()
            .filter(|e| e.offer_is_past_due(now))
            .collect()
    }

    /// Whether a write would change anything: past-due offers to close, or
    /// waiting buyers that could be promoted
    #[must_use]
    pub fn needs_reconcile(&self, now: DateTime<Utc>) -> bool {
        self.entries.iter().any(|e| e.offer_is_past_due(now))
            || (!self.event.is_cancelled && self.next_waiting().is_some() && self.has_capacity(now))
    }

    /// Entries of `buyer` that ended expired at or after `since`
    #[must_use]
    pub fn expired_since(&self, buyer: &UserId, since: DateTime<Utc>) -> Vec<&WaitingListEntry> {
        self.entries
            .iter()
            .filter(|e| {
                &e.buyer == buyer
                    && e.status == EntryStatus::Expired
                    && e.closed_at.is_some_and(|at| at >= since)
            })
            .collect()
    }

    // ========================================================================
    // Queue position
    // ========================================================================

    /// Queue position of an entry as seen at `now`.
    ///
    /// `position` is 1 + live entries (waiting or actively offered) created
    /// strictly earlier; `waiting_rank` is 1 + waiting entries created
    /// earlier. Both are only reported for waiting entries.
    #[must_use]
    pub fn position_of(&self, entry: &WaitingListEntry, now: DateTime<Utc>) -> QueuePosition {
        let status = entry.effective_status(now);
        let (position, waiting_rank) = if status == EntryStatus::Waiting {
            let key = entry.queue_key();
            let ahead = self.entries.iter().filter(|e| e.queue_key() < key);
            let live = count(ahead.clone().filter(|e| e.is_live(now)));
            let waiting = count(ahead.filter(|e| e.status == EntryStatus::Waiting));
            (Some(live + 1), Some(waiting + 1))
        } else {
            (None, None)
        };

        QueuePosition {
            entry_id: entry.id,
            status,
            position,
            waiting_rank,
            offer_expires_at: if status == EntryStatus::Offered {
                entry.offer_expires_at
            } else {
                None
            },
        }
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// Apply a fact and append it to the transaction's changes
    pub fn record(&mut self, event: LedgerEvent, changes: &mut Changes) {
        self.apply(&event);
        changes.push(event);
    }

    /// Apply a fact to the in-memory state.
    ///
    /// Validation happens before a fact is recorded; applying never fails.
    pub fn apply(&mut self, event: &LedgerEvent) {
        match event {
            LedgerEvent::EntryJoined { entry } => {
                self.entries.push(entry.clone());
            }

            LedgerEvent::OfferGranted {
                entry_id,
                expires_at,
                ..
            } => {
                if let Some(entry) = self.entry_mut(*entry_id) {
                    entry.status = EntryStatus::Offered;
                    entry.offer_expires_at = Some(*expires_at);
                }
            }

            LedgerEvent::EntryExpired { entry_id, at, .. } => {
                if let Some(entry) = self.entry_mut(*entry_id) {
                    entry.status = EntryStatus::Expired;
                    entry.offer_expires_at = None;
                    entry.closed_at = Some(*at);
                }
            }

            LedgerEvent::TicketIssued { ticket } => {
                if let Some(entry) = self.entry_mut(ticket.entry_id) {
                    entry.status = EntryStatus::Purchased;
                    entry.offer_expires_at = None;
                    entry.closed_at = Some(ticket.purchased_at);
                }
                self.tickets.push(ticket.clone());
            }

            LedgerEvent::TicketRefunded { ticket_id, .. } => {
                self.set_ticket_status(*ticket_id, TicketStatus::Refunded);
            }

            LedgerEvent::TicketCancelled { ticket_id, .. } => {
                self.set_ticket_status(*ticket_id, TicketStatus::Cancelled);
            }

            LedgerEvent::TicketUsed { ticket_id } => {
                self.set_ticket_status(*ticket_id, TicketStatus::Used);
            }

            LedgerEvent::EventCancelled { .. } => {
                self.event.is_cancelled = true;
            }

            LedgerEvent::EventUpdated {
                name,
                description,
                location,
                event_date,
                price,
                total_tickets,
            } => {
                self.event.name.clone_from(name);
                self.event.description.clone_from(description);
                self.event.location.clone_from(location);
                self.event.event_date = *event_date;
                self.event.price = *price;
                self.event.total_tickets = (*total_tickets).max(self.event.total_tickets);
            }

            LedgerEvent::LatePaymentRefunded { .. } => {}
        }
    }

    /// Sequence number for the next joined entry
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        u64::try_from(self.entries.len()).unwrap_or(u64::MAX)
    }

    fn entry_mut(&mut self, entry_id: EntryId) -> Option<&mut WaitingListEntry> {
        self.entries.iter_mut().find(|e| e.id == entry_id)
    }

    fn set_ticket_status(&mut self, ticket_id: TicketId, status: TicketStatus) {
        if let Some(ticket) = self.tickets.iter_mut().find(|t| t.id == ticket_id) {
            ticket.status = status;
        }
    }
}

fn count<I: Iterator>(iter: I) -> u32 {
    u32::try_from(iter.count()).unwrap_or(u32::MAX)
}
