//! Waiting-list queue: joining and position queries.

use crate::engine::TicketEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::LedgerEvent;
use crate::types::{Availability, EntryId, EntryStatus, EventId, QueuePosition, UserId, WaitingListEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a successful join.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOutcome {
    /// Always true; refusals are returned as errors
    pub accepted: bool,
    /// The new entry
    pub entry_id: EntryId,
    /// `offered` when capacity existed, `waiting` otherwise
    pub status: EntryStatus,
    /// Queue position for waiting entries
    pub position: Option<u32>,
    /// Offer deadline for offered entries
    pub offer_expires_at: Option<DateTime<Utc>>,
    /// Message for the buyer
    pub message: String,
}

impl TicketEngine {
    /// Join the waiting list of an event.
    ///
    /// The buyer is offered a ticket immediately when capacity exists and
    /// queued otherwise.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - `NotOwner`: the buyer owns the event
    /// - `EventOccurred` / `EventCancelled`: the event is no longer on sale
    /// - `DuplicateClaim`: the buyer already has a live entry or a ticket
    /// - `NoCapacity`: every ticket is sold
    /// - `TooManyAttempts`: too many recent expired or released offers
    /// - `Store`: persistence failure
    pub async fn join(&self, event_id: EventId, buyer: &UserId) -> EngineResult<JoinOutcome> {
        let max_expired = self.config().max_expired_claims;
        let window = self.config().claim_window_chrono();
        let ttl = self.config().offer_ttl_chrono();

        let outcome = self
            .transact(event_id, |ledger, changes, now| {
                if &ledger.event.owner == buyer {
                    return Err(EngineError::NotOwner {
                        action: "join the queue for your own event",
                    });
                }
                if ledger.event.has_occurred(now) {
                    return Err(EngineError::EventOccurred);
                }
                if ledger.event.is_cancelled {
                    return Err(EngineError::EventCancelled);
                }
                if ledger.live_entry_for(buyer, now).is_some() || ledger.held_ticket_for(buyer).is_some() {
                    return Err(EngineError::DuplicateClaim);
                }
                let availability = ledger.availability(now);
                if availability.is_sold_out() {
                    return Err(EngineError::NoCapacity);
                }

                let recent = ledger.expired_since(buyer, now - window);
                if u32::try_from(recent.len()).unwrap_or(u32::MAX) > max_expired {
                    let oldest = recent.iter().filter_map(|e| e.closed_at).min().unwrap_or(now);
                    let wait = (oldest + window - now).num_seconds().max(0);
                    return Err(EngineError::TooManyAttempts {
                        retry_after_minutes: ((wait + 59) / 60).max(1),
                    });
                }

                let offered = availability.has_capacity();
                let entry = WaitingListEntry {
                    id: EntryId::new(),
                    event_id,
                    buyer: buyer.clone(),
                    status: if offered {
                        EntryStatus::Offered
                    } else {
                        EntryStatus::Waiting
                    },
                    offer_expires_at: offered.then(|| now + ttl),
                    created_at: now,
                    sequence: ledger.next_sequence(),
                    closed_at: None,
                };
                let position = ledger.position_of(&entry, now);
                ledger.record(LedgerEvent::EntryJoined { entry }, changes);
                Ok(position)
            })
            .await?;

        let message = match outcome.status {
            EntryStatus::Offered => format!(
                "You've been offered a ticket! Complete your purchase within {} minutes.",
                ttl.num_minutes()
            ),
            _ => format!(
                "Added to the waiting list at position {}",
                outcome.position.unwrap_or(1)
            ),
        };

        tracing::info!(
            event_id = %event_id,
            entry_id = %outcome.entry_id,
            buyer = %buyer,
            status = %outcome.status,
            position = ?outcome.position,
            "Buyer joined queue"
        );

        Ok(JoinOutcome {
            accepted: true,
            entry_id: outcome.entry_id,
            status: outcome.status,
            position: outcome.position,
            offer_expires_at: outcome.offer_expires_at,
            message,
        })
    }

    /// Where the buyer stands in the event's queue, `None` if they never joined.
    ///
    /// Past-due offers read as expired; when any are found they are closed
    /// and the queue promoted before answering.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - `Store`: persistence failure
    pub async fn position(&self, event_id: EventId, buyer: &UserId) -> EngineResult<Option<QueuePosition>> {
        let ledger = self.load_reconciled(event_id).await?;
        let now = self.now();
        Ok(ledger
            .current_entry_for(buyer, now)
            .map(|entry| ledger.position_of(entry, now)))
    }

    /// Inventory snapshot: total, purchased and active offers.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - `Store`: persistence failure
    pub async fn availability(&self, event_id: EventId) -> EngineResult<Availability> {
        let ledger = self.load_reconciled(event_id).await?;
        Ok(ledger.availability(self.now()))
    }
}
