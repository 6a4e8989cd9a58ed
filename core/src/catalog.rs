//! Event listings, seller dashboards, ticket lookups and door scans.

use crate::engine::TicketEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::LedgerEvent;
use crate::ledger::EventLedger;
use crate::metrics;
use crate::offers;
use crate::types::{Availability, Event, EventId, EventMetrics, Money, Ticket, TicketId, TicketStatus, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Payloads
// ============================================================================

/// Fields of a new event listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Venue
    pub location: String,
    /// When the event takes place; must be in the future
    pub event_date: DateTime<Utc>,
    /// Ticket price in minor units
    pub price: Money,
    /// Sellable tickets, at least one
    pub total_tickets: u32,
}

/// Partial edit of an event; absent fields keep their value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUpdate {
    /// New name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New venue
    pub location: Option<String>,
    /// New date; must be in the future
    pub event_date: Option<DateTime<Utc>>,
    /// New price
    pub price: Option<Money>,
    /// New total; may only grow
    pub total_tickets: Option<u32>,
}

/// One row of a seller's dashboard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerEventSummary {
    /// The event
    pub event: Event,
    /// Inventory snapshot
    pub availability: Availability,
    /// Sales figures
    pub metrics: EventMetrics,
}

/// A ticket together with the event it admits to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketDetails {
    /// The ticket
    pub ticket: Ticket,
    /// Its event
    pub event: Event,
}

fn require_text(field: &str, value: &str) -> EngineResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidEvent(format!("Event {field} is required")));
    }
    Ok(trimmed.to_string())
}

fn require_future(event_date: DateTime<Utc>, now: DateTime<Utc>) -> EngineResult<()> {
    if event_date <= now {
        return Err(EngineError::InvalidEvent(
            "Event date must be in the future".to_string(),
        ));
    }
    Ok(())
}

impl TicketEngine {
    /// List a new event.
    ///
    /// # Errors
    ///
    /// - `InvalidEvent`: empty text fields, a past date or zero tickets
    /// - `Store`: persistence failure
    pub async fn create_event(&self, owner: &UserId, new_event: NewEvent) -> EngineResult<Event> {
        let now = self.now();
        let name = require_text("name", &new_event.name)?;
        let description = require_text("description", &new_event.description)?;
        let location = require_text("location", &new_event.location)?;
        require_future(new_event.event_date, now)?;
        if new_event.total_tickets == 0 {
            return Err(EngineError::InvalidEvent(
                "An event needs at least one ticket".to_string(),
            ));
        }

        let event = Event {
            id: EventId::new(),
            owner: owner.clone(),
            name,
            description,
            location,
            event_date: new_event.event_date,
            price: new_event.price,
            total_tickets: new_event.total_tickets,
            is_cancelled: false,
            created_at: now,
        };
        self.inner
            .store
            .insert_event(EventLedger::new(event.clone()))
            .await?;

        metrics::record_event_created();
        tracing::info!(
            event_id = %event.id,
            owner = %owner,
            total_tickets = event.total_tickets,
            price = event.price.minor_units(),
            "Event created"
        );
        Ok(event)
    }

    /// Edit an event. Raising the total offers the new tickets to the queue.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - `NotOwner`: the caller does not own the event
    /// - `EventCancelled`: cancelled events cannot be edited
    /// - `InvalidEvent`: empty fields, a past date, or a lower total
    /// - `Store`: persistence failure
    pub async fn update_event(&self, event_id: EventId, owner: &UserId, update: EventUpdate) -> EngineResult<Event> {
        let config = self.config().clone();
        let event = self
            .transact(event_id, |ledger, changes, now| {
                let current = &ledger.event;
                if &current.owner != owner {
                    return Err(EngineError::NotOwner {
                        action: "edit this event",
                    });
                }
                if current.is_cancelled {
                    return Err(EngineError::EventCancelled);
                }

                let name = update
                    .name
                    .as_deref()
                    .map_or_else(|| Ok(current.name.clone()), |v| require_text("name", v))?;
                let description = update.description.as_deref().map_or_else(
                    || Ok(current.description.clone()),
                    |v| require_text("description", v),
                )?;
                let location = update.location.as_deref().map_or_else(
                    || Ok(current.location.clone()),
                    |v| require_text("location", v),
                )?;
                let event_date = match update.event_date {
                    Some(date) => {
                        require_future(date, now)?;
                        date
                    }
                    None => current.event_date,
                };
                let total_tickets = update.total_tickets.unwrap_or(current.total_tickets);
                if total_tickets < current.total_tickets {
                    return Err(EngineError::InvalidEvent(format!(
                        "Total tickets can only be increased (currently {})",
                        current.total_tickets
                    )));
                }
                let sold = ledger.purchased_count();
                if total_tickets < sold {
                    return Err(EngineError::InvalidEvent(format!(
                        "Total tickets cannot be lower than the {sold} already sold"
                    )));
                }
                let price = update.price.unwrap_or(current.price);

                ledger.record(
                    LedgerEvent::EventUpdated {
                        name,
                        description,
                        location,
                        event_date,
                        price,
                        total_tickets,
                    },
                    changes,
                );
                offers::promote_waiting(ledger, changes, now, &config);
                Ok(ledger.event.clone())
            })
            .await?;

        tracing::info!(event_id = %event_id, total_tickets = event.total_tickets, "Event updated");
        Ok(event)
    }

    /// Event by id.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - `Store`: persistence failure
    pub async fn get_event(&self, event_id: EventId) -> EngineResult<Event> {
        Ok(self.load(event_id).await?.event)
    }

    /// Upcoming events that are still on sale, soonest first.
    ///
    /// # Errors
    ///
    /// - `Store`: persistence failure
    pub async fn list_events(&self) -> EngineResult<Vec<Event>> {
        self.upcoming_events(|_| true).await
    }

    /// Upcoming events whose name, description or location contains `query`,
    /// ignoring case, soonest first.
    ///
    /// A blank query matches every upcoming event.
    ///
    /// # Errors
    ///
    /// - `Store`: persistence failure
    pub async fn search_events(&self, query: &str) -> EngineResult<Vec<Event>> {
        let needle = query.trim().to_lowercase();
        let events = self
            .upcoming_events(|event| {
                [&event.name, &event.description, &event.location]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
            .await?;
        tracing::debug!(query = %needle, matches = events.len(), "Event search");
        Ok(events)
    }

    async fn upcoming_events(&self, keep: impl Fn(&Event) -> bool) -> EngineResult<Vec<Event>> {
        let now = self.now();
        let mut events: Vec<Event> = self
            .inner
            .store
            .list_events()
            .await?
            .into_iter()
            .filter(|event| !event.is_cancelled && !event.has_occurred(now) && keep(event))
            .collect();
        events.sort_by_key(|event| event.event_date);
        Ok(events)
    }

    /// Every event listed by `owner`, with availability and sales figures.
    ///
    /// # Errors
    ///
    /// - `Store`: persistence failure
    pub async fn seller_events(&self, owner: &UserId) -> EngineResult<Vec<SellerEventSummary>> {
        let now = self.now();
        Ok(self
            .inner
            .store
            .events_by_owner(owner.clone())
            .await?
            .into_iter()
            .map(|ledger| SellerEventSummary {
                availability: ledger.availability(now),
                metrics: ledger.metrics(),
                event: ledger.event,
            })
            .collect())
    }

    /// Register the seller's connected account at the payment processor.
    ///
    /// # Errors
    ///
    /// - `InvalidEvent`: empty account id
    /// - `Store`: persistence failure
    pub async fn register_payment_account(&self, owner: &UserId, account_id: &str) -> EngineResult<()> {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(EngineError::InvalidEvent(
                "Payment account id is required".to_string(),
            ));
        }
        self.inner
            .store
            .set_payment_account(owner.clone(), account_id.to_string())
            .await?;
        tracing::info!(owner = %owner, "Payment account registered");
        Ok(())
    }

    /// Every ticket bought by `buyer`, newest first.
    ///
    /// # Errors
    ///
    /// - `Store`: persistence failure
    pub async fn user_tickets(&self, buyer: &UserId) -> EngineResult<Vec<Ticket>> {
        Ok(self.inner.store.tickets_for_buyer(buyer.clone()).await?)
    }

    /// The buyer's ticket for one event: the held one, else the latest.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - `Store`: persistence failure
    pub async fn user_ticket_for_event(&self, event_id: EventId, buyer: &UserId) -> EngineResult<Option<Ticket>> {
        let ledger = self.load(event_id).await?;
        Ok(ledger.ticket_for_buyer(buyer).cloned())
    }

    /// Ticket with its event.
    ///
    /// # Errors
    ///
    /// - `TicketNotFound`: unknown ticket
    /// - `Store`: persistence failure
    pub async fn get_ticket(&self, ticket_id: TicketId) -> EngineResult<TicketDetails> {
        let ticket = self
            .inner
            .store
            .find_ticket(ticket_id)
            .await?
            .ok_or(EngineError::TicketNotFound(ticket_id))?;
        let event = self.get_event(ticket.event_id).await?;
        Ok(TicketDetails { ticket, event })
    }

    /// Scan a ticket at the door: `valid` becomes `used`.
    ///
    /// # Errors
    ///
    /// - `TicketNotFound`: unknown ticket
    /// - `NotOwner`: the caller does not own the event
    /// - `EventCancelled`: the event was cancelled
    /// - `InvalidTicketState`: the ticket is not valid
    /// - `Store`: persistence failure
    pub async fn mark_ticket_used(&self, ticket_id: TicketId, owner: &UserId) -> EngineResult<Ticket> {
        let event_id = self
            .inner
            .store
            .find_ticket(ticket_id)
            .await?
            .ok_or(EngineError::TicketNotFound(ticket_id))?
            .event_id;

        let ticket = self
            .transact(event_id, |ledger, changes, _| {
                if &ledger.event.owner != owner {
                    return Err(EngineError::NotOwner {
                        action: "scan tickets for this event",
                    });
                }
                if ledger.event.is_cancelled {
                    return Err(EngineError::EventCancelled);
                }
                let status = ledger
                    .ticket(ticket_id)
                    .ok_or(EngineError::TicketNotFound(ticket_id))?
                    .status;
                if status != TicketStatus::Valid {
                    return Err(EngineError::InvalidTicketState {
                        status,
                        action: "used",
                    });
                }
                ledger.record(LedgerEvent::TicketUsed { ticket_id }, changes);
                ledger
                    .ticket(ticket_id)
                    .cloned()
                    .ok_or(EngineError::TicketNotFound(ticket_id))
            })
            .await?;

        tracing::info!(ticket_id = %ticket_id, event_id = %event_id, "Ticket scanned");
        Ok(ticket)
    }
}
