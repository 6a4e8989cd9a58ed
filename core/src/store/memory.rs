use super::{StoreError, StoreFuture, TicketStore};
use crate::ledger::EventLedger;
use crate::types::{Event, EventId, Ticket, TicketId, UserId, Version};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-local store backed by hash maps.
///
/// Cloning shares the underlying maps. Saves apply the same version
/// compare-and-swap as the database store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketStore {
    ledgers: Arc<RwLock<HashMap<EventId, EventLedger>>>,
    accounts: Arc<RwLock<HashMap<UserId, String>>>,
}

impl InMemoryTicketStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events
    pub async fn event_count(&self) -> usize {
        self.ledgers.read().await.len()
    }
}

impl TicketStore for InMemoryTicketStore {
    fn insert_event(&self, ledger: EventLedger) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut ledgers = self.ledgers.write().await;
            if ledgers.contains_key(&ledger.event.id) {
                return Err(StoreError::Duplicate(format!("event {}", ledger.event.id)));
            }
            ledgers.insert(ledger.event.id, ledger);
            Ok(())
        })
    }

    fn load_ledger(&self, event_id: EventId) -> StoreFuture<'_, Option<EventLedger>> {
        Box::pin(async move { Ok(self.ledgers.read().await.get(&event_id).cloned()) })
    }

    fn save_ledger<'a>(
        &'a self,
        ledger: &'a EventLedger,
        expected: Version,
    ) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            let event_id = ledger.event.id;
            let mut ledgers = self.ledgers.write().await;
            let stored = ledgers
                .get_mut(&event_id)
                .ok_or(StoreError::NotFound(event_id))?;

            if stored.version != expected {
                return Err(StoreError::ConcurrencyConflict {
                    event_id,
                    expected,
                    actual: stored.version,
                });
            }

            let version = expected.next();
            *stored = EventLedger {
                version,
                ..ledger.clone()
            };
            Ok(version)
        })
    }

    fn list_events(&self) -> StoreFuture<'_, Vec<Event>> {
        Box::pin(async move {
            let mut events: Vec<Event> = self
                .ledgers
                .read()
                .await
                .values()
                .map(|ledger| ledger.event.clone())
                .collect();
            events.sort_by_key(|event| event.event_date);
            Ok(events)
        })
    }

    fn events_by_owner(&self, owner: UserId) -> StoreFuture<'_, Vec<EventLedger>> {
        Box::pin(async move {
            let mut ledgers: Vec<EventLedger> = self
                .ledgers
                .read()
                .await
                .values()
                .filter(|ledger| ledger.event.owner == owner)
                .cloned()
                .collect();
            ledgers.sort_by_key(|ledger| ledger.event.event_date);
            Ok(ledgers)
        })
    }

    fn events_with_offers_due(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(async move {
            Ok(self
                .ledgers
                .read()
                .await
                .values()
                .filter(|ledger| !ledger.offers_due(now).is_empty())
                .map(|ledger| ledger.event.id)
                .collect())
        })
    }

    fn tickets_for_buyer(&self, buyer: UserId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let mut tickets: Vec<Ticket> = self
                .ledgers
                .read()
                .await
                .values()
                .flat_map(|ledger| ledger.tickets.iter())
                .filter(|ticket| ticket.buyer == buyer)
                .cloned()
                .collect();
            tickets.sort_by(|a, b| b.purchased_at.cmp(&a.purchased_at));
            Ok(tickets)
        })
    }

    fn find_ticket(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            Ok(self
                .ledgers
                .read()
                .await
                .values()
                .find_map(|ledger| ledger.ticket(ticket_id).cloned()))
        })
    }

    fn payment_account(&self, owner: UserId) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move { Ok(self.accounts.read().await.get(&owner).cloned()) })
    }

    fn set_payment_account(&self, owner: UserId, account_id: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.accounts.write().await.insert(owner, account_id);
            Ok(())
        })
    }
}
