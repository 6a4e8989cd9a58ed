//! Transactional store abstraction.
//!
//! The engine reads and writes whole [`EventLedger`]s. Writes are
//! compare-and-swap on the ledger version: a save with a stale expected
//! version fails with [`StoreError::ConcurrencyConflict`] and nothing is
//! written, so two writers can never both commit a decision made against the
//! same state.
//!
//! # Implementations
//!
//! - [`InMemoryTicketStore`]: process-local maps, for tests and development
//! - `PostgresTicketStore` (in `ticket-queue-postgres`): production storage
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! engine can hold an `Arc<dyn TicketStore>`.

mod memory;

pub use memory::InMemoryTicketStore;

use crate::ledger::EventLedger;
use crate::types::{Event, EventId, Ticket, TicketId, UserId, Version};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed store future
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Another writer committed to the ledger since it was loaded.
    #[error("Concurrency conflict on event {event_id}: expected {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Ledger being written
        event_id: EventId,
        /// Version the writer loaded
        expected: Version,
        /// Version currently stored
        actual: Version,
    },

    /// The ledger does not exist.
    #[error("Event not found: {0}")]
    NotFound(EventId),

    /// An insert collided with an existing record.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Database connection or query failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Persistence for event ledgers and seller payment accounts.
pub trait TicketStore: Send + Sync {
    /// Store a newly created event with an empty ledger.
    ///
    /// # Errors
    ///
    /// - `Duplicate`: an event with this id already exists
    /// - `Database`: storage failure
    fn insert_event(&self, ledger: EventLedger) -> StoreFuture<'_, ()>;

    /// Load the full ledger of an event, `None` if unknown.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: storage failure
    fn load_ledger(&self, event_id: EventId) -> StoreFuture<'_, Option<EventLedger>>;

    /// Persist `ledger` if the stored version still equals `expected`.
    ///
    /// Returns the new version (`expected + 1`).
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stored version moved on
    /// - `NotFound`: the event does not exist
    /// - `Database` / `Serialization`: storage failure
    fn save_ledger<'a>(
        &'a self,
        ledger: &'a EventLedger,
        expected: Version,
    ) -> StoreFuture<'a, Version>;

    /// All events, ordered by event date.
    ///
    /// # Errors
    ///
    /// - `Database`: storage failure
    fn list_events(&self) -> StoreFuture<'_, Vec<Event>>;

    /// Ledgers of every event listed by `owner`.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: storage failure
    fn events_by_owner(&self, owner: UserId) -> StoreFuture<'_, Vec<EventLedger>>;

    /// Events holding an offer whose deadline is at or before `now`.
    ///
    /// # Errors
    ///
    /// - `Database`: storage failure
    fn events_with_offers_due(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<EventId>>;

    /// Every ticket bought by `buyer`, newest first.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: storage failure
    fn tickets_for_buyer(&self, buyer: UserId) -> StoreFuture<'_, Vec<Ticket>>;

    /// Ticket by id.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: storage failure
    fn find_ticket(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>>;

    /// Connected payment account of a seller.
    ///
    /// # Errors
    ///
    /// - `Database`: storage failure
    fn payment_account(&self, owner: UserId) -> StoreFuture<'_, Option<String>>;

    /// Register or replace a seller's payment account.
    ///
    /// # Errors
    ///
    /// - `Database`: storage failure
    fn set_payment_account(&self, owner: UserId, account_id: String) -> StoreFuture<'_, ()>;
}
