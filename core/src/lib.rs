//! # Ticket Queue Core
//!
//! Reservation and allocation engine for an event-ticket marketplace.
//!
//! Sellers list events with a finite number of tickets. Buyers join a
//! waiting list; while capacity exists the earliest buyers receive a
//! time-boxed offer, which converts into a ticket once the payment processor
//! confirms payment. Offers that lapse are closed by a periodic sweep (or
//! lazily on read) and the next buyer is promoted.
//!
//! ## Guarantees
//!
//! - `purchased + activeOffers <= total` at every commit
//! - at most one waiting or offered entry per buyer and event
//! - strict FIFO promotion by join time
//! - an offer ends either expired or purchased, never both
//! - a cancelled event accepts no joins, promotions or checkouts
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ticket_queue_core::{
//!     InMemoryTicketStore, MockPaymentProcessor, NewEvent, TicketEngine, UserId, Money,
//! };
//!
//! # async fn example() -> Result<(), ticket_queue_core::EngineError> {
//! let engine = TicketEngine::new(
//!     Arc::new(InMemoryTicketStore::new()),
//!     MockPaymentProcessor::shared(),
//! );
//!
//! let seller = UserId::new("seller");
//! let event = engine
//!     .create_event(&seller, NewEvent {
//!         name: "Launch party".into(),
//!         description: "Rooftop".into(),
//!         location: "Downtown".into(),
//!         event_date: chrono::Utc::now() + chrono::Duration::days(10),
//!         price: Money::from_minor(2_500),
//!         total_tickets: 100,
//!     })
//!     .await?;
//!
//! let joined = engine.join(event.id, &UserId::new("buyer")).await?;
//! println!("{}", joined.message);
//! # Ok(())
//! # }
//! ```

pub mod cancellation;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod offers;
pub mod payment;
pub mod purchase;
pub mod queue;
pub mod retry;
pub mod store;
pub mod sweeper;
pub mod types;

pub use cancellation::{CancellationReport, RefundFailure};
pub use catalog::{EventUpdate, NewEvent, SellerEventSummary, TicketDetails};
pub use clock::{Clock, SystemClock};
pub use config::{CheckoutConfig, EngineConfig};
pub use engine::{TicketEngine, TicketEngineBuilder};
pub use error::{EngineError, EngineResult};
pub use events::{Changes, ExpiryReason, LedgerEvent, LedgerNotification};
pub use ledger::EventLedger;
pub use notify::Notifier;
pub use payment::{
    CheckoutMetadata, CheckoutSession, CheckoutSessionRequest, MockPaymentProcessor, PaymentError,
    PaymentProcessor, PaymentResult, RefundRequest, RefundResult, StripeConfig, StripeProcessor,
};
pub use purchase::{PaymentConfirmation, PurchaseOutcome};
pub use queue::JoinOutcome;
pub use retry::RetryPolicy;
pub use store::{InMemoryTicketStore, StoreError, StoreFuture, TicketStore};
pub use sweeper::{ExpirationSweeper, SweepReport};
pub use types::{
    Availability, EntryId, EntryStatus, Event, EventId, EventMetrics, Money, QueuePosition, Ticket,
    TicketId, TicketStatus, UserId, Version, WaitingListEntry,
};
