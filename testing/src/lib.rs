//! # Ticket Queue Testing
//!
//! Testing utilities for the ticket queue engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`mocks::FixedClock`], [`mocks::ManualClock`])
//! - A payment processor that records calls and injects failures
//!   ([`mocks::RecordingPaymentProcessor`])
//! - A store wrapper that injects one-shot failures ([`mocks::FlakyStore`])
//! - An engine harness with seller, event and purchase helpers
//!   ([`fixtures::EngineHarness`])
//!
//! ## Example
//!
//! ```ignore
//! use ticket_queue_testing::fixtures::EngineHarness;
//!
//! #[tokio::test]
//! async fn test_offer_expires() {
//!     let harness = EngineHarness::new();
//!     let event = harness.create_event(1).await;
//!
//!     harness.engine.join(event.id, &"a".into()).await.unwrap();
//!     harness.engine.join(event.id, &"b".into()).await.unwrap();
//!     harness.clock.advance_minutes(31);
//!
//!     let b = harness.engine.position(event.id, &"b".into()).await.unwrap();
//!     assert_eq!(b.unwrap().status, EntryStatus::Offered);
//! }
//! ```

use chrono::{DateTime, Utc};
use ticket_queue_core::Clock;

/// Mock implementations of the engine's collaborators.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::collections::HashSet;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex, PoisonError};
    use ticket_queue_core::{
        CheckoutSession, CheckoutSessionRequest, Event, EventId, EventLedger, InMemoryTicketStore,
        PaymentError, PaymentProcessor, PaymentResult, RefundRequest, RefundResult, StoreError,
        StoreFuture, Ticket, TicketId, TicketStore, UserId, Version,
    };

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// Clock that only moves when a test advances it.
    ///
    /// Clones share the same time, so a test can hand one clone to the engine
    /// and keep another to simulate elapsed TTLs.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Clock starting at [`test_epoch`]
        #[must_use]
        pub fn at_epoch() -> Self {
            Self::new(test_epoch())
        }

        /// Move time forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Move time forward by whole minutes
        pub fn advance_minutes(&self, minutes: i64) {
            self.advance(chrono::Duration::minutes(minutes));
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    #[derive(Debug, Default)]
    struct Recorded {
        sessions: Vec<CheckoutSessionRequest>,
        refunds: Vec<RefundRequest>,
        failing_refunds: HashSet<String>,
        checkout_failure: Option<PaymentError>,
    }

    /// Payment processor that records every call.
    ///
    /// Checkout sessions and refunds succeed unless a failure was injected
    /// with [`fail_next_checkout`](Self::fail_next_checkout) or
    /// [`fail_refunds_for`](Self::fail_refunds_for).
    #[derive(Debug, Clone, Default)]
    pub struct RecordingPaymentProcessor {
        recorded: Arc<Mutex<Recorded>>,
    }

    impl RecordingPaymentProcessor {
        /// Processor with no injected failures
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
            f(&mut self.recorded.lock().unwrap_or_else(PoisonError::into_inner))
        }

        /// Make refunds of this payment reference fail
        pub fn fail_refunds_for(&self, payment_reference: impl Into<String>) {
            let reference = payment_reference.into();
            self.with(|r| r.failing_refunds.insert(reference));
        }

        /// Make the next checkout session request fail with `error`
        pub fn fail_next_checkout(&self, error: PaymentError) {
            self.with(|r| r.checkout_failure = Some(error));
        }

        /// Session requests received so far
        #[must_use]
        pub fn sessions(&self) -> Vec<CheckoutSessionRequest> {
            self.with(|r| r.sessions.clone())
        }

        /// Refund requests received so far, failed ones included
        #[must_use]
        pub fn refunds(&self) -> Vec<RefundRequest> {
            self.with(|r| r.refunds.clone())
        }
    }

    impl PaymentProcessor for RecordingPaymentProcessor {
        fn create_checkout_session(
            &self,
            request: CheckoutSessionRequest,
        ) -> Pin<Box<dyn Future<Output = PaymentResult<CheckoutSession>> + Send>> {
            let result = self.with(|r| {
                if let Some(error) = r.checkout_failure.take() {
                    return Err(error);
                }
                let session_id = format!("cs_test_{}", r.sessions.len() + 1);
                r.sessions.push(request);
                Ok(CheckoutSession {
                    session_url: format!("https://checkout.test/{session_id}"),
                    session_id,
                })
            });
            Box::pin(async move { result })
        }

        fn create_refund(
            &self,
            request: RefundRequest,
        ) -> Pin<Box<dyn Future<Output = PaymentResult<RefundResult>> + Send>> {
            let result = self.with(|r| {
                let fails = r.failing_refunds.contains(&request.payment_reference);
                let reference = format!("re_test_{}", r.refunds.len() + 1);
                let payment_reference = request.payment_reference.clone();
                r.refunds.push(request);
                if fails {
                    Err(PaymentError::Declined {
                        reason: format!("refund of {payment_reference} declined"),
                    })
                } else {
                    Ok(RefundResult {
                        refund_reference: reference,
                    })
                }
            });
            Box::pin(async move { result })
        }
    }

    type SavePredicate = Box<dyn Fn(&EventLedger) -> bool + Send + Sync>;

    #[derive(Default)]
    struct Faults {
        payment_account: Option<String>,
        save: Option<(SavePredicate, String)>,
    }

    /// [`InMemoryTicketStore`] wrapper that fails selected calls once.
    ///
    /// Each injected failure surfaces as [`StoreError::Database`] on the next
    /// matching call and is then cleared.
    #[derive(Clone, Default)]
    pub struct FlakyStore {
        inner: InMemoryTicketStore,
        faults: Arc<Mutex<Faults>>,
    }

    impl std::fmt::Debug for FlakyStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FlakyStore").finish_non_exhaustive()
        }
    }

    impl FlakyStore {
        /// Wrap a store; no failures are armed
        #[must_use]
        pub fn new(inner: InMemoryTicketStore) -> Self {
            Self {
                inner,
                faults: Arc::default(),
            }
        }

        fn with<T>(&self, f: impl FnOnce(&mut Faults) -> T) -> T {
            f(&mut self.faults.lock().unwrap_or_else(PoisonError::into_inner))
        }

        /// Fail the next payment account lookup
        pub fn fail_next_payment_account(&self, message: impl Into<String>) {
            let message = message.into();
            self.with(|f| f.payment_account = Some(message));
        }

        /// Fail the next save of a ledger matching `when`
        pub fn fail_next_save_where(
            &self,
            when: impl Fn(&EventLedger) -> bool + Send + Sync + 'static,
            message: impl Into<String>,
        ) {
            let message = message.into();
            self.with(|f| f.save = Some((Box::new(when), message)));
        }
    }

    impl TicketStore for FlakyStore {
        fn insert_event(&self, ledger: EventLedger) -> StoreFuture<'_, ()> {
            self.inner.insert_event(ledger)
        }

        fn load_ledger(&self, event_id: EventId) -> StoreFuture<'_, Option<EventLedger>> {
            self.inner.load_ledger(event_id)
        }

        fn save_ledger<'a>(
            &'a self,
            ledger: &'a EventLedger,
            expected: Version,
        ) -> StoreFuture<'a, Version> {
            let failure = self.with(|f| match f.save.take() {
                Some((when, message)) if when(ledger) => Some(message),
                armed => {
                    f.save = armed;
                    None
                }
            });
            match failure {
                Some(message) => Box::pin(async move { Err(StoreError::Database(message)) }),
                None => self.inner.save_ledger(ledger, expected),
            }
        }

        fn list_events(&self) -> StoreFuture<'_, Vec<Event>> {
            self.inner.list_events()
        }

        fn events_by_owner(&self, owner: UserId) -> StoreFuture<'_, Vec<EventLedger>> {
            self.inner.events_by_owner(owner)
        }

        fn events_with_offers_due(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<EventId>> {
            self.inner.events_with_offers_due(now)
        }

        fn tickets_for_buyer(&self, buyer: UserId) -> StoreFuture<'_, Vec<Ticket>> {
            self.inner.tickets_for_buyer(buyer)
        }

        fn find_ticket(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
            self.inner.find_ticket(ticket_id)
        }

        fn payment_account(&self, owner: UserId) -> StoreFuture<'_, Option<String>> {
            match self.with(|f| f.payment_account.take()) {
                Some(message) => Box::pin(async move { Err(StoreError::Database(message)) }),
                None => self.inner.payment_account(owner),
            }
        }

        fn set_payment_account(&self, owner: UserId, account_id: String) -> StoreFuture<'_, ()> {
            self.inner.set_payment_account(owner, account_id)
        }
    }
}

/// Engine fixtures.
pub mod fixtures {
    use super::mocks::{FlakyStore, ManualClock, RecordingPaymentProcessor};
    use std::sync::Arc;
    use ticket_queue_core::{
        CheckoutMetadata, EngineConfig, EngineError, Event, EventId, InMemoryTicketStore, Money,
        NewEvent, PaymentConfirmation, PurchaseOutcome, TicketEngine, UserId,
    };

    /// Owner of every event created through the harness
    pub const SELLER: &str = "seller-1";

    /// Connected account registered for [`SELLER`]
    pub const SELLER_ACCOUNT: &str = "acct_seller_1";

    /// Engine wired to an in-memory store, a manual clock and a recording
    /// payment processor.
    ///
    /// The engine reaches the store through [`FlakyStore`], so tests can arm
    /// store failures via `faults`.
    #[derive(Clone, Debug)]
    pub struct EngineHarness {
        /// The engine under test
        pub engine: TicketEngine,
        /// Shared store
        pub store: InMemoryTicketStore,
        /// Failure injection in front of `store`
        pub faults: FlakyStore,
        /// Shared clock, starts at 2025-01-01
        pub clock: ManualClock,
        /// Processor recording sessions and refunds
        pub payments: RecordingPaymentProcessor,
    }

    impl Default for EngineHarness {
        fn default() -> Self {
            Self::new()
        }
    }

    impl EngineHarness {
        /// Harness with default engine policy
        #[must_use]
        pub fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        /// Harness with custom engine policy
        #[must_use]
        pub fn with_config(config: EngineConfig) -> Self {
            let store = InMemoryTicketStore::new();
            let clock = ManualClock::at_epoch();
            let payments = RecordingPaymentProcessor::new();
            let faults = FlakyStore::new(store.clone());
            let engine = TicketEngine::builder(Arc::new(faults.clone()), Arc::new(payments.clone()))
                .clock(Arc::new(clock.clone()))
                .config(config)
                .build();
            Self {
                engine,
                store,
                faults,
                clock,
                payments,
            }
        }

        /// The seller identity
        #[must_use]
        pub fn seller(&self) -> UserId {
            UserId::new(SELLER)
        }

        /// Event a week out, priced 50.00, with `total` tickets and a payable seller
        ///
        /// # Errors
        ///
        /// Propagates engine failures.
        pub async fn try_create_event(&self, total: u32) -> Result<Event, EngineError> {
            self.engine
                .register_payment_account(&self.seller(), SELLER_ACCOUNT)
                .await?;
            self.engine
                .create_event(
                    &self.seller(),
                    NewEvent {
                        name: "Harbour Lights".to_string(),
                        description: "Open-air concert".to_string(),
                        location: "Pier 4".to_string(),
                        event_date: self.clock_now() + chrono::Duration::days(7),
                        price: Money::from_minor(5_000),
                        total_tickets: total,
                    },
                )
                .await
        }

        /// [`try_create_event`](Self::try_create_event) for tests
        ///
        /// # Panics
        ///
        /// If the engine refuses the event.
        #[allow(clippy::expect_used)]
        pub async fn create_event(&self, total: u32) -> Event {
            self.try_create_event(total)
                .await
                .expect("fixture event should be created")
        }

        /// Confirm payment for the buyer's entry as the processor would
        ///
        /// # Errors
        ///
        /// Propagates engine failures, `NoValidOffer` if the buyer never joined.
        pub async fn pay(
            &self,
            event_id: EventId,
            buyer: &UserId,
            payment_reference: &str,
        ) -> Result<PurchaseOutcome, EngineError> {
            let position = self
                .engine
                .position(event_id, buyer)
                .await?
                .ok_or(EngineError::NoValidOffer)?;
            self.engine
                .complete_purchase(
                    &CheckoutMetadata {
                        event_id,
                        buyer_id: buyer.clone(),
                        waiting_list_entry_id: position.entry_id,
                    },
                    &PaymentConfirmation {
                        payment_reference: payment_reference.to_string(),
                        amount: None,
                    },
                )
                .await
        }

        /// Join and pay straight away
        ///
        /// # Errors
        ///
        /// Propagates engine failures.
        pub async fn buy(&self, event_id: EventId, buyer: &str) -> Result<PurchaseOutcome, EngineError> {
            let buyer = UserId::new(buyer);
            self.engine.join(event_id, &buyer).await?;
            self.pay(event_id, &buyer, &format!("pi_{buyer}")).await
        }

        fn clock_now(&self) -> chrono::DateTime<chrono::Utc> {
            use ticket_queue_core::Clock;
            self.clock.now()
        }
    }
}

/// Install a fmt subscriber honoring `RUST_LOG`; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticket_queue=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
