//! The reservation and allocation engine.
//!
//! [`TicketEngine`] owns the store, the payment processor, the clock and the
//! notification channel. All operations are implemented in the sibling
//! modules (`queue`, `offers`, `purchase`, `cancellation`, `catalog`,
//! `sweeper`) as `impl TicketEngine` blocks on top of [`TicketEngine::transact`].
//!
//! # Concurrency
//!
//! Mutations of one event are serialized in-process by a keyed async mutex
//! and across processes by the ledger version compare-and-swap. A transaction
//! loads the ledger, closes past-due offers and promotes waiting buyers,
//! runs the caller's decision, then saves. A lost compare-and-swap reloads
//! and decides again under the engine's retry policy. Payment processor calls
//! never happen inside a transaction.

use crate::clock::{Clock, SystemClock};
use crate::config::{CheckoutConfig, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::events::Changes;
use crate::ledger::EventLedger;
use crate::metrics;
use crate::notify::Notifier;
use crate::offers;
use crate::payment::PaymentProcessor;
use crate::store::{StoreError, TicketStore};
use crate::types::EventId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// Shared engine handle; cheap to clone.
#[derive(Clone)]
pub struct TicketEngine {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) store: Arc<dyn TicketStore>,
    pub(crate) payments: Arc<dyn PaymentProcessor>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
    pub(crate) checkout: CheckoutConfig,
    pub(crate) notifier: Notifier,
    locks: EventLocks,
    pub(crate) cancellations: EventLocks,
}

impl std::fmt::Debug for TicketEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketEngine")
            .field("config", &self.inner.config)
            .field("checkout", &self.inner.checkout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TicketEngine`].
pub struct TicketEngineBuilder {
    store: Arc<dyn TicketStore>,
    payments: Arc<dyn PaymentProcessor>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    checkout: CheckoutConfig,
}

impl TicketEngineBuilder {
    /// Use a custom clock
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override engine policy
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Override checkout settings
    #[must_use]
    pub fn checkout(mut self, checkout: CheckoutConfig) -> Self {
        self.checkout = checkout;
        self
    }

    /// Build the engine
    #[must_use]
    pub fn build(self) -> TicketEngine {
        let notifier = Notifier::new(self.config.notification_capacity);
        TicketEngine {
            inner: Arc::new(EngineInner {
                store: self.store,
                payments: self.payments,
                clock: self.clock,
                config: self.config,
                checkout: self.checkout,
                notifier,
                locks: EventLocks::default(),
                cancellations: EventLocks::default(),
            }),
        }
    }
}

impl TicketEngine {
    /// Start building an engine over a store and a payment processor
    #[must_use]
    pub fn builder(
        store: Arc<dyn TicketStore>,
        payments: Arc<dyn PaymentProcessor>,
    ) -> TicketEngineBuilder {
        TicketEngineBuilder {
            store,
            payments,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            checkout: CheckoutConfig::default(),
        }
    }

    /// Engine with default policy and the system clock
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, payments: Arc<dyn PaymentProcessor>) -> Self {
        Self::builder(store, payments).build()
    }

    /// Policy in effect
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Notification channel for live views
    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TicketStore> {
        &self.inner.store
    }

    /// Current time on the engine clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Load a ledger without writing.
    pub(crate) async fn load(&self, event_id: EventId) -> EngineResult<EventLedger> {
        self.inner
            .store
            .load_ledger(event_id)
            .await?
            .ok_or(EngineError::EventNotFound(event_id))
    }

    /// Load a ledger for reading, persisting reconciliation first when past-due
    /// offers or promotable buyers are found.
    pub(crate) async fn load_reconciled(&self, event_id: EventId) -> EngineResult<EventLedger> {
        let ledger = self.load(event_id).await?;
        if !ledger.needs_reconcile(self.now()) {
            return Ok(ledger);
        }

        tracing::debug!(event_id = %event_id, "Reconciling ledger on read");
        self.transact(event_id, |ledger, _, _| Ok(ledger.clone()))
            .await
    }

    /// Run a decision against the reconciled ledger of an event and commit it.
    ///
    /// `decide` receives the ledger after past-due offers were closed and
    /// waiting buyers promoted, the change buffer and the transaction time.
    /// It must record facts only on its success path. Reconciliation changes
    /// are saved even when `decide` fails, so reads and refused commands
    /// still heal stale offers.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - whatever `decide` returns
    /// - `Store`: the save failed, or kept losing the version check
    pub(crate) async fn transact<T, F>(&self, event_id: EventId, mut decide: F) -> EngineResult<T>
    where
        F: FnMut(&mut EventLedger, &mut Changes, DateTime<Utc>) -> EngineResult<T> + Send,
        T: Send,
    {
        let _guard = self.inner.locks.acquire(event_id).await;
        let mut attempt = 0;

        loop {
            let now = self.now();
            let mut ledger = self.load(event_id).await?;
            let expected = ledger.version;
            let mut changes = Changes::new();

            offers::reconcile(&mut ledger, &mut changes, now, &self.inner.config);
            let outcome = decide(&mut ledger, &mut changes, now);

            if changes.is_empty() {
                return outcome;
            }

            match self.inner.store.save_ledger(&ledger, expected).await {
                Ok(version) => {
                    tracing::debug!(
                        event_id = %event_id,
                        version = %version,
                        changes = changes.len(),
                        "Ledger committed"
                    );
                    metrics::record_changes(&changes);
                    self.inner.notifier.publish(event_id, &changes);
                    return outcome;
                }
                Err(StoreError::ConcurrencyConflict {
                    expected, actual, ..
                }) if self.inner.config.conflict_retry.allows_retry(attempt) => {
                    metrics::record_store_conflict();
                    let delay = self.inner.config.conflict_retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        event_id = %event_id,
                        expected = %expected,
                        actual = %actual,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Ledger changed concurrently, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if matches!(err, StoreError::ConcurrencyConflict { .. }) {
                        metrics::record_store_conflict();
                    }
                    tracing::error!(event_id = %event_id, error = %err, "Ledger save failed");
                    return Err(err.into());
                }
            }
        }
    }
}

// ============================================================================
// Per-event serialization
// ============================================================================

/// One async mutex per event id.
///
/// Entries are dropped from the map once no guard or waiter holds them.
#[derive(Default)]
pub(crate) struct EventLocks {
    locks: Mutex<HashMap<EventId, Arc<tokio::sync::Mutex<()>>>>,
}

impl EventLocks {
    pub(crate) async fn acquire(&self, event_id: EventId) -> EventLockGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(event_id).or_default())
        };
        EventLockGuard {
            guard: Some(lock.lock_owned().await),
            locks: self,
            event_id,
        }
    }

    fn prune(&self, event_id: EventId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&event_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&event_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Held lock on one event; releases and prunes on drop.
pub(crate) struct EventLockGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a EventLocks,
    event_id: EventId,
}

impl Drop for EventLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.prune(self.event_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_lock_is_pruned_after_release() {
        let locks = EventLocks::default();
        let event_id = EventId::new();

        let guard = locks.acquire(event_id).await;
        assert_eq!(locks.len(), 1);
        drop(guard);

        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_event_lock_kept_while_another_task_waits() {
        let locks = Arc::new(EventLocks::default());
        let event_id = EventId::new();

        let guard = locks.acquire(event_id).await;
        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(event_id).await;
            })
        };
        while !waiter_is_queued(&locks, event_id) {
            tokio::task::yield_now().await;
        }

        drop(guard);
        assert_eq!(locks.len(), 1, "waiter still references the lock");

        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_distinct_events_do_not_share_locks() {
        let locks = EventLocks::default();
        let first = locks.acquire(EventId::new()).await;
        let second = locks.acquire(EventId::new()).await;
        assert_eq!(locks.len(), 2);

        drop(first);
        assert_eq!(locks.len(), 1);
        drop(second);
        assert_eq!(locks.len(), 0);
    }

    fn waiter_is_queued(locks: &EventLocks, event_id: EventId) -> bool {
        locks
            .locks
            .lock()
            .unwrap()
            .get(&event_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 3)
    }
}
