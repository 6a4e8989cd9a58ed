//! Expiration sweeper.
//!
//! Reads already treat past-due offers as expired; the sweeper makes that
//! durable and promotes the next buyers even when nobody is looking at the
//! event. A failed event is logged and picked up again on the next cycle.

use crate::engine::TicketEngine;
use crate::error::EngineResult;
use crate::events::LedgerEvent;
use crate::metrics;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Outcome of one sweep cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Events holding past-due offers
    pub events_scanned: usize,
    /// Offers closed
    pub offers_expired: usize,
    /// Waiting entries promoted
    pub offers_granted: usize,
    /// Events whose reconciliation failed
    pub failures: usize,
}

impl TicketEngine {
    /// Close every past-due offer and promote the queues behind them.
    ///
    /// Idempotent: a second sweep with nothing due does nothing.
    ///
    /// # Errors
    ///
    /// - `Store`: listing the events with due offers failed
    pub async fn sweep(&self) -> EngineResult<SweepReport> {
        let started = Instant::now();
        let due = self.inner.store.events_with_offers_due(self.now()).await?;
        let mut report = SweepReport {
            events_scanned: due.len(),
            ..SweepReport::default()
        };

        for event_id in due {
            let swept = self
                .transact(event_id, |_, changes, _| {
                    Ok(changes.iter().fold((0, 0), |(expired, granted), change| match change {
                        LedgerEvent::EntryExpired { .. } => (expired + 1, granted),
                        LedgerEvent::OfferGranted { .. } => (expired, granted + 1),
                        _ => (expired, granted),
                    }))
                })
                .await;

            match swept {
                Ok((expired, granted)) => {
                    report.offers_expired += expired;
                    report.offers_granted += granted;
                }
                Err(err) => {
                    report.failures += 1;
                    tracing::warn!(event_id = %event_id, error = %err, "Sweep failed for event, retrying next cycle");
                }
            }
        }

        metrics::record_sweep(started.elapsed().as_secs_f64());
        if report.offers_expired > 0 || report.failures > 0 {
            tracing::info!(
                events = report.events_scanned,
                expired = report.offers_expired,
                granted = report.offers_granted,
                failures = report.failures,
                "Sweep complete"
            );
        }
        Ok(report)
    }
}

/// Background task running [`TicketEngine::sweep`] on the configured interval.
pub struct ExpirationSweeper;

impl ExpirationSweeper {
    /// Spawn the sweep loop; it exits when `shutdown` fires or closes.
    #[must_use]
    pub fn spawn(engine: TicketEngine, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let period = engine.config().sweep_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX), "Expiration sweeper started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = engine.sweep().await {
                            tracing::warn!(error = %err, "Sweep cycle failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Expiration sweeper stopping");
                        break;
                    }
                }
            }
        })
    }
}
