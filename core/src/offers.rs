//! Offer manager: promotion, expiry and release.

use crate::config::EngineConfig;
use crate::engine::TicketEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::{Changes, ExpiryReason, LedgerEvent};
use crate::ledger::EventLedger;
use crate::types::{EntryId, EntryStatus, EventId, UserId};
use chrono::{DateTime, Utc};

/// Close every offer whose deadline has passed. Returns how many closed.
pub fn expire_due_offers(ledger: &mut EventLedger, changes: &mut Changes, now: DateTime<Utc>) -> usize {
    let due: Vec<(EntryId, UserId)> = ledger
        .offers_due(now)
        .into_iter()
        .map(|entry| (entry.id, entry.buyer.clone()))
        .collect();

    for (entry_id, buyer) in &due {
        tracing::info!(
            event_id = %ledger.event.id,
            entry_id = %entry_id,
            buyer = %buyer,
            "Offer expired"
        );
        ledger.record(
            LedgerEvent::EntryExpired {
                entry_id: *entry_id,
                buyer: buyer.clone(),
                reason: ExpiryReason::OfferTimedOut,
                at: now,
            },
            changes,
        );
    }
    due.len()
}

/// Offer tickets to the earliest waiting buyers while capacity remains.
///
/// Cancelled events never promote. Returns how many offers were granted.
pub fn promote_waiting(
    ledger: &mut EventLedger,
    changes: &mut Changes,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> usize {
    if ledger.event.is_cancelled {
        return 0;
    }

    let expires_at = now + config.offer_ttl_chrono();
    let mut granted = 0;

    while ledger.has_capacity(now) {
        let Some(next) = ledger.next_waiting() else {
            break;
        };
        let (entry_id, buyer) = (next.id, next.buyer.clone());

        tracing::info!(
            event_id = %ledger.event.id,
            entry_id = %entry_id,
            buyer = %buyer,
            expires_at = %expires_at,
            "Offer granted"
        );
        ledger.record(
            LedgerEvent::OfferGranted {
                entry_id,
                buyer,
                expires_at,
            },
            changes,
        );
        granted += 1;
    }
    granted
}

/// Close past-due offers, then promote into the freed capacity.
pub fn reconcile(
    ledger: &mut EventLedger,
    changes: &mut Changes,
    now: DateTime<Utc>,
    config: &EngineConfig,
) {
    expire_due_offers(ledger, changes, now);
    promote_waiting(ledger, changes, now, config);
}

fn granted_in(changes: &Changes) -> usize {
    changes
        .iter()
        .filter(|c| matches!(c, LedgerEvent::OfferGranted { .. }))
        .count()
}

impl TicketEngine {
    /// Promote waiting buyers into free capacity.
    ///
    /// Returns the number of offers granted by this call.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - `EventCancelled`: the event was cancelled
    /// - `Store`: persistence failure
    pub async fn promote(&self, event_id: EventId) -> EngineResult<usize> {
        self.transact(event_id, |ledger, changes, _| {
            if ledger.event.is_cancelled {
                return Err(EngineError::EventCancelled);
            }
            Ok(granted_in(changes))
        })
        .await
    }

    /// Give back an offered entry and promote the next buyer.
    ///
    /// Returns `false` when the entry was no longer offered (already released,
    /// expired or purchased); that is not an error.
    ///
    /// # Errors
    ///
    /// - `EventNotFound` / `EntryNotFound`: unknown event or entry
    /// - `NotOwner`: the entry belongs to another buyer
    /// - `Store`: persistence failure
    pub async fn release(&self, event_id: EventId, entry_id: EntryId, buyer: &UserId) -> EngineResult<bool> {
        let config = self.config().clone();
        let released = self
            .transact(event_id, |ledger, changes, now| {
                let entry = ledger
                    .entry(entry_id)
                    .ok_or(EngineError::EntryNotFound(entry_id))?;
                if &entry.buyer != buyer {
                    return Err(EngineError::NotOwner {
                        action: "release another buyer's offer",
                    });
                }
                if entry.status != EntryStatus::Offered {
                    return Ok(false);
                }

                ledger.record(
                    LedgerEvent::EntryExpired {
                        entry_id,
                        buyer: buyer.clone(),
                        reason: ExpiryReason::Released,
                        at: now,
                    },
                    changes,
                );
                promote_waiting(ledger, changes, now, &config);
                Ok(true)
            })
            .await?;

        if released {
            tracing::info!(event_id = %event_id, entry_id = %entry_id, buyer = %buyer, "Offer released");
        } else {
            tracing::debug!(event_id = %event_id, entry_id = %entry_id, "Release of non-offered entry ignored");
        }
        Ok(released)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Event, Money, WaitingListEntry};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn ledger_with(total: u32, entries: &[(&str, EntryStatus, i64)]) -> EventLedger {
        let mut ledger = EventLedger::new(Event {
            id: EventId::new(),
            owner: UserId::new("seller"),
            name: "n".into(),
            description: "d".into(),
            location: "l".into(),
            event_date: t0() + Duration::days(1),
            price: Money::from_minor(100),
            total_tickets: total,
            is_cancelled: false,
            created_at: t0(),
        });
        for (buyer, status, minute) in entries {
            let created_at = t0() + Duration::minutes(*minute);
            ledger.entries.push(WaitingListEntry {
                id: EntryId::new(),
                event_id: ledger.event.id,
                buyer: UserId::new(*buyer),
                status: *status,
                offer_expires_at: (*status == EntryStatus::Offered)
                    .then(|| created_at + Duration::minutes(30)),
                created_at,
                sequence: ledger.next_sequence(),
                closed_at: None,
            });
        }
        ledger
    }

    #[test]
    fn test_reconcile_expires_then_promotes_fifo() {
        let mut ledger = ledger_with(
            1,
            &[
                ("a", EntryStatus::Offered, 0),
                ("b", EntryStatus::Waiting, 1),
                ("c", EntryStatus::Waiting, 2),
            ],
        );
        let mut changes = Changes::new();
        let now = t0() + Duration::minutes(31);
        reconcile(&mut ledger, &mut changes, now, &EngineConfig::default());

        let statuses: Vec<_> = ledger.entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![EntryStatus::Expired, EntryStatus::Offered, EntryStatus::Waiting]
        );
        assert_eq!(ledger.entries[1].offer_expires_at, Some(now + Duration::minutes(30)));
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut ledger = ledger_with(1, &[("a", EntryStatus::Offered, 0)]);
        let now = t0() + Duration::minutes(45);
        let mut first = Changes::new();
        reconcile(&mut ledger, &mut first, now, &EngineConfig::default());
        let mut second = Changes::new();
        reconcile(&mut ledger, &mut second, now, &EngineConfig::default());

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_promotion_respects_capacity() {
        let mut ledger = ledger_with(
            2,
            &[
                ("a", EntryStatus::Offered, 0),
                ("b", EntryStatus::Waiting, 1),
                ("c", EntryStatus::Waiting, 2),
            ],
        );
        let mut changes = Changes::new();
        let granted = promote_waiting(&mut ledger, &mut changes, t0() + Duration::minutes(5), &EngineConfig::default());

        assert_eq!(granted, 1);
        assert_eq!(ledger.entries[1].status, EntryStatus::Offered);
        assert_eq!(ledger.entries[2].status, EntryStatus::Waiting);
    }

    #[test]
    fn test_cancelled_event_never_promotes() {
        let mut ledger = ledger_with(3, &[("a", EntryStatus::Waiting, 0)]);
        ledger.event.is_cancelled = true;
        let mut changes = Changes::new();
        assert_eq!(
            promote_waiting(&mut ledger, &mut changes, t0(), &EngineConfig::default()),
            0
        );
        assert!(changes.is_empty());
    }
}
