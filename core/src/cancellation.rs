//! Cancellation and refund coordinator.
//!
//! Event cancellation runs in three steps:
//!
//! 1. One transaction sets the cancellation flag and expires every live
//!    entry. From this commit on, joins, promotions and checkouts fail with
//!    `EventCancelled`, so no half-cancelled state is observable.
//! 2. Refunds for every valid ticket are issued concurrently without holding
//!    the event lock.
//! 3. One transaction records each ticket's outcome: `refunded`, or
//!    `cancelled` when its refund failed.
//!
//! A failure after step 1 leaves the event cancelled with valid tickets.
//! Cancelling again skips step 1 and runs steps 2 and 3 for those tickets.

use crate::engine::TicketEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::{ExpiryReason, LedgerEvent};
use crate::offers;
use crate::payment::{PaymentResult, RefundRequest, RefundResult};
use crate::types::{EventId, Ticket, TicketId, TicketStatus, UserId};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

/// A refund that failed during cancellation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundFailure {
    /// Ticket left `cancelled`
    pub ticket_id: TicketId,
    /// Ticket holder
    pub buyer: UserId,
    /// Processor message
    pub reason: String,
}

/// Summary of an event cancellation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReport {
    /// Tickets refunded
    pub refunded: Vec<TicketId>,
    /// Tickets whose refund failed
    pub failed: Vec<RefundFailure>,
    /// Waiting or offered entries closed
    pub expired_entries: usize,
}

impl CancellationReport {
    /// No refund failed
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl TicketEngine {
    /// Cancel an event, refund its valid tickets and close its queue.
    ///
    /// Individual refund failures do not stop the cancellation; they are
    /// listed in the report and the affected tickets end `cancelled`.
    ///
    /// Calling this again on a cancelled event that still holds valid
    /// tickets (a previous call failed after the cancellation committed)
    /// resumes the refunds. Cancellations of one event run one at a time.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - `NotOwner`: the caller does not own the event
    /// - `EventCancelled`: the event was already cancelled and nothing is
    ///   left to refund
    /// - `Store`: persistence failure
    pub async fn cancel_event(&self, event_id: EventId, owner: &UserId) -> EngineResult<CancellationReport> {
        let _cancelling = self.inner.cancellations.acquire(event_id).await;
        let destination_account = self.inner.store.payment_account(owner.clone()).await?;

        let (to_refund, expired_entries, resumed) = self
            .transact(event_id, |ledger, changes, now| {
                if &ledger.event.owner != owner {
                    return Err(EngineError::NotOwner {
                        action: "cancel this event",
                    });
                }

                let resumed = ledger.event.is_cancelled;
                let mut expired = 0;
                if !resumed {
                    ledger.record(LedgerEvent::EventCancelled { at: now }, changes);
                    let live: Vec<_> = ledger
                        .entries
                        .iter()
                        .filter(|e| e.is_live(now))
                        .map(|e| (e.id, e.buyer.clone()))
                        .collect();
                    for (entry_id, buyer) in &live {
                        ledger.record(
                            LedgerEvent::EntryExpired {
                                entry_id: *entry_id,
                                buyer: buyer.clone(),
                                reason: ExpiryReason::EventCancelled,
                                at: now,
                            },
                            changes,
                        );
                    }
                    expired = live.len();
                }

                let valid: Vec<Ticket> = ledger
                    .tickets
                    .iter()
                    .filter(|t| t.status == TicketStatus::Valid)
                    .cloned()
                    .collect();
                if resumed && valid.is_empty() {
                    return Err(EngineError::EventCancelled);
                }
                Ok((valid, expired, resumed))
            })
            .await?;

        if resumed {
            tracing::warn!(
                event_id = %event_id,
                tickets = to_refund.len(),
                "Resuming refunds of a cancelled event"
            );
        } else {
            tracing::info!(
                event_id = %event_id,
                tickets = to_refund.len(),
                expired_entries,
                "Event cancelled, refunding tickets"
            );
        }

        let results = join_all(
            to_refund
                .iter()
                .map(|ticket| self.refund(ticket, destination_account.clone())),
        )
        .await;

        let outcomes: Vec<(Ticket, PaymentResult<RefundResult>)> =
            to_refund.into_iter().zip(results).collect();

        let report = self
            .transact(event_id, |ledger, changes, _| {
                let mut report = CancellationReport {
                    expired_entries,
                    ..CancellationReport::default()
                };
                for (ticket, result) in &outcomes {
                    let still_valid = ledger
                        .ticket(ticket.id)
                        .is_some_and(|t| t.status == TicketStatus::Valid);
                    match result {
                        Ok(refund) => {
                            if still_valid {
                                ledger.record(
                                    LedgerEvent::TicketRefunded {
                                        ticket_id: ticket.id,
                                        buyer: ticket.buyer.clone(),
                                        amount: ticket.amount,
                                        refund_reference: refund.refund_reference.clone(),
                                    },
                                    changes,
                                );
                            }
                            report.refunded.push(ticket.id);
                        }
                        Err(err) => {
                            if still_valid {
                                ledger.record(
                                    LedgerEvent::TicketCancelled {
                                        ticket_id: ticket.id,
                                        buyer: ticket.buyer.clone(),
                                        reason: err.to_string(),
                                    },
                                    changes,
                                );
                            }
                            report.failed.push(RefundFailure {
                                ticket_id: ticket.id,
                                buyer: ticket.buyer.clone(),
                                reason: err.to_string(),
                            });
                        }
                    }
                }
                Ok(report)
            })
            .await?;

        for failure in &report.failed {
            tracing::error!(
                event_id = %event_id,
                ticket_id = %failure.ticket_id,
                buyer = %failure.buyer,
                reason = %failure.reason,
                "Refund failed during cancellation"
            );
        }
        tracing::info!(
            event_id = %event_id,
            refunded = report.refunded.len(),
            failed = report.failed.len(),
            "Event cancellation complete"
        );
        Ok(report)
    }

    /// Refund a single valid ticket and offer the freed slot to the queue.
    ///
    /// # Errors
    ///
    /// - `TicketNotFound` / `EventNotFound`: unknown ticket or event
    /// - `NotOwner`: the caller does not own the event
    /// - `InvalidTicketState`: the ticket is not valid
    /// - `RefundFailed`: the processor refused the refund; nothing changed
    /// - `Store`: persistence failure
    pub async fn refund_ticket(&self, ticket_id: TicketId, owner: &UserId) -> EngineResult<Ticket> {
        let ticket = self
            .inner
            .store
            .find_ticket(ticket_id)
            .await?
            .ok_or(EngineError::TicketNotFound(ticket_id))?;
        let ledger = self.load(ticket.event_id).await?;
        if &ledger.event.owner != owner {
            return Err(EngineError::NotOwner {
                action: "refund tickets for this event",
            });
        }
        if ticket.status != TicketStatus::Valid {
            return Err(EngineError::InvalidTicketState {
                status: ticket.status,
                action: "refunded",
            });
        }

        let destination_account = self.inner.store.payment_account(owner.clone()).await?;
        let refund = self.refund(&ticket, destination_account).await.map_err(|err| {
            tracing::warn!(ticket_id = %ticket_id, error = %err, "Ticket refund failed");
            EngineError::RefundFailed {
                ticket_id,
                reason: err.to_string(),
            }
        })?;

        let config = self.config().clone();
        let refunded = self
            .transact(ticket.event_id, |ledger, changes, now| {
                let current = ledger
                    .ticket(ticket_id)
                    .ok_or(EngineError::TicketNotFound(ticket_id))?;
                if current.status != TicketStatus::Valid {
                    tracing::error!(
                        ticket_id = %ticket_id,
                        status = %current.status,
                        refund_reference = %refund.refund_reference,
                        "Ticket changed state while its refund was in flight"
                    );
                    return Err(EngineError::InvalidTicketState {
                        status: current.status,
                        action: "refunded",
                    });
                }
                let (buyer, amount) = (current.buyer.clone(), current.amount);
                ledger.record(
                    LedgerEvent::TicketRefunded {
                        ticket_id,
                        buyer,
                        amount,
                        refund_reference: refund.refund_reference.clone(),
                    },
                    changes,
                );
                offers::promote_waiting(ledger, changes, now, &config);
                Ok(ledger.ticket(ticket_id).cloned())
            })
            .await?
            .ok_or(EngineError::TicketNotFound(ticket_id))?;

        tracing::info!(
            ticket_id = %ticket_id,
            event_id = %refunded.event_id,
            refund_reference = %refund.refund_reference,
            "Ticket refunded"
        );
        Ok(refunded)
    }

    async fn refund(&self, ticket: &Ticket, destination_account: Option<String>) -> PaymentResult<RefundResult> {
        self.inner
            .payments
            .create_refund(RefundRequest {
                payment_reference: ticket.payment_reference.clone(),
                destination_account,
                amount: ticket.amount,
            })
            .await
    }
}
