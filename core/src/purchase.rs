//! Purchase coordinator: checkout sessions and payment completion.
//!
//! `begin_checkout` validates the buyer's offer and opens a processor session
//! outside the event lock. `complete_purchase` runs when the processor
//! confirms payment: inside one transaction it re-checks the bound entry and
//! either issues the ticket or decides the payment is late. Late payments are
//! refunded after the transaction, again outside the lock.

use crate::engine::TicketEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::LedgerEvent;
use crate::metrics;
use crate::payment::{CheckoutMetadata, CheckoutSession, CheckoutSessionRequest, RefundRequest};
use crate::types::{EntryStatus, EventId, Money, Ticket, TicketId, TicketStatus, UserId};
use serde::{Deserialize, Serialize};

/// Payment confirmation delivered by the processor callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Processor reference of the captured payment (used for refunds)
    pub payment_reference: String,
    /// Amount captured. `None` when the processor does not report it, in
    /// which case the event price is assumed.
    pub amount: Option<Money>,
}

/// What happened to a confirmed payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// The offer was still valid and a ticket was issued
    Issued {
        /// The new ticket
        ticket: Ticket,
    },
    /// The same payment was already processed
    AlreadyIssued {
        /// The ticket issued the first time
        ticket: Ticket,
    },
    /// The offer had closed; the payment was returned
    Refunded {
        /// Processor refund id
        refund_reference: String,
    },
    /// The offer had closed and returning the payment failed
    RefundFailed {
        /// Processor message
        reason: String,
    },
}

enum Completion {
    Issued(Ticket),
    AlreadyIssued(Ticket),
    Late { amount: Money, owner: UserId, why: &'static str },
}

impl TicketEngine {
    /// Open a payment session for the buyer's current offer.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: unknown event
    /// - `EventCancelled`: the event was cancelled
    /// - `NoValidOffer`: the buyer holds no offered, unexpired entry
    /// - `SellerNotPayable`: the owner has no payment account
    /// - `Payment`: the processor refused or failed, surfaced as-is
    pub async fn begin_checkout(&self, event_id: EventId, buyer: &UserId) -> EngineResult<CheckoutSession> {
        let ledger = self.load_reconciled(event_id).await?;
        let now = self.now();

        if ledger.event.is_cancelled {
            metrics::record_checkout("rejected");
            return Err(EngineError::EventCancelled);
        }
        let Some(entry) = ledger
            .entries
            .iter()
            .find(|e| &e.buyer == buyer && e.holds_active_offer(now))
        else {
            metrics::record_checkout("rejected");
            return Err(EngineError::NoValidOffer);
        };

        let Some(destination_account) = self
            .inner
            .store
            .payment_account(ledger.event.owner.clone())
            .await?
        else {
            metrics::record_checkout("rejected");
            return Err(EngineError::SellerNotPayable);
        };

        let checkout = &self.inner.checkout;
        let base = checkout.public_base_url.trim_end_matches('/');
        let request = CheckoutSessionRequest {
            item_name: ledger.event.name.clone(),
            item_description: ledger.event.description.clone(),
            amount: ledger.event.price,
            currency: checkout.currency.clone(),
            application_fee: ledger.event.price.basis_points(checkout.application_fee_bps),
            expires_at: now + self.config().offer_ttl_chrono(),
            success_url: format!("{base}/tickets/purchase-success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{base}/event/{event_id}"),
            metadata: CheckoutMetadata {
                event_id,
                buyer_id: buyer.clone(),
                waiting_list_entry_id: entry.id,
            },
            destination_account,
        };

        match self.inner.payments.create_checkout_session(request).await {
            Ok(session) => {
                metrics::record_checkout("opened");
                tracing::info!(
                    event_id = %event_id,
                    entry_id = %entry.id,
                    buyer = %buyer,
                    session_id = %session.session_id,
                    "Checkout session opened"
                );
                Ok(session)
            }
            Err(err) => {
                metrics::record_checkout("processor_error");
                tracing::warn!(event_id = %event_id, buyer = %buyer, error = %err, "Checkout session failed");
                Err(err.into())
            }
        }
    }

    /// Convert a confirmed payment into a ticket.
    ///
    /// The bound entry must still hold an unexpired offer, the event must
    /// not be cancelled and a reported amount must equal the event price;
    /// otherwise the payment is refunded and no ticket is issued. Replaying a confirmation with the same payment reference
    /// returns the ticket issued the first time.
    ///
    /// # Errors
    ///
    /// - `EventNotFound` / `EntryNotFound`: the metadata names unknown records
    /// - `NotOwner`: the metadata buyer does not hold the entry
    /// - `Store`: persistence failure
    pub async fn complete_purchase(
        &self,
        metadata: &CheckoutMetadata,
        confirmation: &PaymentConfirmation,
    ) -> EngineResult<PurchaseOutcome> {
        let event_id = metadata.event_id;
        let entry_id = metadata.waiting_list_entry_id;

        let completion = self
            .transact(event_id, |ledger, changes, now| {
                let entry = ledger
                    .entry(entry_id)
                    .ok_or(EngineError::EntryNotFound(entry_id))?;
                if entry.buyer != metadata.buyer_id {
                    return Err(EngineError::NotOwner {
                        action: "complete a purchase for another buyer's offer",
                    });
                }
                let amount = confirmation.amount.unwrap_or(ledger.event.price);
                let owner = ledger.event.owner.clone();

                if entry.status == EntryStatus::Purchased {
                    return Ok(match ledger.ticket_for_entry(entry_id) {
                        Some(ticket) if ticket.payment_reference == confirmation.payment_reference => {
                            Completion::AlreadyIssued(ticket.clone())
                        }
                        _ => Completion::Late {
                            amount,
                            owner,
                            why: "entry already purchased with another payment",
                        },
                    });
                }
                if ledger.event.is_cancelled {
                    return Ok(Completion::Late {
                        amount,
                        owner,
                        why: "event cancelled",
                    });
                }
                if !entry.holds_active_offer(now) {
                    return Ok(Completion::Late {
                        amount,
                        owner,
                        why: "offer no longer valid",
                    });
                }
                if amount != ledger.event.price {
                    return Ok(Completion::Late {
                        amount,
                        owner,
                        why: "amount does not match the event price",
                    });
                }

                let ticket = Ticket {
                    id: TicketId::new(),
                    event_id,
                    entry_id,
                    buyer: metadata.buyer_id.clone(),
                    status: TicketStatus::Valid,
                    amount,
                    payment_reference: confirmation.payment_reference.clone(),
                    purchased_at: now,
                };
                ledger.record(LedgerEvent::TicketIssued { ticket: ticket.clone() }, changes);
                Ok(Completion::Issued(ticket))
            })
            .await?;

        match completion {
            Completion::Issued(ticket) => {
                tracing::info!(
                    event_id = %event_id,
                    entry_id = %entry_id,
                    ticket_id = %ticket.id,
                    buyer = %ticket.buyer,
                    "Ticket issued"
                );
                Ok(PurchaseOutcome::Issued { ticket })
            }
            Completion::AlreadyIssued(ticket) => {
                tracing::debug!(ticket_id = %ticket.id, "Duplicate payment confirmation ignored");
                Ok(PurchaseOutcome::AlreadyIssued { ticket })
            }
            Completion::Late { amount, owner, why } => {
                tracing::warn!(
                    event_id = %event_id,
                    entry_id = %entry_id,
                    buyer = %metadata.buyer_id,
                    payment_reference = %confirmation.payment_reference,
                    reason = why,
                    "Late payment, refunding"
                );
                Ok(self.refund_late_payment(metadata, confirmation, amount, owner).await)
            }
        }
    }

    async fn refund_late_payment(
        &self,
        metadata: &CheckoutMetadata,
        confirmation: &PaymentConfirmation,
        amount: Money,
        owner: UserId,
    ) -> PurchaseOutcome {
        let destination_account = match self.inner.store.payment_account(owner).await {
            Ok(account) => account,
            Err(err) => {
                tracing::warn!(error = %err, "Seller account lookup failed, refunding without it");
                None
            }
        };

        let refund = self
            .inner
            .payments
            .create_refund(RefundRequest {
                payment_reference: confirmation.payment_reference.clone(),
                destination_account,
                amount,
            })
            .await;

        match refund {
            Ok(result) => {
                metrics::record_late_payment("refunded");
                self.inner.notifier.publish(
                    metadata.event_id,
                    &[LedgerEvent::LatePaymentRefunded {
                        entry_id: metadata.waiting_list_entry_id,
                        buyer: metadata.buyer_id.clone(),
                        payment_reference: confirmation.payment_reference.clone(),
                    }],
                );
                PurchaseOutcome::Refunded {
                    refund_reference: result.refund_reference,
                }
            }
            Err(err) => {
                metrics::record_late_payment("refund_failed");
                tracing::error!(
                    event_id = %metadata.event_id,
                    entry_id = %metadata.waiting_list_entry_id,
                    buyer = %metadata.buyer_id,
                    payment_reference = %confirmation.payment_reference,
                    error = %err,
                    "Late payment refund failed, manual reconciliation required"
                );
                PurchaseOutcome::RefundFailed {
                    reason: err.to_string(),
                }
            }
        }
    }
}
