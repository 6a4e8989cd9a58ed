//! Engine metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `ticket_queue_entries_total{status}` - Joins by initial status
//! - `ticket_queue_offers_granted_total` - Waiting entries promoted to offers
//! - `ticket_queue_offers_closed_total{reason}` - Offers expired, released or cancelled
//! - `ticket_queue_tickets_issued_total` - Tickets issued
//! - `ticket_queue_revenue_minor_total` - Sum paid for issued tickets
//! - `ticket_queue_refunds_total{outcome}` - Refunds by outcome
//! - `ticket_queue_late_payments_total{outcome}` - Payments that arrived after their offer closed
//! - `ticket_queue_checkouts_total{outcome}` - Checkout sessions requested
//! - `ticket_queue_store_conflicts_total` - Ledger saves that lost the version check
//! - `ticket_queue_events_total{action}` - Events created, updated, cancelled
//!
//! ## Histograms
//! - `ticket_queue_sweep_duration_seconds` - Time per sweep cycle

use crate::events::LedgerEvent;
use metrics::{describe_counter, describe_histogram};

/// Register metric descriptions. Call once at startup.
pub fn register_engine_metrics() {
    describe_counter!(
        "ticket_queue_entries_total",
        "Waiting-list joins by initial status (offered, waiting)"
    );
    describe_counter!(
        "ticket_queue_offers_granted_total",
        "Waiting entries promoted into offers"
    );
    describe_counter!(
        "ticket_queue_offers_closed_total",
        "Entries moved to expired, by reason"
    );
    describe_counter!("ticket_queue_tickets_issued_total", "Tickets issued");
    describe_counter!(
        "ticket_queue_revenue_minor_total",
        "Sum paid for issued tickets in minor currency units"
    );
    describe_counter!("ticket_queue_refunds_total", "Refunds by outcome");
    describe_counter!(
        "ticket_queue_late_payments_total",
        "Payments confirmed after their offer closed, by outcome"
    );
    describe_counter!(
        "ticket_queue_checkouts_total",
        "Checkout sessions requested, by outcome"
    );
    describe_counter!(
        "ticket_queue_store_conflicts_total",
        "Ledger saves rejected by the version check"
    );
    describe_counter!("ticket_queue_events_total", "Event lifecycle actions");
    describe_histogram!(
        "ticket_queue_sweep_duration_seconds",
        "Duration of an expiration sweep"
    );

    tracing::info!("Engine metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record the facts of a committed transaction.
pub fn record_changes<'a>(changes: impl IntoIterator<Item = &'a LedgerEvent>) {
    for change in changes {
        match change {
            LedgerEvent::EntryJoined { entry } => {
                metrics::counter!("ticket_queue_entries_total", "status" => entry.status.as_str())
                    .increment(1);
            }
            LedgerEvent::OfferGranted { .. } => {
                metrics::counter!("ticket_queue_offers_granted_total").increment(1);
            }
            LedgerEvent::EntryExpired { reason, .. } => {
                metrics::counter!("ticket_queue_offers_closed_total", "reason" => reason.as_str())
                    .increment(1);
            }
            LedgerEvent::TicketIssued { ticket } => {
                metrics::counter!("ticket_queue_tickets_issued_total").increment(1);
                metrics::counter!("ticket_queue_revenue_minor_total")
                    .increment(ticket.amount.minor_units());
            }
            LedgerEvent::TicketRefunded { .. } => {
                metrics::counter!("ticket_queue_refunds_total", "outcome" => "refunded").increment(1);
            }
            LedgerEvent::TicketCancelled { .. } => {
                metrics::counter!("ticket_queue_refunds_total", "outcome" => "failed").increment(1);
            }
            LedgerEvent::EventCancelled { .. } => {
                metrics::counter!("ticket_queue_events_total", "action" => "cancelled").increment(1);
            }
            LedgerEvent::EventUpdated { .. } => {
                metrics::counter!("ticket_queue_events_total", "action" => "updated").increment(1);
            }
            LedgerEvent::TicketUsed { .. } | LedgerEvent::LatePaymentRefunded { .. } => {}
        }
    }
}

/// Record a newly listed event.
pub fn record_event_created() {
    metrics::counter!("ticket_queue_events_total", "action" => "created").increment(1);
}

/// Record a checkout session request.
///
/// # Arguments
///
/// * `outcome` - "opened", "rejected" or "processor_error"
pub fn record_checkout(outcome: &'static str) {
    metrics::counter!("ticket_queue_checkouts_total", "outcome" => outcome).increment(1);
}

/// Record a payment that arrived after its offer closed.
///
/// # Arguments
///
/// * `outcome` - "refunded" or "refund_failed"
pub fn record_late_payment(outcome: &'static str) {
    metrics::counter!("ticket_queue_late_payments_total", "outcome" => outcome).increment(1);
}

/// Record a lost compare-and-swap.
pub fn record_store_conflict() {
    metrics::counter!("ticket_queue_store_conflicts_total").increment(1);
}

/// Record a completed sweep.
pub fn record_sweep(duration_secs: f64) {
    metrics::histogram!("ticket_queue_sweep_duration_seconds").record(duration_secs);
}
