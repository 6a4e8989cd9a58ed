//! Property tests: random operation sequences never break the ledger's
//! inventory and queue invariants.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use std::collections::HashSet;
use ticket_queue_core::{
    Clock, EngineError, EntryStatus, EventId, EventUpdate, TicketStatus, TicketStore, UserId,
};
use ticket_queue_testing::fixtures::EngineHarness;

#[derive(Clone, Debug)]
enum Op {
    Join(u8),
    Pay { buyer: u8, reference: u8 },
    Release(u8),
    Refund(u8),
    Advance(i64),
    Sweep,
    RaiseTotal(u32),
}

fn op() -> impl Strategy<Value = Op> {
    let buyer = 0u8..6;
    prop_oneof![
        4 => buyer.clone().prop_map(Op::Join),
        3 => (buyer.clone(), 0u8..2).prop_map(|(buyer, reference)| Op::Pay { buyer, reference }),
        2 => buyer.clone().prop_map(Op::Release),
        1 => buyer.prop_map(Op::Refund),
        2 => (1i64..45).prop_map(Op::Advance),
        1 => Just(Op::Sweep),
        1 => (1u32..3).prop_map(Op::RaiseTotal),
    ]
}

fn buyer(n: u8) -> UserId {
    UserId::new(format!("buyer-{n}"))
}

fn tolerate(result: Result<(), EngineError>) {
    if let Err(err) = result {
        assert!(
            !matches!(err, EngineError::Store(_) | EngineError::Payment(_)),
            "infrastructure failure: {err}"
        );
    }
}

async fn run(h: &EngineHarness, event_id: EventId, op: Op) {
    match op {
        Op::Join(n) => tolerate(h.engine.join(event_id, &buyer(n)).await.map(|_| ())),
        Op::Pay { buyer: n, reference } => {
            let reference = format!("pi_{n}_{reference}");
            tolerate(h.pay(event_id, &buyer(n), &reference).await.map(|_| ()));
        }
        Op::Release(n) => {
            if let Some(pos) = h.engine.position(event_id, &buyer(n)).await.unwrap() {
                tolerate(h.engine.release(event_id, pos.entry_id, &buyer(n)).await.map(|_| ()));
            }
        }
        Op::Refund(n) => {
            if let Some(ticket) = h.engine.user_ticket_for_event(event_id, &buyer(n)).await.unwrap() {
                tolerate(h.engine.refund_ticket(ticket.id, &h.seller()).await.map(|_| ()));
            }
        }
        Op::Advance(minutes) => h.clock.advance_minutes(minutes),
        Op::Sweep => {
            h.engine.sweep().await.unwrap();
        }
        Op::RaiseTotal(by) => {
            let total = h.engine.get_event(event_id).await.unwrap().total_tickets;
            let update = EventUpdate {
                total_tickets: Some(total + by),
                ..EventUpdate::default()
            };
            tolerate(h.engine.update_event(event_id, &h.seller(), update).await.map(|_| ()));
        }
    }
}

async fn check_invariants(h: &EngineHarness, event_id: EventId) {
    // Heal past-due offers first so the stored ledger reflects "now".
    h.engine.availability(event_id).await.unwrap();
    let ledger = h.store.load_ledger(event_id).await.unwrap().unwrap();
    let now = h.clock.now();
    let availability = ledger.availability(now);

    assert!(
        availability.purchased + availability.active_offers <= availability.total,
        "oversold: {availability:?}"
    );

    let mut live_buyers = HashSet::new();
    for entry in ledger.entries.iter().filter(|e| e.is_live(now)) {
        assert!(live_buyers.insert(entry.buyer.clone()), "two live entries for {}", entry.buyer);
    }

    if availability.has_capacity() {
        assert!(
            ledger.entries.iter().all(|e| e.status != EntryStatus::Waiting),
            "buyers waiting while capacity is free"
        );
    }

    let oldest_waiting = ledger
        .entries
        .iter()
        .filter(|e| e.status == EntryStatus::Waiting)
        .map(|e| e.queue_key())
        .min();
    if let Some(oldest) = oldest_waiting {
        for offered in ledger.entries.iter().filter(|e| e.holds_active_offer(now)) {
            assert!(offered.queue_key() < oldest, "offer granted out of join order");
        }
    }

    for ticket in &ledger.tickets {
        let entry = ledger.entry(ticket.entry_id).unwrap();
        assert_eq!(entry.status, EntryStatus::Purchased);
    }
    let purchased_entries = ledger
        .entries
        .iter()
        .filter(|e| e.status == EntryStatus::Purchased)
        .count();
    assert_eq!(purchased_entries, ledger.tickets.len());

    let held: Vec<_> = ledger
        .tickets
        .iter()
        .filter(|t| t.status.holds_inventory())
        .map(|t| &t.buyer)
        .collect();
    let unique: HashSet<_> = held.iter().collect();
    assert_eq!(held.len(), unique.len(), "buyer holds two tickets");
    assert!(ledger.tickets.iter().all(|t| t.status != TicketStatus::Cancelled));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_operations_preserve_invariants(
        total in 1u32..4,
        ops in proptest::collection::vec(op(), 1..40),
    ) {
        tokio_test::block_on(async {
            let h = EngineHarness::new();
            let event = h.create_event(total).await;
            for op in ops {
                run(&h, event.id, op).await;
                check_invariants(&h, event.id).await;
            }
        });
    }
}
