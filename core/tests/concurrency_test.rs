//! Concurrent access to a single event.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use ticket_queue_core::{EngineError, EntryStatus, PurchaseOutcome, UserId};
use ticket_queue_testing::fixtures::EngineHarness;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_concurrent_joins_never_oversell() {
    let h = EngineHarness::new();
    let event = h.create_event(10).await;

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.join(event.id, &UserId::new(format!("buyer-{i}"))).await })
        })
        .collect();

    let mut offered = 0;
    let mut waiting = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap().status {
            EntryStatus::Offered => offered += 1,
            EntryStatus::Waiting => waiting += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(offered, 10);
    assert_eq!(waiting, 90);

    let availability = h.engine.availability(event.id).await.unwrap();
    assert_eq!(availability.active_offers, 10);
    assert!(availability.purchased + availability.active_offers <= availability.total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_buyer_racing_joins_gets_one_entry() {
    let h = EngineHarness::new();
    let event = h.create_event(5).await;

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.join(event.id, &UserId::new("eager")).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::DuplicateClaim) => {}
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(accepted, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_purchases_issue_one_ticket_per_offer() {
    let h = EngineHarness::new();
    let event = h.create_event(3).await;
    let buyers: Vec<UserId> = (0..3).map(|i| UserId::new(format!("buyer-{i}"))).collect();
    for buyer in &buyers {
        h.engine.join(event.id, buyer).await.unwrap();
    }

    let handles: Vec<_> = buyers
        .iter()
        .flat_map(|buyer| {
            (0..4).map(move |attempt| (buyer.clone(), format!("pi_{buyer}_{}", attempt % 2)))
        })
        .map(|(buyer, reference)| {
            let harness = h.clone();
            tokio::spawn(async move { harness.pay(event.id, &buyer, &reference).await })
        })
        .collect();

    let mut issued = HashSet::new();
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            PurchaseOutcome::Issued { ticket } => {
                assert!(issued.insert(ticket.buyer));
            }
            PurchaseOutcome::AlreadyIssued { .. } | PurchaseOutcome::Refunded { .. } => {}
            PurchaseOutcome::RefundFailed { reason } => panic!("refund failed: {reason}"),
        }
    }
    assert_eq!(issued.len(), 3);

    let availability = h.engine.availability(event.id).await.unwrap();
    assert_eq!(availability.purchased, 3);
    assert_eq!(availability.active_offers, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_racing_payment_settles_one_way() {
    let h = EngineHarness::new();
    let event = h.create_event(1).await;
    let a = UserId::new("a");
    h.engine.join(event.id, &a).await.unwrap();
    h.engine.join(event.id, &UserId::new("b")).await.unwrap();
    h.clock.advance_minutes(30);

    let sweeper = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.sweep().await })
    };
    let payment = {
        let harness = h.clone();
        let a = a.clone();
        tokio::spawn(async move { harness.pay(event.id, &a, "pi_a").await })
    };
    sweeper.await.unwrap().unwrap();
    let outcome = payment.await.unwrap().unwrap();

    let a_entry = h.engine.position(event.id, &a).await.unwrap().unwrap();
    match outcome {
        PurchaseOutcome::Issued { .. } => assert_eq!(a_entry.status, EntryStatus::Purchased),
        PurchaseOutcome::Refunded { .. } => assert_eq!(a_entry.status, EntryStatus::Expired),
        other => panic!("unexpected outcome {other:?}"),
    }

    let availability = h.engine.availability(event.id).await.unwrap();
    assert!(availability.purchased + availability.active_offers <= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_cancellations_refund_each_ticket_once() {
    let h = EngineHarness::new();
    let event = h.create_event(3).await;
    for buyer in ["a", "b", "c"] {
        h.buy(event.id, buyer).await.unwrap();
    }

    let seller_a = h.seller();
    let seller_b = h.seller();
    let (first, second) = tokio::join!(
        h.engine.cancel_event(event.id, &seller_a),
        h.engine.cancel_event(event.id, &seller_b)
    );

    let (report, other) = match (first, second) {
        (Ok(report), other) | (other, Ok(report)) => (report, other),
        (Err(a), Err(b)) => panic!("both cancellations failed: {a} / {b}"),
    };
    assert_eq!(report.refunded.len(), 3);
    assert!(matches!(other, Err(EngineError::EventCancelled)));
    assert_eq!(h.payments.refunds().len(), 3);
}
