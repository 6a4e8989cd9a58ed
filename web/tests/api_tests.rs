//! HTTP API tests against an in-memory engine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use chrono::Duration;
use serde_json::{Value, json};
use ticket_queue_core::{
    Availability, CancellationReport, CheckoutSession, Clock, EntryStatus, Event, EventId,
    JoinOutcome, Money, QueuePosition, Ticket, TicketDetails, TicketStatus,
};
use ticket_queue_testing::fixtures::{EngineHarness, SELLER, SELLER_ACCOUNT};
use axum::body::Bytes;
use ticket_queue_web::handlers::webhooks::WebhookResponse;
use ticket_queue_web::signature::SIGNATURE_HEADER;
use ticket_queue_web::{AppState, ErrorBody, WebhookVerifier, build_router};

const WEBHOOK_SECRET: &str = "whsec_test";

fn server_for(harness: &EngineHarness) -> TestServer {
    let state = AppState::new(harness.engine.clone()).with_webhook_secret(WEBHOOK_SECRET);
    TestServer::new(build_router(state, None)).unwrap()
}

fn as_user(request: TestRequest, user: &str) -> TestRequest {
    request.add_header(
        HeaderName::from_static("x-user-id"),
        HeaderValue::from_str(user).unwrap(),
    )
}

/// Send `payload` signed with `secret` at `timestamp`, as the processor would
fn signed_raw(request: TestRequest, payload: &[u8], secret: &str, timestamp: i64) -> TestRequest {
    let signature = WebhookVerifier::new(secret).sign(payload, timestamp).unwrap();
    request
        .add_header(
            HeaderName::from_bytes(SIGNATURE_HEADER.as_bytes()).unwrap(),
            HeaderValue::from_str(&signature).unwrap(),
        )
        .content_type("application/json")
        .bytes(Bytes::copy_from_slice(payload))
}

fn signed(request: TestRequest, harness: &EngineHarness, body: &Value) -> TestRequest {
    let payload = serde_json::to_vec(body).unwrap();
    signed_raw(request, &payload, WEBHOOK_SECRET, harness.clock.now().timestamp())
}

fn completed_session(event_id: EventId, buyer: &str, entry_id: impl ToString, intent: &str) -> Value {
    json!({
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": format!("cs_{intent}"),
            "payment_intent": intent,
            "amount_total": 5000,
            "metadata": {
                "eventId": event_id.to_string(),
                "userId": buyer,
                "waitingListId": entry_id.to_string(),
            }
        } }
    })
}

async fn create_event_over_http(server: &TestServer, harness: &EngineHarness, total: u32) -> Event {
    as_user(server.put("/api/me/payment-account"), SELLER)
        .json(&json!({ "account_id": SELLER_ACCOUNT }))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let response = as_user(server.post("/api/events"), SELLER)
        .json(&json!({
            "name": "Harbour Lights",
            "description": "Open-air concert",
            "location": "Pier 4",
            "event_date": harness.clock.now() + Duration::days(7),
            "price": 5000,
            "total_tickets": total,
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Event>()
}

#[tokio::test]
async fn test_health_and_readiness() {
    let harness = EngineHarness::new();
    let server = server_for(&harness);

    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "ok");

    let ready = server.get("/ready").await;
    ready.assert_status_ok();
    assert_eq!(ready.json::<Value>()["ready"], true);
}

#[tokio::test]
async fn test_mutations_require_identity() {
    let harness = EngineHarness::new();
    let server = server_for(&harness);

    let response = server
        .post("/api/events")
        .json(&json!({ "name": "x" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<ErrorBody>().code, "UNAUTHORIZED");
}

#[tokio::test]
async fn test_purchase_flow_over_http() {
    let harness = EngineHarness::new();
    let server = server_for(&harness);
    let event = create_event_over_http(&server, &harness, 2).await;
    assert_eq!(event.price, Money::from_minor(5_000));

    let listed: Vec<Event> = server.get("/api/events").await.json();
    assert_eq!(listed.len(), 1);

    // Join: offered straight away
    let response = as_user(server.post(&format!("/api/events/{}/queue", event.id)), "alice").await;
    response.assert_status(StatusCode::CREATED);
    let joined: JoinOutcome = response.json();
    assert_eq!(joined.status, EntryStatus::Offered);

    let position: Option<QueuePosition> =
        as_user(server.get(&format!("/api/events/{}/position", event.id)), "alice")
            .await
            .json();
    assert_eq!(position.unwrap().entry_id, joined.entry_id);

    // Checkout
    let session: CheckoutSession =
        as_user(server.post(&format!("/api/events/{}/checkout", event.id)), "alice")
            .await
            .json();
    assert!(session.session_id.starts_with("cs_test_"));
    assert_eq!(harness.payments.sessions().len(), 1);

    // Processor confirms payment
    let response = signed(
        server.post("/api/webhooks/payments"),
        &harness,
        &completed_session(event.id, "alice", joined.entry_id, "pi_alice"),
    )
    .await;
    response.assert_status_ok();
    let ack: WebhookResponse = response.json();
    assert!(ack.received);
    assert!(matches!(
        ack.outcome,
        Some(ticket_queue_core::PurchaseOutcome::Issued { .. })
    ));

    let tickets: Vec<Ticket> = as_user(server.get("/api/me/tickets"), "alice").await.json();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].status, TicketStatus::Valid);
    assert_eq!(tickets[0].payment_reference, "pi_alice");

    let mine: Option<Ticket> =
        as_user(server.get(&format!("/api/events/{}/ticket", event.id)), "alice")
            .await
            .json();
    assert_eq!(mine.map(|t| t.id), Some(tickets[0].id));

    let availability: Availability = server
        .get(&format!("/api/events/{}/availability", event.id))
        .await
        .json();
    assert_eq!(availability.purchased, 1);
    assert_eq!(availability.active_offers, 0);

    // Ticket details are visible to the buyer and the seller only
    let path = format!("/api/tickets/{}", tickets[0].id);
    let details: TicketDetails = as_user(server.get(&path), "alice").await.json();
    assert_eq!(details.event.id, event.id);
    as_user(server.get(&path), SELLER).await.assert_status_ok();
    as_user(server.get(&path), "mallory")
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Door scan by the seller
    let used: Ticket = as_user(server.post(&format!("{path}/use")), SELLER)
        .await
        .json();
    assert_eq!(used.status, TicketStatus::Used);
}

#[tokio::test]
async fn test_domain_errors_carry_engine_codes() {
    let harness = EngineHarness::new();
    let server = server_for(&harness);
    let event = create_event_over_http(&server, &harness, 1).await;
    let queue = format!("/api/events/{}/queue", event.id);

    as_user(server.post(&queue), "alice")
        .await
        .assert_status(StatusCode::CREATED);

    let response = as_user(server.post(&queue), "alice").await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<ErrorBody>().code, "DUPLICATE_CLAIM");

    let response = as_user(server.post(&queue), SELLER).await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.json::<ErrorBody>().code, "NOT_OWNER");

    let response = as_user(
        server.post(&format!("/api/events/{}/queue", EventId::new())),
        "bob",
    )
    .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<ErrorBody>().code, "EVENT_NOT_FOUND");
    server
        .get(&format!("/api/events/{}/updates", EventId::new()))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    // Bob waits behind alice's offer and has nothing to check out
    as_user(server.post(&queue), "bob").await.assert_status(StatusCode::CREATED);
    let response = as_user(server.post(&format!("/api/events/{}/checkout", event.id)), "bob").await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<ErrorBody>().code, "NO_VALID_OFFER");

    let response = as_user(server.put(&format!("/api/events/{}", event.id)), SELLER)
        .json(&json!({ "total_tickets": 0 }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<ErrorBody>().code, "INVALID_EVENT");
}

#[tokio::test]
async fn test_release_hands_offer_to_next_buyer() {
    let harness = EngineHarness::new();
    let server = server_for(&harness);
    let event = create_event_over_http(&server, &harness, 1).await;
    let queue = format!("/api/events/{}/queue", event.id);

    let alice: JoinOutcome = as_user(server.post(&queue), "alice").await.json();
    let bob: JoinOutcome = as_user(server.post(&queue), "bob").await.json();
    assert_eq!(bob.status, EntryStatus::Waiting);
    assert_eq!(bob.position, Some(2));

    // A waiting entry holds no offer to give up
    let bob_release = format!("/api/events/{}/queue/{}/release", event.id, bob.entry_id);
    let body: Value = as_user(server.post(&bob_release), "bob").await.json();
    assert_eq!(body["released"], false);

    let release = format!("/api/events/{}/queue/{}/release", event.id, alice.entry_id);
    as_user(server.post(&release), "bob")
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let body: Value = as_user(server.post(&release), "alice").await.json();
    assert_eq!(body["released"], true);
    let body: Value = as_user(server.post(&release), "alice").await.json();
    assert_eq!(body["released"], false);

    let position: Option<QueuePosition> =
        as_user(server.get(&format!("/api/events/{}/position", event.id)), "bob")
            .await
            .json();
    assert_eq!(position.unwrap().status, EntryStatus::Offered);

    let nobody: Option<QueuePosition> =
        as_user(server.get(&format!("/api/events/{}/position", event.id)), "carol")
            .await
            .json();
    assert!(nobody.is_none());
}

#[tokio::test]
async fn test_event_search() {
    let harness = EngineHarness::new();
    let server = server_for(&harness);
    let event = create_event_over_http(&server, &harness, 2).await;

    let found: Vec<Event> = server
        .get("/api/events/search")
        .add_query_param("q", "pier")
        .await
        .json();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, event.id);

    let none: Vec<Event> = server
        .get("/api/events/search")
        .add_query_param("q", "opera")
        .await
        .json();
    assert!(none.is_empty());

    let response = server.get("/api/events/search").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Vec<Event>>().len(), 1);
}

#[tokio::test]
async fn test_webhook_authentication_and_filtering() {
    let harness = EngineHarness::new();
    let server = server_for(&harness);
    let event = create_event_over_http(&server, &harness, 1).await;
    let joined = harness.engine.join(event.id, &"alice".into()).await.unwrap();
    let body = completed_session(event.id, "alice", joined.entry_id, "pi_alice");
    let payload = serde_json::to_vec(&body).unwrap();
    let now = harness.clock.now().timestamp();

    // Unsigned
    server
        .post("/api/webhooks/payments")
        .json(&body)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    // Signed with another secret
    signed_raw(server.post("/api/webhooks/payments"), &payload, "whsec_other", now)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    // Signed too long ago
    signed_raw(server.post("/api/webhooks/payments"), &payload, WEBHOOK_SECRET, now - 301)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    // Valid signature over a different body
    let header = WebhookVerifier::new(WEBHOOK_SECRET).sign(&payload, now).unwrap();
    let tampered = completed_session(event.id, "mallory", joined.entry_id, "pi_alice");
    let response = server
        .post("/api/webhooks/payments")
        .add_header(
            HeaderName::from_bytes(SIGNATURE_HEADER.as_bytes()).unwrap(),
            HeaderValue::from_str(&header).unwrap(),
        )
        .json(&tampered)
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<ErrorBody>().code, "UNAUTHORIZED");

    let ack: WebhookResponse = signed(
        server.post("/api/webhooks/payments"),
        &harness,
        &json!({ "type": "charge.refunded", "data": { "object": {} } }),
    )
    .await
    .json();
    assert!(ack.received);
    assert!(ack.outcome.is_none());

    signed_raw(server.post("/api/webhooks/payments"), b"not json", WEBHOOK_SECRET, now)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    // Nothing was issued by the rejected callbacks
    assert!(harness.engine.user_tickets(&"alice".into()).await.unwrap().is_empty());

    // The correctly signed callback goes through
    let ack: WebhookResponse = signed_raw(server.post("/api/webhooks/payments"), &payload, WEBHOOK_SECRET, now)
        .await
        .json();
    assert!(matches!(
        ack.outcome,
        Some(ticket_queue_core::PurchaseOutcome::Issued { .. })
    ));
}

#[tokio::test]
async fn test_late_payment_is_refunded_over_webhook() {
    let harness = EngineHarness::new();
    let server = server_for(&harness);
    let event = create_event_over_http(&server, &harness, 1).await;
    let joined = harness.engine.join(event.id, &"alice".into()).await.unwrap();

    harness.clock.advance_minutes(31);

    let ack: WebhookResponse = signed(
        server.post("/api/webhooks/payments"),
        &harness,
        &completed_session(event.id, "alice", joined.entry_id, "pi_late"),
    )
    .await
    .json();
    assert!(matches!(
        ack.outcome,
        Some(ticket_queue_core::PurchaseOutcome::Refunded { .. })
    ));
    assert_eq!(harness.payments.refunds().len(), 1);
    assert_eq!(harness.payments.refunds()[0].payment_reference, "pi_late");
}

#[tokio::test]
async fn test_cancel_event_is_owner_only_and_reports_refunds() {
    let harness = EngineHarness::new();
    let server = server_for(&harness);
    let event = create_event_over_http(&server, &harness, 2).await;
    harness.buy(event.id, "alice").await.unwrap();
    harness.buy(event.id, "bob").await.unwrap();

    let cancel = format!("/api/events/{}/cancel", event.id);
    as_user(server.post(&cancel), "alice")
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let report: CancellationReport = as_user(server.post(&cancel), SELLER).await.json();
    assert_eq!(report.refunded.len(), 2);
    assert!(report.failed.is_empty());

    let response = as_user(server.post(&cancel), SELLER).await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<ErrorBody>().code, "EVENT_CANCELLED");

    let dashboard: Value = as_user(server.get("/api/me/events"), SELLER).await.json();
    assert_eq!(dashboard[0]["event"]["is_cancelled"], true);
}

#[tokio::test]
async fn test_seller_refund_frees_a_slot() {
    let harness = EngineHarness::new();
    let server = server_for(&harness);
    let event = create_event_over_http(&server, &harness, 1).await;
    harness.buy(event.id, "alice").await.unwrap();
    let ticket = harness
        .engine
        .user_ticket_for_event(event.id, &"alice".into())
        .await
        .unwrap()
        .unwrap();

    let refund = format!("/api/tickets/{}/refund", ticket.id);
    as_user(server.post(&refund), "alice")
        .await
        .assert_status(StatusCode::FORBIDDEN);
    let refunded: Ticket = as_user(server.post(&refund), SELLER).await.json();
    assert_eq!(refunded.status, TicketStatus::Refunded);

    let availability: Availability = server
        .get(&format!("/api/events/{}/availability", event.id))
        .await
        .json();
    assert!(availability.has_capacity());
}
