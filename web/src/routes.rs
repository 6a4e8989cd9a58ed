//! Router configuration.

use crate::handlers::{events, health, queue, tickets, webhooks};
use crate::middleware::track_request;
use crate::state::AppState;
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post, put},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// # Routes
///
/// - `GET /health`, `GET /ready`
/// - `POST|GET /api/events`, `GET /api/events/search?q=`, `GET|PUT /api/events/:id`
/// - `POST /api/events/:id/cancel`
/// - `GET /api/events/:id/availability`, `GET /api/events/:id/position`
/// - `GET /api/events/:id/ticket`, `GET /api/events/:id/updates` (SSE)
/// - `POST /api/events/:id/queue`, `POST /api/events/:id/queue/:entry_id/release`
/// - `POST /api/events/:id/checkout`
/// - `GET /api/me/tickets`, `GET /api/me/events`, `PUT /api/me/payment-account`
/// - `GET /api/tickets/:id`, `POST /api/tickets/:id/use`, `POST /api/tickets/:id/refund`
/// - `POST /api/webhooks/payments`
///
/// `cors_origin` restricts cross-origin callers to one origin; any origin is
/// allowed when it is `None` or not a valid header value.
pub fn build_router(state: AppState, cors_origin: Option<&str>) -> Router {
    let api_routes = Router::new()
        // Catalog
        .route("/events", post(events::create_event).get(events::list_events))
        .route("/events/search", get(events::search_events))
        .route("/events/:id", get(events::get_event).put(events::update_event))
        .route("/events/:id/cancel", post(events::cancel_event))
        .route("/events/:id/availability", get(events::availability))
        .route("/events/:id/position", get(events::position))
        .route("/events/:id/ticket", get(events::my_ticket))
        .route("/events/:id/updates", get(events::event_updates))
        // Queue and checkout
        .route("/events/:id/queue", post(queue::join_queue))
        .route(
            "/events/:id/queue/:entry_id/release",
            post(queue::release_entry),
        )
        .route("/events/:id/checkout", post(queue::checkout))
        // Buyer and seller views
        .route("/me/tickets", get(tickets::my_tickets))
        .route("/me/events", get(tickets::my_events))
        .route("/me/payment-account", put(tickets::set_payment_account))
        .route("/tickets/:id", get(tickets::get_ticket))
        .route("/tickets/:id/use", post(tickets::use_ticket))
        .route("/tickets/:id/refund", post(tickets::refund_ticket))
        // Processor callbacks
        .route("/webhooks/payments", post(webhooks::payment_webhook));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .nest("/api", api_routes)
        .layer(axum::middleware::from_fn(track_request))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origin))
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(_)) => {
            tracing::warn!("Invalid CORS origin, allowing any origin");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
