//! Event listing endpoints and live queue updates.

use crate::error::AppError;
use crate::extractors::Identity;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use ticket_queue_core::{
    Availability, CancellationReport, Event, EventId, EventUpdate, NewEvent, QueuePosition,
    Ticket,
};
use tokio::sync::broadcast::error::RecvError;

/// Create an event owned by the caller.
///
/// ```text
/// POST /api/events
/// ```
///
/// # Errors
///
/// 422 when a field is invalid.
pub async fn create_event(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Json(new_event): Json<NewEvent>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    let event = state.engine.create_event(&owner, new_event).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// Upcoming events still on sale, soonest first.
///
/// # Errors
///
/// 500 when the store fails.
pub async fn list_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>, AppError> {
    Ok(Json(state.engine.list_events().await?))
}

/// Query string of [`search_events`]
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    /// Text matched against name, description and location
    #[serde(default)]
    pub q: String,
}

/// Upcoming events matching a search, soonest first.
///
/// ```text
/// GET /api/events/search?q=jazz
/// ```
///
/// # Errors
///
/// 500 when the store fails.
pub async fn search_events(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Event>>, AppError> {
    Ok(Json(state.engine.search_events(&params.q).await?))
}

/// One event.
///
/// # Errors
///
/// 404 for an unknown event.
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.engine.get_event(event_id).await?))
}

/// Edit an event. Only the owner may call this.
///
/// ```text
/// PUT /api/events/:id
/// ```
///
/// # Errors
///
/// 403 for other callers, 422 for invalid fields or a shrinking total.
pub async fn update_event(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Path(event_id): Path<EventId>,
    Json(update): Json<EventUpdate>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.engine.update_event(event_id, &owner, update).await?))
}

/// Cancel an event and refund every ticket sold.
///
/// Partial refund failures are reported in the body rather than failing the
/// request; the event is cancelled either way.
///
/// # Errors
///
/// 403 for other callers, 409 when already cancelled.
pub async fn cancel_event(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Path(event_id): Path<EventId>,
) -> Result<Json<CancellationReport>, AppError> {
    Ok(Json(state.engine.cancel_event(event_id, &owner).await?))
}

/// Inventory snapshot.
///
/// # Errors
///
/// 404 for an unknown event.
pub async fn availability(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> Result<Json<Availability>, AppError> {
    Ok(Json(state.engine.availability(event_id).await?))
}

/// The caller's place in the queue; `null` when they hold no entry.
///
/// # Errors
///
/// 404 for an unknown event.
pub async fn position(
    State(state): State<AppState>,
    Identity(buyer): Identity,
    Path(event_id): Path<EventId>,
) -> Result<Json<Option<QueuePosition>>, AppError> {
    Ok(Json(state.engine.position(event_id, &buyer).await?))
}

/// The caller's ticket for an event; `null` when they have none.
///
/// # Errors
///
/// 500 when the store fails.
pub async fn my_ticket(
    State(state): State<AppState>,
    Identity(buyer): Identity,
    Path(event_id): Path<EventId>,
) -> Result<Json<Option<Ticket>>, AppError> {
    Ok(Json(state.engine.user_ticket_for_event(event_id, &buyer).await?))
}

/// Server-sent stream of committed changes for one event.
///
/// Each change is sent as an SSE event named after its kind (`entry_joined`,
/// `offer_granted`, ...) with the change as JSON data. Subscribers that fall
/// behind skip the missed changes and should re-read position and
/// availability.
///
/// ```text
/// GET /api/events/:id/updates
/// ```
///
/// # Errors
///
/// 404 for an unknown event.
pub async fn event_updates(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, AppError> {
    let receiver = state.engine.notifier().subscribe();
    state.engine.get_event(event_id).await?;

    let stream = futures::stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(notification) if notification.event_id == event_id => {
                    let change = notification.change;
                    match SseEvent::default().event(change.kind()).json_data(&change) {
                        Ok(sse) => return Some((Ok(sse), receiver)),
                        Err(e) => tracing::warn!(error = %e, "Failed to encode update"),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(%event_id, skipped, "Update subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
