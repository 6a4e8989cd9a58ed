//! Waiting-list endpoints: join, release and checkout.

use crate::error::AppError;
use crate::extractors::Identity;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use ticket_queue_core::{CheckoutSession, EntryId, EventId, JoinOutcome};

/// Response of a release request
#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    /// False when the entry was not offered
    pub released: bool,
}

/// Join the event's waiting list.
///
/// Responds 201 with the new entry, offered immediately when a ticket is
/// free and queued otherwise.
///
/// ```text
/// POST /api/events/:id/queue
/// ```
///
/// # Errors
///
/// 409 for duplicate claims, sold-out, cancelled or past events, 429 when
/// the caller let too many offers lapse recently.
pub async fn join_queue(
    State(state): State<AppState>,
    Identity(buyer): Identity,
    Path(event_id): Path<EventId>,
) -> Result<(StatusCode, Json<JoinOutcome>), AppError> {
    let outcome = state.engine.join(event_id, &buyer).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Give up an offered entry and pass the slot to the next buyer.
///
/// `released` is `false` when the entry is not currently offered (waiting,
/// already released, expired or purchased); nothing changes then.
///
/// ```text
/// POST /api/events/:id/queue/:entry_id/release
/// ```
///
/// # Errors
///
/// 403 when the entry belongs to someone else, 404 when it does not exist.
pub async fn release_entry(
    State(state): State<AppState>,
    Identity(buyer): Identity,
    Path((event_id, entry_id)): Path<(EventId, EntryId)>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let released = state.engine.release(event_id, entry_id, &buyer).await?;
    Ok(Json(ReleaseResponse { released }))
}

/// Open a payment session for the caller's current offer.
///
/// ```text
/// POST /api/events/:id/checkout
/// ```
///
/// # Errors
///
/// 409 without a valid offer, 422 when the seller cannot take payments,
/// 502/503 when the processor fails.
pub async fn checkout(
    State(state): State<AppState>,
    Identity(buyer): Identity,
    Path(event_id): Path<EventId>,
) -> Result<Json<CheckoutSession>, AppError> {
    Ok(Json(state.engine.begin_checkout(event_id, &buyer).await?))
}
