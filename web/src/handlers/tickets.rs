//! Ticket and seller account endpoints.

use crate::error::AppError;
use crate::extractors::Identity;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use ticket_queue_core::{SellerEventSummary, Ticket, TicketDetails, TicketId};

/// Body of `PUT /api/me/payment-account`
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentAccountRequest {
    /// Connected account id at the processor
    pub account_id: String,
}

/// Tickets bought by the caller, newest first.
///
/// # Errors
///
/// 500 when the store fails.
pub async fn my_tickets(
    State(state): State<AppState>,
    Identity(buyer): Identity,
) -> Result<Json<Vec<Ticket>>, AppError> {
    Ok(Json(state.engine.user_tickets(&buyer).await?))
}

/// Dashboard rows for the events the caller sells.
///
/// # Errors
///
/// 500 when the store fails.
pub async fn my_events(
    State(state): State<AppState>,
    Identity(owner): Identity,
) -> Result<Json<Vec<SellerEventSummary>>, AppError> {
    Ok(Json(state.engine.seller_events(&owner).await?))
}

/// A ticket with its event. Visible to its buyer and the event owner.
///
/// # Errors
///
/// 404 for an unknown ticket, 403 for anyone else.
pub async fn get_ticket(
    State(state): State<AppState>,
    Identity(viewer): Identity,
    Path(ticket_id): Path<TicketId>,
) -> Result<Json<TicketDetails>, AppError> {
    let details = state.engine.get_ticket(ticket_id).await?;
    if details.ticket.buyer != viewer && details.event.owner != viewer {
        return Err(AppError::forbidden("This ticket belongs to someone else"));
    }
    Ok(Json(details))
}

/// Mark a ticket as scanned at the door. Owner only.
///
/// # Errors
///
/// 403 for other callers, 409 unless the ticket is valid.
pub async fn use_ticket(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Path(ticket_id): Path<TicketId>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.engine.mark_ticket_used(ticket_id, &owner).await?))
}

/// Refund one ticket. Owner only; frees the slot for the next buyer.
///
/// # Errors
///
/// 403 for other callers, 409 unless the ticket is valid, 502 when the
/// processor rejects the refund.
pub async fn refund_ticket(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Path(ticket_id): Path<TicketId>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.engine.refund_ticket(ticket_id, &owner).await?))
}

/// Register the caller's connected payment account.
///
/// # Errors
///
/// 422 for a blank account id.
pub async fn set_payment_account(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Json(request): Json<PaymentAccountRequest>,
) -> Result<StatusCode, AppError> {
    state
        .engine
        .register_payment_account(&owner, &request.account_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
