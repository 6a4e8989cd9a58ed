//! Request extractors.
//!
//! Authentication happens upstream; the identity provider forwards the
//! caller's opaque user id in the `X-User-Id` header.

use crate::error::AppError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use ticket_queue_core::UserId;

/// Header carrying the authenticated caller
pub const USER_ID_HEADER: &str = "X-User-Id";

/// The authenticated caller.
///
/// Rejects with 401 when the header is missing or blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| Self(UserId::new(id)))
            .ok_or_else(|| AppError::unauthorized("Sign in to continue"))
    }
}
