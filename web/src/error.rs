//! HTTP error responses.
//!
//! [`AppError`] carries a status, a stable machine code and a user-facing
//! message. Engine errors map onto it through `From<EngineError>`, keeping the
//! engine's codes (`DUPLICATE_CLAIM`, `NO_CAPACITY`, ...) so clients can branch
//! on them.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use ticket_queue_core::{EngineError, PaymentError, StoreError};

/// Application error type for web handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
    /// Internal cause, logged but never sent to the client
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            source: None,
        }
    }

    /// Attach the internal cause.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// 401 Unauthorized
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, "UNAUTHORIZED")
    }

    /// 403 Forbidden
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message, "FORBIDDEN")
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_SERVER_ERROR")
    }

    /// HTTP status of the response
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::EventNotFound(_)
            | EngineError::EntryNotFound(_)
            | EngineError::TicketNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::NotOwner { .. } => StatusCode::FORBIDDEN,
            EngineError::TooManyAttempts { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::InvalidEvent(_) | EngineError::SellerNotPayable => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::DuplicateClaim
            | EngineError::NoCapacity
            | EngineError::EventCancelled
            | EngineError::EventOccurred
            | EngineError::NoValidOffer
            | EngineError::InvalidTicketState { .. } => StatusCode::CONFLICT,
            EngineError::RefundFailed { .. } => StatusCode::BAD_GATEWAY,
            EngineError::Payment(PaymentError::Unavailable(_))
            | EngineError::Store(StoreError::ConcurrencyConflict { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            EngineError::Payment(_) => StatusCode::BAD_GATEWAY,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let code = err.code();
        if err.is_user_facing() {
            Self::new(status, err.to_string(), code)
        } else {
            let message = match status {
                StatusCode::SERVICE_UNAVAILABLE => "The service is busy, please retry shortly",
                StatusCode::BAD_GATEWAY => "The payment processor could not complete the request",
                _ => "An internal error occurred",
            };
            Self::new(status, message, code).with_source(err.into())
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
