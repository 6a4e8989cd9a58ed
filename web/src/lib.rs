//! HTTP surface for the ticket queue.
//!
//! Thin Axum handlers over [`ticket_queue_core::TicketEngine`]:
//!
//! 1. **Extract** the caller ([`Identity`]) and inputs from the request
//! 2. **Call** one engine operation
//! 3. **Map** the result to JSON, or the error to an [`AppError`] carrying
//!    the engine's error code
//!
//! Live queue changes are streamed per event as server-sent events. Payment
//! confirmations arrive through the processor webhook.
//!
//! # Example
//!
//! ```ignore
//! use ticket_queue_web::{AppState, build_router};
//!
//! let app = build_router(AppState::new(engine), None);
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod signature;
pub mod state;

pub use config::Config;
pub use error::{AppError, ErrorBody};
pub use extractors::{Identity, USER_ID_HEADER};
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, track_request};
pub use routes::build_router;
pub use signature::{SignatureError, WebhookVerifier};
pub use state::AppState;
