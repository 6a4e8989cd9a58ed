//! HTTP handlers.
//!
//! Handlers stay thin: extract the caller and inputs, call one engine
//! operation, map the result. Domain failures become [`AppError`]s with the
//! engine's error code.
//!
//! [`AppError`]: crate::error::AppError

pub mod events;
pub mod health;
pub mod queue;
pub mod tickets;
pub mod webhooks;
