//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to decide whether the service
//! is alive and whether it can take traffic.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

/// Liveness response body
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` when the process answers
    pub status: String,
    /// Crate version
    pub version: String,
}

/// Readiness response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Whether the service can serve requests
    pub ready: bool,
    /// Database probe result; absent with the in-memory store
    pub database: Option<bool>,
}

/// Liveness probe. Does not touch dependencies.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe.
///
/// Runs `SELECT 1` against the database when one is configured.
///
/// # Status Codes
///
/// - 200 OK: ready
/// - 503 Service Unavailable: the database did not answer
///
/// ```text
/// GET /ready
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let Some(pool) = &state.database else {
        return (
            StatusCode::OK,
            Json(ReadinessResponse {
                ready: true,
                database: None,
            }),
        );
    };

    let healthy = match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Database readiness probe failed");
            false
        }
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready: healthy,
            database: Some(healthy),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_queue_core::{InMemoryTicketStore, MockPaymentProcessor, TicketEngine};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_simple_health_check() {
        let Json(body) = health_check().await;
        assert_eq!(body.status, "ok");
        assert!(!body.version.is_empty());
    }

    #[tokio::test]
    async fn test_ready_without_database() {
        let engine = TicketEngine::new(
            Arc::new(InMemoryTicketStore::new()),
            Arc::new(MockPaymentProcessor::new()),
        );
        let (status, Json(body)) = readiness_check(State(AppState::new(engine))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.ready);
        assert!(body.database.is_none());
    }
}
