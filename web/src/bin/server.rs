//! Ticket queue HTTP server.
//!
//! Reads configuration from the environment (and `.env` when present),
//! picks `PostgreSQL` when `DATABASE_URL` is set and the in-memory store
//! otherwise, and Stripe when `STRIPE_SECRET_KEY` is set and the mock
//! processor otherwise.
//!
//! Health: `http://localhost:8080/health`
//! Metrics: `http://localhost:9090/metrics`

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use ticket_queue_core::{
    ExpirationSweeper, InMemoryTicketStore, MockPaymentProcessor, PaymentProcessor, StripeConfig,
    StripeProcessor, TicketEngine, TicketStore, metrics::register_engine_metrics,
};
use ticket_queue_postgres::PostgresTicketStore;
use ticket_queue_web::{AppState, Config, WebhookVerifier, build_router};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = Config::from_env();
    info!(http = %config.http_addr(), metrics = %config.metrics_addr(), "Starting ticket queue server");

    // Prometheus exporter serves /metrics on its own listener
    let metrics_addr: SocketAddr = config
        .metrics_addr()
        .parse()
        .context("Invalid metrics address")?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    register_engine_metrics();

    // Storage
    let mut database = None;
    let store: Arc<dyn TicketStore> = match &config.postgres {
        Some(pg) => {
            let store = PostgresTicketStore::connect(&pg.url, pg.max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            if pg.run_migrations {
                store.migrate().await.context("Failed to run migrations")?;
            }
            database = Some(store.pool().clone());
            info!("Using PostgreSQL store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(InMemoryTicketStore::new())
        }
    };

    // Payments
    let payments: Arc<dyn PaymentProcessor> = match &config.payments.stripe_secret_key {
        Some(_) if config.payments.webhook_secret.is_none() => {
            anyhow::bail!("STRIPE_WEBHOOK_SECRET is required when STRIPE_SECRET_KEY is set");
        }
        Some(key) => {
            let mut stripe = StripeConfig::new(key.clone());
            stripe.api_base.clone_from(&config.payments.stripe_api_base);
            info!("Using Stripe payment processor");
            Arc::new(StripeProcessor::new(stripe).context("Failed to build Stripe client")?)
        }
        None => {
            warn!("STRIPE_SECRET_KEY not set, using the mock payment processor");
            MockPaymentProcessor::shared()
        }
    };

    let engine = TicketEngine::builder(store, payments)
        .config(config.engine.clone())
        .checkout(config.payments.checkout.clone())
        .build();

    // Background expiry sweeps
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sweeper = ExpirationSweeper::spawn(engine.clone(), shutdown_rx);

    let mut state = AppState::new(engine);
    match &config.payments.webhook_secret {
        Some(secret) => {
            state = state.with_webhook_verifier(
                WebhookVerifier::new(secret.as_str()).with_tolerance(config.payments.webhook_tolerance),
            );
        }
        None => warn!("STRIPE_WEBHOOK_SECRET not set, payment callbacks are unauthenticated (mock processor only)"),
    }
    if let Some(pool) = database {
        state = state.with_database(pool);
    }

    let app = build_router(state, config.server.cors_origin.as_deref());

    let listener = tokio::net::TcpListener::bind(config.http_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr()))?;
    info!(address = %config.http_addr(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped, stopping background tasks");
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(config.server.shutdown_timeout, sweeper).await {
        Ok(Ok(())) => info!("Expiration sweeper stopped"),
        Ok(Err(e)) => warn!(error = %e, "Expiration sweeper task failed"),
        Err(_) => warn!("Expiration sweeper shutdown timed out"),
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticket_queue=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
