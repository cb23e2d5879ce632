//! Process wiring.
//!
//! 1. **Metrics**: install the Prometheus recorder and serve `/metrics`
//! 2. **Database**: connect (with retries) and apply migrations
//! 3. **Collaborators**: anti-bot verifier, mail transport, rate limiter
//! 4. **Workers**: spawn the notification worker pool
//! 5. **HTTP**: serve the API until Ctrl+C or SIGTERM
//! 6. **Shutdown**: stop the workers and wait for their current batch

use super::{AppState, build_router, routes::cors_layer};
use crate::config::Config;
use crate::{transport, turnstile};
use anyhow::Context;
use axum::{Router, http::StatusCode, routing::get};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tablebook_core::environment::SystemClock;
use tablebook_postgres::PgStores;
use tablebook_runtime::metrics::MetricsServer;
use tablebook_runtime::rate_limit::TokenBucketLimiter;
use tablebook_runtime::render::MessageRenderer;
use tablebook_runtime::retry::{RetryPolicy, retry_with_backoff};
use tablebook_runtime::{BookingEnvironment, BookingOrchestrator, NotificationWorker};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Run the service until a shutdown signal arrives.
///
/// # Errors
///
/// Fails on invalid configuration, an unreachable database, a failed
/// migration, or when a listener cannot be bound.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let ctx = config
        .restaurant_context()
        .context("Invalid restaurant configuration")?;
    info!(restaurant_id = %ctx.restaurant_id, "Restaurant context loaded");

    spawn_metrics_endpoint(config.metrics_addr()?).await?;

    let pool = connect(&config).await?;
    tablebook_postgres::migrate(&pool)
        .await
        .context("Database migration failed")?;
    let stores = PgStores::new(pool);

    let bot_verifier = turnstile::from_config(&config.turnstile)?;
    let transport = transport::from_config(config.smtp.as_ref())?;

    let env = BookingEnvironment {
        ledger: stores.ledger.clone(),
        slots: stores.ledger.clone(),
        idempotency: stores.idempotency.clone(),
        tokens: stores.tokens.clone(),
        notifications: stores.notifications.clone(),
        bot_verifier,
        clients: stores.clients.clone(),
        group_inquiries: stores.group_inquiries.clone(),
        rate_limiter: Arc::new(TokenBucketLimiter::new(config.rate_limiter())),
        clock: Arc::new(SystemClock),
    };
    let orchestrator = BookingOrchestrator::new(env.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let renderer = MessageRenderer::new(
        config.restaurant.name.clone(),
        config.restaurant.public_base_url.clone(),
    );
    let workers: Vec<JoinHandle<()>> = (1..=config.notification.workers.max(1))
        .map(|index| {
            let worker = NotificationWorker::new(
                env.notifications.clone(),
                Arc::clone(&transport),
                env.idempotency.clone(),
                renderer.clone(),
                env.clock.clone(),
                config.worker(index),
            )
            .with_backoff(config.backoff());
            tokio::spawn(worker.run(shutdown_rx.clone()))
        })
        .collect();
    info!(worker_count = workers.len(), "Notification workers started");

    let app = build_router(AppState::new(orchestrator, ctx))
        .layer(cors_layer(&config.server.cors_origins));
    let addr = config.http_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping workers...");
    if shutdown_tx.send(true).is_err() {
        warn!("Every worker had already exited");
    }
    await_workers(workers, Duration::from_secs(config.server.shutdown_timeout)).await;

    info!("Graceful shutdown complete");
    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let db = &config.database;
    let pool = retry_with_backoff(&RetryPolicy::default(), || {
        PgPoolOptions::new()
            .max_connections(db.max_connections)
            .min_connections(db.min_connections)
            .acquire_timeout(Duration::from_secs(db.connect_timeout))
            .connect(&db.url)
    })
    .await
    .context("Failed to connect to PostgreSQL")?;
    info!(max_connections = db.max_connections, "Database pool ready");
    Ok(pool)
}

async fn spawn_metrics_endpoint(addr: SocketAddr) -> anyhow::Result<()> {
    let mut metrics = MetricsServer::new(addr);
    metrics.start()?;
    if metrics.handle().is_none() {
        warn!("Metrics recorder owned elsewhere, /metrics is not served");
        return Ok(());
    }

    let metrics = Arc::new(metrics);
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move { (StatusCode::OK, metrics.render().unwrap_or_default()) }
        }),
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics address {addr}"))?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Metrics endpoint stopped");
        }
    });
    Ok(())
}

async fn await_workers(workers: Vec<JoinHandle<()>>, timeout: Duration) {
    for (idx, handle) in workers.into_iter().enumerate() {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(worker = idx + 1, "Worker stopped gracefully"),
            Ok(Err(e)) => warn!(worker = idx + 1, error = %e, "Worker task failed"),
            Err(_) => warn!(worker = idx + 1, "Worker shutdown timed out"),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
