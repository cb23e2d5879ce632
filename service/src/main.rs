//! Tablebook HTTP server.
//!
//! Reservation API plus the notification worker pool, configured from the
//! environment (a `.env` file is read when present).

use tablebook_service::Config;
use tablebook_service::server::bootstrap;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tablebook=debug,tablebook_service=debug,tablebook_runtime=debug,sqlx=warn,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Tablebook");

    let config = Config::from_env();
    tracing::info!(
        restaurant_id = %config.restaurant.id,
        http_port = config.server.port,
        metrics_port = config.server.metrics_port,
        workers = config.notification.workers,
        "Configuration loaded"
    );

    bootstrap::run(config).await
}
