use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use booking_queue_cell::BookingQueueState;
use shared_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic queue API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());
    let port = config.server_port;

    let state = Arc::new(
        BookingQueueState::from_config(config)
            .await
            .context("failed to initialise booking queue backends")?,
    );

    // Waiting lists live in memory; reload them before taking traffic.
    match state.broadcaster.rebuild_from_store().await {
        Ok(count) => info!("Restored {} waiting patients", count),
        Err(e) => warn!("Could not restore waiting lists: {}", e),
    }

    let consumer = state.consumer.clone();
    let consumer_task = tokio::spawn(async move {
        if let Err(e) = consumer.start().await {
            error!("Booking consumer exited: {}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper_task = state.reaper.clone().start(shutdown_rx);

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down background tasks");
    state.consumer.shutdown().await;
    let _ = shutdown_tx.send(true);
    if let Err(e) = reaper_task.await {
        warn!("Expiry reaper task ended abnormally: {}", e);
    }
    if let Err(e) = consumer_task.await {
        warn!("Consumer task ended abnormally: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
