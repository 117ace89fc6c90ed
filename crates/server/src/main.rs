//! spacenote server entry point.

use std::net::SocketAddr;

use spacenote_api::Facade;
use spacenote_common::Config;
use spacenote_core::Core;
use spacenote_queue::{provider, MessengerWorker};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod http;

use http::AppState;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spacenote=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting spacenote server...");

    let config = Config::load()?;

    let core = Core::connect(&config).await?;
    core.start().await?;
    info!("Connected to document store and loaded space cache");

    if let Some(telegram_provider) = provider::from_config(config.telegram_bot_token.as_deref()) {
        let worker = MessengerWorker::new(
            core.messenger.clone(),
            core.spaces.clone(),
            core.blobs.clone(),
            telegram_provider,
        );
        tokio::spawn(async move { worker.run().await });
        info!("Messenger worker started");
    } else {
        info!("No telegram_bot_token configured, messenger worker not started");
    }

    let facade = Facade::new(core, config.site_url.clone());
    let state = AppState { facade };
    let app = http::router(state, &config.cors_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
