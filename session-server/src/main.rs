use std::sync::Arc;

use session_server::config;
use session_server::framework::Framework;
use session_server::games::available_games;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
/// Loads the configuration, activates tracing, registers the games and runs
/// the accept loop until Ctrl-C.
async fn main() {
    let config = match config::load_config().await {
        Ok(config) => config,
        Err(message) => panic!("Configuration error: {}", message),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true), // Thread-ID (helpful for Tokio)
        )
        .init();

    let registry = available_games();
    let games: Vec<_> = registry.names().collect();
    tracing::info!(target: "framework", ?games, "registered games");

    let framework = Arc::new(Framework::new(registry, &config));

    let listener = TcpListener::bind((config.ip.as_str(), config.port))
        .await
        .unwrap();
    tracing::info!(target: "server", ip = %config.ip, port = config.port, "listening");

    session_server::run(listener, config, framework).await.unwrap();
}
