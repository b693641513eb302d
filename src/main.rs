//! # Signal Refinery — Binary Entrypoint
//! Boots the store, coordinator and heartbeat, then serves the HTTP API.
//!
//! Exit codes: 0 clean shutdown, 1 fatal configuration error, 2 storage
//! initialization error.

use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use signal_refinery::analyze::llm::HttpLlm;
use signal_refinery::coordinator::heartbeat;
use signal_refinery::metrics::Metrics;
use signal_refinery::notify::chat::ChatSender;
use signal_refinery::{create_router, Config, Coordinator, Store};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(error = ?err, "configuration error");
            return ExitCode::from(1);
        }
    };

    let metrics = Metrics::init();

    let store = match Store::open(&cfg.db_path) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = ?err, path = %cfg.db_path, "storage initialization failed");
            return ExitCode::from(2);
        }
    };

    let llm = match HttpLlm::new(&cfg.llm_endpoint, &cfg.llm_api_key) {
        Ok(llm) => Arc::new(llm),
        Err(err) => {
            tracing::error!(error = ?err, "llm client setup failed");
            return ExitCode::from(1);
        }
    };
    let sender = match ChatSender::new(&cfg.chat_send_endpoint, &cfg.chat_send_token) {
        Ok(sender) => Arc::new(sender),
        Err(err) => {
            tracing::error!(error = ?err, "chat sender setup failed");
            return ExitCode::from(1);
        }
    };

    let bind_addr = cfg.bind_addr.clone();
    let coordinator = match Coordinator::new(cfg, store, llm, sender) {
        Ok(coordinator) => coordinator,
        Err(err) => {
            tracing::error!(error = ?err, "coordinator setup failed");
            return ExitCode::from(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let beat = tokio::spawn(heartbeat::run(coordinator.clone(), shutdown_rx));

    let app = create_router(coordinator.clone()).merge(metrics.router());
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = ?err, addr = %bind_addr, "bind failed");
            return ExitCode::from(1);
        }
    };
    tracing::info!(addr = %bind_addr, "listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    });
    if let Err(err) = serve.await {
        tracing::error!(error = ?err, "server error");
    }

    // Stop the heartbeat, then drain in-flight analysis within the grace
    // period. The store is the source of truth; anything unfinished is
    // picked up on the next start.
    let _ = shutdown_tx.send(true);
    coordinator.shutdown().await;
    let _ = beat.await;
    ExitCode::SUCCESS
}
