//! Startup helpers for the chat gateway server.

use std::process::ExitCode;

use anyhow::Context;

use crate::conversation::GatewayConfig;
use crate::server::{self, AppState};

/// Run the server (used by the `chat-gateway-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting chat gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config)) {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    tracing::info!("Chat gateway stopped");
    ExitCode::SUCCESS
}

/// Build the backends described by `config` and serve until Ctrl-C.
///
/// # Errors
/// Returns an error if a backend cannot be opened or the server fails.
pub async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    tracing::info!(
        "Key-value table '{}', object backend '{}', bucket '{}', append mode {:?}",
        config.kv.table,
        config.objects.backend.name(),
        config.objects.bucket,
        config.append_mode
    );

    let state = AppState::from_config(&config)
        .await
        .context("failed to initialize storage backends")?;

    server::run_server_with_shutdown(state, config.server.addr(), shutdown_signal())
        .await
        .with_context(|| format!("failed to serve on {}", config.server.addr()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
