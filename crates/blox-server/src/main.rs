//! Blox API gateway binary.

use anyhow::Context;
use blox_server::{AppState, Server};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = blox_config::load_config()
        .await
        .context("failed to load configuration")?;

    blox_telemetry::init_logging(&config.observability.logging)
        .context("failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.server.socket_addr(),
        "Starting blox-gateway"
    );

    let state = AppState::from_config(config.clone()).context("failed to build gateway")?;

    let sweeper_stop = CancellationToken::new();
    let sweeper = if config.cache.enabled {
        Some(
            Arc::clone(state.gateway().cache())
                .spawn_sweeper(config.cache.sweep_interval, sweeper_stop.clone()),
        )
    } else {
        None
    };

    let result = Server::new(config.server.clone(), state).run().await;

    sweeper_stop.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }

    result.context("server terminated with an error")?;
    info!("blox-gateway stopped");
    Ok(())
}
