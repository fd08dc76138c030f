// src/server/initialization.rs

//! Builds the shared state, performs the initial topology load, and binds
//! the listener. Everything here is fatal: a proxy that cannot see the
//! cluster or its own port exits before accepting a single client.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::ProxyState;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

pub async fn setup(config: Config) -> Result<ServerContext> {
    let bind_addr = format!("{}:{}", config.host, config.port);
    let (state, reload_rx) = ProxyState::new(config);

    // First slot map, before any client can route. The refresher keeps it
    // fresh from here on.
    state
        .refresher
        .refresh()
        .await
        .context("initial topology load failed; check seed_nodes")?;

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind listener on {bind_addr}"))?;
    info!("Citrine listening on {bind_addr}");

    let (shutdown_tx, _) = broadcast::channel(1);

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        reload_rx: Some(reload_rx),
    })
}
