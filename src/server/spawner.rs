// src/server/spawner.rs

//! Spawns the long-running background tasks: the topology refresher and the
//! idle-session sweeper. Pool reapers spawn themselves with their pools.

use super::context::ServerContext;
use crate::core::state::ProxyState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn spawn_all(ctx: &mut ServerContext) {
    if let Some(reload_rx) = ctx.reload_rx.take() {
        let refresher = ctx.state.refresher.clone();
        let shutdown_rx = ctx.shutdown_tx.subscribe();
        ctx.background_tasks
            .spawn(refresher.run(reload_rx, shutdown_rx));
    }

    let state = ctx.state.clone();
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    ctx.background_tasks.spawn(idle_sweeper(state, shutdown_rx));
}

/// Once a minute, force-closes every session idle past `idle_timeout`.
/// The kill signal makes the session's reader exit; its guard removes the
/// registry entry.
async fn idle_sweeper(state: Arc<ProxyState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let idle_cutoff = state.config.idle_timeout;
    if idle_cutoff.is_zero() {
        return;
    }

    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("idle sweeper shutting down");
                return;
            }
            _ = ticker.tick() => {}
        }

        let stale: Vec<SocketAddr> = state
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > idle_cutoff)
            .map(|entry| *entry.key())
            .collect();

        for addr in stale {
            if let Some(entry) = state.sessions.get(&addr) {
                info!("evicting idle session {addr}");
                let _ = entry.value().kill.send(());
            }
        }
    }
}
