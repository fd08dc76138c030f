// src/server/connection_loop.rs

//! Contains the main accept loop and graceful shutdown handling.

use super::context::ServerContext;
use crate::connection::SessionHandler;
use crate::core::state::SessionEntry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

// Platform-specific signal handling imports
#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM.
/// On Windows, it listens for Ctrl+C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("Failed to create Ctrl+C stream");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, initiating graceful shutdown."); } } => {},
    }
}

/// The main loop: accept connections, register sessions, and exit on signal.
pub async fn run(mut ctx: ServerContext) {
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased; // Prioritize shutdown signals over other events.

            _ = await_shutdown_signal() => {
                break;
            },

            // Monitor background tasks for unexpected termination.
            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(()) => { error!("CRITICAL: a background task exited unexpectedly. Shutting down."); break; }
                    Err(e) => { error!("CRITICAL: a background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            // Accept new incoming TCP connections.
            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        if ctx.state.sessions.len() >= ctx.state.config.max_conn {
                            warn!("refusing {addr}: session cap {} reached", ctx.state.config.max_conn);
                            drop(socket);
                            continue;
                        }
                        info!("Accepted new connection from: {addr}");
                        ctx.state.stats.increment_total_connections();

                        let (kill_tx, kill_rx) = broadcast::channel(1);
                        let last_activity = Arc::new(parking_lot::Mutex::new(Instant::now()));
                        ctx.state.sessions.insert(addr, SessionEntry {
                            kill: kill_tx,
                            last_activity: last_activity.clone(),
                            created: Instant::now(),
                        });

                        let handler = SessionHandler::new(
                            socket,
                            addr,
                            ctx.state.clone(),
                            kill_rx,
                            ctx.shutdown_tx.subscribe(),
                            last_activity,
                        );
                        client_tasks.spawn(handler.run());
                    }
                    Err(e) => {
                        // Transient accept failures (fd exhaustion, aborted
                        // handshakes) are retried after yielding.
                        warn!("Failed to accept connection: {e}");
                        tokio::task::yield_now().await;
                    }
                }
            },

            // Reap completed client tasks.
            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A session handler panicked: {e:?}");
                }
            },
        }
    }

    // --- Graceful Shutdown Sequence ---
    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No tasks were listening for the shutdown signal.");
    }

    client_tasks.shutdown().await;
    info!("All client sessions closed.");

    ctx.state.pools.close_all().await;
    info!("All backend pools closed.");

    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Proxy shutdown complete.");
}
