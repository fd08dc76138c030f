// src/server/context.rs

use crate::core::state::ProxyState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the proxy's main loop.
pub struct ServerContext {
    pub state: Arc<ProxyState>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<()>,
    /// The refresher's signal receiver, consumed when its task is spawned.
    pub reload_rx: Option<mpsc::Receiver<()>>,
}
