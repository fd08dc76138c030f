// src/core/state.rs

//! The process-wide shared state: configuration, the topology handle, the
//! pool registry, the session registry, and the counters INFO reports.

use crate::config::Config;
use crate::core::backend::{BackendTimeouts, PoolRegistry};
use crate::core::cluster::{Topology, TopologyRefresher};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};

/// Counters surfaced through the proxy-local INFO command.
#[derive(Debug, Default)]
pub struct ProxyStats {
    total_connections: AtomicU64,
    total_commands: AtomicU64,
}

impl ProxyStats {
    pub fn increment_total_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_total_commands(&self) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn total_commands(&self) -> u64 {
        self.total_commands.load(Ordering::Relaxed)
    }
}

/// What the session registry knows about one live session: how to kill it
/// and when it last did anything.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub kill: broadcast::Sender<()>,
    pub last_activity: Arc<parking_lot::Mutex<Instant>>,
    pub created: Instant,
}

impl SessionEntry {
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.lock().elapsed()
    }
}

/// Everything a session needs to route and serve commands. Constructed once
/// at startup; torn down explicitly on shutdown.
#[derive(Debug)]
pub struct ProxyState {
    pub config: Config,
    pub topology: Arc<Topology>,
    pub refresher: Arc<TopologyRefresher>,
    pub pools: PoolRegistry,
    /// Live sessions keyed by client address, for idle eviction and INFO.
    pub sessions: DashMap<SocketAddr, SessionEntry>,
    pub stats: ProxyStats,
    pub started_at: Instant,
}

impl ProxyState {
    /// Builds the state and hands back the refresher's signal receiver for
    /// the spawner to wire up.
    pub fn new(config: Config) -> (Arc<Self>, mpsc::Receiver<()>) {
        let topology = Arc::new(Topology::new());
        let timeouts = BackendTimeouts {
            dial: config.dial_timeout,
            read: config.read_timeout,
            write: config.write_timeout,
        };
        let pools = PoolRegistry::new(
            config.pool_size,
            config.pool_timeout,
            config.idle_timeout,
            timeouts,
        );
        let (refresher, reload_rx) = TopologyRefresher::new(
            topology.clone(),
            config.seed_nodes.clone(),
            timeouts,
            config.reload_interval,
        );

        (
            Arc::new(Self {
                config,
                topology,
                refresher,
                pools,
                sessions: DashMap::new(),
                stats: ProxyStats::default(),
                started_at: Instant::now(),
            }),
            reload_rx,
        )
    }
}
