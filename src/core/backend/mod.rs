// src/core/backend/mod.rs

//! Backend-side plumbing: one pooled RESP connection per borrow, one
//! bounded pool per owner, one registry of pools for the whole process.

pub mod conn;
pub mod pool;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

pub use conn::BackendConn;
pub use pool::{ConnPool, PoolOptions};

/// Socket deadlines shared by every backend dial.
#[derive(Debug, Clone, Copy)]
pub struct BackendTimeouts {
    pub dial: Duration,
    pub read: Duration,
    pub write: Duration,
}

/// The process-wide `owner id → pool` map. Pools are created lazily the
/// first time a command routes to an owner and live until shutdown.
#[derive(Debug)]
pub struct PoolRegistry {
    pools: DashMap<String, Arc<ConnPool>>,
    pool_size: usize,
    pool_timeout: Duration,
    idle_timeout: Duration,
    timeouts: BackendTimeouts,
}

impl PoolRegistry {
    pub fn new(
        pool_size: usize,
        pool_timeout: Duration,
        idle_timeout: Duration,
        timeouts: BackendTimeouts,
    ) -> Self {
        Self {
            pools: DashMap::new(),
            pool_size,
            pool_timeout,
            idle_timeout,
            timeouts,
        }
    }

    /// Returns the pool for an owner, creating it (and its reaper task) on
    /// first use. The owner id doubles as the dial address.
    pub fn pool_for(&self, owner_id: &str) -> Arc<ConnPool> {
        self.pools
            .entry(owner_id.to_string())
            .or_insert_with(|| {
                let pool = Arc::new(ConnPool::new(PoolOptions {
                    owner_id: owner_id.to_string(),
                    addr: owner_id.to_string(),
                    size: self.pool_size,
                    pool_timeout: self.pool_timeout,
                    idle_timeout: self.idle_timeout,
                    timeouts: self.timeouts,
                }));
                pool::spawn_reaper(&pool);
                pool
            })
            .clone()
    }

    /// Closes every pool. Part of the normal shutdown path.
    pub async fn close_all(&self) {
        for entry in self.pools.iter() {
            entry.value().close().await;
        }
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
