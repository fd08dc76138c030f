// src/core/backend/pool.rs

//! Per-owner bounded connection pool.
//!
//! Semantics: a free queue of healthy connections, an atomic reserve
//! counter capping live connections at the pool size, a token bucket that
//! throttles dials to `2·size` per second, and a reaper that drives idle
//! eviction by popping one entry a minute through `first()`.

use super::conn::BackendConn;
use super::BackendTimeouts;
use crate::core::CitrineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

const REAP_INTERVAL: Duration = Duration::from_secs(60);
const CLOSE_DRAIN_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub owner_id: String,
    pub addr: String,
    pub size: usize,
    pub pool_timeout: Duration,
    /// Zero disables idle eviction.
    pub idle_timeout: Duration,
    pub timeouts: BackendTimeouts,
}

/// Token bucket: `capacity` dials per refill window, refilled fully once a
/// second.
#[derive(Debug)]
struct RateBucket {
    tokens: usize,
    capacity: usize,
    refilled: Instant,
}

impl RateBucket {
    fn new(capacity: usize) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refilled: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        if self.refilled.elapsed() >= Duration::from_secs(1) {
            self.tokens = self.capacity;
            self.refilled = Instant::now();
        }
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }
}

#[derive(Debug)]
pub struct ConnPool {
    opts: PoolOptions,
    free_tx: mpsc::Sender<BackendConn>,
    /// Waiters queue on this mutex; `first()` only ever `try_lock`s it so a
    /// borrower never blocks behind a waiter just to peek.
    free_rx: Mutex<mpsc::Receiver<BackendConn>>,
    /// Live connections, reserved before dialing. Never exceeds `opts.size`.
    live: AtomicUsize,
    closed: AtomicBool,
    rate: parking_lot::Mutex<RateBucket>,
    last_dial_error: parking_lot::Mutex<Option<String>>,
}

impl ConnPool {
    pub fn new(opts: PoolOptions) -> Self {
        let (free_tx, free_rx) = mpsc::channel(opts.size);
        Self {
            rate: parking_lot::Mutex::new(RateBucket::new(2 * opts.size)),
            opts,
            free_tx,
            free_rx: Mutex::new(free_rx),
            live: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            last_dial_error: parking_lot::Mutex::new(None),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.opts.owner_id
    }

    /// Total live connections (free or borrowed).
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_idle(&self, cn: &BackendConn) -> bool {
        self.opts.idle_timeout > Duration::ZERO && cn.last_used().elapsed() > self.opts.idle_timeout
    }

    /// Reserves one live slot. The caller must either add a connection or
    /// release the reservation.
    fn reserve(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.opts.size).then_some(live + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    /// Pops the first non-idle free connection, discarding idle-expired ones
    /// as it goes. Returns `None` when the queue is empty or currently being
    /// drained by a waiter.
    pub async fn first(&self) -> Option<BackendConn> {
        let mut rx = self.free_rx.try_lock().ok()?;
        loop {
            match rx.try_recv() {
                Ok(cn) => {
                    if self.is_idle(&cn) {
                        debug!("pool {}: reaping idle connection", self.opts.owner_id);
                        self.release();
                        drop(cn);
                        continue;
                    }
                    return Some(cn);
                }
                Err(_) => return None,
            }
        }
    }

    /// Dials a new connection, charging the rate bucket first. The caller
    /// must already hold a reservation.
    async fn dial_new(&self) -> Result<BackendConn, CitrineError> {
        if !self.rate.lock().try_take() {
            let last = self
                .last_dial_error
                .lock()
                .clone()
                .unwrap_or_else(|| "none".to_string());
            return Err(CitrineError::DialTooFast(last));
        }

        match BackendConn::dial(&self.opts.owner_id, &self.opts.addr, self.opts.timeouts).await {
            Ok(cn) => Ok(cn),
            Err(e) => {
                *self.last_dial_error.lock() = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Waits on the free queue for up to `pool_timeout`.
    async fn wait(&self) -> Result<BackendConn, CitrineError> {
        let deadline = Instant::now() + self.opts.pool_timeout;
        let mut rx = match tokio::time::timeout_at(deadline.into(), self.free_rx.lock()).await {
            Ok(rx) => rx,
            Err(_) => return Err(CitrineError::PoolTimeout),
        };
        loop {
            match tokio::time::timeout_at(deadline.into(), rx.recv()).await {
                Ok(Some(cn)) => {
                    if self.is_idle(&cn) {
                        self.release();
                        drop(cn);
                        continue;
                    }
                    return Ok(cn);
                }
                Ok(None) => return Err(CitrineError::PoolClosed),
                Err(_) => return Err(CitrineError::PoolTimeout),
            }
        }
    }

    /// Returns a pooled connection, dialing a fresh one when under the cap,
    /// otherwise waiting for a return.
    pub async fn get(&self) -> Result<BackendConn, CitrineError> {
        if self.is_closed() {
            return Err(CitrineError::PoolClosed);
        }

        // Fetch the first non-idle free connection, if available.
        if let Some(cn) = self.first().await {
            return Ok(cn);
        }

        // Try to create a new one.
        if self.reserve() {
            match self.dial_new().await {
                Ok(cn) => return Ok(cn),
                Err(e) => {
                    self.release();
                    return Err(e);
                }
            }
        }

        // Otherwise, wait for an available connection.
        self.wait().await
    }

    /// Returns a connection to the free queue, or replaces it when it is
    /// flagged for discard.
    pub async fn put(&self, mut cn: BackendConn) {
        if self.is_closed() {
            self.release();
            return;
        }
        if cn.is_closed() {
            self.remove(cn).await;
            return;
        }
        cn.touch();
        if self.free_tx.try_send(cn).is_err() {
            // Queue full or shut down; the slot is no longer usable.
            self.release();
        }
    }

    /// Takes a failed connection out of circulation. One health probe
    /// decides its fate: a connection that still answers is reclaimed into
    /// the free queue; anything else is closed and a replacement is dialed
    /// so a pending waiter is unblocked. On replacement failure the slot is
    /// released.
    pub async fn remove(&self, mut cn: BackendConn) {
        if cn.probe().await {
            cn.reset();
            cn.touch();
            if self.free_tx.try_send(cn).is_err() {
                self.release();
            }
            return;
        }

        drop(cn);
        match self.dial_new().await {
            Ok(mut newcn) => {
                newcn.touch();
                if self.free_tx.try_send(newcn).is_err() {
                    self.release();
                }
            }
            Err(e) => {
                debug!(
                    "pool {}: replacement dial failed: {e}",
                    self.opts.owner_id
                );
                self.release();
            }
        }
    }

    /// Transitions to closed, waits briefly for outstanding borrows, then
    /// drops every held connection.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let deadline = Instant::now() + CLOSE_DRAIN_WAIT;
        let mut rx = self.free_rx.lock().await;
        while self.len() > 0 {
            match tokio::time::timeout_at(deadline.into(), rx.recv()).await {
                Ok(Some(cn)) => {
                    self.release();
                    drop(cn);
                }
                Ok(None) | Err(_) => break,
            }
        }
        rx.close();
    }
}

/// Spawns the per-pool reaper: once a minute it pops one entry via
/// `first()` (which discards idle-expired connections on the way) and puts
/// it straight back.
pub fn spawn_reaper(pool: &Arc<ConnPool>) {
    let weak = Arc::downgrade(pool);
    let owner = pool.owner_id().to_string();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(pool) = weak.upgrade() else {
                break;
            };
            if pool.is_closed() {
                break;
            }
            if let Some(cn) = pool.first().await {
                pool.put(cn).await;
            }
        }
        debug!("pool {owner}: reaper stopped");
    });
}
