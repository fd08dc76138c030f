// src/connection/guard.rs

//! Removes a session from the registry when its handler exits, however it
//! exits.

use crate::core::state::ProxyState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

pub struct SessionGuard {
    state: Arc<ProxyState>,
    addr: SocketAddr,
}

impl SessionGuard {
    pub fn new(state: Arc<ProxyState>, addr: SocketAddr) -> Self {
        Self { state, addr }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.state.sessions.remove(&self.addr);
        debug!("session {} deregistered", self.addr);
    }
}
