// src/core/cluster/topology.rs

//! The shared view of the cluster: a flat node registry plus the
//! 16384-entry slot→owner map, installed atomically by the refresher and
//! read lock-free-ish by every session.

use super::slot::{NUM_SLOTS, get_slot};
use crate::core::CitrineError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The role of a backend node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Primary,
    Replica,
}

/// One backend node. The identifier Citrine routes and dials by is the
/// `host:port` address; the 40-hex cluster run id only survives long enough
/// to link replicas to their primaries during a topology parse.
#[derive(Debug, Clone)]
pub struct Node {
    /// Owner identifier, `host:port`.
    pub id: String,
    pub host: String,
    pub port: u16,
    pub role: NodeRole,
    /// For replicas: the owner id of the primary they serve.
    pub primary_of: Option<String>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

/// A fully-formed snapshot of the slot map. Immutable once installed;
/// sessions clone the `Arc` and never observe a half-built map.
///
/// Slots hold owner ids, not node structs; lookups go through the flat
/// `nodes` registry so there are no back-pointers to keep consistent.
#[derive(Debug)]
pub struct SlotMap {
    /// Flat registry of every known node, keyed by owner id.
    pub nodes: HashMap<String, Node>,
    /// `slot → primary owner id`. `None` when no primary is known.
    slots: Vec<Option<String>>,
    /// `primary owner id → replica owner ids`, in parse order.
    replicas: HashMap<String, Vec<String>>,
}

impl SlotMap {
    pub fn empty() -> Self {
        Self {
            nodes: HashMap::new(),
            slots: vec![None; NUM_SLOTS],
            replicas: HashMap::new(),
        }
    }

    pub fn new(
        nodes: HashMap<String, Node>,
        slots: Vec<Option<String>>,
        replicas: HashMap<String, Vec<String>>,
    ) -> Self {
        debug_assert_eq!(slots.len(), NUM_SLOTS);
        Self {
            nodes,
            slots,
            replicas,
        }
    }

    /// The primary owner id for a slot, if one is known.
    pub fn primary_for(&self, slot: u16) -> Option<&str> {
        self.slots[slot as usize].as_deref()
    }

    /// The replica owner ids serving a slot's primary.
    pub fn replicas_for(&self, slot: u16) -> &[String] {
        self.primary_for(slot)
            .and_then(|p| self.replicas.get(p))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Number of slots with a known primary.
    pub fn covered_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// The process-wide topology handle. The map is replaced wholesale by the
/// refresher; readers grab an `Arc` snapshot under a short read lock.
#[derive(Debug)]
pub struct Topology {
    map: RwLock<Arc<SlotMap>>,
    /// Cursor for deterministic round-robin replica selection.
    rr_cursor: AtomicUsize,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(Arc::new(SlotMap::empty())),
            rr_cursor: AtomicUsize::new(0),
        }
    }

    /// Atomically installs a freshly built map.
    pub fn install(&self, map: SlotMap) {
        *self.map.write() = Arc::new(map);
    }

    /// A consistent snapshot of the current map.
    pub fn snapshot(&self) -> Arc<SlotMap> {
        self.map.read().clone()
    }

    /// Maps a key to the owner that should serve it.
    ///
    /// With `prefer_replica` unset, or when the slot has no replicas, this is
    /// the slot's primary. Otherwise a replica is picked round-robin. A slot
    /// with no known primary surfaces as `NoOwner`.
    pub fn route(&self, key: &[u8], prefer_replica: bool) -> Result<String, CitrineError> {
        let slot = get_slot(key);
        let map = self.snapshot();

        if prefer_replica {
            let replicas = map.replicas_for(slot);
            if !replicas.is_empty() {
                let idx = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % replicas.len();
                return Ok(replicas[idx].clone());
            }
        }

        map.primary_for(slot)
            .map(str::to_owned)
            .ok_or(CitrineError::NoOwner { slot })
    }
}
