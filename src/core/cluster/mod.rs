// src/core/cluster/mod.rs

pub mod refresher;
pub mod slot;
pub mod topology;

pub use refresher::TopologyRefresher;
pub use slot::{NUM_SLOTS, get_slot};
pub use topology::{Node, NodeRole, SlotMap, Topology};
