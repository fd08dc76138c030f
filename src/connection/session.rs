// src/connection/session.rs

//! Per-session reply ordering.
//!
//! Commands are dispatched concurrently across shards, so their replies can
//! arrive in any order. The writer pushes every arrival through a
//! [`ReorderBuffer`], which releases replies strictly in request order.

use crate::core::CitrineError;
use crate::core::protocol::RespFrame;
use std::collections::BTreeMap;

/// Reassembles `(seq, reply)` arrivals into the order requests were decoded.
///
/// `resp_seq` is the next sequence to emit. An arrival matching it is
/// released immediately, followed by any contiguous run held back so far.
/// Later arrivals wait in `pending`; earlier ones were already superseded
/// and are dropped.
///
/// Liveness over correctness: if `pending` ever holds `capacity` replies
/// (the session's whole in-flight budget) and none of them is `resp_seq`,
/// that command's reply is never coming. A RESP error is synthesized in its
/// place so the session does not stall forever.
#[derive(Debug)]
pub struct ReorderBuffer {
    resp_seq: u64,
    pending: BTreeMap<u64, RespFrame>,
    capacity: usize,
}

impl ReorderBuffer {
    /// `capacity` is the session's in-flight bound (`C_max`).
    pub fn new(capacity: usize) -> Self {
        Self {
            resp_seq: 0,
            pending: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// The next sequence number that will be emitted.
    pub fn resp_seq(&self) -> u64 {
        self.resp_seq
    }

    /// Replies currently parked out of order.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Accepts one arrival and returns every reply now ready to be written,
    /// in emission order.
    pub fn accept(&mut self, seq: u64, frame: RespFrame) -> Vec<RespFrame> {
        let mut ready = Vec::new();
        match seq.cmp(&self.resp_seq) {
            // Already superseded (a synthesized error took its slot).
            std::cmp::Ordering::Less => {}
            std::cmp::Ordering::Equal => {
                ready.push(frame);
                self.resp_seq += 1;
                self.drain_contiguous(&mut ready);
            }
            std::cmp::Ordering::Greater => {
                self.pending.insert(seq, frame);
                while self.pending.len() >= self.capacity
                    && !self.pending.contains_key(&self.resp_seq)
                {
                    ready.push(CitrineError::PipelineGap.into());
                    self.resp_seq += 1;
                    self.drain_contiguous(&mut ready);
                }
            }
        }
        ready
    }

    fn drain_contiguous(&mut self, ready: &mut Vec<RespFrame>) {
        while let Some(frame) = self.pending.remove(&self.resp_seq) {
            ready.push(frame);
            self.resp_seq += 1;
        }
    }
}
