// src/core/cluster/refresher.rs

//! Rebuilds the slot map from the seed list, periodically and on demand.
//!
//! Sessions that hit a MOVED redirect (or a slot with no owner) signal the
//! refresher through a capacity-1 channel; concurrent signals coalesce into
//! a single reload. A refresh picks seeds at random, quarantines the ones
//! that fail, and gives up after three attempts, keeping the previous map.

use super::slot::NUM_SLOTS;
use super::topology::{Node, NodeRole, SlotMap, Topology};
use crate::core::CitrineError;
use crate::core::backend::conn::{BackendConn, CLUSTER_NODES};
use crate::core::backend::BackendTimeouts;
use crate::core::protocol::RespFrame;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const ATTEMPTS_PER_REFRESH: usize = 3;

/// One parsed line of the topology introspection reply.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// The cluster's own 40-hex run id; only used to link replicas.
    pub raw_id: String,
    /// `host:port`, the identifier Citrine routes and dials by.
    pub addr: String,
    pub host: String,
    pub port: u16,
    pub role: NodeRole,
    /// For replicas: the `raw_id` of the primary they serve.
    pub primary_raw_id: Option<String>,
    /// For primaries: the served slot range, inclusive.
    pub slots: Option<(u16, u16)>,
}

#[derive(Debug)]
struct SeedList {
    healthy: Vec<String>,
    quarantined: Vec<String>,
}

#[derive(Debug)]
pub struct TopologyRefresher {
    topology: Arc<Topology>,
    seeds: parking_lot::Mutex<SeedList>,
    timeouts: BackendTimeouts,
    reload_interval: Duration,
    reload_tx: mpsc::Sender<()>,
}

impl TopologyRefresher {
    /// Builds the refresher and the receiving half of its signal channel.
    /// The caller hands the receiver back to [`TopologyRefresher::run`].
    pub fn new(
        topology: Arc<Topology>,
        seeds: Vec<String>,
        timeouts: BackendTimeouts,
        reload_interval: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (reload_tx, reload_rx) = mpsc::channel(1);
        (
            Arc::new(Self {
                topology,
                seeds: parking_lot::Mutex::new(SeedList {
                    healthy: seeds,
                    quarantined: Vec::new(),
                }),
                timeouts,
                reload_interval,
                reload_tx,
            }),
            reload_rx,
        )
    }

    /// Requests an out-of-band reload. Non-blocking; a signal arriving while
    /// one is already pending is absorbed.
    pub fn signal(&self) {
        let _ = self.reload_tx.try_send(());
    }

    /// The refresher task: reload on every tick and on every signal, until
    /// shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut reload_rx: mpsc::Receiver<()>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.reload_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; the initial load already ran
        // during startup, so swallow it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("topology refresher shutting down");
                    return;
                }
                _ = ticker.tick() => {}
                received = reload_rx.recv() => {
                    if received.is_none() {
                        return;
                    }
                }
            }
            if let Err(e) = self.refresh().await {
                warn!("topology refresh failed: {e}");
            }
        }
    }

    /// One full refresh: try up to three seeds, install the first map that
    /// parses. Failed seeds are quarantined; when every seed is quarantined
    /// the list is restored wholesale and retried on the next refresh.
    pub async fn refresh(&self) -> Result<(), CitrineError> {
        let mut rng = SmallRng::from_entropy();
        for _ in 0..ATTEMPTS_PER_REFRESH {
            let Some(seed) = self.pick_seed(&mut rng) else {
                break;
            };
            match self.fetch_from(&seed).await {
                Ok(records) => {
                    let map = build_slot_map(&records);
                    info!(
                        "topology refreshed from {seed}: {} nodes, {} slots covered",
                        map.nodes.len(),
                        map.covered_slots()
                    );
                    self.topology.install(map);
                    return Ok(());
                }
                Err(e) => {
                    warn!("seed {seed} failed, quarantining: {e}");
                    self.quarantine(seed);
                }
            }
        }
        Err(CitrineError::Internal(
            "topology refresh abandoned, keeping previous slot map".to_string(),
        ))
    }

    fn pick_seed(&self, rng: &mut SmallRng) -> Option<String> {
        let mut seeds = self.seeds.lock();
        if seeds.healthy.is_empty() {
            if seeds.quarantined.is_empty() {
                return None;
            }
            // Every seed failed at some point; give them all another chance
            // rather than refusing to refresh forever.
            debug!("all seeds quarantined, restoring the full list");
            let restored = std::mem::take(&mut seeds.quarantined);
            seeds.healthy = restored;
        }
        let idx = rng.gen_range(0..seeds.healthy.len());
        Some(seeds.healthy[idx].clone())
    }

    fn quarantine(&self, seed: String) {
        let mut seeds = self.seeds.lock();
        seeds.healthy.retain(|s| s != &seed);
        if !seeds.quarantined.contains(&seed) {
            seeds.quarantined.push(seed);
        }
    }

    /// Dials one seed and fetches its view of the cluster.
    async fn fetch_from(&self, addr: &str) -> Result<Vec<NodeRecord>, CitrineError> {
        let mut conn = BackendConn::dial(addr, addr, self.timeouts).await?;
        match conn.round_trip(RespFrame::command(CLUSTER_NODES)).await? {
            RespFrame::BulkString(payload) => parse_cluster_nodes(&payload),
            RespFrame::Error(e) => Err(CitrineError::Internal(format!(
                "seed {addr} rejected topology introspection: {e}"
            ))),
            other => Err(CitrineError::Internal(format!(
                "seed {addr} returned unexpected topology reply: {other:?}"
            ))),
        }
    }
}

/// Parses the newline-separated introspection payload.
///
/// Each record is whitespace-separated:
/// `id host:port flags primary_id ping_sent pong_recv epoch link [slot_range]`.
/// Replica lines carry 8 fields, primary lines carry 9 where the 9th is an
/// inclusive `start-stop` range (primaries holding no slots carry 8).
/// A single malformed line fails the whole parse.
pub fn parse_cluster_nodes(payload: &[u8]) -> Result<Vec<NodeRecord>, CitrineError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| CitrineError::Internal("topology payload is not UTF-8".to_string()))?;

    let mut records = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 8 && fields.len() != 9 {
            return Err(CitrineError::Internal(format!(
                "topology line has {} fields, expected 8 or 9: {line}",
                fields.len()
            )));
        }

        // Newer backends append a cluster-bus port as `host:port@busport`.
        let addr = fields[1].split('@').next().unwrap_or(fields[1]).to_string();
        let (host, port) = addr.split_once(':').ok_or_else(|| {
            CitrineError::Internal(format!("topology address '{}' is not host:port", fields[1]))
        })?;
        let port: u16 = port.parse().map_err(|_| {
            CitrineError::Internal(format!("topology address '{}' has a bad port", fields[1]))
        })?;

        let flags = fields[2];
        let is_replica = flags.contains("slave") || flags.contains("replica");

        let record = if is_replica {
            if fields.len() != 8 {
                return Err(CitrineError::Internal(format!(
                    "replica topology line has {} fields, expected 8: {line}",
                    fields.len()
                )));
            }
            NodeRecord {
                raw_id: fields[0].to_string(),
                addr: addr.clone(),
                host: host.to_string(),
                port,
                role: NodeRole::Replica,
                primary_raw_id: Some(fields[3].to_string()),
                slots: None,
            }
        } else {
            let slots = if fields.len() == 9 {
                Some(parse_slot_range(fields[8], line)?)
            } else {
                None
            };
            NodeRecord {
                raw_id: fields[0].to_string(),
                addr: addr.clone(),
                host: host.to_string(),
                port,
                role: NodeRole::Primary,
                primary_raw_id: None,
                slots,
            }
        };
        records.push(record);
    }
    Ok(records)
}

/// Parses an inclusive `start-stop` range; a bare `n` is the one-slot range.
fn parse_slot_range(field: &str, line: &str) -> Result<(u16, u16), CitrineError> {
    let (start, stop) = match field.split_once('-') {
        Some((start, stop)) => (start, stop),
        None => (field, field),
    };
    let start: u16 = start
        .parse()
        .map_err(|_| CitrineError::Internal(format!("bad slot range in topology line: {line}")))?;
    let stop: u16 = stop
        .parse()
        .map_err(|_| CitrineError::Internal(format!("bad slot range in topology line: {line}")))?;
    if start > stop || (stop as usize) >= NUM_SLOTS {
        return Err(CitrineError::Internal(format!(
            "slot range {start}-{stop} out of bounds in topology line: {line}"
        )));
    }
    Ok((start, stop))
}

/// Builds a fresh slot map from parsed records. Primaries claim their slot
/// ranges; replicas attach to the primary whose raw id they reference.
/// Replicas pointing at an unknown primary are dropped with a warning.
pub fn build_slot_map(records: &[NodeRecord]) -> SlotMap {
    let mut nodes = HashMap::new();
    let mut slots: Vec<Option<String>> = vec![None; NUM_SLOTS];
    let mut replicas: HashMap<String, Vec<String>> = HashMap::new();
    let mut primary_addr_by_raw: HashMap<&str, &str> = HashMap::new();

    for record in records.iter().filter(|r| r.role == NodeRole::Primary) {
        primary_addr_by_raw.insert(&record.raw_id, &record.addr);
        nodes.insert(
            record.addr.clone(),
            Node {
                id: record.addr.clone(),
                host: record.host.clone(),
                port: record.port,
                role: NodeRole::Primary,
                primary_of: None,
            },
        );
        if let Some((start, stop)) = record.slots {
            for slot in start..=stop {
                slots[slot as usize] = Some(record.addr.clone());
            }
        }
    }

    for record in records.iter().filter(|r| r.role == NodeRole::Replica) {
        let Some(primary_addr) = record
            .primary_raw_id
            .as_deref()
            .and_then(|raw| primary_addr_by_raw.get(raw))
        else {
            warn!(
                "replica {} references an unknown primary, dropping it",
                record.addr
            );
            continue;
        };
        nodes.insert(
            record.addr.clone(),
            Node {
                id: record.addr.clone(),
                host: record.host.clone(),
                port: record.port,
                role: NodeRole::Replica,
                primary_of: Some((*primary_addr).to_string()),
            },
        );
        replicas
            .entry((*primary_addr).to_string())
            .or_default()
            .push(record.addr.clone());
    }

    SlotMap::new(nodes, slots, replicas)
}
