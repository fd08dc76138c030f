// src/core/handler/fanout.rs

//! Multi-key commands split into per-shard sub-requests.
//!
//! Sub-requests run sequentially, in input order, under the in-flight
//! permit the dispatcher already holds for the outer command; the proxy
//! does not try to be clever about per-session fairness beyond that.
//! Fan-out sub-requests always target the slot primary, regardless of
//! `prefer_replica`. MSET is not atomic across shards.

use super::executor::route_and_execute;
use crate::core::protocol::RespFrame;
use crate::core::state::ProxyState;
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

/// MGET: one GET per key, replies collected in input order into an array.
/// Any sub-request failure fails the whole command.
pub async fn mget(state: &Arc<ProxyState>, items: &[RespFrame]) -> RespFrame {
    let mut collected = Vec::with_capacity(items.len() - 1);

    for key_frame in &items[1..] {
        let RespFrame::BulkString(key) = key_frame else {
            return RespFrame::Error("proxy internal MGET failed".to_string());
        };
        let request = sub_request(b"GET", &[key.clone()]);
        match route_and_execute(state, &request, key, false).await {
            Ok(reply @ (RespFrame::BulkString(_) | RespFrame::Null)) => collected.push(reply),
            Ok(other) => {
                warn!("MGET sub-request returned a non-bulk reply: {other:?}");
                return RespFrame::Error("proxy internal MGET failed".to_string());
            }
            Err(e) => {
                warn!("MGET sub-request failed: {e}");
                return RespFrame::Error("proxy internal MGET failed".to_string());
            }
        }
    }

    RespFrame::Array(collected)
}

/// MSET: one SET per pair; every shard must answer `+OK`.
pub async fn mset(state: &Arc<ProxyState>, items: &[RespFrame]) -> RespFrame {
    let pairs = &items[1..];
    if pairs.len() % 2 != 0 {
        return RespFrame::Error(
            "ERR wrong number of arguments for 'MSET' command".to_string(),
        );
    }

    for pair in pairs.chunks_exact(2) {
        let (RespFrame::BulkString(key), RespFrame::BulkString(value)) = (&pair[0], &pair[1])
        else {
            return RespFrame::Error("proxy internal MSET failed".to_string());
        };
        let request = sub_request(b"SET", &[key.clone(), value.clone()]);
        match route_and_execute(state, &request, key, false).await {
            Ok(RespFrame::SimpleString(_)) => {}
            Ok(other) => {
                warn!("MSET sub-request returned {other:?}, expected +OK");
                return RespFrame::Error("proxy internal MSET failed".to_string());
            }
            Err(e) => {
                warn!("MSET sub-request failed: {e}");
                return RespFrame::Error("proxy internal MSET failed".to_string());
            }
        }
    }

    RespFrame::SimpleString("OK".to_string())
}

/// DEL: one DEL per key; the reply is the count of keys actually deleted.
/// Per-key failures are logged and counted as zero.
pub async fn del(state: &Arc<ProxyState>, items: &[RespFrame]) -> RespFrame {
    let mut deleted: i64 = 0;

    for key_frame in &items[1..] {
        let RespFrame::BulkString(key) = key_frame else {
            warn!("DEL sub-request key is not a bulk string, counting as zero");
            continue;
        };
        let request = sub_request(b"DEL", &[key.clone()]);
        match route_and_execute(state, &request, key, false).await {
            Ok(RespFrame::Integer(n)) if n == 1 => deleted += 1,
            Ok(RespFrame::Integer(_)) => {}
            Ok(other) => {
                warn!("DEL sub-request returned {other:?}, expected an integer");
            }
            Err(e) => {
                warn!("DEL sub-request failed, counting as zero: {e}");
            }
        }
    }

    RespFrame::Integer(deleted)
}

fn sub_request(name: &'static [u8], args: &[Bytes]) -> RespFrame {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(RespFrame::BulkString(Bytes::from_static(name)));
    parts.extend(args.iter().cloned().map(RespFrame::BulkString));
    RespFrame::Array(parts)
}
