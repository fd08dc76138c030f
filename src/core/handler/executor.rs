// src/core/handler/executor.rs

//! The routed round-trip for a single-key command, including the one
//! permitted redirection hop.

use crate::core::CitrineError;
use crate::core::protocol::RespFrame;
use crate::core::state::ProxyState;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Moved,
    Ask,
}

/// A redirection hint extracted from a backend error reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub slot: u16,
    pub addr: String,
}

/// Recognizes `MOVED <slot> <host:port>` and `ASK <slot> <host:port>`
/// error payloads.
pub fn parse_redirect(msg: &str) -> Option<Redirect> {
    let mut parts = msg.split_whitespace();
    let kind = match parts.next()? {
        "MOVED" => RedirectKind::Moved,
        "ASK" => RedirectKind::Ask,
        _ => return None,
    };
    let slot = parts.next()?.parse().ok()?;
    let addr = parts.next()?.to_string();
    Some(Redirect { kind, slot, addr })
}

/// Executes an ordinary command end to end and renders any failure as a
/// RESP error reply.
pub async fn execute_routed(
    state: &Arc<ProxyState>,
    items: Vec<RespFrame>,
    prefer_replica: bool,
) -> RespFrame {
    // The routing key is the second bulk; zero-key commands never pass the
    // arity table.
    let Some(RespFrame::BulkString(key)) = items.get(1) else {
        return RespFrame::Error("ERR request carries no routing key".to_string());
    };
    let key = key.clone();
    let request = RespFrame::Array(items);

    match route_and_execute(state, &request, &key, prefer_replica).await {
        Ok(reply) => reply,
        Err(e) => e.into(),
    }
}

/// Routes a request by key, performs the round-trip, and follows at most
/// one redirection hop. Further redirects are forwarded to the client
/// verbatim. Also used by the multi-key fan-out for its sub-requests.
pub async fn route_and_execute(
    state: &Arc<ProxyState>,
    request: &RespFrame,
    key: &[u8],
    prefer_replica: bool,
) -> Result<RespFrame, CitrineError> {
    let owner = match state.topology.route(key, prefer_replica) {
        Ok(owner) => owner,
        Err(e) => {
            // An unowned slot usually means the map is stale; wake the
            // refresher while surfacing the error.
            state.refresher.signal();
            return Err(e);
        }
    };

    let reply = round_trip_on(state, &owner, request).await?;

    if let RespFrame::Error(msg) = &reply
        && let Some(redirect) = parse_redirect(msg)
    {
        debug!("redirect from {owner}: {msg}");
        return match redirect.kind {
            RedirectKind::Moved => {
                // The map is stale; schedule a rebuild and retry once
                // against the quoted owner.
                state.refresher.signal();
                round_trip_on(state, &redirect.addr, request).await
            }
            // ASK is transient (slot mid-migration): no refresh, prefix the
            // retry with a one-shot ASKING.
            RedirectKind::Ask => ask_round_trip(state, &redirect.addr, request).await,
        };
    }

    Ok(reply)
}

/// One pooled round-trip against a specific owner. A connection that fails
/// mid-command is removed from its pool rather than returned.
async fn round_trip_on(
    state: &Arc<ProxyState>,
    owner: &str,
    request: &RespFrame,
) -> Result<RespFrame, CitrineError> {
    let pool = state.pools.pool_for(owner);
    let mut conn = pool.get().await?;
    match conn.round_trip(request.clone()).await {
        Ok(reply) => {
            pool.put(conn).await;
            Ok(reply)
        }
        Err(e) => {
            pool.remove(conn).await;
            Err(e)
        }
    }
}

/// The ASK retry: `ASKING` then the original request on one borrowed
/// connection; the second reply is the client's answer.
async fn ask_round_trip(
    state: &Arc<ProxyState>,
    owner: &str,
    request: &RespFrame,
) -> Result<RespFrame, CitrineError> {
    let pool = state.pools.pool_for(owner);
    let mut conn = pool.get().await?;

    let result = async {
        let asking = conn.round_trip(RespFrame::command(&[b"ASKING"])).await?;
        if let RespFrame::Error(e) = &asking {
            warn!("{owner} rejected ASKING: {e}");
        }
        conn.round_trip(request.clone()).await
    }
    .await;

    match result {
        Ok(reply) => {
            pool.put(conn).await;
            Ok(reply)
        }
        Err(e) => {
            pool.remove(conn).await;
            Err(e)
        }
    }
}
