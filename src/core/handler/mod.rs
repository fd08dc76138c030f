// src/core/handler/mod.rs

//! Turns one validated client request into one reply: proxy-local answers,
//! multi-key fan-out, or the routed single-key round-trip.

pub mod executor;
pub mod fanout;

use crate::core::commands::{CommandClass, table};
use crate::core::protocol::RespFrame;
use crate::core::state::ProxyState;
use std::sync::Arc;

/// The dispatcher's verdict for a proxy-local command.
#[derive(Debug)]
pub enum Outcome {
    Reply(RespFrame),
    /// QUIT: send the reply, then shut the session down.
    ReplyAndClose(RespFrame),
}

/// Commands answered by the proxy itself; no backend is contacted.
pub fn proxy_local(state: &Arc<ProxyState>, name: &str) -> Outcome {
    match name {
        "PING" => Outcome::Reply(RespFrame::SimpleString("PONG".to_string())),
        "QUIT" => Outcome::ReplyAndClose(RespFrame::SimpleString("OK".to_string())),
        // The proxy fronts a single logical database; SELECT is a no-op.
        "SELECT" => Outcome::Reply(RespFrame::SimpleString("OK".to_string())),
        "INFO" => Outcome::Reply(RespFrame::BulkString(render_info(state).into())),
        _ => Outcome::Reply(RespFrame::Error(format!(
            "ERR unhandled proxy command '{name}'"
        ))),
    }
}

/// Executes a backend-bound command. Every failure below the protocol layer
/// comes back as a RESP error reply; the session stays up.
pub async fn execute(
    state: &Arc<ProxyState>,
    items: Vec<RespFrame>,
    name: &str,
    class: CommandClass,
) -> RespFrame {
    match class {
        CommandClass::MultiGet => fanout::mget(state, &items).await,
        CommandClass::MultiSet => fanout::mset(state, &items).await,
        CommandClass::MultiDel => fanout::del(state, &items).await,
        CommandClass::Ordinary => {
            let prefer_replica = state.config.prefer_replica && table::is_readonly(name);
            executor::execute_routed(state, items, prefer_replica).await
        }
        CommandClass::ProxyLocal => {
            // Routed here only through a logic error; proxy-local commands
            // are answered inline by the dispatcher.
            RespFrame::Error(format!("ERR unhandled proxy command '{name}'"))
        }
    }
}

/// The INFO payload: proxy identity plus a few live counters.
fn render_info(state: &Arc<ProxyState>) -> String {
    let map = state.topology.snapshot();
    format!(
        "# Citrine\r\n\
         version:{}\r\n\
         uptime_in_seconds:{}\r\n\
         connected_sessions:{}\r\n\
         total_connections_received:{}\r\n\
         total_commands_processed:{}\r\n\
         known_nodes:{}\r\n\
         slots_covered:{}\r\n",
        env!("CARGO_PKG_VERSION"),
        state.started_at.elapsed().as_secs(),
        state.sessions.len(),
        state.stats.total_connections(),
        state.stats.total_commands(),
        map.nodes.len(),
        map.covered_slots(),
    )
}
