// src/connection/handler.rs

//! The per-client session: three cooperating tasks joined by two bounded
//! queues.
//!
//! The reader decodes requests and stamps them with a monotonically
//! increasing sequence. The dispatcher validates each one and either answers
//! it inline (proxy-local), or spawns a per-command task bounded by the
//! session's in-flight semaphore. The writer reorders replies back into
//! request order and owns the socket's write half.

use super::guard::SessionGuard;
use super::session::ReorderBuffer;
use crate::core::commands::{self, CommandClass};
use crate::core::handler::{self, Outcome};
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::state::ProxyState;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

type ClientSink = SplitSink<Framed<TcpStream, RespFrameCodec>, RespFrame>;
type ClientStream = SplitStream<Framed<TcpStream, RespFrameCodec>>;

/// Manages the full lifecycle of one client connection.
pub struct SessionHandler {
    socket: TcpStream,
    addr: SocketAddr,
    state: Arc<ProxyState>,
    /// Per-session kill switch, fired by the idle sweeper.
    kill_rx: broadcast::Receiver<()>,
    /// Process-wide shutdown.
    shutdown_rx: broadcast::Receiver<()>,
    last_activity: Arc<parking_lot::Mutex<Instant>>,
}

impl SessionHandler {
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        state: Arc<ProxyState>,
        kill_rx: broadcast::Receiver<()>,
        shutdown_rx: broadcast::Receiver<()>,
        last_activity: Arc<parking_lot::Mutex<Instant>>,
    ) -> Self {
        Self {
            socket,
            addr,
            state,
            kill_rx,
            shutdown_rx,
            last_activity,
        }
    }

    /// Runs the session to completion: spawns the reader and writer, then
    /// drives the dispatcher on the current task.
    pub async fn run(self) {
        let Self {
            socket,
            addr,
            state,
            kill_rx,
            shutdown_rx,
            last_activity,
        } = self;

        let _guard = SessionGuard::new(state.clone(), addr);
        let _ = socket.set_nodelay(true);

        let depth = state.config.pipeline_depth;
        let c_max = state.config.concurrency;
        let (sink, stream) = Framed::new(socket, RespFrameCodec).split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<(u64, Vec<RespFrame>)>(depth);
        let (reply_tx, reply_rx) = mpsc::channel::<(u64, RespFrame)>(depth);
        // Session-internal quit: fired on QUIT and on writer failure so the
        // reader stops pulling new requests.
        let (quit_tx, _) = broadcast::channel::<()>(1);

        let reader = tokio::spawn(read_loop(
            stream,
            cmd_tx,
            kill_rx,
            shutdown_rx,
            quit_tx.subscribe(),
            last_activity,
            addr,
        ));
        let writer = tokio::spawn(write_loop(sink, reply_rx, c_max, quit_tx.clone(), addr));

        let in_flight = Arc::new(Semaphore::new(c_max));
        'dispatch: while let Some((seq, items)) = cmd_rx.recv().await {
            let (name, rule) = match commands::inspect(&items) {
                Ok(parsed) => parsed,
                Err(e) => {
                    if reply_tx.send((seq, e.into())).await.is_err() {
                        break 'dispatch;
                    }
                    continue;
                }
            };
            state.stats.increment_total_commands();

            if rule.class == CommandClass::ProxyLocal {
                match handler::proxy_local(&state, &name) {
                    Outcome::Reply(frame) => {
                        if reply_tx.send((seq, frame)).await.is_err() {
                            break 'dispatch;
                        }
                    }
                    Outcome::ReplyAndClose(frame) => {
                        let _ = reply_tx.send((seq, frame)).await;
                        let _ = quit_tx.send(());
                        break 'dispatch;
                    }
                }
                continue;
            }

            // Backend-bound: take an in-flight permit and run the routed
            // round-trip (or fan-out) off the dispatcher task.
            let Ok(permit) = in_flight.clone().acquire_owned().await else {
                break 'dispatch;
            };
            let state = state.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let reply = handler::execute(&state, items, &name, rule.class).await;
                let _ = reply_tx.send((seq, reply)).await;
                drop(permit);
            });
        }

        // Dispatcher is done; once the in-flight tasks drop their senders
        // the writer drains and exits.
        drop(reply_tx);
        drop(cmd_rx);

        let _ = reader.await;
        let _ = writer.await;
        debug!("session {addr} closed");
    }
}

/// Decodes requests off the socket and queues them with their sequence.
async fn read_loop(
    mut stream: ClientStream,
    cmd_tx: mpsc::Sender<(u64, Vec<RespFrame>)>,
    mut kill_rx: broadcast::Receiver<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut quit_rx: broadcast::Receiver<()>,
    last_activity: Arc<parking_lot::Mutex<Instant>>,
    addr: SocketAddr,
) {
    let mut req_seq: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!("session {addr} reader observed shutdown");
                break;
            }
            _ = kill_rx.recv() => {
                info!("session {addr} force-closed");
                break;
            }
            _ = quit_rx.recv() => break,
            next = stream.next() => match next {
                None => {
                    debug!("client {addr} closed the connection");
                    break;
                }
                Some(Err(e)) => {
                    if e.is_fatal_protocol() {
                        // A framing error leaves the byte stream unusable.
                        warn!("client {addr} protocol error, closing session: {e}");
                    } else {
                        warn!("read error from client {addr}: {e}");
                    }
                    break;
                }
                Some(Ok(RespFrame::Array(items))) => {
                    *last_activity.lock() = Instant::now();
                    let seq = req_seq;
                    req_seq += 1;
                    if cmd_tx.send((seq, items)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(other)) => {
                    warn!("client {addr} sent a non-command frame: {other:?}");
                }
            }
        }
    }
}

/// Drains the reply queue through the reorder buffer onto the socket.
/// One `send` (and therefore one flush) per reply.
async fn write_loop(
    mut sink: ClientSink,
    mut reply_rx: mpsc::Receiver<(u64, RespFrame)>,
    c_max: usize,
    quit_tx: broadcast::Sender<()>,
    addr: SocketAddr,
) {
    let mut reorder = ReorderBuffer::new(c_max);
    'recv: while let Some((seq, frame)) = reply_rx.recv().await {
        for ready in reorder.accept(seq, frame) {
            if let Err(e) = sink.send(ready).await {
                warn!("write to {addr} failed: {e}");
                let _ = quit_tx.send(());
                break 'recv;
            }
        }
    }
    let _ = sink.close().await;
}
