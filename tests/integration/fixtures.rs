// tests/integration/fixtures.rs

//! Shared fixtures: a scripted mock backend node speaking RESP, and a
//! harness that boots a full proxy against it.

use bytes::Bytes;
use citrine::config::Config;
use citrine::core::protocol::{RespFrame, RespFrameCodec};
use citrine::server;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

const WIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// One scripted reply: what to send and how long to sit on it first.
pub struct Scripted {
    pub frame: RespFrame,
    pub delay: Duration,
}

impl Scripted {
    pub fn instant(frame: RespFrame) -> Self {
        Self {
            frame,
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(frame: RespFrame, delay: Duration) -> Self {
        Self { frame, delay }
    }
}

/// Decides the reply for one command: `(uppercased name, args)`.
pub type Behavior = Arc<dyn Fn(&str, &[Bytes]) -> Scripted + Send + Sync>;

/// A backend node that serves `CLUSTER NODES` from a canned topology line
/// and everything else from the behavior closure.
pub struct MockNode {
    pub addr: String,
    /// Commands served, topology introspection excluded.
    pub commands_served: Arc<AtomicUsize>,
    pub cluster_nodes_served: Arc<AtomicUsize>,
}

/// Spawns a mock node claiming `slot_range` (may be empty for a node that
/// owns nothing and is only reachable through redirects).
pub async fn spawn_mock_node(slot_range: &str, behavior: Behavior) -> MockNode {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let topology = format!(
        "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa {addr} master - 0 0 1 connected {slot_range}\n"
    );

    let commands_served = Arc::new(AtomicUsize::new(0));
    let cluster_nodes_served = Arc::new(AtomicUsize::new(0));

    let node = MockNode {
        addr,
        commands_served: commands_served.clone(),
        cluster_nodes_served: cluster_nodes_served.clone(),
    };

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let behavior = behavior.clone();
            let topology = topology.clone();
            let commands_served = commands_served.clone();
            let cluster_nodes_served = cluster_nodes_served.clone();
            tokio::spawn(async move {
                let mut framed = Framed::new(socket, RespFrameCodec);
                while let Some(Ok(frame)) = framed.next().await {
                    let RespFrame::Array(items) = frame else {
                        continue;
                    };
                    let (name, args) = split_command(&items);
                    if name == "CLUSTER" {
                        cluster_nodes_served.fetch_add(1, Ordering::SeqCst);
                        let reply = RespFrame::BulkString(Bytes::from(topology.clone()));
                        if framed.send(reply).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    commands_served.fetch_add(1, Ordering::SeqCst);
                    let scripted = behavior(&name, &args);
                    if scripted.delay > Duration::ZERO {
                        tokio::time::sleep(scripted.delay).await;
                    }
                    if framed.send(scripted.frame).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    node
}

fn split_command(items: &[RespFrame]) -> (String, Vec<Bytes>) {
    let mut name = String::new();
    let mut args = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if let RespFrame::BulkString(b) = item {
            if i == 0 {
                name = String::from_utf8_lossy(b).to_ascii_uppercase();
            } else {
                args.push(b.clone());
            }
        }
    }
    (name, args)
}

/// A full proxy booted against a seed node, torn down with the test.
pub struct ProxyHarness {
    pub addr: String,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Drop for ProxyHarness {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_proxy(seed: &str) -> ProxyHarness {
    spawn_proxy_with(seed, |_| {}).await
}

pub async fn spawn_proxy_with(
    seed: &str,
    tweak: impl FnOnce(&mut Config),
) -> ProxyHarness {
    let port = free_port().await;
    let mut config = Config {
        port,
        seed_nodes: vec![seed.to_string()],
        ..Config::default()
    };
    tweak(&mut config);
    let addr = format!("127.0.0.1:{port}");

    let handle = tokio::spawn(server::run(config));

    // Wait until the listener answers.
    let deadline = tokio::time::Instant::now() + WIRE_TIMEOUT;
    loop {
        if TcpStream::connect(&addr).await.is_ok() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "proxy did not come up on {addr}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    ProxyHarness { addr, handle }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub async fn connect(addr: &str) -> TcpStream {
    let stream = TcpStream::connect(addr).await.unwrap();
    stream.set_nodelay(true).unwrap();
    stream
}

/// Writes a request and asserts the exact reply bytes.
pub async fn send_and_expect(stream: &mut TcpStream, request: &[u8], expected: &[u8]) {
    stream.write_all(request).await.unwrap();
    expect_bytes(stream, expected).await;
}

/// Reads exactly `expected.len()` bytes and compares.
pub async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    tokio::time::timeout(WIRE_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for reply")
        .expect("connection closed early");
    assert_eq!(
        buf,
        expected,
        "got {:?}, expected {:?}",
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

/// Reads one CRLF-terminated line (for replies whose exact text varies).
pub async fn read_line(stream: &mut TcpStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        tokio::time::timeout(WIRE_TIMEOUT, stream.read_exact(&mut byte))
            .await
            .expect("timed out reading line")
            .expect("connection closed early");
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&line).to_string()
}

/// Polls until `probe` returns true or the deadline passes.
pub async fn eventually(probe: impl Fn() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + WIRE_TIMEOUT;
    while !probe() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition never held: {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
