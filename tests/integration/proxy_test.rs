// tests/integration/proxy_test.rs

//! Client-visible scenarios, asserted at the byte level.

use super::fixtures::{
    Behavior, MockNode, Scripted, connect, eventually, read_line, send_and_expect, spawn_mock_node,
    spawn_proxy, spawn_proxy_with,
};
use bytes::Bytes;
use citrine::core::protocol::RespFrame;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;

fn behave(f: impl Fn(&str, &[Bytes]) -> Scripted + Send + Sync + 'static) -> Behavior {
    Arc::new(f)
}

fn bulk(payload: &[u8]) -> RespFrame {
    RespFrame::BulkString(Bytes::copy_from_slice(payload))
}

fn ok() -> RespFrame {
    RespFrame::SimpleString("OK".to_string())
}

fn unexpected(name: &str) -> Scripted {
    Scripted::instant(RespFrame::Error(format!("ERR unexpected command {name}")))
}

/// A node that owns every slot and serves GETs from a tiny table.
async fn kv_node() -> MockNode {
    spawn_mock_node(
        "0-16383",
        behave(|name, args| match name {
            "GET" => match args[0].as_ref() {
                b"foo" => Scripted::instant(bulk(b"bar")),
                b"a" => Scripted::instant(bulk(b"1")),
                b"b" => Scripted::instant(RespFrame::Null),
                b"c" => Scripted::instant(bulk(b"3")),
                _ => Scripted::instant(RespFrame::Null),
            },
            "SET" => Scripted::instant(ok()),
            "DEL" => Scripted::instant(RespFrame::Integer(
                if args[0].as_ref() == b"b" { 0 } else { 1 },
            )),
            other => unexpected(other),
        }),
    )
    .await
}

#[tokio::test]
async fn test_simple_get_is_proxied() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    send_and_expect(
        &mut client,
        b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n",
        b"$3\r\nbar\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_inline_ping_never_touches_a_backend() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    send_and_expect(&mut client, b"PING\r\n", b"+PONG\r\n").await;
    send_and_expect(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
    assert_eq!(node.commands_served.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_forbidden_command_keeps_session_alive() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    client.write_all(b"*1\r\n$4\r\nKEYS\r\n").await.unwrap();
    let line = read_line(&mut client).await;
    assert!(line.starts_with('-'), "expected an error, got {line:?}");
    assert!(line.contains("forbidden"), "got {line:?}");
    assert_eq!(node.commands_served.load(Ordering::SeqCst), 0);

    // The session survives the rejection.
    send_and_expect(&mut client, b"PING\r\n", b"+PONG\r\n").await;
}

#[tokio::test]
async fn test_bad_arity_rejected_before_routing() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    client.write_all(b"*1\r\n$3\r\nGET\r\n").await.unwrap();
    let line = read_line(&mut client).await;
    assert!(line.starts_with("-ERR wrong number of arguments"), "got {line:?}");
    assert_eq!(node.commands_served.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_command_rejected() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    client
        .write_all(b"*1\r\n$10\r\nFROBNICATE\r\n")
        .await
        .unwrap();
    let line = read_line(&mut client).await;
    assert!(line.starts_with("-ERR unknown command"), "got {line:?}");
}

#[tokio::test]
async fn test_mget_fans_out_and_reassembles() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    send_and_expect(
        &mut client,
        b"*4\r\n$4\r\nMGET\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
        b"*3\r\n$1\r\n1\r\n$-1\r\n$1\r\n3\r\n",
    )
    .await;
    assert_eq!(node.commands_served.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_mset_and_del_fan_out() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    send_and_expect(
        &mut client,
        b"*5\r\n$4\r\nMSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n$2\r\nk2\r\n$2\r\nv2\r\n",
        b"+OK\r\n",
    )
    .await;

    send_and_expect(
        &mut client,
        b"*4\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
        b":2\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_mset_requires_even_pairs() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    client
        .write_all(b"*4\r\n$4\r\nMSET\r\n$1\r\nk\r\n$1\r\nv\r\n$1\r\nx\r\n")
        .await
        .unwrap();
    let line = read_line(&mut client).await;
    assert!(line.starts_with("-ERR wrong number of arguments"), "got {line:?}");
    assert_eq!(node.commands_served.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_moved_hop_retries_once_and_signals_refresh() {
    let node_b = spawn_mock_node(
        "",
        behave(|name, _| match name {
            "SET" | "ASKING" => Scripted::instant(ok()),
            other => unexpected(other),
        }),
    )
    .await;
    let b_addr = node_b.addr.clone();

    let node_a = spawn_mock_node(
        "0-16383",
        behave(move |name, _| match name {
            "SET" => Scripted::instant(RespFrame::Error(format!("MOVED 12182 {b_addr}"))),
            other => unexpected(other),
        }),
    )
    .await;

    let proxy = spawn_proxy(&node_a.addr).await;
    let mut client = connect(&proxy.addr).await;

    send_and_expect(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n",
        b"+OK\r\n",
    )
    .await;

    // Exactly one attempt per node.
    assert_eq!(node_a.commands_served.load(Ordering::SeqCst), 1);
    assert_eq!(node_b.commands_served.load(Ordering::SeqCst), 1);

    // The MOVED redirect wakes the refresher exactly once: the initial load
    // plus one signalled reload.
    let counter = node_a.cluster_nodes_served.clone();
    eventually(
        || counter.load(Ordering::SeqCst) >= 2,
        "refresher never woke after MOVED",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(node_a.cluster_nodes_served.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_ask_hop_sends_asking_without_refresh() {
    let node_b = spawn_mock_node(
        "",
        behave(|name, _| match name {
            "ASKING" => Scripted::instant(ok()),
            "GET" => Scripted::instant(bulk(b"v")),
            other => unexpected(other),
        }),
    )
    .await;
    let b_addr = node_b.addr.clone();

    let node_a = spawn_mock_node(
        "0-16383",
        behave(move |name, _| match name {
            "GET" => Scripted::instant(RespFrame::Error(format!("ASK 12182 {b_addr}"))),
            other => unexpected(other),
        }),
    )
    .await;

    let proxy = spawn_proxy(&node_a.addr).await;
    let mut client = connect(&proxy.addr).await;

    send_and_expect(&mut client, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n", b"$1\r\nv\r\n").await;

    // ASKING plus the replayed GET.
    assert_eq!(node_b.commands_served.load(Ordering::SeqCst), 2);
    assert_eq!(node_a.commands_served.load(Ordering::SeqCst), 1);

    // ASK is transient: no refresh beyond the initial load.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(node_a.cluster_nodes_served.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_redirect_is_forwarded_verbatim() {
    let node_b = spawn_mock_node(
        "",
        behave(|name, _| match name {
            "GET" => Scripted::instant(RespFrame::Error(
                "MOVED 1 10.9.9.9:9999".to_string(),
            )),
            other => unexpected(other),
        }),
    )
    .await;
    let b_addr = node_b.addr.clone();

    let node_a = spawn_mock_node(
        "0-16383",
        behave(move |name, _| match name {
            "GET" => Scripted::instant(RespFrame::Error(format!("MOVED 12182 {b_addr}"))),
            other => unexpected(other),
        }),
    )
    .await;

    let proxy = spawn_proxy(&node_a.addr).await;
    let mut client = connect(&proxy.addr).await;

    client
        .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
        .await
        .unwrap();
    let line = read_line(&mut client).await;
    assert_eq!(line, "-MOVED 1 10.9.9.9:9999\r\n");

    // One hop, no third round-trip.
    assert_eq!(node_a.commands_served.load(Ordering::SeqCst), 1);
    assert_eq!(node_b.commands_served.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pipelined_replies_keep_request_order() {
    let node = spawn_mock_node(
        "0-16383",
        behave(|name, args| match name {
            "GET" => match args[0].as_ref() {
                b"a" => Scripted::instant(bulk(b"A")),
                b"b" => Scripted::delayed(bulk(b"B"), Duration::from_millis(200)),
                b"c" => Scripted::instant(bulk(b"C")),
                _ => Scripted::instant(RespFrame::Null),
            },
            other => unexpected(other),
        }),
    )
    .await;
    let proxy = spawn_proxy_with(&node.addr, |config| config.concurrency = 8).await;
    let mut client = connect(&proxy.addr).await;

    // Three requests back-to-back; the middle one is slow on the backend.
    send_and_expect(
        &mut client,
        b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n\
          *2\r\n$3\r\nGET\r\n$1\r\nb\r\n\
          *2\r\n$3\r\nGET\r\n$1\r\nc\r\n",
        b"$1\r\nA\r\n$1\r\nB\r\n$1\r\nC\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_proxy_local_commands_interleave_with_routed_ones() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    send_and_expect(
        &mut client,
        b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\nPING\r\n*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n",
        b"$3\r\nbar\r\n+PONG\r\n$3\r\nbar\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_quit_replies_then_closes() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    send_and_expect(&mut client, b"QUIT\r\n", b"+OK\r\n").await;

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("socket did not close after QUIT")
        .unwrap();
    assert_eq!(n, 0, "expected EOF after QUIT");
}

#[tokio::test]
async fn test_unowned_slot_yields_no_owner_error() {
    // The node only claims slot 0; "foo" hashes elsewhere.
    let node = spawn_mock_node(
        "0",
        behave(|name, _| unexpected(name)),
    )
    .await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    client
        .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
        .await
        .unwrap();
    let line = read_line(&mut client).await;
    assert_eq!(line, "-proxy internal error no owner\r\n");
    assert_eq!(node.commands_served.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_info_reports_proxy_counters() {
    let node = kv_node().await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    client.write_all(b"*1\r\n$4\r\nINFO\r\n").await.unwrap();
    let header = read_line(&mut client).await;
    assert!(header.starts_with('$'), "got {header:?}");
    let len: usize = header[1..header.len() - 2].parse().unwrap();

    let mut payload = vec![0u8; len + 2];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut payload))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&payload);
    assert!(text.contains("# Citrine"));
    assert!(text.contains("known_nodes:1"));
}

#[tokio::test]
async fn test_backend_error_is_forwarded_verbatim() {
    let node = spawn_mock_node(
        "0-16383",
        behave(|name, _| match name {
            "INCR" => Scripted::instant(RespFrame::Error(
                "ERR value is not an integer or out of range".to_string(),
            )),
            other => unexpected(other),
        }),
    )
    .await;
    let proxy = spawn_proxy(&node.addr).await;
    let mut client = connect(&proxy.addr).await;

    send_and_expect(
        &mut client,
        b"*2\r\n$4\r\nINCR\r\n$3\r\nfoo\r\n",
        b"-ERR value is not an integer or out of range\r\n",
    )
    .await;
}
