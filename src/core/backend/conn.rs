// src/core/backend/conn.rs

//! A single RESP-speaking socket to one backend node, with per-call
//! read/write deadlines. Owned by exactly one session at a time; returned
//! to its pool on success, closed and removed on any I/O error.

use super::BackendTimeouts;
use crate::core::CitrineError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use bytes::BytesMut;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

/// The topology introspection request, also used as the health probe.
pub const CLUSTER_NODES: &[&[u8]] = &[b"CLUSTER", b"NODES"];

#[derive(Debug)]
pub struct BackendConn {
    owner_id: String,
    stream: TcpStream,
    codec: RespFrameCodec,
    read_buf: BytesMut,
    read_timeout: Duration,
    write_timeout: Duration,
    last_used: Instant,
    closed: bool,
}

impl BackendConn {
    /// Dials an owner with the configured dial deadline.
    pub async fn dial(
        owner_id: &str,
        addr: &str,
        timeouts: BackendTimeouts,
    ) -> Result<Self, CitrineError> {
        let stream = tokio::time::timeout(timeouts.dial, TcpStream::connect(addr))
            .await
            .map_err(|_| CitrineError::DialFailed(format!("dial {addr} timed out")))?
            .map_err(|e| CitrineError::DialFailed(format!("dial {addr}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| CitrineError::DialFailed(format!("dial {addr}: {e}")))?;

        Ok(Self {
            owner_id: owner_id.to_string(),
            stream,
            codec: RespFrameCodec,
            read_buf: BytesMut::with_capacity(4096),
            read_timeout: timeouts.read,
            write_timeout: timeouts.write,
            last_used: Instant::now(),
            closed: false,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Stamps the connection as freshly used; called when it re-enters the
    /// free queue.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Clears the failure mark and any buffered partial input after a
    /// successful reclaim probe.
    pub fn reset(&mut self) {
        self.closed = false;
        self.read_buf.clear();
    }

    /// Writes one frame under the write deadline.
    pub async fn write_frame(&mut self, frame: RespFrame) -> Result<(), CitrineError> {
        let mut buf = BytesMut::new();
        self.codec.encode(frame, &mut buf)?;

        let write_fut = self.stream.write_all(&buf);
        match tokio::time::timeout(self.write_timeout, write_fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.closed = true;
                Err(CitrineError::BackendIo(format!(
                    "write to {}: {e}",
                    self.owner_id
                )))
            }
            Err(_) => {
                self.closed = true;
                Err(CitrineError::BackendIo(format!(
                    "write to {} timed out",
                    self.owner_id
                )))
            }
        }
    }

    /// Reads one full frame under the read deadline, buffering partial input.
    pub async fn read_frame(&mut self) -> Result<RespFrame, CitrineError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            let read_fut = self.stream.read_buf(&mut self.read_buf);
            match tokio::time::timeout(self.read_timeout, read_fut).await {
                Ok(Ok(0)) => {
                    self.closed = true;
                    return Err(CitrineError::BackendIo(format!(
                        "{} closed the connection",
                        self.owner_id
                    )));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    self.closed = true;
                    return Err(CitrineError::BackendIo(format!(
                        "read from {}: {e}",
                        self.owner_id
                    )));
                }
                Err(_) => {
                    self.closed = true;
                    return Err(CitrineError::BackendIo(format!(
                        "read from {} timed out",
                        self.owner_id
                    )));
                }
            }
        }
    }

    /// One request, one reply.
    pub async fn round_trip(&mut self, frame: RespFrame) -> Result<RespFrame, CitrineError> {
        self.write_frame(frame).await?;
        self.read_frame().await
    }

    /// Health probe used when reclaiming a connection after a failure, not
    /// on every borrow: send the topology introspection command and accept
    /// any non-error reply within the deadlines.
    pub async fn probe(&mut self) -> bool {
        match self.round_trip(RespFrame::command(CLUSTER_NODES)).await {
            Ok(RespFrame::Error(_)) | Err(_) => false,
            Ok(_) => true,
        }
    }
}
