// src/core/protocol/resp_frame.rs

//! Implements the RESP frame structure and the corresponding `Encoder` and
//! `Decoder` used on both the client and the backend side of the proxy.
//!
//! The grammar is the five classic reply shapes (simple string, error,
//! integer, bulk string, array). On top of it the decoder accepts the two
//! inline shortcuts `PING\r\n` and `QUIT\r\n` (any case), which legacy
//! clients send before switching to the array form.

use crate::core::CitrineError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits to prevent denial-of-service from malformed frames.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024; // Max elements in an array.
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024; // 512MB max bulk string size.

/// An enum representing a single frame in the RESP protocol.
/// This is the only representation of data exchanged with clients and backends.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    /// The null bulk string, `$-1\r\n`.
    Null,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// A convenience method to encode a frame into a `Vec<u8>`.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, CitrineError> {
        let mut buf = BytesMut::new();
        RespFrameCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Builds the array-of-bulks form every request takes on the wire.
    pub fn command(parts: &[&[u8]]) -> RespFrame {
        RespFrame::Array(
            parts
                .iter()
                .map(|p| RespFrame::BulkString(Bytes::copy_from_slice(p)))
                .collect(),
        )
    }
}

impl From<CitrineError> for RespFrame {
    fn from(e: CitrineError) -> Self {
        RespFrame::Error(e.to_string())
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = CitrineError;

    /// Encodes a `RespFrame` into a `BytesMut` buffer according to the RESP grammar.
    /// Integer and length rendering goes through a stack-allocated `itoa`
    /// scratch so encoding a reply never allocates intermediate strings.
    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut scratch = itoa::Buffer::new();
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(scratch.format(i).as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(scratch.format(b.len()).as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => {
                dst.extend_from_slice(b"$-1\r\n");
            }
            RespFrame::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(scratch.format(arr.len()).as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    // Recursively encode each frame in the array.
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = CitrineError;

    /// Decodes a `RespFrame` from a `BytesMut` buffer.
    ///
    /// It returns `Ok(None)` if the buffer does not contain a full frame yet,
    /// allowing the `Framed` stream to wait for more data from the network.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_frame(src) {
            Ok((frame, len)) => {
                // Advance the buffer past the successfully parsed frame.
                src.advance(len);
                Ok(Some(frame))
            }
            // If the data is incomplete, wait for more data.
            Err(CitrineError::IncompleteData) => Ok(None),
            // For other errors, propagate them up to the session.
            Err(e) => Err(e),
        }
    }
}

/// The main parsing entry point. It inspects the first byte (the type prefix)
/// and dispatches to the appropriate parsing function.
fn parse_frame(src: &[u8]) -> Result<(RespFrame, usize), CitrineError> {
    if src.is_empty() {
        return Err(CitrineError::IncompleteData);
    }
    match src[0] {
        b'+' => parse_simple_string(src),
        b'-' => parse_error(src),
        b':' => parse_integer(src),
        b'$' => parse_bulk_string(src),
        b'*' => parse_array(src),
        _ => parse_inline(src),
    }
}

/// Helper function to find the next CRLF sequence in a buffer.
fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}

/// Parses a single line (up to CRLF) from a buffer.
fn parse_line(src: &[u8]) -> Result<(&[u8], usize), CitrineError> {
    find_crlf(src)
        .map(|pos| (&src[..pos], pos + CRLF_LEN))
        .ok_or(CitrineError::IncompleteData)
}

/// Parses a signed decimal length prefix (`$n` / `*n` line payloads).
fn parse_length(line: &[u8]) -> Result<isize, CitrineError> {
    let s = std::str::from_utf8(line).map_err(|_| CitrineError::MalformedLength)?;
    s.parse::<isize>().map_err(|_| CitrineError::MalformedLength)
}

/// Parses a Simple String (e.g., `+OK\r\n`).
fn parse_simple_string(src: &[u8]) -> Result<(RespFrame, usize), CitrineError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::SimpleString(String::from_utf8_lossy(line).to_string()),
        len + 1,
    ))
}

/// Parses an Error (e.g., `-ERR message\r\n`).
fn parse_error(src: &[u8]) -> Result<(RespFrame, usize), CitrineError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::Error(String::from_utf8_lossy(line).to_string()),
        len + 1,
    ))
}

/// Parses an Integer (e.g., `:1000\r\n`).
fn parse_integer(src: &[u8]) -> Result<(RespFrame, usize), CitrineError> {
    let (line, len) = parse_line(&src[1..])?;
    let s = std::str::from_utf8(line).map_err(|_| CitrineError::MalformedLength)?;
    let i = s
        .parse::<i64>()
        .map_err(|_| CitrineError::MalformedLength)?;
    Ok((RespFrame::Integer(i), len + 1))
}

/// Parses a Bulk String (e.g., `$5\r\nhello\r\n`). `$-1\r\n` is the null bulk.
fn parse_bulk_string(src: &[u8]) -> Result<(RespFrame, usize), CitrineError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let str_len = parse_length(line)?;

    if str_len == -1 {
        return Ok((RespFrame::Null, len_of_line + 1));
    }
    if str_len < 0 {
        return Err(CitrineError::MalformedLength);
    }

    let str_len = str_len as usize;
    if str_len > MAX_BULK_STRING_SIZE {
        return Err(CitrineError::MalformedLength);
    }

    let total_len_prefix = len_of_line + 1;
    // Check if the entire bulk string (including its data and final CRLF) is in the buffer.
    if src.len() < total_len_prefix + str_len + CRLF_LEN {
        return Err(CitrineError::IncompleteData);
    }

    // Validate the trailing CRLF.
    if &src[total_len_prefix + str_len..total_len_prefix + str_len + CRLF_LEN] != CRLF {
        return Err(CitrineError::ProtocolError(
            "bulk string payload not terminated by CRLF".to_string(),
        ));
    }

    let data_start = total_len_prefix;
    let data_end = total_len_prefix + str_len;
    let data = Bytes::copy_from_slice(&src[data_start..data_end]);
    Ok((RespFrame::BulkString(data), data_end + CRLF_LEN))
}

/// Parses an Array (e.g., `*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`).
///
/// Array elements must themselves be bulk strings: requests are always
/// arrays of bulks, and every array-shaped backend reply the proxy handles
/// (MGET results and the like) carries bulks one level deep.
fn parse_array(src: &[u8]) -> Result<(RespFrame, usize), CitrineError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let arr_len = parse_length(line)?;

    if arr_len < 0 {
        return Err(CitrineError::MalformedLength);
    }

    let arr_len = arr_len as usize;
    if arr_len > MAX_FRAME_ELEMENTS {
        return Err(CitrineError::MalformedLength);
    }

    let mut frames = Vec::with_capacity(arr_len);
    let mut cursor = len_of_line + 1;

    for _ in 0..arr_len {
        let (frame, frame_len) = parse_frame(&src[cursor..])?;
        match frame {
            RespFrame::BulkString(_) | RespFrame::Null => frames.push(frame),
            _ => return Err(CitrineError::UnexpectedFrame),
        }
        cursor += frame_len;
    }

    Ok((RespFrame::Array(frames), cursor))
}

/// Accepts the bare inline commands `PING\r\n` and `QUIT\r\n` (any case) and
/// rewrites them into their one-element array form. Anything else inline is
/// rejected.
fn parse_inline(src: &[u8]) -> Result<(RespFrame, usize), CitrineError> {
    if !matches!(src[0], b'p' | b'P' | b'q' | b'Q') {
        return Err(CitrineError::BadInline);
    }
    let (line, len) = parse_line(src)?;
    let name: &[u8] = if line.eq_ignore_ascii_case(b"PING") {
        b"PING"
    } else if line.eq_ignore_ascii_case(b"QUIT") {
        b"QUIT"
    } else {
        return Err(CitrineError::BadInline);
    };
    Ok((
        RespFrame::Array(vec![RespFrame::BulkString(Bytes::from_static(name))]),
        len,
    ))
}
