// src/core/errors.rs

//! Defines the primary error type for the entire proxy.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the proxy.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
///
/// At the client boundary every variant is rendered into a RESP error reply
/// via its `Display` string; the first token classifies the kind.
#[derive(Error, Debug)]
pub enum CitrineError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// The read buffer does not yet hold a complete frame. Never surfaces to
    /// a client; the codec translates it into "wait for more bytes".
    #[error("Incomplete data in stream")]
    IncompleteData,

    /// A length prefix (`$n` or `*n`) was not a well-formed signed decimal.
    #[error("ERR Protocol error: invalid length prefix")]
    MalformedLength,

    /// An array element in a client request was not a bulk string.
    #[error("ERR Protocol error: expected bulk string inside array")]
    UnexpectedFrame,

    /// An inline command other than a bare PING or QUIT.
    #[error("ERR Protocol error: inline commands are limited to PING and QUIT")]
    BadInline,

    #[error("ERR Protocol error: {0}")]
    ProtocolError(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR command '{0}' is forbidden through the proxy")]
    Forbidden(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    /// No primary is known for the slot a key hashed to.
    #[error("proxy internal error no owner")]
    NoOwner { slot: u16 },

    /// The writer gave up waiting for a missing sequence number.
    #[error("proxy internal error pipeline unorder")]
    PipelineGap,

    // --- Pool errors (surfaced to the client, session kept) ---
    #[error("DIALFAILED {0}")]
    DialFailed(String),

    #[error("DIALTOOFAST backend dialed too fast (last error: {0})")]
    DialTooFast(String),

    #[error("POOLTIMEOUT connection pool timeout")]
    PoolTimeout,

    #[error("POOLCLOSED connection pool is closed")]
    PoolClosed,

    /// An I/O failure on an established backend connection. The connection is
    /// removed from its pool; the client decides whether to retry.
    #[error("BACKENDIO {0}")]
    BackendIo(String),

    #[error("Internal Proxy Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for CitrineError {
    fn clone(&self) -> Self {
        match self {
            CitrineError::Io(e) => CitrineError::Io(Arc::clone(e)),
            CitrineError::IncompleteData => CitrineError::IncompleteData,
            CitrineError::MalformedLength => CitrineError::MalformedLength,
            CitrineError::UnexpectedFrame => CitrineError::UnexpectedFrame,
            CitrineError::BadInline => CitrineError::BadInline,
            CitrineError::ProtocolError(s) => CitrineError::ProtocolError(s.clone()),
            CitrineError::UnknownCommand(s) => CitrineError::UnknownCommand(s.clone()),
            CitrineError::Forbidden(s) => CitrineError::Forbidden(s.clone()),
            CitrineError::WrongArgumentCount(s) => CitrineError::WrongArgumentCount(s.clone()),
            CitrineError::NoOwner { slot } => CitrineError::NoOwner { slot: *slot },
            CitrineError::PipelineGap => CitrineError::PipelineGap,
            CitrineError::DialFailed(s) => CitrineError::DialFailed(s.clone()),
            CitrineError::DialTooFast(s) => CitrineError::DialTooFast(s.clone()),
            CitrineError::PoolTimeout => CitrineError::PoolTimeout,
            CitrineError::PoolClosed => CitrineError::PoolClosed,
            CitrineError::BackendIo(s) => CitrineError::BackendIo(s.clone()),
            CitrineError::Internal(s) => CitrineError::Internal(s.clone()),
        }
    }
}

impl PartialEq for CitrineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CitrineError::Io(e1), CitrineError::Io(e2)) => e1.to_string() == e2.to_string(),
            (CitrineError::ProtocolError(s1), CitrineError::ProtocolError(s2)) => s1 == s2,
            (CitrineError::UnknownCommand(s1), CitrineError::UnknownCommand(s2)) => s1 == s2,
            (CitrineError::Forbidden(s1), CitrineError::Forbidden(s2)) => s1 == s2,
            (CitrineError::WrongArgumentCount(s1), CitrineError::WrongArgumentCount(s2)) => {
                s1 == s2
            }
            (CitrineError::NoOwner { slot: s1 }, CitrineError::NoOwner { slot: s2 }) => s1 == s2,
            (CitrineError::DialFailed(s1), CitrineError::DialFailed(s2)) => s1 == s2,
            (CitrineError::DialTooFast(s1), CitrineError::DialTooFast(s2)) => s1 == s2,
            (CitrineError::BackendIo(s1), CitrineError::BackendIo(s2)) => s1 == s2,
            (CitrineError::Internal(s1), CitrineError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for CitrineError {
    fn from(e: std::io::Error) -> Self {
        CitrineError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for CitrineError {
    fn from(e: std::str::Utf8Error) -> Self {
        CitrineError::ProtocolError(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for CitrineError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        CitrineError::ProtocolError(e.to_string())
    }
}

impl From<ParseIntError> for CitrineError {
    fn from(_: ParseIntError) -> Self {
        CitrineError::MalformedLength
    }
}

impl CitrineError {
    /// True for decode failures that desynchronize the client byte stream.
    /// The session cannot safely continue past one of these.
    pub fn is_fatal_protocol(&self) -> bool {
        matches!(
            self,
            CitrineError::MalformedLength
                | CitrineError::UnexpectedFrame
                | CitrineError::BadInline
                | CitrineError::ProtocolError(_)
        )
    }
}
