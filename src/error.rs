//! Error types shared by the servers and the clients.
//!
//! Collisions, busy replies and scheduler drains are protocol outcomes, not
//! errors: they are reported through the outcome enums of the modules that
//! produce them. Everything here ends the affected connection or requester.

use std::io;

use thiserror::Error;

/// Top-level error type of the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Connect/read/write failure on a peer connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transport gave up on the peer (timeout or closed stream)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A line that does not belong to the protocol
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Corpus file could not be turned into a word list
    #[error("corpus error: {0}")]
    Corpus(String),

    /// Binary exponential backoff exceeded its attempt bound
    #[error("gave up after {attempts} colliding attempts")]
    StarvationBound {
        /// attempts made before giving up
        attempts: u32,
    },
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No complete line arrived within the bounded wait
    #[error("read timed out after {timeout_ms}ms")]
    Timeout {
        /// the bound that was exceeded
        timeout_ms: u64,
    },

    /// The peer closed the stream
    #[error("peer closed the connection")]
    Closed,

    /// The received bytes are not UTF-8
    #[error("received a non UTF-8 line")]
    Encoding,

    /// The peer sent more bytes than a line may hold without a terminator
    #[error("line exceeds {limit} bytes")]
    LineTooLong {
        /// the bound that was exceeded
        limit: usize,
    },
}

/// Lines that cannot be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Client line that is neither an offset nor a probe
    #[error("unparseable request line {0:?}")]
    BadRequest(String),

    /// Server line that cannot be a reply
    #[error("unexpected reply line {0:?}")]
    BadReply(String),
}

/// Type alias for Result with the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
