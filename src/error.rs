use thiserror::Error;

use crate::peer::PeerId;

/// Errors produced while encoding or decoding bytes on the wire.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("handshake must be 32 bytes, got {0}")]
    BadHandshakeLength(usize),

    #[error("handshake header or zero region mismatch")]
    BadHandshakeHeader,

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("malformed {kind} payload of {len} bytes")]
    MalformedPayload { kind: &'static str, len: usize },

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("frame with zero length carries no message type")]
    EmptyFrame,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors scoped to one connection or to the session as a whole.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("expected peer {expected}, handshake carried {actual}")]
    IdentityMismatch { expected: PeerId, actual: PeerId },

    #[error("peer {0} is not in the configured peer list")]
    UnknownPeer(PeerId),

    #[error("peer {0} already has a live connection")]
    DuplicateConnection(PeerId),

    #[error("peer {0} is not connected")]
    NotConnected(PeerId),

    #[error("connection to peer {0} is closed")]
    ChannelClosed(PeerId),

    #[error("send queue to peer {0} is full")]
    SendQueueFull(PeerId),

    #[error("listener failed: {0}")]
    Listener(#[source] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Wire(WireError::Io(e))
    }
}

/// Errors from a piece store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("piece index {index} out of range (piece count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("piece {index} must be {expected} bytes, got {actual}")]
    WrongLength { index: usize, expected: usize, actual: usize },

    #[error("file {path} is {actual} bytes, expected {expected}")]
    IncompleteFile { path: String, expected: u64, actual: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
