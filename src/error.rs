//! Error taxonomy for the h2x engine.
//!
//! Framing faults ([`FrameError`]) are fatal to the connection that produced
//! them. Stream faults ([`StreamErrorKind`]) close a single stream and are
//! reported through [`crate::StreamHandler::on_error`]. Outbound misuse is
//! surfaced to the caller as [`SendError`].

use thiserror::Error;

use crate::frame::{error_code, FrameType};
use crate::manager::ConnectionId;
use crate::stream::StreamState;

/// A fault in the binary framing layer. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame region is {len} bytes, shorter than the 9-byte header")]
    TooShort { len: usize },

    #[error("frame declares {declared} payload bytes but carries {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("frame of {length} bytes exceeds max frame size {max}")]
    FrameTooLarge { length: u32, max: u32 },

    #[error("invalid padding length in {frame_type:?} frame")]
    InvalidPadding { frame_type: FrameType },

    #[error("{frame_type:?} frame with insufficient priority data")]
    InvalidPriority { frame_type: FrameType },

    #[error("{frame_type:?} frame must not be sent on stream 0")]
    StreamZero { frame_type: FrameType },
}

/// Stream-scoped protocol faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum StreamErrorKind {
    #[error("protocol error")]
    ProtocolError,

    #[error("stream closed")]
    StreamClosed,
}

impl StreamErrorKind {
    /// RFC 7540 error code for this fault.
    pub fn code(self) -> u32 {
        match self {
            StreamErrorKind::ProtocolError => error_code::PROTOCOL_ERROR,
            StreamErrorKind::StreamClosed => error_code::STREAM_CLOSED,
        }
    }
}

/// Invalid text in an outbound header list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("header name {0:?} contains '=', CR or LF")]
    InvalidName(String),

    #[error("value of header {0:?} contains CR or LF")]
    InvalidValue(String),
}

/// Outbound frames the local side is not allowed to queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("stream {0} is not registered on this connection")]
    UnknownStream(u32),

    #[error("cannot send {frame_type:?} on stream {stream_id} in state {state:?}")]
    IllegalTransition {
        stream_id: u32,
        state: StreamState,
        frame_type: FrameType,
    },

    #[error("stream {0} is already registered")]
    DuplicateStream(u32),

    #[error("stream identifiers exhausted")]
    StreamIdsExhausted,

    #[error(transparent)]
    Header(#[from] HeaderError),
}

/// Invalid [`crate::EngineConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one worker thread is required")]
    NoThreads,

    #[error("connections_per_thread must be non-zero")]
    NoConnectionCapacity,

    #[error("max_frame_size {0} is outside 1..=16777215")]
    MaxFrameSize(u32),

    #[error("read_buffer_size must be non-zero")]
    NoReadBuffer,
}

/// Errors from the connection manager and its worker pool.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no worker thread could be started")]
    NoWorkers,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection {0} is not known to the manager")]
    UnknownConnection(ConnectionId),

    #[error("worker {0} has stopped")]
    WorkerStopped(usize),
}
