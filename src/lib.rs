//! h2x: A minimal HTTP/2 protocol engine
//!
//! This crate parses a byte stream into HTTP/2 frames, demultiplexes them onto
//! per-stream state machines and serializes application requests and responses
//! back into frames. Connections run on non-blocking sockets spread across a
//! fixed pool of worker threads.
//!
//! # Features
//!
//! - **Frame Codec**: RFC 7540 9-byte frame header, owned frame regions, FIFO queues
//! - **Stream State Machine**: Direction-aware transition tables as a pure function
//! - **CONTINUATION Assembly**: Header blocks spanning HEADERS/PUSH_PROMISE + CONTINUATION
//! - **Worker Pool**: mio readiness loops, per-worker work chains, least-loaded placement
//!
//! # Quick Start
//!
//! ```rust
//! use h2x::{H2Codec, H2Header, Role, StreamHandler, StreamState};
//!
//! struct Print;
//!
//! impl StreamHandler for Print {
//!     fn on_headers(&mut self, _: &mut H2Codec, stream_id: u32, headers: Vec<H2Header>, end_stream: bool) {
//!         println!("stream {stream_id}: {headers:?} (end_stream: {end_stream})");
//!     }
//!
//!     fn on_body(&mut self, _: &mut H2Codec, stream_id: u32, data: &[u8], is_last: bool) {
//!         println!("stream {stream_id}: {} bytes (last: {is_last})", data.len());
//!     }
//! }
//!
//! let mut codec = H2Codec::new(Role::Server);
//!
//! // HEADERS, END_HEADERS, stream 1, payload "a=b\r\n"
//! let frame_bytes = [0, 0, 5, 1, 4, 0, 0, 0, 1, b'a', b'=', b'b', b'\r', b'\n'];
//! codec.process(&frame_bytes, &mut Print).unwrap();
//!
//! assert_eq!(codec.stream_state(1), Some(StreamState::Open));
//! ```
//!
//! # Architecture
//!
//! - [`H2Codec`] is sans-I/O: bytes in, callbacks and queued frames out
//! - [`Connection`] couples a codec with a socket and its write cursor
//! - [`ConnectionManager`] owns the workers and places connections on them
//!
//! It does NOT provide:
//! - HPACK (header blocks are `name=value\r\n` text)
//! - Flow control, priority trees or SETTINGS negotiation
//! - TLS

pub mod assembler;
pub mod chain;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod h2_codec;
pub mod headers;
pub mod manager;
pub mod request;
pub mod stream;
mod worker;

#[cfg(test)]
mod mock;

pub use assembler::{AssemblyState, FrameAssembler};
pub use config::EngineConfig;
pub use connection::{Connection, EventSummary, ReadOutcome, SocketState, WriteOutcome};
pub use error::{ConfigError, EngineError, FrameError, HeaderError, SendError, StreamErrorKind};
pub use frame::{error_code, flags, Frame, FrameHeader, FrameQueue, FrameType, FRAME_HEADER_LEN};
pub use h2_codec::{BodyChunk, H2Codec, Role, StreamHandler, MAX_HEADER_BLOCK_SIZE};
pub use headers::{decode_header_block, encode_header_block, H2Header};
pub use manager::{ConnectionId, ConnectionManager, WorkerStats};
pub use request::Request;
pub use stream::{transition, Direction, Stream, StreamState, Transition};
