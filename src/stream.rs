//! Stream state machine (RFC 7540 Section 5.1).
//!
//! [`transition`] is a pure function over `(state, direction, frame type,
//! flags)`. Receiving and sending use separate tables: the legal next state
//! depends on which side is producing the frame.

use std::any::Any;
use std::collections::HashMap;

use tracing::debug;

use crate::error::StreamErrorKind;
use crate::frame::{flags, FrameQueue, FrameType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Which side produced something.
///
/// For a stream this is its origin (`Inbound` when the peer opened it). For
/// a frame passed to [`transition`] it is whether the frame was received or
/// is about to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Outcome of applying one frame to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Frame is legal; the stream moves to (or stays in) this state.
    Accept(StreamState),
    /// Received frame is dropped without effect.
    Ignore,
    /// Received frame violates the state machine.
    Reject(StreamErrorKind),
    /// Frame must not be sent in this state.
    Refuse,
}

/// Apply one frame to a stream in `state`.
pub fn transition(
    state: StreamState,
    direction: Direction,
    frame_type: FrameType,
    frame_flags: u8,
) -> Transition {
    // END_STREAM shares its bit with ACK, so it only counts on DATA and HEADERS.
    let end_stream = matches!(frame_type, FrameType::Data | FrameType::Headers)
        && frame_flags & flags::END_STREAM != 0;

    match direction {
        Direction::Inbound => receive(state, frame_type, end_stream),
        Direction::Outbound => send(state, frame_type, end_stream),
    }
}

fn receive(state: StreamState, frame_type: FrameType, end_stream: bool) -> Transition {
    use FrameType::*;
    use StreamState::*;
    use Transition::*;

    match (state, frame_type) {
        (Idle, Headers) if end_stream => Accept(HalfClosedRemote),
        (Idle, Headers) => Accept(Open),
        (Idle, PushPromise) => Accept(ReservedRemote),
        (Idle, _) => Reject(StreamErrorKind::ProtocolError),

        (ReservedRemote, Headers) if end_stream => Accept(Closed),
        (ReservedRemote, Headers) => Accept(HalfClosedLocal),
        (ReservedRemote, Priority) => Accept(ReservedRemote),
        (ReservedRemote, RstStream) => Accept(Closed),
        (ReservedRemote, _) => Reject(StreamErrorKind::ProtocolError),

        (ReservedLocal, RstStream) => Accept(Closed),
        (ReservedLocal, Priority | WindowUpdate) => Accept(ReservedLocal),
        (ReservedLocal, _) => Reject(StreamErrorKind::ProtocolError),

        (Open, RstStream) => Accept(Closed),
        (Open, Headers | Data) if end_stream => Accept(HalfClosedRemote),
        (Open, Headers | Data | WindowUpdate | Priority) => Accept(Open),
        (Open, _) => Reject(StreamErrorKind::ProtocolError),

        (HalfClosedLocal, RstStream) => Accept(Closed),
        (HalfClosedLocal, Headers | Data) if end_stream => Accept(Closed),
        (HalfClosedLocal, Headers | Data | WindowUpdate | Priority) => Accept(HalfClosedLocal),
        (HalfClosedLocal, _) => Reject(StreamErrorKind::ProtocolError),

        (HalfClosedRemote, RstStream) => Accept(Closed),
        (HalfClosedRemote, WindowUpdate | Priority) => Accept(HalfClosedRemote),
        (HalfClosedRemote, _) => Reject(StreamErrorKind::StreamClosed),

        (Closed, Priority | RstStream | WindowUpdate) => Ignore,
        (Closed, _) => Reject(StreamErrorKind::StreamClosed),
    }
}

fn send(state: StreamState, frame_type: FrameType, end_stream: bool) -> Transition {
    use FrameType::*;
    use StreamState::*;
    use Transition::*;

    match (state, frame_type) {
        (Idle, Headers) if end_stream => Accept(HalfClosedLocal),
        (Idle, Headers) => Accept(Open),
        (Idle, PushPromise) => Accept(ReservedLocal),

        (ReservedLocal, Headers) if end_stream => Accept(Closed),
        (ReservedLocal, Headers) => Accept(HalfClosedRemote),
        (ReservedLocal, RstStream) => Accept(Closed),
        (ReservedLocal, Priority) => Accept(ReservedLocal),

        (ReservedRemote, RstStream) => Accept(Closed),
        (ReservedRemote, Priority | WindowUpdate) => Accept(ReservedRemote),

        (Open, RstStream) => Accept(Closed),
        (Open, Headers | Data) if end_stream => Accept(HalfClosedLocal),
        (Open, Headers | Data | WindowUpdate | Priority) => Accept(Open),

        (HalfClosedRemote, RstStream) => Accept(Closed),
        (HalfClosedRemote, Headers | Data) if end_stream => Accept(Closed),
        (HalfClosedRemote, Headers | Data | WindowUpdate | Priority) => Accept(HalfClosedRemote),

        (HalfClosedLocal, RstStream) => Accept(Closed),
        (HalfClosedLocal, WindowUpdate | Priority) => Accept(HalfClosedLocal),

        (Closed, Priority) => Ignore,

        _ => Refuse,
    }
}

/// One logical exchange on a connection.
pub struct Stream {
    id: u32,
    direction: Direction,
    state: StreamState,
    /// Raw HEADERS/PUSH_PROMISE/CONTINUATION frames of the block in progress.
    pub(crate) header_fragments: FrameQueue,
    /// Set once the current header block has ended; the next frame on this
    /// stream is not a CONTINUATION.
    pub(crate) end_header_sent: bool,
    pub(crate) user_data: Option<Box<dyn Any + Send>>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("header_fragments", &self.header_fragments.len())
            .field("end_header_sent", &self.end_header_sent)
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

impl Stream {
    pub fn new(id: u32, direction: Direction) -> Self {
        Self {
            id,
            direction,
            state: StreamState::Idle,
            header_fragments: FrameQueue::new(),
            end_header_sent: true,
            user_data: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub(crate) fn set_state(&mut self, next: StreamState) {
        if self.state != next {
            debug!(stream_id = self.id, from = ?self.state, to = ?next, "stream state transition");
            self.state = next;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// True while a header block is open and waiting for CONTINUATION.
    pub fn awaiting_continuation(&self) -> bool {
        !self.end_header_sent
    }
}

/// Streams of one connection, keyed by id.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: HashMap<u32, Stream>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stream. Returns it back if the id is already taken.
    pub fn add(&mut self, stream: Stream) -> Result<(), Stream> {
        if self.streams.contains_key(&stream.id) {
            return Err(stream);
        }
        self.streams.insert(stream.id, stream);
        Ok(())
    }

    pub fn get(&self, stream_id: u32) -> Option<&Stream> {
        self.streams.get(&stream_id)
    }

    pub fn get_mut(&mut self, stream_id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&stream_id)
    }

    /// Look up a stream referenced by a received frame, creating it in
    /// `Idle` if the id has not been seen before.
    pub fn get_or_insert_inbound(&mut self, stream_id: u32) -> &mut Stream {
        self.streams.entry(stream_id).or_insert_with(|| {
            debug!(stream_id, "creating inbound stream");
            Stream::new(stream_id, Direction::Inbound)
        })
    }

    pub fn contains(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn retain(&mut self, keep: impl FnMut(&u32, &mut Stream) -> bool) {
        self.streams.retain(keep);
    }
}
