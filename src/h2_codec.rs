//! Per-connection HTTP/2 protocol engine.
//!
//! [`H2Codec`] is sans-I/O: feed it received bytes with [`H2Codec::process`]
//! and drain serialized frames with [`H2Codec::pop_outbound`]. It owns:
//! 1. Frame assembly across arbitrary read boundaries
//! 2. The stream registry and per-stream state machines
//! 3. HEADERS/PUSH_PROMISE + CONTINUATION aggregation
//! 4. Outbound stream creation and frame splitting
//!
//! Application events are delivered through a [`StreamHandler`]. It does NOT
//! implement flow control, HPACK, priority trees or SETTINGS negotiation.
//!
//! Reference: RFC 7540 (HTTP/2)

use std::any::Any;

use tracing::{debug, trace};

use crate::assembler::FrameAssembler;
use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{FrameError, SendError, StreamErrorKind};
use crate::frame::{flags, Frame, FrameQueue, FrameType, MAX_FRAME_LENGTH, MAX_STREAM_ID};
use crate::headers::{decode_header_block, encode_header_block, H2Header};
use crate::stream::{transition, Direction, Stream, StreamRegistry, StreamState, Transition};

/// Largest header block accepted across HEADERS and its CONTINUATIONs (256 KiB).
/// A longer block is a stream `ProtocolError`.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Which end of the connection this engine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// First locally-initiated stream id: odd for clients, even for servers.
    pub fn first_stream_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }
}

/// Result of one [`StreamHandler::on_data_needed`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyChunk {
    /// Bytes written to the front of the buffer.
    pub written: usize,
    /// No more body follows this chunk.
    pub finished: bool,
}

impl BodyChunk {
    pub fn more(written: usize) -> Self {
        Self {
            written,
            finished: false,
        }
    }

    pub fn finished(written: usize) -> Self {
        Self {
            written,
            finished: true,
        }
    }
}

/// Application hooks for one connection.
///
/// Each callback receives the codec so it can queue frames in response or
/// reach per-stream user data.
pub trait StreamHandler: Send {
    /// A complete header block arrived. `end_stream` is the END_STREAM flag
    /// of the HEADERS frame that opened it.
    fn on_headers(
        &mut self,
        codec: &mut H2Codec,
        stream_id: u32,
        headers: Vec<H2Header>,
        end_stream: bool,
    );

    /// One DATA frame arrived, padding removed.
    fn on_body(&mut self, codec: &mut H2Codec, stream_id: u32, data: &[u8], is_last: bool);

    /// A received frame broke the state machine. The stream is `Closed`.
    fn on_error(&mut self, codec: &mut H2Codec, stream_id: u32, kind: StreamErrorKind) {
        let _ = (codec, stream_id, kind);
    }

    /// Fill `buf` with the next piece of an outbound request body.
    fn on_data_needed(&mut self, codec: &mut H2Codec, stream_id: u32, buf: &mut [u8]) -> BodyChunk {
        let _ = (codec, stream_id, buf);
        BodyChunk::finished(0)
    }
}

pub struct H2Codec {
    role: Role,
    max_frame_size: u32,
    assembler: FrameAssembler,
    streams: StreamRegistry,
    outbound: FrameQueue,
    next_stream_id: u32,
    /// Type and stream of the previous received frame (CONTINUATION legality)
    last_frame_type: Option<FrameType>,
    last_stream_id: u32,
    /// Outbound frames were queued since the owner last checked.
    write_signal: bool,
}

impl std::fmt::Debug for H2Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Codec")
            .field("role", &self.role)
            .field("max_frame_size", &self.max_frame_size)
            .field("streams", &self.streams.len())
            .field("outbound", &self.outbound.len())
            .field("next_stream_id", &self.next_stream_id)
            .finish()
    }
}

impl H2Codec {
    pub fn new(role: Role) -> Self {
        Self::with_max_frame_size(role, DEFAULT_MAX_FRAME_SIZE)
    }

    /// `max_frame_size` is clamped to `1..=MAX_FRAME_LENGTH`.
    pub fn with_max_frame_size(role: Role, max_frame_size: u32) -> Self {
        let max_frame_size = max_frame_size.clamp(1, MAX_FRAME_LENGTH);
        Self {
            role,
            max_frame_size,
            assembler: FrameAssembler::new(max_frame_size),
            streams: StreamRegistry::new(),
            outbound: FrameQueue::new(),
            next_stream_id: role.first_stream_id(),
            last_frame_type: None,
            last_stream_id: 0,
            write_signal: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Process received bytes, dispatching every frame they complete.
    ///
    /// An `Err` is a framing fault; the connection must be closed.
    pub fn process(&mut self, mut data: &[u8], handler: &mut dyn StreamHandler) -> Result<(), FrameError> {
        while let Some(frame) = self.assembler.next_frame(&mut data)? {
            self.dispatch(frame, handler)?;
        }
        Ok(())
    }

    /// Dispatch one received frame.
    fn dispatch(&mut self, frame: Frame, handler: &mut dyn StreamHandler) -> Result<(), FrameError> {
        let header = frame.header();
        trace!(
            stream_id = header.stream_id,
            frame_type = ?header.frame_type,
            flags = header.flags,
            length = header.length,
            "received frame"
        );

        // A header block in progress only admits CONTINUATION on its own stream
        let open_block = self.open_header_block();
        self.last_frame_type = Some(header.frame_type);
        self.last_stream_id = header.stream_id;

        if let Some(owner) = open_block {
            if header.frame_type != FrameType::Continuation {
                debug!(stream_id = owner, frame_type = ?header.frame_type, "header block interrupted");
                self.fail_stream(owner, StreamErrorKind::ProtocolError, handler);
                return Ok(());
            }
            if header.stream_id != owner {
                debug!(
                    stream_id = owner,
                    continuation_stream_id = header.stream_id,
                    "CONTINUATION on wrong stream"
                );
                self.fail_stream(owner, StreamErrorKind::ProtocolError, handler);
                if header.stream_id != 0 {
                    self.fail_stream(header.stream_id, StreamErrorKind::ProtocolError, handler);
                }
                return Ok(());
            }
        }

        match header.frame_type {
            frame_type if frame_type.is_connection_level() => {
                trace!(?frame_type, "connection-level frame ignored");
                return Ok(());
            }
            FrameType::WindowUpdate if header.stream_id == 0 => {
                trace!("connection WINDOW_UPDATE ignored");
                return Ok(());
            }
            FrameType::Unknown(frame_type) => {
                trace!(frame_type, "unknown frame type ignored");
                return Ok(());
            }
            _ => {}
        }

        if header.stream_id == 0 {
            return Err(FrameError::StreamZero {
                frame_type: header.frame_type,
            });
        }

        if header.frame_type == FrameType::Continuation {
            return self.on_continuation(frame, open_block, handler);
        }

        let stream = self.streams.get_or_insert_inbound(header.stream_id);
        let next = match transition(stream.state(), Direction::Inbound, header.frame_type, header.flags) {
            Transition::Accept(next) => next,
            Transition::Ignore | Transition::Refuse => {
                trace!(stream_id = header.stream_id, state = ?stream.state(), "frame ignored");
                return Ok(());
            }
            Transition::Reject(kind) => {
                self.fail_stream(header.stream_id, kind, handler);
                return Ok(());
            }
        };

        match header.frame_type {
            FrameType::Headers | FrameType::PushPromise => {
                // Validate padding/priority before the frame is buffered
                frame.header_fragment()?;
                stream.set_state(next);
                stream.end_header_sent = false;
                stream.header_fragments.clear();
                stream.header_fragments.append(frame);
                self.after_fragment(header.stream_id, header.is_end_headers(), handler)
            }
            FrameType::Data => {
                let data = frame.unpadded_payload()?;
                stream.set_state(next);
                handler.on_body(self, header.stream_id, data, header.is_end_stream());
                Ok(())
            }
            FrameType::RstStream => {
                stream.set_state(next);
                if let Some(code) = frame.payload().get(..4) {
                    let code = u32::from_be_bytes([code[0], code[1], code[2], code[3]]);
                    debug!(stream_id = header.stream_id, error_code = code, "stream reset by peer");
                }
                Ok(())
            }
            _ => {
                stream.set_state(next);
                Ok(())
            }
        }
    }

    fn on_continuation(
        &mut self,
        frame: Frame,
        open_block: Option<u32>,
        handler: &mut dyn StreamHandler,
    ) -> Result<(), FrameError> {
        let stream_id = frame.stream_id();
        let end_headers = frame.has_flag(flags::END_HEADERS);

        if open_block != Some(stream_id) {
            debug!(stream_id, "CONTINUATION without an open header block");
            self.fail_stream(stream_id, StreamErrorKind::ProtocolError, handler);
            return Ok(());
        }

        let stream = self.streams.get_or_insert_inbound(stream_id);
        stream.header_fragments.append(frame);
        self.after_fragment(stream_id, end_headers, handler)
    }

    /// Enforce the block size bound and complete the block on END_HEADERS.
    fn after_fragment(
        &mut self,
        stream_id: u32,
        end_headers: bool,
        handler: &mut dyn StreamHandler,
    ) -> Result<(), FrameError> {
        let Some(stream) = self.streams.get_mut(stream_id) else {
            return Ok(());
        };

        let buffered = stream.header_fragments.payload_len();
        if buffered > MAX_HEADER_BLOCK_SIZE {
            debug!(stream_id, buffered, max = MAX_HEADER_BLOCK_SIZE, "header block too large");
            self.fail_stream(stream_id, StreamErrorKind::ProtocolError, handler);
            return Ok(());
        }
        if !end_headers {
            return Ok(());
        }

        stream.end_header_sent = true;
        let end_stream = stream
            .header_fragments
            .top()
            .is_some_and(|first| first.frame_type() == FrameType::Headers && first.has_flag(flags::END_STREAM));

        let mut block = Vec::with_capacity(buffered);
        while let Some(fragment) = stream.header_fragments.pop() {
            block.extend_from_slice(fragment.header_fragment()?);
        }

        let headers = decode_header_block(&block);
        debug!(stream_id, count = headers.len(), end_stream, "header block complete");
        handler.on_headers(self, stream_id, headers, end_stream);
        Ok(())
    }

    /// The stream whose header block is still waiting for END_HEADERS.
    fn open_header_block(&self) -> Option<u32> {
        let last = self.last_frame_type?;
        if !last.carries_header_block() {
            return None;
        }
        let stream = self.streams.get(self.last_stream_id)?;
        stream.awaiting_continuation().then_some(self.last_stream_id)
    }

    fn fail_stream(&mut self, stream_id: u32, kind: StreamErrorKind, handler: &mut dyn StreamHandler) {
        let stream = self.streams.get_or_insert_inbound(stream_id);
        stream.set_state(StreamState::Closed);
        stream.header_fragments.clear();
        stream.end_header_sent = true;

        debug!(stream_id, error = %kind, "stream error");
        handler.on_error(self, stream_id, kind);
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Allocate and register the next locally-initiated stream.
    pub fn open_stream(&mut self) -> Result<u32, SendError> {
        let stream_id = self.next_stream_id;
        if stream_id > MAX_STREAM_ID {
            return Err(SendError::StreamIdsExhausted);
        }
        self.next_stream_id += 2;

        self.streams
            .add(Stream::new(stream_id, Direction::Outbound))
            .map_err(|stream| SendError::DuplicateStream(stream.id()))?;
        debug!(stream_id, "opened outbound stream");
        Ok(stream_id)
    }

    /// Queue a header list as HEADERS plus as many CONTINUATION frames as
    /// the max frame size requires. END_HEADERS is set on the last frame.
    pub fn push_headers(&mut self, stream_id: u32, headers: &[H2Header], end_stream: bool) -> Result<(), SendError> {
        let block = encode_header_block(headers)?;
        let first_flags = if end_stream { flags::END_STREAM } else { 0 };
        self.apply_send(stream_id, FrameType::Headers, first_flags)?;

        let mut chunks: Vec<&[u8]> = block.chunks(self.max_frame_size as usize).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let (frame_type, mut frame_flags) = if i == 0 {
                (FrameType::Headers, first_flags)
            } else {
                (FrameType::Continuation, 0)
            };
            if i == last {
                frame_flags |= flags::END_HEADERS;
            }
            self.enqueue(Frame::new(frame_type, frame_flags, stream_id, chunk));
        }
        Ok(())
    }

    /// Queue body bytes as DATA frames no larger than the max frame size.
    ///
    /// When `is_last` is set the final frame carries END_STREAM; an empty
    /// final segment becomes one empty END_STREAM frame. An empty segment
    /// that is not last queues nothing.
    pub fn push_data_segment(&mut self, stream_id: u32, data: &[u8], is_last: bool) -> Result<(), SendError> {
        if data.is_empty() && !is_last {
            return self.apply_send(stream_id, FrameType::Data, 0);
        }

        let end_flags = if is_last { flags::END_STREAM } else { 0 };
        self.apply_send(stream_id, FrameType::Data, end_flags)?;

        let mut chunks: Vec<&[u8]> = data.chunks(self.max_frame_size as usize).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let frame_flags = if i == last { end_flags } else { 0 };
            self.enqueue(Frame::new(FrameType::Data, frame_flags, stream_id, chunk));
        }
        Ok(())
    }

    /// Queue RST_STREAM with `error_code` and close the stream.
    pub fn push_rst_stream(&mut self, stream_id: u32, error_code: u32) -> Result<(), SendError> {
        self.apply_send(stream_id, FrameType::RstStream, 0)?;
        self.enqueue(Frame::new(FrameType::RstStream, 0, stream_id, &error_code.to_be_bytes()));
        Ok(())
    }

    /// Run the send table for a frame about to be queued.
    fn apply_send(&mut self, stream_id: u32, frame_type: FrameType, frame_flags: u8) -> Result<(), SendError> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(SendError::UnknownStream(stream_id))?;

        match transition(stream.state(), Direction::Outbound, frame_type, frame_flags) {
            Transition::Accept(next) => {
                stream.set_state(next);
                Ok(())
            }
            Transition::Ignore => Ok(()),
            Transition::Refuse | Transition::Reject(_) => Err(SendError::IllegalTransition {
                stream_id,
                state: stream.state(),
                frame_type,
            }),
        }
    }

    fn enqueue(&mut self, frame: Frame) {
        trace!(
            stream_id = frame.stream_id(),
            frame_type = ?frame.frame_type(),
            length = frame.length(),
            "queued frame"
        );
        self.outbound.append(frame);
        self.write_signal = true;
    }

    /// Next frame to write, in queue order.
    pub fn pop_outbound(&mut self) -> Option<Frame> {
        self.outbound.pop()
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Whether frames were queued since the last call. Clears the signal.
    pub fn take_write_signal(&mut self) -> bool {
        std::mem::replace(&mut self.write_signal, false)
    }

    // ========================================================================
    // Streams
    // ========================================================================

    pub fn stream(&self, stream_id: u32) -> Option<&Stream> {
        self.streams.get(stream_id)
    }

    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.streams.get(stream_id).map(Stream::state)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter()
    }

    /// Attach application data to a stream, replacing any previous value.
    pub fn set_user_data(&mut self, stream_id: u32, data: Box<dyn Any + Send>) -> Result<(), SendError> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(SendError::UnknownStream(stream_id))?;
        stream.user_data = Some(data);
        Ok(())
    }

    pub fn user_data_mut(&mut self, stream_id: u32) -> Option<&mut (dyn Any + Send + 'static)> {
        self.streams.get_mut(stream_id)?.user_data.as_deref_mut()
    }

    pub fn take_user_data(&mut self, stream_id: u32) -> Option<Box<dyn Any + Send>> {
        self.streams.get_mut(stream_id)?.user_data.take()
    }

    /// Drop every `Closed` stream. Returns how many were removed.
    ///
    /// Streams are otherwise kept for the life of the connection.
    pub fn evict_closed_streams(&mut self) -> usize {
        let before = self.streams.len();
        self.streams.retain(|_, stream| !stream.is_closed());
        let evicted = before - self.streams.len();
        if evicted > 0 {
            debug!(evicted, "evicted closed streams");
        }
        evicted
    }
}

// ============================================================================
// Tests
// ============================================================================
