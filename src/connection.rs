//! A socket plus the protocol engine running over it.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use mio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::chain::ChainFlags;
use crate::error::SendError;
use crate::frame::Frame;
use crate::h2_codec::{H2Codec, StreamHandler};
use crate::manager::ConnectionId;
use crate::request::Request;

/// Readiness reported for a socket by one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSummary {
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub write_closed: bool,
    pub error: bool,
}

impl EventSummary {
    pub fn from_event(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
            error: event.is_error(),
        }
    }

    /// Both directions are gone or the socket reported an error.
    pub fn is_fatal(&self) -> bool {
        self.error || (self.read_closed && self.write_closed)
    }
}

/// Socket health, logged when the connection is reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketState {
    pub has_connected: bool,
    pub has_remote_hungup: bool,
    pub io_error: Option<io::ErrorKind>,
    pub last_event: Option<EventSummary>,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Socket has no more data right now.
    Drained,
    /// Interrupted before the socket drained; read again.
    Interrupted,
    /// Peer closed, hard error or framing fault.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every queued frame reached the kernel.
    Flushed,
    /// Kernel buffer is full; wait for writable readiness.
    Blocked,
    /// Interrupted mid-flush; write again.
    Interrupted,
    /// Hard error.
    Closed,
}

pub struct Connection<S = TcpStream> {
    id: ConnectionId,
    socket: S,
    codec: H2Codec,
    handler: Box<dyn StreamHandler>,
    /// Frame being written and how much of it the kernel has taken.
    current_outbound: Option<Frame>,
    cursor: usize,
    state: SocketState,
    /// Outbound request streams still pulling body bytes.
    in_progress: VecDeque<u32>,
    pub(crate) chains: ChainFlags,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("codec", &self.codec)
            .field("state", &self.state)
            .field("in_progress", &self.in_progress)
            .field("chains", &self.chains)
            .finish()
    }
}

impl<S: Read + Write> Connection<S> {
    pub fn new(id: ConnectionId, socket: S, codec: H2Codec, handler: Box<dyn StreamHandler>) -> Self {
        Self {
            id,
            socket,
            codec,
            handler,
            current_outbound: None,
            cursor: 0,
            state: SocketState::default(),
            in_progress: VecDeque::new(),
            chains: ChainFlags::default(),
        }
    }

    /// Read until the socket would block, feeding every byte to the codec.
    pub fn read_available(&mut self, buf: &mut [u8]) -> ReadOutcome {
        loop {
            match self.socket.read(buf) {
                Ok(0) => {
                    debug!(connection = %self.id, "peer closed connection");
                    self.state.has_remote_hungup = true;
                    return ReadOutcome::Closed;
                }
                Ok(n) => {
                    self.state.bytes_read += n as u64;
                    trace!(connection = %self.id, bytes = n, "read");
                    if let Err(err) = self.codec.process(&buf[..n], &mut *self.handler) {
                        warn!(connection = %self.id, error = %err, "framing error, closing connection");
                        return ReadOutcome::Closed;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Drained,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => return ReadOutcome::Interrupted,
                Err(err) => {
                    debug!(connection = %self.id, error = %err, "read failed");
                    self.state.io_error = Some(err.kind());
                    return ReadOutcome::Closed;
                }
            }
        }
    }

    /// Write queued frames in order, resuming a partially written frame.
    pub fn write_pending(&mut self) -> WriteOutcome {
        self.codec.take_write_signal();

        loop {
            if self.current_outbound.is_none() {
                self.current_outbound = self.codec.pop_outbound();
                self.cursor = 0;
            }
            let Some(frame) = self.current_outbound.as_ref() else {
                return WriteOutcome::Flushed;
            };

            let total = frame.as_bytes().len();
            match self.socket.write(&frame.as_bytes()[self.cursor..]) {
                Ok(0) => {
                    debug!(connection = %self.id, "socket accepted no bytes");
                    self.state.io_error = Some(io::ErrorKind::WriteZero);
                    return WriteOutcome::Closed;
                }
                Ok(n) => {
                    self.cursor += n;
                    self.state.bytes_written += n as u64;
                    if self.cursor == total {
                        trace!(connection = %self.id, bytes = total, "frame flushed");
                        self.current_outbound = None;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return WriteOutcome::Blocked,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => return WriteOutcome::Interrupted,
                Err(err) => {
                    debug!(connection = %self.id, error = %err, "write failed");
                    self.state.io_error = Some(err.kind());
                    return WriteOutcome::Closed;
                }
            }
        }
    }

    /// Open a stream for `request` and queue its HEADERS.
    pub fn start_request(&mut self, request: Request) -> Result<u32, SendError> {
        let stream_id = self.codec.open_stream()?;
        if let Some(data) = request.user_data {
            self.codec.set_user_data(stream_id, data)?;
        }
        self.codec.push_headers(stream_id, &request.headers, !request.has_body)?;
        if request.has_body {
            self.in_progress.push_back(stream_id);
        }
        debug!(connection = %self.id, stream_id, has_body = request.has_body, "request started");
        Ok(stream_id)
    }

    /// Ask the handler for one body chunk per in-progress request.
    pub fn pull_bodies(&mut self, buf: &mut [u8]) {
        for _ in 0..self.in_progress.len() {
            let Some(stream_id) = self.in_progress.pop_front() else {
                break;
            };

            let chunk = self.handler.on_data_needed(&mut self.codec, stream_id, buf);
            let written = chunk.written.min(buf.len());
            match self.codec.push_data_segment(stream_id, &buf[..written], chunk.finished) {
                Ok(()) if chunk.finished => {
                    debug!(connection = %self.id, stream_id, "request body complete");
                }
                Ok(()) => self.in_progress.push_back(stream_id),
                Err(err) => {
                    debug!(connection = %self.id, stream_id, error = %err, "request body abandoned");
                }
            }
        }
    }

    pub fn has_pending_output(&self) -> bool {
        self.current_outbound.is_some() || self.codec.has_pending_output()
    }
}

impl<S> Connection<S> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn codec(&self) -> &H2Codec {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut H2Codec {
        &mut self.codec
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    pub fn socket_state(&self) -> &SocketState {
        &self.state
    }

    pub fn has_requests_in_progress(&self) -> bool {
        !self.in_progress.is_empty()
    }

    /// Drop request bodies still being pulled.
    pub(crate) fn abandon_requests(&mut self) {
        self.in_progress.clear();
    }

    pub(crate) fn note_event(&mut self, event: EventSummary) {
        if event.writable && !self.state.has_connected {
            self.state.has_connected = true;
        }
        if event.read_closed {
            self.state.has_remote_hungup = true;
        }
        self.state.last_event = Some(event);
    }

    pub(crate) fn mark_connected(&mut self) {
        self.state.has_connected = true;
    }

    pub(crate) fn note_io_error(&mut self, kind: io::ErrorKind) {
        self.state.io_error = Some(kind);
    }
}
