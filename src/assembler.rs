//! Receive-side frame assembly.
//!
//! Socket reads arrive in arbitrary sizes. [`FrameAssembler`] accumulates
//! them into whole frames, resuming mid-header or mid-payload across calls
//! and splitting one read into as many frames as it holds.

use tracing::trace;

use crate::error::FrameError;
use crate::frame::{Frame, FRAME_HEADER_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    /// Nothing buffered.
    AwaitingFrame,
    /// Fewer than 9 header bytes buffered.
    ReadingHeader,
    /// Header complete, payload size not yet checked.
    HeaderComplete,
    /// Accumulating the declared payload.
    ReadingPayload,
}

#[derive(Debug)]
pub struct FrameAssembler {
    state: AssemblyState,
    buffer: Vec<u8>,
    total_size: usize,
    max_frame_size: u32,
}

impl FrameAssembler {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            state: AssemblyState::AwaitingFrame,
            buffer: Vec::new(),
            total_size: 0,
            max_frame_size,
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Bytes held for the frame currently being assembled.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consume bytes from `input` until one frame completes or input runs out.
    ///
    /// `input` is advanced past every byte consumed. Returns `Ok(None)` when
    /// all of `input` was buffered without completing a frame. A declared
    /// length above the max frame size is fatal; the assembler resets and the
    /// rest of the stream should be abandoned.
    pub fn next_frame(&mut self, input: &mut &[u8]) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.state {
                AssemblyState::AwaitingFrame => {
                    if input.is_empty() {
                        return Ok(None);
                    }
                    self.buffer = Vec::with_capacity(FRAME_HEADER_LEN);
                    self.total_size = 0;
                    self.state = AssemblyState::ReadingHeader;
                }
                AssemblyState::ReadingHeader => {
                    self.fill(input, FRAME_HEADER_LEN);
                    if self.buffer.len() < FRAME_HEADER_LEN {
                        return Ok(None);
                    }
                    self.state = AssemblyState::HeaderComplete;
                }
                AssemblyState::HeaderComplete => {
                    let length = u32::from_be_bytes([0, self.buffer[0], self.buffer[1], self.buffer[2]]);
                    if length > self.max_frame_size {
                        self.reset();
                        return Err(FrameError::FrameTooLarge {
                            length,
                            max: self.max_frame_size,
                        });
                    }
                    self.total_size = FRAME_HEADER_LEN + length as usize;
                    self.buffer.reserve_exact(length as usize);
                    self.state = AssemblyState::ReadingPayload;
                }
                AssemblyState::ReadingPayload => {
                    self.fill(input, self.total_size);
                    if self.buffer.len() < self.total_size {
                        return Ok(None);
                    }
                    let raw = std::mem::take(&mut self.buffer);
                    self.state = AssemblyState::AwaitingFrame;
                    trace!(size = raw.len(), "frame assembled");
                    return Ok(Some(Frame::from_assembled(raw)));
                }
            }
        }
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.total_size = 0;
        self.state = AssemblyState::AwaitingFrame;
    }

    // Never copies more than the target requires.
    fn fill(&mut self, input: &mut &[u8], target: usize) {
        let wanted = target.saturating_sub(self.buffer.len());
        let take = wanted.min(input.len());
        self.buffer.extend_from_slice(&input[..take]);
        *input = &input[take..];
    }
}
