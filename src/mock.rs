//! Scripted in-memory socket for pump tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Reads come from `reads` (then `WouldBlock`). Writes accept at most
/// `write_chunk` bytes per call until `write_budget` is spent.
pub(crate) struct MockSocket {
    pub reads: VecDeque<io::Result<Vec<u8>>>,
    pub written: Vec<u8>,
    pub write_chunk: usize,
    pub write_budget: usize,
}

impl MockSocket {
    pub fn new() -> Self {
        Self {
            reads: VecDeque::new(),
            written: Vec::new(),
            write_chunk: usize::MAX,
            write_budget: usize::MAX,
        }
    }
}

impl Read for MockSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            Some(Ok(bytes)) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Some(Err(err)) => Err(err),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for MockSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.write_budget == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.write_chunk).min(self.write_budget);
        self.write_budget -= n;
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
