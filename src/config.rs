use std::time::Duration;

use crate::error::ConfigError;
use crate::frame::MAX_FRAME_LENGTH;
use crate::h2_codec::Role;

/// Default payload bound for outbound frames (RFC 7540 initial SETTINGS_MAX_FRAME_SIZE).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Engine-wide settings, shared read-only with every worker.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Role every connection placed by this engine plays.
    pub role: Role,

    /// Number of worker threads.
    pub threads: usize,

    /// Placement cap per worker.
    pub connections_per_thread: usize,

    /// Largest frame payload accepted or produced.
    pub max_frame_size: u32,

    /// Scratch buffer size for each socket read.
    pub read_buffer_size: usize,

    /// Upper bound on one readiness wait. Keeps mailboxes serviced while idle.
    pub poll_timeout: Duration,

    /// Readiness events collected per wait.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            threads: 1,
            connections_per_thread: 1000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: 8192,
            poll_timeout: Duration::from_millis(10),
            event_capacity: 1000,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if self.connections_per_thread == 0 {
            return Err(ConfigError::NoConnectionCapacity);
        }
        if self.max_frame_size == 0 || self.max_frame_size > MAX_FRAME_LENGTH {
            return Err(ConfigError::MaxFrameSize(self.max_frame_size));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::NoReadBuffer);
        }
        Ok(())
    }

    /// Events per readiness wait, never zero.
    pub(crate) fn events_per_poll(&self) -> usize {
        self.event_capacity.max(1)
    }
}
