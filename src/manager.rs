//! Connection Manager: owns the worker pool, places connections and
//! reclaims the ones workers have finished with.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use mio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::error::EngineError;
use crate::h2_codec::{H2Codec, StreamHandler};
use crate::request::Request;
use crate::worker::{self, lock, WorkerHandle};

/// Connections released by workers, awaiting teardown by the manager.
pub(crate) type FinishedList = Arc<Mutex<Vec<Connection>>>;

/// Identifies a placed connection: the worker it is pinned to and a
/// per-worker serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub worker: usize,
    pub serial: u64,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.worker, self.serial)
    }
}

/// Load of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub index: usize,
    pub active: usize,
    pub capacity: usize,
}

struct WorkerSlot {
    handle: WorkerHandle,
    active: usize,
    next_serial: u64,
}

pub struct ConnectionManager {
    config: Arc<EngineConfig>,
    workers: Vec<WorkerSlot>,
    finished: FinishedList,
    shut_down: bool,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("workers", &self.worker_stats())
            .finish()
    }
}

impl ConnectionManager {
    /// Start the worker pool.
    ///
    /// A worker whose readiness context cannot be created is skipped; the
    /// manager fails only if no worker starts.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let config = Arc::new(config);
        let finished: FinishedList = Arc::new(Mutex::new(Vec::new()));

        let mut workers = Vec::with_capacity(config.threads);
        for attempt in 0..config.threads {
            let index = workers.len();
            match worker::spawn(index, Arc::clone(&config), Arc::clone(&finished)) {
                Ok(handle) => workers.push(WorkerSlot {
                    handle,
                    active: 0,
                    next_serial: 0,
                }),
                Err(err) => warn!(attempt, error = %err, "worker failed to start"),
            }
        }

        if workers.is_empty() {
            return Err(EngineError::NoWorkers);
        }
        debug!(workers = workers.len(), role = ?config.role, "connection manager started");

        Ok(Self {
            config,
            workers,
            finished,
            shut_down: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Place a connected socket on the least-loaded worker below its cap.
    ///
    /// Returns `None` and closes the socket when every worker is full.
    pub fn add_connection(&mut self, socket: TcpStream, handler: Box<dyn StreamHandler>) -> Option<ConnectionId> {
        let Some(index) = self.pick_worker() else {
            info!(
                peer = ?socket.peer_addr().ok(),
                "no live worker has capacity, refusing connection"
            );
            return None;
        };

        let slot = &mut self.workers[index];
        let id = ConnectionId {
            worker: index,
            serial: slot.next_serial,
        };
        slot.next_serial += 1;
        slot.active += 1;

        let codec = H2Codec::with_max_frame_size(self.config.role, self.config.max_frame_size);
        slot.handle.adopt(Connection::new(id, socket, codec, handler));
        info!(connection = %id, worker = index, active = slot.active, "connection placed");
        Some(id)
    }

    /// Start a non-blocking connect to `addr` and place the socket.
    pub fn add_client_connection(
        &mut self,
        addr: SocketAddr,
        handler: Box<dyn StreamHandler>,
    ) -> Result<Option<ConnectionId>, EngineError> {
        let socket = TcpStream::connect(addr)?;
        debug!(%addr, "connecting");
        Ok(self.add_connection(socket, handler))
    }

    /// Hand an outbound request to the worker owning `id`.
    pub fn add_request(&self, id: ConnectionId, request: Request) -> Result<(), EngineError> {
        let slot = self
            .workers
            .get(id.worker)
            .filter(|slot| id.serial < slot.next_serial)
            .ok_or(EngineError::UnknownConnection(id))?;
        if slot.handle.is_finished() {
            return Err(EngineError::WorkerStopped(id.worker));
        }
        slot.handle.submit_request(id, request);
        Ok(())
    }

    /// Tear down every connection workers have released. Returns how many.
    pub fn pump_closed_connections(&mut self) -> usize {
        let finished = std::mem::take(&mut *lock(&self.finished));
        let count = finished.len();

        for conn in finished {
            let state = conn.socket_state();
            info!(
                connection = %conn.id(),
                last_event = ?state.last_event,
                io_error = ?state.io_error,
                remote_hungup = state.has_remote_hungup,
                connected = state.has_connected,
                bytes_read = state.bytes_read,
                bytes_written = state.bytes_written,
                streams = conn.codec().stream_count(),
                "connection closed"
            );
            if let Some(slot) = self.workers.get_mut(conn.id().worker) {
                slot.active = slot.active.saturating_sub(1);
            }
        }
        count
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.workers
            .iter()
            .enumerate()
            .map(|(index, slot)| WorkerStats {
                index,
                active: slot.active,
                capacity: self.config.connections_per_thread,
            })
            .collect()
    }

    /// Connections placed and not yet reclaimed.
    pub fn active_connections(&self) -> usize {
        self.workers.iter().map(|slot| slot.active).sum()
    }

    /// Stop every worker, join them and reclaim what they released.
    pub fn cleanup(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        for slot in &self.workers {
            slot.handle.signal_quit();
        }
        for slot in &mut self.workers {
            slot.handle.join();
        }
        let reclaimed = self.pump_closed_connections();
        debug!(reclaimed, "connection manager stopped");
    }

    /// Least-loaded live worker below its cap, first on ties. A worker whose
    /// thread has exited counts as a failed slot.
    fn pick_worker(&self) -> Option<usize> {
        self.workers
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.handle.is_finished())
            .filter(|(_, slot)| slot.active < self.config.connections_per_thread)
            .min_by_key(|(_, slot)| slot.active)
            .map(|(index, _)| index)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
