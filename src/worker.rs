//! Worker threads.
//!
//! Each worker owns a mio [`Poll`], a slab of connections and three work
//! chains. One iteration:
//! 1. Wait for readiness (bounded by the poll timeout)
//! 2. Sort ready sockets onto the read, write and close chains
//! 3. Alternate read and write passes until both chains are empty
//! 4. Exchange the mailbox once: adopt connections, start requests, see quit
//! 5. Pull more request body bytes
//! 6. Move closed connections to the manager's finished list
//!
//! Reads may schedule writes. Writes never schedule anything.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use tracing::{debug, error, trace, warn};

use crate::chain::{Chain, ChainFlags, WorkChains};
use crate::config::EngineConfig;
use crate::connection::{Connection, EventSummary, ReadOutcome, WriteOutcome};
use crate::manager::{ConnectionId, FinishedList};
use crate::request::Request;

const WAKE_TOKEN: Token = Token(usize::MAX);

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Mailbox {
    connections: Vec<Connection>,
    requests: Vec<(ConnectionId, Request)>,
}

struct WorkerShared {
    mailbox: Mutex<Mailbox>,
    quit: AtomicBool,
    waker: Waker,
}

/// Manager-side handle to one worker thread.
pub(crate) struct WorkerHandle {
    index: usize,
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn adopt(&self, conn: Connection) {
        lock(&self.shared.mailbox).connections.push(conn);
        self.wake();
    }

    pub fn submit_request(&self, id: ConnectionId, request: Request) {
        lock(&self.shared.mailbox).requests.push((id, request));
        self.wake();
    }

    pub fn signal_quit(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.wake();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(worker = self.index, "worker thread panicked");
            }
        }
    }

    fn wake(&self) {
        if let Err(err) = self.shared.waker.wake() {
            warn!(worker = self.index, error = %err, "failed to wake worker");
        }
    }
}

/// Create the readiness context and start the thread.
pub(crate) fn spawn(index: usize, config: Arc<EngineConfig>, finished: FinishedList) -> io::Result<WorkerHandle> {
    let poll = Poll::new()?;
    let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
    let shared = Arc::new(WorkerShared {
        mailbox: Mutex::new(Mailbox::default()),
        quit: AtomicBool::new(false),
        waker,
    });

    let worker = Worker {
        index,
        read_buf: vec![0; config.read_buffer_size],
        config,
        poll,
        connections: Slab::new(),
        keys: HashMap::new(),
        chains: WorkChains::new(),
        shared: Arc::clone(&shared),
        finished,
    };

    let thread = thread::Builder::new()
        .name(format!("h2x-worker-{index}"))
        .spawn(move || worker.run())?;

    Ok(WorkerHandle {
        index,
        shared,
        thread: Some(thread),
    })
}

struct Worker {
    index: usize,
    config: Arc<EngineConfig>,
    poll: Poll,
    connections: Slab<Connection>,
    keys: HashMap<ConnectionId, usize>,
    chains: WorkChains,
    shared: Arc<WorkerShared>,
    finished: FinishedList,
    read_buf: Vec<u8>,
}

impl Worker {
    fn run(mut self) {
        debug!(worker = self.index, "worker started");
        let mut events = Events::with_capacity(self.config.events_per_poll());

        loop {
            let timeout = if self.chains.is_empty(Chain::PendingWrite) {
                self.config.poll_timeout
            } else {
                Duration::ZERO
            };

            let mut poll_failed = false;
            if let Err(err) = self.poll.poll(&mut events, Some(timeout)) {
                if err.kind() != io::ErrorKind::Interrupted {
                    error!(worker = self.index, error = %err, "poll failed, stopping worker");
                    poll_failed = true;
                }
                events.clear();
            }

            for event in events.iter() {
                self.classify(event);
            }
            self.pump_chains();

            let quit = self.exchange_mailbox() || poll_failed;
            self.advance_requests();

            if quit {
                self.close_all();
            }
            self.release_closed();

            if quit {
                break;
            }
        }

        debug!(worker = self.index, "worker stopped");
    }

    /// Sort one readiness event onto the work chains.
    fn classify(&mut self, event: &mio::event::Event) {
        let token = event.token();
        if token == WAKE_TOKEN {
            return;
        }
        let key = token.0;
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };

        let summary = EventSummary::from_event(event);
        trace!(worker = self.index, connection = %conn.id(), ?summary, "readiness");
        conn.note_event(summary);

        if summary.is_fatal() {
            if let Ok(Some(err)) = conn.socket().take_error() {
                conn.note_io_error(err.kind());
            }
        }
        schedule_readiness(summary, key, &mut self.chains, &mut conn.chains);
    }

    fn pump_chains(&mut self) {
        while !self.chains.is_empty(Chain::PendingRead) || !self.chains.is_empty(Chain::PendingWrite) {
            process_read_chain(&mut self.connections, &mut self.chains, &mut self.read_buf);
            process_write_chain(&mut self.connections, &mut self.chains);
        }
    }

    /// Take everything the manager sent. Returns whether to quit.
    fn exchange_mailbox(&mut self) -> bool {
        let (connections, requests, quit) = {
            let mut mailbox = lock(&self.shared.mailbox);
            (
                std::mem::take(&mut mailbox.connections),
                std::mem::take(&mut mailbox.requests),
                self.shared.quit.load(Ordering::Acquire),
            )
        };

        if quit {
            // Not admitted; hand straight back for teardown
            if !connections.is_empty() {
                lock(&self.finished).extend(connections);
            }
            return true;
        }

        for conn in connections {
            self.admit(conn);
        }
        for (id, request) in requests {
            self.start_request(id, request);
        }
        false
    }

    fn admit(&mut self, mut conn: Connection) {
        let id = conn.id();
        let key = self.connections.vacant_key();
        let interest = Interest::READABLE | Interest::WRITABLE;

        if let Err(err) = self.poll.registry().register(conn.socket_mut(), Token(key), interest) {
            warn!(worker = self.index, connection = %id, error = %err, "failed to register socket");
            conn.note_io_error(err.kind());
            lock(&self.finished).push(conn);
            return;
        }
        if conn.socket().peer_addr().is_ok() {
            conn.mark_connected();
        }

        self.connections.insert(conn);
        self.keys.insert(id, key);
        debug!(worker = self.index, connection = %id, active = self.connections.len(), "connection admitted");
    }

    fn start_request(&mut self, id: ConnectionId, request: Request) {
        let Some(&key) = self.keys.get(&id) else {
            debug!(worker = self.index, connection = %id, "request for closed connection dropped");
            return;
        };
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        if conn.chains.contains(Chain::PendingClose) {
            return;
        }

        if let Err(err) = conn.start_request(request) {
            warn!(worker = self.index, connection = %id, error = %err, "request rejected");
        }
        if conn.codec_mut().take_write_signal() {
            self.chains.enqueue(Chain::PendingWrite, key, &mut conn.chains);
        }
    }

    fn advance_requests(&mut self) {
        advance_requests(&mut self.connections, &mut self.chains, &mut self.read_buf);
    }

    fn close_all(&mut self) {
        for (key, conn) in self.connections.iter_mut() {
            self.chains.enqueue(Chain::PendingClose, key, &mut conn.chains);
        }
    }

    /// Move every connection on the close chain to the finished list.
    fn release_closed(&mut self) {
        let closing = self.chains.detach(Chain::PendingClose);
        if closing.is_empty() {
            return;
        }

        let mut released = Vec::with_capacity(closing.len());
        for key in closing {
            let Some(mut conn) = self.connections.try_remove(key) else {
                continue;
            };
            if let Err(err) = self.poll.registry().deregister(conn.socket_mut()) {
                trace!(worker = self.index, connection = %conn.id(), error = %err, "deregister failed");
            }
            conn.chains.clear();
            conn.abandon_requests();
            self.keys.remove(&conn.id());
            debug!(worker = self.index, connection = %conn.id(), "connection released");
            released.push(conn);
        }

        lock(&self.finished).extend(released);
    }
}

/// Queue `key` on the chains one readiness event calls for.
///
/// Errors and full hangups go straight to the close chain. A read-side
/// hangup alone still gets a read so buffered bytes are consumed.
pub(crate) fn schedule_readiness(
    summary: EventSummary,
    key: usize,
    chains: &mut WorkChains,
    membership: &mut ChainFlags,
) {
    if summary.is_fatal() {
        chains.enqueue(Chain::PendingClose, key, membership);
        return;
    }
    if summary.readable || summary.read_closed {
        chains.enqueue(Chain::PendingRead, key, membership);
    }
    if summary.writable {
        chains.enqueue(Chain::PendingWrite, key, membership);
    }
}

/// Pull one body chunk for every connection with requests in progress.
///
/// A connection whose previous output has not reached the kernel is
/// skipped; the writable edge that flushes it resumes the pull.
pub(crate) fn advance_requests<S: Read + Write>(
    connections: &mut Slab<Connection<S>>,
    chains: &mut WorkChains,
    buf: &mut [u8],
) {
    for (key, conn) in connections.iter_mut() {
        if !conn.has_requests_in_progress()
            || conn.has_pending_output()
            || conn.chains.contains(Chain::PendingClose)
        {
            continue;
        }
        conn.pull_bodies(buf);
        if conn.codec_mut().take_write_signal() {
            chains.enqueue(Chain::PendingWrite, key, &mut conn.chains);
        }
    }
}

/// One pass over the read chain.
///
/// Drained connections leave the chain, interrupted ones stay for the next
/// pass and closed ones move to the close chain. Connections that queued
/// frames while reading join the write chain.
pub(crate) fn process_read_chain<S: Read + Write>(
    connections: &mut Slab<Connection<S>>,
    chains: &mut WorkChains,
    buf: &mut [u8],
) {
    for key in chains.detach(Chain::PendingRead) {
        let Some(conn) = connections.get_mut(key) else {
            continue;
        };
        if conn.chains.contains(Chain::PendingClose) {
            conn.chains.remove(Chain::PendingRead);
            continue;
        }

        let outcome = conn.read_available(buf);
        if conn.codec_mut().take_write_signal() {
            chains.enqueue(Chain::PendingWrite, key, &mut conn.chains);
        }

        match outcome {
            ReadOutcome::Drained => conn.chains.remove(Chain::PendingRead),
            ReadOutcome::Interrupted => chains.relink(Chain::PendingRead, key),
            ReadOutcome::Closed => {
                conn.chains.remove(Chain::PendingRead);
                chains.enqueue(Chain::PendingClose, key, &mut conn.chains);
            }
        }
    }
}

/// One pass over the write chain. Never adds to the read or write chains
/// except to keep an interrupted connection queued.
pub(crate) fn process_write_chain<S: Read + Write>(connections: &mut Slab<Connection<S>>, chains: &mut WorkChains) {
    for key in chains.detach(Chain::PendingWrite) {
        let Some(conn) = connections.get_mut(key) else {
            continue;
        };
        if conn.chains.contains(Chain::PendingClose) {
            conn.chains.remove(Chain::PendingWrite);
            continue;
        }

        match conn.write_pending() {
            WriteOutcome::Flushed | WriteOutcome::Blocked => conn.chains.remove(Chain::PendingWrite),
            WriteOutcome::Interrupted => chains.relink(Chain::PendingWrite, key),
            WriteOutcome::Closed => {
                conn.chains.remove(Chain::PendingWrite);
                chains.enqueue(Chain::PendingClose, key, &mut conn.chains);
            }
        }
    }
}
