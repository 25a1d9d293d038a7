//! Connection manager tests over loopback TCP

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use h2x::{
    flags, BodyChunk, ConfigError, ConnectionId, ConnectionManager, EngineConfig, EngineError, Frame,
    FrameHeader, FrameType, H2Codec, H2Header, Request, Role, StreamHandler, FRAME_HEADER_LEN,
};
use pretty_assertions::assert_eq;

use crate::helpers::{frame, setup_tracing};

const TIMEOUT: Duration = Duration::from_secs(5);

/// A connected pair: the test's end and the engine's non-blocking end.
fn socket_pair(listener: &TcpListener) -> (TcpStream, mio::net::TcpStream) {
    let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();

    let (accepted, _) = listener.accept().unwrap();
    accepted.set_nonblocking(true).unwrap();
    (peer, mio::net::TcpStream::from_std(accepted))
}

fn read_frame(peer: &mut TcpStream) -> Frame {
    let mut header = [0u8; FRAME_HEADER_LEN];
    peer.read_exact(&mut header).unwrap();
    let header = FrameHeader::parse(&header).unwrap();

    let mut payload = vec![0u8; header.length as usize];
    peer.read_exact(&mut payload).unwrap();
    Frame::new(header.frame_type, header.flags, header.stream_id, &payload)
}

fn assert_closed_by_engine(peer: &mut TcpStream) {
    let mut buf = [0u8; 16];
    assert_eq!(peer.read(&mut buf).unwrap(), 0);
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Replies to each request with its own headers plus a status, and to its
/// body with a suffixed copy.
#[derive(Default)]
struct Echo {
    body: Vec<u8>,
}

impl StreamHandler for Echo {
    fn on_headers(&mut self, codec: &mut H2Codec, stream_id: u32, mut headers: Vec<H2Header>, end_stream: bool) {
        headers.push(H2Header::new("response-code", "200"));
        codec.push_headers(stream_id, &headers, end_stream).unwrap();
    }

    fn on_body(&mut self, codec: &mut H2Codec, stream_id: u32, data: &[u8], is_last: bool) {
        self.body.extend_from_slice(data);
        if is_last {
            let mut reply = std::mem::take(&mut self.body);
            reply.extend_from_slice(b" is what you sent me");
            codec.push_data_segment(stream_id, &reply, true).unwrap();
        }
    }
}

#[test]
fn test_echo_server_round_trip() {
    setup_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut manager = ConnectionManager::new(EngineConfig::default()).unwrap();

    let (mut peer, socket) = socket_pair(&listener);
    let id = manager.add_connection(socket, Box::new(Echo::default())).unwrap();
    assert_eq!(id, ConnectionId { worker: 0, serial: 0 });

    let mut request = frame(FrameType::Headers, flags::END_HEADERS, 1, b":path=/echo\r\n");
    request.extend(frame(FrameType::Data, flags::END_STREAM, 1, b"hello"));
    peer.write_all(&request).unwrap();

    let headers = read_frame(&mut peer);
    assert_eq!(headers.frame_type(), FrameType::Headers);
    assert_eq!(headers.stream_id(), 1);
    assert_eq!(headers.flags(), flags::END_HEADERS);
    assert_eq!(headers.payload(), b":path=/echo\r\nresponse-code=200\r\n");

    let body = read_frame(&mut peer);
    assert_eq!(body.frame_type(), FrameType::Data);
    assert_eq!(body.flags(), flags::END_STREAM);
    assert_eq!(body.payload(), b"hello is what you sent me");

    manager.cleanup();
    assert_closed_by_engine(&mut peer);
}

#[test]
fn test_connection_refused_at_capacity() {
    setup_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = EngineConfig {
        threads: 1,
        connections_per_thread: 1,
        ..EngineConfig::default()
    };
    let mut manager = ConnectionManager::new(config).unwrap();

    let (_first_peer, first) = socket_pair(&listener);
    assert!(manager.add_connection(first, Box::new(Echo::default())).is_some());

    let (mut second_peer, second) = socket_pair(&listener);
    assert!(manager.add_connection(second, Box::new(Echo::default())).is_none());
    assert_closed_by_engine(&mut second_peer);

    assert_eq!(manager.active_connections(), 1);
}

#[test]
fn test_least_loaded_placement_and_reclaim() {
    setup_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = EngineConfig {
        threads: 2,
        ..EngineConfig::default()
    };
    let mut manager = ConnectionManager::new(config).unwrap();

    let mut peers = Vec::new();
    let mut workers = Vec::new();
    for _ in 0..3 {
        let (peer, socket) = socket_pair(&listener);
        let id = manager.add_connection(socket, Box::new(Echo::default())).unwrap();
        workers.push(id.worker);
        peers.push(peer);
    }
    assert_eq!(workers, vec![0, 1, 0]);

    let active: Vec<usize> = manager.worker_stats().iter().map(|stats| stats.active).collect();
    assert_eq!(active, vec![2, 1]);
    assert!(manager.worker_stats().iter().all(|stats| stats.capacity == 1000));

    // Peers hanging up is seen by the workers as a zero-byte read
    drop(peers);
    let mut reclaimed = 0;
    wait_until(|| {
        reclaimed += manager.pump_closed_connections();
        reclaimed == 3
    });
    assert_eq!(manager.active_connections(), 0);

    // Freed capacity is reused
    let (_peer, socket) = socket_pair(&listener);
    assert_eq!(manager.add_connection(socket, Box::new(Echo::default())).map(|id| id.worker), Some(0));
}

/// Serves each request body from the stream's user data and reports
/// responses on a channel.
struct Upload {
    responses: mpsc::Sender<(u32, Vec<H2Header>)>,
}

impl StreamHandler for Upload {
    fn on_headers(&mut self, _: &mut H2Codec, stream_id: u32, headers: Vec<H2Header>, _: bool) {
        let _ = self.responses.send((stream_id, headers));
    }

    fn on_body(&mut self, _: &mut H2Codec, _: u32, _: &[u8], _: bool) {}

    fn on_data_needed(&mut self, codec: &mut H2Codec, stream_id: u32, buf: &mut [u8]) -> BodyChunk {
        let Some(body) = codec
            .take_user_data(stream_id)
            .and_then(|data| data.downcast::<Vec<u8>>().ok())
        else {
            return BodyChunk::finished(0);
        };
        buf[..body.len()].copy_from_slice(&body);
        BodyChunk::finished(body.len())
    }
}

#[test]
fn test_client_request_with_body() {
    setup_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = EngineConfig {
        role: Role::Client,
        ..EngineConfig::default()
    };
    let mut manager = ConnectionManager::new(config).unwrap();

    let (tx, rx) = mpsc::channel();
    let id = manager
        .add_client_connection(listener.local_addr().unwrap(), Box::new(Upload { responses: tx }))
        .unwrap()
        .unwrap();
    let (mut peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();

    let request = Request::new()
        .header("a", "b")
        .with_user_data(Box::new(b"hello".to_vec()));
    manager.add_request(id, request).unwrap();

    let headers = read_frame(&mut peer);
    assert_eq!(headers.frame_type(), FrameType::Headers);
    assert_eq!(headers.stream_id(), 1);
    assert_eq!(headers.flags(), flags::END_HEADERS);
    assert_eq!(headers.payload(), b"a=b\r\n");

    let body = read_frame(&mut peer);
    assert_eq!(body.frame_type(), FrameType::Data);
    assert_eq!(body.stream_id(), 1);
    assert_eq!(body.flags(), flags::END_STREAM);
    assert_eq!(body.payload(), b"hello");

    peer.write_all(&frame(
        FrameType::Headers,
        flags::END_HEADERS | flags::END_STREAM,
        1,
        b":status=200\r\n",
    ))
    .unwrap();
    assert_eq!(
        rx.recv_timeout(TIMEOUT).unwrap(),
        (1, vec![H2Header::new(":status", "200")])
    );
}

#[test]
fn test_request_without_body_ends_stream() {
    setup_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = EngineConfig {
        role: Role::Client,
        ..EngineConfig::default()
    };
    let mut manager = ConnectionManager::new(config).unwrap();

    let (tx, _rx) = mpsc::channel();
    let id = manager
        .add_client_connection(listener.local_addr().unwrap(), Box::new(Upload { responses: tx }))
        .unwrap()
        .unwrap();
    let (mut peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();

    manager.add_request(id, Request::new().header(":method", "GET").without_body()).unwrap();
    manager.add_request(id, Request::new().header(":method", "HEAD").without_body()).unwrap();

    for stream_id in [1, 3] {
        let headers = read_frame(&mut peer);
        assert_eq!(headers.stream_id(), stream_id);
        assert_eq!(headers.flags(), flags::END_HEADERS | flags::END_STREAM);
    }
}

#[test]
fn test_cleanup_closes_every_connection() {
    setup_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = EngineConfig {
        threads: 2,
        ..EngineConfig::default()
    };
    let mut manager = ConnectionManager::new(config).unwrap();

    let mut peers = Vec::new();
    for _ in 0..4 {
        let (peer, socket) = socket_pair(&listener);
        manager.add_connection(socket, Box::new(Echo::default())).unwrap();
        peers.push(peer);
    }

    manager.cleanup();
    for peer in &mut peers {
        assert_closed_by_engine(peer);
    }
}

#[test]
fn test_request_for_unknown_connection() {
    let manager = ConnectionManager::new(EngineConfig::default()).unwrap();

    for id in [
        ConnectionId { worker: 0, serial: 0 },
        ConnectionId { worker: 7, serial: 0 },
    ] {
        let err = manager.add_request(id, Request::new()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownConnection(unknown) if unknown == id));
    }
}

#[test]
fn test_invalid_config_rejected() {
    let cases = [
        (
            EngineConfig {
                threads: 0,
                ..EngineConfig::default()
            },
            ConfigError::NoThreads,
        ),
        (
            EngineConfig {
                connections_per_thread: 0,
                ..EngineConfig::default()
            },
            ConfigError::NoConnectionCapacity,
        ),
        (
            EngineConfig {
                max_frame_size: 1 << 24,
                ..EngineConfig::default()
            },
            ConfigError::MaxFrameSize(1 << 24),
        ),
    ];

    for (config, expected) in cases {
        let err = ConnectionManager::new(config).unwrap_err();
        assert!(matches!(err, EngineError::Config(ref found) if *found == expected), "{err}");
    }
}
