//! Tests for the frame codec and frame assembly

use h2x::{flags, Frame, FrameAssembler, FrameError, FrameHeader, FrameQueue, FrameType, FRAME_HEADER_LEN};
use pretty_assertions::assert_eq;

#[test]
fn test_header_fields_survive_encode_decode() {
    let cases = [
        FrameHeader {
            length: 0,
            frame_type: FrameType::Settings,
            flags: 0,
            stream_id: 0,
        },
        FrameHeader {
            length: 5,
            frame_type: FrameType::Headers,
            flags: flags::END_HEADERS | flags::END_STREAM,
            stream_id: 1,
        },
        FrameHeader {
            length: 0x00FF_FFFF,
            frame_type: FrameType::Unknown(0xfa),
            flags: 0xff,
            stream_id: 0x7FFF_FFFF,
        },
    ];

    for header in cases {
        let decoded = FrameHeader::parse(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }
}

#[test]
fn test_encode_clears_reserved_bit() {
    let header = FrameHeader {
        length: 0,
        frame_type: FrameType::Data,
        flags: 0,
        stream_id: 0xFFFF_FFFF,
    };
    let bytes = header.encode();
    assert_eq!(bytes[5] & 0x80, 0);
    assert_eq!(FrameHeader::parse(&bytes).unwrap().stream_id, 0x7FFF_FFFF);
}

#[test]
fn test_frame_accessors() {
    let mut frame = Frame::new(FrameType::Data, flags::END_STREAM, 3, b"hello");

    assert_eq!(frame.length(), 5);
    assert_eq!(frame.frame_type(), FrameType::Data);
    assert_eq!(frame.flags(), flags::END_STREAM);
    assert!(frame.has_flag(flags::END_STREAM));
    assert!(!frame.has_flag(flags::PADDED));
    assert_eq!(frame.stream_id(), 3);
    assert_eq!(frame.payload(), b"hello");
    assert_eq!(frame.as_bytes().len(), FRAME_HEADER_LEN + 5);

    frame.set_type(FrameType::Headers);
    frame.set_flags(flags::END_HEADERS);
    frame.set_stream_id(9);
    frame.set_payload(b"hi");

    assert_eq!(
        frame.header(),
        FrameHeader {
            length: 2,
            frame_type: FrameType::Headers,
            flags: flags::END_HEADERS,
            stream_id: 9,
        }
    );
    assert_eq!(frame.payload(), b"hi");
}

#[test]
fn test_payload_mut_writes_in_place() {
    let mut frame = Frame::with_capacity(3);
    frame.payload_mut().copy_from_slice(b"abc");
    assert_eq!(frame.payload(), b"abc");
    assert_eq!(frame.length(), 3);
}

#[test]
#[should_panic]
fn test_set_payload_larger_than_region_panics() {
    let mut frame = Frame::with_capacity(2);
    frame.set_payload(b"too long");
}

#[test]
fn test_from_bytes_accepts_wire_frame() {
    let raw = vec![0, 0, 2, 0x8, 0, 0, 0, 0, 7, 0xaa, 0xbb];
    let frame = Frame::from_bytes(raw.clone()).unwrap();
    assert_eq!(frame.frame_type(), FrameType::WindowUpdate);
    assert_eq!(frame.stream_id(), 7);
    assert_eq!(frame.into_bytes(), raw);
}

#[test]
fn test_padded_headers_with_priority() {
    // pad_length 2, priority (5 bytes), fragment, padding
    let mut payload = vec![2, 0, 0, 0, 3, 16];
    payload.extend_from_slice(b"a=b\r\n");
    payload.extend_from_slice(&[0, 0]);
    let frame = Frame::new(
        FrameType::Headers,
        flags::PADDED | flags::PRIORITY | flags::END_HEADERS,
        1,
        &payload,
    );

    assert_eq!(frame.header_fragment().unwrap(), b"a=b\r\n");
}

#[test]
fn test_priority_flag_with_short_payload() {
    let frame = Frame::new(FrameType::Headers, flags::PRIORITY, 1, &[0, 0]);
    assert_eq!(
        frame.header_fragment().unwrap_err(),
        FrameError::InvalidPriority {
            frame_type: FrameType::Headers
        }
    );
}

#[test]
fn test_padded_flag_without_pad_byte() {
    let frame = Frame::new(FrameType::Data, flags::PADDED, 1, &[]);
    assert_eq!(
        frame.unpadded_payload().unwrap_err(),
        FrameError::InvalidPadding {
            frame_type: FrameType::Data
        }
    );
}

#[test]
fn test_frame_queue_drains_in_order() {
    let mut queue = FrameQueue::new();
    for stream_id in [1, 3, 5] {
        queue.append(Frame::new(FrameType::Data, 0, stream_id, &[]));
    }

    let order: Vec<u32> = queue.iter().map(Frame::stream_id).collect();
    assert_eq!(order, vec![1, 3, 5]);

    assert_eq!(queue.pop().unwrap().stream_id(), 1);
    queue.clear();
    assert!(queue.is_empty());
    assert!(queue.top().is_none());
}

#[test]
fn test_assembler_byte_at_a_time() {
    let mut bytes = Frame::new(FrameType::Headers, flags::END_HEADERS, 1, b"a=b\r\n").into_bytes();
    bytes.extend(Frame::new(FrameType::Data, flags::END_STREAM, 1, b"body").into_bytes());

    let mut assembler = FrameAssembler::new(16_384);
    let mut frames = Vec::new();
    for byte in &bytes {
        let mut input = std::slice::from_ref(byte);
        if let Some(frame) = assembler.next_frame(&mut input).unwrap() {
            frames.push(frame);
        }
        assert!(input.is_empty());
    }

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].payload(), b"a=b\r\n");
    assert_eq!(frames[1].payload(), b"body");
    assert!(frames[1].has_flag(flags::END_STREAM));
}

#[test]
fn test_assembler_leaves_following_bytes_unconsumed() {
    let mut bytes = Frame::new(FrameType::Ping, 0, 0, &[0; 8]).into_bytes();
    bytes.extend_from_slice(&[0, 0]);

    let mut assembler = FrameAssembler::new(16_384);
    let mut input = &bytes[..];
    let frame = assembler.next_frame(&mut input).unwrap().unwrap();
    assert_eq!(frame.frame_type(), FrameType::Ping);
    assert_eq!(input, &[0, 0]);
}
