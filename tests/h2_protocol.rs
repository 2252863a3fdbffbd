//! HTTP/2 error-policy and protocol-invariant tests
//!
//! Malformed and out-of-order inputs against a live connection: stream id
//! rules, closed-stream memory, window-update edge cases, SETTINGS
//! validation, PUSH_PROMISE rejection, and preface handling.

use bytes::Bytes;
use h2serve::dispatch::{self, DispatchConfig};
use h2serve::http::h2::codec::{encode_header, FrameBuilder, FrameParser, Parsed};
use h2serve::http::h2::frames::{
    Frame, FrameFlags, FrameType, HeadersFrame, PingFrame, RstStreamFrame, WindowUpdateFrame,
};
use h2serve::http::h2::{hpack, ErrorCode, Settings, CONNECTION_PREFACE};
use h2serve::router::{Request, Response, SharedRouter};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn start_server() -> SocketAddr {
    let router: SharedRouter = Arc::new(|_: &Request| Response::new(200));
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        dispatch::handle_connection(stream, None, router, &DispatchConfig::default());
    });
    addr
}

struct Peer {
    stream: TcpStream,
    parser: FrameParser,
    encoder: hpack::Encoder,
}

impl Peer {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        Peer {
            stream,
            parser: FrameParser::new(),
            encoder: hpack::Encoder::new(),
        }
    }

    fn handshake(addr: SocketAddr) -> Self {
        let mut peer = Peer::connect(addr);
        peer.send(CONNECTION_PREFACE);
        peer.send(&FrameBuilder::settings(&Settings::new()));
        peer
    }

    fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    fn send_request_headers(&mut self, stream_id: u32, end_stream: bool) {
        let list: Vec<(String, String)> = [
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "x"),
        ]
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();
        let block = Bytes::from(self.encoder.encode(&list));
        let frame = HeadersFrame::new(stream_id, block, end_stream, true);
        self.send(&FrameBuilder::headers(&frame));
    }

    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.parser.next_frame() {
                Parsed::Frame(frame) => return Some(frame),
                Parsed::Error(code, reason) => panic!("bad server frame: {} ({})", code, reason),
                Parsed::NeedMore => {}
            }
            let mut buf = [0u8; 4096];
            match self.stream.read(&mut buf) {
                Ok(0) => return None,
                Ok(n) => self.parser.push(&buf[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return None
                }
                Err(e) => panic!("read error: {}", e),
            }
        }
    }

    fn next_frame_of(&mut self, wanted: FrameType) -> Frame {
        loop {
            let frame = self
                .next_frame()
                .unwrap_or_else(|| panic!("connection ended waiting for {}", wanted));
            if frame.frame_type() == Some(wanted) {
                return frame;
            }
        }
    }

    fn expect_goaway(&mut self, code: ErrorCode) {
        let goaway = self.next_frame_of(FrameType::Goaway);
        let wire_code = u32::from_be_bytes([
            goaway.payload[4],
            goaway.payload[5],
            goaway.payload[6],
            goaway.payload[7],
        ]);
        assert_eq!(wire_code, code.as_u32(), "expected {}", code);
    }

    fn expect_rst(&mut self, stream_id: u32, code: ErrorCode) {
        let rst = self.next_frame_of(FrameType::RstStream);
        assert_eq!(rst.stream_id, stream_id);
        let wire_code =
            u32::from_be_bytes([rst.payload[0], rst.payload[1], rst.payload[2], rst.payload[3]]);
        assert_eq!(wire_code, code.as_u32(), "expected {}", code);
    }

    fn alive(&mut self) -> bool {
        let ping = FrameBuilder::ping(&PingFrame::new([3; 8]));
        if self.stream.write_all(&ping).is_err() {
            return false;
        }
        loop {
            match self.next_frame() {
                Some(frame)
                    if frame.frame_type() == Some(FrameType::Ping) && frame.flags.is_ack() =>
                {
                    return true
                }
                Some(_) => {}
                None => return false,
            }
        }
    }
}

#[test]
fn test_preface_mismatch_rejected() {
    let addr = start_server();
    let mut peer = Peer::connect(addr);

    // Diverge from the preface only at the tail so the sniffer commits
    let mut bad = CONNECTION_PREFACE.to_vec();
    let last = bad.len() - 1;
    bad[last] = b'X';
    peer.send(&bad);

    peer.expect_goaway(ErrorCode::ProtocolError);
}

#[test]
fn test_ping_echo() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    let payload = [1, 2, 3, 4, 5, 6, 7, 8];
    peer.send(&FrameBuilder::ping(&PingFrame::new(payload)));

    let pong = peer.next_frame_of(FrameType::Ping);
    assert!(pong.flags.is_ack());
    assert_eq!(&pong.payload[..], &payload);
}

#[test]
fn test_ping_on_stream_is_connection_error() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    let mut frame = encode_header(FrameType::Ping, FrameFlags::empty(), 1, 8).to_vec();
    frame.extend_from_slice(&[0; 8]);
    peer.send(&frame);

    peer.expect_goaway(ErrorCode::ProtocolError);
}

#[test]
fn test_even_stream_id_is_connection_error() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    peer.send_request_headers(2, true);
    peer.expect_goaway(ErrorCode::ProtocolError);
}

#[test]
fn test_stream_ids_must_increase() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    peer.send_request_headers(5, true);
    peer.next_frame_of(FrameType::Headers);

    peer.send_request_headers(3, true);
    peer.expect_goaway(ErrorCode::ProtocolError);
}

#[test]
fn test_push_promise_rejected() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    let mut frame = encode_header(FrameType::PushPromise, FrameFlags::empty(), 1, 4).to_vec();
    frame.extend_from_slice(&2u32.to_be_bytes());
    peer.send(&frame);

    peer.expect_goaway(ErrorCode::ProtocolError);
}

#[test]
fn test_data_on_idle_stream_is_connection_error() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    let data = h2serve::http::h2::frames::DataFrame::new(1, Bytes::from_static(b"x"), false);
    peer.send(&FrameBuilder::data(&data));

    peer.expect_goaway(ErrorCode::ProtocolError);
}

#[test]
fn test_headers_on_finished_stream_is_stream_closed() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    peer.send_request_headers(1, true);
    peer.next_frame_of(FrameType::Headers);

    // The exchange finished, so the id is in closed-stream memory
    peer.send_request_headers(1, true);
    peer.expect_rst(1, ErrorCode::StreamClosed);
    assert!(peer.alive());
}

#[test]
fn test_rst_stream_on_idle_id_accepted() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    peer.send(&FrameBuilder::rst_stream(&RstStreamFrame {
        stream_id: 7,
        error_code: ErrorCode::Cancel,
    }));

    // No response frame; connection stays healthy
    assert!(peer.alive());

    // And the id now counts as closed
    peer.send_request_headers(7, true);
    peer.expect_rst(7, ErrorCode::StreamClosed);
}

#[test]
fn test_rst_stream_cancels_buffered_response() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    peer.send_request_headers(1, true);
    peer.next_frame_of(FrameType::Headers);

    // Late reset of the finished stream is ignored
    peer.send(&FrameBuilder::rst_stream(&RstStreamFrame {
        stream_id: 1,
        error_code: ErrorCode::Cancel,
    }));
    assert!(peer.alive());
}

#[test]
fn test_window_update_zero_increment_on_connection() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    peer.send(&FrameBuilder::window_update(&WindowUpdateFrame::new(0, 0)));
    peer.expect_goaway(ErrorCode::ProtocolError);
}

#[test]
fn test_connection_window_overflow() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    // 65535 + (2^31 - 1) overflows the connection send window
    peer.send(&FrameBuilder::window_update(&WindowUpdateFrame::new(
        0,
        0x7FFF_FFFF,
    )));
    peer.expect_goaway(ErrorCode::FlowControlError);
}

#[test]
fn test_stream_window_overflow_is_stream_error() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    // Keep the stream open so the update hits a live stream
    let list = vec![
        (":method".to_string(), "POST".to_string()),
        (":scheme".to_string(), "http".to_string()),
        (":path".to_string(), "/".to_string()),
        (":authority".to_string(), "x".to_string()),
    ];
    let block = Bytes::from(peer.encoder.encode(&list));
    let frame = HeadersFrame::new(1, block, false, true);
    peer.send(&FrameBuilder::headers(&frame));

    peer.send(&FrameBuilder::window_update(&WindowUpdateFrame::new(
        1,
        0x7FFF_FFFF,
    )));
    peer.expect_rst(1, ErrorCode::FlowControlError);
    assert!(peer.alive());
}

#[test]
fn test_settings_bad_enable_push_rejected() {
    let addr = start_server();
    let mut peer = Peer::connect(addr);
    peer.send(CONNECTION_PREFACE);

    // ENABLE_PUSH = 2 is out of range
    let mut payload = Vec::new();
    payload.extend_from_slice(&2u16.to_be_bytes());
    payload.extend_from_slice(&2u32.to_be_bytes());
    let mut frame = encode_header(FrameType::Settings, FrameFlags::empty(), 0, 6).to_vec();
    frame.extend_from_slice(&payload);
    peer.send(&frame);

    peer.expect_goaway(ErrorCode::ProtocolError);
}

#[test]
fn test_settings_ack_with_payload_rejected() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    let mut frame =
        encode_header(FrameType::Settings, FrameFlags::from_u8(FrameFlags::ACK), 0, 6).to_vec();
    frame.extend_from_slice(&[0; 6]);
    peer.send(&frame);

    peer.expect_goaway(ErrorCode::FrameSizeError);
}

#[test]
fn test_settings_wrong_length_rejected() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    let mut frame = encode_header(FrameType::Settings, FrameFlags::empty(), 0, 7).to_vec();
    frame.extend_from_slice(&[0; 7]);
    peer.send(&frame);

    peer.expect_goaway(ErrorCode::FrameSizeError);
}

#[test]
fn test_unknown_frame_type_discarded() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    let mut frame = encode_header(FrameType::Data, FrameFlags::empty(), 0, 5).to_vec();
    frame[3] = 0xAB; // unknown type
    frame.extend_from_slice(b"junk!");
    peer.send(&frame);

    // Still a working connection
    peer.send_request_headers(1, true);
    let headers = peer.next_frame_of(FrameType::Headers);
    assert_eq!(headers.stream_id, 1);
}

#[test]
fn test_priority_self_dependency_is_stream_error() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    let mut frame = encode_header(FrameType::Priority, FrameFlags::empty(), 3, 5).to_vec();
    frame.extend_from_slice(&3u32.to_be_bytes());
    frame.push(16);
    peer.send(&frame);

    peer.expect_rst(3, ErrorCode::ProtocolError);
    assert!(peer.alive());
}

#[test]
fn test_priority_on_idle_stream_stores_without_opening() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    // Priority for a stream that does not exist yet
    let mut frame = encode_header(FrameType::Priority, FrameFlags::empty(), 9, 5).to_vec();
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame.push(31);
    peer.send(&frame);
    assert!(peer.alive());

    // The stream can still be opened afterwards
    peer.send_request_headers(9, true);
    let headers = peer.next_frame_of(FrameType::Headers);
    assert_eq!(headers.stream_id, 9);
}

#[test]
fn test_missing_pseudo_header_is_stream_error() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    // No :path
    let list = vec![
        (":method".to_string(), "GET".to_string()),
        (":scheme".to_string(), "http".to_string()),
        (":authority".to_string(), "x".to_string()),
    ];
    let block = Bytes::from(peer.encoder.encode(&list));
    peer.send(&FrameBuilder::headers(&HeadersFrame::new(1, block, true, true)));

    peer.expect_rst(1, ErrorCode::ProtocolError);
    assert!(peer.alive());
}

#[test]
fn test_connection_specific_header_is_stream_error() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    let list = vec![
        (":method".to_string(), "GET".to_string()),
        (":scheme".to_string(), "http".to_string()),
        (":path".to_string(), "/".to_string()),
        ("connection".to_string(), "keep-alive".to_string()),
    ];
    let block = Bytes::from(peer.encoder.encode(&list));
    peer.send(&FrameBuilder::headers(&HeadersFrame::new(1, block, true, true)));

    peer.expect_rst(1, ErrorCode::ProtocolError);
    assert!(peer.alive());
}

#[test]
fn test_oversized_frame_closes_connection() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    // Declared length beyond SETTINGS_MAX_FRAME_SIZE; no payload needed,
    // the header alone is enough to reject
    let frame = encode_header(FrameType::Data, FrameFlags::empty(), 1, 20_000);
    peer.send(&frame);

    peer.expect_goaway(ErrorCode::FrameSizeError);
}

#[test]
fn test_continuation_without_headers_rejected() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    let continuation = h2serve::http::h2::frames::ContinuationFrame {
        stream_id: 1,
        header_block: Bytes::from_static(b"\x82"),
        end_headers: true,
    };
    peer.send(&FrameBuilder::continuation(&continuation));

    peer.expect_goaway(ErrorCode::ProtocolError);
}

#[test]
fn test_goaway_reports_last_processed_stream() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    peer.send_request_headers(1, true);
    peer.next_frame_of(FrameType::Headers);
    peer.send_request_headers(3, true);
    peer.next_frame_of(FrameType::Headers);

    // Provoke a connection error and inspect last_stream_id
    peer.send_request_headers(2, true);
    let goaway = peer.next_frame_of(FrameType::Goaway);
    let last_stream_id = u32::from_be_bytes([
        goaway.payload[0],
        goaway.payload[1],
        goaway.payload[2],
        goaway.payload[3],
    ]) & 0x7FFF_FFFF;
    assert_eq!(last_stream_id, 3);
}

#[test]
fn test_monotonic_ids_accepted_in_order() {
    let addr = start_server();
    let mut peer = Peer::handshake(addr);

    // Odd ids, strictly increasing, gaps allowed
    for stream_id in [1u32, 3, 7, 13, 101] {
        peer.send_request_headers(stream_id, true);
        let headers = peer.next_frame_of(FrameType::Headers);
        assert_eq!(headers.stream_id, stream_id);
        assert!(headers.flags.is_end_stream());
    }
}
