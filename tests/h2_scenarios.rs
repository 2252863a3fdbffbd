//! Byte-level HTTP/2 scenarios
//!
//! Each test drives a real server connection over TCP with literal frames
//! and checks the wire output, covering the full preface-to-response
//! paths: settings exchange, GET, echo POST, CONTINUATION atomicity,
//! content-length reconciliation, and window-paced response bodies.

use bytes::Bytes;
use h2serve::dispatch::{self, DispatchConfig};
use h2serve::http::h2::codec::{FrameBuilder, FrameParser, Parsed};
use h2serve::http::h2::frames::{Frame, FrameType, WindowUpdateFrame};
use h2serve::http::h2::settings::SettingsBuilder;
use h2serve::http::h2::{hpack, Settings, CONNECTION_PREFACE};
use h2serve::router::{Request, Response, SharedRouter};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Spawn a server handling exactly one plaintext connection.
fn start_server(router: SharedRouter) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        dispatch::handle_connection(stream, None, router, &DispatchConfig::default());
    });
    addr
}

fn echo_router() -> SharedRouter {
    Arc::new(|request: &Request| {
        Response::new(200)
            .with_header("content-type", "text/plain")
            .with_body(request.body.clone())
    })
}

fn empty_ok_router() -> SharedRouter {
    Arc::new(|_: &Request| Response::new(200))
}

/// Raw-frame HTTP/2 client for driving the server byte by byte.
struct H2TestClient {
    stream: TcpStream,
    parser: FrameParser,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
}

impl H2TestClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        H2TestClient {
            stream,
            parser: FrameParser::new(),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(4096),
        }
    }

    /// Send the preface and an empty client SETTINGS frame
    fn handshake(&mut self) {
        self.handshake_with(Settings::new());
    }

    fn handshake_with(&mut self, settings: Settings) {
        self.send(CONNECTION_PREFACE);
        let frame = FrameBuilder::settings(&settings);
        self.send(&frame);
    }

    fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    fn send_headers(&mut self, stream_id: u32, headers: &[(&str, &str)], end_stream: bool) {
        let list: Vec<(String, String)> = headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        let block = Bytes::from(self.encoder.encode(&list));
        let frame = h2serve::http::h2::frames::HeadersFrame::new(stream_id, block, end_stream, true);
        self.send(&FrameBuilder::headers(&frame));
    }

    fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        let frame = h2serve::http::h2::frames::DataFrame::new(
            stream_id,
            Bytes::copy_from_slice(data),
            end_stream,
        );
        self.send(&FrameBuilder::data(&frame));
    }

    /// Next frame from the server, or None once reads time out or the
    /// connection closes.
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

    /// Skip frames until one of the wanted type arrives.
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

    fn decode_headers(&mut self, frame: &Frame) -> Vec<(String, String)> {
        // Response HEADERS from this server are unpadded and unprioritized
        self.decoder.decode(&frame.payload).unwrap()
    }

    /// True when the server answers a PING, i.e. the connection survives.
    fn connection_alive(&mut self) -> bool {
        let ping = FrameBuilder::ping(&h2serve::http::h2::frames::PingFrame::new([7; 8]));
        if self.stream.write_all(&ping).is_err() {
            return false;
        }
        loop {
            match self.next_frame() {
                Some(frame)
                    if frame.frame_type() == Some(FrameType::Ping) && frame.flags.is_ack() =>
                {
                    return frame.payload[..] == [7; 8]
                }
                Some(_) => {}
                None => return false,
            }
        }
    }
}

const GET_ROOT: &[(&str, &str)] = &[
    (":method", "GET"),
    (":scheme", "http"),
    (":path", "/"),
    (":authority", "x"),
];

#[test]
fn scenario_preface_and_settings_exchange() {
    let addr = start_server(empty_ok_router());
    let mut client = H2TestClient::connect(addr);

    // Preface followed by the literal empty SETTINGS frame
    client.send(CONNECTION_PREFACE);
    client.send(&[0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]);

    // Server SETTINGS first, carrying all six parameters
    let settings = client.next_frame().expect("server settings");
    assert_eq!(settings.frame_type(), Some(FrameType::Settings));
    assert!(!settings.flags.is_ack());
    assert_eq!(settings.stream_id, 0);
    assert_eq!(settings.payload.len(), 36);

    // Then the ACK of ours, byte for byte
    let ack = client.next_frame().expect("settings ack");
    assert_eq!(ack.frame_type(), Some(FrameType::Settings));
    assert!(ack.flags.is_ack());
    assert_eq!(ack.payload.len(), 0);
}

#[test]
fn scenario_get_via_headers() {
    let addr = start_server(empty_ok_router());
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    client.send_headers(1, GET_ROOT, true);

    let headers = client.next_frame_of(FrameType::Headers);
    assert_eq!(headers.stream_id, 1);
    assert!(headers.flags.is_end_stream());
    assert!(headers.flags.is_end_headers());

    let decoded = client.decode_headers(&headers);
    assert_eq!(decoded[0], (":status".to_string(), "200".to_string()));
}

#[test]
fn scenario_echo_post() {
    let addr = start_server(echo_router());
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    client.send_headers(
        1,
        &[
            (":method", "POST"),
            (":scheme", "http"),
            (":path", "/echo"),
            (":authority", "x"),
            ("content-length", "5"),
        ],
        false,
    );
    client.send_data(1, b"hello", true);

    let headers = client.next_frame_of(FrameType::Headers);
    assert_eq!(headers.stream_id, 1);
    assert!(!headers.flags.is_end_stream());
    let decoded = client.decode_headers(&headers);
    assert_eq!(decoded[0], (":status".to_string(), "200".to_string()));
    assert!(decoded.contains(&("content-length".to_string(), "5".to_string())));

    let data = client.next_frame_of(FrameType::Data);
    assert_eq!(data.stream_id, 1);
    assert_eq!(&data.payload[..], b"hello");
    assert!(data.flags.is_end_stream());
}

#[test]
fn scenario_continuation_atomicity() {
    let addr = start_server(empty_ok_router());
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    // HEADERS without END_HEADERS, then DATA on the same stream: the
    // header block is still open, so the connection must die
    let list = vec![(":method".to_string(), "GET".to_string())];
    let block = Bytes::from(client.encoder.encode(&list));
    let frame = h2serve::http::h2::frames::HeadersFrame::new(1, block, false, false);
    client.send(&FrameBuilder::headers(&frame));
    client.send_data(1, b"x", false);

    let goaway = client.next_frame_of(FrameType::Goaway);
    let error_code = u32::from_be_bytes([
        goaway.payload[4],
        goaway.payload[5],
        goaway.payload[6],
        goaway.payload[7],
    ]);
    assert_eq!(error_code, 0x1, "PROTOCOL_ERROR expected");

    // Connection is gone: nothing further arrives
    assert!(client.next_frame().is_none());
}

#[test]
fn scenario_content_length_mismatch() {
    let addr = start_server(echo_router());
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    client.send_headers(
        1,
        &[
            (":method", "POST"),
            (":scheme", "http"),
            (":path", "/echo"),
            (":authority", "x"),
            ("content-length", "10"),
        ],
        false,
    );
    client.send_data(1, b"hi", true);

    let rst = client.next_frame_of(FrameType::RstStream);
    assert_eq!(rst.stream_id, 1);
    let error_code =
        u32::from_be_bytes([rst.payload[0], rst.payload[1], rst.payload[2], rst.payload[3]]);
    assert_eq!(error_code, 0x1, "PROTOCOL_ERROR expected");

    // The connection itself stays usable
    assert!(client.connection_alive());
}

#[test]
fn scenario_flow_control_interleave() {
    let three_bytes: SharedRouter = Arc::new(|_: &Request| {
        Response::new(200).with_body(Bytes::from_static(b"abc"))
    });
    let addr = start_server(three_bytes);
    let mut client = H2TestClient::connect(addr);

    // Client window of 1 byte per stream
    let settings = SettingsBuilder::new().initial_window_size(1).build().unwrap();
    client.handshake_with(settings);

    client.send_headers(1, GET_ROOT, true);

    let headers = client.next_frame_of(FrameType::Headers);
    assert!(!headers.flags.is_end_stream());

    // One byte, then the stream window is empty
    let data = client.next_frame_of(FrameType::Data);
    assert_eq!(&data.payload[..], b"a");
    assert!(!data.flags.is_end_stream());
    assert!(client.next_frame().is_none(), "server must pause on a closed window");

    // Each credit releases exactly one more byte
    client.send(&FrameBuilder::window_update(&WindowUpdateFrame::new(1, 1)));
    let data = client.next_frame_of(FrameType::Data);
    assert_eq!(&data.payload[..], b"b");
    assert!(!data.flags.is_end_stream());

    client.send(&FrameBuilder::window_update(&WindowUpdateFrame::new(1, 1)));
    let data = client.next_frame_of(FrameType::Data);
    assert_eq!(&data.payload[..], b"c");
    assert!(data.flags.is_end_stream());
}

#[test]
fn scenario_request_with_query_string() {
    let router: SharedRouter = Arc::new(|request: &Request| {
        Response::text(format!(
            "{}|{}",
            request.path,
            request.query.as_deref().unwrap_or("")
        ))
    });
    let addr = start_server(router);
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    client.send_headers(
        1,
        &[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/search?q=frames&page=2"),
            (":authority", "x"),
        ],
        true,
    );

    client.next_frame_of(FrameType::Headers);
    let data = client.next_frame_of(FrameType::Data);
    assert_eq!(&data.payload[..], b"/search|q=frames&page=2");
}

#[test]
fn scenario_two_streams_on_one_connection() {
    let router: SharedRouter =
        Arc::new(|request: &Request| Response::text(request.path.clone()));
    let addr = start_server(router);
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    client.send_headers(
        1,
        &[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/first"),
            (":authority", "x"),
        ],
        true,
    );
    let data = client.next_frame_of(FrameType::Data);
    assert_eq!(data.stream_id, 1);
    assert_eq!(&data.payload[..], b"/first");

    client.send_headers(
        3,
        &[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/second"),
            (":authority", "x"),
        ],
        true,
    );
    let data = client.next_frame_of(FrameType::Data);
    assert_eq!(data.stream_id, 3);
    assert_eq!(&data.payload[..], b"/second");
}

#[test]
fn scenario_trailers_accepted() {
    let addr = start_server(echo_router());
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    client.send_headers(
        1,
        &[
            (":method", "POST"),
            (":scheme", "http"),
            (":path", "/echo"),
            (":authority", "x"),
        ],
        false,
    );
    client.send_data(1, b"body", false);
    // Trailer block carries END_STREAM and only regular fields
    client.send_headers(1, &[("x-checksum", "f00f")], true);

    let headers = client.next_frame_of(FrameType::Headers);
    let decoded = client.decode_headers(&headers);
    assert_eq!(decoded[0], (":status".to_string(), "200".to_string()));

    let data = client.next_frame_of(FrameType::Data);
    assert_eq!(&data.payload[..], b"body");
}

#[test]
fn scenario_headers_split_across_continuation() {
    let addr = start_server(empty_ok_router());
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    // Split the block by hand into HEADERS + CONTINUATION
    let list: Vec<(String, String)> = GET_ROOT
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();
    let block = client.encoder.encode(&list);
    let (first, second) = block.split_at(block.len() / 2);

    let headers =
        h2serve::http::h2::frames::HeadersFrame::new(1, Bytes::copy_from_slice(first), true, false);
    client.send(&FrameBuilder::headers(&headers));
    let continuation = h2serve::http::h2::frames::ContinuationFrame {
        stream_id: 1,
        header_block: Bytes::copy_from_slice(second),
        end_headers: true,
    };
    client.send(&FrameBuilder::continuation(&continuation));

    let response = client.next_frame_of(FrameType::Headers);
    let decoded = client.decode_headers(&response);
    assert_eq!(decoded[0], (":status".to_string(), "200".to_string()));
}

#[test]
fn scenario_handler_panic_yields_500() {
    let panicking: SharedRouter = Arc::new(|_: &Request| -> Response {
        panic!("boom");
    });
    let addr = start_server(panicking);
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    client.send_headers(1, GET_ROOT, true);

    let headers = client.next_frame_of(FrameType::Headers);
    let decoded = client.decode_headers(&headers);
    assert_eq!(decoded[0], (":status".to_string(), "500".to_string()));

    assert!(client.connection_alive());
}

#[test]
fn scenario_padded_data_accepted() {
    let addr = start_server(echo_router());
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    client.send_headers(
        1,
        &[
            (":method", "POST"),
            (":scheme", "http"),
            (":path", "/echo"),
            (":authority", "x"),
            ("content-length", "5"),
        ],
        false,
    );

    // DATA with 10 padding octets; only "hello" counts toward the body
    let data = h2serve::http::h2::frames::DataFrame::new(1, Bytes::from_static(b"hello"), true)
        .with_padding(10);
    client.send(&FrameBuilder::data(&data));

    let response = client.next_frame_of(FrameType::Data);
    assert_eq!(&response.payload[..], b"hello");
}

#[test]
fn scenario_large_body_chunked_into_frames() {
    // 40000 bytes exceeds one 16384-byte frame
    let body: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
    let expected = body.clone();
    let router: SharedRouter = {
        let body = Bytes::from(body);
        Arc::new(move |_: &Request| Response::new(200).with_body(body.clone()))
    };
    let addr = start_server(router);
    let mut client = H2TestClient::connect(addr);
    client.handshake();

    client.send_headers(1, GET_ROOT, true);
    client.next_frame_of(FrameType::Headers);

    let mut received = Vec::new();
    loop {
        let data = client.next_frame_of(FrameType::Data);
        assert!(data.payload.len() <= 16384);
        received.extend_from_slice(&data.payload);
        if data.flags.is_end_stream() {
            break;
        }
    }
    assert_eq!(received, expected);
}

#[test]
fn frame_round_trip_property() {
    // parse(serialize(F)) == F over a spread of frame shapes
    let payload_sizes = [0usize, 1, 2, 127, 128, 1000, 16384];
    for (i, &size) in payload_sizes.iter().enumerate() {
        let payload: Vec<u8> = (0..size).map(|j| (j % 256) as u8).collect();
        let stream_id = (i as u32) * 2 + 1;
        let frame = h2serve::http::h2::frames::DataFrame::new(
            stream_id,
            Bytes::from(payload.clone()),
            i % 2 == 0,
        );
        let wire = FrameBuilder::data(&frame);

        let mut parser = FrameParser::new();
        parser.push(&wire);
        match parser.next_frame() {
            Parsed::Frame(parsed) => {
                assert_eq!(parsed.frame_type(), Some(FrameType::Data));
                assert_eq!(parsed.stream_id, stream_id);
                assert_eq!(&parsed.payload[..], &payload[..]);
                assert_eq!(parsed.flags.is_end_stream(), i % 2 == 0);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }
}
