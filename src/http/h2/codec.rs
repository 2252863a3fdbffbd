//! HTTP/2 frame encoding and decoding
//!
//! The receive side is a buffered push/next parser: bytes go in through
//! [`FrameParser::push`], complete frames come out of [`FrameParser::next_frame`]
//! without blocking. Per-type size rules from RFC 7540 Section 6 are enforced
//! here, before any payload interpretation, so handlers never see a frame
//! with an impossible length.
//!
//! The send side is a set of stateless builders producing ready-to-write
//! byte strings.

use super::error::ErrorCode;
use super::frames::*;
use super::settings::Settings;
use super::{DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_FRAME_SIZE};
use bytes::{BufMut, Bytes, BytesMut};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Outcome of a [`FrameParser::next_frame`] call
#[derive(Debug)]
pub enum Parsed {
    /// A complete frame
    Frame(Frame),
    /// Not enough buffered bytes yet
    NeedMore,
    /// Unrecoverable framing violation
    Error(ErrorCode, String),
}

/// Incremental frame parser.
///
/// Holds a growing buffer; `next_frame` consumes one frame at a time and
/// refuses payloads larger than the locally advertised max frame size.
pub struct FrameParser {
    buffer: BytesMut,
    max_frame_size: u32,
}

impl FrameParser {
    /// Create a parser enforcing the default max frame size
    pub fn new() -> Self {
        FrameParser {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Update the advertised max frame size (clamped to the protocol ceiling)
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size.min(MAX_ALLOWED_FRAME_SIZE);
    }

    /// Append received bytes to the parse buffer
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered, not-yet-consumed bytes
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to produce the next frame from the buffer
    pub fn next_frame(&mut self) -> Parsed {
        if self.buffer.len() < FRAME_HEADER_SIZE {
            return Parsed::NeedMore;
        }

        let (raw_type, flags, stream_id, length) = decode_header(&self.buffer[..FRAME_HEADER_SIZE]);

        if length > self.max_frame_size as usize {
            return Parsed::Error(
                ErrorCode::FrameSizeError,
                format!("frame payload {} exceeds max frame size {}", length, self.max_frame_size),
            );
        }

        // Fixed-size rules per frame type. Unknown types skip these checks.
        if let Some(frame_type) = FrameType::from_u8(raw_type) {
            let violation = match frame_type {
                FrameType::Priority => length != 5,
                FrameType::RstStream => length != 4,
                FrameType::Settings => length % 6 != 0,
                FrameType::Ping => length != 8,
                FrameType::Goaway => length < 8,
                FrameType::WindowUpdate => length != 4,
                _ => false,
            };
            if violation {
                return Parsed::Error(
                    ErrorCode::FrameSizeError,
                    format!("invalid payload length {} for {}", length, frame_type.name()),
                );
            }
        }

        if self.buffer.len() < FRAME_HEADER_SIZE + length {
            return Parsed::NeedMore;
        }

        let mut frame_bytes = self.buffer.split_to(FRAME_HEADER_SIZE + length);
        let payload = frame_bytes.split_off(FRAME_HEADER_SIZE).freeze();

        Parsed::Frame(Frame {
            raw_type,
            flags,
            stream_id,
            payload,
        })
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a frame header from the first 9 bytes of `bytes`
pub fn decode_header(bytes: &[u8]) -> (u8, FrameFlags, u32, usize) {
    // Length (24 bits, big-endian)
    let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);

    let raw_type = bytes[3];
    let flags = FrameFlags::from_u8(bytes[4]);

    // Stream ID (31 bits, reserved bit masked)
    let stream_id = ((bytes[5] as u32 & 0x7F) << 24)
        | ((bytes[6] as u32) << 16)
        | ((bytes[7] as u32) << 8)
        | (bytes[8] as u32);

    (raw_type, flags, stream_id, length)
}

/// Encode a frame header into a fixed 9-byte array
pub fn encode_header(
    frame_type: FrameType,
    flags: FrameFlags,
    stream_id: u32,
    length: usize,
) -> [u8; FRAME_HEADER_SIZE] {
    let mut header = [0u8; FRAME_HEADER_SIZE];

    header[0] = ((length >> 16) & 0xFF) as u8;
    header[1] = ((length >> 8) & 0xFF) as u8;
    header[2] = (length & 0xFF) as u8;

    header[3] = frame_type.as_u8();
    header[4] = flags.as_u8();

    // Reserved bit is always cleared on send
    let stream_id = stream_id & 0x7FFF_FFFF;
    header[5] = ((stream_id >> 24) & 0xFF) as u8;
    header[6] = ((stream_id >> 16) & 0xFF) as u8;
    header[7] = ((stream_id >> 8) & 0xFF) as u8;
    header[8] = (stream_id & 0xFF) as u8;

    header
}

/// A DATA or HEADERS payload with padding and priority fields removed.
#[derive(Debug)]
pub struct StrippedPayload {
    /// The effective payload (data or header block fragment)
    pub data: Bytes,
    /// Priority, when the HEADERS frame carried the PRIORITY flag
    pub priority: Option<PrioritySpec>,
}

/// Strip pad-length/padding (and for HEADERS, the priority block) from a
/// received payload.
///
/// Returns an error when the declared padding does not fit inside the
/// payload, which RFC 7540 Section 6.1 treats as a connection error.
pub fn strip_padding(
    payload: Bytes,
    flags: FrameFlags,
    with_priority: bool,
) -> Result<StrippedPayload, (ErrorCode, String)> {
    let mut offset = 0;
    let mut pad_len = 0usize;

    if flags.is_padded() {
        if payload.is_empty() {
            return Err((ErrorCode::ProtocolError, "padded frame with empty payload".into()));
        }
        pad_len = payload[0] as usize;
        offset = 1;
    }

    let mut priority = None;
    if with_priority && flags.is_priority() {
        if payload.len() < offset + 5 {
            return Err((ErrorCode::FrameSizeError, "HEADERS too short for priority".into()));
        }
        priority = PrioritySpec::parse(&payload[offset..offset + 5]);
        offset += 5;
    }

    if offset + pad_len > payload.len() {
        return Err((
            ErrorCode::ProtocolError,
            format!("pad length {} exceeds remaining payload", pad_len),
        ));
    }

    let data = payload.slice(offset..payload.len() - pad_len);
    Ok(StrippedPayload { data, priority })
}

/// Frame builders for the send side
pub struct FrameBuilder;

impl FrameBuilder {
    /// Encode a DATA frame
    pub fn data(frame: &DataFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let mut payload_len = frame.data.len();
        let mut flags = FrameFlags::empty();

        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }

        let padding_len = if let Some(pad_len) = frame.padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize;
            pad_len
        } else {
            0
        };

        let header = encode_header(FrameType::Data, flags, frame.stream_id, payload_len);
        buf.put_slice(&header);

        if frame.padding.is_some() {
            buf.put_u8(padding_len);
        }

        buf.put_slice(&frame.data);

        if padding_len > 0 {
            buf.put_bytes(0, padding_len as usize);
        }

        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn headers(frame: &HeadersFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let mut payload_len = frame.header_block.len();
        let mut flags = FrameFlags::empty();

        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        if frame.priority.is_some() {
            flags.set(FrameFlags::PRIORITY);
            payload_len += 5;
        }

        let padding_len = if let Some(pad_len) = frame.padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize;
            pad_len
        } else {
            0
        };

        let header = encode_header(FrameType::Headers, flags, frame.stream_id, payload_len);
        buf.put_slice(&header);

        if frame.padding.is_some() {
            buf.put_u8(padding_len);
        }

        if let Some(priority) = &frame.priority {
            let mut dep = priority.stream_dependency;
            if priority.exclusive {
                dep |= 0x8000_0000;
            }
            buf.put_u32(dep);
            buf.put_u8(priority.weight);
        }

        buf.put_slice(&frame.header_block);

        if padding_len > 0 {
            buf.put_bytes(0, padding_len as usize);
        }

        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn continuation(frame: &ContinuationFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let flags = if frame.end_headers {
            FrameFlags::from_u8(FrameFlags::END_HEADERS)
        } else {
            FrameFlags::empty()
        };

        let header = encode_header(
            FrameType::Continuation,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        );
        buf.put_slice(&header);
        buf.put_slice(&frame.header_block);

        buf.freeze()
    }

    /// Encode a SETTINGS frame
    pub fn settings(settings: &Settings) -> Bytes {
        let payload = settings.encode_payload();
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());

        let header = encode_header(FrameType::Settings, FrameFlags::empty(), 0, payload.len());
        buf.put_slice(&header);
        buf.put_slice(&payload);

        buf.freeze()
    }

    /// Encode a SETTINGS ACK frame
    pub fn settings_ack() -> Bytes {
        let header = encode_header(FrameType::Settings, FrameFlags::from_u8(FrameFlags::ACK), 0, 0);
        Bytes::copy_from_slice(&header)
    }

    /// Encode a PING frame
    pub fn ping(frame: &PingFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        let header = encode_header(FrameType::Ping, flags, 0, 8);
        buf.put_slice(&header);
        buf.put_slice(&frame.data);

        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn goaway(frame: &GoawayFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let payload_len = 8 + frame.debug_data.len();

        let header = encode_header(FrameType::Goaway, FrameFlags::empty(), 0, payload_len);
        buf.put_slice(&header);

        buf.put_u32(frame.last_stream_id & 0x7FFF_FFFF);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);

        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn window_update(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let header = encode_header(FrameType::WindowUpdate, FrameFlags::empty(), frame.stream_id, 4);
        buf.put_slice(&header);
        buf.put_u32(frame.size_increment & 0x7FFF_FFFF);

        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn rst_stream(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let header = encode_header(FrameType::RstStream, FrameFlags::empty(), frame.stream_id, 4);
        buf.put_slice(&header);
        buf.put_u32(frame.error_code.as_u32());

        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(bytes: &[u8]) -> Parsed {
        let mut parser = FrameParser::new();
        parser.push(bytes);
        parser.next_frame()
    }

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        let header = encode_header(FrameType::Headers, flags, 42, 1234);
        let (raw_type, decoded_flags, decoded_id, decoded_len) = decode_header(&header);

        assert_eq!(raw_type, FrameType::Headers.as_u8());
        assert_eq!(decoded_flags.as_u8(), flags.as_u8());
        assert_eq!(decoded_id, 42);
        assert_eq!(decoded_len, 1234);
    }

    #[test]
    fn test_reserved_bit_masked_on_read() {
        let mut header = encode_header(FrameType::Data, FrameFlags::empty(), 1, 0);
        header[5] |= 0x80; // set reserved bit
        let (_, _, stream_id, _) = decode_header(&header);
        assert_eq!(stream_id, 1);
    }

    #[test]
    fn test_parser_incremental() {
        let frame = FrameBuilder::data(&DataFrame::new(1, Bytes::from("Hello"), true));

        let mut parser = FrameParser::new();
        parser.push(&frame[..4]);
        assert!(matches!(parser.next_frame(), Parsed::NeedMore));

        parser.push(&frame[4..10]);
        assert!(matches!(parser.next_frame(), Parsed::NeedMore));

        parser.push(&frame[10..]);
        match parser.next_frame() {
            Parsed::Frame(f) => {
                assert_eq!(f.frame_type(), Some(FrameType::Data));
                assert_eq!(f.stream_id, 1);
                assert_eq!(&f.payload[..], b"Hello");
                assert!(f.flags.is_end_stream());
            }
            other => panic!("expected frame, got {:?}", other),
        }
        assert!(matches!(parser.next_frame(), Parsed::NeedMore));
    }

    #[test]
    fn test_parser_rejects_oversized_frame() {
        // Header declaring a 20000-byte payload against the 16384 default
        let header = encode_header(FrameType::Data, FrameFlags::empty(), 1, 20000);
        match parse_one(&header) {
            Parsed::Error(code, _) => assert_eq!(code, ErrorCode::FrameSizeError),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_parser_per_type_size_rules() {
        let cases: &[(FrameType, usize)] = &[
            (FrameType::Priority, 4),
            (FrameType::RstStream, 5),
            (FrameType::Settings, 7),
            (FrameType::Ping, 9),
            (FrameType::Goaway, 4),
            (FrameType::WindowUpdate, 3),
        ];
        for &(frame_type, bad_len) in cases {
            let mut bytes = encode_header(frame_type, FrameFlags::empty(), 0, bad_len).to_vec();
            bytes.extend(std::iter::repeat(0u8).take(bad_len));
            match parse_one(&bytes) {
                Parsed::Error(code, _) => {
                    assert_eq!(code, ErrorCode::FrameSizeError, "type {}", frame_type)
                }
                other => panic!("{}: expected error, got {:?}", frame_type, other),
            }
        }
    }

    #[test]
    fn test_parser_unknown_type_skips_size_rules() {
        let mut bytes = encode_header(FrameType::Data, FrameFlags::empty(), 0, 3).to_vec();
        bytes[3] = 0x42; // unknown type
        bytes.extend_from_slice(&[1, 2, 3]);
        match parse_one(&bytes) {
            Parsed::Frame(f) => {
                assert_eq!(f.frame_type(), None);
                assert_eq!(f.payload_len(), 3);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_strip_padding_data() {
        let frame = FrameBuilder::data(&DataFrame::new(1, Bytes::from("Hi"), false).with_padding(10));
        // Payload: pad-length byte + "Hi" + 10 zeros
        let payload = Bytes::copy_from_slice(&frame[FRAME_HEADER_SIZE..]);
        let flags = FrameFlags::from_u8(frame[4]);

        let stripped = strip_padding(payload, flags, false).unwrap();
        assert_eq!(&stripped.data[..], b"Hi");
        assert!(stripped.priority.is_none());
    }

    #[test]
    fn test_strip_padding_overflow_rejected() {
        // pad length 10 but only 3 bytes of payload follow
        let payload = Bytes::copy_from_slice(&[10, 1, 2, 3]);
        let flags = FrameFlags::from_u8(FrameFlags::PADDED);
        let err = strip_padding(payload, flags, false).unwrap_err();
        assert_eq!(err.0, ErrorCode::ProtocolError);
    }

    #[test]
    fn test_strip_headers_priority() {
        let spec = PrioritySpec::new(3, true, 200);
        let frame = FrameBuilder::headers(
            &HeadersFrame::new(5, Bytes::from_static(b"\x82"), false, true).with_priority(spec),
        );
        let payload = Bytes::copy_from_slice(&frame[FRAME_HEADER_SIZE..]);
        let flags = FrameFlags::from_u8(frame[4]);

        let stripped = strip_padding(payload, flags, true).unwrap();
        assert_eq!(&stripped.data[..], b"\x82");
        let priority = stripped.priority.unwrap();
        assert_eq!(priority.stream_dependency, 3);
        assert!(priority.exclusive);
        assert_eq!(priority.weight, 200);
    }

    #[test]
    fn test_data_frame_round_trip() {
        let built = FrameBuilder::data(&DataFrame::new(1, Bytes::from("Hello"), true));

        assert_eq!(built[0..3], [0, 0, 5]);
        assert_eq!(built[3], FrameType::Data.as_u8());
        assert_eq!(built[4], FrameFlags::END_STREAM);
        assert_eq!(&built[5..9], &[0, 0, 0, 1]);
        assert_eq!(&built[9..], b"Hello");

        match parse_one(&built) {
            Parsed::Frame(f) => {
                assert_eq!(f.stream_id, 1);
                assert_eq!(&f.payload[..], b"Hello");
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_settings_ack_wire_form() {
        let encoded = FrameBuilder::settings_ack();
        assert_eq!(&encoded[..], &[0, 0, 0, 4, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_goaway_wire_form() {
        let frame = GoawayFrame::new(7, ErrorCode::ProtocolError, Bytes::from_static(b"bad"));
        let encoded = FrameBuilder::goaway(&frame);

        assert_eq!(encoded[0..3], [0, 0, 11]); // 8 + 3 debug bytes
        assert_eq!(encoded[3], FrameType::Goaway.as_u8());
        assert_eq!(&encoded[9..13], &[0, 0, 0, 7]);
        assert_eq!(&encoded[13..17], &[0, 0, 0, 1]);
        assert_eq!(&encoded[17..], b"bad");
    }

    #[test]
    fn test_window_update_wire_form() {
        let encoded = FrameBuilder::window_update(&WindowUpdateFrame::new(42, 1000));

        assert_eq!(encoded[0..3], [0, 0, 4]);
        assert_eq!(encoded[3], FrameType::WindowUpdate.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 42]);
        let increment = u32::from_be_bytes([encoded[9], encoded[10], encoded[11], encoded[12]]);
        assert_eq!(increment, 1000);
    }

    #[test]
    fn test_rst_stream_wire_form() {
        let frame = RstStreamFrame {
            stream_id: 3,
            error_code: ErrorCode::Cancel,
        };
        let encoded = FrameBuilder::rst_stream(&frame);
        assert_eq!(encoded[0..3], [0, 0, 4]);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 3]);
        assert_eq!(&encoded[9..13], &[0, 0, 0, 8]);
    }
}
