//! Length-prefixed binary framing.
//!
//! Binary ports carry messages of the form
//!
//! ```text
//! data_length=00202/<getVasOfAllSubscpn>...
//! ```
//!
//! a fixed 17-byte ASCII header (`data_length=` plus a zero-padded
//! 5-digit decimal), one `/` separator, then the body. The length
//! field counts the body *plus the separator*, so the actual payload
//! is `length - 1` bytes and `data_length=00000/` is a legal empty
//! frame.
//!
//! The decoder is restartable: it consumes nothing until a complete
//! header+body is buffered, so a frame may arrive one byte at a time.
//! Validation failures are not recoverable mid-stream because the
//! offset of the next frame can no longer be trusted; callers must
//! close the connection.

use bytes::Bytes;

/// `data_length=` prefix plus the 5-digit length field.
pub const HEADER_LENGTH: usize = 17;
const LENGTH_PREFIX: &[u8] = b"data_length=";
const LENGTH_DIGITS: usize = 5;
const SEPARATOR: u8 = b'/';

/// Largest body the 5-digit length field can describe.
pub const MAX_BODY_LENGTH: usize = 99_998;

/// Framing errors. All of them terminate the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Header does not start with `data_length=`.
    BadHeader(String),
    /// Byte after the header is not `/`.
    BadSeparator(u8),
    /// Length field contains a non-digit.
    BadLength(String),
    /// Body too large to express in a 5-digit length field (encode only).
    Oversize(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::BadHeader(header) => write!(f, "Invalid frame header: {}", header),
            FrameError::BadSeparator(b) => {
                write!(f, "Invalid separator: {:?} (expected '/')", *b as char)
            }
            FrameError::BadLength(field) => write!(f, "Invalid length field: {}", field),
            FrameError::Oversize(len) => write!(f, "Body too large to frame: {} bytes", len),
        }
    }
}

impl std::error::Error for FrameError {}

/// Result of one decode attempt against the connection buffer.
#[derive(Debug)]
pub enum DecodeResult {
    /// A full frame: body bytes plus the total bytes consumed.
    Complete(Bytes, usize),
    /// Not enough buffered data yet; nothing was consumed.
    Incomplete,
    /// Stream is corrupt; the connection must be closed.
    Error(FrameError),
}

/// Try to decode one frame from the front of `buf`.
pub fn decode(buf: &[u8]) -> DecodeResult {
    if buf.len() < HEADER_LENGTH + 1 {
        return DecodeResult::Incomplete;
    }

    let separator = buf[HEADER_LENGTH];
    if separator != SEPARATOR {
        return DecodeResult::Error(FrameError::BadSeparator(separator));
    }

    if &buf[..LENGTH_PREFIX.len()] != LENGTH_PREFIX {
        let header = String::from_utf8_lossy(&buf[..HEADER_LENGTH]).into_owned();
        return DecodeResult::Error(FrameError::BadHeader(header));
    }

    let length_field = &buf[LENGTH_PREFIX.len()..LENGTH_PREFIX.len() + LENGTH_DIGITS];
    if !length_field.iter().all(u8::is_ascii_digit) {
        let field = String::from_utf8_lossy(length_field).into_owned();
        return DecodeResult::Error(FrameError::BadLength(field));
    }

    // all digits, length_field is 5 bytes, cannot overflow
    let body_length: usize = std::str::from_utf8(length_field)
        .expect("length field is ASCII")
        .parse()
        .expect("length field is numeric");

    if body_length == 0 {
        return DecodeResult::Complete(Bytes::new(), HEADER_LENGTH + 1);
    }

    // the length unit includes the separator already consumed above
    let payload_length = body_length - 1;
    let total = HEADER_LENGTH + 1 + payload_length;
    if buf.len() < total {
        return DecodeResult::Incomplete;
    }

    let body = Bytes::copy_from_slice(&buf[HEADER_LENGTH + 1..total]);
    DecodeResult::Complete(body, total)
}

/// Frame a reply body with the same header format.
pub fn encode(body: &[u8]) -> Result<Bytes, FrameError> {
    if body.len() > MAX_BODY_LENGTH {
        return Err(FrameError::Oversize(body.len()));
    }
    let mut out = Vec::with_capacity(HEADER_LENGTH + 1 + body.len());
    out.extend_from_slice(LENGTH_PREFIX);
    out.extend_from_slice(format!("{:05}", body.len() + 1).as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(body);
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_complete_frame() {
        let stream = b"data_length=00010/response=f";
        match decode(stream) {
            DecodeResult::Complete(body, consumed) => {
                assert_eq!(&body[..], b"response=f");
                assert_eq!(consumed, 17 + 1 + 9);
            }
            other => panic!("Expected complete frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_consumes_exact_bytes() {
        // LLLLL = bodyLen + 1, consumed = 17 + 1 + bodyLen
        for body_len in [0usize, 1, 5, 100] {
            let body = vec![b'x'; body_len];
            let mut stream = format!("data_length={:05}/", body_len + 1).into_bytes();
            stream.extend_from_slice(&body);
            stream.extend_from_slice(b"data_length="); // start of next frame

            match decode(&stream) {
                DecodeResult::Complete(frame, consumed) => {
                    assert_eq!(frame.len(), body_len);
                    assert_eq!(consumed, 17 + 1 + body_len);
                }
                other => panic!("Expected complete frame, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_decode_byte_at_a_time_matches_single_shot() {
        let stream = b"data_length=00006/hello";

        let single = match decode(stream) {
            DecodeResult::Complete(body, consumed) => (body, consumed),
            other => panic!("Expected complete frame, got {:?}", other),
        };

        // feed incrementally; every prefix short of the full frame is
        // Incomplete and consumes nothing
        let mut buf = Vec::new();
        let mut incremental = None;
        for &b in stream.iter() {
            buf.push(b);
            match decode(&buf) {
                DecodeResult::Complete(body, consumed) => {
                    incremental = Some((body, consumed));
                    break;
                }
                DecodeResult::Incomplete => continue,
                DecodeResult::Error(e) => panic!("Unexpected framing error: {}", e),
            }
        }

        assert_eq!(incremental.expect("frame never completed"), single);
        assert_eq!(buf.len(), stream.len());
    }

    #[test]
    fn test_decode_zero_length_body() {
        match decode(b"data_length=00000/") {
            DecodeResult::Complete(body, consumed) => {
                assert!(body.is_empty());
                assert_eq!(consumed, 18);
            }
            other => panic!("Expected empty frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_length_one_is_empty_body() {
        // length unit includes the separator, so 00001 means no payload
        match decode(b"data_length=00001/") {
            DecodeResult::Complete(body, consumed) => {
                assert!(body.is_empty());
                assert_eq!(consumed, 18);
            }
            other => panic!("Expected empty frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_incomplete_header() {
        assert!(matches!(decode(b"data_length=000"), DecodeResult::Incomplete));
        assert!(matches!(decode(b""), DecodeResult::Incomplete));
    }

    #[test]
    fn test_decode_incomplete_body_consumes_nothing() {
        let stream = b"data_length=00100/partial";
        assert!(matches!(decode(stream), DecodeResult::Incomplete));
    }

    #[test]
    fn test_decode_bad_separator() {
        match decode(b"data_length=00005#body") {
            DecodeResult::Error(FrameError::BadSeparator(b'#')) => {}
            other => panic!("Expected separator error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_bad_prefix() {
        match decode(b"data_weight=00005/body") {
            DecodeResult::Error(FrameError::BadHeader(_)) => {}
            other => panic!("Expected header error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_non_numeric_length() {
        match decode(b"data_length=00x05/body") {
            DecodeResult::Error(FrameError::BadLength(field)) => {
                assert_eq!(field, "00x05");
            }
            other => panic!("Expected length error, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_known_example() {
        // 9-byte body is framed as data_length=00010/
        let framed = encode(b"response=f").unwrap();
        assert_eq!(&framed[..], b"data_length=00011/response=f");

        let framed = encode(b"response!").unwrap();
        assert_eq!(&framed[..], b"data_length=00010/response!");
    }

    #[test]
    fn test_encode_empty_body() {
        let framed = encode(b"").unwrap();
        assert_eq!(&framed[..], b"data_length=00001/");
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let framed = encode(b"<reply>ok</reply>").unwrap();
        match decode(&framed) {
            DecodeResult::Complete(body, consumed) => {
                assert_eq!(&body[..], b"<reply>ok</reply>");
                assert_eq!(consumed, framed.len());
            }
            other => panic!("Expected round trip, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_oversize_rejected() {
        let body = vec![b'x'; MAX_BODY_LENGTH + 1];
        assert_eq!(encode(&body).unwrap_err(), FrameError::Oversize(body.len()));
    }

    #[test]
    fn test_decode_two_pipelined_frames() {
        let mut stream = Vec::new();
        stream.extend_from_slice(b"data_length=00004/one");
        stream.extend_from_slice(b"data_length=00004/two");

        let (first, consumed) = match decode(&stream) {
            DecodeResult::Complete(body, consumed) => (body, consumed),
            other => panic!("Expected first frame, got {:?}", other),
        };
        assert_eq!(&first[..], b"one");

        match decode(&stream[consumed..]) {
            DecodeResult::Complete(body, _) => assert_eq!(&body[..], b"two"),
            other => panic!("Expected second frame, got {:?}", other),
        }
    }
}
