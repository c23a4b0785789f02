//! Binary frame codec for multiplexed terminal streams.
//!
//! Every frame tags a payload with a type marker and the connection id it
//! belongs to, so several logical connections can share one transport
//! without seeing each other's data.
//!
//! Layout:
//! - byte 0:            type marker ([`OUTPUT_FRAME`] or [`INPUT_FRAME`])
//! - byte 1:            connection id length `L` (0..=255)
//! - bytes 2..2+L:      connection id, UTF-8
//! - bytes 2+L..end:    payload (terminal text, passed through untouched)
//!
//! Framing is length-prefixed rather than delimited because terminal output
//! can contain any byte.

use crate::error::PtyError;

/// Type marker for process output sent to a connection.
pub const OUTPUT_FRAME: u8 = 1;
/// Type marker for client input destined for the process.
pub const INPUT_FRAME: u8 = 2;
/// Longest connection id that fits in the length byte.
pub const MAX_ID_LEN: usize = u8::MAX as usize;

const HEADER_LEN: usize = 2;

/// A decoded input frame borrowing from the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFrame<'a> {
    pub connection_id: &'a str,
    pub data: &'a [u8],
}

/// Encode process output for the connection `id`.
///
/// Fails with [`PtyError::Encoding`] if `id` is longer than 255 bytes.
pub fn encode_output(id: &str, payload: &[u8]) -> Result<Vec<u8>, PtyError> {
    encode(OUTPUT_FRAME, id, payload)
}

/// Decode an output frame, returning the payload only if the frame is
/// well formed and addressed to `expected_id`.
///
/// Malformed, truncated, or foreign frames yield `None`; this never panics.
pub fn decode_output<'a>(frame: &'a [u8], expected_id: &str) -> Option<&'a [u8]> {
    let (id, payload) = split(OUTPUT_FRAME, frame)?;
    (id == expected_id.as_bytes()).then_some(payload)
}

/// Encode client input from the connection `id`.
pub fn encode_input(id: &str, data: &[u8]) -> Result<Vec<u8>, PtyError> {
    encode(INPUT_FRAME, id, data)
}

/// Decode an input frame without filtering by id.
///
/// Checking the id against a binding is the caller's job. Returns `None`
/// for malformed frames or an id that is not valid UTF-8.
pub fn decode_input(frame: &[u8]) -> Option<InputFrame<'_>> {
    let (id, data) = split(INPUT_FRAME, frame)?;
    let connection_id = std::str::from_utf8(id).ok()?;
    Some(InputFrame {
        connection_id,
        data,
    })
}

fn encode(marker: u8, id: &str, payload: &[u8]) -> Result<Vec<u8>, PtyError> {
    let id_len = u8::try_from(id.len()).map_err(|_| PtyError::Encoding { len: id.len() })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + id.len() + payload.len());
    frame.push(marker);
    frame.push(id_len);
    frame.extend_from_slice(id.as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split a frame of the given kind into `(id, payload)`.
fn split(marker: u8, frame: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&kind, rest) = frame.split_first()?;
    if kind != marker {
        return None;
    }
    let (&id_len, rest) = rest.split_first()?;
    let id_len = id_len as usize;
    if rest.len() < id_len {
        return None;
    }
    Some(rest.split_at(id_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_layout() {
        let frame = encode_output("ab", b"hi").unwrap();
        assert_eq!(frame, vec![1, 2, b'a', b'b', b'h', b'i']);
    }

    #[test]
    fn test_input_layout() {
        let frame = encode_input("c", b"ls\n").unwrap();
        assert_eq!(frame, vec![2, 1, b'c', b'l', b's', b'\n']);
    }

    #[test]
    fn test_output_decodes_for_matching_id_only() {
        let frame = encode_output("conn-a", b"hello\r\n").unwrap();
        assert_eq!(decode_output(&frame, "conn-a"), Some(&b"hello\r\n"[..]));
        assert_eq!(decode_output(&frame, "conn-b"), None);
        // A prefix of the real id must not match.
        assert_eq!(decode_output(&frame, "conn"), None);
    }

    #[test]
    fn test_input_decode() {
        let frame = encode_input("conn-a", "échо\n".as_bytes()).unwrap();
        let input = decode_input(&frame).unwrap();
        assert_eq!(input.connection_id, "conn-a");
        assert_eq!(input.data, "échо\n".as_bytes());
    }

    #[test]
    fn test_empty_id_and_payload() {
        let frame = encode_output("", b"").unwrap();
        assert_eq!(frame, vec![1, 0]);
        assert_eq!(decode_output(&frame, ""), Some(&b""[..]));

        let input = decode_input(&[2, 0]).unwrap();
        assert_eq!(input.connection_id, "");
        assert!(input.data.is_empty());
    }

    #[test]
    fn test_payload_with_marker_bytes() {
        // Payload bytes that look like headers are carried verbatim.
        let payload = [1u8, 2, 0, 255, 2, 1];
        let frame = encode_output("x", &payload).unwrap();
        assert_eq!(decode_output(&frame, "x"), Some(&payload[..]));
    }

    #[test]
    fn test_id_length_limit() {
        let max = "a".repeat(MAX_ID_LEN);
        let frame = encode_output(&max, b"ok").unwrap();
        assert_eq!(frame[1], 255);
        assert_eq!(decode_output(&frame, &max), Some(&b"ok"[..]));

        let too_long = "a".repeat(MAX_ID_LEN + 1);
        let err = encode_output(&too_long, b"ok").unwrap_err();
        assert!(matches!(err, PtyError::Encoding { len: 256 }));
        assert!(encode_input(&too_long, b"ok").is_err());
    }

    #[test]
    fn test_id_length_counts_bytes_not_chars() {
        // 128 two-byte characters = 256 bytes.
        let id = "é".repeat(128);
        assert!(encode_output(&id, b"").is_err());
    }

    #[test]
    fn test_wrong_marker_is_dropped() {
        let output = encode_output("id", b"data").unwrap();
        let input = encode_input("id", b"data").unwrap();
        assert!(decode_input(&output).is_none());
        assert!(decode_output(&input, "id").is_none());
        assert!(decode_input(&[0, 0]).is_none());
        assert!(decode_input(&[3, 0, b'x']).is_none());
    }

    #[test]
    fn test_truncated_frames_are_dropped() {
        assert!(decode_input(&[]).is_none());
        assert!(decode_input(&[2]).is_none());
        assert!(decode_output(&[], "").is_none());
        assert!(decode_output(&[1], "").is_none());

        // Declared id length runs past the end of the frame.
        assert!(decode_input(&[2, 5, b'a', b'b']).is_none());
        assert!(decode_output(&[1, 255, b'a'], "a").is_none());
    }

    #[test]
    fn test_non_utf8_input_id_is_dropped() {
        assert!(decode_input(&[2, 2, 0xff, 0xfe, b'x']).is_none());
    }

    #[test]
    fn test_truncated_real_frame_never_matches() {
        let frame = encode_output("conn-a", b"AAA").unwrap();
        for cut in 0..HEADER_LEN + "conn-a".len() {
            assert!(decode_output(&frame[..cut], "conn-a").is_none(), "cut at {cut}");
        }
    }
}
