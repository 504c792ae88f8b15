//! Zero-run-length codec
//!
//! The simulator protocol compresses runs of zero bytes in the packet body:
//! a `0x00` byte followed by a count byte N stands for N zero bytes. The
//! header (6 bytes plus the extra-byte count in byte 5) and anything past the
//! body (the appended-ACK trailer) stay uncompressed.

use crate::header::HEADER_SIZE;
use crate::CodecError;

/// Longest run a single `(0x00, count)` pair can express
const MAX_RUN: usize = 255;

/// Length of the uncompressed header region, derived from the buffer itself.
fn header_len(input: &[u8]) -> Result<usize, CodecError> {
    if input.len() < HEADER_SIZE {
        return Err(CodecError::InsufficientData {
            expected: HEADER_SIZE,
            actual: input.len(),
        });
    }
    Ok(HEADER_SIZE + input[5] as usize)
}

/// Expand a zero-coded packet.
///
/// `body_len` is the offset where the compressed body ends; bytes from there
/// on (the appended-ACK trailer, if any) are copied verbatim. The header is
/// copied verbatim as well.
pub fn zero_decode(input: &[u8], body_len: usize) -> Result<Vec<u8>, CodecError> {
    let header = header_len(input)?;
    if body_len < header || body_len > input.len() {
        return Err(CodecError::InsufficientData {
            expected: body_len,
            actual: input.len(),
        });
    }

    let mut out = Vec::with_capacity(input.len() * 2);
    out.extend_from_slice(&input[..header]);

    let mut i = header;
    while i < body_len {
        let byte = input[i];
        i += 1;
        if byte == 0 {
            if i >= body_len {
                return Err(CodecError::TruncatedRun);
            }
            let run = input[i] as usize;
            i += 1;
            out.resize(out.len() + run, 0);
        } else {
            out.push(byte);
        }
    }

    out.extend_from_slice(&input[body_len..]);
    Ok(out)
}

/// Compress the body of a packet, leaving the header untouched.
///
/// Returns `None` when the encoded form would not be smaller than the
/// original; the caller must then clear the zero-coded flag bit and send the
/// buffer uncompressed. That fallback is wire-visible and must be preserved.
pub fn zero_encode(input: &[u8]) -> Option<Vec<u8>> {
    let header = header_len(input).ok()?;

    let mut out = Vec::with_capacity(input.len());
    out.extend_from_slice(&input[..header]);

    let mut i = header;
    while i < input.len() {
        if input[i] == 0 {
            let mut run = 0usize;
            while i < input.len() && input[i] == 0 {
                run += 1;
                i += 1;
            }
            while run > MAX_RUN {
                out.push(0);
                out.push(MAX_RUN as u8);
                run -= MAX_RUN;
            }
            out.push(0);
            out.push(run as u8);
        } else {
            out.push(input[i]);
            i += 1;
        }
        if out.len() >= input.len() {
            return None;
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_header(body: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x80, 0, 0, 0, 1, 0];
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_roundtrip_simple() {
        let packet = with_header(&[1, 2, 0, 0, 0, 0, 3]);
        let encoded = zero_encode(&packet).unwrap();
        assert!(encoded.len() < packet.len());

        let decoded = zero_decode(&encoded, encoded.len()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_run_at_end() {
        let packet = with_header(&[7, 0, 0, 0, 0, 0]);
        let encoded = zero_encode(&packet).unwrap();
        let decoded = zero_decode(&encoded, encoded.len()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_long_run_splits() {
        let mut body = vec![9u8];
        body.extend(std::iter::repeat(0).take(300));
        let packet = with_header(&body);

        let encoded = zero_encode(&packet).unwrap();
        // 300 zeros need two (0x00, count) pairs
        assert_eq!(&encoded[6..], &[9, 0, 255, 0, 45]);

        let decoded = zero_decode(&encoded, encoded.len()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_incompressible_falls_back() {
        // No zeros at all: every byte copies through, so the encoded form
        // cannot shrink and encoding must be abandoned.
        let packet = with_header(&[1, 2, 3, 4, 5]);
        assert!(zero_encode(&packet).is_none());
    }

    #[test]
    fn test_single_zero_grows() {
        // A lone zero encodes to two bytes; the buffer grows, so fall back.
        let packet = with_header(&[1, 0, 2]);
        assert!(zero_encode(&packet).is_none());
    }

    #[test]
    fn test_trailer_copied_verbatim() {
        // Body is [0 x 4], trailer is a fake ACK block that must not be
        // expanded even though it contains zeros.
        let mut packet = with_header(&[0, 0, 0, 0]);
        let trailer = [0u8, 0, 0, 9, 1];
        let body_len = packet.len();
        packet.extend_from_slice(&trailer);

        let encoded = zero_encode(&packet[..body_len]).unwrap();
        let mut on_wire = encoded.clone();
        on_wire.extend_from_slice(&trailer);

        let decoded = zero_decode(&on_wire, encoded.len()).unwrap();
        assert_eq!(&decoded[..body_len], &packet[..body_len]);
        assert_eq!(&decoded[body_len..], &trailer);
    }

    #[test]
    fn test_truncated_run_rejected() {
        let packet = with_header(&[1, 0]);
        assert_eq!(
            zero_decode(&packet, packet.len()),
            Err(CodecError::TruncatedRun)
        );
    }

    #[test]
    fn test_extra_header_bytes_preserved() {
        let mut packet = vec![0x80, 0, 0, 0, 1, 2, 0xAA, 0xBB];
        packet.extend_from_slice(&[0, 0, 0, 5]);
        let encoded = zero_encode(&packet).unwrap();
        // Extra header bytes stay verbatim
        assert_eq!(&encoded[..8], &packet[..8]);
        let decoded = zero_decode(&encoded, encoded.len()).unwrap();
        assert_eq!(decoded, packet);
    }
}
