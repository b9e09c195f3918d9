//! Datagram encoding/decoding.
//!
//! A datagram is the protocol-level message reassembled from one or more
//! CAN frames from a single source. The wire layout is:
//!
//! ```text
//! offset 0: u32 LE   CRC32 of everything following
//! offset 4: u8       destination count M (1..=127)
//! offset 5: M bytes  destination node IDs (each 1..127)
//! offset 5+M: u32 LE payload length L
//! offset 9+M: L bytes payload
//! ```
//!
//! The decoder is pure and never raises on malformed input: callers get a
//! [`Decoded`] classification and decide what to do with it. Feeding the
//! same buffer twice always yields the same classification.

const HEADER_LEN: usize = 4; // CRC32
const COUNT_LEN: usize = 1; // M

/// Result of attempting to decode a (possibly partial) datagram buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes yet to tell; keep accumulating.
    NeedMore,
    /// Enough bytes to see the whole datagram, but it is malformed:
    /// CRC mismatch, zero destinations, or an out-of-range destination ID.
    Invalid,
    /// A complete, CRC-verified datagram.
    Complete {
        payload: Vec<u8>,
        destinations: Vec<u8>,
    },
}

/// Encode `payload` addressed to `destinations` into wire bytes.
///
/// `destinations` must be non-empty, at most 127 entries, each in
/// `1..=127`; this is an internal invariant of the core (the transaction
/// engine and flashing workflow only ever construct valid destination
/// sets), so violations panic rather than return a `Result` — mirroring
/// the rest of the crate's treatment of codec misuse as a programming
/// error distinct from malformed *received* data.
pub fn encode_datagram(payload: &[u8], destinations: &[u8]) -> Vec<u8> {
    assert!(
        !destinations.is_empty() && destinations.len() <= 127,
        "destination set must have between 1 and 127 entries"
    );
    assert!(
        destinations.iter().all(|&d| (1..=127).contains(&d)),
        "destination IDs must be in 1..=127"
    );

    let mut body = Vec::with_capacity(COUNT_LEN + destinations.len() + HEADER_LEN + payload.len());
    body.push(destinations.len() as u8);
    body.extend_from_slice(destinations);
    body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    body.extend_from_slice(payload);

    let crc = crc32fast::hash(&body);

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Attempt to decode a datagram from `buf`. Never mutates `buf`.
pub fn decode_datagram(buf: &[u8]) -> Decoded {
    if buf.len() < HEADER_LEN + COUNT_LEN {
        return Decoded::NeedMore;
    }

    let m = buf[HEADER_LEN] as usize;
    let dest_start = HEADER_LEN + COUNT_LEN;
    let dest_end = dest_start + m;
    if buf.len() < dest_end + 4 {
        return Decoded::NeedMore;
    }

    let len_bytes: [u8; 4] = buf[dest_end..dest_end + 4].try_into().unwrap();
    let payload_len = u32::from_le_bytes(len_bytes) as usize;
    let payload_start = dest_end + 4;
    let total_len = payload_start + payload_len;

    if buf.len() < total_len {
        return Decoded::NeedMore;
    }

    if m == 0 {
        return Decoded::Invalid;
    }

    let destinations = &buf[dest_start..dest_end];
    if destinations.iter().any(|&d| !(1..=127).contains(&d)) {
        return Decoded::Invalid;
    }

    let expected_crc = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let actual_crc = crc32fast::hash(&buf[HEADER_LEN..total_len]);
    if expected_crc != actual_crc {
        return Decoded::Invalid;
    }

    Decoded::Complete {
        payload: buf[payload_start..total_len].to_vec(),
        destinations: destinations.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(b"", &[1]; "empty payload")]
    #[test_case(b"hello", &[1, 2, 3]; "short payload, multiple destinations")]
    #[test_case(&[0xAB; 300], &[127]; "long payload, single destination")]
    fn round_trips(payload: &[u8], destinations: &[u8]) {
        let encoded = encode_datagram(payload, destinations);
        match decode_datagram(&encoded) {
            Decoded::Complete {
                payload: got_payload,
                destinations: got_destinations,
            } => {
                assert_eq!(got_payload, payload);
                assert_eq!(got_destinations, destinations);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn need_more_on_truncated_buffer() {
        let encoded = encode_datagram(b"hello", &[1, 2]);
        for cut in 0..encoded.len() {
            let classification = decode_datagram(&encoded[..cut]);
            assert_eq!(classification, Decoded::NeedMore, "cut at {cut}");
        }
    }

    #[test]
    fn invalid_on_zero_destinations() {
        // Hand-craft a datagram with M=0 but otherwise well-formed framing.
        let mut body = Vec::new();
        body.push(0u8);
        body.extend_from_slice(&0u32.to_le_bytes());
        let crc = crc32fast::hash(&body);
        let mut buf = crc.to_le_bytes().to_vec();
        buf.extend_from_slice(&body);
        assert_eq!(decode_datagram(&buf), Decoded::Invalid);
    }

    #[test]
    fn invalid_on_out_of_range_destination() {
        let mut body = Vec::new();
        body.push(1u8);
        body.push(0); // destination 0 is out of range
        body.extend_from_slice(&0u32.to_le_bytes());
        let crc = crc32fast::hash(&body);
        let mut buf = crc.to_le_bytes().to_vec();
        buf.extend_from_slice(&body);
        assert_eq!(decode_datagram(&buf), Decoded::Invalid);
    }

    #[test]
    fn single_bit_flip_is_rejected() {
        let encoded = encode_datagram(b"some command bytes", &[5, 6]);
        for byte_idx in 0..encoded.len() {
            for bit in 0..8u8 {
                let mut corrupted = encoded.clone();
                corrupted[byte_idx] ^= 1 << bit;
                let classification = decode_datagram(&corrupted);
                assert_ne!(
                    classification,
                    Decoded::Complete {
                        payload: b"some command bytes".to_vec(),
                        destinations: vec![5, 6],
                    },
                    "byte {byte_idx} bit {bit} should have been rejected"
                );
            }
        }
    }

    #[test]
    fn decoding_is_idempotent() {
        let encoded = encode_datagram(b"idempotent", &[9]);
        assert_eq!(decode_datagram(&encoded), decode_datagram(&encoded));
    }
}
