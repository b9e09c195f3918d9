//! Fragmentation of datagrams into CAN frames, and reassembly of frames
//! back into datagrams, keyed by source node.

use std::collections::HashMap;

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::datagram::{decode_datagram, Decoded};
use crate::frame::Frame;

/// Bit 7 of a standard CAN identifier: start-of-datagram marker.
const START_OF_DATAGRAM: u32 = 0x80;
/// Bits 6:0: source node ID.
const SOURCE_MASK: u32 = 0x7f;

/// Cap on a per-source reassembly buffer. Malformed or lost traffic must
/// not be allowed to grow a buffer without bound; once exceeded the
/// partial buffer for that source is dropped and reassembly restarts at
/// the next start-of-datagram frame.
const MAX_BUFFERED_BYTES: usize = 64 * 1024;

/// Split an encoded datagram into CAN frames addressed from `source_id`.
///
/// The first frame carries the start-of-datagram bit; every subsequent
/// frame clears it. An empty datagram still produces exactly one frame
/// with `dlc == 0`.
pub fn datagram_to_frames(datagram: &[u8], source_id: u8) -> Vec<Frame> {
    debug_assert!((1..=127).contains(&source_id) || source_id == 0);

    if datagram.is_empty() {
        return vec![Frame::new(
            START_OF_DATAGRAM | (source_id as u32 & SOURCE_MASK),
            &[],
            false,
        )];
    }

    datagram
        .chunks(crate::frame::MAX_PAYLOAD)
        .enumerate()
        .map(|(i, chunk)| {
            let id = (source_id as u32 & SOURCE_MASK)
                | if i == 0 { START_OF_DATAGRAM } else { 0 };
            Frame::new(id, chunk, false)
        })
        .collect()
}

/// A decoded datagram paired with its source node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub payload: Vec<u8>,
    pub destinations: Vec<u8>,
    pub source: u8,
}

/// Per-source reassembly state.
///
/// Holds one growing buffer per source node ID that has sent a partial
/// datagram. Cross-source interleaving is supported for free: each
/// source's buffer is independent.
#[derive(Default)]
pub struct Reassembler {
    buffers: HashMap<u8, BytesMut>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inbound frame. Returns `Some(Received)` exactly when this
    /// frame completed a datagram.
    pub fn feed(&mut self, frame: &Frame) -> Option<Received> {
        if frame.extended {
            return None;
        }

        let src = (frame.id & SOURCE_MASK) as u8;
        let is_start = frame.id & START_OF_DATAGRAM != 0;

        if is_start && self.buffers.contains_key(&src) {
            trace!(source = src, "start-of-datagram preempts partial buffer");
            self.buffers.remove(&src);
        }

        let buf = self.buffers.entry(src).or_default();
        buf.extend_from_slice(frame.payload());

        if buf.len() > MAX_BUFFERED_BYTES {
            debug!(source = src, len = buf.len(), "reassembly buffer overflow, dropping");
            self.buffers.remove(&src);
            return None;
        }

        match decode_datagram(buf) {
            Decoded::Complete {
                payload,
                destinations,
            } => {
                self.buffers.remove(&src);
                Some(Received {
                    payload,
                    destinations,
                    source: src,
                })
            }
            Decoded::Invalid => {
                debug!(source = src, "CRC mismatch or malformed datagram, dropping");
                self.buffers.remove(&src);
                None
            }
            Decoded::NeedMore => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagram::encode_datagram;

    #[test]
    fn fragment_reassemble_round_trip() {
        for source in 1u8..=127 {
            let encoded = encode_datagram(b"a reasonably long payload to span frames", &[10, 20]);
            let frames = datagram_to_frames(&encoded, source);

            let mut reassembler = Reassembler::new();
            let mut received = None;
            for frame in &frames {
                if let Some(r) = reassembler.feed(frame) {
                    received = Some(r);
                }
            }

            let received = received.expect("datagram should have completed");
            assert_eq!(received.payload, b"a reasonably long payload to span frames");
            assert_eq!(received.destinations, vec![10, 20]);
            assert_eq!(received.source, source);
        }
    }

    #[test]
    fn empty_datagram_is_one_frame() {
        let encoded = encode_datagram(b"", &[1]);
        let frames = datagram_to_frames(&encoded, 3);
        let mut reassembler = Reassembler::new();
        let mut received = None;
        for frame in &frames {
            if let Some(r) = reassembler.feed(frame) {
                received = Some(r);
            }
        }
        let received = received.unwrap();
        assert_eq!(received.payload, b"");
    }

    #[test]
    fn interleaved_sources_both_complete() {
        let a = encode_datagram(b"from source a", &[1]);
        let b = encode_datagram(b"from source b, a bit longer than eight bytes", &[2]);

        let frames_a = datagram_to_frames(&a, 11);
        let frames_b = datagram_to_frames(&b, 22);

        let mut reassembler = Reassembler::new();
        let mut results = Vec::new();

        // Interleave: b, a, b, a, b...
        let mut ia = frames_a.iter();
        let mut ib = frames_b.iter();
        loop {
            match (ib.next(), ia.next()) {
                (Some(fb), Some(fa)) => {
                    if let Some(r) = reassembler.feed(fb) {
                        results.push(r);
                    }
                    if let Some(r) = reassembler.feed(fa) {
                        results.push(r);
                    }
                }
                (Some(fb), None) => {
                    if let Some(r) = reassembler.feed(fb) {
                        results.push(r);
                    }
                }
                (None, Some(fa)) => {
                    if let Some(r) = reassembler.feed(fa) {
                        results.push(r);
                    }
                }
                (None, None) => break,
            }
        }

        assert_eq!(results.len(), 2);
        let from_a = results.iter().find(|r| r.source == 11).unwrap();
        let from_b = results.iter().find(|r| r.source == 22).unwrap();
        assert_eq!(from_a.payload, b"from source a");
        assert_eq!(from_b.payload, b"from source b, a bit longer than eight bytes");
    }

    #[test]
    fn start_of_datagram_preempts_partial_buffer() {
        let mut reassembler = Reassembler::new();

        // First partial frame from source 5, start bit set, never completed.
        let first = Frame::new(0x80 | 5, &[0x01, 0x02], false);
        assert!(reassembler.feed(&first).is_none());

        // A second start-of-datagram frame from the same source must discard
        // the first partial buffer rather than concatenate onto it.
        let encoded = encode_datagram(b"fresh", &[9]);
        let frames = datagram_to_frames(&encoded, 5);
        let mut received = None;
        for frame in &frames {
            if let Some(r) = reassembler.feed(frame) {
                received = Some(r);
            }
        }
        let received = received.unwrap();
        assert_eq!(received.payload, b"fresh");
    }

    #[test]
    fn extended_frames_are_ignored() {
        let mut reassembler = Reassembler::new();
        let frame = Frame::new(0x1ABCDEF, &[1, 2, 3], true);
        assert!(reassembler.feed(&frame).is_none());
    }

    #[test]
    fn oversized_buffer_is_dropped() {
        let mut reassembler = Reassembler::new();
        // Feed a start-of-datagram frame followed by enough garbage frames
        // (no start bit) to exceed MAX_BUFFERED_BYTES without ever forming
        // a valid datagram.
        let start = Frame::new(0x80 | 7, &[0u8; 8], false);
        assert!(reassembler.feed(&start).is_none());
        for _ in 0..(MAX_BUFFERED_BYTES / 8 + 2) {
            let frame = Frame::new(7, &[0u8; 8], false);
            reassembler.feed(&frame);
        }
        assert!(!reassembler.buffers.contains_key(&7));
    }
}
