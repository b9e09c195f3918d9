//! CAN frame value type.
//!
//! A pure value; no I/O, no allocation beyond the fixed 8-byte payload.
//! Equality ignores `dlc` and `extended` to match wire semantics: two
//! frames carrying the same identifier and payload bytes are the same
//! frame regardless of how the `dlc` field got there.

use std::fmt;

/// Maximum payload size of a classic (non-FD) CAN frame.
pub const MAX_PAYLOAD: usize = 8;

/// A single CAN frame.
///
/// `id` is either an 11-bit standard identifier or a 29-bit extended
/// identifier, selected by `extended`. The reassembler only interprets
/// standard frames; extended frames are valid on the wire but carry no
/// bootloader meaning and are discarded by [`crate::reassembler`].
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: u32,
    payload: [u8; MAX_PAYLOAD],
    dlc: u8,
    pub extended: bool,
}

impl Frame {
    /// Build a frame, truncating `data` to 8 bytes if longer.
    ///
    /// Mirrors the reference client's `Frame` constructor, which silently
    /// truncates rather than rejecting oversized input.
    pub fn new(id: u32, data: &[u8], extended: bool) -> Self {
        let len = data.len().min(MAX_PAYLOAD);
        let mut payload = [0u8; MAX_PAYLOAD];
        payload[..len].copy_from_slice(&data[..len]);
        Self {
            id,
            payload,
            dlc: len as u8,
            extended,
        }
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.dlc as usize]
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.payload() == other.payload()
    }
}

impl Eq for Frame {}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "{:08X}", self.id)?;
        } else {
            write!(f, "{:03X}", self.id)?;
        }
        write!(f, " [{}]", self.dlc)?;
        for b in self.payload() {
            write!(f, " {:02X}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_oversized_payload() {
        let data = [0u8; 16];
        let frame = Frame::new(1, &data, false);
        assert_eq!(frame.dlc(), 8);
        assert_eq!(frame.payload().len(), 8);
    }

    #[test]
    fn equality_ignores_dlc_field_identity() {
        let a = Frame::new(5, &[1, 2, 3], false);
        let b = Frame::new(5, &[1, 2, 3], false);
        assert_eq!(a, b);
    }

    #[test]
    fn equality_differs_on_payload() {
        let a = Frame::new(5, &[1, 2, 3], false);
        let b = Frame::new(5, &[1, 2, 4], false);
        assert_ne!(a, b);
    }
}
