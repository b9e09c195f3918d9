//! Concrete [`crate::channel::FrameChannel`] implementations.
//!
//! Kept out of the protocol core proper: the core only ever depends on
//! the `FrameChannel` trait, never on these adapters directly.

pub mod slcan;
pub mod socketcan;
