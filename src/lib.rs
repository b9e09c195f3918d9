//! Host-side client library for the CVRA CAN-bus bootloader protocol.
//!
//! The protocol core (frame codec, datagram codec, fragmenter/reassembler,
//! command encoder, transaction engine, flashing workflow) depends only on
//! the [`channel::FrameChannel`] capability. Concrete transports
//! ([`adapter`]) and the ELF/objcopy helper ([`elf`]) are ambient
//! collaborators, not part of the core.

pub mod adapter;
pub mod channel;
pub mod cli;
pub mod command;
pub mod config;
pub mod datagram;
pub mod elf;
pub mod error;
pub mod frame;
pub mod reassembler;
pub mod transaction;
pub mod workflow;

pub use error::{Error, Result};
