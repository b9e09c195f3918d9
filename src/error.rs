//! Crate-wide error type.
//!
//! The protocol core never panics on malformed wire input; the datagram
//! codec and reassembler return classifications instead (see
//! [`crate::datagram`]). Only channel-fatal conditions and workflow-level
//! exit conditions become an [`Error`], matching the propagation policy in
//! the design document.

use crate::channel::ChannelError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("CAN channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("no reply from {missing:?} after exhausting the retry limit")]
    RetryExhausted { missing: Vec<u8> },

    #[error("firmware verification failed for nodes {nodes:?}")]
    VerificationFailed { nodes: Vec<u8> },

    #[error("the following boards are offline: {ids:?}")]
    BoardsOffline { ids: Vec<u8> },

    #[error("could not determine the firmware base address: {0}")]
    ElfAddress(String),

    #[error("refusing to write the reserved 'ID' key through update_config")]
    ReservedConfigKey,

    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to encode command payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode reply payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}
