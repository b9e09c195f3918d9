//! The `FrameChannel` capability.
//!
//! This is the seam between the protocol core and a physical CAN adapter.
//! Concrete adapters (SocketCAN, SLCAN-over-serial) live under
//! [`crate::adapter`] and are deliberately kept out of this module: the
//! core only ever depends on the trait below.

use std::time::Duration;

use crate::frame::Frame;

/// Linux errno values a SocketCAN adapter observes for these two
/// conditions. Named here, next to [`ChannelError`], so the CLI exit-code
/// mapping (`crate::cli::exit_code_for`) and the adapter that classifies
/// the raw `io::Error` (`crate::adapter::socketcan`) share one definition.
pub const ENOBUFS: i32 = 105;
pub const ENETDOWN: i32 = 100;

/// Errors a [`FrameChannel`] implementation may report.
///
/// These map directly onto the CLI exit-code contract: `TxBufferOverflow`
/// and `Down` are distinguished because callers may want to report
/// `errno`-equivalent conditions (ENOBUFS, ENETDOWN) distinctly, while
/// `Fatal` is a catch-all for anything else that makes the channel
/// unusable.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("transmit buffer overflow (bus unacknowledged)")]
    TxBufferOverflow,

    #[error("the link is administratively down")]
    Down,

    #[error("fatal channel error: {0}")]
    Fatal(String),
}

/// Abstract single-frame send / timed-receive capability.
///
/// Implementations are single-owner: the core never calls `send_frame` or
/// `receive_frame` concurrently from more than one logical caller. An
/// adapter that can only offer a blocking read without a deadline must
/// internally run a background thread feeding a bounded queue and drain
/// that queue here (see [`crate::adapter::slcan`] for the reference
/// pattern); the core must never see that worker directly.
pub trait FrameChannel {
    /// Transmit one frame. Must not block indefinitely.
    fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError>;

    /// Return the next inbound frame arriving before `deadline` elapses,
    /// or `None` on timeout. Adapter-specific status frames (e.g. bus-off
    /// notifications) must be filtered out here, never surfaced to the
    /// core as data frames.
    fn receive_frame(&mut self, deadline: Duration) -> Result<Option<Frame>, ChannelError>;
}
