//! Shared CLI plumbing: connection arguments, logging setup, and the
//! error-to-exit-code mapping documented in §6.

use clap::Args;
use tracing_subscriber::EnvFilter;

use crate::adapter::slcan::SlcanChannel;
use crate::adapter::socketcan::SocketCanChannel;
use crate::channel::{ChannelError, FrameChannel, ENETDOWN, ENOBUFS};
use crate::error::{Error, Result};

/// Connection flags shared by all four binaries: exactly one of
/// `-p/--port` (SLCAN-over-serial) or `-i/--interface` (SocketCAN), plus
/// `-v/-vv` verbosity.
#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// Serial port carrying an SLCAN-framed CAN adapter.
    #[arg(short = 'p', long)]
    pub port: Option<String>,

    /// Name of a Linux SocketCAN interface (e.g. `can0`).
    #[arg(short = 'i', long)]
    pub interface: Option<String>,

    #[arg(long, default_value_t = 115_200)]
    pub baud_rate: u32,

    /// Repeatable: `-v` for debug logging, `-vv` for trace.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl ConnectionArgs {
    pub fn open(&self) -> Result<Box<dyn FrameChannel>> {
        match (&self.port, &self.interface) {
            (Some(port), None) => Ok(Box::new(SlcanChannel::open(port, self.baud_rate)?)),
            (None, Some(interface)) => Ok(Box::new(SocketCanChannel::open(interface)?)),
            (None, None) => Err(Error::Usage(
                "exactly one of --port or --interface is required".into(),
            )),
            (Some(_), Some(_)) => Err(Error::Usage(
                "--port and --interface are mutually exclusive".into(),
            )),
        }
    }

    pub fn init_logging(&self) {
        let default_level = match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("canboot_host={default_level}")));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Map a top-level error onto the CLI exit-code contract (§6). Known
/// adapter-level conditions propagate their real errno instead of
/// collapsing into the generic `1`.
pub fn exit_code_for(err: &Error) -> i32 {
    match err {
        Error::Channel(ChannelError::TxBufferOverflow) => ENOBUFS,
        Error::Channel(ChannelError::Down) => ENETDOWN,
        Error::ElfAddress(_) => 2,
        Error::BoardsOffline { .. } => 3,
        Error::VerificationFailed { .. } => 4,
        _ => 1,
    }
}
