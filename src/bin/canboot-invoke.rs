//! Flood pings at one or more nodes until the bootloader has locked onto
//! a valid datagram.

use std::time::Duration;

use clap::Parser;

use canboot_host::cli::{exit_code_for, ConnectionArgs};
use canboot_host::error::{Error, Result};
use canboot_host::workflow::{invoke_bootloader, scan_all_nodes, InvokeOptions};

/// Wake bootloader nodes by flooding pings at them.
#[derive(Parser)]
#[command(name = "canboot-invoke")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Discover targets by broadcasting to every possible node ID instead
    /// of taking an explicit list.
    #[arg(short = 'a', long)]
    all: bool,

    device_ids: Vec<u8>,
}

fn main() {
    let cli = Cli::parse();
    cli.connection.init_logging();

    let code = run(&cli).unwrap_or_else(|err| {
        tracing::error!("{err}");
        exit_code_for(&err)
    });
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let mut channel = cli.connection.open()?;

    let targets = if cli.all {
        scan_all_nodes(channel.as_mut(), Duration::from_millis(200))?
    } else if cli.device_ids.is_empty() {
        return Err(Error::Usage("no device IDs given and --all not set".into()));
    } else {
        cli.device_ids.clone()
    };

    invoke_bootloader(channel.as_mut(), &targets, &InvokeOptions::default(), |node| {
        println!("{node} online");
    })?;

    Ok(0)
}
