//! Apply a JSON configuration file to one or more bootloader nodes.

use std::path::PathBuf;

use clap::Parser;

use canboot_host::cli::{exit_code_for, ConnectionArgs};
use canboot_host::config::config_from_json;
use canboot_host::error::Result;
use canboot_host::workflow::config_update_and_save;

/// Send `update_config` then `save_config` to every listed node.
#[derive(Parser)]
#[command(name = "canboot-write-config")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// JSON file containing the key/value pairs to write. Must not
    /// contain the reserved `ID` key.
    #[arg(short = 'c', long = "file")]
    file: PathBuf,

    #[arg(required = true)]
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
    let text = std::fs::read_to_string(&cli.file)?;
    let json: serde_json::Value = serde_json::from_str(&text)?;
    // Reject the reserved ID key here, before any network I/O, in
    // addition to the wire-level prohibition in update_config.
    let config = config_from_json(&json)?;

    let mut channel = cli.connection.open()?;

    config_update_and_save(channel.as_mut(), config, &cli.device_ids)?;

    Ok(0)
}
