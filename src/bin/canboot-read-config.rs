//! Read and print the configuration map of one or more bootloader nodes.

use std::time::Duration;

use clap::Parser;

use canboot_host::cli::{exit_code_for, ConnectionArgs};
use canboot_host::command::Command;
use canboot_host::config::{config_to_json, ConfigMap};
use canboot_host::error::{Error, Result};
use canboot_host::transaction::{self, TransactionOptions};
use canboot_host::workflow::scan_all_nodes;

/// Print each node's configuration map as a JSON object keyed by node ID.
#[derive(Parser)]
#[command(name = "canboot-read-config")]
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

    let destinations = if cli.all {
        scan_all_nodes(channel.as_mut(), Duration::from_millis(200))?
    } else if cli.device_ids.is_empty() {
        return Err(Error::Usage("no device IDs given and --all not set".into()));
    } else {
        cli.device_ids.clone()
    };

    let bytes = Command::ReadConfig.encode()?;
    let result = transaction::run(
        channel.as_mut(),
        &bytes,
        &destinations,
        &TransactionOptions::default(),
    )?;

    let mut output = serde_json::Map::new();
    for (node, payload) in &result.answers {
        let config: ConfigMap = rmp_serde::from_slice(payload)?;
        output.insert(node.to_string(), config_to_json(&config));
    }

    println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(output))?);
    Ok(0)
}
