//! Flash a firmware image to one or more CVRA bootloader nodes.

use std::path::{Path, PathBuf};

use clap::Parser;

use canboot_host::cli::{exit_code_for, ConnectionArgs};
use canboot_host::elf;
use canboot_host::error::{Error, Result};
use canboot_host::workflow::{flash_image, FlashOptions};

/// Erase, write, and verify a firmware image on a set of bootloader nodes.
#[derive(Parser)]
#[command(name = "canboot-flash")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Path to the firmware image (`.elf` or a raw binary).
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Firmware-visible device class string; erase/write refuse mismatches.
    #[arg(short = 'c', long = "device-class")]
    device_class: String,

    /// Base address override, hex (with or without `0x`). Required for raw
    /// binaries; inferred from the ELF section table otherwise.
    #[arg(short = 'a', long = "base-address")]
    base_address: Option<String>,

    #[arg(long, default_value_t = 2048)]
    page_size: usize,

    /// Jump to the application after a successful verify.
    #[arg(short = 'r', long)]
    run: bool,

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
    let mut channel = cli.connection.open()?;
    let (base_address, binary) = load_image(&cli.file, cli.base_address.as_deref())?;

    let opts = FlashOptions {
        page_size: cli.page_size,
        device_class: cli.device_class.clone(),
    };

    flash_image(
        channel.as_mut(),
        base_address,
        &binary,
        &cli.device_ids,
        &opts,
        cli.run,
    )?;
    Ok(0)
}

fn load_image(path: &Path, base_address_override: Option<&str>) -> Result<(u32, Vec<u8>)> {
    if path.extension().and_then(|e| e.to_str()) == Some("elf") {
        let base = match base_address_override {
            Some(hex) => parse_hex_address(hex)?,
            None => elf::extract_start_address("arm-none-eabi-objdump", path)?,
        };

        let out_path = std::env::temp_dir().join(format!(
            "canboot-flash-{}.bin",
            path.file_stem().and_then(|s| s.to_str()).unwrap_or("image")
        ));
        elf::convert_to_binary("arm-none-eabi-objcopy", path, &out_path)?;
        let binary = std::fs::read(&out_path)?;
        Ok((base, binary))
    } else {
        let base = base_address_override
            .map(parse_hex_address)
            .transpose()?
            .ok_or_else(|| Error::Usage("-a/--base-address is required for non-ELF input".into()))?;
        let binary = std::fs::read(path)?;
        Ok((base, binary))
    }
}

fn parse_hex_address(text: &str) -> Result<u32> {
    let trimmed = text.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(trimmed, 16).map_err(|_| Error::Usage(format!("invalid base address: {text}")))
}
