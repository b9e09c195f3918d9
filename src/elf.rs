//! ELF base-address extraction and raw-binary conversion.
//!
//! Out of scope for the protocol core (§1): callers hand the core a plain
//! `(base_address, bytes)` pair. This module is the one piece that turns
//! an ELF file into that pair, by shelling out to the same toolchain the
//! reference client used: `objdump -h` to find the base address, `objcopy
//! -O binary` to flatten the image.

use std::path::Path;
use std::process::Command;

use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};

/// Section names checked in order; the first one present in the ELF
/// determines the base address. Mirrors the ordered lookup in
/// `elf_extract_start_address`.
const CANDIDATE_SECTIONS: &[&str] = &[
    ".vector",
    ".vectors",
    ".isr_vector",
    ".isr_vector_table",
    ".vector_table",
    ".text",
];

/// Parse the base address of an ELF file by running `objdump -h` and
/// scanning its section table for the first candidate section name.
pub fn extract_start_address(objdump: &str, elf_path: &Path) -> Result<u32> {
    let output = Command::new(objdump)
        .arg("-h")
        .arg(elf_path)
        .output()
        .map_err(|e| Error::ElfAddress(format!("failed to run {objdump}: {e}")))?;

    if !output.status.success() {
        return Err(Error::ElfAddress(format!(
            "{objdump} exited with {}",
            output.status
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    parse_start_address(&text)
}

/// Pure parser over `objdump -h` text output, split out for testing
/// without shelling out.
fn parse_start_address(objdump_output: &str) -> Result<u32> {
    // A section header line looks like:
    //   2 .vector       000000c0  08000000  08000000  00010000  2**2
    // fields: idx name size vma lma file-offset align
    let line_re = Regex::new(r"(?m)^\s*\d+\s+(\S+)\s+[0-9a-fA-F]+\s+([0-9a-fA-F]+)\s").unwrap();

    let mut sections = std::collections::HashMap::new();
    for caps in line_re.captures_iter(objdump_output) {
        let name = caps[1].to_string();
        let vma = &caps[2];
        if let Ok(addr) = u32::from_str_radix(vma.trim_start_matches("0x"), 16) {
            sections.insert(name, addr);
        }
    }

    for candidate in CANDIDATE_SECTIONS {
        if let Some(addr) = sections.get(*candidate) {
            debug!(section = candidate, address = format!("{addr:#x}"), "found base address");
            return Ok(*addr);
        }
    }

    Err(Error::ElfAddress(
        "no recognized vector/text section found in objdump output".into(),
    ))
}

/// Flatten an ELF file to a raw binary image via `objcopy -O binary`.
pub fn convert_to_binary(objcopy: &str, elf_path: &Path, out_path: &Path) -> Result<()> {
    let status = Command::new(objcopy)
        .arg("-O")
        .arg("binary")
        .arg(elf_path)
        .arg(out_path)
        .status()
        .map_err(|e| Error::ElfAddress(format!("failed to run {objcopy}: {e}")))?;

    if !status.success() {
        return Err(Error::ElfAddress(format!("{objcopy} exited with {status}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_OBJDUMP: &str = "
canboot-test.elf:     file format elf32-littlearm

Sections:
Idx Name          Size      VMA       LMA       File off  Algn
  0 .isr_vector   000000c0  08000000  08000000  00010000  2**2
  1 .text         00004510  080000c0  080000c0  000100c0  2**4
  2 .data         00000194  20000000  080045d0  000145d0  2**2
";

    #[test]
    fn finds_isr_vector_before_text() {
        let addr = parse_start_address(SAMPLE_OBJDUMP).unwrap();
        assert_eq!(addr, 0x0800_0000);
    }

    #[test]
    fn falls_back_to_text_when_no_vector_section() {
        let output = "
Sections:
Idx Name          Size      VMA       LMA       File off  Algn
  0 .text         00004510  080000c0  080000c0  000100c0  2**4
";
        let addr = parse_start_address(output).unwrap();
        assert_eq!(addr, 0x0800_00c0);
    }

    #[test]
    fn errors_when_no_candidate_section_present() {
        let output = "
Sections:
Idx Name          Size      VMA       LMA       File off  Algn
  0 .data         00000194  20000000  080045d0  000145d0  2**2
";
        assert!(matches!(parse_start_address(output), Err(Error::ElfAddress(_))));
    }
}
