//! Typed bootloader operations and their wire encoding.
//!
//! Each [`Command`] maps to an opcode whose numeric value is part of the
//! device firmware contract (§4.5) and must not change. A command encodes
//! to an ordered, binary-packed object *stream*: the opcode followed by
//! zero or more independently packed MessagePack values, concatenated —
//! not wrapped in a single array object, so the device's incremental
//! unpacker can consume one object at a time.

use serde_bytes::ByteBuf;

use crate::config::ConfigMap;
use crate::error::Result;

/// Wire-visible opcode values. MUST match the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    JumpToMain = 1,
    CrcRegion = 2,
    EraseFlashPage = 3,
    WriteFlash = 4,
    Ping = 5,
    ReadConfig = 6,
    UpdateConfig = 7,
    SaveConfig = 8,
}

/// A typed bootloader operation, ready to be encoded into a datagram
/// payload.
#[derive(Debug, Clone)]
pub enum Command {
    JumpToMain,
    CrcRegion { address: u32, length: u32 },
    EraseFlashPage { address: u32, device_class: String },
    WriteFlash {
        chunk: Vec<u8>,
        address: u32,
        device_class: String,
    },
    Ping,
    ReadConfig,
    UpdateConfig(ConfigMap),
    SaveConfig,
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::JumpToMain => Opcode::JumpToMain,
            Command::CrcRegion { .. } => Opcode::CrcRegion,
            Command::EraseFlashPage { .. } => Opcode::EraseFlashPage,
            Command::WriteFlash { .. } => Opcode::WriteFlash,
            Command::Ping => Opcode::Ping,
            Command::ReadConfig => Opcode::ReadConfig,
            Command::UpdateConfig(_) => Opcode::UpdateConfig,
            Command::SaveConfig => Opcode::SaveConfig,
        }
    }

    /// Encode this command's payload for inclusion in a datagram.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = rmp_serde::to_vec(&(self.opcode() as u8))?;
        match self {
            Command::JumpToMain | Command::Ping | Command::ReadConfig | Command::SaveConfig => {}
            Command::CrcRegion { address, length } => {
                out.extend(rmp_serde::to_vec(address)?);
                out.extend(rmp_serde::to_vec(length)?);
            }
            Command::EraseFlashPage {
                address,
                device_class,
            } => {
                out.extend(rmp_serde::to_vec(address)?);
                out.extend(rmp_serde::to_vec(device_class)?);
            }
            Command::WriteFlash {
                chunk,
                address,
                device_class,
            } => {
                out.extend(rmp_serde::to_vec(&ByteBuf::from(chunk.clone()))?);
                out.extend(rmp_serde::to_vec(address)?);
                out.extend(rmp_serde::to_vec(device_class)?);
            }
            Command::UpdateConfig(config) => {
                out.extend(rmp_serde::to_vec(config)?);
            }
        }
        Ok(out)
    }
}

/// Reply status taxonomy for `erase_flash_page` (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseStatus {
    Ok,
    Unspecified,
    BeforeApp,
    AfterApp,
    DeviceClassMismatch,
    NotErasedProperly,
    CorruptDatagram,
    Unknown(u8),
}

impl From<u8> for EraseStatus {
    fn from(code: u8) -> Self {
        match code {
            1 => EraseStatus::Ok,
            0 => EraseStatus::Unspecified,
            10 => EraseStatus::BeforeApp,
            11 => EraseStatus::AfterApp,
            12 => EraseStatus::DeviceClassMismatch,
            13 => EraseStatus::NotErasedProperly,
            CORRUPT_DATAGRAM => EraseStatus::CorruptDatagram,
            other => EraseStatus::Unknown(other),
        }
    }
}

/// Reply status taxonomy for `write_flash` (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Ok,
    Unspecified,
    BeforeApp,
    AfterApp,
    DeviceClassMismatch,
    ImageSizeUnspecified,
    NotErased,
    Unknown(u8),
}

impl From<u8> for WriteStatus {
    fn from(code: u8) -> Self {
        match code {
            1 => WriteStatus::Ok,
            0 => WriteStatus::Unspecified,
            20 => WriteStatus::BeforeApp,
            21 => WriteStatus::AfterApp,
            22 => WriteStatus::DeviceClassMismatch,
            23 => WriteStatus::ImageSizeUnspecified,
            24 => WriteStatus::NotErased,
            other => WriteStatus::Unknown(other),
        }
    }
}

/// Reply interpretation for `crc_region`: either the device's computed
/// CRC32, or one of three sentinel error codes (§7). Note the documented
/// open question: a real CRC that happens to equal 30/31/32 is
/// indistinguishable from the sentinel and is treated as an error — this
/// is inherited, not a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcReply {
    Crc(u32),
    AddressUnspecified,
    LengthUnspecified,
    IllegalAddress,
}

impl From<u32> for CrcReply {
    fn from(value: u32) -> Self {
        match value {
            30 => CrcReply::AddressUnspecified,
            31 => CrcReply::LengthUnspecified,
            32 => CrcReply::IllegalAddress,
            other => CrcReply::Crc(other),
        }
    }
}

/// Device firmware contract: a datagram that failed to parse on the
/// device side is reported back with this status code, which tells the
/// erase-stage retry loop to resend the same page rather than treat it
/// as a terminal failure.
pub const CORRUPT_DATAGRAM: u8 = 0xff;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Command::JumpToMain, &[Opcode::JumpToMain as u8]; "jump_to_main")]
    #[test_case(Command::Ping, &[Opcode::Ping as u8]; "ping")]
    #[test_case(Command::ReadConfig, &[Opcode::ReadConfig as u8]; "read_config")]
    #[test_case(Command::SaveConfig, &[Opcode::SaveConfig as u8]; "save_config")]
    fn no_arg_commands_encode_only_opcode(command: Command, expected_opcode_bytes: &[u8]) {
        let encoded = command.encode().unwrap();
        assert_eq!(&encoded, expected_opcode_bytes);
    }

    #[test]
    fn crc_region_encodes_opcode_then_address_then_length() {
        let command = Command::CrcRegion {
            address: 0x0800_0000,
            length: 4096,
        };
        let encoded = command.encode().unwrap();
        assert_eq!(encoded[0], Opcode::CrcRegion as u8);

        // Decode the stream back: opcode, address, length.
        let mut cursor = &encoded[1..];
        let address: u32 = rmp_serde::from_slice(cursor).unwrap();
        // Advance manually by re-serializing to find its length, since
        // this is a concatenated stream, not a single container.
        let address_len = rmp_serde::to_vec(&address).unwrap().len();
        cursor = &cursor[address_len..];
        let length: u32 = rmp_serde::from_slice(cursor).unwrap();

        assert_eq!(address, 0x0800_0000);
        assert_eq!(length, 4096);
    }

    #[test]
    fn erase_status_maps_known_codes() {
        assert_eq!(EraseStatus::from(1), EraseStatus::Ok);
        assert_eq!(EraseStatus::from(12), EraseStatus::DeviceClassMismatch);
        assert_eq!(EraseStatus::from(CORRUPT_DATAGRAM), EraseStatus::CorruptDatagram);
        assert_eq!(EraseStatus::from(200), EraseStatus::Unknown(200));
    }

    #[test]
    fn crc_reply_treats_sentinel_values_as_errors() {
        assert_eq!(CrcReply::from(30), CrcReply::AddressUnspecified);
        assert_eq!(CrcReply::from(0xDEAD_0000), CrcReply::Crc(0xDEAD_0000));
    }
}
