//! Firmware target check from the ELF header.

use crate::error::{AppResult, GatewayError};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::warn;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ET_EXEC: u16 = 2;
const HEADER_LEN: usize = 20;

/// `ELFCLASS32`
pub const ELFCLASS32: u8 = 1;
/// `EM_ARM`
pub const EM_ARM: u16 = 40;

/// ELF class and machine a node can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfTarget {
    /// `EI_CLASS` (1 = 32 bits, 2 = 64 bits)
    pub class: u8,
    /// `e_machine`
    pub machine: u16,
}

impl ElfTarget {
    /// 32 bits ARM, the target of most testbed boards.
    pub const ARM32: ElfTarget = ElfTarget {
        class: ELFCLASS32,
        machine: EM_ARM,
    };

    /// Read the target of an executable ELF file.
    pub fn read(path: &Path) -> AppResult<Self> {
        let mut header = [0u8; HEADER_LEN];
        File::open(path)?
            .read_exact(&mut header)
            .map_err(|_| GatewayError::InvalidFirmware("Not a valid elf file".to_string()))?;
        Self::parse(&header)
    }

    fn parse(header: &[u8; HEADER_LEN]) -> AppResult<Self> {
        if header[..4] != ELF_MAGIC {
            return Err(GatewayError::InvalidFirmware(
                "Not a valid elf file".to_string(),
            ));
        }
        let half = |offset: usize| {
            let bytes = [header[offset], header[offset + 1]];
            match header[5] {
                2 => Ok(u16::from_be_bytes(bytes)),
                1 => Ok(u16::from_le_bytes(bytes)),
                other => Err(GatewayError::InvalidFirmware(format!(
                    "Unknown elf data encoding {}",
                    other
                ))),
            }
        };

        let e_type = half(16)?;
        if e_type != ET_EXEC {
            return Err(GatewayError::InvalidFirmware(format!(
                "Not an executable elf file: type {}",
                e_type
            )));
        }
        Ok(Self {
            class: header[4],
            machine: half(18)?,
        })
    }

    /// True if `firmware` runs on this target. No firmware is compatible.
    pub fn is_compatible(&self, firmware: Option<&Path>) -> bool {
        let Some(path) = firmware else {
            return true;
        };
        match Self::read(path) {
            Ok(target) => target == *self,
            Err(err) => {
                warn!(firmware = %path.display(), %err, "Invalid firmware");
                false
            }
        }
    }
}
