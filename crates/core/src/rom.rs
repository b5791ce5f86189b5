//! Firmware image.
//!
//! The flash holds 512 KiB. A dump is accepted only if the firmware
//! signature string sits at its fixed offset.

use std::path::Path;

use tracing::error;

use crate::error::{Error, Result};

pub const ROM_SIZE: usize = 0x80000;
pub const SIGNATURE: &[u8] = b"microQ";
pub const SIGNATURE_OFFSET: usize = 0x100;

#[derive(Clone)]
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() != ROM_SIZE {
            error!("rom: size {:#x} does not match {:#x}", data.len(), ROM_SIZE);
            return Err(Error::InvalidRom(format!("size {:#x}, expected {:#x}", data.len(), ROM_SIZE)));
        }
        if !has_signature(&data) {
            error!("rom: firmware signature not found");
            return Err(Error::InvalidRom("firmware signature not found".into()));
        }
        Ok(Rom { data })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::new(std::fs::read(path)?)
    }

    pub fn is_valid(&self) -> bool {
        self.data.len() == ROM_SIZE && has_signature(&self.data)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Firmware version text following the signature, up to the first NUL.
    pub fn version(&self) -> String {
        let start = SIGNATURE_OFFSET;
        let end = self.data[start..]
            .iter()
            .take(32)
            .position(|&b| b == 0)
            .map_or(start + 32, |p| start + p);
        String::from_utf8_lossy(&self.data[start..end]).into_owned()
    }
}

fn has_signature(data: &[u8]) -> bool {
    data.get(SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE.len()) == Some(SIGNATURE)
}

/// Minimal image that passes validation.
#[cfg(test)]
pub(crate) fn test_image() -> Vec<u8> {
    let mut data = vec![0xFFu8; ROM_SIZE];
    let sig = b"microQ V2.23\0";
    data[SIGNATURE_OFFSET..SIGNATURE_OFFSET + sig.len()].copy_from_slice(sig);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_image() {
        let rom = Rom::new(test_image()).unwrap();
        assert!(rom.is_valid());
        assert_eq!(rom.version(), "microQ V2.23");
    }

    #[test]
    fn test_wrong_size() {
        assert!(matches!(Rom::new(vec![0; 1024]), Err(Error::InvalidRom(_))));
    }

    #[test]
    fn test_missing_signature() {
        assert!(matches!(Rom::new(vec![0xFF; ROM_SIZE]), Err(Error::InvalidRom(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let r = Rom::load(Path::new("/nonexistent/mq.bin"));
        assert!(matches!(r, Err(Error::Io(_))));
    }
}
