//! Hardware configuration.
//!
//! Built directly by the host or deserialized from any serde format; the
//! crate itself does not read config files.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Front panel button combination held during power-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BootMode {
    #[default]
    Default,
    FactoryTest,
    EraseFlash,
    WaitForSystemDump,
    DspClockResetAndServiceMode,
    ServiceMode,
    MemoryGame,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// 1 for the plain unit, 3 with the voice expansion board
    pub dsp_count: usize,
    /// Instructions the microcontroller thread runs per lock of the hardware
    pub uc_batch_size: u32,
    pub boot_mode: BootMode,
    /// Flash honours a discrete write-enable line
    pub flash_use_write_enable: bool,
    /// Flash address lines are wired in reverse order
    pub flash_bitreversed_cmd_addr: bool,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        HardwareConfig {
            dsp_count: 1,
            uc_batch_size: 32 * 8,
            boot_mode: BootMode::Default,
            flash_use_write_enable: false,
            flash_bitreversed_cmd_addr: false,
        }
    }
}

impl HardwareConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dsp_count != 1 && self.dsp_count != 3 {
            return Err(Error::InvalidConfig(format!("dsp_count must be 1 or 3, got {}", self.dsp_count)));
        }
        if self.uc_batch_size == 0 {
            return Err(Error::InvalidConfig("uc_batch_size must not be zero".into()));
        }
        Ok(())
    }
}
