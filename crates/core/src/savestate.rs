//! Save state (quick save / quick load) for a running device.
//!
//! Captures the front panel and the patch memory mirror using bincode
//! serialization with deflate compression. The emulated CPU cores are not
//! part of the snapshot: on load the patch memory is sent back to the
//! firmware, which rebuilds everything else from it.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "MQES"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | DSP count        |  u8
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::hardware::dirty;
use crate::peripherals::Buttons;

/// Magic bytes identifying a save state file.
const MAGIC: &[u8; 4] = b"MQES";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontPanelState {
    pub ddram: Vec<u8>,
    pub cgram: Vec<u8>,
    pub leds: u32,
    pub buttons: Buttons,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveState {
    pub front_panel: FrontPanelState,
    /// Serialized patch memory, see `State::get_state`
    pub patches: Vec<u8>,
}

impl SaveState {
    pub fn capture(device: &Device) -> Self {
        let front_panel = device.microq().with_hardware(|hw| {
            let mc = hw.mc();
            FrontPanelState {
                ddram: mc.lcd().ddram().to_vec(),
                cgram: mc.lcd().cgram().to_vec(),
                leds: mc.leds().states_mask(),
                buttons: mc.buttons().clone(),
            }
        });

        SaveState {
            front_panel,
            patches: device.get_state(),
        }
    }

    /// Returns false if the patch memory could not be applied. The front
    /// panel is restored either way.
    pub fn apply(&self, device: &mut Device) -> bool {
        let panel = &self.front_panel;
        device.microq().with_hardware(|hw| {
            let mc = hw.mc_mut();
            mc.lcd_mut().restore(&panel.ddram, &panel.cgram);
            mc.leds_mut().restore(panel.leds);
            *mc.buttons_mut() = panel.buttons.clone();
            hw.dirty_flags()
                .fetch_or(dirty::LCD | dirty::LCD_CGRAM | dirty::LEDS, Ordering::Relaxed);
        });

        device.set_state(&self.patches)
    }
}

/// Serialize with header and deflate compression.
pub fn encode(state: &SaveState, dsp_count: u8) -> Result<Vec<u8>> {
    let payload = bincode::serialize(state)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(dsp_count);
    out.extend_from_slice(&compressed);
    debug!(raw = payload.len(), compressed = compressed.len(), "save state encoded");
    Ok(out)
}

/// Verify magic, version and DSP count, then decompress.
pub fn decode(data: &[u8], expected_dsp_count: u8) -> Result<SaveState> {
    if data.len() < HEADER_LEN || &data[0..4] != MAGIC {
        return Err(Error::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion {
            found: version,
            expected: FORMAT_VERSION,
        });
    }
    let dsp_count = data[8];
    if dsp_count != expected_dsp_count {
        return Err(Error::InvalidConfig(format!(
            "save state is for {dsp_count} DSPs, device has {expected_dsp_count}"
        )));
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| Error::Decompress(format!("{e:?}")))?;

    Ok(bincode::deserialize(&decompressed)?)
}

pub fn save_to_file(device: &Device, path: &Path) -> Result<()> {
    let data = encode(&SaveState::capture(device), dsp_count(device))?;
    std::fs::write(path, data)?;
    info!(path = %path.display(), "state saved");
    Ok(())
}

pub fn load_from_file(device: &mut Device, path: &Path) -> Result<bool> {
    let data = std::fs::read(path)?;
    let state = decode(&data, dsp_count(device))?;
    info!(path = %path.display(), "state loaded");
    Ok(state.apply(device))
}

/// `microq.bin` → `microq.state`
pub fn state_path(rom_path: &Path) -> PathBuf {
    rom_path.with_extension("state")
}

fn dsp_count(device: &Device) -> u8 {
    device.microq().with_hardware(|hw| hw.dsp_count()) as u8
}
