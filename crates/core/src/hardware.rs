//! The whole unit: microcontroller core, memory map and one or three DSPs.
//!
//! [`Hardware::process`] runs a single CPU instruction followed by one
//! bridge step per DSP. Once the DSPs produce audio, the CPU may only run
//! as many cycles as the processed audio frames pay for, which keeps the
//! firmware's view of time tied to the sample clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::{BootMode, HardwareConfig};
use crate::cores::{DspCore, Mc68kCore};
use crate::dsp::MqDsp;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::mc::MqMc;
use crate::peripherals::{Am29f, ButtonType, PortId};
use crate::rom::Rom;

pub const SAMPLE_RATE: u32 = 44_100;
pub const AUDIO_INPUTS: usize = 2;
pub const AUDIO_OUTPUTS: usize = 6;

/// Bits of the dirty mask shared with the UI.
pub mod dirty {
    pub const LEDS: u32 = 1 << 0;
    pub const LCD: u32 = 1 << 1;
    pub const LCD_CGRAM: u32 = 1 << 2;
}

/// Sent on boot so that the firmware reports parameter edits as SysEx and
/// accepts remote parameter changes.
const GLOBAL_DEFAULTS: [[u8; 9]; 2] = [
    // Control Send = SysEx
    [0xF0, 0x3E, 0x10, 0x7F, 0x24, 0x00, 0x07, 0x02, 0xF7],
    // Control Receive = on
    [0xF0, 0x3E, 0x10, 0x7F, 0x24, 0x00, 0x08, 0x01, 0xF7],
];

const BOOT_BUTTONS: [ButtonType; 6] = [
    ButtonType::Inst1,
    ButtonType::Inst3,
    ButtonType::Global,
    ButtonType::Shift,
    ButtonType::Multi,
    ButtonType::Play,
];

pub struct Hardware {
    mc: MqMc,
    uc: Box<dyn Mc68kCore>,
    dsps: Vec<MqDsp>,

    midi_in: Vec<u8>,
    audio_inputs: Vec<Vec<i32>>,
    audio_outputs: Vec<Vec<i32>>,
    // voice expansion intermediates
    expansion_b: Vec<Vec<i32>>,
    expansion_c: Vec<Vec<i32>>,
    expansion_a_in: Vec<Vec<i32>>,

    remaining_uc_cycles: i64,
    remaining_uc_cycles_frac: f64,
    esai_frame_index: u64,
    audio_started: bool,
    boot_completed: bool,
    instructions: u64,
    dirty: Arc<AtomicU32>,
}

fn channels(count: usize, frames: usize) -> Vec<Vec<i32>> {
    vec![vec![0; frames]; count]
}

fn resize(buffers: &mut [Vec<i32>], frames: usize) {
    for b in buffers {
        if b.len() < frames {
            b.resize(frames, 0);
        }
    }
}

impl Hardware {
    pub fn new(rom: Rom, uc: Box<dyn Mc68kCore>, dsp_cores: Vec<Box<dyn DspCore>>, config: &HardwareConfig) -> Result<Self> {
        config.validate()?;
        if dsp_cores.len() != config.dsp_count {
            return Err(Error::InvalidConfig(format!(
                "{} DSP cores supplied for dsp_count {}",
                dsp_cores.len(),
                config.dsp_count
            )));
        }

        info!("firmware {}, {} DSP(s)", rom.version(), config.dsp_count);

        let flash = Am29f::new(config.flash_use_write_enable, config.flash_bitreversed_cmd_addr);
        let mc = MqMc::new(rom.into_data(), config.dsp_count, flash);
        let dsps = dsp_cores
            .into_iter()
            .enumerate()
            .map(|(i, core)| MqDsp::new(core, i))
            .collect();

        let mut hw = Hardware {
            mc,
            uc,
            dsps,
            midi_in: Vec::new(),
            audio_inputs: channels(AUDIO_INPUTS, 0),
            audio_outputs: channels(AUDIO_OUTPUTS, 0),
            expansion_b: channels(AUDIO_OUTPUTS, 0),
            expansion_c: channels(AUDIO_OUTPUTS, 0),
            expansion_a_in: channels(AUDIO_INPUTS + AUDIO_OUTPUTS, 0),
            remaining_uc_cycles: 0,
            remaining_uc_cycles_frac: 0.0,
            esai_frame_index: 0,
            audio_started: false,
            boot_completed: false,
            instructions: 0,
            dirty: Arc::new(AtomicU32::new(0)),
        };

        hw.set_boot_mode(config.boot_mode);
        hw.uc.reset(&mut hw.mc);
        Ok(hw)
    }

    /// Hold the button combination for `mode`. Only meaningful before the
    /// firmware has scanned the panel.
    pub fn set_boot_mode(&mut self, mode: BootMode) {
        let buttons = self.mc.buttons_mut();
        for b in BOOT_BUTTONS {
            buttons.set_button(b, false);
        }
        let pressed: &[ButtonType] = match mode {
            BootMode::Default => &[],
            BootMode::FactoryTest => &[ButtonType::Inst1, ButtonType::Global],
            BootMode::EraseFlash => &[ButtonType::Inst3, ButtonType::Global],
            BootMode::WaitForSystemDump => &[ButtonType::Shift, ButtonType::Global],
            BootMode::DspClockResetAndServiceMode => &[ButtonType::Multi],
            BootMode::ServiceMode => &[ButtonType::Global],
            BootMode::MemoryGame => &[ButtonType::Global, ButtonType::Play],
        };
        for &b in pressed {
            buttons.set_button(b, true);
        }
        debug!("boot mode {mode:?}");
    }

    /// Run one CPU instruction and one bridge step per DSP. Returns false
    /// without doing anything if the cycle budget granted by audio
    /// processing is used up.
    pub fn process(&mut self) -> bool {
        if self.audio_started && self.remaining_uc_cycles <= 0 {
            return false;
        }

        let cycles = self.uc.exec(&mut self.mc);
        self.instructions += 1;
        if self.audio_started {
            self.remaining_uc_cycles -= i64::from(cycles);
        }

        self.handle_events();

        for (i, dsp) in self.dsps.iter_mut().enumerate() {
            if let Some(hdi) = self.mc.hdi08_mut(i) {
                dsp.process_uc_step(hdi);
            }
        }

        if self.mc.request_dsp_reset() {
            for dsp in &self.dsps {
                if dsp.have_sent_tx_to_dsp() {
                    error!("dsp {}: reset requested after data was sent, DSP state is lost", dsp.index());
                }
            }
            self.mc.notify_dsp_booted();
        }
        true
    }

    fn handle_events(&mut self) {
        let events: Vec<Event> = self.mc.drain_events().collect();
        for ev in events {
            match ev {
                Event::PortDirection { port: PortId::F, direction: 0xFF } if !self.boot_completed => {
                    self.set_global_default_parameters();
                }
                Event::PortDirection { .. } => {}
                Event::Lcd => self.mark_dirty(dirty::LCD),
                Event::LcdCgRam => self.mark_dirty(dirty::LCD_CGRAM),
                Event::Leds => self.mark_dirty(dirty::LEDS),
            }
        }
    }

    fn mark_dirty(&self, bits: u32) {
        self.dirty.fetch_or(bits, Ordering::AcqRel);
    }

    fn set_global_default_parameters(&mut self) {
        for msg in &GLOBAL_DEFAULTS {
            self.uc.write_midi_in(msg);
        }
        self.boot_completed = true;
        info!("boot completed after {} instructions", self.instructions);
    }

    fn ensure_buffer_size(&mut self, frames: usize) {
        resize(&mut self.audio_inputs, frames);
        resize(&mut self.audio_outputs, frames);
        if self.dsps.len() > 1 {
            resize(&mut self.expansion_b, frames);
            resize(&mut self.expansion_c, frames);
            resize(&mut self.expansion_a_in, frames);
        }
    }

    /// Flush queued MIDI input into the CPU and run the DSPs for `frames`
    /// frames. Audio in/out lives in [`Self::audio_inputs_mut`] and
    /// [`Self::audio_outputs`].
    pub fn process_audio(&mut self, frames: usize) {
        self.ensure_buffer_size(frames);

        if !self.midi_in.is_empty() {
            self.uc.write_midi_in(&self.midi_in);
            self.midi_in.clear();
        }

        let produced = if self.dsps.len() == 3 {
            self.process_audio_expansion(frames)
        } else {
            self.dsps[0]
                .core_mut()
                .process_audio(&self.audio_inputs, &mut self.audio_outputs, frames)
        };

        if produced > 0 && !self.audio_started {
            debug!("audio interface running");
            self.audio_started = true;
        }
        self.esai_frame_index += produced as u64;
        self.advance_uc_budget(produced);
    }

    /// DSP B renders from the inputs, C is fed by B, and A mixes the inputs
    /// with C's output to produce the final signal.
    fn process_audio_expansion(&mut self, frames: usize) -> usize {
        let (a, rest) = self.dsps.split_at_mut(1);
        let (b, c) = rest.split_at_mut(1);

        b[0].core_mut().process_audio(&self.audio_inputs, &mut self.expansion_b, frames);
        c[0].core_mut().process_audio(&self.expansion_b, &mut self.expansion_c, frames);

        for (dst, src) in self
            .expansion_a_in
            .iter_mut()
            .zip(self.audio_inputs.iter().chain(self.expansion_c.iter()))
        {
            dst[..frames].copy_from_slice(&src[..frames]);
        }

        a[0].core_mut()
            .process_audio(&self.expansion_a_in, &mut self.audio_outputs, frames)
    }

    fn advance_uc_budget(&mut self, frames: usize) {
        if frames == 0 {
            return;
        }
        let per_frame = f64::from(self.uc.system_clock_hz()) / f64::from(SAMPLE_RATE);
        let total = per_frame * frames as f64 + self.remaining_uc_cycles_frac;
        let whole = total.floor();
        self.remaining_uc_cycles_frac = total - whole;
        self.remaining_uc_cycles += whole as i64;
    }

    /// Queue bytes for the CPU's MIDI input. Delivered on the next
    /// [`Self::process_audio`].
    pub fn send_midi(&mut self, bytes: &[u8]) {
        self.midi_in.extend_from_slice(bytes);
    }

    /// Append everything the CPU transmitted on its MIDI output.
    pub fn receive_midi(&mut self, out: &mut Vec<u8>) {
        self.uc.read_midi_out(out);
    }

    pub fn audio_inputs_mut(&mut self) -> &mut [Vec<i32>] {
        &mut self.audio_inputs
    }

    pub fn audio_outputs(&self) -> &[Vec<i32>] {
        &self.audio_outputs
    }

    pub fn mc(&self) -> &MqMc {
        &self.mc
    }

    pub fn mc_mut(&mut self) -> &mut MqMc {
        &mut self.mc
    }

    pub fn dsp(&self, index: usize) -> Option<&MqDsp> {
        self.dsps.get(index)
    }

    pub fn dsp_count(&self) -> usize {
        self.dsps.len()
    }

    pub fn is_boot_completed(&self) -> bool {
        self.boot_completed
    }

    pub fn remaining_uc_cycles(&self) -> i64 {
        self.remaining_uc_cycles
    }

    pub fn esai_frame_index(&self) -> u64 {
        self.esai_frame_index
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Shared handle to the dirty mask (see [`dirty`]).
    pub fn dirty_flags(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.dirty)
    }
}
