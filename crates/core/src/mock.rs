//! Scripted stand-ins for the CPU and DSP cores used by the tests.

use std::collections::VecDeque;

use crate::cores::{Bus, DspCore, Mc68kCore};
use crate::mc::DDR_F;
use crate::peripherals::hdi08;
use crate::state::{create_dump, DumpType};
use crate::sysex::GlobalParameter;

pub const MOCK_CLOCK_HZ: u32 = 44_100 * 64;
pub const MOCK_CYCLES_PER_EXEC: u32 = 4;

const GLOBAL_REQUEST: [u8; 6] = [0xF0, 0x3E, 0x10, 0x7F, 0x04, 0xF7];

/// Firmware stand-in: turns port F to output on its first instruction,
/// which is what the real firmware does once it finished booting, and
/// answers a Global request with a valid dump.
#[derive(Default)]
pub struct MockUc {
    pub instructions: u64,
    pub midi_in: Vec<u8>,
    pub midi_out: Vec<u8>,
    pub resets: u32,
    /// Skip the port F write, the device then never reports boot completion
    pub hold_boot: bool,
    /// Copy every MIDI input byte to the output
    pub echo_midi: bool,
}

impl MockUc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_dump() -> Vec<u8> {
        let mut payload = vec![0u8; DumpType::Global.dump().payload_len()];
        payload[GlobalParameter::Tuning as usize] = 64;
        payload[GlobalParameter::Transpose as usize] = 64;
        create_dump(DumpType::Global, 0, 0, &payload)
    }

    fn answer_requests(&mut self) {
        while let Some(pos) = self
            .midi_in
            .windows(GLOBAL_REQUEST.len())
            .position(|w| w == GLOBAL_REQUEST)
        {
            self.midi_in.drain(..pos + GLOBAL_REQUEST.len());
            self.midi_out.extend_from_slice(&Self::global_dump());
        }
    }
}

impl Mc68kCore for MockUc {
    fn reset(&mut self, _bus: &mut dyn Bus) {
        self.resets += 1;
        self.instructions = 0;
    }

    fn exec(&mut self, bus: &mut dyn Bus) -> u32 {
        if self.instructions == 0 && !self.hold_boot {
            bus.write8(DDR_F, 0xFF);
        }
        self.instructions += 1;
        self.answer_requests();
        MOCK_CYCLES_PER_EXEC
    }

    fn system_clock_hz(&self) -> u32 {
        MOCK_CLOCK_HZ
    }

    fn write_midi_in(&mut self, bytes: &[u8]) {
        if self.echo_midi {
            self.midi_out.extend_from_slice(bytes);
        }
        self.midi_in.extend_from_slice(bytes);
    }

    fn read_midi_out(&mut self, out: &mut Vec<u8>) {
        out.append(&mut self.midi_out);
    }
}

/// DSP stand-in. Every word it receives comes back incremented on its next
/// slice, HF0/HF1 are mirrored onto HF2/HF3 and audio is passed through.
#[derive(Default)]
pub struct MockDsp {
    pub rx: VecDeque<u32>,
    pub tx: VecDeque<u32>,
    pub host_flags_01: u8,
    pub pending_irqs: VecDeque<u8>,
    pub taken_irqs: Vec<u8>,
    /// Never drop HF2, as a DSP stuck in a long operation would
    pub stuck_hf2: bool,
    pub slices: u64,
    /// Frames produced by `process_audio` stay 0 while false
    pub audio_disabled: bool,
}

impl MockDsp {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DspCore for MockDsp {
    fn exec(&mut self) {
        self.slices += 1;
        if let Some(irq) = self.pending_irqs.pop_front() {
            self.taken_irqs.push(irq);
        }
        if let Some(w) = self.rx.pop_front() {
            self.tx.push_back(w.wrapping_add(1) & 0xFF_FFFF);
        }
    }

    fn hdi_has_tx(&self) -> bool {
        !self.tx.is_empty()
    }

    fn hdi_read_tx(&mut self) -> u32 {
        self.tx.pop_front().unwrap_or(0)
    }

    fn hdi_write_rx(&mut self, word: u32) {
        self.rx.push_back(word);
    }

    fn hdi_rx_full(&self) -> bool {
        self.rx.len() >= 6
    }

    fn hdi_rx_pending(&self) -> bool {
        !self.rx.is_empty()
    }

    fn set_pending_host_flags(&mut self, flags: u8) {
        self.host_flags_01 = flags;
    }

    fn host_flags(&self) -> u8 {
        let mut f = self.host_flags_01 & hdi08::ICR_HOST_FLAGS;
        if self.stuck_hf2 {
            f |= hdi08::ISR_HF2;
        }
        f
    }

    fn inject_interrupt(&mut self, vector: u8) {
        self.pending_irqs.push_back(vector);
    }

    fn has_pending_interrupts(&self) -> bool {
        !self.pending_irqs.is_empty()
    }

    fn process_audio(&mut self, inputs: &[Vec<i32>], outputs: &mut [Vec<i32>], frames: usize) -> usize {
        if self.audio_disabled {
            return 0;
        }
        for (ch, out) in outputs.iter_mut().enumerate() {
            for i in 0..frames.min(out.len()) {
                out[i] = inputs
                    .get(ch % inputs.len().max(1))
                    .and_then(|input| input.get(i))
                    .copied()
                    .unwrap_or(0);
            }
        }
        frames
    }
}
