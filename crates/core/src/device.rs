//! Host-facing device: the emulated unit plus the patch memory mirror and
//! the remote front panel.
//!
//! Incoming SysEx is offered to the remote control first, then to the
//! patch mirror. Only what neither of them fully handles reaches the
//! firmware. Everything the firmware sends is run through the mirror as
//! well so that it stays in sync with edits made on the unit itself.

use tracing::{info, warn};

use crate::config::HardwareConfig;
use crate::cores::{DspCore, Mc68kCore};
use crate::error::{Error, Result};
use crate::hardware::{AUDIO_INPUTS, AUDIO_OUTPUTS, SAMPLE_RATE};
use crate::microq::MicroQ;
use crate::midi::{MidiBufferParser, MidiEvent};
use crate::peripherals::ButtonType;
use crate::remote::SysexRemoteControl;
use crate::state::{Origin, Responses, State};

/// Audio frames run per poll while waiting for the firmware to boot.
const BOOT_FRAMES: usize = 8;
const BOOT_POLL_LIMIT: usize = 1 << 18;

pub struct Device {
    mq: MicroQ,
    state: State,
    custom_sysex_out: Vec<MidiEvent>,
    midi_out_parser: MidiBufferParser,
    midi_out_buffer: Vec<u8>,
    extra_latency: usize,
}

impl Device {
    /// Boot the firmware and bring it into a known state.
    ///
    /// Play is held during boot: a flash that only holds an OS update asks
    /// for confirmation before it continues.
    pub fn new(
        rom_image: Vec<u8>,
        uc: Box<dyn Mc68kCore>,
        dsps: Vec<Box<dyn DspCore>>,
        config: &HardwareConfig,
    ) -> Result<Self> {
        let mut mq = MicroQ::new(rom_image, uc, dsps, config)?;

        mq.set_button(ButtonType::Play, true);
        let mut polls = 0;
        while !mq.is_boot_completed() {
            if polls == BOOT_POLL_LIMIT {
                return Err(Error::BootTimeout);
            }
            mq.process_frames(BOOT_FRAMES);
            polls += 1;
        }
        mq.set_button(ButtonType::Play, false);

        let mut state = State::new();
        if !state.create_init_state(&mut mq, None) {
            warn!("continuing without a cached global dump");
        }
        info!("device ready");

        Ok(Device {
            mq,
            state,
            custom_sysex_out: Vec::new(),
            midi_out_parser: MidiBufferParser::new(),
            midi_out_buffer: Vec::new(),
            extra_latency: 0,
        })
    }

    pub fn sample_rate(&self) -> f32 {
        SAMPLE_RATE as f32
    }

    pub fn channel_count_in(&self) -> usize {
        AUDIO_INPUTS
    }

    pub fn channel_count_out(&self) -> usize {
        AUDIO_OUTPUTS
    }

    pub fn set_extra_latency_samples(&mut self, frames: usize) {
        self.extra_latency = frames;
    }

    pub fn microq(&self) -> &MicroQ {
        &self.mq
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    fn flush_state_to_device(&mut self) {
        for msg in self.state.take_device_messages() {
            self.mq.send_midi(&msg);
        }
    }

    /// Replies that can be produced without the firmware go to `responses`.
    pub fn send_midi(&mut self, ev: &MidiEvent, responses: &mut Vec<MidiEvent>) -> bool {
        if let Some(sysex) = ev.sysex() {
            if SysexRemoteControl::new(&self.mq).receive(&mut self.custom_sysex_out, sysex) {
                return true;
            }

            let mut r = Responses::new();
            let handled = self.state.receive(&mut r, sysex, Origin::External);
            self.flush_state_to_device();
            responses.extend(r.into_iter().map(MidiEvent::SysEx));

            // a cache miss has already been forwarded by the mirror
            if handled {
                return true;
            }
        }

        self.mq.send_midi_event(ev);
        true
    }

    /// Collect the firmware's MIDI output, answers from the mirror and
    /// pending remote control messages. Remote control messages come first.
    pub fn read_midi_out(&mut self, out: &mut Vec<MidiEvent>) {
        self.mq.receive_midi(&mut self.midi_out_buffer);
        self.midi_out_parser.write(&self.midi_out_buffer);
        self.midi_out_buffer.clear();

        let mut events = Vec::new();
        self.midi_out_parser.get_events(&mut events);

        let mut responses = Responses::new();
        for ev in &events {
            self.state.receive_event(&mut responses, ev, Origin::Device);
        }
        self.flush_state_to_device();

        out.append(&mut self.custom_sysex_out);
        out.extend(events);
        out.extend(responses.into_iter().map(MidiEvent::SysEx));
    }

    pub fn process_audio(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        self.mq.process(inputs, outputs, frames, self.extra_latency);

        let dirty = self.mq.get_dirty_flags();
        SysexRemoteControl::new(&self.mq).handle_dirty_flags(&mut self.custom_sysex_out, dirty);
    }

    pub fn get_state(&self) -> Vec<u8> {
        self.state.get_state()
    }

    pub fn set_state(&mut self, data: &[u8]) -> bool {
        let ok = self.state.set_state(data);
        self.flush_state_to_device();
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDsp, MockUc};
    use crate::state::{create_dump, DumpType};
    use crate::sysex::buffer;

    fn device(uc: MockUc) -> Device {
        Device::new(
            crate::rom::test_image(),
            Box::new(uc),
            vec![Box::new(MockDsp::new())],
            &HardwareConfig::default(),
        )
        .unwrap()
    }

    fn run(dev: &mut Device, frames: usize) {
        let mut outs = vec![vec![0.0f32; frames]; AUDIO_OUTPUTS];
        let mut refs: Vec<&mut [f32]> = outs.iter_mut().map(|o| o.as_mut_slice()).collect();
        dev.process_audio(&[], &mut refs, frames);
    }

    #[test]
    fn test_boot_creates_init_state() {
        let dev = device(MockUc::new());
        assert!(dev.state().is_global_valid());
        assert!(!dev.microq().button(ButtonType::Play));
    }

    #[test]
    fn test_boot_timeout() {
        let uc = MockUc {
            hold_boot: true,
            ..MockUc::new()
        };
        let r = Device::new(
            crate::rom::test_image(),
            Box::new(uc),
            vec![Box::new(MockDsp::new())],
            &HardwareConfig::default(),
        );
        assert!(matches!(r, Err(Error::BootTimeout)));
    }

    #[test]
    fn test_cached_global_answered_locally() {
        let mut dev = device(MockUc::new());
        let mut responses = Vec::new();
        let req = MidiEvent::SysEx(vec![0xF0, 0x3E, 0x10, 0x7F, 0x04, 0xF7]);
        assert!(dev.send_midi(&req, &mut responses));
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].sysex().map(|s| s.len()), Some(207));
    }

    #[test]
    fn test_remote_control_output_comes_first() {
        let uc = MockUc {
            echo_midi: true,
            ..MockUc::new()
        };
        let mut dev = device(uc);
        let mut out = Vec::new();
        dev.read_midi_out(&mut out);
        out.clear();

        let mut responses = Vec::new();
        dev.send_midi(&MidiEvent::short(0x90, 64, 1), &mut responses);
        dev.send_midi(&MidiEvent::SysEx(vec![0xF0, 0x3E, 0x10, 0x00, 0x51, 0xF7]), &mut responses);
        assert!(responses.is_empty());
        run(&mut dev, 16);

        dev.read_midi_out(&mut out);
        assert_eq!(out[0].sysex().map(|s| s[4]), Some(0x51));
        assert!(out.contains(&MidiEvent::short(0x90, 64, 1)));
    }

    #[test]
    fn test_state_round_trip() {
        let mut dev = device(MockUc::new());
        let single = create_dump(DumpType::Single, buffer::SINGLE_EDIT_BUFFER_SINGLE_MODE, 0, &[0x11; 383]);
        let mut responses = Vec::new();
        dev.send_midi(&MidiEvent::SysEx(single), &mut responses);

        let blob = dev.get_state();
        assert!(!blob.is_empty());
        assert!(dev.set_state(&blob));
        assert_eq!(dev.get_state(), blob);
    }
}
