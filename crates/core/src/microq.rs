//! Threaded front end for [`Hardware`].
//!
//! The microcontroller runs on its own thread in batches of instructions.
//! The host thread drives audio through [`MicroQ::process`], which also
//! moves queued MIDI in and out of the device. Both sides meet at a single
//! mutex around the hardware; the DSPs only ever run inside calls made while
//! that mutex is held.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::config::HardwareConfig;
use crate::cores::{DspCore, Mc68kCore};
use crate::error::{Error, Result};
use crate::hardware::{Hardware, AUDIO_INPUTS, AUDIO_OUTPUTS};
use crate::lcd::DDRAM_SIZE;
use crate::midi::MidiEvent;
use crate::peripherals::{ButtonType, Encoder, Led};
use crate::rom::Rom;
use crate::state::DeviceLink;

/// Full scale of the 24-bit fixed point samples exchanged with the DSP.
const SAMPLE_SCALE: f32 = 8_388_608.0;

pub fn float_to_sample(v: f32) -> i32 {
    (v * SAMPLE_SCALE).clamp(-SAMPLE_SCALE, SAMPLE_SCALE - 1.0) as i32
}

pub fn sample_to_float(v: i32) -> f32 {
    v as f32 / SAMPLE_SCALE
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct HostIo {
    midi_in: Vec<u8>,
    midi_out: Vec<u8>,
    /// Per output channel, rendered samples not yet handed to the host.
    delay: Vec<VecDeque<f32>>,
    latency: usize,
}

impl HostIo {
    fn set_latency(&mut self, latency: usize) {
        if self.delay.len() != AUDIO_OUTPUTS {
            self.delay = vec![VecDeque::new(); AUDIO_OUTPUTS];
        }
        if latency == self.latency {
            return;
        }
        for q in &mut self.delay {
            if latency > self.latency {
                for _ in 0..latency - self.latency {
                    q.push_front(0.0);
                }
            } else {
                let drop = (self.latency - latency).min(q.len());
                q.drain(..drop);
            }
        }
        self.latency = latency;
    }
}

pub struct MicroQ {
    hw: Arc<Mutex<Hardware>>,
    io: Mutex<HostIo>,
    destroy: Arc<AtomicBool>,
    dirty: Arc<AtomicU32>,
    uc_thread: Option<JoinHandle<()>>,
}

impl MicroQ {
    /// Boot the unit. Refuses with [`Error::FirmwareMissing`] if the image
    /// is not a valid firmware.
    pub fn new(
        rom_image: Vec<u8>,
        uc: Box<dyn Mc68kCore>,
        dsps: Vec<Box<dyn DspCore>>,
        config: &HardwareConfig,
    ) -> Result<Self> {
        let rom = Rom::new(rom_image).map_err(|e| {
            error!("refusing to boot: {e}");
            Error::FirmwareMissing
        })?;

        let hw = Hardware::new(rom, uc, dsps, config)?;
        let dirty = hw.dirty_flags();
        let hw = Arc::new(Mutex::new(hw));
        let destroy = Arc::new(AtomicBool::new(false));

        let uc_thread = {
            let hw = Arc::clone(&hw);
            let destroy = Arc::clone(&destroy);
            let batch = config.uc_batch_size;
            thread::Builder::new()
                .name("microq-uc".into())
                .spawn(move || uc_thread_func(hw, destroy, batch))?
        };

        Ok(MicroQ {
            hw,
            io: Mutex::new(HostIo::default()),
            destroy,
            dirty,
            uc_thread: Some(uc_thread),
        })
    }

    /// Render `frames` frames. `inputs` holds up to two channels, `outputs`
    /// up to six. Output is delayed by `latency` frames; changing it inserts
    /// silence or drops buffered audio.
    pub fn process(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize, latency: usize) {
        let mut hw = lock(&self.hw);
        let mut io = lock(&self.io);

        for (ch, buf) in hw.audio_inputs_mut().iter_mut().enumerate().take(AUDIO_INPUTS) {
            if buf.len() < frames {
                buf.resize(frames, 0);
            }
            let src = inputs.get(ch);
            for (i, s) in buf.iter_mut().take(frames).enumerate() {
                *s = src.and_then(|c| c.get(i)).map_or(0, |&v| float_to_sample(v));
            }
        }

        if !io.midi_in.is_empty() {
            hw.send_midi(&io.midi_in);
            io.midi_in.clear();
        }

        hw.process_audio(frames);
        hw.receive_midi(&mut io.midi_out);

        io.set_latency(latency);
        for (ch, q) in io.delay.iter_mut().enumerate() {
            if let Some(rendered) = hw.audio_outputs().get(ch) {
                q.extend(rendered[..frames].iter().map(|&s| sample_to_float(s)));
            }
        }
        for (ch, q) in io.delay.iter_mut().enumerate() {
            let out = outputs.get_mut(ch);
            match out {
                Some(out) => {
                    for s in out.iter_mut().take(frames) {
                        *s = q.pop_front().unwrap_or(0.0);
                    }
                    // short host buffer, drop what did not fit
                    let n = frames.saturating_sub(out.len()).min(q.len());
                    q.drain(..n);
                }
                None => {
                    let n = frames.min(q.len());
                    q.drain(..n);
                }
            }
        }
    }

    /// Run the device for `frames` frames with silent input, discarding
    /// the audio.
    pub fn process_frames(&self, frames: usize) {
        let mut outputs: Vec<Vec<f32>> = vec![vec![0.0; frames]; AUDIO_OUTPUTS];
        let mut refs: Vec<&mut [f32]> = outputs.iter_mut().map(|o| o.as_mut_slice()).collect();
        self.process(&[], &mut refs, frames, 0);
    }

    pub fn send_midi(&self, bytes: &[u8]) {
        lock(&self.io).midi_in.extend_from_slice(bytes);
    }

    pub fn send_midi_event(&self, ev: &MidiEvent) {
        ev.write_bytes(&mut lock(&self.io).midi_in);
    }

    /// Take everything the device sent since the last call.
    pub fn receive_midi(&self, out: &mut Vec<u8>) {
        let mut io = lock(&self.io);
        if out.is_empty() {
            std::mem::swap(out, &mut io.midi_out);
        } else {
            out.append(&mut io.midi_out);
        }
    }

    pub fn set_button(&self, button: ButtonType, pressed: bool) {
        lock(&self.hw).mc_mut().buttons_mut().set_button(button, pressed);
    }

    pub fn button(&self, button: ButtonType) -> bool {
        lock(&self.hw).mc().buttons().button(button)
    }

    pub fn rotate_encoder(&self, encoder: Encoder, amount: i32) {
        lock(&self.hw).mc_mut().buttons_mut().rotate(encoder, amount);
    }

    pub fn encoder(&self, encoder: Encoder) -> u8 {
        lock(&self.hw).mc().buttons().encoder_value(encoder)
    }

    pub fn led(&self, led: Led) -> bool {
        lock(&self.hw).mc().leds().led(led)
    }

    pub fn read_lcd(&self) -> [u8; DDRAM_SIZE] {
        *lock(&self.hw).mc().lcd().ddram()
    }

    pub fn read_custom_lcd_character(&self, index: usize) -> Option<[u8; 8]> {
        lock(&self.hw).mc().lcd().cg_data(index)
    }

    /// Changes since the last call, see [`crate::hardware::dirty`].
    pub fn get_dirty_flags(&self) -> u32 {
        self.dirty.swap(0, Ordering::AcqRel)
    }

    pub fn is_boot_completed(&self) -> bool {
        lock(&self.hw).is_boot_completed()
    }

    /// Run `f` with exclusive access to the hardware.
    pub fn with_hardware<R>(&self, f: impl FnOnce(&mut Hardware) -> R) -> R {
        f(&mut lock(&self.hw))
    }
}

fn uc_thread_func(hw: Arc<Mutex<Hardware>>, destroy: Arc<AtomicBool>, batch: u32) {
    debug!("uc thread started");
    while !destroy.load(Ordering::Acquire) {
        let ran = {
            let mut hw = lock(&hw);
            (0..batch).take_while(|_| hw.process()).count()
        };
        if ran == 0 {
            thread::yield_now();
        }
    }
    destroy.store(false, Ordering::Release);
    debug!("uc thread stopped");
}

impl DeviceLink for MicroQ {
    fn send_sysex(&mut self, data: &[u8]) {
        MicroQ::send_midi(self, data);
    }

    fn process(&mut self, frames: usize) {
        self.process_frames(frames);
    }

    fn receive_midi(&mut self, out: &mut Vec<u8>) {
        MicroQ::receive_midi(self, out);
    }
}

impl Drop for MicroQ {
    fn drop(&mut self) {
        let Some(handle) = self.uc_thread.take() else {
            return;
        };
        self.destroy.store(true, Ordering::Release);
        // the CPU thread may be waiting for cycle budget, keep audio going
        // until it noticed
        while self.destroy.load(Ordering::Acquire) && !handle.is_finished() {
            self.process_frames(1);
        }
        if handle.join().is_err() {
            error!("uc thread panicked");
        }
    }
}
