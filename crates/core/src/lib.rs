//! # microq-core
//!
//! Board-level emulation of a microQ synthesizer: a 68k-family
//! microcontroller running the firmware, one to three DSP56300 signal
//! processors behind HDI08 host interfaces, and the front panel around
//! them (HD44780 character LCD, button and encoder matrix, LED latches).
//!
//! The CPU cores themselves are not part of this crate. They plug in
//! through the [`Mc68kCore`] and [`DspCore`] traits; everything between
//! them is emulated here.
//!
//! ## Architecture
//!
//! - [`Device`] - host-facing entry point: boot, MIDI in/out, audio, state
//! - [`MicroQ`] - threaded wrapper around [`Hardware`], float audio I/O
//! - [`Hardware`] - wires the controller and DSPs together, paces the CPU
//! - [`MqMc`] - memory map, ports, flash, LCD, buttons and LEDs
//! - [`MqDsp`] - HDI08 transfers and host flag handshake for one DSP
//! - [`State`] - SysEx patch memory mirror
//! - [`remote`] - front panel over SysEx for remote UIs
//! - [`savestate`] - quick save / quick load
//!
//! ## Audio
//!
//! Two inputs, six outputs at 44.1 kHz. With three DSPs the audio runs
//! through an expansion chain: DSP B and C render first, DSP A mixes
//! their output into the main outputs.

pub mod config;
pub mod cores;
pub mod device;
pub mod dsp;
pub mod error;
pub mod events;
pub mod hardware;
pub mod lcd;
pub mod mc;
pub mod microq;
pub mod midi;
pub mod peripherals;
pub mod remote;
pub mod rom;
pub mod savestate;
pub mod state;
pub mod sysex;

#[cfg(test)]
mod mock;

pub use config::{BootMode, HardwareConfig};
pub use cores::{Bus, DspCore, Mc68kCore};
pub use device::Device;
pub use dsp::MqDsp;
pub use error::{DumpError, Error, Result};
pub use events::{Event, EventQueue};
pub use hardware::Hardware;
pub use lcd::Lcd;
pub use mc::MqMc;
pub use microq::MicroQ;
pub use midi::MidiEvent;
pub use peripherals::{ButtonType, Encoder, Led};
pub use remote::SysexRemoteControl;
pub use rom::Rom;
pub use state::{DeviceLink, Origin, State};
