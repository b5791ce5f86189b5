//! Microcontroller-side peripheral emulation.
//!
//! Board level chips and on-chip ports touched by the firmware:
//!
//! - [`Port`] - 8-bit I/O ports GP, E, F and QS
//! - [`Am29f`] - parallel flash command decoder (firmware updates)
//! - [`Buttons`] - front panel button and encoder matrix
//! - [`Leds`] - front panel LED latches
//! - [`Hdi08`] - host interface towards the DSP

mod port;
pub mod am29f;
mod buttons;
mod leds;
pub mod hdi08;

pub use port::{Port, PortId};
pub use am29f::{Am29f, FlashCommand};
pub use buttons::{ButtonType, Buttons, Encoder, BUTTON_COUNT, ENCODER_COUNT, PIN_E_POWER};
pub use leds::{Led, Leds, LED_COUNT, PIN_E_POWER_LED, PIN_F_STROBE};
pub use hdi08::Hdi08;
