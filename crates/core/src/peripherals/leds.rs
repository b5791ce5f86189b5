//! Front panel LED latches.
//!
//! LEDs are driven through five latches. The CPU puts a byte on GP and
//! raises the strobe on port F: the upper 3 bits pick the latch, the lower
//! 5 bits are the states of the LEDs wired to it. LED `n` sits on latch
//! `n % 5`, bit `n / 5`. The power LED hangs off a port E output directly.

use serde::{Deserialize, Serialize};

use crate::events::{Event, EventQueue};
use crate::peripherals::Port;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Led {
    Inst1,
    Inst2,
    Inst3,
    Inst4,
    Play,
    Multi,
    Edit,
    Sound,
    Global,
    Peek,
    Multimode,
    Shift,
    Pitch,
    Filter,
    Amp,
    Fx,
    Lfo,
    Env,
    Mod,
    Arp,
    Osc,
    Mixer,
    Routing,
    Midi,
    Clock,
    Power,
}

pub const LED_COUNT: usize = 26;
const LATCH_GROUPS: usize = 5;

impl Led {
    pub const ALL: [Led; LED_COUNT] = [
        Led::Inst1, Led::Inst2, Led::Inst3, Led::Inst4, Led::Play,
        Led::Multi, Led::Edit, Led::Sound, Led::Global, Led::Peek,
        Led::Multimode, Led::Shift, Led::Pitch, Led::Filter, Led::Amp,
        Led::Fx, Led::Lfo, Led::Env, Led::Mod, Led::Arp,
        Led::Osc, Led::Mixer, Led::Routing, Led::Midi, Led::Clock,
        Led::Power,
    ];

    pub fn from_index(i: usize) -> Option<Led> {
        Self::ALL.get(i).copied()
    }
}

/// Port F strobe pin.
pub const PIN_F_STROBE: u8 = 0;
/// Port E power LED pin.
pub const PIN_E_POWER_LED: u8 = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leds {
    states: [bool; LED_COUNT],
    last_latch: bool,
}

impl Default for Leds {
    fn default() -> Self {
        Self::new()
    }
}

impl Leds {
    pub fn new() -> Self {
        Leds {
            states: [false; LED_COUNT],
            last_latch: false,
        }
    }

    /// Returns true if any LED changed.
    pub fn exec(&mut self, f: &Port, gp: &Port, e: &Port, events: &mut EventQueue) -> bool {
        let mut changed = false;

        if e.direction() & (1 << PIN_E_POWER_LED) != 0 {
            changed |= self.set(Led::Power as usize, e.bit_test(PIN_E_POWER_LED));
        }

        let latch = f.bit_test(PIN_F_STROBE);
        let rising = latch && !self.last_latch;
        self.last_latch = latch;

        if rising && gp.direction() == 0xFF {
            let v = gp.read();
            let group = (v >> 5) as usize;
            if group < LATCH_GROUPS {
                for bit in 0..5 {
                    changed |= self.set(group + bit * LATCH_GROUPS, v & (1 << bit) != 0);
                }
            }
        }

        if changed {
            events.push(Event::Leds);
        }
        changed
    }

    fn set(&mut self, index: usize, on: bool) -> bool {
        if self.states[index] == on {
            return false;
        }
        self.states[index] = on;
        true
    }

    pub fn led(&self, led: Led) -> bool {
        self.states[led as usize]
    }

    /// Packed LED states, bit n = [`Led::ALL`]\[n\].
    pub fn states_mask(&self) -> u32 {
        self.states.iter().enumerate().fold(0, |acc, (i, &s)| acc | (s as u32) << i)
    }

    pub fn restore(&mut self, mask: u32) {
        for (i, s) in self.states.iter_mut().enumerate() {
            *s = mask & (1 << i) != 0;
        }
    }
}
