//! Front panel button and encoder matrix.
//!
//! The CPU pulls one of four chip selects on port E low and reads a byte
//! from port GP. Two selects return packed button states, the other two
//! return 2-bit quadrature codes for four encoders each. The power switch
//! is wired to a port E input pin directly.

use serde::{Deserialize, Serialize};

use crate::peripherals::Port;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonType {
    Inst1,
    Inst2,
    Inst3,
    Inst4,
    Down,
    Left,
    Right,
    Up,
    Global,
    Multi,
    Edit,
    Sound,
    Shift,
    Multimode,
    Peek,
    Play,
    Power,
}

pub const BUTTON_COUNT: usize = 17;

impl ButtonType {
    pub const ALL: [ButtonType; BUTTON_COUNT] = [
        ButtonType::Inst1, ButtonType::Inst2, ButtonType::Inst3, ButtonType::Inst4,
        ButtonType::Down, ButtonType::Left, ButtonType::Right, ButtonType::Up,
        ButtonType::Global, ButtonType::Multi, ButtonType::Edit, ButtonType::Sound,
        ButtonType::Shift, ButtonType::Multimode, ButtonType::Peek, ButtonType::Play,
        ButtonType::Power,
    ];

    pub fn from_index(i: usize) -> Option<ButtonType> {
        Self::ALL.get(i).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoder {
    Rotary1,
    Rotary2,
    Rotary3,
    Rotary4,
    LcdLeft,
    LcdRight,
    Master,
}

pub const ENCODER_COUNT: usize = 7;

impl Encoder {
    pub const ALL: [Encoder; ENCODER_COUNT] = [
        Encoder::Rotary1, Encoder::Rotary2, Encoder::Rotary3, Encoder::Rotary4,
        Encoder::LcdLeft, Encoder::LcdRight, Encoder::Master,
    ];

    pub fn from_index(i: usize) -> Option<Encoder> {
        Self::ALL.get(i).copied()
    }
}

/// Port E chip selects, active low.
const CS_ENCODERS_A: u8 = 1 << 0;
const CS_ENCODERS_B: u8 = 1 << 1;
const CS_BUTTONS_A: u8 = 1 << 2;
const CS_BUTTONS_B: u8 = 1 << 3;
/// Port E input pin of the power switch.
pub const PIN_E_POWER: u8 = 5;

const GRAY_CODE: [u8; 4] = [0b00, 0b10, 0b11, 0b01];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buttons {
    states: [bool; BUTTON_COUNT],
    encoder_values: [u8; ENCODER_COUNT],
    remaining_rotations: [i32; ENCODER_COUNT],
    write_counter: u32,
}

impl Default for Buttons {
    fn default() -> Self {
        Self::new()
    }
}

impl Buttons {
    pub fn new() -> Self {
        Buttons {
            states: [false; BUTTON_COUNT],
            encoder_values: [0; ENCODER_COUNT],
            remaining_rotations: [0; ENCODER_COUNT],
            write_counter: 0,
        }
    }

    /// Serve a matrix read. Returns true if a chip select was active and the
    /// selected group was driven onto GP.
    pub fn process_buttons(&mut self, gp: &mut Port, e: &mut Port) -> bool {
        if gp.direction() == 0xFF {
            return false;
        }

        // encoders only step once per scan, a scan is a new write to port E
        let w = e.write_counter();
        let cycle_encoders = w != self.write_counter;
        self.write_counter = w;

        let power = self.states[ButtonType::Power as usize];
        let ev = e.read();
        if power != (ev & (1 << PIN_E_POWER) != 0) {
            if power {
                e.set_bit_rx(PIN_E_POWER);
            } else {
                e.clear_bit_rx(PIN_E_POWER);
            }
        }
        let ev = e.read();

        let res = if ev & CS_BUTTONS_A == 0 {
            self.pack_buttons(0)
        } else if ev & CS_BUTTONS_B == 0 {
            self.pack_buttons(8)
        } else if ev & CS_ENCODERS_A == 0 {
            (0..4).fold(0, |acc, i| acc | self.process_step_encoder(i, cycle_encoders) << (i * 2))
        } else if ev & CS_ENCODERS_B == 0 {
            let master = Encoder::Master as usize;
            let mut res = (4..master).fold(0, |acc, i| acc | self.process_step_encoder(i, cycle_encoders) << ((i - 4) * 2));
            res |= self.process_step_encoder(master, cycle_encoders) << ((master - 4) * 2);
            res
        } else {
            return false;
        };

        gp.write_rx(res);
        true
    }

    fn pack_buttons(&self, first: usize) -> u8 {
        (0..8).fold(0, |acc, i| acc | (self.states[first + i] as u8) << i)
    }

    /// Advance one quadrature step towards the pending rotation, but only on
    /// a new scan cycle.
    fn process_step_encoder(&mut self, index: usize, cycle: bool) -> u8 {
        let v = &mut self.encoder_values[index];
        if cycle {
            let c = &mut self.remaining_rotations[index];
            if *c > 0 {
                *v = v.wrapping_sub(1);
                *c -= 1;
            } else if *c < 0 {
                *v = v.wrapping_add(1);
                *c += 1;
            }
        }
        GRAY_CODE[(*v & 3) as usize]
    }

    pub fn set_button(&mut self, button: ButtonType, pressed: bool) {
        self.states[button as usize] = pressed;
    }

    pub fn toggle_button(&mut self, button: ButtonType) {
        self.states[button as usize] ^= true;
    }

    pub fn button(&self, button: ButtonType) -> bool {
        self.states[button as usize]
    }

    /// Queue a rotation. The master encoder detents every 4 quadrature steps.
    /// The others have no detents and the firmware accelerates them, so a
    /// logical step is the smallest amount the firmware reacts to.
    pub fn rotate(&mut self, encoder: Encoder, amount: i32) {
        let mul = if encoder == Encoder::Master { 4 } else { 3 };
        self.remaining_rotations[encoder as usize] += amount * mul;
    }

    pub fn encoder_value(&self, encoder: Encoder) -> u8 {
        self.encoder_values[encoder as usize]
    }

    pub fn remaining_rotation(&self, encoder: Encoder) -> i32 {
        self.remaining_rotations[encoder as usize]
    }

    /// Packed button states, bit n = [`ButtonType::ALL`]\[n\].
    pub fn states_mask(&self) -> u32 {
        self.states.iter().enumerate().fold(0, |acc, (i, &s)| acc | (s as u32) << i)
    }
}
