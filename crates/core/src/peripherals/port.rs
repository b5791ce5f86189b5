//! 8-bit general purpose I/O port (GP, E, F and QS on the 68331).
//!
//! Each pin has a direction bit (1 = output) and an enable bit. The CPU side
//! writes through [`Port::write_tx`], which only touches enabled output pins.
//! The board side (buttons, LCD data bus, DSP reset line) drives the input
//! pins through [`Port::write_rx`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortId {
    Gp,
    E,
    F,
    Qs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    direction: u8,
    enabled_pins: u8,
    data: u8,
    write_counter: u32,
}

impl Default for Port {
    fn default() -> Self {
        Self::new()
    }
}

impl Port {
    pub fn new() -> Self {
        Port {
            direction: 0,
            enabled_pins: 0xFF,
            data: 0,
            write_counter: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Write from the CPU side. Only output pins that are enabled change.
    pub fn write_tx(&mut self, data: u8) {
        let mask = self.direction & self.enabled_pins;
        self.data = (self.data & !mask) | (data & mask);
        self.write_counter = self.write_counter.wrapping_add(1);
    }

    /// Write from the board side. Only input pins that are enabled change.
    pub fn write_rx(&mut self, data: u8) {
        let mask = !self.direction & self.enabled_pins;
        self.data = (self.data & !mask) | (data & mask);
    }

    pub fn read(&self) -> u8 {
        self.data
    }

    pub fn bit_test(&self, bit: u8) -> bool {
        self.data & (1 << bit) != 0
    }

    pub fn set_bit_rx(&mut self, bit: u8) {
        self.write_rx(self.data | (1 << bit));
    }

    pub fn clear_bit_rx(&mut self, bit: u8) {
        self.write_rx(self.data & !(1 << bit));
    }

    /// Returns true if the direction actually changed. The owner turns that
    /// into a [`crate::events::Event::PortDirection`] notification.
    pub fn set_direction(&mut self, direction: u8) -> bool {
        if self.direction == direction {
            return false;
        }
        self.direction = direction;
        true
    }

    pub fn direction(&self) -> u8 {
        self.direction
    }

    pub fn enable_pins(&mut self, pins: u8) {
        self.enabled_pins = pins;
    }

    pub fn enabled_pins(&self) -> u8 {
        self.enabled_pins
    }

    pub fn write_counter(&self) -> u32 {
        self.write_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_tx_only_touches_enabled_outputs() {
        let mut p = Port::new();
        p.set_direction(0x0F);
        p.enable_pins(0x3C);
        p.write_tx(0xFF);
        assert_eq!(p.read(), 0x0C);
        assert_eq!(p.write_counter(), 1);
    }

    #[test]
    fn test_write_rx_only_touches_enabled_inputs() {
        let mut p = Port::new();
        p.set_direction(0x0F);
        p.enable_pins(0x3C);
        p.write_rx(0xFF);
        assert_eq!(p.read(), 0x30);
        assert_eq!(p.write_counter(), 0);
    }

    #[test]
    fn test_read_is_union_of_masked_writes() {
        let mut p = Port::new();
        p.set_direction(0xF0);
        p.write_tx(0xA5);
        p.write_rx(0x5A);
        assert_eq!(p.read(), 0xAA);

        // clearing a tx bit leaves rx bits alone
        p.write_tx(0x00);
        assert_eq!(p.read(), 0x0A);
    }

    #[test]
    fn test_set_direction_reports_changes_only() {
        let mut p = Port::new();
        assert!(!p.set_direction(0));
        assert!(p.set_direction(0xFF));
        assert!(!p.set_direction(0xFF));
        assert_eq!(p.direction(), 0xFF);
    }

    #[test]
    fn test_rx_bit_helpers() {
        let mut p = Port::new();
        p.set_bit_rx(3);
        assert!(p.bit_test(3));
        p.clear_bit_rx(3);
        assert!(!p.bit_test(3));

        // output pins ignore board-side writes
        p.set_direction(1 << 3);
        p.set_bit_rx(3);
        assert!(!p.bit_test(3));
    }
}
