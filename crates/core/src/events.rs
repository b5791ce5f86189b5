//! Change notifications raised by the panel peripherals.
//!
//! Peripherals push events into a queue owned by the microcontroller model;
//! the hardware layer drains it after every executed instruction batch and
//! turns the events into dirty flags and boot handling.

use crate::peripherals::PortId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    PortDirection { port: PortId, direction: u8 },
    Lcd,
    LcdCgRam,
    Leds,
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Event> {
        self.events.drain(..)
    }
}
