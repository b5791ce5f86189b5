//! HDI08 host interface, microcontroller side.
//!
//! Eight byte-wide registers. The DSP side lives in the external DSP core;
//! [`crate::dsp::MqDsp`] moves words, interrupt requests and host flags
//! between the two.
//!
//! | Offset | Register |
//! |--------|----------|
//! | 0 | ICR, interface control |
//! | 1 | CVR, command vector (bit 7 = host command) |
//! | 2 | ISR, interface status |
//! | 3 | IVR, interrupt vector |
//! | 5..7 | TXH/TXM/TXL on write, RXH/RXM/RXL on read |

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub const HDI08_SIZE: u32 = 8;

pub const REG_ICR: u32 = 0;
pub const REG_CVR: u32 = 1;
pub const REG_ISR: u32 = 2;
pub const REG_IVR: u32 = 3;
pub const REG_TXH: u32 = 5;
pub const REG_TXM: u32 = 6;
pub const REG_TXL: u32 = 7;

// ISR bits
pub const ISR_RXDF: u8 = 1 << 0;
pub const ISR_TXDE: u8 = 1 << 1;
pub const ISR_TRDY: u8 = 1 << 2;
pub const ISR_HF2: u8 = 1 << 3;
pub const ISR_HF3: u8 = 1 << 4;
pub const ISR_HOST_FLAGS: u8 = ISR_HF2 | ISR_HF3;

// ICR bits
pub const ICR_HF0: u8 = 1 << 3;
pub const ICR_HF1: u8 = 1 << 4;
pub const ICR_HOST_FLAGS: u8 = ICR_HF0 | ICR_HF1;
pub const ICR_HLEND: u8 = 1 << 5;
pub const ICR_INIT: u8 = 1 << 7;

pub const CVR_HC: u8 = 1 << 7;
pub const CVR_HV: u8 = 0x7F;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hdi08 {
    icr: u8,
    cvr: u8,
    ivr: u8,
    /// HF2/HF3 as last published by the DSP
    dsp_host_flags: u8,
    tx_bytes: [u8; 3],
    tx_data: VecDeque<u32>,
    rx_data: VecDeque<u32>,
    rxd: u32,
    rx_loaded: bool,
    pending_irqs: VecDeque<u8>,
}

impl Hdi08 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn little_endian(&self) -> bool {
        self.icr & ICR_HLEND != 0
    }

    /// Byte position inside a 24-bit word (0 = MSB) for TX/RX offsets 5..7.
    fn byte_index(&self, offset: u32) -> usize {
        let i = (offset - REG_TXH) as usize;
        if self.little_endian() {
            2 - i
        } else {
            i
        }
    }

    pub fn read8(&mut self, offset: u32) -> u8 {
        match offset {
            REG_ICR => self.icr,
            REG_CVR => self.cvr,
            REG_ISR => self.isr(),
            REG_IVR => self.ivr,
            REG_TXH..=REG_TXL => self.read_rx(offset),
            _ => 0,
        }
    }

    pub fn write8(&mut self, offset: u32, v: u8) {
        match offset {
            REG_ICR => {
                // INIT self clears
                self.icr = v & !ICR_INIT;
                if v & ICR_INIT != 0 {
                    self.tx_bytes = [0; 3];
                    self.rx_loaded = false;
                }
            }
            REG_CVR => {
                self.cvr = v & CVR_HV;
                if v & CVR_HC != 0 {
                    self.pending_irqs.push_back((v & CVR_HV) << 1);
                }
            }
            REG_IVR => self.ivr = v,
            REG_TXH..=REG_TXL => self.write_tx(offset, v),
            _ => {}
        }
    }

    pub fn read16(&mut self, offset: u32) -> u16 {
        let hi = self.read8(offset) as u16;
        let lo = self.read8(offset + 1) as u16;
        (hi << 8) | lo
    }

    pub fn write16(&mut self, offset: u32, v: u16) {
        self.write8(offset, (v >> 8) as u8);
        self.write8(offset + 1, v as u8);
    }

    pub fn isr(&self) -> u8 {
        let mut isr = ISR_TXDE;
        if self.rx_loaded || !self.rx_data.is_empty() {
            isr |= ISR_RXDF;
        }
        if self.tx_data.is_empty() {
            isr |= ISR_TRDY;
        }
        isr | (self.dsp_host_flags & ISR_HOST_FLAGS)
    }

    pub fn icr(&self) -> u8 {
        self.icr
    }

    fn write_tx(&mut self, offset: u32, v: u8) {
        let i = self.byte_index(offset);
        self.tx_bytes[i] = v;
        // the word is complete once the least significant byte is written
        if i == 2 {
            let [h, m, l] = self.tx_bytes;
            self.tx_data.push_back((h as u32) << 16 | (m as u32) << 8 | l as u32);
        }
    }

    fn read_rx(&mut self, offset: u32) -> u8 {
        if !self.rx_loaded {
            if let Some(w) = self.rx_data.pop_front() {
                self.rxd = w;
                self.rx_loaded = true;
            }
        }
        let i = self.byte_index(offset);
        let v = (self.rxd >> (8 * (2 - i))) as u8;
        if i == 2 {
            self.rx_loaded = false;
        }
        v
    }

    /// Word arriving from the DSP.
    pub fn write_rx(&mut self, word: u32) {
        self.rx_data.push_back(word & 0x00FF_FFFF);
    }

    /// The bridge only hands over a new word once the CPU consumed the last.
    pub fn can_receive_data(&self) -> bool {
        self.rx_data.is_empty() && !self.rx_loaded
    }

    pub fn poll_tx(&mut self) -> Option<u32> {
        self.tx_data.pop_front()
    }

    pub fn has_tx(&self) -> bool {
        !self.tx_data.is_empty()
    }

    /// Interrupt vector address requested through CVR.
    pub fn poll_interrupt_request(&mut self) -> Option<u8> {
        self.pending_irqs.pop_front()
    }

    pub fn set_dsp_host_flags(&mut self, flags: u8) {
        self.dsp_host_flags = flags & ISR_HOST_FLAGS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_word_big_endian() {
        let mut h = Hdi08::new();
        h.write8(REG_TXH, 0x12);
        h.write8(REG_TXM, 0x34);
        assert!(!h.has_tx());
        h.write8(REG_TXL, 0x56);
        assert_eq!(h.poll_tx(), Some(0x123456));
        assert_eq!(h.poll_tx(), None);
    }

    #[test]
    fn test_tx_word_little_endian() {
        let mut h = Hdi08::new();
        h.write8(REG_ICR, ICR_HLEND);
        h.write8(REG_TXL, 0x12);
        h.write8(REG_TXM, 0x34);
        h.write8(REG_TXH, 0x56);
        assert_eq!(h.poll_tx(), Some(0x123456));
    }

    #[test]
    fn test_rx_word_and_status() {
        let mut h = Hdi08::new();
        assert!(h.can_receive_data());
        assert_eq!(h.isr() & ISR_RXDF, 0);
        h.write_rx(0xABCDEF);
        assert!(!h.can_receive_data());
        assert_ne!(h.read8(REG_ISR) & ISR_RXDF, 0);

        assert_eq!(h.read8(REG_TXH), 0xAB);
        assert_eq!(h.read16(REG_TXM), 0xCDEF);
        assert!(h.can_receive_data());
        assert_eq!(h.isr() & ISR_RXDF, 0);
    }

    #[test]
    fn test_host_command_queues_vector_address() {
        let mut h = Hdi08::new();
        h.write8(REG_CVR, CVR_HC | 0x12);
        assert_eq!(h.poll_interrupt_request(), Some(0x24));
        assert_eq!(h.poll_interrupt_request(), None);
        h.write8(REG_CVR, 0x12);
        assert_eq!(h.poll_interrupt_request(), None);
    }

    #[test]
    fn test_dsp_host_flags_in_isr() {
        let mut h = Hdi08::new();
        h.set_dsp_host_flags(0xFF);
        assert_eq!(h.read8(REG_ISR) & ISR_HOST_FLAGS, ISR_HOST_FLAGS);
        h.set_dsp_host_flags(ISR_HF2);
        assert_eq!(h.isr() & ISR_HOST_FLAGS, ISR_HF2);
    }
}
