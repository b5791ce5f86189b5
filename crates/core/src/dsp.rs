//! Bridge between the microcontroller's HDI08 and one DSP core.
//!
//! The DSP does not run on a thread of its own. Whenever the bridge has to
//! wait for the DSP (receive FIFO drained, interrupt taken) it executes DSP
//! instructions in a cooperative yield loop on the calling thread until the
//! wait condition clears.

use tracing::{debug, warn};

use crate::cores::DspCore;
use crate::peripherals::hdi08::{self, Hdi08};

/// Host command the firmware uses to hand a block of parameters to the
/// DSP. The DSP acknowledges it by dropping HF2 again, which can take a
/// while when the DSP is busy reorganising its memory.
pub const HANDSHAKE_IRQ: u8 = 0x92;
/// Upper bound of DSP exec slices spent waiting for that acknowledge.
pub const HANDSHAKE_WAIT_LIMIT: u32 = 0x10000;

pub struct MqDsp {
    core: Box<dyn DspCore>,
    index: usize,
    host_flags_01: u8,
    have_sent_tx: bool,
}

impl MqDsp {
    pub fn new(core: Box<dyn DspCore>, index: usize) -> Self {
        MqDsp {
            core,
            index,
            host_flags_01: 0,
            have_sent_tx: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn core(&self) -> &dyn DspCore {
        self.core.as_ref()
    }

    pub fn core_mut(&mut self) -> &mut dyn DspCore {
        self.core.as_mut()
    }

    pub fn have_sent_tx_to_dsp(&self) -> bool {
        self.have_sent_tx
    }

    /// Run the DSP while `keep_waiting` holds.
    fn yield_loop(&mut self, keep_waiting: impl Fn(&dyn DspCore) -> bool) {
        while keep_waiting(self.core.as_ref()) {
            self.core.exec();
        }
    }

    /// Like [`Self::yield_loop`] but gives up after `limit` slices.
    /// Returns false on timeout.
    fn yield_loop_bounded(&mut self, limit: u32, keep_waiting: impl Fn(&dyn DspCore) -> bool) -> bool {
        for _ in 0..limit {
            if !keep_waiting(self.core.as_ref()) {
                return true;
            }
            self.core.exec();
        }
        !keep_waiting(self.core.as_ref())
    }

    fn wait_dsp_rx_empty(&mut self) {
        self.yield_loop(|dsp| dsp.hdi_rx_pending() || dsp.has_pending_interrupts());
    }

    /// Forward HF0/HF1 written by the CPU into ICR.
    pub fn transfer_host_flags_uc_to_dsp(&mut self, hdi: &Hdi08) {
        let hf01 = hdi.icr() & hdi08::ICR_HOST_FLAGS;
        if hf01 != self.host_flags_01 {
            self.wait_dsp_rx_empty();
            self.host_flags_01 = hf01;
            self.core.set_pending_host_flags(hf01);
        }
    }

    /// Publish HF2/HF3 so that CPU reads of ISR see them.
    pub fn transfer_host_flags_dsp_to_uc(&self, hdi: &mut Hdi08) {
        hdi.set_dsp_host_flags(self.core.host_flags());
    }

    /// Move one word from the DSP transmit FIFO into the CPU receive path.
    pub fn hdi_transfer_dsp_to_uc(&mut self, hdi: &mut Hdi08) -> bool {
        if hdi.can_receive_data() && self.core.hdi_has_tx() {
            hdi.write_rx(self.core.hdi_read_tx());
            return true;
        }
        false
    }

    pub fn hdi_transfer_uc_to_dsp(&mut self, word: u32) {
        self.have_sent_tx = true;
        // happens while the DSP is reorganising memory, it has to run to
        // drain its FIFO first
        if self.core.hdi_rx_full() {
            self.yield_loop(|dsp| dsp.hdi_rx_full());
        }
        self.core.hdi_write_rx(word);
    }

    pub fn hdi_send_irq_to_dsp(&mut self, hdi: &mut Hdi08, irq: u8) {
        self.wait_dsp_rx_empty();

        debug!("dsp {}: inject interrupt {irq:#04x}", self.index);
        self.core.inject_interrupt(irq);
        self.yield_loop(|dsp| dsp.has_pending_interrupts());

        if irq == HANDSHAKE_IRQ {
            let acked = self.yield_loop_bounded(HANDSHAKE_WAIT_LIMIT, |dsp| dsp.host_flags() & hdi08::ISR_HF2 != 0);
            if !acked {
                warn!("dsp {}: HF2 still set after interrupt {irq:#04x}, continuing", self.index);
            }
        }

        self.transfer_host_flags_dsp_to_uc(hdi);
        self.hdi_transfer_dsp_to_uc(hdi);
    }

    /// One bridge step after the CPU executed an instruction. The DSP gets
    /// one exec slice per step so both sides make progress.
    pub fn process_uc_step(&mut self, hdi: &mut Hdi08) {
        self.core.exec();
        self.transfer_host_flags_uc_to_dsp(hdi);

        while let Some(word) = hdi.poll_tx() {
            self.hdi_transfer_uc_to_dsp(word);
        }
        while let Some(irq) = hdi.poll_interrupt_request() {
            self.hdi_send_irq_to_dsp(hdi, irq);
        }

        self.hdi_transfer_dsp_to_uc(hdi);
        self.transfer_host_flags_dsp_to_uc(hdi);
    }
}
