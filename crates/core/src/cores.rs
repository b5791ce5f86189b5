//! Boundaries to the instruction-level CPU and DSP cores.
//!
//! Neither core is emulated here. The 68k core executes instructions and
//! calls back into a [`Bus`] for every memory access; [`crate::mc::MqMc`]
//! implements that bus for the board. The DSP core exposes its side of the
//! HDI08 host interface and its audio interface.

/// Memory accesses issued by the 68k core.
///
/// Reads return `None` and writes return `false` for addresses the board
/// does not decode; the core then handles them itself (on-chip timers,
/// serial interface, chip selects).
pub trait Bus {
    fn read8(&mut self, addr: u32) -> Option<u8>;
    fn read16(&mut self, addr: u32) -> Option<u16>;
    fn write8(&mut self, addr: u32, v: u8) -> bool;
    fn write16(&mut self, addr: u32, v: u16) -> bool;
}

pub trait Mc68kCore: Send {
    /// Reset vectors are fetched through the bus.
    fn reset(&mut self, bus: &mut dyn Bus);
    /// Execute one instruction, returns the cycles it took.
    fn exec(&mut self, bus: &mut dyn Bus) -> u32;
    fn system_clock_hz(&self) -> u32;
    /// Bytes arriving at the MIDI input of the serial interface.
    fn write_midi_in(&mut self, bytes: &[u8]);
    /// Append everything the serial interface transmitted since the last call.
    fn read_midi_out(&mut self, out: &mut Vec<u8>);
}

pub trait DspCore: Send {
    /// Run a slice of DSP instructions.
    fn exec(&mut self);

    fn hdi_has_tx(&self) -> bool;
    fn hdi_read_tx(&mut self) -> u32;
    fn hdi_write_rx(&mut self, word: u32);
    /// Receive FIFO still holds data the DSP has not read
    fn hdi_rx_full(&self) -> bool;
    /// The DSP has unread host data and its receive interrupt is enabled
    fn hdi_rx_pending(&self) -> bool;
    /// HF0/HF1 as set by the host, in ICR bit positions (0x18)
    fn set_pending_host_flags(&mut self, flags: u8);
    /// HF2/HF3 as set by the DSP, in ISR bit positions (0x18)
    fn host_flags(&self) -> u8;

    fn inject_interrupt(&mut self, vector: u8);
    fn has_pending_interrupts(&self) -> bool;

    /// Run audio for `frames` frames. Returns the number of frames the
    /// audio interface actually produced, which stays 0 until the firmware
    /// has enabled it.
    fn process_audio(&mut self, inputs: &[Vec<i32>], outputs: &mut [Vec<i32>], frames: usize) -> usize;
}
