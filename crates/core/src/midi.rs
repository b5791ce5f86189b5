//! MIDI event type and byte stream parser.

use tracing::debug;

pub const M_NOTEOFF: u8 = 0x80;
pub const M_NOTEON: u8 = 0x90;
pub const M_POLYPRESSURE: u8 = 0xA0;
pub const M_CONTROLCHANGE: u8 = 0xB0;
pub const M_PROGRAMCHANGE: u8 = 0xC0;
pub const M_AFTERTOUCH: u8 = 0xD0;
pub const M_PITCHBEND: u8 = 0xE0;
pub const M_STARTOFSYSEX: u8 = 0xF0;
pub const M_ENDOFSYSEX: u8 = 0xF7;

/// Either a channel/system message of up to 3 bytes or a complete SysEx
/// message including F0 and F7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEvent {
    Short { a: u8, b: u8, c: u8 },
    SysEx(Vec<u8>),
}

impl MidiEvent {
    pub fn short(a: u8, b: u8, c: u8) -> Self {
        MidiEvent::Short { a, b, c }
    }

    pub fn sysex(&self) -> Option<&[u8]> {
        match self {
            MidiEvent::SysEx(s) => Some(s),
            MidiEvent::Short { .. } => None,
        }
    }

    /// Append the wire bytes of this event.
    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            MidiEvent::SysEx(s) => out.extend_from_slice(s),
            &MidiEvent::Short { a, b, c } => {
                let len = length_from_status_byte(a).max(1);
                out.push(a);
                if len > 1 {
                    out.push(b);
                }
                if len > 2 {
                    out.push(c);
                }
            }
        }
    }
}

/// Total message length for a status byte, 0 for SysEx start.
pub fn length_from_status_byte(status: u8) -> usize {
    match status & 0xF0 {
        M_NOTEOFF | M_NOTEON | M_POLYPRESSURE | M_CONTROLCHANGE | M_PITCHBEND => 3,
        M_PROGRAMCHANGE | M_AFTERTOUCH => 2,
        0xF0 => match status {
            M_STARTOFSYSEX => 0,
            0xF1 | 0xF3 => 2,
            0xF2 => 3,
            _ => 1,
        },
        _ => 1,
    }
}

/// Splits a raw byte stream into events. Handles running status and
/// realtime bytes interleaved with SysEx.
#[derive(Debug, Default)]
pub struct MidiBufferParser {
    sysex: Option<Vec<u8>>,
    running_status: u8,
    pending: Vec<u8>,
    events: Vec<MidiEvent>,
}

impl MidiBufferParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, data: &[u8]) {
        for &b in data {
            self.write_byte(b);
        }
    }

    fn write_byte(&mut self, b: u8) {
        // realtime bytes may appear anywhere
        if b >= 0xF8 {
            self.events.push(MidiEvent::short(b, 0, 0));
            return;
        }

        if let Some(sysex) = &mut self.sysex {
            if b < 0x80 {
                sysex.push(b);
                return;
            }
            if b == M_ENDOFSYSEX {
                sysex.push(b);
                if let Some(s) = self.sysex.take() {
                    self.events.push(MidiEvent::SysEx(s));
                }
                return;
            }
            debug!("midi: sysex of {} bytes interrupted by status {b:#04x}", sysex.len());
            self.sysex = None;
        }

        if b == M_STARTOFSYSEX {
            self.sysex = Some(vec![b]);
            self.pending.clear();
            self.running_status = 0;
            return;
        }

        if b & 0x80 != 0 {
            self.pending.clear();
            self.pending.push(b);
            // system common messages cancel running status
            self.running_status = if b < 0xF0 { b } else { 0 };
        } else if self.pending.is_empty() {
            if self.running_status == 0 {
                return;
            }
            self.pending.push(self.running_status);
            self.pending.push(b);
        } else {
            self.pending.push(b);
        }

        if self.pending.len() >= length_from_status_byte(self.pending[0]) {
            let get = |i: usize| self.pending.get(i).copied().unwrap_or(0);
            self.events.push(MidiEvent::short(get(0), get(1), get(2)));
            self.pending.clear();
        }
    }

    pub fn get_events(&mut self, out: &mut Vec<MidiEvent>) {
        out.append(&mut self.events);
    }
}

/// Split a buffer holding several concatenated SysEx messages.
pub fn split_multiple_sysex(data: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, &b) in data.iter().enumerate() {
        match b {
            M_STARTOFSYSEX => start = Some(i),
            M_ENDOFSYSEX => {
                if let Some(s) = start.take() {
                    out.push(data[s..=i].to_vec());
                }
            }
            _ => {}
        }
    }
    out
}
