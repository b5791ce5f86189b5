//! Front panel over SysEx.
//!
//! A remote UI asks for the LCD, LEDs, buttons or encoders with a bare
//! `F0 3E 10 00 <cmd> F7`. Buttons and encoders also accept a payload:
//! `52 <button> <pressed>` and `53 <encoder> <64 + delta>`.

use tracing::debug;

use crate::hardware::dirty;
use crate::lcd::CGRAM_SIZE;
use crate::microq::MicroQ;
use crate::midi::MidiEvent;
use crate::peripherals::{ButtonType, Encoder, Led, BUTTON_COUNT, LED_COUNT};
use crate::sysex::{SysexCommand, ID_MICROQ, ID_WALDORF, IDX_COMMAND, IDX_ID_MICROQ, IDX_ID_WALDORF};

const DEVICE_ID: u8 = 0;
const CUSTOM_CHARACTERS: usize = CGRAM_SIZE / 8;

/// Rotary messages carry the delta offset by this value.
pub const ROTARY_CENTER: i32 = 64;

fn header(cmd: SysexCommand) -> Vec<u8> {
    vec![0xF0, ID_WALDORF, ID_MICROQ, DEVICE_ID, cmd as u8]
}

fn finish(mut msg: Vec<u8>) -> MidiEvent {
    msg.push(0xF7);
    MidiEvent::SysEx(msg)
}

pub struct SysexRemoteControl<'a> {
    mq: &'a MicroQ,
}

impl<'a> SysexRemoteControl<'a> {
    pub fn new(mq: &'a MicroQ) -> Self {
        Self { mq }
    }

    pub fn send_lcd(&self, out: &mut Vec<MidiEvent>) {
        let mut msg = header(SysexCommand::EmuLcd);
        msg.extend(self.mq.read_lcd().iter().map(|&c| c & 0x7F));
        out.push(finish(msg));
    }

    pub fn send_lcd_cgram(&self, out: &mut Vec<MidiEvent>) {
        let mut msg = header(SysexCommand::EmuLcdCgRam);
        for i in 0..CUSTOM_CHARACTERS {
            let glyph = self.mq.read_custom_lcd_character(i).unwrap_or_default();
            msg.extend_from_slice(&glyph);
        }
        out.push(finish(msg));
    }

    pub fn send_buttons(&self, out: &mut Vec<MidiEvent>) {
        let buttons = ButtonType::ALL
            .iter()
            .enumerate()
            .take(BUTTON_COUNT)
            .filter(|(_, &b)| self.mq.button(b))
            .fold(0u32, |acc, (i, _)| acc | 1 << i);

        let mut msg = header(SysexCommand::EmuButtons);
        msg.extend_from_slice(&buttons.to_be_bytes()[1..]);
        out.push(finish(msg));
    }

    pub fn send_leds(&self, out: &mut Vec<MidiEvent>) {
        let leds = Led::ALL
            .iter()
            .enumerate()
            .take(LED_COUNT)
            .filter(|(_, &l)| self.mq.led(l))
            .fold(0u32, |acc, (i, _)| acc | 1 << i);

        let mut msg = header(SysexCommand::EmuLeds);
        msg.extend_from_slice(&leds.to_be_bytes());
        out.push(finish(msg));
    }

    pub fn send_rotaries(&self, out: &mut Vec<MidiEvent>) {
        let mut msg = header(SysexCommand::EmuRotaries);
        msg.extend(Encoder::ALL.iter().map(|&e| self.mq.encoder(e)));
        out.push(finish(msg));
    }

    /// Returns true if `input` was a remote control command. Replies are
    /// appended to `out`.
    pub fn receive(&self, out: &mut Vec<MidiEvent>, input: &[u8]) -> bool {
        if input.len() < 5 || input[IDX_ID_WALDORF] != ID_WALDORF || input[IDX_ID_MICROQ] != ID_MICROQ {
            return false;
        }

        // payload bytes, F7 excluded
        let end = match input.last() {
            Some(0xF7) => input.len() - 1,
            _ => input.len(),
        };
        let payload = input.get(IDX_COMMAND + 1..end).unwrap_or(&[]);

        match SysexCommand::from_u8(input[IDX_COMMAND]) {
            Some(SysexCommand::EmuLcd) => self.send_lcd(out),
            Some(SysexCommand::EmuLcdCgRam) => self.send_lcd_cgram(out),
            Some(SysexCommand::EmuLeds) => self.send_leds(out),
            Some(SysexCommand::EmuButtons) => match payload {
                [button, state, ..] => match ButtonType::from_index(usize::from(*button)) {
                    Some(b) => self.mq.set_button(b, *state != 0),
                    None => debug!("remote: unknown button {button}"),
                },
                _ => self.send_buttons(out),
            },
            Some(SysexCommand::EmuRotaries) => match payload {
                [encoder, amount, ..] => {
                    let delta = i32::from(*amount) - ROTARY_CENTER;
                    match Encoder::from_index(usize::from(*encoder)) {
                        Some(e) if delta != 0 => self.mq.rotate_encoder(e, delta),
                        Some(_) => {}
                        None => debug!("remote: unknown encoder {encoder}"),
                    }
                }
                _ => self.send_rotaries(out),
            },
            _ => return false,
        }
        true
    }

    /// Push whatever changed since the last call so a remote UI does not
    /// have to poll.
    pub fn handle_dirty_flags(&self, out: &mut Vec<MidiEvent>, flags: u32) {
        if flags & dirty::LCD != 0 {
            self.send_lcd(out);
        }
        if flags & dirty::LCD_CGRAM != 0 {
            self.send_lcd_cgram(out);
        }
        if flags & dirty::LEDS != 0 {
            self.send_leds(out);
        }
    }
}
