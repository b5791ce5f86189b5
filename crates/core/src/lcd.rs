//! HD44780-class character LCD controller (2 x 20 cells, 8 custom glyphs).
//!
//! The controller sits on the GP data bus. Port F carries the control lines:
//! register select, read/write and the enable strobe. A bus operation is
//! executed on the falling edge of enable only.
//!
//! DDRAM addresses 0x00..0x13 map to line 1 and 0x40..0x53 to line 2. The
//! firmware streams scroll text into the hidden area behind each line, so
//! writes past the visible window shift the line left instead of spilling
//! into the other line.

use tracing::{error, trace};

use crate::events::{Event, EventQueue};
use crate::peripherals::Port;

pub const LCD_COLUMNS: usize = 20;
pub const LCD_ROWS: usize = 2;
pub const DDRAM_SIZE: usize = LCD_COLUMNS * LCD_ROWS;
pub const CGRAM_SIZE: usize = 64;

/// Port F pin assignments of the LCD control lines.
pub const PIN_RS: u8 = 1;
pub const PIN_RW: u8 = 2;
pub const PIN_E: u8 = 3;

const BLANK: u8 = b' ';
const LINE2_ADDR: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    DdRam,
    CgRam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorShift {
    CursorLeft,
    CursorRight,
    DisplayLeft,
    DisplayRight,
}

pub struct Lcd {
    ddram: [u8; DDRAM_SIZE],
    cgram: [u8; CGRAM_SIZE],
    ddram_addr: u8,
    cgram_addr: u8,
    address_mode: AddressMode,
    addr_increment: i8,
    display_on: bool,
    cursor_on: bool,
    cursor_blinking: bool,
    cursor_shift: CursorShift,
    /// Function set: true = 8-bit interface
    data_length_8bit: bool,
    font_table: u8,
    last_op_counter: u32,
    last_enable: bool,
}

impl Default for Lcd {
    fn default() -> Self {
        Self::new()
    }
}

impl Lcd {
    pub fn new() -> Self {
        Lcd {
            ddram: [BLANK; DDRAM_SIZE],
            cgram: [0; CGRAM_SIZE],
            ddram_addr: 0,
            cgram_addr: 0,
            address_mode: AddressMode::DdRam,
            addr_increment: 1,
            display_on: false,
            cursor_on: false,
            cursor_blinking: false,
            cursor_shift: CursorShift::CursorLeft,
            data_length_8bit: true,
            font_table: 0,
            last_op_counter: 0,
            last_enable: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Called after every write to port GP or F. Returns true if the write
    /// belonged to an LCD bus cycle, in which case the LED latch must not
    /// look at it.
    pub fn exec(&mut self, gp: &mut Port, f: &Port, events: &mut EventQueue) -> bool {
        let counter = f.write_counter();
        if counter == self.last_op_counter {
            return false;
        }
        self.last_op_counter = counter;

        let enable = f.bit_test(PIN_E);
        let was_enabled = self.last_enable;
        self.last_enable = enable;

        if !was_enabled && !enable {
            return false;
        }

        // falling edge only
        if !was_enabled || enable {
            return true;
        }

        let register_select = f.bit_test(PIN_RS);
        let read = f.bit_test(PIN_RW);

        if let Some(v) = self.bus_cycle(register_select, read, gp.read(), events) {
            gp.write_rx(v);
        }
        true
    }

    /// One decoded bus operation. Returns the value to drive onto the data
    /// bus for reads.
    pub fn bus_cycle(&mut self, register_select: bool, read: bool, g: u8, events: &mut EventQueue) -> Option<u8> {
        if read {
            return Some(self.read(register_select));
        }
        if register_select {
            self.write_data(g, events);
        } else {
            self.write_command(g, events);
        }
        None
    }

    fn write_command(&mut self, g: u8, events: &mut EventQueue) {
        if g == 0x01 {
            trace!("lcd: clear display");
            let changed = self.ddram.iter().any(|&c| c != BLANK);
            self.ddram.fill(BLANK);
            self.ddram_addr = 0;
            if changed {
                events.push(Event::Lcd);
            }
        } else if g == 0x02 {
            trace!("lcd: return home");
            self.ddram_addr = 0;
        } else if g & 0xFC == 0x04 {
            let inc = g & 0x02 != 0;
            trace!("lcd: entry mode set, inc={} shift={}", inc, g & 1);
            self.addr_increment = if inc { 1 } else { -1 };
        } else if g & 0xF8 == 0x08 {
            self.display_on = g & 0x04 != 0;
            self.cursor_on = g & 0x02 != 0;
            self.cursor_blinking = g & 0x01 != 0;
        } else if g & 0xF3 == 0x10 {
            self.cursor_shift = match (g >> 2) & 3 {
                0 => CursorShift::CursorLeft,
                1 => CursorShift::CursorRight,
                2 => CursorShift::DisplayLeft,
                _ => CursorShift::DisplayRight,
            };
            trace!("lcd: cursor/display shift {:?}", self.cursor_shift);
        } else if g & 0xEC == 0x28 {
            self.data_length_8bit = g & 0x10 != 0;
            self.font_table = g & 3;
            trace!("lcd: function set, 8bit={} ft={}", self.data_length_8bit, self.font_table);
        } else if g & 0x80 != 0 {
            self.ddram_addr = g & 0x7F;
            self.address_mode = AddressMode::DdRam;
        } else if g & 0x40 != 0 {
            self.cgram_addr = g & 0x3F;
            self.address_mode = AddressMode::CgRam;
        } else {
            error!("lcd: unknown command {g:#04x}");
            debug_assert!(false, "unknown LCD command {g:#04x}");
        }
    }

    fn write_data(&mut self, g: u8, events: &mut EventQueue) {
        if self.address_mode == AddressMode::CgRam {
            let idx = self.cgram_addr as usize;
            if self.cgram[idx] != g {
                self.cgram[idx] = g;
                events.push(Event::LcdCgRam);
            }
            self.cgram_addr = (self.cgram_addr as i16 + self.addr_increment as i16) as u8 & 0x3F;
            return;
        }

        let old = self.ddram;
        let addr = self.ddram_addr;

        if (LCD_COLUMNS as u8..LINE2_ADDR).contains(&addr) {
            self.ddram.copy_within(1..LCD_COLUMNS, 0);
            self.ddram[LCD_COLUMNS - 1] = g;
        } else if addr > LINE2_ADDR + LCD_COLUMNS as u8 - 1 {
            self.ddram.copy_within(LCD_COLUMNS + 1..DDRAM_SIZE, LCD_COLUMNS);
            self.ddram[DDRAM_SIZE - 1] = g;
        } else if let Some(idx) = ddram_index(addr) {
            self.ddram[idx] = g;
        }

        // the first hidden cell of each line keeps its address so that
        // streamed text keeps scrolling
        if addr != LCD_COLUMNS as u8 && addr != LINE2_ADDR + LCD_COLUMNS as u8 {
            self.ddram_addr = (addr as i16 + self.addr_increment as i16) as u8 & 0x7F;
        }

        if self.ddram != old {
            events.push(Event::Lcd);
        }
    }

    fn read(&self, register_select: bool) -> u8 {
        match (register_select, self.address_mode) {
            (true, AddressMode::CgRam) => self.cgram[self.cgram_addr as usize],
            (true, AddressMode::DdRam) => ddram_index(self.ddram_addr).map_or(BLANK, |i| self.ddram[i]),
            // busy flag is never set
            (false, AddressMode::CgRam) => self.cgram_addr,
            (false, AddressMode::DdRam) => self.ddram_addr,
        }
    }

    pub fn ddram(&self) -> &[u8; DDRAM_SIZE] {
        &self.ddram
    }

    pub fn cgram(&self) -> &[u8; CGRAM_SIZE] {
        &self.cgram
    }

    /// Bitmap rows of custom glyph `index` (0..8).
    pub fn cg_data(&self, index: usize) -> Option<[u8; 8]> {
        let start = index * 8;
        let rows = self.cgram.get(start..start + 8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(rows);
        Some(out)
    }

    pub fn line(&self, row: usize) -> &[u8] {
        let start = row.min(LCD_ROWS - 1) * LCD_COLUMNS;
        &self.ddram[start..start + LCD_COLUMNS]
    }

    pub fn text(&self) -> String {
        (0..LCD_ROWS)
            .map(|r| String::from_utf8_lossy(self.line(r)).into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn display_on(&self) -> bool {
        self.display_on
    }

    pub fn cursor_on(&self) -> bool {
        self.cursor_on
    }

    pub fn cursor_blinking(&self) -> bool {
        self.cursor_blinking
    }

    pub fn address_mode(&self) -> AddressMode {
        self.address_mode
    }

    pub fn ddram_addr(&self) -> u8 {
        self.ddram_addr
    }

    /// Restore cell contents from a save state.
    pub fn restore(&mut self, ddram: &[u8], cgram: &[u8]) {
        let n = ddram.len().min(DDRAM_SIZE);
        self.ddram[..n].copy_from_slice(&ddram[..n]);
        let n = cgram.len().min(CGRAM_SIZE);
        self.cgram[..n].copy_from_slice(&cgram[..n]);
    }
}

fn ddram_index(addr: u8) -> Option<usize> {
    let addr = addr as usize;
    if addr < LCD_COLUMNS {
        Some(addr)
    } else if (LINE2_ADDR as usize..LINE2_ADDR as usize + LCD_COLUMNS).contains(&addr) {
        Some(addr - LINE2_ADDR as usize + LCD_COLUMNS)
    } else {
        None
    }
}
