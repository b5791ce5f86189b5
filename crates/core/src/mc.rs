//! Microcontroller board model: the 68331 address space as seen by the
//! firmware.
//!
//! | Range | Device |
//! |-------|--------|
//! | 0x00000..0x20000 | RAM |
//! | 0x80000..0x100000 | flash (reads: ROM image, writes: command decoder) |
//! | 0xFFD000, 0xFFD800, 0xFFE000 | HDI08 to DSP A, B, C |
//! | 0xFFF906/7 | port GP direction / data |
//! | 0xFFFA11..0xFFFA1F | ports E and F |
//! | 0xFFFC15..0xFFFC17 | port QS |
//!
//! Anything else is left to the CPU core (timers, serial interface, SIM).
//! Every data write to GP, E or F gives the LCD a chance to run a bus cycle
//! and, if it did not, lets the LED latches look at it.

use tracing::{debug, trace};

use crate::cores::Bus;
use crate::events::{Event, EventQueue};
use crate::lcd::Lcd;
use crate::peripherals::{hdi08, Am29f, Buttons, Hdi08, Leds, Port, PortId};

pub const RAM_SIZE: u32 = 0x20000;
pub const ROM_ADDR: u32 = 0x80000;
pub const ROM_SIZE: u32 = crate::rom::ROM_SIZE as u32;
pub const ADDR_MASK: u32 = 0xFF_FFFF;

pub const HDI08_BASES: [u32; 3] = [0xFFD000, 0xFFD800, 0xFFE000];

pub const DDR_GP: u32 = 0xFFF906;
pub const PORT_GP: u32 = 0xFFF907;
pub const PORT_E0: u32 = 0xFFFA11;
pub const PORT_E1: u32 = 0xFFFA13;
pub const DDR_E: u32 = 0xFFFA15;
pub const PE_PAR: u32 = 0xFFFA17;
pub const PORT_F0: u32 = 0xFFFA19;
pub const PORT_F1: u32 = 0xFFFA1B;
pub const DDR_F: u32 = 0xFFFA1D;
pub const PF_PAR: u32 = 0xFFFA1F;
pub const PORT_QS: u32 = 0xFFFC15;
pub const PQS_PAR: u32 = 0xFFFC16;
pub const DDR_QS: u32 = 0xFFFC17;

/// Port QS pin wired to the DSP reset input (active low).
pub const PIN_QS_DSP_RESET: u8 = 3;

pub struct MqMc {
    ram: Vec<u8>,
    rom: Vec<u8>,
    flash: Am29f,
    lcd: Lcd,
    buttons: Buttons,
    leds: Leds,
    port_gp: Port,
    port_e: Port,
    port_f: Port,
    port_qs: Port,
    hdi08: Vec<Hdi08>,
    events: EventQueue,
    dsp_reset_request: bool,
    dsp_reset_completed: bool,
}

impl MqMc {
    /// `rom` becomes the live flash contents. `dsp_count` selects how many
    /// host interfaces are decoded.
    pub fn new(rom: Vec<u8>, dsp_count: usize, flash: Am29f) -> Self {
        MqMc {
            ram: vec![0; RAM_SIZE as usize],
            rom,
            flash,
            lcd: Lcd::new(),
            buttons: Buttons::new(),
            leds: Leds::new(),
            port_gp: Port::new(),
            port_e: Port::new(),
            port_f: Port::new(),
            port_qs: Port::new(),
            hdi08: (0..dsp_count.clamp(1, HDI08_BASES.len())).map(|_| Hdi08::new()).collect(),
            events: EventQueue::new(),
            dsp_reset_request: false,
            dsp_reset_completed: false,
        }
    }

    /// Power-on state of everything but RAM contents, flash and panel inputs.
    pub fn reset(&mut self) {
        self.port_gp.reset();
        self.port_e.reset();
        self.port_f.reset();
        self.port_qs.reset();
        self.lcd.reset();
        self.flash.reset();
        for h in &mut self.hdi08 {
            h.reset();
        }
        self.events.clear();
        self.dsp_reset_request = false;
        self.dsp_reset_completed = false;
    }

    fn hdi_index(addr: u32) -> Option<(usize, u32)> {
        HDI08_BASES
            .iter()
            .position(|&b| (b..b + hdi08::HDI08_SIZE).contains(&addr))
            .map(|i| (i, addr - HDI08_BASES[i]))
    }

    fn hdi(&mut self, addr: u32) -> Option<(&mut Hdi08, u32)> {
        let (i, offset) = Self::hdi_index(addr)?;
        self.hdi08.get_mut(i).map(|h| (h, offset))
    }

    fn in_rom(addr: u32) -> bool {
        (ROM_ADDR..ROM_ADDR + ROM_SIZE).contains(&addr)
    }

    fn process_lcd_and_leds(&mut self) {
        if !self.lcd.exec(&mut self.port_gp, &self.port_f, &mut self.events) {
            self.leds.exec(&self.port_f, &self.port_gp, &self.port_e, &mut self.events);
        }
    }

    fn set_direction(&mut self, id: PortId, direction: u8) {
        let port = match id {
            PortId::Gp => &mut self.port_gp,
            PortId::E => &mut self.port_e,
            PortId::F => &mut self.port_f,
            PortId::Qs => &mut self.port_qs,
        };
        if port.set_direction(direction) {
            trace!("port {id:?} direction {direction:#04x}");
            self.events.push(Event::PortDirection { port: id, direction });
        }
    }

    fn on_port_qs_written(&mut self) {
        let reset_is_output = self.port_qs.direction() & (1 << PIN_QS_DSP_RESET) != 0;

        if reset_is_output {
            if !self.port_qs.bit_test(PIN_QS_DSP_RESET) && !self.dsp_reset_request {
                debug!("uc requests DSP reset");
                self.dsp_reset_request = true;
                self.dsp_reset_completed = false;
            }
        } else if self.dsp_reset_completed {
            self.dsp_reset_request = false;
            self.port_qs.write_rx(1 << PIN_QS_DSP_RESET);
        }
    }

    pub fn request_dsp_reset(&self) -> bool {
        self.dsp_reset_request
    }

    /// Release the reset line once the CPU stops driving it.
    pub fn notify_dsp_booted(&mut self) {
        self.dsp_reset_completed = true;
        self.on_port_qs_written();
    }

    fn write_port(&mut self, addr: u32, v: u8) -> bool {
        match addr {
            PORT_GP => {
                self.port_gp.write_tx(v);
                self.process_lcd_and_leds();
            }
            DDR_GP => self.set_direction(PortId::Gp, v),
            PORT_E0 | PORT_E1 => {
                self.port_e.write_tx(v);
                self.process_lcd_and_leds();
            }
            DDR_E => self.set_direction(PortId::E, v),
            PE_PAR => self.port_e.enable_pins(!v),
            PORT_F0 | PORT_F1 => {
                self.port_f.write_tx(v);
                self.process_lcd_and_leds();
            }
            DDR_F => self.set_direction(PortId::F, v),
            PF_PAR => self.port_f.enable_pins(!v),
            PORT_QS => {
                self.port_qs.write_tx(v);
                self.on_port_qs_written();
            }
            DDR_QS => {
                self.set_direction(PortId::Qs, v);
                self.on_port_qs_written();
            }
            PQS_PAR => self.port_qs.enable_pins(!v),
            _ => return false,
        }
        true
    }

    fn read_port(&mut self, addr: u32) -> Option<u8> {
        let v = match addr {
            PORT_GP => {
                self.buttons.process_buttons(&mut self.port_gp, &mut self.port_e);
                self.port_gp.read()
            }
            DDR_GP => self.port_gp.direction(),
            PORT_E0 | PORT_E1 => self.port_e.read(),
            DDR_E => self.port_e.direction(),
            PE_PAR => !self.port_e.enabled_pins(),
            PORT_F0 | PORT_F1 => self.port_f.read(),
            DDR_F => self.port_f.direction(),
            PF_PAR => !self.port_f.enabled_pins(),
            PORT_QS => self.port_qs.read(),
            DDR_QS => self.port_qs.direction(),
            PQS_PAR => !self.port_qs.enabled_pins(),
            _ => return None,
        };
        Some(v)
    }

    pub fn lcd(&self) -> &Lcd {
        &self.lcd
    }

    pub fn lcd_mut(&mut self) -> &mut Lcd {
        &mut self.lcd
    }

    pub fn buttons(&self) -> &Buttons {
        &self.buttons
    }

    pub fn buttons_mut(&mut self) -> &mut Buttons {
        &mut self.buttons
    }

    pub fn leds(&self) -> &Leds {
        &self.leds
    }

    pub fn leds_mut(&mut self) -> &mut Leds {
        &mut self.leds
    }

    pub fn port(&self, id: PortId) -> &Port {
        match id {
            PortId::Gp => &self.port_gp,
            PortId::E => &self.port_e,
            PortId::F => &self.port_f,
            PortId::Qs => &self.port_qs,
        }
    }

    pub fn hdi08_count(&self) -> usize {
        self.hdi08.len()
    }

    pub fn hdi08_mut(&mut self, index: usize) -> Option<&mut Hdi08> {
        self.hdi08.get_mut(index)
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn flash_mut(&mut self) -> &mut Am29f {
        &mut self.flash
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn drain_events(&mut self) -> std::vec::Drain<'_, Event> {
        self.events.drain()
    }
}

impl Bus for MqMc {
    fn read8(&mut self, addr: u32) -> Option<u8> {
        let a = addr & ADDR_MASK;
        if a < RAM_SIZE {
            return Some(self.ram[a as usize]);
        }
        if Self::in_rom(a) {
            return Some(self.rom[(a - ROM_ADDR) as usize]);
        }
        if let Some((h, offset)) = self.hdi(a) {
            return Some(h.read8(offset));
        }
        self.read_port(a)
    }

    fn read16(&mut self, addr: u32) -> Option<u16> {
        let a = addr & ADDR_MASK;
        if a + 1 < RAM_SIZE {
            let i = a as usize;
            return Some(u16::from_be_bytes([self.ram[i], self.ram[i + 1]]));
        }
        if Self::in_rom(a) && Self::in_rom(a + 1) {
            let i = (a - ROM_ADDR) as usize;
            return Some(u16::from_be_bytes([self.rom[i], self.rom[i + 1]]));
        }
        if let Some((h, offset)) = self.hdi(a) {
            return Some(h.read16(offset));
        }
        match (self.read_port(a), self.read_port(a + 1)) {
            (None, None) => None,
            (hi, lo) => Some(u16::from_be_bytes([hi.unwrap_or(0), lo.unwrap_or(0)])),
        }
    }

    fn write8(&mut self, addr: u32, v: u8) -> bool {
        let a = addr & ADDR_MASK;
        if a < RAM_SIZE {
            self.ram[a as usize] = v;
            return true;
        }
        if Self::in_rom(a) {
            trace!("write8 to flash addr={a:#x} value={v:#04x}");
            self.flash.write(&mut self.rom, a - ROM_ADDR, v as u16);
            return true;
        }
        if let Some((h, offset)) = self.hdi(a) {
            h.write8(offset, v);
            return true;
        }
        self.write_port(a, v)
    }

    fn write16(&mut self, addr: u32, v: u16) -> bool {
        let a = addr & ADDR_MASK;
        if a + 1 < RAM_SIZE {
            let i = a as usize;
            self.ram[i..i + 2].copy_from_slice(&v.to_be_bytes());
            return true;
        }
        if Self::in_rom(a) {
            trace!("write16 to flash addr={a:#x} value={v:#06x}");
            self.flash.write(&mut self.rom, a - ROM_ADDR, v);
            return true;
        }
        if let Some((h, offset)) = self.hdi(a) {
            h.write16(offset, v);
            return true;
        }
        let [hi, lo] = v.to_be_bytes();
        let a_hi = self.write_port(a, hi);
        let a_lo = self.write_port(a + 1, lo);
        a_hi || a_lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcd::{PIN_E, PIN_RS};
    use crate::peripherals::{ButtonType, Led, PIN_F_STROBE};

    fn mc() -> MqMc {
        MqMc::new(crate::rom::test_image(), 1, Am29f::new(false, false))
    }

    #[test]
    fn test_ram_and_rom_windows() {
        let mut m = mc();
        assert!(m.write16(0x100, 0xBEEF));
        assert_eq!(m.read8(0x100), Some(0xBE));
        assert_eq!(m.read16(0x100), Some(0xBEEF));
        assert_eq!(m.read8(ROM_ADDR + 0x100), Some(b'm'));
        assert_eq!(m.read8(0xFFFA04), None);
        assert!(!m.write8(0xFFFA04, 0));
    }

    #[test]
    fn test_rom_writes_go_through_flash_decoder() {
        let mut m = mc();
        // a plain write does not change the image
        m.write16(ROM_ADDR + 0x2000, 0x1234);
        assert_eq!(m.read16(ROM_ADDR + 0x2000), Some(0xFFFF));

        m.write16(ROM_ADDR + 0x555, 0xAA);
        m.write16(ROM_ADDR + 0x2AA, 0x55);
        m.write16(ROM_ADDR + 0x555, 0xA0);
        m.write16(ROM_ADDR + 0x2000, 0x1234);
        assert_eq!(m.read16(ROM_ADDR + 0x2000), Some(0x1234));
        assert_eq!(&m.rom()[0x2000..0x2002], &[0x12, 0x34]);
    }

    #[test]
    fn test_port_f_direction_raises_event() {
        let mut m = mc();
        m.write8(DDR_F, 0xFF);
        m.write8(DDR_F, 0xFF);
        let ev: Vec<_> = m.drain_events().collect();
        assert_eq!(ev, vec![Event::PortDirection { port: PortId::F, direction: 0xFF }]);
    }

    #[test]
    fn test_lcd_cycle_blocks_led_latch() {
        let mut m = mc();
        m.write8(DDR_GP, 0xFF);
        m.write8(DDR_F, 0xFF);
        m.drain_events().for_each(drop);

        // data write to the LCD while the LED strobe is also high
        m.write8(PORT_GP, b'A');
        m.write8(PORT_F0, (1 << PIN_RS) | (1 << PIN_E) | (1 << PIN_F_STROBE));
        m.write8(PORT_F0, 1 << PIN_RS);
        assert_eq!(m.lcd().ddram()[0], b'A');
        assert_eq!(m.leds().states_mask(), 0);

        // a plain strobe latches LEDs
        m.write8(PORT_GP, 0b00001);
        m.write8(PORT_F0, 1 << PIN_F_STROBE);
        assert!(m.leds().led(Led::Inst1));
        let ev: Vec<_> = m.drain_events().collect();
        assert!(ev.contains(&Event::Lcd));
        assert!(ev.contains(&Event::Leds));
    }

    #[test]
    fn test_button_scan_through_bus() {
        let mut m = mc();
        m.write8(DDR_E, 0x0F);
        m.buttons_mut().set_button(ButtonType::Inst3, true);
        m.write8(PORT_E0, 0x0B);
        assert_eq!(m.read8(PORT_GP), Some(0b100));
    }

    #[test]
    fn test_dsp_reset_latch() {
        let mut m = mc();
        m.write8(DDR_QS, 1 << PIN_QS_DSP_RESET);
        m.write8(PORT_QS, 0);
        assert!(m.request_dsp_reset());

        // still driven: the line stays requested
        m.notify_dsp_booted();
        assert!(m.request_dsp_reset());

        // CPU lets go of the line, it is released and pulled high
        m.write8(DDR_QS, 0);
        assert!(!m.request_dsp_reset());
        assert!(m.port(PortId::Qs).bit_test(PIN_QS_DSP_RESET));
    }

    #[test]
    fn test_hdi08_window() {
        let mut m = mc();
        m.write8(HDI08_BASES[0] + hdi08::REG_TXH, 1);
        m.write8(HDI08_BASES[0] + hdi08::REG_TXM, 2);
        m.write8(HDI08_BASES[0] + hdi08::REG_TXL, 3);
        assert_eq!(m.hdi08_mut(0).and_then(|h| h.poll_tx()), Some(0x010203));
        // second interface is not fitted
        assert_eq!(m.read8(HDI08_BASES[1]), None);
    }
}
