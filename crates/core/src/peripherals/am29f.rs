//! AM29F-style parallel flash command decoder.
//!
//! The firmware updater talks to the flash through JEDEC unlock sequences
//! written into the ROM window. The chip does not own its storage: the
//! caller passes the live ROM image on every bus write, so the CPU keeps
//! reading exactly what was programmed.
//!
//! Supported commands:
//! - Chip Erase: 555/AA 2AA/55 555/80 555/AA 2AA/55 555/10
//! - Sector Erase: 555/AA 2AA/55 555/80 555/AA 2AA/55, then sector address
//! - Program: 555/AA 2AA/55 555/A0, then address/word

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashCommand {
    ChipErase,
    SectorErase,
    Program,
}

const COMMANDS: [FlashCommand; 3] = [
    FlashCommand::ChipErase,
    FlashCommand::SectorErase,
    FlashCommand::Program,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BusCycle {
    addr: u16,
    data: u8,
}

pub struct Am29f {
    patterns: Vec<Vec<BusCycle>>,
    use_write_enable: bool,
    write_enable: bool,
    current_bus_cycle: usize,
    current_command: Option<FlashCommand>,
}

impl Am29f {
    /// `use_write_enable` gates all writes behind [`Am29f::set_write_enable`].
    /// `bitreversed_cmd_addr` is for boards that wire the address lines in
    /// reverse order, so the unlock addresses are seen mirrored.
    pub fn new(use_write_enable: bool, bitreversed_cmd_addr: bool) -> Self {
        let br = |x: u16| -> u16 {
            if bitreversed_cmd_addr {
                x.reverse_bits() >> 4
            } else {
                x
            }
        };
        let c = |addr: u16, data: u8| BusCycle { addr: br(addr), data };

        let chip_erase = vec![
            c(0x555, 0xAA), c(0x2AA, 0x55), c(0x555, 0x80),
            c(0x555, 0xAA), c(0x2AA, 0x55), c(0x555, 0x10),
        ];
        let sector_erase = chip_erase[..5].to_vec();
        let program = vec![c(0x555, 0xAA), c(0x2AA, 0x55), c(0x555, 0xA0)];

        Am29f {
            patterns: vec![chip_erase, sector_erase, program],
            use_write_enable,
            write_enable: false,
            current_bus_cycle: 0,
            current_command: None,
        }
    }

    pub fn reset(&mut self) {
        self.current_bus_cycle = 0;
        self.current_command = None;
    }

    pub fn set_write_enable(&mut self, enable: bool) {
        self.write_enable = enable;
    }

    pub fn write_enabled(&self) -> bool {
        !self.use_write_enable || self.write_enable
    }

    /// Command armed by the last fully matched sequence, waiting for its operand.
    pub fn armed_command(&self) -> Option<FlashCommand> {
        self.current_command
    }

    /// Feed one bus write. `addr` is relative to the start of `rom`.
    pub fn write(&mut self, rom: &mut [u8], addr: u32, data: u16) {
        if !self.write_enabled() {
            self.reset();
            return;
        }

        let a = (addr & 0xFFF) as u16;
        let d = (data & 0xFF) as u8;

        let mut any_match = false;
        for (i, cycles) in self.patterns.iter().enumerate() {
            if let Some(c) = cycles.get(self.current_bus_cycle) {
                if c.addr == a && c.data == d {
                    any_match = true;
                    if self.current_bus_cycle == cycles.len() - 1 {
                        self.current_command = Some(COMMANDS[i]);
                    }
                }
            }
        }

        if any_match {
            self.current_bus_cycle += 1;
            return;
        }

        if let Some(cmd) = self.current_command {
            execute(rom, cmd, addr, data);
        }
        self.reset();
    }
}

fn execute(rom: &mut [u8], cmd: FlashCommand, addr: u32, data: u16) {
    match cmd {
        FlashCommand::ChipErase => {
            debug!("flash: chip erase");
            rom.fill(0xFF);
        }
        FlashCommand::SectorErase => {
            let Some((start, size)) = sector_at(addr) else {
                warn!("flash: unable to erase sector at {addr:#x}, out of bounds");
                return;
            };
            let end = (start + size).min(rom.len());
            if start >= end {
                return;
            }
            debug!("flash: erasing sector at {start:#x}, size {size:#x}");
            rom[start..end].fill(0xFF);
        }
        FlashCommand::Program => {
            let addr = addr as usize;
            if addr + 1 >= rom.len() {
                return;
            }
            debug!("flash: programming word at {addr:#x}, value {data:#06x}");
            rom[addr..addr + 2].copy_from_slice(&data.to_be_bytes());
        }
    }
}

/// Bottom boot block layout. The firmware sends top boot block sector
/// addresses for the last sector; those all map onto the final 64K sector.
fn sector_at(addr: u32) -> Option<(usize, usize)> {
    let (start, kb) = match addr {
        0x00000 => (0x00000, 16),
        0x04000 | 0x06000 => (addr, 8),
        0x08000 => (0x08000, 32),
        0x10000 | 0x20000 | 0x30000 | 0x40000 | 0x50000 | 0x60000 | 0x70000 => (addr, 64),
        0x78000 | 0x7A000 | 0x7C000 => (0x70000, 64),
        _ => return None,
    };
    Some((start as usize, kb * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(flash: &mut Am29f, rom: &mut [u8], seq: &[(u32, u16)]) {
        for &(a, d) in seq {
            flash.write(rom, a, d);
        }
    }

    const PROGRAM: [(u32, u16); 3] = [(0x555, 0xAA), (0x2AA, 0x55), (0x555, 0xA0)];

    #[test]
    fn test_program_writes_exactly_one_word() {
        let mut rom = vec![0xFFu8; 0x1000];
        let mut flash = Am29f::new(false, false);
        feed(&mut flash, &mut rom, &PROGRAM);
        assert_eq!(flash.armed_command(), Some(FlashCommand::Program));

        flash.write(&mut rom, 0x100, 0x1234);
        assert_eq!(&rom[0x100..0x102], &[0x12, 0x34]);
        let touched = rom.iter().enumerate().filter(|&(i, &b)| b != 0xFF && !(0x100..0x102).contains(&i)).count();
        assert_eq!(touched, 0);
        assert_eq!(flash.armed_command(), None);
    }

    #[test]
    fn test_broken_sequence_leaves_buffer_untouched() {
        let mut rom = vec![0xFFu8; 0x1000];
        let mut flash = Am29f::new(false, false);
        feed(&mut flash, &mut rom, &PROGRAM[..2]);
        flash.write(&mut rom, 0x123, 0x42);
        flash.write(&mut rom, 0x200, 0x0000);
        assert!(rom.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_write_enable_gates_everything() {
        let mut rom = vec![0xFFu8; 0x1000];
        let mut flash = Am29f::new(true, false);
        feed(&mut flash, &mut rom, &PROGRAM);
        flash.write(&mut rom, 0x10, 0x0000);
        assert!(rom.iter().all(|&b| b == 0xFF));
        assert_eq!(flash.armed_command(), None);

        flash.set_write_enable(true);
        feed(&mut flash, &mut rom, &PROGRAM);
        flash.write(&mut rom, 0x10, 0x0000);
        assert_eq!(&rom[0x10..0x12], &[0, 0]);
    }

    #[test]
    fn test_bitreversed_command_addresses() {
        let mut rom = vec![0xFFu8; 0x1000];
        let mut flash = Am29f::new(false, true);
        // 0x555 -> 0xAAA, 0x2AA -> 0x554
        feed(&mut flash, &mut rom, &[(0xAAA, 0xAA), (0x554, 0x55), (0xAAA, 0xA0)]);
        flash.write(&mut rom, 0x20, 0xBEEF);
        assert_eq!(&rom[0x20..0x22], &[0xBE, 0xEF]);
    }

    #[test]
    fn test_sector_erase_remaps_top_boot_sectors() {
        let mut rom = vec![0u8; 0x80000];
        let mut flash = Am29f::new(false, false);
        feed(&mut flash, &mut rom, &PROGRAM[..2]);
        feed(&mut flash, &mut rom, &[(0x555, 0x80), (0x555, 0xAA), (0x2AA, 0x55)]);
        assert_eq!(flash.armed_command(), Some(FlashCommand::SectorErase));
        flash.write(&mut rom, 0x7A000, 0x30);
        assert!(rom[0x70000..].iter().all(|&b| b == 0xFF));
        assert!(rom[..0x70000].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sector_erase_small_sector() {
        let mut rom = vec![0u8; 0x80000];
        let mut flash = Am29f::new(false, false);
        feed(&mut flash, &mut rom, &[(0x555, 0xAA), (0x2AA, 0x55), (0x555, 0x80), (0x555, 0xAA), (0x2AA, 0x55)]);
        flash.write(&mut rom, 0x04000, 0x30);
        assert!(rom[0x4000..0x6000].iter().all(|&b| b == 0xFF));
        assert_eq!(rom[0x3FFF], 0);
        assert_eq!(rom[0x6000], 0);
    }

    #[test]
    fn test_chip_erase_runs_on_next_cycle() {
        let mut rom = vec![0u8; 0x1000];
        let mut flash = Am29f::new(false, false);
        feed(&mut flash, &mut rom, &[
            (0x555, 0xAA), (0x2AA, 0x55), (0x555, 0x80),
            (0x555, 0xAA), (0x2AA, 0x55), (0x555, 0x10),
        ]);
        assert_eq!(flash.armed_command(), Some(FlashCommand::ChipErase));
        flash.write(&mut rom, 0, 0);
        assert!(rom.iter().all(|&b| b == 0xFF));
    }
}
