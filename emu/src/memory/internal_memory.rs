//! Backing stores for BIOS, work RAM, cartridge ROM and SRAM.
//!
//! | Region | Address range           | Size    | Bus width |
//! |--------|-------------------------|---------|-----------|
//! | BIOS   | `0x0000_0000-0000_3FFF` | 16 KiB  | 32 bit    |
//! | EWRAM  | `0x0200_0000-0203_FFFF` | 256 KiB | 16 bit    |
//! | IWRAM  | `0x0300_0000-0300_7FFF` | 32 KiB  | 32 bit    |
//! | ROM    | `0x0800_0000-0DFF_FFFF` | ≤32 MiB | 16 bit    |
//! | SRAM   | `0x0E00_0000-0E00_FFFF` | 64 KiB  | 8 bit     |
//!
//! RAM regions mirror across their whole address window (EWRAM every
//! 256 KiB, IWRAM every 32 KiB). Reading past the end of the loaded ROM
//! returns the low halfword of the halfword address, which is what the
//! Game Pak bus leaves on the data lines.

use serde::{Deserialize, Serialize};

use super::mirrored_offset;

pub const BIOS_SIZE: usize = 0x4000;
pub const EWRAM_SIZE: u32 = 0x4_0000;
pub const IWRAM_SIZE: u32 = 0x8000;
pub const SRAM_SIZE: u32 = 0x1_0000;
pub const ROM_MAX_SIZE: usize = 0x0200_0000;

#[derive(Clone, Serialize, Deserialize)]
pub struct InternalMemory {
    /// Attached separately via [`crate::gba::Gba::attach_bios`]; not part
    /// of a savestate.
    #[serde(skip)]
    pub bios: Vec<u8>,

    /// Attached separately via [`crate::gba::Gba::attach_rom`]; not part
    /// of a savestate.
    #[serde(skip)]
    pub rom: Vec<u8>,

    ewram: Vec<u8>,
    iwram: Vec<u8>,
    sram: Vec<u8>,
}

impl Default for InternalMemory {
    fn default() -> Self {
        Self {
            bios: Vec::new(),
            rom: Vec::new(),
            ewram: vec![0; EWRAM_SIZE as usize],
            iwram: vec![0; IWRAM_SIZE as usize],
            sram: vec![0xFF; SRAM_SIZE as usize],
        }
    }
}

impl InternalMemory {
    /// Clear the mutable stores. BIOS and ROM survive a reset.
    pub fn reset(&mut self) {
        self.ewram.fill(0);
        self.iwram.fill(0);
        // SRAM is battery-backed; a console reset does not erase saves.
    }

    pub fn read_bios(&self, address: u32) -> u8 {
        let offset = mirrored_offset(address, BIOS_SIZE as u32);
        self.bios.get(offset).copied().unwrap_or(0)
    }

    pub fn read_ewram(&self, address: u32) -> u8 {
        self.ewram[mirrored_offset(address, EWRAM_SIZE)]
    }

    pub fn write_ewram(&mut self, address: u32, value: u8) {
        self.ewram[mirrored_offset(address, EWRAM_SIZE)] = value;
    }

    pub fn read_iwram(&self, address: u32) -> u8 {
        self.iwram[mirrored_offset(address, IWRAM_SIZE)]
    }

    pub fn write_iwram(&mut self, address: u32, value: u8) {
        self.iwram[mirrored_offset(address, IWRAM_SIZE)] = value;
    }

    pub fn read_rom(&self, address: u32) -> u8 {
        let offset = (address as usize) & (ROM_MAX_SIZE - 1);
        self.rom.get(offset).copied().unwrap_or_else(|| {
            // Past the end of the cartridge the bus sees the halfword
            // address itself.
            let halfword = (address >> 1) & 0xFFFF;
            (halfword >> (8 * (address & 1))) as u8
        })
    }

    pub fn read_sram(&self, address: u32) -> u8 {
        self.sram[mirrored_offset(address, SRAM_SIZE)]
    }

    pub fn write_sram(&mut self, address: u32, value: u8) {
        self.sram[mirrored_offset(address, SRAM_SIZE)] = value;
    }

    /// Side-effect-free word read used by the high-level audio path to
    /// walk engine structures in RAM and sample data in ROM. Returns
    /// `None` outside the backed regions.
    #[must_use]
    pub fn peek_word(&self, address: u32) -> Option<u32> {
        let read = |f: &dyn Fn(u32) -> u8| {
            let base = address & !3;
            u32::from_le_bytes([f(base), f(base + 1), f(base + 2), f(base + 3)])
        };

        match address >> 24 {
            0x02 => Some(read(&|a| self.read_ewram(a))),
            0x03 => Some(read(&|a| self.read_iwram(a))),
            0x08..=0x0D => {
                let offset = (address as usize) & (ROM_MAX_SIZE - 1);
                if offset + 4 <= self.rom.len() {
                    Some(read(&|a| self.read_rom(a)))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn peek_byte(&self, address: u32) -> Option<u8> {
        match address >> 24 {
            0x02 => Some(self.read_ewram(address)),
            0x03 => Some(self.read_iwram(address)),
            0x08..=0x0D => {
                let offset = (address as usize) & (ROM_MAX_SIZE - 1);
                self.rom.get(offset).copied()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewram_mirrors_every_256k() {
        let mut memory = InternalMemory::default();
        memory.write_ewram(0x0200_0000, 0xAB);

        assert_eq!(memory.read_ewram(0x0204_0000), 0xAB);
        assert_eq!(memory.read_ewram(0x02FC_0000), 0xAB);
    }

    #[test]
    fn iwram_mirrors_every_32k() {
        let mut memory = InternalMemory::default();
        memory.write_iwram(0x0300_7FFF, 0x5A);

        assert_eq!(memory.read_iwram(0x0300_FFFF), 0x5A);
    }

    #[test]
    fn rom_out_of_bounds_returns_halfword_address() {
        let mut memory = InternalMemory::default();
        memory.rom = vec![0; 4];

        // Address 0x0800_0010 -> halfword index 0x0008.
        assert_eq!(memory.read_rom(0x0800_0010), 0x08);
        assert_eq!(memory.read_rom(0x0800_0011), 0x00);
    }

    #[test]
    fn sram_survives_reset() {
        let mut memory = InternalMemory::default();
        memory.write_sram(0x0E00_0000, 0x77);
        memory.write_ewram(0x0200_0000, 0x11);

        memory.reset();

        assert_eq!(memory.read_sram(0x0E00_0000), 0x77);
        assert_eq!(memory.read_ewram(0x0200_0000), 0);
    }
}
