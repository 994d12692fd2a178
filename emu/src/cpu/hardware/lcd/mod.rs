//! Pixel processing unit: line-timed renderer and its MMIO registers.
//!
//! A scanline is 1232 master cycles, 1006 of them visible. The PPU keeps
//! two periodic scheduler events: the H-blank edge (cycle 1006 of every
//! line, where the just-finished visible line is rendered) and the line
//! boundary (cycle 1232, where VCOUNT advances and the V-blank/V-count
//! conditions are evaluated). 160 visible lines are followed by 68
//! blanking lines, 228 in total per frame.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::bitwise::Bits;
use crate::cpu::hardware::dma::{Dma, Occasion};
use crate::cpu::hardware::interrupts::{Interrupt, Interrupts};
use crate::scheduler::{EventClass, Scheduler};

mod render;

pub const DISPLAY_WIDTH: usize = 240;
pub const DISPLAY_HEIGHT: usize = 160;

pub const CYCLES_PER_SCANLINE: u64 = 1232;
pub const CYCLES_HDRAW: u64 = 1006;
pub const TOTAL_SCANLINES: u16 = 228;

pub const PRAM_SIZE: usize = 0x400;
pub const VRAM_SIZE: usize = 0x1_8000;
pub const OAM_SIZE: usize = 0x400;

/// VRAM below this offset belongs to the backgrounds; at or above it to
/// the sprite tiles. Byte writes land differently in the two halves.
const VRAM_OBJ_BASE: u32 = 0x1_0000;

#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
pub struct Lcd {
    /// LCD Control
    pub dispcnt: u16,
    /// Undocumented - Green Swap
    pub green_swap: u16,
    /// General LCD Status (V-blank/H-blank/V-count flags and IRQ enables)
    pub dispstat: u16,
    /// Vertical Counter
    pub vcount: u16,
    /// BG0-BG3 Control
    pub bgcnt: [u16; 4],
    /// BG0-BG3 X-Offset
    pub bghofs: [u16; 4],
    /// BG0-BG3 Y-Offset
    pub bgvofs: [u16; 4],
    /// BG2/BG3 Rotation/Scaling Parameters (dx, dmx, dy, dmy)
    pub bgpa: [u16; 2],
    pub bgpb: [u16; 2],
    pub bgpc: [u16; 2],
    pub bgpd: [u16; 2],
    /// BG2/BG3 Reference Point X-Coordinate (28-bit signed, 8 fractional)
    pub bgx: [u32; 2],
    /// BG2/BG3 Reference Point Y-Coordinate
    pub bgy: [u32; 2],
    /// Reference points latched for the frame in flight. A write to BGX
    /// reloads only the X latch, a write to BGY only the Y latch.
    internal_x: [i32; 2],
    internal_y: [i32; 2],
    /// Window 0/1 Horizontal and Vertical Dimensions
    pub win0h: u16,
    pub win1h: u16,
    pub win0v: u16,
    pub win1v: u16,
    /// Inside of Window 0 and 1
    pub winin: u16,
    /// Inside of OBJ Window & Outside of Windows
    pub winout: u16,
    /// Mosaic Size
    pub mosaic: u16,
    /// Color Special Effects Selection
    pub bldcnt: u16,
    /// Alpha Blending Coefficients
    pub bldalpha: u16,
    /// Brightness Coefficient
    pub bldy: u16,

    #[serde_as(as = "serde_with::Bytes")]
    pram: Box<[u8; PRAM_SIZE]>,
    vram: Vec<u8>,
    #[serde_as(as = "serde_with::Bytes")]
    oam: Box<[u8; OAM_SIZE]>,

    #[serde(skip, default = "frame_buffer")]
    frame: Vec<u32>,
    #[serde(skip)]
    frame_ready: bool,
}

fn frame_buffer() -> Vec<u32> {
    vec![0; DISPLAY_WIDTH * DISPLAY_HEIGHT]
}

impl Default for Lcd {
    fn default() -> Self {
        Self {
            dispcnt: 0,
            green_swap: 0,
            dispstat: 0,
            vcount: 0,
            bgcnt: [0; 4],
            bghofs: [0; 4],
            bgvofs: [0; 4],
            bgpa: [0x100; 2],
            bgpb: [0; 2],
            bgpc: [0; 2],
            bgpd: [0x100; 2],
            bgx: [0; 2],
            bgy: [0; 2],
            internal_x: [0; 2],
            internal_y: [0; 2],
            win0h: 0,
            win1h: 0,
            win0v: 0,
            win1v: 0,
            winin: 0,
            winout: 0,
            mosaic: 0,
            bldcnt: 0,
            bldalpha: 0,
            bldy: 0,
            pram: Box::new([0; PRAM_SIZE]),
            vram: vec![0; VRAM_SIZE],
            oam: Box::new([0; OAM_SIZE]),
            frame: frame_buffer(),
            frame_ready: false,
        }
    }
}

impl Lcd {
    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        *self = Self::default();
        scheduler.add(CYCLES_HDRAW, EventClass::PpuHBlank);
        scheduler.add(CYCLES_PER_SCANLINE, EventClass::PpuHDraw);
    }

    /// H-blank edge of the current line.
    pub fn on_hblank(
        &mut self,
        interrupts: &mut Interrupts,
        dma: &mut Dma,
        scheduler: &mut Scheduler,
    ) {
        self.dispstat.set_bit_on(1);
        if self.dispstat.is_bit_on(4) {
            interrupts.raise(Interrupt::HBlank);
        }

        if self.vcount < DISPLAY_HEIGHT as u16 {
            self.render_scanline();
            self.advance_affine_latches();
            dma.request(Occasion::HBlank);
        }

        scheduler.add(CYCLES_PER_SCANLINE, EventClass::PpuHBlank);
    }

    /// Line boundary: advance VCOUNT and evaluate the frame edges.
    pub fn on_hdraw(
        &mut self,
        interrupts: &mut Interrupts,
        dma: &mut Dma,
        scheduler: &mut Scheduler,
    ) {
        self.dispstat.set_bit_off(1);
        self.vcount = (self.vcount + 1) % TOTAL_SCANLINES;

        let vcount_setting = self.dispstat >> 8;
        self.dispstat.set_bit(2, self.vcount == vcount_setting);
        if self.vcount == vcount_setting && self.dispstat.is_bit_on(5) {
            interrupts.raise(Interrupt::VCount);
        }

        match self.vcount {
            160 => {
                self.dispstat.set_bit_on(0);
                if self.dispstat.is_bit_on(3) {
                    interrupts.raise(Interrupt::VBlank);
                }
                dma.request(Occasion::VBlank);
                self.reload_affine_latches();
                self.frame_ready = true;
            }
            227 => self.dispstat.set_bit_off(0),
            _ => {}
        }

        // Video-capture DMA runs on lines 2..=162.
        if (2..=162).contains(&self.vcount) {
            dma.request(Occasion::Video);
        }

        scheduler.add(CYCLES_PER_SCANLINE, EventClass::PpuHDraw);
    }

    fn sign_extend_28(value: u32) -> i32 {
        ((value << 4) as i32) >> 4
    }

    fn reload_affine_latches(&mut self) {
        for bg in 0..2 {
            self.internal_x[bg] = Self::sign_extend_28(self.bgx[bg]);
            self.internal_y[bg] = Self::sign_extend_28(self.bgy[bg]);
        }
    }

    fn advance_affine_latches(&mut self) {
        for bg in 0..2 {
            self.internal_x[bg] += i32::from(self.bgpb[bg] as i16);
            self.internal_y[bg] += i32::from(self.bgpd[bg] as i16);
        }
    }

    /// BGX writes reload the X latch only; BGY likewise for Y.
    pub fn write_bgx(&mut self, bg: usize, value: u32) {
        self.bgx[bg] = value & 0x0FFF_FFFF;
        self.internal_x[bg] = Self::sign_extend_28(self.bgx[bg]);
    }

    pub fn write_bgy(&mut self, bg: usize, value: u32) {
        self.bgy[bg] = value & 0x0FFF_FFFF;
        self.internal_y[bg] = Self::sign_extend_28(self.bgy[bg]);
    }

    /// One completed frame, RGB888, `DISPLAY_WIDTH * DISPLAY_HEIGHT`.
    #[must_use]
    pub fn frame(&self) -> &[u32] {
        &self.frame
    }

    /// Take the end-of-frame flag; the core hands the frame buffer to the
    /// video device when this returns true.
    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    pub fn pram(&self) -> &[u8] {
        &self.pram[..]
    }

    pub fn vram(&self) -> &[u8] {
        &self.vram
    }

    pub fn oam(&self) -> &[u8] {
        &self.oam[..]
    }

    pub fn read_pram(&self, address: u32) -> u8 {
        self.pram[(address as usize) & (PRAM_SIZE - 1)]
    }

    pub fn write_pram(&mut self, address: u32, value: u8) {
        self.pram[(address as usize) & (PRAM_SIZE - 1)] = value;
    }

    /// Byte writes to palette RAM land on both bytes of the halfword.
    pub fn write_pram_byte(&mut self, address: u32, value: u8) {
        let base = (address & !1) as usize & (PRAM_SIZE - 1);
        self.pram[base] = value;
        self.pram[base + 1] = value;
    }

    fn vram_offset(address: u32) -> usize {
        // 96 KiB mirrored in 128 KiB steps, with the upper 32 KiB of each
        // step mirroring the OBJ half.
        let mut offset = (address as usize) & 0x1_FFFF;
        if offset >= VRAM_SIZE {
            offset -= 0x8000;
        }
        offset
    }

    pub fn read_vram(&self, address: u32) -> u8 {
        self.vram[Self::vram_offset(address)]
    }

    pub fn write_vram(&mut self, address: u32, value: u8) {
        self.vram[Self::vram_offset(address)] = value;
    }

    /// Byte writes to VRAM duplicate into the halfword inside the BG
    /// region and are ignored in the OBJ region.
    pub fn write_vram_byte(&mut self, address: u32, value: u8) {
        let offset = Self::vram_offset(address & !1);
        if (offset as u32) < VRAM_OBJ_BASE {
            self.vram[offset] = value;
            self.vram[offset + 1] = value;
        }
    }

    pub fn read_oam(&self, address: u32) -> u8 {
        self.oam[(address as usize) & (OAM_SIZE - 1)]
    }

    pub fn write_oam(&mut self, address: u32, value: u8) {
        self.oam[(address as usize) & (OAM_SIZE - 1)] = value;
    }

    /// Byte writes to OAM are ignored by the hardware.
    pub fn write_oam_byte(&mut self, _address: u32, _value: u8) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_events(lcd: &mut Lcd, scheduler: &mut Scheduler, target: u64) -> Interrupts {
        let mut interrupts = Interrupts::default();
        let mut dma = Dma::default();
        while let Some((class, _)) = scheduler.advance_toward(target) {
            match class {
                EventClass::PpuHBlank => lcd.on_hblank(&mut interrupts, &mut dma, scheduler),
                EventClass::PpuHDraw => lcd.on_hdraw(&mut interrupts, &mut dma, scheduler),
                _ => unreachable!("only PPU events scheduled"),
            }
        }
        interrupts
    }

    #[test]
    fn vcount_advances_every_scanline() {
        let mut lcd = Lcd::default();
        let mut scheduler = Scheduler::new();
        lcd.reset(&mut scheduler);

        run_events(&mut lcd, &mut scheduler, CYCLES_PER_SCANLINE * 3);
        assert_eq!(lcd.vcount, 3);
    }

    #[test]
    fn hblank_flag_tracks_line_phase() {
        let mut lcd = Lcd::default();
        let mut scheduler = Scheduler::new();
        lcd.reset(&mut scheduler);

        run_events(&mut lcd, &mut scheduler, CYCLES_HDRAW);
        assert!(lcd.dispstat.is_bit_on(1));

        run_events(&mut lcd, &mut scheduler, CYCLES_PER_SCANLINE);
        assert!(lcd.dispstat.is_bit_off(1));
    }

    #[test]
    fn vblank_enters_at_line_160_and_leaves_at_227() {
        let mut lcd = Lcd::default();
        let mut scheduler = Scheduler::new();
        lcd.reset(&mut scheduler);
        lcd.dispstat.set_bit_on(3); // V-blank IRQ enable

        let interrupts = run_events(&mut lcd, &mut scheduler, CYCLES_PER_SCANLINE * 160);
        assert_eq!(lcd.vcount, 160);
        assert!(lcd.dispstat.is_bit_on(0));
        assert!(lcd.take_frame_ready());
        assert_eq!(
            interrupts.interrupt_request & (1 << Interrupt::VBlank as u16),
            1 << Interrupt::VBlank as u16
        );

        run_events(&mut lcd, &mut scheduler, CYCLES_PER_SCANLINE * 227);
        assert!(lcd.dispstat.is_bit_off(0));
    }

    #[test]
    fn vcount_match_raises_irq_when_enabled() {
        let mut lcd = Lcd::default();
        let mut scheduler = Scheduler::new();
        lcd.reset(&mut scheduler);
        lcd.dispstat = (42 << 8) | (1 << 5);

        let interrupts = run_events(&mut lcd, &mut scheduler, CYCLES_PER_SCANLINE * 42);
        assert!(lcd.dispstat.is_bit_on(2));
        assert_ne!(
            interrupts.interrupt_request & (1 << Interrupt::VCount as u16),
            0
        );
    }

    #[test]
    fn pram_byte_write_duplicates_into_halfword() {
        let mut lcd = Lcd::default();
        lcd.write_pram_byte(0x0500_0003, 0x7F);

        assert_eq!(lcd.read_pram(0x0500_0002), 0x7F);
        assert_eq!(lcd.read_pram(0x0500_0003), 0x7F);
    }

    #[test]
    fn vram_byte_write_ignored_in_obj_region() {
        let mut lcd = Lcd::default();
        lcd.write_vram_byte(0x0601_0000, 0xAA);
        assert_eq!(lcd.read_vram(0x0601_0000), 0);

        lcd.write_vram_byte(0x0600_0000, 0xAA);
        assert_eq!(lcd.read_vram(0x0600_0000), 0xAA);
        assert_eq!(lcd.read_vram(0x0600_0001), 0xAA);
    }

    #[test]
    fn oam_byte_write_is_ignored() {
        let mut lcd = Lcd::default();
        lcd.write_oam_byte(0x0700_0000, 0x55);
        assert_eq!(lcd.read_oam(0x0700_0000), 0);
    }

    #[test]
    fn bgx_write_reloads_only_x_latch() {
        let mut lcd = Lcd::default();
        lcd.write_bgy(0, 0x100 << 8);
        lcd.internal_y[0] = 77; // pretend mid-frame advance happened

        lcd.write_bgx(0, 0x0800_0000); // negative in 28-bit space
        assert!(lcd.internal_x[0] < 0);
        assert_eq!(lcd.internal_y[0], 77);
    }
}
