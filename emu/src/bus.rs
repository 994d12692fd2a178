//! System bus: address decoding, wait states and the IO register file.
//!
//! The bus owns every peripheral and the scheduler. Each access charges
//! the region's wait states to the master clock *before* the data moves,
//! and charging the clock fires any events that come due, so the CPU
//! observes peripheral side effects (an IRQ latching, a timer reloading)
//! at the correct instruction boundary.
//!
//! | Region | Contents            | 16-bit access | 32-bit access |
//! |--------|---------------------|---------------|---------------|
//! | 0x00   | BIOS                | 1             | 1             |
//! | 0x02   | EWRAM               | 3             | 6             |
//! | 0x03   | IWRAM               | 1             | 1             |
//! | 0x04   | IO                  | 1             | 1             |
//! | 0x05   | Palette RAM         | 1             | 2             |
//! | 0x06   | VRAM                | 1             | 2             |
//! | 0x07   | OAM                 | 1             | 1             |
//! | 0x08+  | ROM (3 wait groups) | per WAITCNT   | two halves    |
//! | 0x0E   | SRAM                | per WAITCNT   | per WAITCNT   |

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::hardware::apu::Apu;
use crate::cpu::hardware::dma::Dma;
use crate::cpu::hardware::gpio::Gpio;
use crate::cpu::hardware::interrupts::{Interrupt, Interrupts};
use crate::cpu::hardware::keypad::Keypad;
use crate::cpu::hardware::lcd::Lcd;
use crate::cpu::hardware::timers::Timers;
use crate::memory::internal_memory::InternalMemory;
use crate::scheduler::{EventClass, Scheduler};

/// How an access relates to the previous one on the same bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    NonSequential,
    Sequential,
    /// An opcode fetch; sequential cost, and it refreshes the open-bus
    /// value.
    Code,
}

impl Access {
    const fn sequential(self) -> bool {
        matches!(self, Self::Sequential | Self::Code)
    }
}

/// HALTCNT state driving the core run loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltControl {
    #[default]
    Run,
    Halt,
    /// Stop mode behaves like halt here; the wake predicate is the same.
    Stop,
}

const ROM_NONSEQ_TABLE: [u64; 4] = [4, 3, 2, 8];
const ROM_SEQ_TABLE: [[u64; 2]; 3] = [[2, 1], [4, 1], [8, 1]];

#[derive(Clone, Serialize, Deserialize)]
pub struct Bus {
    pub scheduler: Scheduler,
    pub memory: InternalMemory,
    pub lcd: Lcd,
    pub apu: Apu,
    pub dma: Dma,
    pub timers: Timers,
    pub keypad: Keypad,
    pub interrupts: Interrupts,
    pub gpio: Gpio,
    pub haltcnt: HaltControl,

    waitcnt: u16,
    post_boot_flag: u16,
    rom_nonseq: [u64; 3],
    rom_seq: [u64; 3],
    sram_wait: u64,

    /// Last successfully fetched opcode word; unmapped reads return it.
    last_fetch: u32,
}

impl Default for Bus {
    fn default() -> Self {
        let mut bus = Self {
            scheduler: Scheduler::new(),
            memory: InternalMemory::default(),
            lcd: Lcd::default(),
            apu: Apu::default(),
            dma: Dma::default(),
            timers: Timers::default(),
            keypad: Keypad::default(),
            interrupts: Interrupts::default(),
            gpio: Gpio::default(),
            haltcnt: HaltControl::Run,
            waitcnt: 0,
            post_boot_flag: 0,
            rom_nonseq: [0; 3],
            rom_seq: [0; 3],
            sram_wait: 0,
            last_fetch: 0,
        };
        bus.update_waitcnt(0);
        bus
    }
}

impl Bus {
    /// Reset the peripherals and reschedule their periodic events. The
    /// attached BIOS/ROM survive.
    pub fn reset(&mut self) {
        self.scheduler.reset();
        self.memory.reset();
        self.interrupts.reset();
        self.dma.reset();
        self.timers.reset();
        self.gpio.reset();
        self.haltcnt = HaltControl::Run;
        self.post_boot_flag = 0;
        self.last_fetch = 0;
        self.update_waitcnt(0);

        self.lcd.reset(&mut self.scheduler);
        self.apu.reset(&mut self.scheduler);
        self.keypad.reset(&mut self.scheduler);
    }

    // ── Clock ──────────────────────────────────────────────────────

    /// Advance the master clock, firing every event that becomes due.
    pub fn step(&mut self, cycles: u64) {
        let target = self.scheduler.now() + cycles;
        while let Some((class, param)) = self.scheduler.advance_toward(target) {
            self.dispatch(class, param);
        }
    }

    /// Internal CPU cycles with no bus activity.
    pub fn idle(&mut self, cycles: u64) {
        self.step(cycles);
    }

    fn dispatch(&mut self, class: EventClass, _param: u64) {
        let Self {
            ref mut scheduler,
            ref mut lcd,
            ref mut apu,
            ref mut dma,
            ref mut timers,
            ref mut keypad,
            ref mut interrupts,
            ..
        } = *self;

        match class {
            EventClass::PpuHBlank => lcd.on_hblank(interrupts, dma, scheduler),
            EventClass::PpuHDraw => lcd.on_hdraw(interrupts, dma, scheduler),
            EventClass::ApuMixer => apu.step_mixer(scheduler),
            EventClass::ApuSequencer => apu.step_sequencer(scheduler),
            EventClass::ApuPsg1Generate => apu.psg1.generate(scheduler),
            EventClass::ApuPsg2Generate => apu.psg2.generate(scheduler),
            EventClass::ApuPsg3Generate => apu.psg3.generate(scheduler),
            EventClass::ApuPsg4Generate => apu.psg4.generate(scheduler),
            EventClass::Timer0Overflow => {
                timers.handle_overflow(0, scheduler, interrupts, apu, dma);
            }
            EventClass::Timer1Overflow => {
                timers.handle_overflow(1, scheduler, interrupts, apu, dma);
            }
            EventClass::Timer2Overflow => {
                timers.handle_overflow(2, scheduler, interrupts, apu, dma);
            }
            EventClass::Timer3Overflow => {
                timers.handle_overflow(3, scheduler, interrupts, apu, dma);
            }
            EventClass::KeypadPoll => keypad.on_poll(interrupts, scheduler),
        }
    }

    // ── Wait states ────────────────────────────────────────────────

    fn update_waitcnt(&mut self, value: u16) {
        self.waitcnt = value & 0x5FFF;
        self.sram_wait = ROM_NONSEQ_TABLE[usize::from(value.get_bits(0..=1))] + 1;
        for group in 0..3 {
            let shift = (2 + group * 3) as u8;
            self.rom_nonseq[group] =
                ROM_NONSEQ_TABLE[usize::from(value.get_bits(shift..=shift + 1))] + 1;
            self.rom_seq[group] =
                ROM_SEQ_TABLE[group][usize::from(value.get_bits(shift + 2..=shift + 2))] + 1;
        }
    }

    fn wait_cycles(&self, address: u32, width: u32, access: Access) -> u64 {
        match (address >> 24) & 0xF {
            0x02 => {
                if width == 4 {
                    6
                } else {
                    3
                }
            }
            0x05 | 0x06 => {
                if width == 4 {
                    2
                } else {
                    1
                }
            }
            region @ 0x08..=0x0D => {
                let group = ((region - 8) / 2) as usize;
                let first = if access.sequential() {
                    self.rom_seq[group]
                } else {
                    self.rom_nonseq[group]
                };
                // The Game Pak bus is 16 bits wide; a word is two
                // halves, the second always sequential.
                if width == 4 {
                    first + self.rom_seq[group]
                } else {
                    first
                }
            }
            0x0E | 0x0F => self.sram_wait,
            _ => 1,
        }
    }

    // ── Raw byte dispatch ──────────────────────────────────────────

    fn open_bus(&self, address: u32) -> u8 {
        self.last_fetch.get_byte((address & 3) as u8)
    }

    fn read_raw(&mut self, address: u32) -> u8 {
        match address >> 24 {
            0x00 => {
                if address < 0x4000 {
                    self.memory.read_bios(address)
                } else {
                    self.open_bus(address)
                }
            }
            0x02 => self.memory.read_ewram(address),
            0x03 => self.memory.read_iwram(address),
            0x04 => self.read_io_byte(address),
            0x05 => self.lcd.read_pram(address),
            0x06 => self.lcd.read_vram(address),
            0x07 => self.lcd.read_oam(address),
            0x08..=0x0D => {
                let offset = address & 0x01FF_FFFF;
                if let Some(value) = self.gpio_read(offset) {
                    value
                } else {
                    self.memory.read_rom(address)
                }
            }
            0x0E | 0x0F => self.memory.read_sram(address),
            _ => {
                logger::trace(format!("read on unused memory {address:#010X}"));
                self.open_bus(address)
            }
        }
    }

    fn gpio_read(&self, offset: u32) -> Option<u8> {
        if !(0xC4..=0xC9).contains(&offset) {
            return None;
        }
        let value = self.gpio.read(offset & !1)?;
        Some(value.get_byte((offset & 1) as u8))
    }

    fn write_raw_half_aligned(&mut self, address: u32, value: u16) {
        match address >> 24 {
            0x00 => logger::trace("write on BIOS region ignored"),
            0x02 => {
                self.memory.write_ewram(address, value.get_byte(0));
                self.memory.write_ewram(address + 1, value.get_byte(1));
            }
            0x03 => {
                self.memory.write_iwram(address, value.get_byte(0));
                self.memory.write_iwram(address + 1, value.get_byte(1));
            }
            0x04 => self.write_io_half(address, value),
            0x05 => {
                self.lcd.write_pram(address, value.get_byte(0));
                self.lcd.write_pram(address + 1, value.get_byte(1));
            }
            0x06 => {
                self.lcd.write_vram(address, value.get_byte(0));
                self.lcd.write_vram(address + 1, value.get_byte(1));
            }
            0x07 => {
                self.lcd.write_oam(address, value.get_byte(0));
                self.lcd.write_oam(address + 1, value.get_byte(1));
            }
            0x08..=0x0D => {
                let offset = address & 0x01FF_FFFF;
                if (0xC4..=0xC9).contains(&offset) {
                    self.gpio.write(offset, value, &mut self.interrupts);
                } else {
                    logger::trace(format!("write on ROM region {address:#010X}"));
                }
            }
            0x0E | 0x0F => self.memory.write_sram(address, value.get_byte(0)),
            _ => logger::trace(format!("write on unused memory {address:#010X}")),
        }
    }

    // ── CPU/DMA facing accessors ───────────────────────────────────

    pub fn read_byte(&mut self, address: u32, access: Access) -> u8 {
        let wait = self.wait_cycles(address, 1, access);
        self.step(wait);
        self.read_raw(address)
    }

    pub fn read_half(&mut self, address: u32, access: Access) -> u16 {
        let wait = self.wait_cycles(address, 2, access);
        self.step(wait);

        let address = address & !1;
        let value = match address >> 24 {
            0x04 => self.read_io_half(address),
            // The 8-bit SRAM bus replicates its byte on both lanes.
            0x0E | 0x0F => u16::from(self.memory.read_sram(address)) * 0x0101,
            _ => {
                u16::from_le_bytes([self.read_raw(address), self.read_raw(address + 1)])
            }
        };

        if matches!(access, Access::Code) {
            self.last_fetch = (u32::from(value) << 16) | u32::from(value);
        }
        value
    }

    pub fn read_word(&mut self, address: u32, access: Access) -> u32 {
        let wait = self.wait_cycles(address, 4, access);
        self.step(wait);

        let address = address & !3;
        let value = match address >> 24 {
            0x04 => {
                u32::from(self.read_io_half(address))
                    | (u32::from(self.read_io_half(address + 2)) << 16)
            }
            0x0E | 0x0F => u32::from(self.memory.read_sram(address)) * 0x0101_0101,
            _ => u32::from_le_bytes([
                self.read_raw(address),
                self.read_raw(address + 1),
                self.read_raw(address + 2),
                self.read_raw(address + 3),
            ]),
        };

        if matches!(access, Access::Code) {
            self.last_fetch = value;
        }
        value
    }

    /// Misaligned word loads rotate the aligned word so the addressed
    /// byte lands in the low lane.
    pub fn read_word_rotated(&mut self, address: u32, access: Access) -> u32 {
        let value = self.read_word(address & !3, access);
        value.rotate_right(8 * (address & 3))
    }

    pub fn write_byte(&mut self, address: u32, value: u8, access: Access) {
        let wait = self.wait_cycles(address, 1, access);
        self.step(wait);

        match address >> 24 {
            0x02 => self.memory.write_ewram(address, value),
            0x03 => self.memory.write_iwram(address, value),
            0x04 => self.write_io_byte(address, value),
            // Byte stores to the video memories have dedicated quirks.
            0x05 => self.lcd.write_pram_byte(address, value),
            0x06 => self.lcd.write_vram_byte(address, value),
            0x07 => self.lcd.write_oam_byte(address, value),
            0x08..=0x0D => {
                let offset = address & 0x01FF_FFFF;
                if (0xC4..=0xC9).contains(&offset) {
                    let mut half = self.gpio.read(offset & !1).unwrap_or(0);
                    half.set_byte((offset & 1) as u8, value);
                    self.gpio.write(offset & !1, half, &mut self.interrupts);
                } else {
                    logger::trace(format!("byte write on ROM region {address:#010X}"));
                }
            }
            0x0E | 0x0F => self.memory.write_sram(address, value),
            _ => logger::trace(format!("write on unused memory {address:#010X}")),
        }
    }

    pub fn write_half(&mut self, address: u32, value: u16, access: Access) {
        let wait = self.wait_cycles(address, 2, access);
        self.step(wait);
        self.write_raw_half_aligned(address & !1, value);
    }

    pub fn write_word(&mut self, address: u32, value: u32, access: Access) {
        let wait = self.wait_cycles(address, 4, access);
        self.step(wait);
        let address = address & !3;
        self.write_raw_half_aligned(address, value as u16);
        self.write_raw_half_aligned(address + 2, (value >> 16) as u16);
    }

    // ── IO register file ───────────────────────────────────────────

    fn read_io_byte(&mut self, address: u32) -> u8 {
        match self.peek_io_half(address & !1) {
            Some(half) => half.get_byte((address & 1) as u8),
            None => {
                logger::trace(format!("read on unused IO {address:#010X}"));
                self.open_bus(address)
            }
        }
    }

    fn read_io_half(&mut self, address: u32) -> u16 {
        match self.peek_io_half(address) {
            Some(half) => half,
            None => {
                logger::trace(format!("read on unused IO {address:#010X}"));
                u16::from_le_bytes([self.open_bus(address), self.open_bus(address + 1)])
            }
        }
    }

    /// The readable IO registers. `None` means write-only or unmapped,
    /// which the callers turn into open bus.
    #[allow(clippy::too_many_lines)]
    pub(crate) fn peek_io_half(&self, address: u32) -> Option<u16> {
        let lcd = &self.lcd;
        let apu = &self.apu;
        Some(match address {
            0x0400_0000 => lcd.dispcnt,
            0x0400_0002 => lcd.green_swap,
            0x0400_0004 => lcd.dispstat,
            0x0400_0006 => lcd.vcount,
            0x0400_0008 => lcd.bgcnt[0],
            0x0400_000A => lcd.bgcnt[1],
            0x0400_000C => lcd.bgcnt[2],
            0x0400_000E => lcd.bgcnt[3],
            0x0400_0048 => lcd.winin,
            0x0400_004A => lcd.winout,
            0x0400_0050 => lcd.bldcnt,
            0x0400_0052 => lcd.bldalpha,

            0x0400_0060 => apu.psg1.sweep,
            0x0400_0062 => apu.psg1.duty_length_envelope,
            0x0400_0064 => apu.psg1.frequency_control & 0x47FF,
            0x0400_0068 => apu.psg2.duty_length_envelope,
            0x0400_006C => apu.psg2.frequency_control & 0x47FF,
            0x0400_0070 => apu.psg3.stop_wave_ram_select,
            0x0400_0072 => apu.psg3.length_volume,
            0x0400_0074 => apu.psg3.frequency_control & 0x47FF,
            0x0400_0078 => apu.psg4.length_envelope,
            0x0400_007C => apu.psg4.frequency_control & 0x40FF,
            0x0400_0080 => apu.soundcnt_l,
            0x0400_0082 => apu.soundcnt_h,
            0x0400_0084 => apu.read_soundcnt_x(),
            0x0400_0088 => apu.bias.raw,
            0x0400_0090..=0x0400_009F => {
                let offset = (address - 0x0400_0090) as usize;
                u16::from(apu.psg3.read_ram(offset))
                    | (u16::from(apu.psg3.read_ram(offset + 1)) << 8)
            }

            0x0400_00BA => self.dma.channels[0].control,
            0x0400_00C6 => self.dma.channels[1].control,
            0x0400_00D2 => self.dma.channels[2].control,
            0x0400_00DE => self.dma.channels[3].control,

            0x0400_0100 => self.timers.read_counter(0, &self.scheduler),
            0x0400_0102 => self.timers.read_control(0),
            0x0400_0104 => self.timers.read_counter(1, &self.scheduler),
            0x0400_0106 => self.timers.read_control(1),
            0x0400_0108 => self.timers.read_counter(2, &self.scheduler),
            0x0400_010A => self.timers.read_control(2),
            0x0400_010C => self.timers.read_counter(3, &self.scheduler),
            0x0400_010E => self.timers.read_control(3),

            0x0400_0130 => self.keypad.key_input,
            0x0400_0132 => self.keypad.key_interrupt_control,

            0x0400_0200 => self.interrupts.interrupt_enable,
            0x0400_0202 => self.interrupts.interrupt_request,
            0x0400_0204 => self.waitcnt,
            0x0400_0208 => self.interrupts.interrupt_master_enable,
            0x0400_0300 => self.post_boot_flag,

            _ => return None,
        })
    }

    /// Merge one halfword write into a 32-bit reference-point register.
    fn merge_reference_half(raw: u32, address: u32, value: u16) -> u32 {
        let mut raw = raw;
        let base = (address & 2) as u8;
        raw.set_byte(base, value.get_byte(0));
        raw.set_byte(base + 1, value.get_byte(1));
        raw
    }

    #[allow(clippy::too_many_lines)]
    fn write_io_half(&mut self, address: u32, value: u16) {
        let lcd = &mut self.lcd;
        match address {
            0x0400_0000 => lcd.dispcnt = value,
            0x0400_0002 => lcd.green_swap = value,
            // The flag bits 0-2 are read-only.
            0x0400_0004 => lcd.dispstat = (lcd.dispstat & 0x0007) | (value & 0xFFB8),
            0x0400_0006 => logger::trace("write on read-only VCOUNT"),
            0x0400_0008 => lcd.bgcnt[0] = value,
            0x0400_000A => lcd.bgcnt[1] = value,
            0x0400_000C => lcd.bgcnt[2] = value,
            0x0400_000E => lcd.bgcnt[3] = value,
            0x0400_0010 => lcd.bghofs[0] = value & 0x1FF,
            0x0400_0012 => lcd.bgvofs[0] = value & 0x1FF,
            0x0400_0014 => lcd.bghofs[1] = value & 0x1FF,
            0x0400_0016 => lcd.bgvofs[1] = value & 0x1FF,
            0x0400_0018 => lcd.bghofs[2] = value & 0x1FF,
            0x0400_001A => lcd.bgvofs[2] = value & 0x1FF,
            0x0400_001C => lcd.bghofs[3] = value & 0x1FF,
            0x0400_001E => lcd.bgvofs[3] = value & 0x1FF,
            0x0400_0020 => lcd.bgpa[0] = value,
            0x0400_0022 => lcd.bgpb[0] = value,
            0x0400_0024 => lcd.bgpc[0] = value,
            0x0400_0026 => lcd.bgpd[0] = value,
            0x0400_0028 | 0x0400_002A => {
                lcd.write_bgx(0, Self::merge_reference_half(lcd.bgx[0], address, value));
            }
            0x0400_002C | 0x0400_002E => {
                lcd.write_bgy(0, Self::merge_reference_half(lcd.bgy[0], address, value));
            }
            0x0400_0030 => lcd.bgpa[1] = value,
            0x0400_0032 => lcd.bgpb[1] = value,
            0x0400_0034 => lcd.bgpc[1] = value,
            0x0400_0036 => lcd.bgpd[1] = value,
            0x0400_0038 | 0x0400_003A => {
                lcd.write_bgx(1, Self::merge_reference_half(lcd.bgx[1], address, value));
            }
            0x0400_003C | 0x0400_003E => {
                lcd.write_bgy(1, Self::merge_reference_half(lcd.bgy[1], address, value));
            }
            0x0400_0040 => lcd.win0h = value,
            0x0400_0042 => lcd.win1h = value,
            0x0400_0044 => lcd.win0v = value,
            0x0400_0046 => lcd.win1v = value,
            0x0400_0048 => lcd.winin = value & 0x3F3F,
            0x0400_004A => lcd.winout = value & 0x3F3F,
            0x0400_004C => lcd.mosaic = value,
            0x0400_0050 => lcd.bldcnt = value & 0x3FFF,
            0x0400_0052 => lcd.bldalpha = value & 0x1F1F,
            0x0400_0054 => lcd.bldy = value & 0x1F,

            0x0400_0060 => self.apu.psg1.sweep = value & 0x7F,
            0x0400_0062 => self.apu.psg1.duty_length_envelope = value,
            0x0400_0064 => self.apu.psg1.write_frequency_control(value, &mut self.scheduler),
            0x0400_0068 => self.apu.psg2.duty_length_envelope = value,
            0x0400_006C => self.apu.psg2.write_frequency_control(value, &mut self.scheduler),
            0x0400_0070 => self.apu.psg3.stop_wave_ram_select = value & 0x00E0,
            0x0400_0072 => self.apu.psg3.length_volume = value,
            0x0400_0074 => self.apu.psg3.write_frequency_control(value, &mut self.scheduler),
            0x0400_0078 => self.apu.psg4.length_envelope = value,
            0x0400_007C => self.apu.psg4.write_frequency_control(value, &mut self.scheduler),
            0x0400_0080 => self.apu.soundcnt_l = value & 0xFF77,
            0x0400_0082 => self.apu.write_soundcnt_h(value),
            0x0400_0084 => self.apu.master_enable = value.is_bit_on(7),
            0x0400_0088 => self.apu.bias.raw = value & 0xC3FE,
            0x0400_0090..=0x0400_009F => {
                let offset = (address - 0x0400_0090) as usize;
                self.apu.psg3.write_ram(offset, value.get_byte(0));
                self.apu.psg3.write_ram(offset + 1, value.get_byte(1));
            }
            0x0400_00A0 | 0x0400_00A2 => self.apu.fifo[0].write_half(value),
            0x0400_00A4 | 0x0400_00A6 => self.apu.fifo[1].write_half(value),

            0x0400_00B0..=0x0400_00DE => Self::write_dma_half(&mut self.dma, address, value),

            0x0400_0100 => self.timers.write_reload(0, value),
            0x0400_0102 => self.timers.write_control(0, value, &mut self.scheduler),
            0x0400_0104 => self.timers.write_reload(1, value),
            0x0400_0106 => self.timers.write_control(1, value, &mut self.scheduler),
            0x0400_0108 => self.timers.write_reload(2, value),
            0x0400_010A => self.timers.write_control(2, value, &mut self.scheduler),
            0x0400_010C => self.timers.write_reload(3, value),
            0x0400_010E => self.timers.write_control(3, value, &mut self.scheduler),

            0x0400_0130 => logger::trace("write on read-only KEYINPUT"),
            0x0400_0132 => self.keypad.key_interrupt_control = value,

            0x0400_0200 => self.interrupts.interrupt_enable = value & 0x3FFF,
            0x0400_0202 => self.interrupts.acknowledge(value),
            0x0400_0204 => self.update_waitcnt(value),
            0x0400_0208 => self.interrupts.interrupt_master_enable = value & 1,
            0x0400_0300 => {
                self.post_boot_flag = value & 1;
                // HALTCNT shares the halfword; bit 15 selects stop.
                self.haltcnt = if value.is_bit_on(15) {
                    HaltControl::Stop
                } else {
                    HaltControl::Halt
                };
            }
            _ => logger::trace(format!("write on unused IO {address:#010X}")),
        }
    }

    /// Halfword layout per channel: SAD lo/hi, DAD lo/hi, count, control.
    fn write_dma_half(dma: &mut Dma, address: u32, value: u16) {
        let offset = address - 0x0400_00B0;
        let channel = (offset / 12) as usize;
        match offset % 12 {
            0 => {
                let sad = &mut dma.channels[channel].source_address;
                *sad = (*sad & 0xFFFF_0000) | u32::from(value);
            }
            2 => {
                let sad = &mut dma.channels[channel].source_address;
                *sad = (*sad & 0x0000_FFFF) | (u32::from(value & 0x0FFF) << 16);
            }
            4 => {
                let dad = &mut dma.channels[channel].destination_address;
                *dad = (*dad & 0xFFFF_0000) | u32::from(value);
            }
            6 => {
                let dad = &mut dma.channels[channel].destination_address;
                *dad = (*dad & 0x0000_FFFF) | (u32::from(value & 0x0FFF) << 16);
            }
            8 => dma.channels[channel].word_count = value,
            10 => dma.write_control(channel, value),
            _ => logger::trace(format!("write on unused DMA IO {address:#010X}")),
        }
    }

    fn write_io_byte(&mut self, address: u32, value: u8) {
        // The FIFO ports take bytes without disturbing their neighbors.
        match address {
            0x0400_00A0..=0x0400_00A3 => {
                self.apu.fifo[0].write_byte(value);
                return;
            }
            0x0400_00A4..=0x0400_00A7 => {
                self.apu.fifo[1].write_byte(value);
                return;
            }
            // HALTCNT proper is the single byte at 0x301.
            0x0400_0301 => {
                self.haltcnt = if value.is_bit_on(7) {
                    HaltControl::Stop
                } else {
                    HaltControl::Halt
                };
                return;
            }
            0x0400_0300 => {
                self.post_boot_flag = u16::from(value & 1);
                return;
            }
            _ => {}
        }

        let half = address & !1;
        let mut current = self.peek_io_half(half).unwrap_or(0);
        current.set_byte((address & 1) as u8, value);
        self.write_io_half(half, current);
    }

    // ── Host-facing peeks (no clock, no side effects) ──────────────

    #[must_use]
    pub fn peek_byte_io(&self, address: u32) -> u8 {
        self.peek_io_half(address & !1)
            .unwrap_or(0)
            .get_byte((address & 1) as u8)
    }

    #[must_use]
    pub fn peek_half_io(&self, address: u32) -> u16 {
        self.peek_io_half(address & !1).unwrap_or(0)
    }

    #[must_use]
    pub fn peek_word_io(&self, address: u32) -> u32 {
        u32::from(self.peek_half_io(address))
            | (u32::from(self.peek_half_io(address.wrapping_add(2))) << 16)
    }

    // ── DMA engine ─────────────────────────────────────────────────

    /// Run one transfer unit of the highest-priority active channel.
    /// Bus accesses charge the clock exactly like CPU accesses do.
    pub fn dma_run(&mut self) {
        let Some(index) = self.dma.current_channel() else {
            return;
        };

        let channel = self.dma.channels[index];
        let fifo_mode = channel.fifo_mode(index);
        let word = fifo_mode || channel.word_transfer();
        let access = if channel.first_access {
            Access::NonSequential
        } else {
            Access::Sequential
        };

        if word {
            let source = channel.latch_source & !3;
            let value = self.read_word(source, access);
            self.write_word(channel.latch_destination & !3, value, access);
        } else {
            let source = channel.latch_source & !1;
            let value = self.read_half(source, access);
            self.write_half(channel.latch_destination & !1, value, access);
        }

        let unit_bytes = if word { 4 } else { 2 };
        let channel_state = &mut self.dma.channels[index];
        channel_state.first_access = false;
        channel_state.latch_source = channel.source_step().apply(channel.latch_source, unit_bytes);
        if !fifo_mode {
            channel_state.latch_destination = channel
                .destination_step()
                .apply(channel.latch_destination, unit_bytes);
        }
        channel_state.latch_count -= 1;

        if channel_state.latch_count == 0 {
            self.dma_complete(index);
        }
    }

    fn dma_complete(&mut self, index: usize) {
        let fifo_mode = self.dma.channels[index].fifo_mode(index);
        let channel = &mut self.dma.channels[index];

        if channel.repeat() && channel.timing() != 0 {
            // Stays armed for the next occasion.
            if !fifo_mode {
                channel.latch_count = channel.initial_count(index);
                if channel.destination_step() == crate::cpu::hardware::dma::Step::IncrementReload {
                    channel.latch_destination = channel.destination_address;
                }
            }
        } else {
            channel.control.set_bit_off(15);
        }

        let raise_irq = channel.irq_on_complete();
        self.dma.set_active(index, false);
        if raise_irq {
            self.interrupts.raise(Interrupt::dma(index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_read_returns_last_fetch() {
        let mut bus = Bus::default();
        bus.memory.rom = vec![0x11, 0x22, 0x33, 0x44];

        bus.read_word(0x0800_0000, Access::Code);
        let value = bus.read_word(0x0100_0000, Access::NonSequential);

        assert_eq!(value, 0x4433_2211);
    }

    #[test]
    fn rom_wait_states_follow_waitcnt() {
        let mut bus = Bus::default();
        bus.memory.rom = vec![0; 16];

        // Default WS0: 4+1 non-sequential, 2+1 sequential.
        let start = bus.scheduler.now();
        bus.read_half(0x0800_0000, Access::NonSequential);
        assert_eq!(bus.scheduler.now() - start, 5);

        let start = bus.scheduler.now();
        bus.read_half(0x0800_0002, Access::Sequential);
        assert_eq!(bus.scheduler.now() - start, 3);

        // WS0 fastest: 2+1 non-sequential, 1+1 sequential.
        bus.write_half(0x0400_0204, 0b0001_1000, Access::NonSequential);
        let start = bus.scheduler.now();
        bus.read_word(0x0800_0000, Access::NonSequential);
        assert_eq!(bus.scheduler.now() - start, 3 + 2);
    }

    #[test]
    fn io_roundtrip_and_readonly_bits() {
        let mut bus = Bus::default();

        bus.write_half(0x0400_0000, 0x1234, Access::NonSequential);
        assert_eq!(bus.peek_half_io(0x0400_0000), 0x1234);

        // VCOUNT ignores writes.
        bus.write_half(0x0400_0006, 0x00FF, Access::NonSequential);
        assert_eq!(bus.peek_half_io(0x0400_0006), 0);

        // DISPSTAT keeps its status bits.
        bus.lcd.dispstat = 0x0003;
        bus.write_half(0x0400_0004, 0xFFFF, Access::NonSequential);
        assert_eq!(bus.peek_half_io(0x0400_0004) & 0x0007, 0x0003);
    }

    #[test]
    fn interrupt_acknowledge_is_write_one_to_clear() {
        let mut bus = Bus::default();
        bus.interrupts.raise(Interrupt::VBlank);
        bus.interrupts.raise(Interrupt::Timer0);

        bus.write_half(0x0400_0202, 1 << Interrupt::VBlank as u16, Access::NonSequential);

        assert_eq!(
            bus.peek_half_io(0x0400_0202),
            1 << Interrupt::Timer0 as u16
        );
    }

    #[test]
    fn haltcnt_write_enters_halt() {
        let mut bus = Bus::default();
        assert_eq!(bus.haltcnt, HaltControl::Run);

        bus.write_byte(0x0400_0301, 0, Access::NonSequential);
        assert_eq!(bus.haltcnt, HaltControl::Halt);

        bus.write_byte(0x0400_0301, 0x80, Access::NonSequential);
        assert_eq!(bus.haltcnt, HaltControl::Stop);
    }

    #[test]
    fn immediate_dma_copies_memory() {
        let mut bus = Bus::default();
        for (i, byte) in [1u8, 2, 3, 4, 5, 6, 7, 8].iter().enumerate() {
            bus.memory.write_ewram(0x0200_0000 + i as u32, *byte);
        }

        // Channel 0: EWRAM -> IWRAM, 2 words, immediate, 32-bit.
        bus.write_half(0x0400_00B0, 0x0000, Access::NonSequential);
        bus.write_half(0x0400_00B2, 0x0200, Access::NonSequential);
        bus.write_half(0x0400_00B4, 0x0000, Access::NonSequential);
        bus.write_half(0x0400_00B6, 0x0300, Access::NonSequential);
        bus.write_half(0x0400_00B8, 2, Access::NonSequential);
        bus.write_half(0x0400_00BA, 0x8400, Access::NonSequential);

        assert!(bus.dma.is_running());
        while bus.dma.is_running() {
            bus.dma_run();
        }

        for i in 0..8u32 {
            assert_eq!(bus.memory.read_iwram(0x0300_0000 + i), (i + 1) as u8);
        }
        // Enable bit cleared on completion.
        assert!(!bus.dma.channels[0].enabled());
    }

    #[test]
    fn dma_completion_can_raise_irq() {
        let mut bus = Bus::default();
        bus.write_half(0x0400_00B8, 1, Access::NonSequential);
        bus.write_half(0x0400_00BA, 0xC400, Access::NonSequential);

        while bus.dma.is_running() {
            bus.dma_run();
        }

        assert_ne!(
            bus.interrupts.interrupt_request & (1 << Interrupt::Dma0 as u16),
            0
        );
    }

    #[test]
    fn gpio_visible_only_when_enabled() {
        let mut bus = Bus::default();
        bus.memory.rom = vec![0xAB; 0x200];

        // Port invisible: ROM bytes show through.
        assert_eq!(bus.read_byte(0x0800_00C4, Access::NonSequential), 0xAB);

        bus.write_half(0x0800_00C8, 1, Access::NonSequential);
        assert_eq!(bus.read_half(0x0800_00C8, Access::NonSequential), 1);
    }

    #[test]
    fn step_fires_due_events_before_returning() {
        let mut bus = Bus::default();
        bus.reset();

        // The first PPU H-blank is 1006 cycles in.
        bus.step(1006);
        assert!(bus.lcd.dispstat.is_bit_on(1));
    }
}
