//! Top-level system: component wiring and the run loop.
//!
//! The [`Gba`] owns the CPU and the bus (which owns everything else) and
//! advances them against the shared cycle clock. While the CPU runs, the
//! clock moves through its bus accesses; while it is halted, the clock
//! fast-forwards straight to the next scheduled event, interleaving DMA
//! bursts, until an enabled interrupt source wakes the CPU up.

use std::sync::{Arc, Mutex};

use crate::audio::{stereo_ring, StereoResampler};
use crate::bus::{Bus, HaltControl};
use crate::config::Config;
use crate::cpu::arm7tdmi::Arm7tdmi;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::hardware::apu::mp2k::{SoundInfo, SOUND_INFO_POINTER};
use crate::cpu::hardware::gpio::{Rtc, SolarSensor};
use crate::cpu::hardware::keypad::Key;
use crate::memory::internal_memory::BIOS_SIZE;
use crate::save_state::{SaveState, SAVE_STATE_VERSION};
use crate::scheduler::Scheduler;

/// Sentinel for "no MP2K hook detected".
const NO_AUDIO_HOOK: u32 = 0xFFFF_FFFF;

const SOUND_MAIN_CRC32: u32 = 0x27EA_7FCF;
const SOUND_MAIN_LENGTH: usize = 48;

#[derive(Debug, PartialEq, Eq)]
pub enum GbaError {
    /// The BIOS image must be exactly 16 KiB.
    InvalidBiosSize(usize),
}

impl std::fmt::Display for GbaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBiosSize(len) => {
                write!(f, "BIOS image is {len} bytes, expected {BIOS_SIZE}")
            }
        }
    }
}

impl std::error::Error for GbaError {}

pub struct Gba {
    pub cpu: Arm7tdmi,
    pub bus: Bus,
    config: Config,
    hle_audio_hook: u32,
}

impl Gba {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let mut gba = Self {
            cpu: Arm7tdmi::default(),
            bus: Bus::default(),
            config,
            hle_audio_hook: NO_AUDIO_HOOK,
        };
        gba.reset();
        gba
    }

    /// Power-on reset. Attached BIOS/ROM and peripheral handles survive;
    /// everything else goes back to its initial state.
    pub fn reset(&mut self) {
        self.bus.reset();
        self.cpu.reset();

        if self.config.skip_bios {
            self.skip_boot_screen();
        }

        if self.config.audio.mp2k_hle_enable {
            self.bus.apu.mp2k.configure(
                self.config.audio.mp2k_hle_cubic,
                self.config.audio.mp2k_hle_force_reverb,
            );
            self.hle_audio_hook = self.search_sound_main_ram();
            if self.hle_audio_hook != NO_AUDIO_HOOK {
                logger::info(format!(
                    "core: detected MP2K audio mixer @ 0x{:08X}",
                    self.hle_audio_hook
                ));
            }
        } else {
            self.hle_audio_hook = NO_AUDIO_HOOK;
        }

        let (producer, consumer) = stereo_ring(self.config.audio_dev.block_size() * 4);
        self.config.audio_dev.close();
        self.config.audio_dev.open(consumer);
        self.bus.apu.set_output(
            producer,
            StereoResampler::new(self.config.audio.interpolation.kernel()),
            self.config.audio_dev.sample_rate(),
        );
    }

    pub fn attach_bios(&mut self, bios: Vec<u8>) -> Result<(), GbaError> {
        if bios.len() != BIOS_SIZE {
            return Err(GbaError::InvalidBiosSize(bios.len()));
        }
        self.bus.memory.bios = bios;
        Ok(())
    }

    pub fn attach_rom(&mut self, rom: Vec<u8>) {
        self.bus.memory.rom = rom;
    }

    /// Build an RTC, wire it to the cartridge GPIO port and hand the
    /// host its half of the handle.
    pub fn create_rtc(&mut self) -> Arc<Mutex<Rtc>> {
        let rtc = Arc::new(Mutex::new(Rtc::new()));
        self.bus.gpio.attach_rtc(Arc::clone(&rtc));
        rtc
    }

    pub fn create_solar_sensor(&mut self) -> Arc<Mutex<SolarSensor>> {
        let sensor = Arc::new(Mutex::new(SolarSensor::default()));
        self.bus.gpio.attach_solar_sensor(Arc::clone(&sensor));
        sensor
    }

    pub fn set_key_status(&mut self, key: Key, pressed: bool) {
        self.bus.keypad.set_key_status(key, pressed);
    }

    /// Advance emulation by `cycles` master cycles.
    ///
    /// Halted time is not stepped cycle by cycle: when nothing can wake
    /// the CPU before the next scheduled event, the clock jumps straight
    /// to it. Waking costs one extra re-sync cycle.
    pub fn run(&mut self, cycles: u64) {
        let limit = self.bus.scheduler.now() + cycles;

        while self.bus.scheduler.now() < limit {
            if self.bus.haltcnt == HaltControl::Run {
                if self.bus.dma.is_running() {
                    // DMA holds the bus; the CPU waits at the current
                    // instruction boundary.
                    self.bus.dma_run();
                } else {
                    if self.cpu.registers.program_counter() == self.hle_audio_hook {
                        self.run_hle_hook();
                    }
                    self.cpu.step(&mut self.bus);
                }
            } else {
                while self.bus.scheduler.now() < limit
                    && !self.bus.interrupts.should_unhalt_cpu()
                {
                    if self.bus.dma.is_running() {
                        self.bus.dma_run();
                        if self.bus.interrupts.should_unhalt_cpu() {
                            continue;
                        }
                    }

                    let remaining = self.bus.scheduler.remaining_cycles();
                    if remaining == 0 {
                        // Nothing scheduled; drain to the limit.
                        let now = self.bus.scheduler.now();
                        self.bus.step(limit - now);
                    } else {
                        self.bus.step(remaining);
                    }
                }

                if self.bus.interrupts.should_unhalt_cpu() {
                    self.bus.step(1);
                    self.bus.haltcnt = HaltControl::Run;
                }
            }

            if self.bus.lcd.take_frame_ready() {
                self.config.video_dev.draw(self.bus.lcd.frame());
            }
        }
    }

    /// Initialize the CPU as the BIOS boot code would have left it.
    fn skip_boot_screen(&mut self) {
        self.cpu.switch_mode(Mode::System);
        self.cpu.register_bank.r13_svc = 0x0300_7FE0;
        self.cpu.register_bank.r13_irq = 0x0300_7FA0;
        self.cpu.registers.set_register_at(13, 0x0300_7F00);
        self.cpu.registers.set_program_counter(0x0800_0000);
    }

    /// The inspection point for the MP2K hook: the CPU is about to enter
    /// the driver's mixer, so decode this frame's audio instead.
    fn run_hle_hook(&mut self) {
        let Some(sound_info_address) = self.bus.memory.peek_word(SOUND_INFO_POINTER) else {
            return;
        };
        if let Some(info) = SoundInfo::read(&self.bus.memory, sound_info_address) {
            self.bus.apu.mp2k.sound_main_ram(&info, &self.bus.memory);
        }
    }

    /// Scan the ROM for the MP2K `SoundMain` routine and derive the
    /// `SoundMainRAM` entrypoint from the pointer it keeps at +0x74.
    fn search_sound_main_ram(&self) -> u32 {
        search_signature(&self.bus.memory.rom, SOUND_MAIN_CRC32)
    }

    pub fn load_state(&mut self, state: &SaveState) {
        if state.version != SAVE_STATE_VERSION {
            logger::error(format!(
                "rejecting savestate with version {} (expected {})",
                state.version, SAVE_STATE_VERSION
            ));
            return;
        }

        let rom = std::mem::take(&mut self.bus.memory.rom);
        let bios = std::mem::take(&mut self.bus.memory.bios);
        let output = self.bus.apu.take_output();

        self.cpu = state.cpu.clone();
        self.bus = state.bus.clone();

        // A deserialized snapshot carries no BIOS/ROM; re-bind ours.
        if self.bus.memory.rom.is_empty() {
            self.bus.memory.rom = rom;
        }
        if self.bus.memory.bios.is_empty() {
            self.bus.memory.bios = bios;
        }
        self.bus.apu.restore_output(output);
    }

    pub fn copy_state(&self, state: &mut SaveState) {
        state.version = SAVE_STATE_VERSION;
        state.cpu = self.cpu.clone();
        state.bus = self.bus.clone();
    }

    // ── Host accessors ─────────────────────────────────────────────

    #[must_use]
    pub fn rom(&self) -> &[u8] {
        &self.bus.memory.rom
    }

    #[must_use]
    pub fn pram(&self) -> &[u8] {
        self.bus.lcd.pram()
    }

    #[must_use]
    pub fn vram(&self) -> &[u8] {
        self.bus.lcd.vram()
    }

    #[must_use]
    pub fn oam(&self) -> &[u8] {
        self.bus.lcd.oam()
    }

    #[must_use]
    pub fn peek_byte_io(&self, address: u32) -> u8 {
        self.bus.peek_byte_io(address)
    }

    #[must_use]
    pub fn peek_half_io(&self, address: u32) -> u16 {
        self.bus.peek_half_io(address)
    }

    #[must_use]
    pub fn peek_word_io(&self, address: u32) -> u32 {
        self.bus.peek_word_io(address)
    }

    #[must_use]
    pub fn bghofs(&self, id: usize) -> u16 {
        self.bus.lcd.bghofs[id]
    }

    #[must_use]
    pub fn bgvofs(&self, id: usize) -> u16 {
        self.bus.lcd.bgvofs[id]
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.bus.scheduler
    }
}

/// Walk the ROM at halfword stride looking for a block matching the
/// signature checksum; on a hit, follow the function pointer stored at
/// +0x74 past its prologue. A Thumb pointer (bit 0 set) lands two
/// halfwords in, an ARM pointer two words.
fn search_signature(rom: &[u8], signature: u32) -> u32 {
    if rom.len() < SOUND_MAIN_LENGTH {
        return NO_AUDIO_HOOK;
    }

    for address in (0..=rom.len() - SOUND_MAIN_LENGTH).step_by(2) {
        if crc32(&rom[address..address + SOUND_MAIN_LENGTH]) != signature {
            continue;
        }

        let pointer_offset = address + 0x74;
        if pointer_offset + 4 > rom.len() {
            return NO_AUDIO_HOOK;
        }
        let pointer = u32::from_le_bytes([
            rom[pointer_offset],
            rom[pointer_offset + 1],
            rom[pointer_offset + 2],
            rom[pointer_offset + 3],
        ]);

        return if pointer & 1 != 0 {
            (pointer & !1) + 4
        } else {
            (pointer & !3) + 8
        };
    }

    NO_AUDIO_HOOK
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for byte in data {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Access;
    use crate::cpu::hardware::interrupts::Interrupt;
    use crate::cpu::psr::CpuState;

    fn gba_with_skip_bios() -> Gba {
        let config = Config {
            skip_bios: true,
            ..Config::default()
        };
        Gba::new(config)
    }

    /// Place ARM opcodes at the start of ROM and point the CPU at them.
    fn gba_running_rom(program: &[u32]) -> Gba {
        let mut gba = gba_with_skip_bios();
        let mut rom = Vec::new();
        for op in program {
            rom.extend_from_slice(&op.to_le_bytes());
        }
        gba.attach_rom(rom);
        gba
    }

    #[test]
    fn skip_bios_plants_post_boot_cpu_state() {
        let gba = gba_with_skip_bios();

        assert_eq!(gba.cpu.cpsr.mode(), Mode::System);
        assert_eq!(gba.cpu.cpsr.cpu_state(), CpuState::Arm);
        assert_eq!(gba.cpu.register_bank.r13_svc, 0x0300_7FE0);
        assert_eq!(gba.cpu.register_bank.r13_irq, 0x0300_7FA0);
        assert_eq!(gba.cpu.registers.register_at(13), 0x0300_7F00);
        assert_eq!(gba.cpu.registers.program_counter(), 0x0800_0000);
    }

    #[test]
    fn run_executes_instructions_from_rom() {
        // MOV r0, #5; ADD r0, r0, #2; B self (spin).
        let mut gba = gba_running_rom(&[0xE3A0_0005, 0xE280_0002, 0xEAFF_FFFE]);

        gba.run(60);

        assert_eq!(gba.cpu.registers.register_at(0), 7);
    }

    #[test]
    fn halt_fast_forwards_to_timer_wakeup() {
        use crate::scheduler::EventClass;

        let mut gba = gba_with_skip_bios();
        gba.attach_rom(vec![0; 0x100]);

        // Enable the timer 0 IRQ source and master enable.
        gba.bus.write_half(0x0400_0200, 1 << Interrupt::Timer0 as u16, Access::NonSequential);
        gba.bus.write_half(0x0400_0208, 1, Access::NonSequential);

        // Timer 0 overflows 1000 cycles from now.
        gba.bus
            .write_half(0x0400_0100, 0x1_0000u32.wrapping_sub(1000) as u16, Access::NonSequential);
        gba.bus.write_half(0x0400_0102, 0x00C0, Access::NonSequential);

        // Silence the other periodic events so the jump to the timer is
        // observable as a single fast-forward.
        for class in [
            EventClass::PpuHBlank,
            EventClass::PpuHDraw,
            EventClass::ApuMixer,
            EventClass::ApuSequencer,
            EventClass::KeypadPoll,
        ] {
            gba.bus.scheduler.cancel(class);
        }

        let start = gba.bus.scheduler.now();
        assert_eq!(gba.bus.scheduler.remaining_cycles(), 1000);
        gba.bus.haltcnt = crate::bus::HaltControl::Halt;

        gba.run(1001);

        // 1000 cycles of halt plus the single re-sync step; the CPU never
        // stepped an instruction in between.
        assert_eq!(gba.bus.scheduler.now(), start + 1001);
        assert_ne!(
            gba.bus.interrupts.interrupt_request & (1 << Interrupt::Timer0 as u16),
            0
        );
        assert_eq!(gba.bus.haltcnt, crate::bus::HaltControl::Run);
        assert_eq!(gba.cpu.registers.program_counter(), 0x0800_0000);
    }

    #[test]
    fn cpu_takes_irq_after_wake() {
        // Spin loop at 0x08000000.
        let mut gba = gba_running_rom(&[0xEAFF_FFFE]);

        gba.bus.write_half(0x0400_0200, 1 << Interrupt::Timer0 as u16, Access::NonSequential);
        gba.bus.write_half(0x0400_0208, 1, Access::NonSequential);
        gba.cpu.cpsr.set_irq_disable(false);

        gba.bus.interrupts.raise(Interrupt::Timer0);
        gba.run(1);

        assert_eq!(gba.cpu.cpsr.mode(), Mode::Irq);
        assert_eq!(gba.cpu.registers.program_counter(), 0x18);
        assert!(gba.cpu.cpsr.irq_disable());
    }

    #[test]
    fn fifo_pipeline_from_timer_to_latch() {
        let mut gba = gba_with_skip_bios();
        gba.attach_rom(vec![0; 0x100]);

        gba.bus.apu.master_enable = true;
        for byte in [0x01u8, 0x02, 0x03, 0x04] {
            gba.bus.apu.fifo[0].write_byte(byte);
        }

        // Timer 0: reload 0xFFFE, prescaler 1 -> overflow every 2 cycles.
        gba.bus.write_half(0x0400_0100, 0xFFFE, Access::NonSequential);
        gba.bus.write_half(0x0400_0102, 0x0080, Access::NonSequential);

        gba.bus.step(2);
        assert_eq!(gba.bus.apu.fifo_latch(0), 0x01);

        gba.bus.step(4);
        assert_eq!(gba.bus.apu.fifo_latch(0), 0x03);
    }

    #[test]
    fn signature_search_applies_thumb_adjustment() {
        let mut rom = vec![0u8; 0x2000];

        // Synthetic mixer block at 0x1000 and the entrypoint pointer at
        // +0x74 (Thumb, so bit 0 set).
        for (i, byte) in rom[0x1000..0x1000 + SOUND_MAIN_LENGTH].iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(31).wrapping_add(7);
        }
        let signature = crc32(&rom[0x1000..0x1000 + SOUND_MAIN_LENGTH]);
        rom[0x1074..0x1078].copy_from_slice(&0x0800_10A1u32.to_le_bytes());

        assert_eq!(search_signature(&rom, signature), 0x0800_10A4);
        // Position stability: the scan is deterministic.
        assert_eq!(search_signature(&rom, signature), search_signature(&rom, signature));
    }

    #[test]
    fn signature_search_applies_arm_adjustment() {
        let mut rom = vec![0u8; 0x2000];
        for (i, byte) in rom[0x0800..0x0800 + SOUND_MAIN_LENGTH].iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(13).wrapping_add(1);
        }
        let signature = crc32(&rom[0x0800..0x0800 + SOUND_MAIN_LENGTH]);
        rom[0x0874..0x0878].copy_from_slice(&0x0800_2000u32.to_le_bytes());

        assert_eq!(search_signature(&rom, signature), 0x0800_2008);
    }

    #[test]
    fn missing_signature_reports_no_hook() {
        let rom = vec![0xFFu8; 0x400];
        assert_eq!(search_signature(&rom, SOUND_MAIN_CRC32), NO_AUDIO_HOOK);
        assert_eq!(search_signature(&[0u8; 8], SOUND_MAIN_CRC32), NO_AUDIO_HOOK);
    }

    #[test]
    fn copy_and_load_state_round_trip() {
        let mut gba = gba_running_rom(&[0xE3A0_0005, 0xEAFF_FFFE]);
        gba.run(40);

        let mut state = SaveState::default();
        gba.copy_state(&mut state);
        let saved_clock = gba.bus.scheduler.now();

        gba.run(200);
        assert_ne!(gba.bus.scheduler.now(), saved_clock);

        gba.load_state(&state);
        assert_eq!(gba.bus.scheduler.now(), saved_clock);
        assert_eq!(gba.cpu.registers.register_at(0), 5);
    }

    #[test]
    fn load_state_rejects_foreign_version() {
        let mut gba = gba_running_rom(&[0xEAFF_FFFE]);
        gba.run(8);
        let clock = gba.bus.scheduler.now();

        let mut state = SaveState::default();
        state.version = SAVE_STATE_VERSION + 1;
        gba.load_state(&state);

        assert_eq!(gba.bus.scheduler.now(), clock);
    }

    #[test]
    fn determinism_two_runs_same_frames() {
        let run_once = || {
            let mut gba = gba_running_rom(&[
                0xE3A0_0301, // MOV r0, #0x04000000
                0xE3A0_1403, // MOV r1, #0x03000000
                0xE581_0000, // STR r0, [r1]
                0xEAFF_FFFD, // loop back to the STR
            ]);
            gba.run(100_000);
            let mut signature = 0u64;
            for pixel in gba.bus.lcd.frame() {
                signature = signature.wrapping_mul(31).wrapping_add(u64::from(*pixel));
            }
            (signature, gba.bus.scheduler.now())
        };

        assert_eq!(run_once(), run_once());
    }
}
