//! CPU state, instruction stepping, exception entry and mode switching.

use serde::{Deserialize, Serialize};

use crate::bus::{Access, Bus};
use crate::cpu::arm::instructions::ArmModeOpcode;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::{CpuState, Psr};
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::{Registers, REG_LR, REG_PROGRAM_COUNTER};
use crate::cpu::thumb::instruction::ThumbModeOpcode;

pub const SIZE_OF_ARM_INSTRUCTION: u32 = 4;
pub const SIZE_OF_THUMB_INSTRUCTION: u32 = 2;

/// Hardware exceptions the core dispatches. Reset is handled by
/// [`Arm7tdmi::reset`] directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    SoftwareInterrupt,
    UndefinedInstruction,
    Irq,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Arm7tdmi {
    pub registers: Registers,
    pub cpsr: Psr,
    pub spsr: Psr,
    pub register_bank: RegisterBank,
}

impl Default for Arm7tdmi {
    fn default() -> Self {
        let mut cpu = Self {
            registers: Registers::default(),
            cpsr: Psr::from(Mode::Supervisor),
            spsr: Psr::default(),
            register_bank: RegisterBank::default(),
        };
        cpu.cpsr.set_irq_disable(true);
        cpu.cpsr.set_fiq_disable(true);
        cpu
    }
}

impl Arm7tdmi {
    /// Power-on state: Supervisor mode, ARM state, interrupts masked,
    /// execution from the reset vector.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Execute one instruction at the current program counter, or take
    /// the IRQ exception when one is pending and not masked.
    pub fn step(&mut self, bus: &mut Bus) {
        if bus.interrupts.pending() && !self.cpsr.irq_disable() {
            self.exception(Exception::Irq);
            // Pipeline refill at the vector.
            bus.idle(1);
            return;
        }

        match self.cpsr.cpu_state() {
            CpuState::Arm => {
                let pc = self.registers.program_counter() & !3;
                self.registers.set_program_counter(pc);
                let op_code = bus.read_word(pc, Access::Code);
                let op = ArmModeOpcode::from(op_code);

                let advance = if self.cpsr.can_execute(op.condition) {
                    self.execute_arm(op, bus)
                } else {
                    true
                };
                if advance {
                    self.registers.advance_program_counter(SIZE_OF_ARM_INSTRUCTION);
                }
            }
            CpuState::Thumb => {
                let pc = self.registers.program_counter() & !1;
                self.registers.set_program_counter(pc);
                let op_code = bus.read_half(pc, Access::Code);
                let op = ThumbModeOpcode::from(op_code);

                if self.execute_thumb(op, bus) {
                    self.registers
                        .advance_program_counter(SIZE_OF_THUMB_INSTRUCTION);
                }
            }
        }
    }

    /// Register read as the executing instruction sees it: R15 reads two
    /// instructions ahead of the one being executed.
    #[must_use]
    pub fn read_register(&self, index: usize) -> u32 {
        if index == REG_PROGRAM_COUNTER {
            let prefetch = match self.cpsr.cpu_state() {
                CpuState::Arm => 2 * SIZE_OF_ARM_INSTRUCTION,
                CpuState::Thumb => 2 * SIZE_OF_THUMB_INSTRUCTION,
            };
            self.registers.program_counter().wrapping_add(prefetch)
        } else {
            self.registers.register_at(index)
        }
    }

    pub fn write_register(&mut self, index: usize, value: u32) {
        self.registers.set_register_at(index, value);
    }

    /// Branch target write: aligns the address for the current state.
    /// The caller reports "do not advance PC" back to `step`.
    pub fn jump(&mut self, address: u32) {
        let mask = match self.cpsr.cpu_state() {
            CpuState::Arm => !3,
            CpuState::Thumb => !1,
        };
        self.registers.set_program_counter(address & mask);
    }

    /// Swap the visible R13/R14 (and R8-R12 for FIQ) with the bank of the
    /// target mode, then update the CPSR mode bits.
    pub fn switch_mode(&mut self, new_mode: Mode) {
        let old_mode = self.cpsr.mode();
        if old_mode == new_mode {
            return;
        }

        self.store_bank(old_mode);
        self.load_bank(new_mode);
        self.cpsr.set_mode(new_mode);
    }

    fn store_bank(&mut self, mode: Mode) {
        let r13 = self.registers.register_at(13);
        let r14 = self.registers.register_at(14);
        let bank = &mut self.register_bank;

        match mode {
            Mode::User | Mode::System => {
                bank.r13_old = r13;
                bank.r14_old = r14;
            }
            Mode::Fiq => {
                for index in 8..=12 {
                    let value = self.registers.register_at(index);
                    match index {
                        8 => bank.r8_fiq = value,
                        9 => bank.r9_fiq = value,
                        10 => bank.r10_fiq = value,
                        11 => bank.r11_fiq = value,
                        _ => bank.r12_fiq = value,
                    }
                }
                bank.r13_fiq = r13;
                bank.r14_fiq = r14;
                bank.spsr_fiq = self.spsr;
            }
            Mode::Irq => {
                bank.r13_irq = r13;
                bank.r14_irq = r14;
                bank.spsr_irq = self.spsr;
            }
            Mode::Supervisor => {
                bank.r13_svc = r13;
                bank.r14_svc = r14;
                bank.spsr_svc = self.spsr;
            }
            Mode::Abort => {
                bank.r13_abt = r13;
                bank.r14_abt = r14;
                bank.spsr_abt = self.spsr;
            }
            Mode::Undefined => {
                bank.r13_und = r13;
                bank.r14_und = r14;
                bank.spsr_und = self.spsr;
            }
        }

        // Entering or leaving FIQ also swaps R8-R12; every other mode
        // shares the User copies.
        if mode != Mode::Fiq {
            let bank = &mut self.register_bank;
            bank.r8_old = self.registers.register_at(8);
            bank.r9_old = self.registers.register_at(9);
            bank.r10_old = self.registers.register_at(10);
            bank.r11_old = self.registers.register_at(11);
            bank.r12_old = self.registers.register_at(12);
        }
    }

    fn load_bank(&mut self, mode: Mode) {
        let bank = &self.register_bank;
        let (r13, r14, spsr) = match mode {
            Mode::User | Mode::System => (bank.r13_old, bank.r14_old, self.spsr),
            Mode::Fiq => (bank.r13_fiq, bank.r14_fiq, bank.spsr_fiq),
            Mode::Irq => (bank.r13_irq, bank.r14_irq, bank.spsr_irq),
            Mode::Supervisor => (bank.r13_svc, bank.r14_svc, bank.spsr_svc),
            Mode::Abort => (bank.r13_abt, bank.r14_abt, bank.spsr_abt),
            Mode::Undefined => (bank.r13_und, bank.r14_und, bank.spsr_und),
        };

        if mode == Mode::Fiq {
            self.registers.set_register_at(8, bank.r8_fiq);
            self.registers.set_register_at(9, bank.r9_fiq);
            self.registers.set_register_at(10, bank.r10_fiq);
            self.registers.set_register_at(11, bank.r11_fiq);
            self.registers.set_register_at(12, bank.r12_fiq);
        } else {
            self.registers.set_register_at(8, bank.r8_old);
            self.registers.set_register_at(9, bank.r9_old);
            self.registers.set_register_at(10, bank.r10_old);
            self.registers.set_register_at(11, bank.r11_old);
            self.registers.set_register_at(12, bank.r12_old);
        }

        self.registers.set_register_at(13, r13);
        self.registers.set_register_at(14, r14);
        self.spsr = spsr;
    }

    /// Exception entry: bank in the handler mode, save the return state,
    /// mask IRQs, force ARM state and jump to the vector.
    pub fn exception(&mut self, kind: Exception) {
        let thumb = self.cpsr.cpu_state() == CpuState::Thumb;
        let pc = self.registers.program_counter();

        let (vector, mode, link) = match kind {
            Exception::UndefinedInstruction => (
                0x04,
                Mode::Undefined,
                pc.wrapping_add(if thumb { 2 } else { 4 }),
            ),
            Exception::SoftwareInterrupt => (
                0x08,
                Mode::Supervisor,
                pc.wrapping_add(if thumb { 2 } else { 4 }),
            ),
            // The IRQ convention leaves LR one instruction long; handlers
            // return with `SUBS PC, LR, #4`.
            Exception::Irq => (0x18, Mode::Irq, pc.wrapping_add(4)),
        };

        let old_cpsr = self.cpsr;
        self.switch_mode(mode);
        self.spsr = old_cpsr;
        self.registers.set_register_at(REG_LR, link);
        self.cpsr.set_irq_disable(true);
        self.cpsr.set_cpu_state(CpuState::Arm);
        self.registers.set_program_counter(vector);
    }

    /// Return-from-exception path used by `MOVS PC` / `SUBS PC`: restore
    /// the saved PSR and rebank.
    pub fn restore_cpsr(&mut self) {
        let saved = self.spsr;
        self.switch_mode(saved.mode());
        self.cpsr = saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_on_state_is_supervisor_arm_masked() {
        let cpu = Arm7tdmi::default();
        assert_eq!(cpu.cpsr.mode(), Mode::Supervisor);
        assert_eq!(cpu.cpsr.cpu_state(), CpuState::Arm);
        assert!(cpu.cpsr.irq_disable());
        assert!(cpu.cpsr.fiq_disable());
        assert_eq!(cpu.registers.program_counter(), 0);
    }

    #[test]
    fn mode_switch_banks_stack_pointers() {
        let mut cpu = Arm7tdmi::default();
        cpu.registers.set_register_at(13, 0x1000);

        cpu.switch_mode(Mode::Irq);
        cpu.registers.set_register_at(13, 0x2000);

        cpu.switch_mode(Mode::Supervisor);
        assert_eq!(cpu.registers.register_at(13), 0x1000);
        assert_eq!(cpu.register_bank.r13_irq, 0x2000);
    }

    #[test]
    fn fiq_banks_r8_to_r12() {
        let mut cpu = Arm7tdmi::default();
        cpu.registers.set_register_at(8, 0xAA);

        cpu.switch_mode(Mode::Fiq);
        cpu.registers.set_register_at(8, 0xBB);

        cpu.switch_mode(Mode::System);
        assert_eq!(cpu.registers.register_at(8), 0xAA);
        assert_eq!(cpu.register_bank.r8_fiq, 0xBB);
    }

    #[test]
    fn irq_exception_enters_handler_mode() {
        let mut cpu = Arm7tdmi::default();
        cpu.switch_mode(Mode::System);
        cpu.cpsr.set_irq_disable(false);
        cpu.registers.set_program_counter(0x0800_0100);

        cpu.exception(Exception::Irq);

        assert_eq!(cpu.cpsr.mode(), Mode::Irq);
        assert!(cpu.cpsr.irq_disable());
        assert_eq!(cpu.registers.program_counter(), 0x18);
        assert_eq!(cpu.registers.register_at(REG_LR), 0x0800_0104);
        assert_eq!(cpu.spsr.mode(), Mode::System);
    }

    #[test]
    fn restore_cpsr_returns_to_saved_mode() {
        let mut cpu = Arm7tdmi::default();
        cpu.switch_mode(Mode::System);
        cpu.cpsr.set_irq_disable(false);
        cpu.registers.set_register_at(13, 0x3000);
        cpu.exception(Exception::Irq);

        cpu.restore_cpsr();

        assert_eq!(cpu.cpsr.mode(), Mode::System);
        assert!(!cpu.cpsr.irq_disable());
        assert_eq!(cpu.registers.register_at(13), 0x3000);
    }

    #[test]
    fn r15_reads_two_instructions_ahead() {
        let mut cpu = Arm7tdmi::default();
        cpu.registers.set_program_counter(0x100);
        assert_eq!(cpu.read_register(15), 0x108);

        cpu.cpsr.set_cpu_state(CpuState::Thumb);
        assert_eq!(cpu.read_register(15), 0x104);
    }
}
