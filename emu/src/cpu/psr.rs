//! Program Status Register (CPSR and SPSR).
//!
//! ```text
//! 31 30 29 28 27      8 7 6 5 4   0
//! ┌──┬──┬──┬──┬────────┬─┬─┬─┬─────┐
//! │N │Z │C │V │Reserved│I│F│T│Mode │
//! └──┴──┴──┴──┴────────┴─┴─┴─┴─────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::{condition::Condition, cpu_modes::Mode};

/// ARM (32-bit opcodes) or Thumb (16-bit opcodes) execution state.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CpuState {
    Arm,
    Thumb,
}

#[derive(Default, Clone, Copy, Serialize, Deserialize)]
pub struct Psr(u32);

impl Psr {
    pub(crate) fn can_execute(self, cond: Condition) -> bool {
        use Condition::{AL, CC, CS, EQ, GE, GT, HI, LE, LS, LT, MI, NE, NV, PL, VC, VS};
        match cond {
            EQ => self.zero_flag(),
            NE => !self.zero_flag(),
            CS => self.carry_flag(),
            CC => !self.carry_flag(),
            MI => self.sign_flag(),
            PL => !self.sign_flag(),
            VS => self.overflow_flag(),
            VC => !self.overflow_flag(),
            HI => self.carry_flag() && !self.zero_flag(),
            LS => !self.carry_flag() || self.zero_flag(),
            GE => self.sign_flag() == self.overflow_flag(),
            LT => self.sign_flag() != self.overflow_flag(),
            GT => !self.zero_flag() && (self.sign_flag() == self.overflow_flag()),
            LE => self.zero_flag() || (self.sign_flag() != self.overflow_flag()),
            AL => true,
            NV => false,
        }
    }

    /// N => Bit 31
    #[must_use]
    pub fn sign_flag(self) -> bool {
        self.0.get_bit(31)
    }

    /// Z => Bit 30
    #[must_use]
    pub fn zero_flag(self) -> bool {
        self.0.get_bit(30)
    }

    /// C => Bit 29
    #[must_use]
    pub fn carry_flag(self) -> bool {
        self.0.get_bit(29)
    }

    /// V => Bit 28
    #[must_use]
    pub fn overflow_flag(self) -> bool {
        self.0.get_bit(28)
    }

    /// I => Bit 7 (1 = IRQ disabled)
    #[must_use]
    pub fn irq_disable(self) -> bool {
        self.0.get_bit(7)
    }

    /// F => Bit 6 (1 = FIQ disabled)
    #[must_use]
    pub fn fiq_disable(self) -> bool {
        self.0.get_bit(6)
    }

    /// T => Bit 5 (0 = ARM, 1 = Thumb)
    #[must_use]
    pub fn cpu_state(self) -> CpuState {
        if self.0.get_bit(5) {
            CpuState::Thumb
        } else {
            CpuState::Arm
        }
    }

    /// M4-M0 => Bits 4-0. Invalid mode bit patterns fall back to
    /// Supervisor; the BIOS occasionally writes them to an SPSR.
    #[must_use]
    pub fn mode(self) -> Mode {
        Mode::try_from(self.0.get_bits(0..=4)).unwrap_or(Mode::Supervisor)
    }

    pub fn set_sign_flag(&mut self, value: bool) {
        self.0.set_bit(31, value);
    }

    pub fn set_zero_flag(&mut self, value: bool) {
        self.0.set_bit(30, value);
    }

    pub fn set_carry_flag(&mut self, value: bool) {
        self.0.set_bit(29, value);
    }

    pub fn set_overflow_flag(&mut self, value: bool) {
        self.0.set_bit(28, value);
    }

    pub fn set_irq_disable(&mut self, value: bool) {
        self.0.set_bit(7, value);
    }

    pub fn set_fiq_disable(&mut self, value: bool) {
        self.0.set_bit(6, value);
    }

    pub fn set_cpu_state(&mut self, state: CpuState) {
        self.0.set_bit(5, matches!(state, CpuState::Thumb));
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.0 = (self.0 & !0b11111) | u32::from(mode);
    }

    /// Set N and Z from a result.
    pub fn set_flags(&mut self, result: u32) {
        self.set_sign_flag(result.get_bit(31));
        self.set_zero_flag(result == 0);
    }

    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn set_raw(&mut self, value: u32) {
        self.0 = value;
    }

    /// Replace only the flag bits (31-28), for MSR with the flags mask.
    pub fn set_flags_raw(&mut self, value: u32) {
        self.0 = (self.0 & 0x0FFF_FFFF) | (value & 0xF000_0000);
    }
}

impl From<Mode> for Psr {
    fn from(mode: Mode) -> Self {
        Self(u32::from(mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip() {
        let mut psr = Psr::default();
        psr.set_zero_flag(true);
        psr.set_carry_flag(true);
        assert!(psr.zero_flag());
        assert!(psr.carry_flag());
        assert!(!psr.sign_flag());
    }

    #[test]
    fn condition_evaluation_uses_flags() {
        let mut psr = Psr::default();
        psr.set_zero_flag(true);
        assert!(psr.can_execute(Condition::EQ));
        assert!(!psr.can_execute(Condition::NE));
        assert!(psr.can_execute(Condition::AL));
    }

    #[test]
    fn invalid_mode_bits_default_to_supervisor() {
        let mut psr = Psr::default();
        psr.set_raw(0);
        assert_eq!(psr.mode(), Mode::Supervisor);

        psr.set_mode(Mode::Irq);
        assert_eq!(psr.mode(), Mode::Irq);
    }
}
