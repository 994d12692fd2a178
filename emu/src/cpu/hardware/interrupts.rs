//! Interrupt controller: IE, IF and IME.
//!
//! Peripherals latch their line into IF via [`Interrupts::raise`]; the CPU
//! takes the exception at the next instruction boundary once
//! `IME & IE & IF` is non-zero. Halt wake-up deliberately ignores IME:
//! the hardware leaves halt on `IE & IF` alone, which lets games halt with
//! interrupts masked and handle the source by polling.

use serde::{Deserialize, Serialize};

/// IRQ sources by IE/IF bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0,
    HBlank = 1,
    VCount = 2,
    Timer0 = 3,
    Timer1 = 4,
    Timer2 = 5,
    Timer3 = 6,
    Serial = 7,
    Dma0 = 8,
    Dma1 = 9,
    Dma2 = 10,
    Dma3 = 11,
    Keypad = 12,
    /// The cartridge line, driven by GPIO peripherals such as the RTC.
    GamePak = 13,
}

impl Interrupt {
    pub const fn timer(id: usize) -> Self {
        match id {
            0 => Self::Timer0,
            1 => Self::Timer1,
            2 => Self::Timer2,
            _ => Self::Timer3,
        }
    }

    pub const fn dma(channel: usize) -> Self {
        match channel {
            0 => Self::Dma0,
            1 => Self::Dma1,
            2 => Self::Dma2,
            _ => Self::Dma3,
        }
    }
}

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Interrupts {
    /// IE, `0x0400_0200`.
    pub interrupt_enable: u16,
    /// IF, `0x0400_0202`. Write-1-to-clear via [`Self::acknowledge`].
    pub interrupt_request: u16,
    /// IME, `0x0400_0208`. Only bit 0 matters.
    pub interrupt_master_enable: u16,
}

impl Interrupts {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn raise(&mut self, source: Interrupt) {
        self.interrupt_request |= 1 << (source as u16);
    }

    /// IF write: set bits clear the matching latched sources.
    pub fn acknowledge(&mut self, mask: u16) {
        self.interrupt_request &= !mask;
    }

    /// True when the CPU must take the IRQ exception at the next
    /// instruction boundary (subject to the CPSR I flag).
    #[must_use]
    pub fn pending(&self) -> bool {
        self.interrupt_master_enable & 1 != 0 && self.should_unhalt_cpu()
    }

    /// True when a halted CPU wakes up. IME does not gate this.
    #[must_use]
    pub fn should_unhalt_cpu(&self) -> bool {
        self.interrupt_enable & self.interrupt_request != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_latches_until_acknowledged() {
        let mut irq = Interrupts::default();
        irq.raise(Interrupt::Timer0);
        irq.raise(Interrupt::VBlank);

        assert_eq!(irq.interrupt_request, 0b1001);

        irq.acknowledge(1 << Interrupt::Timer0 as u16);
        assert_eq!(irq.interrupt_request, 0b0001);
    }

    #[test]
    fn pending_requires_master_enable() {
        let mut irq = Interrupts::default();
        irq.interrupt_enable = 1 << Interrupt::HBlank as u16;
        irq.raise(Interrupt::HBlank);

        assert!(!irq.pending());
        assert!(irq.should_unhalt_cpu());

        irq.interrupt_master_enable = 1;
        assert!(irq.pending());
    }

    #[test]
    fn masked_source_does_not_wake_halt() {
        let mut irq = Interrupts::default();
        irq.interrupt_enable = 1 << Interrupt::VBlank as u16;
        irq.raise(Interrupt::Keypad);

        assert!(!irq.should_unhalt_cpu());
    }
}
