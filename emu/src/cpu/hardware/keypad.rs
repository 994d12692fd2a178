//! Input latch and key interrupt.
//!
//! KEYINPUT is active-low: a pressed button clears its bit. The latch is
//! compared against the KEYCNT selector by a periodic scheduler poll so
//! that key IRQs arrive with bounded latency and in deterministic order
//! relative to the other event classes.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::hardware::interrupts::{Interrupt, Interrupts};
use crate::scheduler::{EventClass, Scheduler};

/// Button bit positions in the KEYINPUT register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    A = 1 << 0,
    B = 1 << 1,
    Select = 1 << 2,
    Start = 1 << 3,
    Right = 1 << 4,
    Left = 1 << 5,
    Up = 1 << 6,
    Down = 1 << 7,
    R = 1 << 8,
    L = 1 << 9,
}

const ALL_KEYS: u16 = 0x03FF;

/// Cycles between key-interrupt polls.
pub const POLL_INTERVAL: u64 = 8192;

#[derive(Clone, Serialize, Deserialize)]
pub struct Keypad {
    /// KEYINPUT, `0x0400_0130`. Read-only for the CPU.
    pub key_input: u16,
    /// KEYCNT, `0x0400_0132`.
    pub key_interrupt_control: u16,
}

impl Default for Keypad {
    fn default() -> Self {
        Self::new()
    }
}

impl Keypad {
    /// All ten buttons released.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            key_input: ALL_KEYS,
            key_interrupt_control: 0,
        }
    }

    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        *self = Self::new();
        scheduler.add(POLL_INTERVAL, EventClass::KeypadPoll);
    }

    /// Update the latch from the host. Active-low: pressed clears the bit.
    pub fn set_key_status(&mut self, key: Key, pressed: bool) {
        if pressed {
            self.key_input &= !(key as u16);
        } else {
            self.key_input |= key as u16;
        }
    }

    /// Scheduler poll: compare the latch against the KEYCNT selector and
    /// raise the keypad IRQ on a match.
    pub fn on_poll(&mut self, interrupts: &mut Interrupts, scheduler: &mut Scheduler) {
        if self.irq_condition_met() {
            interrupts.raise(Interrupt::Keypad);
        }
        scheduler.add(POLL_INTERVAL, EventClass::KeypadPoll);
    }

    fn irq_condition_met(&self) -> bool {
        if self.key_interrupt_control.is_bit_off(14) {
            return false;
        }

        let selected = self.key_interrupt_control & ALL_KEYS;
        let held = !self.key_input & ALL_KEYS;

        if self.key_interrupt_control.is_bit_on(15) {
            // AND mode: every selected key must be held.
            selected != 0 && held & selected == selected
        } else {
            // OR mode: any selected key.
            held & selected != 0
        }
    }
}
