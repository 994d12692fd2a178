//! The four-channel DMA engine.
//!
//! Channel state lives here; the actual bus transfers are driven by
//! [`Bus::dma_run`](crate::bus::Bus::dma_run) one unit at a time so that a
//! higher-priority channel becoming active preempts at a unit boundary,
//! exactly like the halt loop expects.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

pub const FIFO_A_ADDRESS: u32 = 0x0400_00A0;
pub const FIFO_B_ADDRESS: u32 = 0x0400_00A4;

/// What woke a channel up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occasion {
    Immediate,
    VBlank,
    HBlank,
    Fifo0,
    Fifo1,
    Video,
}

/// Address stepping selected by the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Increment,
    Decrement,
    Fixed,
    /// Increment during the transfer, reload the latch on repeat.
    IncrementReload,
}

impl Step {
    fn from_bits(bits: u16) -> Self {
        match bits {
            0 => Self::Increment,
            1 => Self::Decrement,
            2 => Self::Fixed,
            _ => Self::IncrementReload,
        }
    }

    pub(crate) fn apply(self, address: u32, unit_bytes: u32) -> u32 {
        match self {
            Self::Increment | Self::IncrementReload => address.wrapping_add(unit_bytes),
            Self::Decrement => address.wrapping_sub(unit_bytes),
            Self::Fixed => address,
        }
    }
}

#[derive(Default, Clone, Copy, Serialize, Deserialize)]
pub struct Channel {
    /// DMAxSAD. Write-only for the CPU.
    pub source_address: u32,
    /// DMAxDAD. Write-only for the CPU.
    pub destination_address: u32,
    /// DMAxCNT_L, number of units.
    pub word_count: u16,
    /// DMAxCNT_H.
    pub control: u16,

    // Internal latches, loaded on enable and consumed by the transfer.
    pub(crate) latch_source: u32,
    pub(crate) latch_destination: u32,
    pub(crate) latch_count: u32,
    /// First access of a burst is non-sequential.
    pub(crate) first_access: bool,
}

impl Channel {
    pub fn enabled(&self) -> bool {
        self.control.is_bit_on(15)
    }

    pub fn irq_on_complete(&self) -> bool {
        self.control.is_bit_on(14)
    }

    /// 0 = immediate, 1 = V-blank, 2 = H-blank, 3 = special.
    pub fn timing(&self) -> u16 {
        self.control.get_bits(12..=13)
    }

    pub fn word_transfer(&self) -> bool {
        self.control.is_bit_on(10)
    }

    pub fn repeat(&self) -> bool {
        self.control.is_bit_on(9)
    }

    pub fn source_step(&self) -> Step {
        Step::from_bits(self.control.get_bits(7..=8))
    }

    pub fn destination_step(&self) -> Step {
        Step::from_bits(self.control.get_bits(5..=6))
    }

    fn max_count(index: usize) -> u32 {
        if index == 3 {
            0x1_0000
        } else {
            0x4000
        }
    }

    pub(crate) fn initial_count(&self, index: usize) -> u32 {
        let count = u32::from(self.word_count) & (Self::max_count(index) - 1);
        if count == 0 {
            Self::max_count(index)
        } else {
            count
        }
    }

    /// Sound FIFO mode: channels 1 and 2 in special timing aimed at one
    /// of the two FIFO ports. Transfers are forced to 4 words with a
    /// fixed destination.
    pub(crate) fn fifo_mode(&self, index: usize) -> bool {
        (index == 1 || index == 2)
            && self.timing() == 3
            && (self.latch_destination == FIFO_A_ADDRESS
                || self.latch_destination == FIFO_B_ADDRESS)
    }

    fn matches(&self, index: usize, occasion: Occasion) -> bool {
        match occasion {
            Occasion::Immediate => self.timing() == 0,
            Occasion::VBlank => self.timing() == 1,
            Occasion::HBlank => self.timing() == 2,
            Occasion::Fifo0 => self.fifo_mode(index) && self.latch_destination == FIFO_A_ADDRESS,
            Occasion::Fifo1 => self.fifo_mode(index) && self.latch_destination == FIFO_B_ADDRESS,
            Occasion::Video => index == 3 && self.timing() == 3,
        }
    }
}

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Dma {
    pub channels: [Channel; 4],
    /// Bitmask of channels with pending work, bit n = channel n.
    active: u8,
}

impl Dma {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// At least one channel has pending work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active != 0
    }

    /// The highest-priority (lowest-numbered) active channel.
    #[must_use]
    pub(crate) fn current_channel(&self) -> Option<usize> {
        if self.active == 0 {
            None
        } else {
            Some(self.active.trailing_zeros() as usize)
        }
    }

    pub(crate) fn set_active(&mut self, index: usize, active: bool) {
        if active {
            self.active |= 1 << index;
        } else {
            self.active &= !(1 << index);
        }
    }

    /// Control write. An enable rising edge latches source, destination
    /// and count; immediate channels activate right away.
    pub fn write_control(&mut self, index: usize, value: u16) {
        let was_enabled = self.channels[index].enabled();
        self.channels[index].control = value;
        let channel = &mut self.channels[index];

        if channel.enabled() && !was_enabled {
            channel.latch_source = channel.source_address;
            channel.latch_destination = channel.destination_address;
            channel.latch_count = channel.initial_count(index);
            channel.first_access = true;

            if channel.timing() == 0 {
                self.set_active(index, true);
            }
        } else if !channel.enabled() {
            self.set_active(index, false);
        }
    }

    /// Wake every enabled channel whose trigger matches `occasion`.
    pub fn request(&mut self, occasion: Occasion) {
        for index in 0..4 {
            let channel = &mut self.channels[index];
            if channel.enabled() && channel.matches(index, occasion) {
                if channel.fifo_mode(index) {
                    channel.latch_count = 4;
                }
                channel.first_access = true;
                self.set_active(index, true);
            }
        }
    }
}
