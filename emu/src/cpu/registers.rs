use serde::{Deserialize, Serialize};

pub const REG_SP: usize = 13;
pub const REG_LR: usize = 14;
pub const REG_PROGRAM_COUNTER: usize = 15;

/// The sixteen currently-visible general purpose registers. Banked copies
/// for the exception modes live in
/// [`RegisterBank`](crate::cpu::register_bank::RegisterBank).
#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Registers([u32; 16]);

impl Registers {
    #[must_use]
    pub fn register_at(&self, index: usize) -> u32 {
        self.0[index]
    }

    pub fn set_register_at(&mut self, index: usize, value: u32) {
        self.0[index] = value;
    }

    #[must_use]
    pub fn program_counter(&self) -> u32 {
        self.0[REG_PROGRAM_COUNTER]
    }

    pub fn set_program_counter(&mut self, value: u32) {
        self.0[REG_PROGRAM_COUNTER] = value;
    }

    pub fn advance_program_counter(&mut self, bytes: u32) {
        self.0[REG_PROGRAM_COUNTER] = self.0[REG_PROGRAM_COUNTER].wrapping_add(bytes);
    }
}
