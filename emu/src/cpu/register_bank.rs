//! Banked registers for the exception modes.
//!
//! Each exception mode has a private R13/R14 pair (and an SPSR) swapped
//! in on entry so handlers never clobber the interrupted program's stack
//! pointer or return address. FIQ additionally banks R8-R12. The `_old`
//! fields hold the User/System copies while an exception mode is active.

use serde::{Deserialize, Serialize};

use crate::cpu::psr::Psr;

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct RegisterBank {
    /// R8-R14 for User/System, saved while another bank is visible.
    pub r8_old: u32,
    pub r9_old: u32,
    pub r10_old: u32,
    pub r11_old: u32,
    pub r12_old: u32,
    pub r13_old: u32,
    pub r14_old: u32,

    // FIQ banks the most registers so its handler starts with free
    // scratch space.
    pub r8_fiq: u32,
    pub r9_fiq: u32,
    pub r10_fiq: u32,
    pub r11_fiq: u32,
    pub r12_fiq: u32,
    pub r13_fiq: u32,
    pub r14_fiq: u32,

    pub r13_svc: u32,
    pub r14_svc: u32,

    pub r13_abt: u32,
    pub r14_abt: u32,

    pub r13_irq: u32,
    pub r14_irq: u32,

    pub r13_und: u32,
    pub r14_und: u32,

    pub spsr_fiq: Psr,
    pub spsr_svc: Psr,
    pub spsr_abt: Psr,
    pub spsr_irq: Psr,
    pub spsr_und: Psr,
}
