use serde::{Deserialize, Serialize};

/// The CPU operating mode, stored in bits 0-4 of the CPSR/SPSR.
///
/// Exception modes get their own banked R13/R14 (and SPSR) so a handler
/// never corrupts the interrupted program's stack or return address; FIQ
/// additionally banks R8-R12. System shares the User register set while
/// remaining privileged.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Mode {
    /// Normal program execution (unprivileged).
    User = 0b10000,
    /// Fast interrupt. No FIQ source exists on this console.
    Fiq = 0b10001,
    /// Hardware interrupt handling.
    Irq = 0b10010,
    /// Entered via Reset or SWI; the BIOS runs here.
    Supervisor = 0b10011,
    /// Failed memory access.
    Abort = 0b10111,
    /// Unrecognized instruction.
    Undefined = 0b11011,
    /// Privileged mode sharing the User registers.
    System = 0b11111,
}

impl From<Mode> for u32 {
    fn from(m: Mode) -> Self {
        m as Self
    }
}

impl TryFrom<u32> for Mode {
    type Error = u32;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            0b10000 => Ok(Self::User),
            0b10001 => Ok(Self::Fiq),
            0b10010 => Ok(Self::Irq),
            0b10011 => Ok(Self::Supervisor),
            0b10111 => Ok(Self::Abort),
            0b11011 => Ok(Self::Undefined),
            0b11111 => Ok(Self::System),
            _ => Err(n),
        }
    }
}
