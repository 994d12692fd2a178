/// In ARM state every instruction is conditionally executed according to
/// the CPSR flags and the condition field in bits 31:28. In Thumb state
/// only the conditional branch carries one of these.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Condition {
    /// Z set (equal).
    EQ = 0x0,
    /// Z clear (not equal).
    NE = 0x1,
    /// C set (unsigned higher or same).
    CS = 0x2,
    /// C clear (unsigned lower).
    CC = 0x3,
    /// N set (negative).
    MI = 0x4,
    /// N clear (positive or zero).
    PL = 0x5,
    /// V set (overflow).
    VS = 0x6,
    /// V clear (no overflow).
    VC = 0x7,
    /// C set and Z clear (unsigned higher).
    HI = 0x8,
    /// C clear or Z set (unsigned lower or same).
    LS = 0x9,
    /// N equals V (greater or equal).
    GE = 0xA,
    /// N not equal to V (less than).
    LT = 0xB,
    /// Z clear AND (N equals V) (greater than).
    GT = 0xC,
    /// Z set OR (N not equals V) (less than or equal).
    LE = 0xD,
    /// Always executed.
    AL = 0xE,
    /// Reserved, must not be used.
    NV = 0xF,
}

impl From<u8> for Condition {
    fn from(item: u8) -> Self {
        match item & 0xF {
            0x0 => Self::EQ,
            0x1 => Self::NE,
            0x2 => Self::CS,
            0x3 => Self::CC,
            0x4 => Self::MI,
            0x5 => Self::PL,
            0x6 => Self::VS,
            0x7 => Self::VC,
            0x8 => Self::HI,
            0x9 => Self::LS,
            0xA => Self::GE,
            0xB => Self::LT,
            0xC => Self::GT,
            0xD => Self::LE,
            0xE => Self::AL,
            _ => Self::NV,
        }
    }
}
