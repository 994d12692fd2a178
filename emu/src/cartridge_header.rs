//! Game Pak header parsing.
//!
//! The first 0xC0 bytes of every cartridge carry the title, codes and a
//! header checksum. A bad image is rejected here, before any core is
//! constructed around it.

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum CartridgeError {
    /// Shorter than the 0xC0-byte header.
    TooShort(usize),
    /// Title or code bytes outside printable ASCII.
    InvalidText,
    ChecksumMismatch { stored: u8, computed: u8 },
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(len) => {
                write!(f, "ROM image is {len} bytes, smaller than the cartridge header")
            }
            Self::InvalidText => write!(f, "cartridge title/code contains non-ASCII bytes"),
            Self::ChecksumMismatch { stored, computed } => write!(
                f,
                "header checksum mismatch: stored {stored:#04X}, computed {computed:#04X}"
            ),
        }
    }
}

impl std::error::Error for CartridgeError {}

#[derive(Debug)]
pub struct CartridgeHeader {
    /// Uppercase ascii, max 12 characters.
    pub game_title: String,
    /// Uppercase ascii, 4 characters.
    pub game_code: String,
    /// Uppercase ascii, 2 characters.
    pub maker_code: String,
    pub software_version: u8,
}

const HEADER_SIZE: usize = 0xC0;

fn text_field(data: &[u8]) -> Result<String, CartridgeError> {
    let trimmed: Vec<u8> = data
        .iter()
        .copied()
        .take_while(|byte| *byte != 0)
        .collect();
    if trimmed.iter().any(|byte| !byte.is_ascii()) {
        return Err(CartridgeError::InvalidText);
    }
    String::from_utf8(trimmed).map_err(|_| CartridgeError::InvalidText)
}

fn verify_checksum(data: &[u8]) -> Result<(), CartridgeError> {
    let mut sum = 0u8;
    for byte in &data[0xA0..=0xBC] {
        sum = sum.wrapping_sub(*byte);
    }
    let computed = sum.wrapping_sub(0x19);
    let stored = data[0xBD];
    if computed == stored {
        Ok(())
    } else {
        Err(CartridgeError::ChecksumMismatch { stored, computed })
    }
}

impl CartridgeHeader {
    pub fn new(data: &[u8]) -> Result<Self, CartridgeError> {
        if data.len() < HEADER_SIZE {
            return Err(CartridgeError::TooShort(data.len()));
        }

        verify_checksum(data)?;

        Ok(Self {
            game_title: text_field(&data[0x0A0..=0x0AB])?,
            game_code: text_field(&data[0x0AC..=0x0AF])?,
            maker_code: text_field(&data[0x0B0..=0x0B1])?,
            software_version: data[0xBC],
        })
    }
}
