//! # Mandarin Emulation Core
//!
//! This crate contains all GBA hardware emulation - no UI code.
//!
//! ## Module Overview
//!
//! | Module              | Description                                     |
//! |---------------------|-------------------------------------------------|
//! | [`gba`]             | Top-level system and run loop (start here)      |
//! | [`scheduler`]       | Cycle clock and the pending-event heap          |
//! | [`bus`]             | Memory bus, wait states and the IO register file|
//! | [`cpu`]             | ARM7TDMI processor and the peripherals          |
//! | [`memory`]          | BIOS/RAM/ROM/SRAM backing stores                |
//! | [`audio`]           | Host-facing sample ring and resampler           |
//! | [`config`]          | Options and host device seams                   |
//! | [`save_state`]      | Versioned machine snapshots                     |
//! | [`cartridge_header`]| ROM header parsing                              |
//!
//! ## Quick Start
//!
//! ```ignore
//! use emu::{config::Config, gba::Gba};
//!
//! let rom = std::fs::read("game.gba")?;
//! let bios = std::fs::read("gba_bios.bin")?;
//!
//! let mut gba = Gba::new(Config::default());
//! gba.attach_bios(bios)?;
//! gba.attach_rom(rom);
//! gba.reset();
//! loop {
//!     gba.run(280_896); // one frame of master cycles
//! }
//! ```
//!
//! ## Architecture
//!
//! Everything hangs off a single 64-bit cycle clock. Peripherals
//! schedule their future work as [`scheduler::EventClass`] entries; the
//! bus charges every memory access's wait states to the clock and fires
//! events as they come due, so the CPU, DMA and peripherals interleave
//! deterministically without per-cycle stepping. See [`gba`] for the run
//! loop and [`bus`] for the dispatch.

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
mod bitwise;

pub mod audio;

#[allow(clippy::missing_panics_doc)]
#[allow(clippy::cast_lossless)]
pub mod bus;

#[allow(clippy::similar_names)]
pub mod cartridge_header;
pub mod config;
pub mod cpu;
pub mod gba;
pub mod memory;
pub mod save_state;
pub mod scheduler;
