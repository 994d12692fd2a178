//! By-value machine snapshots.
//!
//! A snapshot carries the CPU and the whole bus (peripherals, RAM,
//! scheduler heap) but not the attached BIOS/ROM images, the frame
//! buffer or the audio plumbing; those are re-bound when the snapshot is
//! loaded. Snapshots serialize with serde, version-tagged so a stale
//! on-disk layout is rejected instead of misread.

use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::cpu::arm7tdmi::Arm7tdmi;

pub const SAVE_STATE_VERSION: u32 = 1;

#[derive(Clone, Serialize, Deserialize)]
pub struct SaveState {
    pub(crate) version: u32,
    pub(crate) cpu: Arm7tdmi,
    pub(crate) bus: Bus,
}

impl Default for SaveState {
    fn default() -> Self {
        Self {
            version: SAVE_STATE_VERSION,
            cpu: Arm7tdmi::default(),
            bus: Bus::default(),
        }
    }
}

impl SaveState {
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }
}
