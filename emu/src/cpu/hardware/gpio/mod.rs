//! Cartridge GPIO port block.
//!
//! Some cartridges carry extra hardware (real-time clock, solar sensor)
//! wired to four general-purpose pins that show up inside the ROM address
//! space: data at `0x0800_00C4`, pin direction at `0x0800_00C6`, and the
//! read-visibility control at `0x0800_00C8`. The bus routes ROM-region
//! accesses here first; when the port is invisible or unpopulated the
//! access falls through to the ROM bytes underneath.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::cpu::hardware::interrupts::Interrupts;

pub mod rtc;
pub mod solar_sensor;

pub use rtc::Rtc;
pub use solar_sensor::SolarSensor;

pub const GPIO_DATA: u32 = 0xC4;
pub const GPIO_DIRECTION: u32 = 0xC6;
pub const GPIO_CONTROL: u32 = 0xC8;

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Gpio {
    /// Last value driven on the output pins.
    pub data: u16,
    /// Per-pin direction, 1 = output (console drives the pin).
    pub direction: u16,
    /// Bit 0 makes the port readable.
    pub control: u16,

    /// Attached peripherals are shared with the host, which keeps its own
    /// handle for clock and light-level control.
    #[serde(skip)]
    rtc: Option<Arc<Mutex<Rtc>>>,
    #[serde(skip)]
    solar_sensor: Option<Arc<Mutex<SolarSensor>>>,
}

impl Gpio {
    pub fn reset(&mut self) {
        self.data = 0;
        self.direction = 0;
        self.control = 0;
        if let Some(rtc) = &self.rtc {
            if let Ok(mut rtc) = rtc.lock() {
                rtc.reset();
            }
        }
        if let Some(sensor) = &self.solar_sensor {
            if let Ok(mut sensor) = sensor.lock() {
                sensor.reset();
            }
        }
    }

    pub fn attach_rtc(&mut self, rtc: Arc<Mutex<Rtc>>) {
        self.rtc = Some(rtc);
    }

    pub fn attach_solar_sensor(&mut self, sensor: Arc<Mutex<SolarSensor>>) {
        self.solar_sensor = Some(sensor);
    }

    #[must_use]
    pub fn readable(&self) -> bool {
        self.control & 1 != 0
    }

    /// Read one of the port registers. `None` when the port is write-only
    /// (control bit clear), in which case the bus serves the ROM bytes.
    #[must_use]
    pub fn read(&self, offset: u32) -> Option<u16> {
        if !self.readable() {
            return None;
        }
        match offset {
            GPIO_DATA => {
                let mut pins = self.data & self.direction;
                if let Some(rtc) = &self.rtc {
                    if let Ok(rtc) = rtc.lock() {
                        pins |= rtc.read() & !self.direction;
                    }
                }
                if let Some(sensor) = &self.solar_sensor {
                    if let Ok(sensor) = sensor.lock() {
                        pins |= sensor.read() & !self.direction;
                    }
                }
                Some(pins & 0xF)
            }
            GPIO_DIRECTION => Some(self.direction),
            GPIO_CONTROL => Some(self.control),
            _ => None,
        }
    }

    pub fn write(&mut self, offset: u32, value: u16, interrupts: &mut Interrupts) {
        match offset {
            GPIO_DATA => {
                self.data = value & 0xF;
                if let Some(rtc) = &self.rtc {
                    if let Ok(mut rtc) = rtc.lock() {
                        rtc.write(self.data, self.direction, interrupts);
                    }
                }
                if let Some(sensor) = &self.solar_sensor {
                    if let Ok(mut sensor) = sensor.lock() {
                        sensor.write(self.data, self.direction);
                    }
                }
            }
            GPIO_DIRECTION => self.direction = value & 0xF,
            GPIO_CONTROL => self.control = value & 1,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_invisible_until_control_set() {
        let mut gpio = Gpio::default();
        let mut interrupts = Interrupts::default();

        assert_eq!(gpio.read(GPIO_DATA), None);

        gpio.write(GPIO_CONTROL, 1, &mut interrupts);
        assert_eq!(gpio.read(GPIO_DATA), Some(0));
    }

    #[test]
    fn output_pins_read_back_latched_data() {
        let mut gpio = Gpio::default();
        let mut interrupts = Interrupts::default();

        gpio.write(GPIO_CONTROL, 1, &mut interrupts);
        gpio.write(GPIO_DIRECTION, 0xF, &mut interrupts);
        gpio.write(GPIO_DATA, 0b0101, &mut interrupts);

        assert_eq!(gpio.read(GPIO_DATA), Some(0b0101));
    }
}
