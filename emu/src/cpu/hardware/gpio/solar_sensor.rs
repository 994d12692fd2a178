//! Solar sensor cartridge peripheral.
//!
//! The sensor is a light-dependent ramp: the game resets a counter, then
//! clocks it upward until a flag pin reports that the ramp crossed the
//! ambient light level. Brighter light trips the flag earlier.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

const PIN_CLK: u8 = 0;
const PIN_RST: u8 = 1;
const PIN_FLG: u8 = 3;

#[derive(Clone, Serialize, Deserialize)]
pub struct SolarSensor {
    counter: u8,
    /// Ambient light, 0 (dark) to 255 (direct sun).
    level: u8,
    old_clk: u16,
}

impl Default for SolarSensor {
    fn default() -> Self {
        Self {
            counter: 0,
            level: 0x80,
            old_clk: 0,
        }
    }
}

impl SolarSensor {
    pub fn reset(&mut self) {
        let level = self.level;
        *self = Self::default();
        self.level = level;
    }

    /// Host control: how much light falls on the cartridge.
    pub fn set_light_level(&mut self, level: u8) {
        self.level = level;
    }

    pub fn write(&mut self, pins: u16, direction: u16) {
        if direction.is_bit_on(PIN_RST) && pins.is_bit_on(PIN_RST) {
            self.counter = 0;
        }

        if direction.is_bit_on(PIN_CLK) {
            let clk = pins.get_bits(PIN_CLK..=PIN_CLK);
            if self.old_clk == 0 && clk == 1 {
                self.counter = self.counter.wrapping_add(1);
            }
            self.old_clk = clk;
        }
    }

    /// The flag pin goes high once the ramp passes the light level.
    #[must_use]
    pub fn read(&self) -> u16 {
        let threshold = 255 - self.level;
        u16::from(self.counter > threshold) << PIN_FLG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_once(sensor: &mut SolarSensor) {
        sensor.write(0b0000, 0b0011);
        sensor.write(0b0001, 0b0011);
    }

    #[test]
    fn brighter_light_trips_earlier() {
        let mut bright = SolarSensor::default();
        bright.set_light_level(250);
        let mut dark = SolarSensor::default();
        dark.set_light_level(5);

        let trip_count = |sensor: &mut SolarSensor| {
            sensor.write(0b0010, 0b0011); // reset ramp
            let mut count = 0u32;
            while sensor.read() == 0 && count < 300 {
                clock_once(sensor);
                count += 1;
            }
            count
        };

        assert!(trip_count(&mut bright) < trip_count(&mut dark));
    }

    #[test]
    fn reset_pin_clears_the_ramp() {
        let mut sensor = SolarSensor::default();
        sensor.set_light_level(255);
        for _ in 0..4 {
            clock_once(&mut sensor);
        }
        assert_ne!(sensor.read(), 0);

        sensor.write(0b0010, 0b0011);
        assert_eq!(sensor.read(), 0);
    }
}
