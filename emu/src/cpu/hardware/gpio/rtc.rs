//! S-3511 real-time clock, bit-banged over three GPIO pins.
//!
//! The console clocks commands in on SCK rising edges while CS is held
//! high. A command byte selects one of eight registers and a direction;
//! register arguments then shift through SIO, LSB first. Date and time
//! travel as BCD.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::hardware::interrupts::{Interrupt, Interrupts};

const PIN_SCK: u8 = 0;
const PIN_SIO: u8 = 1;
const PIN_CS: u8 = 2;

/// Argument byte count per register.
const ARGUMENT_COUNT: [u8; 8] = [0, 0, 7, 0, 1, 0, 3, 0];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Register {
    ForceReset = 0,
    #[default]
    DateTime = 2,
    ForceIrq = 3,
    Control = 4,
    Time = 6,
    Unknown = 7,
}

impl Register {
    fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => Self::ForceReset,
            2 => Self::DateTime,
            3 => Self::ForceIrq,
            4 => Self::Control,
            6 => Self::Time,
            _ => Self::Unknown,
        }
    }

    fn argument_count(self) -> u8 {
        ARGUMENT_COUNT[self as usize]
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum State {
    Command,
    Receiving,
    Sending,
    #[default]
    Complete,
}

#[derive(Default, Clone, Copy, Serialize, Deserialize)]
struct Port {
    sck: u16,
    sio: u16,
    cs: u16,
}

#[derive(Default, Clone, Copy, Serialize, Deserialize)]
struct Control {
    unknown1: bool,
    per_minute_irq: bool,
    unknown2: bool,
    mode_24h: bool,
    poweroff: bool,
}

/// A calendar timestamp as the RTC reports it. The weekday is carried
/// explicitly; the register never derives it from the date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTime {
    /// Full year, e.g. 2024. The register stores only the last two digits.
    pub year: u16,
    pub month: u8,
    pub day: u8,
    /// 0 = Sunday.
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    fn from_host() -> Self {
        use chrono::{Datelike, Timelike};

        let now = chrono::Local::now();
        Self {
            year: now.year() as u16,
            month: now.month() as u8,
            day: now.day() as u8,
            weekday: now.weekday().num_days_from_sunday() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
        }
    }
}

#[derive(Default, Clone, Copy, Serialize, Deserialize)]
enum ClockSource {
    /// Follow the host's local clock.
    #[default]
    Host,
    /// Pinned timestamp, set by the host or by a date/time register write.
    Fixed(DateTime),
}

pub const fn convert_decimal_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

pub const fn convert_bcd_to_decimal(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0xF)
}

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Rtc {
    state: State,
    reg: Register,
    data: u8,
    current_bit: u8,
    current_byte: u8,
    buffer: [u8; 7],
    port: Port,
    control: Control,
    clock: ClockSource,
}

impl Rtc {
    #[must_use]
    pub fn new() -> Self {
        let mut rtc = Self::default();
        rtc.reset();
        rtc
    }

    pub fn reset(&mut self) {
        let clock = self.clock;
        *self = Self::default();
        self.clock = clock;

        // At least one commercial title refuses to boot unless the
        // 24h-mode bit is already set.
        self.control.mode_24h = true;
    }

    /// Pin the clock to a fixed timestamp. Also what date/time register
    /// writes do internally.
    pub fn set_datetime(&mut self, datetime: DateTime) {
        self.clock = ClockSource::Fixed(datetime);
    }

    /// Follow the host clock again.
    pub fn use_host_clock(&mut self) {
        self.clock = ClockSource::Host;
    }

    fn now(&self) -> DateTime {
        match self.clock {
            ClockSource::Host => DateTime::from_host(),
            ClockSource::Fixed(datetime) => datetime,
        }
    }

    /// SIO as seen by the console: only driven while selected.
    #[must_use]
    pub fn read(&self) -> u16 {
        (self.port.sio & self.port.cs) << PIN_SIO
    }

    pub fn write(&mut self, pins: u16, direction: u16, interrupts: &mut Interrupts) {
        let old_sck = self.port.sck;
        let old_cs = self.port.cs;

        if direction.is_bit_on(PIN_CS) {
            self.port.cs = pins.get_bits(PIN_CS..=PIN_CS);
        } else {
            logger::error("RTC: CS port should be set to 'output' but configured as 'input'.");
        }

        if direction.is_bit_on(PIN_SCK) {
            self.port.sck = pins.get_bits(PIN_SCK..=PIN_SCK);
        } else {
            logger::error("RTC: SCK port should be set to 'output' but configured as 'input'.");
        }

        if direction.is_bit_on(PIN_SIO) {
            self.port.sio = pins.get_bits(PIN_SIO..=PIN_SIO);
        }

        if self.port.cs == 0 {
            return;
        }

        // CS transition from 0 to 1 restarts the command phase.
        if old_cs == 0 {
            self.state = State::Command;
            self.current_bit = 0;
            self.current_byte = 0;
            return;
        }

        // Everything else advances on the SCK rising edge.
        if old_sck == 0 && self.port.sck == 1 {
            match self.state {
                State::Command => self.receive_command_sio(interrupts),
                State::Receiving => self.receive_buffer_sio(interrupts),
                State::Sending => self.transmit_buffer_sio(),
                State::Complete => {}
            }
        }
    }

    /// Shift SIO into the data byte; true once eight bits arrived.
    fn read_sio(&mut self) -> bool {
        self.data &= !(1 << self.current_bit);
        self.data |= (self.port.sio as u8) << self.current_bit;

        self.current_bit += 1;
        if self.current_bit == 8 {
            self.current_bit = 0;
            return true;
        }
        false
    }

    fn receive_command_sio(&mut self, interrupts: &mut Interrupts) {
        if !self.read_sio() {
            return;
        }

        // Commands arrive MSB-first when the fixed 0110 marker sits in the
        // top nibble, and bit-reversed when it sits in the bottom one.
        if self.data >> 4 == 6 {
            self.data = self.data.reverse_bits();
            logger::trace(format!(
                "RTC: received command in REV format, data=0x{:X}",
                self.data
            ));
        } else if self.data & 15 != 6 {
            logger::error(format!(
                "RTC: received command in unknown format, data=0x{:X}",
                self.data
            ));
            return;
        }

        self.reg = Register::from_bits(self.data >> 4);
        self.current_bit = 0;
        self.current_byte = 0;

        // Bit 7 selects reading or writing the register.
        if self.data & 0x80 != 0 {
            self.read_register();
            self.state = if self.reg.argument_count() > 0 {
                State::Sending
            } else {
                State::Complete
            };
        } else if self.reg.argument_count() > 0 {
            self.state = State::Receiving;
        } else {
            self.write_register(interrupts);
            self.state = State::Complete;
        }
    }

    fn receive_buffer_sio(&mut self, interrupts: &mut Interrupts) {
        if self.current_byte < self.reg.argument_count() && self.read_sio() {
            self.buffer[usize::from(self.current_byte)] = self.data;

            self.current_byte += 1;
            if self.current_byte == self.reg.argument_count() {
                self.write_register(interrupts);
                self.state = State::Complete;
            }
        }
    }

    fn transmit_buffer_sio(&mut self) {
        self.port.sio = u16::from(self.buffer[usize::from(self.current_byte)] & 1);
        self.buffer[usize::from(self.current_byte)] >>= 1;

        self.current_bit += 1;
        if self.current_bit == 8 {
            self.current_bit = 0;
            self.current_byte += 1;
            if self.current_byte == self.reg.argument_count() {
                self.state = State::Complete;
            }
        }
    }

    fn adjust_hour(&self, hour: u8) -> u8 {
        if !self.control.mode_24h && hour >= 12 {
            (hour - 12) | 64
        } else {
            hour
        }
    }

    fn read_register(&mut self) {
        match self.reg {
            Register::Control => {
                self.buffer[0] = (u8::from(self.control.unknown1) << 1)
                    | (u8::from(self.control.per_minute_irq) << 3)
                    | (u8::from(self.control.unknown2) << 5)
                    | (u8::from(self.control.mode_24h) << 6)
                    | (u8::from(self.control.poweroff) << 7);
            }
            Register::DateTime => {
                let now = self.now();
                self.buffer[0] = convert_decimal_to_bcd((now.year % 100) as u8);
                self.buffer[1] = convert_decimal_to_bcd(now.month);
                self.buffer[2] = convert_decimal_to_bcd(now.day);
                self.buffer[3] = convert_decimal_to_bcd(now.weekday);
                self.buffer[4] = convert_decimal_to_bcd(self.adjust_hour(now.hour));
                self.buffer[5] = convert_decimal_to_bcd(now.minute);
                self.buffer[6] = convert_decimal_to_bcd(now.second);
            }
            Register::Time => {
                let now = self.now();
                self.buffer[0] = convert_decimal_to_bcd(self.adjust_hour(now.hour));
                self.buffer[1] = convert_decimal_to_bcd(now.minute);
                self.buffer[2] = convert_decimal_to_bcd(now.second);
            }
            _ => {}
        }
    }

    fn write_register(&mut self, interrupts: &mut Interrupts) {
        match self.reg {
            Register::Control => {
                self.control.unknown1 = self.buffer[0] & 2 != 0;
                self.control.per_minute_irq = self.buffer[0] & 8 != 0;
                self.control.unknown2 = self.buffer[0] & 32 != 0;
                self.control.mode_24h = self.buffer[0] & 64 != 0;
                if self.control.per_minute_irq {
                    logger::error("RTC: enabled the unimplemented per-minute IRQ.");
                }
            }
            Register::DateTime => {
                let hour = self.buffer[4];
                self.set_datetime(DateTime {
                    year: 2000 + u16::from(convert_bcd_to_decimal(self.buffer[0])),
                    month: convert_bcd_to_decimal(self.buffer[1]),
                    day: convert_bcd_to_decimal(self.buffer[2]),
                    weekday: convert_bcd_to_decimal(self.buffer[3]),
                    hour: convert_bcd_to_decimal(hour & 0x3F),
                    minute: convert_bcd_to_decimal(self.buffer[5]),
                    second: convert_bcd_to_decimal(self.buffer[6]),
                });
            }
            Register::Time => {
                let mut now = self.now();
                now.hour = convert_bcd_to_decimal(self.buffer[0] & 0x3F);
                now.minute = convert_bcd_to_decimal(self.buffer[1]);
                now.second = convert_bcd_to_decimal(self.buffer[2]);
                self.set_datetime(now);
            }
            Register::ForceReset => {
                self.control = Control::default();
                self.clock = ClockSource::Host;
            }
            Register::ForceIrq => {
                interrupts.raise(Interrupt::GamePak);
            }
            Register::Unknown => {
                logger::error(format!("RTC: unhandled register write: {:?}", self.reg));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive one full byte onto the serial port, LSB first.
    fn send_byte(rtc: &mut Rtc, interrupts: &mut Interrupts, byte: u8) {
        for bit in 0..8 {
            let sio = u16::from((byte >> bit) & 1);
            // SCK low with data, then SCK high to latch.
            rtc.write(0b100 | (sio << 1), 0b111, interrupts);
            rtc.write(0b101 | (sio << 1), 0b111, interrupts);
        }
    }

    /// Clock one full byte out of the serial port.
    fn receive_byte(rtc: &mut Rtc, interrupts: &mut Interrupts) -> u8 {
        let mut byte = 0u8;
        for bit in 0..8 {
            rtc.write(0b100, 0b101, interrupts);
            rtc.write(0b101, 0b101, interrupts);
            byte |= ((rtc.read() >> 1) as u8 & 1) << bit;
        }
        byte
    }

    fn select(rtc: &mut Rtc, interrupts: &mut Interrupts) {
        rtc.write(0b000, 0b111, interrupts);
        rtc.write(0b100, 0b111, interrupts);
    }

    #[test]
    fn bcd_conversion_round_trips() {
        for value in 0..100u8 {
            let bcd = convert_decimal_to_bcd(value);
            assert_eq!(bcd, ((value / 10) << 4) | (value % 10));
            assert_eq!(convert_bcd_to_decimal(bcd), value);
        }
    }

    #[test]
    fn datetime_read_returns_bcd_buffer() {
        let mut rtc = Rtc::new();
        let mut interrupts = Interrupts::default();

        rtc.set_datetime(DateTime {
            year: 2024,
            month: 3,
            day: 15,
            weekday: 3,
            hour: 13,
            minute: 45,
            second: 7,
        });

        select(&mut rtc, &mut interrupts);
        // Read DateTime: marker 6 in the low nibble, register 2 in bits
        // 4-6, direction bit 7 set.
        send_byte(&mut rtc, &mut interrupts, 0xA6);

        let bytes: Vec<u8> = (0..7)
            .map(|_| receive_byte(&mut rtc, &mut interrupts))
            .collect();
        assert_eq!(bytes, vec![0x24, 0x03, 0x15, 0x03, 0x13, 0x45, 0x07]);
    }

    #[test]
    fn twelve_hour_mode_folds_afternoon_hours() {
        let mut rtc = Rtc::new();
        let mut interrupts = Interrupts::default();

        rtc.set_datetime(DateTime {
            year: 2024,
            month: 1,
            day: 1,
            weekday: 1,
            hour: 15,
            minute: 0,
            second: 0,
        });

        // Write control = 0: clears 24h mode.
        select(&mut rtc, &mut interrupts);
        send_byte(&mut rtc, &mut interrupts, 0x46);
        send_byte(&mut rtc, &mut interrupts, 0x00);

        // Read Time. The fold happens before the BCD encode.
        select(&mut rtc, &mut interrupts);
        send_byte(&mut rtc, &mut interrupts, 0xE6);
        let hour = receive_byte(&mut rtc, &mut interrupts);
        assert_eq!(hour, convert_decimal_to_bcd((15 - 12) | 64));
    }

    #[test]
    fn force_irq_raises_the_cartridge_line() {
        let mut rtc = Rtc::new();
        let mut interrupts = Interrupts::default();

        select(&mut rtc, &mut interrupts);
        send_byte(&mut rtc, &mut interrupts, 0x36);

        assert_ne!(
            interrupts.interrupt_request & (1 << Interrupt::GamePak as u16),
            0
        );
    }

    #[test]
    fn unknown_command_format_is_logged_and_ignored() {
        let mut rtc = Rtc::new();
        let mut interrupts = Interrupts::default();
        rtc.set_datetime(DateTime {
            year: 2000,
            month: 1,
            day: 1,
            weekday: 6,
            hour: 0,
            minute: 0,
            second: 0,
        });

        select(&mut rtc, &mut interrupts);
        send_byte(&mut rtc, &mut interrupts, 0x00);

        // Still waiting for a valid command; a follow-up read works.
        send_byte(&mut rtc, &mut interrupts, 0xA6);
        let first = receive_byte(&mut rtc, &mut interrupts);
        assert_eq!(first, 0x00);
    }

    #[test]
    fn datetime_write_pins_the_clock() {
        let mut rtc = Rtc::new();
        let mut interrupts = Interrupts::default();

        // Write DateTime: 2030-12-24 Tue 08:30:59.
        select(&mut rtc, &mut interrupts);
        send_byte(&mut rtc, &mut interrupts, 0x26);
        for byte in [0x30, 0x12, 0x24, 0x02, 0x08, 0x30, 0x59] {
            send_byte(&mut rtc, &mut interrupts, byte);
        }

        select(&mut rtc, &mut interrupts);
        send_byte(&mut rtc, &mut interrupts, 0xA6);
        let bytes: Vec<u8> = (0..7)
            .map(|_| receive_byte(&mut rtc, &mut interrupts))
            .collect();
        assert_eq!(bytes, vec![0x30, 0x12, 0x24, 0x02, 0x08, 0x30, 0x59]);
    }
}
