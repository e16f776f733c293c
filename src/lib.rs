//! This Rust `embedded-hal`-based library drives a [HD44780](https://en.wikipedia.org/wiki/Hitachi_HD44780_LCD_controller)
//! compatible character display through a PCF8574 "I2C backpack" in an embedded, `no_std` environment.
//!
//! The PCF8574 is an 8-bit I/O expander. The common backpack wires the display's 4-bit data bus to P4-P7 and the
//! RS, RW, enable and backlight lines to P0-P3. Every byte for the controller is therefore sent as two nibbles, each
//! latched with an enable pulse, all inside a single I2C transfer to the backpack.
//!
//! The crate is layered the same way the bus is:
//! - **[`bus`]** - the [`TwiBus`](bus::TwiBus) trait with `start`, `write_byte` and `stop`. Two implementations
//!   are provided: [`Twi`](bus::Twi), a register-level TWI master for AVR style peripherals that busy-polls the
//!   hardware flags, and [`I2cBus`](bus::I2cBus), which runs the same transfers on any `embedded-hal` I2C driver.
//! - **[`driver`]** - [`CharacterLcd`], the display driver: power-on sequence, cursor placement and text output.
//! - **[`app`]** - the two-line banner demo and its endless refresh loop.
//! - **`sim`** - with the `sim` feature, a simulated backpack and controller implementing `TwiBus`, for testing
//!   display code without hardware.
//!
//! ## Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! i2c-lcd-backpack = { version = "0.1", features = ["defmt"] }
//! ```
//! The optional `defmt` feature enables logging through `defmt` and `defmt::Format` for the error types. The optional
//! `ufmt` feature allows the `uwriteln!` and `uwrite!` macros to be used with the display.
//!
//! With an `embedded-hal` I2C peripheral:
//! ```rust
//! use i2c_lcd_backpack::{bus::I2cBus, CharacterLcd};
//!
//! let i2c = ...; // I2C peripheral
//! let delay = ...; // DelayNs implementation
//!
//! let mut lcd = CharacterLcd::new(I2cBus::new(i2c), delay);
//! lcd.init()?;
//! lcd.set_cursor(0, 2)?.print("Hello World!")?;
//! ```
//! Or straight on the ATmega328P TWI registers (feature `atmega328p`):
//! ```rust
//! use i2c_lcd_backpack::bus::{Twi, TwiClock, TwiConfig};
//!
//! let twi = Twi::new(dp.TWI, TwiClock::STANDARD_16MHZ, TwiConfig::default());
//! let mut lcd = CharacterLcd::new(twi, delay);
//! ```
//!
//! Display methods return a `Result` wrapping the display in `Ok()`, so commands can be chained:
//! ```rust
//! lcd.set_cursor(1, 2)?.print("LCD Tutorial")?;
//! ```
//! `core::fmt::Write` is implemented too:
//! ```rust
//! use core::fmt::Write;
//!
//! write!(lcd, "{} C", 21)?;
//! ```
//!
//! ### Limits
//! The backpack is only ever written to. Acknowledgment failures are ignored unless
//! [`TwiConfig::check_ack`](bus::TwiConfig) is set, the row passed to `set_cursor` selects the first line for `0` and
//! the second line for anything else, and text longer than a line wraps the way the controller wraps it.
//!
#![no_std]
#![allow(non_upper_case_globals)]

#[macro_use]
mod fmt;

pub mod app;
pub mod bus;
pub mod driver;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

use core::fmt::Display;

pub use driver::{CharacterLcd, LcdConfig, Mode, DEFAULT_I2C_ADDRESS};

#[derive(Debug, PartialEq, Copy, Clone)]
/// Errors that can occur when using the display
pub enum LcdError<E> {
    /// Error returned from the underlying bus implementation
    Bus(E),
    /// Formatting error
    Formatting(core::fmt::Error),
}

impl<E> From<core::fmt::Error> for LcdError<E> {
    fn from(err: core::fmt::Error) -> Self {
        LcdError::Formatting(err)
    }
}

impl<E> From<&LcdError<E>> for &'static str {
    fn from(err: &LcdError<E>) -> Self {
        match err {
            LcdError::Bus(_) => "Bus error",
            LcdError::Formatting(_) => "Formatting error",
        }
    }
}

#[cfg(feature = "defmt")]
impl<E> defmt::Format for LcdError<E> {
    fn format(&self, fmt: defmt::Formatter) {
        let msg: &'static str = From::from(self);
        defmt::write!(fmt, "{}", msg);
    }
}

#[cfg(feature = "ufmt")]
impl<E> ufmt::uDisplay for LcdError<E> {
    fn fmt<W>(&self, w: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        let msg: &'static str = From::from(self);
        ufmt::uwrite!(w, "{}", msg)
    }
}

impl<E> Display for LcdError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg: &'static str = From::from(self);
        write!(f, "{}", msg)
    }
}

#[cfg(test)]
mod lib_tests {
    extern crate std;
    use super::*;
    use crate::{
        bus::{Twi, TwiBus, TwiClock, TwiConfig, TwiRegisters},
        sim::{Frame, SimulatedBackpack},
    };
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use std::string::ToString;

    #[test]
    fn test_hi_lands_on_first_row() {
        let mut lcd = CharacterLcd::new(SimulatedBackpack::new(), NoopDelay::new());
        assert!(lcd.init().is_ok());
        assert!(lcd.set_cursor(0, 2).is_ok());
        assert!(lcd.print("Hi").is_ok());

        let sim = lcd.bus();
        assert_eq!(sim.text(0, 2, 2), b"Hi");
        assert_eq!(sim.text(0, 0, 2), b"  ");
        assert_eq!(sim.text(1, 2, 2), b"  ");
    }

    #[test]
    fn test_state_after_init() {
        let mut lcd = CharacterLcd::new(SimulatedBackpack::new(), NoopDelay::new());
        assert!(lcd.init().is_ok());

        let (sim, _) = lcd.release();
        assert_eq!(
            sim.frames(),
            &[
                Frame::command(0x02),
                Frame::command(0x28),
                Frame::command(0x0C),
                Frame::command(0x06),
                Frame::command(0x01),
            ]
        );
        let controller = sim.controller();
        assert!(controller.is_four_bit());
        assert!(controller.is_two_line());
        assert!(controller.is_display_on());
        assert!(!controller.is_cursor_on());
        assert!(controller.is_increment());
        assert_eq!(controller.address_counter(), 0x00);
        assert!(sim.is_backlight_on());
    }

    #[test]
    fn test_init_survives_controller_already_in_four_bit_mode() {
        // an MCU reset without a power cycle leaves the controller in 4-bit mode
        let mut lcd = CharacterLcd::new(SimulatedBackpack::new(), NoopDelay::new());
        assert!(lcd.init().is_ok());
        assert!(lcd.set_cursor(1, 4).and_then(|lcd| lcd.print("x")).is_ok());
        assert!(lcd.init().is_ok());
        assert!(lcd.set_cursor(0, 0).and_then(|lcd| lcd.print("y")).is_ok());

        let sim = lcd.bus();
        assert!(sim.controller().is_four_bit());
        assert_eq!(sim.text(0, 0, 1), b"y");
        assert_eq!(sim.text(1, 4, 1), b" ");
    }

    /// Registers that complete each phase at once and hand written bytes to a simulated backpack.
    struct LoopbackRegisters {
        control: u8,
        data: u8,
        backpack: SimulatedBackpack,
    }

    impl TwiRegisters for LoopbackRegisters {
        fn control(&self) -> u8 {
            self.control
        }

        fn set_control(&mut self, value: u8) {
            if value & 0x80 != 0 {
                if value & 0x20 != 0 {
                    let _ = self.backpack.start();
                } else if value & 0x10 != 0 {
                    let _ = self.backpack.stop();
                } else {
                    let _ = self.backpack.write_byte(self.data);
                }
                self.control = (value | 0x80) & !0x10;
            } else {
                self.control = value;
            }
        }

        fn status(&self) -> u8 {
            0x28
        }

        fn set_prescaler(&mut self, _bits: u8) {}

        fn set_bit_rate(&mut self, _value: u8) {}

        fn set_data(&mut self, value: u8) {
            self.data = value;
        }
    }

    #[test]
    fn test_register_level_bus_end_to_end() {
        let regs = LoopbackRegisters {
            control: 0,
            data: 0,
            backpack: SimulatedBackpack::new(),
        };
        let twi = Twi::new(regs, TwiClock::STANDARD_16MHZ, TwiConfig::default());
        let mut lcd = CharacterLcd::new(twi, NoopDelay::new());
        assert!(lcd.init().is_ok());
        assert!(lcd.set_cursor(1, 2).is_ok());
        assert!(lcd.print("TWI").is_ok());

        let (twi, _) = lcd.release();
        let regs = twi.release();
        assert_eq!(regs.backpack.text(1, 2, 3), b"TWI");
        assert_eq!(regs.backpack.transfers(), 5 + 1 + 3);
    }

    #[test]
    fn test_error_messages() {
        let bus: LcdError<()> = LcdError::Bus(());
        assert_eq!(bus.to_string(), "Bus error");
        let formatting: LcdError<()> = core::fmt::Error.into();
        assert_eq!(formatting, LcdError::Formatting(core::fmt::Error));
        assert_eq!(formatting.to_string(), "Formatting error");
    }
}
