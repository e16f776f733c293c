//! Demo firmware for an ATmega328P at 16 MHz (Arduino Uno / Nano) with a PCF8574 LCD
//! backpack at 0x27 on the TWI pins.
#![no_std]
#![no_main]

use i2c_lcd_backpack::{
    app::{self, Banner},
    bus::{atmega328p::CycleDelay, Twi, TwiClock, TwiConfig},
    CharacterLcd,
};
use panic_halt as _;

const CPU_HZ: u32 = 16_000_000;

#[avr_device::entry]
fn main() -> ! {
    let Some(dp) = avr_device::atmega328p::Peripherals::take() else {
        // peripherals already taken, nothing sensible to do
        loop {}
    };

    let twi = Twi::new(dp.TWI, TwiClock::STANDARD_16MHZ, TwiConfig::default());
    let lcd = CharacterLcd::new(twi, CycleDelay::<CPU_HZ>);

    app::run(lcd, &Banner::GREETING)
}
