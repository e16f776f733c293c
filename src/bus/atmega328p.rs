//! ATmega328P backing for the TWI master, plus a cycle-counted delay for the demo firmware.

use avr_device::atmega328p::TWI;
use embedded_hal::delay::DelayNs;

use super::TwiRegisters;

impl TwiRegisters for TWI {
    fn control(&self) -> u8 {
        self.twcr().read().bits()
    }

    fn set_control(&mut self, value: u8) {
        self.twcr().write(|w| unsafe { w.bits(value) });
    }

    fn status(&self) -> u8 {
        self.twsr().read().bits()
    }

    fn set_prescaler(&mut self, bits: u8) {
        // only TWPS1:0 are writable, the status bits are read-only
        self.twsr().write(|w| unsafe { w.bits(bits & 0x03) });
    }

    fn set_bit_rate(&mut self, value: u8) {
        self.twbr().write(|w| unsafe { w.bits(value) });
    }

    fn set_data(&mut self, value: u8) {
        self.twdr().write(|w| unsafe { w.bits(value) });
    }
}

/// Busy-wait delay derived from the core clock frequency.
pub struct CycleDelay<const CPU_HZ: u32>;

impl<const CPU_HZ: u32> DelayNs for CycleDelay<CPU_HZ> {
    fn delay_ns(&mut self, ns: u32) {
        let cycles = (u64::from(ns) * u64::from(CPU_HZ)).div_ceil(1_000_000_000);
        avr_device::asm::delay_cycles(cycles as u32);
    }
}
