pub mod twi;

#[cfg(feature = "atmega328p")]
pub mod atmega328p;

use core::fmt::Display;

use embedded_hal::i2c;
use heapless::Vec;

pub use twi::{Prescaler, Twi, TwiClock, TwiConfig, TwiError, TwiPhase, TwiRegisters};

/// Direction bit appended to the 7-bit target address for a write transfer.
pub const WRITE_DIRECTION: u8 = 0;
/// Direction bit appended to the 7-bit target address for a read transfer.
pub const READ_DIRECTION: u8 = 1;

/// Largest payload `I2cBus` will buffer between a start and a stop condition.
pub const PAYLOAD_CAPACITY: usize = 16;

/// A two-wire bus master that exposes the individual phases of a write transfer.
///
/// Every call blocks until the bus hardware reports the phase as complete. A transfer
/// is a `start`, the address byte, any number of payload bytes, and a `stop`.
pub trait TwiBus {
    type Error: core::fmt::Debug;

    /// Issue a start condition.
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Transmit one byte. The first byte after `start` is the address byte.
    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error>;

    /// Issue a stop condition.
    fn stop(&mut self) -> Result<(), Self::Error>;
}

impl<T: TwiBus> TwiBus for &mut T {
    type Error = T::Error;

    fn start(&mut self) -> Result<(), Self::Error> {
        T::start(self)
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        T::write_byte(self, byte)
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        T::stop(self)
    }
}

#[derive(Debug, PartialEq, Copy, Clone)]
/// Errors raised by `I2cBus`
pub enum I2cBusError<E> {
    /// Error returned from the underlying `embedded-hal` I2C implementation
    I2c(E),
    /// A byte was written before a start condition
    NotStarted,
    /// The transfer payload exceeded `PAYLOAD_CAPACITY`
    BufferFull,
    /// The address byte requested a read transfer
    ReadNotSupported,
}

impl<E> From<&I2cBusError<E>> for &'static str {
    fn from(err: &I2cBusError<E>) -> Self {
        match err {
            I2cBusError::I2c(_) => "I2C error",
            I2cBusError::NotStarted => "Write without start condition",
            I2cBusError::BufferFull => "Transfer payload too long",
            I2cBusError::ReadNotSupported => "Read transfer not supported",
        }
    }
}

#[cfg(feature = "defmt")]
impl<E> defmt::Format for I2cBusError<E> {
    fn format(&self, fmt: defmt::Formatter) {
        let msg: &'static str = From::from(self);
        defmt::write!(fmt, "{}", msg);
    }
}

#[cfg(feature = "ufmt")]
impl<E> ufmt::uDisplay for I2cBusError<E> {
    fn fmt<W>(&self, w: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        let msg: &'static str = From::from(self);
        ufmt::uwrite!(w, "{}", msg)
    }
}

impl<E> Display for I2cBusError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg: &'static str = From::from(self);
        write!(f, "{}", msg)
    }
}

/// Runs `TwiBus` transfers on top of any `embedded-hal` I2C implementation.
///
/// The HAL owns start and stop conditions, so the address byte and payload are
/// collected until `stop` and then sent as a single `I2c::write`. On the wire this is
/// the same start / address / payload / stop sequence a register-level master emits.
pub struct I2cBus<I2C> {
    i2c: I2C,
    started: bool,
    address: Option<u8>,
    payload: Vec<u8, PAYLOAD_CAPACITY>,
}

impl<I2C> I2cBus<I2C>
where
    I2C: i2c::I2c,
{
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            started: false,
            address: None,
            payload: Vec::new(),
        }
    }

    /// Returns the wrapped I2C peripheral.
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C> TwiBus for I2cBus<I2C>
where
    I2C: i2c::I2c,
{
    type Error = I2cBusError<I2C::Error>;

    fn start(&mut self) -> Result<(), Self::Error> {
        // a repeated start abandons whatever was collected so far
        self.started = true;
        self.address = None;
        self.payload.clear();
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        if !self.started {
            return Err(I2cBusError::NotStarted);
        }
        match self.address {
            None => {
                if byte & READ_DIRECTION != 0 {
                    return Err(I2cBusError::ReadNotSupported);
                }
                self.address = Some(byte >> 1);
            }
            Some(_) => {
                self.payload
                    .push(byte)
                    .map_err(|_| I2cBusError::BufferFull)?;
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        let result = match self.address.take() {
            Some(address) => self
                .i2c
                .write(address, &self.payload)
                .map_err(I2cBusError::I2c),
            None => Ok(()),
        };
        self.payload.clear();
        result
    }
}
