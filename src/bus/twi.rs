// Register-level TWI (I2C) master for AVR-style peripherals.
//
// The peripheral is reached through `TwiRegisters` so the polling protocol can run
// against the real register block or a test double. Each bus phase writes the control
// register and then spins on its status flags, bounded by `TwiConfig::poll_limit`.

use bitfield::bitfield;
use core::fmt::Display;

use super::TwiBus;

// TWCR bits used by the polling master. TWEA, TWWC and TWIE stay clear.
bitfield! {
    pub struct ControlBits(u8);
    impl Debug;
    pub twint, set_twint: 7;
    pub twsta, set_twsta: 5;
    pub twsto, set_twsto: 4;
    pub twen, set_twen: 2;
}

impl Clone for ControlBits {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl Copy for ControlBits {}

// status register values, prescaler bits masked off
const STATUS_MASK: u8 = 0xF8;
const STATUS_ADDRESS_NACK: u8 = 0x20; //  SLA+W sent, NOT ACK received
const STATUS_DATA_NACK: u8 = 0x30; //  data byte sent, NOT ACK received

/// Number of status register reads before a phase is declared hung, at the
/// bit period of `TwiClock::STANDARD_16MHZ`.
pub const DEFAULT_POLL_LIMIT: u32 = 50_000;

/// Register block of a TWI peripheral.
pub trait TwiRegisters {
    /// Read the control register (TWCR).
    fn control(&self) -> u8;

    /// Write the control register (TWCR).
    fn set_control(&mut self, value: u8);

    /// Read the status register (TWSR), including the prescaler bits.
    fn status(&self) -> u8;

    /// Write the prescaler bits of the status register.
    fn set_prescaler(&mut self, bits: u8);

    /// Write the bit rate register (TWBR).
    fn set_bit_rate(&mut self, value: u8);

    /// Write the data register (TWDR).
    fn set_data(&mut self, value: u8);
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Bit rate prescaler held in the low bits of the status register.
pub enum Prescaler {
    Div1 = 0,
    Div4 = 1,
    Div16 = 2,
    Div64 = 3,
}

impl Prescaler {
    pub const fn factor(&self) -> u32 {
        match self {
            Prescaler::Div1 => 1,
            Prescaler::Div4 => 4,
            Prescaler::Div16 => 16,
            Prescaler::Div64 => 64,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Bus clock settings. SCL = CPU / (16 + 2 * bit_rate * prescaler).
pub struct TwiClock {
    pub bit_rate: u8,
    pub prescaler: Prescaler,
}

impl TwiClock {
    /// 100 kHz with a 16 MHz core clock.
    pub const STANDARD_16MHZ: Self = Self {
        bit_rate: 0x48,
        prescaler: Prescaler::Div1,
    };

    /// Compute the bit rate register value for the requested SCL frequency with no
    /// prescaling. Out of range requests saturate to the nearest usable value.
    pub const fn for_frequency(cpu_hz: u32, scl_hz: u32) -> Self {
        let bit_rate = if scl_hz == 0 {
            u8::MAX
        } else {
            let ratio = cpu_hz / scl_hz;
            if ratio <= 16 {
                0
            } else if (ratio - 16) / 2 > u8::MAX as u32 {
                u8::MAX
            } else {
                ((ratio - 16) / 2) as u8
            }
        };
        Self {
            bit_rate,
            prescaler: Prescaler::Div1,
        }
    }

    /// Length of one SCL period in CPU cycles.
    pub const fn bit_period(&self) -> u32 {
        16 + 2 * self.bit_rate as u32 * self.prescaler.factor()
    }

    /// Stretch a poll limit tuned for the standard clock to this clock's bit period.
    /// Faster clocks keep the limit as is.
    pub const fn scale_poll_limit(&self, limit: u32) -> u32 {
        let standard = Self::STANDARD_16MHZ.bit_period();
        let period = self.bit_period();
        if period <= standard {
            return limit;
        }
        let scaled = limit as u64 * period as u64 / standard as u64;
        if scaled > u32::MAX as u64 {
            u32::MAX
        } else {
            scaled as u32
        }
    }

    /// SCL frequency produced by these settings at the given core clock.
    pub const fn scl_frequency(&self, cpu_hz: u32) -> u32 {
        cpu_hz / self.bit_period()
    }
}

impl Default for TwiClock {
    fn default() -> Self {
        Self::STANDARD_16MHZ
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TwiConfig {
    /// Upper bound on flag polls per phase at the standard 100 kHz clock. `Twi::new`
    /// stretches it for slower clocks. `None` waits forever.
    pub poll_limit: Option<u32>,
    /// Report a NOT ACK status as `TwiError::Nack`. Off by default: the display
    /// backpack is write-only and acknowledgment failures are ignored.
    pub check_ack: bool,
}

impl Default for TwiConfig {
    fn default() -> Self {
        Self {
            poll_limit: Some(DEFAULT_POLL_LIMIT),
            check_ack: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The bus phase that was in progress when an error occurred.
pub enum TwiPhase {
    Start,
    Write,
    Stop,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
/// Errors that can occur on the TWI bus
pub enum TwiError {
    /// The hardware did not complete the phase within the poll limit
    Timeout(TwiPhase),
    /// The target did not acknowledge the address or data byte
    Nack,
}

impl From<&TwiError> for &'static str {
    fn from(err: &TwiError) -> Self {
        match err {
            TwiError::Timeout(TwiPhase::Start) => "Timeout on start condition",
            TwiError::Timeout(TwiPhase::Write) => "Timeout on byte write",
            TwiError::Timeout(TwiPhase::Stop) => "Timeout on stop condition",
            TwiError::Nack => "Not acknowledged",
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TwiError {
    fn format(&self, fmt: defmt::Formatter) {
        let msg: &'static str = From::from(self);
        defmt::write!(fmt, "{}", msg);
    }
}

#[cfg(feature = "ufmt")]
impl ufmt::uDisplay for TwiError {
    fn fmt<W>(&self, w: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        let msg: &'static str = From::from(self);
        ufmt::uwrite!(w, "{}", msg)
    }
}

impl Display for TwiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg: &'static str = From::from(self);
        write!(f, "{}", msg)
    }
}

pub struct Twi<R> {
    regs: R,
    config: TwiConfig,
    poll_limit: Option<u32>,
}

impl<R> Twi<R>
where
    R: TwiRegisters,
{
    /// Configure the bus clock and enable the peripheral.
    pub fn new(mut regs: R, clock: TwiClock, config: TwiConfig) -> Self {
        regs.set_prescaler(clock.prescaler as u8);
        regs.set_bit_rate(clock.bit_rate);
        let mut control = ControlBits(0);
        control.set_twen(true);
        regs.set_control(control.0);
        debug!("TWI enabled, TWBR={=u8}", clock.bit_rate);
        Self {
            regs,
            config,
            poll_limit: config.poll_limit.map(|limit| clock.scale_poll_limit(limit)),
        }
    }

    pub fn config(&self) -> &TwiConfig {
        &self.config
    }

    /// Poll limit in effect for the configured clock.
    pub fn poll_limit(&self) -> Option<u32> {
        self.poll_limit
    }

    /// Returns the register block. The peripheral is left enabled.
    pub fn release(self) -> R {
        self.regs
    }

    fn command(&mut self, start: bool, stop: bool) {
        // writing TWINT clears the flag and kicks off the next phase
        let mut control = ControlBits(0);
        control.set_twint(true);
        control.set_twen(true);
        control.set_twsta(start);
        control.set_twsto(stop);
        self.regs.set_control(control.0);
    }

    fn wait_for<F>(&self, phase: TwiPhase, done: F) -> Result<(), TwiError>
    where
        F: Fn(ControlBits) -> bool,
    {
        match self.poll_limit {
            None => {
                while !done(ControlBits(self.regs.control())) {}
                Ok(())
            }
            Some(limit) => {
                for _ in 0..limit {
                    if done(ControlBits(self.regs.control())) {
                        return Ok(());
                    }
                }
                warn!("TWI timeout, status {=u8:#x}", self.regs.status());
                Err(TwiError::Timeout(phase))
            }
        }
    }

    fn check_ack(&self) -> Result<(), TwiError> {
        if !self.config.check_ack {
            return Ok(());
        }
        match self.regs.status() & STATUS_MASK {
            STATUS_ADDRESS_NACK | STATUS_DATA_NACK => Err(TwiError::Nack),
            _ => Ok(()),
        }
    }
}

impl<R> TwiBus for Twi<R>
where
    R: TwiRegisters,
{
    type Error = TwiError;

    fn start(&mut self) -> Result<(), TwiError> {
        self.command(true, false);
        self.wait_for(TwiPhase::Start, |control| control.twint())
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), TwiError> {
        self.regs.set_data(byte);
        self.command(false, false);
        self.wait_for(TwiPhase::Write, |control| control.twint())?;
        self.check_ack()
    }

    fn stop(&mut self) -> Result<(), TwiError> {
        self.command(false, true);
        self.wait_for(TwiPhase::Stop, |control| !control.twsto())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use core::cell::Cell;
    use std::vec::Vec;

    const TWINT: u8 = 0x80;
    const TWSTO: u8 = 0x10;

    /// Register block double. Completes every phase immediately unless `stuck`.
    #[derive(Default)]
    struct FakeRegisters {
        control: u8,
        status: u8,
        prescaler: u8,
        bit_rate: u8,
        stuck: bool,
        polls: Cell<u32>,
        control_log: Vec<u8>,
        data_log: Vec<u8>,
    }

    impl TwiRegisters for FakeRegisters {
        fn control(&self) -> u8 {
            self.polls.set(self.polls.get() + 1);
            self.control
        }

        fn set_control(&mut self, value: u8) {
            self.control_log.push(value);
            self.control = if value & TWINT == 0 {
                value
            } else if self.stuck {
                value & !TWINT
            } else {
                (value | TWINT) & !TWSTO
            };
        }

        fn status(&self) -> u8 {
            self.status
        }

        fn set_prescaler(&mut self, bits: u8) {
            self.prescaler = bits;
        }

        fn set_bit_rate(&mut self, value: u8) {
            self.bit_rate = value;
        }

        fn set_data(&mut self, value: u8) {
            self.data_log.push(value);
        }
    }

    #[test]
    fn test_twi_init_registers() {
        let twi = Twi::new(
            FakeRegisters::default(),
            TwiClock::STANDARD_16MHZ,
            TwiConfig::default(),
        );
        let regs = twi.release();
        assert_eq!(regs.prescaler, 0);
        assert_eq!(regs.bit_rate, 0x48);
        assert_eq!(regs.control_log, std::vec![0x04]);
    }

    #[test]
    fn test_twi_transfer_control_sequence() {
        let mut twi = Twi::new(
            FakeRegisters::default(),
            TwiClock::STANDARD_16MHZ,
            TwiConfig::default(),
        );
        assert!(twi.start().is_ok());
        assert!(twi.write_byte(0x4E).is_ok());
        assert!(twi.write_byte(0x28).is_ok());
        assert!(twi.stop().is_ok());

        let regs = twi.release();
        // enable, start, send, send, stop
        assert_eq!(regs.control_log, std::vec![0x04, 0xA4, 0x84, 0x84, 0x94]);
        assert_eq!(regs.data_log, std::vec![0x4E, 0x28]);
    }

    #[test]
    fn test_twi_timeouts() {
        let config = TwiConfig {
            poll_limit: Some(8),
            ..TwiConfig::default()
        };
        let regs = FakeRegisters {
            stuck: true,
            ..FakeRegisters::default()
        };
        let mut twi = Twi::new(regs, TwiClock::STANDARD_16MHZ, config);
        assert_eq!(twi.start(), Err(TwiError::Timeout(TwiPhase::Start)));
        assert_eq!(twi.write_byte(0x4E), Err(TwiError::Timeout(TwiPhase::Write)));
        assert_eq!(twi.stop(), Err(TwiError::Timeout(TwiPhase::Stop)));
    }

    #[test]
    fn test_twi_poll_limit_follows_clock() {
        let slowest = TwiClock {
            bit_rate: u8::MAX,
            prescaler: Prescaler::Div64,
        };
        assert_eq!(slowest.bit_period(), 32_656);
        assert_eq!(slowest.scale_poll_limit(DEFAULT_POLL_LIMIT), 10_205_000);
        assert_eq!(slowest.scale_poll_limit(u32::MAX), u32::MAX);
        assert_eq!(TwiClock::STANDARD_16MHZ.scale_poll_limit(8), 8);
        assert_eq!(TwiClock::for_frequency(16_000_000, 400_000).scale_poll_limit(8), 8);

        let config = TwiConfig {
            poll_limit: Some(8),
            ..TwiConfig::default()
        };
        let regs = FakeRegisters {
            stuck: true,
            ..FakeRegisters::default()
        };
        let mut twi = Twi::new(regs, slowest, config);
        assert_eq!(twi.poll_limit(), Some(1_632));
        assert_eq!(twi.start(), Err(TwiError::Timeout(TwiPhase::Start)));
        assert_eq!(twi.release().polls.get(), 1_632);

        let forever = TwiConfig {
            poll_limit: None,
            ..TwiConfig::default()
        };
        let twi = Twi::new(FakeRegisters::default(), slowest, forever);
        assert_eq!(twi.poll_limit(), None);
    }

    #[test]
    fn test_control_bits_layout() {
        let mut control = ControlBits(0);
        control.set_twint(true);
        control.set_twen(true);
        assert_eq!(control.0, 0x84);
        control.set_twsta(true);
        assert_eq!(control.0, 0xA4);
        control.set_twsta(false);
        control.set_twsto(true);
        assert_eq!(control.0, 0x94);
        assert!(ControlBits(0x80).twint());
        assert!(!ControlBits(0x7F).twint());
    }

    #[test]
    fn test_twi_nack_ignored_by_default() {
        let regs = FakeRegisters {
            status: STATUS_ADDRESS_NACK,
            ..FakeRegisters::default()
        };
        let mut twi = Twi::new(regs, TwiClock::STANDARD_16MHZ, TwiConfig::default());
        assert!(twi.start().is_ok());
        assert!(twi.write_byte(0x4E).is_ok());
        assert!(twi.stop().is_ok());
    }

    #[test]
    fn test_twi_nack_reported_when_checked() {
        let config = TwiConfig {
            check_ack: true,
            ..TwiConfig::default()
        };
        let regs = FakeRegisters {
            status: STATUS_DATA_NACK | 0x01,
            ..FakeRegisters::default()
        };
        let mut twi = Twi::new(regs, TwiClock::STANDARD_16MHZ, config);
        assert!(twi.start().is_ok());
        assert_eq!(twi.write_byte(0x4E), Err(TwiError::Nack));
    }

    #[test]
    fn test_twi_clock_for_frequency() {
        assert_eq!(
            TwiClock::for_frequency(16_000_000, 100_000),
            TwiClock::STANDARD_16MHZ
        );
        assert_eq!(TwiClock::for_frequency(16_000_000, 400_000).bit_rate, 12);
        assert_eq!(TwiClock::for_frequency(16_000_000, 2_000_000).bit_rate, 0);
        assert_eq!(TwiClock::for_frequency(16_000_000, 1_000).bit_rate, 255);
        assert_eq!(TwiClock::STANDARD_16MHZ.scl_frequency(16_000_000), 100_000);

        let slow = TwiClock {
            bit_rate: 0x48,
            prescaler: Prescaler::Div4,
        };
        assert_eq!(slow.scl_frequency(16_000_000), 16_000_000 / (16 + 2 * 72 * 4));
    }

    #[test]
    fn test_twi_error_messages() {
        use std::string::ToString;

        assert_eq!(
            TwiError::Timeout(TwiPhase::Start).to_string(),
            "Timeout on start condition"
        );
        assert_eq!(
            TwiError::Timeout(TwiPhase::Stop).to_string(),
            "Timeout on stop condition"
        );
        assert_eq!(TwiError::Nack.to_string(), "Not acknowledged");
    }
}
