// HD44780 support over a PCF8574 I2C backpack.
//
// `CharacterLcd` owns a `TwiBus` and a delay. Every controller byte is sent as its own
// bus transfer: start, the backpack address, the six expander bytes of the nibble frame,
// stop. The controller state is never read back; it follows from the command history.

pub mod pcf8574;

use embedded_hal::delay::DelayNs;

use crate::{
    bus::{TwiBus, WRITE_DIRECTION},
    LcdError,
};

// commands
const LCD_CMD_CLEARDISPLAY: u8 = 0x01; //  Clear display, set cursor position to zero
const LCD_CMD_RETURNHOME: u8 = 0x02; //  Set cursor position to zero
const LCD_CMD_ENTRYMODESET: u8 = 0x04; //  Sets the entry mode
const LCD_CMD_DISPLAYCONTROL: u8 = 0x08; //  Controls the display; does stuff like turning it off and on
const LCD_CMD_FUNCTIONSET: u8 = 0x20; //  Used to send the function to set to the display
const LCD_CMD_SETDDRAMADDR: u8 = 0x80; //  Used to set the DDRAM (Display Data RAM)

// flags for display entry mode
const LCD_FLAG_ENTRYLEFT: u8 = 0x02; //  Used to set text to flow from left to right
const LCD_FLAG_ENTRYSHIFTDECREMENT: u8 = 0x00; //  Used to 'left justify' text from the cursor

// flags for display on/off control
const LCD_FLAG_DISPLAYON: u8 = 0x04; //  Turns the display on
const LCD_FLAG_CURSOROFF: u8 = 0x00; //  Turns the cursor off
const LCD_FLAG_BLINKOFF: u8 = 0x00; //  Turns off the blinking cursor

// flags for function set
const LCD_FLAG_4BITMODE: u8 = 0x00; //  LCD 4 bit mode
const LCD_FLAG_2LINE: u8 = 0x08; //  LCD 2 line mode
const LCD_FLAG_5x8_DOTS: u8 = 0x00; //  8 pixel high font mode

// DDRAM base address of each row
const LCD_ROW0_ADDR: u8 = LCD_CMD_SETDDRAMADDR;
const LCD_ROW1_ADDR: u8 = LCD_CMD_SETDDRAMADDR | 0x40;

/// Power-on command sequence. The leading 0x02 arrives while the controller still
/// listens in 8-bit mode, so its low nibble lands as a 4-bit function set.
const INIT_SEQUENCE: [u8; 5] = [
    LCD_CMD_RETURNHOME,
    LCD_CMD_FUNCTIONSET | LCD_FLAG_4BITMODE | LCD_FLAG_2LINE | LCD_FLAG_5x8_DOTS,
    LCD_CMD_DISPLAYCONTROL | LCD_FLAG_DISPLAYON | LCD_FLAG_CURSOROFF | LCD_FLAG_BLINKOFF,
    LCD_CMD_ENTRYMODESET | LCD_FLAG_ENTRYLEFT | LCD_FLAG_ENTRYSHIFTDECREMENT,
    LCD_CMD_CLEARDISPLAY,
];

/// Default I2C address of PCF8574 backpacks with all address jumpers open.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x27;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Register select for a controller byte.
pub enum Mode {
    /// Instruction register (RS low)
    Command = 0,
    /// Data register (RS high), writes into DDRAM or CGRAM
    Data = 1,
}

impl Mode {
    pub const fn rs(&self) -> bool {
        matches!(self, Mode::Data)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Fixed settings of a display.
pub struct LcdConfig {
    /// 7-bit I2C address of the backpack
    pub address: u8,
    /// Backlight state at construction
    pub backlight: bool,
    /// Wait before the first command after power-up
    pub power_on_delay_ms: u32,
    /// Wait after every command and data byte
    pub command_delay_ms: u32,
}

impl LcdConfig {
    pub const DEFAULT: Self = Self {
        address: DEFAULT_I2C_ADDRESS,
        backlight: true,
        power_on_delay_ms: 50,
        command_delay_ms: 2,
    };

    pub const fn with_address(self, address: u8) -> Self {
        Self { address, ..self }
    }
}

impl Default for LcdConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub struct CharacterLcd<BUS, DELAY>
where
    BUS: TwiBus,
    DELAY: DelayNs,
{
    bus: BUS,
    delay: DELAY,
    config: LcdConfig,
    backlight: bool,
}

impl<BUS, DELAY> CharacterLcd<BUS, DELAY>
where
    BUS: TwiBus,
    DELAY: DelayNs,
{
    /// Create a display at the default address with the default timings.
    pub fn new(bus: BUS, delay: DELAY) -> Self {
        Self::new_with_config(bus, delay, LcdConfig::default())
    }

    pub fn new_with_config(bus: BUS, delay: DELAY, config: LcdConfig) -> Self {
        Self {
            bus,
            delay,
            backlight: config.backlight,
            config,
        }
    }

    pub fn config(&self) -> &LcdConfig {
        &self.config
    }

    /// returns a reference to the bus. mostly needed for testing
    #[cfg(test)]
    pub(crate) fn bus(&mut self) -> &mut BUS {
        &mut self.bus
    }

    pub fn delay(&mut self) -> &mut DELAY {
        &mut self.delay
    }

    /// Tear down the driver, returning the bus and the delay.
    pub fn release(self) -> (BUS, DELAY) {
        (self.bus, self.delay)
    }

    /// Run the power-on sequence. Must be called before anything is displayed.
    ///
    /// Afterwards the controller is in 4-bit, 2-line, 5x8 mode with the display on,
    /// the cursor hidden, left-to-right entry, a cleared screen and the cursor at 0x80.
    pub fn init(&mut self) -> Result<(), LcdError<BUS::Error>> {
        debug!("initializing display at {=u8:#x}", self.config.address);
        self.delay.delay_ms(self.config.power_on_delay_ms);
        for command in INIT_SEQUENCE {
            self.send_command(command)?;
        }
        self.delay.delay_ms(self.config.command_delay_ms);
        Ok(())
    }

    /// Send one byte to the controller in a single bus transfer. Does not wait for the
    /// controller to process it.
    pub fn send_byte(&mut self, value: u8, mode: Mode) -> Result<(), LcdError<BUS::Error>> {
        trace!("send {=u8:#x} as {}", value, mode);
        let frame = pcf8574::nibble_frame(value, mode, self.backlight);
        self.transfer(&frame)
    }

    /// Send an instruction and wait for the controller to execute it.
    pub fn send_command(&mut self, command: u8) -> Result<(), LcdError<BUS::Error>> {
        self.send_byte(command, Mode::Command)?;
        self.delay.delay_ms(self.config.command_delay_ms);
        Ok(())
    }

    /// Write a character code at the cursor and wait for the controller.
    pub fn send_data(&mut self, data: u8) -> Result<(), LcdError<BUS::Error>> {
        self.send_byte(data, Mode::Data)?;
        self.delay.delay_ms(self.config.command_delay_ms);
        Ok(())
    }

    /// Move the cursor. Row 0 is the first line, every other row value selects the
    /// second line. The column is not checked against the display width.
    pub fn set_cursor(&mut self, row: u8, col: u8) -> Result<&mut Self, LcdError<BUS::Error>> {
        let base = if row == 0 { LCD_ROW0_ADDR } else { LCD_ROW1_ADDR };
        self.send_command(base.wrapping_add(col))?;
        Ok(self)
    }

    /// Prints a string at the current cursor position. Each `char` is truncated to its
    /// low byte, which matches the controller's character ROM for ASCII.
    pub fn print(&mut self, text: &str) -> Result<&mut Self, LcdError<BUS::Error>> {
        for c in text.chars() {
            self.send_data(c as u8)?;
        }
        Ok(self)
    }

    /// Prints raw character codes up to the first NUL byte.
    pub fn print_bytes(&mut self, text: &[u8]) -> Result<&mut Self, LcdError<BUS::Error>> {
        for &code in text.iter().take_while(|&&code| code != 0) {
            self.send_data(code)?;
        }
        Ok(self)
    }

    /// Clear the display
    pub fn clear(&mut self) -> Result<&mut Self, LcdError<BUS::Error>> {
        self.send_command(LCD_CMD_CLEARDISPLAY)?;
        Ok(self)
    }

    /// Set the cursor to the home position.
    pub fn home(&mut self) -> Result<&mut Self, LcdError<BUS::Error>> {
        self.send_command(LCD_CMD_RETURNHOME)?;
        Ok(self)
    }

    /// Turn the backlight on or off. Takes effect immediately and is carried in every
    /// later transfer.
    pub fn backlight(&mut self, on: bool) -> Result<&mut Self, LcdError<BUS::Error>> {
        self.backlight = on;
        self.transfer(&[pcf8574::backlight_bits(on)])?;
        Ok(self)
    }

    pub fn is_backlight_on(&self) -> bool {
        self.backlight
    }

    fn transfer(&mut self, payload: &[u8]) -> Result<(), LcdError<BUS::Error>> {
        self.bus.start().map_err(LcdError::Bus)?;
        let result = self.write_payload(payload);
        if result.is_err() {
            // release the bus, the original error is the one worth reporting
            let _ = self.bus.stop();
            return result;
        }
        self.bus.stop().map_err(LcdError::Bus)
    }

    fn write_payload(&mut self, payload: &[u8]) -> Result<(), LcdError<BUS::Error>> {
        self.bus
            .write_byte((self.config.address << 1) | WRITE_DIRECTION)
            .map_err(LcdError::Bus)?;
        for &byte in payload {
            self.bus.write_byte(byte).map_err(LcdError::Bus)?;
        }
        Ok(())
    }
}

/// Implement the `core::fmt::Write` trait for the display, allowing it to be used with the `write!` macro.
impl<BUS, DELAY> core::fmt::Write for CharacterLcd<BUS, DELAY>
where
    BUS: TwiBus,
    DELAY: DelayNs,
{
    fn write_str(&mut self, s: &str) -> Result<(), core::fmt::Error> {
        if let Err(_e) = self.print(s) {
            return Err(core::fmt::Error);
        }
        Ok(())
    }
}

#[cfg(feature = "ufmt")]
/// Implement the `ufmt::uWrite` trait for the display, allowing it to be used with the `uwriteln!` and `uwrite!` macros.
impl<BUS, DELAY> ufmt::uWrite for CharacterLcd<BUS, DELAY>
where
    BUS: TwiBus,
    DELAY: DelayNs,
{
    type Error = LcdError<BUS::Error>;

    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        self.print(s)?;
        Ok(())
    }
}
