//! A simulated PCF8574 backpack with an HD44780 behind it.
//!
//! `SimulatedBackpack` implements `TwiBus`, so a `CharacterLcd` can drive it exactly as it
//! drives real hardware. The expander output is decoded pin by pin: nibbles are latched
//! on the falling edge of the enable line and fed to an `Hd44780` model that keeps the
//! DDRAM contents and the controller flags. Each transfer that carries a well-formed
//! nibble frame is also logged as a `Frame`.
//!
//! Enabled with the `sim` feature, and always available to the crate's own tests.

use core::convert::Infallible;

use heapless::Vec;

use crate::{
    bus::{TwiBus, PAYLOAD_CAPACITY, READ_DIRECTION},
    driver::{
        pcf8574::{ExpanderBits, FRAME_LEN},
        Mode, DEFAULT_I2C_ADDRESS,
    },
};

/// Characters per line in 2-line mode.
pub const LINE_LENGTH: usize = 40;
/// Size of the display data RAM.
pub const DDRAM_SIZE: usize = 80;
/// Size of the character generator RAM.
pub const CGRAM_SIZE: usize = 64;
/// Number of frames the log keeps. Later frames are counted in
/// `SimulatedBackpack::dropped_frames` until the log is drained.
pub const FRAME_LOG_CAPACITY: usize = 128;

const SECOND_LINE: u8 = 0x40;
const BLANK: u8 = b' ';

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum RamTarget {
    Ddram,
    Cgram,
}

/// Behavioral model of the HD44780 controller.
pub struct Hd44780 {
    ddram: [u8; DDRAM_SIZE],
    cgram: [u8; CGRAM_SIZE],
    address: u8,
    cgram_address: u8,
    target: RamTarget,
    pending_nibble: Option<u8>,
    four_bit: bool,
    two_line: bool,
    large_font: bool,
    display_on: bool,
    cursor_on: bool,
    blink_on: bool,
    increment: bool,
    shift_on_entry: bool,
    display_shift: i8,
}

impl Default for Hd44780 {
    /// State after the internal power-on reset: 8-bit interface, one line, display off,
    /// cleared DDRAM.
    fn default() -> Self {
        Self {
            ddram: [BLANK; DDRAM_SIZE],
            cgram: [0; CGRAM_SIZE],
            address: 0,
            cgram_address: 0,
            target: RamTarget::Ddram,
            pending_nibble: None,
            four_bit: false,
            two_line: false,
            large_font: false,
            display_on: false,
            cursor_on: false,
            blink_on: false,
            increment: true,
            shift_on_entry: false,
            display_shift: 0,
        }
    }
}

impl Hd44780 {
    /// Latch the upper data lines. In 8-bit mode the nibble is a whole instruction with
    /// the unconnected low lines read as zero; in 4-bit mode two nibbles make a byte.
    pub fn latch(&mut self, rs: bool, nibble: u8) {
        let nibble = nibble & 0x0F;
        if !self.four_bit {
            self.execute(rs, nibble << 4);
        } else if let Some(high) = self.pending_nibble.take() {
            self.execute(rs, (high << 4) | nibble);
        } else {
            self.pending_nibble = Some(nibble);
        }
    }

    /// Execute a complete byte on the instruction (`rs == false`) or data register.
    pub fn execute(&mut self, rs: bool, value: u8) {
        if rs {
            self.write_data(value);
        } else {
            self.instruction(value);
        }
    }

    fn instruction(&mut self, value: u8) {
        if value & 0x80 != 0 {
            self.address = self.normalize(value & 0x7F);
            self.target = RamTarget::Ddram;
        } else if value & 0x40 != 0 {
            self.cgram_address = value & 0x3F;
            self.target = RamTarget::Cgram;
        } else if value & 0x20 != 0 {
            self.four_bit = value & 0x10 == 0;
            self.two_line = value & 0x08 != 0;
            self.large_font = value & 0x04 != 0;
            self.pending_nibble = None;
            // the address map changes with the line count
            self.address = self.normalize(self.address);
        } else if value & 0x10 != 0 {
            let right = value & 0x04 != 0;
            if value & 0x08 != 0 {
                self.display_shift = self.display_shift.wrapping_add(if right { 1 } else { -1 });
            } else {
                self.address = self.step(self.address, right);
            }
        } else if value & 0x08 != 0 {
            self.display_on = value & 0x04 != 0;
            self.cursor_on = value & 0x02 != 0;
            self.blink_on = value & 0x01 != 0;
        } else if value & 0x04 != 0 {
            self.increment = value & 0x02 != 0;
            self.shift_on_entry = value & 0x01 != 0;
        } else if value & 0x02 != 0 {
            self.address = 0;
            self.display_shift = 0;
            self.target = RamTarget::Ddram;
        } else if value & 0x01 != 0 {
            self.ddram = [BLANK; DDRAM_SIZE];
            self.address = 0;
            self.display_shift = 0;
            self.increment = true;
            self.target = RamTarget::Ddram;
        }
    }

    fn write_data(&mut self, value: u8) {
        match self.target {
            RamTarget::Ddram => {
                let index = self.index(self.address);
                self.ddram[index] = value;
                self.address = self.step(self.address, self.increment);
                if self.shift_on_entry {
                    self.display_shift =
                        self.display_shift
                            .wrapping_add(if self.increment { -1 } else { 1 });
                }
            }
            RamTarget::Cgram => {
                self.cgram[self.cgram_address as usize] = value;
                self.cgram_address = if self.increment {
                    (self.cgram_address + 1) & 0x3F
                } else {
                    self.cgram_address.wrapping_sub(1) & 0x3F
                };
            }
        }
    }

    /// Fold an address written by software into the valid DDRAM range.
    fn normalize(&self, address: u8) -> u8 {
        if self.two_line {
            let line = address & SECOND_LINE;
            line | ((address & 0x3F) % LINE_LENGTH as u8)
        } else {
            address % DDRAM_SIZE as u8
        }
    }

    /// Next address counter value, with the line wrap of the controller.
    fn step(&self, address: u8, forward: bool) -> u8 {
        if self.two_line {
            match (address, forward) {
                (0x27, true) => SECOND_LINE,
                (0x67, true) => 0x00,
                (0x00, false) => 0x67,
                (0x40, false) => 0x27,
                (a, true) => a + 1,
                (a, false) => a - 1,
            }
        } else {
            match (address, forward) {
                (0x4F, true) => 0x00,
                (0x00, false) => 0x4F,
                (a, true) => a + 1,
                (a, false) => a - 1,
            }
        }
    }

    fn index(&self, address: u8) -> usize {
        if self.two_line {
            let row = usize::from(address & SECOND_LINE != 0);
            row * LINE_LENGTH + usize::from(address & 0x3F)
        } else {
            usize::from(address)
        }
    }

    /// Characters of one line in 2-line mode. Rows past the second wrap.
    pub fn row(&self, row: usize) -> &[u8] {
        let start = (row % 2) * LINE_LENGTH;
        &self.ddram[start..start + LINE_LENGTH]
    }

    /// `len` characters of a line starting at `col`, clipped to the line end.
    pub fn text(&self, row: usize, col: usize, len: usize) -> &[u8] {
        let line = self.row(row);
        let start = col.min(LINE_LENGTH);
        let end = (start + len).min(LINE_LENGTH);
        &line[start..end]
    }

    pub fn ddram(&self) -> &[u8; DDRAM_SIZE] {
        &self.ddram
    }

    pub fn cgram(&self) -> &[u8; CGRAM_SIZE] {
        &self.cgram
    }

    /// DDRAM address counter
    pub fn address_counter(&self) -> u8 {
        self.address
    }

    pub fn is_four_bit(&self) -> bool {
        self.four_bit
    }

    pub fn is_two_line(&self) -> bool {
        self.two_line
    }

    pub fn is_large_font(&self) -> bool {
        self.large_font
    }

    pub fn is_display_on(&self) -> bool {
        self.display_on
    }

    pub fn is_cursor_on(&self) -> bool {
        self.cursor_on
    }

    pub fn is_blink_on(&self) -> bool {
        self.blink_on
    }

    pub fn is_increment(&self) -> bool {
        self.increment
    }

    pub fn display_shift(&self) -> i8 {
        self.display_shift
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// One controller byte recovered from a transfer's expander bytes.
pub struct Frame {
    pub mode: Mode,
    pub value: u8,
}

impl Frame {
    pub const fn command(value: u8) -> Self {
        Self {
            mode: Mode::Command,
            value,
        }
    }

    pub const fn data(value: u8) -> Self {
        Self {
            mode: Mode::Data,
            value,
        }
    }

    /// Recognize a set / enable-high / enable-low nibble frame.
    fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() != FRAME_LEN {
            return None;
        }
        let (high, low) = payload.split_at(3);
        let first = Self::nibble(high)?;
        let second = Self::nibble(low)?;
        if first.rs() != second.rs() {
            return None;
        }
        let mode = if first.rs() == 1 {
            Mode::Data
        } else {
            Mode::Command
        };
        Some(Self {
            mode,
            value: (first.data() << 4) | second.data(),
        })
    }

    fn nibble(bytes: &[u8]) -> Option<ExpanderBits> {
        let set = ExpanderBits(bytes[0]);
        let mut pulse = set;
        pulse.set_enable(1);
        if set.enable() == 0 && set.rw() == 0 && bytes[1] == pulse.0 && bytes[2] == set.0 {
            Some(set)
        } else {
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum BusState {
    Idle,
    AwaitingAddress,
    Selected,
    NotAddressed,
}

/// `TwiBus` double standing in for a PCF8574 backpack and its HD44780.
pub struct SimulatedBackpack {
    address: u8,
    state: BusState,
    pins: ExpanderBits,
    payload: Vec<u8, PAYLOAD_CAPACITY>,
    frames: Vec<Frame, FRAME_LOG_CAPACITY>,
    dropped_frames: usize,
    transfers: usize,
    controller: Hd44780,
}

impl Default for SimulatedBackpack {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackpack {
    /// A backpack answering at the default address.
    pub fn new() -> Self {
        Self::with_address(DEFAULT_I2C_ADDRESS)
    }

    pub fn with_address(address: u8) -> Self {
        Self {
            address,
            state: BusState::Idle,
            pins: ExpanderBits(0),
            payload: Vec::new(),
            frames: Vec::new(),
            dropped_frames: 0,
            transfers: 0,
            controller: Hd44780::default(),
        }
    }

    pub fn controller(&self) -> &Hd44780 {
        &self.controller
    }

    /// See `Hd44780::row`.
    pub fn row(&self, row: usize) -> &[u8] {
        self.controller.row(row)
    }

    /// See `Hd44780::text`.
    pub fn text(&self, row: usize, col: usize, len: usize) -> &[u8] {
        self.controller.text(row, col, len)
    }

    /// Frames decoded so far, oldest first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Frames decoded while the log was full.
    pub fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    /// Drain the frame log so long sessions keep recording.
    pub fn clear_frames(&mut self) {
        self.frames.clear();
        self.dropped_frames = 0;
    }

    /// Number of completed transfers addressed to this backpack.
    pub fn transfers(&self) -> usize {
        self.transfers
    }

    /// Last level driven on the backlight pin.
    pub fn is_backlight_on(&self) -> bool {
        self.pins.backlight() == 1
    }

    /// Last byte written to the expander port.
    pub fn pins(&self) -> u8 {
        self.pins.0
    }

    fn output(&mut self, byte: u8) {
        let previous = self.pins;
        let next = ExpanderBits(byte);
        // the controller samples RS and the data lines on the enable falling edge
        if previous.enable() == 1 && next.enable() == 0 && previous.rw() == 0 {
            self.controller.latch(previous.rs() == 1, previous.data());
        }
        self.pins = next;
    }
}

impl TwiBus for SimulatedBackpack {
    type Error = Infallible;

    fn start(&mut self) -> Result<(), Infallible> {
        self.state = BusState::AwaitingAddress;
        self.payload.clear();
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), Infallible> {
        match self.state {
            BusState::AwaitingAddress => {
                self.state = if byte >> 1 == self.address && byte & READ_DIRECTION == 0 {
                    BusState::Selected
                } else {
                    BusState::NotAddressed
                };
            }
            BusState::Selected => {
                self.output(byte);
                // frames longer than the payload buffer can't be nibble frames anyway
                let _ = self.payload.push(byte);
            }
            BusState::Idle | BusState::NotAddressed => {}
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Infallible> {
        if self.state == BusState::Selected {
            self.transfers += 1;
            if let Some(frame) = Frame::decode(&self.payload) {
                if self.frames.push(frame).is_err() {
                    self.dropped_frames += 1;
                }
            }
        }
        self.state = BusState::Idle;
        Ok(())
    }
}
