use bitfield::bitfield;

use super::Mode;

// Pin mapping of the common PCF8574 LCD backpack: the HD44780 runs in 4-bit mode on P4-P7
bitfield! {
    pub struct ExpanderBits(u8);
    impl Debug;
    pub rs, set_rs: 0, 0;
    pub rw, set_rw: 1, 1;
    pub enable, set_enable: 2, 2;
    pub backlight, set_backlight: 3, 3;
    pub data, set_data: 7, 4;
}

impl Clone for ExpanderBits {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl Copy for ExpanderBits {}

/// Expander bytes written per controller byte: three per nibble, high nibble first.
pub const FRAME_LEN: usize = 6;

/// Builds the expander bytes that clock one byte into the controller. Each nibble is
/// presented, latched with an enable pulse, and left in place with enable low.
pub fn nibble_frame(value: u8, mode: Mode, backlight: bool) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    for (chunk, nibble) in frame.chunks_exact_mut(3).zip([value >> 4, value & 0x0F]) {
        let mut bits = ExpanderBits(0);
        bits.set_rs(mode.rs() as u8);
        bits.set_rw(0);
        bits.set_backlight(backlight as u8);
        bits.set_data(nibble);
        let mut pulse = bits;
        pulse.set_enable(1);
        chunk[0] = bits.0;
        chunk[1] = pulse.0;
        chunk[2] = bits.0;
    }
    frame
}

/// Expander byte that only drives the backlight pin, all other lines low.
pub fn backlight_bits(on: bool) -> u8 {
    let mut bits = ExpanderBits(0);
    bits.set_backlight(on as u8);
    bits.0
}
