//! The demo application: two fixed lines refreshed once a second, forever.

use embedded_hal::delay::DelayNs;

use crate::{bus::TwiBus, CharacterLcd, LcdError};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
/// A string placed at a fixed cursor position.
pub struct BannerLine<'a> {
    pub row: u8,
    pub col: u8,
    pub text: &'a str,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Banner<'a> {
    pub lines: [BannerLine<'a>; 2],
    /// Pause between redraws
    pub refresh_ms: u32,
}

impl Banner<'static> {
    pub const GREETING: Self = Self {
        lines: [
            BannerLine {
                row: 0,
                col: 2,
                text: "Hello World!",
            },
            BannerLine {
                row: 1,
                col: 2,
                text: "LCD Tutorial",
            },
        ],
        refresh_ms: 1000,
    };
}

impl Banner<'_> {
    /// Write every line at its position.
    pub fn draw<BUS, DELAY>(
        &self,
        lcd: &mut CharacterLcd<BUS, DELAY>,
    ) -> Result<(), LcdError<BUS::Error>>
    where
        BUS: TwiBus,
        DELAY: DelayNs,
    {
        for line in &self.lines {
            lcd.set_cursor(line.row, line.col)?.print(line.text)?;
        }
        Ok(())
    }

    /// Draw, then wait out the refresh period. The wait happens even if drawing failed.
    pub fn refresh<BUS, DELAY>(
        &self,
        lcd: &mut CharacterLcd<BUS, DELAY>,
    ) -> Result<(), LcdError<BUS::Error>>
    where
        BUS: TwiBus,
        DELAY: DelayNs,
    {
        let result = self.draw(lcd);
        lcd.delay().delay_ms(self.refresh_ms);
        result
    }
}

/// Initialize the display once and redraw the banner until reset. Bus errors are
/// logged and the next refresh goes ahead regardless.
pub fn run<BUS, DELAY>(mut lcd: CharacterLcd<BUS, DELAY>, banner: &Banner<'_>) -> !
where
    BUS: TwiBus,
    DELAY: DelayNs,
{
    if let Err(e) = lcd.init() {
        warn!("display init failed: {}", e);
    }
    loop {
        if let Err(e) = banner.refresh(&mut lcd) {
            warn!("display refresh failed: {}", e);
        }
    }
}
