//! Bistable (e-paper) display controller
//!
//! Command sequencing for the SSD1680 family over SPI, with windowed RAM
//! addressing and a bounded number of consecutive partial refreshes.

use alloc::vec;
use alloc::vec::Vec;
use embedded_hal::spi::{Mode, MODE_0};

use crate::Error;

mod budget;
mod command;
mod driver;

pub use budget::RefreshBudget;
pub use command::{CommandTable, PanelModel, PanelParams, SSD1680_COMMANDS};
pub use driver::{DisplayState, Epd};

/// SPI clock the controller is driven at
pub const SPI_FREQUENCY_HZ: u32 = 10_000_000;

/// CPOL = 0, CPHA = 0
pub const SPI_MODE: Mode = MODE_0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisplayGeometry {
    pub width: u16,
    pub height: u16,
}

impl DisplayGeometry {
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Bytes of one packed row; the last byte is padded when the width is
    /// not a multiple of 8
    pub const fn bytes_per_row(&self) -> usize {
        (self.width as usize).div_ceil(8)
    }

    pub const fn buffer_len(&self) -> usize {
        self.bytes_per_row() * self.height as usize
    }
}

/// Rectangle of display RAM addressed by one write.
///
/// Columns are addressed in units of 8 pixels, rows by a 16-bit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RefreshWindow {
    x_start: u16,
    x_end: u16,
    y_start: u16,
    y_end: u16,
}

impl RefreshWindow {
    /// Validates the window against `geometry`; `x_start` must be a multiple
    /// of 8 and both ends are inclusive.
    pub fn new(
        geometry: DisplayGeometry,
        x_start: u16,
        x_end: u16,
        y_start: u16,
        y_end: u16,
    ) -> Result<Self, Error> {
        if x_start % 8 != 0
            || x_start > x_end
            || y_start > y_end
            || x_end >= geometry.width
            || y_end >= geometry.height
        {
            return Err(Error::ConfigurationError);
        }
        Ok(Self {
            x_start,
            x_end,
            y_start,
            y_end,
        })
    }

    /// The whole panel
    pub fn full(geometry: DisplayGeometry) -> Self {
        Self {
            x_start: 0,
            x_end: geometry.width.saturating_sub(1),
            y_start: 0,
            y_end: geometry.height.saturating_sub(1),
        }
    }

    pub fn x_start(&self) -> u16 {
        self.x_start
    }

    pub fn x_end(&self) -> u16 {
        self.x_end
    }

    pub fn y_start(&self) -> u16 {
        self.y_start
    }

    pub fn y_end(&self) -> u16 {
        self.y_end
    }

    /// True when the window lies inside `geometry`
    pub fn fits(&self, geometry: DisplayGeometry) -> bool {
        self.x_end < geometry.width && self.y_end < geometry.height
    }

    /// Payload of the RAM-X window command
    pub fn ram_x_bytes(&self) -> [u8; 2] {
        [(self.x_start >> 3) as u8, (self.x_end >> 3) as u8]
    }

    /// Payload of the RAM-Y window command
    pub fn ram_y_bytes(&self) -> [u8; 4] {
        let [y_start_lo, y_start_hi] = self.y_start.to_le_bytes();
        let [y_end_lo, y_end_hi] = self.y_end.to_le_bytes();
        [y_start_lo, y_start_hi, y_end_lo, y_end_hi]
    }

    /// Inverse of [`ram_x_bytes`](Self::ram_x_bytes) and
    /// [`ram_y_bytes`](Self::ram_y_bytes); x comes back as the first pixel
    /// of its column byte. Validated like [`new`](Self::new).
    pub fn from_ram_bytes(geometry: DisplayGeometry, x: [u8; 2], y: [u8; 4]) -> Result<Self, Error> {
        Self::new(
            geometry,
            u16::from(x[0]) << 3,
            u16::from(x[1]) << 3,
            u16::from_le_bytes([y[0], y[1]]),
            u16::from_le_bytes([y[2], y[3]]),
        )
    }

    /// Number of bytes a bitmap covering this window has
    pub fn buffer_len(&self) -> usize {
        let columns = usize::from(self.x_end >> 3).saturating_sub(usize::from(self.x_start >> 3)) + 1;
        let rows = usize::from(self.y_end.saturating_sub(self.y_start)) + 1;
        columns * rows
    }
}

/// Panel border waveform control, packed into one register byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BorderWaveform {
    /// GS transition control, 1 bit: follow LUT
    pub gs_control: u8,
    /// GS transition setting, 2 bits: LUT0..LUT3
    pub gs_setting: u8,
    /// Fix level setting for VBD, 2 bits
    pub vbd_level: u8,
    /// Select VBD option, 2 bits
    pub vbd_opt: u8,
}

impl BorderWaveform {
    pub fn bits(&self) -> u8 {
        ((self.gs_control & 0x01) << 2)
            | (self.gs_setting & 0x03)
            | ((self.vbd_level & 0x03) << 4)
            | ((self.vbd_opt & 0x03) << 6)
    }
}

/// Pixel value in controller RAM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Color {
    Black = 0,
    White = 1,
}

/// 1-bit-per-pixel bitmap, row-major, MSB first, rows padded to whole bytes.
///
/// Produced by the rendering layer; the driver only checks its size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u16,
    height: u16,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn filled(geometry: DisplayGeometry, color: Color) -> Self {
        let byte = match color {
            Color::Black => 0x00,
            Color::White => 0xFF,
        };
        Self {
            width: geometry.width,
            height: geometry.height,
            data: vec![byte; geometry.buffer_len()],
        }
    }

    /// Wraps rendered bytes; fails with [`Error::ConfigurationError`] if the
    /// length does not match `width x height` exactly.
    pub fn from_bytes(width: u16, height: u16, data: Vec<u8>) -> Result<Self, Error> {
        if data.len() != DisplayGeometry::new(width, height).buffer_len() {
            return Err(Error::ConfigurationError);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn geometry(&self) -> DisplayGeometry {
        DisplayGeometry::new(self.width, self.height)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn set_pixel(&mut self, x: u16, y: u16, color: Color) {
        if x >= self.width || y >= self.height {
            return;
        }
        let index = usize::from(y) * self.geometry().bytes_per_row() + usize::from(x / 8);
        let mask = 0x80 >> (x % 8);
        match color {
            Color::Black => self.data[index] &= !mask,
            Color::White => self.data[index] |= mask,
        }
    }
}

/// Operations every supported panel provides.
#[allow(async_fn_in_trait)]
pub trait EpaperDisplay {
    fn geometry(&self) -> DisplayGeometry;

    /// Hardware and software reset, leaves the panel ready for a full refresh
    async fn open(&mut self) -> Result<(), Error>;

    /// Full (`full = true`) or partial refresh of the whole panel
    async fn display(&mut self, frame: &FrameBuffer, full: bool) -> Result<(), Error>;

    /// Full refresh to white
    async fn clear(&mut self) -> Result<(), Error>;

    /// Deep sleep, a new [`open`](Self::open) is needed afterwards
    async fn sleep(&mut self) -> Result<(), Error>;

    /// Deep sleep and release of the control lines
    async fn close(&mut self) -> Result<(), Error>;
}
