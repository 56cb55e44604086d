//! GT1151 capacitive touch controller
//!
//! Register protocol (16-bit big-endian register addresses), coordinate
//! decoding and an interrupt-driven poller publishing de-duplicated samples.

// https://github.com/waveshareteam/Touch_e-Paper_HAT
use bitflags::bitflags;
use embassy_time::Duration;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::Error;

mod asynch;

pub use asynch::Gt1151;

/// 7-bit I2C address
pub const GT1151_ADDRESS: u8 = 0x14;

/// Most points the controller reports at once
pub const MAX_TOUCH_POINTS: usize = 10;

/// Bytes of one point record in the coordinate buffer
pub const POINT_RECORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u16)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    Command = 0x8040,
    CommandData = 0x8041,
    CommandChecksum = 0x8042,
    /// Request code followed by two status bytes
    FwRequest = 0x8044,
    /// 4 ASCII bytes
    ProductId = 0x8140,
    /// u16, little endian
    FirmwareVersion = 0x8144,
    GestureId = 0x814C,
    CoordinatesInfo = 0x814E,
    PointData = 0x814F,
}

impl Register {
    pub fn addr(self) -> u16 {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerCommand {
    Sleep = 0x05,
    Gesture = 0x08,
}

/// Code in the first byte of [`Register::FwRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FwRequest {
    Idle = 0x00,
    /// Controller asks for its configuration; nothing is sent
    Config = 0x01,
    /// Controller asks to be reset
    Reset = 0x03,
}

bitflags! {
    /// Contents of [`Register::CoordinatesInfo`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CoordinatesInfo: u8 {
        /// Bit 7: coordinate buffer holds a fresh report
        const BUFFER_READY = 1 << 7;
        /// Bit 6: large area touch
        const LARGE_DETECT = 1 << 6;
        /// Bit 4: key pressed
        const HAVE_KEY = 1 << 4;
        /// Bits 0-3: number of points
        const POINT_COUNT = 0x0F;
    }
}

impl CoordinatesInfo {
    pub fn is_ready(&self) -> bool {
        self.contains(CoordinatesInfo::BUFFER_READY)
    }

    pub fn point_count(&self) -> usize {
        usize::from(self.bits() & CoordinatesInfo::POINT_COUNT.bits())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerMode {
    /// Not started yet
    Uninitialized,
    /// Interrupts deliver coordinates
    Normal,
    /// Interrupts ignored, controller asleep
    Sleep,
    /// Interrupts deliver gesture codes
    Gesture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchPoint {
    /// Status byte of the record (track id)
    pub track_id: u8,
    pub x: u16,
    pub y: u16,
    pub size: u16,
}

/// Decodes one `(status, x_lo, x_hi, y_lo, y_hi, s_lo, s_hi, reserved)` record
pub fn decode_point(record: &[u8; POINT_RECORD_LEN]) -> TouchPoint {
    TouchPoint {
        track_id: record[0],
        x: u16::from_le_bytes([record[1], record[2]]),
        y: u16::from_le_bytes([record[3], record[4]]),
        size: u16::from_le_bytes([record[5], record[6]]),
    }
}

/// Makes `command + data + checksum` wrap to zero
pub fn command_checksum(command: u8, data: u8) -> u8 {
    0u8.wrapping_sub(command).wrapping_sub(data)
}

/// One coordinate report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchSample {
    points: [TouchPoint; MAX_TOUCH_POINTS],
    count: u8,
}

impl TouchSample {
    pub(crate) fn new() -> Self {
        Self {
            points: [TouchPoint::default(); MAX_TOUCH_POINTS],
            count: 0,
        }
    }

    /// Decodes `count` consecutive records from the coordinate buffer
    pub fn from_records(data: &[u8], count: usize) -> Result<Self, Error> {
        if count > MAX_TOUCH_POINTS || data.len() < count * POINT_RECORD_LEN {
            return Err(Error::ProtocolError);
        }
        let mut sample = Self::new();
        for record in data.chunks_exact(POINT_RECORD_LEN).take(count) {
            let mut raw = [0u8; POINT_RECORD_LEN];
            raw.copy_from_slice(record);
            sample.push(decode_point(&raw));
        }
        Ok(sample)
    }

    fn push(&mut self, point: TouchPoint) {
        if usize::from(self.count) < MAX_TOUCH_POINTS {
            self.points[usize::from(self.count)] = point;
            self.count += 1;
        }
    }

    pub fn points(&self) -> &[TouchPoint] {
        &self.points[..usize::from(self.count)]
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// First point, the one most callers care about
    pub fn primary(&self) -> Option<TouchPoint> {
        self.points().first().copied()
    }

    /// True when every point sits where it was in `other`; sizes and
    /// track ids are ignored
    pub fn same_position(&self, other: &TouchSample) -> bool {
        self.count == other.count
            && self
                .points()
                .iter()
                .zip(other.points())
                .all(|(a, b)| a.x == b.x && a.y == b.y)
    }
}

/// Operations every touch controller driver provides.
///
/// Methods take `&self` so a poller future can run on the same instance.
#[allow(async_fn_in_trait)]
pub trait TouchController {
    fn mode(&self) -> ControllerMode;

    /// Identifies the chip and enters [`ControllerMode::Normal`]
    async fn start(&self) -> Result<(), Error>;

    /// Stops the poller and holds the chip in reset
    async fn stop(&self) -> Result<(), Error>;

    async fn set_mode(&self, mode: ControllerMode) -> Result<(), Error>;

    /// Next sample whose position differs from the last one published,
    /// or the published one nobody has taken yet
    async fn input(&self, timeout: Duration) -> Result<TouchSample, Error>;
}
