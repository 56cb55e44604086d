use core::fmt::{self, Display, Formatter};

use embedded_hal::{i2c, spi};

/// Errors that can occur when driving the display or the touch controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Frame or window does not match the panel geometry
    ConfigurationError,
    /// No partial refresh left, a full update is required
    RefreshExhausted,
    /// Operation not valid in the current controller mode
    ModeError,
    /// The BUSY line never deasserted within the configured timeout
    HardwareTimeout,
    /// The device has already been stopped or closed
    AlreadyStopped,
    /// The device is not started, or has been stopped
    NotRunning,
    /// The device has already been started
    AlreadyRunning,
    /// The controller reported data that violates the register protocol
    ProtocolError,
    /// No new touch arrived before the timeout expired
    NoTouchDetected,
    SpiError(spi::ErrorKind),
    I2CError(i2c::ErrorKind),
    PinError,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigurationError => write!(f, "frame or window does not match the panel"),
            Error::RefreshExhausted => write!(f, "partial refresh budget exhausted"),
            Error::ModeError => write!(f, "operation not valid in current mode"),
            Error::HardwareTimeout => write!(f, "timed out waiting for the busy line"),
            Error::AlreadyStopped => write!(f, "device already stopped"),
            Error::NotRunning => write!(f, "device not running"),
            Error::AlreadyRunning => write!(f, "device already running"),
            Error::ProtocolError => write!(f, "touch register protocol violation"),
            Error::NoTouchDetected => write!(f, "no touch detected"),
            Error::SpiError(kind) => write!(f, "SPI error: {kind}"),
            Error::I2CError(kind) => write!(f, "I2C error: {kind}"),
            Error::PinError => write!(f, "GPIO error"),
        }
    }
}

impl core::error::Error for Error {}

pub(crate) fn spi_error<E: spi::Error>(err: E) -> Error {
    Error::SpiError(err.kind())
}

pub(crate) fn i2c_error<E: i2c::Error>(err: E) -> Error {
    Error::I2CError(err.kind())
}

pub(crate) fn pin_error<E>(_: E) -> Error {
    Error::PinError
}
