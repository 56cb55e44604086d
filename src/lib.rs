#![no_std]
//! Touch e-paper panel driver
//!
//! Drives an SSD1680-family e-paper display over SPI and a GT1151 touch
//! controller over I2C, written against the `embedded-hal-async` traits and
//! `embassy` synchronization primitives.

extern crate alloc;

pub mod config;
pub mod epd;
pub mod error;
pub mod gt1151;
pub mod power;
mod register;

#[cfg(test)]
mod sim;

pub use config::{DisplayConfig, TouchConfig};
pub use epd::{EpaperDisplay, Epd, FrameBuffer, PanelModel};
pub use error::Error;
pub use gt1151::{ControllerMode, Gt1151, TouchController, TouchSample};
pub use power::TouchEpaper;
