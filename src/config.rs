//! Runtime configuration for both peripherals.
//!
//! Chip constants (opcodes, register addresses) are fixed per revision and
//! live with their drivers; only the values an integrator may want to tune
//! are collected here.

use embassy_time::Duration;

use crate::gt1151::{GT1151_ADDRESS, MAX_TOUCH_POINTS};

/// Consecutive partial refreshes allowed between two full refreshes
pub const DEFAULT_REFRESH_BUDGET: u16 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisplayConfig {
    /// Upper bound for every wait on the BUSY line
    pub busy_timeout: Duration,
    /// Partial refreshes allowed after a full refresh
    pub refresh_budget: u16,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            refresh_budget: DEFAULT_REFRESH_BUDGET,
        }
    }
}

impl DisplayConfig {
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_refresh_budget(mut self, budget: u16) -> Self {
        self.refresh_budget = budget;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchConfig {
    /// 7-bit I2C address of the controller
    pub address: u8,
    /// Touch points decoded per report, at most [`MAX_TOUCH_POINTS`]
    pub max_points: u8,
    /// Sleep between two reads of a not-ready coordinate buffer when polling
    pub poll_interval: Duration,
    /// Reads of a not-ready coordinate buffer before `poll()` gives up
    pub poll_attempts: u8,
    /// Length of each of the three reset phases
    pub reset_pulse_ms: u32,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            address: GT1151_ADDRESS,
            max_points: 5,
            poll_interval: Duration::from_millis(10),
            poll_attempts: 10,
            reset_pulse_ms: 100,
        }
    }
}

impl TouchConfig {
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Values above [`MAX_TOUCH_POINTS`] are clamped.
    pub fn with_max_points(mut self, points: u8) -> Self {
        self.max_points = points.clamp(1, MAX_TOUCH_POINTS as u8);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_attempts(mut self, attempts: u8) -> Self {
        self.poll_attempts = attempts.max(1);
        self
    }

    pub fn with_reset_pulse_ms(mut self, ms: u32) -> Self {
        self.reset_pulse_ms = ms;
        self
    }
}
