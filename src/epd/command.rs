// SSD1680 family, as used on the Waveshare 2.13" (V3/V4) and 2.9" (V2) panels
// https://www.waveshare.com/wiki/2.13inch_Touch_e-Paper_HAT

use super::{BorderWaveform, DisplayGeometry};

/// Opcode of every controller command the driver issues.
///
/// One table exists per chip revision; tables are `'static` and never
/// mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandTable {
    pub driver_output_control: u8,
    pub deep_sleep_mode: u8,
    pub data_entry_mode: u8,
    pub sw_reset: u8,
    pub temperature_sensor_control: u8,
    pub master_activation: u8,
    pub display_update_control_1: u8,
    pub display_update_control_2: u8,
    pub write_ram_bw: u8,
    pub border_waveform_control: u8,
    pub set_ram_x_window: u8,
    pub set_ram_y_window: u8,
    pub set_ram_x_counter: u8,
    pub set_ram_y_counter: u8,
}

pub const SSD1680_COMMANDS: CommandTable = CommandTable {
    driver_output_control: 0x01,
    deep_sleep_mode: 0x10,
    data_entry_mode: 0x11,
    sw_reset: 0x12,
    temperature_sensor_control: 0x18,
    master_activation: 0x20,
    display_update_control_1: 0x21,
    display_update_control_2: 0x22,
    write_ram_bw: 0x24,
    border_waveform_control: 0x3C,
    set_ram_x_window: 0x44,
    set_ram_y_window: 0x45,
    set_ram_x_counter: 0x4E,
    set_ram_y_counter: 0x4F,
};

/// Fixed payloads a panel needs on top of its command table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PanelParams {
    /// Gate count minus one (lo, hi) and the scanning mode
    pub driver_output: [u8; 3],
    /// X increment, Y increment, counter advances along X
    pub data_entry_mode: u8,
    pub border: BorderWaveform,
    /// Sets the source-output-mode bit of display-update-control 1
    pub source_output_mode: bool,
    /// Selects the built-in temperature sensor
    pub temperature_sensor: u8,
    /// Display-update-control 2 sequence of a full refresh (LUT from OTP)
    pub full_update_sequence: u8,
    /// Display-update-control 2 sequence of a partial refresh
    pub partial_update_sequence: u8,
    /// Payload of the deep-sleep command
    pub deep_sleep: u8,
}

/// Supported panels.
///
/// Each variant carries its own command table, geometry and payloads; the
/// driver contains no per-panel code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PanelModel {
    /// 2.13" V3, 122x250
    Epd2in13V3,
    /// 2.13" V4, 122x250, shipped with the touch HAT
    Epd2in13V4,
    /// 2.9" V2, 128x296
    Epd2in9V2,
}

const BORDER_FOLLOW_LUT: BorderWaveform = BorderWaveform {
    gs_control: 1,
    gs_setting: 1,
    vbd_level: 0,
    vbd_opt: 0,
};

impl PanelModel {
    pub fn geometry(&self) -> DisplayGeometry {
        match self {
            PanelModel::Epd2in13V3 | PanelModel::Epd2in13V4 => DisplayGeometry::new(122, 250),
            PanelModel::Epd2in9V2 => DisplayGeometry::new(128, 296),
        }
    }

    pub fn commands(&self) -> &'static CommandTable {
        &SSD1680_COMMANDS
    }

    pub fn params(&self) -> PanelParams {
        match self {
            PanelModel::Epd2in13V3 => PanelParams {
                driver_output: [0xF9, 0x00, 0x00],
                data_entry_mode: 0x03,
                border: BORDER_FOLLOW_LUT,
                source_output_mode: true,
                temperature_sensor: 0x80,
                full_update_sequence: 0xC7,
                partial_update_sequence: 0x0F,
                deep_sleep: 0x01,
            },
            PanelModel::Epd2in13V4 => PanelParams {
                driver_output: [0xF9, 0x00, 0x00],
                data_entry_mode: 0x03,
                border: BORDER_FOLLOW_LUT,
                source_output_mode: true,
                temperature_sensor: 0x80,
                full_update_sequence: 0xF7,
                partial_update_sequence: 0xFF,
                deep_sleep: 0x01,
            },
            PanelModel::Epd2in9V2 => PanelParams {
                driver_output: [0x27, 0x01, 0x00],
                data_entry_mode: 0x03,
                border: BORDER_FOLLOW_LUT,
                source_output_mode: true,
                temperature_sensor: 0x80,
                full_update_sequence: 0xC7,
                partial_update_sequence: 0x0F,
                deep_sleep: 0x01,
            },
        }
    }
}
