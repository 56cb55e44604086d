use embassy_time::with_timeout;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::spi::SpiDevice;
use log::{debug, info, warn};

use super::{
    Color, CommandTable, DisplayGeometry, EpaperDisplay, FrameBuffer, PanelModel, PanelParams,
    RefreshBudget, RefreshWindow,
};
use crate::config::DisplayConfig;
use crate::error::{pin_error, spi_error};
use crate::Error;

/// Lifecycle of the display handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayState {
    /// Constructed, never opened, or the last open failed
    Idle,
    /// Reset done, no waveform loaded yet
    Open,
    /// At least one refresh done
    Ready,
    /// Deep sleep, only `open` or `close` are accepted
    Sleeping,
    /// Released, nothing is accepted
    Closed,
}

/// SSD1680 family driver.
///
/// Owns the SPI device and the reset, data/command and busy lines.
pub struct Epd<SPI, DC, RST, BUSY, DELAY> {
    spi: SPI,
    dc: DC,
    rst: RST,
    busy: BUSY,
    delay: DELAY,
    model: PanelModel,
    config: DisplayConfig,
    state: DisplayState,
    budget: RefreshBudget,
}

impl<SPI, DC, RST, BUSY, DELAY> Epd<SPI, DC, RST, BUSY, DELAY>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: Wait,
    DELAY: DelayNs,
{
    /// `spi` must be set up for [`SPI_MODE`](super::SPI_MODE) at no more
    /// than [`SPI_FREQUENCY_HZ`](super::SPI_FREQUENCY_HZ).
    pub fn new(
        spi: SPI,
        dc: DC,
        rst: RST,
        busy: BUSY,
        delay: DELAY,
        model: PanelModel,
        config: DisplayConfig,
    ) -> Self {
        Self {
            spi,
            dc,
            rst,
            busy,
            delay,
            model,
            config,
            state: DisplayState::Idle,
            budget: RefreshBudget::exhausted(config.refresh_budget),
        }
    }

    pub fn model(&self) -> PanelModel {
        self.model
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn budget(&self) -> RefreshBudget {
        self.budget
    }

    /// Gives the bus and lines back, whatever the state
    pub fn into_inner(self) -> (SPI, DC, RST, BUSY, DELAY) {
        (self.spi, self.dc, self.rst, self.busy, self.delay)
    }

    fn commands(&self) -> &'static CommandTable {
        self.model.commands()
    }

    fn params(&self) -> PanelParams {
        self.model.params()
    }

    fn ensure_awake(&self) -> Result<(), Error> {
        match self.state {
            DisplayState::Open | DisplayState::Ready => Ok(()),
            DisplayState::Sleeping => Err(Error::ModeError),
            DisplayState::Idle | DisplayState::Closed => Err(Error::NotRunning),
        }
    }

    async fn send_command(&mut self, command: u8) -> Result<(), Error> {
        self.dc.set_low().map_err(pin_error)?;
        self.spi.write(&[command]).await.map_err(spi_error)
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.dc.set_high().map_err(pin_error)?;
        self.spi.write(data).await.map_err(spi_error)
    }

    async fn command(&mut self, command: u8, data: &[u8]) -> Result<(), Error> {
        self.send_command(command).await?;
        if !data.is_empty() {
            self.send_data(data).await?;
        }
        Ok(())
    }

    /// Waits for BUSY to go low, at most `busy_timeout`
    async fn wait_until_idle(&mut self) -> Result<(), Error> {
        match with_timeout(self.config.busy_timeout, self.busy.wait_for_low()).await {
            Ok(result) => result.map_err(pin_error),
            Err(_) => {
                warn!(
                    "e-paper busy line still high after {} ms",
                    self.config.busy_timeout.as_millis()
                );
                Err(Error::HardwareTimeout)
            }
        }
    }

    async fn hardware_reset(&mut self) -> Result<(), Error> {
        self.rst.set_high().map_err(pin_error)?;
        self.delay.delay_ms(20).await;
        self.rst.set_low().map_err(pin_error)?;
        self.delay.delay_ms(2).await;
        self.rst.set_high().map_err(pin_error)?;
        self.delay.delay_ms(20).await;
        Ok(())
    }

    async fn power_on(&mut self) -> Result<(), Error> {
        self.hardware_reset().await?;
        self.send_command(self.commands().sw_reset).await?;
        self.delay.delay_ms(10).await;
        self.wait_until_idle().await
    }

    /// Steps shared by full and partial refreshes: gate setup, data entry,
    /// RAM window, border and source output
    async fn init_sequence(&mut self, window: &RefreshWindow) -> Result<(), Error> {
        let cmd = self.commands();
        let params = self.params();

        self.command(cmd.driver_output_control, &params.driver_output)
            .await?;
        self.command(cmd.data_entry_mode, &[params.data_entry_mode])
            .await?;
        self.command(cmd.set_ram_x_window, &window.ram_x_bytes())
            .await?;
        self.command(cmd.set_ram_y_window, &window.ram_y_bytes())
            .await?;
        self.command(cmd.border_waveform_control, &[params.border.bits()])
            .await?;
        let source_output = if params.source_output_mode { 0x80 } else { 0x00 };
        self.command(cmd.display_update_control_1, &[0x00, source_output])
            .await
    }

    /// Loads the waveform for the current temperature from OTP.
    pub async fn load_waveform_lut(&mut self) -> Result<(), Error> {
        self.ensure_awake()?;
        let cmd = self.commands().temperature_sensor_control;
        let sensor = self.params().temperature_sensor;
        self.command(cmd, &[sensor]).await?;
        self.wait_until_idle().await
    }

    /// Streams `bitmap` into RAM starting at the window origin.
    pub async fn write_frame(&mut self, window: &RefreshWindow, bitmap: &[u8]) -> Result<(), Error> {
        self.ensure_awake()?;
        if !window.fits(self.geometry()) || bitmap.len() != window.buffer_len() {
            return Err(Error::ConfigurationError);
        }
        let cmd = self.commands();
        let [y_lo, y_hi] = window.y_start().to_le_bytes();

        self.command(cmd.set_ram_x_counter, &[(window.x_start() >> 3) as u8])
            .await?;
        self.command(cmd.set_ram_y_counter, &[y_lo, y_hi]).await?;
        self.command(cmd.write_ram_bw, bitmap).await
    }

    async fn activate(&mut self, full: bool) -> Result<(), Error> {
        let cmd = self.commands();
        let params = self.params();
        let sequence = if full {
            params.full_update_sequence
        } else {
            params.partial_update_sequence
        };

        self.command(cmd.display_update_control_2, &[sequence])
            .await?;
        self.send_command(cmd.master_activation).await?;
        self.wait_until_idle().await
    }

    async fn full_update(&mut self, frame: &FrameBuffer) -> Result<(), Error> {
        let window = RefreshWindow::full(self.geometry());
        self.init_sequence(&window).await?;
        self.load_waveform_lut().await?;
        self.write_frame(&window, frame.as_bytes()).await?;
        self.activate(true).await?;

        self.budget.reset();
        self.state = DisplayState::Ready;
        debug!("full refresh, budget {}", self.budget.remaining());
        Ok(())
    }

    async fn partial_update(&mut self, frame: &FrameBuffer) -> Result<(), Error> {
        self.budget.check()?;

        let window = RefreshWindow::full(self.geometry());
        self.init_sequence(&window).await?;
        self.write_frame(&window, frame.as_bytes()).await?;
        self.activate(false).await?;

        self.budget.spend()?;
        self.state = DisplayState::Ready;
        debug!("partial refresh, budget {}", self.budget.remaining());
        Ok(())
    }
}

impl<SPI, DC, RST, BUSY, DELAY> EpaperDisplay for Epd<SPI, DC, RST, BUSY, DELAY>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: Wait,
    DELAY: DelayNs,
{
    fn geometry(&self) -> DisplayGeometry {
        self.model.geometry()
    }

    async fn open(&mut self) -> Result<(), Error> {
        if self.state == DisplayState::Closed {
            return Err(Error::NotRunning);
        }

        self.budget.drain();
        match self.power_on().await {
            Ok(()) => {
                self.state = DisplayState::Open;
                info!("e-paper {:?} open", self.model);
                Ok(())
            }
            Err(e) => {
                self.state = DisplayState::Idle;
                Err(e)
            }
        }
    }

    async fn display(&mut self, frame: &FrameBuffer, full: bool) -> Result<(), Error> {
        if frame.geometry() != self.geometry() {
            return Err(Error::ConfigurationError);
        }
        self.ensure_awake()?;

        if full {
            self.full_update(frame).await
        } else {
            self.partial_update(frame).await
        }
    }

    async fn clear(&mut self) -> Result<(), Error> {
        let frame = FrameBuffer::filled(self.geometry(), Color::White);
        self.display(&frame, true).await
    }

    async fn sleep(&mut self) -> Result<(), Error> {
        self.ensure_awake()?;
        let cmd = self.commands().deep_sleep_mode;
        let mode = self.params().deep_sleep;
        self.command(cmd, &[mode]).await?;
        self.state = DisplayState::Sleeping;
        info!("e-paper deep sleep");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        match self.state {
            DisplayState::Closed => return Err(Error::AlreadyStopped),
            DisplayState::Open | DisplayState::Ready => {
                let cmd = self.commands().deep_sleep_mode;
                let mode = self.params().deep_sleep;
                self.command(cmd, &[mode]).await?;
            }
            DisplayState::Idle | DisplayState::Sleeping => {}
        }

        self.state = DisplayState::Closed;
        self.rst.set_low().map_err(pin_error)?;
        self.dc.set_low().map_err(pin_error)?;
        info!("e-paper closed");
        Ok(())
    }
}
