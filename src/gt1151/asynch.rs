use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Timer};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::i2c::I2c;
use log::{debug, info, warn};

use super::{
    command_checksum, ControllerCommand, ControllerMode, CoordinatesInfo, FwRequest, Register,
    TouchController, TouchSample, MAX_TOUCH_POINTS, POINT_RECORD_LEN,
};
use crate::config::TouchConfig;
use crate::error::pin_error;
use crate::register::RegisterDevice;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

struct SharedState {
    mode: ControllerMode,
    lifecycle: Lifecycle,
    poller_active: bool,
    last: Option<TouchSample>,
    previous: Option<TouchSample>,
}

/// Everything that talks to the chip, behind one lock
struct TouchBus<I2C, RST, DELAY> {
    dev: RegisterDevice<I2C>,
    rst: RST,
    delay: DELAY,
}

impl<I2C, RST, DELAY> TouchBus<I2C, RST, DELAY>
where
    I2C: I2c,
    RST: OutputPin,
    DELAY: DelayNs,
{
    async fn reset_pulse(&mut self, phase_ms: u32) -> Result<(), Error> {
        self.rst.set_high().map_err(pin_error)?;
        self.delay.delay_ms(phase_ms).await;
        self.rst.set_low().map_err(pin_error)?;
        self.delay.delay_ms(phase_ms).await;
        self.rst.set_high().map_err(pin_error)?;
        self.delay.delay_ms(phase_ms).await;
        Ok(())
    }

    /// Data and checksum go first, writing the command register triggers
    /// execution
    async fn send_command(&mut self, command: ControllerCommand, data: u8) -> Result<(), Error> {
        let command = u8::from(command);
        let checksum = command_checksum(command, data);
        self.dev
            .write_register(Register::CommandData.addr(), &[data])
            .await?;
        self.dev
            .write_register(Register::CommandChecksum.addr(), &[checksum])
            .await?;
        self.dev
            .write_register(Register::Command.addr(), &[command])
            .await
    }
}

/// GT1151 driver.
///
/// All methods take `&self`: one task drives [`run`](Self::run) while the
/// application calls [`input`](Self::input) and friends on the same
/// instance. Bus access from both sides is serialized by an async mutex.
pub struct Gt1151<M: RawMutex, I2C, INT, RST, DELAY> {
    bus: Mutex<M, TouchBus<I2C, RST, DELAY>>,
    irq: Mutex<M, INT>,
    config: TouchConfig,
    state: BlockingMutex<M, RefCell<SharedState>>,
    touch_ready: Signal<M, TouchSample>,
    gesture_ready: Signal<M, u8>,
    stop_request: Signal<M, ()>,
    poller_exited: Signal<M, ()>,
}

/// Marks the poller as gone when `run()` returns or its future is dropped
struct PollerGuard<'a, M: RawMutex, I2C, INT, RST, DELAY>(&'a Gt1151<M, I2C, INT, RST, DELAY>);

impl<M: RawMutex, I2C, INT, RST, DELAY> Drop for PollerGuard<'_, M, I2C, INT, RST, DELAY> {
    fn drop(&mut self) {
        self.0.with_state(|s| s.poller_active = false);
        self.0.poller_exited.signal(());
        info!("GT1151 poller exited");
    }
}

impl<M: RawMutex, I2C, INT, RST, DELAY> Gt1151<M, I2C, INT, RST, DELAY> {
    fn with_state<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        self.state.lock(|state| f(&mut *state.borrow_mut()))
    }

    pub fn mode(&self) -> ControllerMode {
        self.with_state(|s| s.mode)
    }

    pub fn is_running(&self) -> bool {
        self.with_state(|s| s.lifecycle == Lifecycle::Running)
    }

    /// Last published sample
    pub fn last_sample(&self) -> Option<TouchSample> {
        self.with_state(|s| s.last)
    }

    /// Sample published before [`last_sample`](Self::last_sample)
    pub fn previous_sample(&self) -> Option<TouchSample> {
        self.with_state(|s| s.previous)
    }
}

impl<M, I2C, INT, RST, DELAY> Gt1151<M, I2C, INT, RST, DELAY>
where
    M: RawMutex,
    I2C: I2c,
    INT: Wait,
    RST: OutputPin,
    DELAY: DelayNs,
{
    pub fn new(i2c: I2C, int: INT, rst: RST, delay: DELAY, config: TouchConfig) -> Self {
        Self {
            bus: Mutex::new(TouchBus {
                dev: RegisterDevice::new(i2c, config.address),
                rst,
                delay,
            }),
            irq: Mutex::new(int),
            config,
            state: BlockingMutex::new(RefCell::new(SharedState {
                mode: ControllerMode::Uninitialized,
                lifecycle: Lifecycle::Created,
                poller_active: false,
                last: None,
                previous: None,
            })),
            touch_ready: Signal::new(),
            gesture_ready: Signal::new(),
            stop_request: Signal::new(),
            poller_exited: Signal::new(),
        }
    }

    /// Gives the bus and lines back
    pub fn release(self) -> (I2C, INT, RST, DELAY) {
        let bus = self.bus.into_inner();
        (bus.dev.release(), self.irq.into_inner(), bus.rst, bus.delay)
    }

    fn ensure_mode(&self, mode: ControllerMode) -> Result<(), Error> {
        self.with_state(|s| {
            if s.lifecycle != Lifecycle::Running {
                Err(Error::NotRunning)
            } else if s.mode != mode {
                Err(Error::ModeError)
            } else {
                Ok(())
            }
        })
    }

    pub async fn start(&self) -> Result<(), Error> {
        match self.with_state(|s| s.lifecycle) {
            Lifecycle::Running => return Err(Error::AlreadyRunning),
            Lifecycle::Stopped => return Err(Error::NotRunning),
            Lifecycle::Created => {}
        }

        let mut bus = self.bus.lock().await;
        let mut product_id = [0u8; 4];
        bus.dev
            .read_register_buffer(Register::ProductId.addr(), &mut product_id)
            .await?;
        let mut version = [0u8; 2];
        bus.dev
            .read_register_buffer(Register::FirmwareVersion.addr(), &mut version)
            .await?;
        info!(
            "GT1151 product id {}, firmware {:#06x}",
            core::str::from_utf8(&product_id).unwrap_or("????"),
            u16::from_le_bytes(version)
        );

        self.enter_mode(&mut bus, ControllerMode::Normal).await?;
        drop(bus);

        self.with_state(|s| s.lifecycle = Lifecycle::Running);
        Ok(())
    }

    /// Switches the controller mode.
    ///
    /// `Normal` and `Gesture` are entered through a reset pulse, `Sleep` is
    /// a plain command.
    pub async fn set_mode(&self, mode: ControllerMode) -> Result<(), Error> {
        self.with_state(|s| match s.lifecycle {
            Lifecycle::Running => Ok(()),
            _ => Err(Error::NotRunning),
        })?;
        let mut bus = self.bus.lock().await;
        self.enter_mode(&mut bus, mode).await
    }

    async fn enter_mode(
        &self,
        bus: &mut TouchBus<I2C, RST, DELAY>,
        mode: ControllerMode,
    ) -> Result<(), Error> {
        match mode {
            ControllerMode::Uninitialized => return Err(Error::ModeError),
            ControllerMode::Normal => bus.reset_pulse(self.config.reset_pulse_ms).await?,
            ControllerMode::Gesture => {
                bus.reset_pulse(self.config.reset_pulse_ms).await?;
                bus.send_command(ControllerCommand::Gesture, 0).await?;
            }
            ControllerMode::Sleep => bus.send_command(ControllerCommand::Sleep, 0).await?,
        }

        self.touch_ready.reset();
        self.gesture_ready.reset();
        self.with_state(|s| s.mode = mode);
        debug!("GT1151 mode {:?}", mode);
        Ok(())
    }

    /// Stops the poller, waits for it to exit and holds the chip in reset.
    pub async fn stop(&self) -> Result<(), Error> {
        let poller_active = self.with_state(|s| match s.lifecycle {
            Lifecycle::Stopped => Err(Error::AlreadyStopped),
            Lifecycle::Created => Err(Error::NotRunning),
            Lifecycle::Running => {
                s.lifecycle = Lifecycle::Stopped;
                Ok(s.poller_active)
            }
        })?;

        if poller_active {
            self.stop_request.signal(());
            self.poller_exited.wait().await;
        }

        let mut bus = self.bus.lock().await;
        bus.rst.set_low().map_err(pin_error)?;
        self.with_state(|s| s.mode = ControllerMode::Uninitialized);
        info!("GT1151 stopped");
        Ok(())
    }

    /// Interrupt poller.
    ///
    /// Runs until [`stop`](Self::stop) is called; there is at most one per
    /// instance. Handler failures are logged and the loop carries on, only a
    /// failing interrupt line ends it early.
    pub async fn run(&self) -> Result<(), Error> {
        self.with_state(|s| {
            if s.lifecycle != Lifecycle::Running {
                Err(Error::NotRunning)
            } else if s.poller_active {
                Err(Error::AlreadyRunning)
            } else {
                s.poller_active = true;
                self.stop_request.reset();
                self.poller_exited.reset();
                Ok(())
            }
        })?;
        let _exit = PollerGuard(self);
        info!("GT1151 poller started");

        let mut irq = self.irq.lock().await;
        loop {
            match select(self.stop_request.wait(), irq.wait_for_any_edge()).await {
                Either::First(()) => return Ok(()),
                Either::Second(Err(e)) => return Err(pin_error(e)),
                Either::Second(Ok(())) => self.on_interrupt().await,
            }
        }
    }

    async fn on_interrupt(&self) {
        // mode changes happen with the bus held, read it only once we own it
        let mut bus = self.bus.lock().await;
        let mode = self.mode();
        let handled = match mode {
            ControllerMode::Normal => self.scan(&mut bus, true).await.map(|sample| {
                if let Some(sample) = sample {
                    if self.record(sample) {
                        self.touch_ready.signal(sample);
                    }
                }
            }),
            ControllerMode::Gesture => self.read_gesture(&mut bus).await,
            ControllerMode::Sleep | ControllerMode::Uninitialized => Ok(()),
        };
        if let Err(e) = handled {
            warn!("GT1151 interrupt in {:?} mode failed: {:?}", mode, e);
        }
    }

    /// Reads the coordinate buffer once.
    ///
    /// A buffer that is not ready means the chip raised the interrupt for
    /// something else; with `triggered` set that is a firmware request.
    async fn scan(
        &self,
        bus: &mut TouchBus<I2C, RST, DELAY>,
        triggered: bool,
    ) -> Result<Option<TouchSample>, Error> {
        let info = CoordinatesInfo::from_bits_retain(
            bus.dev
                .read_register(Register::CoordinatesInfo.addr())
                .await?,
        );
        if !info.is_ready() {
            if triggered {
                self.service_fw_request(bus).await?;
            }
            return Ok(None);
        }

        let decoded = self.read_points(bus, info.point_count()).await;
        // the chip stops updating the buffer until this is cleared
        bus.dev
            .write_register(Register::CoordinatesInfo.addr(), &[0])
            .await?;
        decoded.map(Some)
    }

    async fn read_points(
        &self,
        bus: &mut TouchBus<I2C, RST, DELAY>,
        count: usize,
    ) -> Result<TouchSample, Error> {
        if count > MAX_TOUCH_POINTS {
            warn!("GT1151 reported {} points", count);
            return Err(Error::ProtocolError);
        }
        let count = count.min(usize::from(self.config.max_points));
        let len = count * POINT_RECORD_LEN;

        let mut data = [0u8; MAX_TOUCH_POINTS * POINT_RECORD_LEN];
        if len > 0 {
            bus.dev
                .read_register_buffer(Register::PointData.addr(), &mut data[..len])
                .await?;
        }
        TouchSample::from_records(&data[..len], count)
    }

    async fn service_fw_request(&self, bus: &mut TouchBus<I2C, RST, DELAY>) -> Result<(), Error> {
        let mut request = [0u8; 3];
        bus.dev
            .read_register_buffer(Register::FwRequest.addr(), &mut request)
            .await?;

        let handled = match FwRequest::try_from(request[0]) {
            Ok(FwRequest::Reset) => {
                info!("GT1151 requested a reset");
                self.enter_mode(bus, ControllerMode::Normal).await
            }
            Ok(FwRequest::Config) => {
                debug!("GT1151 config request ignored");
                Ok(())
            }
            Ok(FwRequest::Idle) => Ok(()),
            Err(_) => {
                debug!("GT1151 unknown firmware request {:#04x}", request[0]);
                Ok(())
            }
        };

        bus.dev
            .write_register(Register::FwRequest.addr(), &[0])
            .await?;
        handled
    }

    async fn read_gesture(&self, bus: &mut TouchBus<I2C, RST, DELAY>) -> Result<(), Error> {
        let gesture = bus.dev.read_register(Register::GestureId.addr()).await?;
        if gesture != 0 {
            bus.dev
                .write_register(Register::GestureId.addr(), &[0])
                .await?;
            self.gesture_ready.signal(gesture);
        }
        Ok(())
    }

    /// Stores `sample` as the last one if any point moved
    fn record(&self, sample: TouchSample) -> bool {
        if sample.is_empty() {
            return false;
        }
        self.with_state(|s| {
            if s.last.is_some_and(|last| last.same_position(&sample)) {
                return false;
            }
            s.previous = s.last.replace(sample);
            true
        })
    }

    /// Reads the coordinate buffer from the foreground, without waiting for
    /// an interrupt.
    ///
    /// A buffer that is not ready is retried every `poll_interval`, at most
    /// `poll_attempts` times. The sample is returned here only, it does not
    /// wake [`input`](Self::input).
    pub async fn poll(&self) -> Result<TouchSample, Error> {
        self.ensure_mode(ControllerMode::Normal)?;

        for attempt in 0..self.config.poll_attempts {
            if attempt > 0 {
                Timer::after(self.config.poll_interval).await;
            }
            let scanned = {
                let mut bus = self.bus.lock().await;
                self.scan(&mut bus, false).await?
            };
            if let Some(sample) = scanned {
                self.record(sample);
                return Ok(sample);
            }
        }
        Err(Error::NoTouchDetected)
    }

    /// Waits for the next sample whose position differs from the last one.
    ///
    /// A sample the poller published while nobody was waiting is kept and
    /// returned right away, once. Mode changes drop it. Only valid in
    /// [`ControllerMode::Normal`].
    pub async fn input(&self, timeout: Duration) -> Result<TouchSample, Error> {
        self.ensure_mode(ControllerMode::Normal)?;
        with_timeout(timeout, self.touch_ready.wait())
            .await
            .map_err(|_| Error::NoTouchDetected)
    }

    /// Waits for the next gesture code; only valid in
    /// [`ControllerMode::Gesture`].
    pub async fn gesture(&self, timeout: Duration) -> Result<u8, Error> {
        self.ensure_mode(ControllerMode::Gesture)?;
        with_timeout(timeout, self.gesture_ready.wait())
            .await
            .map_err(|_| Error::NoTouchDetected)
    }
}

impl<M, I2C, INT, RST, DELAY> TouchController for Gt1151<M, I2C, INT, RST, DELAY>
where
    M: RawMutex,
    I2C: I2c,
    INT: Wait,
    RST: OutputPin,
    DELAY: DelayNs,
{
    fn mode(&self) -> ControllerMode {
        Gt1151::mode(self)
    }

    async fn start(&self) -> Result<(), Error> {
        Gt1151::start(self).await
    }

    async fn stop(&self) -> Result<(), Error> {
        Gt1151::stop(self).await
    }

    async fn set_mode(&self, mode: ControllerMode) -> Result<(), Error> {
        Gt1151::set_mode(self, mode).await
    }

    async fn input(&self, timeout: Duration) -> Result<TouchSample, Error> {
        Gt1151::input(self, timeout).await
    }
}
