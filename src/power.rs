//! Power sequencing across the display and the touch controller.

use log::{info, warn};

use crate::epd::EpaperDisplay;
use crate::gt1151::{ControllerMode, TouchController};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    Idle,
    Open,
    Sleeping,
    Closed,
}

/// Display and touch controller of one touch e-paper panel.
///
/// The display is owned; the touch controller is borrowed so the task
/// running its poller can hold the same reference.
pub struct TouchEpaper<'t, D, T> {
    display: D,
    touch: &'t T,
    state: PowerState,
}

impl<'t, D, T> TouchEpaper<'t, D, T>
where
    D: EpaperDisplay,
    T: TouchController,
{
    pub fn new(display: D, touch: &'t T) -> Self {
        Self {
            display,
            touch,
            state: PowerState::Idle,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn display(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn touch(&self) -> &'t T {
        self.touch
    }

    pub fn into_display(self) -> D {
        self.display
    }

    /// Resets the display, then starts the touch controller
    pub async fn open(&mut self) -> Result<(), Error> {
        match self.state {
            PowerState::Idle => {}
            PowerState::Open | PowerState::Sleeping => return Err(Error::AlreadyRunning),
            PowerState::Closed => return Err(Error::NotRunning),
        }
        self.display.open().await?;
        self.touch.start().await?;
        self.state = PowerState::Open;
        info!("touch e-paper open");
        Ok(())
    }

    /// Touch controller to sleep first so no interrupt arrives while the
    /// display goes down. If the display refuses, the touch controller is
    /// put back into normal mode and the panel stays open.
    pub async fn sleep(&mut self) -> Result<(), Error> {
        match self.state {
            PowerState::Open => {}
            PowerState::Sleeping => return Err(Error::ModeError),
            PowerState::Idle | PowerState::Closed => return Err(Error::NotRunning),
        }
        self.touch.set_mode(ControllerMode::Sleep).await?;
        if let Err(e) = self.display.sleep().await {
            if let Err(restore) = self.touch.set_mode(ControllerMode::Normal).await {
                warn!("touch controller left asleep: {:?}", restore);
            }
            return Err(e);
        }
        self.state = PowerState::Sleeping;
        Ok(())
    }

    /// Reopens the display and resets the touch controller into normal mode.
    ///
    /// The display comes back with an empty refresh budget, the next
    /// refresh has to be a full one.
    pub async fn wake(&mut self) -> Result<(), Error> {
        match self.state {
            PowerState::Sleeping => {}
            PowerState::Open => return Err(Error::ModeError),
            PowerState::Idle | PowerState::Closed => return Err(Error::NotRunning),
        }
        self.display.open().await?;
        self.touch.set_mode(ControllerMode::Normal).await?;
        self.state = PowerState::Open;
        Ok(())
    }

    /// Stops the touch controller, waiting for its poller to exit, then
    /// closes the display. Both are attempted even if the first fails.
    pub async fn close(&mut self) -> Result<(), Error> {
        let touch_stopped = match self.state {
            PowerState::Closed => return Err(Error::AlreadyStopped),
            PowerState::Idle => Ok(()),
            PowerState::Open | PowerState::Sleeping => self.touch.stop().await,
        };
        let display_closed = self.display.close().await;
        self.state = PowerState::Closed;
        info!("touch e-paper closed");
        touch_stopped.and(display_closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DisplayConfig, TouchConfig};
    use crate::epd::{Color, DisplayState, Epd, FrameBuffer, PanelModel};
    use crate::gt1151::{Gt1151, GT1151_ADDRESS};
    use crate::sim::{BusEvent, EventLog, SimBusy, SimDelay, SimI2c, SimIrq, SimPin, SimSpi};
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_time::Duration;

    type TestEpd = Epd<SimSpi, SimPin, SimPin, SimBusy, SimDelay>;
    type TestTouch = Gt1151<NoopRawMutex, SimI2c, SimIrq, SimPin, SimDelay>;

    struct Rig {
        log: EventLog,
        busy: SimBusy,
        epd: TestEpd,
        touch: TestTouch,
    }

    fn rig() -> Rig {
        let log = EventLog::default();
        let dc = SimPin::new("dc", &log);
        let spi = SimSpi::new(&log, &dc);
        let busy = SimBusy::default();
        let epd = Epd::new(
            spi,
            dc,
            SimPin::new("rst", &log),
            busy.clone(),
            SimDelay::new(&log),
            PanelModel::Epd2in13V4,
            DisplayConfig::default().with_busy_timeout(Duration::from_millis(20)),
        );
        let touch = Gt1151::new(
            SimI2c::new(GT1151_ADDRESS, &log),
            SimIrq::default(),
            SimPin::new("trst", &log),
            SimDelay::new(&log),
            TouchConfig::default(),
        );
        Rig {
            log,
            busy,
            epd,
            touch,
        }
    }

    #[test]
    fn test_open_and_close_order() {
        let Rig {
            log, epd, touch, ..
        } = rig();
        let mut panel = TouchEpaper::new(epd, &touch);

        block_on(panel.open()).unwrap();
        assert_eq!(panel.display().state(), DisplayState::Open);
        assert_eq!(touch.mode(), ControllerMode::Normal);
        assert_eq!(block_on(panel.open()), Err(Error::AlreadyRunning));
        log.take();

        block_on(panel.close()).unwrap();
        let events = log.take();
        let touch_reset = events
            .iter()
            .position(|e| *e == BusEvent::Pin("trst", false));
        let deep_sleep = events.iter().position(|e| *e == BusEvent::Command(0x10));
        assert!(touch_reset.is_some() && deep_sleep.is_some());
        assert!(touch_reset < deep_sleep);

        assert_eq!(panel.state(), PowerState::Closed);
        assert_eq!(block_on(panel.close()), Err(Error::AlreadyStopped));
        assert_eq!(block_on(panel.open()), Err(Error::NotRunning));
    }

    #[test]
    fn test_sleep_and_wake() {
        let Rig { epd, touch, .. } = rig();
        let mut panel = TouchEpaper::new(epd, &touch);
        let geometry = PanelModel::Epd2in13V4.geometry();
        block_on(panel.open()).unwrap();
        block_on(
            panel
                .display()
                .display(&FrameBuffer::filled(geometry, Color::Black), true),
        )
        .unwrap();

        block_on(panel.sleep()).unwrap();
        assert_eq!(touch.mode(), ControllerMode::Sleep);
        assert_eq!(panel.display().state(), DisplayState::Sleeping);
        assert_eq!(
            block_on(touch.input(Duration::from_millis(10))),
            Err(Error::ModeError)
        );
        assert_eq!(block_on(panel.sleep()), Err(Error::ModeError));

        block_on(panel.wake()).unwrap();
        assert_eq!(touch.mode(), ControllerMode::Normal);
        let frame = FrameBuffer::filled(geometry, Color::White);
        assert_eq!(
            block_on(panel.display().display(&frame, false)),
            Err(Error::RefreshExhausted)
        );
        block_on(panel.display().display(&frame, true)).unwrap();
    }

    #[test]
    fn test_display_sleep_failure_wakes_touch() {
        let Rig { epd, touch, .. } = rig();
        let mut panel = TouchEpaper::new(epd, &touch);
        block_on(panel.open()).unwrap();
        block_on(panel.display().sleep()).unwrap();

        assert_eq!(block_on(panel.sleep()), Err(Error::ModeError));
        assert_eq!(panel.state(), PowerState::Open);
        assert_eq!(touch.mode(), ControllerMode::Normal);

        block_on(panel.close()).unwrap();
    }

    #[test]
    fn test_close_waits_for_poller() {
        let Rig { epd, touch, .. } = rig();
        let mut panel = TouchEpaper::new(epd, &touch);
        block_on(panel.open()).unwrap();

        let (polled, closed) = block_on(join(touch.run(), panel.close()));
        assert_eq!(polled, Ok(()));
        assert_eq!(closed, Ok(()));
        assert!(!touch.is_running());
        assert_eq!(panel.display().state(), DisplayState::Closed);
    }

    #[test]
    fn test_failed_open_leaves_touch_alone() {
        let Rig {
            busy, epd, touch, ..
        } = rig();
        let mut panel = TouchEpaper::new(epd, &touch);
        busy.set_stuck(true);

        assert_eq!(block_on(panel.open()), Err(Error::HardwareTimeout));
        assert_eq!(panel.state(), PowerState::Idle);
        assert_eq!(touch.mode(), ControllerMode::Uninitialized);

        busy.set_stuck(false);
        block_on(panel.open()).unwrap();
        assert_eq!(panel.state(), PowerState::Open);
    }

    #[test]
    fn test_close_before_open() {
        let Rig { epd, touch, .. } = rig();
        let mut panel = TouchEpaper::new(epd, &touch);
        assert_eq!(block_on(panel.sleep()), Err(Error::NotRunning));
        block_on(panel.close()).unwrap();
        assert_eq!(panel.into_display().state(), DisplayState::Closed);
    }
}
