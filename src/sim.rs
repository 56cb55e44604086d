//! Simulated buses and lines for the unit tests.
//!
//! Every device appends to a shared [`EventLog`] so tests can assert on the
//! exact wire sequence.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource};
use embedded_hal::spi::{self, Operation};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::i2c::I2c;
use embedded_hal_async::spi::SpiDevice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Pin(&'static str, bool),
    DelayMs(u32),
    DelayNs(u32),
    /// SPI byte sent with DC low
    Command(u8),
    /// SPI bytes sent with DC high
    Data(Vec<u8>),
    /// Register address and payload
    I2cWrite(u16, Vec<u8>),
    /// Register address and length
    I2cRead(u16, usize),
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<BusEvent>>>);

impl EventLog {
    pub fn push(&self, event: BusEvent) {
        self.0.borrow_mut().push(event);
    }

    /// Drains the log
    pub fn take(&self) -> Vec<BusEvent> {
        core::mem::take(&mut *self.0.borrow_mut())
    }
}

/// Groups SPI traffic into `(command, data)` pairs
pub fn transfers(events: &[BusEvent]) -> Vec<(u8, Vec<u8>)> {
    let mut out: Vec<(u8, Vec<u8>)> = Vec::new();
    for event in events {
        match event {
            BusEvent::Command(cmd) => out.push((*cmd, vec![])),
            BusEvent::Data(data) => {
                if let Some((_, payload)) = out.last_mut() {
                    payload.extend_from_slice(data);
                }
            }
            _ => {}
        }
    }
    out
}

/// Register writes only, in order
pub fn i2c_writes(events: &[BusEvent]) -> Vec<(u16, Vec<u8>)> {
    events
        .iter()
        .filter_map(|event| match event {
            BusEvent::I2cWrite(reg, data) if !data.is_empty() => Some((*reg, data.clone())),
            _ => None,
        })
        .collect()
}

pub struct SimPin {
    name: &'static str,
    level: Rc<Cell<bool>>,
    log: EventLog,
}

impl SimPin {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self {
            name,
            level: Rc::new(Cell::new(false)),
            log: log.clone(),
        }
    }

    pub fn level(&self) -> Rc<Cell<bool>> {
        self.level.clone()
    }

    fn set(&mut self, high: bool) {
        self.level.set(high);
        self.log.push(BusEvent::Pin(self.name, high));
    }
}

impl digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

/// SPI device that reads the DC line to tell commands from data
pub struct SimSpi {
    log: EventLog,
    dc: Rc<Cell<bool>>,
}

impl SimSpi {
    pub fn new(log: &EventLog, dc: &SimPin) -> Self {
        Self {
            log: log.clone(),
            dc: dc.level(),
        }
    }
}

impl spi::ErrorType for SimSpi {
    type Error = Infallible;
}

impl SpiDevice for SimSpi {
    async fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        for op in operations {
            if let Operation::Write(bytes) = op {
                if self.dc.get() {
                    self.log.push(BusEvent::Data(bytes.to_vec()));
                } else {
                    for &byte in bytes.iter() {
                        self.log.push(BusEvent::Command(byte));
                    }
                }
            }
        }
        Ok(())
    }
}

/// BUSY line; low right away unless stuck
#[derive(Clone, Default)]
pub struct SimBusy {
    stuck: Rc<Cell<bool>>,
}

impl SimBusy {
    pub fn set_stuck(&self, stuck: bool) {
        self.stuck.set(stuck);
    }
}

impl digital::ErrorType for SimBusy {
    type Error = Infallible;
}

impl Wait for SimBusy {
    async fn wait_for_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    async fn wait_for_low(&mut self) -> Result<(), Infallible> {
        if self.stuck.get() {
            core::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

/// Interrupt line; every [`fire`](Self::fire) is one edge
#[derive(Clone, Default)]
pub struct SimIrq {
    edge: Rc<Signal<NoopRawMutex, ()>>,
}

impl SimIrq {
    pub fn fire(&self) {
        self.edge.signal(());
    }
}

impl digital::ErrorType for SimIrq {
    type Error = Infallible;
}

impl Wait for SimIrq {
    async fn wait_for_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    async fn wait_for_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Infallible> {
        self.edge.wait().await;
        Ok(())
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Infallible> {
        self.edge.wait().await;
        Ok(())
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Infallible> {
        self.edge.wait().await;
        Ok(())
    }
}

/// Delay that records what was asked for.
///
/// A yielding delay hands control back to the executor once per call, so
/// other futures joined with the caller get to run in between.
pub struct SimDelay {
    log: EventLog,
    yielding: bool,
}

impl SimDelay {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            yielding: false,
        }
    }

    pub fn yielding(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            yielding: true,
        }
    }

    async fn pause(&self) {
        if self.yielding {
            yield_now().await;
        }
    }
}

impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.log.push(BusEvent::DelayNs(ns));
        self.pause().await;
    }

    async fn delay_us(&mut self, us: u32) {
        self.log.push(BusEvent::DelayNs(us.saturating_mul(1_000)));
        self.pause().await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.log.push(BusEvent::DelayMs(ms));
        self.pause().await;
    }
}

/// Register-mapped I2C target with a byte-wide register file
#[derive(Clone)]
pub struct SimI2c {
    address: u8,
    registers: Rc<RefCell<BTreeMap<u16, u8>>>,
    fail: Rc<Cell<bool>>,
    log: EventLog,
}

impl SimI2c {
    pub fn new(address: u8, log: &EventLog) -> Self {
        Self {
            address,
            registers: Rc::new(RefCell::new(BTreeMap::new())),
            fail: Rc::new(Cell::new(false)),
            log: log.clone(),
        }
    }

    /// Stores `bytes` at consecutive registers starting at `register`
    pub fn set(&self, register: u16, bytes: &[u8]) {
        let mut registers = self.registers.borrow_mut();
        for (offset, &byte) in bytes.iter().enumerate() {
            registers.insert(register + offset as u16, byte);
        }
    }

    pub fn get(&self, register: u16) -> u8 {
        self.registers
            .borrow()
            .get(&register)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.set(fail);
    }
}

impl i2c::ErrorType for SimI2c {
    type Error = ErrorKind;
}

impl I2c for SimI2c {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), ErrorKind> {
        if address != self.address {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        if self.fail.get() {
            return Err(ErrorKind::Bus);
        }

        let mut pointer = 0u16;
        for op in operations {
            match op {
                i2c::Operation::Write(bytes) => {
                    if bytes.len() < 2 {
                        return Err(ErrorKind::Other);
                    }
                    pointer = u16::from_be_bytes([bytes[0], bytes[1]]);
                    self.set(pointer, &bytes[2..]);
                    self.log.push(BusEvent::I2cWrite(pointer, bytes[2..].to_vec()));
                }
                i2c::Operation::Read(buffer) => {
                    for (offset, byte) in buffer.iter_mut().enumerate() {
                        *byte = self.get(pointer + offset as u16);
                    }
                    self.log.push(BusEvent::I2cRead(pointer, buffer.len()));
                }
            }
        }
        Ok(())
    }
}
