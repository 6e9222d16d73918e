//! `embedded-hal` integration and sharing across execution contexts.
//!
//! [`Bus`] implements [`SpiBus`] directly. [`SharedBus`] puts it behind an
//! `embassy-sync` blocking mutex so it can sit in a `static` reachable from
//! thread mode and interrupt handlers, and [`SharedDevice`] turns one
//! registered device on that bus into an [`SpiDevice`], which is what
//! `embedded-hal` drivers expect.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, Operation, SpiBus, SpiDevice};

use crate::controller::Bus;
use crate::critical::InterruptControl;
use crate::error::BusError;
use crate::registry::{Device, DeviceConfig, DeviceRegistry};
use crate::regs::RegisterAccess;

impl<R: RegisterAccess, I: InterruptControl> ErrorType for Bus<R, I> {
    type Error = BusError;
}

/// Chip select is not managed here; pair with [`Bus::select`] or use
/// [`SharedDevice`]. Transfers use the options currently in effect,
/// including their poll budget.
impl<R: RegisterAccess, I: InterruptControl> SpiBus<u8> for Bus<R, I> {
    fn read(&mut self, words: &mut [u8]) -> Result<(), BusError> {
        let options = self.options;
        self.read_buffer_with(words, options)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), BusError> {
        let options = self.options;
        self.write_buffer_with(words, options)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), BusError> {
        let options = self.options;
        self.transfer_with(read, write, options)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), BusError> {
        let options = self.options;
        self.transfer_in_place_with(words, options)
    }

    fn flush(&mut self) -> Result<(), BusError> {
        let options = self.options;
        self.flush_with(options)
    }
}

/// A [`Bus`] behind a blocking mutex.
///
/// With `CriticalSectionRawMutex` the mutex itself masks interrupts while
/// held, so an interrupt handler can never observe the bus mid-transaction.
/// With weaker mutexes a nested entry is caught by the inner `RefCell` and
/// reported as [`BusError::Reentered`].
pub struct SharedBus<M: RawMutex, R: RegisterAccess, I: InterruptControl> {
    inner: Mutex<M, RefCell<Bus<R, I>>>,
}

impl<M: RawMutex, R: RegisterAccess, I: InterruptControl> SharedBus<M, R, I> {
    pub const fn new(bus: Bus<R, I>) -> Self {
        Self { inner: Mutex::new(RefCell::new(bus)) }
    }

    /// Run `f` with exclusive access to the bus.
    pub fn lock<T>(
        &self,
        f: impl FnOnce(&mut Bus<R, I>) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        self.inner.lock(|cell| {
            let mut bus = cell.try_borrow_mut().map_err(|_| BusError::Reentered)?;
            f(&mut bus)
        })
    }

    /// [`DeviceRegistry::register`] through the lock.
    pub fn register<'r, const N: usize>(
        &self,
        registry: &'r DeviceRegistry<N>,
        config: DeviceConfig,
    ) -> Result<&'r Device, BusError> {
        self.lock(|bus| registry.register(bus, config))
    }

    /// Bind `device` to this bus as an `embedded-hal` [`SpiDevice`].
    pub fn device<'a, D: DelayNs>(
        &'a self,
        device: &'a Device,
        delay: D,
    ) -> SharedDevice<'a, M, R, I, D> {
        SharedDevice::new(self, device, delay)
    }

    pub fn into_inner(self) -> Bus<R, I> {
        self.inner.into_inner().into_inner()
    }
}

/// One registered device on a [`SharedBus`].
///
/// Each [`SpiDevice::transaction`] locks the bus, selects the device, runs
/// the operations and deselects. Deselecting waits for the last byte.
pub struct SharedDevice<'a, M: RawMutex, R: RegisterAccess, I: InterruptControl, D> {
    bus: &'a SharedBus<M, R, I>,
    device: &'a Device,
    delay: D,
}

impl<'a, M, R, I, D> SharedDevice<'a, M, R, I, D>
where
    M: RawMutex,
    R: RegisterAccess,
    I: InterruptControl,
    D: DelayNs,
{
    pub fn new(bus: &'a SharedBus<M, R, I>, device: &'a Device, delay: D) -> Self {
        Self { bus, device, delay }
    }

    pub fn device(&self) -> &'a Device {
        self.device
    }
}

impl<M, R, I, D> ErrorType for SharedDevice<'_, M, R, I, D>
where
    M: RawMutex,
    R: RegisterAccess,
    I: InterruptControl,
{
    type Error = BusError;
}

impl<M, R, I, D> SpiDevice<u8> for SharedDevice<'_, M, R, I, D>
where
    M: RawMutex,
    R: RegisterAccess,
    I: InterruptControl,
    D: DelayNs,
{
    fn transaction(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), BusError> {
        let device = self.device;
        let delay = &mut self.delay;

        self.bus.lock(|bus| {
            bus.transaction(device, |bus| {
                let options = bus.options();
                for op in operations.iter_mut() {
                    match op {
                        Operation::Read(buf) => bus.read_buffer_with(buf, options)?,
                        Operation::Write(buf) => bus.write_buffer_with(buf, options)?,
                        Operation::Transfer(read, write) => {
                            bus.transfer_with(read, write, options)?
                        }
                        Operation::TransferInPlace(buf) => {
                            bus.transfer_in_place_with(buf, options)?
                        }
                        Operation::DelayNs(ns) => {
                            bus.flush_with(options)?;
                            delay.delay_ns(*ns);
                        }
                    }
                }
                Ok(())
            })
        })
    }
}
