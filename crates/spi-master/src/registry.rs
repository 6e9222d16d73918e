//! Devices sharing the bus and the select/deselect protocol.
//!
//! Devices are registered once into a fixed-size [`DeviceRegistry`] and live
//! as long as the registry (normally `'static`). A transaction with a device
//! is bracketed by [`Bus::select`] and [`Bus::deselect`]: select masks
//! interrupts and asserts the device's chip select, deselect undoes both in
//! reverse order. Only one device can be selected at a time.

use core::ptr::{self, NonNull};

use grounded::uninit::GroundedArrayCell;
use portable_atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::config::TransferOptions;
use crate::controller::{Bus, ClockDivider, Phase};
use crate::critical::{InterruptControl, SelectGuard};
use crate::error::{BusError, ConfigError, DeselectError};
use crate::regs::{Direction, Level, Pin, RegisterAccess};

/// Pin roles and preferences of a device, given at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// Chip select. `None` binds the bus's native select line.
    pub chip_select: Option<Pin>,
    pub reset: Option<Pin>,
    /// Interrupt request from the device, configured as an input.
    pub interrupt: Option<Pin>,
    /// Auxiliary line, e.g. a display's data/command or address select.
    pub auxiliary: Option<Pin>,
    /// Bus clock to apply when this device is selected.
    pub clock_hz: Option<u32>,
    /// Transfer options while this device is selected, instead of the bus
    /// defaults.
    pub options: Option<TransferOptions>,
}

impl DeviceConfig {
    pub const fn new() -> Self {
        Self {
            chip_select: None,
            reset: None,
            interrupt: None,
            auxiliary: None,
            clock_hz: None,
            options: None,
        }
    }

    pub const fn with_chip_select(mut self, pin: Pin) -> Self {
        self.chip_select = Some(pin);
        self
    }

    pub const fn with_reset(mut self, pin: Pin) -> Self {
        self.reset = Some(pin);
        self
    }

    pub const fn with_interrupt(mut self, pin: Pin) -> Self {
        self.interrupt = Some(pin);
        self
    }

    pub const fn with_auxiliary(mut self, pin: Pin) -> Self {
        self.auxiliary = Some(pin);
        self
    }

    pub const fn with_clock_hz(mut self, hz: u32) -> Self {
        self.clock_hz = Some(hz);
        self
    }

    pub const fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// A registered device.
///
/// Handed out by [`DeviceRegistry::register`] as a shared reference that
/// stays valid for the registry's lifetime.
#[derive(Debug)]
pub struct Device {
    chip_select: Pin,
    reset: Option<Pin>,
    interrupt: Option<Pin>,
    auxiliary: Option<Pin>,
    clock_hz: Option<u32>,
    options: Option<TransferOptions>,
    private: AtomicPtr<()>,
}

impl Device {
    /// Resolve the native select default and reject a bundle that binds one
    /// line to two roles.
    fn from_config(config: DeviceConfig, native_select: Pin) -> Result<Self, ConfigError> {
        let chip_select = config.chip_select.unwrap_or(native_select);

        let roles = [Some(chip_select), config.reset, config.interrupt, config.auxiliary];
        for (i, a) in roles.iter().enumerate() {
            let Some(a) = a else { continue };
            for b in roles[i + 1..].iter().flatten() {
                if a.same_line(b) {
                    return Err(ConfigError::PinRoleConflict(*a));
                }
            }
        }

        Ok(Self {
            chip_select,
            reset: config.reset,
            interrupt: config.interrupt,
            auxiliary: config.auxiliary,
            clock_hz: config.clock_hz,
            options: config.options,
            private: AtomicPtr::new(ptr::null_mut()),
        })
    }

    #[inline]
    pub fn chip_select(&self) -> Pin {
        self.chip_select
    }

    #[inline]
    pub fn reset(&self) -> Option<Pin> {
        self.reset
    }

    #[inline]
    pub fn interrupt(&self) -> Option<Pin> {
        self.interrupt
    }

    #[inline]
    pub fn auxiliary(&self) -> Option<Pin> {
        self.auxiliary
    }

    #[inline]
    pub fn clock_hz(&self) -> Option<u32> {
        self.clock_hz
    }

    #[inline]
    pub fn options(&self) -> Option<TransferOptions> {
        self.options
    }

    /// Attach caller data. The device only stores the pointer; it never
    /// reads through it, owns it or frees it.
    pub fn set_private_data(&self, data: NonNull<()>) {
        self.private.store(data.as_ptr(), Ordering::Release);
    }

    pub fn clear_private_data(&self) {
        self.private.store(ptr::null_mut(), Ordering::Release);
    }

    /// Pointer last given to [`set_private_data`](Self::set_private_data).
    pub fn private_data(&self) -> Option<NonNull<()>> {
        NonNull::new(self.private.load(Ordering::Acquire))
    }
}

/// Fixed-capacity arena of registered devices.
///
/// Meant to live in a `static`:
///
/// ```ignore
/// static DEVICES: DeviceRegistry<4> = DeviceRegistry::new();
/// ```
///
/// Devices are never removed.
pub struct DeviceRegistry<const N: usize> {
    slots: GroundedArrayCell<Device, N>,
    claimed: AtomicUsize,
}

impl<const N: usize> DeviceRegistry<N> {
    pub const fn new() -> Self {
        Self { slots: GroundedArrayCell::uninit(), claimed: AtomicUsize::new(0) }
    }

    /// Validate `config`, set up its lines on `bus` and store the device.
    ///
    /// Chip select, reset and auxiliary lines become outputs driven to their
    /// inactive level; the interrupt line becomes an input.
    pub fn register<R: RegisterAccess, I: InterruptControl>(
        &self,
        bus: &mut Bus<R, I>,
        config: DeviceConfig,
    ) -> Result<&Device, BusError> {
        let device = match Device::from_config(config, bus.config.pins.select) {
            Ok(device) => device,
            Err(e) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("[spi] rejected device: {:?}", e);
                return Err(e.into());
            }
        };

        let index = self
            .claimed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < N).then_some(n + 1)
            })
            .map_err(|_| BusError::RegistryFull)?;

        bus.configure_lines(&device);

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "[spi] device {} on cs {}:{}",
            index,
            device.chip_select.port,
            device.chip_select.bit
        );

        // SAFETY: `index < N` and was handed out exactly once by the
        // `fetch_update` above, so no other reference to this slot exists.
        // Slots are written once and never dropped or overwritten, so the
        // returned reference stays valid for as long as `self`.
        unsafe {
            let (base, _) = self.slots.get_ptr_len();
            let slot = base.add(index);
            slot.write(device);
            Ok(&*slot)
        }
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.claimed.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for DeviceRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RegisterAccess, I: InterruptControl> Bus<R, I> {
    /// Give `device` exclusive use of the bus.
    ///
    /// Interrupts are masked (their previous state goes into the returned
    /// guard), the device's clock and transfer options are applied, then its
    /// chip select is asserted. Fails without touching anything if another
    /// selection is still open.
    pub fn select(&mut self, device: &Device) -> Result<SelectGuard<I::State>, BusError> {
        if let Phase::Selected(held_by) = self.phase {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "[spi] select while cs {}:{} holds the bus",
                held_by.port,
                held_by.bit
            );
            return Err(BusError::AlreadySelected { held_by });
        }

        let saved = self.irq.save_and_disable();

        if let Some(hz) = device.clock_hz {
            let divider = ClockDivider::for_frequency(hz, self.config.source_hz);
            if divider != self.divider {
                self.set_divider(divider);
            }
        }
        self.options = device.options.unwrap_or(self.config.options);

        let cs = device.chip_select;
        self.regs.write_pin(cs, cs.active_level());
        self.phase = Phase::Selected(cs);

        #[cfg(feature = "defmt")]
        defmt::trace!("[spi] select {}:{}", cs.port, cs.bit);

        Ok(SelectGuard { bus: self.id, chip_select: cs, saved })
    }

    /// End the selection that produced `guard`.
    ///
    /// Waits for a byte still in flight from a fire-and-forget write,
    /// releases the chip select, then restores the interrupt state saved by
    /// the paired `select`. The wait honours the poll budget of the options
    /// in effect; on timeout the selection is ended anyway and
    /// [`DeselectError::Timeout`] is returned.
    ///
    /// A guard issued by another bus, or for a selection that is not the
    /// open one, is handed back in [`DeselectError::Rejected`] without
    /// touching any line or the interrupt state.
    pub fn deselect(
        &mut self,
        guard: SelectGuard<I::State>,
    ) -> Result<(), DeselectError<I::State>> {
        let error = match self.phase {
            Phase::Idle => Some(BusError::NotSelected),
            Phase::Selected(cs) if guard.bus == self.id && cs == guard.chip_select => None,
            Phase::Selected(_) => Some(BusError::ForeignGuard),
        };
        if let Some(error) = error {
            #[cfg(feature = "defmt")]
            defmt::warn!("[spi] deselect rejected: {:?}", error);
            return Err(DeselectError::Rejected { error, guard });
        }

        let SelectGuard { chip_select: cs, saved, .. } = guard;
        let flushed = self.flush_with(self.options);

        self.regs.write_pin(cs, cs.inactive_level());
        self.phase = Phase::Idle;
        self.options = self.config.options;
        self.irq.restore(saved);

        #[cfg(feature = "defmt")]
        defmt::trace!("[spi] deselect {}:{}", cs.port, cs.bit);

        flushed.map_err(|_| DeselectError::Timeout)
    }

    /// Select `device`, run `f`, deselect. The device is deselected even when
    /// `f` fails; `f`'s error takes precedence over a deselect error.
    pub fn transaction<T>(
        &mut self,
        device: &Device,
        f: impl FnOnce(&mut Self) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        let guard = self.select(device)?;
        let result = f(self);
        let released = self.deselect(guard);
        let value = result?;
        released?;
        Ok(value)
    }

    /// Assert or release the device's reset line. No-op without one.
    pub fn set_reset(&mut self, device: &Device, asserted: bool) {
        if let Some(pin) = device.reset {
            self.drive(pin, asserted);
        }
    }

    /// Assert or release the device's auxiliary line. No-op without one.
    pub fn set_auxiliary(&mut self, device: &Device, asserted: bool) {
        if let Some(pin) = device.auxiliary {
            self.drive(pin, asserted);
        }
    }

    /// Whether the device's interrupt line is at its active level, or `None`
    /// if it has no interrupt line.
    pub fn interrupt_pending(&mut self, device: &Device) -> Option<bool> {
        let pin = device.interrupt?;
        Some(self.regs.read_pin(pin) == pin.active_level())
    }

    fn drive(&mut self, pin: Pin, asserted: bool) {
        let level: Level = if asserted { pin.active_level() } else { pin.inactive_level() };
        self.regs.write_pin(pin, level);
    }

    /// Initial line setup for a freshly registered device.
    fn configure_lines(&mut self, device: &Device) {
        let outputs = [Some(device.chip_select), device.reset, device.auxiliary];
        let interrupt = device.interrupt;

        self.masked(|regs| {
            for pin in outputs.into_iter().flatten() {
                // Level first, so the line never glitches active.
                regs.write_pin(pin, pin.inactive_level());
                regs.set_direction(pin, Direction::Output);
            }
            if let Some(pin) = interrupt {
                regs.set_direction(pin, Direction::Input);
            }
        });
    }
}
