use portable_atomic::{AtomicUsize, Ordering};

use crate::config::{BusConfig, TransferOptions};
use crate::critical::InterruptControl;
use crate::regs::{ControlBit, Direction, Level, Pin, RegisterAccess};

/// Physical divisor for each divider code. Codes 6 and 7 both divide by 128;
/// [`ClockDivider::for_frequency`] only ever produces 7.
const DIVISORS: [u32; 8] = [2, 4, 8, 16, 32, 64, 128, 128];

/// SPI clock divider code, `0..=7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockDivider(u8);

impl ClockDivider {
    /// Divide by 2.
    pub const FASTEST: Self = Self(0);
    /// Divide by 128.
    pub const SLOWEST: Self = Self(7);

    pub const fn from_code(code: u8) -> Option<Self> {
        if code < 8 {
            Some(Self(code))
        } else {
            None
        }
    }

    /// Pick the fastest divider whose output does not exceed `target_hz`.
    ///
    /// Starts at `source_hz / 2` and halves at most six times while the rate
    /// is still above the target. Reaching six halvings selects code 7 rather
    /// than 6, even though both divide by 128 in the table above.
    pub const fn for_frequency(target_hz: u32, source_hz: u32) -> Self {
        let mut rate = source_hz / 2;
        let mut code = 0;
        while code < 6 && rate > target_hz {
            rate /= 2;
            code += 1;
        }
        if code == 6 {
            code = 7;
        }
        Self(code)
    }

    #[inline]
    pub const fn code(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn divisor(self) -> u32 {
        DIVISORS[self.0 as usize]
    }

    /// Resulting bus clock for a given source clock.
    #[inline]
    pub const fn frequency(self, source_hz: u32) -> u32 {
        source_hz / self.divisor()
    }

    // Bit 0 of the code selects the undoubled rate; bits 1 and 2 map to the
    // two rate select bits.
    fn apply<R: RegisterAccess>(self, regs: &mut R) {
        regs.write_bit(ControlBit::DoubleSpeed, self.0 & 0b001 == 0);
        regs.write_bit(ControlBit::Rate0, self.0 & 0b010 != 0);
        regs.write_bit(ControlBit::Rate1, self.0 & 0b100 != 0);
    }
}

impl Default for ClockDivider {
    fn default() -> Self {
        Self::FASTEST
    }
}

/// Source of bus identities, so a guard can be matched to its issuer.
static NEXT_BUS_ID: AtomicUsize = AtomicUsize::new(0);

/// Selection state of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Selected(Pin),
}

/// The SPI controller.
///
/// Owns the platform's [`RegisterAccess`] for the peripheral, so there is one
/// `Bus` per physical peripheral for as long as the register handle is
/// unique. Controller operations live here; transfers and device selection
/// are implemented in their own modules on the same type.
pub struct Bus<R: RegisterAccess, I: InterruptControl> {
    pub(crate) id: usize,
    pub(crate) regs: R,
    pub(crate) irq: I,
    pub(crate) config: BusConfig,
    pub(crate) enabled: bool,
    pub(crate) divider: ClockDivider,
    pub(crate) phase: Phase,
    /// Options in effect for the current selection.
    pub(crate) options: TransferOptions,
    /// A fire-and-forget write left its last byte on the wire.
    pub(crate) in_flight: bool,
}

impl<R: RegisterAccess, I: InterruptControl> Bus<R, I> {
    /// Wrap the peripheral. No register is touched until [`init`](Self::init).
    pub fn new(regs: R, irq: I, config: BusConfig) -> Self {
        Self {
            id: NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed),
            regs,
            irq,
            config,
            enabled: false,
            divider: ClockDivider::FASTEST,
            phase: Phase::Idle,
            options: config.options,
            in_flight: false,
        }
    }

    /// Bring the peripheral into controller mode at the fastest clock.
    ///
    /// Runs with interrupts masked. Calling it again re-applies the same
    /// register state. It does not end an outstanding selection: the chip
    /// select stays asserted and the open guard can still be deselected.
    pub fn init(&mut self) {
        let pins = self.config.pins;

        #[cfg(feature = "defmt")]
        if let Phase::Selected(cs) = self.phase {
            defmt::warn!("[spi] init while cs {}:{} is selected", cs.port, cs.bit);
        }

        let select_level = match self.phase {
            Phase::Selected(cs) if cs.same_line(&pins.select) => cs.active_level(),
            _ => pins.select.inactive_level(),
        };

        self.masked(|regs| {
            // The native select line must never become an input while the
            // peripheral is enabled, or the hardware drops to peripheral mode.
            regs.write_pin(pins.select, select_level);
            regs.set_direction(pins.select, Direction::Output);

            regs.set_bit(ControlBit::Controller);
            regs.set_bit(ControlBit::Enable);

            // Only after enabling, so the lines go straight from input to
            // peripheral control without clocking in a stray bit.
            regs.set_direction(pins.mosi, Direction::Output);
            regs.set_direction(pins.sck, Direction::Output);

            ClockDivider::FASTEST.apply(regs);

            // Acknowledge a stale completion flag.
            let _ = regs.bit_is_set(ControlBit::TransferComplete);
        });

        self.enabled = true;
        self.divider = ClockDivider::FASTEST;
        self.in_flight = false;

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "[spi] initialized, source {} Hz, divider {}",
            self.config.source_hz,
            self.divider.divisor()
        );
    }

    /// Select the divider for `target_hz` given a `source_hz` input clock.
    pub fn set_speed(&mut self, target_hz: u32, source_hz: u32) -> ClockDivider {
        let divider = ClockDivider::for_frequency(target_hz, source_hz);
        self.set_divider(divider);

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "[spi] target {} Hz -> code {} ({} Hz)",
            target_hz,
            divider.code(),
            divider.frequency(source_hz)
        );

        divider
    }

    /// [`set_speed`](Self::set_speed) against the configured source clock.
    pub fn set_frequency(&mut self, target_hz: u32) -> ClockDivider {
        self.set_speed(target_hz, self.config.source_hz)
    }

    /// Program a divider code directly.
    pub fn set_divider(&mut self, divider: ClockDivider) {
        divider.apply(&mut self.regs);
        self.divider = divider;
    }

    pub fn enable(&mut self) {
        self.regs.set_bit(ControlBit::Enable);
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.regs.clear_bit(ControlBit::Enable);
        self.enabled = false;
    }

    /// Toggle the clock line once by hand (idle low).
    ///
    /// Only meaningful while the peripheral is disabled and SCK is a plain
    /// GPIO output.
    pub fn pulse_clock(&mut self) {
        let sck = self.config.pins.sck;
        self.regs.write_pin(sck, Level::High);
        self.regs.settle();
        self.regs.write_pin(sck, Level::Low);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn divider(&self) -> ClockDivider {
        self.divider
    }

    /// Current bus clock in Hz.
    #[inline]
    pub fn frequency(&self) -> u32 {
        self.divider.frequency(self.config.source_hz)
    }

    #[inline]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Replace the bus-wide default transfer options. Takes effect
    /// immediately unless a device is selected, otherwise at the next
    /// deselect.
    pub fn set_default_options(&mut self, options: TransferOptions) {
        self.config.options = options;
        if self.phase == Phase::Idle {
            self.options = options;
        }
    }

    /// Options in effect right now.
    #[inline]
    pub fn options(&self) -> TransferOptions {
        self.options
    }

    #[inline]
    pub fn is_selected(&self) -> bool {
        matches!(self.phase, Phase::Selected(_))
    }

    #[inline]
    pub fn registers(&self) -> &R {
        &self.regs
    }

    #[inline]
    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    #[inline]
    pub fn interrupts(&self) -> &I {
        &self.irq
    }

    /// Give back the register and interrupt handles.
    pub fn into_parts(self) -> (R, I) {
        (self.regs, self.irq)
    }

    /// Run `f` on the registers with interrupts masked.
    pub(crate) fn masked<T>(&mut self, f: impl FnOnce(&mut R) -> T) -> T {
        let saved = self.irq.save_and_disable();
        let out = f(&mut self.regs);
        self.irq.restore(saved);
        out
    }
}
