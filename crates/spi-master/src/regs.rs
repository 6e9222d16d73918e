//! Register-level capability supplied by the platform layer.
//!
//! The driver never touches hardware directly. Everything it needs (control
//! bits of the SPI peripheral, GPIO direction and level, the one-byte data
//! register) goes through [`RegisterAccess`], so a board crate can bind it to
//! its PAC and tests can bind it to a software double.

/// Named control and status bits of the SPI peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlBit {
    /// Peripheral enable.
    Enable,
    /// Controller (master) mode select.
    Controller,
    /// Low bit of the clock rate selection.
    Rate0,
    /// High bit of the clock rate selection.
    Rate1,
    /// Doubles the selected clock rate when set.
    DoubleSpeed,
    /// Status flag raised by hardware when a byte transfer completed.
    /// Reading it acknowledges the flag.
    TransferComplete,
}

/// Electrical level of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

impl core::ops::Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// Pin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Input,
    Output,
}

/// A line identified by its port register and bit index.
///
/// A `Pin` is only a reference into register space owned by the platform; it
/// carries no ownership. `active` is the level at which the line counts as
/// asserted (chip selects and resets are usually active low).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pin {
    pub port: u8,
    pub bit: u8,
    pub active: Level,
}

impl Pin {
    pub const fn active_low(port: u8, bit: u8) -> Self {
        Self { port, bit, active: Level::Low }
    }

    pub const fn active_high(port: u8, bit: u8) -> Self {
        Self { port, bit, active: Level::High }
    }

    /// Level that drives this pin into its asserted state.
    #[inline]
    pub fn active_level(&self) -> Level {
        self.active
    }

    /// Level that drives this pin into its released state.
    #[inline]
    pub fn inactive_level(&self) -> Level {
        !self.active
    }

    /// Whether two pins refer to the same physical line, regardless of
    /// polarity.
    #[inline]
    pub fn same_line(&self, other: &Pin) -> bool {
        self.port == other.port && self.bit == other.bit
    }
}

/// Access to the SPI peripheral and GPIO registers.
///
/// Implementations are expected to be thin: every method maps to one
/// register read or read-modify-write.
pub trait RegisterAccess {
    /// Set a control bit.
    fn set_bit(&mut self, bit: ControlBit);

    /// Clear a control bit.
    fn clear_bit(&mut self, bit: ControlBit);

    /// Read a control or status bit.
    fn bit_is_set(&mut self, bit: ControlBit) -> bool;

    /// Configure the direction of a GPIO line.
    fn set_direction(&mut self, pin: Pin, direction: Direction);

    /// Drive a GPIO output line.
    fn write_pin(&mut self, pin: Pin, level: Level);

    /// Sample a GPIO line.
    fn read_pin(&mut self, pin: Pin) -> Level;

    /// Load the data register, starting a transfer.
    fn write_data(&mut self, byte: u8);

    /// Read the byte shifted in by the last transfer.
    fn read_data(&mut self) -> u8;

    /// Short fixed delay between loading the data register and polling for
    /// completion. At the fastest clock the completion flag can otherwise be
    /// polled before the hardware has latched the new transfer.
    #[inline]
    fn settle(&mut self) {
        core::hint::spin_loop();
    }

    /// Set or clear a control bit from a boolean.
    #[inline]
    fn write_bit(&mut self, bit: ControlBit, value: bool) {
        if value {
            self.set_bit(bit)
        } else {
            self.clear_bit(bit)
        }
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &mut T {
    fn set_bit(&mut self, bit: ControlBit) {
        T::set_bit(self, bit)
    }

    fn clear_bit(&mut self, bit: ControlBit) {
        T::clear_bit(self, bit)
    }

    fn bit_is_set(&mut self, bit: ControlBit) -> bool {
        T::bit_is_set(self, bit)
    }

    fn set_direction(&mut self, pin: Pin, direction: Direction) {
        T::set_direction(self, pin, direction)
    }

    fn write_pin(&mut self, pin: Pin, level: Level) {
        T::write_pin(self, pin, level)
    }

    fn read_pin(&mut self, pin: Pin) -> Level {
        T::read_pin(self, pin)
    }

    fn write_data(&mut self, byte: u8) {
        T::write_data(self, byte)
    }

    fn read_data(&mut self) -> u8 {
        T::read_data(self)
    }

    fn settle(&mut self) {
        T::settle(self)
    }
}
