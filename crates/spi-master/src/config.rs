use crate::regs::Pin;

/// Byte clocked out while reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Filler {
    /// `0x00`
    #[default]
    Zeros,
    /// `0xFF`, for devices that treat a low MOSI as a command bit.
    Ones,
}

impl Filler {
    #[inline]
    pub const fn byte(self) -> u8 {
        match self {
            Filler::Zeros => 0x00,
            Filler::Ones => 0xFF,
        }
    }
}

/// What a write does after loading its last byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    /// Block until the hardware reports the last byte done.
    #[default]
    WaitForCompletion,
    /// Return as soon as the last byte is loaded. The caller must let the
    /// transfer finish (elapsed time or [`Bus::flush`](crate::Bus::flush))
    /// before the next bus operation.
    FireAndForget,
}

/// Per-transfer behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferOptions {
    pub filler: Filler,
    pub completion: Completion,
    /// Maximum number of completion polls per byte. `None` waits forever,
    /// relying on the hardware to always finish a transfer.
    pub timeout: Option<u32>,
}

impl TransferOptions {
    pub const fn new() -> Self {
        Self {
            filler: Filler::Zeros,
            completion: Completion::WaitForCompletion,
            timeout: None,
        }
    }

    pub const fn with_filler(mut self, filler: Filler) -> Self {
        self.filler = filler;
        self
    }

    pub const fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    pub const fn with_timeout(mut self, polls: u32) -> Self {
        self.timeout = Some(polls);
        self
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// The peripheral's fixed lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusPins {
    /// Native select line. Must stay an output, otherwise the peripheral
    /// may fall back to peripheral (slave) mode.
    pub select: Pin,
    pub mosi: Pin,
    pub miso: Pin,
    pub sck: Pin,
}

/// Bus configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    pub pins: BusPins,
    /// Frequency feeding the SPI clock divider, in Hz.
    pub source_hz: u32,
    /// Defaults used by every transfer unless the selected device or the
    /// call overrides them.
    pub options: TransferOptions,
}

impl BusConfig {
    pub const fn new(pins: BusPins, source_hz: u32) -> Self {
        Self { pins, source_hz, options: TransferOptions::new() }
    }
}
