#![no_std]
//! Controller-mode driver for an SPI bus shared by several devices.
//!
//! The bus talks to hardware only through a platform-supplied
//! [`RegisterAccess`] and masks interrupts through an [`InterruptControl`].
//! Devices are registered once into a [`DeviceRegistry`]; each transaction
//! with a device runs between [`Bus::select`], which hands out a
//! [`SelectGuard`], and [`Bus::deselect`], which consumes it. Selecting while
//! another selection is open is rejected instead of clobbering the saved
//! interrupt state.
//!
//! Transfers busy-wait on the hardware completion flag. The plain transfer
//! methods wait forever; the `*_with` variants accept a poll budget and
//! report [`BusError::TransferTimeout`].

mod config;
mod controller;
mod critical;
mod error;
mod registry;
mod regs;
mod shared;
mod transfer;

pub use config::{BusConfig, BusPins, Completion, Filler, TransferOptions};
pub use controller::{Bus, ClockDivider};
pub use critical::{CriticalSectionInterrupts, InterruptControl, SelectGuard};
pub use error::{BusError, ConfigError, DeselectError};
pub use registry::{Device, DeviceConfig, DeviceRegistry};
pub use regs::{ControlBit, Direction, Level, Pin, RegisterAccess};
pub use shared::{SharedBus, SharedDevice};
pub use transfer::Width;
