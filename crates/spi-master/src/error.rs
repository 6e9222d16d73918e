use crate::critical::SelectGuard;
use crate::regs::Pin;

/// Errors reported by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// `select` was called while the device on `held_by` still owns the bus.
    AlreadySelected { held_by: Pin },
    /// `deselect` was called while no device is selected.
    NotSelected,
    /// The guard does not belong to the current selection.
    ForeignGuard,
    /// The shared bus was entered again while already borrowed, typically
    /// from an interrupt handler preempting a transaction.
    Reentered,
    /// The completion flag did not rise within the configured poll budget.
    TransferTimeout,
    /// Device bundle rejected at registration.
    InvalidConfiguration(ConfigError),
    /// The registry has no free slot left.
    RegistryFull,
}

impl BusError {
    /// Whether this error is a violation of the select/deselect protocol.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            BusError::AlreadySelected { .. }
                | BusError::NotSelected
                | BusError::ForeignGuard
                | BusError::Reentered
        )
    }
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BusError::AlreadySelected { held_by } => write!(
                f,
                "Bus misuse: already selected by device on port {} bit {}",
                held_by.port, held_by.bit
            ),
            BusError::NotSelected => {
                write!(f, "Bus misuse: no device is selected")
            }
            BusError::ForeignGuard => {
                write!(f, "Bus misuse: guard does not match the selected device")
            }
            BusError::Reentered => {
                write!(f, "Bus misuse: shared bus entered while in use")
            }
            BusError::TransferTimeout => {
                write!(f, "Transfer did not complete in time")
            }
            BusError::InvalidConfiguration(err) => {
                write!(f, "Invalid configuration: {}", err)
            }
            BusError::RegistryFull => write!(f, "Device registry is full"),
        }
    }
}

/// Reasons a device bundle is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Two roles of the same device were bound to one physical line.
    PinRoleConflict(Pin),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::PinRoleConflict(pin) => write!(
                f,
                "port {} bit {} bound to more than one role",
                pin.port, pin.bit
            ),
        }
    }
}

impl From<ConfigError> for BusError {
    fn from(e: ConfigError) -> Self {
        BusError::InvalidConfiguration(e)
    }
}

/// Failure of [`Bus::deselect`](crate::Bus::deselect).
pub enum DeselectError<S> {
    /// The guard does not match the open selection on this bus. Nothing was
    /// touched and the guard is handed back so its owner can still end its
    /// selection.
    Rejected { error: BusError, guard: SelectGuard<S> },
    /// The selection ended, but a byte left in flight did not complete
    /// within the poll budget before chip select was released.
    Timeout,
}

impl<S> DeselectError<S> {
    pub fn error(&self) -> BusError {
        match self {
            DeselectError::Rejected { error, .. } => *error,
            DeselectError::Timeout => BusError::TransferTimeout,
        }
    }

    /// The returned guard, if the selection is still open.
    pub fn into_guard(self) -> Option<SelectGuard<S>> {
        match self {
            DeselectError::Rejected { guard, .. } => Some(guard),
            DeselectError::Timeout => None,
        }
    }
}

impl<S> core::fmt::Debug for DeselectError<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeselectError::Rejected { error, guard } => f
                .debug_struct("Rejected")
                .field("error", error)
                .field("guard", guard)
                .finish(),
            DeselectError::Timeout => f.write_str("Timeout"),
        }
    }
}

impl<S> core::fmt::Display for DeselectError<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.error())
    }
}

/// Drops a rejected guard. Only for callers that know the guard came from
/// the same bus, such as [`Bus::transaction`](crate::Bus::transaction).
impl<S> From<DeselectError<S>> for BusError {
    fn from(e: DeselectError<S>) -> Self {
        e.error()
    }
}

impl embedded_hal::spi::Error for BusError {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}
