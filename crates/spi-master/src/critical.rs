//! Interrupt masking around bus ownership.
//!
//! A selected device owns the bus with interrupts masked. The interrupt state
//! that was in effect before `select` travels inside the [`SelectGuard`]
//! returned to the caller and is handed back to [`InterruptControl::restore`]
//! when the guard is consumed by `deselect`.

use crate::regs::Pin;

/// Save/disable/restore of the global interrupt-enable state.
pub trait InterruptControl {
    /// Snapshot of the interrupt-enable state taken by
    /// [`save_and_disable`](Self::save_and_disable).
    type State;

    /// Record the current interrupt-enable state, then mask interrupts.
    fn save_and_disable(&mut self) -> Self::State;

    /// Put back a state recorded by `save_and_disable`.
    fn restore(&mut self, state: Self::State);
}

/// [`InterruptControl`] backed by the `critical-section` implementation
/// linked into the final binary (e.g. `cortex-m`'s single core one).
#[derive(Debug, Default, Clone, Copy)]
pub struct CriticalSectionInterrupts;

impl InterruptControl for CriticalSectionInterrupts {
    type State = critical_section::RestoreState;

    fn save_and_disable(&mut self) -> Self::State {
        // SAFETY: the returned token is stored in a `SelectGuard` (or used
        // within one `Bus::masked` call) and released exactly once. The bus
        // refuses a second `select` while a guard is outstanding, so
        // acquire/release pairs issued through the bus are properly nested.
        unsafe { critical_section::acquire() }
    }

    fn restore(&mut self, state: Self::State) {
        // SAFETY: `state` was produced by the matching `acquire` above.
        unsafe { critical_section::release(state) }
    }
}

/// Proof that a device currently owns the bus.
///
/// Obtained from [`Bus::select`](crate::Bus::select) and consumed by
/// [`Bus::deselect`](crate::Bus::deselect). Dropping it without deselecting
/// leaves the chip select asserted and interrupts masked. A guard is tied to
/// the bus that issued it; any other bus hands it back unused.
#[must_use = "the device stays selected with interrupts masked until the guard is passed to `deselect`"]
pub struct SelectGuard<S> {
    pub(crate) bus: usize,
    pub(crate) chip_select: Pin,
    pub(crate) saved: S,
}

impl<S> SelectGuard<S> {
    /// Chip select line asserted by this selection.
    pub fn chip_select(&self) -> Pin {
        self.chip_select
    }
}

impl<S> core::fmt::Debug for SelectGuard<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SelectGuard")
            .field("bus", &self.bus)
            .field("chip_select", &self.chip_select)
            .finish_non_exhaustive()
    }
}
