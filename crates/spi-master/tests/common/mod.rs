#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use spi_master::{
    Bus, BusConfig, BusPins, ControlBit, Direction, InterruptControl, Level,
    Pin, RegisterAccess,
};

// ---------------------------------------------------------------------------
// Recorded hardware activity
// ---------------------------------------------------------------------------

/// One register-level action, in the order the driver issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Set(ControlBit),
    Clear(ControlBit),
    Poll(ControlBit, bool),
    Direction(Pin, Direction),
    Write(Pin, Level),
    Data(u8),
    Read(u8),
    Settle,
    IrqSave(bool),
    IrqRestore(bool),
}

/// State shared by the mock register block and the mock interrupt controller.
#[derive(Default)]
pub struct MockState {
    pub events: Vec<Event>,
    pub bits: HashMap<ControlBit, bool>,
    pub directions: HashMap<(u8, u8), Direction>,
    pub levels: HashMap<(u8, u8), Level>,
    /// Every byte loaded into the data register (MOSI).
    pub mosi: Vec<u8>,
    /// Bytes the device answers with when not in loop-back (MISO).
    pub miso: VecDeque<u8>,
    /// MISO echoes MOSI delayed by this many transfers.
    pub loopback: Option<usize>,
    pub received: u8,
    /// Polls that report "busy" after each data write.
    pub busy_polls: u32,
    pub remaining_busy: u32,
    pub pending: bool,
    /// The completion flag never rises.
    pub stuck: bool,
    pub irq_enabled: bool,
}

/// Cloneable view on the mock state, kept by the test after the bus took
/// ownership of the mocks.
#[derive(Clone)]
pub struct Probe(Rc<RefCell<MockState>>);

impl Probe {
    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.0.borrow_mut().events.clear();
    }

    pub fn mosi(&self) -> Vec<u8> {
        self.0.borrow().mosi.clone()
    }

    /// Number of byte transfers started on the bus.
    pub fn cycles(&self) -> usize {
        self.0.borrow().mosi.len()
    }

    pub fn polls(&self) -> usize {
        self.0
            .borrow()
            .events
            .iter()
            .filter(|e| matches!(e, Event::Poll(ControlBit::TransferComplete, _)))
            .count()
    }

    pub fn bit(&self, bit: ControlBit) -> bool {
        self.0.borrow().bits.get(&bit).copied().unwrap_or(false)
    }

    pub fn level(&self, pin: Pin) -> Option<Level> {
        self.0.borrow().levels.get(&(pin.port, pin.bit)).copied()
    }

    pub fn direction(&self, pin: Pin) -> Option<Direction> {
        self.0.borrow().directions.get(&(pin.port, pin.bit)).copied()
    }

    /// Drive an input line from the device side.
    pub fn set_level(&self, pin: Pin, level: Level) {
        self.0.borrow_mut().levels.insert((pin.port, pin.bit), level);
    }

    pub fn irq_enabled(&self) -> bool {
        self.0.borrow().irq_enabled
    }

    pub fn set_irq_enabled(&self, enabled: bool) {
        self.0.borrow_mut().irq_enabled = enabled;
    }

    pub fn set_loopback(&self, lag: usize) {
        self.0.borrow_mut().loopback = Some(lag);
    }

    pub fn queue_miso(&self, bytes: &[u8]) {
        self.0.borrow_mut().miso.extend(bytes.iter().copied());
    }

    pub fn set_busy_polls(&self, polls: u32) {
        self.0.borrow_mut().busy_polls = polls;
    }

    pub fn set_stuck(&self, stuck: bool) {
        self.0.borrow_mut().stuck = stuck;
    }
}

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

pub struct MockRegisters(Rc<RefCell<MockState>>);

impl RegisterAccess for MockRegisters {
    fn set_bit(&mut self, bit: ControlBit) {
        let mut s = self.0.borrow_mut();
        s.bits.insert(bit, true);
        s.events.push(Event::Set(bit));
    }

    fn clear_bit(&mut self, bit: ControlBit) {
        let mut s = self.0.borrow_mut();
        s.bits.insert(bit, false);
        s.events.push(Event::Clear(bit));
    }

    fn bit_is_set(&mut self, bit: ControlBit) -> bool {
        let mut s = self.0.borrow_mut();
        let value = if bit == ControlBit::TransferComplete {
            if s.stuck || !s.pending {
                false
            } else if s.remaining_busy > 0 {
                s.remaining_busy -= 1;
                false
            } else {
                // Reading the flag acknowledges it.
                s.pending = false;
                true
            }
        } else {
            s.bits.get(&bit).copied().unwrap_or(false)
        };
        s.events.push(Event::Poll(bit, value));
        value
    }

    fn set_direction(&mut self, pin: Pin, direction: Direction) {
        let mut s = self.0.borrow_mut();
        s.directions.insert((pin.port, pin.bit), direction);
        s.events.push(Event::Direction(pin, direction));
    }

    fn write_pin(&mut self, pin: Pin, level: Level) {
        let mut s = self.0.borrow_mut();
        s.levels.insert((pin.port, pin.bit), level);
        s.events.push(Event::Write(pin, level));
    }

    fn read_pin(&mut self, pin: Pin) -> Level {
        self.0.borrow().levels.get(&(pin.port, pin.bit)).copied().unwrap_or(Level::Low)
    }

    fn write_data(&mut self, byte: u8) {
        let mut guard = self.0.borrow_mut();
        let s = &mut *guard;
        s.mosi.push(byte);
        let len = s.mosi.len();
        s.received = match s.loopback {
            Some(lag) if len > lag => s.mosi[len - 1 - lag],
            Some(_) => 0,
            None => s.miso.pop_front().unwrap_or(0),
        };
        s.pending = true;
        s.remaining_busy = s.busy_polls;
        s.events.push(Event::Data(byte));
    }

    fn read_data(&mut self) -> u8 {
        let mut s = self.0.borrow_mut();
        let byte = s.received;
        s.events.push(Event::Read(byte));
        byte
    }

    fn settle(&mut self) {
        self.0.borrow_mut().events.push(Event::Settle);
    }
}

pub struct MockInterrupts(Rc<RefCell<MockState>>);

impl InterruptControl for MockInterrupts {
    type State = bool;

    fn save_and_disable(&mut self) -> bool {
        let mut s = self.0.borrow_mut();
        let was = s.irq_enabled;
        s.irq_enabled = false;
        s.events.push(Event::IrqSave(was));
        was
    }

    fn restore(&mut self, state: bool) {
        let mut s = self.0.borrow_mut();
        s.irq_enabled = state;
        s.events.push(Event::IrqRestore(state));
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub type MockBus = Bus<MockRegisters, MockInterrupts>;

pub const SOURCE_HZ: u32 = 16_000_000;

pub const PORT_B: u8 = 1;
pub const PORT_D: u8 = 3;

pub const NATIVE_SELECT: Pin = Pin::active_low(PORT_B, 2);
pub const MOSI: Pin = Pin::active_high(PORT_B, 3);
pub const MISO: Pin = Pin::active_high(PORT_B, 4);
pub const SCK: Pin = Pin::active_high(PORT_B, 5);

pub fn pins() -> BusPins {
    BusPins { select: NATIVE_SELECT, mosi: MOSI, miso: MISO, sck: SCK }
}

/// A bus over fresh mocks, interrupts enabled, not yet initialized.
pub fn make_bus() -> (MockBus, Probe) {
    let state = Rc::new(RefCell::new(MockState { irq_enabled: true, ..Default::default() }));
    let bus = Bus::new(
        MockRegisters(state.clone()),
        MockInterrupts(state.clone()),
        BusConfig::new(pins(), SOURCE_HZ),
    );
    (bus, Probe(state))
}

/// Register mock alone, for pairing with a real `InterruptControl`.
pub fn mock_registers() -> (MockRegisters, Probe) {
    let state = Rc::new(RefCell::new(MockState::default()));
    (MockRegisters(state.clone()), Probe(state))
}

/// Like [`make_bus`] but initialized, with the recorded events cleared.
pub fn ready_bus() -> (MockBus, Probe) {
    let (mut bus, probe) = make_bus();
    bus.init();
    probe.clear_events();
    (bus, probe)
}

/// Bytes carried by `Event::Data`, in order.
pub fn data_events(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Data(b) => Some(*b),
            _ => None,
        })
        .collect()
}
