//! Typed transport events with a bounded ring buffer.
//!
//! Every state change worth observing (request queued, car assigned,
//! status changes, deliveries, crane faults) is emitted as a
//! [`TransportEvent`] into the [`EventBus`]. The bus keeps the most recent
//! events in an [`EventBuffer`] and forwards each one to the passive
//! listeners registered for its kind.
//!
//! The event log is an observation surface only; nothing in the simulation
//! reads it back.
//!
//! # Suppression
//!
//! Kinds can be suppressed via [`EventBus::suppress`]. Suppressed events are
//! neither buffered nor delivered.

use meltshop_core::config::CarType;
use meltshop_core::id::{CarId, CraneId, HeatId, RequestId, StationId};
use meltshop_core::sim::{Duration, SimTime};

use crate::car::CarStatus;
use crate::crane::CraneState;

/// Default number of events kept by a plant's bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A transport event. All events carry the simulated time they occurred at.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    // -- Dispatch --
    RequestQueued {
        request: RequestId,
        heat: HeatId,
        car_type: CarType,
        priority: i32,
        at: SimTime,
    },
    CarAssigned {
        request: RequestId,
        heat: HeatId,
        car: CarId,
        at: SimTime,
    },

    // -- Agents --
    CarStatusChanged {
        car: CarId,
        from: CarStatus,
        to: CarStatus,
        at: SimTime,
    },
    CraneStateChanged {
        crane: CraneId,
        from: CraneState,
        to: CraneState,
        at: SimTime,
    },

    // -- Delivery --
    HeatDelivered {
        heat: HeatId,
        car: CarId,
        station: StationId,
        at: SimTime,
    },
    DeliveryRefused {
        heat: HeatId,
        car: CarId,
        station: StationId,
        at: SimTime,
    },

    // -- Faults --
    CraneFault {
        crane: CraneId,
        message: String,
        at: SimTime,
    },
    DeadlockWarning {
        crane: CraneId,
        state: CraneState,
        stuck_for: Duration,
        at: SimTime,
    },
}

/// Discriminant tag for event types, used for suppression and listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RequestQueued,
    CarAssigned,
    CarStatusChanged,
    CraneStateChanged,
    HeatDelivered,
    DeliveryRefused,
    CraneFault,
    DeadlockWarning,
}

const EVENT_KIND_COUNT: usize = 8;

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::RequestQueued { .. } => EventKind::RequestQueued,
            TransportEvent::CarAssigned { .. } => EventKind::CarAssigned,
            TransportEvent::CarStatusChanged { .. } => EventKind::CarStatusChanged,
            TransportEvent::CraneStateChanged { .. } => EventKind::CraneStateChanged,
            TransportEvent::HeatDelivered { .. } => EventKind::HeatDelivered,
            TransportEvent::DeliveryRefused { .. } => EventKind::DeliveryRefused,
            TransportEvent::CraneFault { .. } => EventKind::CraneFault,
            TransportEvent::DeadlockWarning { .. } => EventKind::DeadlockWarning,
        }
    }

    pub fn at(&self) -> SimTime {
        match self {
            TransportEvent::RequestQueued { at, .. }
            | TransportEvent::CarAssigned { at, .. }
            | TransportEvent::CarStatusChanged { at, .. }
            | TransportEvent::CraneStateChanged { at, .. }
            | TransportEvent::HeatDelivered { at, .. }
            | TransportEvent::DeliveryRefused { at, .. }
            | TransportEvent::CraneFault { at, .. }
            | TransportEvent::DeadlockWarning { at, .. } => *at,
        }
    }
}

impl EventKind {
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity ring buffer. When full, the oldest event is dropped.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<Option<TransportEvent>>,
    /// Next write position.
    head: usize,
    len: usize,
    total_written: u64,
}

impl EventBuffer {
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_written: 0,
        }
    }

    pub fn push(&mut self, event: TransportEvent) {
        self.events[self.head] = Some(event);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total events written since creation, including dropped ones.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    pub fn dropped_count(&self) -> u64 {
        self.total_written.saturating_sub(self.capacity() as u64)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> EventBufferIter<'_> {
        // Once full, `head` is the next write slot and also the oldest entry.
        let start = if self.len < self.capacity() { 0 } else { self.head };
        EventBufferIter {
            buffer: self,
            index: start,
            remaining: self.len,
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

/// Iterator over an [`EventBuffer`], oldest to newest.
pub struct EventBufferIter<'a> {
    buffer: &'a EventBuffer,
    index: usize,
    remaining: usize,
}

impl<'a> Iterator for EventBufferIter<'a> {
    type Item = &'a TransportEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let event = self.buffer.events[self.index].as_ref();
        self.index = (self.index + 1) % self.buffer.capacity();
        self.remaining -= 1;
        event
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for EventBufferIter<'_> {}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&TransportEvent)>;

/// Buffer, per-kind listeners, and suppression flags.
pub struct EventBus {
    buffer: EventBuffer,
    suppressed: [bool; EVENT_KIND_COUNT],
    listeners: [Vec<PassiveListener>; EVENT_KIND_COUNT],
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("buffer", &self.buffer)
            .field("suppressed", &self.suppressed)
            .finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: EventBuffer::new(capacity),
            suppressed: [false; EVENT_KIND_COUNT],
            listeners: Default::default(),
        }
    }

    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
    }

    pub fn unsuppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = false;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Deliver to listeners of the event's kind, then buffer it.
    pub fn emit(&mut self, event: TransportEvent) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        for listener in &mut self.listeners[idx] {
            listener(&event);
        }
        self.buffer.push(event);
    }

    /// Register a passive listener. Listeners run in registration order.
    pub fn on(&mut self, kind: EventKind, listener: PassiveListener) {
        self.listeners[kind.index()].push(listener);
    }

    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    /// Buffered events, oldest first.
    pub fn iter(&self) -> EventBufferIter<'_> {
        self.buffer.iter()
    }

    /// Buffered events of one kind, oldest first.
    pub fn of_kind(&self, kind: EventKind) -> impl Iterator<Item = &TransportEvent> + '_ {
        self.buffer.iter().filter(move |e| e.kind() == kind)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
