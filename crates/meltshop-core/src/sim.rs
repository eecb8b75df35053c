//! Simulated time, the wake-up agenda, and state fingerprinting.
//!
//! The simulation is a single cooperative scheduler. Agents (cranes, cars)
//! only yield at timed waits; each wait becomes one entry on the [`Agenda`].
//! Entries are ordered by `(time, sequence)` so wake-ups scheduled for the
//! same instant run in the order they were scheduled, which makes every run
//! of the same inputs replay identically.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Simulated durations are plain minutes.
pub type Duration = f64;

// ---------------------------------------------------------------------------
// SimTime
// ---------------------------------------------------------------------------

/// A point in simulated time, in minutes since the start of the run.
///
/// Totally ordered via [`f64::total_cmp`], so it can key heaps and maps.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(pub f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub fn minutes(self) -> f64 {
        self.0
    }

    /// Elapsed minutes since `earlier`, clamped at zero.
    pub fn since(self, earlier: SimTime) -> Duration {
        (self.0 - earlier.0).max(0.0)
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0 + rhs)
    }
}

impl Sub for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Duration {
        self.0 - rhs.0
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={:.2}min", self.0)
    }
}

// ---------------------------------------------------------------------------
// Agenda
// ---------------------------------------------------------------------------

/// One scheduled resumption of an agent.
#[derive(Debug, Clone)]
pub struct Wakeup<K> {
    pub at: SimTime,
    pub seq: u64,
    pub agent: K,
}

impl<K> PartialEq for Wakeup<K> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<K> Eq for Wakeup<K> {}

impl<K> PartialOrd for Wakeup<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Wakeup<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap of pending wake-ups keyed by `(time, insertion sequence)`.
#[derive(Debug)]
pub struct Agenda<K> {
    heap: BinaryHeap<Reverse<Wakeup<K>>>,
    next_seq: u64,
}

impl<K> Default for Agenda<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Agenda<K> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `agent` to resume at `at`. Returns the entry's sequence number.
    pub fn schedule(&mut self, at: SimTime, agent: K) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Wakeup { at, seq, agent }));
        seq
    }

    /// Remove and return the earliest wake-up.
    pub fn pop(&mut self) -> Option<Wakeup<K>> {
        self.heap.pop().map(|Reverse(w)| w)
    }

    /// Time of the earliest wake-up, if any.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|Reverse(w)| w.at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// What an agent asks of the scheduler at the end of its turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Resume the agent after this many minutes.
    Hold(Duration),
    /// No wake-up until new work arrives.
    Passivate,
}

// ---------------------------------------------------------------------------
// Simulation state
// ---------------------------------------------------------------------------

/// Mutable clock state owned by the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimState {
    /// Current simulated time.
    pub now: SimTime,
    /// Number of agent turns executed so far.
    pub turns: u64,
}

impl SimState {
    pub fn new() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A deterministic FNV-1a (64-bit) hash of plant state for replay checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    /// Feeds the exact bit pattern, so `0.1 + 0.2` and `0.3` hash differently.
    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write(s.as_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}
