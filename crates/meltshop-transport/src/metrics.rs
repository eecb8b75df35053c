//! Crane phase histories and metrics snapshots.

use meltshop_core::id::{BayId, CraneId};
use meltshop_core::sim::Duration;
use serde::{Deserialize, Serialize};

use crate::crane::CraneState;

/// Phase durations kept per crane and phase.
pub const PHASE_HISTORY_CAPACITY: usize = 128;

// ---------------------------------------------------------------------------
// PhaseHistory
// ---------------------------------------------------------------------------

/// A fixed-capacity ring buffer of phase durations. When full, the oldest
/// value is overwritten.
#[derive(Debug, Clone)]
pub struct PhaseHistory {
    data: Vec<Duration>,
    head: usize,
    len: usize,
    /// All durations ever recorded, including overwritten ones.
    total: Duration,
    count: u64,
}

impl PhaseHistory {
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: vec![0.0; capacity],
            head: 0,
            len: 0,
            total: 0.0,
            count: 0,
        }
    }

    pub fn push(&mut self, value: Duration) {
        let cap = self.data.len();
        self.data[self.head] = value;
        self.head = (self.head + 1) % cap;
        if self.len < cap {
            self.len += 1;
        }
        self.total += value;
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn latest(&self) -> Option<Duration> {
        if self.len == 0 {
            return None;
        }
        let cap = self.data.len();
        Some(self.data[(self.head + cap - 1) % cap])
    }

    /// Retained values, oldest first.
    pub fn to_vec(&self) -> Vec<Duration> {
        let cap = self.data.len();
        let start = if self.len < cap { 0 } else { self.head };
        (0..self.len).map(|i| self.data[(start + i) % cap]).collect()
    }

    /// Mean over every value ever recorded; 0 when empty.
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Default for PhaseHistory {
    fn default() -> Self {
        Self::new(PHASE_HISTORY_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Per-crane metrics as exposed to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CraneMetrics {
    pub crane: CraneId,
    pub name: String,
    pub bay: BayId,
    pub state: CraneState,
    /// `busy_time / elapsed`, 0 before any time has passed.
    pub utilization: f64,
    pub busy_time: Duration,
    pub tasks_completed: u64,
    pub errors: u64,
    pub queue_length: usize,
    pub avg_moving: Duration,
    pub avg_lifting: Duration,
    pub avg_lowering: Duration,
}
