//! Bay-confined overhead crane.
//!
//! A crane runs `Idle -> Moving -> Lifting -> Moving -> Lowering -> Idle`
//! for each task: travel to the source, lift the ladle, travel to the
//! destination, lower it. Any failure inside a phase sends the crane to
//! `Error`, where it holds for the configured cooldown, drops its task and
//! returns to `Idle`.
//!
//! Work arrives through [`Crane::assign_task`]. A crane that is busy, or
//! already has queued work, queues the task instead of interrupting the
//! active one; an idle crane pops its queue by priority, ties by arrival.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use meltshop_core::config::{ConfigError, CraneConfig};
use meltshop_core::geometry::Position;
use meltshop_core::id::{BayId, CraneId, EquipmentId};
use meltshop_core::sim::{Duration, SimTime, Step};
use meltshop_core::station::{Ladle, StationError};
use meltshop_spatial::SpatialService;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::event::{EventBus, TransportEvent};
use crate::metrics::{CraneMetrics, PhaseHistory};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CraneState {
    Idle,
    Moving,
    Lifting,
    Lowering,
    Error,
}

impl CraneState {
    pub fn as_str(self) -> &'static str {
        match self {
            CraneState::Idle => "idle",
            CraneState::Moving => "moving",
            CraneState::Lifting => "lifting",
            CraneState::Lowering => "lowering",
            CraneState::Error => "error",
        }
    }

    pub fn is_busy(self) -> bool {
        self != CraneState::Idle
    }
}

impl fmt::Display for CraneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Move the ladle at `source` to `destination`. Higher priority runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CraneTask {
    pub source: EquipmentId,
    pub destination: EquipmentId,
    pub priority: i32,
}

/// Outcome of [`Crane::assign_task`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskAdmission {
    /// The crane started the task; `estimate` covers travel to the source
    /// plus the nominal lift and lower overhead.
    Started { estimate: Duration },
    /// The crane was busy and queued the task.
    Queued,
    /// An endpoint lies outside the crane's bay.
    Rejected,
}

impl TaskAdmission {
    /// Minutes the caller should wait; 0 unless the task started.
    pub fn estimate(self) -> Duration {
        match self {
            TaskAdmission::Started { estimate } => estimate,
            TaskAdmission::Queued | TaskAdmission::Rejected => 0.0,
        }
    }
}

/// Failures inside a crane phase. Caught by [`Crane::resume`] and turned
/// into the `Error` state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CraneError {
    #[error("no unit registered at {0:?}")]
    UnknownUnit(EquipmentId),
    #[error(transparent)]
    Station(#[from] StationError),
    #[error("crane is {0} without an active task")]
    NoActiveTask(CraneState),
}

/// Ladle handover at either end of a crane task.
pub trait LadleHandoff {
    /// Take the ladle at `from`. `Ok(None)` when there is none.
    fn take_ladle(&mut self, from: EquipmentId) -> Result<Option<Ladle>, CraneError>;

    /// Set the ladle down at `to`. `Ok(false)` when the unit refuses it.
    fn give_ladle(&mut self, to: EquipmentId, ladle: Ladle) -> Result<bool, CraneError>;
}

/// What a crane may touch during its turn.
pub struct CraneCtx<'a> {
    pub spatial: &'a SpatialService,
    pub units: &'a mut dyn LadleHandoff,
    pub events: &'a mut EventBus,
}

#[derive(Debug, Clone, Copy)]
struct QueuedTask {
    task: CraneTask,
    seq: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    /// Max-heap order: higher priority first, then earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

type PositionPair = ((u64, u64), (u64, u64));

// ---------------------------------------------------------------------------
// Crane
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Crane {
    id: CraneId,
    name: String,
    bay: BayId,
    config: CraneConfig,
    state: CraneState,
    position: Position,
    z_height: f64,
    current: Option<CraneTask>,
    ladle: Option<Ladle>,
    move_target: Option<Position>,
    /// The timed wait of the current phase has been issued.
    awaiting: bool,
    queue: BinaryHeap<QueuedTask>,
    next_seq: u64,
    state_since: SimTime,
    busy_time: Duration,
    deadlock_warned: bool,
    move_cache: HashMap<PositionPair, Duration>,
    tasks_completed: u64,
    errors: u64,
    moving: PhaseHistory,
    lifting: PhaseHistory,
    lowering: PhaseHistory,
}

impl Crane {
    /// A crane parked at `home`. `number` is 1-based within the bay.
    pub fn new(
        id: CraneId,
        bay: BayId,
        number: u32,
        home: Position,
        config: &CraneConfig,
    ) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("crane.speed", config.speed),
            ("crane.acceleration", config.acceleration),
            ("crane.hoist_speed", config.hoist_speed),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        Ok(Self {
            id,
            name: format!("{bay}_crane_{number}"),
            bay,
            config: config.clone(),
            state: CraneState::Idle,
            position: home,
            z_height: 0.0,
            current: None,
            ladle: None,
            move_target: None,
            awaiting: false,
            queue: BinaryHeap::new(),
            next_seq: 0,
            state_since: SimTime::ZERO,
            busy_time: 0.0,
            deadlock_warned: false,
            move_cache: HashMap::new(),
            tasks_completed: 0,
            errors: 0,
            moving: PhaseHistory::default(),
            lifting: PhaseHistory::default(),
            lowering: PhaseHistory::default(),
        })
    }

    // -- Accessors --

    pub fn id(&self) -> CraneId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bay(&self) -> &BayId {
        &self.bay
    }

    pub fn state(&self) -> CraneState {
        self.state
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn z_height(&self) -> f64 {
        self.z_height
    }

    pub fn current_task(&self) -> Option<&CraneTask> {
        self.current.as_ref()
    }

    pub fn carried_ladle(&self) -> Option<&Ladle> {
        self.ladle.as_ref()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued tasks in the order they will be served.
    pub fn queued_tasks(&self) -> Vec<CraneTask> {
        let mut queued: Vec<_> = self.queue.iter().copied().collect();
        queued.sort_by(|a, b| b.cmp(a));
        queued.into_iter().map(|q| q.task).collect()
    }

    /// Idle with nothing queued.
    pub fn is_available(&self) -> bool {
        self.state == CraneState::Idle && self.queue.is_empty()
    }

    /// Whether the crane needs a turn.
    pub fn has_work(&self) -> bool {
        self.state.is_busy() || !self.queue.is_empty()
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }

    pub fn error_count(&self) -> u64 {
        self.errors
    }

    /// Busy minutes up to `now`, including the phase in progress.
    pub fn busy_time(&self, now: SimTime) -> Duration {
        if self.state.is_busy() {
            self.busy_time + now.since(self.state_since)
        } else {
            self.busy_time
        }
    }

    pub fn utilization(&self, now: SimTime) -> f64 {
        if now.minutes() > 0.0 {
            self.busy_time(now) / now.minutes()
        } else {
            0.0
        }
    }

    pub fn metrics(&self, now: SimTime) -> CraneMetrics {
        CraneMetrics {
            crane: self.id,
            name: self.name.clone(),
            bay: self.bay.clone(),
            state: self.state,
            utilization: self.utilization(now),
            busy_time: self.busy_time(now),
            tasks_completed: self.tasks_completed,
            errors: self.errors,
            queue_length: self.queue.len(),
            avg_moving: self.moving.mean(),
            avg_lifting: self.lifting.mean(),
            avg_lowering: self.lowering.mean(),
        }
    }

    // -- Timing model --

    /// Travel time under a trapezoidal velocity profile. Cached in both
    /// directions.
    pub fn movement_time(&mut self, from: Position, to: Position) -> Duration {
        let key = (from.to_bits(), to.to_bits());
        if let Some(&t) = self.move_cache.get(&key) {
            return t;
        }
        let distance = from.distance(&to);
        let (v, a) = (self.config.speed, self.config.acceleration);
        let t_accel = v / a;
        let d_accel = 0.5 * a * t_accel * t_accel;
        let time = if distance < 2.0 * d_accel {
            (2.0 * distance / a).sqrt()
        } else {
            2.0 * t_accel + (distance - 2.0 * d_accel) / v
        };
        self.move_cache.insert(key, time);
        self.move_cache.insert((key.1, key.0), time);
        time
    }

    pub fn cached_movement_time(&self, from: Position, to: Position) -> Option<Duration> {
        self.move_cache.get(&(from.to_bits(), to.to_bits())).copied()
    }

    fn hoist_time(&self, base: Duration) -> Duration {
        (self.z_height - self.config.lift_height).abs() / self.config.hoist_speed + base
    }

    // -- Task admission --

    /// Offer a task. Busy or queued cranes queue it and return
    /// [`TaskAdmission::Queued`]; an idle crane validates both endpoints
    /// against its bay and starts moving.
    pub fn assign_task(
        &mut self,
        now: SimTime,
        task: CraneTask,
        spatial: &SpatialService,
        events: &mut EventBus,
    ) -> TaskAdmission {
        if self.state.is_busy() || !self.queue.is_empty() {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.queue.push(QueuedTask { task, seq });
            debug!(crane = %self.name, priority = task.priority, queued = self.queue.len(), "task queued");
            return TaskAdmission::Queued;
        }
        if !self.accepts(&task, spatial) {
            error!(crane = %self.name, bay = %self.bay, ?task, "task endpoints outside crane bay");
            return TaskAdmission::Rejected;
        }
        let source = spatial.equipment_position(task.source);
        let estimate = self.movement_time(self.position, source) + self.config.task_overhead;
        self.begin(now, task, events);
        TaskAdmission::Started { estimate }
    }

    fn accepts(&self, task: &CraneTask, spatial: &SpatialService) -> bool {
        spatial.is_in_bay(task.source, &self.bay) && spatial.is_in_bay(task.destination, &self.bay)
    }

    fn begin(&mut self, now: SimTime, task: CraneTask, events: &mut EventBus) {
        info!(crane = %self.name, %now, source = ?task.source, destination = ?task.destination, "task started");
        self.current = Some(task);
        self.awaiting = false;
        self.move_target = None;
        self.transition(now, CraneState::Moving, events);
    }

    fn next_valid_task(&mut self, spatial: &SpatialService) -> Option<CraneTask> {
        while let Some(queued) = self.queue.pop() {
            if self.accepts(&queued.task, spatial) {
                return Some(queued.task);
            }
            error!(crane = %self.name, task = ?queued.task, "dropping queued task outside crane bay");
        }
        None
    }

    fn active_task(&self) -> Result<CraneTask, CraneError> {
        self.current.ok_or(CraneError::NoActiveTask(self.state))
    }

    // -- Turn --

    /// Run until the next timed wait. Phase failures never escape: they
    /// are logged and converted into the `Error` cooldown.
    pub fn resume(&mut self, now: SimTime, ctx: &mut CraneCtx<'_>) -> Step {
        self.check_deadlock(now, ctx.events);
        match self.advance(now, ctx) {
            Ok(step) => step,
            Err(err) => self.fail(now, err, ctx.events),
        }
    }

    fn advance(&mut self, now: SimTime, ctx: &mut CraneCtx<'_>) -> Result<Step, CraneError> {
        loop {
            match (self.state, self.awaiting) {
                (CraneState::Idle, _) => {
                    let Some(task) = self.next_valid_task(ctx.spatial) else {
                        return Ok(Step::Passivate);
                    };
                    self.begin(now, task, ctx.events);
                }
                (CraneState::Moving, false) => {
                    let task = self.active_task()?;
                    let target_id = if self.ladle.is_none() {
                        task.source
                    } else {
                        task.destination
                    };
                    let target = ctx.spatial.equipment_position(target_id);
                    let travel = self.movement_time(self.position, target);
                    self.move_target = Some(target);
                    self.awaiting = true;
                    return Ok(Step::Hold(travel));
                }
                (CraneState::Moving, true) => {
                    self.awaiting = false;
                    if let Some(target) = self.move_target.take() {
                        self.position = target;
                    }
                    let next = if self.ladle.is_none() {
                        CraneState::Lifting
                    } else {
                        CraneState::Lowering
                    };
                    self.transition(now, next, ctx.events);
                }
                (CraneState::Lifting, false) => {
                    self.awaiting = true;
                    return Ok(Step::Hold(self.hoist_time(self.config.lift_base_time)));
                }
                (CraneState::Lifting, true) => {
                    self.awaiting = false;
                    let source = self.active_task()?.source;
                    match ctx.units.take_ladle(source)? {
                        Some(ladle) => {
                            debug!(crane = %self.name, ladle = ?ladle.id, "ladle lifted");
                            self.ladle = Some(ladle);
                            self.transition(now, CraneState::Moving, ctx.events);
                        }
                        None => {
                            warn!(crane = %self.name, ?source, "no ladle at source, abandoning task");
                            self.current = None;
                            self.transition(now, CraneState::Idle, ctx.events);
                        }
                    }
                }
                (CraneState::Lowering, false) => {
                    self.awaiting = true;
                    return Ok(Step::Hold(self.hoist_time(self.config.lower_base_time)));
                }
                (CraneState::Lowering, true) => {
                    self.awaiting = false;
                    let destination = self.active_task()?.destination;
                    if let Some(ladle) = self.ladle.take() {
                        let id = ladle.id;
                        if ctx.units.give_ladle(destination, ladle)? {
                            debug!(crane = %self.name, ladle = ?id, ?destination, "ladle lowered");
                        } else {
                            warn!(crane = %self.name, ladle = ?id, ?destination, "destination refused ladle");
                        }
                    }
                    self.current = None;
                    self.tasks_completed += 1;
                    self.transition(now, CraneState::Idle, ctx.events);
                }
                (CraneState::Error, false) => {
                    self.awaiting = true;
                    return Ok(Step::Hold(self.config.error_cooldown));
                }
                (CraneState::Error, true) => {
                    self.awaiting = false;
                    self.current = None;
                    self.ladle = None;
                    self.move_target = None;
                    info!(crane = %self.name, %now, "recovered from error");
                    self.transition(now, CraneState::Idle, ctx.events);
                }
            }
        }
    }

    fn fail(&mut self, now: SimTime, err: CraneError, events: &mut EventBus) -> Step {
        error!(crane = %self.name, state = %self.state, %now, error = %err, "crane phase failed");
        self.errors += 1;
        events.emit(TransportEvent::CraneFault {
            crane: self.id,
            message: err.to_string(),
            at: now,
        });
        self.move_target = None;
        self.transition(now, CraneState::Error, events);
        self.awaiting = true;
        Step::Hold(self.config.error_cooldown)
    }

    fn check_deadlock(&mut self, now: SimTime, events: &mut EventBus) {
        if !self.state.is_busy() || self.deadlock_warned {
            return;
        }
        let stuck_for = now.since(self.state_since);
        if stuck_for > self.config.deadlock_timeout {
            warn!(crane = %self.name, state = %self.state, stuck_for, "possible deadlock");
            events.emit(TransportEvent::DeadlockWarning {
                crane: self.id,
                state: self.state,
                stuck_for,
                at: now,
            });
            self.deadlock_warned = true;
        }
    }

    fn transition(&mut self, now: SimTime, to: CraneState, events: &mut EventBus) {
        let from = self.state;
        if from == to {
            return;
        }
        let elapsed = now.since(self.state_since);
        if from.is_busy() {
            self.busy_time += elapsed;
        }
        match from {
            CraneState::Moving => self.moving.push(elapsed),
            CraneState::Lifting => self.lifting.push(elapsed),
            CraneState::Lowering => self.lowering.push(elapsed),
            CraneState::Idle | CraneState::Error => {}
        }
        debug!(crane = %self.name, %from, %to, %now, "crane state");
        events.emit(TransportEvent::CraneStateChanged {
            crane: self.id,
            from,
            to,
            at: now,
        });
        self.state = to;
        self.state_since = now;
        self.deadlock_warned = false;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
