//! Ladle cars: wheeled carriers that move one heat between bays.
//!
//! A car runs `Idle -> Loading -> Moving -> Unloading -> Idle`. At each end
//! it polls the dispatcher's crane pool for a free crane in its current
//! bay, hands the crane a ladle task, and waits for the crane's estimate.
//! Between the ends it walks its path one segment at a time.

use std::fmt;

use meltshop_core::config::{CarConfig, CarType, ConfigError, FleetEntry};
use meltshop_core::geometry::Position;
use meltshop_core::id::{BayId, CarId, EquipmentId, HeatId, RequestId, StationId};
use meltshop_core::sim::{Duration, SimTime, Step};
use meltshop_core::station::{Heat, Ladle, Station};
use meltshop_spatial::path::is_valid_path;
use meltshop_spatial::{PathSegment, SpatialService};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use tracing::{debug, error, info, warn};

use crate::crane::CraneTask;
use crate::dispatcher::{CraneOperation, CranePool};
use crate::event::{EventBus, TransportEvent};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CarStatus {
    Idle,
    Loading,
    Moving,
    Unloading,
}

impl CarStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CarStatus::Idle => "idle",
            CarStatus::Loading => "loading",
            CarStatus::Moving => "moving",
            CarStatus::Unloading => "unloading",
        }
    }
}

impl fmt::Display for CarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The station-to-station part of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportLeg {
    pub request: RequestId,
    pub pickup: StationId,
    pub drop_off: StationId,
    pub to_bay: BayId,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CarError {
    #[error("car {car} is {status}, not idle")]
    NotIdle { car: String, status: CarStatus },
    #[error("no usable path from {from} to {to}")]
    InvalidPath { from: BayId, to: BayId },
    #[error("destination station {0:?} is not registered")]
    UnknownStation(StationId),
    #[error("car is {0} without an assignment")]
    NoAssignment(CarStatus),
}

/// A refused assignment. The heat goes back to the caller.
#[derive(Debug)]
pub struct Rejected {
    pub heat: Box<dyn Heat>,
    pub reason: CarError,
}

/// What a car may touch during its turn.
pub struct CarCtx<'a> {
    pub spatial: &'a mut SpatialService,
    pub cranes: &'a mut CranePool,
    pub stations: &'a mut SlotMap<StationId, Box<dyn Station>>,
    pub events: &'a mut EventBus,
    /// Set when the car becomes available for dispatch during this turn.
    pub became_idle: bool,
}

// ---------------------------------------------------------------------------
// Car
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Car {
    id: CarId,
    number: u32,
    name: String,
    car_type: CarType,
    home_bay: BayId,
    current_bay: BayId,
    config: CarConfig,
    status: CarStatus,
    position: Position,
    path: Vec<PathSegment>,
    segment_index: usize,
    heat: Option<Box<dyn Heat>>,
    ladle: Option<Ladle>,
    leg: Option<TransportLeg>,
    destination: Option<BayId>,
    total_distance: f64,
    awaiting: bool,
    cooling_down: bool,
}

impl Car {
    pub fn new(
        id: CarId,
        entry: &FleetEntry,
        position: Position,
        config: &CarConfig,
    ) -> Result<Self, ConfigError> {
        let retry = config.crane_retry_interval;
        if !(retry.is_finite() && retry > 0.0) {
            return Err(ConfigError::NonPositive {
                field: "car.crane_retry_interval",
                value: retry,
            });
        }
        let cooldown = config.error_cooldown;
        if !(cooldown.is_finite() && cooldown >= 0.0) {
            return Err(ConfigError::Negative {
                field: "car.error_cooldown",
                value: cooldown,
            });
        }
        let name = format!("{}Car_{}", entry.car_type.label(), entry.number);
        info!(car = %name, bay = %entry.home_bay, "car created");
        Ok(Self {
            id,
            number: entry.number,
            name,
            car_type: entry.car_type,
            home_bay: entry.home_bay.clone(),
            current_bay: entry.home_bay.clone(),
            config: config.clone(),
            status: CarStatus::Idle,
            position,
            path: Vec::new(),
            segment_index: 0,
            heat: None,
            ladle: None,
            leg: None,
            destination: None,
            total_distance: 0.0,
            awaiting: false,
            cooling_down: false,
        })
    }

    // -- Accessors --

    pub fn id(&self) -> CarId {
        self.id
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn car_type(&self) -> CarType {
        self.car_type
    }

    pub fn home_bay(&self) -> &BayId {
        &self.home_bay
    }

    pub fn current_bay(&self) -> &BayId {
        &self.current_bay
    }

    pub fn status(&self) -> CarStatus {
        self.status
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    pub fn segment_index(&self) -> usize {
        self.segment_index
    }

    pub fn heat_id(&self) -> Option<HeatId> {
        self.heat.as_ref().map(|h| h.id())
    }

    pub fn leg(&self) -> Option<&TransportLeg> {
        self.leg.as_ref()
    }

    pub fn destination(&self) -> Option<&BayId> {
        self.destination.as_ref()
    }

    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    pub fn ladle(&self) -> Option<&Ladle> {
        self.ladle.as_ref()
    }

    /// Idle and not sitting out an error cooldown.
    pub fn is_available(&self) -> bool {
        self.status == CarStatus::Idle && !self.cooling_down
    }

    pub fn has_work(&self) -> bool {
        self.status != CarStatus::Idle
    }

    /// Fraction of path segments completed.
    pub fn progress(&self) -> f64 {
        if self.path.is_empty() {
            0.0
        } else {
            self.segment_index as f64 / self.path.len() as f64
        }
    }

    // -- Ladle slot --

    pub fn take_ladle(&mut self) -> Option<Ladle> {
        self.ladle.take()
    }

    /// Accept a ladle from a crane; refused when one is already aboard.
    pub fn receive_ladle(&mut self, ladle: Ladle) -> bool {
        if self.ladle.is_some() {
            return false;
        }
        self.ladle = Some(ladle);
        true
    }

    // -- Assignment --

    /// Take on a heat bound for `leg.to_bay`.
    ///
    /// Refused, with all car state untouched, unless the car is available
    /// and a valid path exists from its current bay.
    pub fn assign_heat(
        &mut self,
        now: SimTime,
        heat: Box<dyn Heat>,
        leg: TransportLeg,
        spatial: &mut SpatialService,
        events: &mut EventBus,
    ) -> Result<(), Rejected> {
        if !self.is_available() {
            warn!(car = %self.name, status = %self.status, heat = %heat.id(), "busy, cannot take heat");
            let reason = CarError::NotIdle {
                car: self.name.clone(),
                status: self.status,
            };
            return Err(Rejected { heat, reason });
        }
        let path = spatial.path_between_bays(&self.current_bay, &leg.to_bay, self.car_type);
        if !is_valid_path(&path) {
            error!(car = %self.name, from = %self.current_bay, to = %leg.to_bay, "invalid path");
            let reason = CarError::InvalidPath {
                from: self.current_bay.clone(),
                to: leg.to_bay.clone(),
            };
            return Err(Rejected { heat, reason });
        }

        info!(
            car = %self.name,
            heat = %heat.id(),
            from = %self.current_bay,
            to = %leg.to_bay,
            segments = path.len(),
            "heat assigned"
        );
        self.path = path;
        self.segment_index = 0;
        self.destination = Some(leg.to_bay.clone());
        self.leg = Some(leg);
        self.heat = Some(heat);
        self.awaiting = false;
        self.set_status(now, CarStatus::Loading, events);
        Ok(())
    }

    /// Drive back to the home bay without a heat.
    pub fn return_home(
        &mut self,
        now: SimTime,
        spatial: &mut SpatialService,
        events: &mut EventBus,
    ) -> Result<(), CarError> {
        if !self.is_available() {
            return Err(CarError::NotIdle {
                car: self.name.clone(),
                status: self.status,
            });
        }
        let path = spatial.path_between_bays(&self.current_bay, &self.home_bay, self.car_type);
        if !is_valid_path(&path) {
            return Err(CarError::InvalidPath {
                from: self.current_bay.clone(),
                to: self.home_bay.clone(),
            });
        }
        debug!(car = %self.name, home = %self.home_bay, "returning home");
        self.path = path;
        self.segment_index = 0;
        self.destination = Some(self.home_bay.clone());
        self.awaiting = false;
        self.set_status(now, CarStatus::Moving, events);
        Ok(())
    }

    // -- Turn --

    /// Run until the next timed wait. Failures are logged and force the
    /// car back to `Idle`, dropping its heat, followed by a cooldown.
    pub fn resume(&mut self, now: SimTime, ctx: &mut CarCtx<'_>) -> Step {
        match self.advance(now, ctx) {
            Ok(step) => step,
            Err(err) => self.fail(now, err, ctx),
        }
    }

    fn advance(&mut self, now: SimTime, ctx: &mut CarCtx<'_>) -> Result<Step, CarError> {
        loop {
            match (self.status, self.awaiting) {
                (CarStatus::Idle, _) => {
                    if self.cooling_down {
                        self.cooling_down = false;
                        ctx.became_idle = true;
                        debug!(car = %self.name, %now, "cooldown over");
                    }
                    return Ok(Step::Passivate);
                }
                (CarStatus::Loading, false) => {
                    let leg = self.active_leg()?;
                    let task = CraneTask {
                        source: EquipmentId::Station(leg.pickup),
                        destination: EquipmentId::Car(self.id),
                        priority: leg.priority,
                    };
                    return Ok(self.call_crane(now, task, CraneOperation::Loading, ctx));
                }
                (CarStatus::Loading, true) => {
                    self.awaiting = false;
                    self.set_status(now, CarStatus::Moving, ctx.events);
                }
                (CarStatus::Moving, false) => {
                    if let Some(segment) = self.path.get(self.segment_index) {
                        self.awaiting = true;
                        return Ok(Step::Hold(segment.travel_time));
                    }
                    self.arrive(now, ctx)?;
                    if self.status == CarStatus::Idle {
                        return Ok(Step::Passivate);
                    }
                }
                (CarStatus::Moving, true) => {
                    self.awaiting = false;
                    self.complete_segment(now, ctx.spatial);
                }
                (CarStatus::Unloading, false) => {
                    let leg = self.active_leg()?;
                    if !ctx.stations.contains_key(leg.drop_off) {
                        return Err(CarError::UnknownStation(leg.drop_off));
                    }
                    let task = CraneTask {
                        source: EquipmentId::Car(self.id),
                        destination: EquipmentId::Station(leg.drop_off),
                        priority: leg.priority,
                    };
                    return Ok(self.call_crane(now, task, CraneOperation::Unloading, ctx));
                }
                (CarStatus::Unloading, true) => {
                    self.awaiting = false;
                    self.deliver(now, ctx)?;
                    self.finish(now, ctx);
                    return Ok(Step::Passivate);
                }
            }
        }
    }

    fn active_leg(&self) -> Result<TransportLeg, CarError> {
        self.leg.clone().ok_or(CarError::NoAssignment(self.status))
    }

    /// Poll for a free crane in the current bay. Without one, back off and
    /// ask again; with one, hold for the crane's estimate.
    fn call_crane(
        &mut self,
        now: SimTime,
        task: CraneTask,
        operation: CraneOperation,
        ctx: &mut CarCtx<'_>,
    ) -> Step {
        let Some(crane) = ctx.cranes.request_crane(&self.current_bay, operation) else {
            debug!(car = %self.name, bay = %self.current_bay, ?operation, "no crane free, retrying");
            return Step::Hold(self.config.crane_retry_interval);
        };
        let admission = ctx.cranes.assign(crane, now, task, ctx.spatial, ctx.events);
        let wait: Duration = admission.estimate();
        info!(car = %self.name, ?operation, ?admission, wait, "crane engaged");
        self.awaiting = true;
        Step::Hold(wait)
    }

    fn complete_segment(&mut self, now: SimTime, spatial: &mut SpatialService) {
        let Some(segment) = self.path.get(self.segment_index).copied() else {
            return;
        };
        self.position = segment.to;
        self.segment_index += 1;
        self.total_distance += segment.distance;
        if let Some(heat) = self.heat.as_mut() {
            heat.update_temperature(now);
        }
        if let Err(err) = spatial.relocate_equipment(EquipmentId::Car(self.id), segment.to) {
            warn!(car = %self.name, error = %err, "position not tracked");
        }
        debug!(
            car = %self.name,
            segment = self.segment_index,
            of = self.path.len(),
            x = segment.to.x,
            y = segment.to.y,
            "segment done"
        );
    }

    fn arrive(&mut self, now: SimTime, ctx: &mut CarCtx<'_>) -> Result<(), CarError> {
        let bay = self
            .destination
            .clone()
            .ok_or(CarError::NoAssignment(self.status))?;
        info!(car = %self.name, %bay, %now, "arrived");
        self.current_bay = bay;
        if self.heat.is_some() {
            self.set_status(now, CarStatus::Unloading, ctx.events);
        } else {
            self.finish(now, ctx);
        }
        Ok(())
    }

    fn deliver(&mut self, now: SimTime, ctx: &mut CarCtx<'_>) -> Result<(), CarError> {
        let leg = self.active_leg()?;
        let station = ctx
            .stations
            .get_mut(leg.drop_off)
            .ok_or(CarError::UnknownStation(leg.drop_off))?;
        let Some(heat) = self.heat.take() else {
            warn!(car = %self.name, "unloading without a heat");
            return Ok(());
        };
        let heat_id = heat.id();
        let (car, station_id) = (self.id, leg.drop_off);
        if station.add_heat(heat) {
            info!(car = %self.name, heat = %heat_id, station = station.name(), "heat delivered");
            ctx.events.emit(TransportEvent::HeatDelivered {
                heat: heat_id,
                car,
                station: station_id,
                at: now,
            });
        } else {
            warn!(car = %self.name, heat = %heat_id, station = station.name(), "station refused heat");
            ctx.events.emit(TransportEvent::DeliveryRefused {
                heat: heat_id,
                car,
                station: station_id,
                at: now,
            });
        }
        Ok(())
    }

    /// Clear the assignment and report idle.
    fn finish(&mut self, now: SimTime, ctx: &mut CarCtx<'_>) {
        self.leg = None;
        self.destination = None;
        self.path.clear();
        self.segment_index = 0;
        self.set_status(now, CarStatus::Idle, ctx.events);
        ctx.became_idle = true;
    }

    fn fail(&mut self, now: SimTime, err: CarError, ctx: &mut CarCtx<'_>) -> Step {
        error!(car = %self.name, status = %self.status, %now, error = %err, "car turn failed");
        if let Some(heat) = self.heat.take() {
            warn!(car = %self.name, heat = %heat.id(), "heat dropped from transport");
        }
        self.leg = None;
        self.destination = None;
        self.path.clear();
        self.segment_index = 0;
        self.awaiting = false;
        self.cooling_down = true;
        self.set_status(now, CarStatus::Idle, ctx.events);
        Step::Hold(self.config.error_cooldown)
    }

    fn set_status(&mut self, now: SimTime, to: CarStatus, events: &mut EventBus) {
        let from = self.status;
        if from == to {
            return;
        }
        debug!(car = %self.name, %from, %to, %now, "car status");
        events.emit(TransportEvent::CarStatusChanged {
            car: self.id,
            from,
            to,
            at: now,
        });
        self.status = to;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
