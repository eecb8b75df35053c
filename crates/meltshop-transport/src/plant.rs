//! The plant: owns the clock, the agenda, and every agent, and runs agent
//! turns one wake-up at a time.
//!
//! Each turn runs synchronously until the agent returns a [`Step`]. A
//! `Hold` re-schedules the agent; `Passivate` leaves it without a wake-up
//! until new work arrives. After every turn and every external call the
//! plant activates, at the current instant, each agent that has work but no
//! pending wake-up. Simultaneous wake-ups run in scheduling order, so the
//! same inputs always replay identically.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use meltshop_core::config::{ConfigError, PlantConfig};
use meltshop_core::geometry::Position;
use meltshop_core::id::{BayId, CarId, CraneId, EquipmentId, HeatId, RequestId, StationId};
use meltshop_core::sim::{Agenda, Duration, SimState, SimTime, StateHash, Step};
use meltshop_core::station::{Heat, Ladle, Station};
use meltshop_spatial::{SpatialError, SpatialService};
use slotmap::SlotMap;
use tracing::{debug, info, trace};

use crate::car::{Car, CarCtx, CarError};
use crate::crane::{CraneCtx, CraneError, CraneTask, LadleHandoff, TaskAdmission};
use crate::dispatcher::{Dispatcher, Route};
use crate::event::EventBus;
use crate::metrics::CraneMetrics;
use crate::query::{PlantStatus, TransportStatus};

#[derive(Debug, thiserror::Error)]
pub enum PlantError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown station {0:?}")]
    UnknownStation(StationId),
    #[error("station '{station}' could not be placed: {source}")]
    Placement { station: String, source: SpatialError },
    #[error("unknown crane {0:?}")]
    UnknownCrane(CraneId),
    #[error("unknown car {0:?}")]
    UnknownCar(CarId),
    #[error(transparent)]
    Car(#[from] CarError),
}

/// An agent on the agenda.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKey {
    Crane(CraneId),
    Car(CarId),
}

/// Ladle handover between stations and cars, seen from a crane.
struct Units<'a> {
    stations: &'a mut SlotMap<StationId, Box<dyn Station>>,
    cars: &'a mut SlotMap<CarId, Car>,
}

impl LadleHandoff for Units<'_> {
    fn take_ladle(&mut self, from: EquipmentId) -> Result<Option<Ladle>, CraneError> {
        match from {
            EquipmentId::Station(id) => {
                let station = self.stations.get_mut(id).ok_or(CraneError::UnknownUnit(from))?;
                Ok(station.take_ladle()?)
            }
            EquipmentId::Car(id) => {
                let car = self.cars.get_mut(id).ok_or(CraneError::UnknownUnit(from))?;
                Ok(car.take_ladle())
            }
        }
    }

    fn give_ladle(&mut self, to: EquipmentId, ladle: Ladle) -> Result<bool, CraneError> {
        match to {
            EquipmentId::Station(id) => {
                let station = self.stations.get_mut(id).ok_or(CraneError::UnknownUnit(to))?;
                Ok(station.add_ladle(ladle)?)
            }
            EquipmentId::Car(id) => {
                let car = self.cars.get_mut(id).ok_or(CraneError::UnknownUnit(to))?;
                Ok(car.receive_ladle(ladle))
            }
        }
    }
}

pub struct Plant {
    config: Arc<PlantConfig>,
    state: SimState,
    agenda: Agenda<AgentKey>,
    scheduled: HashSet<AgentKey>,
    spatial: SpatialService,
    dispatcher: Dispatcher,
    stations: SlotMap<StationId, Box<dyn Station>>,
    events: EventBus,
}

impl std::fmt::Debug for Plant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plant")
            .field("state", &self.state)
            .field("agenda", &self.agenda.len())
            .field("stations", &self.stations.len())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Plant {
    pub fn new(config: PlantConfig) -> Result<Self, PlantError> {
        let config = Arc::new(config);
        let mut spatial = SpatialService::new(Arc::clone(&config))?;
        let dispatcher = Dispatcher::new(Arc::clone(&config), &mut spatial)?;
        info!(bays = config.bays.len(), "plant ready");
        Ok(Self {
            config,
            state: SimState::new(),
            agenda: Agenda::new(),
            scheduled: HashSet::new(),
            spatial,
            dispatcher,
            stations: SlotMap::with_key(),
            events: EventBus::default(),
        })
    }

    // -- Setup --

    /// Register a station at `position`, which must lie in the station's bay.
    pub fn add_station(
        &mut self,
        station: Box<dyn Station>,
        position: Position,
    ) -> Result<StationId, PlantError> {
        let bay = station.bay().clone();
        let name = station.name().to_string();
        let id = self.stations.insert(station);
        if let Err(source) = self
            .spatial
            .place_equipment(EquipmentId::Station(id), &bay, position)
        {
            self.stations.remove(id);
            return Err(PlantError::Placement {
                station: name,
                source,
            });
        }
        debug!(station = %name, %bay, "station added");
        Ok(id)
    }

    // -- Operations --

    /// Queue a heat for transport between two registered stations.
    pub fn request_transport(
        &mut self,
        heat: Box<dyn Heat>,
        from: StationId,
        to: StationId,
        priority: i32,
    ) -> Result<RequestId, PlantError> {
        let pickup = self.stations.get(from).ok_or(PlantError::UnknownStation(from))?;
        let drop_off = self.stations.get(to).ok_or(PlantError::UnknownStation(to))?;
        let route = Route {
            from_station: from,
            from_bay: pickup.bay().clone(),
            to_station: to,
            to_bay: drop_off.bay().clone(),
            to_caster: drop_off.is_caster(),
        };
        let id = self.dispatcher.request_transport(
            self.state.now,
            heat,
            route,
            priority,
            &mut self.spatial,
            &mut self.events,
        );
        self.activate();
        Ok(id)
    }

    /// Hand a task straight to one crane.
    pub fn assign_crane_task(
        &mut self,
        crane: CraneId,
        task: CraneTask,
    ) -> Result<TaskAdmission, PlantError> {
        let target = self
            .dispatcher
            .cranes
            .get_mut(crane)
            .ok_or(PlantError::UnknownCrane(crane))?;
        let admission = target.assign_task(self.state.now, task, &self.spatial, &mut self.events);
        self.activate();
        Ok(admission)
    }

    /// Send an available car back to its home bay.
    pub fn return_car_home(&mut self, car: CarId) -> Result<(), PlantError> {
        let target = self
            .dispatcher
            .cars
            .get_mut(car)
            .ok_or(PlantError::UnknownCar(car))?;
        target.return_home(self.state.now, &mut self.spatial, &mut self.events)?;
        self.activate();
        Ok(())
    }

    // -- Scheduling --

    pub fn now(&self) -> SimTime {
        self.state.now
    }

    pub fn turns(&self) -> u64 {
        self.state.turns
    }

    /// Time of the next wake-up, if any agent is scheduled.
    pub fn next_wakeup(&self) -> Option<SimTime> {
        self.agenda.peek_time()
    }

    /// Run one agent turn. Returns `false` when nothing is scheduled.
    pub fn step(&mut self) -> bool {
        self.activate();
        let Some(wakeup) = self.agenda.pop() else {
            return false;
        };
        self.scheduled.remove(&wakeup.agent);
        if wakeup.at > self.state.now {
            self.state.now = wakeup.at;
        }
        self.state.turns += 1;
        let now = self.state.now;
        trace!(agent = ?wakeup.agent, %now, "turn");

        let step = match wakeup.agent {
            AgentKey::Crane(id) => self.crane_turn(id, now),
            AgentKey::Car(id) => self.car_turn(id, now),
        };
        if let Some(Step::Hold(wait)) = step {
            self.schedule(now + wait.max(0.0), wakeup.agent);
        }
        self.activate();
        true
    }

    /// Run every turn due at or before `until`, then advance the clock to
    /// `until`. Returns the number of turns run.
    pub fn run_until(&mut self, until: SimTime) -> u64 {
        let start = self.state.turns;
        self.activate();
        while self.agenda.peek_time().is_some_and(|t| t <= until) {
            self.step();
        }
        if until > self.state.now {
            self.state.now = until;
        }
        self.state.turns - start
    }

    pub fn run_for(&mut self, duration: Duration) -> u64 {
        self.run_until(self.state.now + duration)
    }

    fn schedule(&mut self, at: SimTime, agent: AgentKey) {
        if self.scheduled.insert(agent) {
            self.agenda.schedule(at, agent);
        }
    }

    /// Wake every agent that has work but no pending wake-up.
    fn activate(&mut self) {
        let now = self.state.now;
        let mut due: Vec<AgentKey> = self
            .dispatcher
            .cranes
            .iter()
            .filter(|c| c.has_work())
            .map(|c| AgentKey::Crane(c.id()))
            .collect();
        due.extend(
            self.dispatcher
                .cars
                .iter()
                .filter(|(_, c)| c.has_work())
                .map(|(id, _)| AgentKey::Car(id)),
        );
        for agent in due {
            self.schedule(now, agent);
        }
    }

    fn crane_turn(&mut self, id: CraneId, now: SimTime) -> Option<Step> {
        let crane = self.dispatcher.cranes.get_mut(id)?;
        let mut units = Units {
            stations: &mut self.stations,
            cars: &mut self.dispatcher.cars,
        };
        let mut ctx = CraneCtx {
            spatial: &self.spatial,
            units: &mut units,
            events: &mut self.events,
        };
        Some(crane.resume(now, &mut ctx))
    }

    fn car_turn(&mut self, id: CarId, now: SimTime) -> Option<Step> {
        let car = self.dispatcher.cars.get_mut(id)?;
        let mut ctx = CarCtx {
            spatial: &mut self.spatial,
            cranes: &mut self.dispatcher.cranes,
            stations: &mut self.stations,
            events: &mut self.events,
            became_idle: false,
        };
        let step = car.resume(now, &mut ctx);
        if ctx.became_idle {
            self.dispatcher
                .process_pending(now, &mut self.spatial, &mut self.events);
        }
        Some(step)
    }

    // -- Queries --

    pub fn config(&self) -> &PlantConfig {
        &self.config
    }

    pub fn spatial(&self) -> &SpatialService {
        &self.spatial
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn station(&self, id: StationId) -> Option<&dyn Station> {
        self.stations.get(id).map(|s| s.as_ref())
    }

    pub fn status(&self) -> PlantStatus {
        self.dispatcher.status(self.state.now)
    }

    pub fn crane_metrics(&self) -> Vec<CraneMetrics> {
        self.dispatcher.crane_metrics(self.state.now)
    }

    pub fn utilization(&self) -> f64 {
        self.dispatcher.utilization(self.state.now)
    }

    pub fn check_transport_status(&self, heat: HeatId) -> TransportStatus {
        self.dispatcher.check_transport_status(heat, self.state.now)
    }

    /// Per-bay footprint overlap of the cranes' current positions.
    pub fn crane_collisions(&self) -> BTreeMap<BayId, bool> {
        let positions: Vec<(BayId, Position)> = self
            .dispatcher
            .cranes
            .iter()
            .map(|c| (c.bay().clone(), c.position()))
            .collect();
        self.spatial.check_crane_collisions(&positions)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Fingerprint of clock and agent state.
    pub fn state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_f64(self.state.now.minutes());
        h.write_u64(self.state.turns);
        h.write_u64(self.dispatcher.pending_count() as u64);
        for crane in self.dispatcher.cranes.iter() {
            h.write_str(crane.name());
            h.write_str(crane.state().as_str());
            h.write_f64(crane.position().x);
            h.write_f64(crane.position().y);
            h.write_u64(crane.queue_len() as u64);
            h.write_u64(crane.tasks_completed());
            h.write_u64(crane.error_count());
        }
        for car in self.dispatcher.cars.values() {
            h.write_str(car.name());
            h.write_str(car.status().as_str());
            h.write_f64(car.position().x);
            h.write_f64(car.position().y);
            h.write_f64(car.total_distance());
            h.write_u64(car.heat_id().map_or(0, |heat| heat.0 + 1));
        }
        h.finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
