//! Shared test helpers for unit tests, integration tests, and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so downstream
//! crates can enable them through the `test-utils` feature.

use std::cell::RefCell;
use std::rc::Rc;

use crate::config::{BayConfig, CarType, PlantConfig};
use crate::geometry::Position;
use crate::id::{BayId, HeatId, LadleId};
use crate::sim::SimTime;
use crate::station::{Heat, Ladle, Station, StationError};

// ===========================================================================
// Heats
// ===========================================================================

/// A heat that records every temperature update it receives.
#[derive(Debug)]
pub struct TestHeat {
    id: HeatId,
    updates: Rc<RefCell<Vec<SimTime>>>,
}

impl TestHeat {
    pub fn new(id: HeatId) -> Self {
        Self {
            id,
            updates: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Shared view of the update log; stays valid after the heat is boxed.
    pub fn updates(&self) -> Rc<RefCell<Vec<SimTime>>> {
        Rc::clone(&self.updates)
    }
}

impl Heat for TestHeat {
    fn id(&self) -> HeatId {
        self.id
    }

    fn update_temperature(&mut self, now: SimTime) {
        self.updates.borrow_mut().push(now);
    }
}

pub fn heat(id: u64) -> Box<dyn Heat> {
    Box::new(TestHeat::new(HeatId(id)))
}

// ===========================================================================
// Stations
// ===========================================================================

/// Everything a [`RecordingStation`] has seen.
#[derive(Debug, Default)]
pub struct StationLog {
    pub delivered: Vec<HeatId>,
    pub ladles_received: Vec<LadleId>,
    pub ladles_taken: Vec<LadleId>,
    pub add_heat_calls: usize,
}

/// A station that accepts everything and records it.
#[derive(Debug)]
pub struct RecordingStation {
    name: String,
    bay: BayId,
    ladle: Option<Ladle>,
    refuse_heats: bool,
    faulty: bool,
    log: Rc<RefCell<StationLog>>,
}

impl RecordingStation {
    pub fn new(name: &str, bay: &str) -> Self {
        Self {
            name: name.to_string(),
            bay: BayId::new(bay),
            ladle: None,
            refuse_heats: false,
            faulty: false,
            log: Rc::new(RefCell::new(StationLog::default())),
        }
    }

    /// A station whose ladle handling always fails.
    pub fn faulty(name: &str, bay: &str) -> Self {
        Self {
            faulty: true,
            ..Self::new(name, bay)
        }
    }

    pub fn with_ladle(mut self, ladle: Ladle) -> Self {
        self.ladle = Some(ladle);
        self
    }

    pub fn refusing_heats(mut self) -> Self {
        self.refuse_heats = true;
        self
    }

    /// Shared view of the log; stays valid after the station is boxed.
    pub fn log(&self) -> Rc<RefCell<StationLog>> {
        Rc::clone(&self.log)
    }

    pub fn delivered_heats(&self) -> Vec<HeatId> {
        self.log.borrow().delivered.clone()
    }

    fn fault(&self) -> StationError {
        StationError::Fault {
            station: self.name.clone(),
            detail: "hoist interlock tripped".to_string(),
        }
    }
}

impl Station for RecordingStation {
    fn name(&self) -> &str {
        &self.name
    }

    fn bay(&self) -> &BayId {
        &self.bay
    }

    fn current_ladle(&self) -> Option<&Ladle> {
        self.ladle.as_ref()
    }

    fn take_ladle(&mut self) -> Result<Option<Ladle>, StationError> {
        if self.faulty {
            return Err(self.fault());
        }
        let ladle = self.ladle.take();
        if let Some(ladle) = &ladle {
            self.log.borrow_mut().ladles_taken.push(ladle.id);
        }
        Ok(ladle)
    }

    fn add_ladle(&mut self, ladle: Ladle) -> Result<bool, StationError> {
        if self.faulty {
            return Err(self.fault());
        }
        if self.ladle.is_some() {
            return Ok(false);
        }
        self.log.borrow_mut().ladles_received.push(ladle.id);
        self.ladle = Some(ladle);
        Ok(true)
    }

    fn add_heat(&mut self, heat: Box<dyn Heat>) -> bool {
        let mut log = self.log.borrow_mut();
        log.add_heat_calls += 1;
        if self.refuse_heats {
            return false;
        }
        log.delivered.push(heat.id());
        true
    }
}

// ===========================================================================
// Configuration fixtures
// ===========================================================================

pub fn bay(id: &str) -> BayId {
    BayId::new(id)
}

/// One 100x100 bay at the origin, one crane, one tapping car.
pub fn one_bay_config() -> PlantConfig {
    let mut config = PlantConfig::with_bays(vec![BayConfig::new("bay1", 0.0, 0.0, 100.0, 100.0)]);
    config.crane.count_per_bay = 1;
    config.fleet.per_type.insert(CarType::Tapping, 1);
    config
}

/// Two bays side by side: bay1 centred at (50, 50), bay2 at (250, 150).
pub fn two_bay_config() -> PlantConfig {
    let mut config = PlantConfig::with_bays(vec![
        BayConfig::new("bay1", 0.0, 0.0, 100.0, 100.0),
        BayConfig::new("bay2", 200.0, 100.0, 100.0, 100.0),
    ]);
    config.crane.count_per_bay = 1;
    config
}

/// Three bays in a row, 200 units wide each.
pub fn three_bay_config() -> PlantConfig {
    PlantConfig::with_bays(vec![
        BayConfig::new("bay1", 0.0, 0.0, 200.0, 100.0),
        BayConfig::new("bay2", 200.0, 0.0, 200.0, 100.0).with_crane_path(210.0, 20.0),
        BayConfig::new("bay3", 400.0, 0.0, 200.0, 100.0),
    ])
}

pub fn pos(x: f64, y: f64) -> Position {
    Position::new(x, y)
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
