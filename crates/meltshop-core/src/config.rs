//! Immutable plant configuration.
//!
//! A [`PlantConfig`] is built once (in code via [`PlantConfigBuilder`], or
//! deserialized by the data crate), validated, and then shared read-only by
//! every component. Nothing in the simulation mutates it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::Rect;
use crate::id::BayId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration problems. Fatal at construction: no agent is created.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("no bays configured")]
    NoBays,
    #[error("duplicate bay id '{0}'")]
    DuplicateBay(BayId),
    #[error("bay '{bay}' has degenerate bounds ({width} x {height})")]
    DegenerateBay { bay: BayId, width: f64, height: f64 },
    #[error("{field} must be positive and finite, got {value}")]
    NonPositive { field: &'static str, value: f64 },
    #[error("{field} must be non-negative and finite, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} must be at least 1")]
    ZeroCount { field: &'static str },
    #[error("unknown car type '{0}' (expected tapping, treatment or rh)")]
    UnknownCarType(String),
    #[error("unknown bay '{0}'")]
    UnknownBay(BayId),
}

// ---------------------------------------------------------------------------
// Car types
// ---------------------------------------------------------------------------

/// Ladle car types. Fixed for a car's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarType {
    Tapping,
    Treatment,
    Rh,
}

impl CarType {
    /// All types, in round-robin fleet order.
    pub const ALL: [CarType; 3] = [CarType::Tapping, CarType::Treatment, CarType::Rh];

    pub fn as_str(self) -> &'static str {
        match self {
            CarType::Tapping => "tapping",
            CarType::Treatment => "treatment",
            CarType::Rh => "rh",
        }
    }

    /// Tapping and treatment cars run on rails and travel in L-shaped legs.
    pub fn is_rail_bound(self) -> bool {
        matches!(self, CarType::Tapping | CarType::Treatment)
    }

    /// Prefix used for car display names.
    pub fn label(self) -> &'static str {
        match self {
            CarType::Tapping => "Tapping",
            CarType::Treatment => "Treatment",
            CarType::Rh => "Rh",
        }
    }
}

impl fmt::Display for CarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CarType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tapping" => Ok(CarType::Tapping),
            "treatment" => Ok(CarType::Treatment),
            "rh" => Ok(CarType::Rh),
            _ => Err(ConfigError::UnknownCarType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Bays
// ---------------------------------------------------------------------------

fn default_bay_extent() -> f64 {
    100.0
}

/// A crane runway inside a bay. The first one defines the crane home point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CranePathConfig {
    #[serde(default)]
    pub start_x: f64,
    #[serde(default)]
    pub y: f64,
}

/// One rectangular bay of the plant floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BayConfig {
    pub id: BayId,
    #[serde(default, alias = "x_offset")]
    pub x: f64,
    #[serde(default, alias = "y_offset")]
    pub y: f64,
    #[serde(default = "default_bay_extent")]
    pub width: f64,
    #[serde(default = "default_bay_extent")]
    pub height: f64,
    #[serde(default)]
    pub crane_paths: Vec<CranePathConfig>,
}

impl BayConfig {
    pub fn new(id: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: BayId::new(id),
            x,
            y,
            width,
            height,
            crane_paths: Vec::new(),
        }
    }

    pub fn with_crane_path(mut self, start_x: f64, y: f64) -> Self {
        self.crane_paths.push(CranePathConfig { start_x, y });
        self
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_origin_size(self.x, self.y, self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Fleet
// ---------------------------------------------------------------------------

fn default_fallback_count() -> u32 {
    3
}

/// Fleet composition.
///
/// When `per_type` is non-empty it gives explicit counts per car type.
/// Otherwise `fallback_count` cars are spread round-robin over bays and
/// over [`CarType::ALL`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub per_type: BTreeMap<CarType, u32>,
    #[serde(default = "default_fallback_count")]
    pub fallback_count: u32,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            per_type: BTreeMap::new(),
            fallback_count: default_fallback_count(),
        }
    }
}

/// One car to be created, in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetEntry {
    /// 1-based car number, used in display names.
    pub number: u32,
    pub car_type: CarType,
    pub home_bay: BayId,
}

impl FleetConfig {
    /// Expand the fleet description into concrete cars.
    pub fn plan(&self, bays: &[BayConfig]) -> Vec<FleetEntry> {
        if bays.is_empty() {
            return Vec::new();
        }
        let bay_for = |number: u32| bays[(number as usize - 1) % bays.len()].id.clone();

        let mut entries = Vec::new();
        if self.per_type.is_empty() {
            for i in 0..self.fallback_count {
                let number = i + 1;
                entries.push(FleetEntry {
                    number,
                    car_type: CarType::ALL[i as usize % CarType::ALL.len()],
                    home_bay: bay_for(number),
                });
            }
        } else {
            let mut number = 1;
            for (&car_type, &count) in &self.per_type {
                for _ in 0..count {
                    entries.push(FleetEntry {
                        number,
                        car_type,
                        home_bay: bay_for(number),
                    });
                    number += 1;
                }
            }
        }
        entries
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Crane kinematics and fixed timing constants. Times are minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CraneConfig {
    pub count_per_bay: u32,
    /// Cruise speed, units/min.
    pub speed: f64,
    /// Acceleration, units/min^2.
    pub acceleration: f64,
    /// Hoist speed, units/min.
    pub hoist_speed: f64,
    pub lift_height: f64,
    pub lift_base_time: f64,
    pub lower_base_time: f64,
    /// Nominal lift + lower time added to task estimates.
    pub task_overhead: f64,
    /// Time in a non-idle state after which a deadlock warning is logged.
    pub deadlock_timeout: f64,
    pub error_cooldown: f64,
}

impl Default for CraneConfig {
    fn default() -> Self {
        Self {
            count_per_bay: 2,
            speed: 100.0,
            acceleration: 10.0,
            hoist_speed: 20.0,
            lift_height: 10.0,
            lift_base_time: 3.0,
            lower_base_time: 3.0,
            task_overhead: 6.0,
            deadlock_timeout: 60.0,
            error_cooldown: 5.0,
        }
    }
}

/// Ladle car speed and retry timing. Times are minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarConfig {
    /// Travel speed, units/min.
    pub speed: f64,
    /// Back-off between crane requests when no crane is free.
    pub crane_retry_interval: f64,
    /// Hold after a failed turn before the car is considered again.
    pub error_cooldown: f64,
}

impl Default for CarConfig {
    fn default() -> Self {
        Self {
            speed: 150.0,
            crane_retry_interval: 1.0,
            error_cooldown: 1.0,
        }
    }
}

/// Which car type serves which kind of move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarTypePolicy {
    pub cross_bay: CarType,
    pub same_bay: CarType,
    /// Overrides the other two when the destination is a caster.
    pub caster: CarType,
}

impl Default for CarTypePolicy {
    fn default() -> Self {
        Self {
            cross_bay: CarType::Treatment,
            same_bay: CarType::Tapping,
            caster: CarType::Rh,
        }
    }
}

impl CarTypePolicy {
    pub fn classify(&self, same_bay: bool, to_caster: bool) -> CarType {
        if to_caster {
            self.caster
        } else if same_bay {
            self.same_bay
        } else {
            self.cross_bay
        }
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on assignments made by one drain of the pending queue.
    pub max_assignments_per_drain: usize,
    /// Distance assumed between bays the spatial service cannot measure.
    pub fallback_bay_distance: f64,
    pub car_types: CarTypePolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_assignments_per_drain: 10,
            fallback_bay_distance: 100.0,
            car_types: CarTypePolicy::default(),
        }
    }
}

/// Spatial service tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Extra distance added to cross-bay equipment paths.
    pub equipment_offset_buffer: f64,
    /// Crane bridge footprint used by the overlap check.
    pub crane_width: f64,
    pub crane_depth: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            equipment_offset_buffer: 50.0,
            crane_width: 20.0,
            crane_depth: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// PlantConfig
// ---------------------------------------------------------------------------

/// Everything the transport core consumes from the configuration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantConfig {
    pub bays: Vec<BayConfig>,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub crane: CraneConfig,
    #[serde(default)]
    pub car: CarConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub spatial: SpatialConfig,
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { field, value })
    }
}

impl PlantConfig {
    /// A configuration with the given bays and default everything else.
    pub fn with_bays(bays: Vec<BayConfig>) -> Self {
        Self {
            bays,
            fleet: FleetConfig::default(),
            crane: CraneConfig::default(),
            car: CarConfig::default(),
            dispatch: DispatchConfig::default(),
            spatial: SpatialConfig::default(),
        }
    }

    pub fn builder() -> PlantConfigBuilder {
        PlantConfigBuilder::default()
    }

    /// Check every invariant the simulation relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.check() {
            Ok(()) => {
                debug!(bays = self.bays.len(), "plant configuration valid");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "plant configuration rejected");
                Err(err)
            }
        }
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.bays.is_empty() {
            return Err(ConfigError::NoBays);
        }
        let mut seen = HashSet::new();
        for bay in &self.bays {
            if !seen.insert(&bay.id) {
                return Err(ConfigError::DuplicateBay(bay.id.clone()));
            }
            if bay.bounds().is_degenerate() {
                return Err(ConfigError::DegenerateBay {
                    bay: bay.id.clone(),
                    width: bay.width,
                    height: bay.height,
                });
            }
        }

        let c = &self.crane;
        positive("crane.speed", c.speed)?;
        positive("crane.acceleration", c.acceleration)?;
        positive("crane.hoist_speed", c.hoist_speed)?;
        positive("crane.deadlock_timeout", c.deadlock_timeout)?;
        non_negative("crane.lift_height", c.lift_height)?;
        non_negative("crane.lift_base_time", c.lift_base_time)?;
        non_negative("crane.lower_base_time", c.lower_base_time)?;
        non_negative("crane.task_overhead", c.task_overhead)?;
        non_negative("crane.error_cooldown", c.error_cooldown)?;

        positive("car.speed", self.car.speed)?;
        positive("car.crane_retry_interval", self.car.crane_retry_interval)?;
        non_negative("car.error_cooldown", self.car.error_cooldown)?;

        if self.dispatch.max_assignments_per_drain == 0 {
            return Err(ConfigError::ZeroCount {
                field: "dispatch.max_assignments_per_drain",
            });
        }
        non_negative(
            "dispatch.fallback_bay_distance",
            self.dispatch.fallback_bay_distance,
        )?;
        non_negative(
            "spatial.equipment_offset_buffer",
            self.spatial.equipment_offset_buffer,
        )?;
        non_negative("spatial.crane_width", self.spatial.crane_width)?;
        non_negative("spatial.crane_depth", self.spatial.crane_depth)?;
        Ok(())
    }

    pub fn bay(&self, id: &BayId) -> Option<&BayConfig> {
        self.bays.iter().find(|b| &b.id == id)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Fluent construction of a validated [`PlantConfig`].
#[derive(Debug, Clone)]
pub struct PlantConfigBuilder {
    config: PlantConfig,
}

impl Default for PlantConfigBuilder {
    fn default() -> Self {
        Self {
            config: PlantConfig::with_bays(Vec::new()),
        }
    }
}

impl PlantConfigBuilder {
    pub fn bay(mut self, bay: BayConfig) -> Self {
        self.config.bays.push(bay);
        self
    }

    /// Explicit number of cars of one type.
    pub fn cars(mut self, car_type: CarType, count: u32) -> Self {
        self.config.fleet.per_type.insert(car_type, count);
        self
    }

    pub fn fallback_car_count(mut self, count: u32) -> Self {
        self.config.fleet.fallback_count = count;
        self
    }

    pub fn cranes_per_bay(mut self, count: u32) -> Self {
        self.config.crane.count_per_bay = count;
        self
    }

    pub fn crane(mut self, crane: CraneConfig) -> Self {
        self.config.crane = crane;
        self
    }

    pub fn car(mut self, car: CarConfig) -> Self {
        self.config.car = car;
        self
    }

    pub fn car_speed(mut self, speed: f64) -> Self {
        self.config.car.speed = speed;
        self
    }

    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.config.dispatch = dispatch;
        self
    }

    pub fn car_type_policy(mut self, policy: CarTypePolicy) -> Self {
        self.config.dispatch.car_types = policy;
        self
    }

    pub fn spatial(mut self, spatial: SpatialConfig) -> Self {
        self.config.spatial = spatial;
        self
    }

    pub fn build(self) -> Result<PlantConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
