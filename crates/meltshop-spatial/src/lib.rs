//! Plant-floor spatial service: bay geometry, the equipment registry, and
//! path and travel-time computation with caching.
//!
//! The service never halts the simulation. Queries about an unknown bay or
//! unplaced equipment are logged and answered with a neutral fallback (the
//! origin, or an empty path) instead of an error. Only registry mutations
//! return [`SpatialError`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use meltshop_core::config::{CarType, ConfigError, PlantConfig};
use meltshop_core::geometry::{Position, Rect};
use meltshop_core::id::{BayId, EquipmentId};
use tracing::{debug, error, warn};

pub mod path;

use path::BayRoute;
pub use path::{EquipmentPath, PathSegment};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Errors from equipment registry operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpatialError {
    #[error("unknown bay '{0}'")]
    UnknownBay(BayId),
    #[error("position ({x}, {y}) lies outside bay '{bay}'", x = .position.x, y = .position.y)]
    OutsideBay { bay: BayId, position: Position },
    #[error("equipment {0:?} is not placed")]
    NotPlaced(EquipmentId),
}

/// One bay as the service sees it.
#[derive(Debug, Clone)]
struct Bay {
    bounds: Rect,
    center: Position,
    crane_home: Option<Position>,
}

/// Where a piece of equipment stands.
#[derive(Debug, Clone, PartialEq)]
struct Placement {
    bay: BayId,
    position: Position,
}

/// Hit and miss counters for both path caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub bay_path_hits: u64,
    pub bay_path_misses: u64,
    pub equipment_path_hits: u64,
    pub equipment_path_misses: u64,
}

type BayPathKey = (BayId, BayId, CarType);

// ---------------------------------------------------------------------------
// SpatialService
// ---------------------------------------------------------------------------

/// Owns bay geometry, equipment locations, and cached routes.
#[derive(Debug)]
pub struct SpatialService {
    config: Arc<PlantConfig>,
    /// Bay ids in configuration order; `bay_at` resolves overlaps by this order.
    order: Vec<BayId>,
    bays: BTreeMap<BayId, Bay>,
    equipment: HashMap<EquipmentId, Placement>,
    routes: HashMap<(BayId, BayId), BayRoute>,
    bay_paths: HashMap<BayPathKey, Vec<PathSegment>>,
    equipment_paths: HashMap<(EquipmentId, EquipmentId), EquipmentPath>,
    stats: CacheStats,
}

impl SpatialService {
    /// Build the service from a configuration. Fails if the configuration
    /// does not validate.
    pub fn new(config: Arc<PlantConfig>) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut order = Vec::with_capacity(config.bays.len());
        let mut bays = BTreeMap::new();
        for bay in &config.bays {
            let bounds = bay.bounds();
            let crane_home = bay
                .crane_paths
                .first()
                .map(|p| Position::new(p.start_x, p.y));
            order.push(bay.id.clone());
            bays.insert(
                bay.id.clone(),
                Bay {
                    bounds,
                    center: bounds.center(),
                    crane_home,
                },
            );
            debug!(bay = %bay.id, ?bounds, "bay registered");
        }

        let mut service = Self {
            config,
            order,
            bays,
            equipment: HashMap::new(),
            routes: HashMap::new(),
            bay_paths: HashMap::new(),
            equipment_paths: HashMap::new(),
            stats: CacheStats::default(),
        };
        service.seed_default_routes();
        Ok(service)
    }

    /// Routes between consecutive configured bays, in both directions.
    fn seed_default_routes(&mut self) {
        for pair in self.order.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let (ca, cb) = (self.bays[a].center, self.bays[b].center);
            let distance = ca.distance(&cb);
            self.routes.insert(
                (a.clone(), b.clone()),
                BayRoute {
                    waypoints: [ca, cb],
                    distance,
                },
            );
            self.routes.insert(
                (b.clone(), a.clone()),
                BayRoute {
                    waypoints: [cb, ca],
                    distance,
                },
            );
            debug!(from = %a, to = %b, distance, "default route");
        }
    }

    pub fn config(&self) -> &PlantConfig {
        &self.config
    }

    // -- Bays --

    /// Bay ids in configuration order.
    pub fn bay_ids(&self) -> impl Iterator<Item = &BayId> {
        self.order.iter()
    }

    pub fn has_bay(&self, bay: &BayId) -> bool {
        self.bays.contains_key(bay)
    }

    pub fn bay_bounds(&self, bay: &BayId) -> Option<Rect> {
        self.bays.get(bay).map(|b| b.bounds)
    }

    /// The first configured bay containing `point` (edges inclusive).
    pub fn bay_at(&self, point: Position) -> Option<&BayId> {
        self.order
            .iter()
            .find(|id| self.bays[*id].bounds.contains(point))
    }

    /// Geometric centre of a bay; the origin for unknown bays.
    pub fn bay_center(&self, bay: &BayId) -> Position {
        match self.bays.get(bay) {
            Some(b) => b.center,
            None => {
                warn!(%bay, "bay not found, using origin");
                Position::ORIGIN
            }
        }
    }

    /// Centre-to-centre distance, `None` if either bay is unknown.
    pub fn bay_distance(&self, from: &BayId, to: &BayId) -> Option<f64> {
        let a = self.bays.get(from)?;
        let b = self.bays.get(to)?;
        Some(a.center.distance(&b.center))
    }

    /// Configured crane home point, else the bay centre, else the origin.
    pub fn crane_home_position(&self, bay: &BayId) -> Position {
        match self.bays.get(bay) {
            Some(b) => b.crane_home.unwrap_or(b.center),
            None => {
                error!(%bay, "crane home requested for unknown bay");
                Position::ORIGIN
            }
        }
    }

    pub fn is_point_in_bay(&self, point: Position, bay: &BayId) -> bool {
        self.bays
            .get(bay)
            .is_some_and(|b| b.bounds.contains(point))
    }

    // -- Equipment registry --

    /// Register equipment at a position, which must lie inside `bay`.
    /// Re-placing an already registered id moves it.
    pub fn place_equipment(
        &mut self,
        id: EquipmentId,
        bay: &BayId,
        position: Position,
    ) -> Result<(), SpatialError> {
        let b = self
            .bays
            .get(bay)
            .ok_or_else(|| SpatialError::UnknownBay(bay.clone()))?;
        if !b.bounds.contains(position) {
            return Err(SpatialError::OutsideBay {
                bay: bay.clone(),
                position,
            });
        }
        self.equipment.insert(
            id,
            Placement {
                bay: bay.clone(),
                position,
            },
        );
        self.invalidate_equipment_paths(id);
        debug!(?id, %bay, x = position.x, y = position.y, "equipment placed");
        Ok(())
    }

    /// Move registered equipment. Its bay follows the new position when the
    /// position lies inside a bay and is kept otherwise (cars in transit).
    pub fn relocate_equipment(
        &mut self,
        id: EquipmentId,
        position: Position,
    ) -> Result<(), SpatialError> {
        let new_bay = self.bay_at(position).cloned();
        let placement = self
            .equipment
            .get_mut(&id)
            .ok_or(SpatialError::NotPlaced(id))?;
        placement.position = position;
        if let Some(bay) = new_bay {
            placement.bay = bay;
        }
        self.invalidate_equipment_paths(id);
        Ok(())
    }

    /// Position of registered equipment; the origin if unknown.
    pub fn equipment_position(&self, id: EquipmentId) -> Position {
        match self.equipment.get(&id) {
            Some(p) => p.position,
            None => {
                warn!(?id, "equipment not placed, using origin");
                Position::ORIGIN
            }
        }
    }

    pub fn equipment_bay(&self, id: EquipmentId) -> Option<&BayId> {
        self.equipment.get(&id).map(|p| &p.bay)
    }

    pub fn is_placed(&self, id: EquipmentId) -> bool {
        self.equipment.contains_key(&id)
    }

    /// Whether registered equipment currently stands inside `bay`.
    pub fn is_in_bay(&self, id: EquipmentId, bay: &BayId) -> bool {
        self.equipment
            .get(&id)
            .is_some_and(|p| self.is_point_in_bay(p.position, bay))
    }

    fn invalidate_equipment_paths(&mut self, id: EquipmentId) {
        self.equipment_paths.retain(|(a, b), _| *a != id && *b != id);
    }

    // -- Paths --

    /// Car route between two bay centres.
    ///
    /// Rail-bound types travel an L: along the source row to the
    /// destination column, then to the destination centre. RH cars travel
    /// one direct segment. Unknown bays yield an empty path.
    pub fn path_between_bays(
        &mut self,
        from: &BayId,
        to: &BayId,
        car_type: CarType,
    ) -> Vec<PathSegment> {
        let key = (from.clone(), to.clone(), car_type);
        if let Some(cached) = self.bay_paths.get(&key) {
            self.stats.bay_path_hits += 1;
            return cached.clone();
        }

        let (Some(a), Some(b)) = (self.bays.get(from), self.bays.get(to)) else {
            error!(%from, %to, "path requested between unknown bays");
            return Vec::new();
        };
        self.stats.bay_path_misses += 1;

        let (start, end) = (a.center, b.center);
        let waypoints = if car_type.is_rail_bound() {
            vec![start, Position::new(end.x, start.y), end]
        } else {
            vec![start, end]
        };
        let segments = path::segments_through(&waypoints, self.config.car.speed);
        debug!(
            %from,
            %to,
            %car_type,
            segments = segments.len(),
            distance = path::total_distance(&segments),
            "bay path computed"
        );
        self.bay_paths.insert(key, segments.clone());
        segments
    }

    fn bay_route(&mut self, from: &BayId, to: &BayId) -> Option<BayRoute> {
        let key = (from.clone(), to.clone());
        if let Some(route) = self.routes.get(&key) {
            return Some(route.clone());
        }
        let a = self.bays.get(from)?.center;
        let b = self.bays.get(to)?.center;
        let route = BayRoute {
            waypoints: [a, b],
            distance: a.distance(&b),
        };
        self.routes.insert(key, route.clone());
        Some(route)
    }

    /// Route between two registered pieces of equipment.
    ///
    /// Within one bay this is a straight line. Across bays it follows the
    /// bay-to-bay route plus the configured offset buffer. Unplaced
    /// equipment yields [`EquipmentPath::empty`].
    pub fn path_between_equipment(&mut self, from: EquipmentId, to: EquipmentId) -> EquipmentPath {
        if let Some(cached) = self.equipment_paths.get(&(from, to)) {
            self.stats.equipment_path_hits += 1;
            return cached.clone();
        }
        let (Some(a), Some(b)) = (self.equipment.get(&from), self.equipment.get(&to)) else {
            error!(?from, ?to, "path requested between unplaced equipment");
            return EquipmentPath::empty();
        };
        let (a, b) = (a.clone(), b.clone());
        self.stats.equipment_path_misses += 1;

        let speed = self.config.car.speed;
        let path = if a.bay == b.bay {
            let distance = a.position.distance(&b.position);
            EquipmentPath {
                waypoints: vec![a.position, b.position],
                distance,
                travel_time: distance / speed,
            }
        } else {
            let Some(route) = self.bay_route(&a.bay, &b.bay) else {
                warn!(from = %a.bay, to = %b.bay, "no route between bays");
                return EquipmentPath::empty();
            };
            let distance = route.distance + self.config.spatial.equipment_offset_buffer;
            EquipmentPath {
                waypoints: vec![a.position, route.waypoints[0], route.waypoints[1], b.position],
                distance,
                travel_time: distance / speed,
            }
        };
        self.equipment_paths.insert((from, to), path.clone());
        path
    }

    // -- Collisions --

    /// Per-bay flag: does any pair of crane footprints in the bay overlap?
    ///
    /// Every configured bay appears in the result.
    pub fn check_crane_collisions(&self, cranes: &[(BayId, Position)]) -> BTreeMap<BayId, bool> {
        let half_w = self.config.spatial.crane_width / 2.0;
        let half_d = self.config.spatial.crane_depth / 2.0;

        let mut by_bay: BTreeMap<&BayId, Vec<Rect>> = BTreeMap::new();
        for (bay, p) in cranes {
            by_bay
                .entry(bay)
                .or_default()
                .push(Rect::centered(*p, half_w, half_d));
        }

        self.order
            .iter()
            .map(|bay| {
                let rects = by_bay.get(bay).map(Vec::as_slice).unwrap_or(&[]);
                let hit = rects
                    .iter()
                    .enumerate()
                    .any(|(i, r)| rects[i + 1..].iter().any(|o| r.intersects(o)));
                if hit {
                    warn!(%bay, "crane footprints overlap");
                }
                (bay.clone(), hit)
            })
            .collect()
    }

    // -- Diagnostics --

    pub fn cache_stats(&self) -> CacheStats {
        self.stats
    }

    /// Drop every cached path. Default routes are kept.
    pub fn clear_caches(&mut self) {
        self.bay_paths.clear();
        self.equipment_paths.clear();
    }
}
