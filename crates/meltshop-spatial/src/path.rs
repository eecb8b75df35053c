//! Path segments and the routines that build them from waypoints.

use meltshop_core::geometry::Position;
use meltshop_core::sim::Duration;
use serde::{Deserialize, Serialize};

/// One straight leg of travel with its precomputed cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    pub from: Position,
    pub to: Position,
    pub distance: f64,
    /// `distance / speed`, in minutes.
    pub travel_time: Duration,
}

impl PathSegment {
    pub fn new(from: Position, to: Position, speed: f64) -> Self {
        let distance = from.distance(&to);
        Self {
            from,
            to,
            distance,
            travel_time: distance / speed,
        }
    }

    /// A segment is usable when its cost is finite and non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.distance.is_finite()
            && self.distance >= 0.0
            && self.travel_time.is_finite()
            && self.travel_time >= 0.0
    }
}

/// Chain consecutive waypoints into segments.
pub fn segments_through(waypoints: &[Position], speed: f64) -> Vec<PathSegment> {
    waypoints
        .windows(2)
        .map(|w| PathSegment::new(w[0], w[1], speed))
        .collect()
}

/// True for a non-empty path whose every segment is well formed.
pub fn is_valid_path(path: &[PathSegment]) -> bool {
    !path.is_empty() && path.iter().all(PathSegment::is_well_formed)
}

pub fn total_distance(path: &[PathSegment]) -> f64 {
    path.iter().map(|s| s.distance).sum()
}

pub fn total_travel_time(path: &[PathSegment]) -> Duration {
    path.iter().map(|s| s.travel_time).sum()
}

/// A route between two pieces of equipment, summarised as a polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentPath {
    pub waypoints: Vec<Position>,
    pub distance: f64,
    pub travel_time: Duration,
}

impl EquipmentPath {
    /// The zero-length fallback returned when no route can be computed.
    pub fn empty() -> Self {
        Self {
            waypoints: Vec::new(),
            distance: 0.0,
            travel_time: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }
}

/// A precomputed centre-to-centre route between two bays.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BayRoute {
    pub waypoints: [Position; 2],
    pub distance: f64,
}
