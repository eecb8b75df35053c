//! Read-only views for dashboards and orchestration.

use meltshop_core::config::CarType;
use meltshop_core::geometry::Position;
use meltshop_core::id::{BayId, CarId, CraneId, HeatId, RequestId};
use meltshop_core::sim::{Duration, SimTime};
use serde::{Deserialize, Serialize};

use crate::car::{Car, CarStatus};
use crate::crane::{Crane, CraneState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarSnapshot {
    pub id: CarId,
    pub name: String,
    pub car_type: CarType,
    pub status: CarStatus,
    pub bay: BayId,
    pub destination: Option<BayId>,
    pub heat: Option<HeatId>,
    pub position: Position,
}

impl CarSnapshot {
    pub fn of(car: &Car) -> Self {
        Self {
            id: car.id(),
            name: car.name().to_string(),
            car_type: car.car_type(),
            status: car.status(),
            bay: car.current_bay().clone(),
            destination: car.destination().cloned(),
            heat: car.heat_id(),
            position: car.position(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CraneSnapshot {
    pub id: CraneId,
    pub name: String,
    pub bay: BayId,
    pub state: CraneState,
    pub position: Position,
    pub queue_length: usize,
}

impl CraneSnapshot {
    pub fn of(crane: &Crane) -> Self {
        Self {
            id: crane.id(),
            name: crane.name().to_string(),
            bay: crane.bay().clone(),
            state: crane.state(),
            position: crane.position(),
            queue_length: crane.queue_len(),
        }
    }
}

/// Fleet-wide status at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantStatus {
    pub now: SimTime,
    pub pending_requests: usize,
    pub cars: Vec<CarSnapshot>,
    pub cranes: Vec<CraneSnapshot>,
}

/// Where a heat stands in the transport system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransportStatus {
    /// Queued, waiting for a car.
    Pending {
        request: RequestId,
        submitted_at: SimTime,
        waiting_time: Duration,
        required_car_type: CarType,
        priority: i32,
    },
    /// Aboard a car.
    InTransit {
        car: CarId,
        /// The request the car is serving; `None` only mid-failure.
        request: Option<RequestId>,
        car_name: String,
        status: CarStatus,
        current_bay: BayId,
        destination_bay: Option<BayId>,
        progress: f64,
    },
    /// Delivered, dropped, or never requested.
    NotInTransport,
}

impl TransportStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TransportStatus::Pending { .. })
    }

    pub fn is_in_transit(&self) -> bool {
        matches!(self, TransportStatus::InTransit { .. })
    }
}
