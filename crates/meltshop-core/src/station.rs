//! Interfaces the transport core consumes from the production subsystem.
//!
//! Heats and stations live outside the core. The core holds a heat only
//! while it is in transit and hands it back through [`Station::add_heat`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{BayId, HeatId, LadleId};
use crate::sim::SimTime;

/// A batch of molten metal tracked by the production subsystem.
pub trait Heat: fmt::Debug {
    fn id(&self) -> HeatId;

    /// Called whenever a carrying car finishes a path segment.
    fn update_temperature(&mut self, now: SimTime);
}

/// The vessel holding one heat while cranes move it around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ladle {
    pub id: LadleId,
    pub heat: Option<HeatId>,
}

impl Ladle {
    pub fn new(id: LadleId, heat: Option<HeatId>) -> Self {
        Self { id, heat }
    }
}

/// Failures a station may report while handing ladles over.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StationError {
    #[error("station '{station}' is offline")]
    Offline { station: String },
    #[error("station '{station}' failed: {detail}")]
    Fault { station: String, detail: String },
}

/// A process station (furnace, ladle furnace, degasser, caster, ...).
pub trait Station {
    fn name(&self) -> &str;

    /// Bay the station stands in.
    fn bay(&self) -> &BayId;

    /// The ladle currently sitting at the station, if any.
    fn current_ladle(&self) -> Option<&Ladle>;

    /// Hand the current ladle to a crane. `Ok(None)` when there is none.
    fn take_ladle(&mut self) -> Result<Option<Ladle>, StationError>;

    /// Accept a ladle from a crane. `Ok(false)` means the station refused it.
    fn add_ladle(&mut self, ladle: Ladle) -> Result<bool, StationError>;

    /// Accept a delivered heat. Ownership passes to the station either way;
    /// `false` means it was refused.
    fn add_heat(&mut self, heat: Box<dyn Heat>) -> bool;

    /// Casters get their own car type when routing transports.
    fn is_caster(&self) -> bool {
        self.name().to_ascii_lowercase().contains("caster")
    }
}
