//! Meltshop Transport -- cranes, ladle cars, dispatch, and the plant loop.
//!
//! Cranes and cars are cooperative agents. Each one runs a turn until its
//! next timed wait and then hands control back to the [`plant::Plant`],
//! which keeps a single agenda of wake-ups ordered by simulated time.
//!
//! # Key Types
//!
//! - [`crane::Crane`] -- bay-confined hoist with a priority task queue.
//! - [`car::Car`] -- carries one heat between bays, polling for cranes at
//!   each end.
//! - [`dispatcher::Dispatcher`] -- owns the fleet and the crane pools and
//!   matches pending requests to available cars.
//! - [`plant::Plant`] -- the entry point: stations, requests, time.
//! - [`event::EventBus`] -- bounded log of everything observable.

pub mod car;
pub mod crane;
pub mod dispatcher;
pub mod event;
pub mod metrics;
pub mod plant;
pub mod query;

pub use car::{Car, CarStatus};
pub use crane::{Crane, CraneState, CraneTask, TaskAdmission};
pub use dispatcher::{CraneOperation, Dispatcher};
pub use event::{EventBus, EventKind, TransportEvent};
pub use plant::{Plant, PlantError};
pub use query::{PlantStatus, TransportStatus};
