//! Meltshop Core -- shared vocabulary for the ladle transport simulation.
//!
//! This crate holds the pieces every other crate depends on: identifiers,
//! plant-floor geometry, the simulated clock and wake-up agenda, the
//! immutable plant configuration, and the interfaces through which the
//! transport core talks to the production subsystem (heats, ladles,
//! stations).
//!
//! # Key Types
//!
//! - [`sim::SimTime`] / [`sim::Agenda`] -- totally ordered simulated minutes
//!   and the `(time, sequence)` heap that drives cooperative agents.
//! - [`config::PlantConfig`] -- validated, read-only configuration.
//! - [`station::Station`] / [`station::Heat`] -- capability traits
//!   implemented by production-side objects.
//! - [`geometry::Position`] / [`geometry::Rect`] -- floor coordinates.

pub mod config;
pub mod geometry;
pub mod id;
pub mod sim;
pub mod station;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
