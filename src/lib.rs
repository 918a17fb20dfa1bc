//! duty-planner core
//!
//! Scheduling engine for maintenance crews: roster generation, demand
//! forecasting, request-to-shift dispatch and assignment re-optimization.
//! Storage, notification delivery and geocoding are reached through the
//! collaborator traits in [`traits`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod forecast;
pub mod geo;
pub mod geocode;
pub mod memory;
pub mod model;
pub mod optimizer;
pub mod roster;
pub mod scoring;
pub mod traits;

pub use config::PlannerConfig;
pub use dispatcher::Dispatcher;
pub use error::{BatchError, PlannerError, RepositoryError};
pub use forecast::DemandForecaster;
pub use geo::{GeoEngine, GeoPoint};
pub use optimizer::{Algorithm, AssignmentOptimizer, Scope};
pub use roster::RosterPlanner;
pub use scoring::AssignmentScorer;
pub use traits::PlannerContext;
