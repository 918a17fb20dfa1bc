//! Error types for the planner.
//!
//! Only invalid inputs abort an operation. Per-item failures inside batch
//! operations are collected as [`BatchError`] records instead.

use chrono::NaiveDate;
use thiserror::Error;

/// Errors surfaced by collaborator implementations (repositories, directory).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Errors surfaced by geocoder implementations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeocodeError {
    #[error("address could not be resolved: {0}")]
    NotFound(String),
    #[error("geocoder transport failure: {0}")]
    Transport(String),
    #[error("geocoder returned an invalid point: {0}")]
    InvalidPoint(String),
}

/// Errors returned by planner operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
    #[error("unknown specialization: {0}")]
    UnknownSpecialization(String),
    #[error("start date {0} is in the past")]
    StartDateInPast(NaiveDate),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("shift {0} is at capacity")]
    Capacity(String),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}

impl PlannerError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        PlannerError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// A per-item failure recorded by a batch operation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BatchError {
    /// The request, shift or assignment the failure relates to, if any.
    pub item: Option<String>,
    pub message: String,
}

impl BatchError {
    pub fn for_item(item: impl Into<String>, message: impl ToString) -> Self {
        Self {
            item: Some(item.into()),
            message: message.to_string(),
        }
    }

    pub fn general(message: impl ToString) -> Self {
        Self {
            item: None,
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.item {
            Some(item) => write!(f, "{}: {}", item, self.message),
            None => f.write_str(&self.message),
        }
    }
}
