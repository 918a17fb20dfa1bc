//! Domain records shared by every component.
//!
//! These are read models handed over by the surrounding system. The core only
//! writes assignment references and shift load counters, always through the
//! collaborator traits in [`crate::traits`].

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

pub type RequestId = String;
pub type ShiftId = String;
pub type ExecutorId = String;
pub type AssignmentId = String;

/// Tag that marks a shift as able to take any trade.
pub const UNIVERSAL_TAG: &str = "universal";

/// Coverage-area tag meaning "serves every area".
pub const ALL_AREAS_TAG: &str = "all";

/// Request urgency, ordered from least to most pressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Ordinary,
    Medium,
    Urgent,
    Critical,
}

impl Urgency {
    pub fn is_urgent(self) -> bool {
        self >= Urgency::Urgent
    }
}

/// An intake ticket waiting for (or holding) an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: RequestId,
    pub category: String,
    pub urgency: Urgency,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub created_at: NaiveDateTime,
    /// Shift currently serving this request, if any.
    pub assigned_shift: Option<ShiftId>,
}

impl ServiceRequest {
    pub fn new(
        id: impl Into<RequestId>,
        category: impl Into<String>,
        urgency: Urgency,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            urgency,
            address: None,
            location: None,
            created_at,
            assigned_shift: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_shift.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Planned,
    Active,
    Paused,
    Completed,
    Cancelled,
}

/// A bounded work period for one executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutyShift {
    pub id: ShiftId,
    pub executor_id: ExecutorId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Trades this shift focuses on. Empty means no particular focus.
    pub specializations: BTreeSet<String>,
    /// Areas this shift serves. Empty (or containing `"all"`) means anywhere.
    pub coverage_areas: BTreeSet<String>,
    pub max_requests: u32,
    pub current_request_count: u32,
    pub status: ShiftStatus,
    /// Executor quality rating on a 1-5 scale.
    pub rating: Option<f64>,
    /// Where the executor starts from, when known.
    pub base_location: Option<GeoPoint>,
}

impl DutyShift {
    pub fn new(
        id: impl Into<ShiftId>,
        executor_id: impl Into<ExecutorId>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        max_requests: u32,
    ) -> Self {
        Self {
            id: id.into(),
            executor_id: executor_id.into(),
            start,
            end,
            specializations: BTreeSet::new(),
            coverage_areas: BTreeSet::new(),
            max_requests,
            current_request_count: 0,
            status: ShiftStatus::Planned,
            rating: None,
            base_location: None,
        }
    }

    pub fn with_specializations<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specializations.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_coverage_areas<I, S>(mut self, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.coverage_areas.extend(areas.into_iter().map(Into::into));
        self
    }

    pub fn with_status(mut self, status: ShiftStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_load(mut self, current_request_count: u32) -> Self {
        self.current_request_count = current_request_count;
        self
    }

    pub fn with_base_location(mut self, location: GeoPoint) -> Self {
        self.base_location = Some(location);
        self
    }

    pub fn is_full(&self) -> bool {
        self.current_request_count >= self.max_requests
    }

    /// Whether the shift can take new work at all (ignoring capacity).
    pub fn is_assignable(&self) -> bool {
        matches!(self.status, ShiftStatus::Active | ShiftStatus::Planned)
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.max_requests.saturating_sub(self.current_request_count)
    }

    /// Current load as a percentage of capacity.
    pub fn load_percentage(&self) -> f64 {
        if self.max_requests == 0 {
            return 100.0;
        }
        self.current_request_count as f64 / self.max_requests as f64 * 100.0
    }

    pub fn duration_hours(&self) -> f64 {
        (self.end - self.start).num_minutes() as f64 / 60.0
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn covers(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at < self.end
    }

    pub fn serves_all_areas(&self) -> bool {
        self.coverage_areas.is_empty() || self.coverage_areas.contains(ALL_AREAS_TAG)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    Group,
    Individual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Cancelled,
    Completed,
}

/// Binding of one request to one shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub request_id: RequestId,
    pub shift_id: ShiftId,
    pub kind: AssignmentKind,
    pub score: f64,
    /// Provenance of the assignment, e.g. which algorithm produced it.
    pub reason: String,
    pub status: AssignmentStatus,
    pub created_at: NaiveDateTime,
}

impl Assignment {
    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    Pending,
    Approved,
    Blocked,
    Inactive,
}

/// A person who works duty shifts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Executor {
    pub id: ExecutorId,
    pub specializations: BTreeSet<String>,
    pub rating: Option<f64>,
    pub status: ExecutorStatus,
}

impl Executor {
    pub fn new<I, S>(id: impl Into<ExecutorId>, specializations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            specializations: specializations.into_iter().map(Into::into).collect(),
            rating: None,
            status: ExecutorStatus::Approved,
        }
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_status(mut self, status: ExecutorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_eligible(&self) -> bool {
        self.status == ExecutorStatus::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_urgency_ordering() {
        assert!(Urgency::Critical > Urgency::Urgent);
        assert!(Urgency::Urgent > Urgency::Medium);
        assert!(Urgency::Medium > Urgency::Ordinary);
        assert!(Urgency::Urgent.is_urgent());
        assert!(!Urgency::Medium.is_urgent());
    }

    #[test]
    fn test_shift_capacity() {
        let shift = DutyShift::new("s1", "e1", at(8), at(20), 4).with_load(4);
        assert!(shift.is_full());
        assert_eq!(shift.remaining_capacity(), 0);
        assert_eq!(shift.load_percentage(), 100.0);
        assert_eq!(shift.duration_hours(), 12.0);
    }

    #[test]
    fn test_shift_coverage_flags() {
        let anywhere = DutyShift::new("s1", "e1", at(8), at(20), 4);
        assert!(anywhere.serves_all_areas());
        let all = anywhere.clone().with_coverage_areas(["all"]);
        assert!(all.serves_all_areas());
        let yard = anywhere.with_coverage_areas(["yard"]);
        assert!(!yard.serves_all_areas());
        assert!(yard.covers(at(8)));
        assert!(!yard.covers(at(20)));
    }
}
