//! Collaborator interfaces the planner consumes.
//!
//! These are intentionally minimal. The surrounding service implements them
//! over its own storage; [`crate::memory`] ships an in-memory version.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::{GeocodeError, RepositoryError};
use crate::geo::GeoPoint;
use crate::model::{
    Assignment, DutyShift, Executor, ExecutorId, RequestId, ServiceRequest, ShiftId, Urgency,
};

/// Selection criteria for unassigned requests.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Restrict to these request ids.
    pub ids: Option<Vec<RequestId>>,
    pub min_urgency: Option<Urgency>,
    /// Only requests created at or before this instant.
    pub created_before: Option<NaiveDateTime>,
}

impl RequestFilter {
    pub fn matches(&self, request: &ServiceRequest) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&request.id) {
                return false;
            }
        }
        if let Some(min) = self.min_urgency {
            if request.urgency < min {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if request.created_at > before {
                return false;
            }
        }
        true
    }
}

pub trait RequestRepository {
    fn list_unassigned(&self, filter: &RequestFilter)
    -> Result<Vec<ServiceRequest>, RepositoryError>;

    fn get(&self, id: &str) -> Result<Option<ServiceRequest>, RepositoryError>;

    /// Requests created in `[start, end)`, assigned or not.
    fn list_by_date_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ServiceRequest>, RepositoryError>;

    /// Creates an active assignment. Any previous active assignment of the
    /// request must be cancelled by the implementation.
    fn record_assignment(
        &self,
        request_id: &str,
        shift_id: &str,
        score: f64,
        reason: &str,
    ) -> Result<Assignment, RepositoryError>;

    /// Cancels the active assignment of a request, if any.
    fn clear_assignment(&self, request_id: &str) -> Result<(), RepositoryError>;

    fn list_active_assignments(&self) -> Result<Vec<Assignment>, RepositoryError>;
}

pub trait ShiftRepository {
    fn list_active_or_planned(&self) -> Result<Vec<DutyShift>, RepositoryError>;

    fn get(&self, id: &str) -> Result<Option<DutyShift>, RepositoryError>;

    /// Adjusts the load counter. Implementations must reject a result outside
    /// `0..=max_requests`.
    fn increment_load(&self, id: &str, delta: i32) -> Result<u32, RepositoryError>;

    fn create(&self, shift: DutyShift) -> Result<ShiftId, RepositoryError>;

    /// Shifts starting on the given date.
    fn list_by_date(&self, date: NaiveDate) -> Result<Vec<DutyShift>, RepositoryError>;

    /// Shifts overlapping `[start, end)`.
    fn list_in_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<DutyShift>, RepositoryError>;
}

pub trait ExecutorDirectory {
    fn list_by_specialization(&self, tag: &str) -> Result<Vec<Executor>, RepositoryError>;
}

/// Resolves free-text addresses to coordinates.
pub trait Geocoder {
    fn geocode(&self, address: &str) -> Result<GeoPoint, GeocodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewAssignment,
    UrgentAssignment,
    Reassigned,
}

/// Fire-and-forget delivery of executor notifications.
pub trait NotificationSink {
    fn notify(&self, executor_id: &ExecutorId, kind: NotificationKind, payload: &Value)
    -> Result<(), String>;
}

/// Sink that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn notify(&self, _: &ExecutorId, _: NotificationKind, _: &Value) -> Result<(), String> {
        Ok(())
    }
}

/// Source of "now" for rules that depend on wall-clock time.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Bundle of collaborators handed to the orchestration components.
#[derive(Clone, Copy)]
pub struct PlannerContext<'a> {
    pub requests: &'a dyn RequestRepository,
    pub shifts: &'a dyn ShiftRepository,
    pub executors: &'a dyn ExecutorDirectory,
    pub notifier: &'a dyn NotificationSink,
    pub clock: &'a dyn Clock,
}

impl<'a> PlannerContext<'a> {
    pub fn new(
        requests: &'a dyn RequestRepository,
        shifts: &'a dyn ShiftRepository,
        executors: &'a dyn ExecutorDirectory,
        notifier: &'a dyn NotificationSink,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            requests,
            shifts,
            executors,
            notifier,
            clock,
        }
    }

    /// Sends a notification, logging delivery failures instead of failing.
    pub(crate) fn notify(&self, executor_id: &ExecutorId, kind: NotificationKind, payload: Value) {
        if let Err(err) = self.notifier.notify(executor_id, kind, &payload) {
            tracing::warn!(executor = %executor_id, ?kind, error = %err, "notification delivery failed");
        }
    }
}
