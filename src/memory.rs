//! In-memory collaborator implementations.
//!
//! Useful for embedding the planner without a database and as the reference
//! behavior for the repository contracts: loads never leave
//! `0..=max_requests`, and a request has at most one active assignment.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::{GeocodeError, RepositoryError};
use crate::geo::GeoPoint;
use crate::model::{
    Assignment, AssignmentKind, AssignmentStatus, DutyShift, Executor, ExecutorId, RequestId,
    ServiceRequest, ShiftId,
};
use crate::traits::{
    Clock, ExecutorDirectory, Geocoder, NotificationKind, NotificationSink, RequestFilter,
    RequestRepository, ShiftRepository, SystemClock,
};

#[derive(Debug, Default)]
struct StoreState {
    requests: BTreeMap<RequestId, ServiceRequest>,
    shifts: BTreeMap<ShiftId, DutyShift>,
    executors: BTreeMap<ExecutorId, Executor>,
    assignments: Vec<Assignment>,
    next_assignment: u64,
    failing_shifts: HashSet<ShiftId>,
}

/// Thread-safe in-memory store for requests, shifts and executors.
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    clock: Box<dyn Clock + Send + Sync>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Store that timestamps assignments with the given clock.
    pub fn with_clock(clock: impl Clock + Send + Sync + 'static) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            clock: Box::new(clock),
        }
    }

    pub fn insert_request(&self, request: ServiceRequest) {
        self.state.write().requests.insert(request.id.clone(), request);
    }

    pub fn insert_shift(&self, shift: DutyShift) {
        self.state.write().shifts.insert(shift.id.clone(), shift);
    }

    pub fn insert_executor(&self, executor: Executor) {
        self.state.write().executors.insert(executor.id.clone(), executor);
    }

    /// Makes every assignment write targeting the shift fail.
    pub fn fail_writes_for(&self, shift_id: impl Into<ShiftId>) {
        self.state.write().failing_shifts.insert(shift_id.into());
    }

    pub fn request(&self, id: &str) -> Option<ServiceRequest> {
        self.state.read().requests.get(id).cloned()
    }

    pub fn shift(&self, id: &str) -> Option<DutyShift> {
        self.state.read().shifts.get(id).cloned()
    }

    pub fn all_shifts(&self) -> Vec<DutyShift> {
        self.state.read().shifts.values().cloned().collect()
    }

    pub fn all_requests(&self) -> Vec<ServiceRequest> {
        self.state.read().requests.values().cloned().collect()
    }

    /// Every assignment ever recorded, including cancelled ones.
    pub fn assignment_history(&self) -> Vec<Assignment> {
        self.state.read().assignments.clone()
    }
}

impl RequestRepository for InMemoryStore {
    fn list_unassigned(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        Ok(self
            .state
            .read()
            .requests
            .values()
            .filter(|r| !r.is_assigned() && filter.matches(r))
            .cloned()
            .collect())
    }

    fn get(&self, id: &str) -> Result<Option<ServiceRequest>, RepositoryError> {
        Ok(self.request(id))
    }

    fn list_by_date_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        Ok(self
            .state
            .read()
            .requests
            .values()
            .filter(|r| r.created_at >= start && r.created_at < end)
            .cloned()
            .collect())
    }

    fn record_assignment(
        &self,
        request_id: &str,
        shift_id: &str,
        score: f64,
        reason: &str,
    ) -> Result<Assignment, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.write();

        if state.failing_shifts.contains(shift_id) {
            return Err(RepositoryError::Storage(format!(
                "write rejected for shift {}",
                shift_id
            )));
        }
        if !state.shifts.contains_key(shift_id) {
            return Err(RepositoryError::NotFound {
                entity: "shift",
                id: shift_id.to_string(),
            });
        }
        if !state.requests.contains_key(request_id) {
            return Err(RepositoryError::NotFound {
                entity: "request",
                id: request_id.to_string(),
            });
        }

        for previous in state
            .assignments
            .iter_mut()
            .filter(|a| a.request_id == request_id && a.is_active())
        {
            previous.status = AssignmentStatus::Cancelled;
        }

        state.next_assignment += 1;
        let assignment = Assignment {
            id: format!("asg-{}", state.next_assignment),
            request_id: request_id.to_string(),
            shift_id: shift_id.to_string(),
            kind: AssignmentKind::Individual,
            score,
            reason: reason.to_string(),
            status: AssignmentStatus::Active,
            created_at: now,
        };
        state.assignments.push(assignment.clone());
        if let Some(request) = state.requests.get_mut(request_id) {
            request.assigned_shift = Some(shift_id.to_string());
        }

        Ok(assignment)
    }

    fn clear_assignment(&self, request_id: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let Some(request) = state.requests.get_mut(request_id) else {
            return Err(RepositoryError::NotFound {
                entity: "request",
                id: request_id.to_string(),
            });
        };
        request.assigned_shift = None;
        for assignment in state
            .assignments
            .iter_mut()
            .filter(|a| a.request_id == request_id && a.is_active())
        {
            assignment.status = AssignmentStatus::Cancelled;
        }
        Ok(())
    }

    fn list_active_assignments(&self) -> Result<Vec<Assignment>, RepositoryError> {
        Ok(self
            .state
            .read()
            .assignments
            .iter()
            .filter(|a| a.is_active())
            .cloned()
            .collect())
    }
}

impl ShiftRepository for InMemoryStore {
    fn list_active_or_planned(&self) -> Result<Vec<DutyShift>, RepositoryError> {
        Ok(self
            .state
            .read()
            .shifts
            .values()
            .filter(|s| s.is_assignable())
            .cloned()
            .collect())
    }

    fn get(&self, id: &str) -> Result<Option<DutyShift>, RepositoryError> {
        Ok(self.shift(id))
    }

    fn increment_load(&self, id: &str, delta: i32) -> Result<u32, RepositoryError> {
        let mut state = self.state.write();
        if state.failing_shifts.contains(id) {
            return Err(RepositoryError::Storage(format!("write rejected for shift {}", id)));
        }
        let shift = state.shifts.get_mut(id).ok_or_else(|| RepositoryError::NotFound {
            entity: "shift",
            id: id.to_string(),
        })?;

        let next = shift.current_request_count as i64 + delta as i64;
        if next < 0 || next > shift.max_requests as i64 {
            return Err(RepositoryError::Constraint(format!(
                "load {} outside 0..={} for shift {}",
                next, shift.max_requests, id
            )));
        }
        shift.current_request_count = next as u32;
        Ok(shift.current_request_count)
    }

    fn create(&self, shift: DutyShift) -> Result<ShiftId, RepositoryError> {
        let mut state = self.state.write();
        if state.shifts.contains_key(&shift.id) {
            return Err(RepositoryError::Constraint(format!(
                "shift {} already exists",
                shift.id
            )));
        }
        let id = shift.id.clone();
        state.shifts.insert(id.clone(), shift);
        Ok(id)
    }

    fn list_by_date(&self, date: NaiveDate) -> Result<Vec<DutyShift>, RepositoryError> {
        Ok(self
            .state
            .read()
            .shifts
            .values()
            .filter(|s| s.date() == date)
            .cloned()
            .collect())
    }

    fn list_in_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<DutyShift>, RepositoryError> {
        Ok(self
            .state
            .read()
            .shifts
            .values()
            .filter(|s| s.start < end && s.end > start)
            .cloned()
            .collect())
    }
}

impl ExecutorDirectory for InMemoryStore {
    fn list_by_specialization(&self, tag: &str) -> Result<Vec<Executor>, RepositoryError> {
        Ok(self
            .state
            .read()
            .executors
            .values()
            .filter(|e| e.specializations.contains(tag))
            .cloned()
            .collect())
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub executor_id: ExecutorId,
    pub kind: NotificationKind,
    pub payload: Value,
}

/// Notification sink that keeps everything it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose deliveries always fail.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(
        &self,
        executor_id: &ExecutorId,
        kind: NotificationKind,
        payload: &Value,
    ) -> Result<(), String> {
        if self.fail {
            return Err("delivery channel unavailable".to_string());
        }
        self.sent.lock().push(SentNotification {
            executor_id: executor_id.clone(),
            kind,
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Geocoder backed by a fixed address table.
#[derive(Debug, Default, Clone)]
pub struct StaticGeocoder {
    known: HashMap<String, GeoPoint>,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: impl Into<String>, point: GeoPoint) -> Self {
        self.known.insert(address.into(), point);
        self
    }
}

impl Geocoder for StaticGeocoder {
    fn geocode(&self, address: &str) -> Result<GeoPoint, GeocodeError> {
        self.known
            .get(address)
            .cloned()
            .ok_or_else(|| GeocodeError::NotFound(address.to_string()))
    }
}
