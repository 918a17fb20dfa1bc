//! Dispatcher tests
//!
//! Assignment choice, batch limits, capacity, failure isolation, urgent
//! handling and workload balancing against the in-memory store.

mod fixtures;

use chrono::{NaiveDate, NaiveDateTime};

use duty_planner::dispatcher::{DispatchConfig, Dispatcher};
use duty_planner::memory::InMemoryStore;
use duty_planner::model::{AssignmentStatus, DutyShift, ShiftId, ShiftStatus, Urgency};
use duty_planner::scoring::AssignmentScorer;
use duty_planner::traits::{NotificationKind, PlannerContext, RequestRepository, ShiftRepository};
use duty_planner::RepositoryError;

use fixtures::*;

fn dispatcher(h: &Harness) -> Dispatcher<'_> {
    Dispatcher::new(h.ctx(), AssignmentScorer::default(), DispatchConfig::default())
}

// ============================================================================
// Assignment choice
// ============================================================================

#[test]
fn test_specialization_outweighs_idle_better_rated_shift() {
    let h = Harness::new();
    h.store.insert_shift(
        shift("shift-a", "e-a", &["electric"], 10)
            .with_load(4)
            .with_rating(4.0)
            .with_coverage_areas(["yunusabad"]),
    );
    h.store.insert_shift(
        shift("shift-b", "e-b", &["plumbing"], 10)
            .with_load(1)
            .with_rating(5.0)
            .with_coverage_areas(["chilanzar"]),
    );
    h.store.insert_request(
        request("r1", "Электрика: нет света", Urgency::Critical, 30).with_address("Yunusabad 4, кв. 12"),
    );

    let report = dispatcher(&h).auto_assign(None, None);

    assert_eq!(report.assigned_count, 1);
    assert_eq!(report.assignments[0].shift_id, "shift-a");
    assert_eq!(h.store.request("r1").unwrap().assigned_shift.as_deref(), Some("shift-a"));
    assert_eq!(h.load("shift-a"), 5);
}

#[test]
fn test_full_shift_never_chosen() {
    let h = Harness::new();
    h.store.insert_shift(shift("full", "e1", &["electric"], 4).with_load(4));
    h.store.insert_request(electric_request("r1", 10));

    let report = dispatcher(&h).auto_assign(None, None);

    assert_eq!(report.assigned_count, 0);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.errors[0].item.as_deref(), Some("r1"));
    assert!(!h.store.request("r1").unwrap().is_assigned());
}

#[test]
fn test_cancelled_and_completed_shifts_ignored() {
    let h = Harness::new();
    h.store.insert_shift(shift("cancelled", "e1", &["electric"], 10).with_status(ShiftStatus::Cancelled));
    h.store.insert_shift(shift("done", "e2", &["electric"], 10).with_status(ShiftStatus::Completed));
    h.store.insert_shift(shift("planned", "e3", &["electric"], 10).with_status(ShiftStatus::Planned));
    h.store.insert_request(electric_request("r1", 10));

    let report = dispatcher(&h).auto_assign(None, None);

    assert_eq!(report.assignments[0].shift_id, "planned");
}

// ============================================================================
// Batch limits and ordering
// ============================================================================

#[test]
fn test_max_assignments_caps_the_batch() {
    let h = Harness::new();
    for i in 0..3 {
        h.store.insert_shift(shift(&format!("s{}", i), &format!("e{}", i), &["electric"], 10));
    }
    for i in 0..20 {
        h.store.insert_request(electric_request(&format!("r{:02}", i), 100 - i));
    }

    let report = dispatcher(&h).auto_assign(None, Some(5));

    assert_eq!(report.assigned_count + report.failed_count, 5);
    assert_eq!(report.assigned_count, 5);
    let unassigned = h.store.all_requests().into_iter().filter(|r| !r.is_assigned()).count();
    assert_eq!(unassigned, 15);
}

#[test]
fn test_most_urgent_then_oldest_first() {
    let h = Harness::new();
    h.store.insert_shift(shift("s1", "e1", &["electric"], 10));
    h.store.insert_request(request("old-ordinary", "Электрика", Urgency::Ordinary, 300));
    h.store.insert_request(request("new-critical", "Электрика", Urgency::Critical, 1));
    h.store.insert_request(request("old-critical", "Электрика", Urgency::Critical, 60));

    let report = dispatcher(&h).auto_assign(None, Some(2));

    let ids: Vec<_> = report.assignments.iter().map(|a| a.request_id.as_str()).collect();
    assert_eq!(ids, vec!["old-critical", "new-critical"]);
}

#[test]
fn test_request_ids_filter() {
    let h = Harness::new();
    h.store.insert_shift(shift("s1", "e1", &["electric"], 10));
    h.store.insert_request(electric_request("r1", 10));
    h.store.insert_request(electric_request("r2", 10));

    let report = dispatcher(&h).auto_assign(Some(&["r2".to_string()][..]), None);

    assert_eq!(report.assigned_count, 1);
    assert!(h.store.request("r2").unwrap().is_assigned());
    assert!(!h.store.request("r1").unwrap().is_assigned());
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn test_capacity_never_exceeded() {
    let h = Harness::new();
    h.store.insert_shift(shift("s1", "e1", &["electric"], 3));
    h.store.insert_shift(shift("s2", "e2", &["electric"], 3));
    for i in 0..10 {
        h.store.insert_request(electric_request(&format!("r{}", i), 10));
    }

    let report = dispatcher(&h).auto_assign(None, None);

    assert_eq!(report.assigned_count, 6);
    assert_eq!(report.failed_count, 4);
    for s in h.store.all_shifts() {
        assert!(s.current_request_count <= s.max_requests, "{} overloaded", s.id);
    }
}

#[test]
fn test_per_executor_cap_applies_below_capacity() {
    let h = Harness::new();
    h.store.insert_shift(shift("big", "e1", &["electric"], 20));
    for i in 0..12 {
        h.store.insert_request(electric_request(&format!("r{:02}", i), 10));
    }

    let report = dispatcher(&h).auto_assign(None, None);

    assert_eq!(report.assigned_count, 8);
    assert_eq!(h.load("big"), 8);
}

#[test]
fn test_reassignment_cancels_previous_assignment() {
    let h = Harness::new();
    h.store.insert_shift(shift("s1", "e1", &["electric"], 10));
    h.store.insert_shift(shift("s2", "e2", &["electric"], 10));
    h.store.insert_request(electric_request("r1", 10));

    let first = h.assign("r1", "s1");
    let second = h.assign("r1", "s2");

    let history = h.store.assignment_history();
    let status_of = |id: &str| history.iter().find(|a| a.id == id).unwrap().status;
    assert_eq!(status_of(&first.id), AssignmentStatus::Cancelled);
    assert_eq!(status_of(&second.id), AssignmentStatus::Active);
    assert_eq!(h.store.list_active_assignments().unwrap().len(), 1);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn test_persistence_failure_is_isolated() {
    let h = Harness::new();
    h.store.insert_shift(shift("broken", "e1", &["electric"], 10));
    h.store.insert_shift(shift("pipes", "e2", &["plumbing"], 10));
    h.store.fail_writes_for("broken");
    h.store.insert_request(electric_request("r-elec", 20));
    h.store.insert_request(plumbing_request("r-pipe", 10));

    let report = dispatcher(&h).auto_assign(None, None);

    assert_eq!(report.assigned_count, 1);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].item.as_deref(), Some("r-elec"));
    assert!(!h.store.request("r-elec").unwrap().is_assigned());
    assert_eq!(h.load("broken"), 0);
    assert!(h.store.request("r-pipe").unwrap().is_assigned());
}

/// Shift repository whose load counter writes always fail.
struct LoadWritesFail<'a>(&'a InMemoryStore);

impl ShiftRepository for LoadWritesFail<'_> {
    fn list_active_or_planned(&self) -> Result<Vec<DutyShift>, RepositoryError> {
        self.0.list_active_or_planned()
    }

    fn get(&self, id: &str) -> Result<Option<DutyShift>, RepositoryError> {
        ShiftRepository::get(self.0, id)
    }

    fn increment_load(&self, id: &str, _delta: i32) -> Result<u32, RepositoryError> {
        Err(RepositoryError::Storage(format!("load counter of {} unavailable", id)))
    }

    fn create(&self, shift: DutyShift) -> Result<ShiftId, RepositoryError> {
        self.0.create(shift)
    }

    fn list_by_date(&self, date: NaiveDate) -> Result<Vec<DutyShift>, RepositoryError> {
        self.0.list_by_date(date)
    }

    fn list_in_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<DutyShift>, RepositoryError> {
        self.0.list_in_range(start, end)
    }
}

#[test]
fn test_load_update_failure_rolls_back_assignment() {
    let h = Harness::new();
    h.store.insert_shift(shift("s1", "e1", &["electric"], 10));
    h.store.insert_request(electric_request("r1", 10));
    let shifts = LoadWritesFail(&h.store);
    let ctx = PlannerContext::new(&h.store, &shifts, &h.store, &h.notifier, &h.clock);

    let report = Dispatcher::new(ctx, AssignmentScorer::default(), DispatchConfig::default())
        .auto_assign(None, None);

    assert_eq!(report.assigned_count, 0);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.errors[0].item.as_deref(), Some("r1"));
    assert!(h.store.list_active_assignments().unwrap().is_empty());
    assert!(!h.store.request("r1").unwrap().is_assigned());
    assert_eq!(h.load("s1"), 0);
    assert!(h.notifier.sent().is_empty());
}

#[test]
fn test_notification_failure_does_not_abort() {
    let h = Harness::with_failing_notifier();
    h.store.insert_shift(shift("s1", "e1", &["electric"], 10));
    h.store.insert_request(electric_request("r1", 10));

    let report = dispatcher(&h).auto_assign(None, None);

    assert_eq!(report.assigned_count, 1);
    assert!(report.errors.is_empty());
}

#[test]
fn test_executor_notified_of_new_assignment() {
    let h = Harness::new();
    h.store.insert_shift(shift("s1", "e1", &["electric"], 10));
    h.store.insert_request(electric_request("r1", 10));

    dispatcher(&h).auto_assign(None, None);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].executor_id, "e1");
    assert_eq!(sent[0].kind, NotificationKind::NewAssignment);
    assert_eq!(sent[0].payload["request_id"], "r1");
}

// ============================================================================
// Urgent handling
// ============================================================================

#[test]
fn test_urgent_handling_only_takes_aged_urgent_requests() {
    let h = Harness::new();
    h.store.insert_shift(shift("s1", "e1", &["electric"], 10));
    h.store.insert_request(request("aged-urgent", "Электрика", Urgency::Urgent, 30));
    h.store.insert_request(request("fresh-critical", "Электрика", Urgency::Critical, 1));
    h.store.insert_request(request("aged-ordinary", "Электрика", Urgency::Ordinary, 300));

    let mut dispatcher = dispatcher(&h);
    let before = *dispatcher.scorer().weights();
    let report = dispatcher.handle_urgent_requests();

    assert_eq!(report.assigned_count, 1);
    assert_eq!(report.assignments[0].request_id, "aged-urgent");
    assert_eq!(*dispatcher.scorer().weights(), before);
    assert_eq!(h.notifier.sent()[0].kind, NotificationKind::UrgentAssignment);
}

#[test]
fn test_urgent_weights_restored_when_nothing_to_do() {
    let h = Harness::new();
    let mut dispatcher = dispatcher(&h);
    let before = *dispatcher.scorer().weights();

    let report = dispatcher.handle_urgent_requests();

    assert_eq!(report.assigned_count, 0);
    assert_eq!(*dispatcher.scorer().weights(), before);
}

// ============================================================================
// Workload balancing
// ============================================================================

#[test]
fn test_balance_moves_two_from_overloaded_shift() {
    let h = Harness::new();
    for id in ["s1", "s2", "s3"] {
        h.store.insert_shift(shift(id, &format!("e-{}", id), &["electric"], 10));
    }
    for i in 0..6 {
        let id = format!("r{}", i);
        h.store.insert_request(electric_request(&id, 10));
        h.assign(&id, "s1");
    }

    let report = dispatcher(&h).balance_workload();

    assert_eq!(report.change_count(), 2);
    assert_eq!(report.loads["s1"], 4);
    assert_eq!(report.loads.values().sum::<u32>(), 6);
    for (id, load) in &report.loads {
        assert_eq!(h.load(id), *load);
    }
    assert!(report.changes.iter().all(|c| c.from_shift == "s1"));
    assert!(h.notifier.sent().iter().all(|n| n.kind == NotificationKind::Reassigned));
}

#[test]
fn test_balance_is_noop_with_single_shift() {
    let h = Harness::new();
    h.store.insert_shift(shift("s1", "e1", &["electric"], 10));
    for i in 0..4 {
        let id = format!("r{}", i);
        h.store.insert_request(electric_request(&id, 10));
        h.assign(&id, "s1");
    }

    let report = dispatcher(&h).balance_workload();

    assert_eq!(report.change_count(), 0);
    assert_eq!(report.loads["s1"], 4);
}

#[test]
fn test_balance_is_noop_when_balanced() {
    let h = Harness::new();
    for id in ["s1", "s2"] {
        h.store.insert_shift(shift(id, &format!("e-{}", id), &["electric"], 10));
    }
    for i in 0..4 {
        let id = format!("r{}", i);
        h.store.insert_request(electric_request(&id, 10));
        h.assign(&id, if i % 2 == 0 { "s1" } else { "s2" });
    }

    let report = dispatcher(&h).balance_workload();

    assert_eq!(report.change_count(), 0);
}

#[test]
fn test_balance_reports_failed_source_release() {
    let h = Harness::new();
    for id in ["s1", "s2", "s3"] {
        h.store.insert_shift(shift(id, &format!("e-{}", id), &["electric"], 10));
    }
    for i in 0..6 {
        let id = format!("r{}", i);
        h.store.insert_request(electric_request(&id, 10));
        h.assign(&id, "s1");
    }
    h.store.fail_writes_for("s1");

    let report = dispatcher(&h).balance_workload();

    assert_eq!(report.change_count(), 0);
    assert!(!report.errors.is_empty());
    assert!(report.errors.iter().all(|e| e.item.is_some()));
    assert_eq!(report.loads["s1"], 6);

    let active = h.store.list_active_assignments().unwrap();
    assert_eq!(active.len(), 6);
    assert!(active.iter().all(|a| a.shift_id == "s1"));
    for id in ["s1", "s2", "s3"] {
        let on_shift = active.iter().filter(|a| a.shift_id == id).count() as u32;
        assert_eq!(h.load(id), on_shift, "load of {} out of sync", id);
        assert_eq!(report.loads[id], on_shift);
    }
    assert!(h.notifier.sent().is_empty());
}
