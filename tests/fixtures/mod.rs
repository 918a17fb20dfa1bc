//! Test fixtures for duty-planner.
//!
//! Provides realistic test data including:
//! - Tashkent locations for geo and proximity tests
//! - A store harness with a fixed clock and a recording notifier
//! - Builders for requests, shifts and executors

#![allow(dead_code)]

pub mod tashkent_locations;

pub use tashkent_locations::*;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use duty_planner::memory::{InMemoryStore, RecordingNotifier};
use duty_planner::model::{Assignment, DutyShift, Executor, ServiceRequest, ShiftStatus, Urgency};
use duty_planner::traits::{FixedClock, PlannerContext, RequestRepository, ShiftRepository};

// ============================================================================
// Time
// ============================================================================

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid fixture date")
}

pub fn at(date: NaiveDate, hour: u32) -> NaiveDateTime {
    date.and_hms_opt(hour, 0, 0).expect("valid fixture hour")
}

/// Monday, 10:00. Every harness runs at this instant.
pub fn now() -> NaiveDateTime {
    at(today(), 10)
}

pub fn today() -> NaiveDate {
    day(2025, 3, 3)
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: InMemoryStore,
    pub notifier: RecordingNotifier,
    pub clock: FixedClock,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: InMemoryStore::with_clock(FixedClock(now())),
            notifier: RecordingNotifier::new(),
            clock: FixedClock(now()),
        }
    }

    pub fn with_failing_notifier() -> Self {
        Self {
            notifier: RecordingNotifier::failing(),
            ..Self::new()
        }
    }

    pub fn ctx(&self) -> PlannerContext<'_> {
        PlannerContext::new(
            &self.store,
            &self.store,
            &self.store,
            &self.notifier,
            &self.clock,
        )
    }

    /// Records an active assignment and bumps the shift load, as a dispatch
    /// would have done.
    pub fn assign(&self, request_id: &str, shift_id: &str) -> Assignment {
        let assignment = self
            .store
            .record_assignment(request_id, shift_id, 0.5, "fixture")
            .expect("fixture assignment");
        self.store
            .increment_load(shift_id, 1)
            .expect("fixture load within capacity");
        assignment
    }

    pub fn load(&self, shift_id: &str) -> u32 {
        self.store
            .shift(shift_id)
            .map(|s| s.current_request_count)
            .unwrap_or_default()
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Request created `minutes_ago` before [`now`].
pub fn request(id: &str, category: &str, urgency: Urgency, minutes_ago: i64) -> ServiceRequest {
    ServiceRequest::new(id, category, urgency, now() - Duration::minutes(minutes_ago))
}

/// Active 12-hour day shift today, serving any area.
pub fn shift(id: &str, executor: &str, tags: &[&str], max_requests: u32) -> DutyShift {
    DutyShift::new(id, executor, at(today(), 8), at(today(), 20), max_requests)
        .with_specializations(tags.iter().copied())
        .with_status(ShiftStatus::Active)
}

pub fn executor(id: &str, tags: &[&str]) -> Executor {
    Executor::new(id, tags.iter().copied())
}

/// Electric request mapped through the default category table.
pub fn electric_request(id: &str, minutes_ago: i64) -> ServiceRequest {
    request(id, "Электрика: нет света", Urgency::Ordinary, minutes_ago)
}

pub fn plumbing_request(id: &str, minutes_ago: i64) -> ServiceRequest {
    request(id, "Сантехника: течёт кран", Urgency::Ordinary, minutes_ago)
}
