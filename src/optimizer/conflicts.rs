//! Constraint checks over the live assignment set.

use chrono::Duration;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use super::AssignmentOptimizer;
use crate::dispatcher::Dispatcher;
use crate::error::PlannerError;
use crate::model::Urgency;
use crate::traits::RequestFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ShiftOverload,
    SpecializationMismatch,
    /// Overlapping work for one executor. Not detected here; overlapping
    /// shifts are the roster owner's responsibility.
    TimeConflict,
    StaleUrgentRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintViolation {
    pub kind: ViolationKind,
    pub severity: Severity,
    /// Shift, assignment or request the violation is about.
    pub subject_id: String,
    pub message: String,
    pub auto_resolved: bool,
}

impl<'a, R: Rng> AssignmentOptimizer<'a, R> {
    /// Detects constraint violations. Stale urgent requests are critical and
    /// immediately sent through urgent dispatch; everything else is reported.
    #[tracing::instrument(skip_all)]
    pub fn resolve_conflicts(&mut self) -> Result<Vec<ConstraintViolation>, PlannerError> {
        let mut violations = Vec::new();

        let shifts = self.ctx.shifts.list_active_or_planned()?;
        let cap = self.scorer.max_requests_per_executor();
        for shift in &shifts {
            if shift.current_request_count > shift.max_requests {
                violations.push(ConstraintViolation {
                    kind: ViolationKind::ShiftOverload,
                    severity: Severity::High,
                    subject_id: shift.id.clone(),
                    message: format!(
                        "shift carries {} requests, capacity is {}",
                        shift.current_request_count, shift.max_requests
                    ),
                    auto_resolved: false,
                });
            } else if shift.current_request_count > cap {
                violations.push(ConstraintViolation {
                    kind: ViolationKind::ShiftOverload,
                    severity: Severity::Medium,
                    subject_id: shift.id.clone(),
                    message: format!(
                        "executor holds {} requests, limit is {}",
                        shift.current_request_count, cap
                    ),
                    auto_resolved: false,
                });
            }
        }

        for assignment in self.ctx.requests.list_active_assignments()? {
            let Some(shift) = shifts.iter().find(|s| s.id == assignment.shift_id) else {
                continue;
            };
            let Some(request) = self.ctx.requests.get(&assignment.request_id)? else {
                continue;
            };
            let matched = self.scorer.specialization_match(&request, shift);
            if matched < self.config.min_specialization_match {
                violations.push(ConstraintViolation {
                    kind: ViolationKind::SpecializationMismatch,
                    severity: Severity::Medium,
                    subject_id: assignment.id.clone(),
                    message: format!(
                        "request {} matches shift {} at {:.2}",
                        request.id, shift.id, matched
                    ),
                    auto_resolved: false,
                });
            }
        }

        let cutoff = self.ctx.clock.now() - Duration::minutes(self.config.urgent_response_minutes);
        let stale = self.ctx.requests.list_unassigned(&RequestFilter {
            min_urgency: Some(Urgency::Urgent),
            created_before: Some(cutoff),
            ..RequestFilter::default()
        })?;
        let first_stale = violations.len();
        for request in &stale {
            violations.push(ConstraintViolation {
                kind: ViolationKind::StaleUrgentRequest,
                severity: Severity::Critical,
                subject_id: request.id.clone(),
                message: format!(
                    "urgent request unassigned since {}",
                    request.created_at.format("%Y-%m-%d %H:%M")
                ),
                auto_resolved: false,
            });
        }

        if !stale.is_empty() {
            warn!(count = stale.len(), "stale urgent requests, dispatching");
            let report =
                Dispatcher::new(self.ctx, self.scorer.clone(), self.dispatch.clone()).handle_urgent_requests();
            for violation in &mut violations[first_stale..] {
                violation.auto_resolved = report
                    .assignments
                    .iter()
                    .any(|a| a.request_id == violation.subject_id);
            }
        }

        info!(
            violations = violations.len(),
            resolved = violations.iter().filter(|v| v.auto_resolved).count(),
            "conflict check finished"
        );
        Ok(violations)
    }
}
