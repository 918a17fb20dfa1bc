//! Greedy request-to-shift dispatch.
//!
//! Requests are processed most urgent first, oldest first within the same
//! urgency. Each goes to the highest scoring recommended shift that still has
//! room. Every assignment is persisted as soon as it is made; a failure only
//! affects the request being written.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::PlannerConfig;
use crate::error::{BatchError, PlannerError};
use crate::model::{Assignment, DutyShift, RequestId, ServiceRequest, ShiftId, Urgency};
use crate::scoring::{AssignmentScore, AssignmentScorer, MAX_REQUESTS_PER_EXECUTOR};
use crate::traits::{NotificationKind, PlannerContext, RequestFilter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_requests_per_executor: u32,
    /// Urgency weight used while handling urgent batches.
    pub urgent_weight: f64,
    /// Urgent requests younger than this are left to the regular intake path.
    pub urgent_grace_minutes: i64,
    /// Shifts above `mean * overload_ratio` are overloaded.
    pub overload_ratio: f64,
    /// Shifts below `mean * underload_ratio` are underloaded.
    pub underload_ratio: f64,
    /// Assignments moved off one overloaded shift per balancing pass.
    pub max_moves_per_shift: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_requests_per_executor: MAX_REQUESTS_PER_EXECUTOR,
            urgent_weight: 0.3,
            urgent_grace_minutes: 5,
            overload_ratio: 1.3,
            underload_ratio: 0.7,
            max_moves_per_shift: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub assigned_count: usize,
    pub failed_count: usize,
    pub assignments: Vec<Assignment>,
    pub errors: Vec<BatchError>,
    pub processing_time: Duration,
    pub summary: String,
}

/// One assignment moved from one shift to another.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relocation {
    /// Id of the newly created assignment.
    pub assignment_id: String,
    pub request_id: RequestId,
    pub from_shift: ShiftId,
    pub to_shift: ShiftId,
    pub old_score: f64,
    pub new_score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BalanceReport {
    pub changes: Vec<Relocation>,
    /// Load per shift after balancing.
    pub loads: BTreeMap<ShiftId, u32>,
    pub errors: Vec<BatchError>,
}

impl BalanceReport {
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }
}

pub struct Dispatcher<'a> {
    ctx: PlannerContext<'a>,
    scorer: AssignmentScorer,
    config: DispatchConfig,
}

impl<'a> Dispatcher<'a> {
    pub fn new(ctx: PlannerContext<'a>, scorer: AssignmentScorer, config: DispatchConfig) -> Self {
        Self {
            ctx,
            scorer,
            config,
        }
    }

    pub fn from_config(ctx: PlannerContext<'a>, config: &PlannerConfig) -> Self {
        Self::new(ctx, AssignmentScorer::from_config(config), config.dispatch.clone())
    }

    pub fn scorer(&self) -> &AssignmentScorer {
        &self.scorer
    }

    /// Assigns unassigned requests (optionally only `request_ids`, at most
    /// `max_assignments` of them) to their best recommended shift.
    #[tracing::instrument(skip_all, fields(max_assignments = ?max_assignments))]
    pub fn auto_assign(
        &mut self,
        request_ids: Option<&[RequestId]>,
        max_assignments: Option<usize>,
    ) -> DispatchReport {
        let filter = RequestFilter {
            ids: request_ids.map(<[RequestId]>::to_vec),
            ..RequestFilter::default()
        };
        run_batch(
            &self.ctx,
            &self.scorer,
            &filter,
            max_assignments,
            "auto_assign",
            NotificationKind::NewAssignment,
        )
    }

    /// Dispatches urgent and critical requests with the urgency weight raised.
    /// The original weights are restored when the call returns.
    #[tracing::instrument(skip_all)]
    pub fn handle_urgent_requests(&mut self) -> DispatchReport {
        let cutoff =
            self.ctx.clock.now() - chrono::Duration::minutes(self.config.urgent_grace_minutes);
        let filter = RequestFilter {
            min_urgency: Some(Urgency::Urgent),
            created_before: Some(cutoff),
            ..RequestFilter::default()
        };

        let boosted = self.scorer.weights().with_urgency(self.config.urgent_weight);
        let scorer = self.scorer.override_weights(boosted);
        run_batch(
            &self.ctx,
            &scorer,
            &filter,
            None,
            "urgent_dispatch",
            NotificationKind::UrgentAssignment,
        )
    }

    /// Moves the weakest assignments off overloaded shifts onto underloaded ones.
    #[tracing::instrument(skip_all)]
    pub fn balance_workload(&mut self) -> BalanceReport {
        let mut report = BalanceReport::default();

        let mut shifts = match self.ctx.shifts.list_active_or_planned() {
            Ok(shifts) => shifts,
            Err(err) => {
                warn!(error = %err, "cannot load shifts for balancing");
                report.errors.push(BatchError::general(err));
                return report;
            }
        };
        report.loads = load_map(&shifts);

        if shifts.len() < 2 {
            return report;
        }
        let mean = mean_load(&shifts);
        if mean <= 0.0 {
            return report;
        }

        let mut overloaded: Vec<usize> = (0..shifts.len())
            .filter(|&i| shifts[i].current_request_count as f64 > mean * self.config.overload_ratio)
            .collect();
        overloaded.sort_by(|&a, &b| {
            shifts[b]
                .current_request_count
                .cmp(&shifts[a].current_request_count)
        });
        let underloaded: Vec<usize> = (0..shifts.len())
            .filter(|&i| (shifts[i].current_request_count as f64) < mean * self.config.underload_ratio)
            .collect();

        if overloaded.is_empty() || underloaded.is_empty() {
            debug!(mean, "workload already balanced");
            return report;
        }

        let assignments = match self.ctx.requests.list_active_assignments() {
            Ok(assignments) => assignments,
            Err(err) => {
                report.errors.push(BatchError::general(err));
                return report;
            }
        };

        for &source in &overloaded {
            let mut candidates: Vec<(Assignment, ServiceRequest, f64)> = Vec::new();
            for assignment in assignments.iter().filter(|a| a.shift_id == shifts[source].id) {
                match self.ctx.requests.get(&assignment.request_id) {
                    Ok(Some(request)) => {
                        let score = self.scorer.score(&request, &shifts[source]).total;
                        candidates.push((assignment.clone(), request, score));
                    }
                    Ok(None) => report.errors.push(BatchError::for_item(
                        &assignment.request_id,
                        PlannerError::not_found("request", &assignment.request_id),
                    )),
                    Err(err) => report
                        .errors
                        .push(BatchError::for_item(&assignment.request_id, err)),
                }
            }
            candidates.sort_by(|a, b| a.2.total_cmp(&b.2));

            for (assignment, request, old_score) in
                candidates.into_iter().take(self.config.max_moves_per_shift)
            {
                let target = underloaded
                    .iter()
                    .copied()
                    .filter(|&i| {
                        self.scorer
                            .has_room(shifts[i].current_request_count, shifts[i].max_requests)
                            && shifts[i].current_request_count + 1
                                < shifts[source].current_request_count
                    })
                    .map(|i| (i, self.scorer.score(&request, &shifts[i])))
                    .fold(None, pick_better);

                let Some((target, score)) = target else {
                    continue;
                };

                match relocate(&self.ctx, &assignment, &shifts[target], score.total, "balance_workload") {
                    Ok(moved) => {
                        shifts[source].current_request_count -= 1;
                        shifts[target].current_request_count += 1;
                        report.changes.push(Relocation {
                            assignment_id: moved.id,
                            request_id: request.id.clone(),
                            from_shift: shifts[source].id.clone(),
                            to_shift: shifts[target].id.clone(),
                            old_score,
                            new_score: score.total,
                            reason: "balance_workload".to_string(),
                        });
                    }
                    Err(err) => {
                        warn!(request = %request.id, error = %err, "relocation failed");
                        report.errors.push(BatchError::for_item(&request.id, err));
                    }
                }
            }
        }

        report.loads = load_map(&shifts);
        info!(changes = report.changes.len(), "workload balancing finished");
        report
    }
}

fn run_batch(
    ctx: &PlannerContext<'_>,
    scorer: &AssignmentScorer,
    filter: &RequestFilter,
    limit: Option<usize>,
    reason: &str,
    kind: NotificationKind,
) -> DispatchReport {
    let started = Instant::now();
    let mut report = DispatchReport::default();

    let mut requests = match ctx.requests.list_unassigned(filter) {
        Ok(requests) => requests,
        Err(err) => {
            warn!(error = %err, "cannot load unassigned requests");
            report.errors.push(BatchError::general(err));
            return finish(report, started, reason);
        }
    };
    let mut shifts = match ctx.shifts.list_active_or_planned() {
        Ok(shifts) => shifts,
        Err(err) => {
            warn!(error = %err, "cannot load shifts");
            report.errors.push(BatchError::general(err));
            return finish(report, started, reason);
        }
    };

    requests.sort_by(|a, b| {
        b.urgency
            .cmp(&a.urgency)
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    if let Some(limit) = limit {
        requests.truncate(limit);
    }

    for request in &requests {
        let best = shifts
            .iter()
            .enumerate()
            .filter(|(_, shift)| !shift.is_full())
            .map(|(i, shift)| (i, scorer.score(request, shift)))
            .filter(|(_, score)| score.recommended)
            .fold(None, pick_better);

        let Some((idx, score)) = best else {
            warn!(request = %request.id, "no recommended shift");
            report.failed_count += 1;
            report
                .errors
                .push(BatchError::for_item(&request.id, "no recommended shift available"));
            continue;
        };

        match persist_assignment(ctx, request, &shifts[idx], score.total, reason) {
            Ok(assignment) => {
                debug!(request = %request.id, shift = %shifts[idx].id, score = score.total, "assigned");
                shifts[idx].current_request_count += 1;
                ctx.notify(
                    &shifts[idx].executor_id,
                    kind,
                    json!({
                        "request_id": request.id,
                        "shift_id": shifts[idx].id,
                        "category": request.category,
                        "urgency": request.urgency,
                        "score": score.total,
                    }),
                );
                report.assigned_count += 1;
                report.assignments.push(assignment);
            }
            Err(err) => {
                warn!(request = %request.id, error = %err, "assignment failed");
                report.failed_count += 1;
                report.errors.push(BatchError::for_item(&request.id, err));
            }
        }
    }

    finish(report, started, reason)
}

fn finish(mut report: DispatchReport, started: Instant, reason: &str) -> DispatchReport {
    report.processing_time = started.elapsed();
    report.summary = format!(
        "{}: {} assigned, {} failed",
        reason, report.assigned_count, report.failed_count
    );
    info!(
        assigned = report.assigned_count,
        failed = report.failed_count,
        reason,
        "dispatch batch finished"
    );
    report
}

/// Keeps the first candidate with the highest total.
fn pick_better(
    best: Option<(usize, AssignmentScore)>,
    candidate: (usize, AssignmentScore),
) -> Option<(usize, AssignmentScore)> {
    match best {
        Some(current) if current.1.total >= candidate.1.total => Some(current),
        _ => Some(candidate),
    }
}

/// Records the assignment and bumps the shift load, undoing the record if the
/// load update fails.
fn persist_assignment(
    ctx: &PlannerContext<'_>,
    request: &ServiceRequest,
    shift: &DutyShift,
    score: f64,
    reason: &str,
) -> Result<Assignment, PlannerError> {
    let assignment = ctx
        .requests
        .record_assignment(&request.id, &shift.id, score, reason)?;

    if let Err(err) = ctx.shifts.increment_load(&shift.id, 1) {
        if let Err(rollback) = ctx.requests.clear_assignment(&request.id) {
            error!(request = %request.id, error = %rollback, "rollback of assignment failed");
        }
        return Err(err.into());
    }
    Ok(assignment)
}

/// Moves an active assignment to `target`. Both load counters are adjusted
/// before the assignment is rewritten; any failed write is undone so loads
/// keep matching the active assignments.
pub(crate) fn relocate(
    ctx: &PlannerContext<'_>,
    assignment: &Assignment,
    target: &DutyShift,
    score: f64,
    reason: &str,
) -> Result<Assignment, PlannerError> {
    ctx.shifts.increment_load(&target.id, 1)?;

    if let Err(err) = ctx.shifts.increment_load(&assignment.shift_id, -1) {
        undo_load(ctx, &target.id, -1);
        return Err(err.into());
    }

    let moved = match ctx
        .requests
        .record_assignment(&assignment.request_id, &target.id, score, reason)
    {
        Ok(moved) => moved,
        Err(err) => {
            undo_load(ctx, &assignment.shift_id, 1);
            undo_load(ctx, &target.id, -1);
            return Err(err.into());
        }
    };

    debug!(
        request = %assignment.request_id,
        from = %assignment.shift_id,
        to = %target.id,
        "relocated assignment"
    );
    ctx.notify(
        &target.executor_id,
        NotificationKind::Reassigned,
        json!({
            "request_id": assignment.request_id,
            "from_shift": assignment.shift_id,
            "shift_id": target.id,
            "score": score,
        }),
    );
    Ok(moved)
}

fn undo_load(ctx: &PlannerContext<'_>, shift_id: &str, delta: i32) {
    if let Err(err) = ctx.shifts.increment_load(shift_id, delta) {
        error!(shift = %shift_id, delta, error = %err, "load rollback failed");
    }
}

pub(crate) fn mean_load(shifts: &[DutyShift]) -> f64 {
    if shifts.is_empty() {
        return 0.0;
    }
    shifts
        .iter()
        .map(|s| s.current_request_count as f64)
        .sum::<f64>()
        / shifts.len() as f64
}

fn load_map(shifts: &[DutyShift]) -> BTreeMap<ShiftId, u32> {
    shifts
        .iter()
        .map(|s| (s.id.clone(), s.current_request_count))
        .collect()
}
