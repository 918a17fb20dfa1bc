//! In-memory snapshot of the assignments an optimization pass may move.
//!
//! Candidate solutions are plain `Vec<usize>` mappings from assignment index
//! to shift index. The load-independent part of every eligible pairing is
//! scored once up front so metaheuristics only recompute the workload term.

use rand::Rng;
use tracing::warn;

use super::{OptimizationMetrics, Scope};
use crate::error::{BatchError, PlannerError, RepositoryError};
use crate::model::{Assignment, DutyShift, ServiceRequest, ShiftStatus};
use crate::scoring::{AssignmentScorer, workload_balance};
use crate::traits::PlannerContext;

pub(crate) type Mapping = Vec<usize>;

pub(crate) struct Problem {
    pub assignments: Vec<Assignment>,
    pub requests: Vec<ServiceRequest>,
    pub shifts: Vec<DutyShift>,
    /// Shift index each assignment is on right now.
    pub current: Mapping,
    /// Shift indices each assignment may move to, current shift included.
    pub eligible: Vec<Vec<usize>>,
    /// Load of each shift not accounted for by in-scope assignments.
    base_loads: Vec<u32>,
    /// Highest load a mapping may put on each shift.
    limits: Vec<u32>,
    /// `fixed[i][j]`: load-independent score of assignment `i` on shift `j`.
    fixed: Vec<Vec<f64>>,
    workload_weight: f64,
}

impl Problem {
    pub fn build(
        ctx: &PlannerContext<'_>,
        scorer: &AssignmentScorer,
        scope: Scope,
        min_specialization_match: f64,
        errors: &mut Vec<BatchError>,
    ) -> Result<Self, RepositoryError> {
        let shifts = ctx.shifts.list_active_or_planned()?;
        let active = ctx.requests.list_active_assignments()?;

        let mut assignments = Vec::new();
        let mut requests = Vec::new();
        let mut current = Vec::new();
        for assignment in active {
            let Some(shift_idx) = shifts.iter().position(|s| s.id == assignment.shift_id) else {
                continue;
            };
            if scope == Scope::Active && shifts[shift_idx].status != ShiftStatus::Active {
                continue;
            }
            let request = match ctx.requests.get(&assignment.request_id) {
                Ok(Some(request)) => request,
                Ok(None) => {
                    errors.push(BatchError::for_item(
                        &assignment.request_id,
                        PlannerError::not_found("request", &assignment.request_id),
                    ));
                    continue;
                }
                Err(err) => {
                    warn!(request = %assignment.request_id, error = %err, "cannot load request");
                    errors.push(BatchError::for_item(&assignment.request_id, err));
                    continue;
                }
            };
            if scope == Scope::Urgent && !request.urgency.is_urgent() {
                continue;
            }
            assignments.push(assignment);
            requests.push(request);
            current.push(shift_idx);
        }

        let mut base_loads: Vec<u32> = shifts.iter().map(|s| s.current_request_count).collect();
        for &j in &current {
            base_loads[j] = base_loads[j].saturating_sub(1);
        }
        let limits = shifts
            .iter()
            .map(|s| s.max_requests.max(s.current_request_count))
            .collect();

        let mut eligible = Vec::with_capacity(assignments.len());
        let mut fixed = Vec::with_capacity(assignments.len());
        for (i, request) in requests.iter().enumerate() {
            let mut options = Vec::new();
            let mut row = vec![0.0; shifts.len()];
            for (j, shift) in shifts.iter().enumerate() {
                if j == current[i]
                    || (shift.is_assignable()
                        && scorer.specialization_match(request, shift) >= min_specialization_match)
                {
                    options.push(j);
                    row[j] = scorer.fixed_component(request, shift);
                }
            }
            eligible.push(options);
            fixed.push(row);
        }

        Ok(Self {
            assignments,
            requests,
            shifts,
            current,
            eligible,
            base_loads,
            limits,
            fixed,
            workload_weight: scorer.weights().workload,
        })
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn loads(&self, mapping: &[usize]) -> Vec<u32> {
        let mut loads = self.base_loads.clone();
        for &j in mapping {
            loads[j] += 1;
        }
        loads
    }

    /// Total score of assignment `i` on shift `j` carrying `load` requests.
    pub fn score(&self, i: usize, j: usize, load: u32) -> f64 {
        let workload = workload_balance(load, self.shifts[j].max_requests) * self.workload_weight;
        (self.fixed[i][j] + workload).clamp(0.0, 1.0)
    }

    pub fn mean_score(&self, mapping: &[usize]) -> f64 {
        if mapping.is_empty() {
            return 0.0;
        }
        let loads = self.loads(mapping);
        mapping
            .iter()
            .enumerate()
            .map(|(i, &j)| self.score(i, j, loads[j]))
            .sum::<f64>()
            / mapping.len() as f64
    }

    fn overflow(&self, loads: &[u32]) -> u32 {
        loads
            .iter()
            .zip(&self.limits)
            .map(|(load, limit)| load.saturating_sub(*limit))
            .sum()
    }

    pub fn is_feasible(&self, mapping: &[usize]) -> bool {
        self.overflow(&self.loads(mapping)) == 0
    }

    /// Mean score, minus one per request placed over a shift's capacity.
    pub fn fitness(&self, mapping: &[usize]) -> f64 {
        self.mean_score(mapping) - self.overflow(&self.loads(mapping)) as f64
    }

    pub fn has_room(&self, j: usize, load: u32) -> bool {
        load < self.shifts[j].max_requests
    }

    pub fn random_option<R: Rng>(&self, i: usize, rng: &mut R) -> usize {
        let options = &self.eligible[i];
        options[rng.gen_range(0..options.len())]
    }

    /// Indices of assignments with more than one place to go.
    pub fn movable(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.eligible[i].len() > 1).collect()
    }

    pub fn metrics(&self, mapping: &[usize]) -> OptimizationMetrics {
        let loads = self.loads(mapping);
        OptimizationMetrics {
            assignment_count: mapping.len(),
            mean_score: self.mean_score(mapping),
            imbalance: imbalance(&loads),
            overloaded_shifts: loads
                .iter()
                .zip(&self.shifts)
                .filter(|(load, shift)| **load > shift.max_requests)
                .count(),
        }
    }
}

/// Population standard deviation of loads divided by their mean.
pub(crate) fn imbalance(loads: &[u32]) -> f64 {
    if loads.is_empty() {
        return 0.0;
    }
    let n = loads.len() as f64;
    let mean = loads.iter().map(|&l| l as f64).sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = loads
        .iter()
        .map(|&l| (l as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    variance.sqrt() / mean
}

/// Relocates low scorers to a shift scoring at least `min_gain` better,
/// weakest assignment first.
pub(crate) fn greedy(problem: &Problem, threshold: f64, min_gain: f64) -> Mapping {
    let mut mapping = problem.current.clone();
    let mut loads = problem.loads(&mapping);

    let mut order: Vec<(usize, f64)> = (0..problem.len())
        .map(|i| (i, problem.score(i, mapping[i], loads[mapping[i]])))
        .collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1));

    for (i, _) in order {
        let from = mapping[i];
        let current = problem.score(i, from, loads[from]);
        if current >= threshold {
            continue;
        }
        let wanted = current * (1.0 + min_gain);

        let mut best: Option<(usize, f64)> = None;
        for &to in &problem.eligible[i] {
            if to == from || !problem.has_room(to, loads[to]) {
                continue;
            }
            let candidate = problem.score(i, to, loads[to] + 1);
            if candidate < wanted {
                continue;
            }
            if best.is_none_or(|(_, score)| candidate > score) {
                best = Some((to, candidate));
            }
        }

        if let Some((to, _)) = best {
            loads[from] -= 1;
            loads[to] += 1;
            mapping[i] = to;
        }
    }
    mapping
}
