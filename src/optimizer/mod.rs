//! Re-optimization of existing assignments.
//!
//! Every pass works on a [`problem::Problem`] snapshot: candidate mappings
//! are searched in memory, then the winning mapping is written back as a
//! series of relocations. Capacity on each target is reserved before the
//! assignment moves, so a shift never exceeds `max_requests`.

mod annealing;
mod conflicts;
mod genetic;
mod problem;

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use annealing::AnnealingConfig;
pub use conflicts::{ConstraintViolation, Severity, ViolationKind};
pub use genetic::GeneticConfig;

use crate::config::PlannerConfig;
use crate::dispatcher::{DispatchConfig, Dispatcher, Relocation, relocate};
use crate::error::{BatchError, PlannerError};
use crate::model::{Assignment, DutyShift};
use crate::scoring::AssignmentScorer;
use crate::traits::PlannerContext;

use problem::{Mapping, Problem, imbalance};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Greedy only tries to move assignments scoring below this.
    pub greedy_threshold: f64,
    /// Relative gain a greedy move must bring.
    pub greedy_min_gain: f64,
    pub genetic: GeneticConfig,
    pub annealing: AnnealingConfig,
    /// Lowest specialization match a move target (or a live assignment) may have.
    pub min_specialization_match: f64,
    /// Urgent requests unassigned for longer than this are critical.
    pub urgent_response_minutes: i64,
    pub redistribute_max_iterations: usize,
    /// Imbalance target used by emergency rebalancing.
    pub emergency_target: f64,
    /// Advisory; exceeding it is reported, not enforced.
    pub emergency_time_budget_secs: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            greedy_threshold: 0.7,
            greedy_min_gain: 0.10,
            genetic: GeneticConfig::default(),
            annealing: AnnealingConfig::default(),
            min_specialization_match: 0.3,
            urgent_response_minutes: 30,
            redistribute_max_iterations: 50,
            emergency_target: 0.2,
            emergency_time_budget_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Greedy,
    Genetic,
    SimulatedAnnealing,
    Hybrid,
}

/// Which assignments an optimization pass may move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Assignments on shifts that are currently active.
    Active,
    /// Assignments on any active or planned shift.
    All,
    /// Assignments of urgent and critical requests.
    Urgent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OptimizationMetrics {
    pub assignment_count: usize,
    pub mean_score: f64,
    pub imbalance: f64,
    pub overloaded_shifts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    /// The algorithm that actually ran.
    pub algorithm: Algorithm,
    pub initial_count: usize,
    pub optimized_count: usize,
    pub improvement_score: f64,
    pub processing_time: Duration,
    pub changes: Vec<Relocation>,
    pub metrics_before: OptimizationMetrics,
    pub metrics_after: OptimizationMetrics,
    pub errors: Vec<BatchError>,
}

impl OptimizationResult {
    fn empty(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            initial_count: 0,
            optimized_count: 0,
            improvement_score: 0.0,
            processing_time: Duration::ZERO,
            changes: Vec::new(),
            metrics_before: OptimizationMetrics::default(),
            metrics_after: OptimizationMetrics::default(),
            errors: Vec::new(),
        }
    }
}

/// Weighted improvement, favouring balance over raw score.
pub fn improvement_score(before: &OptimizationMetrics, after: &OptimizationMetrics) -> f64 {
    0.4 * (after.mean_score - before.mean_score) + 0.6 * (before.imbalance - after.imbalance)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedistributionStatus {
    /// Target imbalance reached.
    Optimized,
    /// Stopped early without reaching the target.
    Improved,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedistributionReport {
    pub status: RedistributionStatus,
    pub changes: Vec<Relocation>,
    pub iterations: usize,
    pub initial_imbalance: f64,
    pub final_imbalance: f64,
    pub errors: Vec<BatchError>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmergencyReport {
    pub changes: Vec<Relocation>,
    /// Set when the run went through workload redistribution.
    pub status: Option<RedistributionStatus>,
    pub final_imbalance: Option<f64>,
    pub elapsed: Duration,
    pub time_limit_exceeded: bool,
    pub errors: Vec<BatchError>,
}

pub struct AssignmentOptimizer<'a, R: Rng = StdRng> {
    ctx: PlannerContext<'a>,
    scorer: AssignmentScorer,
    dispatch: DispatchConfig,
    config: OptimizerConfig,
    rng: R,
}

impl<'a> AssignmentOptimizer<'a, StdRng> {
    pub fn new(
        ctx: PlannerContext<'a>,
        scorer: AssignmentScorer,
        dispatch: DispatchConfig,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            ctx,
            scorer,
            dispatch,
            config,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn from_config(ctx: PlannerContext<'a>, config: &PlannerConfig) -> Self {
        Self::new(
            ctx,
            AssignmentScorer::from_config(config),
            config.dispatch.clone(),
            config.optimizer.clone(),
        )
    }
}

impl<'a, R: Rng> AssignmentOptimizer<'a, R> {
    /// Replaces the random source, e.g. with a seeded one for reproducible runs.
    pub fn with_rng<R2: Rng>(self, rng: R2) -> AssignmentOptimizer<'a, R2> {
        AssignmentOptimizer {
            ctx: self.ctx,
            scorer: self.scorer,
            dispatch: self.dispatch,
            config: self.config,
            rng,
        }
    }

    pub fn with_seed(self, seed: u64) -> AssignmentOptimizer<'a, StdRng> {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    #[tracing::instrument(skip_all, fields(?algorithm, ?scope))]
    pub fn optimize(&mut self, algorithm: Algorithm, scope: Scope) -> OptimizationResult {
        let started = Instant::now();
        let mut result = OptimizationResult::empty(algorithm);

        let problem = match self.snapshot(scope, &mut result.errors) {
            Some(problem) => problem,
            None => return self.finish(result, started),
        };
        result.initial_count = problem.len();
        result.metrics_before = problem.metrics(&problem.current);
        if problem.is_empty() {
            result.metrics_after = result.metrics_before;
            return self.finish(result, started);
        }

        if algorithm == Algorithm::Hybrid {
            return self.hybrid(result, problem, scope, started);
        }

        let greedy = problem::greedy(&problem, self.config.greedy_threshold, self.config.greedy_min_gain);
        let seeds = [problem.current.clone(), greedy];
        let (ran, target) = match algorithm {
            Algorithm::Genetic if problem.len() >= self.config.genetic.min_assignments => (
                Algorithm::Genetic,
                genetic::evolve(&problem, &seeds, &self.config.genetic, &mut self.rng),
            ),
            Algorithm::SimulatedAnnealing => (
                Algorithm::SimulatedAnnealing,
                annealing::anneal(&problem, &seeds, &self.config.annealing, &mut self.rng),
            ),
            _ => {
                let [_, greedy] = seeds;
                (Algorithm::Greedy, greedy)
            }
        };
        result.algorithm = ran;

        let applied = self.apply(&problem, &target, reason_for(ran), &mut result);
        result.metrics_after = problem.metrics(&applied);
        result.optimized_count = result.metrics_after.assignment_count;
        self.finish(result, started)
    }

    /// Greedy, then genetic when there is enough to work with, then a
    /// dispatcher balancing pass.
    fn hybrid(
        &mut self,
        mut result: OptimizationResult,
        problem: Problem,
        scope: Scope,
        started: Instant,
    ) -> OptimizationResult {
        let greedy = problem::greedy(&problem, self.config.greedy_threshold, self.config.greedy_min_gain);
        self.apply(&problem, &greedy, "optimize_greedy", &mut result);

        if let Some(updated) = self.snapshot(scope, &mut result.errors) {
            if updated.len() >= self.config.genetic.min_assignments {
                let seeds = [updated.current.clone()];
                let target = genetic::evolve(&updated, &seeds, &self.config.genetic, &mut self.rng);
                self.apply(&updated, &target, "optimize_genetic", &mut result);
            } else {
                debug!(assignments = updated.len(), "genetic stage skipped");
            }
        }

        let balance =
            Dispatcher::new(self.ctx, self.scorer.clone(), self.dispatch.clone()).balance_workload();
        result.changes.extend(balance.changes);
        result.errors.extend(balance.errors);

        if let Some(after) = self.snapshot(scope, &mut result.errors) {
            result.metrics_after = after.metrics(&after.current);
            result.optimized_count = after.len();
        }
        self.finish(result, started)
    }

    fn snapshot(&self, scope: Scope, errors: &mut Vec<BatchError>) -> Option<Problem> {
        match Problem::build(
            &self.ctx,
            &self.scorer,
            scope,
            self.config.min_specialization_match,
            errors,
        ) {
            Ok(problem) => Some(problem),
            Err(err) => {
                warn!(error = %err, "cannot load assignments for optimization");
                errors.push(BatchError::general(err));
                None
            }
        }
    }

    /// Writes `target` back as relocations and returns the mapping that was
    /// actually reached. A move onto a full shift waits until a later pass
    /// frees room; moves that can never fit are reported as errors.
    fn apply(
        &self,
        problem: &Problem,
        target: &[usize],
        reason: &str,
        result: &mut OptimizationResult,
    ) -> Mapping {
        let mut applied = problem.current.clone();
        let mut loads = problem.loads(&applied);
        let initial_loads = loads.clone();
        let final_loads = problem.loads(target);

        let mut pending: Vec<usize> = (0..problem.len()).filter(|&i| target[i] != applied[i]).collect();
        while !pending.is_empty() {
            let mut deferred = Vec::new();
            let mut progressed = false;

            for i in pending {
                let (from, to) = (applied[i], target[i]);
                if !problem.has_room(to, loads[to]) {
                    deferred.push(i);
                    continue;
                }
                let old_score = problem.score(i, from, initial_loads[from]);
                let new_score = problem.score(i, to, final_loads[to]);
                let assignment = &problem.assignments[i];
                match relocate(&self.ctx, assignment, &problem.shifts[to], new_score, reason) {
                    Ok(moved) => {
                        loads[from] -= 1;
                        loads[to] += 1;
                        applied[i] = to;
                        progressed = true;
                        result.changes.push(Relocation {
                            assignment_id: moved.id,
                            request_id: assignment.request_id.clone(),
                            from_shift: problem.shifts[from].id.clone(),
                            to_shift: problem.shifts[to].id.clone(),
                            old_score,
                            new_score,
                            reason: reason.to_string(),
                        });
                    }
                    Err(err) => {
                        warn!(request = %assignment.request_id, error = %err, "relocation failed");
                        result.errors.push(BatchError::for_item(&assignment.request_id, err));
                    }
                }
            }

            if !progressed {
                for i in deferred {
                    result.errors.push(BatchError::for_item(
                        &problem.assignments[i].request_id,
                        PlannerError::Capacity(problem.shifts[target[i]].id.clone()),
                    ));
                }
                break;
            }
            pending = deferred;
        }
        applied
    }

    fn finish(&self, mut result: OptimizationResult, started: Instant) -> OptimizationResult {
        result.improvement_score = improvement_score(&result.metrics_before, &result.metrics_after);
        result.processing_time = started.elapsed();
        info!(
            algorithm = ?result.algorithm,
            assignments = result.initial_count,
            changes = result.changes.len(),
            errors = result.errors.len(),
            improvement = result.improvement_score,
            "optimization finished"
        );
        result
    }

    /// Moves one assignment at a time from the most to the least loaded shift
    /// until the imbalance coefficient is at or below `target`.
    #[tracing::instrument(skip_all, fields(target_imbalance = target))]
    pub fn redistribute_workload(&mut self, target: f64) -> Result<RedistributionReport, PlannerError> {
        if !target.is_finite() || target < 0.0 {
            return Err(PlannerError::InvalidArgument(format!(
                "target imbalance must be a non-negative number, got {}",
                target
            )));
        }

        let mut shifts = self.ctx.shifts.list_active_or_planned()?;
        let mut assignments = self.ctx.requests.list_active_assignments()?;
        let initial_imbalance = imbalance(&loads_of(&shifts));

        let mut report = RedistributionReport {
            status: RedistributionStatus::Improved,
            changes: Vec::new(),
            iterations: 0,
            initial_imbalance,
            final_imbalance: initial_imbalance,
            errors: Vec::new(),
        };

        while report.iterations < self.config.redistribute_max_iterations {
            if imbalance(&loads_of(&shifts)) <= target {
                break;
            }
            let Some((source, dest)) = extremes(&shifts) else {
                break;
            };
            if shifts[source].current_request_count < shifts[dest].current_request_count + 2
                || !self
                    .scorer
                    .has_room(shifts[dest].current_request_count, shifts[dest].max_requests)
            {
                debug!("no further move possible");
                break;
            }
            report.iterations += 1;

            let Some((idx, old_score, new_score)) =
                self.best_to_move(&assignments, &shifts[source], &shifts[dest], &mut report.errors)
            else {
                break;
            };

            match relocate(&self.ctx, &assignments[idx], &shifts[dest], new_score, "redistribute_workload") {
                Ok(moved) => {
                    shifts[source].current_request_count -= 1;
                    shifts[dest].current_request_count += 1;
                    report.changes.push(Relocation {
                        assignment_id: moved.id.clone(),
                        request_id: moved.request_id.clone(),
                        from_shift: shifts[source].id.clone(),
                        to_shift: shifts[dest].id.clone(),
                        old_score,
                        new_score,
                        reason: "redistribute_workload".to_string(),
                    });
                    assignments[idx] = moved;
                }
                Err(err) => {
                    warn!(request = %assignments[idx].request_id, error = %err, "relocation failed");
                    report
                        .errors
                        .push(BatchError::for_item(&assignments[idx].request_id, err));
                    break;
                }
            }
        }

        report.final_imbalance = imbalance(&loads_of(&shifts));
        if report.final_imbalance <= target {
            report.status = RedistributionStatus::Optimized;
        }
        info!(
            status = ?report.status,
            iterations = report.iterations,
            changes = report.changes.len(),
            initial_imbalance,
            final_imbalance = report.final_imbalance,
            "redistribution finished"
        );
        Ok(report)
    }

    /// Assignment on `source` that fits `dest` best.
    fn best_to_move(
        &self,
        assignments: &[Assignment],
        source: &DutyShift,
        dest: &DutyShift,
        errors: &mut Vec<BatchError>,
    ) -> Option<(usize, f64, f64)> {
        let mut best: Option<(usize, f64, f64)> = None;
        for (idx, assignment) in assignments.iter().enumerate() {
            if assignment.shift_id != source.id {
                continue;
            }
            let request = match self.ctx.requests.get(&assignment.request_id) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(err) => {
                    errors.push(BatchError::for_item(&assignment.request_id, err));
                    continue;
                }
            };
            let new_score = self
                .scorer
                .score_at_load(&request, dest, dest.current_request_count + 1)
                .total;
            if best.is_none_or(|(_, _, score)| new_score > score) {
                let old_score = self.scorer.score(&request, source).total;
                best = Some((idx, old_score, new_score));
            }
        }
        best
    }

    /// Empties one shift onto the least loaded alternatives, or, without a
    /// shift id, redistributes everything towards a relaxed imbalance target.
    #[tracing::instrument(skip_all, fields(shift = ?shift_id))]
    pub fn emergency_rebalance(&mut self, shift_id: Option<&str>) -> Result<EmergencyReport, PlannerError> {
        let started = Instant::now();
        let budget = Duration::from_secs(self.config.emergency_time_budget_secs);

        let mut report = match shift_id {
            Some(id) => self.unload_shift(id)?,
            None => {
                let redistribution = self.redistribute_workload(self.config.emergency_target)?;
                EmergencyReport {
                    changes: redistribution.changes,
                    status: Some(redistribution.status),
                    final_imbalance: Some(redistribution.final_imbalance),
                    errors: redistribution.errors,
                    ..EmergencyReport::default()
                }
            }
        };

        report.elapsed = started.elapsed();
        report.time_limit_exceeded = report.elapsed > budget;
        if report.time_limit_exceeded {
            warn!(elapsed_ms = report.elapsed.as_millis() as u64, "emergency rebalance exceeded its time budget");
        }
        info!(changes = report.changes.len(), errors = report.errors.len(), "emergency rebalance finished");
        Ok(report)
    }

    fn unload_shift(&mut self, shift_id: &str) -> Result<EmergencyReport, PlannerError> {
        let source = self
            .ctx
            .shifts
            .get(shift_id)?
            .ok_or_else(|| PlannerError::not_found("shift", shift_id))?;
        let mut others: Vec<DutyShift> = self
            .ctx
            .shifts
            .list_active_or_planned()?
            .into_iter()
            .filter(|s| s.id != source.id)
            .collect();

        let mut report = EmergencyReport::default();
        let on_shift: Vec<Assignment> = self
            .ctx
            .requests
            .list_active_assignments()?
            .into_iter()
            .filter(|a| a.shift_id == source.id)
            .collect();

        for assignment in on_shift {
            let request = match self.ctx.requests.get(&assignment.request_id) {
                Ok(Some(request)) => request,
                Ok(None) => {
                    report.errors.push(BatchError::for_item(
                        &assignment.request_id,
                        PlannerError::not_found("request", &assignment.request_id),
                    ));
                    continue;
                }
                Err(err) => {
                    report.errors.push(BatchError::for_item(&assignment.request_id, err));
                    continue;
                }
            };

            let old_score = self.scorer.score(&request, &source).total;
            let target = others
                .iter()
                .enumerate()
                .filter(|(_, s)| {
                    self.scorer.has_room(s.current_request_count, s.max_requests)
                        && self.scorer.specialization_match(&request, s)
                            >= self.config.min_specialization_match
                })
                .map(|(i, s)| {
                    let score = self.scorer.score_at_load(&request, s, s.current_request_count + 1);
                    (i, s.current_request_count, score.total)
                })
                .min_by(|a, b| a.1.cmp(&b.1).then(b.2.total_cmp(&a.2)));

            let Some((idx, _, new_score)) = target else {
                warn!(request = %request.id, "no alternative shift");
                report.errors.push(BatchError::for_item(&request.id, "no alternative shift with capacity"));
                continue;
            };

            match relocate(&self.ctx, &assignment, &others[idx], new_score, "emergency_rebalance") {
                Ok(moved) => {
                    others[idx].current_request_count += 1;
                    report.changes.push(Relocation {
                        assignment_id: moved.id,
                        request_id: request.id.clone(),
                        from_shift: source.id.clone(),
                        to_shift: others[idx].id.clone(),
                        old_score,
                        new_score,
                        reason: "emergency_rebalance".to_string(),
                    });
                }
                Err(err) => {
                    warn!(request = %request.id, error = %err, "relocation failed");
                    report.errors.push(BatchError::for_item(&request.id, err));
                }
            }
        }
        Ok(report)
    }
}

fn reason_for(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::Greedy => "optimize_greedy",
        Algorithm::Genetic => "optimize_genetic",
        Algorithm::SimulatedAnnealing => "optimize_annealing",
        Algorithm::Hybrid => "optimize_hybrid",
    }
}

fn loads_of(shifts: &[DutyShift]) -> Vec<u32> {
    shifts.iter().map(|s| s.current_request_count).collect()
}

/// Indices of the most and least loaded shifts, first one wins ties.
fn extremes(shifts: &[DutyShift]) -> Option<(usize, usize)> {
    if shifts.len() < 2 {
        return None;
    }
    let mut max = 0;
    let mut min = 0;
    for (i, shift) in shifts.iter().enumerate() {
        if shift.current_request_count > shifts[max].current_request_count {
            max = i;
        }
        if shift.current_request_count < shifts[min].current_request_count {
            min = i;
        }
    }
    Some((max, min))
}
