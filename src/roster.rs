//! Cyclic duty-roster generation.
//!
//! A quarterly plan is generated per specialization from its
//! [`SpecializationConfig`]. Three rotation families are supported:
//! full-day duty cycles (24/3, 24/2), workday weeks (5/2, 6/1) and the
//! 2-on/2-off rotation with an optional night split.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PlannerConfig;
use crate::error::{BatchError, PlannerError};
use crate::forecast::DemandForecaster;
use crate::model::{DutyShift, Executor, ShiftStatus};
use crate::traits::PlannerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleType {
    /// 24 hours on, 72 hours off.
    #[serde(rename = "duty_24_3")]
    Duty24x3,
    /// 24 hours on, 48 hours off.
    #[serde(rename = "duty_24_2")]
    Duty24x2,
    #[serde(rename = "workday_5_2")]
    Workday5x2,
    #[serde(rename = "workday_6_1")]
    Workday6x1,
    #[serde(rename = "shift_2_2")]
    Shift2x2,
}

impl ScheduleType {
    /// Length of one rotation cycle in days.
    pub fn rotation_days(self) -> u32 {
        match self {
            ScheduleType::Duty24x3 => 4,
            ScheduleType::Duty24x2 => 3,
            ScheduleType::Workday5x2 | ScheduleType::Workday6x1 => 7,
            ScheduleType::Shift2x2 => 4,
        }
    }

    fn works_on(self, weekday: Weekday) -> bool {
        match self {
            ScheduleType::Workday5x2 => !matches!(weekday, Weekday::Sat | Weekday::Sun),
            ScheduleType::Workday6x1 => weekday != Weekday::Sun,
            _ => true,
        }
    }
}

fn default_max_requests_per_shift() -> u32 {
    8
}

/// Staffing pattern of one specialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecializationConfig {
    pub schedule: ScheduleType,
    pub shift_duration_hours: u32,
    /// Hour of day at which day shifts start.
    pub start_hour: u32,
    /// Pool size the rotation needs; smaller pools are planned with a warning.
    pub min_executors: usize,
    /// Upper bound on executors on shift at the same time.
    pub max_executors: usize,
    pub coverage_24_7: bool,
    #[serde(default = "default_max_requests_per_shift")]
    pub max_requests_per_shift: u32,
}

impl SpecializationConfig {
    pub fn rotation_days(&self) -> u32 {
        self.schedule.rotation_days()
    }
}

pub fn default_specializations() -> BTreeMap<String, SpecializationConfig> {
    let spec = |schedule, hours, start, min, max, round_the_clock, requests| SpecializationConfig {
        schedule,
        shift_duration_hours: hours,
        start_hour: start,
        min_executors: min,
        max_executors: max,
        coverage_24_7: round_the_clock,
        max_requests_per_shift: requests,
    };
    BTreeMap::from([
        ("electric".to_string(), spec(ScheduleType::Duty24x3, 24, 8, 4, 2, true, 8)),
        ("plumbing".to_string(), spec(ScheduleType::Duty24x3, 24, 8, 4, 2, true, 8)),
        ("heating".to_string(), spec(ScheduleType::Duty24x2, 24, 8, 3, 2, true, 8)),
        ("elevator".to_string(), spec(ScheduleType::Duty24x2, 24, 8, 3, 1, true, 6)),
        ("cleaning".to_string(), spec(ScheduleType::Workday5x2, 8, 8, 2, 4, false, 6)),
        ("landscaping".to_string(), spec(ScheduleType::Workday5x2, 8, 8, 1, 3, false, 6)),
        ("maintenance".to_string(), spec(ScheduleType::Workday6x1, 8, 9, 2, 4, false, 8)),
        ("security".to_string(), spec(ScheduleType::Shift2x2, 12, 8, 4, 2, true, 6)),
    ])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterSettings {
    /// Length of a quarterly plan in days.
    pub plan_days: i64,
    pub night_start_hour: u32,
    pub night_shift_hours: u32,
    /// Uncovered intervals shorter than this are not reported as gaps.
    pub gap_threshold_hours: f64,
}

impl Default for RosterSettings {
    fn default() -> Self {
        Self {
            plan_days: 91,
            night_start_hour: 20,
            night_shift_hours: 12,
            gap_threshold_hours: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuarterlyPlan {
    pub shifts_created: usize,
    pub per_specialization: BTreeMap<String, usize>,
    pub errors: Vec<BatchError>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageGap {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageAnalysis {
    pub specialization: String,
    pub total_hours: f64,
    pub covered_hours: f64,
    pub coverage_percentage: f64,
    pub gaps: Vec<CoverageGap>,
}

pub struct RosterPlanner<'a> {
    ctx: PlannerContext<'a>,
    configs: BTreeMap<String, SpecializationConfig>,
    settings: RosterSettings,
    forecaster: Option<&'a DemandForecaster<'a>>,
}

impl<'a> RosterPlanner<'a> {
    pub fn new(
        ctx: PlannerContext<'a>,
        configs: BTreeMap<String, SpecializationConfig>,
        settings: RosterSettings,
    ) -> Self {
        Self {
            ctx,
            configs,
            settings,
            forecaster: None,
        }
    }

    pub fn from_config(ctx: PlannerContext<'a>, config: &PlannerConfig) -> Self {
        Self::new(ctx, config.specializations.clone(), config.roster.clone())
    }

    /// Lets workday rotations size each day from the demand forecast.
    pub fn with_forecaster(mut self, forecaster: &'a DemandForecaster<'a>) -> Self {
        self.forecaster = Some(forecaster);
        self
    }

    pub fn configs(&self) -> &BTreeMap<String, SpecializationConfig> {
        &self.configs
    }

    /// Generates and stores shifts for the plan window starting at `start`.
    ///
    /// Invalid input (past start, unknown specialization) aborts before any
    /// shift is written. A specialization without eligible executors is
    /// skipped with a warning.
    #[tracing::instrument(skip_all, fields(%start))]
    pub fn create_quarterly_plan(
        &self,
        start: NaiveDate,
        specializations: Option<&[String]>,
    ) -> Result<QuarterlyPlan, PlannerError> {
        let names: Vec<String> = match specializations {
            Some(names) => names.to_vec(),
            None => self.configs.keys().cloned().collect(),
        };

        if start < self.ctx.clock.today() {
            return Err(PlannerError::StartDateInPast(start));
        }
        if let Some(unknown) = names.iter().find(|n| !self.configs.contains_key(*n)) {
            return Err(PlannerError::UnknownSpecialization(unknown.clone()));
        }

        let mut plan = QuarterlyPlan::default();
        for name in &names {
            let config = &self.configs[name];
            let executors = match self.eligible_executors(name) {
                Ok(executors) => executors,
                Err(err) => {
                    plan.errors.push(BatchError::for_item(name, err));
                    continue;
                }
            };
            if executors.is_empty() {
                warn!(specialization = %name, "no eligible executors, skipping");
                plan.warnings
                    .push(format!("{}: no eligible executors, specialization skipped", name));
                continue;
            }

            let shifts = self.generate(name, config, &executors, start);
            let mut created = 0;
            for shift in shifts {
                let id = shift.id.clone();
                match self.ctx.shifts.create(shift) {
                    Ok(_) => created += 1,
                    Err(err) => {
                        warn!(shift = %id, error = %err, "cannot store shift");
                        plan.errors.push(BatchError::for_item(id, err));
                    }
                }
            }
            debug!(specialization = %name, created, "specialization planned");
            plan.per_specialization.insert(name.clone(), created);
            plan.shifts_created += created;
        }

        info!(
            shifts_created = plan.shifts_created,
            errors = plan.errors.len(),
            "quarterly plan created"
        );
        Ok(plan)
    }

    pub fn validate_plan(&self, start: NaiveDate, specializations: &[String]) -> PlanValidation {
        let mut validation = PlanValidation::default();

        if start < self.ctx.clock.today() {
            validation
                .errors
                .push(PlannerError::StartDateInPast(start).to_string());
        }

        for name in specializations {
            let Some(config) = self.configs.get(name) else {
                validation
                    .errors
                    .push(PlannerError::UnknownSpecialization(name.clone()).to_string());
                continue;
            };
            match self.eligible_executors(name) {
                Ok(pool) if pool.len() < config.min_executors => validation.warnings.push(format!(
                    "{}: {} eligible executors, at least {} recommended",
                    name,
                    pool.len(),
                    config.min_executors
                )),
                Ok(_) => {}
                Err(err) => validation.errors.push(format!("{}: {}", name, err)),
            }
        }

        validation.valid = validation.errors.is_empty();
        validation
    }

    /// Share of `[start, end)` covered by non-cancelled shifts of a
    /// specialization, and the uncovered gaps longer than the threshold.
    pub fn get_coverage_analysis(
        &self,
        specialization: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<CoverageAnalysis, PlannerError> {
        if end <= start {
            return Err(PlannerError::InvalidArgument(format!(
                "coverage window end {} is not after start {}",
                end, start
            )));
        }

        let mut intervals: Vec<(NaiveDateTime, NaiveDateTime)> = self
            .ctx
            .shifts
            .list_in_range(start, end)?
            .into_iter()
            .filter(|s| s.status != ShiftStatus::Cancelled && s.specializations.contains(specialization))
            .map(|s| (s.start.max(start), s.end.min(end)))
            .filter(|(s, e)| s < e)
            .collect();
        intervals.sort();

        let threshold = self.settings.gap_threshold_hours;
        let mut gaps = Vec::new();
        let mut push_gap = |from: NaiveDateTime, to: NaiveDateTime| {
            let hours = hours_between(from, to);
            if hours > threshold {
                gaps.push(CoverageGap {
                    start: from,
                    end: to,
                    duration_hours: hours,
                });
            }
        };

        let mut cursor = start;
        let mut covered = 0.0;
        for (from, to) in intervals {
            if from > cursor {
                push_gap(cursor, from);
            }
            if to > cursor {
                covered += hours_between(from.max(cursor), to);
                cursor = to;
            }
        }
        if end > cursor {
            push_gap(cursor, end);
        }

        let total_hours = hours_between(start, end);
        Ok(CoverageAnalysis {
            specialization: specialization.to_string(),
            total_hours,
            covered_hours: covered,
            coverage_percentage: (covered / total_hours * 100.0).min(100.0),
            gaps,
        })
    }

    fn eligible_executors(&self, specialization: &str) -> Result<Vec<Executor>, PlannerError> {
        let mut pool: Vec<Executor> = self
            .ctx
            .executors
            .list_by_specialization(specialization)?
            .into_iter()
            .filter(|e| e.is_eligible() && e.specializations.contains(specialization))
            .collect();
        pool.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pool)
    }

    fn generate(
        &self,
        name: &str,
        config: &SpecializationConfig,
        executors: &[Executor],
        start: NaiveDate,
    ) -> Vec<DutyShift> {
        let days = self.settings.plan_days;
        match config.schedule {
            ScheduleType::Duty24x3 | ScheduleType::Duty24x2 => {
                duty_rotation(name, config, executors, start, days)
            }
            ScheduleType::Workday5x2 | ScheduleType::Workday6x1 => {
                let staffing = |date: NaiveDate| self.forecast_staffing(name, config, executors.len(), date);
                workday_rotation(name, config, executors, start, days, staffing)
            }
            ScheduleType::Shift2x2 => two_on_two_off(name, config, &self.settings, executors, start, days),
        }
    }

    /// Executors to put on a workday, from the forecast when one is attached.
    fn forecast_staffing(
        &self,
        name: &str,
        config: &SpecializationConfig,
        pool: usize,
        date: NaiveDate,
    ) -> usize {
        let upper = pool.min(config.max_executors);
        let Some(forecaster) = self.forecaster else {
            return upper;
        };
        match forecaster.predict_daily_requests(date, Some(name)) {
            Ok(prediction) => {
                (prediction.recommended_shift_count as usize).clamp(config.min_executors.min(upper), upper)
            }
            Err(err) => {
                warn!(specialization = %name, %date, error = %err, "forecast unavailable, using full staffing");
                upper
            }
        }
    }
}

fn hours_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_minutes() as f64 / 60.0
}

fn at_hour(date: NaiveDate, hour: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::default()) + Duration::hours(hour as i64)
}

fn make_shift(
    name: &str,
    config: &SpecializationConfig,
    executor: &Executor,
    start: NaiveDateTime,
    hours: u32,
    kind: &str,
) -> DutyShift {
    let id = format!("{}-{}-{}-{}", name, executor.id, start.format("%Y%m%d%H"), kind);
    let mut shift = DutyShift::new(
        id,
        executor.id.clone(),
        start,
        start + Duration::hours(hours as i64),
        config.max_requests_per_shift,
    )
    .with_specializations([name]);
    shift.rating = executor.rating;
    shift
}

/// Executor `i` works the days whose index modulo the cycle equals `i` modulo
/// the cycle.
fn duty_rotation(
    name: &str,
    config: &SpecializationConfig,
    executors: &[Executor],
    start: NaiveDate,
    days: i64,
) -> Vec<DutyShift> {
    let cycle = config.rotation_days() as usize;
    let mut shifts = Vec::new();
    for day in 0..days {
        let date = start + Duration::days(day);
        let slot = day as usize % cycle;
        shifts.extend(
            executors
                .iter()
                .enumerate()
                .filter(|(i, _)| i % cycle == slot)
                .take(config.max_executors.max(1))
                .map(|(_, executor)| {
                    make_shift(
                        name,
                        config,
                        executor,
                        at_hour(date, config.start_hour),
                        config.shift_duration_hours,
                        "duty",
                    )
                }),
        );
    }
    shifts
}

/// Parallel day shifts on working weekdays, executors taken round-robin.
fn workday_rotation(
    name: &str,
    config: &SpecializationConfig,
    executors: &[Executor],
    start: NaiveDate,
    days: i64,
    staffing: impl Fn(NaiveDate) -> usize,
) -> Vec<DutyShift> {
    let pool = executors.len();
    let mut cursor = 0;
    let mut shifts = Vec::new();
    for day in 0..days {
        let date = start + Duration::days(day);
        if !config.schedule.works_on(date.weekday()) {
            continue;
        }
        let count = staffing(date).min(pool);
        for k in 0..count {
            let executor = &executors[(cursor + k) % pool];
            shifts.push(make_shift(
                name,
                config,
                executor,
                at_hour(date, config.start_hour),
                config.shift_duration_hours,
                "day",
            ));
        }
        cursor = (cursor + count) % pool;
    }
    shifts
}

/// Two days on, two days off. Executors alternate between two offsets so the
/// halves of the pool relieve each other.
fn two_on_two_off(
    name: &str,
    config: &SpecializationConfig,
    settings: &RosterSettings,
    executors: &[Executor],
    start: NaiveDate,
    days: i64,
) -> Vec<DutyShift> {
    let cycle = config.rotation_days() as i64;
    let mut shifts = Vec::new();
    for day in 0..days {
        let date = start + Duration::days(day);
        let working: Vec<&Executor> = executors
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                let offset = (*i as i64 % 2) * 2;
                (day - offset).rem_euclid(cycle) < 2
            })
            .map(|(_, e)| e)
            .take(config.max_executors.max(1))
            .collect();

        let night_split = config.coverage_24_7 && working.len() >= 2;
        for (k, executor) in working.into_iter().enumerate() {
            if night_split && k == 1 {
                shifts.push(make_shift(
                    name,
                    config,
                    executor,
                    at_hour(date, settings.night_start_hour),
                    settings.night_shift_hours,
                    "night",
                ));
            } else {
                shifts.push(make_shift(
                    name,
                    config,
                    executor,
                    at_hour(date, config.start_hour),
                    config.shift_duration_hours,
                    "day",
                ));
            }
        }
    }
    shifts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize, tag: &str) -> Vec<Executor> {
        (0..n).map(|i| Executor::new(format!("e{}", i), [tag])).collect()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    #[test]
    fn test_rotation_lengths() {
        assert_eq!(ScheduleType::Duty24x3.rotation_days(), 4);
        assert_eq!(ScheduleType::Duty24x2.rotation_days(), 3);
        assert_eq!(ScheduleType::Workday5x2.rotation_days(), 7);
        assert_eq!(ScheduleType::Shift2x2.rotation_days(), 4);
    }

    #[test]
    fn test_duty_rotation_one_executor_per_day() {
        let config = &default_specializations()["electric"];
        let executors = pool(4, "electric");
        let shifts = duty_rotation("electric", config, &executors, monday(), 8);

        assert_eq!(shifts.len(), 8);
        for (day, shift) in shifts.iter().enumerate() {
            assert_eq!(shift.executor_id, format!("e{}", day % 4));
            assert_eq!(shift.duration_hours(), 24.0);
        }
    }

    #[test]
    fn test_workday_rotation_skips_weekend() {
        let config = &default_specializations()["cleaning"];
        let executors = pool(6, "cleaning");
        let shifts = workday_rotation("cleaning", config, &executors, monday(), 7, |_| 4);

        assert_eq!(shifts.len(), 5 * 4);
        assert!(shifts.iter().all(|s| s.start.weekday() != Weekday::Sat
            && s.start.weekday() != Weekday::Sun));
        // round-robin continues across days
        assert_eq!(shifts[4].executor_id, "e4");
        assert_eq!(shifts[5].executor_id, "e5");
        assert_eq!(shifts[6].executor_id, "e0");
    }

    #[test]
    fn test_six_day_week_works_saturday() {
        let config = &default_specializations()["maintenance"];
        let executors = pool(2, "maintenance");
        let shifts = workday_rotation("maintenance", config, &executors, monday(), 7, |_| 2);
        assert_eq!(shifts.len(), 6 * 2);
    }

    #[test]
    fn test_two_on_two_off_with_night_split() {
        let config = &default_specializations()["security"];
        let executors = pool(4, "security");
        let shifts = two_on_two_off("security", config, &RosterSettings::default(), &executors, monday(), 4);

        // e0/e2 work days 0-1, e1/e3 work days 2-3; each day splits into day + night
        assert_eq!(shifts.len(), 8);
        let first_day: Vec<_> = shifts.iter().filter(|s| s.date() == monday()).collect();
        assert_eq!(first_day.len(), 2);
        assert_eq!(first_day[0].executor_id, "e0");
        assert_eq!(first_day[1].executor_id, "e2");
        assert_eq!(first_day[1].start.time(), NaiveTime::from_hms_opt(20, 0, 0).unwrap());
        assert!(shifts.iter().filter(|s| s.id.ends_with("night")).count() == 4);
    }

    #[test]
    fn test_two_on_two_off_without_night_split() {
        let config = SpecializationConfig {
            coverage_24_7: false,
            ..default_specializations()["security"].clone()
        };
        let executors = pool(2, "security");
        let shifts = two_on_two_off("security", &config, &RosterSettings::default(), &executors, monday(), 4);
        assert_eq!(shifts.len(), 4);
        assert!(shifts.iter().all(|s| s.id.ends_with("day")));
    }
}
