//! Demand forecasting from the historical request log.
//!
//! A recency-weighted daily average is scaled by independent multiplicative
//! factors (weekday, season, holidays, weather, short-term trend). With too
//! little history the forecaster returns a flagged low-confidence default.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CategoryMap;
use crate::error::PlannerError;
use crate::model::ServiceRequest;
use crate::traits::RequestRepository;

const GENERAL_BUCKET: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Holiday {
    pub month: u32,
    pub day: u32,
    pub factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub lookback_days: i64,
    /// Fewer days with data than this yields the default prediction.
    pub min_history_days: usize,
    /// Days of data needed for full data-volume confidence.
    pub full_confidence_days: usize,
    pub default_prediction: u32,
    pub default_confidence: f64,
    pub requests_per_executor: f64,
    pub max_recommended_shifts: u32,
    /// Share of the window total an hour needs to count as a peak hour.
    pub peak_share_threshold: f64,
    pub min_peak_hours: usize,
    pub max_peak_hours: usize,
    pub default_peak_hours: Vec<u32>,
    /// Multiplier per calendar month, January first.
    pub seasonal_factors: [f64; 12],
    pub holidays: Vec<Holiday>,
    pub trend_min: f64,
    pub trend_max: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        let holiday = |month, day, factor| Holiday { month, day, factor };
        Self {
            lookback_days: 90,
            min_history_days: 7,
            full_confidence_days: 30,
            default_prediction: 5,
            default_confidence: 0.3,
            requests_per_executor: 6.0,
            max_recommended_shifts: 8,
            peak_share_threshold: 0.05,
            min_peak_hours: 3,
            max_peak_hours: 12,
            default_peak_hours: vec![9, 10, 14, 15, 16],
            seasonal_factors: [
                1.30, 1.25, 1.10, 1.00, 0.95, 0.85, 0.80, 0.85, 1.00, 1.15, 1.20, 1.30,
            ],
            holidays: vec![
                holiday(1, 1, 0.3),
                holiday(1, 2, 0.5),
                holiday(3, 8, 0.6),
                holiday(3, 21, 0.6),
                holiday(5, 1, 0.6),
                holiday(5, 9, 0.6),
                holiday(9, 1, 0.6),
                holiday(10, 1, 0.8),
                holiday(12, 8, 0.8),
                holiday(12, 31, 0.5),
            ],
            trend_min: 0.7,
            trend_max: 1.3,
        }
    }
}

/// The multipliers applied to the base prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionFactors {
    pub base: f64,
    pub weekday: f64,
    pub seasonal: f64,
    pub holiday: f64,
    pub weather: f64,
    pub trend: f64,
}

impl PredictionFactors {
    fn neutral(base: f64) -> Self {
        Self {
            base,
            weekday: 1.0,
            seasonal: 1.0,
            holiday: 1.0,
            weather: 1.0,
            trend: 1.0,
        }
    }

    fn product(&self) -> f64 {
        self.base * self.weekday * self.seasonal * self.holiday * self.weather * self.trend
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub date: NaiveDate,
    pub predicted_count: u32,
    pub confidence: f64,
    pub peak_hours: Vec<u32>,
    pub recommended_shift_count: u32,
    pub by_specialization: BTreeMap<String, u32>,
    pub factors: PredictionFactors,
    /// Set when history was insufficient and defaults were returned.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftRecommendation {
    pub min: u32,
    pub optimal: u32,
    pub max: u32,
    pub timing_suggestions: Vec<String>,
    pub risk_factors: Vec<String>,
}

/// Aggregates of the requests inside one lookback window.
struct History<'r> {
    daily: BTreeMap<NaiveDate, u32>,
    hourly: [u32; 24],
    records: Vec<&'r ServiceRequest>,
}

impl<'r> History<'r> {
    fn collect(records: impl IntoIterator<Item = &'r ServiceRequest>) -> Self {
        let mut history = History {
            daily: BTreeMap::new(),
            hourly: [0; 24],
            records: Vec::new(),
        };
        for request in records {
            *history.daily.entry(request.created_at.date()).or_insert(0) += 1;
            history.hourly[request.created_at.hour() as usize] += 1;
            history.records.push(request);
        }
        history
    }

    fn total(&self) -> u32 {
        self.daily.values().sum()
    }
}

pub struct DemandForecaster<'a> {
    requests: &'a dyn RequestRepository,
    categories: CategoryMap,
    config: ForecastConfig,
}

impl<'a> DemandForecaster<'a> {
    pub fn new(requests: &'a dyn RequestRepository, config: ForecastConfig) -> Self {
        Self {
            requests,
            categories: CategoryMap::default(),
            config,
        }
    }

    pub fn with_categories(mut self, categories: CategoryMap) -> Self {
        self.categories = categories;
        self
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Predicts the request count for one day from the preceding lookback window.
    pub fn predict_daily_requests(
        &self,
        date: NaiveDate,
        specialization: Option<&str>,
    ) -> Result<Prediction, PlannerError> {
        let records = self.load(date, date, specialization)?;
        Ok(self.predict_from(date, &records))
    }

    /// Per-day predictions for `start..=end`, with interior days smoothed by a
    /// 3-point moving average.
    pub fn predict_period_workload(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        specialization: Option<&str>,
    ) -> Result<Vec<Prediction>, PlannerError> {
        if end < start {
            return Err(PlannerError::InvalidArgument(format!(
                "period end {} precedes start {}",
                end, start
            )));
        }

        let records = self.load(start, end, specialization)?;
        let mut predictions: Vec<Prediction> = start
            .iter_days()
            .take_while(|day| *day <= end)
            .map(|day| self.predict_from(day, &records))
            .collect();

        let raw: Vec<f64> = predictions.iter().map(|p| p.predicted_count as f64).collect();
        for i in 1..raw.len().saturating_sub(1) {
            let smoothed = ((raw[i - 1] + raw[i] + raw[i + 1]) / 3.0).round() as u32;
            let prediction = &mut predictions[i];
            prediction.predicted_count = smoothed;
            prediction.recommended_shift_count = self.shift_count_for(smoothed, &prediction.peak_hours);
        }

        Ok(predictions)
    }

    /// Staffing range for a day, with timing advice and risk flags.
    pub fn recommend_shift_count(
        &self,
        date: NaiveDate,
        shift_duration_hours: f64,
    ) -> Result<ShiftRecommendation, PlannerError> {
        let prediction = self.predict_daily_requests(date, None)?;
        let predicted = prediction.predicted_count;

        let min = (predicted / 10).max(1);
        let max = (predicted / 3).min(6).max(min);
        let optimal = prediction.recommended_shift_count;

        let mut timing_suggestions = Vec::new();
        if let (Some(&first), Some(&last)) =
            (prediction.peak_hours.iter().min(), prediction.peak_hours.iter().max())
        {
            timing_suggestions.push(format!(
                "Start the first shift by {:02}:00 to be in place for the first peak",
                first.saturating_sub(1)
            ));
            let span = (last - first + 1) as f64;
            if span > shift_duration_hours {
                timing_suggestions.push(format!(
                    "Peak hours span {} h, longer than a {} h shift; stagger start times",
                    span, shift_duration_hours
                ));
            }
            if optimal > 1 {
                timing_suggestions.push(format!(
                    "Spread {} shifts between {:02}:00 and {:02}:00",
                    optimal, first, last
                ));
            }
        }

        let mut risk_factors = Vec::new();
        if prediction.confidence < 0.5 {
            risk_factors.push(format!(
                "Low forecast confidence ({:.2})",
                prediction.confidence
            ));
        }
        if predicted > 15 {
            risk_factors.push(format!("High predicted load ({} requests)", predicted));
        }
        if prediction.peak_hours.len() > 10 {
            risk_factors.push(format!(
                "Peak demand spread over {} hours",
                prediction.peak_hours.len()
            ));
        }
        if date.weekday() == Weekday::Mon {
            risk_factors.push("Monday backlog from the weekend".to_string());
        }

        Ok(ShiftRecommendation {
            min,
            optimal,
            max,
            timing_suggestions,
            risk_factors,
        })
    }

    /// Loads every request that any day in `first..=last` may look back on.
    fn load(
        &self,
        first: NaiveDate,
        last: NaiveDate,
        specialization: Option<&str>,
    ) -> Result<Vec<ServiceRequest>, PlannerError> {
        let from = midnight(first - Duration::days(self.config.lookback_days));
        let to = midnight(last);
        let mut records = self.requests.list_by_date_range(from, to)?;
        if let Some(tag) = specialization {
            records.retain(|r| self.matches_specialization(r, tag));
        }
        Ok(records)
    }

    fn matches_specialization(&self, request: &ServiceRequest, tag: &str) -> bool {
        self.categories.specialization_for(&request.category) == Some(tag)
            || request.category.to_lowercase().contains(&tag.to_lowercase())
    }

    fn predict_from(&self, date: NaiveDate, records: &[ServiceRequest]) -> Prediction {
        let window_start = midnight(date - Duration::days(self.config.lookback_days));
        let window_end = midnight(date);
        let history = History::collect(
            records
                .iter()
                .filter(|r| r.created_at >= window_start && r.created_at < window_end),
        );

        if history.daily.len() < self.config.min_history_days {
            debug!(%date, days = history.daily.len(), "insufficient history, using default forecast");
            return self.default_prediction(date);
        }

        let counts: Vec<f64> = history.daily.values().map(|&c| c as f64).collect();
        let (weekday, weekday_confidence) = weekday_factor(&history.daily, date.weekday());
        let factors = PredictionFactors {
            base: recency_weighted_average(&counts),
            weekday,
            seasonal: self.config.seasonal_factors[date.month0() as usize],
            holiday: self.holiday_factor(date),
            weather: weather_factor(date.month()),
            trend: trend_factor(&history.daily, date)
                .clamp(self.config.trend_min, self.config.trend_max),
        };
        let predicted_count = factors.product().round().max(0.0) as u32;

        let peak_hours = self.peak_hours(&history);
        let monthly_confidence = monthly_pattern_confidence(&history.daily);
        let volume = (history.daily.len() as f64 / self.config.full_confidence_days as f64).min(1.0);
        let stability = stability(&counts);
        let pattern = (weekday_confidence + monthly_confidence) / 2.0;
        let confidence = ((volume + stability + pattern) / 3.0).clamp(0.0, 1.0);

        Prediction {
            date,
            predicted_count,
            confidence,
            recommended_shift_count: self.shift_count_for(predicted_count, &peak_hours),
            peak_hours,
            by_specialization: self.breakdown(&history, predicted_count),
            factors,
            degraded: false,
        }
    }

    fn default_prediction(&self, date: NaiveDate) -> Prediction {
        let predicted = self.config.default_prediction;
        let peak_hours = self.config.default_peak_hours.clone();
        Prediction {
            date,
            predicted_count: predicted,
            confidence: self.config.default_confidence,
            recommended_shift_count: self.shift_count_for(predicted, &peak_hours),
            peak_hours,
            by_specialization: BTreeMap::new(),
            factors: PredictionFactors::neutral(predicted as f64),
            degraded: true,
        }
    }

    fn holiday_factor(&self, date: NaiveDate) -> f64 {
        self.config
            .holidays
            .iter()
            .find(|h| h.month == date.month() && h.day == date.day())
            .map_or(1.0, |h| h.factor)
    }

    fn peak_hours(&self, history: &History<'_>) -> Vec<u32> {
        let total = history.total() as f64;
        if total <= 0.0 {
            return self.config.default_peak_hours.clone();
        }
        let peaks: Vec<u32> = (0..24u32)
            .filter(|&h| history.hourly[h as usize] as f64 / total > self.config.peak_share_threshold)
            .collect();
        if peaks.len() < self.config.min_peak_hours || peaks.len() > self.config.max_peak_hours {
            return self.config.default_peak_hours.clone();
        }
        peaks
    }

    fn shift_count_for(&self, predicted: u32, peak_hours: &[u32]) -> u32 {
        let base = (predicted as f64 / self.config.requests_per_executor).round().max(1.0);
        let adjustment = match peak_hours.len() {
            n if n > 8 => 1.2,
            n if n < 4 => 0.8,
            _ => 1.0,
        };
        ((base * adjustment).round() as u32).clamp(1, self.config.max_recommended_shifts)
    }

    fn breakdown(&self, history: &History<'_>, predicted: u32) -> BTreeMap<String, u32> {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for request in &history.records {
            let tag = self
                .categories
                .specialization_for(&request.category)
                .unwrap_or(GENERAL_BUCKET);
            *counts.entry(tag.to_string()).or_insert(0) += 1;
        }
        let total = history.records.len().max(1) as f64;
        counts
            .into_iter()
            .map(|(tag, count)| (tag, (count as f64 / total * predicted as f64).round() as u32))
            .collect()
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::default())
}

/// Linear weights 1..=n, the most recent day weighted highest.
fn recency_weighted_average(counts: &[f64]) -> f64 {
    let (weighted, weights) = counts
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sum, wsum), (i, &c)| {
            let w = (i + 1) as f64;
            (sum + c * w, wsum + w)
        });
    if weights > 0.0 { weighted / weights } else { 0.0 }
}

/// Ratio of the weekday's average to the average over all weekdays seen,
/// plus a confidence based on how many samples the weekday has.
fn weekday_factor(daily: &BTreeMap<NaiveDate, u32>, weekday: Weekday) -> (f64, f64) {
    let mut sums = [0.0f64; 7];
    let mut samples = [0u32; 7];
    for (date, &count) in daily {
        let idx = date.weekday().num_days_from_monday() as usize;
        sums[idx] += count as f64;
        samples[idx] += 1;
    }

    let averages: Vec<f64> = (0..7)
        .filter(|&i| samples[i] > 0)
        .map(|i| sums[i] / samples[i] as f64)
        .collect();
    let overall = averages.iter().sum::<f64>() / averages.len().max(1) as f64;

    let idx = weekday.num_days_from_monday() as usize;
    if samples[idx] == 0 || overall <= 0.0 {
        return (1.0, 0.0);
    }
    let factor = sums[idx] / samples[idx] as f64 / overall;
    let confidence = (samples[idx] as f64 / 4.0).min(1.0);
    (factor, confidence)
}

fn monthly_pattern_confidence(daily: &BTreeMap<NaiveDate, u32>) -> f64 {
    let months: BTreeSet<(i32, u32)> = daily.keys().map(|d| (d.year(), d.month())).collect();
    (months.len() as f64 / 3.0).min(1.0)
}

fn weather_factor(month: u32) -> f64 {
    match month {
        12 | 1 | 2 => 1.1,
        6..=8 => 1.05,
        _ => 1.0,
    }
}

/// Slope of a least-squares line through the last four weekly totals,
/// relative to their mean.
fn trend_factor(daily: &BTreeMap<NaiveDate, u32>, date: NaiveDate) -> f64 {
    let buckets: Vec<f64> = (0..4)
        .map(|week| {
            let from = date - Duration::days(28 - 7 * week);
            let to = from + Duration::days(7);
            daily.range(from..to).map(|(_, &c)| c as f64).sum()
        })
        .collect();

    let mean = buckets.iter().sum::<f64>() / 4.0;
    if mean <= 0.0 {
        return 1.0;
    }
    let x_mean = 1.5;
    let (num, den) = buckets
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (x, &y)| {
            let dx = x as f64 - x_mean;
            (num + dx * (y - mean), den + dx * dx)
        });
    1.0 + (num / den) / mean
}

/// `1 - coefficient of variation`, floored at 0.1.
fn stability(counts: &[f64]) -> f64 {
    let n = counts.len() as f64;
    let mean = counts.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.1;
    }
    let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / mean).clamp(0.1, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    #[test]
    fn test_recency_weighting() {
        assert_eq!(recency_weighted_average(&[]), 0.0);
        // weights 1, 2, 3
        let avg = recency_weighted_average(&[0.0, 0.0, 6.0]);
        assert!((avg - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_stability_floor() {
        assert_eq!(stability(&[5.0, 5.0, 5.0]), 1.0);
        assert_eq!(stability(&[0.0, 0.0, 30.0]), 0.1);
    }

    #[test]
    fn test_trend_rising_is_clamped_later() {
        let mut daily = BTreeMap::new();
        let target = day(3, 1);
        for week in 0..4i64 {
            let start = target - Duration::days(28 - 7 * week);
            daily.insert(start, (week as u32 + 1) * 10);
        }
        let trend = trend_factor(&daily, target);
        assert!(trend > 1.0);
    }

    #[test]
    fn test_flat_trend() {
        let mut daily = BTreeMap::new();
        let target = day(3, 1);
        for offset in 1..=28 {
            daily.insert(target - Duration::days(offset), 3);
        }
        assert!((trend_factor(&daily, target) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weekday_factor() {
        let mut daily = BTreeMap::new();
        // 2025-01-06 is a Monday
        for week in 0..4 {
            let monday = day(1, 6) + Duration::days(7 * week);
            daily.insert(monday, 10);
            daily.insert(monday + Duration::days(1), 5);
        }
        let (monday, confidence) = weekday_factor(&daily, Weekday::Mon);
        assert!((monday - 10.0 / 7.5).abs() < 1e-12);
        assert_eq!(confidence, 1.0);
        assert_eq!(weekday_factor(&daily, Weekday::Sun), (1.0, 0.0));
    }

    #[test]
    fn test_weather_and_season_tables() {
        let config = ForecastConfig::default();
        assert!(config.seasonal_factors[0] > config.seasonal_factors[9]);
        assert!(config.seasonal_factors[9] > config.seasonal_factors[3]);
        assert!(config.seasonal_factors[3] > config.seasonal_factors[6]);
        assert_eq!(weather_factor(1), 1.1);
        assert_eq!(weather_factor(7), 1.05);
        assert_eq!(weather_factor(4), 1.0);
    }
}
