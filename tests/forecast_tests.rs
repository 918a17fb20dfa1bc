//! Demand forecast tests against a seeded request log.

mod fixtures;

use chrono::Duration;

use duty_planner::forecast::{DemandForecaster, ForecastConfig};
use duty_planner::PlannerError;

use fixtures::*;

/// Four electric requests a day, one in each hour from 09:00 to 12:00, for
/// the `days` days before the harness date.
fn steady_history(h: &Harness, days: i64) {
    for d in 1..=days {
        let date = today() - Duration::days(d);
        for hour in 9..=12 {
            let mut request = electric_request(&format!("h-{}-{}", d, hour), 0);
            request.created_at = at(date, hour);
            h.store.insert_request(request);
        }
    }
}

fn forecaster(h: &Harness) -> DemandForecaster<'_> {
    DemandForecaster::new(&h.store, ForecastConfig::default())
}

// ============================================================================
// Daily prediction
// ============================================================================

#[test]
fn test_empty_history_gives_flagged_default() {
    let h = Harness::new();

    let prediction = forecaster(&h).predict_daily_requests(today(), None).unwrap();

    assert!(prediction.degraded);
    assert_eq!(prediction.predicted_count, 5);
    assert_eq!(prediction.confidence, 0.3);
    assert_eq!(prediction.recommended_shift_count, 1);
    assert_eq!(prediction.peak_hours, vec![9, 10, 14, 15, 16]);
}

#[test]
fn test_short_history_still_uses_default() {
    let h = Harness::new();
    steady_history(&h, 3);

    let prediction = forecaster(&h).predict_daily_requests(today(), None).unwrap();

    assert!(prediction.degraded);
    assert_eq!(prediction.predicted_count, 5);
}

#[test]
fn test_steady_history_prediction() {
    let h = Harness::new();
    steady_history(&h, 60);

    let prediction = forecaster(&h).predict_daily_requests(today(), None).unwrap();

    assert!(!prediction.degraded);
    // Four a day, scaled by the March seasonal factor.
    assert_eq!(prediction.predicted_count, 4);
    assert!((prediction.factors.seasonal - 1.10).abs() < 1e-9);
    assert!((prediction.factors.trend - 1.0).abs() < 1e-9);
    assert!(prediction.confidence > 0.9);
    assert_eq!(prediction.peak_hours, vec![9, 10, 11, 12]);
    assert_eq!(prediction.by_specialization.get("electric"), Some(&4));
    assert_eq!(prediction.recommended_shift_count, 1);
}

#[test]
fn test_holiday_lowers_prediction() {
    let h = Harness::new();
    steady_history(&h, 60);

    let regular = forecaster(&h).predict_daily_requests(today(), None).unwrap();
    let holiday = forecaster(&h).predict_daily_requests(day(2025, 3, 8), None).unwrap();

    assert_eq!(holiday.factors.holiday, 0.6);
    assert!(holiday.predicted_count < regular.predicted_count);
}

#[test]
fn test_specialization_filter() {
    let h = Harness::new();
    steady_history(&h, 60);

    let electric = forecaster(&h).predict_daily_requests(today(), Some("electric")).unwrap();
    let plumbing = forecaster(&h).predict_daily_requests(today(), Some("plumbing")).unwrap();

    assert!(!electric.degraded);
    assert!(plumbing.degraded);
}

// ============================================================================
// Period and staffing
// ============================================================================

#[test]
fn test_period_workload_one_prediction_per_day() {
    let h = Harness::new();
    steady_history(&h, 60);
    let start = today();

    let predictions = forecaster(&h)
        .predict_period_workload(start, start + Duration::days(6), None)
        .unwrap();

    assert_eq!(predictions.len(), 7);
    for (i, prediction) in predictions.iter().enumerate() {
        assert_eq!(prediction.date, start + Duration::days(i as i64));
    }
}

#[test]
fn test_period_workload_rejects_reversed_range() {
    let h = Harness::new();

    let err = forecaster(&h)
        .predict_period_workload(today(), today() - Duration::days(1), None)
        .unwrap_err();

    assert!(matches!(err, PlannerError::InvalidArgument(_)));
}

#[test]
fn test_monday_recommendation_flags_risks() {
    let h = Harness::new();

    let recommendation = forecaster(&h).recommend_shift_count(day(2025, 3, 10), 8.0).unwrap();

    assert_eq!(recommendation.min, 1);
    assert_eq!(recommendation.optimal, 1);
    assert_eq!(recommendation.max, 1);
    assert_eq!(recommendation.risk_factors.len(), 2);
    assert!(recommendation.risk_factors.iter().any(|r| r.contains("Monday")));
    assert!(recommendation.timing_suggestions[0].contains("08:00"));
}
