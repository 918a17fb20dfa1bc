//! Weighted multi-factor fit between a request and a duty shift.
//!
//! The score is a weighted sum of five factors, each in `[0, 1]`. Weights sum
//! to 1.0, so the total is in `[0, 1]` as well.

use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::config::{CategoryMap, PlannerConfig, SpecializationAdjacency};
use crate::geo::haversine_km;
use crate::model::{DutyShift, ServiceRequest, UNIVERSAL_TAG, Urgency};

/// Totals below this are never recommended.
pub const RECOMMEND_THRESHOLD: f64 = 0.6;

/// Hard cap on requests per executor, independent of shift capacity.
pub const MAX_REQUESTS_PER_EXECUTOR: u32 = 8;

const EXACT_MATCH: f64 = 1.0;
const UNIVERSAL_TAG_MATCH: f64 = 0.8;
const NO_FOCUS_MATCH: f64 = 0.7;
const UNKNOWN_TRADE_MATCH: f64 = 0.5;
const MISMATCH_FLOOR: f64 = 0.2;

const AREA_EXACT: f64 = 1.0;
const AREA_ANYWHERE: f64 = 0.8;
const AREA_SAME_KIND: f64 = 0.7;
const AREA_UNKNOWN: f64 = 0.5;
const AREA_MISMATCH: f64 = 0.3;

const DEFAULT_RATING: f64 = 0.7;

/// Keyword groups used to match an area tag against an address by kind.
const AREA_KINDS: &[(&str, &[&str])] = &[
    ("yard", &["двор", "территор", "yard", "courtyard", "grounds"]),
    ("entrance", &["подъезд", "лестниц", "entrance", "stair", "lobby"]),
    ("apartment", &["квартир", "кв.", "apartment", "flat", "apt"]),
    ("technical", &["подвал", "чердак", "крыш", "техн", "basement", "attic", "roof", "technical"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub specialization: f64,
    pub proximity: f64,
    pub workload: f64,
    pub rating: f64,
    pub urgency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            specialization: 0.35,
            proximity: 0.25,
            workload: 0.20,
            rating: 0.15,
            urgency: 0.05,
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        self.specialization + self.proximity + self.workload + self.rating + self.urgency
    }

    /// Returns weights with `urgency` set to the given value and the other four
    /// scaled proportionally so the total stays the same.
    pub fn with_urgency(&self, urgency: f64) -> Self {
        let total = self.total();
        let others = total - self.urgency;
        let scale = if others > 0.0 {
            (total - urgency) / others
        } else {
            0.0
        };
        Self {
            specialization: self.specialization * scale,
            proximity: self.proximity * scale,
            workload: self.workload * scale,
            rating: self.rating * scale,
            urgency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AssignmentScore {
    pub total: f64,
    pub specialization_match: f64,
    pub proximity: f64,
    pub workload_balance: f64,
    pub executor_rating: f64,
    pub urgency_priority: f64,
    pub recommended: bool,
}

#[derive(Debug, Clone)]
pub struct AssignmentScorer {
    weights: ScoringWeights,
    categories: CategoryMap,
    adjacency: SpecializationAdjacency,
    max_requests_per_executor: u32,
}

impl Default for AssignmentScorer {
    fn default() -> Self {
        Self::new(
            ScoringWeights::default(),
            CategoryMap::default(),
            SpecializationAdjacency::default(),
        )
    }
}

impl AssignmentScorer {
    pub fn new(
        weights: ScoringWeights,
        categories: CategoryMap,
        adjacency: SpecializationAdjacency,
    ) -> Self {
        Self {
            weights,
            categories,
            adjacency,
            max_requests_per_executor: MAX_REQUESTS_PER_EXECUTOR,
        }
    }

    pub fn from_config(config: &PlannerConfig) -> Self {
        Self::new(
            config.scoring,
            config.categories.clone(),
            config.adjacency.clone(),
        )
        .with_max_requests_per_executor(config.dispatch.max_requests_per_executor)
    }

    pub fn with_max_requests_per_executor(mut self, max: u32) -> Self {
        self.max_requests_per_executor = max;
        self
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn categories(&self) -> &CategoryMap {
        &self.categories
    }

    /// Swaps in other weights until the returned guard is dropped.
    pub fn override_weights(&mut self, weights: ScoringWeights) -> WeightOverride<'_> {
        let saved = std::mem::replace(&mut self.weights, weights);
        WeightOverride {
            scorer: self,
            saved,
        }
    }

    pub fn score(&self, request: &ServiceRequest, shift: &DutyShift) -> AssignmentScore {
        self.score_at_load(request, shift, shift.current_request_count)
    }

    /// Scores as if the shift carried `load` requests.
    pub fn score_at_load(
        &self,
        request: &ServiceRequest,
        shift: &DutyShift,
        load: u32,
    ) -> AssignmentScore {
        let specialization_match = self.specialization_match(request, shift);
        let proximity = self.proximity(request, shift);
        let workload_balance = workload_balance(load, shift.max_requests);
        let executor_rating = rating_score(shift.rating);
        let urgency_priority = urgency_score(request.urgency);

        let w = &self.weights;
        let total = (specialization_match * w.specialization
            + proximity * w.proximity
            + workload_balance * w.workload
            + executor_rating * w.rating
            + urgency_priority * w.urgency)
            .clamp(0.0, 1.0);

        AssignmentScore {
            total,
            specialization_match,
            proximity,
            workload_balance,
            executor_rating,
            urgency_priority,
            recommended: self.is_recommended(total, load, shift.max_requests),
        }
    }

    /// The load-independent part of the weighted total.
    pub(crate) fn fixed_component(&self, request: &ServiceRequest, shift: &DutyShift) -> f64 {
        let w = &self.weights;
        self.specialization_match(request, shift) * w.specialization
            + self.proximity(request, shift) * w.proximity
            + rating_score(shift.rating) * w.rating
            + urgency_score(request.urgency) * w.urgency
    }

    /// The weighted workload part of the total at the given load.
    pub(crate) fn workload_component(&self, load: u32, max_requests: u32) -> f64 {
        workload_balance(load, max_requests) * self.weights.workload
    }

    pub fn is_recommended(&self, total: f64, load: u32, max_requests: u32) -> bool {
        total >= RECOMMEND_THRESHOLD && load < max_requests && load < self.max_requests_per_executor
    }

    /// Whether one more request still fits the shift and the per-executor cap.
    pub fn has_room(&self, load: u32, max_requests: u32) -> bool {
        load < max_requests && load < self.max_requests_per_executor
    }

    pub fn max_requests_per_executor(&self) -> u32 {
        self.max_requests_per_executor
    }

    pub fn request_specialization(&self, request: &ServiceRequest) -> Option<&str> {
        self.categories.specialization_for(&request.category)
    }

    pub fn specialization_match(&self, request: &ServiceRequest, shift: &DutyShift) -> f64 {
        if shift.specializations.is_empty() {
            return NO_FOCUS_MATCH;
        }

        let Some(trade) = self.request_specialization(request) else {
            return if shift.specializations.contains(UNIVERSAL_TAG) {
                UNIVERSAL_TAG_MATCH
            } else {
                UNKNOWN_TRADE_MATCH
            };
        };

        if shift.specializations.contains(trade) {
            return EXACT_MATCH;
        }
        if shift.specializations.contains(UNIVERSAL_TAG) {
            return UNIVERSAL_TAG_MATCH;
        }

        shift
            .specializations
            .iter()
            .filter_map(|tag| self.adjacency.score(trade, tag))
            .fold(MISMATCH_FLOOR, f64::max)
    }

    pub fn proximity(&self, request: &ServiceRequest, shift: &DutyShift) -> f64 {
        let by_area = area_score(request, shift);

        match (&shift.base_location, &request.location) {
            (Some(base), Some(target)) => {
                by_area.max(distance_score(haversine_km(base.coords(), target.coords())))
            }
            _ => by_area,
        }
    }
}

/// Restores the original weights when dropped.
pub struct WeightOverride<'s> {
    scorer: &'s mut AssignmentScorer,
    saved: ScoringWeights,
}

impl Deref for WeightOverride<'_> {
    type Target = AssignmentScorer;

    fn deref(&self) -> &Self::Target {
        self.scorer
    }
}

impl Drop for WeightOverride<'_> {
    fn drop(&mut self) {
        self.scorer.weights = self.saved;
    }
}

fn area_score(request: &ServiceRequest, shift: &DutyShift) -> f64 {
    if shift.serves_all_areas() {
        return AREA_ANYWHERE;
    }
    let Some(address) = request.address.as_deref() else {
        return AREA_UNKNOWN;
    };
    let address = address.to_lowercase();

    let areas: Vec<String> = shift.coverage_areas.iter().map(|a| a.to_lowercase()).collect();
    if areas.iter().any(|area| address.contains(area.as_str())) {
        return AREA_EXACT;
    }

    let same_kind = areas.iter().filter_map(|area| area_kind(area)).any(|kind| {
        AREA_KINDS
            .iter()
            .find(|(name, _)| *name == kind)
            .is_some_and(|(_, keywords)| keywords.iter().any(|kw| address.contains(kw)))
    });
    if same_kind { AREA_SAME_KIND } else { AREA_MISMATCH }
}

fn area_kind(area: &str) -> Option<&'static str> {
    AREA_KINDS
        .iter()
        .find(|(name, keywords)| *name == area || keywords.iter().any(|kw| area.contains(kw)))
        .map(|(name, _)| *name)
}

fn distance_score(km: f64) -> f64 {
    match km {
        d if d <= 2.0 => 1.0,
        d if d <= 5.0 => 0.8,
        d if d <= 10.0 => 0.6,
        _ => AREA_MISMATCH,
    }
}

/// Preference curve over utilization: idle shifts are good, half-full shifts
/// are best, nearly full shifts are avoided.
pub fn workload_balance(load: u32, max_requests: u32) -> f64 {
    if max_requests == 0 {
        return 0.0;
    }
    let pct = load as f64 / max_requests as f64 * 100.0;
    match pct {
        p if p < 30.0 => 0.9,
        p if p < 50.0 => 0.9 + (p - 30.0) / 20.0 * 0.1,
        p if p <= 70.0 => 1.0,
        p if p <= 85.0 => 0.6,
        _ => 0.2,
    }
}

/// Rescales a 1-5 rating to `[0, 1]`.
pub fn rating_score(rating: Option<f64>) -> f64 {
    match rating {
        Some(r) => ((r - 1.0) / 4.0).clamp(0.0, 1.0),
        None => DEFAULT_RATING,
    }
}

pub fn urgency_score(urgency: Urgency) -> f64 {
    match urgency {
        Urgency::Critical => 1.0,
        Urgency::Urgent => 0.8,
        Urgency::Medium => 0.5,
        Urgency::Ordinary => 0.3,
    }
}
