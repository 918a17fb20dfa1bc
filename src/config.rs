//! Planner configuration.
//!
//! Every component owns a config struct with `Default` carrying its tuned
//! constants. [`PlannerConfig`] aggregates them so a deployment can override
//! any subset from one JSON document.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispatcher::DispatchConfig;
use crate::error::PlannerError;
use crate::forecast::ForecastConfig;
use crate::geo::GeoConfig;
use crate::optimizer::OptimizerConfig;
use crate::roster::{RosterSettings, SpecializationConfig, default_specializations};
use crate::scoring::ScoringWeights;

/// One keyword rule of the category table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub specialization: String,
    pub keywords: Vec<String>,
}

/// Maps free-text request categories onto specialization tags.
///
/// Matching is a case-insensitive substring search; the first rule with a
/// matching keyword wins. The keyword lists are heuristics and misclassify
/// unusual wording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryMap {
    rules: Vec<CategoryRule>,
}

impl CategoryMap {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn specialization_for(&self, category: &str) -> Option<&str> {
        let text = category.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|kw| text.contains(&kw.to_lowercase())))
            .map(|rule| rule.specialization.as_str())
    }
}

impl Default for CategoryMap {
    fn default() -> Self {
        let rule = |specialization: &str, keywords: &[&str]| CategoryRule {
            specialization: specialization.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        };
        Self::new(vec![
            rule("elevator", &["лифт", "elevator", "lift"]),
            rule(
                "electric",
                &["электр", "свет", "розетк", "проводк", "electric", "light", "socket", "wiring"],
            ),
            rule(
                "plumbing",
                &["сантех", "вод", "труб", "канализ", "кран", "plumb", "water", "pipe", "leak", "sewer"],
            ),
            rule("heating", &["отоплен", "батаре", "радиатор", "heating", "radiator", "boiler"]),
            rule("cleaning", &["уборк", "чистот", "мусор", "clean", "garbage", "trash"]),
            rule("security", &["охран", "безопас", "домофон", "security", "intercom", "guard"]),
            rule("landscaping", &["благоустр", "озелен", "снег", "landscap", "garden", "snow"]),
            rule("maintenance", &["ремонт", "обслуж", "repair", "maintenance", "fix"]),
        ])
    }
}

/// Symmetric table of partially compatible trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecializationAdjacency {
    pairs: Vec<(String, String, f64)>,
}

impl SpecializationAdjacency {
    pub fn new(pairs: Vec<(String, String, f64)>) -> Self {
        Self { pairs }
    }

    /// Partial match score between two trades, in either order.
    pub fn score(&self, a: &str, b: &str) -> Option<f64> {
        self.pairs
            .iter()
            .filter(|(x, y, _)| (x == a && y == b) || (x == b && y == a))
            .map(|(_, _, score)| *score)
            .reduce(f64::max)
    }
}

impl Default for SpecializationAdjacency {
    fn default() -> Self {
        let pair = |a: &str, b: &str, score: f64| (a.to_string(), b.to_string(), score);
        Self::new(vec![
            pair("electric", "maintenance", 0.6),
            pair("plumbing", "maintenance", 0.6),
            pair("plumbing", "heating", 0.7),
            pair("heating", "maintenance", 0.5),
            pair("elevator", "electric", 0.5),
            pair("cleaning", "landscaping", 0.5),
            pair("security", "maintenance", 0.3),
        ])
    }
}

/// Aggregated configuration of every planner component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub geo: GeoConfig,
    pub scoring: ScoringWeights,
    pub dispatch: DispatchConfig,
    pub optimizer: OptimizerConfig,
    pub forecast: ForecastConfig,
    pub roster: RosterSettings,
    pub specializations: BTreeMap<String, SpecializationConfig>,
    pub categories: CategoryMap,
    pub adjacency: SpecializationAdjacency,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            geo: GeoConfig::default(),
            scoring: ScoringWeights::default(),
            dispatch: DispatchConfig::default(),
            optimizer: OptimizerConfig::default(),
            forecast: ForecastConfig::default(),
            roster: RosterSettings::default(),
            specializations: default_specializations(),
            categories: CategoryMap::default(),
            adjacency: SpecializationAdjacency::default(),
        }
    }
}

impl PlannerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, PlannerError> {
        let config: PlannerConfig =
            serde_json::from_str(json).map_err(|err| PlannerError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PlannerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            PlannerError::InvalidConfig(format!("cannot read {}: {}", path.display(), err))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), PlannerError> {
        let invalid = |msg: String| Err(PlannerError::InvalidConfig(msg));

        if (self.scoring.total() - 1.0).abs() > 1e-9 {
            return invalid(format!("scoring weights sum to {}, expected 1.0", self.scoring.total()));
        }
        if self.geo.average_speed_kmh <= 0.0 {
            return invalid("average speed must be positive".to_string());
        }
        let annealing = &self.optimizer.annealing;
        if !(annealing.cooling_rate > 0.0 && annealing.cooling_rate < 1.0) {
            return invalid(format!("cooling rate {} not in (0, 1)", annealing.cooling_rate));
        }
        let genetic = &self.optimizer.genetic;
        if genetic.population_size < genetic.elite_count || genetic.population_size < 2 {
            return invalid("population must hold at least the elite and two members".to_string());
        }
        if genetic.tournament_size == 0 {
            return invalid("tournament size must be positive".to_string());
        }
        for (name, rate) in [
            ("crossover", genetic.crossover_rate),
            ("mutation", genetic.mutation_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return invalid(format!("{} rate {} not in [0, 1]", name, rate));
            }
        }
        if self.forecast.default_peak_hours.is_empty() {
            return invalid("default peak hours must not be empty".to_string());
        }
        if self.forecast.requests_per_executor <= 0.0 {
            return invalid("requests per executor must be positive".to_string());
        }
        for (name, spec) in &self.specializations {
            if spec.max_executors == 0 {
                return invalid(format!("{}: max_executors must be positive", name));
            }
            if spec.start_hour >= 24 || spec.shift_duration_hours == 0 {
                return invalid(format!("{}: invalid shift timing", name));
            }
        }
        Ok(())
    }
}
