use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::problem::{Mapping, Problem};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealingConfig {
    pub initial_temperature: f64,
    /// Geometric cooling factor applied after every iteration.
    pub cooling_rate: f64,
    pub min_temperature: f64,
    pub max_iterations: usize,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            initial_temperature: 100.0,
            cooling_rate: 0.95,
            min_temperature: 0.1,
            max_iterations: 1000,
        }
    }
}

/// Metropolis search over single reassignments. `seeds` are candidate
/// starting points; the walk starts from the fittest one and the best
/// feasible mapping seen is returned.
pub(crate) fn anneal<R: Rng>(
    problem: &Problem,
    seeds: &[Mapping],
    config: &AnnealingConfig,
    rng: &mut R,
) -> Mapping {
    let mut best = problem.current.clone();
    let mut best_cost = 1.0 - problem.fitness(&best);
    for seed in seeds {
        let cost = 1.0 - problem.fitness(seed);
        if cost < best_cost && problem.is_feasible(seed) {
            best = seed.clone();
            best_cost = cost;
        }
    }

    let movable = problem.movable();
    if movable.is_empty() {
        return best;
    }

    let mut current = best.clone();
    let mut current_cost = best_cost;
    let mut temperature = config.initial_temperature;
    let mut accepted = 0usize;
    let mut iterations = 0usize;

    while iterations < config.max_iterations && temperature >= config.min_temperature {
        iterations += 1;

        let i = movable[rng.gen_range(0..movable.len())];
        let mut neighbor = current.clone();
        neighbor[i] = problem.random_option(i, rng);

        let cost = 1.0 - problem.fitness(&neighbor);
        let delta = cost - current_cost;
        if delta <= 0.0 || rng.gen_range(0.0..1.0) < (-delta / temperature).exp() {
            current = neighbor;
            current_cost = cost;
            accepted += 1;
            if current_cost < best_cost && problem.is_feasible(&current) {
                best = current.clone();
                best_cost = current_cost;
            }
        }

        temperature *= config.cooling_rate;
    }

    debug!(iterations, accepted, best_cost, "annealing finished");
    best
}
