use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::problem::{Mapping, Problem};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub generations: usize,
    pub crossover_rate: f64,
    /// Per-gene probability of reassignment to a random eligible shift.
    pub mutation_rate: f64,
    pub elite_count: usize,
    pub tournament_size: usize,
    /// Below this many assignments the genetic search falls back to greedy.
    pub min_assignments: usize,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            generations: 100,
            crossover_rate: 0.8,
            mutation_rate: 0.1,
            elite_count: 5,
            tournament_size: 3,
            min_assignments: 10,
        }
    }
}

/// Evolves mappings starting from `seeds` and returns the fittest feasible
/// mapping ever seen. The first seed must be feasible.
pub(crate) fn evolve<R: Rng>(
    problem: &Problem,
    seeds: &[Mapping],
    config: &GeneticConfig,
    rng: &mut R,
) -> Mapping {
    let Some(first) = seeds.first() else {
        return problem.current.clone();
    };
    if problem.movable().is_empty() {
        return first.clone();
    }

    let size = config.population_size.max(seeds.len()).max(2);
    let mut population: Vec<Mapping> = seeds.to_vec();
    while population.len() < size {
        let mut individual = seeds[population.len() % seeds.len()].clone();
        let genes = rng.gen_range(1..=3);
        for _ in 0..genes {
            let i = rng.gen_range(0..individual.len());
            individual[i] = problem.random_option(i, rng);
        }
        population.push(individual);
    }

    let mut fitness = evaluate(problem, &population);
    let (mut best, mut best_fitness) = (first.clone(), problem.fitness(first));
    track_best(problem, &population, &fitness, &mut best, &mut best_fitness);

    for generation in 0..config.generations {
        let mut ranked: Vec<usize> = (0..population.len()).collect();
        ranked.sort_by(|&a, &b| fitness[b].total_cmp(&fitness[a]));

        let mut next: Vec<Mapping> = ranked
            .iter()
            .take(config.elite_count.min(size))
            .map(|&i| population[i].clone())
            .collect();

        while next.len() < size {
            let a = tournament(&fitness, config.tournament_size, rng);
            let b = tournament(&fitness, config.tournament_size, rng);
            let mut child = if rng.gen_bool(config.crossover_rate) {
                crossover(&population[a], &population[b], rng)
            } else {
                population[a].clone()
            };
            mutate(problem, &mut child, config.mutation_rate, rng);
            next.push(child);
        }

        population = next;
        fitness = evaluate(problem, &population);
        track_best(problem, &population, &fitness, &mut best, &mut best_fitness);

        if generation % 10 == 0 {
            debug!(generation, best_fitness, "genetic search progress");
        }
    }

    best
}

fn evaluate(problem: &Problem, population: &[Mapping]) -> Vec<f64> {
    population.par_iter().map(|m| problem.fitness(m)).collect()
}

fn track_best(
    problem: &Problem,
    population: &[Mapping],
    fitness: &[f64],
    best: &mut Mapping,
    best_fitness: &mut f64,
) {
    for (individual, &score) in population.iter().zip(fitness) {
        if score > *best_fitness && problem.is_feasible(individual) {
            *best = individual.clone();
            *best_fitness = score;
        }
    }
}

fn tournament<R: Rng>(fitness: &[f64], size: usize, rng: &mut R) -> usize {
    let mut winner = rng.gen_range(0..fitness.len());
    for _ in 1..size {
        let challenger = rng.gen_range(0..fitness.len());
        if fitness[challenger] > fitness[winner] {
            winner = challenger;
        }
    }
    winner
}

/// Single-point crossover.
fn crossover<R: Rng>(a: &[usize], b: &[usize], rng: &mut R) -> Mapping {
    if a.len() < 2 {
        return a.to_vec();
    }
    let point = rng.gen_range(1..a.len());
    a[..point].iter().chain(&b[point..]).copied().collect()
}

fn mutate<R: Rng>(problem: &Problem, mapping: &mut [usize], rate: f64, rng: &mut R) {
    for i in 0..mapping.len() {
        if rng.gen_bool(rate) {
            mapping[i] = problem.random_option(i, rng);
        }
    }
}
