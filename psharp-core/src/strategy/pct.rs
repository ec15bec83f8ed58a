//! Priority-based scheduling (spec.md §4.4): "assigns integer priorities
//! to machines and prefers high-priority enabled machines, breaking ties
//! by an injected random stream... the strategy class that finds
//! ordering bugs efficiently."
//!
//! Modeled on probabilistic concurrency testing: a random total order of
//! priorities over machines, plus a small number of random "priority
//! change points" — steps at which the lowest-priority enabled machine
//! is promoted to the front. Both the initial order and the change
//! points are reseeded every iteration, giving PCT's characteristic
//! ability to find bugs that need a specific, rare interleaving without
//! enumerating the whole schedule space the way DFS does.

use crate::error::{Result, RuntimeError};
use crate::strategy::{OpId, SchedContext, Strategy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct Pct {
    seed: u64,
    iteration: u64,
    max_iterations: u64,
    bound_d: usize,
    rng: StdRng,
    /// Front = highest priority.
    priorities: Vec<OpId>,
    change_points: Vec<usize>,
    step_count: usize,
}

impl Pct {
    pub fn new(seed: u64, bound_d: usize, max_iterations: u64) -> Self {
        let mut p = Self {
            seed,
            iteration: 0,
            max_iterations,
            bound_d: bound_d.max(1),
            rng: StdRng::seed_from_u64(seed),
            priorities: Vec::new(),
            change_points: Vec::new(),
            step_count: 0,
        };
        p.reseed_iteration();
        p
    }

    fn reseed_iteration(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed ^ (0x9E37_79B9 * (self.iteration + 1)));
        self.priorities.clear();
        self.step_count = 0;
        let mut points: Vec<usize> = (0..self.bound_d.saturating_sub(1))
            .map(|_| self.rng.gen_range(0..1024))
            .collect();
        points.sort_unstable();
        self.change_points = points;
    }

    fn ensure_known(&mut self, enabled: &[OpId]) {
        for &id in enabled {
            if !self.priorities.contains(&id) {
                let idx = self.rng.gen_range(0..=self.priorities.len());
                self.priorities.insert(idx, id);
            }
        }
    }

    fn highest_priority_enabled(&self, enabled: &[OpId]) -> OpId {
        self.priorities
            .iter()
            .copied()
            .find(|id| enabled.contains(id))
            .unwrap_or(enabled[0])
    }
}

impl Strategy for Pct {
    fn next_operation(&mut self, enabled: &[OpId], _ctx: &SchedContext) -> Result<OpId> {
        if enabled.is_empty() {
            return Err(RuntimeError::Internal("PCT strategy asked to choose among zero enabled ops".to_string()));
        }
        self.ensure_known(enabled);

        if self.change_points.contains(&self.step_count) {
            let idx = self.rng.gen_range(0..enabled.len());
            let promoted = enabled[idx];
            self.priorities.retain(|id| *id != promoted);
            self.priorities.insert(0, promoted);
        }

        let chosen = self.highest_priority_enabled(enabled);
        self.step_count += 1;
        Ok(chosen)
    }

    fn next_bool(&mut self, max: u32) -> Result<bool> {
        Ok(self.rng.gen_range(0..max.max(1)) == 0)
    }

    fn next_int(&mut self, max: u32) -> Result<u32> {
        Ok(self.rng.gen_range(0..max.max(1)))
    }

    fn prepare_next_iteration(&mut self) -> bool {
        self.iteration += 1;
        if self.iteration >= self.max_iterations {
            return false;
        }
        self.reseed_iteration();
        true
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn name(&self) -> &'static str {
        "pct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_reproduces_same_schedule() {
        let mut a = Pct::new(7, 3, 5);
        let mut b = Pct::new(7, 3, 5);
        let ctx = SchedContext { step_count: 0 };
        let enabled = [10, 20, 30];
        for _ in 0..30 {
            assert_eq!(
                a.next_operation(&enabled, &ctx).unwrap(),
                b.next_operation(&enabled, &ctx).unwrap()
            );
        }
    }

    #[test]
    fn always_picks_an_enabled_machine() {
        let mut pct = Pct::new(1, 2, 5);
        let ctx = SchedContext { step_count: 0 };
        for _ in 0..50 {
            let chosen = pct.next_operation(&[5, 6], &ctx).unwrap();
            assert!(chosen == 5 || chosen == 6);
        }
    }
}
