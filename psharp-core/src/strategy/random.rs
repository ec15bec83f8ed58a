//! Uniform-random strategy (spec.md §4.4): "uniformly picks among
//! enabled; bounded-step cutoff."

use crate::error::{Result, RuntimeError};
use crate::strategy::{OpId, SchedContext, Strategy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct Random {
    seed: u64,
    iteration: u64,
    max_iterations: u64,
    rng: StdRng,
}

impl Random {
    pub fn new(seed: u64, max_iterations: u64) -> Self {
        Self {
            seed,
            iteration: 0,
            max_iterations,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Strategy for Random {
    fn next_operation(&mut self, enabled: &[OpId], _ctx: &SchedContext) -> Result<OpId> {
        if enabled.is_empty() {
            return Err(RuntimeError::Internal("random strategy asked to choose among zero enabled ops".to_string()));
        }
        let idx = self.rng.gen_range(0..enabled.len());
        Ok(enabled[idx])
    }

    fn next_bool(&mut self, max: u32) -> Result<bool> {
        // `max` names the number of equally-likely outcomes the caller
        // wants (spec.md §6 `random_bool(max=2)`); collapse to a biased
        // coin only when the caller asks for something other than 2.
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
        self.rng = StdRng::seed_from_u64(self.seed ^ self.iteration);
        true
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_reproduces_same_choices() {
        let mut a = Random::new(42, 10);
        let mut b = Random::new(42, 10);
        let ctx = SchedContext { step_count: 0 };
        let enabled = [1, 2, 3, 4];
        for _ in 0..20 {
            assert_eq!(
                a.next_operation(&enabled, &ctx).unwrap(),
                b.next_operation(&enabled, &ctx).unwrap()
            );
        }
    }

    #[test]
    fn iteration_bound_terminates_exploration() {
        let mut r = Random::new(1, 2);
        assert!(r.prepare_next_iteration());
        assert!(!r.prepare_next_iteration());
    }
}
