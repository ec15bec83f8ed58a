//! Test configuration (SPEC_FULL.md ambient configuration section):
//! the knobs the CLI surface (spec.md §6) exposes, collected into one
//! value so `Scheduler::run` takes a single typed argument instead of a
//! long parameter list — the same shape as the teacher's CLI parsing in
//! `bpmn-lite-server/src/main.rs` (parse, validate, then hand a plain
//! struct to the engine).

use crate::error::{Result, RuntimeError};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    Random,
    Dfs,
    Pct,
    Replay,
}

impl std::str::FromStr for StrategyKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(StrategyKind::Random),
            "dfs" => Ok(StrategyKind::Dfs),
            "pct" => Ok(StrategyKind::Pct),
            "replay" => Ok(StrategyKind::Replay),
            other => Err(RuntimeError::Configuration(format!(
                "unknown strategy {other:?}; expected one of random, dfs, pct, replay"
            ))),
        }
    }
}

/// One test run's configuration (spec.md §6 CLI surface).
#[derive(Clone, Debug)]
pub struct TestConfig {
    pub strategy: StrategyKind,
    pub seed: u64,
    pub iterations: u64,
    pub max_steps: usize,
    pub timeout: Duration,
    pub replay_file: Option<PathBuf>,
    pub verbose: u8,
    /// Number of priority-change points for the `Pct` strategy (ignored
    /// by the others).
    pub pct_bound_d: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Random,
            seed: 0,
            iterations: 1,
            max_steps: 10_000,
            timeout: Duration::from_secs(60),
            replay_file: None,
            verbose: 0,
            pct_bound_d: 3,
        }
    }
}

impl TestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.strategy == StrategyKind::Replay && self.replay_file.is_none() {
            return Err(RuntimeError::Configuration(
                "strategy=replay requires --replay <schedule-file>".to_string(),
            ));
        }
        if self.strategy != StrategyKind::Replay && self.replay_file.is_some() {
            return Err(RuntimeError::Configuration(
                "--replay is only meaningful with strategy=replay".to_string(),
            ));
        }
        if self.max_steps == 0 {
            return Err(RuntimeError::Configuration("--max-steps must be at least 1".to_string()));
        }
        if self.iterations == 0 {
            return Err(RuntimeError::Configuration("--iterations must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_strategy_requires_a_replay_file() {
        let mut cfg = TestConfig {
            strategy: StrategyKind::Replay,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        cfg.replay_file = Some(PathBuf::from("trace.txt"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn non_replay_strategy_rejects_a_replay_file() {
        let cfg = TestConfig {
            strategy: StrategyKind::Random,
            replay_file: Some(PathBuf::from("trace.txt")),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
