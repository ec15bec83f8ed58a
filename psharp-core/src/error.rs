//! Runtime error taxonomy (spec.md §7).
//!
//! One enum, one variant per error *kind*, matched exhaustively by callers.
//! `Scheduler::run` never lets any of these unwind past it: every variant
//! is either converted into a bug record or, for `Internal`, aborts the
//! run immediately.

use crate::event::MachineId;
use thiserror::Error;

/// Errors the runtime can surface from a single test run.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// A user `assert` failed, or a runtime-checked invariant was
    /// violated (unhandled event, exceeded `assert_at_most_n`, cyclic
    /// await).
    #[error("assertion failure: {0}")]
    AssertionFailure(String),

    /// A liveness monitor was left in a hot state after the fairness
    /// bound was reached.
    #[error("liveness violation: monitor {monitor} left in hot state {state}")]
    LivenessViolation { monitor: String, state: String },

    /// A user handler raised an exception (panicked or returned an error)
    /// while executing.
    #[error("unhandled exception in machine {machine:?} state {state}, action {action}: {message}")]
    UnhandledException {
        machine: MachineId,
        state: String,
        action: String,
        message: String,
    },

    /// Only surfaced under the reliable overlay, and only once the retry
    /// budget for a step is exhausted.
    #[error("transient storage failure (retries exhausted): {0}")]
    TransientStorageFailure(String),

    /// An invalid state graph was detected at machine-type registration,
    /// before any step ran.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The scheduler found every non-halted machine blocked with no
    /// matching event in flight.
    #[error("deadlock: {0}")]
    Deadlock(String),

    /// A fatal runtime invariant was violated (e.g. a strategy returned a
    /// disabled operation). Distinct from the above: this is a defect in
    /// the runtime or the strategy, never in the program under test.
    #[error("internal error: {0}")]
    Internal(String),

    /// Replaying a schedule trace diverged from the recorded choices.
    #[error("replay divergence at step {index}: {reason}")]
    ReplayDivergence { index: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        let err = RuntimeError::Deadlock("no enabled machines".to_string());
        assert!(err.to_string().contains("no enabled machines"));
    }

    #[test]
    fn liveness_violation_names_monitor_and_state() {
        let err = RuntimeError::LivenessViolation {
            monitor: "Progress".to_string(),
            state: "Waiting".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Progress"));
        assert!(msg.contains("Waiting"));
    }
}
