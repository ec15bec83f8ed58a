//! Exploration strategy interface (spec.md §4.4) and the nondeterminism
//! oracle: every scheduling decision and every `random_bool`/`random_int`
//! call is routed through one of these so that strategy+seed reproduces
//! byte-identical traces (spec.md §8, testable property 1).

pub mod dfs;
pub mod pct;
pub mod random;
pub mod replay;

use crate::error::Result;

/// A machine's raw id, as handed to the strategy for scheduling
/// decisions. Kept as a bare `u64` rather than `MachineId` — the
/// strategy only ever needs to compare and record ids, never inspect
/// partition/type-name metadata.
pub type OpId = u64;

/// What the strategy is told about the point it's being asked to decide
/// at. Deliberately thin (spec.md §9, "model the runtime as an explicit
/// context value... forbid hidden globals" — the same discipline applies
/// to what the strategy sees).
pub struct SchedContext {
    pub step_count: usize,
}

/// spec.md §4.4.
pub trait Strategy: Send {
    fn next_operation(&mut self, enabled: &[OpId], ctx: &SchedContext) -> Result<OpId>;
    fn next_bool(&mut self, max: u32) -> Result<bool>;
    fn next_int(&mut self, max: u32) -> Result<u32>;
    /// Resets for another schedule under the same strategy; `false` means
    /// exploration is complete (DFS exhausted, or an iteration bound hit).
    fn prepare_next_iteration(&mut self) -> bool;
    fn seed(&self) -> u64;
    fn name(&self) -> &'static str;
}
