//! Complete depth-first enumeration (spec.md §4.4): "Enumerates all
//! enabled sequences up to a step bound... deterministic and complete
//! for a given bound."
//!
//! Every scheduling decision *and* every random choice is a branch point
//! in the same search tree: a frame records the alternatives available
//! at that point and which one is currently selected. `prepare_next_iteration`
//! backtracks from the deepest frame, advancing the first one that still
//! has an untried alternative and discarding everything below it — the
//! standard iterative re-exploration of a DFS over a decision tree too
//! large to hold in memory at once.

use crate::error::{Result, RuntimeError};
use crate::strategy::{OpId, SchedContext, Strategy};

enum FrameKind {
    Op(Vec<OpId>),
    Bool,
    Int(u32),
}

impl FrameKind {
    fn alternative_count(&self) -> usize {
        match self {
            FrameKind::Op(alts) => alts.len(),
            FrameKind::Bool => 2,
            FrameKind::Int(max) => (*max).max(1) as usize,
        }
    }
}

struct Frame {
    kind: FrameKind,
    chosen: usize,
}

pub struct Dfs {
    step_bound: usize,
    frames: Vec<Frame>,
    /// Position in `frames` the current run has replayed up to; new
    /// frames are appended once the replayed prefix runs out.
    depth: usize,
    exhausted: bool,
}

impl Dfs {
    pub fn new(step_bound: usize) -> Self {
        Self {
            step_bound,
            frames: Vec::new(),
            depth: 0,
            exhausted: false,
        }
    }

    fn next_choice(&mut self, fresh: FrameKind) -> Result<usize> {
        if self.depth >= self.step_bound {
            return Err(RuntimeError::Internal("DFS strategy exceeded its step bound".to_string()));
        }
        let chosen = if self.depth < self.frames.len() {
            self.frames[self.depth].chosen
        } else {
            self.frames.push(Frame { kind: fresh, chosen: 0 });
            0
        };
        self.depth += 1;
        Ok(chosen)
    }
}

impl Strategy for Dfs {
    fn next_operation(&mut self, enabled: &[OpId], _ctx: &SchedContext) -> Result<OpId> {
        if enabled.is_empty() {
            return Err(RuntimeError::Internal("DFS strategy asked to choose among zero enabled ops".to_string()));
        }
        let mut alts = enabled.to_vec();
        alts.sort_unstable();
        let idx = self.next_choice(FrameKind::Op(alts.clone()))?;
        Ok(alts[idx])
    }

    fn next_bool(&mut self, _max: u32) -> Result<bool> {
        let idx = self.next_choice(FrameKind::Bool)?;
        Ok(idx == 1)
    }

    fn next_int(&mut self, max: u32) -> Result<u32> {
        let idx = self.next_choice(FrameKind::Int(max))?;
        Ok(idx as u32)
    }

    fn prepare_next_iteration(&mut self) -> bool {
        self.depth = 0;
        while let Some(frame) = self.frames.last_mut() {
            if frame.chosen + 1 < frame.kind.alternative_count() {
                frame.chosen += 1;
                return true;
            }
            self.frames.pop();
        }
        self.exhausted = true;
        false
    }

    fn seed(&self) -> u64 {
        0
    }

    fn name(&self) -> &'static str {
        "dfs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_every_ordering_of_two_machines() {
        let mut dfs = Dfs::new(8);
        let ctx = SchedContext { step_count: 0 };
        let mut orderings = Vec::new();
        loop {
            let first = dfs.next_operation(&[1, 2], &ctx).unwrap();
            let second = dfs.next_operation(&[1, 2], &ctx).unwrap();
            orderings.push((first, second));
            if !dfs.prepare_next_iteration() {
                break;
            }
        }
        orderings.sort();
        orderings.dedup();
        assert_eq!(orderings, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
    }

    #[test]
    fn step_bound_is_enforced() {
        let mut dfs = Dfs::new(1);
        let ctx = SchedContext { step_count: 0 };
        dfs.next_operation(&[1], &ctx).unwrap();
        let err = dfs.next_operation(&[1], &ctx).unwrap_err();
        assert!(matches!(err, RuntimeError::Internal(_)));
    }
}
