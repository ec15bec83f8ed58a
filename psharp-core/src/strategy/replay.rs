//! Replay-from-trace strategy (spec.md §4.4): "Returns, in order, the
//! operation IDs and choice values from a previously serialized
//! schedule. Fails fast if the program under test diverges."

use crate::error::{Result, RuntimeError};
use crate::strategy::{OpId, SchedContext, Strategy};
use crate::trace::{ChoicePoint, ScheduleTrace};

pub struct Replay {
    trace: ScheduleTrace,
    position: usize,
    reported_seed: u64,
}

impl Replay {
    pub fn new(trace: ScheduleTrace, reported_seed: u64) -> Self {
        Self {
            trace,
            position: 0,
            reported_seed,
        }
    }

    fn next_point(&mut self, what: &str) -> Result<ChoicePoint> {
        let point = self
            .trace
            .points
            .get(self.position)
            .cloned()
            .ok_or_else(|| RuntimeError::ReplayDivergence {
                index: self.position,
                reason: format!("trace exhausted, but the program requested {what}"),
            })?;
        self.position += 1;
        Ok(point)
    }
}

impl Strategy for Replay {
    fn next_operation(&mut self, enabled: &[OpId], _ctx: &SchedContext) -> Result<OpId> {
        let index = self.position;
        match self.next_point("a scheduling decision")? {
            ChoicePoint::SchedulingStep(id) => {
                if !enabled.contains(&id) {
                    return Err(RuntimeError::ReplayDivergence {
                        index,
                        reason: format!("recorded machine {id} is not in the enabled set {enabled:?}"),
                    });
                }
                Ok(id)
            }
            other => Err(RuntimeError::ReplayDivergence {
                index,
                reason: format!("expected a scheduling step, recorded {other:?}"),
            }),
        }
    }

    fn next_bool(&mut self, _max: u32) -> Result<bool> {
        let index = self.position;
        match self.next_point("a boolean choice")? {
            ChoicePoint::BoolChoice(b) => Ok(b),
            other => Err(RuntimeError::ReplayDivergence {
                index,
                reason: format!("expected a boolean choice, recorded {other:?}"),
            }),
        }
    }

    fn next_int(&mut self, _max: u32) -> Result<u32> {
        let index = self.position;
        match self.next_point("an integer choice")? {
            ChoicePoint::IntChoice(n) => Ok(n),
            other => Err(RuntimeError::ReplayDivergence {
                index,
                reason: format!("expected an integer choice, recorded {other:?}"),
            }),
        }
    }

    fn prepare_next_iteration(&mut self) -> bool {
        false
    }

    fn seed(&self) -> u64 {
        self.reported_seed
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_recorded_choices_in_order() {
        let mut trace = ScheduleTrace::new();
        trace.push(ChoicePoint::SchedulingStep(2));
        trace.push(ChoicePoint::BoolChoice(true));
        trace.push(ChoicePoint::SchedulingStep(1));

        let mut replay = Replay::new(trace, 0);
        let ctx = SchedContext { step_count: 0 };
        assert_eq!(replay.next_operation(&[1, 2], &ctx).unwrap(), 2);
        assert!(replay.next_bool(2).unwrap());
        assert_eq!(replay.next_operation(&[1], &ctx).unwrap(), 1);
    }

    #[test]
    fn divergence_when_recorded_machine_not_enabled() {
        let mut trace = ScheduleTrace::new();
        trace.push(ChoicePoint::SchedulingStep(99));
        let mut replay = Replay::new(trace, 0);
        let ctx = SchedContext { step_count: 0 };
        let err = replay.next_operation(&[1, 2], &ctx).unwrap_err();
        assert!(matches!(err, RuntimeError::ReplayDivergence { .. }));
    }
}
