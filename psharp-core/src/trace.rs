//! Trace model (spec.md §4.5): the `ScheduleTrace` replay input and the
//! semantic `BugTrace` used for diagnosis. Grounded on the teacher's
//! `RuntimeEvent` enum (an exhaustive, serializable catalog of "things
//! that happened" logged by every engine step) — the same shape, aimed
//! at a scheduler's choice points and machine events instead of a BPMN
//! engine's gateway/job events.

use crate::event::MachineId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry of the `ScheduleTrace` (spec.md §4.5). The sole input to the
/// `Replay` strategy, and the thing determinism (testable property 1)
/// promises is byte-identical across repeated runs of the same seed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChoicePoint {
    SchedulingStep(u64),
    BoolChoice(bool),
    IntChoice(u32),
}

impl fmt::Display for ChoicePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChoicePoint::SchedulingStep(id) => write!(f, "S {id}"),
            ChoicePoint::BoolChoice(b) => write!(f, "B {}", if *b { 1 } else { 0 }),
            ChoicePoint::IntChoice(n) => write!(f, "I {n}"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleTraceParseError {
    #[error("line {line}: empty")]
    Empty { line: usize },
    #[error("line {line}: unrecognized choice point {text:?}")]
    Unrecognized { line: usize, text: String },
    #[error("line {line}: malformed value in {text:?}")]
    MalformedValue { line: usize, text: String },
}

/// Ordered record of scheduling and nondeterministic choices (spec.md
/// §4.5). Header line carries strategy/seed/iteration metadata for
/// human readers; it is not parsed back into the trace itself.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScheduleTrace {
    pub points: Vec<ChoicePoint>,
}

impl ScheduleTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: ChoicePoint) {
        self.points.push(point);
    }

    pub fn to_text(&self, strategy: &str, seed: u64, iterations: u64) -> String {
        let mut out = format!("# psharp-schedule v1 strategy={strategy} seed={seed} iterations={iterations}\n");
        for point in &self.points {
            out.push_str(&point.to_string());
            out.push('\n');
        }
        out
    }

    pub fn from_text(text: &str) -> Result<Self, ScheduleTraceParseError> {
        let mut points = Vec::new();
        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, ' ');
            let tag = parts.next().ok_or(ScheduleTraceParseError::Empty { line: idx + 1 })?;
            let rest = parts.next().unwrap_or("").trim();
            let point = match tag {
                "S" => ChoicePoint::SchedulingStep(rest.parse().map_err(|_| ScheduleTraceParseError::MalformedValue {
                    line: idx + 1,
                    text: line.to_string(),
                })?),
                "B" => ChoicePoint::BoolChoice(match rest {
                    "0" => false,
                    "1" => true,
                    _ => {
                        return Err(ScheduleTraceParseError::MalformedValue {
                            line: idx + 1,
                            text: line.to_string(),
                        })
                    }
                }),
                "I" => ChoicePoint::IntChoice(rest.parse().map_err(|_| ScheduleTraceParseError::MalformedValue {
                    line: idx + 1,
                    text: line.to_string(),
                })?),
                _ => {
                    return Err(ScheduleTraceParseError::Unrecognized {
                        line: idx + 1,
                        text: line.to_string(),
                    })
                }
            };
            points.push(point);
        }
        Ok(Self { points })
    }
}

/// Semantic, human-oriented step kinds appended to the `BugTrace`
/// (spec.md §4.5). One variant per kind the runtime can report, matching
/// the literal list in the spec rather than reusing `machine::StepEvent`
/// — the bug trace is a reporting surface, not an internal control type,
/// and names its fields the way a reader of the trace expects them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BugStepKind {
    CreateMachine { creator: Option<MachineId>, target: MachineId, event_type: Option<String> },
    CreateMonitor { monitor_type: String },
    SendEvent { sender: MachineId, sender_state: String, target: MachineId, event_type: String },
    DequeueEvent { machine: MachineId, state: String, event_type: String },
    RaiseEvent { machine: MachineId, state: String, event_type: String },
    GotoState { machine: MachineId, from: String, to: String },
    PushState { machine: MachineId, state: String },
    PopState { machine: MachineId, state: String },
    InvokeAction { machine: MachineId, state: String, action: String },
    WaitToReceive { machine: MachineId, state: String, event_types: Vec<String> },
    ReceiveEvent { machine: MachineId, event_type: String },
    RandomChoice { machine: MachineId, state: String, value: String },
    MonitorEvent { monitor_type: String, event_type: String },
    AssertionFailure { machine: Option<MachineId>, state: Option<String>, message: String },
    LivenessViolation { monitor_type: String, state: String },
    Halt { machine: MachineId, state: String },
}

/// One entry of the bug trace, with the predecessor/successor pointers
/// the spec calls for "for UI traversal" — a doubly-linked view over
/// what is otherwise an append-only `Vec`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BugStep {
    pub index: usize,
    #[serde(flatten)]
    pub kind: BugStepKind,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// Append-only semantic log (spec.md §4.5). `prev`/`next` are filled in
/// as steps are appended, so the trace is always a valid linked list
/// even though storage is a flat vector.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BugTrace {
    steps: Vec<BugStep>,
}

impl BugTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: BugStepKind) -> usize {
        let index = self.steps.len();
        let prev = index.checked_sub(1);
        if let Some(prev_index) = prev {
            self.steps[prev_index].next = Some(index);
        }
        self.steps.push(BugStep { index, kind, prev, next: None });
        index
    }

    pub fn steps(&self) -> &[BugStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trips_through_parse() {
        let mut trace = ScheduleTrace::new();
        trace.push(ChoicePoint::SchedulingStep(3));
        trace.push(ChoicePoint::BoolChoice(true));
        trace.push(ChoicePoint::IntChoice(7));
        let text = trace.to_text("random", 42, 1);
        let parsed = ScheduleTrace::from_text(&text).unwrap();
        assert_eq!(parsed.points, trace.points);
    }

    #[test]
    fn parse_rejects_unknown_tag() {
        let err = ScheduleTrace::from_text("X 1\n").unwrap_err();
        assert!(matches!(err, ScheduleTraceParseError::Unrecognized { .. }));
    }

    #[test]
    fn bug_trace_links_predecessor_and_successor() {
        let mut trace = BugTrace::new();
        let a = trace.push(BugStepKind::Halt {
            machine: MachineId::new(0, "X", "default"),
            state: "Done".to_string(),
        });
        let b = trace.push(BugStepKind::AssertionFailure {
            machine: None,
            state: None,
            message: "boom".to_string(),
        });
        assert_eq!(trace.steps()[a].next, Some(b));
        assert_eq!(trace.steps()[b].prev, Some(a));
        assert_eq!(trace.steps()[b].next, None);
    }
}
