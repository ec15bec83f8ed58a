//! State definition registry: reflection-free metadata per machine type
//! (spec.md §3, "State metadata").
//!
//! The source P# derives state graphs from attributes at load time. A
//! systems language has no attribute reflection worth trusting at runtime,
//! so machine types register themselves by constructing a `MachineType`
//! value: an explicit builder that names states, entry/exit handlers, and
//! handler/transition maps (spec.md §9, "Reflection-heavy source
//! metadata"). This is validated once, at registration, and handed
//! unchanged to every instance and to the Replay strategy.

use crate::error::{Result, RuntimeError};
use crate::machine::ActionFn;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type StateName = String;
pub type EventType = String;

/// What a handler does in response to an event, resolved in priority
/// order against the top state's inherited handler map (spec.md §4.1).
#[derive(Clone)]
pub enum Handler {
    /// Runs a user action. The action may itself call `raise`/`goto`/
    /// `push`/`pop` on its `Ctx` — the three-way split below only covers
    /// the *declarative* shorthand for an action whose entire body is a
    /// transition request.
    Action(ActionFn),
    /// Pops the current top frame and pushes the target.
    Goto(StateName),
    /// Pushes the target without popping.
    Push(StateName),
}

/// Per-state metadata, as the author registers it. `parent` names the
/// state this one inherits unmatched handler-map entries from.
#[derive(Clone, Default)]
pub struct StateDef {
    pub name: StateName,
    pub parent: Option<StateName>,
    pub is_start: bool,
    pub entry: Option<ActionFn>,
    pub exit: Option<ActionFn>,
    pub handlers: HashMap<EventType, Handler>,
    pub deferred: HashSet<EventType>,
    pub ignored: HashSet<EventType>,
}

impl StateDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    pub fn on_entry(mut self, action: ActionFn) -> Self {
        self.entry = Some(action);
        self
    }

    pub fn on_exit(mut self, action: ActionFn) -> Self {
        self.exit = Some(action);
        self
    }

    pub fn on_action(mut self, event: impl Into<String>, action: ActionFn) -> Self {
        self.handlers.insert(event.into(), Handler::Action(action));
        self
    }

    pub fn on_goto(mut self, event: impl Into<String>, target: impl Into<String>) -> Self {
        self.handlers
            .insert(event.into(), Handler::Goto(target.into()));
        self
    }

    pub fn on_push(mut self, event: impl Into<String>, target: impl Into<String>) -> Self {
        self.handlers
            .insert(event.into(), Handler::Push(target.into()));
        self
    }

    pub fn defer(mut self, event: impl Into<String>) -> Self {
        self.deferred.insert(event.into());
        self
    }

    pub fn ignore(mut self, event: impl Into<String>) -> Self {
        self.ignored.insert(event.into());
        self
    }
}

/// The flattened (parent-merged) view of a state: handler/transition maps
/// plus deferred/ignored sets, memoized once per state at registration so
/// that hot-path lookups in `machine.rs` never walk the parent chain.
#[derive(Clone, Default)]
pub struct FlattenedState {
    pub entry: Option<ActionFn>,
    pub exit: Option<ActionFn>,
    pub handlers: HashMap<EventType, Handler>,
    pub deferred: HashSet<EventType>,
    pub ignored: HashSet<EventType>,
}

/// Validated, immutable state graph for one machine type. Built once via
/// `MachineTypeBuilder`, shared (via `Arc`) by every instance of the type.
pub struct MachineType {
    pub name: String,
    pub start_state: StateName,
    flattened: HashMap<StateName, FlattenedState>,
}

impl MachineType {
    pub fn flattened(&self, state: &str) -> &FlattenedState {
        self.flattened
            .get(state)
            .unwrap_or_else(|| panic!("unknown state {state} in machine type {}", self.name))
    }

    pub fn has_state(&self, state: &str) -> bool {
        self.flattened.contains_key(state)
    }
}

/// Constructs and validates a `MachineType`. Validation failures are
/// `ConfigurationError`s (spec.md §7): missing start state, two handlers
/// for the same event at the same level, goto/push to an unknown state.
#[derive(Default)]
pub struct MachineTypeBuilder {
    name: String,
    states: HashMap<StateName, StateDef>,
}

impl MachineTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: HashMap::new(),
        }
    }

    pub fn state(mut self, def: StateDef) -> Self {
        self.states.insert(def.name.clone(), def);
        self
    }

    pub fn build(self) -> Result<Arc<MachineType>> {
        let starts: Vec<_> = self.states.values().filter(|s| s.is_start).collect();
        if starts.is_empty() {
            return Err(RuntimeError::Configuration(format!(
                "machine type {}: no start state declared",
                self.name
            )));
        }
        if starts.len() > 1 {
            return Err(RuntimeError::Configuration(format!(
                "machine type {}: multiple start states declared",
                self.name
            )));
        }
        let start_state = starts[0].name.clone();

        for def in self.states.values() {
            if let Some(parent) = &def.parent {
                if !self.states.contains_key(parent) {
                    return Err(RuntimeError::Configuration(format!(
                        "machine type {}: state {} names unknown parent {}",
                        self.name, def.name, parent
                    )));
                }
            }
            for (event, handler) in &def.handlers {
                if def.deferred.contains(event) || def.ignored.contains(event) {
                    return Err(RuntimeError::Configuration(format!(
                        "machine type {}: state {} has both a handler and a defer/ignore for event {}",
                        self.name, def.name, event
                    )));
                }
                let target = match handler {
                    Handler::Goto(t) | Handler::Push(t) => Some(t),
                    Handler::Action(_) => None,
                };
                if let Some(target) = target {
                    if !self.states.contains_key(target) {
                        return Err(RuntimeError::Configuration(format!(
                            "machine type {}: state {} transitions to unknown state {}",
                            self.name, def.name, target
                        )));
                    }
                }
            }
        }

        let mut flattened = HashMap::new();
        for name in self.states.keys() {
            flattened.insert(name.clone(), self.flatten_chain(name));
        }

        Ok(Arc::new(MachineType {
            name: self.name,
            start_state,
            flattened,
        }))
    }

    /// Walks the parent chain once per state, child overriding parent on
    /// conflicting keys (spec.md §3, "State metadata").
    fn flatten_chain(&self, state: &str) -> FlattenedState {
        let mut chain = Vec::new();
        let mut cur = Some(state.to_string());
        while let Some(name) = cur {
            let def = &self.states[&name];
            cur = def.parent.clone();
            chain.push(def);
        }
        // Walk from the outermost ancestor inward so children overwrite.
        let mut out = FlattenedState::default();
        for def in chain.into_iter().rev() {
            if def.entry.is_some() {
                out.entry = def.entry.clone();
            }
            if def.exit.is_some() {
                out.exit = def.exit.clone();
            }
            for (k, v) in &def.handlers {
                out.handlers.insert(k.clone(), v.clone());
            }
            for e in &def.deferred {
                out.deferred.insert(e.clone());
                out.ignored.remove(e);
            }
            for e in &def.ignored {
                out.ignored.insert(e.clone());
                out.deferred.remove(e);
            }
        }
        // A handler declared closer to the leaf wins outright over an
        // inherited defer/ignore of the same event.
        for event in out.handlers.keys().cloned().collect::<Vec<_>>() {
            out.deferred.remove(&event);
            out.ignored.remove(&event);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_action() -> ActionFn {
        Arc::new(|_ctx, _event| Ok(()))
    }

    #[test]
    fn rejects_missing_start_state() {
        let err = MachineTypeBuilder::new("Client")
            .state(StateDef::new("Active"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }

    #[test]
    fn rejects_goto_to_unknown_state() {
        let err = MachineTypeBuilder::new("Client")
            .state(StateDef::new("Active").start().on_goto("E", "Nowhere"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }

    #[test]
    fn rejects_duplicate_start_states() {
        let err = MachineTypeBuilder::new("Nested")
            .state(StateDef::new("A").start())
            .state(StateDef::new("B").start())
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }

    #[test]
    fn flattening_inherits_parent_entry() {
        let ty = MachineTypeBuilder::new("Nested")
            .state(StateDef::new("Base").on_entry(noop_action()))
            .state(StateDef::new("Child").parent("Base").start())
            .build()
            .unwrap();
        let flat = ty.flattened("Child");
        assert!(flat.entry.is_some());
    }

    #[test]
    fn child_handler_overrides_parent_handler() {
        let ty = MachineTypeBuilder::new("Nested")
            .state(StateDef::new("Base").on_goto("E", "Base"))
            .state(
                StateDef::new("Child")
                    .parent("Base")
                    .start()
                    .on_goto("E", "Child"),
            )
            .build()
            .unwrap();
        match ty.flattened("Child").handlers.get("E") {
            Some(Handler::Goto(target)) => assert_eq!(target, "Child"),
            _ => panic!("expected overridden goto handler"),
        }
    }
}
