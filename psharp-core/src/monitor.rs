//! Specification monitors (spec.md §4.2): state machines driven
//! synchronously from the invoking step, never scheduled, never queued.
//!
//! Monitors share the *shape* of a machine's state metadata (tree of
//! states, entry/exit, handler maps, goto/push) but not its action
//! signature: a monitor handler "may assert safety... but may not send,
//! create, receive, or make random choices" (spec.md §4.2), so its `Ctx`
//! is a narrower type than `machine::Ctx` and the two cannot share one
//! `ActionFn`. Rather than give monitors the full machine API and trust
//! handlers not to call the wider part of it, registration uses its own
//! builder — the disallowed operations simply don't exist on `MonitorCtx`.

use crate::error::{Result, RuntimeError};
use crate::event::Event;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type StateName = String;
pub type EventType = String;

pub type MonitorActionFn = Arc<dyn Fn(&mut MonitorCtx, &Event) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub enum MonitorHandler {
    Action(MonitorActionFn),
    Goto(StateName),
    Push(StateName),
}

#[derive(Clone, Default)]
pub struct MonitorStateDef {
    name: StateName,
    is_start: bool,
    is_hot: bool,
    is_cold: bool,
    entry: Option<MonitorActionFn>,
    exit: Option<MonitorActionFn>,
    handlers: HashMap<EventType, MonitorHandler>,
    ignored: HashSet<EventType>,
}

impl MonitorStateDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    pub fn hot(mut self) -> Self {
        self.is_hot = true;
        self
    }

    pub fn cold(mut self) -> Self {
        self.is_cold = true;
        self
    }

    pub fn on_entry(mut self, action: MonitorActionFn) -> Self {
        self.entry = Some(action);
        self
    }

    pub fn on_exit(mut self, action: MonitorActionFn) -> Self {
        self.exit = Some(action);
        self
    }

    pub fn on_action(mut self, event: impl Into<String>, action: MonitorActionFn) -> Self {
        self.handlers.insert(event.into(), MonitorHandler::Action(action));
        self
    }

    pub fn on_goto(mut self, event: impl Into<String>, target: impl Into<String>) -> Self {
        self.handlers.insert(event.into(), MonitorHandler::Goto(target.into()));
        self
    }

    pub fn on_push(mut self, event: impl Into<String>, target: impl Into<String>) -> Self {
        self.handlers.insert(event.into(), MonitorHandler::Push(target.into()));
        self
    }

    pub fn ignore(mut self, event: impl Into<String>) -> Self {
        self.ignored.insert(event.into());
        self
    }
}

/// Validated, immutable monitor state graph. Built once, shared by every
/// `Monitor` instance of a given spec (though most test programs register
/// exactly one monitor of each type).
pub struct MonitorType {
    pub name: String,
    start_state: StateName,
    states: HashMap<StateName, MonitorStateDef>,
}

impl MonitorType {
    fn state(&self, name: &str) -> &MonitorStateDef {
        self.states
            .get(name)
            .unwrap_or_else(|| panic!("unknown monitor state {name} in {}", self.name))
    }
}

#[derive(Default)]
pub struct MonitorTypeBuilder {
    name: String,
    states: HashMap<StateName, MonitorStateDef>,
}

impl MonitorTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: HashMap::new(),
        }
    }

    pub fn state(mut self, def: MonitorStateDef) -> Self {
        self.states.insert(def.name.clone(), def);
        self
    }

    pub fn build(self) -> Result<Arc<MonitorType>> {
        let starts: Vec<_> = self.states.values().filter(|s| s.is_start).collect();
        if starts.len() != 1 {
            return Err(RuntimeError::Configuration(format!(
                "monitor type {}: expected exactly one start state, found {}",
                self.name,
                starts.len()
            )));
        }
        let start_state = starts[0].name.clone();

        for def in self.states.values() {
            if def.is_hot && def.is_cold {
                return Err(RuntimeError::Configuration(format!(
                    "monitor type {}: state {} is both hot and cold",
                    self.name, def.name
                )));
            }
            for handler in def.handlers.values() {
                let target = match handler {
                    MonitorHandler::Goto(t) | MonitorHandler::Push(t) => Some(t),
                    MonitorHandler::Action(_) => None,
                };
                if let Some(target) = target {
                    if !self.states.contains_key(target) {
                        return Err(RuntimeError::Configuration(format!(
                            "monitor type {}: state {} transitions to unknown state {}",
                            self.name, def.name, target
                        )));
                    }
                }
            }
        }

        Ok(Arc::new(MonitorType {
            name: self.name,
            start_state,
            states: self.states,
        }))
    }
}

/// Everything a monitor handler may trap: a transition and/or a single
/// raised event, nothing else (no `send`/`create`/`receive`/`random_*` —
/// spec.md §4.2).
#[derive(Default)]
pub struct MonitorEffects {
    raised: Option<Event>,
    goto: Option<StateName>,
    push: Option<StateName>,
    pop: bool,
}

pub struct MonitorCtx<'a> {
    effects: &'a mut MonitorEffects,
    pub state: &'a str,
}

impl<'a> MonitorCtx<'a> {
    pub fn raise(&mut self, event: Event) -> Result<()> {
        if self.effects.raised.is_some() {
            return Err(RuntimeError::Internal("monitor raised twice within one handler".to_string()));
        }
        self.effects.raised = Some(event);
        Ok(())
    }

    pub fn goto(&mut self, state: impl Into<String>) {
        self.effects.goto = Some(state.into());
    }

    pub fn push(&mut self, state: impl Into<String>) {
        self.effects.push = Some(state.into());
    }

    pub fn pop(&mut self) {
        self.effects.pop = true;
    }

    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(RuntimeError::AssertionFailure(message.into()))
        }
    }
}

/// A running monitor instance. One per `register_monitor` call.
pub struct Monitor {
    pub type_name: String,
    monitor_type: Arc<MonitorType>,
    state_stack: Vec<StateName>,
}

impl Monitor {
    pub fn new(type_name: impl Into<String>, monitor_type: Arc<MonitorType>) -> Self {
        let start = monitor_type.start_state.clone();
        Self {
            type_name: type_name.into(),
            monitor_type,
            state_stack: vec![start],
        }
    }

    pub fn current_state(&self) -> &str {
        self.state_stack.last().expect("monitor stack is never empty")
    }

    pub fn is_in_hot_state(&self) -> bool {
        self.monitor_type.state(self.current_state()).is_hot
    }

    /// Drives the monitor to quiescence in response to one event,
    /// entirely within the caller's step (spec.md §5: "Monitors observe
    /// events in the exact order the sending step produced them").
    pub fn process(&mut self, event: &Event) -> Result<()> {
        let mut pending = Some(event.clone());
        while let Some(ev) = pending.take() {
            pending = self.dispatch_one(&ev)?;
        }
        Ok(())
    }

    fn dispatch_one(&mut self, event: &Event) -> Result<Option<Event>> {
        let state_name = self.current_state().to_string();
        let def = self.monitor_type.state(&state_name);
        if def.ignored.contains(&event.event_type) {
            return Ok(None);
        }
        let handler = def.handlers.get(&event.event_type).cloned();

        let mut effects = MonitorEffects::default();
        match handler {
            Some(MonitorHandler::Action(action)) => {
                let mut ctx = MonitorCtx {
                    effects: &mut effects,
                    state: &state_name,
                };
                action(&mut ctx, event)?;
            }
            Some(MonitorHandler::Goto(target)) => effects.goto = Some(target),
            Some(MonitorHandler::Push(target)) => effects.push = Some(target),
            None => {
                return Err(RuntimeError::AssertionFailure(format!(
                    "monitor {} received unhandled event {} in state {}",
                    self.type_name, event.event_type, state_name
                )));
            }
        }

        if let Some(target) = effects.goto.take() {
            self.run_exit(&state_name, event)?;
            self.state_stack.pop();
            self.state_stack.push(target.clone());
            self.run_entry(&target, event)?;
        } else if let Some(target) = effects.push.take() {
            self.state_stack.push(target.clone());
            self.run_entry(&target, event)?;
        } else if effects.pop {
            self.run_exit(&state_name, event)?;
            self.state_stack.pop();
            if self.state_stack.is_empty() {
                return Err(RuntimeError::Internal(format!("monitor {} popped its last frame", self.type_name)));
            }
        }

        Ok(effects.raised.take())
    }

    fn run_entry(&mut self, state_name: &str, event: &Event) -> Result<()> {
        let entry = self.monitor_type.state(state_name).entry.clone();
        if let Some(entry) = entry {
            let mut effects = MonitorEffects::default();
            let mut ctx = MonitorCtx {
                effects: &mut effects,
                state: state_name,
            };
            entry(&mut ctx, event)?;
            if effects.goto.is_some() || effects.push.is_some() || effects.pop {
                return Err(RuntimeError::Internal(
                    "monitor entry/exit handlers may not request a further transition".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn run_exit(&mut self, state_name: &str, event: &Event) -> Result<()> {
        let exit = self.monitor_type.state(state_name).exit.clone();
        if let Some(exit) = exit {
            let mut effects = MonitorEffects::default();
            let mut ctx = MonitorCtx {
                effects: &mut effects,
                state: state_name,
            };
            exit(&mut ctx, event)?;
            if effects.goto.is_some() || effects.push.is_some() || effects.pop {
                return Err(RuntimeError::Internal(
                    "monitor entry/exit handlers may not request a further transition".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_response_monitor() -> Arc<MonitorType> {
        MonitorTypeBuilder::new("RequestResponse")
            .state(MonitorStateDef::new("Idle").start().on_goto("Request", "Waiting"))
            .state(MonitorStateDef::new("Waiting").hot().on_goto("Response", "Idle"))
            .build()
            .unwrap()
    }

    #[test]
    fn monitor_tracks_hot_state_across_events() {
        let mut m = Monitor::new("RequestResponse", request_response_monitor());
        assert!(!m.is_in_hot_state());
        m.process(&Event::new("Request")).unwrap();
        assert!(m.is_in_hot_state());
        m.process(&Event::new("Response")).unwrap();
        assert!(!m.is_in_hot_state());
    }

    #[test]
    fn unhandled_event_in_monitor_is_assertion_failure() {
        let mut m = Monitor::new("RequestResponse", request_response_monitor());
        let err = m.process(&Event::new("Nonsense")).unwrap_err();
        assert!(matches!(err, RuntimeError::AssertionFailure(_)));
    }

    #[test]
    fn rejects_state_marked_both_hot_and_cold() {
        let err = MonitorTypeBuilder::new("Bad")
            .state(MonitorStateDef::new("A").start().hot().cold())
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }
}
