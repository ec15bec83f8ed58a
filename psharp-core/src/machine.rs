//! Per-actor mutable state and the one-step execution algorithm
//! (spec.md §3 "Machine instance state", §4.1 "One step").

use crate::event::{Event, EventEnvelope, MachineId};
use crate::error::{Result, RuntimeError};
use crate::state::{EventType, Handler, MachineType, StateName};
use crate::inbox::Inbox;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

/// Runs a user handler with a panic barrier (spec.md §7 "exception raised
/// inside user handler... never unwind past the scheduler"). `Ok(Err(_))`
/// is a handler-returned error; `Err(_)` is the panic's message, for the
/// caller to wrap with the machine/state/action it was invoked from.
fn call_handler(action: &ActionFn, ctx: &mut Ctx<'_>, event: &Event) -> std::result::Result<Result<()>, String> {
    panic::catch_unwind(AssertUnwindSafe(|| action(ctx, event))).map_err(|payload| panic_message(&payload))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}

/// A user action, entry, or exit handler. Registered once per state at
/// `MachineType` construction time (state.rs), invoked by `Machine::step`
/// with a fresh `Ctx` for every dispatch.
pub type ActionFn = Arc<dyn for<'a> Fn(&mut Ctx<'a>, &Event) -> Result<()> + Send + Sync>;

/// Host services an action needs but which live on the scheduler:
/// synchronous monitor invocation, the nondeterminism oracle (spec.md
/// §4.2, §4.3 "Nondeterministic choices"), and the await primitives
/// (spec.md §5). `invoke_monitor`/`next_bool`/`next_int` match the
/// infallible machine-side API (spec.md §6) exactly, so a replay
/// divergence or a monitor assertion failure they trigger is stashed and
/// surfaced via `take_pending_error` rather than changing those
/// signatures.
pub trait StepHost {
    fn invoke_monitor(&mut self, monitor_type: &str, event: Event);
    fn next_bool(&mut self, max: u32) -> bool;
    fn next_int(&mut self, max: u32) -> u32;
    fn create_and_execute(&mut self, machine_type: Arc<MachineType>, init_event: Option<Event>) -> Result<MachineId>;
    fn send_and_execute(&mut self, target: MachineId, event: Event) -> Result<bool>;
    fn take_pending_error(&mut self) -> Option<RuntimeError>;
}

/// A transition request trapped during handler execution, applied by
/// `Machine::step` after the handler returns (spec.md §4.1 step 5).
#[derive(Clone, Debug)]
pub enum Transition {
    Goto(StateName),
    Push(StateName),
    Pop,
}

/// A machine-creation request trapped during handler execution.
pub struct CreateRequest {
    pub machine_type: Arc<MachineType>,
    pub init_event: Option<Event>,
    pub friendly_name: Option<String>,
}

/// Everything a single handler invocation can trap (spec.md §4.1 step 4):
/// `send`, `create`, `raise`, `goto`/`push`/`pop` are all buffered here
/// and applied by the runtime, never touching another machine directly.
#[derive(Default)]
pub struct StepEffects {
    pub raised: Option<Event>,
    pub transition: Option<Transition>,
    pub sends: Vec<(MachineId, Event, crate::event::SendOptions)>,
    pub creates: Vec<CreateRequest>,
    pub receive_request: Option<(HashSet<EventType>, ActionFn)>,
}

/// The machine-side API (spec.md §6): the only surface a handler may call.
pub struct Ctx<'a> {
    effects: &'a mut StepEffects,
    host: &'a mut dyn StepHost,
    pub machine_id: MachineId,
    pub state: StateName,
}

impl<'a> Ctx<'a> {
    fn new(effects: &'a mut StepEffects, host: &'a mut dyn StepHost, machine_id: MachineId, state: StateName) -> Self {
        Self {
            effects,
            host,
            machine_id,
            state,
        }
    }

    /// At most one raise per handler (spec.md §3 invariant 3); a second
    /// call is a programming error, reported as a fatal internal error
    /// rather than silently dropped.
    pub fn raise(&mut self, event: Event) -> Result<()> {
        if self.effects.raised.is_some() {
            return Err(RuntimeError::Internal(format!(
                "machine {} raised twice within one handler",
                self.machine_id
            )));
        }
        self.effects.raised = Some(event);
        Ok(())
    }

    pub fn goto(&mut self, state: impl Into<String>) {
        self.effects.transition = Some(Transition::Goto(state.into()));
    }

    pub fn push(&mut self, state: impl Into<String>) {
        self.effects.transition = Some(Transition::Push(state.into()));
    }

    pub fn pop(&mut self) {
        self.effects.transition = Some(Transition::Pop);
    }

    pub fn send(&mut self, target: MachineId, event: Event) {
        let options = event.options.clone();
        self.effects.sends.push((target, event, options));
    }

    pub fn create(&mut self, machine_type: Arc<MachineType>, init_event: Option<Event>) {
        self.effects.creates.push(CreateRequest {
            machine_type,
            init_event,
            friendly_name: None,
        });
    }

    /// Suspends the calling step: `types` is the set the machine will
    /// resume on, `resume` is invoked with the matching event once it
    /// arrives. A systems language has no stackful coroutine to pause
    /// mid-closure, so `receive` is modeled as "register a continuation",
    /// not as a blocking call that returns a value in place — `resume`
    /// must be the only code that runs after the event arrives.
    pub fn receive_then(&mut self, types: HashSet<EventType>, resume: ActionFn) {
        self.effects.receive_request = Some((types, resume));
    }

    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(RuntimeError::AssertionFailure(message.into()))
        }
    }

    pub fn random_bool(&mut self, max: u32) -> bool {
        self.host.next_bool(max)
    }

    pub fn random_int(&mut self, max: u32) -> u32 {
        self.host.next_int(max)
    }

    pub fn invoke_monitor(&mut self, monitor_type: &str, event: Event) {
        self.host.invoke_monitor(monitor_type, event);
    }

    /// Synchronously drives a newly created machine to quiescence before
    /// returning (spec.md §5 "create-and-await"). Nesting is allowed; a
    /// cycle back to a machine already being driven is a fatal "await
    /// deadlock" (spec.md §5, DESIGN.md open question 3).
    pub fn create_and_execute(&mut self, machine_type: Arc<MachineType>, init_event: Option<Event>) -> Result<MachineId> {
        self.host.create_and_execute(machine_type, init_event)
    }

    /// Synchronously drives `target` to quiescence after delivering
    /// `event` (spec.md §5 "send-and-await"). Returns whether the event
    /// was handled before the target went idle or blocked again.
    pub fn send_and_execute(&mut self, target: MachineId, event: Event) -> Result<bool> {
        self.host.send_and_execute(target, event)
    }
}

/// Semantic steps produced by one `Machine::step()` call, consumed by the
/// scheduler to build a `BugTrace` (spec.md §4.5).
#[derive(Clone, Debug)]
pub enum StepEvent {
    FiberlessEntry { state: StateName },
    Dequeued { state: StateName, event_type: String },
    Raised { event_type: String },
    InvokedAction { state: StateName, action: String },
    GotoState { from: StateName, to: StateName },
    PushedState { state: StateName },
    Popped { state: StateName },
    Halted { state: StateName },
    WaitingToReceive { state: StateName, event_types: Vec<EventType> },
    ReceivedEvent { event_type: String },
}

/// What one `Machine::step()` call produced: the semantic trace events,
/// plus the raw sends/creates for the scheduler to apply (a machine
/// cannot touch its peers directly — spec.md §4.1 step 5).
#[derive(Default)]
pub struct StepOutcome {
    pub events: Vec<StepEvent>,
    pub sends: Vec<(MachineId, Event, crate::event::SendOptions)>,
    pub creates: Vec<CreateRequest>,
}

/// A single communicating state machine (spec.md §3).
pub struct Machine {
    pub id: MachineId,
    pub machine_type: Arc<MachineType>,
    pub state_stack: Vec<StateName>,
    pub inbox: Inbox,
    pub raised: Option<EventEnvelope>,
    /// Non-`None` iff suspended in a receive; the paired `ActionFn` is the
    /// continuation to run once a matching event is dequeued.
    pub waiting_on: Option<(HashSet<EventType>, ActionFn)>,
    pub is_halted: bool,
    pub operation_group_id: Uuid,
    pending_init_event: Option<Event>,
    entry_fired: bool,
}

impl Machine {
    pub fn new(id: MachineId, machine_type: Arc<MachineType>, init_event: Option<Event>, operation_group_id: Uuid) -> Self {
        let start = machine_type.start_state.clone();
        Self {
            id,
            machine_type,
            state_stack: vec![start],
            inbox: Inbox::new(),
            raised: None,
            waiting_on: None,
            is_halted: false,
            operation_group_id,
            pending_init_event: init_event,
            entry_fired: false,
        }
    }

    pub fn top_state(&self) -> &str {
        self.state_stack.last().expect("non-halted machine has non-empty stack")
    }

    /// spec.md §4.3 "Enabled set".
    pub fn is_enabled(&self) -> bool {
        if self.is_halted {
            return false;
        }
        if !self.entry_fired {
            return true;
        }
        if self.raised.is_some() {
            return true;
        }
        if let Some((types, _)) = &self.waiting_on {
            return self.inbox.has_matching(types);
        }
        let flat = self.machine_type.flattened(self.top_state());
        self.inbox.has_dequeuable(flat)
    }

    /// True iff the machine is parked in a receive with nothing in the
    /// inbox that can ever match — one of the deadlock conditions in
    /// spec.md §4.3.
    pub fn is_stuck_in_receive(&self) -> bool {
        match &self.waiting_on {
            Some((types, _)) => !self.inbox.has_matching(types),
            None => false,
        }
    }

    /// Runs exactly one step (spec.md §4.1). The caller (the scheduler)
    /// has already established this machine is enabled.
    pub fn step(&mut self, host: &mut dyn StepHost) -> Result<StepOutcome> {
        let mut outcome = StepOutcome::default();

        if !self.entry_fired {
            self.entry_fired = true;
            let state = self.top_state().to_string();
            let triggering = self.pending_init_event.take().unwrap_or_else(|| Event::new("__init__"));
            outcome.events.push(StepEvent::FiberlessEntry { state: state.clone() });
            self.run_entry(&state, &triggering, host, &mut outcome)?;
            return Ok(outcome);
        }

        // Step item 1: raised, then a matching receive, then the inbox.
        let (envelope, via_continuation) = if let Some(envelope) = self.raised.take() {
            (envelope, None)
        } else if let Some((types, _)) = &self.waiting_on {
            let types = types.clone();
            match self.inbox.take_matching(&types) {
                Some(env) => {
                    let (_, cont) = self.waiting_on.take().unwrap();
                    outcome.events.push(StepEvent::ReceivedEvent { event_type: env.event.event_type.clone() });
                    (env, Some(cont))
                }
                None => return Err(RuntimeError::Internal(format!("machine {} stepped while blocked on receive", self.id))),
            }
        } else {
            let flat = self.machine_type.flattened(self.top_state()).clone_handles();
            match self.inbox.dequeue(&flat) {
                Some(env) => {
                    outcome.events.push(StepEvent::Dequeued {
                        state: self.top_state().to_string(),
                        event_type: env.event.event_type.clone(),
                    });
                    (env, None)
                }
                None => return Err(RuntimeError::Internal(format!("machine {} stepped while disabled", self.id))),
            }
        };

        let state_before = self.top_state().to_string();
        let mut effects = StepEffects::default();

        if let Some(resume) = via_continuation {
            let mut ctx = Ctx::new(&mut effects, host, self.id.clone(), state_before.clone());
            match call_handler(&resume, &mut ctx, &envelope.event) {
                Ok(result) => result?,
                Err(message) => {
                    return Err(RuntimeError::UnhandledException {
                        machine: self.id.clone(),
                        state: state_before.clone(),
                        action: "receive continuation".to_string(),
                        message,
                    })
                }
            }
            if let Some(err) = host.take_pending_error() {
                return Err(err);
            }
            outcome.events.push(StepEvent::InvokedAction { state: state_before.clone(), action: "receive continuation".to_string() });
        } else {
            let flat = self.machine_type.flattened(&state_before).clone_handles();
            match flat.handlers.get(&envelope.event.event_type) {
                Some(Handler::Action(action)) => {
                    let action = action.clone();
                    let mut ctx = Ctx::new(&mut effects, host, self.id.clone(), state_before.clone());
                    match call_handler(&action, &mut ctx, &envelope.event) {
                        Ok(result) => result?,
                        Err(message) => {
                            return Err(RuntimeError::UnhandledException {
                                machine: self.id.clone(),
                                state: state_before.clone(),
                                action: envelope.event.event_type.clone(),
                                message,
                            })
                        }
                    }
                    if let Some(err) = host.take_pending_error() {
                        return Err(err);
                    }
                    outcome.events.push(StepEvent::InvokedAction { state: state_before.clone(), action: envelope.event.event_type.clone() });
                }
                Some(Handler::Goto(target)) => {
                    effects.transition = Some(Transition::Goto(target.clone()));
                }
                Some(Handler::Push(target)) => {
                    effects.transition = Some(Transition::Push(target.clone()));
                }
                None => {
                    return Err(RuntimeError::AssertionFailure(format!(
                        "machine {} received unhandled event {} in state {}",
                        self.id, envelope.event.event_type, state_before
                    )));
                }
            }
        }

        if let Some(raised) = effects.raised.take() {
            outcome.events.push(StepEvent::Raised { event_type: raised.event_type.clone() });
            self.raised = Some(EventEnvelope {
                event: raised,
                sender_id: Some(self.id.clone()),
                operation_group_id: envelope.operation_group_id,
                send_seq: envelope.send_seq,
            });
        }

        if let Some((types, resume)) = effects.receive_request.take() {
            self.waiting_on = Some((types.clone(), resume));
            outcome.events.push(StepEvent::WaitingToReceive {
                state: state_before.clone(),
                event_types: types.into_iter().collect(),
            });
        }

        outcome.sends.extend(effects.sends.drain(..));
        outcome.creates.extend(effects.creates.drain(..));

        if let Some(transition) = effects.transition.take() {
            self.apply_transition(transition, &envelope.event, host, &mut outcome)?;
        }

        Ok(outcome)
    }

    /// Applies a trapped `goto`/`push`/`pop` (spec.md §4.1 step 5), running
    /// the exit/entry handlers it triggers. An exit handler's own `pop`
    /// (spec.md:70 "exit handlers... may issue further pops") recurses back
    /// into here from `merge_side_effects_only`, cascading through as many
    /// frames as it pops.
    fn apply_transition(&mut self, transition: Transition, triggering: &Event, host: &mut dyn StepHost, outcome: &mut StepOutcome) -> Result<()> {
        let state_before = self.top_state().to_string();
        match transition {
            Transition::Goto(target) => {
                self.run_exit(&state_before, triggering, host, outcome)?;
                self.state_stack.pop();
                self.state_stack.push(target.clone());
                outcome.events.push(StepEvent::GotoState { from: state_before, to: target.clone() });
                self.run_entry(&target, triggering, host, outcome)?;
            }
            Transition::Push(target) => {
                self.state_stack.push(target.clone());
                outcome.events.push(StepEvent::PushedState { state: target.clone() });
                self.run_entry(&target, triggering, host, outcome)?;
            }
            Transition::Pop => {
                self.run_exit(&state_before, triggering, host, outcome)?;
                self.state_stack.pop();
                outcome.events.push(StepEvent::Popped { state: state_before });
                if self.state_stack.is_empty() {
                    self.halt(outcome);
                }
            }
        }
        Ok(())
    }

    fn run_entry(&mut self, state: &str, triggering: &Event, host: &mut dyn StepHost, outcome: &mut StepOutcome) -> Result<()> {
        let flat = self.machine_type.flattened(state).clone_handles();
        if let Some(entry) = flat.entry {
            let mut effects = StepEffects::default();
            {
                let mut ctx = Ctx::new(&mut effects, host, self.id.clone(), state.to_string());
                match call_handler(&entry, &mut ctx, triggering) {
                    Ok(result) => result?,
                    Err(message) => {
                        return Err(RuntimeError::UnhandledException {
                            machine: self.id.clone(),
                            state: state.to_string(),
                            action: format!("entry of {state}"),
                            message,
                        })
                    }
                }
            }
            if let Some(err) = host.take_pending_error() {
                return Err(err);
            }
            outcome.events.push(StepEvent::InvokedAction { state: state.to_string(), action: format!("entry of {state}") });
            self.merge_side_effects_only(effects, triggering, host, outcome)?;
        }
        Ok(())
    }

    fn run_exit(&mut self, state: &str, triggering: &Event, host: &mut dyn StepHost, outcome: &mut StepOutcome) -> Result<()> {
        let flat = self.machine_type.flattened(state).clone_handles();
        if let Some(exit) = flat.exit {
            let mut effects = StepEffects::default();
            {
                let mut ctx = Ctx::new(&mut effects, host, self.id.clone(), state.to_string());
                match call_handler(&exit, &mut ctx, triggering) {
                    Ok(result) => result?,
                    Err(message) => {
                        return Err(RuntimeError::UnhandledException {
                            machine: self.id.clone(),
                            state: state.to_string(),
                            action: format!("exit of {state}"),
                            message,
                        })
                    }
                }
            }
            if let Some(err) = host.take_pending_error() {
                return Err(err);
            }
            outcome.events.push(StepEvent::InvokedAction { state: state.to_string(), action: format!("exit of {state}") });
            self.merge_side_effects_only(effects, triggering, host, outcome)?;
        }
        Ok(())
    }

    /// Entry/exit handlers may `send`/`create`/`raise`/`assert`/`monitor`/
    /// `random`, and (spec.md:70 "may issue further pops") a further
    /// transition — applied the same way a regular handler's is, via
    /// `apply_transition`.
    fn merge_side_effects_only(&mut self, mut effects: StepEffects, triggering: &Event, host: &mut dyn StepHost, outcome: &mut StepOutcome) -> Result<()> {
        if let Some((types, resume)) = effects.receive_request.take() {
            self.waiting_on = Some((types.clone(), resume));
            outcome.events.push(StepEvent::WaitingToReceive {
                state: self.top_state().to_string(),
                event_types: types.into_iter().collect(),
            });
        }
        if let Some(raised) = effects.raised.take() {
            // Exit-handler raises are scoped to the new top frame (DESIGN.md
            // open question 2): stored on `self.raised`, dispatched first
            // thing on this machine's next scheduled step.
            outcome.events.push(StepEvent::Raised { event_type: raised.event_type.clone() });
            self.raised = Some(EventEnvelope {
                event: raised,
                sender_id: Some(self.id.clone()),
                operation_group_id: self.operation_group_id,
                send_seq: 0,
            });
        }
        outcome.sends.extend(effects.sends.drain(..));
        outcome.creates.extend(effects.creates.drain(..));
        if let Some(transition) = effects.transition.take() {
            self.apply_transition(transition, triggering, host, outcome)?;
        }
        Ok(())
    }

    fn halt(&mut self, outcome: &mut StepOutcome) {
        self.is_halted = true;
        self.inbox.drain();
        outcome.events.push(StepEvent::Halted { state: "<halted>".to_string() });
    }

    pub fn enqueue(&mut self, envelope: EventEnvelope) {
        self.inbox.enqueue(envelope);
    }
}

impl crate::state::FlattenedState {
    /// Cheap: every field is either `Clone` cheap (`Arc`) or small.
    fn clone_handles(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MachineTypeBuilder, StateDef};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NullHost;
    impl StepHost for NullHost {
        fn invoke_monitor(&mut self, _monitor_type: &str, _event: Event) {}
        fn next_bool(&mut self, _max: u32) -> bool {
            false
        }
        fn next_int(&mut self, _max: u32) -> u32 {
            0
        }
        fn create_and_execute(&mut self, _machine_type: Arc<MachineType>, _init_event: Option<Event>) -> Result<MachineId> {
            Err(RuntimeError::Internal("NullHost does not support create_and_execute".to_string()))
        }
        fn send_and_execute(&mut self, _target: MachineId, _event: Event) -> Result<bool> {
            Err(RuntimeError::Internal("NullHost does not support send_and_execute".to_string()))
        }
        fn take_pending_error(&mut self) -> Option<RuntimeError> {
            None
        }
    }

    fn ping_pong_client_type() -> Arc<MachineType> {
        MachineTypeBuilder::new("Client")
            .state(
                StateDef::new("Active")
                    .start()
                    .on_entry(Arc::new(|ctx, _e| {
                        ctx.goto("Waiting");
                        Ok(())
                    })),
            )
            .state(StateDef::new("Waiting").on_action(
                "Pong",
                Arc::new(|ctx, _e| {
                    ctx.pop();
                    Ok(())
                }),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn fresh_machine_runs_entry_on_first_step() {
        let ty = ping_pong_client_type();
        let id = MachineId::new(0, "Client", "default");
        let mut m = Machine::new(id, ty, None, Uuid::nil());
        assert!(m.is_enabled());
        let mut host = NullHost;
        m.step(&mut host).unwrap();
        assert_eq!(m.top_state(), "Waiting");
    }

    #[test]
    fn pop_on_last_frame_halts_machine() {
        let ty = ping_pong_client_type();
        let id = MachineId::new(0, "Client", "default");
        let mut m = Machine::new(id, ty, None, Uuid::nil());
        let mut host = NullHost;
        m.step(&mut host).unwrap(); // entry -> Waiting
        m.enqueue(EventEnvelope {
            event: Event::new("Pong"),
            sender_id: None,
            operation_group_id: Uuid::nil(),
            send_seq: 0,
        });
        m.step(&mut host).unwrap();
        assert!(m.is_halted);
        assert!(!m.is_enabled());
    }

    #[test]
    fn unhandled_event_is_an_assertion_failure() {
        let ty = MachineTypeBuilder::new("Lonely")
            .state(StateDef::new("A").start())
            .build()
            .unwrap();
        let id = MachineId::new(0, "Lonely", "default");
        let mut m = Machine::new(id, ty, None, Uuid::nil());
        let mut host = NullHost;
        m.step(&mut host).unwrap(); // entry, no-op
        m.enqueue(EventEnvelope {
            event: Event::new("Surprise"),
            sender_id: None,
            operation_group_id: Uuid::nil(),
            send_seq: 0,
        });
        let err = m.step(&mut host).unwrap_err();
        assert!(matches!(err, RuntimeError::AssertionFailure(_)));
    }

    #[test]
    fn double_raise_in_one_handler_is_internal_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let ty = MachineTypeBuilder::new("BadRaiser")
            .state(
                StateDef::new("A").start().on_action(
                    "Go",
                    Arc::new(move |ctx, _e| {
                        calls2.fetch_add(1, Ordering::SeqCst);
                        ctx.raise(Event::new("First"))?;
                        ctx.raise(Event::new("Second"))?;
                        Ok(())
                    }),
                ),
            )
            .build()
            .unwrap();
        let id = MachineId::new(0, "BadRaiser", "default");
        let mut m = Machine::new(id, ty, None, Uuid::nil());
        let mut host = NullHost;
        m.step(&mut host).unwrap();
        m.enqueue(EventEnvelope {
            event: Event::new("Go"),
            sender_id: None,
            operation_group_id: Uuid::nil(),
            send_seq: 0,
        });
        let err = m.step(&mut host).unwrap_err();
        assert!(matches!(err, RuntimeError::Internal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
