//! Scheduler core (spec.md §4.3): owns the run-queue of enabled
//! machines, asks the strategy which to advance, tracks quiescence and
//! deadlock, and is the `StepHost` every machine's handlers see.

use crate::config::{StrategyKind, TestConfig};
use crate::error::{Result, RuntimeError};
use crate::event::{Event, EventEnvelope, MachineId, MachineIdAllocator, SendOptions};
use crate::machine::{CreateRequest, Machine, StepEvent, StepHost};
use crate::monitor::{Monitor, MonitorType};
use crate::network::{LocalForwarder, NetworkProvider};
use crate::state::MachineType;
use crate::strategy::dfs::Dfs;
use crate::strategy::pct::Pct;
use crate::strategy::random::Random;
use crate::strategy::replay::Replay;
use crate::strategy::{OpId, SchedContext, Strategy};
use crate::trace::{BugStepKind, BugTrace, ChoicePoint, ScheduleTrace};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// How a `run()` call ended (spec.md §5 "Cancellation").
pub enum RunOutcome {
    QuiescentSuccess,
    StepBoundReached,
    Cancelled,
    Bug(RuntimeError),
}

pub struct RunReport {
    pub outcome: RunOutcome,
    pub schedule_trace: ScheduleTrace,
    pub bug_trace: BugTrace,
    pub steps_executed: usize,
}

impl RunReport {
    /// spec.md §6 CLI exit codes.
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            RunOutcome::QuiescentSuccess | RunOutcome::StepBoundReached | RunOutcome::Cancelled => 0,
            RunOutcome::Bug(RuntimeError::Configuration(_)) => 2,
            RunOutcome::Bug(RuntimeError::Internal(_)) => 3,
            RunOutcome::Bug(_) => 1,
        }
    }
}

fn build_strategy(config: &TestConfig, replay_trace: Option<ScheduleTrace>) -> Result<Box<dyn Strategy>> {
    match config.strategy {
        StrategyKind::Random => Ok(Box::new(Random::new(config.seed, config.iterations))),
        StrategyKind::Dfs => Ok(Box::new(Dfs::new(config.max_steps))),
        StrategyKind::Pct => Ok(Box::new(Pct::new(config.seed, config.pct_bound_d, config.iterations))),
        StrategyKind::Replay => {
            let trace = replay_trace.ok_or_else(|| {
                RuntimeError::Configuration("strategy=replay requires a parsed schedule trace".to_string())
            })?;
            Ok(Box::new(Replay::new(trace, config.seed)))
        }
    }
}

/// The deterministic, single-threaded runtime (spec.md §1). Owns every
/// machine and monitor instance for one test run; the public API in
/// lib.rs is a thin wrapper that forwards here.
pub struct Scheduler {
    partition: String,
    id_alloc: MachineIdAllocator,
    machines: HashMap<u64, Machine>,
    monitors: HashMap<String, Monitor>,
    strategy: Box<dyn Strategy>,
    schedule_trace: ScheduleTrace,
    bug_trace: BugTrace,
    step_count: usize,
    max_steps: usize,
    stopped: bool,
    /// Machines currently being synchronously driven by an enclosing
    /// `create_and_execute`/`send_and_execute` (spec.md §5); re-entering
    /// one already on this stack is a fatal "await deadlock".
    await_stack: Vec<u64>,
    pending_error: Option<RuntimeError>,
    failure_callback: Option<Box<dyn FnMut(&RuntimeError) + Send>>,
    /// The machine/state `run_one_step` is currently driving, so a
    /// `next_bool`/`next_int` call made from inside its handler can be
    /// attributed in the bug trace (spec.md:137 `RandomChoice(machine,
    /// state, value)`).
    active_machine: Option<(MachineId, String)>,
    /// Boundary consulted by `deliver_send`/`instantiate` to decide
    /// whether a target is local or must be delegated (spec.md §4.7).
    network: Arc<dyn NetworkProvider>,
}

impl Scheduler {
    pub fn new(config: &TestConfig, replay_trace: Option<ScheduleTrace>) -> Result<Self> {
        config.validate()?;
        let strategy = build_strategy(config, replay_trace)?;
        Ok(Self {
            partition: "default".to_string(),
            id_alloc: MachineIdAllocator::new(),
            machines: HashMap::new(),
            monitors: HashMap::new(),
            strategy,
            schedule_trace: ScheduleTrace::new(),
            bug_trace: BugTrace::new(),
            step_count: 0,
            max_steps: config.max_steps,
            stopped: false,
            await_stack: Vec::new(),
            pending_error: None,
            failure_callback: None,
            active_machine: None,
            network: Arc::new(LocalForwarder::new("default")),
        })
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        let partition = partition.into();
        self.network = Arc::new(LocalForwarder::new(partition.clone()));
        self.partition = partition;
        self
    }

    /// Swaps in a different network boundary, e.g. a real cross-process
    /// transport in place of the default `LocalForwarder`.
    pub fn with_network(mut self, network: Arc<dyn NetworkProvider>) -> Self {
        self.network = network;
        self
    }

    pub fn on_failure(&mut self, callback: impl FnMut(&RuntimeError) + Send + 'static) {
        self.failure_callback = Some(Box::new(callback));
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn get_operation_group_id(&self, machine: &MachineId) -> Option<Uuid> {
        self.machines.get(&machine.raw_id()).map(|m| m.operation_group_id)
    }

    // ---- creation ----------------------------------------------------

    pub fn create_machine_id(&self, type_name: impl Into<String>, friendly_name: Option<&str>) -> MachineId {
        let id = self.id_alloc.allocate(type_name, self.partition.clone());
        match friendly_name {
            Some(name) => id.with_friendly_name(name),
            None => id,
        }
    }

    pub fn create_machine(&mut self, machine_type: Arc<MachineType>, init_event: Option<Event>) -> Result<MachineId> {
        self.instantiate(CreateRequest { machine_type, init_event, friendly_name: None }, None)
    }

    pub fn create_machine_with_id(&mut self, id: MachineId, machine_type: Arc<MachineType>, init_event: Option<Event>) -> Result<()> {
        if self.machines.contains_key(&id.raw_id()) {
            return Err(RuntimeError::Internal(format!("machine id {id} already in use")));
        }
        let machine = Machine::new(id.clone(), machine_type, init_event, Uuid::now_v7());
        self.bug_trace.push(BugStepKind::CreateMachine { creator: None, target: id.clone(), event_type: None });
        self.machines.insert(id.raw_id(), machine);
        Ok(())
    }

    fn instantiate(&mut self, request: CreateRequest, creator: Option<MachineId>) -> Result<MachineId> {
        let id = self.create_machine_id(request.machine_type.name.clone(), request.friendly_name.as_deref());
        let event_type = request.init_event.as_ref().map(|e| e.event_type.clone());
        let machine = Machine::new(id.clone(), request.machine_type, request.init_event, Uuid::now_v7());
        self.machines.insert(id.raw_id(), machine);
        self.bug_trace.push(BugStepKind::CreateMachine { creator, target: id.clone(), event_type });
        Ok(id)
    }

    /// Creates a machine in `partition` (spec.md §4.7 `create_remote`): a
    /// matching partition is this scheduler's own, so it's an ordinary
    /// local `create`; anything else is delegated to the network boundary,
    /// which this build cannot actually satisfy (no transport beyond
    /// in-process forwarding is required).
    pub fn create_machine_in_partition(
        &mut self,
        partition: impl Into<String>,
        machine_type: Arc<MachineType>,
        init_event: Option<Event>,
    ) -> Result<MachineId> {
        let partition = partition.into();
        if partition == self.partition {
            self.create_machine(machine_type, init_event)
        } else {
            self.network.create_remote(&partition, &machine_type.name, init_event)
        }
    }

    pub fn register_monitor(&mut self, type_name: impl Into<String>, monitor_type: Arc<MonitorType>) {
        let type_name = type_name.into();
        self.bug_trace.push(BugStepKind::CreateMonitor { monitor_type: type_name.clone() });
        self.monitors.insert(type_name.clone(), Monitor::new(type_name, monitor_type));
    }

    pub fn invoke_monitor(&mut self, type_name: &str, event: Event) -> Result<()> {
        self.bug_trace.push(BugStepKind::MonitorEvent { monitor_type: type_name.to_string(), event_type: event.event_type.clone() });
        if let Some(monitor) = self.monitors.get_mut(type_name) {
            monitor.process(&event)?;
        }
        Ok(())
    }

    // ---- sending -------------------------------------------------------

    pub fn send_event(&mut self, sender: Option<MachineId>, target: MachineId, event: Event, options: Option<SendOptions>) -> Result<()> {
        self.deliver_send(sender, target, event, options.unwrap_or_default())
    }

    fn deliver_send(&mut self, sender: Option<MachineId>, target: MachineId, event: Event, options: SendOptions) -> Result<()> {
        if let Err(err) = self.network.send_remote(target.clone(), event.clone()) {
            return self.handle_drop(sender, target, event, options, &err.to_string());
        }

        let raw = target.raw_id();
        let Some(machine) = self.machines.get_mut(&raw) else {
            return self.handle_drop(sender, target, event, options, "target machine does not exist");
        };
        if machine.is_halted {
            return self.handle_drop(sender, target, event, options, "target machine is halted");
        }

        if let Some(limit) = options.assert_at_most_n {
            let existing = machine.inbox.count_of(&event.event_type) as u32;
            if existing + 1 > limit {
                return Err(RuntimeError::AssertionFailure(format!(
                    "assert_at_most_n violated: {target} would have {} undequeued {} events (limit {limit})",
                    existing + 1,
                    event.event_type
                )));
            }
        }

        let sender_state = sender.as_ref().and_then(|s| self.machines.get(&s.raw_id())).map(|m| m.top_state().to_string());
        self.bug_trace.push(BugStepKind::SendEvent {
            sender: sender.clone().unwrap_or_else(|| target.clone()),
            sender_state: sender_state.unwrap_or_default(),
            target: target.clone(),
            event_type: event.event_type.clone(),
        });

        let envelope = EventEnvelope {
            event,
            sender_id: sender,
            operation_group_id: options.operation_group_id.unwrap_or_else(Uuid::now_v7),
            send_seq: 0,
        };
        self.machines.get_mut(&raw).expect("checked above").enqueue(envelope);
        Ok(())
    }

    fn handle_drop(&mut self, _sender: Option<MachineId>, target: MachineId, event: Event, options: SendOptions, reason: &str) -> Result<()> {
        if options.must_handle {
            return Err(RuntimeError::AssertionFailure(format!(
                "must_handle send of {} to {target} dropped: {reason}",
                event.event_type
            )));
        }
        Ok(())
    }

    // ---- await primitives ----------------------------------------------

    fn drive_to_quiescence_or_block(&mut self, target_raw: u64) -> Result<()> {
        loop {
            let enabled = self.machines.get(&target_raw).map(|m| m.is_enabled()).unwrap_or(false);
            if !enabled {
                return Ok(());
            }
            self.run_one_step(target_raw)?;
        }
    }

    fn create_and_execute_inner(&mut self, machine_type: Arc<MachineType>, init_event: Option<Event>) -> Result<MachineId> {
        let id = self.instantiate(CreateRequest { machine_type, init_event, friendly_name: None }, None)?;
        let raw = id.raw_id();
        self.await_stack.push(raw);
        let result = self.drive_to_quiescence_or_block(raw);
        self.await_stack.pop();
        result?;
        Ok(id)
    }

    fn send_and_execute_inner(&mut self, target: MachineId, event: Event) -> Result<bool> {
        let raw = target.raw_id();
        if self.await_stack.contains(&raw) {
            return Err(RuntimeError::AssertionFailure(format!(
                "await deadlock: {target} is already being driven by an enclosing create_and_execute/send_and_execute"
            )));
        }
        self.deliver_send(None, target.clone(), event, SendOptions::default())?;
        self.await_stack.push(raw);
        let result = self.drive_to_quiescence_or_block(raw);
        self.await_stack.pop();
        result?;
        let handled = self.machines.get(&raw).map(|m| !m.is_enabled()).unwrap_or(true);
        Ok(handled)
    }

    // ---- stepping --------------------------------------------------------

    fn enabled_set(&self) -> Vec<OpId> {
        self.machines.values().filter(|m| m.is_enabled()).map(|m| m.id.raw_id()).collect()
    }

    fn run_one_step(&mut self, op_id: u64) -> Result<()> {
        let mut machine = self.machines.remove(&op_id).ok_or_else(|| RuntimeError::Internal(format!("unknown op id {op_id}")))?;
        self.active_machine = Some((machine.id.clone(), machine.top_state().to_string()));

        let step_result = {
            let mut host = SchedulerHost { scheduler: self };
            machine.step(&mut host)
        };
        self.active_machine = None;

        self.machines.insert(op_id, machine);

        let outcome = step_result?;

        for event in &outcome.events {
            self.record_step_event(op_id, event);
        }
        for (target, event, options) in outcome.sends {
            let sender = self.machines.get(&op_id).map(|m| m.id.clone());
            self.deliver_send(sender, target, event, options)?;
        }
        for create in outcome.creates {
            let creator = self.machines.get(&op_id).map(|m| m.id.clone());
            self.instantiate(create, creator)?;
        }
        Ok(())
    }

    fn record_step_event(&mut self, op_id: u64, event: &StepEvent) {
        let machine = match self.machines.get(&op_id) {
            Some(m) => m.id.clone(),
            None => return,
        };
        let kind = match event {
            StepEvent::FiberlessEntry { .. } => return,
            StepEvent::Dequeued { state, event_type } => BugStepKind::DequeueEvent { machine, state: state.clone(), event_type: event_type.clone() },
            StepEvent::Raised { event_type } => BugStepKind::RaiseEvent { machine: machine.clone(), state: String::new(), event_type: event_type.clone() },
            StepEvent::InvokedAction { state, action } => BugStepKind::InvokeAction { machine, state: state.clone(), action: action.clone() },
            StepEvent::GotoState { from, to } => BugStepKind::GotoState { machine, from: from.clone(), to: to.clone() },
            StepEvent::PushedState { state } => BugStepKind::PushState { machine, state: state.clone() },
            StepEvent::Popped { state } => BugStepKind::PopState { machine, state: state.clone() },
            StepEvent::Halted { state } => BugStepKind::Halt { machine, state: state.clone() },
            StepEvent::WaitingToReceive { state, event_types } => BugStepKind::WaitToReceive { machine, state: state.clone(), event_types: event_types.clone() },
            StepEvent::ReceivedEvent { event_type } => BugStepKind::ReceiveEvent { machine, event_type: event_type.clone() },
        };
        self.bug_trace.push(kind);
    }

    fn record_random_choice(&mut self, value: String) {
        if let Some((machine, state)) = self.active_machine.clone() {
            self.bug_trace.push(BugStepKind::RandomChoice { machine, state, value });
        }
    }

    /// spec.md §4.3 "Deadlock" / "Quiescent success".
    fn check_termination(&self) -> Option<RuntimeError> {
        let stuck: Vec<_> = self
            .machines
            .values()
            .filter(|m| !m.is_halted && (!m.inbox.is_empty() || m.is_stuck_in_receive()))
            .collect();
        if stuck.is_empty() {
            None
        } else {
            let details = stuck
                .iter()
                .map(|m| format!("{} ({})", m.id, if m.is_stuck_in_receive() { "blocked in receive" } else { "inbox has only deferred events" }))
                .collect::<Vec<_>>()
                .join(", ");
            Some(RuntimeError::Deadlock(details))
        }
    }

    fn liveness_violation(&mut self) -> Option<RuntimeError> {
        let hot = self
            .monitors
            .values()
            .find(|m| m.is_in_hot_state())
            .map(|m| (m.type_name.clone(), m.current_state().to_string()));
        let (monitor_type, state) = hot?;
        Some(RuntimeError::LivenessViolation { monitor: monitor_type, state })
    }

    /// Appends the bug-trace entry for the error ending the run (spec.md:225
    /// "bug trace ends with... the triggering failure"), since the error
    /// that propagates up through `run_one_step`'s `?` never otherwise
    /// reaches `bug_trace` on its own.
    fn record_bug(&mut self, err: &RuntimeError) {
        let kind = match err {
            RuntimeError::AssertionFailure(message) => BugStepKind::AssertionFailure { machine: None, state: None, message: message.clone() },
            RuntimeError::Deadlock(message) => BugStepKind::AssertionFailure { machine: None, state: None, message: message.clone() },
            RuntimeError::ReplayDivergence { index, reason } => {
                BugStepKind::AssertionFailure { machine: None, state: None, message: format!("replay divergence at step {index}: {reason}") }
            }
            RuntimeError::UnhandledException { machine, state, message, .. } => {
                BugStepKind::AssertionFailure { machine: Some(machine.clone()), state: Some(state.clone()), message: message.clone() }
            }
            RuntimeError::LivenessViolation { monitor, state } => BugStepKind::LivenessViolation { monitor_type: monitor.clone(), state: state.clone() },
            RuntimeError::TransientStorageFailure(_) | RuntimeError::Configuration(_) | RuntimeError::Internal(_) => return,
        };
        self.bug_trace.push(kind);
    }

    /// spec.md §4.3 "Step loop".
    pub fn run(&mut self) -> RunReport {
        loop {
            if self.stopped {
                return self.finish(RunOutcome::Cancelled);
            }
            let enabled = self.enabled_set();
            if enabled.is_empty() {
                if let Some(err) = self.check_termination() {
                    return self.finish(RunOutcome::Bug(err));
                }
                if let Some(err) = self.liveness_violation() {
                    return self.finish(RunOutcome::Bug(err));
                }
                return self.finish(RunOutcome::QuiescentSuccess);
            }
            if self.step_count >= self.max_steps {
                if let Some(err) = self.liveness_violation() {
                    return self.finish(RunOutcome::Bug(err));
                }
                return self.finish(RunOutcome::StepBoundReached);
            }

            let ctx = SchedContext { step_count: self.step_count };
            let choice = match self.strategy.next_operation(&enabled, &ctx) {
                Ok(choice) => choice,
                Err(err) => return self.finish(RunOutcome::Bug(err)),
            };
            self.schedule_trace.push(ChoicePoint::SchedulingStep(choice));

            if let Err(err) = self.run_one_step(choice) {
                return self.finish(RunOutcome::Bug(err));
            }
            self.step_count += 1;
        }
    }

    fn finish(&mut self, outcome: RunOutcome) -> RunReport {
        match &outcome {
            RunOutcome::QuiescentSuccess => tracing::debug!(steps = self.step_count, "quiescent success"),
            RunOutcome::StepBoundReached => tracing::debug!(steps = self.step_count, max = self.max_steps, "step bound reached"),
            RunOutcome::Cancelled => tracing::debug!(steps = self.step_count, "run cancelled"),
            RunOutcome::Bug(err) => {
                tracing::debug!(steps = self.step_count, %err, "bug found");
                self.record_bug(err);
                if let Some(callback) = &mut self.failure_callback {
                    callback(err);
                }
            }
        }
        RunReport {
            outcome,
            schedule_trace: std::mem::take(&mut self.schedule_trace),
            bug_trace: std::mem::take(&mut self.bug_trace),
            steps_executed: self.step_count,
        }
    }

    /// Ends the run immediately with `err` as the triggering bug, e.g. a
    /// `setup` failure before any machine was created.
    pub fn abort(&mut self, err: RuntimeError) -> RunReport {
        self.finish(RunOutcome::Bug(err))
    }

    /// `false` means the strategy has nothing left to try (DFS exhausted,
    /// or its own iteration bound reached); the caller's `--iterations`
    /// loop (spec.md §6) should stop.
    pub fn prepare_next_iteration(&mut self) -> bool {
        self.strategy.prepare_next_iteration()
    }

    /// Resets per-run state for another schedule under the same `Strategy`
    /// (spec.md §6 `--iterations`) — the strategy itself must persist
    /// across iterations to enumerate (`Dfs`) or advance (`Random`/`Pct`)
    /// between them, so only the machine/monitor/trace state resets.
    pub fn reset_for_next_iteration(&mut self) {
        self.id_alloc = MachineIdAllocator::new();
        self.machines.clear();
        self.monitors.clear();
        self.schedule_trace = ScheduleTrace::new();
        self.bug_trace = BugTrace::new();
        self.step_count = 0;
        self.stopped = false;
        self.await_stack.clear();
        self.pending_error = None;
        self.active_machine = None;
    }
}

/// The `StepHost` every machine's handlers see while stepping. Wraps
/// `&mut Scheduler`; the currently-stepping machine has already been
/// removed from `scheduler.machines` by `run_one_step`, so recursing
/// into `create_and_execute`/`send_and_execute` (which touch *other*
/// machine ids) never aliases it.
struct SchedulerHost<'a> {
    scheduler: &'a mut Scheduler,
}

impl StepHost for SchedulerHost<'_> {
    fn invoke_monitor(&mut self, monitor_type: &str, event: Event) {
        if let Err(err) = self.scheduler.invoke_monitor(monitor_type, event) {
            self.scheduler.pending_error = Some(err);
        }
    }

    fn next_bool(&mut self, max: u32) -> bool {
        match self.scheduler.strategy.next_bool(max) {
            Ok(v) => {
                self.scheduler.schedule_trace.push(ChoicePoint::BoolChoice(v));
                self.scheduler.record_random_choice(v.to_string());
                v
            }
            Err(err) => {
                self.scheduler.pending_error = Some(err);
                false
            }
        }
    }

    fn next_int(&mut self, max: u32) -> u32 {
        match self.scheduler.strategy.next_int(max) {
            Ok(v) => {
                self.scheduler.schedule_trace.push(ChoicePoint::IntChoice(v));
                self.scheduler.record_random_choice(v.to_string());
                v
            }
            Err(err) => {
                self.scheduler.pending_error = Some(err);
                0
            }
        }
    }

    fn create_and_execute(&mut self, machine_type: Arc<MachineType>, init_event: Option<Event>) -> Result<MachineId> {
        self.scheduler.create_and_execute_inner(machine_type, init_event)
    }

    fn send_and_execute(&mut self, target: MachineId, event: Event) -> Result<bool> {
        self.scheduler.send_and_execute_inner(target, event)
    }

    fn take_pending_error(&mut self) -> Option<RuntimeError> {
        self.scheduler.pending_error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MachineTypeBuilder, StateDef};
    use std::time::Duration;

    fn config() -> TestConfig {
        TestConfig {
            strategy: StrategyKind::Random,
            seed: 1,
            iterations: 1,
            max_steps: 1000,
            timeout: Duration::from_secs(5),
            replay_file: None,
            verbose: 0,
            pct_bound_d: 2,
        }
    }

    #[test]
    fn scenario_s1_ping_pong() {
        let mut sched = Scheduler::new(&config(), None).unwrap();

        let server_ty = MachineTypeBuilder::new("Server")
            .state(StateDef::new("Active").start().on_action(
                "Ping",
                Arc::new(|ctx, e| {
                    if let Ok(sender) = serde_json::from_value::<MachineId>(e.payload.clone()) {
                        ctx.send(sender, Event::new("Pong"));
                    }
                    Ok(())
                }),
            ))
            .build()
            .unwrap();
        let server_id = sched.create_machine(server_ty, None).unwrap();

        let client_ty = MachineTypeBuilder::new("Client")
            .state(
                StateDef::new("Active").start().on_entry(Arc::new(move |ctx, _e| {
                    let ping = Event::new("Ping").with_payload(serde_json::to_value(&ctx.machine_id).unwrap());
                    ctx.send(server_id.clone(), ping);
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
            .unwrap();
        sched.create_machine(client_ty, None).unwrap();

        let report = sched.run();
        assert!(matches!(report.outcome, RunOutcome::QuiescentSuccess), "expected quiescent success, got a bug");
        assert!(!report.bug_trace.is_empty());
    }

    #[test]
    fn deadlock_reported_when_machine_blocked_with_no_match() {
        let blocked = MachineTypeBuilder::new("Blocker")
            .state(StateDef::new("Start").start().on_action(
                "Arm",
                Arc::new(|ctx, _e| {
                    ctx.receive_then(["Go".to_string()].into_iter().collect(), Arc::new(|_c, _e| Ok(())));
                    Ok(())
                }),
            ))
            .build()
            .unwrap();
        let mut sched = Scheduler::new(&config(), None).unwrap();
        let id = sched.create_machine(blocked, None).unwrap();
        sched.send_event(None, id.clone(), Event::new("Arm"), None).unwrap();
        sched.send_event(None, id, Event::new("Other"), None).unwrap();
        let report = sched.run();
        assert!(matches!(report.outcome, RunOutcome::Bug(RuntimeError::Deadlock(_))));
    }

    #[test]
    fn exit_code_mapping_matches_spec() {
        let mut report = RunReport {
            outcome: RunOutcome::QuiescentSuccess,
            schedule_trace: ScheduleTrace::new(),
            bug_trace: BugTrace::new(),
            steps_executed: 0,
        };
        assert_eq!(report.exit_code(), 0);
        report.outcome = RunOutcome::Bug(RuntimeError::Deadlock("x".to_string()));
        assert_eq!(report.exit_code(), 1);
        report.outcome = RunOutcome::Bug(RuntimeError::Configuration("x".to_string()));
        assert_eq!(report.exit_code(), 2);
        report.outcome = RunOutcome::Bug(RuntimeError::Internal("x".to_string()));
        assert_eq!(report.exit_code(), 3);
    }

    #[test]
    fn send_to_a_foreign_partition_is_delegated_and_dropped() {
        let mut sched = Scheduler::new(&config(), None).unwrap();
        let foreign = MachineId::new(99, "Server", "other-partition");
        assert!(sched.send_event(None, foreign.clone(), Event::new("Ping"), None).is_ok());

        let must_handle = SendOptions { must_handle: true, ..SendOptions::default() };
        let err = sched.send_event(None, foreign, Event::new("Ping"), Some(must_handle)).unwrap_err();
        assert!(matches!(err, RuntimeError::AssertionFailure(_)));
    }

    #[test]
    fn create_machine_in_partition_delegates_to_the_network_boundary() {
        let mut sched = Scheduler::new(&config(), None).unwrap();
        let ty = MachineTypeBuilder::new("Idle").state(StateDef::new("A").start()).build().unwrap();

        let local = sched.create_machine_in_partition("default", ty.clone(), None).unwrap();
        assert_eq!(local.partition, "default");

        let err = sched.create_machine_in_partition("other-partition", ty, None).unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }
}
