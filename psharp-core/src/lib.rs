//! psharp-core: a deterministic, single-threaded, cooperative scheduler
//! for testing hierarchical state machines (spec.md §1).
//!
//! `Runtime` is the public facade a program under test and a test driver
//! both see; it owns one `Scheduler` per run and exposes the operations
//! spec.md §6 lists as the minimum machine-side and driver-side API.

pub mod config;
pub mod error;
pub mod event;
pub mod inbox;
pub mod machine;
pub mod monitor;
pub mod network;
pub mod reliable;
pub mod scheduler;
pub mod state;
pub mod strategy;
pub mod trace;

pub use config::{StrategyKind, TestConfig};
pub use error::{Result, RuntimeError};
pub use event::{Event, MachineId, SendOptions};
pub use machine::Ctx;
pub use monitor::{MonitorCtx, MonitorStateDef, MonitorType, MonitorTypeBuilder};
pub use scheduler::{RunOutcome, RunReport, Scheduler};
pub use state::{MachineType, MachineTypeBuilder, StateDef};
pub use trace::{BugStep, BugStepKind, BugTrace, ChoicePoint, ScheduleTrace};

use std::sync::Arc;

/// Thin entry point over `Scheduler`: constructs it from a `TestConfig`,
/// runs one exploration to completion, and returns every artifact a
/// driver needs to report a result (spec.md §6 "drive one test run to
/// quiescence, deadlock, assertion failure, or step bound").
pub struct Runtime {
    scheduler: Scheduler,
}

impl Runtime {
    pub fn new(config: &TestConfig) -> Result<Self> {
        Ok(Self {
            scheduler: Scheduler::new(config, None)?,
        })
    }

    pub fn for_replay(config: &TestConfig, trace: ScheduleTrace) -> Result<Self> {
        Ok(Self {
            scheduler: Scheduler::new(config, Some(trace))?,
        })
    }

    pub fn create_machine(&mut self, machine_type: Arc<MachineType>, init_event: Option<Event>) -> Result<MachineId> {
        self.scheduler.create_machine(machine_type, init_event)
    }

    pub fn create_machine_with_id(&mut self, id: MachineId, machine_type: Arc<MachineType>, init_event: Option<Event>) -> Result<()> {
        self.scheduler.create_machine_with_id(id, machine_type, init_event)
    }

    pub fn create_machine_id(&self, type_name: impl Into<String>, friendly_name: Option<&str>) -> MachineId {
        self.scheduler.create_machine_id(type_name, friendly_name)
    }

    /// Creates a machine in `partition` (spec.md §4.7), delegating to the
    /// network boundary when it isn't this runtime's own.
    pub fn create_machine_in_partition(&mut self, partition: impl Into<String>, machine_type: Arc<MachineType>, init_event: Option<Event>) -> Result<MachineId> {
        self.scheduler.create_machine_in_partition(partition, machine_type, init_event)
    }

    pub fn send_event(&mut self, target: MachineId, event: Event, options: Option<SendOptions>) -> Result<()> {
        self.scheduler.send_event(None, target, event, options)
    }

    pub fn register_monitor(&mut self, type_name: impl Into<String>, monitor_type: Arc<MonitorType>) {
        self.scheduler.register_monitor(type_name, monitor_type);
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    pub fn on_failure(&mut self, callback: impl FnMut(&RuntimeError) + Send + 'static) {
        self.scheduler.on_failure(callback);
    }

    /// Runs the scheduler to quiescence, a bug, or the step bound, one
    /// time (one seed/schedule). For a driver that only ever wants one
    /// schedule explored (`--iterations 1`, or a test calling this
    /// directly); `run_iterations` is what the CLI's `--iterations` loop
    /// actually uses.
    pub fn run(&mut self) -> RunReport {
        self.scheduler.run()
    }

    /// Explores up to `iterations` schedules under this `Runtime`'s
    /// strategy (spec.md §6 `--iterations`), calling `setup` to (re)create
    /// the test program's machines before each one. Stops early on the
    /// first bug, or once the strategy has nothing left to try — `Dfs`
    /// reports that via `prepare_next_iteration` returning `false` once
    /// its search tree is exhausted (spec.md §4.4 "deterministic and
    /// complete for a given bound"); `setup` failing is itself treated as
    /// the run's bug. The `Scheduler`'s `Strategy` persists across
    /// iterations (only its machines/monitors/traces reset) since that is
    /// exactly the state `Dfs`/`Random`/`Pct` need to advance between
    /// schedules rather than repeat the first one `iterations` times.
    pub fn run_iterations(&mut self, iterations: u64, mut setup: impl FnMut(&mut Runtime) -> Result<()>) -> RunReport {
        let mut last = None;
        for i in 0..iterations.max(1) {
            if i > 0 {
                self.scheduler.reset_for_next_iteration();
            }
            if let Err(err) = setup(self) {
                return self.scheduler.abort(err);
            }
            let report = self.scheduler.run();
            let is_bug = matches!(report.outcome, RunOutcome::Bug(_));
            let keep_going = self.scheduler.prepare_next_iteration();
            last = Some(report);
            if is_bug || !keep_going {
                break;
            }
        }
        last.expect("loop runs at least once since iterations.max(1) >= 1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> TestConfig {
        TestConfig {
            strategy: StrategyKind::Random,
            seed: 7,
            iterations: 1,
            max_steps: 500,
            timeout: Duration::from_secs(5),
            replay_file: None,
            verbose: 0,
            pct_bound_d: 2,
        }
    }

    #[test]
    fn single_idle_machine_reaches_quiescent_success() {
        let ty = MachineTypeBuilder::new("Idle").state(StateDef::new("A").start()).build().unwrap();
        let mut runtime = Runtime::new(&config()).unwrap();
        runtime.create_machine(ty, None).unwrap();
        let report = runtime.run();
        assert!(matches!(report.outcome, RunOutcome::QuiescentSuccess));
    }

    #[test]
    fn on_failure_callback_observes_assertion_failure() {
        let ty = MachineTypeBuilder::new("Picky")
            .state(StateDef::new("A").start().on_action(
                "Expected",
                Arc::new(|ctx, _e| {
                    ctx.assert(false, "never true")?;
                    Ok(())
                }),
            ))
            .build()
            .unwrap();
        let mut runtime = Runtime::new(&config()).unwrap();
        let id = runtime.create_machine(ty, None).unwrap();
        runtime.send_event(id, Event::new("Expected"), None).unwrap();

        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = seen.clone();
        runtime.on_failure(move |err| {
            *seen2.lock().unwrap() = Some(err.to_string());
        });

        let report = runtime.run();
        assert!(matches!(report.outcome, RunOutcome::Bug(RuntimeError::AssertionFailure(_))));
        assert!(seen.lock().unwrap().is_some());
    }

    #[test]
    fn run_iterations_under_dfs_actually_advances_between_schedules() {
        let cfg = TestConfig {
            strategy: StrategyKind::Dfs,
            seed: 0,
            iterations: 100,
            max_steps: 50,
            timeout: Duration::from_secs(5),
            replay_file: None,
            verbose: 0,
            pct_bound_d: 2,
        };
        let ty = MachineTypeBuilder::new("Coin")
            .state(StateDef::new("A").start().on_action(
                "Flip",
                Arc::new(|ctx, _e| {
                    let _ = ctx.random_bool(2);
                    ctx.pop();
                    Ok(())
                }),
            ))
            .build()
            .unwrap();

        let setups_run = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let setups_run2 = setups_run.clone();
        let mut runtime = Runtime::new(&cfg).unwrap();
        let report = runtime.run_iterations(cfg.iterations, |rt| {
            setups_run2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let id = rt.create_machine(ty.clone(), None)?;
            rt.send_event(id, Event::new("Flip"), None)?;
            Ok(())
        });

        assert!(matches!(report.outcome, RunOutcome::QuiescentSuccess));
        // A single boolean choice gives Dfs exactly two schedules to enumerate
        // before it reports nothing left to try; if `run()` were called once
        // without ever calling `prepare_next_iteration()`, this would be 1.
        assert_eq!(setups_run.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
