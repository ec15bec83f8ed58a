//! CLI entry point (spec.md §6):
//!
//! ```text
//! psharp-cli test --assembly <name> --strategy <random|dfs|pct|replay>
//!                  --seed <u64> --iterations <n> --max-steps <n>
//!                  --timeout <seconds> [--replay <schedule-file>]
//!                  --verbose <0..3>
//! ```

mod demos;

use anyhow::Context;
use clap::{Parser, Subcommand};
use psharp_core::{RunOutcome, RuntimeError, ScheduleTrace, StrategyKind, TestConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "psharp-cli", version, about = "Bug-finding scheduler for hierarchical state machines")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Explore one registered test entry point under a strategy.
    Test {
        /// Name of a registered test entry point (see `list-assemblies`).
        #[arg(long)]
        assembly: String,
        #[arg(long, default_value = "random")]
        strategy: String,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 1)]
        iterations: u64,
        #[arg(long, default_value_t = 10_000)]
        max_steps: usize,
        #[arg(long, default_value_t = 60)]
        timeout: u64,
        #[arg(long)]
        replay: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        verbose: u8,
        /// Number of PCT priority-change points; ignored by other strategies.
        #[arg(long, default_value_t = 3)]
        pct_bound_d: usize,
        /// Write the schedule trace of the run that ended the exploration here.
        #[arg(long)]
        save_schedule: Option<PathBuf>,
        /// Write the bug trace (JSON) here if a bug is found.
        #[arg(long)]
        save_bug_trace: Option<PathBuf>,
    },
    /// List the test entry points `--assembly` accepts.
    ListAssemblies,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::ListAssemblies => {
            for name in demos::names() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Test {
            assembly,
            strategy,
            seed,
            iterations,
            max_steps,
            timeout,
            replay,
            verbose,
            pct_bound_d,
            save_schedule,
            save_bug_trace,
        } => {
            init_tracing(verbose);
            let exit_code = run_test(
                &assembly,
                &strategy,
                seed,
                iterations,
                max_steps,
                timeout,
                replay,
                pct_bound_d,
                save_schedule,
                save_bug_trace,
            )?;
            std::process::exit(exit_code);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_test(
    assembly: &str,
    strategy: &str,
    seed: u64,
    iterations: u64,
    max_steps: usize,
    timeout: u64,
    replay: Option<PathBuf>,
    pct_bound_d: usize,
    save_schedule: Option<PathBuf>,
    save_bug_trace: Option<PathBuf>,
) -> anyhow::Result<i32> {
    let entry = demos::lookup(assembly).ok_or_else(|| {
        anyhow::anyhow!("unknown --assembly {assembly:?}; run list-assemblies for the registered entry points")
    })?;

    let strategy_kind: StrategyKind = strategy
        .parse()
        .map_err(|e: RuntimeError| anyhow::anyhow!(e.to_string()))?;

    let replay_trace = match &replay {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading replay trace {}", path.display()))?;
            Some(ScheduleTrace::from_text(&text).map_err(|e| anyhow::anyhow!(e.to_string()))?)
        }
        None => None,
    };

    let config = TestConfig {
        strategy: strategy_kind,
        seed,
        iterations,
        max_steps,
        timeout: Duration::from_secs(timeout),
        replay_file: replay,
        verbose: 0,
        pct_bound_d,
    };
    config.validate().map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let mut runtime = match replay_trace {
        Some(trace) => psharp_core::Runtime::for_replay(&config, trace).map_err(|e| anyhow::anyhow!(e.to_string()))?,
        None => psharp_core::Runtime::new(&config).map_err(|e| anyhow::anyhow!(e.to_string()))?,
    };

    let report = runtime.run_iterations(iterations, |rt| entry(rt).map_err(|e| RuntimeError::Internal(e.to_string())));
    let exit_code = report.exit_code();

    match &report.outcome {
        RunOutcome::QuiescentSuccess => tracing::info!(steps = report.steps_executed, "quiescent success"),
        RunOutcome::StepBoundReached => tracing::warn!(steps = report.steps_executed, "step bound reached without a bug"),
        RunOutcome::Cancelled => tracing::warn!("run cancelled"),
        RunOutcome::Bug(err) => tracing::error!(steps = report.steps_executed, %err, "bug found"),
    }

    if let Some(path) = save_schedule {
        let text = report.schedule_trace.to_text(strategy, seed, iterations);
        std::fs::write(&path, text).with_context(|| format!("writing schedule trace to {}", path.display()))?;
    }
    if matches!(report.outcome, RunOutcome::Bug(_)) {
        if let Some(path) = save_bug_trace {
            let json = report.bug_trace.to_json().context("serializing bug trace")?;
            std::fs::write(&path, json).with_context(|| format!("writing bug trace to {}", path.display()))?;
        }
    }

    Ok(exit_code)
}
