use std::{io::Write, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use solver_bench::{
    knor::{KnorExperiments, DEFAULT_BINARY},
    prelude::*,
};

#[derive(Parser)]
#[command(
    name = "solver-bench",
    version,
    about = "Cached, resumable benchmarking of the knor synthesis tool"
)]
struct Cli {
    /// Directory holding the .ehoa inputs
    #[arg(long, default_value = "inputs")]
    inputs: PathBuf,

    /// Solver configuration to include, repeatable (default: all)
    #[arg(long = "solver", value_name = "NAME")]
    solvers: Vec<String>,

    /// Path of the knor binary
    #[arg(long, default_value = DEFAULT_BINARY)]
    binary: String,

    /// Repetitions of every experiment [env: BENCH_ITERATIONS]
    #[arg(long)]
    iterations: Option<usize>,

    /// Timeout of a single run in seconds [env: BENCH_TIMEOUT_SECS]
    #[arg(long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Do not print one line per finished run
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the runs without outcome
    Todo,
    /// Summarize the outcomes, for one input or all of them
    Report { group: Option<String> },
    /// Run everything without outcome, for one input or all of them
    Run { group: Option<String> },
    /// Rebuild the cache from the run logs
    Cache {
        /// Re-queue runs that timed out under a smaller timeout
        #[arg(long)]
        rerun_timeouts: bool,
    },
    /// Export the outcomes as ';'-separated records
    Csv,
    /// Forget errored runs so they are retried
    Clean,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Configuration::from_env();
    if let Some(iterations) = cli.iterations {
        config = config.with_iterations(iterations);
    }
    if let Some(secs) = cli.timeout {
        let timeout = Duration::try_from_secs_f64(secs).context("invalid timeout")?;
        config = config.with_timeout(timeout);
    }
    if cli.quiet {
        config = config.with_verbose(false);
    }
    let iterations = config.iterations();

    let experiments = KnorExperiments::new(&cli.inputs, cli.solvers)
        .with_binary(cli.binary)
        .discover()?;
    let mut engine = ExperimentEngine::new(config).with_collection(experiments);

    let mut stdout = std::io::stdout().lock();
    match cli.cmd {
        Command::Todo => {
            engine.initialize(iterations, false)?;
            let todo = engine.todo(iterations);
            for item in &todo {
                writeln!(stdout, "{item}")?;
            }
            writeln!(stdout, "{} runs to do", todo.len())?;
        }
        Command::Report { group } => {
            engine.initialize(iterations, false)?;
            engine.report(iterations, group.as_deref(), &mut stdout)?;
        }
        Command::Run { group } => {
            engine.initialize(iterations, false)?;
            let result = engine.run(iterations, group.as_deref());
            // keep what finished even if a later run failed
            engine.save_cache(false)?;
            let summary = result?;
            writeln!(
                stdout,
                "{} runs: {} done, {} timeout, {} error",
                summary.total(),
                summary.done,
                summary.timeouts,
                summary.errors
            )?;
        }
        Command::Cache { rerun_timeouts } => {
            let summary = engine.refresh(iterations, rerun_timeouts)?;
            writeln!(
                stdout,
                "Remaining: {} experiments not done + {} experiments rerun for higher timeout.",
                summary.remaining, summary.rerun
            )?;
            if summary.unlogged > 0 {
                writeln!(
                    stdout,
                    "Kept {} cached outcomes that have no run log.",
                    summary.unlogged
                )?;
            }
        }
        Command::Csv => {
            engine.initialize(iterations, false)?;
            engine.csv(iterations, &mut stdout)?;
        }
        Command::Clean => {
            engine.initialize(iterations, false)?;
            let removed = engine.clean()?;
            writeln!(stdout, "{removed} errored runs removed")?;
        }
    }
    Ok(())
}
