//! Core execution logic: what is left to do, running it, and reporting.
//!
//! This module defines the [`ExperimentEngine`], which owns the experiment collections, the
//! [`ResultCache`] and the run logs. Its responsibilities include:
//!
//! - Aggregating the experiments of every collection and loading the cache ([`initialize`])
//! - Listing (experiment, iteration) pairs without outcome ([`todo`])
//! - Running them one at a time under the configured timeout ([`run`])
//! - Persisting outcomes, optionally re-queuing runs that timed out under a smaller bound
//!   ([`save_cache`])
//! - Purging failed runs so they are retried ([`clean`])
//! - Summaries and CSV export ([`report`], [`csv`])
//!
//! # State of a pair
//!
//! Every (experiment, iteration) pair is either absent from the cache (never attempted) or holds
//! an [`Outcome`]: done, timed out or errored. Only absent pairs are run. Errored pairs come back
//! through [`clean`], timed out pairs through [`save_cache`] with a larger timeout.
//!
//! # Persistence
//!
//! Outcomes are merged into the in-memory cache as soon as a run ends, and the raw output of the
//! run is kept in the log directory. The cache file itself is only written by [`save_cache`];
//! runs that ended after the last save are recovered from the log directory by [`initialize`].
//!
//! Runs are strictly sequential so measurements do not compete for the machine.
//!
//! [`initialize`]: ExperimentEngine::initialize
//! [`todo`]: ExperimentEngine::todo
//! [`run`]: ExperimentEngine::run
//! [`save_cache`]: ExperimentEngine::save_cache
//! [`clean`]: ExperimentEngine::clean
//! [`report`]: ExperimentEngine::report
//! [`csv`]: ExperimentEngine::csv

use std::{collections::HashSet, fmt::Display, io::Write};

use anyhow::{bail, Context};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    cache::ResultCache,
    collection::ExperimentCollection,
    configuration::Configuration,
    experiment::{metric, Experiment, Metrics},
    logger::init_logger,
    outcome::Outcome,
    process::{BoundedProcess, ProcessExit},
    run_log::{read_lossy, RunLog, NO_RESULT},
};

/// One (experiment, iteration) pair without outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TodoItem<'a> {
    pub experiment: &'a Experiment,
    pub iteration: usize,
}

impl Display for TodoItem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (iteration {})", self.experiment.name(), self.iteration)
    }
}

/// What a call to [`ExperimentEngine::run`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub done: usize,
    pub timeouts: usize,
    pub errors: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.done + self.timeouts + self.errors
    }
}

/// What a cache refresh found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Pairs never run in the requested iterations, not counting `rerun`.
    pub remaining: usize,
    /// Timed out pairs re-queued because the timeout grew.
    pub rerun: usize,
    /// Cached outcomes kept as they were because no run log backs them.
    pub unlogged: usize,
}

/// Aggregate of one experiment over the first iterations.
#[derive(Debug, Clone)]
pub struct ExperimentSummary<'a> {
    pub experiment: &'a Experiment,
    /// Mean of every metric over done iterations, `None` if there is none.
    pub mean: Option<Metrics>,
    pub done: usize,
    pub timeouts: usize,
    pub errors: usize,
    /// Most recent non-done outcome, used when nothing is done.
    pub last_failure: Option<&'a Outcome>,
}

impl ExperimentSummary<'_> {
    /// Summary text: the mean through the experiment's format, or why there is none.
    pub fn text(&self) -> String {
        match (&self.mean, self.last_failure) {
            (Some(mean), _) => self.experiment.get_text(mean),
            (None, Some(failure)) => self.experiment.format().describe(failure),
            (None, None) => "not yet available".to_string(),
        }
    }
}

/// Drives the experiments of its collections through the cache.
///
/// Typical use is `initialize`, then one operation, then `save_cache` if the operation ran
/// anything.
pub struct ExperimentEngine {
    config: Configuration,
    collections: Vec<Box<dyn ExperimentCollection>>,
    experiments: Vec<Experiment>,
    cache: ResultCache,
    logs: RunLog,
}

impl ExperimentEngine {
    /// Create an engine without collections.
    pub fn new(config: Configuration) -> ExperimentEngine {
        if config.log {
            if let Err(e) = init_logger(&config.log_dir) {
                eprintln!("could not initialize logs: {e:#}");
            }
        }
        debug!(?config);

        ExperimentEngine {
            logs: RunLog::new(&config.log_dir),
            config,
            collections: vec![],
            experiments: vec![],
            cache: ResultCache::new(),
        }
    }

    /// Add the experiments of `collection`. Takes effect at the next [`initialize`](Self::initialize).
    pub fn add_collection(&mut self, collection: impl ExperimentCollection + 'static) {
        self.collections.push(Box::new(collection));
    }

    /// Builder form of [`add_collection`](Self::add_collection).
    pub fn with_collection(mut self, collection: impl ExperimentCollection + 'static) -> Self {
        self.add_collection(collection);
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Change the timeout used by later runs and by timeout escalation.
    pub fn set_timeout(&mut self, timeout: std::time::Duration) {
        self.config.timeout = timeout;
    }

    /// All experiments, in collection then group order. Empty before `initialize`.
    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Group names in first-appearance order.
    pub fn groups(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.experiments
            .iter()
            .map(Experiment::group)
            .filter(|g| seen.insert(*g))
            .collect()
    }

    /// Gather the experiments and load the cache, then fill pairs missing from the cache for the
    /// first `iterations` iterations from the log directory.
    ///
    /// With `force_rebuild`, the cached outcomes of current experiments in those iterations are
    /// re-derived from the logs. A cached outcome without any log is kept as is, with a warning.
    /// Outcomes of experiments that are no longer collected are always kept.
    ///
    /// # Errors
    /// Fails on duplicate experiment names, a corrupt cache, unreadable logs, or log format drift.
    #[instrument(skip(self))]
    pub fn initialize(&mut self, iterations: usize, force_rebuild: bool) -> anyhow::Result<()> {
        self.load(iterations, force_rebuild)?;
        Ok(())
    }

    /// [`initialize`](Self::initialize), returning how many cached outcomes had no log.
    fn load(&mut self, iterations: usize, force_rebuild: bool) -> anyhow::Result<usize> {
        let mut experiments = Vec::new();
        let mut names = HashSet::new();
        for collection in &self.collections {
            for experiment in collection.experiments() {
                if !names.insert(experiment.name().to_string()) {
                    bail!("duplicate experiment name '{}'", experiment.name());
                }
                experiments.push(experiment.clone());
            }
        }
        self.experiments = experiments;

        self.cache = ResultCache::load(&self.config.cache_file)?;

        let mut recovered = 0;
        let mut unlogged = 0;
        for iteration in 0..iterations {
            for experiment in &self.experiments {
                let cached = self.cache.get(iteration, experiment.name()).is_some();
                if cached && !force_rebuild {
                    continue;
                }
                match self.logs.recover(experiment, iteration)? {
                    Some(outcome) => {
                        self.cache.merge(iteration, experiment.name(), outcome);
                        recovered += 1;
                    }
                    None if cached => {
                        warn!(
                            experiment = experiment.name(),
                            iteration, "no run log for cached outcome, keeping it"
                        );
                        unlogged += 1;
                    }
                    None => {}
                }
            }
        }
        info!(
            experiments = self.experiments.len(),
            cached_iterations = self.cache.len(),
            recovered,
            unlogged,
            "engine initialized"
        );
        Ok(unlogged)
    }

    /// Pairs without outcome in the first `iterations` iterations, iteration-major.
    pub fn todo(&self, iterations: usize) -> Vec<TodoItem<'_>> {
        (0..iterations)
            .flat_map(|iteration| {
                self.experiments
                    .iter()
                    .filter(move |e| self.cache.get(iteration, e.name()).is_none())
                    .map(move |experiment| TodoItem {
                        experiment,
                        iteration,
                    })
            })
            .collect()
    }

    fn check_group(&self, group: Option<&str>) -> anyhow::Result<()> {
        if let Some(group) = group {
            if !self.experiments.iter().any(|e| e.group() == group) {
                bail!("unknown group '{group}'");
            }
        }
        Ok(())
    }

    /// Run every pair without outcome in the first `iterations` iterations, restricted to `group`
    /// if given. Each outcome is in the cache as soon as its run ends; call
    /// [`save_cache`](Self::save_cache) to persist.
    ///
    /// Timeouts, crashes and unparseable output are recorded, never returned as errors.
    ///
    /// # Errors
    /// Fails on an unknown group, log directory I/O errors, or log format drift.
    #[instrument(skip(self))]
    pub fn run(&mut self, iterations: usize, group: Option<&str>) -> anyhow::Result<RunSummary> {
        self.check_group(group)?;

        let todo = self
            .todo(iterations)
            .into_iter()
            .filter(|item| group.map_or(true, |g| item.experiment.group() == g))
            .map(|item| (item.experiment.clone(), item.iteration))
            .collect::<Vec<_>>();
        info!(count = todo.len(), "runs to do");

        let mut summary = RunSummary::default();
        for (experiment, iteration) in todo {
            let outcome = self.run_experiment(&experiment, iteration)?;
            match &outcome {
                Outcome::Done(_) => summary.done += 1,
                Outcome::Timeout(_) => summary.timeouts += 1,
                Outcome::Error(_) => summary.errors += 1,
            }
            if self.config.verbose {
                print_outcome(&experiment, iteration, &outcome);
            }
            self.cache.merge(iteration, experiment.name(), outcome);
        }
        info!(?summary, "run finished");
        Ok(summary)
    }

    /// Execute one pair and record its raw output.
    #[instrument(skip(self, experiment), fields(experiment = %experiment))]
    fn run_experiment(&self, experiment: &Experiment, iteration: usize) -> anyhow::Result<Outcome> {
        let (file, partial) = self.logs.start(experiment.name(), iteration)?;
        let call = experiment.build_command();
        debug!(?call, "launching");

        let outcome = match self.launch(call, &file) {
            Err(e) => {
                error!("launch failed: {e:#}");
                Outcome::Error(format!("{e:#}"))
            }
            Ok(mut process) => match process.wait_timeout(self.config.timeout)? {
                ProcessExit::TimedOut { elapsed } => {
                    warn!(?elapsed, "timeout");
                    Outcome::Timeout(self.config.timeout.as_secs_f64())
                }
                ProcessExit::Exited { status, elapsed } if !status.success() => {
                    warn!(?elapsed, %status, "failed");
                    Outcome::Error(status.to_string())
                }
                ProcessExit::Exited { elapsed, .. } => {
                    drop(file);
                    let contents = read_lossy(&partial)?;
                    let parsed = experiment
                        .parse_log(&contents)
                        .with_context(|| format!("while parsing '{}'", partial.display()))?;
                    debug!(?elapsed, done = parsed.is_some(), "exited");
                    match parsed {
                        Some(metrics) => Outcome::Done(metrics),
                        None => Outcome::Error(NO_RESULT.to_string()),
                    }
                }
            },
        };

        self.logs.finish(experiment.name(), iteration, &outcome)?;
        Ok(outcome)
    }

    fn launch(&self, call: &[String], output: &std::fs::File) -> anyhow::Result<BoundedProcess> {
        let containment = &self.config.containment;
        if containment.is_empty() {
            return BoundedProcess::launch_without_container(call, output);
        }
        match BoundedProcess::launch(call, output, containment) {
            Ok(process) => Ok(process),
            Err(e) if self.config.allow_uncontained => {
                warn!("running uncontained: {e:#}");
                BoundedProcess::launch_without_container(call, output)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the cache. With `rerun_timeouts`, timed out entries whose bound is strictly below
    /// the current timeout are first reset to absent (and their logs deleted) so they run again.
    ///
    /// Returns the number of entries reset.
    ///
    /// # Errors
    /// Fails if the cache file or a log cannot be written or deleted.
    #[instrument(skip(self))]
    pub fn save_cache(&mut self, rerun_timeouts: bool) -> anyhow::Result<usize> {
        let mut reset = 0;
        if rerun_timeouts {
            let current = self.config.timeout.as_secs_f64();
            let removed = self.cache.remove_where(|o| o.deserves_rerun(current));
            for (iteration, name) in &removed {
                self.logs.remove(name, *iteration)?;
            }
            reset = removed.len();
            info!(reset, current, "timeouts re-queued");
        }
        self.cache.save(&self.config.cache_file)?;
        Ok(reset)
    }

    /// Rebuild the cache from the log directory and persist it.
    ///
    /// # Errors
    /// See [`initialize`](Self::initialize) and [`save_cache`](Self::save_cache).
    pub fn refresh(
        &mut self,
        iterations: usize,
        rerun_timeouts: bool,
    ) -> anyhow::Result<RefreshSummary> {
        let unlogged = self.load(iterations, true)?;
        let remaining = self.todo(iterations).len();
        let rerun = self.save_cache(rerun_timeouts)?;
        Ok(RefreshSummary {
            remaining,
            rerun,
            unlogged,
        })
    }

    /// Remove every errored entry, with its logs, and persist the cache. Done and timed out
    /// entries are kept.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    /// Fails if a log cannot be deleted or the cache cannot be written.
    #[instrument(skip(self))]
    pub fn clean(&mut self) -> anyhow::Result<usize> {
        let removed = self.cache.remove_where(Outcome::is_error);
        for (iteration, name) in &removed {
            self.logs.remove(name, *iteration)?;
        }
        info!(removed = removed.len(), "errored runs purged");
        self.cache.save(&self.config.cache_file)?;
        Ok(removed.len())
    }

    /// Per-experiment aggregates over the first `iterations` iterations, restricted to `group` if
    /// given.
    pub fn summaries(&self, iterations: usize, group: Option<&str>) -> Vec<ExperimentSummary<'_>> {
        self.experiments
            .iter()
            .filter(|e| group.map_or(true, |g| e.group() == g))
            .map(|experiment| {
                let mut summary = ExperimentSummary {
                    experiment,
                    mean: None,
                    done: 0,
                    timeouts: 0,
                    errors: 0,
                    last_failure: None,
                };
                let mut done = Vec::new();
                for iteration in 0..iterations {
                    match self.cache.get(iteration, experiment.name()) {
                        Some(Outcome::Done(metrics)) => done.push(metrics),
                        Some(failure @ Outcome::Timeout(_)) => {
                            summary.timeouts += 1;
                            summary.last_failure = Some(failure);
                        }
                        Some(failure @ Outcome::Error(_)) => {
                            summary.errors += 1;
                            summary.last_failure = Some(failure);
                        }
                        None => {}
                    }
                }
                summary.done = done.len();
                summary.mean = mean(&done);
                summary
            })
            .collect()
    }

    /// Write a human readable summary, one block per group.
    ///
    /// # Errors
    /// Fails on an unknown group or a write error.
    pub fn report(
        &self,
        iterations: usize,
        group: Option<&str>,
        out: &mut impl Write,
    ) -> anyhow::Result<()> {
        self.check_group(group)?;
        let summaries = self.summaries(iterations, group);
        let width = summaries
            .iter()
            .map(|s| s.experiment.solver().len())
            .max()
            .unwrap_or_default();

        let mut current_group = None;
        for summary in &summaries {
            let experiment = summary.experiment;
            if current_group != Some(experiment.group()) {
                writeln!(out, "{}", experiment.group())?;
                current_group = Some(experiment.group());
            }
            let mut counts = format!("{}/{iterations} done", summary.done);
            if summary.timeouts > 0 {
                counts += &format!(", {} timeout", summary.timeouts);
            }
            if summary.errors > 0 {
                counts += &format!(", {} error", summary.errors);
            }
            writeln!(
                out,
                "  {:<width$}  {} ({counts})",
                experiment.solver(),
                summary.text()
            )?;
        }
        Ok(())
    }

    /// Write one `;`-separated record per done or timed out pair of the first `iterations`
    /// iterations: group, solver, time, success flag, then the format's metric columns.
    ///
    /// Timed out records carry their bound as time, `0` as flag and `0` for every metric. Errored
    /// and absent pairs are skipped.
    ///
    /// Nothing is written unless every record can be built.
    ///
    /// # Errors
    /// Fails if a done outcome has no `time` metric, or on a write error.
    pub fn csv(&self, iterations: usize, out: &mut impl Write) -> anyhow::Result<()> {
        let mut records = Vec::new();
        for iteration in 0..iterations.min(self.cache.len()) {
            for experiment in &self.experiments {
                let Some(outcome) = self.cache.get(iteration, experiment.name()) else {
                    continue;
                };
                let columns = experiment.format().csv_columns();
                let mut fields = vec![experiment.group().to_string(), experiment.solver().to_string()];
                match outcome {
                    Outcome::Timeout(bound) => {
                        fields.push(format!("{bound:.6}"));
                        fields.push("0".to_string());
                        fields.extend(columns.iter().map(|_| "0".to_string()));
                    }
                    Outcome::Done(metrics) => {
                        let Some(time) = metrics.get("time") else {
                            bail!(
                                "done outcome of '{}' (iteration {iteration}) has no time",
                                experiment.name()
                            );
                        };
                        fields.push(format!("{time:.6}"));
                        fields.push("1".to_string());
                        fields.extend(columns.iter().map(|c| c.format(metric(metrics, c.key))));
                    }
                    Outcome::Error(_) => continue,
                }
                records.push(fields.join("; "));
            }
        }
        for record in records {
            writeln!(out, "{record}")?;
        }
        Ok(())
    }
}

/// Arithmetic mean of every key; keys missing from a run count as zero.
fn mean(runs: &[&Metrics]) -> Option<Metrics> {
    if runs.is_empty() {
        return None;
    }
    let mut sum = Metrics::new();
    for run in runs {
        for (key, value) in *run {
            *sum.entry(key.clone()).or_default() += value;
        }
    }
    let n = runs.len() as f64;
    sum.values_mut().for_each(|v| *v /= n);
    Some(sum)
}

fn print_outcome(experiment: &Experiment, iteration: usize, outcome: &Outcome) {
    // green done, yellow timeout, red error
    let color = match outcome {
        Outcome::Done(_) => "\x1b[32m",
        Outcome::Timeout(_) => "\x1b[33m",
        Outcome::Error(_) => "\x1b[31m",
    };
    println!(
        "{color}{}\x1b[39m [{iteration}]: {}",
        experiment.name(),
        experiment.format().describe(outcome)
    );
}
