//! # Solver Bench
//!
//! A Rust crate for benchmarking an external solver binary over a directory of inputs, with every
//! outcome cached so an interrupted campaign resumes where it stopped.
//!
//! It provides:
//! - Experiment descriptions built from composable flag toggles (`ExperimentBuilder`)
//! - Discovery of inputs and the cross product with named solver configurations
//!   (`SolverCollection`)
//! - Sequential execution under a wall-clock timeout, with optional memory and CPU limits through
//!   Linux cgroups v2 (`ExperimentEngine`)
//! - A JSON result cache, rebuilt from raw run logs when needed (`ResultCache`)
//! - Human readable summaries and CSV export
//!
//! Every run is a separate OS process. A run that exceeds the timeout is killed and recorded as
//! timed out; a run that crashes or prints no result is recorded as errored. Neither is retried
//! automatically: errored runs come back through [`ExperimentEngine::clean`], timed out runs when
//! the timeout is raised (see [`ExperimentEngine::save_cache`]).
//!
//! # Documentation Overview
//!
//! - For the execution and caching lifecycle, see the [`engine`] module.
//! - For describing experiments and parsing solver output, see the [`experiment`] module and the
//!   [`LogFormat`](crate::experiment::LogFormat) trait.
//! - For configuring iterations, timeout, paths and resource limits, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For the built-in `knor` benchmark, see the [`knor`] module.
//!
//! # Usage Example
//!
//! ```no_run
//! use std::time::Duration;
//! use solver_bench::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new()
//!         .with_iterations(3)
//!         .with_timeout(Duration::from_secs(60));
//!
//!     // every .ehoa file of "inputs" against two configurations
//!     let experiments = KnorExperiments::new("inputs", vec!["std".into(), "bisim".into()])
//!         .discover()?;
//!
//!     let mut engine = ExperimentEngine::new(config).with_collection(experiments);
//!     engine.initialize(3, false)?;
//!     engine.run(3, None)?;
//!     engine.save_cache(false)?;
//!
//!     engine.report(3, None, &mut std::io::stdout())?;
//!     Ok(())
//! }
//! ```
//!
//! # Custom Solvers
//!
//! Any solver printing its measurements can be benchmarked by implementing
//! [`LogFormat`](crate::experiment::LogFormat) and building experiments with
//! [`ExperimentBuilder`](crate::experiment::ExperimentBuilder):
//!
//! ```
//! use std::sync::Arc;
//! use solver_bench::experiment::{ExperimentBuilder, FormatDriftError, LogFormat, Metrics};
//!
//! #[derive(Debug)]
//! struct Seconds;
//!
//! impl LogFormat for Seconds {
//!     fn parse_log(&self, contents: &str) -> Result<Option<Metrics>, FormatDriftError> {
//!         let Some(raw) = contents.strip_prefix("solved in ") else {
//!             return Ok(None);
//!         };
//!         let time = raw.trim().parse::<f64>().map_err(|_| FormatDriftError {
//!             marker: "solved in".into(),
//!             value: raw.trim().into(),
//!         })?;
//!         Ok(Some(Metrics::from([("time".to_string(), time)])))
//!     }
//!
//!     fn get_text(&self, result: &Metrics) -> String {
//!         format!("{:.2} sec", result["time"])
//!     }
//! }
//!
//! let experiment = ExperimentBuilder::new("model", Arc::new(Seconds))
//!     .args(["./solver", "model.txt"])
//!     .toggle("fast", ["--fast"])
//!     .build();
//!
//! assert_eq!(experiment.name(), "model-fast");
//! assert_eq!(experiment.solver(), "std-fast");
//! assert_eq!(experiment.build_command(), ["./solver", "model.txt", "--fast"]);
//! ```

pub use anyhow;
pub mod cache;
pub mod collection;
pub mod configuration;
pub mod engine;
pub mod experiment;
pub mod knor;
mod logger;
pub mod outcome;
pub mod process;
pub mod run_log;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use solver_bench::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`ExperimentEngine`](crate::engine::ExperimentEngine)
/// - [`ExperimentBuilder`](crate::experiment::ExperimentBuilder) and the
///   [`LogFormat`](crate::experiment::LogFormat) trait
/// - the [`knor`](crate::knor) entry point
pub mod prelude {
    pub use crate::collection::{ExperimentCollection, FileFinder, SolverCollection};
    pub use crate::configuration::Configuration;
    pub use crate::engine::ExperimentEngine;
    pub use crate::experiment::{Experiment, ExperimentBuilder, LogFormat, Metrics};
    pub use crate::knor::KnorExperiments;
    pub use crate::outcome::Outcome;
}
