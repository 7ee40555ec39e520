//! Single repeatable experiments.
//!
//! An [`Experiment`] is one (input, solver configuration) pairing: a command line plus the
//! [`LogFormat`] that turns the captured output of that command into [`Metrics`].
//!
//! Experiments are assembled with an [`ExperimentBuilder`]. Toggles are applied in call order and
//! each one changes the name, the solver tag and the argument list, so the same configuration must
//! always be built through the same sequence of calls: the resulting name is the cache key.
//!
//! ```
//! # use std::sync::Arc;
//! # use solver_bench::experiment::{ExperimentBuilder, LogFormat, Metrics, FormatDriftError};
//! # #[derive(Debug)]
//! # struct Silent;
//! # impl LogFormat for Silent {
//! #     fn parse_log(&self, _: &str) -> Result<Option<Metrics>, FormatDriftError> { Ok(None) }
//! #     fn get_text(&self, _: &Metrics) -> String { String::new() }
//! # }
//! let experiment = ExperimentBuilder::new("game1", Arc::new(Silent))
//!     .solver("base")
//!     .args(["bin/solver", "game1.ehoa"])
//!     .toggle("X", ["--x"])
//!     .toggle("Y", ["--y"])
//!     .build();
//!
//! assert_eq!(experiment.solver(), "base-X-Y");
//! assert_eq!(experiment.name(), "game1-X-Y");
//! assert_eq!(experiment.build_command(), ["bin/solver", "game1.ehoa", "--x", "--y"]);
//! ```

use std::{collections::BTreeMap, fmt::Debug, str::FromStr, sync::Arc};

use regex::Regex;
use thiserror::Error;

use crate::outcome::Outcome;

/// Named numeric measurements extracted from one run.
///
/// Keys missing from the map are read as `0` by reporting.
pub type Metrics = BTreeMap<String, f64>;

/// Read `key` from `metrics`, defaulting to zero.
pub fn metric(metrics: &Metrics, key: &str) -> f64 {
    metrics.get(key).copied().unwrap_or_default()
}

/// A known log marker was found but its value could not be converted.
///
/// This means the external tool changed its output format; it is never turned into a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("log marker '{marker}' carries unparseable value '{value}'")]
pub struct FormatDriftError {
    pub marker: String,
    pub value: String,
}

/// How a CSV column is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Printed without decimals.
    Integer,
    /// Printed with six decimals.
    Float,
}

/// One metric column of the CSV export, after the fixed leading fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub key: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn integer(key: &'static str) -> Self {
        Column {
            key,
            kind: ColumnKind::Integer,
        }
    }

    pub const fn float(key: &'static str) -> Self {
        Column {
            key,
            kind: ColumnKind::Float,
        }
    }

    pub fn format(&self, value: f64) -> String {
        match self.kind {
            ColumnKind::Integer => format!("{}", value.round() as i64),
            ColumnKind::Float => format!("{value:.6}"),
        }
    }
}

/// The log grammar of a solver binary.
///
/// Implementors describe how captured output becomes [`Metrics`] and how metrics are summarised.
pub trait LogFormat: Debug + Send + Sync {
    /// Extract metrics from the captured output of one run.
    ///
    /// Returns `Ok(None)` when the output does not show a completed run (primary completion marker
    /// missing). Every other field defaults to `0` when its marker is absent.
    ///
    /// # Errors
    /// [`FormatDriftError`] when a marker is present but its value fails to convert.
    fn parse_log(&self, contents: &str) -> Result<Option<Metrics>, FormatDriftError>;

    /// One-line summary of a successful result (usually time and size).
    fn get_text(&self, result: &Metrics) -> String;

    /// Metric columns exported after `group; solver; time; success`.
    fn csv_columns(&self) -> &[Column] {
        &[]
    }

    /// One-line summary of any outcome. Error descriptors are returned verbatim.
    fn describe(&self, outcome: &Outcome) -> String {
        match outcome {
            Outcome::Done(metrics) => self.get_text(metrics),
            Outcome::Timeout(bound) => format!("timeout after {bound} sec"),
            Outcome::Error(error) => error.clone(),
        }
    }
}

/// Captures group `index` of `re` in `contents` and converts it.
///
/// `Ok(None)` when the marker is absent.
pub fn capture_field<T: FromStr>(
    re: &Regex,
    index: usize,
    contents: &str,
) -> Result<Option<T>, FormatDriftError> {
    let Some(captures) = re.captures(contents) else {
        return Ok(None);
    };
    let Some(raw) = captures.get(index) else {
        return Ok(None);
    };
    raw.as_str()
        .parse::<T>()
        .map(Some)
        .map_err(|_| FormatDriftError {
            marker: re.as_str().to_string(),
            value: raw.as_str().to_string(),
        })
}

/// One runnable (input, solver configuration) pairing.
#[derive(Debug, Clone)]
pub struct Experiment {
    name: String,
    group: String,
    solver: String,
    call: Vec<String>,
    format: Arc<dyn LogFormat>,
}

impl Experiment {
    /// Unique identifier of this experiment; the cache key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The input this experiment belongs to.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Tag of the solver configuration.
    pub fn solver(&self) -> &str {
        &self.solver
    }

    /// The executable followed by its arguments.
    pub fn build_command(&self) -> &[String] {
        &self.call
    }

    pub fn format(&self) -> &dyn LogFormat {
        self.format.as_ref()
    }

    pub fn parse_log(&self, contents: &str) -> Result<Option<Metrics>, FormatDriftError> {
        self.format.parse_log(contents)
    }

    pub fn get_text(&self, result: &Metrics) -> String {
        self.format.get_text(result)
    }
}

impl PartialEq for Experiment {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.group == other.group
            && self.solver == other.solver
            && self.call == other.call
    }
}

impl Eq for Experiment {}

impl std::fmt::Display for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Builder for [`Experiment`]. Every method consumes and returns the builder, so the order of
/// toggles is visible at the call site.
#[derive(Debug, Clone)]
pub struct ExperimentBuilder {
    name: String,
    group: String,
    solver: String,
    call: Vec<String>,
    format: Arc<dyn LogFormat>,
}

impl ExperimentBuilder {
    /// Start an experiment for input `group`. The name starts as the group name and the solver tag
    /// as `std`.
    #[must_use]
    pub fn new(group: impl Into<String>, format: Arc<dyn LogFormat>) -> Self {
        let group = group.into();
        ExperimentBuilder {
            name: group.clone(),
            group,
            solver: "std".to_string(),
            call: vec![],
            format,
        }
    }

    /// Replace the base solver tag.
    #[must_use]
    pub fn solver(mut self, tag: impl Into<String>) -> Self {
        self.solver = tag.into();
        self
    }

    /// Append arguments without touching the name or tag.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.call.extend(args.into_iter().map(Into::into));
        self
    }

    /// Refine the configuration: `-label` is appended to both the name and the solver tag.
    #[must_use]
    pub fn toggle<I, S>(mut self, label: &str, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name = format!("{}-{label}", self.name);
        self.solver = format!("{}-{label}", self.solver);
        self.args(flags)
    }

    /// Select a different algorithm: `-label` is appended to the name and the solver tag becomes
    /// `label`.
    #[must_use]
    pub fn select<I, S>(mut self, label: &str, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name = format!("{}-{label}", self.name);
        self.solver = label.to_string();
        self.args(flags)
    }

    #[must_use]
    pub fn build(self) -> Experiment {
        Experiment {
            name: self.name,
            group: self.group,
            solver: self.solver,
            call: self.call,
            format: self.format,
        }
    }
}
