//! Config for the engine behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Flags are case-insensitive; set the value to `"true"` to enable one.
//! Values that fail to parse fall back to the default.
//!
//! - `BENCH_ITERATIONS`: Number of repetitions of every experiment (default: `5`)
//! - `BENCH_TIMEOUT_SECS`: Wall-clock bound of a single run, in seconds (default: `120`)
//! - `BENCH_LOG_DIR`: Directory holding the raw output of every run (default: `logs`)
//! - `BENCH_CACHE_FILE`: JSON file holding all outcomes (default: `cache.json`)
//! - `BENCH_VERBOSE`: Print one line per finished run (default: `true`)
//! - `BENCH_LOG`: Enable tracing logs to a file (default: `false`)
//! - `BENCH_MEMORY_LIMIT_MB`: Memory cap of a single run, needs cgroup v2 (default: none)
//! - `BENCH_CPU_LIST`: CPUs a run may use, e.g. `"0-3,6"`, needs cgroup v2 (default: none)
//! - `BENCH_ALLOW_UNCONTAINED`: Run uncontained when the cgroup cannot be created (default: `false`)

use std::{path::PathBuf, time::Duration};

use crate::process::Containment;

/// Configuration for engine behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) iterations: usize,
    pub(crate) timeout: Duration,
    pub(crate) log_dir: PathBuf,
    pub(crate) cache_file: PathBuf,
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) containment: Containment,
    pub(crate) allow_uncontained: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Every experiment is repeated 5 times.
    /// - A run is killed after 120 seconds.
    /// - Raw outputs go to `logs/`, outcomes to `cache.json`.
    /// - One line per finished run is printed to stdout.
    /// - Logging to file is disabled.
    /// - Runs are not contained (no memory or CPU limit).
    pub fn new() -> Self {
        Self {
            iterations: 5,
            timeout: Duration::from_secs(120),
            log_dir: PathBuf::from("logs"),
            cache_file: PathBuf::from("cache.json"),
            verbose: true,
            log: false,
            containment: Containment::default(),
            allow_uncontained: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Any unset or invalid
    /// value results in using the default value for that field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env<T: std::str::FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.trim().parse().ok()
        }

        let defaults = Self::new();
        let timeout = get_env::<f64>("BENCH_TIMEOUT_SECS")
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(defaults.timeout);

        Self {
            iterations: get_env("BENCH_ITERATIONS").unwrap_or(defaults.iterations),
            timeout,
            log_dir: get_env("BENCH_LOG_DIR").unwrap_or(defaults.log_dir),
            cache_file: get_env("BENCH_CACHE_FILE").unwrap_or(defaults.cache_file),
            verbose: get_env_flag("BENCH_VERBOSE", true),
            log: get_env_flag("BENCH_LOG", false),
            containment: Containment {
                memory_limit_mb: get_env("BENCH_MEMORY_LIMIT_MB"),
                cpus: get_env::<String>("BENCH_CPU_LIST").filter(|s| !s.is_empty()),
            },
            allow_uncontained: get_env_flag("BENCH_ALLOW_UNCONTAINED", false),
        }
    }

    /// Set the number of iterations.
    pub fn with_iterations(mut self, value: usize) -> Self {
        self.iterations = value;
        self
    }

    /// Set the wall-clock bound of a single run.
    pub fn with_timeout(mut self, value: Duration) -> Self {
        self.timeout = value;
        self
    }

    /// Set the directory receiving raw run outputs.
    pub fn with_log_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.log_dir = value.into();
        self
    }

    /// Set the cache file.
    pub fn with_cache_file(mut self, value: impl Into<PathBuf>) -> Self {
        self.cache_file = value.into();
        self
    }

    /// Enable or disable progress output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Limit the memory of every run, in megabytes (Linux cgroup v2).
    pub fn with_memory_limit(mut self, megabytes: u64) -> Self {
        self.containment.memory_limit_mb = Some(megabytes);
        self
    }

    /// Pin every run to the given CPU list, e.g. `"0-3,6"` (Linux cgroup v2).
    pub fn with_cpu_list(mut self, cpus: impl Into<String>) -> Self {
        self.containment.cpus = Some(cpus.into());
        self
    }

    /// Enable or disable running uncontained when the cgroup cannot be created.
    pub fn with_allow_uncontained(mut self, value: bool) -> Self {
        self.allow_uncontained = value;
        self
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn log_dir(&self) -> &std::path::Path {
        &self.log_dir
    }

    pub fn cache_file(&self) -> &std::path::Path {
        &self.cache_file
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Configuration::new()
            .with_iterations(2)
            .with_timeout(Duration::from_millis(1500))
            .with_cache_file("/tmp/c.json")
            .with_memory_limit(512)
            .with_cpu_list("0-1");

        assert_eq!(config.iterations(), 2);
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.cache_file(), std::path::Path::new("/tmp/c.json"));
        assert_eq!(config.log_dir(), std::path::Path::new("logs"));
        assert_eq!(config.containment.memory_limit_mb, Some(512));
        assert_eq!(config.containment.cpus.as_deref(), Some("0-1"));
        assert!(!config.allow_uncontained);
    }
}
