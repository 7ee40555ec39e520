//! Raw output of every run, kept next to the cache.
//!
//! For experiment `name` and iteration `i` the log directory holds:
//! - `name-i.partial` while the run is in progress,
//! - `name-i.log` once it ended (combined stdout and stderr),
//! - `name-i.error` or `name-i.timeout` markers for failed runs.
//!
//! Markers are written before the capture is renamed to `.log`, so a `.log` without marker always
//! means a clean exit. A `.partial` left by a crash is ignored.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use tracing::{debug, trace};

use crate::{experiment::Experiment, outcome::Outcome};

/// Descriptor recorded when a cleanly exited run shows no completion marker.
pub const NO_RESULT: &str = "no result in log";

const PARTIAL: &str = "partial";
const LOG: &str = "log";
const ERROR: &str = "error";
const TIMEOUT: &str = "timeout";

#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        RunLog { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str, iteration: usize, ext: &str) -> PathBuf {
        self.dir.join(format!("{name}-{iteration}.{ext}"))
    }

    /// Path of the finished capture of (`name`, `iteration`).
    pub fn log_path(&self, name: &str, iteration: usize) -> PathBuf {
        self.path(name, iteration, LOG)
    }

    /// Remove every trace of (`name`, `iteration`) and open a fresh capture file.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be created.
    pub fn start(&self, name: &str, iteration: usize) -> anyhow::Result<(File, PathBuf)> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("could not create log directory '{}'", self.dir.display()))?;
        self.remove(name, iteration)?;
        let partial = self.path(name, iteration, PARTIAL);
        let file = File::create(&partial)
            .with_context(|| format!("could not create '{}'", partial.display()))?;
        Ok((file, partial))
    }

    /// Record how the run ended: write the marker, then publish the capture.
    ///
    /// # Errors
    /// Returns an error if a file cannot be written or renamed.
    pub fn finish(&self, name: &str, iteration: usize, outcome: &Outcome) -> anyhow::Result<()> {
        match outcome {
            Outcome::Done(_) => {}
            Outcome::Error(descriptor) => {
                std::fs::write(self.path(name, iteration, ERROR), descriptor)?;
            }
            Outcome::Timeout(bound) => {
                std::fs::write(self.path(name, iteration, TIMEOUT), bound.to_string())?;
            }
        }
        let partial = self.path(name, iteration, PARTIAL);
        if partial.exists() {
            std::fs::rename(&partial, self.log_path(name, iteration))
                .with_context(|| format!("could not publish '{}'", partial.display()))?;
        }
        trace!(experiment = name, iteration, %outcome, "run log written");
        Ok(())
    }

    /// Rebuild the outcome of (`experiment`, `iteration`) from the log directory.
    ///
    /// `Ok(None)` when the pair was never run to completion.
    ///
    /// # Errors
    /// Fails on unreadable files, an invalid timeout marker, or log format drift.
    pub fn recover(
        &self,
        experiment: &Experiment,
        iteration: usize,
    ) -> anyhow::Result<Option<Outcome>> {
        let name = experiment.name();

        let timeout = self.path(name, iteration, TIMEOUT);
        if timeout.exists() {
            let raw = std::fs::read_to_string(&timeout)?;
            let Ok(bound) = raw.trim().parse::<f64>() else {
                bail!("invalid timeout marker '{}': {raw:?}", timeout.display());
            };
            return Ok(Some(Outcome::Timeout(bound)));
        }

        let error = self.path(name, iteration, ERROR);
        if error.exists() {
            let descriptor = std::fs::read_to_string(&error)?;
            return Ok(Some(Outcome::Error(descriptor.trim().to_string())));
        }

        let log = self.log_path(name, iteration);
        if log.exists() {
            let contents = read_lossy(&log)?;
            let parsed = experiment
                .parse_log(&contents)
                .with_context(|| format!("while parsing '{}'", log.display()))?;
            debug!(experiment = name, iteration, done = parsed.is_some(), "recovered from log");
            return Ok(Some(match parsed {
                Some(metrics) => Outcome::Done(metrics),
                None => Outcome::Error(NO_RESULT.to_string()),
            }));
        }

        Ok(None)
    }

    /// Delete every file of (`name`, `iteration`). Missing files are fine.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be deleted.
    pub fn remove(&self, name: &str, iteration: usize) -> anyhow::Result<()> {
        for ext in [PARTIAL, LOG, ERROR, TIMEOUT] {
            let path = self.path(name, iteration, ext);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("could not delete '{}'", path.display()))
                }
            }
        }
        Ok(())
    }
}

/// Read a capture as text, replacing invalid UTF-8.
pub fn read_lossy(path: &Path) -> anyhow::Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("could not read '{}'", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
