//! Persisted outcomes, indexed by iteration then experiment name.
//!
//! On disk the cache is a pretty-printed JSON array: element `i` holds the outcomes of iteration
//! `i`, keyed by experiment name. Names of experiments that are no longer collected are kept
//! untouched so that narrowing the solver selection never loses measurements.

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::outcome::Outcome;

/// The persisted cache exists but cannot be used. Never replaced by an empty cache.
#[derive(Debug, Error)]
#[error("cache file '{path}' is corrupt: {reason}")]
pub struct CacheCorruptError {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcomes of one iteration.
pub type Iteration = BTreeMap<String, Outcome>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultCache {
    iterations: Vec<Iteration>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the cache at `path`. A missing file gives an empty cache.
    ///
    /// # Errors
    /// [`CacheCorruptError`] if the file cannot be read or is not a valid cache.
    #[instrument]
    pub fn load(path: &Path) -> anyhow::Result<ResultCache> {
        if !path.exists() {
            debug!("no cache file, starting empty");
            return Ok(ResultCache::new());
        }
        let corrupt = |reason: String| CacheCorruptError {
            path: path.to_path_buf(),
            reason,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
        let iterations: Vec<Iteration> =
            serde_json::from_str(&contents).map_err(|e| corrupt(e.to_string()))?;
        debug!(iterations = iterations.len(), "cache loaded");
        Ok(ResultCache { iterations })
    }

    /// Write the whole cache to `path`, replacing the previous file atomically.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    #[instrument(skip(self))]
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("could not create '{}'", dir.display()))?;

        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("could not create temporary file in '{}'", dir.display()))?;
        serde_json::to_writer_pretty(&mut file, &self.iterations)
            .context("could not serialize cache")?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(path)
            .with_context(|| format!("could not write cache to '{}'", path.display()))?;
        debug!(iterations = self.iterations.len(), "cache saved");
        Ok(())
    }

    /// Set the outcome of (`iteration`, `name`), growing the cache with empty iterations if needed.
    pub fn merge(&mut self, iteration: usize, name: &str, outcome: Outcome) {
        if self.iterations.len() <= iteration {
            self.iterations.resize_with(iteration + 1, Iteration::new);
        }
        self.iterations[iteration].insert(name.to_string(), outcome);
    }

    pub fn get(&self, iteration: usize, name: &str) -> Option<&Outcome> {
        self.iterations.get(iteration)?.get(name)
    }

    /// Drop the outcome of (`iteration`, `name`), making the pair absent again.
    pub fn remove(&mut self, iteration: usize, name: &str) -> Option<Outcome> {
        self.iterations.get_mut(iteration)?.remove(name)
    }

    /// Remove every entry matching `predicate` and return the removed (iteration, name) pairs.
    pub fn remove_where(
        &mut self,
        mut predicate: impl FnMut(&Outcome) -> bool,
    ) -> Vec<(usize, String)> {
        let mut removed = vec![];
        for (i, iteration) in self.iterations.iter_mut().enumerate() {
            iteration.retain(|name, outcome| {
                if predicate(outcome) {
                    removed.push((i, name.clone()));
                    false
                } else {
                    true
                }
            });
        }
        removed
    }

    pub fn clear(&mut self) {
        self.iterations.clear();
    }

    /// Number of iterations present (some may be empty).
    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn iterations(&self) -> &[Iteration] {
        &self.iterations
    }
}
