//! Enumerating inputs and materialising experiments for them.
//!
//! Collection happens in two explicit phases:
//! 1. [`FileFinder::discover`] lists the inputs once and returns an immutable, sorted list.
//! 2. [`SolverCollection::new`] builds one [`Experiment`] per (input, solver configuration) pair,
//!    grouped by input.
//!
//! Both phases are deterministic for an unchanged directory and solver selection, which keeps
//! experiment names (the cache keys) stable across runs.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use tracing::{debug, info, instrument};

use crate::experiment::Experiment;

/// One input file: its logical name (file name without extension) and its path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputFile {
    pub name: String,
    pub path: PathBuf,
}

/// Lists the files of a directory carrying one of the given extensions.
#[derive(Debug, Clone)]
pub struct FileFinder {
    directory: PathBuf,
    extensions: Vec<String>,
}

impl FileFinder {
    pub fn new<I, S>(directory: impl Into<PathBuf>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FileFinder {
            directory: directory.into(),
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    /// Read the directory and return every matching file, sorted by extension order then name.
    ///
    /// Subdirectories are skipped even if their name matches.
    ///
    /// # Errors
    /// Returns an error if `directory` is not a readable directory.
    #[instrument(skip(self), fields(directory = ?self.directory))]
    pub fn discover(&self) -> anyhow::Result<Vec<InputFile>> {
        if !Path::is_dir(&self.directory) {
            bail!("'{}' is not a valid directory", self.directory.display());
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.directory)
            .with_context(|| format!("could not read '{}'", self.directory.display()))?
        {
            let entry = entry.context("one entry cannot be read in directory")?;
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(file_name) = entry.file_name().into_string() else {
                debug!("skipping non UTF-8 file name {:?}", entry.file_name());
                continue;
            };
            entries.push(file_name);
        }
        entries.sort();

        let mut files = Vec::new();
        for ext in &self.extensions {
            let dotext = format!(".{ext}");
            for file_name in &entries {
                if let Some(name) = file_name.strip_suffix(&dotext) {
                    files.push(InputFile {
                        name: name.to_string(),
                        path: self.directory.join(file_name),
                    });
                }
            }
        }
        info!(count = files.len(), "inputs discovered");
        Ok(files)
    }
}

/// Builds the experiment for one input.
pub type ExperimentFactory = Arc<dyn Fn(&InputFile) -> Experiment + Send + Sync>;

/// All experiments sharing one input.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub experiments: Vec<Experiment>,
}

/// A source of grouped experiments the engine can own.
pub trait ExperimentCollection {
    /// Experiments grouped per input, in a stable order.
    fn groups(&self) -> &[Group];

    fn experiments(&self) -> Box<dyn Iterator<Item = &Experiment> + '_> {
        Box::new(self.groups().iter().flat_map(|g| g.experiments.iter()))
    }
}

/// Cross product of inputs and a catalog of named solver configurations.
pub struct SolverCollection {
    solvers: Vec<String>,
    groups: Vec<Group>,
}

impl SolverCollection {
    /// Build one experiment per (input, configuration).
    ///
    /// `requested` narrows the catalog to the given configuration names; an empty slice selects the
    /// whole catalog. Catalog order is kept in both cases.
    ///
    /// # Errors
    /// Returns an error if a requested name is not in the catalog.
    pub fn new(
        inputs: &[InputFile],
        catalog: &[(&str, ExperimentFactory)],
        requested: &[String],
    ) -> anyhow::Result<Self> {
        let known = catalog.iter().map(|(name, _)| *name).collect::<HashSet<_>>();
        if let Some(unknown) = requested.iter().find(|r| !known.contains(r.as_str())) {
            bail!("unknown solver '{unknown}'");
        }

        let selected = catalog
            .iter()
            .filter(|(name, _)| requested.is_empty() || requested.iter().any(|r| r == name))
            .collect::<Vec<_>>();

        let groups = inputs
            .iter()
            .map(|input| Group {
                name: input.name.clone(),
                experiments: selected.iter().map(|(_, factory)| factory(input)).collect(),
            })
            .collect::<Vec<_>>();

        Ok(SolverCollection {
            solvers: selected.iter().map(|(name, _)| name.to_string()).collect(),
            groups,
        })
    }

    /// Names of the selected configurations.
    pub fn solvers(&self) -> &[String] {
        &self.solvers
    }
}

impl ExperimentCollection for SolverCollection {
    fn groups(&self) -> &[Group] {
        &self.groups
    }
}
