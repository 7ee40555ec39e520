//! Experiments for the `knor` reactive synthesis tool.
//!
//! Every input is an `.ehoa` automaton. A solver configuration is a sequence of [`Toggle`]s applied
//! on top of `knor -v <model>`; see [`CATALOG`] for the named configurations.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use regex::Regex;

use crate::{
    collection::{ExperimentFactory, FileFinder, InputFile, SolverCollection},
    experiment::{
        capture_field, metric, Column, Experiment, ExperimentBuilder, FormatDriftError, LogFormat,
        Metrics,
    },
};

/// Where the binary is expected when none is given.
pub const DEFAULT_BINARY: &str = "bin/knor";

/// Input file extension.
pub const EXTENSION: &str = "ehoa";

macro_rules! regex {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).unwrap());
    };
}

regex!(COMPLETED_RX, r"total time");
regex!(PARSING_RX, r"finished parsing automaton in ([\d.,]+)");
regex!(CONSTRUCTING_RX, r"finished constructing game in ([\d.,]+)");
regex!(SOLVING_RX, r"finished solving game in ([\d.,]+)");
regex!(POSTPROCESSING_RX, r"finished post processing in ([\d.,]+)");
regex!(MINIMISING_RX, r"finished bisimulation minimisation in ([\d.,]+)");
regex!(ENCODING_RX, r"finished encoding in ([\d.,]+)");
regex!(COMPRESSING_RX, r"finished compression in ([\d.,]+)");
regex!(DREWRITING_RX, r"finished drw.drf in ([\d.,]+)");
regex!(STATES_RX, r"automaton has (\d+) states");
regex!(GAME_RX, r"constructed game has (\d+) vertices and (\d+) edges");
regex!(TIME_RX, r"total time was ([\d.,]+)");
regex!(AIGSIZE_RX, r"final size of AIG: (\d+) gates");

const COLUMNS: [Column; 12] = [
    Column::integer("aigsize"),
    Column::float("parsing"),
    Column::float("constructing"),
    Column::float("solving"),
    Column::float("postprocessing"),
    Column::float("minimising"),
    Column::float("encoding"),
    Column::float("compressing"),
    Column::float("drewriting"),
    Column::integer("automaton_states"),
    Column::integer("game_vertices"),
    Column::integer("game_edges"),
];

/// The `knor -v` log grammar.
#[derive(Debug, Default, Clone, Copy)]
pub struct KnorLog;

impl LogFormat for KnorLog {
    fn parse_log(&self, contents: &str) -> Result<Option<Metrics>, FormatDriftError> {
        if !COMPLETED_RX.is_match(contents) {
            return Ok(None);
        }

        let seconds: [(&str, &LazyLock<Regex>); 9] = [
            ("parsing", &PARSING_RX),
            ("constructing", &CONSTRUCTING_RX),
            ("solving", &SOLVING_RX),
            ("postprocessing", &POSTPROCESSING_RX),
            ("minimising", &MINIMISING_RX),
            ("encoding", &ENCODING_RX),
            ("compressing", &COMPRESSING_RX),
            ("drewriting", &DREWRITING_RX),
            ("time", &TIME_RX),
        ];
        let counts: [(&str, &LazyLock<Regex>, usize); 4] = [
            ("automaton_states", &STATES_RX, 1),
            ("game_vertices", &GAME_RX, 1),
            ("game_edges", &GAME_RX, 2),
            ("aigsize", &AIGSIZE_RX, 1),
        ];

        let mut res = Metrics::new();
        for (key, re) in seconds {
            let value = capture_field::<f64>(re, 1, contents)?;
            res.insert(key.to_string(), value.unwrap_or_default());
        }
        for (key, re, group) in counts {
            let value = capture_field::<u64>(re, group, contents)?;
            res.insert(key.to_string(), value.unwrap_or_default() as f64);
        }
        Ok(Some(res))
    }

    fn get_text(&self, result: &Metrics) -> String {
        format!(
            "{:.6} sec; {} gates",
            metric(result, "time"),
            metric(result, "aigsize").round() as i64
        )
    }

    fn csv_columns(&self) -> &[Column] {
        &COLUMNS
    }
}

/// One step of a knor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Naive,
    Explicit,
    Sym,
    Bisim,
    Isop,
    Onehot,
    Zlk,
    Fpi,
    Fpj,
    Psi,
    Tl,
    Pp,
    Compress,
    Drewrite,
}

impl Toggle {
    pub fn label(self) -> &'static str {
        match self {
            Toggle::Naive => "naive",
            Toggle::Explicit => "explicit",
            Toggle::Sym => "sym",
            Toggle::Bisim => "bisim",
            Toggle::Isop => "isop",
            Toggle::Onehot => "onehot",
            Toggle::Zlk => "zlk",
            Toggle::Fpi => "fpi",
            Toggle::Fpj => "fpj",
            Toggle::Psi => "psi",
            Toggle::Tl => "tl",
            Toggle::Pp => "pp",
            Toggle::Compress => "compress",
            Toggle::Drewrite => "drewrite",
        }
    }

    pub fn flags(self) -> &'static [&'static str] {
        match self {
            Toggle::Naive => &["--naive", "--real"],
            Toggle::Explicit => &["--explicit", "--real"],
            Toggle::Sym => &["--sym"],
            Toggle::Bisim => &["--bisim"],
            Toggle::Isop => &["--isop"],
            Toggle::Onehot => &["--onehot"],
            Toggle::Zlk => &["--zlk"],
            Toggle::Fpi => &["--fpi"],
            Toggle::Fpj => &["--fpj"],
            Toggle::Psi => &["--psi"],
            Toggle::Tl => &["--tl"],
            Toggle::Pp => &["--npp"],
            Toggle::Compress => &["--compress"],
            Toggle::Drewrite => &["--drewrite"],
        }
    }

    /// Game solver selectors replace the solver tag instead of extending it.
    pub fn selects_solver(self) -> bool {
        matches!(
            self,
            Toggle::Sym | Toggle::Zlk | Toggle::Fpi | Toggle::Fpj | Toggle::Psi | Toggle::Tl | Toggle::Pp
        )
    }

    pub fn apply(self, builder: ExperimentBuilder) -> ExperimentBuilder {
        if self.selects_solver() {
            builder.select(self.label(), self.flags().iter().copied())
        } else {
            builder.toggle(self.label(), self.flags().iter().copied())
        }
    }
}

/// Build the knor experiment for `input`, applying `toggles` in order.
pub fn experiment(binary: &str, input: &InputFile, toggles: &[Toggle]) -> Experiment {
    let base = ExperimentBuilder::new(&input.name, Arc::new(KnorLog))
        .solver("std")
        .args([binary.to_string(), "-v".to_string(), input.path.display().to_string()]);
    toggles
        .iter()
        .fold(base, |builder, toggle| toggle.apply(builder))
        .build()
}

use Toggle::*;

/// Named configurations, in reporting order.
pub const CATALOG: &[(&str, &[Toggle])] = &[
    ("standard", &[]),
    ("naive", &[Naive]),
    ("explicit", &[Explicit]),
    ("sym", &[Sym]),
    ("zlk", &[Zlk]),
    ("fpi", &[Fpi]),
    ("fpj", &[Fpj]),
    ("pp", &[Pp]),
    ("psi", &[Psi]),
    ("onehot", &[Onehot]),
    ("sym-onehot", &[Sym, Onehot]),
    ("zlk-onehot", &[Zlk, Onehot]),
    ("fpi-onehot", &[Fpi, Onehot]),
    ("fpj-onehot", &[Fpj, Onehot]),
    ("pp-onehot", &[Pp, Onehot]),
    ("psi-onehot", &[Psi, Onehot]),
    ("bisim", &[Bisim]),
    ("isop", &[Isop]),
    ("isop-onehot", &[Isop, Onehot]),
    ("bisim-isop", &[Bisim, Isop]),
    ("bisim-onehot", &[Bisim, Onehot]),
    ("bisim-isop-onehot", &[Bisim, Isop, Onehot]),
    ("bisim-isop-compress", &[Bisim, Isop, Compress]),
    ("bisim-onehot-compress", &[Bisim, Onehot, Compress]),
    ("bisim-isop-onehot-compress", &[Bisim, Isop, Onehot, Compress]),
    ("bisim-isop-drewrite", &[Bisim, Isop, Drewrite]),
    ("bisim-onehot-drewrite", &[Bisim, Onehot, Drewrite]),
    ("bisim-isop-onehot-drewrite", &[Bisim, Isop, Onehot, Drewrite]),
    ("pp-bisim", &[Pp, Bisim]),
    ("fpj-bisim", &[Fpj, Bisim]),
    ("fpj-bisim-isop", &[Fpj, Bisim, Isop]),
    ("fpj-bisim-onehot", &[Fpj, Bisim, Onehot]),
    ("fpj-bisim-isop-onehot", &[Fpj, Bisim, Isop, Onehot]),
    ("fpj-bisim-isop-drewrite", &[Fpj, Bisim, Isop, Drewrite]),
    ("fpj-bisim-onehot-drewrite", &[Fpj, Bisim, Onehot, Drewrite]),
    ("fpj-bisim-isop-onehot-drewrite", &[Fpj, Bisim, Isop, Onehot, Drewrite]),
    ("fpj-bisim-isop-compress", &[Fpj, Bisim, Isop, Compress]),
    ("fpj-bisim-onehot-compress", &[Fpj, Bisim, Onehot, Compress]),
    ("fpj-bisim-isop-onehot-compress", &[Fpj, Bisim, Isop, Onehot, Compress]),
    ("sym-bisim", &[Sym, Bisim]),
    ("sym-bisim-isop", &[Sym, Bisim, Isop]),
    ("sym-bisim-onehot", &[Sym, Bisim, Onehot]),
    ("sym-bisim-isop-onehot", &[Sym, Bisim, Isop, Onehot]),
    ("sym-bisim-isop-drewrite", &[Sym, Bisim, Isop, Drewrite]),
    ("sym-bisim-onehot-drewrite", &[Sym, Bisim, Onehot, Drewrite]),
    ("sym-bisim-isop-onehot-drewrite", &[Sym, Bisim, Isop, Onehot, Drewrite]),
    ("sym-bisim-isop-compress", &[Sym, Bisim, Isop, Compress]),
    ("sym-bisim-onehot-compress", &[Sym, Bisim, Onehot, Compress]),
    ("sym-bisim-isop-onehot-compress", &[Sym, Bisim, Isop, Onehot, Compress]),
    ("psi-bisim", &[Psi, Bisim]),
    ("psi-bisim-isop", &[Psi, Bisim, Isop]),
    ("psi-bisim-onehot", &[Psi, Bisim, Onehot]),
    ("psi-bisim-isop-onehot", &[Psi, Bisim, Isop, Onehot]),
    ("psi-bisim-isop-drewrite", &[Psi, Bisim, Isop, Drewrite]),
    ("psi-bisim-onehot-drewrite", &[Psi, Bisim, Onehot, Drewrite]),
    ("psi-bisim-isop-onehot-drewrite", &[Psi, Bisim, Isop, Onehot, Drewrite]),
    ("psi-bisim-isop-compress", &[Psi, Bisim, Isop, Compress]),
    ("psi-bisim-onehot-compress", &[Psi, Bisim, Onehot, Compress]),
    ("psi-bisim-isop-onehot-compress", &[Psi, Bisim, Isop, Onehot, Compress]),
];

/// [`CATALOG`] as experiment factories for `binary`.
pub fn catalog(binary: &str) -> Vec<(&'static str, ExperimentFactory)> {
    CATALOG
        .iter()
        .map(|&(name, toggles)| {
            let binary = binary.to_string();
            let factory: ExperimentFactory =
                Arc::new(move |input: &InputFile| experiment(&binary, input, toggles));
            (name, factory)
        })
        .collect()
}

/// Entry point for the knor benchmark: every `.ehoa` file of a directory times the selected
/// configurations.
#[derive(Debug, Clone)]
pub struct KnorExperiments {
    directory: PathBuf,
    binary: String,
    solvers: Vec<String>,
}

impl KnorExperiments {
    /// All configurations of [`CATALOG`] when `solvers` is empty.
    pub fn new(directory: impl AsRef<Path>, solvers: Vec<String>) -> Self {
        KnorExperiments {
            directory: directory.as_ref().to_path_buf(),
            binary: DEFAULT_BINARY.to_string(),
            solvers,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// List the inputs and build the experiments.
    ///
    /// # Errors
    /// Fails if the directory is unreadable or a requested solver is unknown.
    pub fn discover(&self) -> anyhow::Result<SolverCollection> {
        let inputs = FileFinder::new(&self.directory, [EXTENSION]).discover()?;
        SolverCollection::new(&inputs, &catalog(&self.binary), &self.solvers)
    }
}

#[cfg(test)]
mod tests {
    use crate::collection::ExperimentCollection;

    use super::*;

    fn input() -> InputFile {
        InputFile {
            name: "arbiter".into(),
            path: "inputs/arbiter.ehoa".into(),
        }
    }

    #[test]
    fn parses_known_markers() {
        let log = "\
automaton has 12 states
finished parsing automaton in 0.25
constructed game has 100 vertices and 250 edges
final size of AIG: 42 gates
total time was 3.5
";
        let res = KnorLog.parse_log(log).unwrap().unwrap();
        assert_eq!(res["time"], 3.5);
        assert_eq!(res["aigsize"], 42.0);
        assert_eq!(res["parsing"], 0.25);
        assert_eq!(res["automaton_states"], 12.0);
        assert_eq!(res["game_vertices"], 100.0);
        assert_eq!(res["game_edges"], 250.0);
        assert_eq!(res["solving"], 0.0);
        assert_eq!(res["drewriting"], 0.0);
        assert_eq!(res.len(), 13);
    }

    #[test]
    fn missing_completion_marker_means_no_result() {
        let log = "finished parsing automaton in 0.25\nfinal size of AIG: 42 gates\n";
        assert_eq!(KnorLog.parse_log(log), Ok(None));
        assert_eq!(KnorLog.parse_log(""), Ok(None));
    }

    #[test]
    fn garbled_value_is_drift() {
        let log = "finished solving game in 1.2.3\ntotal time was 4\n";
        let err = KnorLog.parse_log(log).unwrap_err();
        assert_eq!(err.value, "1.2.3");
    }

    #[test]
    fn summary_text() {
        let res = Metrics::from([("time".to_string(), 3.5), ("aigsize".to_string(), 42.0)]);
        assert_eq!(KnorLog.get_text(&res), "3.500000 sec; 42 gates");
    }

    #[test]
    fn toggles_build_names_tags_and_flags() {
        let e = experiment("bin/knor", &input(), &[Sym, Bisim, Isop]);
        assert_eq!(e.name(), "arbiter-sym-bisim-isop");
        assert_eq!(e.solver(), "sym-bisim-isop");
        assert_eq!(
            e.build_command(),
            ["bin/knor", "-v", "inputs/arbiter.ehoa", "--sym", "--bisim", "--isop"]
        );

        let e = experiment("bin/knor", &input(), &[Bisim, Onehot]);
        assert_eq!(e.solver(), "std-bisim-onehot");

        let e = experiment("bin/knor", &input(), &[Naive]);
        assert_eq!(e.build_command()[3..], ["--naive", "--real"]);

        let e = experiment("bin/knor", &input(), &[Pp]);
        assert_eq!(e.solver(), "pp");
        assert_eq!(e.build_command()[3..], ["--npp"]);
    }

    #[test]
    fn catalog_names_are_unique_per_input() {
        let collection = SolverCollection::new(&[input()], &catalog("bin/knor"), &[]).unwrap();
        let mut names = collection.experiments().map(|e| e.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names.len(), CATALOG.len());
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn discover_uses_ehoa_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ehoa"), "").unwrap();
        std::fs::write(dir.path().join("b.pg"), "").unwrap();

        let collection = KnorExperiments::new(dir.path(), vec!["standard".into(), "sym".into()])
            .with_binary("/opt/knor")
            .discover()
            .unwrap();
        let names = collection.experiments().map(|e| e.name()).collect::<Vec<_>>();
        assert_eq!(names, ["a", "a-sym"]);
        assert_eq!(collection.groups()[0].experiments[0].build_command()[0], "/opt/knor");
    }
}
