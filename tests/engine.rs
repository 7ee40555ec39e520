use std::{path::PathBuf, sync::Arc, time::Duration};

use solver_bench::{
    cache::{CacheCorruptError, ResultCache},
    collection::{ExperimentFactory, FileFinder, InputFile, SolverCollection},
    experiment::{ExperimentBuilder, FormatDriftError, Metrics},
    knor::KnorLog,
    outcome::Outcome,
    prelude::*,
    run_log::{RunLog, NO_RESULT},
};
use tempfile::TempDir;

/// Fake solver: behaves according to the contents of its input file.
const SOLVER: &str = r#"
case "$(cat "$1")" in
  slow) exec sleep 5 ;;
  fail) echo "segmentation fault" >&2; exit 3 ;;
  silent) echo "nothing to report" ;;
  drift) echo "total time was 1,5" ;;
  *)
    echo "automaton has 12 states"
    echo "finished solving game in 0.5"
    echo "final size of AIG: 42 gates"
    echo "total time was 1.5"
    ;;
esac
"#;

fn init_test_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(true)
        .with_test_writer()
        .try_init();
}

struct Bench {
    dir: TempDir,
}

impl Bench {
    fn new() -> Bench {
        init_test_logger();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inputs")).unwrap();
        std::fs::write(dir.path().join("solver.sh"), SOLVER).unwrap();
        Bench { dir }
    }

    fn input(&self, name: &str, behavior: &str) -> &Self {
        let path = self.dir.path().join("inputs").join(format!("{name}.ehoa"));
        std::fs::write(path, behavior).unwrap();
        self
    }

    fn cache_file(&self) -> PathBuf {
        self.dir.path().join("cache.json")
    }

    fn logs(&self) -> RunLog {
        RunLog::new(self.dir.path().join("logs"))
    }

    /// Two configurations per input: `std` and `std-fast`.
    fn collection(&self) -> SolverCollection {
        let script = self.dir.path().join("solver.sh").display().to_string();
        let base = move |input: &InputFile| {
            ExperimentBuilder::new(&input.name, Arc::new(KnorLog)).args([
                "/bin/sh".to_string(),
                script.clone(),
                input.path.display().to_string(),
            ])
        };
        let base = Arc::new(base);
        let std_factory: ExperimentFactory = {
            let base = base.clone();
            Arc::new(move |input: &InputFile| base(input).build())
        };
        let fast_factory: ExperimentFactory =
            Arc::new(move |input: &InputFile| base(input).toggle("fast", ["--fast"]).build());

        let inputs = FileFinder::new(self.dir.path().join("inputs"), ["ehoa"])
            .discover()
            .unwrap();
        SolverCollection::new(&inputs, &[("std", std_factory), ("fast", fast_factory)], &[])
            .unwrap()
    }

    fn config(&self, timeout: Duration) -> Configuration {
        Configuration::new()
            .with_cache_file(self.cache_file())
            .with_log_dir(self.dir.path().join("logs"))
            .with_timeout(timeout)
            .with_verbose(false)
    }

    fn engine(&self, timeout: Duration) -> ExperimentEngine {
        ExperimentEngine::new(self.config(timeout)).with_collection(self.collection())
    }

    /// A configuration whose binary does not exist, followed by the working `std` one.
    fn collection_with_missing_binary(&self) -> SolverCollection {
        let script = self.dir.path().join("solver.sh").display().to_string();
        let missing: ExperimentFactory = Arc::new(|input: &InputFile| {
            ExperimentBuilder::new(&input.name, Arc::new(KnorLog))
                .args(["/definitely/not/a/solver".to_string(), input.path.display().to_string()])
                .toggle("missing", Vec::<String>::new())
                .build()
        });
        let std_factory: ExperimentFactory = Arc::new(move |input: &InputFile| {
            ExperimentBuilder::new(&input.name, Arc::new(KnorLog))
                .args([
                    "/bin/sh".to_string(),
                    script.clone(),
                    input.path.display().to_string(),
                ])
                .build()
        });

        let inputs = FileFinder::new(self.dir.path().join("inputs"), ["ehoa"])
            .discover()
            .unwrap();
        SolverCollection::new(&inputs, &[("missing", missing), ("std", std_factory)], &[]).unwrap()
    }
}

fn done(time: f64) -> Outcome {
    Outcome::Done(Metrics::from([
        ("time".to_string(), time),
        ("aigsize".to_string(), 42.0),
    ]))
}

#[test]
fn run_records_every_kind_of_outcome() {
    let bench = Bench::new();
    bench.input("a", "ok").input("b", "fail").input("c", "silent");

    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(2, false).unwrap();
    assert_eq!(engine.len(), 6);
    assert_eq!(engine.todo(2).len(), 12);

    let summary = engine.run(2, None).unwrap();
    assert_eq!(summary.done, 4);
    assert_eq!(summary.errors, 8);
    assert_eq!(summary.timeouts, 0);

    let cache = engine.cache();
    match cache.get(1, "a-fast") {
        Some(Outcome::Done(metrics)) => {
            assert_eq!(metrics["time"], 1.5);
            assert_eq!(metrics["solving"], 0.5);
            assert_eq!(metrics["aigsize"], 42.0);
            assert_eq!(metrics["automaton_states"], 12.0);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(cache.get(0, "b"), Some(&Outcome::Error("exit status: 3".into())));
    assert_eq!(cache.get(0, "c-fast"), Some(&Outcome::Error(NO_RESULT.into())));

    let log = std::fs::read_to_string(bench.logs().log_path("b", 0)).unwrap();
    assert!(log.contains("segmentation fault"));
}

#[test]
fn saved_outcomes_are_not_run_again() {
    let bench = Bench::new();
    bench.input("a", "ok").input("b", "fail");

    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(2, false).unwrap();
    engine.run(2, None).unwrap();
    engine.save_cache(false).unwrap();

    let saved = ResultCache::load(&bench.cache_file()).unwrap();
    assert_eq!(&saved, engine.cache());

    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(2, false).unwrap();
    assert!(engine.todo(2).is_empty());
    assert_eq!(engine.run(2, None).unwrap().total(), 0);

    // a third iteration only asks for the new pairs
    let todo = engine.todo(3);
    assert_eq!(todo.len(), 4);
    assert!(todo.iter().all(|item| item.iteration == 2));
    assert_eq!(todo[0].to_string(), "a (iteration 2)");
}

#[test]
fn unsaved_runs_are_recovered_from_logs() {
    let bench = Bench::new();
    bench.input("a", "ok").input("b", "silent");

    let mut first = bench.engine(Duration::from_secs(10));
    first.initialize(1, false).unwrap();
    first.run(1, None).unwrap();
    // interrupted before the cache was saved
    assert!(!bench.cache_file().exists());

    let mut second = bench.engine(Duration::from_secs(10));
    second.initialize(1, false).unwrap();
    assert!(second.todo(1).is_empty());
    assert_eq!(second.cache(), first.cache());
}

#[test]
fn group_restricts_the_run() {
    let bench = Bench::new();
    bench.input("a", "ok").input("b", "ok");

    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(1, false).unwrap();
    assert_eq!(engine.groups(), ["a", "b"]);

    let summary = engine.run(1, Some("b")).unwrap();
    assert_eq!(summary.done, 2);
    let todo = engine.todo(1);
    assert_eq!(todo.len(), 2);
    assert!(todo.iter().all(|item| item.experiment.group() == "a"));

    assert!(engine.run(1, Some("nope")).is_err());
}

#[test]
fn timeouts_are_rerun_only_for_a_larger_bound() {
    let bench = Bench::new();
    bench.input("slow", "slow");

    let mut engine = bench.engine(Duration::from_millis(200));
    engine.initialize(1, false).unwrap();
    let summary = engine.run(1, None).unwrap();
    assert_eq!(summary.timeouts, 2);
    assert_eq!(engine.cache().get(0, "slow"), Some(&Outcome::Timeout(0.2)));
    assert_eq!(engine.save_cache(true).unwrap(), 0);

    // same bound: nothing to do
    let mut engine = bench.engine(Duration::from_millis(200));
    engine.initialize(1, false).unwrap();
    assert_eq!(engine.save_cache(true).unwrap(), 0);
    assert!(engine.todo(1).is_empty());

    // larger bound: both pairs are reset, with their logs
    let mut engine = bench.engine(Duration::from_millis(500));
    engine.initialize(1, false).unwrap();
    assert_eq!(engine.save_cache(true).unwrap(), 2);
    assert_eq!(engine.todo(1).len(), 2);
    assert!(!bench.logs().log_path("slow", 0).exists());

    let mut engine = bench.engine(Duration::from_millis(500));
    engine.initialize(1, false).unwrap();
    assert_eq!(engine.todo(1).len(), 2);
}

#[test]
fn refresh_counts_remaining_and_rerun() {
    let bench = Bench::new();
    bench.input("a", "ok").input("slow", "slow");

    let mut engine = bench.engine(Duration::from_millis(200));
    engine.initialize(1, false).unwrap();
    engine.run(1, Some("slow")).unwrap();

    engine.set_timeout(Duration::from_secs(1));
    let summary = engine.refresh(1, true).unwrap();
    assert_eq!(summary.remaining, 2);
    assert_eq!(summary.rerun, 2);
    assert_eq!(engine.todo(1).len(), 4);
}

#[test]
fn clean_forgets_errors_only() {
    let bench = Bench::new();
    bench.input("a", "ok").input("b", "fail");

    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(1, false).unwrap();
    engine.run(1, None).unwrap();
    assert_eq!(engine.clean().unwrap(), 2);

    assert!(engine.cache().get(0, "a").unwrap().is_done());
    assert!(engine.cache().get(0, "b").is_none());
    assert!(!bench.logs().log_path("b", 0).exists());

    // the purge is persisted and the logs do not bring the errors back
    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(1, false).unwrap();
    let todo = engine.todo(1);
    assert_eq!(todo.len(), 2);
    assert!(todo.iter().all(|item| item.experiment.group() == "b"));
}

#[test]
fn csv_reports_done_and_timeout_rows() {
    let bench = Bench::new();
    bench.input("g", "ok").input("h", "fail");

    let mut cache = ResultCache::new();
    cache.merge(0, "g", Outcome::Timeout(120.0));
    cache.merge(0, "g-fast", done(1.5));
    cache.merge(0, "h", Outcome::Error("exit status: 3".into()));
    cache.save(&bench.cache_file()).unwrap();

    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(1, false).unwrap();
    let mut out = Vec::new();
    engine.csv(1, &mut out).unwrap();

    let csv = String::from_utf8(out).unwrap();
    let lines = csv.lines().collect::<Vec<_>>();
    assert_eq!(
        lines,
        [
            "g; std; 120.000000; 0; 0; 0; 0; 0; 0; 0; 0; 0; 0; 0; 0; 0",
            "g; std-fast; 1.500000; 1; 42; 0.000000; 0.000000; 0.000000; 0.000000; 0.000000; \
             0.000000; 0.000000; 0.000000; 0; 0; 0",
        ]
    );
}

#[test]
fn csv_requires_time() {
    let bench = Bench::new();
    bench.input("g", "ok");

    let mut cache = ResultCache::new();
    cache.merge(0, "g", done(1.5));
    cache.merge(0, "g-fast", Outcome::Done(Metrics::new()));
    cache.save(&bench.cache_file()).unwrap();

    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(1, false).unwrap();
    let mut out = Vec::new();
    assert!(engine.csv(1, &mut out).is_err());
    // no truncated export next to the error
    assert!(out.is_empty());
}

#[test]
fn report_shows_means_and_missing_results() {
    let bench = Bench::new();
    bench.input("g", "ok");

    let mut cache = ResultCache::new();
    cache.merge(0, "g", done(1.0));
    cache.merge(1, "g", done(2.0));
    cache.save(&bench.cache_file()).unwrap();

    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(2, false).unwrap();

    let summaries = engine.summaries(2, None);
    assert_eq!(summaries[0].done, 2);
    assert_eq!(summaries[0].mean.as_ref().unwrap()["time"], 1.5);
    assert!(summaries[1].mean.is_none());

    let mut out = Vec::new();
    engine.report(2, Some("g"), &mut out).unwrap();
    let report = String::from_utf8(out).unwrap();
    assert!(report.starts_with("g\n"));
    assert!(report.contains("1.500000 sec; 42 gates (2/2 done)"));
    assert!(report.contains("not yet available (0/2 done)"));
}

#[test]
fn rebuild_never_drops_cached_measurements() {
    let bench = Bench::new();
    bench.input("a", "ok").input("b", "ok");

    // "b" has a log, "a" and "retired" only exist in the cache
    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(1, false).unwrap();
    engine.run(1, Some("b")).unwrap();

    let mut cache = ResultCache::new();
    cache.merge(0, "retired", done(3.0));
    cache.merge(0, "a", done(9.0));
    cache.merge(0, "a-fast", Outcome::Timeout(60.0));
    cache.merge(0, "b", done(7.0));
    cache.save(&bench.cache_file()).unwrap();

    let mut engine = bench.engine(Duration::from_secs(10));
    let summary = engine.refresh(1, false).unwrap();
    assert_eq!(summary.unlogged, 2);
    assert_eq!(summary.remaining, 0);

    assert_eq!(engine.cache().get(0, "a"), Some(&done(9.0)));
    assert_eq!(engine.cache().get(0, "a-fast"), Some(&Outcome::Timeout(60.0)));
    assert_eq!(engine.cache().get(0, "retired"), Some(&done(3.0)));
    // the log wins over the cached value
    assert!(matches!(
        engine.cache().get(0, "b"),
        Some(Outcome::Done(metrics)) if metrics["time"] == 1.5
    ));

    let saved = ResultCache::load(&bench.cache_file()).unwrap();
    assert_eq!(&saved, engine.cache());
}

#[test]
fn launch_failure_is_recorded_and_the_run_goes_on() {
    let bench = Bench::new();
    bench.input("a", "ok");

    let mut engine = ExperimentEngine::new(bench.config(Duration::from_secs(10)))
        .with_collection(bench.collection_with_missing_binary());
    engine.initialize(1, false).unwrap();
    assert_eq!(engine.todo(1)[0].experiment.name(), "a-missing");

    let summary = engine.run(1, None).unwrap();
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.done, 1);
    match engine.cache().get(0, "a-missing") {
        Some(Outcome::Error(descriptor)) => assert!(descriptor.contains("not found")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(engine.cache().get(0, "a").unwrap().is_done());

    // the error marker lets a fresh engine recover the failure
    let failed = engine.experiments()[0].clone();
    assert!(bench.logs().recover(&failed, 0).unwrap().unwrap().is_error());
    let mut engine = ExperimentEngine::new(bench.config(Duration::from_secs(10)))
        .with_collection(bench.collection_with_missing_binary());
    engine.initialize(1, false).unwrap();
    assert!(engine.todo(1).is_empty());
}

#[test]
fn containment_failure_falls_back_when_allowed() {
    let bench = Bench::new();
    bench.input("a", "ok");
    let config = bench
        .config(Duration::from_secs(10))
        .with_memory_limit(256)
        .with_allow_uncontained(true);

    let mut engine = ExperimentEngine::new(config).with_collection(bench.collection());
    engine.initialize(1, false).unwrap();
    // contained or not, the solver runs
    assert_eq!(engine.run(1, None).unwrap().done, 2);
}

#[test]
fn containment_failure_is_an_error_otherwise() {
    let bench = Bench::new();
    bench.input("a", "ok");
    let config = bench.config(Duration::from_secs(10)).with_memory_limit(256);

    let mut engine = ExperimentEngine::new(config).with_collection(bench.collection());
    engine.initialize(1, false).unwrap();
    engine.run(1, None).unwrap();
    match engine.cache().get(0, "a") {
        Some(Outcome::Done(_)) => {} // cgroup v2 is delegated on this machine
        Some(Outcome::Error(descriptor)) => assert!(descriptor.contains("cgroup")),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn corrupt_cache_is_fatal() {
    let bench = Bench::new();
    bench.input("a", "ok");
    std::fs::write(bench.cache_file(), "{ not a cache").unwrap();

    let mut engine = bench.engine(Duration::from_secs(10));
    let err = engine.initialize(1, false).unwrap_err();
    assert!(err.downcast_ref::<CacheCorruptError>().is_some());
    // the file is left for inspection
    assert_eq!(
        std::fs::read_to_string(bench.cache_file()).unwrap(),
        "{ not a cache"
    );
}

#[test]
fn format_drift_stops_the_run() {
    let bench = Bench::new();
    bench.input("a", "drift");

    let mut engine = bench.engine(Duration::from_secs(10));
    engine.initialize(1, false).unwrap();
    let err = engine.run(1, None).unwrap_err();
    assert!(err.downcast_ref::<FormatDriftError>().is_some());
}
