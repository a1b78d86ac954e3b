use chrono::NaiveDate;
use serde_json::{Value, json};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stockflow_batch::{
    BatchError, BatchRunner, BatchRunnerConfig, BatchTask, Checkpoint, CheckpointStore,
    RetryPolicy, RunOptions, RunStatus, TaskContext, TaskRegistry, TaskResult,
};
use stockflow_engine::StaticForecastProvider;
use stockflow_store::{FreshnessCache, MemoryFreshnessCache, MemoryRecordStore, cache_keys};
use tempfile::TempDir;

fn today() -> NaiveDate {
    "2026-08-26".parse().expect("date should parse")
}

fn context() -> TaskContext {
    TaskContext {
        store: Arc::new(MemoryRecordStore::new()),
        cache: Arc::new(MemoryFreshnessCache::new()),
        provider: Arc::new(StaticForecastProvider::new()),
        today: today(),
        horizon_days: 30,
        cache_ttl_seconds: 86_400,
    }
}

fn fast_config() -> BatchRunnerConfig {
    BatchRunnerConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 4,
        },
        ..BatchRunnerConfig::default()
    }
}

struct Probe {
    name: &'static str,
    dependencies: Vec<&'static str>,
    calls: Arc<AtomicU32>,
    fail: Arc<AtomicBool>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl BatchTask for Probe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn dependencies(&self) -> &[&'static str] {
        &self.dependencies
    }

    async fn execute(&self, _context: &TaskContext) -> Result<Value, BatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .expect("log mutex should lock")
            .push(self.name.to_string());
        if self.fail.load(Ordering::SeqCst) {
            Err(BatchError::TaskExecution(format!(
                "{} induced failure",
                self.name
            )))
        } else {
            Ok(json!({ "task": self.name }))
        }
    }
}

struct ProbeSet {
    calls: Vec<(&'static str, Arc<AtomicU32>)>,
    fails: Vec<(&'static str, Arc<AtomicBool>)>,
}

impl ProbeSet {
    fn registry(tasks: &[(&'static str, &[&'static str])]) -> (TaskRegistry, ProbeSet) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TaskRegistry::new();
        let mut calls = Vec::new();
        let mut fails = Vec::new();
        for (name, dependencies) in tasks {
            let call_counter = Arc::new(AtomicU32::new(0));
            let fail_flag = Arc::new(AtomicBool::new(false));
            registry
                .register(Arc::new(Probe {
                    name,
                    dependencies: dependencies.to_vec(),
                    calls: call_counter.clone(),
                    fail: fail_flag.clone(),
                    log: log.clone(),
                }))
                .expect("register should succeed");
            calls.push((*name, call_counter));
            fails.push((*name, fail_flag));
        }
        (registry, ProbeSet { calls, fails })
    }

    fn calls(&self, name: &str) -> u32 {
        self.calls
            .iter()
            .find(|(task, _)| *task == name)
            .expect("probe should exist")
            .1
            .load(Ordering::SeqCst)
    }

    fn set_failing(&self, name: &str, failing: bool) {
        self.fails
            .iter()
            .find(|(task, _)| *task == name)
            .expect("probe should exist")
            .1
            .store(failing, Ordering::SeqCst);
    }
}

fn nightly_plan() -> [(&'static str, &'static [&'static str]); 5] {
    [
        ("ingest", &[]),
        ("derive", &["ingest"]),
        ("report", &["derive"]),
        ("score", &["ingest"]),
        ("sweep", &[]),
    ]
}

/// Writes a checkpoint as a crashed process would have left it: two steps
/// completed, no terminal status.
fn crashed_checkpoint(store: &CheckpointStore, run_id: &str) {
    let mut checkpoint = Checkpoint::new(run_id.to_string());
    for task in ["ingest", "derive"] {
        checkpoint.mark_completed(&TaskResult::success(
            task,
            1,
            Duration::from_millis(5),
            json!({ "task": task }),
        ));
    }
    store.save(&checkpoint).expect("checkpoint should save");
}

#[tokio::test(flavor = "current_thread")]
async fn resume_after_crash_expected_completed_steps_not_reexecuted() {
    let (registry, probes) = ProbeSet::registry(&nightly_plan());
    let temp = TempDir::new().expect("temp dir should be created");
    let checkpoints = CheckpointStore::in_dir(temp.path());
    crashed_checkpoint(&checkpoints, "run-1");

    let runner = BatchRunner::new(registry, context(), checkpoints.clone(), fast_config());
    let report = runner
        .run(RunOptions {
            run_id: "run-1".to_string(),
            force_resume: false,
        })
        .await
        .expect("run should finish");

    assert_eq!(report.status, RunStatus::Success);
    assert!(report.resumed);
    assert_eq!(probes.calls("ingest"), 0);
    assert_eq!(probes.calls("derive"), 0);
    assert_eq!(probes.calls("report"), 1);
    assert_eq!(probes.calls("score"), 1);
    assert_eq!(probes.calls("sweep"), 1);

    // Reused steps still appear in the report, carrying their recorded payload.
    let reused = report
        .task_results
        .iter()
        .find(|result| result.task == "ingest")
        .expect("reused step should be reported");
    assert!(reused.is_success());
    assert_eq!(reused.payload["task"], "ingest");

    let terminal = checkpoints.load().expect("checkpoint should load");
    assert_eq!(terminal.terminal_status.as_deref(), Some("success"));
}

#[tokio::test(flavor = "current_thread")]
async fn resume_mid_parallel_expected_finished_leaf_not_reexecuted() {
    let (registry, probes) = ProbeSet::registry(&nightly_plan());
    let temp = TempDir::new().expect("temp dir should be created");
    let checkpoints = CheckpointStore::in_dir(temp.path());

    // Crashed mid-parallel-phase: the sequential chain and one leaf finished.
    let mut checkpoint = Checkpoint::new("run-1".to_string());
    for task in ["ingest", "derive", "score"] {
        checkpoint.mark_completed(&TaskResult::success(
            task,
            1,
            Duration::from_millis(5),
            json!({ "task": task }),
        ));
    }
    checkpoints.save(&checkpoint).expect("checkpoint should save");

    let runner = BatchRunner::new(registry, context(), checkpoints.clone(), fast_config());
    let report = runner
        .run(RunOptions {
            run_id: "run-1".to_string(),
            force_resume: false,
        })
        .await
        .expect("run should finish");

    assert_eq!(report.status, RunStatus::Success);
    assert!(report.resumed);
    // Only the unfinished leaves execute.
    assert_eq!(probes.calls("ingest"), 0);
    assert_eq!(probes.calls("derive"), 0);
    assert_eq!(probes.calls("score"), 0);
    assert_eq!(probes.calls("report"), 1);
    assert_eq!(probes.calls("sweep"), 1);

    let reused = report
        .task_results
        .iter()
        .find(|result| result.task == "score")
        .expect("finished leaf should still be reported");
    assert!(reused.is_success());
    assert_eq!(reused.payload["task"], "score");
}

#[tokio::test(flavor = "current_thread")]
async fn force_resume_adopts_checkpoint_run_id() {
    let (registry, _probes) = ProbeSet::registry(&nightly_plan());
    let temp = TempDir::new().expect("temp dir should be created");
    let checkpoints = CheckpointStore::in_dir(temp.path());
    crashed_checkpoint(&checkpoints, "run-from-last-night");

    let runner = BatchRunner::new(registry, context(), checkpoints, fast_config());
    let report = runner
        .run(RunOptions {
            run_id: "ignored".to_string(),
            force_resume: true,
        })
        .await
        .expect("run should finish");

    assert!(report.resumed);
    assert_eq!(report.run_id, "run-from-last-night");
}

#[tokio::test(flavor = "current_thread")]
async fn force_resume_without_checkpoint_expected_no_usable_checkpoint() {
    let (registry, _probes) = ProbeSet::registry(&nightly_plan());
    let temp = TempDir::new().expect("temp dir should be created");
    let runner = BatchRunner::new(
        registry,
        context(),
        CheckpointStore::in_dir(temp.path()),
        fast_config(),
    );

    let error = runner
        .run(RunOptions {
            run_id: "run-1".to_string(),
            force_resume: true,
        })
        .await
        .expect_err("resume should fail");
    assert!(matches!(error, BatchError::NoUsableCheckpoint));
}

#[tokio::test(flavor = "current_thread")]
async fn force_resume_on_terminal_checkpoint_expected_no_usable_checkpoint() {
    let (registry, probes) = ProbeSet::registry(&nightly_plan());
    let temp = TempDir::new().expect("temp dir should be created");
    let checkpoints = CheckpointStore::in_dir(temp.path());

    // Finish a run normally, leaving a terminal checkpoint behind.
    let runner = BatchRunner::new(registry, context(), checkpoints.clone(), fast_config());
    runner
        .run(RunOptions {
            run_id: "run-1".to_string(),
            force_resume: false,
        })
        .await
        .expect("run should finish");
    assert_eq!(probes.calls("ingest"), 1);

    let error = runner
        .run(RunOptions {
            run_id: "run-1".to_string(),
            force_resume: true,
        })
        .await
        .expect_err("terminal checkpoint should not resume");
    assert!(matches!(error, BatchError::NoUsableCheckpoint));
}

#[tokio::test(flavor = "current_thread")]
async fn fresh_run_over_terminal_checkpoint_expected_full_reexecution() {
    let (registry, probes) = ProbeSet::registry(&nightly_plan());
    let temp = TempDir::new().expect("temp dir should be created");
    let checkpoints = CheckpointStore::in_dir(temp.path());
    let runner = BatchRunner::new(registry, context(), checkpoints, fast_config());

    for _ in 0..2 {
        let report = runner
            .run(RunOptions {
                run_id: "run-1".to_string(),
                force_resume: false,
            })
            .await
            .expect("run should finish");
        assert_eq!(report.status, RunStatus::Success);
    }

    // The second run found only a terminal checkpoint and started over.
    assert_eq!(probes.calls("ingest"), 2);
    assert_eq!(probes.calls("sweep"), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn corrupt_checkpoint_expected_fresh_run_not_abort() {
    let (registry, probes) = ProbeSet::registry(&nightly_plan());
    let temp = TempDir::new().expect("temp dir should be created");
    let checkpoints = CheckpointStore::in_dir(temp.path());
    fs::write(checkpoints.path(), b"not a checkpoint").expect("write should succeed");

    let runner = BatchRunner::new(registry, context(), checkpoints, fast_config());
    let report = runner
        .run(RunOptions {
            run_id: "run-1".to_string(),
            force_resume: false,
        })
        .await
        .expect("run should finish");

    assert_eq!(report.status, RunStatus::Success);
    assert!(!report.resumed);
    assert_eq!(probes.calls("ingest"), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_run_expected_previous_cache_entries_untouched() {
    let (registry, probes) = ProbeSet::registry(&nightly_plan());
    probes.set_failing("ingest", true);

    let context = context();
    context
        .cache
        .put(&cache_keys::last_run(), json!({ "run_id": "yesterday" }), 60)
        .await
        .expect("put should succeed");

    let temp = TempDir::new().expect("temp dir should be created");
    let runner = BatchRunner::new(
        registry,
        context.clone(),
        CheckpointStore::in_dir(temp.path()),
        fast_config(),
    );
    let report = runner
        .run(RunOptions {
            run_id: "run-1".to_string(),
            force_resume: false,
        })
        .await
        .expect("run should finish");

    assert_eq!(report.status, RunStatus::Failed);
    // Yesterday's summary is still served, stale or not.
    let reading = context
        .cache
        .get(&cache_keys::last_run())
        .await
        .expect("cache get should succeed")
        .expect("entry should still exist");
    assert_eq!(reading.value["run_id"], "yesterday");
}

#[tokio::test(flavor = "current_thread")]
async fn retry_succeeds_after_transient_failures_expected_attempts_recorded() {
    struct FlakyOnce {
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl BatchTask for FlakyOnce {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn execute(&self, _context: &TaskContext) -> Result<Value, BatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < 3 {
                Err(BatchError::TaskExecution(format!("transient {call}")))
            } else {
                Ok(json!({ "call": call }))
            }
        }
    }

    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = TaskRegistry::new();
    registry
        .register(Arc::new(FlakyOnce { calls: calls.clone() }))
        .expect("register should succeed");

    let temp = TempDir::new().expect("temp dir should be created");
    let runner = BatchRunner::new(
        registry,
        context(),
        CheckpointStore::in_dir(temp.path()),
        BatchRunnerConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 4,
            },
            ..BatchRunnerConfig::default()
        },
    );

    let report = runner
        .run(RunOptions {
            run_id: "run-1".to_string(),
            force_resume: false,
        })
        .await
        .expect("run should finish");

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.task_results[0].attempts, 3);
}
