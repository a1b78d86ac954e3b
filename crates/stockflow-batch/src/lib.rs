//! Nightly batch orchestrator for the stockflow replenishment core.
//!
//! A static registry of typed tasks is resolved into an execution plan
//! (sequential dependency chain plus a bounded-concurrency parallel phase),
//! driven with per-task retry and timeout, checkpointed after every completed
//! step, and finished with a freshness-cache warm-up on full success.

pub mod checkpoint;
pub mod errors;
pub mod graph;
pub mod retry;
pub mod runner;
pub mod task;
pub mod tasks;

pub use checkpoint::{CHECKPOINT_FILE_NAME, Checkpoint, CheckpointStore, CompletedStep};
pub use errors::BatchError;
pub use graph::ExecutionPlan;
pub use retry::{RetryPolicy, TaskRunner, delay_for_attempt_ms};
pub use runner::{BatchRunner, BatchRunnerConfig, RunOptions, RunReport, RunStatus};
pub use task::{BatchTask, SharedBatchTask, TaskContext, TaskOutcome, TaskRegistry, TaskResult};
pub use tasks::{
    AggregateKpisTask, ClassifyAlertsTask, DormantStockTask, ForecastSnapshotTask,
    MonitorAccuracyTask, nightly_registry,
};
