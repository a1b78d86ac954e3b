use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::errors::BatchError;
use crate::graph::ExecutionPlan;
use crate::retry::{RetryPolicy, TaskRunner};
use crate::task::{TaskContext, TaskRegistry, TaskResult};
use futures::StreamExt;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use stockflow_store::{RunId, cache_keys};
use tokio::time::Instant;

/// Tuning for one orchestrator instance. Defaults fit a nightly window.
#[derive(Clone, Debug)]
pub struct BatchRunnerConfig {
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
    pub parallel_limit: usize,
    /// Soft deadline for the whole run; exceeding it is logged and flagged on
    /// the report, never aborted mid-task.
    pub run_deadline: Option<Duration>,
}

impl Default for BatchRunnerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(600),
            parallel_limit: 4,
            run_deadline: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub run_id: RunId,
    /// Require an existing non-terminal checkpoint and continue it, adopting
    /// its run id. Without this flag a matching checkpoint is still picked up
    /// automatically, but a missing one just means a fresh run.
    pub force_resume: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Every task in the plan completed.
    Success,
    /// Some tasks failed but independent work still ran.
    Partial,
    /// A failed step blocked the rest of the plan.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub resumed: bool,
    pub task_results: Vec<TaskResult>,
    pub duration: Duration,
    pub deadline_exceeded: bool,
    pub failure_reason: Option<String>,
}

/// Drives one nightly run: resolve the plan, execute the sequential chain
/// with a checkpoint after every completed step, fan the leaves out
/// concurrently, and warm the freshness cache once everything succeeded.
pub struct BatchRunner {
    registry: TaskRegistry,
    context: TaskContext,
    checkpoints: CheckpointStore,
    task_runner: TaskRunner,
    parallel_limit: usize,
    run_deadline: Option<Duration>,
}

impl BatchRunner {
    pub fn new(
        registry: TaskRegistry,
        context: TaskContext,
        checkpoints: CheckpointStore,
        config: BatchRunnerConfig,
    ) -> Self {
        Self {
            registry,
            context,
            checkpoints,
            task_runner: TaskRunner::new(config.retry, config.attempt_timeout),
            parallel_limit: config.parallel_limit.max(1),
            run_deadline: config.run_deadline,
        }
    }

    pub async fn run(&self, options: RunOptions) -> Result<RunReport, BatchError> {
        // Plan problems are configuration errors; fail before touching state.
        let plan = ExecutionPlan::resolve(&self.registry)?;
        let started = Instant::now();

        let (mut checkpoint, resumed) = self.open_checkpoint(&options)?;
        let run_id = checkpoint.run_id.clone();
        tracing::info!(
            run_id = %run_id,
            resumed,
            sequential = plan.sequential.len(),
            parallel = plan.parallel.len(),
            "starting batch run"
        );

        let mut results: Vec<TaskResult> = Vec::new();
        let mut failed_step: Option<String> = None;

        for name in &plan.sequential {
            if let Some(step) = checkpoint.completed.get(name) {
                tracing::info!(run_id = %run_id, task = %name, "step already checkpointed, skipping");
                results.push(TaskResult::success(
                    name,
                    step.attempts,
                    Duration::from_millis(step.duration_ms),
                    step.payload.clone(),
                ));
                continue;
            }
            let task = self
                .registry
                .get(name)
                .ok_or_else(|| BatchError::UnknownTask(name.clone()))?;
            let result = self.task_runner.run(task, &self.context).await;
            self.context
                .store
                .append_task_result(result.to_record(&run_id))
                .await?;

            if result.is_success() {
                checkpoint.mark_completed(&result);
                self.checkpoints.save(&checkpoint)?;
                results.push(result);
            } else {
                failed_step = Some(name.clone());
                results.push(result);
                break;
            }
        }

        // All-or-nothing on the parallel phase: it only runs when every leaf
        // still has its full dependency closure completed. A sequential
        // failure, or the steps aborted after it, otherwise poisons the run.
        let parallel_runnable = plan.parallel.iter().all(|name| {
            ExecutionPlan::transitive_dependencies(&self.registry, name)
                .iter()
                .all(|dependency| checkpoint.is_completed(dependency))
        });

        if parallel_runnable {
            if let Some(failed) = &failed_step {
                tracing::warn!(
                    run_id = %run_id,
                    failed_task = %failed,
                    "sequential step failed but no leaf depends on it, running parallel phase"
                );
            }
            self.run_parallel_phase(&plan, &mut checkpoint, &run_id, &mut results)
                .await?;
        } else {
            let blocked: BTreeSet<&String> = plan
                .parallel
                .iter()
                .filter(|name| {
                    !ExecutionPlan::transitive_dependencies(&self.registry, name)
                        .iter()
                        .all(|dependency| checkpoint.is_completed(dependency))
                })
                .collect();
            tracing::error!(
                run_id = %run_id,
                blocked = ?blocked,
                "parallel phase skipped, dependencies incomplete"
            );
        }

        let all_succeeded = parallel_runnable
            && failed_step.is_none()
            && results.iter().all(TaskResult::is_success)
            && results.len() == self.registry.len();
        let status = if all_succeeded {
            RunStatus::Success
        } else if parallel_runnable {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };

        if status == RunStatus::Success {
            self.warm_cache(&run_id, &results).await?;
        }

        checkpoint.terminal_status = Some(status.as_str().to_string());
        self.checkpoints.save(&checkpoint)?;

        let duration = started.elapsed();
        let deadline_exceeded = self.run_deadline.is_some_and(|deadline| duration > deadline);
        if deadline_exceeded {
            tracing::warn!(run_id = %run_id, ?duration, "run exceeded its deadline");
        }
        let failure_reason = results
            .iter()
            .find(|result| !result.is_success())
            .and_then(|result| result.error.clone());

        tracing::info!(
            run_id = %run_id,
            status = status.as_str(),
            tasks = results.len(),
            ?duration,
            "batch run finished"
        );
        Ok(RunReport {
            run_id,
            status,
            resumed,
            task_results: results,
            duration,
            deadline_exceeded,
            failure_reason,
        })
    }

    /// Executes one task out of band, outside any run plan or checkpoint.
    /// Retries still apply; the result lands in task history under the given
    /// run id.
    pub async fn run_single(&self, name: &str, run_id: &RunId) -> Result<TaskResult, BatchError> {
        let task = self
            .registry
            .get(name)
            .ok_or_else(|| BatchError::UnknownTask(name.to_string()))?;
        let result = self.task_runner.run(task, &self.context).await;
        self.context
            .store
            .append_task_result(result.to_record(run_id))
            .await?;
        Ok(result)
    }

    fn open_checkpoint(&self, options: &RunOptions) -> Result<(Checkpoint, bool), BatchError> {
        let existing = self.checkpoints.load();
        if options.force_resume {
            return match existing {
                Some(checkpoint) if checkpoint.is_resumable() => Ok((checkpoint, true)),
                _ => Err(BatchError::NoUsableCheckpoint),
            };
        }
        match existing {
            Some(checkpoint)
                if checkpoint.is_resumable() && checkpoint.run_id == options.run_id =>
            {
                Ok((checkpoint, true))
            }
            _ => Ok((Checkpoint::new(options.run_id.clone()), false)),
        }
    }

    async fn run_parallel_phase(
        &self,
        plan: &ExecutionPlan,
        checkpoint: &mut Checkpoint,
        run_id: &RunId,
        results: &mut Vec<TaskResult>,
    ) -> Result<(), BatchError> {
        let mut pending = Vec::new();
        for name in &plan.parallel {
            if let Some(step) = checkpoint.completed.get(name) {
                tracing::info!(run_id = %run_id, task = %name, "step already checkpointed, skipping");
                results.push(TaskResult::success(
                    name,
                    step.attempts,
                    Duration::from_millis(step.duration_ms),
                    step.payload.clone(),
                ));
                continue;
            }
            let task = self
                .registry
                .get(name)
                .ok_or_else(|| BatchError::UnknownTask(name.clone()))?;
            pending.push(task.clone());
        }

        let task_runner = &self.task_runner;
        let context = &self.context;
        let mut stream = futures::stream::iter(
            pending
                .into_iter()
                .map(|task| async move { task_runner.run(&task, context).await }),
        )
        .buffer_unordered(self.parallel_limit);

        while let Some(result) = stream.next().await {
            self.context
                .store
                .append_task_result(result.to_record(run_id))
                .await?;
            if result.is_success() {
                checkpoint.mark_completed(&result);
                self.checkpoints.save(checkpoint)?;
            }
            results.push(result);
        }
        Ok(())
    }

    /// Re-publishes the night's headline reads so the first morning request
    /// never pays the computation. Only called after a fully successful run.
    async fn warm_cache(&self, run_id: &RunId, results: &[TaskResult]) -> Result<(), BatchError> {
        let ttl = self.context.cache_ttl_seconds;
        let mut active_alerts = 0u32;
        for item in self.context.store.list_items().await? {
            if let Some(alert) = self.context.store.active_alert(&item.id).await? {
                let value = serde_json::to_value(&alert)
                    .map_err(|err| BatchError::Runtime(format!("serialize alert: {err}")))?;
                self.context
                    .cache
                    .put(&cache_keys::alerts(&item.id), value, ttl)
                    .await?;
                active_alerts += 1;
            }
        }

        let summary = json!({
            "run_id": run_id,
            "tasks": results.len(),
            "active_alerts": active_alerts,
            "finished_at": chrono::Utc::now(),
        });
        self.context
            .cache
            .put(&cache_keys::last_run(), summary, ttl)
            .await?;
        tracing::info!(run_id = %run_id, active_alerts, "freshness cache warmed");
        Ok(())
    }
}
