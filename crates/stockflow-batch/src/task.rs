use crate::errors::BatchError;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use stockflow_engine::ForecastProvider;
use stockflow_store::{FreshnessCache, RecordStore, RunId, TaskResultRecord};

/// One unit of nightly work. Implementations are registered once at startup;
/// the set of tasks and their dependencies never changes mid-run.
#[async_trait::async_trait]
pub trait BatchTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Names of tasks that must complete successfully before this one runs.
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    /// One attempt. Returns a JSON summary payload on success; the runner
    /// owns retries and timeouts, so implementations just do the work once.
    async fn execute(&self, context: &TaskContext) -> Result<Value, BatchError>;
}

pub type SharedBatchTask = Arc<dyn BatchTask>;

/// Everything a task may touch, injected so tests can swap in memory-backed
/// stores and canned forecasts.
#[derive(Clone)]
pub struct TaskContext {
    pub store: Arc<dyn RecordStore>,
    pub cache: Arc<dyn FreshnessCache>,
    pub provider: Arc<dyn ForecastProvider>,
    pub today: NaiveDate,
    pub horizon_days: u32,
    pub cache_ttl_seconds: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failure,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Outcome of one task within one run, after retries.
#[derive(Clone, Debug)]
pub struct TaskResult {
    pub task: String,
    pub outcome: TaskOutcome,
    pub attempts: u32,
    pub duration: Duration,
    pub payload: Value,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(task: &str, attempts: u32, duration: Duration, payload: Value) -> Self {
        Self {
            task: task.to_string(),
            outcome: TaskOutcome::Success,
            attempts,
            duration,
            payload,
            error: None,
        }
    }

    pub fn failure(task: &str, attempts: u32, duration: Duration, error: String) -> Self {
        Self {
            task: task.to_string(),
            outcome: TaskOutcome::Failure,
            attempts,
            duration,
            payload: Value::Null,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == TaskOutcome::Success
    }

    pub fn to_record(&self, run_id: &RunId) -> TaskResultRecord {
        TaskResultRecord {
            run_id: run_id.clone(),
            task: self.task.clone(),
            outcome: self.outcome.as_str().to_string(),
            attempts: self.attempts,
            duration_ms: self.duration.as_millis() as u64,
            detail: match &self.error {
                Some(error) => serde_json::json!({ "error": error }),
                None => self.payload.clone(),
            },
            recorded_at: Utc::now(),
        }
    }
}

/// Declaration-ordered task registry. Names are unique; registration order is
/// the tie-break everywhere ordering matters, which keeps plans deterministic.
#[derive(Default)]
pub struct TaskRegistry {
    order: Vec<String>,
    tasks: BTreeMap<String, SharedBatchTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: SharedBatchTask) -> Result<(), BatchError> {
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            return Err(BatchError::DuplicateTask(name));
        }
        self.order.push(name.clone());
        self.tasks.insert(name, task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SharedBatchTask> {
        self.tasks.get(name)
    }

    /// Task names in declaration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
