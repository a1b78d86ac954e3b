use stockflow_engine::EngineError;
use stockflow_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    /// Configuration-time failure: the run never starts.
    #[error("cyclic dependency among tasks: {0}")]
    CyclicDependency(String),

    #[error("task '{task}' declares unknown dependency '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("duplicate task name '{0}' in registry")]
    DuplicateTask(String),

    #[error("unknown task '{0}'")]
    UnknownTask(String),

    /// Transient failure of one attempt; retried inside the task runner and
    /// never surfaced past it.
    #[error("task execution failed: {0}")]
    TaskExecution(String),

    /// Terminal for the task within this run; aborts its dependents.
    #[error("task '{task}' failed after {attempts} attempts: {reason}")]
    RetryExhausted {
        task: String,
        attempts: u32,
        reason: String,
    },

    #[error("no usable checkpoint to resume from")]
    NoUsableCheckpoint,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("runtime error: {0}")]
    Runtime(String),
}
