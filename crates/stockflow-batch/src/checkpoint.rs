use crate::errors::BatchError;
use crate::task::TaskResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use stockflow_store::RunId;

pub const CHECKPOINT_FILE_NAME: &str = "checkpoint.json";

const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// One successfully completed step as recorded in the checkpoint; resumption
/// reuses the payload instead of re-executing the task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub attempts: u32,
    pub duration_ms: u64,
    pub payload: Value,
}

/// Durable progress of one run. Only successful steps are recorded; a failed
/// or crashed step is simply absent and re-executes on resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema_version: u32,
    pub run_id: RunId,
    pub step_index: u64,
    pub updated_at: DateTime<Utc>,
    pub completed: BTreeMap<String, CompletedStep>,
    /// Set once the run reaches a terminal status; a terminal checkpoint is
    /// not resumable.
    pub terminal_status: Option<String>,
}

impl Checkpoint {
    pub fn new(run_id: RunId) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            run_id,
            step_index: 0,
            updated_at: Utc::now(),
            completed: BTreeMap::new(),
            terminal_status: None,
        }
    }

    pub fn mark_completed(&mut self, result: &TaskResult) {
        self.step_index += 1;
        self.updated_at = Utc::now();
        self.completed.insert(
            result.task.clone(),
            CompletedStep {
                attempts: result.attempts,
                duration_ms: result.duration.as_millis() as u64,
                payload: result.payload.clone(),
            },
        );
    }

    pub fn is_completed(&self, task: &str) -> bool {
        self.completed.contains_key(task)
    }

    pub fn is_resumable(&self) -> bool {
        self.terminal_status.is_none()
    }
}

/// Atomic single-file checkpoint persistence: serialize to a temp file in the
/// same directory, fsync, rename over the target. A crash mid-write leaves
/// the previous checkpoint intact.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn in_dir<P: AsRef<Path>>(root: P) -> Self {
        Self::new(root.as_ref().join(CHECKPOINT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), BatchError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| BatchError::Runtime(format!("create checkpoint dir: {err}")))?;
        }
        let raw = serde_json::to_vec_pretty(checkpoint)
            .map_err(|err| BatchError::Runtime(format!("serialize checkpoint: {err}")))?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp)
            .map_err(|err| BatchError::Runtime(format!("create checkpoint temp file: {err}")))?;
        file.write_all(&raw)
            .map_err(|err| BatchError::Runtime(format!("write checkpoint: {err}")))?;
        file.sync_all()
            .map_err(|err| BatchError::Runtime(format!("sync checkpoint: {err}")))?;
        fs::rename(&tmp, &self.path)
            .map_err(|err| BatchError::Runtime(format!("rename checkpoint: {err}")))?;
        Ok(())
    }

    /// Loads the checkpoint if one exists and parses. A corrupt or
    /// schema-incompatible file is treated as absent, after a warning; the
    /// run then starts fresh rather than aborting the night.
    pub fn load(&self) -> Option<Checkpoint> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "checkpoint unreadable, ignoring");
                return None;
            }
        };
        match serde_json::from_slice::<Checkpoint>(&raw) {
            Ok(checkpoint) if checkpoint.schema_version == CHECKPOINT_SCHEMA_VERSION => {
                Some(checkpoint)
            }
            Ok(checkpoint) => {
                tracing::warn!(
                    path = %self.path.display(),
                    found = checkpoint.schema_version,
                    expected = CHECKPOINT_SCHEMA_VERSION,
                    "checkpoint schema mismatch, ignoring"
                );
                None
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "checkpoint corrupt, ignoring");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn result(task: &str) -> TaskResult {
        TaskResult::success(task, 1, Duration::from_millis(10), json!({ "items": 4 }))
    }

    #[test]
    fn save_then_load_expected_identical_checkpoint() {
        let temp = TempDir::new().expect("temp dir should be created");
        let store = CheckpointStore::in_dir(temp.path());

        let mut checkpoint = Checkpoint::new("run-1".to_string());
        checkpoint.mark_completed(&result("forecast_snapshot"));
        checkpoint.mark_completed(&result("classify_alerts"));
        store.save(&checkpoint).expect("save should succeed");

        let loaded = store.load().expect("checkpoint should load");
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.step_index, 2);
        assert!(loaded.is_completed("forecast_snapshot"));
        assert!(!loaded.is_completed("aggregate_kpis"));
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let temp = TempDir::new().expect("temp dir should be created");
        let store = CheckpointStore::in_dir(temp.path());
        store
            .save(&Checkpoint::new("run-1".to_string()))
            .expect("save should succeed");

        assert!(store.path().exists());
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn load_missing_file_expected_none() {
        let temp = TempDir::new().expect("temp dir should be created");
        assert!(CheckpointStore::in_dir(temp.path()).load().is_none());
    }

    #[test]
    fn load_corrupt_file_expected_none_not_panic() {
        let temp = TempDir::new().expect("temp dir should be created");
        let store = CheckpointStore::in_dir(temp.path());
        fs::write(store.path(), b"{ not json").expect("write should succeed");
        assert!(store.load().is_none());
    }

    #[test]
    fn load_future_schema_expected_none() {
        let temp = TempDir::new().expect("temp dir should be created");
        let store = CheckpointStore::in_dir(temp.path());
        let mut checkpoint = Checkpoint::new("run-1".to_string());
        checkpoint.schema_version = CHECKPOINT_SCHEMA_VERSION + 1;
        store.save(&checkpoint).expect("save should succeed");
        assert!(store.load().is_none());
    }

    #[test]
    fn terminal_checkpoint_expected_not_resumable() {
        let mut checkpoint = Checkpoint::new("run-1".to_string());
        assert!(checkpoint.is_resumable());
        checkpoint.terminal_status = Some("success".to_string());
        assert!(!checkpoint.is_resumable());
    }
}
