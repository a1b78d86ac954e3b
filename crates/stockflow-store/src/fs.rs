use crate::memory::{MemoryRecordStore, MemoryState};
use crate::store::{RecordStore, StoreError, StoreResult};
use crate::types::{
    Alert, AlertTransition, ForecastPoint, Item, ItemId, RunId, TaskResultRecord,
};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

const STATE_FILE_NAME: &str = "stockflow-store.json";

/// Filesystem-backed record store: the in-memory store plus a full-state
/// persist (write-temp-then-rename) after every mutation.
#[derive(Clone, Debug)]
pub struct FsRecordStore {
    state_file: PathBuf,
    inner: MemoryRecordStore,
}

impl FsRecordStore {
    pub fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        fs::create_dir_all(root.as_ref())
            .map_err(|err| StoreError::Backend(format!("create store root failed: {err}")))?;
        let state_file = root.as_ref().join(STATE_FILE_NAME);
        let state = if state_file.exists() {
            let raw = fs::read(&state_file)
                .map_err(|err| StoreError::Backend(format!("read state file failed: {err}")))?;
            serde_json::from_slice::<MemoryState>(&raw)
                .map_err(|err| StoreError::Serialization(err.to_string()))?
        } else {
            MemoryState::default()
        };

        Ok(Self {
            state_file,
            inner: MemoryRecordStore::from_state(state),
        })
    }

    fn persist(&self) -> StoreResult<()> {
        let snapshot = self.inner.snapshot();
        let raw = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let tmp = self.state_file.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|err| StoreError::Backend(format!("write state file failed: {err}")))?;
        fs::rename(&tmp, &self.state_file)
            .map_err(|err| StoreError::Backend(format!("rename state file failed: {err}")))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for FsRecordStore {
    async fn get_item(&self, item_id: &ItemId) -> StoreResult<Item> {
        self.inner.get_item(item_id).await
    }

    async fn list_items(&self) -> StoreResult<Vec<Item>> {
        self.inner.list_items().await
    }

    async fn upsert_item(&self, item: Item) -> StoreResult<()> {
        self.inner.upsert_item(item).await?;
        self.persist()
    }

    async fn put_forecast(&self, item_id: &ItemId, points: Vec<ForecastPoint>) -> StoreResult<()> {
        self.inner.put_forecast(item_id, points).await?;
        self.persist()
    }

    async fn forecast_for(&self, item_id: &ItemId) -> StoreResult<Vec<ForecastPoint>> {
        self.inner.forecast_for(item_id).await
    }

    async fn record_actual(
        &self,
        item_id: &ItemId,
        date: NaiveDate,
        quantity: f64,
    ) -> StoreResult<()> {
        self.inner.record_actual(item_id, date, quantity).await?;
        self.persist()
    }

    async fn actuals_for(&self, item_id: &ItemId) -> StoreResult<Vec<(NaiveDate, f64)>> {
        self.inner.actuals_for(item_id).await
    }

    async fn active_alert(&self, item_id: &ItemId) -> StoreResult<Option<Alert>> {
        self.inner.active_alert(item_id).await
    }

    async fn record_alert(&self, alert: Alert) -> StoreResult<AlertTransition> {
        let transition = self.inner.record_alert(alert).await?;
        self.persist()?;
        Ok(transition)
    }

    async fn append_task_result(&self, record: TaskResultRecord) -> StoreResult<()> {
        self.inner.append_task_result(record).await?;
        self.persist()
    }

    async fn task_history(&self, run_id: &RunId) -> StoreResult<Vec<TaskResultRecord>> {
        self.inner.task_history(run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn item(id: &str) -> Item {
        Item {
            id: id.to_string(),
            name: format!("Item {id}"),
            stock_actual: 50,
            lead_time_days: 5,
            unit_price: 1000.0,
            packaging_unit: 10,
            min_stock: None,
            max_stock: None,
        }
    }

    #[tokio::test]
    async fn fs_store_reopen_expected_state_survives() {
        let temp = TempDir::new().expect("temp dir should be created");

        {
            let store = FsRecordStore::new(temp.path()).expect("store should open");
            store
                .upsert_item(item("item-1"))
                .await
                .expect("item should store");
        }

        let reopened = FsRecordStore::new(temp.path()).expect("store should reopen");
        let loaded = reopened
            .get_item(&"item-1".to_string())
            .await
            .expect("item should load");
        assert_eq!(loaded.stock_actual, 50);
    }

    #[tokio::test]
    async fn fs_store_persist_expected_no_leftover_temp_file() {
        let temp = TempDir::new().expect("temp dir should be created");
        let store = FsRecordStore::new(temp.path()).expect("store should open");
        store
            .upsert_item(item("item-1"))
            .await
            .expect("item should store");

        assert!(temp.path().join("stockflow-store.json").exists());
        assert!(!temp.path().join("stockflow-store.json.tmp").exists());
    }
}
