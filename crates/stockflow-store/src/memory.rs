use crate::store::{RecordStore, StoreError, StoreResult, validate_snapshot};
use crate::types::{
    Alert, AlertTransition, ForecastPoint, Item, ItemId, RunId, TaskResultRecord,
};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct MemoryState {
    pub items: BTreeMap<ItemId, Item>,
    pub forecasts: BTreeMap<ItemId, Vec<ForecastPoint>>,
    pub actuals: BTreeMap<ItemId, BTreeMap<NaiveDate, f64>>,
    pub alerts: Vec<Alert>,
    pub task_results: Vec<TaskResultRecord>,
}

impl MemoryState {
    fn active_alert_index(&self, item_id: &ItemId) -> Option<usize> {
        self.alerts
            .iter()
            .position(|alert| alert.item_id == *item_id && alert.is_active())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryRecordStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: MemoryState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn snapshot(&self) -> MemoryState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store mutex should lock")
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_item(&self, item_id: &ItemId) -> StoreResult<Item> {
        self.lock()
            .items
            .get(item_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                resource: "item",
                id: item_id.clone(),
            })
    }

    async fn list_items(&self) -> StoreResult<Vec<Item>> {
        Ok(self.lock().items.values().cloned().collect())
    }

    async fn upsert_item(&self, item: Item) -> StoreResult<()> {
        self.lock().items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn put_forecast(&self, item_id: &ItemId, points: Vec<ForecastPoint>) -> StoreResult<()> {
        validate_snapshot(item_id, &points)?;
        self.lock().forecasts.insert(item_id.clone(), points);
        Ok(())
    }

    async fn forecast_for(&self, item_id: &ItemId) -> StoreResult<Vec<ForecastPoint>> {
        self.lock()
            .forecasts
            .get(item_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                resource: "forecast",
                id: item_id.clone(),
            })
    }

    async fn record_actual(
        &self,
        item_id: &ItemId,
        date: NaiveDate,
        quantity: f64,
    ) -> StoreResult<()> {
        if quantity < 0.0 {
            return Err(StoreError::InvalidInput(format!(
                "negative actual quantity for '{item_id}' on {date}"
            )));
        }
        self.lock()
            .actuals
            .entry(item_id.clone())
            .or_default()
            .insert(date, quantity);
        Ok(())
    }

    async fn actuals_for(&self, item_id: &ItemId) -> StoreResult<Vec<(NaiveDate, f64)>> {
        Ok(self
            .lock()
            .actuals
            .get(item_id)
            .map(|days| days.iter().map(|(date, qty)| (*date, *qty)).collect())
            .unwrap_or_default())
    }

    async fn active_alert(&self, item_id: &ItemId) -> StoreResult<Option<Alert>> {
        let state = self.lock();
        Ok(state
            .active_alert_index(item_id)
            .map(|index| state.alerts[index].clone()))
    }

    async fn record_alert(&self, alert: Alert) -> StoreResult<AlertTransition> {
        if alert.resolved_at.is_some() {
            return Err(StoreError::InvalidInput(format!(
                "recorded alert for '{}' must be active",
                alert.item_id
            )));
        }
        let mut state = self.lock();
        match state.active_alert_index(&alert.item_id) {
            None => {
                state.alerts.push(alert);
                Ok(AlertTransition::Created)
            }
            Some(index) if state.alerts[index].severity == alert.severity => {
                let created_at = state.alerts[index].created_at;
                state.alerts[index] = Alert {
                    created_at,
                    ..alert
                };
                Ok(AlertTransition::Confirmed)
            }
            Some(index) => {
                state.alerts[index].resolved_at = Some(Utc::now());
                state.alerts.push(alert);
                Ok(AlertTransition::Replaced)
            }
        }
    }

    async fn append_task_result(&self, record: TaskResultRecord) -> StoreResult<()> {
        self.lock().task_results.push(record);
        Ok(())
    }

    async fn task_history(&self, run_id: &RunId) -> StoreResult<Vec<TaskResultRecord>> {
        Ok(self
            .lock()
            .task_results
            .iter()
            .filter(|record| record.run_id == *run_id)
            .cloned()
            .collect())
    }
}
