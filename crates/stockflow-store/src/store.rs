use crate::types::{
    Alert, AlertTransition, ForecastPoint, Item, ItemId, RunId, TaskResultRecord,
};
use chrono::NaiveDate;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource not found: {resource} ({id})")]
    NotFound { resource: &'static str, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read/write contract over the inventory record store. Writes are atomic per
/// row; tasks partition work by item, so the store only needs to be safe for
/// concurrent writes to disjoint keys.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_item(&self, item_id: &ItemId) -> StoreResult<Item>;

    async fn list_items(&self) -> StoreResult<Vec<Item>>;

    async fn upsert_item(&self, item: Item) -> StoreResult<()>;

    /// Replaces the item's forecast snapshot wholesale, so a retried producer
    /// task never double-counts. Points must be date-ascending, unique per
    /// date, and non-negative.
    async fn put_forecast(&self, item_id: &ItemId, points: Vec<ForecastPoint>) -> StoreResult<()>;

    async fn forecast_for(&self, item_id: &ItemId) -> StoreResult<Vec<ForecastPoint>>;

    /// Records one day of observed demand, used by forecast accuracy
    /// monitoring. Overwrites any previous value for the same (item, date).
    async fn record_actual(&self, item_id: &ItemId, date: NaiveDate, quantity: f64)
    -> StoreResult<()>;

    async fn actuals_for(&self, item_id: &ItemId) -> StoreResult<Vec<(NaiveDate, f64)>>;

    async fn active_alert(&self, item_id: &ItemId) -> StoreResult<Option<Alert>>;

    /// Reconciles a freshly classified alert against the item's active one:
    /// same severity refreshes it in place, a different severity resolves it
    /// and creates the new alert. Never leaves two active alerts for one item.
    async fn record_alert(&self, alert: Alert) -> StoreResult<AlertTransition>;

    async fn append_task_result(&self, record: TaskResultRecord) -> StoreResult<()>;

    async fn task_history(&self, run_id: &RunId) -> StoreResult<Vec<TaskResultRecord>>;
}

pub(crate) fn validate_snapshot(item_id: &ItemId, points: &[ForecastPoint]) -> StoreResult<()> {
    let mut previous: Option<NaiveDate> = None;
    for point in points {
        if point.item_id != *item_id {
            return Err(StoreError::InvalidInput(format!(
                "forecast point for '{}' in snapshot of '{}'",
                point.item_id, item_id
            )));
        }
        if point.quantity < 0.0 {
            return Err(StoreError::InvalidInput(format!(
                "negative forecast quantity for '{}' on {}",
                item_id, point.date
            )));
        }
        if let Some(previous_date) = previous {
            if point.date <= previous_date {
                return Err(StoreError::InvalidInput(format!(
                    "forecast snapshot for '{}' is not strictly date-ascending at {}",
                    item_id, point.date
                )));
            }
        }
        previous = Some(point.date);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(date: &str, quantity: f64) -> ForecastPoint {
        ForecastPoint {
            item_id: "item-1".to_string(),
            date: date.parse().expect("date should parse"),
            quantity,
            lower: quantity * 0.8,
            upper: quantity * 1.2,
        }
    }

    #[test]
    fn validate_snapshot_ascending_expected_ok() {
        let points = vec![point("2026-08-26", 10.0), point("2026-08-27", 12.0)];
        assert!(validate_snapshot(&"item-1".to_string(), &points).is_ok());
    }

    #[test]
    fn validate_snapshot_duplicate_date_expected_invalid_input() {
        let points = vec![point("2026-08-26", 10.0), point("2026-08-26", 12.0)];
        let error = validate_snapshot(&"item-1".to_string(), &points)
            .expect_err("duplicate date should be rejected");
        assert!(matches!(error, StoreError::InvalidInput(_)));
    }

    #[test]
    fn validate_snapshot_negative_quantity_expected_invalid_input() {
        let points = vec![point("2026-08-26", -1.0)];
        let error = validate_snapshot(&"item-1".to_string(), &points)
            .expect_err("negative quantity should be rejected");
        assert!(matches!(error, StoreError::InvalidInput(_)));
    }
}
