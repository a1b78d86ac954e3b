//! The built-in nightly plan.
//!
//! `forecast_snapshot` and `classify_alerts` form the sequential chain; the
//! KPI aggregation, accuracy monitoring and dormant-stock scan are leaves and
//! run concurrently once the chain is done.

use crate::errors::BatchError;
use crate::task::{BatchTask, TaskContext, TaskRegistry};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use stockflow_engine::{classify, mean_absolute_percentage_error};
use stockflow_store::{Severity, cache_keys};

pub const FORECAST_SNAPSHOT: &str = "forecast_snapshot";
pub const CLASSIFY_ALERTS: &str = "classify_alerts";
pub const AGGREGATE_KPIS: &str = "aggregate_kpis";
pub const MONITOR_ACCURACY: &str = "monitor_accuracy";
pub const DORMANT_STOCK: &str = "dormant_stock";

/// The standard registry, in nightly execution order.
pub fn nightly_registry() -> Result<TaskRegistry, BatchError> {
    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(ForecastSnapshotTask))?;
    registry.register(Arc::new(ClassifyAlertsTask))?;
    registry.register(Arc::new(AggregateKpisTask))?;
    registry.register(Arc::new(MonitorAccuracyTask))?;
    registry.register(Arc::new(DormantStockTask))?;
    Ok(registry)
}

/// Pulls a fresh forecast for every item from the provider and replaces each
/// item's stored snapshot wholesale. An item the provider cannot forecast is
/// flagged and skipped, not fatal.
pub struct ForecastSnapshotTask;

#[async_trait::async_trait]
impl BatchTask for ForecastSnapshotTask {
    fn name(&self) -> &'static str {
        FORECAST_SNAPSHOT
    }

    async fn execute(&self, context: &TaskContext) -> Result<Value, BatchError> {
        let items = context.store.list_items().await?;
        let mut snapshots = 0u32;
        let mut missing = 0u32;
        for item in &items {
            match context.provider.forecast(&item.id, context.horizon_days).await {
                Ok(series) => {
                    context.store.put_forecast(&item.id, series.points).await?;
                    snapshots += 1;
                }
                Err(error) if error.is_input_gap() => {
                    tracing::warn!(item = %item.id, "no forecast available, skipping");
                    missing += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(json!({
            "items": items.len(),
            "snapshots": snapshots,
            "missing_forecast": missing,
        }))
    }
}

/// Classifies every item against its stored snapshot and reconciles the
/// resulting alert with the item's active one.
pub struct ClassifyAlertsTask;

#[async_trait::async_trait]
impl BatchTask for ClassifyAlertsTask {
    fn name(&self) -> &'static str {
        CLASSIFY_ALERTS
    }

    fn dependencies(&self) -> &[&'static str] {
        &[FORECAST_SNAPSHOT]
    }

    async fn execute(&self, context: &TaskContext) -> Result<Value, BatchError> {
        let mut counts: BTreeMap<&str, u32> =
            BTreeMap::from([("critical", 0), ("attention", 0), ("ok", 0)]);
        let mut flagged = 0u32;

        for item in context.store.list_items().await? {
            let points = match context.store.forecast_for(&item.id).await {
                Ok(points) => points,
                Err(stockflow_store::StoreError::NotFound { .. }) => {
                    // No snapshot this run; the item was flagged upstream.
                    flagged += 1;
                    continue;
                }
                Err(error) => return Err(error.into()),
            };
            let classification = classify(&item, &points, context.today);
            if classification.insufficient_data {
                flagged += 1;
            }
            let severity = classification.severity;
            context
                .store
                .record_alert(classification.into_alert(item.id))
                .await?;
            *counts.entry(severity.as_str()).or_insert(0) += 1;
        }

        Ok(json!({
            "critical": counts["critical"],
            "attention": counts["attention"],
            "ok": counts["ok"],
            "flagged": flagged,
        }))
    }
}

/// Rolls active alerts up into the dashboard headline figures and caches them.
pub struct AggregateKpisTask;

#[async_trait::async_trait]
impl BatchTask for AggregateKpisTask {
    fn name(&self) -> &'static str {
        AGGREGATE_KPIS
    }

    fn dependencies(&self) -> &[&'static str] {
        &[CLASSIFY_ALERTS]
    }

    async fn execute(&self, context: &TaskContext) -> Result<Value, BatchError> {
        let mut critical = 0u32;
        let mut attention = 0u32;
        let mut ok = 0u32;
        let mut exposure = 0.0f64;

        for item in context.store.list_items().await? {
            let Some(alert) = context.store.active_alert(&item.id).await? else {
                continue;
            };
            match alert.severity {
                Severity::Critical => {
                    critical += 1;
                    exposure += alert.financial_impact;
                }
                Severity::Attention => attention += 1,
                Severity::Ok => ok += 1,
            }
        }

        let payload = json!({
            "critical": critical,
            "attention": attention,
            "ok": ok,
            "exposure": exposure,
        });
        context
            .cache
            .put(&cache_keys::kpis(), payload.clone(), context.cache_ttl_seconds)
            .await?;
        Ok(payload)
    }
}

/// Scores each item's snapshot against recorded actual demand (MAPE over the
/// overlapping dates) and caches the per-item score.
pub struct MonitorAccuracyTask;

#[async_trait::async_trait]
impl BatchTask for MonitorAccuracyTask {
    fn name(&self) -> &'static str {
        MONITOR_ACCURACY
    }

    fn dependencies(&self) -> &[&'static str] {
        &[FORECAST_SNAPSHOT]
    }

    async fn execute(&self, context: &TaskContext) -> Result<Value, BatchError> {
        let mut scored = 0u32;
        let mut unscored = 0u32;

        for item in context.store.list_items().await? {
            let actuals = context.store.actuals_for(&item.id).await?;
            let points = match context.store.forecast_for(&item.id).await {
                Ok(points) => points,
                Err(stockflow_store::StoreError::NotFound { .. }) => {
                    unscored += 1;
                    continue;
                }
                Err(error) => return Err(error.into()),
            };
            let predicted: BTreeMap<_, _> =
                points.iter().map(|point| (point.date, point.quantity)).collect();
            let pairs: Vec<(f64, f64)> = actuals
                .iter()
                .filter_map(|(date, actual)| {
                    predicted.get(date).map(|quantity| (*actual, *quantity))
                })
                .collect();

            match mean_absolute_percentage_error(&pairs) {
                Some(mape) => {
                    context
                        .cache
                        .put(
                            &cache_keys::accuracy(&item.id),
                            json!({ "mape": mape, "days": pairs.len() }),
                            context.cache_ttl_seconds,
                        )
                        .await?;
                    scored += 1;
                }
                None => unscored += 1,
            }
        }

        Ok(json!({ "scored": scored, "unscored": unscored }))
    }
}

/// Finds items holding stock with no recorded demand at all, capital sitting
/// on a shelf. Reads only stock and actuals, so it depends on nothing else in
/// the plan.
pub struct DormantStockTask;

#[async_trait::async_trait]
impl BatchTask for DormantStockTask {
    fn name(&self) -> &'static str {
        DORMANT_STOCK
    }

    async fn execute(&self, context: &TaskContext) -> Result<Value, BatchError> {
        let mut dormant = Vec::new();
        let mut tied_up = 0.0f64;

        for item in context.store.list_items().await? {
            if item.stock_actual == 0 {
                continue;
            }
            let total_demand: f64 = context
                .store
                .actuals_for(&item.id)
                .await?
                .iter()
                .map(|(_, quantity)| quantity)
                .sum();
            if total_demand == 0.0 {
                let value = item.stock_actual as f64 * item.unit_price;
                tied_up += value;
                dormant.push(json!({
                    "item_id": item.id,
                    "stock": item.stock_actual,
                    "value": value,
                }));
            }
        }

        let payload = json!({ "items": dormant, "tied_up": tied_up });
        context
            .cache
            .put(
                &cache_keys::dormant_stock(),
                payload.clone(),
                context.cache_ttl_seconds,
            )
            .await?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ExecutionPlan;
    use chrono::{Duration, NaiveDate};
    use stockflow_engine::{ForecastSeries, StaticForecastProvider};
    use stockflow_store::{
        ForecastPoint, FreshnessCache, Item, MemoryFreshnessCache, MemoryRecordStore, RecordStore,
    };

    fn item(id: &str, stock: u32) -> Item {
        Item {
            id: id.to_string(),
            name: format!("Item {id}"),
            stock_actual: stock,
            lead_time_days: 5,
            unit_price: 100.0,
            packaging_unit: 1,
            min_stock: None,
            max_stock: None,
        }
    }

    fn series(id: &str, start: NaiveDate, quantities: &[f64]) -> ForecastSeries {
        ForecastSeries {
            points: quantities
                .iter()
                .enumerate()
                .map(|(index, quantity)| ForecastPoint {
                    item_id: id.to_string(),
                    date: start + Duration::days(index as i64),
                    quantity: *quantity,
                    lower: *quantity,
                    upper: *quantity,
                })
                .collect(),
            mape: None,
        }
    }

    fn today() -> NaiveDate {
        "2026-08-26".parse().expect("date should parse")
    }

    async fn context_with(items: &[Item], provider: StaticForecastProvider) -> TaskContext {
        let store = Arc::new(MemoryRecordStore::new());
        for item in items {
            store.upsert_item(item.clone()).await.expect("item should store");
        }
        TaskContext {
            store,
            cache: Arc::new(MemoryFreshnessCache::new()),
            provider: Arc::new(provider),
            today: today(),
            horizon_days: 30,
            cache_ttl_seconds: 86_400,
        }
    }

    #[test]
    fn nightly_registry_resolves_into_expected_phases() {
        let registry = nightly_registry().expect("registry should build");
        let plan = ExecutionPlan::resolve(&registry).expect("plan should resolve");
        assert_eq!(plan.sequential, [FORECAST_SNAPSHOT, CLASSIFY_ALERTS]);
        assert_eq!(plan.parallel, [AGGREGATE_KPIS, MONITOR_ACCURACY, DORMANT_STOCK]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn forecast_snapshot_missing_provider_series_expected_flagged_not_fatal() {
        let provider = StaticForecastProvider::new().with_series(
            "covered",
            series("covered", today() + Duration::days(1), &[5.0, 5.0]),
        );
        let context = context_with(&[item("covered", 10), item("ghost", 10)], provider).await;

        let payload = ForecastSnapshotTask
            .execute(&context)
            .await
            .expect("task should succeed");
        assert_eq!(payload["snapshots"], 1);
        assert_eq!(payload["missing_forecast"], 1);
        assert!(context.store.forecast_for(&"covered".to_string()).await.is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn classify_alerts_records_alert_per_item_with_snapshot() {
        let provider = StaticForecastProvider::new().with_series(
            "item-1",
            series("item-1", today() + Duration::days(1), &[30.0, 30.0, 30.0, 30.0, 30.0]),
        );
        let context = context_with(&[item("item-1", 50)], provider).await;
        ForecastSnapshotTask
            .execute(&context)
            .await
            .expect("snapshot should succeed");

        let payload = ClassifyAlertsTask
            .execute(&context)
            .await
            .expect("task should succeed");
        assert_eq!(payload["critical"], 1);

        let alert = context
            .store
            .active_alert(&"item-1".to_string())
            .await
            .expect("lookup should succeed")
            .expect("alert should exist");
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn aggregate_kpis_caches_headline_counts() {
        let provider = StaticForecastProvider::new().with_series(
            "item-1",
            series("item-1", today() + Duration::days(1), &[30.0, 30.0, 30.0, 30.0, 30.0]),
        );
        let context = context_with(&[item("item-1", 50)], provider).await;
        ForecastSnapshotTask.execute(&context).await.expect("snapshot should succeed");
        ClassifyAlertsTask.execute(&context).await.expect("classify should succeed");

        let payload = AggregateKpisTask
            .execute(&context)
            .await
            .expect("task should succeed");
        assert_eq!(payload["critical"], 1);

        let reading = context
            .cache
            .get(&cache_keys::kpis())
            .await
            .expect("cache get should succeed")
            .expect("kpis should be cached");
        assert_eq!(reading.value["critical"], 1);
        assert!(!reading.is_stale);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn monitor_accuracy_scores_overlapping_days_only() {
        let provider = StaticForecastProvider::new().with_series(
            "item-1",
            series("item-1", today(), &[10.0, 10.0]),
        );
        let context = context_with(&[item("item-1", 50)], provider).await;
        ForecastSnapshotTask.execute(&context).await.expect("snapshot should succeed");
        // One overlapping day with a 10% error, one day outside the snapshot.
        context
            .store
            .record_actual(&"item-1".to_string(), today(), 11.0)
            .await
            .expect("actual should record");
        context
            .store
            .record_actual(&"item-1".to_string(), today() - Duration::days(30), 99.0)
            .await
            .expect("actual should record");

        let payload = MonitorAccuracyTask
            .execute(&context)
            .await
            .expect("task should succeed");
        assert_eq!(payload["scored"], 1);

        let reading = context
            .cache
            .get(&cache_keys::accuracy(&"item-1".to_string()))
            .await
            .expect("cache get should succeed")
            .expect("score should be cached");
        assert_eq!(reading.value["days"], 1);
        let mape = reading.value["mape"].as_f64().expect("mape should be a number");
        assert!((mape - 100.0 / 11.0).abs() < 1e-9);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dormant_stock_finds_items_with_stock_and_no_demand() {
        let context = context_with(
            &[item("dormant", 40), item("moving", 40), item("empty", 0)],
            StaticForecastProvider::new(),
        )
        .await;
        context
            .store
            .record_actual(&"moving".to_string(), today(), 3.0)
            .await
            .expect("actual should record");

        let payload = DormantStockTask
            .execute(&context)
            .await
            .expect("task should succeed");
        assert_eq!(payload["items"].as_array().expect("items should be a list").len(), 1);
        assert_eq!(payload["items"][0]["item_id"], "dormant");
        assert_eq!(payload["tied_up"], 4_000.0);
    }
}
