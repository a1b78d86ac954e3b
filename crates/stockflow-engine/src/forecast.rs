use crate::errors::EngineError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use stockflow_store::{ForecastPoint, ItemId, RecordStore, StoreError};

/// An ordered forecast sequence for one item plus the accuracy score (MAPE)
/// of the model that produced it, when the provider knows it.
#[derive(Clone, Debug, PartialEq)]
pub struct ForecastSeries {
    pub points: Vec<ForecastPoint>,
    pub mape: Option<f64>,
}

/// Seam to the external forecasting model. Consumed, never implemented here:
/// given an item and a horizon, produce (date, predicted quantity, confidence
/// interval) per day.
#[async_trait::async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn forecast(
        &self,
        item_id: &ItemId,
        horizon_days: u32,
    ) -> Result<ForecastSeries, EngineError>;
}

/// Provider backed by the forecast snapshot the nightly batch persisted.
pub struct StoredForecastProvider {
    store: Arc<dyn RecordStore>,
}

impl StoredForecastProvider {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ForecastProvider for StoredForecastProvider {
    async fn forecast(
        &self,
        item_id: &ItemId,
        horizon_days: u32,
    ) -> Result<ForecastSeries, EngineError> {
        let mut points = self.store.forecast_for(item_id).await.map_err(|err| {
            if matches!(err, StoreError::NotFound { .. }) {
                EngineError::MissingInput {
                    item_id: item_id.clone(),
                    what: "forecast",
                }
            } else {
                EngineError::Store(err)
            }
        })?;
        points.truncate(horizon_days as usize);
        Ok(ForecastSeries { points, mape: None })
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct FileSeries {
    #[serde(default)]
    mape: Option<f64>,
    points: Vec<FilePoint>,
}

#[derive(Debug, Deserialize, Serialize)]
struct FilePoint {
    date: NaiveDate,
    quantity: f64,
    #[serde(default)]
    lower: Option<f64>,
    #[serde(default)]
    upper: Option<f64>,
}

/// Fixed per-item series, loadable from a JSON document of the shape
/// `{ "<item_id>": { "mape": 12.6, "points": [{"date", "quantity", ...}] } }`.
/// This is how externally produced model output enters the system.
#[derive(Default)]
pub struct StaticForecastProvider {
    series: BTreeMap<ItemId, ForecastSeries>,
}

impl StaticForecastProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, item_id: impl Into<ItemId>, series: ForecastSeries) -> Self {
        self.series.insert(item_id.into(), series);
        self
    }

    pub fn from_json_file(path: &Path) -> Result<Self, EngineError> {
        let raw = fs::read(path).map_err(|err| {
            EngineError::Store(StoreError::Backend(format!(
                "read forecast file '{}' failed: {err}",
                path.display()
            )))
        })?;
        let by_item: BTreeMap<ItemId, FileSeries> = serde_json::from_slice(&raw)
            .map_err(|err| EngineError::Store(StoreError::Serialization(err.to_string())))?;

        let mut series = BTreeMap::new();
        for (item_id, file_series) in by_item {
            let points = file_series
                .points
                .into_iter()
                .map(|point| ForecastPoint {
                    item_id: item_id.clone(),
                    date: point.date,
                    quantity: point.quantity,
                    lower: point.lower.unwrap_or(point.quantity),
                    upper: point.upper.unwrap_or(point.quantity),
                })
                .collect();
            series.insert(
                item_id,
                ForecastSeries {
                    points,
                    mape: file_series.mape,
                },
            );
        }
        Ok(Self { series })
    }
}

#[async_trait::async_trait]
impl ForecastProvider for StaticForecastProvider {
    async fn forecast(
        &self,
        item_id: &ItemId,
        horizon_days: u32,
    ) -> Result<ForecastSeries, EngineError> {
        let series = self
            .series
            .get(item_id)
            .ok_or_else(|| EngineError::MissingInput {
                item_id: item_id.clone(),
                what: "forecast",
            })?;
        let mut points = series.points.clone();
        points.truncate(horizon_days as usize);
        Ok(ForecastSeries {
            points,
            mape: series.mape,
        })
    }
}

/// MAPE = mean(|actual - predicted| / |actual|) x 100 over days with a
/// nonzero actual. `None` when no day qualifies.
pub fn mean_absolute_percentage_error(pairs: &[(f64, f64)]) -> Option<f64> {
    let ratios: Vec<f64> = pairs
        .iter()
        .filter(|(actual, _)| *actual != 0.0)
        .map(|(actual, predicted)| ((actual - predicted) / actual).abs())
        .collect();
    if ratios.is_empty() {
        return None;
    }
    Some(ratios.iter().sum::<f64>() / ratios.len() as f64 * 100.0)
}
