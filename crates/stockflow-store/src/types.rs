use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ItemId = String;
pub type RunId = String;

/// One replenishable item as the inventory record store describes it.
/// Read-only to this core; `upsert_item` exists for seeding and tests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub stock_actual: u32,
    pub lead_time_days: u32,
    pub unit_price: f64,
    /// Minimum orderable increment; suggested quantities round up to a
    /// multiple of this.
    pub packaging_unit: u32,
    pub min_stock: Option<u32>,
    pub max_stock: Option<u32>,
}

/// One forecasted day of demand for an item. Unique per (item, date),
/// ordered ascending by date within a snapshot, quantity never negative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub item_id: ItemId,
    pub date: NaiveDate,
    pub quantity: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Attention,
    Ok,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Attention => "attention",
            Self::Ok => "ok",
        }
    }
}

impl TryFrom<&str> for Severity {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "critical" => Ok(Self::Critical),
            "attention" => Ok(Self::Attention),
            "ok" => Ok(Self::Ok),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// A classification outcome for one item. At most one alert per item is
/// active (`resolved_at == None`) at any time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub item_id: ItemId,
    pub severity: Severity,
    pub financial_impact: f64,
    pub insufficient_data: bool,
    pub stockout_date: Option<NaiveDate>,
    pub order_deadline: Option<NaiveDate>,
    pub order_window: Option<(NaiveDate, NaiveDate)>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// How `record_alert` reconciled a new classification against the item's
/// existing active alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertTransition {
    /// No active alert existed; a new one was created.
    Created,
    /// The active alert had the same severity; its figures were refreshed in
    /// place.
    Confirmed,
    /// The active alert was resolved and a new one with the new severity was
    /// created.
    Replaced,
}

/// Append-only history row for one task execution within a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskResultRecord {
    pub run_id: RunId,
    pub task: String,
    pub outcome: String,
    pub attempts: u32,
    pub duration_ms: u64,
    pub detail: Value,
    pub recorded_at: DateTime<Utc>,
}
