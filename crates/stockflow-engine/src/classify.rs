use crate::errors::EngineError;
use crate::forecast::ForecastProvider;
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use stockflow_store::{Alert, ForecastPoint, Item, ItemId, RecordStore, Severity, StoreError};

/// Multiplier applied to lost sales during a stock-out window, covering the
/// clients who do not come back once they found the shelf empty.
pub const CLIENT_LOSS_MULTIPLIER: f64 = 1.2;

/// Result of one classification pass for one item. Recomputed from scratch on
/// every pass; nothing carries over invisibly between runs.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub severity: Severity,
    pub financial_impact: f64,
    pub insufficient_data: bool,
    /// `stock_actual - D`, stock left once lead-time demand is served.
    pub remaining: f64,
    /// `D`: forecast demand over the item's lead time.
    pub demand_lead: f64,
    /// `D3`: forecast demand over the next 3 days.
    pub demand_3day: f64,
    pub average_daily: f64,
    pub stockout_date: Option<NaiveDate>,
    pub order_deadline: Option<NaiveDate>,
    pub order_window: Option<(NaiveDate, NaiveDate)>,
}

impl Classification {
    pub fn into_alert(self, item_id: ItemId) -> Alert {
        Alert {
            item_id,
            severity: self.severity,
            financial_impact: self.financial_impact,
            insufficient_data: self.insufficient_data,
            stockout_date: self.stockout_date,
            order_deadline: self.order_deadline,
            order_window: self.order_window,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Classifies one item from its stock level and forecast sequence.
///
/// The three-way boundary is exact in `(stock, D, D3)`:
/// `remaining < 0` is Critical, `0 <= remaining < D3` is Attention,
/// `remaining >= D3` is Ok. Day 1 of the forecast is the first point.
pub fn classify(item: &Item, forecast: &[ForecastPoint], today: NaiveDate) -> Classification {
    let quantities: Vec<f64> = forecast.iter().map(|point| point.quantity).collect();
    let horizon = quantities.len();
    let lead = (item.lead_time_days as usize).min(horizon);
    let stock = item.stock_actual as f64;

    let demand_lead: f64 = quantities[..lead].iter().sum();
    let demand_3day: f64 = quantities[..3.min(horizon)].iter().sum();
    let remaining = stock - demand_lead;

    let average_daily = if lead > 0 && demand_lead > 0.0 {
        demand_lead / lead as f64
    } else if horizon > 0 {
        quantities.iter().sum::<f64>() / horizon as f64
    } else {
        0.0
    };

    if average_daily == 0.0 {
        // No forecast demand at all: nothing to divide by, nothing to order.
        return Classification {
            severity: Severity::Ok,
            financial_impact: 0.0,
            insufficient_data: true,
            remaining,
            demand_lead,
            demand_3day,
            average_daily,
            stockout_date: None,
            order_deadline: None,
            order_window: None,
        };
    }

    if remaining < 0.0 {
        let stockout_day = first_day_exceeding(&quantities, stock).unwrap_or(lead.max(1));
        let lost_units: f64 = quantities[stockout_day - 1..lead].iter().sum();
        return Classification {
            severity: Severity::Critical,
            financial_impact: lost_units * item.unit_price * CLIENT_LOSS_MULTIPLIER,
            insufficient_data: false,
            remaining,
            demand_lead,
            demand_3day,
            average_daily,
            stockout_date: Some(today + Duration::days(stockout_day as i64)),
            order_deadline: None,
            order_window: None,
        };
    }

    if remaining < demand_3day {
        // Ordering now still arrives before the shelf empties; the benefit is
        // the lead time of sales the order saves.
        let benefit = item.lead_time_days as f64 * average_daily * item.unit_price;
        let deadline_day =
            first_day_drained_to(&quantities, stock, average_daily).unwrap_or(horizon);
        return Classification {
            severity: Severity::Attention,
            financial_impact: benefit,
            insufficient_data: false,
            remaining,
            demand_lead,
            demand_3day,
            average_daily,
            stockout_date: None,
            order_deadline: Some(today + Duration::days(deadline_day as i64)),
            order_window: None,
        };
    }

    let window_open =
        first_day_drained_to(&quantities, stock, 3.0 * average_daily).unwrap_or(horizon);
    let window_close =
        first_day_drained_to(&quantities, stock, average_daily).unwrap_or(horizon);
    Classification {
        severity: Severity::Ok,
        financial_impact: 0.0,
        insufficient_data: false,
        remaining,
        demand_lead,
        demand_3day,
        average_daily,
        stockout_date: None,
        order_deadline: None,
        order_window: Some((
            today + Duration::days(window_open as i64),
            today + Duration::days(window_close as i64),
        )),
    }
}

/// First 1-based day whose cumulative demand exceeds the stock on hand.
fn first_day_exceeding(quantities: &[f64], stock: f64) -> Option<usize> {
    let mut cumulative = 0.0;
    for (index, quantity) in quantities.iter().enumerate() {
        cumulative += quantity;
        if cumulative > stock {
            return Some(index + 1);
        }
    }
    None
}

/// First 1-based day at which the stock left after cumulative demand is down
/// to `threshold` units or fewer.
fn first_day_drained_to(quantities: &[f64], stock: f64, threshold: f64) -> Option<usize> {
    let mut cumulative = 0.0;
    for (index, quantity) in quantities.iter().enumerate() {
        cumulative += quantity;
        if stock - cumulative <= threshold {
            return Some(index + 1);
        }
    }
    None
}

/// On-demand single-item classification: reads stock and forecast, maps
/// missing rows to an input-gap error so the caller can skip and flag the
/// item instead of aborting a whole pass.
pub async fn classify_item(
    store: &Arc<dyn RecordStore>,
    provider: &Arc<dyn ForecastProvider>,
    item_id: &ItemId,
    horizon_days: u32,
    today: NaiveDate,
) -> Result<Classification, EngineError> {
    let item = store.get_item(item_id).await.map_err(|err| {
        if matches!(err, StoreError::NotFound { .. }) {
            EngineError::MissingInput {
                item_id: item_id.clone(),
                what: "stock record",
            }
        } else {
            EngineError::Store(err)
        }
    })?;
    let series = provider.forecast(item_id, horizon_days).await?;
    Ok(classify(&item, &series.points, today))
}
