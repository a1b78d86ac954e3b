use crate::errors::EngineError;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use stockflow_store::{ForecastPoint, Item};

/// Coverage further out than this is cut back; forecast quality past 90 days
/// does not justify ordering against it.
pub const MAX_COVERAGE_DAYS: i64 = 90;

/// An order-quantity suggestion with the calculation laid out, so the caller
/// can show how the number was reached.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuantitySuggestion {
    /// Non-negative multiple of the item's packaging unit.
    pub quantity: u32,
    pub predictions_total: f64,
    pub net_need: f64,
    pub margin_units: f64,
    pub margin_pct: f64,
    pub coverage_until: NaiveDate,
    pub coverage_days: u32,
    pub estimated_cost: f64,
}

/// `net = sum(forecast through target) - stock`, `max(net, 0)` grown by the
/// safety margin, rounded up to the next packaging multiple. Synchronous and
/// on demand: target date and margin are user-supplied at call time.
pub fn suggest_quantity(
    item: &Item,
    forecast: &[ForecastPoint],
    today: NaiveDate,
    target_date: NaiveDate,
    margin_pct: f64,
) -> Result<QuantitySuggestion, EngineError> {
    if !(0.0..=50.0).contains(&margin_pct) {
        return Err(EngineError::InvalidMargin(margin_pct));
    }

    let requested_days = (target_date - today).num_days();
    if requested_days < 1 {
        return Err(EngineError::InvalidTargetDate {
            target: target_date,
            today,
        });
    }
    let coverage_days = requested_days.min(MAX_COVERAGE_DAYS);
    let coverage_until = today + Duration::days(coverage_days);

    let predictions_total: f64 = forecast
        .iter()
        .take(coverage_days as usize)
        .map(|point| point.quantity)
        .sum();

    let net = predictions_total - item.stock_actual as f64;
    let net_need = net.max(0.0);
    let with_margin = net_need * (1.0 + margin_pct / 100.0);

    let packaging = item.packaging_unit.max(1);
    let units = with_margin.ceil() as u32;
    let quantity = units.div_ceil(packaging) * packaging;

    Ok(QuantitySuggestion {
        quantity,
        predictions_total,
        net_need,
        margin_units: with_margin - net_need,
        margin_pct,
        coverage_until,
        coverage_days: coverage_days as u32,
        estimated_cost: quantity as f64 * item.unit_price,
    })
}
