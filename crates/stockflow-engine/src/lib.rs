//! Decision engine for the stockflow replenishment core.
//!
//! Turns forecast sequences plus current stock into boundary-exact alert
//! classifications, financial impact figures, and on-demand order-quantity
//! suggestions. All the arithmetic is pure; the async seams only fetch
//! inputs.

pub mod classify;
pub mod errors;
pub mod forecast;
pub mod quantity;

pub use classify::{CLIENT_LOSS_MULTIPLIER, Classification, classify, classify_item};
pub use errors::EngineError;
pub use forecast::{
    ForecastProvider, ForecastSeries, StaticForecastProvider, StoredForecastProvider,
    mean_absolute_percentage_error,
};
pub use quantity::{MAX_COVERAGE_DAYS, QuantitySuggestion, suggest_quantity};
