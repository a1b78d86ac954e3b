use chrono::NaiveDate;
use stockflow_store::{ItemId, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Stock or forecast is missing for an item; the caller skips the item
    /// and flags it, the surrounding run keeps going.
    #[error("classification input missing for '{item_id}': no {what}")]
    MissingInput { item_id: ItemId, what: &'static str },

    #[error("safety margin {0}% out of range (0-50)")]
    InvalidMargin(f64),

    #[error("target date {target} is not after today ({today})")]
    InvalidTargetDate { target: NaiveDate, today: NaiveDate },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether the error means "skip this item, continue the pass".
    pub fn is_input_gap(&self) -> bool {
        matches!(
            self,
            Self::MissingInput { .. } | Self::Store(StoreError::NotFound { .. })
        )
    }
}
