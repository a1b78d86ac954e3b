//! Record store and freshness cache for the stockflow replenishment core.
//!
//! The record store owns the durable inventory facts (items, forecast
//! snapshots, alerts, task history); the freshness cache decouples the
//! nightly batch from interactive reads while always exposing the true age
//! of what it serves.

pub mod cache;
pub mod fs;
pub mod memory;
pub mod store;
pub mod types;

pub use cache::{
    CacheEntry, CacheReading, FreshnessCache, FsFreshnessCache, MemoryFreshnessCache, cache_keys,
};
pub use fs::FsRecordStore;
pub use memory::MemoryRecordStore;
pub use store::{RecordStore, StoreError, StoreResult};
pub use types::{
    Alert, AlertTransition, ForecastPoint, Item, ItemId, RunId, Severity, TaskResultRecord,
};
