use crate::store::{StoreError, StoreResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One cached value with its computation timestamp and time-to-live. The
/// cache records age truthfully; whether stale data is acceptable is the
/// caller's decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub computed_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    /// Pure view of the entry as of `now`. Staleness is boundary inclusive:
    /// an entry whose age equals its TTL is already stale.
    pub fn reading_at(&self, now: DateTime<Utc>) -> CacheReading {
        let age = (now - self.computed_at).max(Duration::zero());
        let is_stale = age >= Duration::seconds(self.ttl_seconds as i64);
        CacheReading {
            value: self.value.clone(),
            computed_at: self.computed_at,
            age,
            is_stale,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CacheReading {
    pub value: Value,
    pub computed_at: DateTime<Utc>,
    pub age: Duration,
    pub is_stale: bool,
}

/// Key/value store with visible staleness. `get` on a stale entry still
/// returns the value; only a never-written key is a miss.
#[async_trait::async_trait]
pub trait FreshnessCache: Send + Sync {
    async fn put(&self, key: &str, value: Value, ttl_seconds: u64) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<CacheReading>>;
}

/// Stable key scheme, `<domain>:<item_or_aggregate_id>`.
pub mod cache_keys {
    use crate::types::ItemId;

    pub fn alerts(item_id: &ItemId) -> String {
        format!("alerts:{item_id}")
    }

    pub fn quantity(item_id: &ItemId) -> String {
        format!("quantity:{item_id}")
    }

    pub fn accuracy(item_id: &ItemId) -> String {
        format!("accuracy:{item_id}")
    }

    pub fn kpis() -> String {
        "kpis:summary".to_string()
    }

    pub fn dormant_stock() -> String {
        "dormant:summary".to_string()
    }

    pub fn last_run() -> String {
        "batch:last_run".to_string()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryFreshnessCache {
    entries: Arc<Mutex<BTreeMap<String, CacheEntry>>>,
}

impl MemoryFreshnessCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: BTreeMap<String, CacheEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, CacheEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, CacheEntry>> {
        self.entries.lock().expect("cache mutex should lock")
    }
}

#[async_trait::async_trait]
impl FreshnessCache for MemoryFreshnessCache {
    async fn put(&self, key: &str, value: Value, ttl_seconds: u64) -> StoreResult<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            computed_at: Utc::now(),
            ttl_seconds,
        };
        self.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<CacheReading>> {
        Ok(self.lock().get(key).map(|entry| entry.reading_at(Utc::now())))
    }
}

const CACHE_FILE_NAME: &str = "stockflow-cache.json";

/// Filesystem-backed cache, same persist discipline as [`crate::FsRecordStore`].
#[derive(Clone, Debug)]
pub struct FsFreshnessCache {
    cache_file: PathBuf,
    inner: MemoryFreshnessCache,
}

impl FsFreshnessCache {
    pub fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        fs::create_dir_all(root.as_ref())
            .map_err(|err| StoreError::Backend(format!("create cache root failed: {err}")))?;
        let cache_file = root.as_ref().join(CACHE_FILE_NAME);
        let entries = if cache_file.exists() {
            let raw = fs::read(&cache_file)
                .map_err(|err| StoreError::Backend(format!("read cache file failed: {err}")))?;
            serde_json::from_slice::<BTreeMap<String, CacheEntry>>(&raw)
                .map_err(|err| StoreError::Serialization(err.to_string()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            cache_file,
            inner: MemoryFreshnessCache::from_entries(entries),
        })
    }

    fn persist(&self) -> StoreResult<()> {
        let snapshot = self.inner.snapshot();
        let raw = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let tmp = self.cache_file.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|err| StoreError::Backend(format!("write cache file failed: {err}")))?;
        fs::rename(&tmp, &self.cache_file)
            .map_err(|err| StoreError::Backend(format!("rename cache file failed: {err}")))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FreshnessCache for FsFreshnessCache {
    async fn put(&self, key: &str, value: Value, ttl_seconds: u64) -> StoreResult<()> {
        self.inner.put(key, value, ttl_seconds).await?;
        self.persist()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<CacheReading>> {
        self.inner.get(key).await
    }
}
