//! In-process record and metadata store.
//!
//! Evaluates typed filters directly against JSON records. Latency, failures
//! and connection state can be injected at runtime, and every call is
//! counted, which makes it the fixture for scheduler and locator tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{RwLock, watch};
use tracing::debug;
use uuid::Uuid;

use jobsup_model::StoreRecord;

use super::{
    MetadataStore, RecordStore, RequestOptions, StoreError, StoreResult, UpdateOutcome,
};
use crate::filter::Filter;

#[derive(Debug, Clone)]
struct Row {
    value: Value,
    etag: String,
}

#[derive(Debug, Default)]
struct Faults {
    latency: Duration,
    key_delays: HashMap<String, Duration>,
    bucket_failures: HashMap<String, StoreError>,
    key_failures: HashMap<String, StoreError>,
}

/// Call counters exposed for assertions.
#[derive(Debug, Default)]
pub struct StoreStats {
    queries: AtomicU64,
    counts: AtomicU64,
    updates: AtomicU64,
    lookups: AtomicU64,
    closes: AtomicU64,
    peak_overlap: AtomicUsize,
}

impl StoreStats {
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> u64 {
        self.counts.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed for one
    /// `(bucket, filter)` pair.
    pub fn peak_overlap(&self) -> usize {
        self.peak_overlap.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct InMemoryRecordStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, Row>>>,
    objects: RwLock<HashMap<String, Value>>,
    faults: RwLock<Faults>,
    stats: StoreStats,
    active: DashMap<String, usize>,
    calls: DashMap<String, u64>,
    connected: watch::Sender<bool>,
    etag_seq: AtomicU64,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::with_connection(true)
    }

    /// Store that reports no connection until [`set_connected`](Self::set_connected).
    pub fn disconnected() -> Self {
        Self::with_connection(false)
    }

    fn with_connection(connected: bool) -> Self {
        let (connected, _) = watch::channel(connected);
        Self {
            buckets: RwLock::default(),
            objects: RwLock::default(),
            faults: RwLock::default(),
            stats: StoreStats::default(),
            active: DashMap::new(),
            calls: DashMap::new(),
            connected,
            etag_seq: AtomicU64::new(0),
        }
    }

    fn next_etag(&self) -> String {
        format!("e{}", self.etag_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Inserts or replaces a record, returning its new etag.
    pub async fn insert(&self, bucket: &str, key: &str, value: Value) -> String {
        let etag = self.next_etag();
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), Row { value, etag: etag.clone() });
        etag
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Option<StoreRecord> {
        let buckets = self.buckets.read().await;
        let row = buckets.get(bucket)?.get(key)?;
        Some(StoreRecord::new(key, row.value.clone()).with_etag(row.etag.clone()))
    }

    /// Registers object metadata served by `get_metadata`.
    pub async fn put_object(&self, key: &str, metadata: Value) {
        self.objects.write().await.insert(key.to_string(), metadata);
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.faults.write().await.latency = latency;
    }

    /// Extra delay applied to metadata lookups of one key.
    pub async fn delay_key(&self, key: &str, delay: Duration) {
        self.faults
            .write()
            .await
            .key_delays
            .insert(key.to_string(), delay);
    }

    pub async fn fail_bucket(&self, bucket: &str, error: StoreError) {
        self.faults
            .write()
            .await
            .bucket_failures
            .insert(bucket.to_string(), error);
    }

    pub async fn fail_key(&self, key: &str, error: StoreError) {
        self.faults
            .write()
            .await
            .key_failures
            .insert(key.to_string(), error);
    }

    pub async fn clear_faults(&self) {
        *self.faults.write().await = Faults::default();
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Queries and counts issued so far against `bucket` with `filter`.
    pub fn calls(&self, bucket: &str, filter: &Filter) -> u64 {
        self.calls
            .get(&format!("{bucket}:{filter}"))
            .map(|calls| *calls)
            .unwrap_or_default()
    }

    async fn bucket_call(&self, bucket: &str) -> StoreResult<()> {
        let (latency, failure) = {
            let faults = self.faults.read().await;
            (faults.latency, faults.bucket_failures.get(bucket).cloned())
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn matching(&self, bucket: &str, filter: &Filter) -> Vec<StoreRecord> {
        let buckets = self.buckets.read().await;
        let Some(rows) = buckets.get(bucket) else {
            return Vec::new();
        };
        rows.iter()
            .filter(|(_, row)| filter.matches(&row.value))
            .map(|(key, row)| {
                StoreRecord::new(key.clone(), row.value.clone()).with_etag(row.etag.clone())
            })
            .collect()
    }

    fn enter(&self, bucket: &str, filter: &Filter) -> ActiveCall<'_> {
        let key = format!("{bucket}:{filter}");
        *self.calls.entry(key.clone()).or_insert(0) += 1;
        let current = {
            let mut slot = self.active.entry(key.clone()).or_insert(0);
            *slot += 1;
            *slot
        };
        self.stats.peak_overlap.fetch_max(current, Ordering::SeqCst);
        ActiveCall {
            active: &self.active,
            key,
        }
    }
}

struct ActiveCall<'a> {
    active: &'a DashMap<String, usize>,
    key: String,
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        if let Some(mut slot) = self.active.get_mut(&self.key) {
            *slot = slot.saturating_sub(1);
        }
        self.active.remove_if(&self.key, |_, count| *count == 0);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn query(
        &self,
        bucket: &str,
        filter: &Filter,
        options: RequestOptions,
    ) -> StoreResult<Vec<StoreRecord>> {
        self.stats.queries.fetch_add(1, Ordering::SeqCst);
        let _active = self.enter(bucket, filter);
        self.bucket_call(bucket).await?;

        let mut records = self.matching(bucket, filter).await;
        if let Some(limit) = options.limit {
            records.truncate(limit as usize);
        }
        debug!(
            target: "jobsup::store",
            bucket,
            %filter,
            matched = records.len(),
            request_id = ?options.request_id,
            "query"
        );
        Ok(records)
    }

    async fn count(&self, bucket: &str, filter: &Filter) -> StoreResult<u64> {
        self.stats.counts.fetch_add(1, Ordering::SeqCst);
        let _active = self.enter(bucket, filter);
        self.bucket_call(bucket).await?;

        let count = self.matching(bucket, filter).await.len() as u64;
        debug!(target: "jobsup::store", bucket, %filter, count, "count");
        Ok(count)
    }

    async fn update(&self, bucket: &str, record: StoreRecord) -> StoreResult<UpdateOutcome> {
        self.stats.updates.fetch_add(1, Ordering::SeqCst);
        self.bucket_call(bucket).await?;

        let mut buckets = self.buckets.write().await;
        let rows = buckets.entry(bucket.to_string()).or_default();
        let current = rows.get(&record.key).map(|row| row.etag.as_str());
        if current != record.etag.as_deref() {
            debug!(
                target: "jobsup::store",
                bucket,
                key = %record.key,
                expected = ?record.etag,
                "conditional update lost"
            );
            return Ok(UpdateOutcome::Conflict);
        }

        let etag = self.next_etag();
        rows.insert(
            record.key,
            Row {
                value: record.value,
                etag: etag.clone(),
            },
        );
        Ok(UpdateOutcome::Updated { etag })
    }
}

#[async_trait]
impl MetadataStore for InMemoryRecordStore {
    async fn get_metadata(&self, key: &str, request_id: Uuid) -> StoreResult<Value> {
        self.stats.lookups.fetch_add(1, Ordering::SeqCst);
        let (delay, failure) = {
            let faults = self.faults.read().await;
            let delay = faults.latency + faults.key_delays.get(key).copied().unwrap_or_default();
            (delay, faults.key_failures.get(key).cloned())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        debug!(target: "jobsup::store", key, %request_id, "metadata lookup");
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn wait_connected(&self) -> StoreResult<()> {
        let mut connected = self.connected.subscribe();
        connected
            .wait_for(|connected| *connected)
            .await
            .map(|_| ())
            .map_err(|_| StoreError::Unavailable("connection watcher closed".to_string()))
    }

    async fn close(&self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.send_replace(false);
    }
}
