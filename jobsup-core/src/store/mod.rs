//! Contracts consumed from the metadata store client.
//!
//! The store is replicated and eventually consistent. The core never locks
//! it; all coordination goes through conditional updates on claim fields.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use jobsup_model::StoreRecord;

use crate::filter::Filter;

pub use memory::InMemoryRecordStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("etag conflict on {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-request options forwarded to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub limit: Option<u32>,
    /// Correlation id shared by every request of one logical operation.
    pub request_id: Option<Uuid>,
}

impl RequestOptions {
    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated { etag: String },
    Conflict,
}

/// Bucketed record access.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn query(
        &self,
        bucket: &str,
        filter: &Filter,
        options: RequestOptions,
    ) -> StoreResult<Vec<StoreRecord>>;

    async fn count(&self, bucket: &str, filter: &Filter) -> StoreResult<u64>;

    /// Writes `record` if its `etag` still matches the stored one. A record
    /// without an etag is only written when the key does not exist yet.
    async fn update(&self, bucket: &str, record: StoreRecord) -> StoreResult<UpdateOutcome>;
}

/// Object metadata lookups used by the locator.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_metadata(
        &self,
        key: &str,
        request_id: Uuid,
    ) -> StoreResult<serde_json::Value>;

    /// Resolves once the client has a usable connection.
    async fn wait_connected(&self) -> StoreResult<()>;

    async fn close(&self);
}
