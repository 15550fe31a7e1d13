//! Object locator.
//!
//! Turns a batch of object keys into verified placement records: one
//! metadata lookup per key, run in parallel under a shared request id, each
//! normalized into a [`LocationResult`] whose shark copies are enriched with
//! the compute identity from the [`NodeDirectory`]. Failures are classified
//! per key and never fail the batch.

pub mod batch;
pub mod directory;
pub mod error;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use jobsup_model::{LocationResult, SharkPlacement};

use crate::catalog::stages::fields::MANTA_STORAGE_ID;
use crate::error::{Result, SupervisorError};
use crate::store::MetadataStore;

pub use batch::{LocateBatch, LocateEntry, LocateOutcome, LocateResults};
pub use directory::{NodeDirectory, NodeMap};
pub use error::LocateError;

use batch::BatchState;

/// Supported locator implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocatorKind {
    /// Resolves keys through the metadata index tier.
    #[default]
    Manta,
}

impl LocatorKind {
    /// Parses the configured kind; unset selects the default.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") | Some("manta") => Ok(LocatorKind::Manta),
            Some(other) => Err(SupervisorError::InvalidArgument(format!(
                "unsupported value for property \"locator\": {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LocatorKind::Manta => "manta",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorStatus {
    Connecting,
    Ready,
    Closed,
}

pub struct Locator<M: MetadataStore + 'static> {
    kind: LocatorKind,
    store: Arc<M>,
    nodes: NodeDirectory,
    status: watch::Sender<LocatorStatus>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<M: MetadataStore + 'static> std::fmt::Debug for Locator<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator")
            .field("kind", &self.kind)
            .field("status", &self.status())
            .field("nodes", &self.nodes)
            .finish()
    }
}

impl<M: MetadataStore + 'static> Locator<M> {
    pub fn new(store: Arc<M>, nodes: NodeDirectory) -> Self {
        let (status, _) = watch::channel(LocatorStatus::Connecting);
        Self {
            kind: LocatorKind::Manta,
            store,
            nodes,
            status,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Builds the locator selected by the `locator` configuration property.
    pub fn from_config(kind: Option<&str>, store: Arc<M>, nodes: NodeDirectory) -> Result<Self> {
        let kind = LocatorKind::parse(kind)?;
        Ok(Self {
            kind,
            ..Self::new(store, nodes)
        })
    }

    pub fn kind(&self) -> LocatorKind {
        self.kind
    }

    pub fn status(&self) -> LocatorStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LocatorStatus> {
        self.status.subscribe()
    }

    pub fn nodes(&self) -> &NodeDirectory {
        &self.nodes
    }

    /// Waits for the store connection. Resolves immediately once ready.
    pub async fn ready(&self) -> Result<()> {
        match self.status() {
            LocatorStatus::Ready => return Ok(()),
            LocatorStatus::Closed => {
                return Err(SupervisorError::Cancelled("locator is closed".to_string()));
            }
            LocatorStatus::Connecting => {}
        }

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                return Err(SupervisorError::Cancelled("locator is closed".to_string()));
            }
            connected = self.store.wait_connected() => connected?,
        }

        let became_ready = self.status.send_if_modified(|status| {
            if *status == LocatorStatus::Connecting {
                *status = LocatorStatus::Ready;
                true
            } else {
                false
            }
        });
        if became_ready {
            info!(target: "jobsup::locator", kind = self.kind.as_str(), "locator ready");
        }
        Ok(())
    }

    /// Starts resolving `keys` and returns a handle to the batch.
    pub fn locate<I>(&self, keys: I) -> LocateBatch
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let request_id = Uuid::now_v7();
        let token = self.shutdown.child_token();
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();

        if token.is_cancelled() {
            return LocateBatch::new(request_id, token, BatchState::Closed);
        }
        if keys.is_empty() {
            let empty = LocateResults::new(request_id, Vec::new());
            return LocateBatch::new(request_id, token, BatchState::Ready(empty));
        }

        debug!(target: "jobsup::locator", %request_id, keys = keys.len(), "locating objects");
        let handle = tokio::spawn(resolve_batch(
            Arc::clone(&self.store),
            self.nodes.snapshot(),
            keys,
            request_id,
            token.clone(),
        ));
        LocateBatch::new(request_id, token, BatchState::Running(handle))
    }

    pub async fn locate_all<I>(&self, keys: I) -> Result<LocateResults>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.locate(keys).join().await
    }

    /// Abandons every running batch and closes the store client. Safe to
    /// call more than once.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.store.close().await;
        self.status.send_replace(LocatorStatus::Closed);
        info!(target: "jobsup::locator", "locator closed");
    }
}

async fn resolve_batch<M: MetadataStore>(
    store: Arc<M>,
    nodes: Arc<NodeMap>,
    keys: Vec<String>,
    request_id: Uuid,
    token: CancellationToken,
) -> Option<Vec<LocateEntry>> {
    let store = store.as_ref();
    let nodes = nodes.as_ref();
    let lookups = keys.into_iter().map(|key| async move {
        let outcome = locate_one(store, nodes, &key, request_id).await;
        LocateEntry { key, outcome }
    });

    let entries = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!(target: "jobsup::locator", %request_id, "locate batch abandoned");
            return None;
        }
        entries = join_all(lookups) => entries,
    };
    debug!(
        target: "jobsup::locator",
        %request_id,
        located = entries.iter().filter(|entry| entry.outcome.is_ok()).count(),
        failed = entries.iter().filter(|entry| entry.outcome.is_err()).count(),
        "locate batch finished"
    );
    Some(entries)
}

async fn locate_one<M: MetadataStore>(
    store: &M,
    nodes: &NodeMap,
    key: &str,
    request_id: Uuid,
) -> LocateOutcome {
    let metadata = store.get_metadata(key, request_id).await?;
    build_location(&metadata, nodes)
}

fn required_str<'a>(metadata: &'a Value, field: &str) -> std::result::Result<&'a str, LocateError> {
    metadata
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| LocateError::internal(format!("missing or invalid \"{field}\" property")))
}

/// Validates object metadata and normalizes it into a location record.
pub fn build_location(metadata: &Value, nodes: &NodeMap) -> LocateOutcome {
    let kind = metadata.get("type").and_then(Value::as_str);
    if kind != Some("object") {
        return Err(LocateError::InvalidArgument(format!(
            "objects of type \"{}\" are not supported",
            kind.unwrap_or("none")
        )));
    }

    let Some(sharks) = metadata.get("sharks").and_then(Value::as_array) else {
        return Err(LocateError::internal("missing or invalid \"sharks\" property"));
    };

    let content_length = metadata.get("contentLength").and_then(Value::as_u64);
    if sharks.is_empty() && content_length != Some(0) {
        return Err(LocateError::internal("no sharks found for non-empty object"));
    }
    let content_length = content_length
        .ok_or_else(|| LocateError::internal("missing or invalid \"contentLength\" property"))?;

    let owner = required_str(metadata, "owner")?;
    let object_id = required_str(metadata, "objectId")?;
    let creator = metadata
        .get("creator")
        .and_then(Value::as_str)
        .filter(|creator| !creator.is_empty())
        .unwrap_or(owner);
    let roles = metadata
        .get("roles")
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let sharks = sharks
        .iter()
        .map(|shark| {
            let storage_id = required_str(shark, MANTA_STORAGE_ID)?;
            Ok(SharkPlacement::resolve(storage_id, nodes.get(storage_id)))
        })
        .collect::<std::result::Result<Vec<_>, LocateError>>()?;

    Ok(LocationResult {
        creator: creator.to_string(),
        owner: owner.to_string(),
        object_id: object_id.to_string(),
        content_length,
        roles,
        sharks,
    })
}
