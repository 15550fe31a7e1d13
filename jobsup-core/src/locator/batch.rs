use std::collections::HashMap;
use std::future::IntoFuture;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use jobsup_model::LocationResult;

use super::error::LocateError;
use crate::error::{Result, SupervisorError};

pub type LocateOutcome = std::result::Result<LocationResult, LocateError>;

/// Outcome for one input key.
#[derive(Debug, Clone, PartialEq)]
pub struct LocateEntry {
    pub key: String,
    pub outcome: LocateOutcome,
}

/// Results of one batch, in input-key order. Duplicate input keys keep one
/// entry each.
#[derive(Debug, Clone, PartialEq)]
pub struct LocateResults {
    request_id: Uuid,
    entries: Vec<LocateEntry>,
}

impl LocateResults {
    pub(crate) fn new(request_id: Uuid, entries: Vec<LocateEntry>) -> Self {
        Self {
            request_id,
            entries,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocateEntry> {
        self.entries.iter()
    }

    /// Outcome of the first entry for `key`.
    pub fn get(&self, key: &str) -> Option<&LocateOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.outcome)
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|entry| entry.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn into_entries(self) -> Vec<LocateEntry> {
        self.entries
    }

    /// Outcomes by key. Like [`get`](Self::get), the first entry of a
    /// repeated key wins.
    pub fn into_map(self) -> HashMap<String, LocateOutcome> {
        let mut map = HashMap::with_capacity(self.entries.len());
        for entry in self.entries {
            map.entry(entry.key).or_insert(entry.outcome);
        }
        map
    }
}

impl IntoIterator for LocateResults {
    type Item = LocateEntry;
    type IntoIter = std::vec::IntoIter<LocateEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

pub(crate) enum BatchState {
    Ready(LocateResults),
    /// Resolves to `None` when the batch was cancelled before finishing.
    Running(JoinHandle<Option<Vec<LocateEntry>>>),
    Closed,
}

/// Handle to one in-flight `locate` call.
///
/// Dropping the handle cancels the batch. Awaiting it (or [`join`]) yields
/// every key's outcome exactly once.
///
/// [`join`]: LocateBatch::join
pub struct LocateBatch {
    request_id: Uuid,
    token: CancellationToken,
    _guard: DropGuard,
    state: BatchState,
}

impl std::fmt::Debug for LocateBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            BatchState::Ready(_) => "ready",
            BatchState::Running(handle) if handle.is_finished() => "finished",
            BatchState::Running(_) => "running",
            BatchState::Closed => "closed",
        };
        f.debug_struct("LocateBatch")
            .field("request_id", &self.request_id)
            .field("state", &state)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl LocateBatch {
    pub(crate) fn new(request_id: Uuid, token: CancellationToken, state: BatchState) -> Self {
        Self {
            request_id,
            _guard: token.clone().drop_guard(),
            token,
            state,
        }
    }

    /// Correlation id shared by every lookup of this batch.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Abandons the batch. Lookups still running are dropped.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn join(self) -> Result<LocateResults> {
        let LocateBatch {
            request_id,
            state,
            _guard,
            ..
        } = self;

        match state {
            BatchState::Ready(results) => Ok(results),
            BatchState::Closed => Err(SupervisorError::Cancelled(format!(
                "locator closed before batch {request_id} started"
            ))),
            BatchState::Running(handle) => match handle.await {
                Ok(Some(entries)) => Ok(LocateResults::new(request_id, entries)),
                Ok(None) => Err(SupervisorError::Cancelled(format!(
                    "locate batch {request_id} cancelled"
                ))),
                Err(err) => Err(SupervisorError::Internal(format!(
                    "locate batch {request_id} failed: {err}"
                ))),
            },
        }
    }
}

impl IntoFuture for LocateBatch {
    type Output = Result<LocateResults>;
    type IntoFuture = BoxFuture<'static, Result<LocateResults>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.join())
    }
}
