use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use jobsup_model::{NodeIdentity, StoreRecord};

use crate::catalog::stages::fields::{MANTA_COMPUTE_ID, MANTA_STORAGE_ID, ZONE_UUID};
use crate::catalog::{QueryName, Scope};
use crate::config::ReconcileConfig;
use crate::error::Result;
use crate::store::{RecordStore, RequestOptions};

pub type NodeMap = HashMap<String, NodeIdentity>;

/// Storage-node id to compute/zone identity, shared with the locator.
///
/// Readers take a snapshot per batch, so a refresh between calls never
/// changes the view of a batch already running.
#[derive(Clone, Default)]
pub struct NodeDirectory {
    nodes: Arc<RwLock<Arc<NodeMap>>>,
}

impl fmt::Debug for NodeDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDirectory")
            .field("nodes", &self.len())
            .finish()
    }
}

impl NodeDirectory {
    pub fn new(nodes: NodeMap) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(Arc::new(nodes))),
        }
    }

    pub fn snapshot(&self) -> Arc<NodeMap> {
        let guard = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    pub fn replace(&self, nodes: NodeMap) {
        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(nodes);
    }

    pub fn insert(&self, storage_id: impl Into<String>, identity: NodeIdentity) {
        let mut guard = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut *guard).insert(storage_id.into(), identity);
    }

    pub fn get(&self, storage_id: &str) -> Option<NodeIdentity> {
        self.snapshot().get(storage_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Replaces the map with the rows of a storage roster query. Rows
    /// without the three identity fields are skipped. Returns the number of
    /// nodes now known.
    pub fn apply_roster(&self, rows: &[StoreRecord]) -> usize {
        let mut nodes = NodeMap::with_capacity(rows.len());
        for row in rows {
            let (Some(storage_id), Some(compute_id), Some(zone_id)) = (
                row.str_field(MANTA_STORAGE_ID),
                row.str_field(MANTA_COMPUTE_ID),
                row.str_field(ZONE_UUID),
            ) else {
                warn!(
                    target: "jobsup::locator",
                    key = %row.key,
                    "skipping malformed storage roster row"
                );
                continue;
            };
            nodes.insert(
                storage_id.to_string(),
                NodeIdentity {
                    compute_id: compute_id.to_string(),
                    zone_id: zone_id.to_string(),
                },
            );
        }

        let known = nodes.len();
        self.replace(nodes);
        debug!(target: "jobsup::locator", nodes = known, "node directory refreshed");
        known
    }

    /// Runs the storage roster query against `store` and replaces the map
    /// with its rows.
    pub async fn refresh<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        config: &ReconcileConfig,
    ) -> Result<usize> {
        let descriptor = QueryName::StorageRoster.descriptor();
        let filter = descriptor.predicate(&Scope::Global)?;
        let options =
            RequestOptions::default().with_limit(descriptor.options(&config.tunables).limit);
        let rows = store
            .query(config.buckets.resolve(descriptor.bucket), &filter, options)
            .await?;
        Ok(self.apply_roster(&rows))
    }
}
