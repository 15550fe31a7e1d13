use std::sync::Arc;

use dashmap::DashSet;

use crate::catalog::{QueryName, Scope};

type ExecutionKey = (QueryName, Scope);

/// Tracks which `(query, scope)` pairs currently have an execution running.
#[derive(Debug, Clone, Default)]
pub struct InflightRegistry {
    active: Arc<DashSet<ExecutionKey>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the pair, or returns `None` when an execution is already
    /// running for it. The claim is released when the permit drops.
    pub fn try_claim(&self, query: QueryName, scope: &Scope) -> Option<InflightPermit> {
        let key = (query, scope.clone());
        if !self.active.insert(key.clone()) {
            return None;
        }
        Some(InflightPermit {
            active: Arc::clone(&self.active),
            key,
        })
    }

    pub fn is_running(&self, query: QueryName, scope: &Scope) -> bool {
        self.active.contains(&(query, scope.clone()))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[derive(Debug)]
pub struct InflightPermit {
    active: Arc<DashSet<ExecutionKey>>,
    key: ExecutionKey,
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}
