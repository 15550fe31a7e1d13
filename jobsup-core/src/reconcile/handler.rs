use async_trait::async_trait;

use jobsup_model::StoreRecord;

use crate::catalog::{QueryName, Scope};
use crate::error::Result;

/// One matching record handed to the job-lifecycle handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub query: QueryName,
    pub scope: Scope,
    pub record: StoreRecord,
}

/// Receives query results and performs the side effects of each transition.
///
/// Deliveries are at-least-once: the same record keeps matching until the
/// handler writes its claim timestamp, so implementations must be idempotent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransitionHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery) -> Result<()>;

    /// Count produced by an on-demand counting query.
    async fn counted(&self, _query: QueryName, _scope: Scope, _count: u64) {}

    /// A query execution failed; it will run again on its next tick.
    async fn query_failed(&self, _query: QueryName, _scope: Scope, _error: String) {}
}
