use serde::{Deserialize, Serialize};

use jobsup_core::catalog::Bucket;
use jobsup_core::config::{BucketNames, ReconcileConfig, Tunables};
use jobsup_core::locator::LocatorKind;

/// Default metadata store endpoint.
pub const DEFAULT_STORE_URL: &str = "tcp://127.0.0.1:2020";

/// Top-level supervisor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Identifier of this worker process, recorded on health rows.
    pub instance: String,
    pub store: StoreConfig,
    /// Physical bucket names, keyed by logical bucket.
    pub buckets: BucketNames,
    pub tunables: Tunables,
    /// Locator implementation. Only `"manta"` is supported.
    pub locator: String,
    /// Default tracing filter; `RUST_LOG` wins when set.
    pub log_filter: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            instance: "jobsup-0".to_string(),
            store: StoreConfig::default(),
            buckets: BucketNames::default(),
            tunables: Tunables::default(),
            locator: LocatorKind::default().as_str().to_string(),
            log_filter: "info,jobsup::store=warn".to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Scheduler view of the configuration.
    pub fn reconcile(&self) -> ReconcileConfig {
        ReconcileConfig {
            buckets: self.buckets.clone(),
            tunables: self.tunables,
        }
    }

    pub fn locator_kind(&self) -> jobsup_core::Result<LocatorKind> {
        LocatorKind::parse(Some(&self.locator))
    }

    pub fn bucket(&self, bucket: Bucket) -> &str {
        self.buckets.resolve(bucket)
    }
}

/// Metadata store connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    /// Index tier used by the locator; falls back to `url` when empty.
    pub index_url: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STORE_URL.to_string(),
            index_url: String::new(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn locator_url(&self) -> &str {
        if self.index_url.trim().is_empty() {
            &self.url
        } else {
            &self.index_url
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_timeout_ms: u64,
    /// Attempts before giving up; `None` retries forever.
    pub retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_timeout_ms: 30_000,
            retries: None,
        }
    }
}
