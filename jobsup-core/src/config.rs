use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::Bucket;

/// Knobs consumed by the reconciliation scheduler.
///
/// All fields carry defaults so deployments only override what they need.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Physical bucket names backing each logical bucket.
    pub buckets: BucketNames,
    /// Poll cadences and result limits.
    pub tunables: Tunables,
}

/// Poll cadences (milliseconds) and result-size limits for catalog queries.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tunables {
    /// Cadence of every per-domain periodic query.
    pub time_poll_ms: u64,
    /// Cadence of the agent health query.
    pub time_agent_poll_ms: u64,
    /// Cadence of the worker health and domain roster queries.
    pub time_worker_poll_ms: u64,
    /// Cadence of the storage roster query.
    pub time_storage_poll_ms: u64,
    /// Result limit applied to global periodic queries.
    pub query_limit: u32,
}

impl Tunables {
    pub fn time_poll(&self) -> Duration {
        Duration::from_millis(self.time_poll_ms)
    }

    pub fn time_agent_poll(&self) -> Duration {
        Duration::from_millis(self.time_agent_poll_ms)
    }

    pub fn time_worker_poll(&self) -> Duration {
        Duration::from_millis(self.time_worker_poll_ms)
    }

    pub fn time_storage_poll(&self) -> Duration {
        Duration::from_millis(self.time_storage_poll_ms)
    }

    /// Name of the first knob set to zero, if any.
    pub fn first_zero(&self) -> Option<&'static str> {
        [
            ("time_poll_ms", self.time_poll_ms),
            ("time_agent_poll_ms", self.time_agent_poll_ms),
            ("time_worker_poll_ms", self.time_worker_poll_ms),
            ("time_storage_poll_ms", self.time_storage_poll_ms),
            ("query_limit", u64::from(self.query_limit)),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0)
        .map(|(field, _)| field)
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            time_poll_ms: 5_000,
            time_agent_poll_ms: 10_000,
            time_worker_poll_ms: 10_000,
            time_storage_poll_ms: 360_000,
            query_limit: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BucketNames {
    pub health: String,
    pub domain: String,
    pub storage: String,
    pub job: String,
    pub jobinput: String,
    pub task: String,
    pub taskinput: String,
    pub taskoutput: String,
    pub error: String,
}

impl BucketNames {
    pub fn resolve(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Health => &self.health,
            Bucket::Domain => &self.domain,
            Bucket::Storage => &self.storage,
            Bucket::Job => &self.job,
            Bucket::JobInput => &self.jobinput,
            Bucket::Task => &self.task,
            Bucket::TaskInput => &self.taskinput,
            Bucket::TaskOutput => &self.taskoutput,
            Bucket::Error => &self.error,
        }
    }

    /// Logical buckets whose configured name is blank.
    pub fn blank(&self) -> Vec<Bucket> {
        Bucket::ALL
            .into_iter()
            .filter(|bucket| self.resolve(*bucket).trim().is_empty())
            .collect()
    }
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            health: Bucket::Health.logical_name().to_string(),
            domain: Bucket::Domain.logical_name().to_string(),
            storage: Bucket::Storage.logical_name().to_string(),
            job: Bucket::Job.logical_name().to_string(),
            jobinput: Bucket::JobInput.logical_name().to_string(),
            task: Bucket::Task.logical_name().to_string(),
            taskinput: Bucket::TaskInput.logical_name().to_string(),
            taskoutput: Bucket::TaskOutput.logical_name().to_string(),
            error: Bucket::Error.logical_name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_zero_names_the_knob() {
        assert_eq!(Tunables::default().first_zero(), None);

        let tunables = Tunables {
            time_worker_poll_ms: 0,
            query_limit: 0,
            ..Tunables::default()
        };
        assert_eq!(tunables.first_zero(), Some("time_worker_poll_ms"));
    }
}
