//! Fixed catalog of store queries driving reconciliation.
//!
//! Each [`QueryName`] maps to a static [`QueryDescriptor`]: the logical
//! bucket it reads, whether it only counts, how often it runs and a pure
//! predicate builder for its scope. Nothing here performs I/O.

pub mod queries;
pub mod stages;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use jobsup_model::{DomainId, JobId, TaskId};

use crate::config::Tunables;
use crate::error::{Result, SupervisorError};
use crate::filter::Filter;

pub use stages::{ClaimStage, Guard, JobState, TaskState, Transition};

/// Logical record buckets. Physical names come from
/// [`BucketNames`](crate::config::BucketNames).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Health,
    Domain,
    Storage,
    Job,
    JobInput,
    Task,
    TaskInput,
    TaskOutput,
    Error,
}

impl Bucket {
    pub const ALL: [Bucket; 9] = [
        Bucket::Health,
        Bucket::Domain,
        Bucket::Storage,
        Bucket::Job,
        Bucket::JobInput,
        Bucket::Task,
        Bucket::TaskInput,
        Bucket::TaskOutput,
        Bucket::Error,
    ];

    pub fn logical_name(self) -> &'static str {
        match self {
            Bucket::Health => "health",
            Bucket::Domain => "domain",
            Bucket::Storage => "storage",
            Bucket::Job => "job",
            Bucket::JobInput => "jobinput",
            Bucket::Task => "task",
            Bucket::TaskInput => "taskinput",
            Bucket::TaskOutput => "taskoutput",
            Bucket::Error => "error",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.logical_name())
    }
}

/// How and when a query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    GlobalPeriodic,
    GlobalOneShot,
    DomainOneShot,
    DomainPeriodic,
    /// Per-job record queries run on demand.
    JobOneShot,
    /// Per-job counting queries; completion barriers and statistics.
    JobCount,
}

/// Symbolic names of every catalog query, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryName {
    AgentHealth,
    WorkerHealth,
    WorkerDomains,
    StorageRoster,
    JobsCreated,

    JobsOwned,

    JobsCancelled,
    JobsInputEnded,
    JobInputs,
    TasksDone,
    TasksNeedingOutputsMarked,
    TasksNeedingInputsMarked,
    TasksNeedingInputsRetried,
    TasksNeedingDelete,
    TaskInputsNeedingDelete,
    TasksNeedingRetry,
    TaskInputsNeedingRetry,
    TaskOutputsUnpropagated,

    CountTasksUncommitted,
    CountTasksNeedingRetry,
    CountTaskInputsNeedingRetry,
    CountTasksNeedingOutputsMarked,
    CountTasksNeedingInputsMarked,
    CountTasksNeedingInputsRetried,
    CountTaskOutputsUnpropagated,

    CountErrors,
    CountRetries,
    CountInputsRead,
    CountOutputs,
    CountTasksDispatched,
    CountTasksCommittedOk,
    CountTasksCommittedFail,
    ReduceTasks,
    CountReduceTaskInputs,
    CountTasksNeedingDelete,
    CountTaskInputsNeedingDelete,
}

impl QueryName {
    pub const ALL: [QueryName; 36] = [
        QueryName::AgentHealth,
        QueryName::WorkerHealth,
        QueryName::WorkerDomains,
        QueryName::StorageRoster,
        QueryName::JobsCreated,
        QueryName::JobsOwned,
        QueryName::JobsCancelled,
        QueryName::JobsInputEnded,
        QueryName::JobInputs,
        QueryName::TasksDone,
        QueryName::TasksNeedingOutputsMarked,
        QueryName::TasksNeedingInputsMarked,
        QueryName::TasksNeedingInputsRetried,
        QueryName::TasksNeedingDelete,
        QueryName::TaskInputsNeedingDelete,
        QueryName::TasksNeedingRetry,
        QueryName::TaskInputsNeedingRetry,
        QueryName::TaskOutputsUnpropagated,
        QueryName::CountTasksUncommitted,
        QueryName::CountTasksNeedingRetry,
        QueryName::CountTaskInputsNeedingRetry,
        QueryName::CountTasksNeedingOutputsMarked,
        QueryName::CountTasksNeedingInputsMarked,
        QueryName::CountTasksNeedingInputsRetried,
        QueryName::CountTaskOutputsUnpropagated,
        QueryName::CountErrors,
        QueryName::CountRetries,
        QueryName::CountInputsRead,
        QueryName::CountOutputs,
        QueryName::CountTasksDispatched,
        QueryName::CountTasksCommittedOk,
        QueryName::CountTasksCommittedFail,
        QueryName::ReduceTasks,
        QueryName::CountReduceTaskInputs,
        QueryName::CountTasksNeedingDelete,
        QueryName::CountTaskInputsNeedingDelete,
    ];

    pub fn descriptor(self) -> &'static QueryDescriptor {
        &queries::CATALOG[self as usize]
    }

    /// Human-readable name used in logs and handler dispatch.
    pub fn label(self) -> &'static str {
        self.descriptor().label
    }

    /// Queries of one class, in catalog order.
    pub fn of_class(class: QueryClass) -> impl Iterator<Item = QueryName> {
        QueryName::ALL
            .into_iter()
            .filter(move |name| name.descriptor().class == class)
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a query execution is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Domain(DomainId),
    Phase { job: JobId, phase: u32 },
    Job(JobId),
    Task(TaskId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Domain(domain) => write!(f, "domain {domain}"),
            Scope::Phase { job, phase } => write!(f, "job {job} phase {phase}"),
            Scope::Job(job) => write!(f, "job {job}"),
            Scope::Task(task) => write!(f, "task {task}"),
        }
    }
}

/// Predicate builder, keyed by the scope it accepts.
#[derive(Debug, Clone, Copy)]
pub enum Predicate {
    Global(fn() -> Filter),
    Domain(fn(&DomainId) -> Filter),
    Phase(fn(&JobId, u32) -> Filter),
    Job(fn(&JobId) -> Filter),
    Task(fn(&TaskId) -> Filter),
}

impl Predicate {
    fn scope_kind(&self) -> &'static str {
        match self {
            Predicate::Global(_) => "global",
            Predicate::Domain(_) => "domain",
            Predicate::Phase(_) => "job phase",
            Predicate::Job(_) => "job",
            Predicate::Task(_) => "task",
        }
    }
}

/// Where a periodic query's cadence comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Runs once or on demand.
    None,
    AgentPoll,
    WorkerPoll,
    DomainPoll,
    FixedMillis(u64),
}

impl Cadence {
    pub fn resolve(self, tunables: &Tunables) -> Option<Duration> {
        match self {
            Cadence::None => None,
            Cadence::AgentPoll => Some(tunables.time_agent_poll()),
            Cadence::WorkerPoll => Some(tunables.time_worker_poll()),
            Cadence::DomainPoll => Some(tunables.time_poll()),
            Cadence::FixedMillis(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

/// Execution options derived from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub cadence: Option<Duration>,
    pub limit: Option<u32>,
}

#[derive(Debug)]
pub struct QueryDescriptor {
    pub name: QueryName,
    pub label: &'static str,
    pub bucket: Bucket,
    pub class: QueryClass,
    pub count_only: bool,
    pub cadence: Cadence,
    /// Whether the configured result limit applies.
    pub limited: bool,
    pub builder: Predicate,
}

impl QueryDescriptor {
    pub fn options(&self, tunables: &Tunables) -> QueryOptions {
        QueryOptions {
            cadence: self.cadence.resolve(tunables),
            limit: self.limited.then_some(tunables.query_limit),
        }
    }

    /// Builds the filter for `scope`, rejecting scopes of the wrong kind.
    pub fn predicate(&self, scope: &Scope) -> Result<Filter> {
        match (&self.builder, scope) {
            (Predicate::Global(build), Scope::Global) => Ok(build()),
            (Predicate::Domain(build), Scope::Domain(domain)) => Ok(build(domain)),
            (Predicate::Phase(build), Scope::Phase { job, phase }) => Ok(build(job, *phase)),
            (Predicate::Job(build), Scope::Job(job)) => Ok(build(job)),
            (Predicate::Task(build), Scope::Task(task)) => Ok(build(task)),
            (builder, scope) => Err(SupervisorError::InvalidArgument(format!(
                "query \"{}\" takes a {} scope, got {scope}",
                self.label,
                builder.scope_kind()
            ))),
        }
    }
}
