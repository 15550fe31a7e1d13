//! Claim-timestamp stage table.
//!
//! Every lifecycle transition the reconciler drives is recorded in the store
//! as presence or absence of fields rather than an explicit status column. A
//! stage is pending while its prerequisites hold, its start marker is present
//! (when it has one) and its end marker is absent. Markers are written once
//! and never cleared, so pending sets only ever shrink.
//!
//! [`STAGES`] is the one table both sides are generated from: the per-domain
//! periodic predicates and per-job completion barriers in the catalog, and
//! the in-memory [`TaskState`] / [`JobState`] classification of a record.

use serde_json::{Map, Value};

use jobsup_model::{DomainId, JobId};

use super::Bucket;
use crate::filter::{FALSE_VARIANTS, Filter, TRUE_VARIANTS};

/// Store field names used by the stage table and catalog.
pub mod fields {
    pub const DOMAIN: &str = "domain";
    pub const WORKER: &str = "worker";
    pub const JOB_ID: &str = "jobId";
    pub const TASK_ID: &str = "taskId";
    pub const PHASE_NUM: &str = "phaseNum";
    pub const STATE: &str = "state";
    pub const RESULT: &str = "result";
    pub const VALID: &str = "valid";
    pub const RETRIED: &str = "retried";
    pub const REDUCE_INDEX: &str = "rIdx";
    pub const INTERMEDIATE: &str = "intermediate";
    pub const RETRY_TASK_ID: &str = "retryTaskId";
    pub const WANT_RETRY: &str = "wantRetry";
    pub const WANT_INPUT_REMOVED: &str = "wantInputRemoved";

    pub const TIME_CANCELLED: &str = "timeCancelled";
    pub const TIME_JOB_CANCELLED: &str = "timeJobCancelled";
    pub const TIME_INPUT_DONE: &str = "timeInputDone";
    pub const TIME_INPUT_DONE_READ: &str = "timeInputDoneRead";
    pub const TIME_PROPAGATED: &str = "timePropagated";
    pub const TIME_DISPATCH_DONE: &str = "timeDispatchDone";
    pub const TIME_COMMITTED: &str = "timeCommitted";
    pub const TIME_OUTPUTS_MARK_START: &str = "timeOutputsMarkStart";
    pub const TIME_OUTPUTS_MARK_DONE: &str = "timeOutputsMarkDone";
    pub const TIME_INPUTS_MARK_CLEANUP_START: &str = "timeInputsMarkCleanupStart";
    pub const TIME_INPUTS_MARK_CLEANUP_DONE: &str = "timeInputsMarkCleanupDone";
    pub const TIME_INPUTS_MARK_RETRY_START: &str = "timeInputsMarkRetryStart";
    pub const TIME_INPUTS_MARK_RETRY_DONE: &str = "timeInputsMarkRetryDone";
    pub const TIME_RETRIED: &str = "timeRetried";
    pub const TIME_INPUT_REMOVED: &str = "timeInputRemoved";

    pub const COMPONENT: &str = "component";
    pub const DOMAIN_ID: &str = "domainId";
    pub const MANTA_STORAGE_ID: &str = "manta_storage_id";
    pub const MANTA_COMPUTE_ID: &str = "manta_compute_id";
    pub const ZONE_UUID: &str = "zone_uuid";

    pub const STATE_DONE: &str = "done";
    pub const RESULT_OK: &str = "ok";
}

use fields::*;

/// Placeholder claim timestamp written by fixture helpers.
pub const FIXTURE_TIMESTAMP: &str = "2014-01-01T00:00:00.000Z";

/// One atomic condition over a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Guard {
    Present(&'static str),
    Absent(&'static str),
    Is(&'static str, &'static str),
    IsNot(&'static str, &'static str),
    /// Boolean flag stored in either casing.
    FlagSet(&'static str),
    FlagUnset(&'static str),
}

impl Guard {
    pub fn negated(self) -> Guard {
        match self {
            Guard::Present(field) => Guard::Absent(field),
            Guard::Absent(field) => Guard::Present(field),
            Guard::Is(field, value) => Guard::IsNot(field, value),
            Guard::IsNot(field, value) => Guard::Is(field, value),
            Guard::FlagSet(field) => Guard::FlagUnset(field),
            Guard::FlagUnset(field) => Guard::FlagSet(field),
        }
    }

    pub fn filter(&self) -> Filter {
        match *self {
            Guard::Present(field) => Filter::present(field),
            Guard::Absent(field) => Filter::absent(field),
            Guard::Is(field, value) => Filter::equals(field, value),
            Guard::IsNot(field, value) => Filter::not_equals(field, value),
            Guard::FlagSet(field) => Filter::flag_set(field),
            Guard::FlagUnset(field) => Filter::negate(Filter::flag_set(field)),
        }
    }

    pub fn holds(&self, record: &Value) -> bool {
        self.filter().matches(record)
    }

    /// Writes the smallest field change that makes the guard hold (`hold`)
    /// or fail. Used to build fixture records.
    pub fn apply(&self, record: &mut Map<String, Value>, hold: bool) {
        let effective = if hold { *self } else { self.negated() };
        match effective {
            Guard::Present(field) => {
                record.insert(field.to_string(), Value::from(FIXTURE_TIMESTAMP));
            }
            Guard::Absent(field) => {
                record.remove(field);
            }
            Guard::Is(field, value) => {
                record.insert(field.to_string(), Value::from(value));
            }
            Guard::IsNot(field, value) => {
                record.insert(field.to_string(), Value::from(format!("not-{value}")));
            }
            Guard::FlagSet(field) => {
                record.insert(field.to_string(), Value::from(TRUE_VARIANTS[0]));
            }
            Guard::FlagUnset(field) => {
                record.insert(field.to_string(), Value::from(FALSE_VARIANTS[0]));
            }
        }
    }
}

/// Every monotonic transition the reconciler drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transition {
    JobCancel,
    JobInputEnd,
    JobInputFanout,
    TaskCommit,
    TaskOutputsMark,
    TaskInputsMarkCleanup,
    TaskInputsMarkRetry,
    TaskRetry,
    TaskInputRetry,
    TaskDelete,
    TaskInputDelete,
    TaskOutputPropagate,
}

impl Transition {
    pub const ALL: [Transition; 12] = [
        Transition::JobCancel,
        Transition::JobInputEnd,
        Transition::JobInputFanout,
        Transition::TaskCommit,
        Transition::TaskOutputsMark,
        Transition::TaskInputsMarkCleanup,
        Transition::TaskInputsMarkRetry,
        Transition::TaskRetry,
        Transition::TaskInputRetry,
        Transition::TaskDelete,
        Transition::TaskInputDelete,
        Transition::TaskOutputPropagate,
    ];

    pub fn stage(self) -> &'static ClaimStage {
        &STAGES[self as usize]
    }
}

/// Record field carrying the owning domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeField {
    /// Jobs record their owner as `worker`.
    Worker,
    /// Tasks, inputs and outputs record it as `domain`.
    Domain,
}

impl ScopeField {
    pub fn field(self) -> &'static str {
        match self {
            ScopeField::Worker => WORKER,
            ScopeField::Domain => DOMAIN,
        }
    }
}

/// Whether a completion barrier counts per phase or across the whole job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierScope {
    Phase,
    Job,
}

/// Per-job counting query paired with a stage.
///
/// The barrier counts the stage's guards minus `relaxed`. Relaxed guards are
/// ones a record may still fail while representing outstanding work (for
/// example a task whose dispatch has not finished is still uncommitted), so
/// dropping them only ever widens the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub scope: BarrierScope,
    pub relaxed: &'static [Guard],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimStage {
    pub transition: Transition,
    pub bucket: Bucket,
    pub scope: ScopeField,
    /// Upstream conditions that must already hold.
    pub requires: &'static [Guard],
    /// "Not yet cancelled/done" guard, in its holding form.
    pub live: Option<Guard>,
    /// Field written when the stage starts; `None` for stages that begin as
    /// soon as their prerequisites hold.
    pub start: Option<&'static str>,
    /// Condition that marks the stage finished.
    pub end: Guard,
    pub barrier: Option<Barrier>,
}

impl ClaimStage {
    /// Ordered guards of the "needing this stage" predicate, without scope.
    pub fn guards(&self) -> Vec<Guard> {
        let mut guards: Vec<Guard> = self.requires.to_vec();
        guards.extend(self.live);
        guards.extend(self.start.map(Guard::Present));
        guards.push(self.end.negated());
        guards
    }

    /// Predicate selecting records of `domain` with this stage pending.
    pub fn pending_filter(&self, domain: &DomainId) -> Filter {
        Filter::all(
            std::iter::once(Filter::equals(self.scope.field(), domain.as_str()))
                .chain(self.guards().iter().map(Guard::filter)),
        )
    }

    /// Evaluates the same guards as [`pending_filter`](Self::pending_filter)
    /// against one record, ignoring scope.
    pub fn is_pending(&self, record: &Value) -> bool {
        self.guards().iter().all(|guard| guard.holds(record))
    }

    pub fn is_finished(&self, record: &Value) -> bool {
        self.end.holds(record)
    }

    /// Guards counted by the completion barrier: the stage's guards minus
    /// the barrier's relaxations.
    pub fn barrier_guards(&self) -> Vec<Guard> {
        let relaxed = self.barrier.map(|barrier| barrier.relaxed).unwrap_or(&[]);
        self.guards()
            .into_iter()
            .filter(|guard| !relaxed.contains(guard))
            .collect()
    }

    /// Completion-barrier predicate over one job, narrowed to `phase` when
    /// given.
    pub fn barrier_filter(&self, job: &JobId, phase: Option<u32>) -> Filter {
        let mut clauses = vec![Filter::equals(JOB_ID, job.as_str())];
        if let Some(phase) = phase {
            clauses.push(Filter::equals(PHASE_NUM, phase.to_string()));
        }
        clauses.extend(self.barrier_guards().iter().map(Guard::filter));
        Filter::all(clauses)
    }
}

const COMMITTED: &[Guard] = &[Guard::Present(TIME_COMMITTED)];

pub static STAGES: [ClaimStage; 12] = [
    ClaimStage {
        transition: Transition::JobCancel,
        bucket: Bucket::Job,
        scope: ScopeField::Worker,
        requires: &[],
        live: None,
        start: Some(TIME_CANCELLED),
        end: Guard::Is(STATE, STATE_DONE),
        barrier: None,
    },
    ClaimStage {
        transition: Transition::JobInputEnd,
        bucket: Bucket::Job,
        scope: ScopeField::Worker,
        requires: &[],
        live: Some(Guard::IsNot(STATE, STATE_DONE)),
        start: Some(TIME_INPUT_DONE),
        end: Guard::Present(TIME_INPUT_DONE_READ),
        barrier: None,
    },
    ClaimStage {
        transition: Transition::JobInputFanout,
        bucket: Bucket::JobInput,
        scope: ScopeField::Domain,
        requires: &[],
        live: Some(Guard::Absent(TIME_JOB_CANCELLED)),
        start: None,
        end: Guard::Present(TIME_PROPAGATED),
        barrier: None,
    },
    ClaimStage {
        transition: Transition::TaskCommit,
        bucket: Bucket::Task,
        scope: ScopeField::Domain,
        requires: &[Guard::Is(STATE, STATE_DONE)],
        live: None,
        start: Some(TIME_DISPATCH_DONE),
        end: Guard::Present(TIME_COMMITTED),
        // An undispatched or still-running task is outstanding work too.
        barrier: Some(Barrier {
            scope: BarrierScope::Phase,
            relaxed: &[
                Guard::Is(STATE, STATE_DONE),
                Guard::Present(TIME_DISPATCH_DONE),
            ],
        }),
    },
    ClaimStage {
        transition: Transition::TaskOutputsMark,
        bucket: Bucket::Task,
        scope: ScopeField::Domain,
        requires: COMMITTED,
        live: Some(Guard::Absent(TIME_CANCELLED)),
        start: Some(TIME_OUTPUTS_MARK_START),
        end: Guard::Present(TIME_OUTPUTS_MARK_DONE),
        barrier: Some(Barrier {
            scope: BarrierScope::Phase,
            relaxed: &[],
        }),
    },
    ClaimStage {
        transition: Transition::TaskInputsMarkCleanup,
        bucket: Bucket::Task,
        scope: ScopeField::Domain,
        requires: COMMITTED,
        live: Some(Guard::Absent(TIME_CANCELLED)),
        start: Some(TIME_INPUTS_MARK_CLEANUP_START),
        end: Guard::Present(TIME_INPUTS_MARK_CLEANUP_DONE),
        barrier: Some(Barrier {
            scope: BarrierScope::Phase,
            relaxed: &[],
        }),
    },
    ClaimStage {
        transition: Transition::TaskInputsMarkRetry,
        bucket: Bucket::Task,
        scope: ScopeField::Domain,
        requires: COMMITTED,
        live: Some(Guard::Absent(TIME_CANCELLED)),
        start: Some(TIME_INPUTS_MARK_RETRY_START),
        end: Guard::Present(TIME_INPUTS_MARK_RETRY_DONE),
        barrier: Some(Barrier {
            scope: BarrierScope::Phase,
            relaxed: &[],
        }),
    },
    ClaimStage {
        transition: Transition::TaskRetry,
        bucket: Bucket::Task,
        scope: ScopeField::Domain,
        requires: &[
            Guard::Present(TIME_OUTPUTS_MARK_DONE),
            Guard::FlagSet(WANT_RETRY),
        ],
        live: Some(Guard::Absent(TIME_CANCELLED)),
        start: None,
        end: Guard::Present(TIME_RETRIED),
        // Tasks still marking outputs will need a retry too.
        barrier: Some(Barrier {
            scope: BarrierScope::Phase,
            relaxed: &[Guard::Present(TIME_OUTPUTS_MARK_DONE)],
        }),
    },
    ClaimStage {
        transition: Transition::TaskInputRetry,
        bucket: Bucket::TaskInput,
        scope: ScopeField::Domain,
        requires: &[Guard::Present(RETRY_TASK_ID)],
        live: Some(Guard::Absent(TIME_JOB_CANCELLED)),
        start: None,
        end: Guard::Present(TIME_RETRIED),
        barrier: Some(Barrier {
            scope: BarrierScope::Phase,
            relaxed: &[],
        }),
    },
    ClaimStage {
        transition: Transition::TaskDelete,
        bucket: Bucket::Task,
        scope: ScopeField::Domain,
        requires: &[Guard::Is(WANT_INPUT_REMOVED, "true")],
        live: None,
        start: None,
        end: Guard::Present(TIME_INPUT_REMOVED),
        barrier: Some(Barrier {
            scope: BarrierScope::Job,
            relaxed: &[],
        }),
    },
    ClaimStage {
        transition: Transition::TaskInputDelete,
        bucket: Bucket::TaskInput,
        scope: ScopeField::Domain,
        requires: &[Guard::Is(WANT_INPUT_REMOVED, "true")],
        live: None,
        start: None,
        end: Guard::Present(TIME_INPUT_REMOVED),
        barrier: Some(Barrier {
            scope: BarrierScope::Job,
            relaxed: &[],
        }),
    },
    ClaimStage {
        transition: Transition::TaskOutputPropagate,
        bucket: Bucket::TaskOutput,
        scope: ScopeField::Domain,
        requires: &[
            Guard::Present(TIME_COMMITTED),
            Guard::Is(INTERMEDIATE, "true"),
        ],
        live: Some(Guard::Absent(TIME_JOB_CANCELLED)),
        start: None,
        end: Guard::Present(TIME_PROPAGATED),
        // Final-phase outputs are counted as well.
        barrier: Some(Barrier {
            scope: BarrierScope::Phase,
            relaxed: &[Guard::Is(INTERMEDIATE, "true")],
        }),
    },
];

/// Transitions pending for a record of `bucket`, in table order.
pub fn pending_transitions(bucket: Bucket, record: &Value) -> Vec<Transition> {
    STAGES
        .iter()
        .filter(|stage| stage.bucket == bucket && stage.is_pending(record))
        .map(|stage| stage.transition)
        .collect()
}

/// Where a task record sits in its lifecycle, derived from the stage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Not yet reported done by its zone.
    Dispatched,
    AwaitingCommit,
    MarkingOutputs,
    MarkingInputsForCleanup,
    MarkingInputsForRetry,
    AwaitingRetry,
    AwaitingDelete,
    Cancelled,
    Settled,
}

impl TaskState {
    pub fn classify(record: &Value) -> TaskState {
        if let Some(transition) = pending_transitions(Bucket::Task, record).first() {
            return match transition {
                Transition::TaskCommit => TaskState::AwaitingCommit,
                Transition::TaskOutputsMark => TaskState::MarkingOutputs,
                Transition::TaskInputsMarkCleanup => TaskState::MarkingInputsForCleanup,
                Transition::TaskInputsMarkRetry => TaskState::MarkingInputsForRetry,
                Transition::TaskRetry => TaskState::AwaitingRetry,
                _ => TaskState::AwaitingDelete,
            };
        }

        if Guard::Present(TIME_CANCELLED).holds(record) {
            TaskState::Cancelled
        } else if Guard::Absent(TIME_COMMITTED).holds(record) {
            TaskState::Dispatched
        } else {
            TaskState::Settled
        }
    }
}

/// Where a job record sits in its lifecycle, derived from the stage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Unclaimed,
    Cancelling,
    EndingInput,
    Running,
    Done,
}

impl JobState {
    pub fn classify(record: &Value) -> JobState {
        if Transition::JobCancel.stage().is_finished(record) {
            JobState::Done
        } else if Guard::Absent(WORKER).holds(record) {
            JobState::Unclaimed
        } else if Transition::JobCancel.stage().is_pending(record) {
            JobState::Cancelling
        } else if Transition::JobInputEnd.stage().is_pending(record) {
            JobState::EndingInput
        } else {
            JobState::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture(stage: &ClaimStage) -> Map<String, Value> {
        let mut record = Map::new();
        for guard in stage.guards() {
            guard.apply(&mut record, true);
        }
        record
    }

    #[test]
    fn table_is_indexed_by_transition() {
        for (idx, transition) in Transition::ALL.iter().enumerate() {
            assert_eq!(STAGES[idx].transition, *transition);
            assert_eq!(transition.stage().transition, *transition);
        }
    }

    #[test]
    fn started_but_unfinished_stage_is_pending() {
        for stage in &STAGES {
            let record = Value::Object(fixture(stage));
            assert!(stage.is_pending(&record), "{:?} should be pending", stage.transition);
        }
    }

    #[test]
    fn finished_stage_is_not_pending() {
        for stage in &STAGES {
            let mut record = fixture(stage);
            stage.end.apply(&mut record, true);
            let record = Value::Object(record);
            assert!(!stage.is_pending(&record), "{:?} finished", stage.transition);
            assert!(stage.is_finished(&record));
        }
    }

    #[test]
    fn unstarted_stage_is_not_pending() {
        for stage in STAGES.iter().filter(|stage| stage.start.is_some()) {
            let mut record = fixture(stage);
            if let Some(start) = stage.start {
                record.remove(start);
            }
            assert!(
                !stage.is_pending(&Value::Object(record)),
                "{:?} without start marker",
                stage.transition
            );
        }
    }

    #[test]
    fn relaxed_guards_belong_to_their_stage() {
        for stage in &STAGES {
            if let Some(barrier) = stage.barrier {
                let guards = stage.guards();
                for relaxed in barrier.relaxed {
                    assert!(guards.contains(relaxed), "{:?}: {relaxed:?}", stage.transition);
                }
            }
        }
    }

    #[test]
    fn task_state_follows_claim_markers() {
        let mut task = json!({ "domain": "d1", "jobId": "j1", "phaseNum": 0 });
        assert_eq!(TaskState::classify(&task), TaskState::Dispatched);

        task["state"] = json!("done");
        task["timeDispatchDone"] = json!(FIXTURE_TIMESTAMP);
        assert_eq!(TaskState::classify(&task), TaskState::AwaitingCommit);

        task["timeCommitted"] = json!(FIXTURE_TIMESTAMP);
        task["timeOutputsMarkStart"] = json!(FIXTURE_TIMESTAMP);
        assert_eq!(TaskState::classify(&task), TaskState::MarkingOutputs);

        task["timeOutputsMarkDone"] = json!(FIXTURE_TIMESTAMP);
        assert_eq!(TaskState::classify(&task), TaskState::Settled);

        task["wantRetry"] = json!("TRUE");
        assert_eq!(TaskState::classify(&task), TaskState::AwaitingRetry);

        task["timeRetried"] = json!(FIXTURE_TIMESTAMP);
        assert_eq!(TaskState::classify(&task), TaskState::Settled);

        task["timeCancelled"] = json!(FIXTURE_TIMESTAMP);
        assert_eq!(TaskState::classify(&task), TaskState::Cancelled);
    }

    #[test]
    fn job_state_follows_claim_markers() {
        let mut job = json!({ "jobId": "j1" });
        assert_eq!(JobState::classify(&job), JobState::Unclaimed);

        job["worker"] = json!("d1");
        assert_eq!(JobState::classify(&job), JobState::Running);

        job["timeInputDone"] = json!(FIXTURE_TIMESTAMP);
        assert_eq!(JobState::classify(&job), JobState::EndingInput);

        job["timeCancelled"] = json!(FIXTURE_TIMESTAMP);
        assert_eq!(JobState::classify(&job), JobState::Cancelling);

        job["state"] = json!("done");
        assert_eq!(JobState::classify(&job), JobState::Done);
    }
}
