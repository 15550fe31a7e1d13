//! Predicate builders and the static catalog table.

use jobsup_model::{DomainId, JobId, TaskId};

use super::stages::fields::*;
use super::stages::Transition;
use super::{Bucket, Cadence, Predicate, QueryClass, QueryDescriptor, QueryName};
use crate::filter::Filter;

/// Fixed cadence of the storage roster poll.
pub const STORAGE_POLL_MILLIS: u64 = 360_000;

const fn entry(
    name: QueryName,
    label: &'static str,
    bucket: Bucket,
    class: QueryClass,
    cadence: Cadence,
    builder: Predicate,
) -> QueryDescriptor {
    QueryDescriptor {
        name,
        label,
        bucket,
        class,
        count_only: matches!(class, QueryClass::JobCount),
        cadence,
        limited: matches!(class, QueryClass::GlobalPeriodic),
        builder,
    }
}

use Bucket as B;
use Cadence as C;
use Predicate as P;
use QueryClass as Q;
use QueryName as N;

/// Indexed by `QueryName as usize`.
pub static CATALOG: [QueryDescriptor; 36] = [
    entry(
        N::AgentHealth,
        "agent health",
        B::Health,
        Q::GlobalPeriodic,
        C::AgentPoll,
        P::Global(agent_health),
    ),
    entry(
        N::WorkerHealth,
        "worker health",
        B::Health,
        Q::GlobalPeriodic,
        C::WorkerPoll,
        P::Global(worker_health),
    ),
    entry(
        N::WorkerDomains,
        "worker domains",
        B::Domain,
        Q::GlobalPeriodic,
        C::WorkerPoll,
        P::Global(worker_domains),
    ),
    entry(
        N::StorageRoster,
        "manta storage",
        B::Storage,
        Q::GlobalPeriodic,
        C::FixedMillis(STORAGE_POLL_MILLIS),
        P::Global(storage_roster),
    ),
    entry(
        N::JobsCreated,
        "jobs created",
        B::Job,
        Q::GlobalOneShot,
        C::None,
        P::Global(jobs_created),
    ),
    entry(N::JobsOwned, "jobs owned", B::Job, Q::DomainOneShot, C::None, P::Domain(jobs_owned)),
    entry(
        N::JobsCancelled,
        "jobs cancelled",
        B::Job,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(jobs_cancelled),
    ),
    entry(
        N::JobsInputEnded,
        "jobs endinput",
        B::Job,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(jobs_input_ended),
    ),
    entry(
        N::JobInputs,
        "job inputs",
        B::JobInput,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(job_inputs),
    ),
    entry(
        N::TasksDone,
        "done tasks",
        B::Task,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(tasks_done),
    ),
    entry(
        N::TasksNeedingOutputsMarked,
        "tasks needing outputs marked",
        B::Task,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(tasks_needing_outputs_marked),
    ),
    entry(
        N::TasksNeedingInputsMarked,
        "tasks needing inputs marked for cleanup",
        B::Task,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(tasks_needing_inputs_marked),
    ),
    entry(
        N::TasksNeedingInputsRetried,
        "tasks needing inputs marked for retry",
        B::Task,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(tasks_needing_inputs_retried),
    ),
    entry(
        N::TasksNeedingDelete,
        "tasks needing delete",
        B::Task,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(tasks_needing_delete),
    ),
    entry(
        N::TaskInputsNeedingDelete,
        "taskinputs needing delete",
        B::TaskInput,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(task_inputs_needing_delete),
    ),
    entry(
        N::TasksNeedingRetry,
        "tasks needing retry",
        B::Task,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(tasks_needing_retry),
    ),
    entry(
        N::TaskInputsNeedingRetry,
        "taskinputs retry",
        B::TaskInput,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(task_inputs_needing_retry),
    ),
    entry(
        N::TaskOutputsUnpropagated,
        "taskoutputs",
        B::TaskOutput,
        Q::DomainPeriodic,
        C::DomainPoll,
        P::Domain(task_outputs_unpropagated),
    ),
    entry(
        N::CountTasksUncommitted,
        "count uncommitted tasks",
        B::Task,
        Q::JobCount,
        C::None,
        P::Phase(count_tasks_uncommitted),
    ),
    entry(
        N::CountTasksNeedingRetry,
        "count tasks needing retry",
        B::Task,
        Q::JobCount,
        C::None,
        P::Phase(count_tasks_needing_retry),
    ),
    entry(
        N::CountTaskInputsNeedingRetry,
        "count taskinputs needing retry",
        B::TaskInput,
        Q::JobCount,
        C::None,
        P::Phase(count_task_inputs_needing_retry),
    ),
    entry(
        N::CountTasksNeedingOutputsMarked,
        "count tasks needing outputs marked",
        B::Task,
        Q::JobCount,
        C::None,
        P::Phase(count_tasks_needing_outputs_marked),
    ),
    entry(
        N::CountTasksNeedingInputsMarked,
        "count tasks needing inputs marked",
        B::Task,
        Q::JobCount,
        C::None,
        P::Phase(count_tasks_needing_inputs_marked),
    ),
    entry(
        N::CountTasksNeedingInputsRetried,
        "count tasks needing inputs marked for retry",
        B::Task,
        Q::JobCount,
        C::None,
        P::Phase(count_tasks_needing_inputs_retried),
    ),
    entry(
        N::CountTaskOutputsUnpropagated,
        "count unpropagated taskoutputs",
        B::TaskOutput,
        Q::JobCount,
        C::None,
        P::Phase(count_task_outputs_unpropagated),
    ),
    entry(N::CountErrors, "count nErrors", B::Error, Q::JobCount, C::None, P::Job(count_errors)),
    entry(N::CountRetries, "count nRetries", B::Error, Q::JobCount, C::None, P::Job(count_retries)),
    entry(
        N::CountInputsRead,
        "count nInputsRead",
        B::JobInput,
        Q::JobCount,
        C::None,
        P::Job(count_inputs_read),
    ),
    entry(
        N::CountOutputs,
        "count nJobOutputs",
        B::TaskOutput,
        Q::JobCount,
        C::None,
        P::Phase(count_outputs),
    ),
    entry(
        N::CountTasksDispatched,
        "count nTasksDispatched",
        B::Task,
        Q::JobCount,
        C::None,
        P::Job(count_tasks_dispatched),
    ),
    entry(
        N::CountTasksCommittedOk,
        "count nTasksCommittedOk",
        B::Task,
        Q::JobCount,
        C::None,
        P::Job(count_tasks_committed_ok),
    ),
    entry(
        N::CountTasksCommittedFail,
        "count nTasksCommittedFail",
        B::Task,
        Q::JobCount,
        C::None,
        P::Job(count_tasks_committed_fail),
    ),
    entry(N::ReduceTasks, "reduce tasks", B::Task, Q::JobOneShot, C::None, P::Job(reduce_tasks)),
    entry(
        N::CountReduceTaskInputs,
        "count taskinputs",
        B::TaskInput,
        Q::JobCount,
        C::None,
        P::Task(count_reduce_task_inputs),
    ),
    entry(
        N::CountTasksNeedingDelete,
        "count tasks needing delete",
        B::Task,
        Q::JobCount,
        C::None,
        P::Job(count_tasks_needing_delete),
    ),
    entry(
        N::CountTaskInputsNeedingDelete,
        "count taskinputs needing delete",
        B::TaskInput,
        Q::JobCount,
        C::None,
        P::Job(count_task_inputs_needing_delete),
    ),
];

/// Stage whose pending predicate or barrier backs a catalog query.
pub fn stage_of(name: QueryName) -> Option<Transition> {
    let transition = match name {
        N::JobsCancelled => Transition::JobCancel,
        N::JobsInputEnded => Transition::JobInputEnd,
        N::JobInputs => Transition::JobInputFanout,
        N::TasksDone | N::CountTasksUncommitted => Transition::TaskCommit,
        N::TasksNeedingOutputsMarked | N::CountTasksNeedingOutputsMarked => {
            Transition::TaskOutputsMark
        }
        N::TasksNeedingInputsMarked | N::CountTasksNeedingInputsMarked => {
            Transition::TaskInputsMarkCleanup
        }
        N::TasksNeedingInputsRetried | N::CountTasksNeedingInputsRetried => {
            Transition::TaskInputsMarkRetry
        }
        N::TasksNeedingDelete | N::CountTasksNeedingDelete => Transition::TaskDelete,
        N::TaskInputsNeedingDelete | N::CountTaskInputsNeedingDelete => {
            Transition::TaskInputDelete
        }
        N::TasksNeedingRetry | N::CountTasksNeedingRetry => Transition::TaskRetry,
        N::TaskInputsNeedingRetry | N::CountTaskInputsNeedingRetry => Transition::TaskInputRetry,
        N::TaskOutputsUnpropagated | N::CountTaskOutputsUnpropagated => {
            Transition::TaskOutputPropagate
        }
        _ => return None,
    };
    Some(transition)
}

// Global

pub fn agent_health() -> Filter {
    Filter::equals(COMPONENT, "agent")
}

pub fn worker_health() -> Filter {
    Filter::equals(COMPONENT, "worker")
}

pub fn worker_domains() -> Filter {
    Filter::present(DOMAIN_ID)
}

pub fn storage_roster() -> Filter {
    Filter::present(MANTA_COMPUTE_ID)
}

pub fn jobs_created() -> Filter {
    Filter::all([Filter::absent(WORKER), Filter::not_equals(STATE, STATE_DONE)])
}

// Per domain

pub fn jobs_owned(domain: &DomainId) -> Filter {
    Filter::all([
        Filter::equals(WORKER, domain.as_str()),
        Filter::not_equals(STATE, STATE_DONE),
    ])
}

fn pending(transition: Transition, domain: &DomainId) -> Filter {
    transition.stage().pending_filter(domain)
}

pub fn jobs_cancelled(domain: &DomainId) -> Filter {
    pending(Transition::JobCancel, domain)
}

pub fn jobs_input_ended(domain: &DomainId) -> Filter {
    pending(Transition::JobInputEnd, domain)
}

pub fn job_inputs(domain: &DomainId) -> Filter {
    pending(Transition::JobInputFanout, domain)
}

pub fn tasks_done(domain: &DomainId) -> Filter {
    pending(Transition::TaskCommit, domain)
}

pub fn tasks_needing_outputs_marked(domain: &DomainId) -> Filter {
    pending(Transition::TaskOutputsMark, domain)
}

pub fn tasks_needing_inputs_marked(domain: &DomainId) -> Filter {
    pending(Transition::TaskInputsMarkCleanup, domain)
}

pub fn tasks_needing_inputs_retried(domain: &DomainId) -> Filter {
    pending(Transition::TaskInputsMarkRetry, domain)
}

pub fn tasks_needing_delete(domain: &DomainId) -> Filter {
    pending(Transition::TaskDelete, domain)
}

pub fn task_inputs_needing_delete(domain: &DomainId) -> Filter {
    pending(Transition::TaskInputDelete, domain)
}

pub fn tasks_needing_retry(domain: &DomainId) -> Filter {
    pending(Transition::TaskRetry, domain)
}

pub fn task_inputs_needing_retry(domain: &DomainId) -> Filter {
    pending(Transition::TaskInputRetry, domain)
}

pub fn task_outputs_unpropagated(domain: &DomainId) -> Filter {
    pending(Transition::TaskOutputPropagate, domain)
}

// Per job phase barriers

fn barrier(transition: Transition, job: &JobId, phase: Option<u32>) -> Filter {
    transition.stage().barrier_filter(job, phase)
}

pub fn count_tasks_uncommitted(job: &JobId, phase: u32) -> Filter {
    barrier(Transition::TaskCommit, job, Some(phase))
}

pub fn count_tasks_needing_retry(job: &JobId, phase: u32) -> Filter {
    barrier(Transition::TaskRetry, job, Some(phase))
}

pub fn count_task_inputs_needing_retry(job: &JobId, phase: u32) -> Filter {
    barrier(Transition::TaskInputRetry, job, Some(phase))
}

pub fn count_tasks_needing_outputs_marked(job: &JobId, phase: u32) -> Filter {
    barrier(Transition::TaskOutputsMark, job, Some(phase))
}

pub fn count_tasks_needing_inputs_marked(job: &JobId, phase: u32) -> Filter {
    barrier(Transition::TaskInputsMarkCleanup, job, Some(phase))
}

pub fn count_tasks_needing_inputs_retried(job: &JobId, phase: u32) -> Filter {
    barrier(Transition::TaskInputsMarkRetry, job, Some(phase))
}

pub fn count_task_outputs_unpropagated(job: &JobId, phase: u32) -> Filter {
    barrier(Transition::TaskOutputPropagate, job, Some(phase))
}

pub fn count_tasks_needing_delete(job: &JobId) -> Filter {
    barrier(Transition::TaskDelete, job, None)
}

pub fn count_task_inputs_needing_delete(job: &JobId) -> Filter {
    barrier(Transition::TaskInputDelete, job, None)
}

// Per job statistics

fn for_job(job: &JobId) -> Filter {
    Filter::equals(JOB_ID, job.as_str())
}

pub fn count_errors(job: &JobId) -> Filter {
    Filter::all([for_job(job), Filter::flag_cleared(RETRIED)])
}

pub fn count_retries(job: &JobId) -> Filter {
    Filter::all([for_job(job), Filter::flag_set(RETRIED)])
}

pub fn count_inputs_read(job: &JobId) -> Filter {
    Filter::all([for_job(job), Filter::present(TIME_PROPAGATED)])
}

pub fn count_outputs(job: &JobId, phase: u32) -> Filter {
    Filter::all([
        for_job(job),
        Filter::equals(PHASE_NUM, phase.to_string()),
        Filter::equals(VALID, "true"),
        Filter::present(TIME_COMMITTED),
    ])
}

pub fn count_tasks_dispatched(job: &JobId) -> Filter {
    for_job(job)
}

pub fn count_tasks_committed_ok(job: &JobId) -> Filter {
    Filter::all([
        for_job(job),
        Filter::present(TIME_COMMITTED),
        Filter::equals(RESULT, RESULT_OK),
    ])
}

pub fn count_tasks_committed_fail(job: &JobId) -> Filter {
    Filter::all([
        for_job(job),
        Filter::present(TIME_COMMITTED),
        Filter::not_equals(RESULT, RESULT_OK),
    ])
}

pub fn reduce_tasks(job: &JobId) -> Filter {
    Filter::all([
        for_job(job),
        Filter::present(REDUCE_INDEX),
        Filter::absent(TIME_RETRIED),
    ])
}

pub fn count_reduce_task_inputs(task: &TaskId) -> Filter {
    Filter::equals(TASK_ID, task.as_str())
}
