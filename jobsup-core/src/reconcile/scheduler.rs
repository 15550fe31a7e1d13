use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobsup_model::DomainId;

use super::handler::{Delivery, TransitionHandler};
use super::inflight::InflightRegistry;
use crate::catalog::{QueryClass, QueryName, Scope};
use crate::config::ReconcileConfig;
use crate::error::{Result, SupervisorError};
use crate::store::{RecordStore, RequestOptions};

/// How long release and shutdown wait for loops to observe cancellation
/// before aborting them.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Floor applied to configured cadences; a zero period would spin.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Result of one query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Records handed to the handler without error.
    Delivered(usize),
    Counted(u64),
    /// Another execution of the same query and scope was still running.
    Skipped,
    /// The scope was cancelled while the query ran; results were dropped.
    Discarded,
}

struct Shared<S, H> {
    store: Arc<S>,
    handler: Arc<H>,
    config: ReconcileConfig,
    inflight: InflightRegistry,
}

impl<S, H> Shared<S, H>
where
    S: RecordStore + 'static,
    H: TransitionHandler,
{
    async fn execute(
        &self,
        name: QueryName,
        scope: &Scope,
        token: &CancellationToken,
    ) -> Result<TickOutcome> {
        let Some(_permit) = self.inflight.try_claim(name, scope) else {
            return Ok(TickOutcome::Skipped);
        };

        let descriptor = name.descriptor();
        let filter = descriptor.predicate(scope)?;
        let bucket = self.config.buckets.resolve(descriptor.bucket);

        if descriptor.count_only {
            let count = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(TickOutcome::Discarded),
                result = self.store.count(bucket, &filter) => result?,
            };
            self.handler.counted(name, scope.clone(), count).await;
            return Ok(TickOutcome::Counted(count));
        }

        let options = RequestOptions::default()
            .with_limit(descriptor.options(&self.config.tunables).limit)
            .with_request_id(Uuid::now_v7());
        let records = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(TickOutcome::Discarded),
            result = self.store.query(bucket, &filter, options) => result?,
        };

        let mut delivered = 0;
        for record in records {
            if token.is_cancelled() {
                return Ok(TickOutcome::Discarded);
            }
            let key = record.key.clone();
            let delivery = Delivery {
                query: name,
                scope: scope.clone(),
                record,
            };
            match self.handler.handle(delivery).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(
                    target: "jobsup::scheduler",
                    query = %name,
                    %scope,
                    key = %key,
                    error = %err,
                    "handler rejected record"
                ),
            }
        }
        Ok(TickOutcome::Delivered(delivered))
    }

    /// Runs `execute` and reports failures upward without propagating them.
    async fn tick(&self, name: QueryName, scope: &Scope, token: &CancellationToken) -> bool {
        match self.execute(name, scope, token).await {
            Ok(TickOutcome::Skipped) => {
                debug!(
                    target: "jobsup::scheduler",
                    query = %name,
                    %scope,
                    "previous execution still running; tick skipped"
                );
                true
            }
            Ok(outcome) => {
                debug!(target: "jobsup::scheduler", query = %name, %scope, ?outcome, "tick");
                true
            }
            Err(err) => {
                warn!(
                    target: "jobsup::scheduler",
                    query = %name,
                    %scope,
                    error = %err,
                    "query failed"
                );
                self.handler
                    .query_failed(name, scope.clone(), err.to_string())
                    .await;
                false
            }
        }
    }

    async fn run_periodic(
        self: Arc<Self>,
        name: QueryName,
        scope: Scope,
        period: Duration,
        token: CancellationToken,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(name, &scope, &token).await;
        }
        debug!(target: "jobsup::scheduler", query = %name, %scope, "periodic query stopped");
    }

    /// Retries a failed one-shot query on the domain poll cadence until it
    /// succeeds or the scope is cancelled.
    async fn retry_one_shot(
        self: Arc<Self>,
        name: QueryName,
        scope: Scope,
        token: CancellationToken,
    ) {
        let period = self.config.tunables.time_poll().max(MIN_PERIOD);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = sleep(period) => {}
            }
            if self.tick(name, &scope, &token).await {
                return;
            }
        }
    }

    fn period_of(&self, name: QueryName) -> Duration {
        name.descriptor()
            .options(&self.config.tunables)
            .cadence
            .unwrap_or_else(|| self.config.tunables.time_poll())
            .max(MIN_PERIOD)
    }
}

struct DomainRun {
    /// Distinguishes this acquisition from a later one of the same domain.
    generation: u64,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Drives the query catalog: global queries for the life of the process,
/// per-domain queries while a domain is owned, per-job queries on demand.
pub struct ReconcileScheduler<S, H>
where
    S: RecordStore + 'static,
    H: TransitionHandler,
{
    shared: Arc<Shared<S, H>>,
    shutdown_token: CancellationToken,
    started: AtomicBool,
    global_tasks: Mutex<Vec<JoinHandle<()>>>,
    domains: Mutex<HashMap<DomainId, DomainRun>>,
    generations: AtomicU64,
}

impl<S, H> fmt::Debug for ReconcileScheduler<S, H>
where
    S: RecordStore + 'static,
    H: TransitionHandler,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owned_domains = self
            .domains
            .try_lock()
            .map(|domains| domains.len())
            .unwrap_or_default();

        f.debug_struct("ReconcileScheduler")
            .field("store_type", &type_name::<S>())
            .field("handler_type", &type_name::<H>())
            .field("config", &self.shared.config)
            .field("owned_domains", &owned_domains)
            .field("inflight", &self.shared.inflight.len())
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl<S, H> ReconcileScheduler<S, H>
where
    S: RecordStore + 'static,
    H: TransitionHandler,
{
    /// Zero cadences in `config` are raised to one millisecond.
    pub fn new(store: Arc<S>, handler: Arc<H>, config: ReconcileConfig) -> Self {
        if let Some(field) = config.tunables.first_zero() {
            warn!(
                target: "jobsup::scheduler",
                field,
                "tunable is zero; shorter cadences are raised to {MIN_PERIOD:?}"
            );
        }
        Self {
            shared: Arc::new(Shared {
                store,
                handler,
                config,
                inflight: InflightRegistry::new(),
            }),
            shutdown_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            global_tasks: Mutex::new(Vec::new()),
            domains: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.shared.config
    }

    pub fn inflight(&self) -> &InflightRegistry {
        &self.shared.inflight
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(SupervisorError::Cancelled(
                "scheduler has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// Runs the global one-shot queries and starts the global periodic
    /// loops. Calling it again is a no-op.
    pub async fn start(&self) -> Result<()> {
        self.ensure_running()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let token = self.shutdown_token.child_token();
        let mut tasks = Vec::new();
        self.run_one_shots(QueryClass::GlobalOneShot, &Scope::Global, &token, &mut tasks)
            .await;

        for name in QueryName::of_class(QueryClass::GlobalPeriodic) {
            let period = self.shared.period_of(name);
            tasks.push(tokio::spawn(Arc::clone(&self.shared).run_periodic(
                name,
                Scope::Global,
                period,
                token.clone(),
            )));
        }

        info!(target: "jobsup::scheduler", loops = tasks.len(), "global queries started");
        self.global_tasks.lock().await.extend(tasks);
        Ok(())
    }

    async fn run_one_shots(
        &self,
        class: QueryClass,
        scope: &Scope,
        token: &CancellationToken,
        tasks: &mut Vec<JoinHandle<()>>,
    ) {
        for name in QueryName::of_class(class) {
            if !self.shared.tick(name, scope, token).await {
                tasks.push(tokio::spawn(Arc::clone(&self.shared).retry_one_shot(
                    name,
                    scope.clone(),
                    token.clone(),
                )));
            }
        }
    }

    /// Takes ownership of `domain`: runs its one-shot queries once, then
    /// polls each per-domain query until the domain is released. Acquiring
    /// an owned domain again does nothing.
    ///
    /// The domain table is only locked to register and attach the run, so
    /// other domains and on-demand queries proceed while one-shots execute.
    pub async fn acquire_domain(&self, domain: DomainId) -> Result<()> {
        self.ensure_running()?;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        let token = {
            let mut domains = self.domains.lock().await;
            if domains.contains_key(&domain) {
                debug!(target: "jobsup::scheduler", %domain, "domain already owned");
                return Ok(());
            }
            let token = self.shutdown_token.child_token();
            domains.insert(
                domain.clone(),
                DomainRun {
                    generation,
                    token: token.clone(),
                    tasks: Vec::new(),
                },
            );
            token
        };

        let scope = Scope::Domain(domain.clone());
        let mut tasks = Vec::new();
        self.run_one_shots(QueryClass::DomainOneShot, &scope, &token, &mut tasks)
            .await;
        for name in QueryName::of_class(QueryClass::DomainPeriodic) {
            let period = self.shared.period_of(name);
            tasks.push(tokio::spawn(Arc::clone(&self.shared).run_periodic(
                name,
                scope.clone(),
                period,
                token.clone(),
            )));
        }

        let loops = tasks.len();
        let orphaned = {
            let mut domains = self.domains.lock().await;
            match domains.get_mut(&domain) {
                Some(run) if run.generation == generation => {
                    run.tasks.extend(tasks);
                    None
                }
                _ => Some(tasks),
            }
        };
        if let Some(tasks) = orphaned {
            // Released (or shut down) while the one-shots ran.
            token.cancel();
            stop_all(tasks).await;
            debug!(target: "jobsup::scheduler", %domain, "domain released during acquisition");
            return Ok(());
        }

        info!(target: "jobsup::scheduler", %domain, loops, "domain acquired");
        Ok(())
    }

    /// Stops every query for `domain`. Results still in flight are dropped.
    pub async fn release_domain(&self, domain: &DomainId) -> Result<()> {
        let run = self.domains.lock().await.remove(domain).ok_or_else(|| {
            SupervisorError::ResourceNotFound(format!("domain {domain} is not owned"))
        })?;
        run.token.cancel();
        stop_all(run.tasks).await;
        info!(target: "jobsup::scheduler", %domain, "domain released");
        Ok(())
    }

    pub async fn owned_domains(&self) -> Vec<DomainId> {
        let mut owned: Vec<_> = self.domains.lock().await.keys().cloned().collect();
        owned.sort();
        owned
    }

    /// Executes one catalog query immediately and delivers its results.
    ///
    /// Domain-scoped queries only run while the domain is owned and are
    /// discarded if it is released mid-flight.
    pub async fn run_query(&self, name: QueryName, scope: Scope) -> Result<TickOutcome> {
        self.ensure_running()?;
        let token = match &scope {
            Scope::Domain(domain) => self
                .domains
                .lock()
                .await
                .get(domain)
                .map(|run| run.token.clone())
                .ok_or_else(|| {
                    SupervisorError::Cancelled(format!("domain {domain} is not owned"))
                })?,
            _ => self.shutdown_token.clone(),
        };
        self.shared.execute(name, &scope, &token).await
    }

    /// Executes a counting query immediately.
    pub async fn count(&self, name: QueryName, scope: Scope) -> Result<u64> {
        if !name.descriptor().count_only {
            return Err(SupervisorError::InvalidArgument(format!(
                "query \"{name}\" does not count"
            )));
        }
        match self.run_query(name, scope.clone()).await? {
            TickOutcome::Counted(count) => Ok(count),
            TickOutcome::Skipped => Err(SupervisorError::InFlight(format!(
                "\"{name}\" for {scope}"
            ))),
            TickOutcome::Discarded | TickOutcome::Delivered(_) => Err(SupervisorError::Cancelled(
                format!("\"{name}\" for {scope}"),
            )),
        }
    }

    /// Cancels every loop and waits for them to stop.
    pub async fn shutdown(&self) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        self.shutdown_token.cancel();

        let mut tasks: Vec<_> = self.global_tasks.lock().await.drain(..).collect();
        for (_, run) in self.domains.lock().await.drain() {
            tasks.extend(run.tasks);
        }
        stop_all(tasks).await;
        info!(target: "jobsup::scheduler", "scheduler stopped");
    }
}

async fn stop_all(tasks: Vec<JoinHandle<()>>) {
    let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
    match timeout(STOP_GRACE, join_all(tasks)).await {
        Ok(results) => {
            for err in results.into_iter().filter_map(|result| result.err()) {
                if err.is_panic() {
                    warn!(target: "jobsup::scheduler", error = %err, "query loop panicked");
                }
            }
        }
        Err(_) => {
            warn!(
                target: "jobsup::scheduler",
                tasks = aborts.len(),
                "loops did not stop in time; aborting"
            );
            for handle in aborts {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::handler::MockTransitionHandler;
    use crate::store::{InMemoryRecordStore, StoreError};
    use serde_json::json;

    fn domain(raw: &str) -> DomainId {
        DomainId::parse(raw).unwrap()
    }

    fn job(raw: &str) -> Scope {
        Scope::Job(jobsup_model::JobId::parse(raw).unwrap())
    }

    fn scheduler(
        store: Arc<InMemoryRecordStore>,
        handler: MockTransitionHandler,
    ) -> ReconcileScheduler<InMemoryRecordStore, MockTransitionHandler> {
        ReconcileScheduler::new(store, Arc::new(handler), ReconcileConfig::default())
    }

    #[tokio::test]
    async fn run_query_delivers_matching_records() {
        let store = Arc::new(InMemoryRecordStore::new());
        store
            .insert("task", "t1", json!({ "jobId": "j1", "rIdx": 0 }))
            .await;
        store
            .insert("task", "t2", json!({ "jobId": "j2", "rIdx": 0 }))
            .await;
        store
            .insert("task", "t3", json!({ "jobId": "j1", "phaseNum": 0 }))
            .await;

        let mut handler = MockTransitionHandler::new();
        handler
            .expect_handle()
            .withf(|delivery| {
                delivery.query == QueryName::ReduceTasks && delivery.record.key == "t1"
            })
            .times(1)
            .returning(|_| Ok(()));

        let scheduler = scheduler(store, handler);
        let outcome = scheduler
            .run_query(QueryName::ReduceTasks, job("j1"))
            .await
            .unwrap();
        assert_eq!(outcome, TickOutcome::Delivered(1));
    }

    #[tokio::test]
    async fn handler_errors_do_not_stop_delivery() {
        let store = Arc::new(InMemoryRecordStore::new());
        for (key, reducer) in [("t1", 0), ("t2", 1), ("t3", 2)] {
            store
                .insert("task", key, json!({ "jobId": "j1", "rIdx": reducer }))
                .await;
        }

        let mut handler = MockTransitionHandler::new();
        handler.expect_handle().times(3).returning(|delivery| {
            if delivery.record.key == "t2" {
                Err(SupervisorError::Internal("boom".into()))
            } else {
                Ok(())
            }
        });

        let scheduler = scheduler(store, handler);
        let outcome = scheduler
            .run_query(QueryName::ReduceTasks, job("j1"))
            .await
            .unwrap();
        assert_eq!(outcome, TickOutcome::Delivered(2));
    }

    #[tokio::test]
    async fn count_reports_to_handler() {
        let store = Arc::new(InMemoryRecordStore::new());
        store
            .insert("error", "e1", json!({ "jobId": "j1", "retried": "FALSE" }))
            .await;
        store
            .insert("error", "e2", json!({ "jobId": "j1", "retried": "true" }))
            .await;

        let mut handler = MockTransitionHandler::new();
        handler
            .expect_counted()
            .withf(|query, _, count| *query == QueryName::CountErrors && *count == 1)
            .times(1)
            .returning(|_, _, _| ());

        let scheduler = scheduler(store, handler);
        let count = scheduler
            .count(QueryName::CountErrors, job("j1"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn count_rejects_record_queries() {
        let scheduler = scheduler(
            Arc::new(InMemoryRecordStore::new()),
            MockTransitionHandler::new(),
        );
        let err = scheduler
            .count(QueryName::JobsOwned, Scope::Domain(domain("d1")))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn failed_query_is_reported() {
        let store = Arc::new(InMemoryRecordStore::new());
        store
            .fail_bucket("job", StoreError::Unavailable("partitioned".into()))
            .await;

        let mut handler = MockTransitionHandler::new();
        handler
            .expect_query_failed()
            .withf(|query, _, error| {
                *query == QueryName::JobsOwned && error.contains("partitioned")
            })
            .times(1)
            .returning(|_, _, _| ());

        let scheduler = scheduler(store, handler);
        let scope = Scope::Domain(domain("d1"));
        assert!(
            !scheduler
                .shared
                .tick(QueryName::JobsOwned, &scope, &CancellationToken::new())
                .await
        );
    }

    #[tokio::test]
    async fn release_of_unowned_domain_is_not_found() {
        let scheduler = scheduler(
            Arc::new(InMemoryRecordStore::new()),
            MockTransitionHandler::new(),
        );
        let err = scheduler.release_domain(&domain("d9")).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ResourceNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_and_release_domain() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut handler = MockTransitionHandler::new();
        handler.expect_handle().returning(|_| Ok(()));

        let scheduler = scheduler(Arc::clone(&store), handler);
        scheduler.acquire_domain(domain("d1")).await.unwrap();
        scheduler.acquire_domain(domain("d1")).await.unwrap();
        assert_eq!(scheduler.owned_domains().await, vec![domain("d1")]);

        // Let every periodic loop tick at least once.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let periodic = QueryName::of_class(QueryClass::DomainPeriodic).count() as u64;
        assert!(store.stats().queries() > periodic);

        scheduler.release_domain(&domain("d1")).await.unwrap();
        assert!(scheduler.owned_domains().await.is_empty());

        let after_release = store.stats().queries();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.stats().queries(), after_release);
    }

    #[tokio::test]
    async fn unowned_domains_reject_on_demand_queries() {
        let store = Arc::new(InMemoryRecordStore::new());
        let scheduler = scheduler(Arc::clone(&store), MockTransitionHandler::new());

        let err = scheduler
            .run_query(QueryName::JobsOwned, Scope::Domain(domain("d1")))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Cancelled(_)));
        assert_eq!(store.stats().queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cadence_is_clamped() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut handler = MockTransitionHandler::new();
        handler.expect_handle().returning(|_| Ok(()));
        let mut config = ReconcileConfig::default();
        config.tunables.time_poll_ms = 0;
        assert_eq!(config.tunables.first_zero(), Some("time_poll_ms"));

        let scheduler = ReconcileScheduler::new(Arc::clone(&store), Arc::new(handler), config);
        assert_eq!(scheduler.shared.period_of(QueryName::TasksDone), MIN_PERIOD);

        scheduler.acquire_domain(domain("d1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let periodic = QueryName::of_class(QueryClass::DomainPeriodic).count() as u64;
        assert!(store.stats().queries() >= periodic * 3);
        scheduler.release_domain(&domain("d1")).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let scheduler = scheduler(
            Arc::new(InMemoryRecordStore::new()),
            MockTransitionHandler::new(),
        );
        scheduler.shutdown().await;
        let err = scheduler.acquire_domain(domain("d1")).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Cancelled(_)));
    }
}
