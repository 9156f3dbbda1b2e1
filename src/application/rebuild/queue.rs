//! The regeneration queue.
//!
//! Per key the state machine is `Idle → Pending → Executing → (Idle | Pending)`.
//! Requests for a pending key merge into its plan; requests for an executing
//! key become a follow-up plan that runs right after the current execution.
//! A semaphore bounds how many keys execute at once.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use boardcache_wire::RebuildMessage;
use futures::FutureExt;
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::plan::RebuildPlan;
use super::request::{RebuildKey, RebuildRequest, RebuildTarget};
use super::{RebuildError, RebuildExecutor, RebuildOutcome};
use crate::cache::lock::mutex_lock;

const SOURCE: &str = "application::rebuild::queue";
const METRIC_REBUILD_TOTAL: &str = "boardcache_rebuild_total";
const METRIC_REBUILD_MS: &str = "boardcache_rebuild_ms";
const METRIC_REBUILD_PENDING: &str = "boardcache_rebuild_pending";

enum JobState {
    Pending(RebuildPlan),
    Executing { follow_up: Option<RebuildPlan> },
}

struct QueueInner {
    jobs: Mutex<HashMap<RebuildKey, JobState>>,
    permits: Semaphore,
    executor: Arc<dyn RebuildExecutor>,
    /// Signalled whenever a key leaves `Executing` or an expansion ends.
    changed: Notify,
    expanding: AtomicUsize,
    verbose: bool,
}

/// Summary of a synchronous full rebuild.
#[derive(Debug, Default)]
pub struct RebuildReport {
    pub succeeded: usize,
    pub outcome: RebuildOutcome,
    pub failures: Vec<RebuildError>,
}

impl RebuildReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct RegenerationQueue {
    inner: Arc<QueueInner>,
}

impl RegenerationQueue {
    pub fn new(
        executor: Arc<dyn RebuildExecutor>,
        max_concurrent: NonZeroUsize,
        verbose: bool,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                jobs: Mutex::new(HashMap::new()),
                permits: Semaphore::new(max_concurrent.get()),
                executor,
                changed: Notify::new(),
                expanding: AtomicUsize::new(0),
                verbose,
            }),
        }
    }

    /// Accept a request. Never blocks and never fails; must run inside a
    /// Tokio runtime.
    pub fn enqueue(&self, request: RebuildRequest) {
        if matches!(request.target, RebuildTarget::All) {
            self.spawn_expansion();
            return;
        }

        let key = request.key();
        let start_driver = {
            let mut jobs = mutex_lock(&self.inner.jobs, SOURCE, "enqueue");
            let start_driver = match jobs.entry(key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(JobState::Pending(RebuildPlan::from_request(request)));
                    true
                }
                Entry::Occupied(mut slot) => {
                    match slot.get_mut() {
                        JobState::Pending(plan) => plan.absorb(request),
                        JobState::Executing { follow_up } => {
                            if let Some(plan) = follow_up.as_mut() {
                                plan.absorb(request);
                            } else {
                                *follow_up = Some(RebuildPlan::from_request(request));
                            }
                        }
                    }
                    false
                }
            };
            gauge!(METRIC_REBUILD_PENDING).set(jobs.len() as f64);
            start_driver
        };

        if start_driver {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drive(key).await });
        }
    }

    /// Decode a worker message and enqueue every request it names. Invalid
    /// messages are logged and dropped.
    pub fn enqueue_message(&self, message: &RebuildMessage) {
        match RebuildRequest::from_message(message) {
            Ok(requests) => {
                for request in requests {
                    self.enqueue(request);
                }
            }
            Err(err) => warn!(
                target = "boardcache::queue",
                error = %err,
                message = ?message,
                "Dropping invalid rebuild message"
            ),
        }
    }

    /// Feed the queue from a mailbox until every sender is gone.
    pub fn spawn_mailbox(&self, mut mailbox: UnboundedReceiver<RebuildMessage>) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            while let Some(message) = mailbox.recv().await {
                queue.enqueue_message(&message);
            }
            debug!(target = "boardcache::queue", "Rebuild mailbox closed");
        })
    }

    /// Run a request to completion and report its result. Waits for any
    /// execution already running for the same key.
    pub async fn rebuild_now(&self, request: RebuildRequest) -> Result<RebuildOutcome, RebuildError> {
        if matches!(request.target, RebuildTarget::All) {
            let report = self.rebuild_everything().await?;
            return match report.failures.into_iter().next() {
                Some(err) => Err(err),
                None => Ok(report.outcome),
            };
        }
        self.inner
            .run_exclusive(RebuildPlan::from_request(request))
            .await
    }

    /// Rebuild every artifact and collect per-key failures.
    #[instrument(skip(self))]
    pub async fn rebuild_everything(&self) -> Result<RebuildReport, RebuildError> {
        let requests = self.inner.executor.expand_all().await?;

        let mut plans: BTreeMap<RebuildKey, RebuildPlan> = BTreeMap::new();
        for request in requests {
            if matches!(request.target, RebuildTarget::All) {
                continue;
            }
            match plans.entry(request.key()) {
                std::collections::btree_map::Entry::Vacant(slot) => {
                    slot.insert(RebuildPlan::from_request(request));
                }
                std::collections::btree_map::Entry::Occupied(mut slot) => {
                    slot.get_mut().absorb(request)
                }
            }
        }

        let started = Instant::now();
        let results = join_all(
            plans
                .into_values()
                .map(|plan| self.inner.run_exclusive(plan)),
        )
        .await;

        let mut report = RebuildReport::default();
        for result in results {
            match result {
                Ok(outcome) => {
                    report.succeeded += 1;
                    report.outcome.add(outcome);
                }
                Err(err) => report.failures.push(err),
            }
        }

        info!(
            target = "boardcache::queue",
            succeeded = report.succeeded,
            failed = report.failures.len(),
            written = report.outcome.written,
            deleted = report.outcome.deleted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Full rebuild finished"
        );
        Ok(report)
    }

    /// Resolve once no key is pending or executing.
    pub async fn wait_idle(&self) {
        loop {
            let changed = self.inner.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if self.is_idle() {
                return;
            }
            changed.await;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.inner.expanding.load(Ordering::SeqCst) == 0
            && mutex_lock(&self.inner.jobs, SOURCE, "is_idle").is_empty()
    }

    /// Keys currently pending or executing.
    pub fn tracked_keys(&self) -> usize {
        mutex_lock(&self.inner.jobs, SOURCE, "tracked_keys").len()
    }

    fn spawn_expansion(&self) {
        self.inner.expanding.fetch_add(1, Ordering::SeqCst);
        let queue = self.clone();
        tokio::spawn(async move {
            match queue.inner.executor.expand_all().await {
                Ok(requests) => {
                    info!(
                        target = "boardcache::queue",
                        requests = requests.len(),
                        "Expanding full rebuild"
                    );
                    for request in requests {
                        if !matches!(request.target, RebuildTarget::All) {
                            queue.enqueue(request);
                        }
                    }
                }
                Err(err) => queue.inner.report_failure(&err),
            }
            queue.inner.expanding.fetch_sub(1, Ordering::SeqCst);
            queue.inner.changed.notify_waiters();
        });
    }
}

impl QueueInner {
    /// Driver task of one key: runs its pending plan, then any follow-up.
    async fn drive(self: Arc<Self>, key: RebuildKey) {
        loop {
            let Ok(permit) = self.permits.acquire().await else {
                mutex_lock(&self.jobs, SOURCE, "drive").remove(&key);
                self.changed.notify_waiters();
                return;
            };

            let Some(plan) = self.claim(&key) else {
                return;
            };

            let _ = self.run(&plan).await;
            drop(permit);

            if !self.complete(&key) {
                return;
            }
        }
    }

    /// Move a pending key to `Executing` and hand out its plan.
    fn claim(&self, key: &RebuildKey) -> Option<RebuildPlan> {
        let mut jobs = mutex_lock(&self.jobs, SOURCE, "claim");
        match jobs.remove(key) {
            Some(JobState::Pending(plan)) => {
                jobs.insert(key.clone(), JobState::Executing { follow_up: None });
                Some(plan)
            }
            Some(other) => {
                jobs.insert(key.clone(), other);
                None
            }
            None => None,
        }
    }

    /// Leave `Executing`. Returns whether a follow-up is now pending.
    fn complete(&self, key: &RebuildKey) -> bool {
        let follow_up = {
            let mut jobs = mutex_lock(&self.jobs, SOURCE, "complete");
            let follow_up = match jobs.remove(key) {
                Some(JobState::Executing {
                    follow_up: Some(plan),
                })
                | Some(JobState::Pending(plan)) => {
                    jobs.insert(key.clone(), JobState::Pending(plan));
                    true
                }
                Some(JobState::Executing { follow_up: None }) | None => false,
            };
            gauge!(METRIC_REBUILD_PENDING).set(jobs.len() as f64);
            follow_up
        };
        self.changed.notify_waiters();
        follow_up
    }

    /// Execute `plan` once the key is free, holding it for the duration.
    async fn run_exclusive(
        self: &Arc<Self>,
        plan: RebuildPlan,
    ) -> Result<RebuildOutcome, RebuildError> {
        let key = plan.key.clone();
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            {
                let mut jobs = mutex_lock(&self.jobs, SOURCE, "run_exclusive");
                if let Entry::Vacant(slot) = jobs.entry(key.clone()) {
                    slot.insert(JobState::Executing { follow_up: None });
                    break;
                }
            }
            changed.await;
        }

        let result = match self.permits.acquire().await {
            Ok(_permit) => self.run(&plan).await,
            Err(_) => Err(RebuildError::Panicked { key: key.clone() }),
        };

        if self.complete(&key) {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.drive(key).await });
        }
        result
    }

    async fn run(&self, plan: &RebuildPlan) -> Result<RebuildOutcome, RebuildError> {
        let kind = plan.key.kind.as_str();
        let started = Instant::now();

        let result = AssertUnwindSafe(self.executor.execute(plan))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(RebuildError::Panicked {
                    key: plan.key.clone(),
                })
            });

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_REBUILD_MS, "kind" => kind).record(elapsed_ms);

        match &result {
            Ok(outcome) => {
                counter!(METRIC_REBUILD_TOTAL, "kind" => kind, "outcome" => "ok").increment(1);
                debug!(
                    target = "boardcache::queue",
                    plan = %plan,
                    written = outcome.written,
                    deleted = outcome.deleted,
                    elapsed_ms,
                    "Rebuild finished"
                );
            }
            Err(err) => {
                counter!(METRIC_REBUILD_TOTAL, "kind" => kind, "outcome" => "error").increment(1);
                self.report_failure(err);
            }
        }

        result
    }

    fn report_failure(&self, err: &RebuildError) {
        if self.verbose {
            warn!(target = "boardcache::queue", error = %err, "Rebuild failed; keeping cached artifact");
        } else {
            debug!(target = "boardcache::queue", error = %err, "Rebuild failed; keeping cached artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Barrier;
    use tokio::sync::mpsc::{self, UnboundedSender};

    use super::*;
    use crate::application::rebuild::plan::PlanScope;
    use crate::application::rebuild::TargetKind;

    #[derive(Default)]
    struct Recorder {
        plans: Mutex<Vec<RebuildPlan>>,
        running: AtomicUsize,
        overlapped: AtomicBool,
    }

    #[async_trait]
    impl RebuildExecutor for Recorder {
        async fn execute(&self, plan: &RebuildPlan) -> Result<RebuildOutcome, RebuildError> {
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.plans.lock().expect("plans lock").push(plan.clone());
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(RebuildOutcome {
                written: 1,
                deleted: 0,
            })
        }

        async fn expand_all(&self) -> Result<Vec<RebuildRequest>, RebuildError> {
            Ok(vec![
                RebuildRequest::new(RebuildTarget::FrontPage),
                RebuildRequest::board_all("a"),
            ])
        }
    }

    /// Holds executions of one key until released and reports every start
    /// and finish.
    struct Gated {
        held: RebuildKey,
        release: Semaphore,
        started: UnboundedSender<RebuildKey>,
        finished: UnboundedSender<RebuildPlan>,
    }

    #[async_trait]
    impl RebuildExecutor for Gated {
        async fn execute(&self, plan: &RebuildPlan) -> Result<RebuildOutcome, RebuildError> {
            let _ = self.started.send(plan.key.clone());
            if plan.key == self.held {
                self.release.acquire().await.expect("gate open").forget();
            }
            let _ = self.finished.send(plan.clone());
            Ok(RebuildOutcome::default())
        }

        async fn expand_all(&self) -> Result<Vec<RebuildRequest>, RebuildError> {
            Ok(Vec::new())
        }
    }

    fn gated(
        held: RebuildKey,
    ) -> (
        Arc<Gated>,
        RegenerationQueue,
        mpsc::UnboundedReceiver<RebuildKey>,
        mpsc::UnboundedReceiver<RebuildPlan>,
    ) {
        let (started, started_rx) = mpsc::unbounded_channel();
        let (finished, finished_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Gated {
            held,
            release: Semaphore::new(0),
            started,
            finished,
        });
        let executor: Arc<dyn RebuildExecutor> = Arc::clone(&gate) as Arc<dyn RebuildExecutor>;
        let max = NonZeroUsize::new(4).expect("non-zero");
        let queue = RegenerationQueue::new(executor, max, false);
        (gate, queue, started_rx, finished_rx)
    }

    fn queue(recorder: &Arc<Recorder>) -> RegenerationQueue {
        let executor: Arc<dyn RebuildExecutor> = Arc::clone(recorder) as Arc<dyn RebuildExecutor>;
        RegenerationQueue::new(executor, NonZeroUsize::MIN, false)
    }

    #[tokio::test]
    async fn requests_before_execution_coalesce() {
        let recorder = Arc::new(Recorder::default());
        let queue = queue(&recorder);

        queue.enqueue(RebuildRequest::new(RebuildTarget::Thread {
            uri: "a".to_string(),
            thread_id: 1,
        }));
        queue.enqueue(RebuildRequest::board_all("a"));
        queue.wait_idle().await;

        let plans = recorder.plans.lock().expect("plans lock").clone();
        assert_eq!(plans.len(), 1);
        let PlanScope::Board(work) = &plans[0].scope else {
            panic!("board plan expected");
        };
        assert!(work.build_all);
        assert!(work.threads.contains(&1));
    }

    #[tokio::test]
    async fn requests_during_execution_run_once_as_a_union() {
        let board_a = RebuildKey::scoped(TargetKind::Board, "a");
        let (gate, queue, mut started, mut finished) = gated(board_a.clone());

        queue.enqueue(RebuildRequest::new(RebuildTarget::BoardPage {
            uri: "a".to_string(),
            page: 1,
        }));
        assert_eq!(started.recv().await, Some(board_a.clone()));

        queue.enqueue(RebuildRequest::new(RebuildTarget::Thread {
            uri: "a".to_string(),
            thread_id: 5,
        }));
        queue.enqueue(RebuildRequest::new(RebuildTarget::Catalog {
            uri: "a".to_string(),
        }));
        assert_eq!(queue.tracked_keys(), 1);
        assert!(finished.try_recv().is_err());

        gate.release.add_permits(2);
        queue.wait_idle().await;

        let first = finished.recv().await.expect("first execution");
        let second = finished.recv().await.expect("follow-up execution");
        assert!(finished.try_recv().is_err(), "exactly two executions");

        let PlanScope::Board(work) = &first.scope else {
            panic!("board plan expected");
        };
        assert_eq!(work.pages.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert!(work.threads.is_empty() && !work.catalog);

        let PlanScope::Board(work) = &second.scope else {
            panic!("board plan expected");
        };
        assert!(work.pages.is_empty());
        assert_eq!(work.threads.iter().copied().collect::<Vec<_>>(), vec![5]);
        assert!(work.catalog);
    }

    #[tokio::test]
    async fn other_keys_finish_while_one_is_blocked() {
        let board_a = RebuildKey::scoped(TargetKind::Board, "a");
        let (gate, queue, mut started, mut finished) = gated(board_a.clone());

        queue.enqueue(RebuildRequest::board_all("a"));
        assert_eq!(started.recv().await, Some(board_a.clone()));

        queue.enqueue(RebuildRequest::board_all("b"));
        queue.enqueue(RebuildRequest::new(RebuildTarget::FrontPage));

        let mut done: Vec<String> = Vec::new();
        for _ in 0..2 {
            let plan = finished.recv().await.expect("unblocked key finishes");
            done.push(plan.key.to_string());
        }
        done.sort();
        assert_eq!(done, vec!["board:b", "frontPage"]);
        assert!(!queue.is_idle(), "board:a is still executing");

        gate.release.add_permits(1);
        queue.wait_idle().await;
        assert_eq!(finished.recv().await.map(|plan| plan.key), Some(board_a));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_execution_per_key_under_storm() {
        let recorder = Arc::new(Recorder::default());
        let executor: Arc<dyn RebuildExecutor> = Arc::clone(&recorder) as Arc<dyn RebuildExecutor>;
        let queue = RegenerationQueue::new(executor, NonZeroUsize::new(8).expect("non-zero"), true);
        let barrier = Arc::new(Barrier::new(16));

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let queue = queue.clone();
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    for _ in 0..20 {
                        queue.enqueue(RebuildRequest::new(RebuildTarget::BoardPage {
                            uri: "a".to_string(),
                            page: n,
                        }));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("enqueue task");
        }
        queue.wait_idle().await;

        assert!(!recorder.overlapped.load(Ordering::SeqCst));
        let plans = recorder.plans.lock().expect("plans lock").clone();
        assert!(plans.len() < 16 * 20);
        let last = plans.last().expect("at least one execution");
        let PlanScope::Board(work) = &last.scope else {
            panic!("board plan expected");
        };
        assert!(!work.pages.is_empty());
    }

    #[tokio::test]
    async fn all_expands_into_concrete_keys() {
        let recorder = Arc::new(Recorder::default());
        let queue = queue(&recorder);

        queue.enqueue(RebuildRequest::new(RebuildTarget::All));
        queue.wait_idle().await;

        let mut keys: Vec<String> = recorder
            .plans
            .lock()
            .expect("plans lock")
            .iter()
            .map(|plan| plan.key.to_string())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["board:a", "frontPage"]);
    }

    #[tokio::test]
    async fn invalid_messages_are_dropped() {
        let recorder = Arc::new(Recorder::default());
        let queue = queue(&recorder);

        queue.enqueue_message(&RebuildMessage::default());
        queue.wait_idle().await;

        assert!(recorder.plans.lock().expect("plans lock").is_empty());
        assert!(queue.is_idle());
    }
}
