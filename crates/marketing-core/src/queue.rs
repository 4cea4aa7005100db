use crate::audit::{AuditContext, AuditLogger, AuditStatus};
use crate::config::ConfigSource;
use crate::handlers::Dispatcher;
use crate::lists::ListCache;
use crate::model::{SyncJob, SyncRequest};
use crate::provider::MarketingClient;
use crate::task::{Clock, RetryError, Retrier, SyncOutcome, TaskContext, run_job};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const MAX_RETRY_DELAY_SECS: u64 = 3600;

pub(crate) fn retry_delay(base_secs: u64, attempt: u32) -> Duration {
    if base_secs == 0 {
        return Duration::ZERO;
    }
    let exp = attempt.saturating_sub(1).min(10);
    let delay = base_secs.saturating_mul(2u64.saturating_pow(exp));
    Duration::from_secs(delay.min(MAX_RETRY_DELAY_SECS.max(base_secs)))
}

/// Handle for enqueueing sync jobs. Cloning shares the same queue.
#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::UnboundedSender<SyncJob>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    retry_delay_secs: u64,
}

impl SyncQueue {
    pub fn new(retry_delay_secs: u64) -> (Self, mpsc::UnboundedReceiver<SyncJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            retry_delay_secs,
        };
        (queue, rx)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn enqueue(&self, job: SyncJob) -> Result<(), RetryError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.complete();
            return Err(RetryError::QueueClosed);
        }
        Ok(())
    }

    fn complete(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Resolves once no job is queued, running, or waiting for a retry slot.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Dispatcher for SyncQueue {
    fn dispatch(&self, request: SyncRequest) {
        let label = request.label();
        if let Err(err) = self.enqueue(SyncJob::new(request)) {
            warn!(task = label, error = %err, "dropping sync request");
        }
    }
}

impl Retrier for SyncQueue {
    fn schedule_retry(&self, attempt: u32, job: SyncJob) -> Result<(), RetryError> {
        if self.tx.is_closed() {
            return Err(RetryError::QueueClosed);
        }
        let job = SyncJob { attempt, ..job };
        let delay = retry_delay(self.retry_delay_secs, attempt);
        debug!(
            task = job.request.label(),
            attempt,
            delay_secs = delay.as_secs(),
            "scheduling retry"
        );
        if delay.is_zero() {
            return self.enqueue(job);
        }
        // Hold a pending slot while the retry sleeps so wait_idle does not return early.
        self.pending.fetch_add(1, Ordering::SeqCst);
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = queue.enqueue(job) {
                warn!(error = %err, "dropping retry");
            }
            queue.complete();
        });
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub done: u32,
    pub noop: u32,
    pub retried: u32,
    pub failed: u32,
}

impl QueueSummary {
    fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Done => self.done += 1,
            SyncOutcome::Noop => self.noop += 1,
            SyncOutcome::Retrying { .. } => self.retried += 1,
            SyncOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct WorkerDeps {
    pub config: Arc<dyn ConfigSource>,
    pub client: Arc<dyn MarketingClient>,
    pub clock: Arc<dyn Clock>,
    pub lists: ListCache,
    pub audit: Option<AuditLogger>,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    summary: Arc<Mutex<QueueSummary>>,
}

impl WorkerPool {
    pub fn spawn(
        queue: SyncQueue,
        receiver: mpsc::UnboundedReceiver<SyncJob>,
        deps: WorkerDeps,
        jobs: usize,
    ) -> Self {
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let deps = Arc::new(deps);
        let summary = Arc::new(Mutex::new(QueueSummary::default()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = (0..jobs.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let deps = Arc::clone(&deps);
                let summary = Arc::clone(&summary);
                let queue = queue.clone();
                let mut shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = {
                            let mut receiver = receiver.lock().await;
                            tokio::select! {
                                job = receiver.recv() => job,
                                _ = shutdown_rx.changed() => None,
                            }
                        };
                        let Some(job) = next else {
                            break;
                        };
                        let outcome = process_job(&deps, &queue, job).await;
                        if let Ok(mut summary) = summary.lock() {
                            summary.record(outcome);
                        }
                        queue.complete();
                    }
                    debug!(worker, "sync worker stopped");
                })
            })
            .collect();
        Self {
            handles,
            shutdown,
            summary,
        }
    }

    pub async fn shutdown(self) -> QueueSummary {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "sync worker panicked");
            }
        }
        self.summary
            .lock()
            .map(|summary| *summary)
            .unwrap_or_default()
    }
}

async fn process_job(deps: &WorkerDeps, queue: &SyncQueue, job: SyncJob) -> SyncOutcome {
    let task = job.request.label();
    let email = job.request.email().to_string();
    let attempt = job.attempt;
    let config = match deps.config.load() {
        Ok(config) => config,
        Err(err) => {
            error!(task, error = %err, "failed to load sync configuration");
            return SyncOutcome::Failed;
        }
    };
    let ctx = TaskContext {
        config: &config,
        client: deps.client.as_ref(),
        retrier: queue,
        lists: &deps.lists,
        clock: deps.clock.as_ref(),
    };
    let outcome = run_job(&ctx, job).await;
    info!(task, email = %email, attempt, outcome = ?outcome, "sync task finished");
    if let Some(audit) = &deps.audit {
        let status = match outcome {
            SyncOutcome::Done => AuditStatus::Ok,
            SyncOutcome::Noop => AuditStatus::Skipped,
            SyncOutcome::Retrying { .. } => AuditStatus::Retrying,
            SyncOutcome::Failed => AuditStatus::Failed,
        };
        let context = AuditContext {
            task: Some(task.to_string()),
            email: Some(email),
            attempt: Some(attempt),
        };
        let event = format!("task.{task}");
        if let Err(err) = audit.record_with_context(&event, status, context, None, None) {
            warn!(error = %err, "failed to write audit entry");
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfiguration;
    use crate::model::UserChangeEvent;
    use crate::task::SystemClock;
    use crate::testing::{FakeClient, api_error, transport_error};
    use serde_json::json;
    use tempfile::TempDir;

    fn config(max_retries: u32) -> SyncConfiguration {
        SyncConfiguration {
            enabled: true,
            max_retries,
            retry_delay_secs: 0,
            ..SyncConfiguration::default()
        }
    }

    fn deps(config: SyncConfiguration, client: Arc<FakeClient>) -> WorkerDeps {
        WorkerDeps {
            config: Arc::new(config),
            client,
            clock: Arc::new(SystemClock),
            lists: ListCache::new(),
            audit: None,
        }
    }

    fn update(email: &str) -> SyncRequest {
        SyncRequest::UpdateUser {
            event: UserChangeEvent::new(email).with_change("gender", "f"),
            site: None,
            new_user: false,
        }
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        assert_eq!(retry_delay(0, 3), Duration::ZERO);
        assert_eq!(retry_delay(60, 1), Duration::from_secs(60));
        assert_eq!(retry_delay(60, 2), Duration::from_secs(120));
        assert_eq!(retry_delay(60, 20), Duration::from_secs(3600));
        assert_eq!(retry_delay(7200, 3), Duration::from_secs(7200));
    }

    #[tokio::test]
    async fn workers_drain_dispatched_jobs() {
        let client = Arc::new(FakeClient::new());
        let (queue, rx) = SyncQueue::new(0);
        let pool = WorkerPool::spawn(queue.clone(), rx, deps(config(0), client.clone()), 3);
        for index in 0..5 {
            queue.dispatch(update(&format!("user{index}@edx.org")));
        }
        queue.wait_idle().await;
        let summary = pool.shutdown().await;
        assert_eq!(summary.done, 5);
        assert_eq!(client.posts().len(), 5);
    }

    #[tokio::test]
    async fn retryable_errors_are_redispatched_until_exhausted() {
        let client = Arc::new(FakeClient::new().post_returns(api_error(43)));
        let (queue, rx) = SyncQueue::new(0);
        let pool = WorkerPool::spawn(queue.clone(), rx, deps(config(2), client.clone()), 1);
        queue.dispatch(update("test@edx.org"));
        queue.wait_idle().await;
        let summary = pool.shutdown().await;
        assert_eq!(summary.retried, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(client.posts().len(), 3);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failure() {
        let client = Arc::new(
            FakeClient::new()
                .then_post(transport_error())
                .post_returns(Ok(crate::provider::ProviderResponse::ok())),
        );
        let (queue, rx) = SyncQueue::new(0);
        let pool = WorkerPool::spawn(queue.clone(), rx, deps(config(3), client.clone()), 2);
        queue.dispatch(SyncRequest::UpdateEmail {
            new_email: "new@edx.org".to_string(),
            old_email: "old@edx.org".to_string(),
        });
        queue.wait_idle().await;
        let summary = pool.shutdown().await;
        assert_eq!(summary.retried, 1);
        assert_eq!(summary.done, 1);
        let posts = client.posts();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].params, posts[1].params);
        assert_eq!(posts[1].params["keys"], json!({"email": "new@edx.org"}));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_retry_keeps_queue_busy() {
        let client = Arc::new(FakeClient::new().then_post(api_error(9)));
        let (queue, rx) = SyncQueue::new(30);
        let pool = WorkerPool::spawn(queue.clone(), rx, deps(config(1), client.clone()), 1);
        queue.dispatch(update("test@edx.org"));
        queue.wait_idle().await;
        let summary = pool.shutdown().await;
        assert_eq!(summary.retried, 1);
        assert_eq!(summary.done, 1);
        assert_eq!(client.posts().len(), 2);
    }

    #[tokio::test]
    async fn disabled_config_is_noop() {
        let client = Arc::new(FakeClient::new());
        let (queue, rx) = SyncQueue::new(0);
        let pool = WorkerPool::spawn(
            queue.clone(),
            rx,
            deps(SyncConfiguration::default(), client.clone()),
            1,
        );
        queue.dispatch(update("test@edx.org"));
        queue.wait_idle().await;
        assert_eq!(pool.shutdown().await.noop, 1);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn outcomes_are_audited() {
        let tmp = TempDir::new().unwrap();
        let client = Arc::new(FakeClient::new());
        let (queue, rx) = SyncQueue::new(0);
        let mut deps = deps(config(0), client);
        let audit = AuditLogger::new_with_dir(tmp.path().to_path_buf(), 1024 * 1024).unwrap();
        deps.audit = Some(audit);
        let pool = WorkerPool::spawn(queue.clone(), rx, deps, 1);
        queue.dispatch(update("test@edx.org"));
        queue.wait_idle().await;
        pool.shutdown().await;
        let entry = std::fs::read_dir(tmp.path()).unwrap().next().unwrap().unwrap();
        let contents = std::fs::read_to_string(entry.path()).unwrap();
        assert!(contents.contains("\"event\":\"task.update_user\""));
        assert!(contents.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn closed_queue_rejects_retries() {
        let (queue, rx) = SyncQueue::new(0);
        drop(rx);
        let result = queue.schedule_retry(1, SyncJob::new(update("test@edx.org")));
        assert!(matches!(result, Err(RetryError::QueueClosed)));
        assert_eq!(queue.pending(), 0);
    }
}
