//! Job manager: queues jobs, dispatches them to the worker pool, streams
//! their results back, and aborts them on request.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobrelay_core::config::engine::EngineConfig;
use jobrelay_core::error::AppError;
use jobrelay_core::result::AppResult;

use crate::adapter::{JobWorker, SubtaskAdapter};
use crate::error::JobError;
use crate::pool::{JobHandle, WorkerPool, wait_completed};
use crate::relay::{MessageRelay, SharedSink, TracingSink};
use crate::task::{Settings, SubtaskRef, Task};

/// Called with `(completed, total)` while results or an abort are awaited.
pub type ProgressCallback<'a> = Box<dyn FnMut(usize, usize) + Send + 'a>;

/// Progress value broadcast to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Jobs finished so far.
    pub completed: usize,
    /// Jobs being tracked.
    pub total: usize,
}

/// A job waiting for [`JobManager::start`].
pub struct JobPair {
    /// The worker to run.
    pub worker: Box<dyn JobWorker>,
    /// Settings passed to its `execute`.
    pub args: Settings,
}

impl std::fmt::Debug for JobPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPair")
            .field("worker", &self.worker.name())
            .field("args", &self.args)
            .finish()
    }
}

/// What [`JobManager::abort`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortSummary {
    /// Jobs cancelled before any worker picked them up.
    pub cancelled: usize,
    /// Jobs that were already running and had to be waited for.
    pub waited: usize,
}

/// The relay together with where flushed entries go.
struct MessageBuffer {
    relay: MessageRelay,
    sink: SharedSink,
}

impl MessageBuffer {
    fn flush(&mut self) -> usize {
        let entries = self.relay.drain();
        for entry in &entries {
            self.sink.write(entry);
        }
        entries.len()
    }

    /// Wait up to `timeout` for any of `handles` to be done, then flush.
    /// Shared by result collection and the abort wait phase.
    async fn wait_and_flush(&mut self, handles: &[JobHandle], timeout: Duration) -> Vec<usize> {
        let ready = wait_completed(handles, timeout).await;
        self.flush();
        ready
    }
}

/// Owns the worker pool, the pending queue, the outstanding futures and the
/// message relay.
pub struct JobManager {
    config: EngineConfig,
    pool: Option<WorkerPool>,
    buffer: MessageBuffer,
    pending: VecDeque<JobPair>,
    futures: Vec<JobHandle>,
    active: bool,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("max_workers", &self.config.max_workers)
            .field("pending", &self.pending.len())
            .field("outstanding", &self.futures.len())
            .field("active", &self.active)
            .finish()
    }
}

impl JobManager {
    /// Create a manager and its worker pool. Must be called from within a
    /// Tokio runtime.
    pub fn new(config: EngineConfig) -> AppResult<Self> {
        let pool = WorkerPool::new(config.max_workers)?;

        tracing::info!(
            "Job manager started with max_workers={}, poll_interval={}ms",
            config.max_workers,
            config.poll_interval_ms
        );

        Ok(Self {
            config,
            pool: Some(pool),
            buffer: MessageBuffer {
                relay: MessageRelay::new(),
                sink: Arc::new(TracingSink),
            },
            pending: VecDeque::new(),
            futures: Vec::new(),
            active: false,
        })
    }

    /// Create a manager with default settings and `max_workers` slots.
    pub fn with_max_workers(max_workers: usize) -> AppResult<Self> {
        Self::new(EngineConfig::default().with_max_workers(max_workers))
    }

    /// Send flushed relay entries somewhere other than the log.
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.buffer.sink = sink;
        self
    }

    /// Engine settings in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Queue a job. Nothing runs until [`start`](Self::start).
    pub fn add_job<W: JobWorker>(&mut self, worker: W, settings: Settings) {
        tracing::debug!("Queued job '{}'", worker.name());
        self.pending.push_back(JobPair {
            worker: Box::new(worker),
            args: settings,
        });
    }

    /// Queue a subtask through a [`SubtaskAdapter`], using the adapter's
    /// settings.
    pub fn add_subtask(&mut self, subtask: SubtaskRef) {
        let adapter = SubtaskAdapter::from_shared(subtask);
        let settings = adapter.settings();
        self.add_job(adapter, settings);
    }

    /// Queue every subtask of `task`, in order. Returns how many were queued.
    pub fn add_task(&mut self, task: &Task) -> usize {
        for subtask in task.subtasks() {
            self.add_subtask(Arc::clone(subtask));
        }
        task.len()
    }

    /// Jobs queued but not yet dispatched.
    pub fn pending_jobs(&self) -> usize {
        self.pending.len()
    }

    /// Futures not yet consumed by result collection or abort.
    pub fn outstanding(&self) -> &[JobHandle] {
        &self.futures
    }

    /// Whether any dispatched job is still being tracked.
    pub fn has_outstanding(&self) -> bool {
        !self.futures.is_empty()
    }

    /// True between [`start`](Self::start) and the end of result collection
    /// or an abort.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Dispatch every queued job to the pool in FIFO order. Returns how many
    /// were dispatched.
    pub fn start(&mut self) -> AppResult<usize> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| AppError::service_unavailable("Job manager is shut down"))?;

        self.active = true;
        let mut dispatched = 0;

        while let Some(JobPair { mut worker, args }) = self.pending.pop_front() {
            worker.set_message_queue(self.buffer.relay.sender());
            let name = worker.name().to_string();
            let handle = pool.submit(name, move || worker.execute(&args));
            self.futures.push(handle);
            dispatched += 1;
        }

        tracing::info!("Dispatched {} job(s)", dispatched);
        Ok(dispatched)
    }

    /// Stream results in completion order.
    ///
    /// Every finished job is counted and reported to `progress`; successful
    /// jobs yield their result unless it is empty, failed jobs yield their
    /// error. Cancelled jobs are dropped silently. The stream ends once no
    /// outstanding futures remain, and yields nothing if the manager is not
    /// active.
    pub fn get_results<'a>(
        &'a mut self,
        progress: Option<ProgressCallback<'a>>,
    ) -> impl Stream<Item = Result<Value, JobError>> + 'a {
        let collector = ResultCollector {
            total: self.futures.len(),
            completed: 0,
            finished: false,
            manager: self,
            progress,
        };

        futures::stream::unfold(collector, |mut collector| async move {
            let item = collector.next().await?;
            Some((item, collector))
        })
    }

    /// Drain [`get_results`](Self::get_results) into a vector.
    pub async fn collect_results(
        &mut self,
        progress: Option<ProgressCallback<'_>>,
    ) -> Vec<Result<Value, JobError>> {
        use futures::StreamExt;
        self.get_results(progress).collect().await
    }

    /// Cancel everything outstanding.
    ///
    /// Jobs no worker has picked up are cancelled immediately, newest first.
    /// Jobs already running cannot be interrupted; they are waited for in
    /// bounded slices, reporting `(finished, still_running_at_abort)` to
    /// `progress` after each slice.
    pub async fn abort(&mut self, mut progress: Option<ProgressCallback<'_>>) -> AbortSummary {
        self.active = false;

        let mut summary = AbortSummary::default();
        let mut still_running = Vec::new();

        for handle in self.futures.drain(..).rev() {
            if handle.cancel() {
                summary.cancelled += 1;
            } else if handle.running() {
                still_running.push(handle);
            }
        }

        let total = still_running.len();
        summary.waited = total;

        if total > 0 {
            tracing::info!("Waiting for {} running job(s) to finish", total);
        }

        let mut finished = 0;
        while !still_running.is_empty() {
            let ready = self
                .buffer
                .wait_and_flush(&still_running, self.config.abort_poll_interval())
                .await;

            for index in ready.into_iter().rev() {
                still_running.remove(index);
                finished += 1;
            }

            if let Some(report) = progress.as_mut() {
                report(finished, total);
            }
        }

        tracing::info!(
            cancelled = summary.cancelled,
            waited = summary.waited,
            "Cancelled"
        );
        self.flush_message_buffer();
        summary
    }

    /// Move every relay entry available right now into the sink, in receipt
    /// order. Returns how many were moved.
    pub fn flush_message_buffer(&mut self) -> usize {
        self.buffer.flush()
    }

    /// Tear down: warn about jobs that were queued but never started, let
    /// dispatched jobs finish, and release the pool.
    pub async fn shutdown(mut self) {
        tracing::debug!("Cleaning up");
        self.discard_pending();

        if let Some(pool) = self.pool.take() {
            tracing::debug!("Shutting down");
            pool.shutdown().await;
        }

        self.futures.clear();
        self.flush_message_buffer();
    }

    fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                "Pending jobs has unfinished tasks: discarding {} job(s) that were never started",
                self.pending.len()
            );
            self.pending.clear();
        }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        if self.pool.is_some() {
            self.discard_pending();
            self.flush_message_buffer();
        }
    }
}

struct ResultCollector<'a> {
    manager: &'a mut JobManager,
    progress: Option<ProgressCallback<'a>>,
    total: usize,
    completed: usize,
    finished: bool,
}

impl ResultCollector<'_> {
    async fn next(&mut self) -> Option<Result<Value, JobError>> {
        loop {
            if self.finished {
                return None;
            }

            if !self.manager.active || !self.manager.has_outstanding() {
                self.finish();
                return None;
            }

            let poll = self.manager.config.poll_interval();
            let ready = self
                .manager
                .buffer
                .wait_and_flush(&self.manager.futures, poll)
                .await;

            let Some(&index) = ready.first() else {
                tracing::trace!("No job finished within {:?}", poll);
                self.report();
                tokio::task::yield_now().await;
                continue;
            };

            let handle = self.manager.futures.remove(index);
            let Some(outcome) = handle.outcome() else {
                continue;
            };
            if handle.cancelled() {
                continue;
            }

            self.completed += 1;
            self.report();

            match outcome {
                Ok(Some(value)) => return Some(Ok(value)),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(job_id = %handle.id(), "{}", e);
                    return Some(Err(e));
                }
            }
        }
    }

    fn report(&mut self) {
        if let Some(report) = self.progress.as_mut() {
            report(self.completed, self.total);
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.manager.active = false;
        self.manager.flush_message_buffer();
        tracing::debug!(
            "Result collection finished: {}/{} job(s) completed",
            self.completed,
            self.total
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MessageEntry;
    use crate::task::FnSubtask;
    use serde_json::json;
    use std::sync::Mutex;

    fn value_job(name: &str, value: i64) -> SubtaskRef {
        Arc::new(FnSubtask::new(name, move |_| Ok(Some(json!(value)))))
    }

    #[tokio::test]
    async fn test_nothing_runs_before_start() {
        let mut manager = JobManager::with_max_workers(1).expect("manager");
        manager.add_subtask(value_job("one", 1));
        manager.add_subtask(value_job("two", 2));

        assert_eq!(manager.pending_jobs(), 2);
        assert!(!manager.has_outstanding());
        assert!(!manager.is_active());

        let results = manager.collect_results(None).await;
        assert!(results.is_empty());
        assert_eq!(manager.pending_jobs(), 2);
    }

    #[tokio::test]
    async fn test_start_dispatches_in_fifo_order() {
        let mut manager = JobManager::with_max_workers(1).expect("manager");
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            manager.add_subtask(value_job(name, i as i64));
        }

        assert_eq!(manager.start().expect("start"), 3);
        let names: Vec<&str> = manager.outstanding().iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(manager.pending_jobs(), 0);
        assert!(manager.is_active());

        manager.collect_results(None).await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_abort_before_start_is_noop() {
        let mut manager = JobManager::with_max_workers(1).expect("manager");
        manager.add_subtask(value_job("one", 1));

        let summary = manager.abort(None).await;
        assert_eq!(summary, AbortSummary::default());
        assert_eq!(manager.pending_jobs(), 1);
    }

    #[tokio::test]
    async fn test_flush_delivers_in_order_and_second_flush_is_noop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let mut manager = JobManager::with_max_workers(1)
            .expect("manager")
            .with_sink(Arc::new(move |entry: &MessageEntry| {
                sink_seen.lock().unwrap().push(entry.text.clone());
            }));

        let sender = manager.buffer.relay.sender();
        for text in ["first", "second", "third"] {
            sender.put(MessageEntry::new(text, None)).expect("put");
        }

        assert_eq!(manager.flush_message_buffer(), 3);
        assert_eq!(manager.flush_message_buffer(), 0);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["first".to_string(), "second".to_string(), "third".to_string()]
        );
    }

    #[tokio::test]
    async fn test_progress_counts_every_completion() {
        let mut manager = JobManager::with_max_workers(2).expect("manager");
        manager.add_subtask(value_job("one", 1));
        manager.add_subtask(Arc::new(FnSubtask::new("silent", |_| Ok(None))));
        manager.add_subtask(value_job("three", 3));
        manager.start().expect("start");

        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let results = manager
            .collect_results(Some(Box::new(move |completed, total| {
                sink.lock().unwrap().push((completed, total));
            })))
            .await;

        assert_eq!(results.len(), 2);
        let reports = reports.lock().unwrap();
        assert_eq!(reports.last(), Some(&(3, 3)));
        assert!(reports.iter().all(|&(_, total)| total == 3));
        assert!(!manager.is_active());
        assert!(!manager.has_outstanding());
    }

    #[tokio::test]
    async fn test_shutdown_discards_unstarted_jobs() {
        let mut manager = JobManager::with_max_workers(1).expect("manager");
        manager.add_subtask(value_job("never", 1));
        manager.shutdown().await;
    }
}
