//! Bounded worker pool and the futures tracking each submitted job.
//!
//! Jobs are handed to a single dispatcher in submission order. The
//! dispatcher waits for a free slot, then moves the job onto a blocking
//! worker thread. Nothing but the job's outcome comes back.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use jobrelay_core::error::AppError;

use crate::error::{JobError, SubtaskError};

/// What a finished job resolved to.
pub type JobOutcome = Result<Option<Value>, JobError>;

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    /// Waiting for a worker slot.
    Queued,
    /// Executing on a worker.
    Running,
    /// Cancelled before it started.
    Cancelled,
    /// Ran to completion, successfully or not.
    Finished(JobOutcome),
}

impl JobState {
    /// Cancelled or finished.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished(_))
    }
}

/// Handle to a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    name: Arc<str>,
    state: Arc<watch::Sender<JobState>>,
}

impl JobHandle {
    fn new(name: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(JobState::Queued);
        Self {
            id: Uuid::new_v4(),
            name: Arc::from(name.into()),
            state: Arc::new(tx),
        }
    }

    /// Unique id of this submission.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the job.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Cancel the job if no worker has picked it up yet.
    ///
    /// Returns `false` when it is already running or finished.
    pub fn cancel(&self) -> bool {
        let flipped = self.state.send_if_modified(|state| {
            if matches!(state, JobState::Queued) {
                *state = JobState::Cancelled;
                true
            } else {
                false
            }
        });
        flipped || self.cancelled()
    }

    /// Whether a worker is executing it right now.
    pub fn running(&self) -> bool {
        matches!(*self.state.borrow(), JobState::Running)
    }

    /// Whether it was cancelled.
    pub fn cancelled(&self) -> bool {
        matches!(*self.state.borrow(), JobState::Cancelled)
    }

    /// Cancelled or finished.
    pub fn done(&self) -> bool {
        self.state.borrow().is_done()
    }

    /// The outcome once done; a cancelled job resolves to
    /// [`JobError::Cancelled`].
    pub fn outcome(&self) -> Option<JobOutcome> {
        match &*self.state.borrow() {
            JobState::Finished(outcome) => Some(outcome.clone()),
            JobState::Cancelled => Some(Err(JobError::Cancelled {
                job: self.name.to_string(),
            })),
            JobState::Queued | JobState::Running => None,
        }
    }

    /// Wait until the job is done and return its outcome.
    pub async fn wait(&self) -> JobOutcome {
        let mut rx = self.state.subscribe();
        // The handle keeps the sender alive, so this cannot fail.
        let _ = rx.wait_for(JobState::is_done).await;
        self.outcome().unwrap_or(Err(JobError::PoolClosed))
    }

    fn mark_running(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, JobState::Queued) {
                *state = JobState::Running;
                true
            } else {
                false
            }
        })
    }

    fn finish(&self, outcome: JobOutcome) {
        self.state.send_replace(JobState::Finished(outcome));
    }
}

/// Indices of the handles that are done.
pub fn done_indices(handles: &[JobHandle]) -> Vec<usize> {
    handles
        .iter()
        .enumerate()
        .filter(|(_, h)| h.done())
        .map(|(i, _)| i)
        .collect()
}

/// Wait up to `timeout` for at least one handle to be done, then return
/// the indices of every done handle. Returns immediately when something
/// is already done, and returns an empty list on timeout.
pub async fn wait_completed(handles: &[JobHandle], timeout: Duration) -> Vec<usize> {
    let ready = done_indices(handles);
    if !ready.is_empty() || handles.is_empty() {
        return ready;
    }

    let waits = handles.iter().map(|h| Box::pin(h.wait()));
    let _ = tokio::time::timeout(timeout, futures::future::select_all(waits)).await;
    done_indices(handles)
}

type BoxedWork = Box<dyn FnOnce() -> Result<Option<Value>, SubtaskError> + Send + 'static>;

struct QueuedJob {
    handle: JobHandle,
    work: BoxedWork,
}

/// A bounded pool of blocking worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    max_workers: usize,
    slots: Arc<Semaphore>,
    queue: Option<mpsc::UnboundedSender<QueuedJob>>,
    dispatcher: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("handle", &self.handle)
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool with `max_workers` slots. Must be called from within a
    /// Tokio runtime.
    pub fn new(max_workers: usize) -> Result<Self, AppError> {
        if max_workers == 0 {
            return Err(AppError::configuration(
                "Worker pool needs at least one worker",
            ));
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AppError::internal(format!("Worker pool requires a Tokio runtime: {e}"))
        })?;

        let slots = Arc::new(Semaphore::new(max_workers));
        let stop = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let dispatcher = runtime.spawn(dispatch(rx, Arc::clone(&slots), stop.clone()));

        tracing::debug!("Worker pool started with {} slot(s)", max_workers);

        Ok(Self {
            max_workers,
            slots,
            queue: Some(tx),
            dispatcher: Some(dispatcher),
            stop,
        })
    }

    /// Number of worker slots.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Slots not currently running a job.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Queue `work` for execution and return its handle.
    pub fn submit<F>(&self, name: impl Into<String>, work: F) -> JobHandle
    where
        F: FnOnce() -> Result<Option<Value>, SubtaskError> + Send + 'static,
    {
        let handle = JobHandle::new(name);
        let job = QueuedJob {
            handle: handle.clone(),
            work: Box::new(work),
        };

        let sent = self
            .queue
            .as_ref()
            .is_some_and(|queue| queue.send(job).is_ok());
        if !sent {
            tracing::warn!("Rejected job '{}': worker pool is closed", handle.name());
            handle.finish(Err(JobError::PoolClosed));
        }

        handle
    }

    /// Stop accepting work, let every queued job run, and wait until all
    /// worker slots are released.
    pub async fn shutdown(mut self) {
        drop(self.queue.take());

        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                tracing::error!("Worker pool dispatcher failed: {}", e);
            }
        }

        let all = u32::try_from(self.max_workers).unwrap_or(u32::MAX);
        if let Ok(permits) = self.slots.acquire_many(all).await {
            permits.forget();
        }
        self.slots.close();

        tracing::debug!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Jobs still queued are cancelled; running ones finish detached.
        self.stop.cancel();
    }
}

async fn dispatch(
    mut queue: mpsc::UnboundedReceiver<QueuedJob>,
    slots: Arc<Semaphore>,
    stop: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if job.handle.done() {
            continue;
        }

        let mut state = job.handle.state.subscribe();
        let permit = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                job.handle.cancel();
                break;
            }
            _ = state.wait_for(|s| !matches!(s, JobState::Queued)) => continue,
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    job.handle.finish(Err(JobError::PoolClosed));
                    break;
                }
            },
        };

        // Lost the race against `cancel`.
        if !job.handle.mark_running() {
            continue;
        }

        let QueuedJob { handle, work } = job;
        tracing::debug!(job_id = %handle.id(), "Dispatching job '{}'", handle.name());

        tokio::spawn(async move {
            let outcome = match tokio::task::spawn_blocking(work).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(JobError::failed(handle.name(), &e)),
                Err(e) => Err(JobError::panicked(handle.name(), e)),
            };
            tracing::debug!(
                job_id = %handle.id(),
                ok = outcome.is_ok(),
                "Job '{}' finished",
                handle.name()
            );
            handle.finish(outcome);
            drop(permit);
        });
    }

    queue.close();
    while let Ok(job) = queue.try_recv() {
        job.handle.cancel();
    }
}
