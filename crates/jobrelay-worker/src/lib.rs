//! Job execution engine for JobRelay.
//!
//! This crate provides:
//! - Subtasks, tasks and the builder that assembles them
//! - The `JobWorker` contract and the adapter that runs any subtask
//! - A bounded worker pool with cancellable job handles
//! - A message relay carrying worker log lines back to the controller
//! - The job manager that dispatches work, streams results and aborts
//! - Option validation, the workflow contract, and built-in command jobs

pub mod adapter;
pub mod error;
pub mod jobs;
pub mod manager;
pub mod observer;
pub mod pool;
pub mod relay;
pub mod task;
pub mod validation;
pub mod workflow;

pub use adapter::{JobWorker, SubtaskAdapter, WorkerState};
pub use error::{JobError, SubtaskError};
pub use manager::{AbortSummary, JobManager, Progress, ProgressCallback};
pub use observer::{Observer, Subject};
pub use pool::{JobHandle, JobState, WorkerPool};
pub use relay::{MessageEntry, MessageRelay, MessageSink, SubtaskLogger, TracingSink};
pub use task::{FnSubtask, Settings, Subtask, SubtaskResult, Task, TaskBuilder};
pub use workflow::{Workflow, WorkflowReport, run_workflow};
