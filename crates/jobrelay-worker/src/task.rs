//! Subtasks, and the tasks a job is decomposed into.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::SubtaskError;
use crate::relay::SubtaskLogger;

/// Keyword settings handed to a worker at dispatch.
pub type Settings = serde_json::Map<String, Value>;

/// What `work()` produces: an optional result value.
pub type SubtaskResult = Result<Option<Value>, SubtaskError>;

/// Keys that belong to execution bookkeeping, never to settings.
pub const RESERVED_KEYS: &[&str] = &["result", "successful"];

/// The smallest schedulable unit of work.
///
/// A subtask is shared read-only between the task that owns it and the
/// worker that runs it; `work` takes `&self` and returns its result rather
/// than storing it.
pub trait Subtask: Send + Sync + 'static {
    /// Human-readable name.
    fn name(&self) -> &str;

    /// Do the work. Messages written to `log` reach the controller.
    fn work(&self, log: &SubtaskLogger) -> SubtaskResult;

    /// Explicit dispatch settings. Empty means "use `attributes`".
    fn settings(&self) -> Settings {
        Settings::new()
    }

    /// The subtask's own attribute mapping.
    ///
    /// Implementations that derive `Serialize` usually return
    /// [`attributes_of`]`(self)`.
    fn attributes(&self) -> Settings {
        Settings::new()
    }
}

/// Serialize a value into an attribute mapping, dropping reserved and
/// `_`-prefixed keys. Non-object serializations yield an empty mapping.
pub fn attributes_of<T: Serialize + ?Sized>(value: &T) -> Settings {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .filter(|(key, _)| !key.starts_with('_') && !RESERVED_KEYS.contains(&key.as_str()))
            .collect(),
        Ok(_) => Settings::new(),
        Err(e) => {
            tracing::warn!("Failed to serialize subtask attributes: {}", e);
            Settings::new()
        }
    }
}

/// A subtask backed by a closure.
pub struct FnSubtask<F> {
    name: String,
    settings: Settings,
    work: F,
}

impl<F> FnSubtask<F>
where
    F: Fn(&SubtaskLogger) -> SubtaskResult + Send + Sync + 'static,
{
    /// Create a closure-backed subtask.
    pub fn new(name: impl Into<String>, work: F) -> Self {
        Self {
            name: name.into(),
            settings: Settings::new(),
            work,
        }
    }

    /// Attach explicit settings.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }
}

impl<F> fmt::Debug for FnSubtask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSubtask")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<F> Subtask for FnSubtask<F>
where
    F: Fn(&SubtaskLogger) -> SubtaskResult + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn work(&self, log: &SubtaskLogger) -> SubtaskResult {
        (self.work)(log)
    }

    fn settings(&self) -> Settings {
        self.settings.clone()
    }
}

/// Shared handle to a subtask.
pub type SubtaskRef = Arc<dyn Subtask>;

/// An immutable, ordered decomposition of one job.
#[derive(Clone, Default)]
pub struct Task {
    subtasks: Vec<SubtaskRef>,
}

impl Task {
    /// Subtasks in the order they were added.
    pub fn subtasks(&self) -> &[SubtaskRef] {
        &self.subtasks
    }

    /// Number of subtasks.
    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    /// Whether the task has no subtasks.
    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Same subtasks, by identity, in the same order.
    pub fn same_subtasks(&self, other: &Task) -> bool {
        self.subtasks.len() == other.subtasks.len()
            && self
                .subtasks
                .iter()
                .zip(&other.subtasks)
                .all(|(a, b)| std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.subtasks.iter().map(|s| s.name()))
            .finish()
    }
}

/// Accumulates subtasks into a [`Task`].
#[derive(Default)]
pub struct TaskBuilder {
    subtasks: Vec<SubtaskRef>,
}

impl TaskBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subtask.
    pub fn add_subtask(&mut self, subtask: impl Subtask) -> &mut Self {
        self.subtasks.push(Arc::new(subtask));
        self
    }

    /// Append an already shared subtask.
    pub fn add_shared(&mut self, subtask: SubtaskRef) -> &mut Self {
        self.subtasks.push(subtask);
        self
    }

    /// Snapshot of everything added so far. The builder keeps accepting
    /// subtasks afterwards.
    pub fn build_task(&self) -> Task {
        Task {
            subtasks: self.subtasks.clone(),
        }
    }
}
