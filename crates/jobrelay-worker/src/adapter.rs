//! The worker contract the pool runs, and the adapter that lets any
//! [`Subtask`] satisfy it.

use std::sync::Arc;

use serde_json::Value;

use crate::error::SubtaskError;
use crate::relay::{RelaySender, SubtaskLogger};
use crate::task::{Settings, Subtask, SubtaskRef};

/// Result slot and success flag of one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerState {
    /// Value produced by `process`, if any.
    pub result: Option<Value>,
    /// `None` until `execute` finishes.
    pub successful: Option<bool>,
}

/// Anything the worker pool can execute.
pub trait JobWorker: Send + 'static {
    /// Human-readable name.
    fn name(&self) -> &str;

    /// Do the work, storing any result in [`WorkerState::result`].
    fn process(&mut self, args: &Settings) -> Result<(), SubtaskError>;

    /// Hook run after a successful `process`.
    fn on_completion(&mut self, _args: &Settings) -> Result<(), SubtaskError> {
        Ok(())
    }

    /// Emit a message through the worker's logging path.
    fn log(&self, message: &str);

    /// Route `log` output to the controller's relay.
    fn set_message_queue(&mut self, sender: RelaySender);

    /// Execution bookkeeping.
    fn state(&self) -> &WorkerState;

    /// Mutable execution bookkeeping.
    fn state_mut(&mut self) -> &mut WorkerState;

    /// Run `process` then `on_completion`, recording the outcome.
    ///
    /// On failure the error is logged and handed back unchanged so the
    /// future tracking this execution resolves to it.
    fn execute(&mut self, args: &Settings) -> Result<Option<Value>, SubtaskError> {
        let outcome = self
            .process(args)
            .and_then(|()| self.on_completion(args));

        match outcome {
            Ok(()) => {
                let state = self.state_mut();
                state.successful = Some(true);
                Ok(state.result.clone())
            }
            Err(e) => {
                tracing::error!(worker = self.name(), error = %e, "Failed {}", e);
                self.state_mut().successful = Some(false);
                Err(e)
            }
        }
    }
}

impl<W: JobWorker + ?Sized> JobWorker for Box<W> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn process(&mut self, args: &Settings) -> Result<(), SubtaskError> {
        (**self).process(args)
    }

    fn on_completion(&mut self, args: &Settings) -> Result<(), SubtaskError> {
        (**self).on_completion(args)
    }

    fn log(&self, message: &str) {
        (**self).log(message)
    }

    fn set_message_queue(&mut self, sender: RelaySender) {
        (**self).set_message_queue(sender)
    }

    fn state(&self) -> &WorkerState {
        (**self).state()
    }

    fn state_mut(&mut self) -> &mut WorkerState {
        (**self).state_mut()
    }

    fn execute(&mut self, args: &Settings) -> Result<Option<Value>, SubtaskError> {
        (**self).execute(args)
    }
}

/// Runs a [`Subtask`] as a [`JobWorker`].
pub struct SubtaskAdapter {
    adaptee: SubtaskRef,
    logger: SubtaskLogger,
    state: WorkerState,
}

impl SubtaskAdapter {
    /// Wrap an owned subtask.
    pub fn new(subtask: impl Subtask) -> Self {
        Self::from_shared(Arc::new(subtask))
    }

    /// Wrap a subtask already shared with a [`crate::task::Task`].
    pub fn from_shared(adaptee: SubtaskRef) -> Self {
        let logger = SubtaskLogger::unbound(adaptee.name());
        Self {
            adaptee,
            logger,
            state: WorkerState::default(),
        }
    }

    /// The wrapped subtask.
    pub fn adaptee(&self) -> &SubtaskRef {
        &self.adaptee
    }

    /// Explicit settings when the subtask declares any, its attribute
    /// mapping otherwise.
    pub fn settings(&self) -> Settings {
        let explicit = self.adaptee.settings();
        if explicit.is_empty() {
            self.adaptee.attributes()
        } else {
            explicit
        }
    }

    /// The result of the last execution.
    pub fn result(&self) -> Option<&Value> {
        self.state.result.as_ref()
    }

    /// Outcome of the last execution; `None` if it has not run.
    pub fn successful(&self) -> Option<bool> {
        self.state.successful
    }
}

impl std::fmt::Debug for SubtaskAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubtaskAdapter")
            .field("name", &self.adaptee.name())
            .field("state", &self.state)
            .finish()
    }
}

impl JobWorker for SubtaskAdapter {
    fn name(&self) -> &str {
        self.adaptee.name()
    }

    fn process(&mut self, _args: &Settings) -> Result<(), SubtaskError> {
        self.state.result = self.adaptee.work(&self.logger)?;
        Ok(())
    }

    fn log(&self, message: &str) {
        self.logger.log(message);
    }

    fn set_message_queue(&mut self, sender: RelaySender) {
        self.logger.bind(sender);
    }

    fn state(&self) -> &WorkerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut WorkerState {
        &mut self.state
    }
}

impl From<SubtaskRef> for SubtaskAdapter {
    fn from(adaptee: SubtaskRef) -> Self {
        Self::from_shared(adaptee)
    }
}
