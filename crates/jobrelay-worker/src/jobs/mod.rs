//! Built-in jobs.

pub mod command;

pub use command::{CommandStep, CommandSubtask, CommandWorkflow, JobSpec};
