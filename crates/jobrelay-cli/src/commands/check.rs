//! Validate a job file without running it.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use jobrelay_core::error::AppError;
use jobrelay_worker::jobs::{CommandStep, CommandSubtask, CommandWorkflow};
use jobrelay_worker::task::{Subtask, TaskBuilder};
use jobrelay_worker::workflow::Workflow;

use crate::output::{self, OutputFormat};

/// Arguments for the check command
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Path to the JSON job file
    pub job_file: PathBuf,
}

/// A planned step.
#[derive(Debug, Serialize, Tabled)]
struct PlanRow {
    /// Job index, 1-based
    #[tabled(rename = "Job")]
    job: usize,
    /// Subtask name
    #[tabled(rename = "Step")]
    name: String,
    /// Full command line
    #[tabled(rename = "Command")]
    command: String,
    /// Effective timeout
    #[tabled(rename = "Timeout (s)")]
    timeout_seconds: u64,
}

/// Execute the check command
pub async fn execute(
    args: &CheckArgs,
    config_path: Option<&str>,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let workflow = CommandWorkflow::new(config.engine.command_timeout_seconds);
    let user_args = CommandWorkflow::user_args(&args.job_file);

    workflow.validate_user_options(&user_args)?;
    let jobs = workflow.discover_task_metadata(&user_args).await?;

    let mut rows = Vec::new();
    for (index, job_args) in jobs.iter().enumerate() {
        let mut builder = TaskBuilder::new();
        workflow.create_new_task(&mut builder, job_args)?;

        for subtask in builder.build_task().subtasks() {
            let attributes = subtask.attributes();
            let step: CommandStep = serde_json::from_value(serde_json::Value::Object(attributes))?;
            let planned = CommandSubtask::new(
                subtask.name(),
                step,
                config.engine.command_timeout_seconds,
            );
            rows.push(PlanRow {
                job: index + 1,
                name: planned.name().to_string(),
                command: planned.step().display(),
                timeout_seconds: planned.timeout_seconds(),
            });
        }
    }

    output::print_list(&rows, format);
    if format == OutputFormat::Table {
        output::print_success(&format!(
            "'{}' is valid: {} job(s), {} step(s)",
            args.job_file.display(),
            jobs.len(),
            rows.len()
        ));
    }
    Ok(())
}
