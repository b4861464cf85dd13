//! Run a job file through the engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Args;
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;

use jobrelay_core::error::AppError;
use jobrelay_worker::jobs::CommandWorkflow;
use jobrelay_worker::manager::{JobManager, Progress};
use jobrelay_worker::observer::{Observer, Subject};
use jobrelay_worker::workflow::{WorkflowReport, run_workflow};

use crate::output::{self, OutputFormat};

/// Arguments for the run command
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the JSON job file
    pub job_file: PathBuf,

    /// Worker slots (overrides configuration)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Default per-step timeout in seconds (overrides configuration)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Do not report progress
    #[arg(short, long)]
    pub quiet: bool,
}

/// One finished step, as printed in the summary.
#[derive(Debug, Serialize, Tabled)]
struct StepRow {
    /// Step name
    #[tabled(rename = "Step")]
    name: String,
    /// Exit code
    #[tabled(rename = "Exit")]
    exit_code: String,
    /// Wall time
    #[tabled(rename = "Duration (ms)")]
    duration_ms: String,
}

impl StepRow {
    fn from_result(value: &Value) -> Self {
        let field = |key: &str| match value.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "-".to_string(),
            Some(other) => other.to_string(),
        };
        Self {
            name: field("name"),
            exit_code: field("exit_code"),
            duration_ms: field("duration_ms"),
        }
    }
}

/// Prints a progress line to stderr whenever the completed count changes.
#[derive(Debug, Default)]
struct ProgressPrinter {
    last: AtomicUsize,
}

impl Observer<Progress> for ProgressPrinter {
    fn emit(&self, value: Option<&Progress>) {
        let Some(progress) = value else {
            return;
        };
        if self.last.swap(progress.completed, Ordering::Relaxed) != progress.completed {
            eprintln!("[{}/{}] jobs finished", progress.completed, progress.total);
        }
    }
}

/// Execute the run command
pub async fn execute(
    args: &RunArgs,
    config_path: Option<&str>,
    format: OutputFormat,
) -> Result<(), AppError> {
    let mut config = super::load_config(config_path)?;
    if let Some(workers) = args.workers {
        config.engine.max_workers = workers;
        config.validate()?;
    }
    let timeout = args
        .timeout
        .unwrap_or(config.engine.command_timeout_seconds);

    let workflow = CommandWorkflow::new(timeout);
    let user_args = CommandWorkflow::user_args(&args.job_file);
    let mut manager = JobManager::new(config.engine.clone())?;

    let shutdown = CancellationToken::new();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling jobs");
            interrupt.cancel();
        }
    });

    let progress = Subject::<Progress>::new();
    if !args.quiet {
        progress.subscribe(Arc::new(ProgressPrinter::default()));
    }

    let report = run_workflow(
        &workflow,
        &mut manager,
        &user_args,
        Some(progress.progress_callback()),
        &shutdown,
    )
    .await;
    manager.shutdown().await;

    let report = report?;
    print_report(&report, format);

    if let Some(summary) = report.aborted {
        return Err(AppError::cancelled(format!(
            "Aborted: {} job(s) cancelled, {} waited for",
            summary.cancelled, summary.waited
        )));
    }
    if !report.failures.is_empty() {
        return Err(AppError::worker_failure(format!(
            "{} of {} job(s) failed",
            report.failures.len(),
            report.dispatched
        )));
    }
    Ok(())
}

fn print_report(report: &WorkflowReport, format: OutputFormat) {
    let rows: Vec<StepRow> = report.results.iter().map(StepRow::from_result).collect();
    output::print_list(&rows, format);

    for failure in &report.failures {
        output::print_error(&failure.to_string());
    }

    if format == OutputFormat::Table {
        output::print_kv("Dispatched", &report.dispatched.to_string());
        output::print_kv("Completed", &report.completed.to_string());
        output::print_kv("Failed", &report.failures.len().to_string());
    }

    if report.is_success() {
        output::print_success(&format!("{} job(s) completed", report.completed));
    } else if report.aborted.is_some() {
        output::print_warning("Run was interrupted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_row_from_command_result() {
        let row = StepRow::from_result(&json!({
            "name": "build [1/1] make",
            "command": "make",
            "exit_code": 0,
            "duration_ms": 42
        }));
        assert_eq!(row.name, "build [1/1] make");
        assert_eq!(row.exit_code, "0");
        assert_eq!(row.duration_ms, "42");
    }

    #[test]
    fn test_step_row_from_foreign_value() {
        let row = StepRow::from_result(&json!(7));
        assert_eq!(row.name, "-");
        assert_eq!(row.exit_code, "-");
    }

    #[test]
    fn test_progress_printer_tracks_last_count() {
        let printer = ProgressPrinter::default();
        printer.emit(Some(&Progress {
            completed: 2,
            total: 3,
        }));
        printer.emit(None);
        assert_eq!(printer.last.load(Ordering::Relaxed), 2);
    }
}
