//! External command jobs.
//!
//! A job file is a JSON array of jobs, each a named list of command steps:
//!
//! ```json
//! [{"name": "thumbs", "steps": [{"command": "convert", "args": ["a.tif", "a.jpg"]}]}]
//! ```
//!
//! Each job becomes one task and each step one [`CommandSubtask`], run as a
//! child process with its stdout streamed through the relay line by line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};

use jobrelay_core::error::AppError;
use jobrelay_core::result::AppResult;

use crate::error::SubtaskError;
use crate::relay::SubtaskLogger;
use crate::task::{Settings, Subtask, SubtaskResult, TaskBuilder, attributes_of};
use crate::validation::{OptionValidation, OptionValidator, ValidKey, ValidationContext};
use crate::workflow::{OptionKind, UserOption, Workflow};

/// Label of the job file option.
pub const JOB_FILE_OPTION: &str = "Job File";

/// Most of a failing command's stderr kept in the error.
const STDERR_LIMIT: usize = 2000;

/// One command to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    /// Program to execute.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; inherited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Per-step timeout; the workflow default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl CommandStep {
    /// A step running `command` with `args`.
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout_seconds: None,
        }
    }

    /// Command line as typed in a shell, for log messages.
    pub fn display(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One entry of a job file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job name.
    pub name: String,
    /// Steps, run as separate subtasks.
    pub steps: Vec<CommandStep>,
}

/// Runs a single [`CommandStep`] as a child process.
#[derive(Debug, Clone, Serialize)]
pub struct CommandSubtask {
    name: String,
    #[serde(flatten)]
    step: CommandStep,
    #[serde(skip)]
    default_timeout_seconds: u64,
}

impl CommandSubtask {
    /// Create a subtask; `default_timeout_seconds` applies when the step has
    /// no timeout of its own.
    pub fn new(name: impl Into<String>, step: CommandStep, default_timeout_seconds: u64) -> Self {
        Self {
            name: name.into(),
            step,
            default_timeout_seconds,
        }
    }

    /// The step being run.
    pub fn step(&self) -> &CommandStep {
        &self.step
    }

    /// Effective timeout.
    pub fn timeout_seconds(&self) -> u64 {
        self.step.timeout_seconds.unwrap_or(self.default_timeout_seconds)
    }

    async fn run(&self, log: &SubtaskLogger) -> SubtaskResult {
        let start = Instant::now();
        let step = &self.step;
        let timeout_seconds = self.timeout_seconds();

        log.log(format!("Running: {}", step.display()));

        let mut cmd = Command::new(&step.command);
        cmd.args(&step.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = step.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &step.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            tracing::error!("Failed to start command '{}': {}", step.command, e);
            SubtaskError::Io(e)
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = tokio::time::timeout(Duration::from_secs(timeout_seconds), async {
            let ((), stderr, status) = tokio::join!(
                forward_lines(stdout, log),
                read_stderr(stderr),
                child.wait()
            );
            status.map(|status| (status, stderr))
        })
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok((status, stderr))) => {
                let exit_code = status.code();
                if !status.success() {
                    let code = exit_code.unwrap_or(-1);
                    tracing::error!(
                        "Command failed: command='{}', exit_code={}, stderr='{}'",
                        step.command,
                        code,
                        stderr.chars().take(500).collect::<String>()
                    );
                    return Err(SubtaskError::CommandFailed {
                        command: step.command.clone(),
                        code,
                        stderr: stderr.chars().take(STDERR_LIMIT).collect(),
                    });
                }

                log.log(format!("Finished: {} ({}ms)", step.display(), duration_ms));
                Ok(Some(json!({
                    "name": self.name,
                    "command": step.command,
                    "exit_code": exit_code,
                    "duration_ms": duration_ms,
                })))
            }
            Ok(Err(e)) => Err(SubtaskError::Io(e)),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill timed out command '{}': {}", step.command, e);
                }
                tracing::error!(
                    "Command timed out after {}s: command='{}'",
                    timeout_seconds,
                    step.command
                );
                Err(SubtaskError::Timeout {
                    command: step.command.clone(),
                    timeout_seconds,
                })
            }
        }
    }
}

impl Subtask for CommandSubtask {
    fn name(&self) -> &str {
        &self.name
    }

    /// Blocks the worker thread on the child process.
    fn work(&self, log: &SubtaskLogger) -> SubtaskResult {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SubtaskError::failed(format!("Command jobs need a Tokio runtime: {e}")))?;
        runtime.block_on(self.run(log))
    }

    fn attributes(&self) -> Settings {
        attributes_of(self)
    }
}

async fn forward_lines(stdout: Option<ChildStdout>, log: &SubtaskLogger) {
    let Some(stdout) = stdout else {
        return;
    };
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log.log(line),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Stopped reading command output: {}", e);
                break;
            }
        }
    }
}

async fn read_stderr(stderr: Option<ChildStderr>) -> String {
    let mut text = String::new();
    if let Some(mut stderr) = stderr {
        if let Err(e) = stderr.read_to_string(&mut text).await {
            tracing::warn!("Failed to read command stderr: {}", e);
        }
    }
    text
}

/// Rejects a job file option that does not name an existing file.
#[derive(Debug, Clone, Copy)]
struct JobFileExists;

impl OptionValidation for JobFileExists {
    fn get_issues(&self, _ctx: &ValidationContext<'_>, key: &str, value: &Value) -> Vec<String> {
        if key != JOB_FILE_OPTION {
            return Vec::new();
        }
        match value.as_str().filter(|s| !s.trim().is_empty()) {
            None => vec![format!("{key} is empty")],
            Some(path) if !Path::new(path).is_file() => {
                vec![format!("File \"{path}\" does not exist")]
            }
            Some(_) => Vec::new(),
        }
    }
}

/// Runs the jobs listed in a JSON job file.
#[derive(Debug, Clone)]
pub struct CommandWorkflow {
    default_timeout_seconds: u64,
}

impl CommandWorkflow {
    /// Create the workflow with a default per-step timeout.
    pub fn new(default_timeout_seconds: u64) -> Self {
        Self {
            default_timeout_seconds,
        }
    }

    /// User arguments pointing the workflow at `path`.
    pub fn user_args(path: impl AsRef<Path>) -> Settings {
        let mut args = Settings::new();
        args.insert(
            JOB_FILE_OPTION.to_string(),
            Value::String(path.as_ref().to_string_lossy().into_owned()),
        );
        args
    }

    /// Parse a job file.
    pub fn parse_job_file(text: &str) -> AppResult<Vec<JobSpec>> {
        let jobs: Vec<JobSpec> = serde_json::from_str(text)?;
        if let Some(job) = jobs.iter().find(|j| j.steps.is_empty()) {
            return Err(AppError::validation(format!(
                "Job '{}' has no steps",
                job.name
            )));
        }
        Ok(jobs)
    }
}

#[async_trait]
impl Workflow for CommandWorkflow {
    fn name(&self) -> &str {
        "command"
    }

    fn description(&self) -> &str {
        "Runs every command step listed in a JSON job file, one subtask per step."
    }

    fn user_options(&self) -> Vec<UserOption> {
        vec![UserOption::new(JOB_FILE_OPTION, OptionKind::File)]
    }

    fn validator(&self, _user_args: &Settings) -> OptionValidator {
        OptionValidator::new(self.option_labels())
            .with(ValidKey::declared())
            .with(JobFileExists)
    }

    async fn discover_task_metadata(&self, user_args: &Settings) -> AppResult<Vec<Settings>> {
        let path = user_args
            .get(JOB_FILE_OPTION)
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::validation(format!("{JOB_FILE_OPTION} is empty")))?;

        let text = tokio::fs::read_to_string(path).await?;
        let jobs = Self::parse_job_file(&text)?;

        jobs.iter()
            .map(|job| -> AppResult<Settings> {
                match serde_json::to_value(job)? {
                    Value::Object(map) => Ok(map),
                    _ => Err(AppError::internal("Job did not serialize to an object")),
                }
            })
            .collect()
    }

    fn create_new_task(&self, builder: &mut TaskBuilder, job_args: &Settings) -> AppResult<()> {
        let job: JobSpec = serde_json::from_value(Value::Object(job_args.clone()))?;
        let total = job.steps.len();

        for (index, step) in job.steps.into_iter().enumerate() {
            let name = format!("{} [{}/{}] {}", job.name, index + 1, total, step.command);
            builder.add_subtask(CommandSubtask::new(name, step, self.default_timeout_seconds));
        }
        Ok(())
    }
}
