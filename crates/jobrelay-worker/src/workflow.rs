//! Workflows: the layer that turns user options into tasks for the engine.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use jobrelay_core::result::AppResult;

use crate::error::JobError;
use crate::manager::{AbortSummary, JobManager, ProgressCallback};
use crate::task::{Settings, TaskBuilder};
use crate::validation::{OptionValidator, ValidKey, ValidationError};

/// What kind of value a user option takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "choices")]
pub enum OptionKind {
    /// Path to an existing directory.
    Directory,
    /// Path to an existing file.
    File,
    /// Free text.
    Text,
    /// On/off switch.
    Boolean,
    /// One of a fixed set of values.
    Choice(Vec<String>),
}

/// A labelled option a workflow asks the user for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOption {
    /// Label, also the key in the user arguments.
    pub label: String,
    /// Expected value kind.
    pub kind: OptionKind,
}

impl UserOption {
    /// Create an option.
    pub fn new(label: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            label: label.into(),
            kind,
        }
    }
}

/// A named recipe for turning user options into jobs.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Short name.
    fn name(&self) -> &str;

    /// One-paragraph description shown to users.
    fn description(&self) -> &str {
        ""
    }

    /// Options the user must or may supply.
    fn user_options(&self) -> Vec<UserOption>;

    /// Rules applied to the user's options before discovery.
    ///
    /// Defaults to rejecting undeclared keys.
    fn validator(&self, _user_args: &Settings) -> OptionValidator {
        OptionValidator::new(self.option_labels()).with(ValidKey::declared())
    }

    /// Labels of [`user_options`](Self::user_options).
    fn option_labels(&self) -> Vec<String> {
        self.user_options().into_iter().map(|o| o.label).collect()
    }

    /// Run [`validator`](Self::validator) over `user_args`.
    fn validate_user_options(&self, user_args: &Settings) -> Result<(), ValidationError> {
        self.validator(user_args).validate(user_args)
    }

    /// Work out one settings mapping per job.
    async fn discover_task_metadata(&self, user_args: &Settings) -> AppResult<Vec<Settings>>;

    /// Add the subtasks for one job to `builder`.
    fn create_new_task(&self, builder: &mut TaskBuilder, job_args: &Settings) -> AppResult<()>;
}

/// What a workflow run produced.
#[derive(Debug, Default)]
pub struct WorkflowReport {
    /// Non-empty results of successful jobs, in completion order.
    pub results: Vec<Value>,
    /// Jobs that failed.
    pub failures: Vec<JobError>,
    /// Jobs that finished, successfully or not.
    pub completed: usize,
    /// Subtasks dispatched.
    pub dispatched: usize,
    /// Set when the run was interrupted.
    pub aborted: Option<AbortSummary>,
}

impl WorkflowReport {
    /// No failures and not aborted.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.aborted.is_none()
    }
}

/// Validate, discover, build and run every job of `workflow`, then collect
/// results until done or until `shutdown` fires, in which case the
/// outstanding jobs are aborted.
pub async fn run_workflow(
    workflow: &dyn Workflow,
    manager: &mut JobManager,
    user_args: &Settings,
    progress: Option<ProgressCallback<'_>>,
    shutdown: &CancellationToken,
) -> AppResult<WorkflowReport> {
    workflow.validate_user_options(user_args)?;

    let jobs = workflow.discover_task_metadata(user_args).await?;
    tracing::info!("Workflow '{}' discovered {} job(s)", workflow.name(), jobs.len());

    for job_args in &jobs {
        let mut builder = TaskBuilder::new();
        workflow.create_new_task(&mut builder, job_args)?;
        manager.add_task(&builder.build_task());
    }

    let mut report = WorkflowReport {
        dispatched: manager.start()?,
        ..WorkflowReport::default()
    };

    let mut completed = 0;
    let mut progress = progress;
    let counter: ProgressCallback<'_> = Box::new(|done, total| {
        completed = done;
        if let Some(forward) = progress.as_mut() {
            forward(done, total);
        }
    });

    let mut interrupted = false;
    {
        let results = manager.get_results(Some(counter));
        futures::pin_mut!(results);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    interrupted = true;
                    break;
                }
                item = results.next() => match item {
                    Some(Ok(value)) => report.results.push(value),
                    Some(Err(e)) => report.failures.push(e),
                    None => break,
                },
            }
        }
    }
    report.completed = completed;

    if interrupted {
        tracing::warn!("Workflow '{}' interrupted, aborting outstanding jobs", workflow.name());
        report.aborted = Some(manager.abort(None).await);
    }

    tracing::info!(
        "Workflow '{}' finished: {} completed, {} failed",
        workflow.name(),
        report.completed,
        report.failures.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubtaskError;
    use crate::task::FnSubtask;
    use jobrelay_core::error::ErrorKind;
    use serde_json::json;

    struct Numbers;

    #[async_trait]
    impl Workflow for Numbers {
        fn name(&self) -> &str {
            "numbers"
        }

        fn user_options(&self) -> Vec<UserOption> {
            vec![UserOption::new("Count", OptionKind::Text)]
        }

        async fn discover_task_metadata(&self, user_args: &Settings) -> AppResult<Vec<Settings>> {
            let count = user_args.get("Count").and_then(Value::as_u64).unwrap_or(0);
            Ok((1..=count)
                .map(|n| {
                    let mut job = Settings::new();
                    job.insert("n".into(), json!(n));
                    job
                })
                .collect())
        }

        fn create_new_task(&self, builder: &mut TaskBuilder, job_args: &Settings) -> AppResult<()> {
            let n = job_args.get("n").and_then(Value::as_u64).unwrap_or(0);
            builder.add_subtask(FnSubtask::new(format!("n{n}"), move |_| {
                if n == 2 {
                    Err(SubtaskError::failed("two is unlucky"))
                } else {
                    Ok(Some(json!(n)))
                }
            }));
            Ok(())
        }
    }

    fn user_args(pairs: &[(&str, Value)]) -> Settings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_workflow_collects_results_and_failures() {
        let mut manager = JobManager::with_max_workers(2).expect("manager");
        let report = run_workflow(
            &Numbers,
            &mut manager,
            &user_args(&[("Count", json!(3))]),
            None,
            &CancellationToken::new(),
        )
        .await
        .expect("run");

        let mut results: Vec<u64> = report.results.iter().filter_map(Value::as_u64).collect();
        results.sort_unstable();
        assert_eq!(results, vec![1, 3]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.completed, 3);
        assert_eq!(report.dispatched, 3);
        assert!(!report.is_success());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_dispatch() {
        let mut manager = JobManager::with_max_workers(1).expect("manager");
        let err = run_workflow(
            &Numbers,
            &mut manager,
            &user_args(&[("Colour", json!("red"))]),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!manager.has_outstanding());
        assert_eq!(manager.pending_jobs(), 0);
    }

    #[test]
    fn test_option_labels_follow_declaration() {
        assert_eq!(Numbers.option_labels(), vec!["Count".to_string()]);
        assert_eq!(Numbers.description(), "");
    }
}
