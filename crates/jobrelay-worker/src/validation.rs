//! Checks run against user-supplied options before any job is created.
//!
//! Every rule looks at one `(key, value)` pair at a time and reports zero or
//! more human-readable issues. [`OptionValidator`] runs every rule over every
//! option and fails once, listing all of them.

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use jobrelay_core::error::AppError;

use crate::task::Settings;

/// Everything a rule may look at besides the option under test.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Labels of the options the workflow declares.
    pub option_labels: &'a [String],
    /// The full set of options the user supplied.
    pub user_args: &'a Settings,
}

/// A single validation rule.
pub trait OptionValidation: Send + Sync {
    /// Issues found with `key = value`. Empty means valid.
    fn get_issues(&self, ctx: &ValidationContext<'_>, key: &str, value: &Value) -> Vec<String>;
}

/// Aggregated validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .issues.join("\n"))]
pub struct ValidationError {
    /// Every issue found, one per line when displayed.
    pub issues: Vec<String>,
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::validation(err.to_string())
    }
}

/// A non-empty string value, if the option has one.
fn text_of(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.trim().is_empty())
}

/// Rejects option keys that are not known.
///
/// With no explicit keys, the workflow's declared option labels are used.
#[derive(Debug, Clone, Default)]
pub struct ValidKey {
    keys: Vec<String>,
}

impl ValidKey {
    /// Accept only the given keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Accept exactly the workflow's declared option labels.
    pub fn declared() -> Self {
        Self::default()
    }
}

impl OptionValidation for ValidKey {
    fn get_issues(&self, ctx: &ValidationContext<'_>, key: &str, _value: &Value) -> Vec<String> {
        let valid = if self.keys.is_empty() {
            ctx.option_labels
        } else {
            self.keys.as_slice()
        };

        if valid.iter().any(|k| k == key) {
            Vec::new()
        } else {
            vec![format!("[{key}] is not a valid option")]
        }
    }
}

/// Requires the listed options to name an existing directory.
#[derive(Debug, Clone)]
pub struct DirectoryExists {
    keys: Vec<String>,
}

impl DirectoryExists {
    /// Check the given option keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl OptionValidation for DirectoryExists {
    fn get_issues(&self, _ctx: &ValidationContext<'_>, key: &str, value: &Value) -> Vec<String> {
        if !self.keys.iter().any(|k| k == key) {
            return Vec::new();
        }

        match text_of(value) {
            None => vec![format!("{key} is empty")],
            Some(path) if !Path::new(path).is_dir() => {
                vec![format!("Directory \"{path}\" does not exist")]
            }
            Some(_) => Vec::new(),
        }
    }
}

/// Requires at least one of several output options to name an existing
/// directory. The others may be left empty.
#[derive(Debug, Clone)]
pub struct AtLeastOneOutput {
    keys: Vec<String>,
}

impl AtLeastOneOutput {
    /// Check the given group of output keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    fn is_valid(value: &Value) -> bool {
        text_of(value).is_some_and(|path| Path::new(path).is_dir())
    }
}

impl OptionValidation for AtLeastOneOutput {
    fn get_issues(&self, ctx: &ValidationContext<'_>, key: &str, value: &Value) -> Vec<String> {
        if !self.keys.iter().any(|k| k == key) || Self::is_valid(value) {
            return Vec::new();
        }

        let mut issues = Vec::new();
        if let Some(path) = text_of(value) {
            issues.push(format!("Directory \"{path}\" does not exist"));
        }

        let any_valid = self
            .keys
            .iter()
            .filter_map(|k| ctx.user_args.get(k))
            .any(Self::is_valid);
        if !any_valid {
            issues.push(format!(
                "At least one of the following options must be a valid directory: {}",
                self.keys.join(", ")
            ));
        }
        issues
    }
}

/// Runs a set of rules over every user option.
#[derive(Default)]
pub struct OptionValidator {
    option_labels: Vec<String>,
    validators: Vec<Box<dyn OptionValidation>>,
}

impl OptionValidator {
    /// Create a validator for a workflow declaring `option_labels`.
    pub fn new(option_labels: Vec<String>) -> Self {
        Self {
            option_labels,
            validators: Vec::new(),
        }
    }

    /// Add a rule.
    pub fn with(mut self, rule: impl OptionValidation + 'static) -> Self {
        self.validators.push(Box::new(rule));
        self
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether there are no rules.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// De-duplicated issues every rule reports for one option.
    pub fn find_user_option_errors(
        &self,
        user_args: &Settings,
        key: &str,
        value: &Value,
    ) -> Vec<String> {
        let ctx = ValidationContext {
            option_labels: &self.option_labels,
            user_args,
        };

        let mut issues: Vec<String> = Vec::new();
        for rule in &self.validators {
            for issue in rule.get_issues(&ctx, key, value) {
                if !issues.contains(&issue) {
                    issues.push(issue);
                }
            }
        }
        issues
    }

    /// Check every option, failing with all issues at once.
    pub fn validate(&self, user_args: &Settings) -> Result<(), ValidationError> {
        let issues: Vec<String> = user_args
            .iter()
            .flat_map(|(key, value)| self.find_user_option_errors(user_args, key, value))
            .collect();

        if issues.is_empty() {
            Ok(())
        } else {
            tracing::debug!("Option validation found {} issue(s)", issues.len());
            Err(ValidationError { issues })
        }
    }
}

impl std::fmt::Debug for OptionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionValidator")
            .field("option_labels", &self.option_labels)
            .field("rules", &self.validators.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> Settings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn labels() -> Vec<String> {
        vec![
            "Input".to_string(),
            "Output Digital Library".to_string(),
            "Output HathiTrust".to_string(),
        ]
    }

    #[test]
    fn test_valid_key_uses_declared_labels() {
        let validator = OptionValidator::new(labels()).with(ValidKey::declared());
        let user_args = args(&[("Input", json!("x")), ("Bogus", json!("y"))]);

        let err = validator.validate(&user_args).unwrap_err();
        assert_eq!(err.issues, vec!["[Bogus] is not a valid option".to_string()]);
    }

    #[test]
    fn test_valid_key_explicit_list() {
        let validator = OptionValidator::new(labels()).with(ValidKey::new(["Input"]));
        let user_args = args(&[("Output HathiTrust", json!(""))]);
        assert!(validator.validate(&user_args).is_err());
    }

    #[test]
    fn test_directory_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let validator = OptionValidator::new(labels()).with(DirectoryExists::new(["Input"]));

        let ok = args(&[("Input", json!(dir.path().to_string_lossy()))]);
        assert!(validator.validate(&ok).is_ok());

        let missing = args(&[("Input", json!("/definitely/not/here"))]);
        let err = validator.validate(&missing).unwrap_err();
        assert_eq!(
            err.issues,
            vec!["Directory \"/definitely/not/here\" does not exist".to_string()]
        );

        let empty = args(&[("Input", Value::Null)]);
        let err = validator.validate(&empty).unwrap_err();
        assert_eq!(err.issues, vec!["Input is empty".to_string()]);
    }

    #[test]
    fn test_at_least_one_output_accepts_single_valid_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let validator = OptionValidator::new(labels()).with(AtLeastOneOutput::new([
            "Output Digital Library",
            "Output HathiTrust",
        ]));

        let user_args = args(&[
            ("Output Digital Library", json!(dir.path().to_string_lossy())),
            ("Output HathiTrust", json!("")),
        ]);
        assert!(validator.validate(&user_args).is_ok());
    }

    #[test]
    fn test_at_least_one_output_rejects_all_empty() {
        let validator = OptionValidator::new(labels()).with(AtLeastOneOutput::new([
            "Output Digital Library",
            "Output HathiTrust",
        ]));

        let user_args = args(&[
            ("Output Digital Library", json!("")),
            ("Output HathiTrust", Value::Null),
        ]);
        let err = validator.validate(&user_args).unwrap_err();
        // Reported once per offending key.
        assert_eq!(err.issues.len(), 2);
        assert!(err.issues[0].starts_with("At least one of the following options"));
    }

    #[test]
    fn test_issues_are_deduplicated_per_option() {
        let validator = OptionValidator::new(labels())
            .with(DirectoryExists::new(["Input"]))
            .with(DirectoryExists::new(["Input"]));

        let user_args = args(&[("Input", json!("/missing/dir"))]);
        let issues = validator.find_user_option_errors(&user_args, "Input", &json!("/missing/dir"));
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_errors_aggregate_into_one_message() {
        let validator = OptionValidator::new(labels())
            .with(ValidKey::declared())
            .with(DirectoryExists::new(["Input"]));

        let user_args = args(&[("Input", json!("/missing")), ("Nope", json!(1))]);
        let err = validator.validate(&user_args).unwrap_err();
        assert_eq!(err.issues.len(), 2);

        let app: AppError = err.into();
        assert_eq!(app.kind, jobrelay_core::error::ErrorKind::Validation);
        assert!(app.message.contains("[Nope] is not a valid option"));
        assert!(app.message.contains('\n'));
    }
}
