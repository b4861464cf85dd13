//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod engine;
pub mod logging;

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::engine::EngineConfig;
use self::logging::LoggingConfig;

use crate::error::AppError;

/// Prefix for environment variable overrides, e.g.
/// `JOBRELAY__ENGINE__MAX_WORKERS=4`.
pub const ENV_PREFIX: &str = "JOBRELAY";

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// configuration sources (default file, explicit file, environment).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Job engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Merges `config/default.toml` (if present), the explicit `path` (if
    /// given, required to exist) and environment variables prefixed with
    /// `JOBRELAY__`. The merged engine section is range-checked.
    pub fn load(path: Option<&str>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let app: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        app.validate()?;
        tracing::debug!(
            max_workers = app.engine.max_workers,
            explicit = path.unwrap_or("-"),
            "Configuration loaded"
        );
        Ok(app)
    }

    /// Validate every section that carries range constraints.
    pub fn validate(&self) -> Result<(), AppError> {
        self.engine.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(file, "[engine]\nmax_workers = 3\n\n[logging]\nlevel = \"debug\"").expect("write");

        let path = file.path().to_string_lossy().to_string();
        let config = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(config.engine.max_workers, 3);
        assert_eq!(config.engine.poll_interval_ms, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_worker_count_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(file, "[engine]\nmax_workers = 0").expect("write");

        let path = file.path().to_string_lossy().to_string();
        let err = AppConfig::load(Some(&path)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(AppConfig::load(Some("/nonexistent/jobrelay.toml")).is_err());
    }
}
