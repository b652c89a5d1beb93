//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Process-level configuration derived from environment variables,
/// configuration files, and defaults: pinned tool release tags, upstream
/// repositories, and operation timeouts.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "NIMBUS")]
pub struct NimbusConfig {
    /// Upstream repository for the runner agent.
    #[ortho_config(default = "actions/runner".to_owned())]
    pub runner_repo: String,
    /// Pinned release tag for the runner agent.
    #[ortho_config(default = "v2.319.1".to_owned())]
    pub runner_version: String,
    /// Upstream repository for the VM manager.
    #[ortho_config(default = "macvmio/curie".to_owned())]
    pub curie_repo: String,
    /// Pinned release tag for the VM manager.
    #[ortho_config(default = "v0.12.0".to_owned())]
    pub curie_version: String,
    /// Upstream repository for the image puller.
    #[ortho_config(default = "macvmio/geranos".to_owned())]
    pub geranos_repo: String,
    /// Pinned release tag for the image puller.
    #[ortho_config(default = "v0.7.1".to_owned())]
    pub geranos_version: String,
    /// Bound applied to each command executed over a connection, in
    /// seconds.
    #[ortho_config(default = 120)]
    pub command_timeout_secs: u64,
    /// Bound applied to each release metadata fetch and artifact
    /// download, in seconds.
    #[ortho_config(default = 30)]
    pub http_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl NimbusConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to nimbus.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge
    /// sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    /// Values still merge defaults, configuration files, and environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("nimbus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages
    /// include guidance on how to provide missing values via environment
    /// variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is
    /// empty and [`ConfigError::InvalidTimeout`] when either timeout
    /// bound is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.runner_repo,
            &FieldMetadata::new("runner agent repository", "NIMBUS_RUNNER_REPO", "runner_repo"),
        )?;
        Self::require_field(
            &self.runner_version,
            &FieldMetadata::new("runner agent release tag", "NIMBUS_RUNNER_VERSION", "runner_version"),
        )?;
        Self::require_field(
            &self.curie_repo,
            &FieldMetadata::new("VM manager repository", "NIMBUS_CURIE_REPO", "curie_repo"),
        )?;
        Self::require_field(
            &self.curie_version,
            &FieldMetadata::new("VM manager release tag", "NIMBUS_CURIE_VERSION", "curie_version"),
        )?;
        Self::require_field(
            &self.geranos_repo,
            &FieldMetadata::new("image puller repository", "NIMBUS_GERANOS_REPO", "geranos_repo"),
        )?;
        Self::require_field(
            &self.geranos_version,
            &FieldMetadata::new("image puller release tag", "NIMBUS_GERANOS_VERSION", "geranos_version"),
        )?;
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "command_timeout_secs",
            });
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "http_timeout_secs",
            });
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a timeout bound is zero.
    #[error("{field} must be greater than zero")]
    InvalidTimeout {
        /// Configuration field holding the zero value.
        field: &'static str,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
