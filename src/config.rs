//! Implementation of the configuration module.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use batchjob_descriptor::PartitionRegistry;
use batchjob_env::EnvironmentConfig;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

/// The name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "batchjob.toml";

/// Represents the configuration for the batchjob CLI tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct Config {
    /// The partitions of the cluster.
    ///
    /// When present, replaces the built-in partitions entirely.
    pub partitions: PartitionRegistry,
    /// Configuration of environment activation.
    pub environment: EnvironmentConfig,
    /// Configuration of job notifications.
    pub notify: NotifyConfig,
    /// Configuration of job submission.
    pub submit: SubmitConfig,
}

/// Represents the configuration of job notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct NotifyConfig {
    /// The command used to deliver notifications.
    ///
    /// The notification body is written to the command's standard input. The
    /// arguments `{subject}` and `{destination}` are replaced with the
    /// notification's subject and destination.
    ///
    /// If not set, notifications are only logged.
    pub command: Option<Vec<String>>,
}

/// Represents the configuration of job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct SubmitConfig {
    /// The program used to submit batch scripts.
    pub sbatch: String,
    /// Additional arguments passed to the submission program.
    pub args: Vec<String>,
    /// The `batchjob` executable to run on compute nodes.
    ///
    /// Defaults to the executable performing the submission.
    pub launcher: Option<String>,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            sbatch: "sbatch".to_string(),
            args: Vec::new(),
            launcher: None,
        }
    }
}

impl Config {
    /// Validate a configuration.
    pub fn validate(&self) -> Result<()> {
        if self.partitions.is_empty() {
            bail!("configuration must define at least one partition");
        }

        self.partitions
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid partition configuration")?;

        if self.submit.sbatch.trim().is_empty() {
            bail!("configuration value `submit.sbatch` cannot be empty");
        }

        if let Some(command) = &self.notify.command
            && command.first().is_none_or(|p| p.trim().is_empty())
        {
            bail!("configuration value `notify.command` must name a program");
        }

        Ok(())
    }

    /// Read a configuration file from the specified path.
    pub fn read_config(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| {
            format!(
                "failed to read configuration file `{path}`",
                path = path.display()
            )
        })?;
        let config: Config = toml::from_str(&text).with_context(|| {
            format!(
                "failed to parse configuration file `{path}`",
                path = path.display()
            )
        })?;
        Ok(config)
    }

    /// Finds the configuration file to use.
    ///
    /// An explicit path is used if given; otherwise `batchjob.toml` in the
    /// current directory, then in the user's configuration directory.
    pub fn find(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }

        dirs::config_dir()
            .map(|dir| dir.join("batchjob").join(CONFIG_FILE_NAME))
            .filter(|path| path.is_file())
    }

    /// Loads and validates the configuration.
    ///
    /// Returns the configuration and the path it was read from, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = Self::find(explicit);
        let config = match &path {
            Some(path) => {
                debug!("reading configuration from `{path}`", path = path.display());
                Self::read_config(path)?
            }
            None => {
                debug!("no configuration file found; using the default configuration");
                Self::default()
            }
        };

        config.validate()?;
        Ok((config, path))
    }
}
