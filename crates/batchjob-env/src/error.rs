//! Errors of environment activation and payload execution.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Formats the directories searched for an environment.
fn format_searched(dirs: &[PathBuf]) -> String {
    if dirs.is_empty() {
        return "no environment directories were searched".to_string();
    }

    let dirs = dirs
        .iter()
        .map(|d| format!("`{}`", d.display()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("searched {dirs}")
}

/// An error that occurs while activating an environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActivationError {
    /// The environment does not resolve to a materialized environment.
    #[error("environment `{name}` does not exist ({})", format_searched(.searched))]
    EnvironmentNotFound {
        /// The environment reference as requested.
        name: String,
        /// The candidate prefixes that were checked.
        searched: Vec<PathBuf>,
    },

    /// Another environment is already active.
    #[error("cannot activate environment `{requested}` while environment `{active}` is active")]
    ActivationConflict {
        /// The requested environment.
        requested: String,
        /// The environment that is already active.
        active: String,
    },

    /// The environment's prefix cannot be added to `PATH`.
    #[error("environment prefix `{}` cannot be added to `PATH`", .prefix.display())]
    InvalidPrefix {
        /// The environment prefix.
        prefix: PathBuf,
    },
}

/// An error that occurs while running a payload.
#[derive(Error, Debug)]
pub enum PayloadError {
    /// The payload could not be spawned.
    #[error("failed to spawn `{program}`")]
    Spawn {
        /// The program that was spawned.
        program: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The payload's termination could not be awaited.
    #[error("failed to wait for `{program}` to terminate")]
    Wait {
        /// The program that was spawned.
        program: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The payload was terminated by a signal.
    #[error("payload was terminated by signal {signal} after {duration:?}")]
    Terminated {
        /// The signal number.
        signal: i32,
        /// How long the payload ran.
        duration: Duration,
    },
}
