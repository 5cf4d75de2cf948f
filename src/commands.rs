//! Implementation of batchjob CLI commands.

use std::path::Path;

use anyhow::Context;
use batchjob_descriptor::JobRequest;
use batchjob_descriptor::ValidationError;
use batchjob_env::ActivationError;
use batchjob_env::PayloadError;
use batchjob_env::SPAWN_FAILURE_CODE;
use thiserror::Error;

use crate::config::Config;
use crate::scheduler::SubmissionError;

pub mod config;
pub mod run;
pub mod script;
pub mod submit;
pub mod validate;

/// The exit code for a descriptor that fails validation (`EX_DATAERR`).
pub const VALIDATION_EXIT_CODE: i32 = 65;

/// The exit code for a scheduler that is unavailable or rejects a job
/// (`EX_UNAVAILABLE`).
pub const SUBMISSION_EXIT_CODE: i32 = 69;

/// The exit code for an environment that cannot be activated (`EX_CONFIG`).
pub const ACTIVATION_EXIT_CODE: i32 = 78;

/// The exit code for any other failure.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// An error from a command, classified by what went wrong.
#[derive(Error, Debug)]
pub enum CommandError {
    /// A job descriptor is invalid.
    #[error("invalid job descriptor `{path}`")]
    Validation {
        /// The path of the descriptor.
        path: String,
        /// The validation error.
        #[source]
        source: ValidationError,
    },

    /// The job's environment could not be activated.
    #[error(transparent)]
    Activation(#[from] ActivationError),

    /// The job could not be submitted.
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// The job's payload could not be spawned.
    #[error(transparent)]
    Spawn(PayloadError),

    /// The job's payload was spawned but could not be awaited.
    #[error(transparent)]
    Lost(PayloadError),

    /// The job's payload was terminated by a signal.
    #[error("job was terminated by signal {signal}")]
    Terminated {
        /// The signal number.
        signal: i32,
    },

    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    /// Gets the process exit code for the error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => VALIDATION_EXIT_CODE,
            Self::Activation(_) => ACTIVATION_EXIT_CODE,
            Self::Submission(_) => SUBMISSION_EXIT_CODE,
            Self::Spawn(_) => SPAWN_FAILURE_CODE,
            Self::Terminated { signal } => 128 + signal,
            Self::Lost(_) | Self::Other(_) => FAILURE_EXIT_CODE,
        }
    }

    /// Gets the class of failure the error belongs to.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Activation(_) => "activation",
            Self::Submission(_) => "submission",
            Self::Spawn(_) => "spawn",
            Self::Terminated { .. } => "termination",
            Self::Lost(_) | Self::Other(_) => "internal",
        }
    }
}

/// Gets the class of failure that `batchjob` reports with the given exit code.
///
/// A payload may exit with one of these codes too; `None` means the code is
/// not reserved.
pub fn reserved_exit_code_class(code: i32) -> Option<&'static str> {
    match code {
        VALIDATION_EXIT_CODE => Some("validation"),
        SUBMISSION_EXIT_CODE => Some("submission"),
        ACTIVATION_EXIT_CODE => Some("activation"),
        SPAWN_FAILURE_CODE => Some("spawn"),
        _ => None,
    }
}

/// A result of a command.
pub type CommandResult<T = ()> = Result<T, CommandError>;

/// Reads and validates a job descriptor.
pub fn read_descriptor(path: &Path, config: &Config) -> CommandResult<JobRequest> {
    let text = std::fs::read_to_string(path).with_context(|| {
        format!(
            "failed to read job descriptor `{path}`",
            path = path.display()
        )
    })?;

    JobRequest::parse_str(&text, &config.partitions).map_err(|source| {
        CommandError::Validation {
            path: path.display().to_string(),
            source,
        }
    })
}
