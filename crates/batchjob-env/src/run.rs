//! Execution of a job's payload inside an active environment.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use batchjob_descriptor::PayloadCommand;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::PayloadError;
use crate::ScopedEnvironment;

/// The signal a payload is reported as terminated by when the run is
/// cancelled (`SIGTERM`, which Slurm sends when a job's time limit expires).
pub const CANCELLATION_SIGNAL: i32 = 15;

/// Options for running a payload.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// The working directory of the payload.
    ///
    /// Defaults to the working directory of the calling process.
    pub working_dir: Option<PathBuf>,
    /// A token that, when cancelled, kills the payload.
    pub cancel: Option<CancellationToken>,
}

/// The outcome of a payload that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// The payload's exit code.
    pub code: i32,
    /// How long the payload ran.
    pub duration: Duration,
}

impl ExitOutcome {
    /// Determines if the payload exited successfully.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs a payload once inside an active environment.
///
/// The payload inherits the standard streams of the calling process and runs
/// with the environment's activation applied. A nonzero exit code is an
/// [`ExitOutcome`], not an error; termination by a signal is
/// [`PayloadError::Terminated`].
pub async fn run(
    environment: &ScopedEnvironment<'_>,
    command: &PayloadCommand,
    options: &RunOptions,
) -> Result<ExitOutcome, PayloadError> {
    let activation = environment.activation();
    let program = command.program().to_string();

    let mut child = Command::new(&program);
    child
        .args(command.args())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    for var in activation.removed() {
        child.env_remove(var);
    }

    child.envs(activation.vars());

    if let Some(dir) = &options.working_dir {
        child.current_dir(dir);
    }

    let start = Instant::now();
    let mut child = child.spawn().map_err(|source| PayloadError::Spawn {
        program: program.clone(),
        source,
    })?;

    let id = child.id().unwrap_or_default();
    info!(
        "spawned payload `{command}` as process {id} in environment `{environment}`",
        environment = environment.name()
    );

    let status = match &options.cancel {
        Some(token) => tokio::select! {
            status = child.wait() => status,
            _ = token.cancelled() => {
                warn!("run was cancelled; killing payload process {id}");
                child.kill().await.map_err(|source| PayloadError::Wait {
                    program: program.clone(),
                    source,
                })?;
                return Err(PayloadError::Terminated {
                    signal: CANCELLATION_SIGNAL,
                    duration: start.elapsed(),
                });
            }
        },
        None => child.wait().await,
    }
    .map_err(|source| PayloadError::Wait {
        program: program.clone(),
        source,
    })?;

    outcome(id, status, start.elapsed())
}

/// Interprets the exit status of a payload.
fn outcome(id: u32, status: ExitStatus, duration: Duration) -> Result<ExitOutcome, PayloadError> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            warn!("payload process {id} has terminated with signal {signal}");
            return Err(PayloadError::Terminated { signal, duration });
        }
    }

    let code = status.code().unwrap_or(1);
    info!("payload process {id} has terminated with status code {code}");
    Ok(ExitOutcome { code, duration })
}
