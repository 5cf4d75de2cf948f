//! Implementation of the `run` subcommand.
//!
//! This is the command a batch script executes on its compute node: it
//! activates the job's environment, runs the payload once, releases the
//! environment, and notifies the submitter.

use std::path::PathBuf;

use batchjob_env::CondaRegistry;
use batchjob_env::Launch;
use batchjob_env::LaunchError;
use batchjob_env::PayloadError;
use batchjob_env::RunOptions;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::warn;

use crate::commands::CommandError;
use crate::commands::CommandResult;
use crate::commands::read_descriptor;
use crate::commands::reserved_exit_code_class;
use crate::config::Config;
use crate::notify::Notifications;

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The job descriptor to run.
    #[arg(value_name = "DESCRIPTOR")]
    pub descriptor: PathBuf,

    /// The working directory of the payload.
    ///
    /// Defaults to the current directory.
    #[arg(long, value_name = "DIR")]
    pub working_dir: Option<PathBuf>,
}

/// Cancels the token when the process receives `SIGTERM`.
///
/// Slurm sends `SIGTERM` to a job that reaches its time limit or is
/// cancelled with `scancel`.
fn cancel_on_terminate(token: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use anyhow::Context;
        use tokio::signal::unix::SignalKind;
        use tokio::signal::unix::signal;

        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install a `SIGTERM` handler")?;
        tokio::spawn(async move {
            if terminate.recv().await.is_some() {
                warn!("received `SIGTERM`; terminating the job");
                token.cancel();
            }
        });
    }

    #[cfg(not(unix))]
    drop(token);

    Ok(())
}

/// Runs a job, returning the exit code of its payload.
pub async fn run(args: Args, config: &Config) -> CommandResult<i32> {
    let request = read_descriptor(&args.descriptor, config)?;

    let cancel = CancellationToken::new();
    cancel_on_terminate(cancel.clone())?;

    let registry = CondaRegistry::from_config(&config.environment);
    let notifications = Notifications::from_config(&config.notify);
    let options = RunOptions {
        working_dir: args.working_dir,
        cancel: Some(cancel),
    };

    let mut launch = Launch::new(&registry, &notifications);
    let result = match launch.execute(&request, &options).await {
        Ok(outcome) => {
            if let Some(class) = reserved_exit_code_class(outcome.code) {
                error!(
                    "the payload of job `{name}` exited with code {code}, which `batchjob` also \
                     uses for {class} failures; this code is the payload's own",
                    name = request.name(),
                    code = outcome.code
                );
            }

            Ok(outcome.code)
        }
        Err(LaunchError::Request(source)) => Err(CommandError::Validation {
            path: args.descriptor.display().to_string(),
            source,
        }),
        Err(LaunchError::Activation(e)) => Err(e.into()),
        Err(LaunchError::Payload(PayloadError::Terminated { signal, .. })) => {
            Err(CommandError::Terminated { signal })
        }
        Err(LaunchError::Payload(e @ PayloadError::Wait { .. })) => Err(CommandError::Lost(e)),
        Err(LaunchError::Payload(e)) => Err(CommandError::Spawn(e)),
    };

    if let Err(e) = &result {
        error!(
            "job `{name}` ended with a {class} failure (exit code {code})",
            name = request.name(),
            class = e.class(),
            code = e.exit_code()
        );
    }

    result
}
