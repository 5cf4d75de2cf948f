//! Submission of batch scripts to the Slurm scheduler.

use std::process::Stdio;

use batchjob_descriptor::sbatch::parse_job_id;
use thiserror::Error;
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;
use tracing::debug;
use tracing::info;

use crate::config::SubmitConfig;

/// The option that makes `sbatch` print only the job id.
const PARSABLE_OPTION: &str = "--parsable";

/// An error that occurs while submitting a job.
#[derive(Error, Debug)]
pub enum SubmissionError {
    /// The submission program could not be run.
    #[error("failed to run `{program}`; is the scheduler available on this host?")]
    Unavailable {
        /// The submission program.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The scheduler rejected the job.
    #[error("the scheduler rejected the job: {reason}")]
    Rejected {
        /// The scheduler's explanation.
        reason: String,
    },

    /// The scheduler accepted the job but its id could not be read.
    #[error("failed to read a job id from the scheduler's output `{output}`")]
    UnrecognizedOutput {
        /// The scheduler's output.
        output: String,
    },
}

/// Submits batch scripts through `sbatch`.
#[derive(Debug, Clone)]
pub struct Sbatch {
    /// The submission program.
    program: String,
    /// The arguments to pass before the batch script.
    args: Vec<String>,
}

impl Sbatch {
    /// Creates a submitter from configuration.
    pub fn new(config: &SubmitConfig) -> Self {
        Self {
            program: config.sbatch.clone(),
            args: config.args.clone(),
        }
    }

    /// Gets the command line used to submit a script read from stdin.
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .chain(std::iter::once(PARSABLE_OPTION.to_string()))
            .collect()
    }

    /// Submits a batch script, returning the id of the scheduled job.
    pub async fn submit(&self, script: &str) -> Result<u64, SubmissionError> {
        let unavailable = |source| SubmissionError::Unavailable {
            program: self.program.clone(),
            source,
        };

        debug!(
            "submitting batch script with `{command}`",
            command = self.command_line().join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(PARSABLE_OPTION)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(unavailable)?;

        // The script is read from stdin when no script file is given.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(unavailable)?;
        }

        let output = child.wait_with_output().await.map_err(unavailable)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = match stderr.trim() {
                "" => format!(
                    "`{program}` exited with {status}",
                    program = self.program,
                    status = output.status
                ),
                stderr => stderr.to_string(),
            };
            return Err(SubmissionError::Rejected { reason });
        }

        let id = parse_job_id(&stdout).ok_or_else(|| SubmissionError::UnrecognizedOutput {
            output: stdout.trim().to_string(),
        })?;
        info!("submitted batch job {id}");
        Ok(id)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Creates a submitter that runs a shell script in place of `sbatch`.
    ///
    /// The shell receives `--parsable` as `$0`.
    fn fake(script: &str) -> Sbatch {
        Sbatch::new(&SubmitConfig {
            sbatch: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            launcher: None,
        })
    }

    #[tokio::test]
    async fn accepted() {
        let sbatch = fake("cat > /dev/null; echo \"4242;grace\"");
        assert_eq!(sbatch.submit("#!/bin/bash\n").await.unwrap(), 4242);
    }

    #[tokio::test]
    async fn rejected() {
        let sbatch = fake(
            "cat > /dev/null; echo 'sbatch: error: invalid partition specified: gpu' >&2; exit 1",
        );
        match sbatch.submit("#!/bin/bash\n").await.unwrap_err() {
            SubmissionError::Rejected { reason } => {
                assert_eq!(reason, "sbatch: error: invalid partition specified: gpu")
            }
            e => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn unrecognized_output() {
        let sbatch = fake("cat > /dev/null; echo queued");
        assert!(matches!(
            sbatch.submit("").await.unwrap_err(),
            SubmissionError::UnrecognizedOutput { output } if output == "queued"
        ));
    }

    #[tokio::test]
    async fn unavailable() {
        let sbatch = Sbatch::new(&SubmitConfig {
            sbatch: "definitely-not-sbatch".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            sbatch.submit("").await.unwrap_err(),
            SubmissionError::Unavailable { .. }
        ));
    }

    #[test]
    fn command_line() {
        let sbatch = Sbatch::new(&SubmitConfig {
            args: vec!["--account=cpsc577".to_string()],
            ..Default::default()
        });
        assert_eq!(
            sbatch.command_line(),
            ["sbatch", "--account=cpsc577", "--parsable"]
        );
    }
}
