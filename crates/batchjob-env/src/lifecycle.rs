//! The lifecycle of a job on its compute node.
//!
//! A job moves through the following states:
//!
//! ```text
//! Unstarted -> Activating -> Running -> Succeeded
//!     |            |            |-----> Failed
//!     |            |            |-----> Terminated
//!     |            |            '-----> Lost
//!     |            '--> ActivationFailed
//!     '--> Rejected
//! ```
//!
//! The environment is always activated before the payload is invoked and
//! released after the payload terminates.

use std::fmt;
use std::time::Duration;

use batchjob_descriptor::JobRequest;
use batchjob_descriptor::NotificationPolicy;
use batchjob_descriptor::NotifyEvent;
use batchjob_descriptor::ValidationError;
use thiserror::Error;
use tracing::error;
use tracing::info;

use crate::ActivationError;
use crate::EnvironmentRegistry;
use crate::ExitOutcome;
use crate::PayloadError;
use crate::RunOptions;
use crate::activate;
use crate::run;

/// The exit code reported for a payload that could not be spawned.
///
/// This matches the code a shell uses for a command that was not found.
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// The state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// The job has not been launched.
    Unstarted,
    /// The job's environment is being activated.
    Activating,
    /// The job's payload is running.
    Running,
    /// The payload exited with a zero exit code.
    Succeeded,
    /// The payload exited with the given nonzero exit code.
    Failed(i32),
    /// The job's environment could not be activated.
    ActivationFailed,
    /// The payload was terminated by the given signal.
    Terminated(i32),
    /// The request cannot be executed; nothing was activated or run.
    Rejected,
    /// The payload was spawned but its termination could not be observed.
    Lost,
}

impl JobState {
    /// Determines if the state is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unstarted | Self::Activating | Self::Running)
    }
}

/// An event in the lifecycle of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// The payload has started.
    Started {
        /// The name of the active environment.
        environment: String,
    },
    /// The payload exited successfully.
    Succeeded {
        /// How long the payload ran.
        duration: Duration,
    },
    /// The payload failed.
    Failed {
        /// The payload's exit code.
        code: i32,
        /// How long the payload ran, if it was spawned.
        duration: Option<Duration>,
    },
    /// The environment could not be activated.
    ActivationFailed {
        /// The reason activation failed.
        reason: String,
    },
    /// The payload was terminated by a signal.
    Terminated {
        /// The signal number.
        signal: i32,
        /// How long the payload ran.
        duration: Duration,
    },
    /// The request does not describe a runnable job.
    Rejected {
        /// The reason the request was rejected.
        reason: String,
    },
    /// The payload was spawned, but waiting for it failed.
    Lost {
        /// The reason the payload was lost.
        reason: String,
    },
}

impl JobEvent {
    /// Gets a short name for the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::ActivationFailed { .. } => "activation failed",
            Self::Terminated { .. } => "terminated",
            Self::Rejected { .. } => "rejected",
            Self::Lost { .. } => "lost",
        }
    }

    /// Gets the notification events that match this event.
    ///
    /// Every event that ends a job matches `end`; those that end it
    /// unsuccessfully also match `fail`.
    pub fn notify_events(&self) -> &'static [NotifyEvent] {
        match self {
            Self::Started { .. } => &[NotifyEvent::Start],
            Self::Succeeded { .. } => &[NotifyEvent::End],
            Self::Failed { .. }
            | Self::ActivationFailed { .. }
            | Self::Terminated { .. }
            | Self::Rejected { .. }
            | Self::Lost { .. } => &[NotifyEvent::End, NotifyEvent::Fail],
        }
    }

    /// Determines if a notification policy asks to be notified of this event.
    pub fn is_notified_by(&self, policy: &NotificationPolicy) -> bool {
        self.notify_events().iter().any(|e| policy.contains(*e))
    }
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { environment } => {
                write!(f, "started in environment `{environment}`")
            }
            Self::Succeeded { duration } => {
                write!(f, "succeeded after {secs:.1}s", secs = duration.as_secs_f64())
            }
            Self::Failed {
                code,
                duration: Some(duration),
            } => write!(
                f,
                "failed with exit code {code} after {secs:.1}s",
                secs = duration.as_secs_f64()
            ),
            Self::Failed {
                code,
                duration: None,
            } => write!(f, "failed to start (exit code {code})"),
            Self::ActivationFailed { reason } => {
                write!(f, "could not activate its environment: {reason}")
            }
            Self::Terminated { signal, duration } => write!(
                f,
                "was terminated by signal {signal} after {secs:.1}s",
                secs = duration.as_secs_f64()
            ),
            Self::Rejected { reason } => write!(f, "was rejected: {reason}"),
            Self::Lost { reason } => {
                write!(f, "was lost before it finished: {reason}")
            }
        }
    }
}

/// A receiver of job lifecycle events.
pub trait EventSink: Send + Sync {
    /// Receives an event for the given job.
    fn emit(&self, request: &JobRequest, event: &JobEvent);
}

/// An error that ends a launch before the payload exits on its own.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The request does not name an environment and a command.
    #[error(transparent)]
    Request(#[from] ValidationError),
    /// The environment could not be activated.
    #[error(transparent)]
    Activation(#[from] ActivationError),
    /// The payload could not be run to completion.
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// The launch of a single job.
pub struct Launch<'a> {
    /// The registry the job's environment is activated through.
    registry: &'a dyn EnvironmentRegistry,
    /// The receiver of lifecycle events.
    sink: &'a dyn EventSink,
    /// The current state of the job.
    state: JobState,
}

impl<'a> Launch<'a> {
    /// Creates a new launch.
    pub fn new(registry: &'a dyn EnvironmentRegistry, sink: &'a dyn EventSink) -> Self {
        Self {
            registry,
            sink,
            state: JobState::Unstarted,
        }
    }

    /// Gets the current state of the job.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Activates the job's environment, runs its payload once, and releases
    /// the environment.
    ///
    /// A payload that exits with a nonzero code is returned as an
    /// [`ExitOutcome`]; the caller decides what to do with the code.
    ///
    /// # Panics
    ///
    /// Panics if the job has already been launched.
    pub async fn execute(
        &mut self,
        request: &JobRequest,
        options: &RunOptions,
    ) -> Result<ExitOutcome, LaunchError> {
        assert!(
            self.state == JobState::Unstarted,
            "a job can only be launched once"
        );

        let (environment, command) = match request.payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("job `{name}` cannot be run: {e}", name = request.name());
                self.finish(
                    request,
                    JobState::Rejected,
                    JobEvent::Rejected {
                        reason: e.to_string(),
                    },
                );
                return Err(e.into());
            }
        };

        self.state = JobState::Activating;
        let scope = match activate(self.registry, environment) {
            Ok(scope) => scope,
            Err(e) => {
                error!("job `{name}` failed to activate: {e}", name = request.name());
                self.finish(
                    request,
                    JobState::ActivationFailed,
                    JobEvent::ActivationFailed {
                        reason: e.to_string(),
                    },
                );
                return Err(e.into());
            }
        };

        self.state = JobState::Running;
        self.sink.emit(
            request,
            &JobEvent::Started {
                environment: environment.to_string(),
            },
        );

        let result = run(&scope, command, options).await;
        scope.release();

        match result {
            Ok(outcome) if outcome.success() => {
                info!("job `{name}` succeeded", name = request.name());
                self.finish(
                    request,
                    JobState::Succeeded,
                    JobEvent::Succeeded {
                        duration: outcome.duration,
                    },
                );
                Ok(outcome)
            }
            Ok(outcome) => {
                info!(
                    "job `{name}` failed with exit code {code}",
                    name = request.name(),
                    code = outcome.code
                );
                self.finish(
                    request,
                    JobState::Failed(outcome.code),
                    JobEvent::Failed {
                        code: outcome.code,
                        duration: Some(outcome.duration),
                    },
                );
                Ok(outcome)
            }
            Err(PayloadError::Terminated { signal, duration }) => {
                self.finish(
                    request,
                    JobState::Terminated(signal),
                    JobEvent::Terminated { signal, duration },
                );
                Err(PayloadError::Terminated { signal, duration }.into())
            }
            Err(e @ PayloadError::Wait { .. }) => {
                error!("job `{name}` was lost: {e}", name = request.name());
                self.finish(
                    request,
                    JobState::Lost,
                    JobEvent::Lost {
                        reason: e.to_string(),
                    },
                );
                Err(e.into())
            }
            Err(e) => {
                error!("job `{name}` failed to run: {e}", name = request.name());
                self.finish(
                    request,
                    JobState::Failed(SPAWN_FAILURE_CODE),
                    JobEvent::Failed {
                        code: SPAWN_FAILURE_CODE,
                        duration: None,
                    },
                );
                Err(e.into())
            }
        }
    }

    /// Moves the job into a terminal state and emits the final event.
    fn finish(&mut self, request: &JobRequest, state: JobState, event: JobEvent) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.sink.emit(request, &event);
    }
}
