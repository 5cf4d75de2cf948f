//! Delivery of job notifications.

use std::fmt::Write as _;
use std::io::Write as _;
use std::process::Command;
use std::process::Stdio;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use batchjob_descriptor::JobRequest;
use batchjob_env::EventSink;
use batchjob_env::JobEvent;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::NotifyConfig;

/// The placeholder for the subject in a notification command.
const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// The placeholder for the destination in a notification command.
const DESTINATION_PLACEHOLDER: &str = "{destination}";

/// A notification about a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The subject line.
    pub subject: String,
    /// Where to send the notification, if known.
    pub destination: Option<String>,
    /// The body of the notification.
    pub body: String,
}

impl Notification {
    /// Creates the notification for a job event.
    pub fn new(request: &JobRequest, event: &JobEvent) -> Self {
        let subject = format!(
            "batchjob `{name}` {event}",
            name = request.name(),
            event = event.name()
        );

        let mut body = String::new();
        // Writing to a `String` cannot fail.
        let _ = writeln!(&mut body, "Job `{name}` {event}.", name = request.name());
        let _ = writeln!(&mut body);
        let _ = writeln!(&mut body, "partition:   {}", request.partition());
        let _ = writeln!(&mut body, "time limit:  {}", request.time_limit());
        if let Some(environment) = request.environment() {
            let _ = writeln!(&mut body, "environment: {environment}");
        }
        if let Some(command) = request.command() {
            let _ = writeln!(&mut body, "command:     {command}");
        }

        Self {
            subject,
            destination: request.notification().destination().map(str::to_string),
            body,
        }
    }
}

/// A channel that delivers notifications.
pub trait Notifier: Send + Sync {
    /// Delivers a notification.
    fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// A notifier that writes notifications to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn deliver(&self, notification: &Notification) -> Result<()> {
        info!(
            "{subject} (to {destination})",
            subject = notification.subject,
            destination = notification.destination.as_deref().unwrap_or("the submitting user")
        );
        Ok(())
    }
}

/// A notifier that pipes notifications to a command such as `mail`.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    /// The command and its arguments, with placeholders.
    argv: Vec<String>,
}

impl CommandNotifier {
    /// Creates a notifier from a command line.
    ///
    /// Returns `None` if the command line is empty.
    pub fn new(argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }

        Some(Self { argv })
    }

    /// Gets the command line for a notification.
    fn command_line(&self, notification: &Notification, destination: &str) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                arg.replace(SUBJECT_PLACEHOLDER, &notification.subject)
                    .replace(DESTINATION_PLACEHOLDER, destination)
            })
            .collect()
    }
}

impl Notifier for CommandNotifier {
    fn deliver(&self, notification: &Notification) -> Result<()> {
        let destination = match &notification.destination {
            Some(destination) => destination.clone(),
            None => std::env::var("USER")
                .context("notification has no destination and `USER` is not set")?,
        };

        let argv = self.command_line(notification, &destination);
        let (program, args) = argv
            .split_first()
            .context("notification command is empty")?;

        debug!("delivering notification with `{program}`");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn notification command `{program}`"))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(notification.body.as_bytes())
                .with_context(|| format!("failed to write to notification command `{program}`"))?;
        }

        let status = child
            .wait()
            .with_context(|| format!("failed to wait for notification command `{program}`"))?;
        if !status.success() {
            bail!("notification command `{program}` exited with {status}");
        }

        Ok(())
    }
}

/// An event sink that notifies the submitter of events their job's policy
/// asks for.
pub struct Notifications {
    /// The channel notifications are delivered through.
    notifier: Box<dyn Notifier>,
}

impl Notifications {
    /// Creates a sink that delivers through the given notifier.
    pub fn new(notifier: Box<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Creates a sink from configuration.
    pub fn from_config(config: &NotifyConfig) -> Self {
        match config.command.clone().and_then(CommandNotifier::new) {
            Some(notifier) => Self::new(Box::new(notifier)),
            None => Self::new(Box::new(TracingNotifier)),
        }
    }
}

impl EventSink for Notifications {
    fn emit(&self, request: &JobRequest, event: &JobEvent) {
        info!("job `{name}` {event}", name = request.name());
        if !event.is_notified_by(request.notification()) {
            return;
        }

        // Delivery failures never affect the job itself.
        if let Err(e) = self.notifier.deliver(&Notification::new(request, event)) {
            warn!(
                "failed to deliver notification for job `{name}`: {e:#}",
                name = request.name()
            );
        }
    }
}
