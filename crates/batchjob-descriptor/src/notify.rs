//! Notification policy for job lifecycle events.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// A lifecycle event a submitter may be notified of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    /// The job has started running.
    Start,
    /// The job has finished, successfully or not.
    End,
    /// The job has failed.
    Fail,
}

impl NotifyEvent {
    /// Gets the name of the event as used by `sbatch --mail-type`.
    pub fn mail_type(&self) -> &'static str {
        match self {
            Self::Start => "BEGIN",
            Self::End => "END",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for NotifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// The set of lifecycle events to notify the submitter of, and where to send
/// the notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPolicy {
    /// The events to notify on.
    events: BTreeSet<NotifyEvent>,
    /// The destination of the notification (e.g. an email address).
    ///
    /// If `None`, the scheduler's default (the submitting user) is used.
    destination: Option<String>,
}

impl NotificationPolicy {
    /// Creates a policy that notifies on every lifecycle event.
    pub fn all() -> Self {
        Self {
            events: [NotifyEvent::Start, NotifyEvent::End, NotifyEvent::Fail].into(),
            destination: None,
        }
    }

    /// Gets the events of the policy.
    pub fn events(&self) -> &BTreeSet<NotifyEvent> {
        &self.events
    }

    /// Determines if the policy notifies on the given event.
    pub fn contains(&self, event: NotifyEvent) -> bool {
        self.events.contains(&event)
    }

    /// Determines if the policy notifies on nothing.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Gets the destination of notifications.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Sets the destination of notifications.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Formats the events as a `sbatch --mail-type` value.
    ///
    /// Returns `None` if the policy has no events.
    pub fn mail_type(&self) -> Option<String> {
        if self.events.is_empty() {
            return None;
        }

        if self.events.len() == 3 {
            return Some("ALL".to_string());
        }

        Some(
            self.events
                .iter()
                .map(NotifyEvent::mail_type)
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

impl FromStr for NotificationPolicy {
    type Err = String;

    /// Parses a comma-separated list of `BEGIN`, `START`, `END`, `FAIL`, `ALL`,
    /// or `NONE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut events = BTreeSet::new();
        let mut none = false;
        for item in s.split(',').map(str::trim) {
            match item.to_ascii_uppercase().as_str() {
                "BEGIN" | "START" => {
                    events.insert(NotifyEvent::Start);
                }
                "END" => {
                    events.insert(NotifyEvent::End);
                }
                "FAIL" => {
                    events.insert(NotifyEvent::Fail);
                }
                "ALL" => events.extend([NotifyEvent::Start, NotifyEvent::End, NotifyEvent::Fail]),
                "NONE" => none = true,
                "" => return Err("expected a notification event".to_string()),
                _ => return Err(format!("unknown notification event `{item}`")),
            }
        }

        if none && !events.is_empty() {
            return Err("`NONE` cannot be combined with other notification events".to_string());
        }

        Ok(Self {
            events,
            destination: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_policies() {
        let policy: NotificationPolicy = "ALL".parse().unwrap();
        assert_eq!(policy, NotificationPolicy::all());
        assert_eq!(policy.mail_type().as_deref(), Some("ALL"));

        let policy: NotificationPolicy = "begin, fail".parse().unwrap();
        assert!(policy.contains(NotifyEvent::Start));
        assert!(!policy.contains(NotifyEvent::End));
        assert_eq!(policy.mail_type().as_deref(), Some("BEGIN,FAIL"));

        let policy: NotificationPolicy = "none".parse().unwrap();
        assert!(policy.is_empty());
        assert_eq!(policy.mail_type(), None);
    }

    #[test]
    fn invalid_policies() {
        assert_eq!(
            "ALL,sometimes".parse::<NotificationPolicy>().unwrap_err(),
            "unknown notification event `sometimes`"
        );
        assert_eq!(
            "END,".parse::<NotificationPolicy>().unwrap_err(),
            "expected a notification event"
        );
        assert_eq!(
            "NONE,END".parse::<NotificationPolicy>().unwrap_err(),
            "`NONE` cannot be combined with other notification events"
        );
    }
}
