//! Lexing of descriptor text into directives.
//!
//! A descriptor is line oriented. Each line is one of:
//!
//! * `key=value`
//! * `--key value` or `--key=value`
//! * `#SBATCH --key=value` (the header of a native batch script)
//! * a blank line or a `#` comment, including a shebang
//!
//! Keys are resolved against the recognized set only when the directives are
//! parsed into a [`JobRequest`](crate::JobRequest), so an unrecognized key is
//! reported as [`ValidationError::UnknownDirective`].

use std::fmt;

use crate::ValidationError;
use crate::error::Result;

/// The prefix of a native batch script directive.
const SBATCH_PREFIX: &str = "#SBATCH";

/// A recognized directive key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKey {
    /// The job name.
    Name,
    /// The wall-clock time limit.
    TimeLimit,
    /// The partition to run on.
    Partition,
    /// The accelerator request.
    Accelerator,
    /// The memory limit.
    Memory,
    /// The notification events.
    Notify,
    /// The notification destination.
    NotifyUser,
    /// The named environment to activate.
    Environment,
    /// The payload command.
    Command,
}

impl DirectiveKey {
    /// Every recognized key, in canonical order.
    pub const ALL: [DirectiveKey; 9] = [
        Self::Name,
        Self::TimeLimit,
        Self::Partition,
        Self::Accelerator,
        Self::Memory,
        Self::Notify,
        Self::NotifyUser,
        Self::Environment,
        Self::Command,
    ];

    /// Gets the canonical name of the key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::TimeLimit => "time_limit",
            Self::Partition => "partition",
            Self::Accelerator => "accelerator",
            Self::Memory => "memory",
            Self::Notify => "notify",
            Self::NotifyUser => "notify_user",
            Self::Environment => "environment",
            Self::Command => "command",
        }
    }

    /// Resolves a key as written in a descriptor.
    ///
    /// Keys are case-insensitive, `-` and `_` are interchangeable, and the
    /// native `sbatch` option names are accepted as aliases.
    pub fn resolve(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase().replace('-', "_");
        match key.as_str() {
            "name" | "job_name" => Some(Self::Name),
            "time_limit" | "time" => Some(Self::TimeLimit),
            "partition" => Some(Self::Partition),
            "accelerator" | "gres" | "gpus" => Some(Self::Accelerator),
            "memory" | "mem" => Some(Self::Memory),
            "notify" | "mail_type" => Some(Self::Notify),
            "notify_user" | "mail_user" => Some(Self::NotifyUser),
            "environment" | "env" => Some(Self::Environment),
            "command" => Some(Self::Command),
            _ => None,
        }
    }
}

impl fmt::Display for DirectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single key-value directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// The key as written.
    pub key: String,
    /// The value, with surrounding quotes removed.
    pub value: String,
}

impl Directive {
    /// Creates a new directive.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Reads the directives of a descriptor.
    pub fn parse_lines(text: &str) -> Result<Vec<Self>> {
        let mut directives = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            let body = match trimmed.strip_prefix(SBATCH_PREFIX) {
                Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                    rest.trim()
                }
                _ if trimmed.is_empty() || trimmed.starts_with('#') => continue,
                _ => trimmed,
            };

            let directive = Self::parse_line(body).ok_or_else(|| {
                ValidationError::MalformedDirective {
                    line: index + 1,
                    text: trimmed.to_string(),
                }
            })?;
            directives.push(directive);
        }

        Ok(directives)
    }

    /// Reads a single directive from a line.
    fn parse_line(line: &str) -> Option<Self> {
        let (key, value) = match line.strip_prefix("--") {
            Some(option) => option.split_once(|c: char| c == '=' || c.is_whitespace())?,
            None => line.split_once('=')?,
        };

        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }

        Some(Self::new(key, unquote(value.trim())))
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{key}={value}", key = self.key, value = self.value)
    }
}

/// Removes the quotes from a value that is a single quoted word.
///
/// A value such as `"a b" c` is left as written so that a command's own
/// quoting survives.
fn unquote(value: &str) -> String {
    if value.starts_with(['"', '\''])
        && let Some(mut words) = shlex::split(value)
        && words.len() == 1
    {
        return words.remove(0);
    }

    value.to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn lex_forms() {
        let directives = Directive::parse_lines(
            r#"#!/bin/bash
# a comment
#SBATCH --job-name=finetune
#SBATCH --time 2-00:00:00

partition=gpu
--gres=gpu:a100:1
--mem 128G
notify = "ALL"
command='python finetune.py'
"#,
        )
        .unwrap();

        assert_eq!(
            directives,
            [
                Directive::new("job-name", "finetune"),
                Directive::new("time", "2-00:00:00"),
                Directive::new("partition", "gpu"),
                Directive::new("gres", "gpu:a100:1"),
                Directive::new("mem", "128G"),
                Directive::new("notify", "ALL"),
                Directive::new("command", "python finetune.py"),
            ]
        );
    }

    #[test]
    fn partially_quoted_values() {
        let directives = Directive::parse_lines(
            r#"command="/opt/my env/bin/python" train.py "cfg.yaml"
name="it's fine"
notify_user='me@example.edu'
"#,
        )
        .unwrap();

        assert_eq!(
            directives,
            [
                Directive::new("command", r#""/opt/my env/bin/python" train.py "cfg.yaml""#),
                Directive::new("name", "it's fine"),
                Directive::new("notify_user", "me@example.edu"),
            ]
        );
    }

    #[test]
    fn malformed_lines() {
        assert_eq!(
            Directive::parse_lines("name=ok\nmodule purge\n").unwrap_err(),
            ValidationError::MalformedDirective {
                line: 2,
                text: "module purge".to_string()
            }
        );
        assert_eq!(
            Directive::parse_lines("#SBATCH\n").unwrap_err(),
            ValidationError::MalformedDirective {
                line: 1,
                text: "#SBATCH".to_string()
            }
        );
        assert_eq!(
            Directive::parse_lines("--partition\n").unwrap_err(),
            ValidationError::MalformedDirective {
                line: 1,
                text: "--partition".to_string()
            }
        );
    }

    #[test]
    fn resolve_aliases() {
        assert_eq!(DirectiveKey::resolve("Job-Name"), Some(DirectiveKey::Name));
        assert_eq!(DirectiveKey::resolve("mail_type"), Some(DirectiveKey::Notify));
        assert_eq!(DirectiveKey::resolve("gpus"), Some(DirectiveKey::Accelerator));
        assert_eq!(DirectiveKey::resolve("nodes"), None);

        for key in DirectiveKey::ALL {
            assert_eq!(DirectiveKey::resolve(key.name()), Some(key));
        }
    }
}
