//! Implementation of the job request and its parser.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use tracing::debug;

use crate::Directive;
use crate::DirectiveKey;
use crate::MemoryLimit;
use crate::NotificationPolicy;
use crate::PartitionRegistry;
use crate::TimeLimit;
use crate::ValidationError;
use crate::error::Result;

/// The maximum length of a job name.
///
/// Slurm truncates longer names; they are rejected here instead so that the
/// name observed in the queue is the name that was written.
pub const MAX_JOB_NAME_LENGTH: usize = 1024;

/// The generic resource prefix `sbatch --gres` uses for accelerators.
const GRES_GPU_PREFIX: &str = "gpu:";

/// A request for a number of accelerators of a given model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AcceleratorRequest {
    /// The accelerator model (e.g. `a100`).
    pub kind: String,
    /// The number of accelerators; always at least one.
    pub count: u32,
}

impl FromStr for AcceleratorRequest {
    type Err = String;

    /// Parses `type:count`, optionally prefixed with `gpu:`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix(GRES_GPU_PREFIX).unwrap_or(s);
        let (kind, count) = s
            .rsplit_once(':')
            .ok_or_else(|| "expected `type:count`".to_string())?;

        if kind.is_empty() || kind.contains(':') {
            return Err(format!("invalid accelerator type `{kind}`"));
        }

        let count = count
            .parse::<u32>()
            .map_err(|_| format!("accelerator count `{count}` is not a whole number"))?;
        if count == 0 {
            return Err("accelerator count must be at least 1".to_string());
        }

        Ok(Self {
            kind: kind.to_string(),
            count,
        })
    }
}

impl fmt::Display for AcceleratorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{kind}:{count}", kind = self.kind, count = self.count)
    }
}

/// The single command a job exists to run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadCommand {
    /// The command as written.
    text: String,
    /// The command split into program and arguments.
    argv: Vec<String>,
}

impl PayloadCommand {
    /// Gets the command as written.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Gets the program to execute.
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Gets the arguments to the program.
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

impl FromStr for PayloadCommand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let text = s.trim();
        let argv = shlex::split(text).ok_or_else(|| "unbalanced quotes in command".to_string())?;
        if argv.is_empty() {
            return Err("command cannot be empty".to_string());
        }

        Ok(Self {
            text: text.to_string(),
            argv,
        })
    }
}

impl fmt::Display for PayloadCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A validated job submission request.
///
/// A request is only obtainable through [`JobRequest::parse`] (or
/// [`JobRequest::parse_str`]), which guarantees that:
///
/// * the time limit is greater than zero;
/// * the partition is known to the registry;
/// * an accelerator request is present, with a count of at least one, exactly
///   when the partition is equipped with accelerators;
/// * the request fits within the partition's limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// The job name.
    name: String,
    /// The wall-clock time limit.
    time_limit: TimeLimit,
    /// The partition to run on.
    partition: String,
    /// The accelerator request.
    accelerator: Option<AcceleratorRequest>,
    /// The memory limit.
    memory: Option<MemoryLimit>,
    /// The notification policy.
    notification: NotificationPolicy,
    /// The named environment to activate before running the payload.
    environment: Option<String>,
    /// The payload command.
    command: Option<PayloadCommand>,
}

/// Parses a directive value into the given type.
fn value<T>(key: DirectiveKey, value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(|reason| ValidationError::MalformedValue {
        directive: key.name(),
        value: value.to_string(),
        reason,
    })
}

impl JobRequest {
    /// Parses and validates a sequence of directives.
    ///
    /// This is a pure function of its inputs.
    pub fn parse(directives: &[Directive], registry: &PartitionRegistry) -> Result<Self> {
        let mut values: IndexMap<DirectiveKey, &str> = IndexMap::new();
        for directive in directives {
            let key = DirectiveKey::resolve(&directive.key).ok_or_else(|| {
                ValidationError::UnknownDirective {
                    key: directive.key.clone(),
                }
            })?;

            if values.insert(key, directive.value.trim()).is_some() {
                return Err(ValidationError::DuplicateDirective { key: key.name() });
            }
        }

        let required = |key: DirectiveKey| {
            values
                .get(&key)
                .copied()
                .ok_or(ValidationError::MissingRequiredDirective(key.name()))
        };

        let name = required(DirectiveKey::Name)?;
        if name.is_empty() {
            return Err(ValidationError::MalformedValue {
                directive: DirectiveKey::Name.name(),
                value: name.to_string(),
                reason: "job name cannot be empty".to_string(),
            });
        }

        if name.contains(char::is_whitespace) {
            return Err(ValidationError::MalformedValue {
                directive: DirectiveKey::Name.name(),
                value: name.to_string(),
                reason: "job name cannot contain whitespace".to_string(),
            });
        }

        if name.chars().count() > MAX_JOB_NAME_LENGTH {
            return Err(ValidationError::MalformedValue {
                directive: DirectiveKey::Name.name(),
                value: name.to_string(),
                reason: format!("job name cannot exceed {MAX_JOB_NAME_LENGTH} characters"),
            });
        }

        let time_limit: TimeLimit =
            value(DirectiveKey::TimeLimit, required(DirectiveKey::TimeLimit)?)?;

        let partition_name = required(DirectiveKey::Partition)?;
        let partition =
            registry
                .get(partition_name)
                .ok_or_else(|| ValidationError::MalformedValue {
                    directive: DirectiveKey::Partition.name(),
                    value: partition_name.to_string(),
                    reason: "no partition with this name is known".to_string(),
                })?;

        let accelerator = values
            .get(&DirectiveKey::Accelerator)
            .map(|v| value::<AcceleratorRequest>(DirectiveKey::Accelerator, v))
            .transpose()?;
        let memory = values
            .get(&DirectiveKey::Memory)
            .map(|v| value::<MemoryLimit>(DirectiveKey::Memory, v))
            .transpose()?;
        let mut notification = values
            .get(&DirectiveKey::Notify)
            .map(|v| value::<NotificationPolicy>(DirectiveKey::Notify, v))
            .transpose()?
            .unwrap_or_default();
        if let Some(destination) = values.get(&DirectiveKey::NotifyUser) {
            if destination.is_empty() {
                return Err(ValidationError::MalformedValue {
                    directive: DirectiveKey::NotifyUser.name(),
                    value: String::new(),
                    reason: "notification destination cannot be empty".to_string(),
                });
            }

            if destination.contains(char::is_whitespace) {
                return Err(ValidationError::MalformedValue {
                    directive: DirectiveKey::NotifyUser.name(),
                    value: destination.to_string(),
                    reason: "notification destination cannot contain whitespace".to_string(),
                });
            }

            notification = notification.with_destination(*destination);
        }

        let environment = match values.get(&DirectiveKey::Environment) {
            Some(env) if env.is_empty() => {
                return Err(ValidationError::MalformedValue {
                    directive: DirectiveKey::Environment.name(),
                    value: String::new(),
                    reason: "environment name cannot be empty".to_string(),
                });
            }
            Some(env) => Some(env.to_string()),
            None => None,
        };
        let command = values
            .get(&DirectiveKey::Command)
            .map(|v| value::<PayloadCommand>(DirectiveKey::Command, v))
            .transpose()?;

        // Cross-check the request against the partition's hardware profile.
        match &accelerator {
            Some(request) if !partition.has_accelerators() => {
                return Err(ValidationError::UnsatisfiableRequest(format!(
                    "{count} `{kind}` accelerator(s) requested, but partition `{partition_name}` \
                     has no accelerators",
                    count = request.count,
                    kind = request.kind,
                )));
            }
            Some(request) => {
                let capacity = partition.accelerator_capacity(&request.kind);
                if capacity == 0 {
                    return Err(ValidationError::UnsatisfiableRequest(format!(
                        "partition `{partition_name}` does not offer `{kind}` accelerators",
                        kind = request.kind,
                    )));
                }

                if request.count > capacity {
                    return Err(ValidationError::UnsatisfiableRequest(format!(
                        "{count} `{kind}` accelerators requested, but partition \
                         `{partition_name}` has at most {capacity} per node",
                        count = request.count,
                        kind = request.kind,
                    )));
                }
            }
            None if partition.has_accelerators() => {
                return Err(ValidationError::UnsatisfiableRequest(format!(
                    "partition `{partition_name}` requires at least one accelerator to be \
                     requested"
                )));
            }
            None => {}
        }

        if let Some(max) = partition.max_time
            && time_limit > max
        {
            return Err(ValidationError::UnsatisfiableRequest(format!(
                "time limit {time_limit} exceeds the maximum of {max} for partition \
                 `{partition_name}`"
            )));
        }

        if let Some(max) = partition.max_memory
            && let Some(memory) = memory
            && memory.size() > max.size()
        {
            return Err(ValidationError::UnsatisfiableRequest(format!(
                "memory {memory} exceeds the maximum of {max} for partition `{partition_name}`"
            )));
        }

        debug!(name, partition = partition_name, "validated job request");

        Ok(Self {
            name: name.to_string(),
            time_limit,
            partition: partition_name.to_string(),
            accelerator,
            memory,
            notification,
            environment,
            command,
        })
    }

    /// Lexes and parses the text of a descriptor.
    pub fn parse_str(text: &str, registry: &PartitionRegistry) -> Result<Self> {
        Self::parse(&Directive::parse_lines(text)?, registry)
    }

    /// Gets the job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the wall-clock time limit.
    pub fn time_limit(&self) -> TimeLimit {
        self.time_limit
    }

    /// Gets the partition name.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Gets the accelerator request.
    pub fn accelerator(&self) -> Option<&AcceleratorRequest> {
        self.accelerator.as_ref()
    }

    /// Gets the memory limit.
    pub fn memory(&self) -> Option<MemoryLimit> {
        self.memory
    }

    /// Gets the notification policy.
    pub fn notification(&self) -> &NotificationPolicy {
        &self.notification
    }

    /// Gets the name of the environment to activate.
    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// Gets the payload command.
    pub fn command(&self) -> Option<&PayloadCommand> {
        self.command.as_ref()
    }

    /// Gets the environment and command needed to execute the job.
    ///
    /// Submission does not need either, but execution needs both.
    pub fn payload(&self) -> Result<(&str, &PayloadCommand)> {
        let environment = self
            .environment()
            .ok_or(ValidationError::MissingRequiredDirective(DirectiveKey::Environment.name()))?;
        let command = self
            .command()
            .ok_or(ValidationError::MissingRequiredDirective(DirectiveKey::Command.name()))?;
        Ok((environment, command))
    }

    /// Gets the request as canonical directives.
    ///
    /// Parsing the returned directives yields an equal request.
    pub fn directives(&self) -> Vec<Directive> {
        let mut directives = vec![
            Directive::new(DirectiveKey::Name.name(), &self.name),
            Directive::new(DirectiveKey::TimeLimit.name(), self.time_limit.to_string()),
            Directive::new(DirectiveKey::Partition.name(), &self.partition),
        ];

        if let Some(accelerator) = &self.accelerator {
            directives.push(Directive::new(
                DirectiveKey::Accelerator.name(),
                accelerator.to_string(),
            ));
        }

        if let Some(memory) = &self.memory {
            directives.push(Directive::new(DirectiveKey::Memory.name(), memory.to_string()));
        }

        directives.push(Directive::new(
            DirectiveKey::Notify.name(),
            self.notification
                .mail_type()
                .unwrap_or_else(|| "NONE".to_string()),
        ));

        if let Some(destination) = self.notification.destination() {
            directives.push(Directive::new(DirectiveKey::NotifyUser.name(), destination));
        }

        if let Some(environment) = &self.environment {
            directives.push(Directive::new(DirectiveKey::Environment.name(), environment));
        }

        if let Some(command) = &self.command {
            directives.push(Directive::new(DirectiveKey::Command.name(), command.as_str()));
        }

        directives
    }
}

impl fmt::Display for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for directive in self.directives() {
            writeln!(f, "{directive}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytesize::ByteSize;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::NotifyEvent;

    /// The directives of the fine-tuning job.
    fn finetune() -> Vec<Directive> {
        vec![
            Directive::new("name", "finetune"),
            Directive::new("time_limit", "2-00:00:00"),
            Directive::new("partition", "gpu"),
            Directive::new("accelerator", "a100:1"),
            Directive::new("memory", "128G"),
            Directive::new("notify", "ALL"),
        ]
    }

    /// Parses directives against the default registry.
    fn parse(directives: &[Directive]) -> Result<JobRequest> {
        JobRequest::parse(directives, &PartitionRegistry::default())
    }

    /// Replaces or removes a directive from the fine-tuning job.
    fn with(key: &str, value: Option<&str>) -> Vec<Directive> {
        let mut directives: Vec<_> = finetune().into_iter().filter(|d| d.key != key).collect();
        if let Some(value) = value {
            directives.push(Directive::new(key, value));
        }
        directives
    }

    #[test]
    fn finetune_request() {
        let request = parse(&finetune()).expect("request should parse");
        assert_eq!(request.name(), "finetune");
        assert_eq!(request.time_limit().as_duration(), Duration::from_secs(48 * 3600));
        assert_eq!(request.partition(), "gpu");
        assert_eq!(
            request.accelerator(),
            Some(&AcceleratorRequest {
                kind: "a100".to_string(),
                count: 1
            })
        );
        assert_eq!(request.memory().unwrap().size(), ByteSize::gib(128));
        assert_eq!(
            request
                .notification()
                .events()
                .iter()
                .copied()
                .collect::<Vec<_>>(),
            [NotifyEvent::Start, NotifyEvent::End, NotifyEvent::Fail]
        );
        assert_eq!(request.environment(), None);
        assert_eq!(request.command(), None);
    }

    #[test]
    fn directives_round_trip() {
        let request = parse(&finetune()).unwrap();
        assert_eq!(request.directives(), finetune());
        assert_eq!(parse(&request.directives()).unwrap(), request);

        let text = request.to_string();
        assert_eq!(
            JobRequest::parse_str(&text, &PartitionRegistry::default()).unwrap(),
            request
        );
    }

    #[test]
    fn parse_is_idempotent() {
        assert_eq!(parse(&finetune()).unwrap(), parse(&finetune()).unwrap());
    }

    #[test]
    fn missing_required() {
        for key in ["name", "time_limit", "partition"] {
            assert_eq!(
                parse(&with(key, None)).unwrap_err(),
                ValidationError::MissingRequiredDirective(key),
            );
        }
    }

    #[test]
    fn unknown_and_duplicate() {
        let mut directives = finetune();
        directives.push(Directive::new("nodes", "2"));
        assert_eq!(
            parse(&directives).unwrap_err(),
            ValidationError::UnknownDirective {
                key: "nodes".to_string()
            }
        );

        let mut directives = finetune();
        directives.push(Directive::new("time", "1-00:00:00"));
        assert_eq!(
            parse(&directives).unwrap_err(),
            ValidationError::DuplicateDirective { key: "time_limit" }
        );
    }

    #[test]
    fn malformed_values() {
        let err = parse(&with("memory", Some("128"))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "directive `memory` has invalid value `128`: expected a unit suffix such as `G` or \
             `MiB`"
        );

        let err = parse(&with("time_limit", Some("0-00:00:00"))).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MalformedValue {
                directive: "time_limit",
                ..
            }
        ));

        let err = parse(&with("partition", Some("moon"))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "directive `partition` has invalid value `moon`: no partition with this name is known"
        );

        let err = parse(&with("accelerator", Some("a100:0"))).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MalformedValue {
                directive: "accelerator",
                ..
            }
        ));

        let err = parse(&with("name", Some("fine tune"))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "directive `name` has invalid value `fine tune`: job name cannot contain whitespace"
        );

        let mut directives = finetune();
        directives.push(Directive::new("notify_user", "me @example.edu"));
        assert!(matches!(
            parse(&directives).unwrap_err(),
            ValidationError::MalformedValue {
                directive: "notify_user",
                ..
            }
        ));

        let err = parse(&with("name", Some("  "))).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MalformedValue {
                directive: "name",
                ..
            }
        ));
    }

    #[test]
    fn unsatisfiable_requests() {
        assert_eq!(
            parse(&with("partition", Some("day"))).unwrap_err(),
            ValidationError::UnsatisfiableRequest(
                "1 `a100` accelerator(s) requested, but partition `day` has no accelerators"
                    .to_string()
            )
        );

        assert_eq!(
            parse(&with("accelerator", Some("h100:1"))).unwrap_err(),
            ValidationError::UnsatisfiableRequest(
                "partition `gpu` does not offer `h100` accelerators".to_string()
            )
        );

        assert_eq!(
            parse(&with("accelerator", Some("v100:3"))).unwrap_err(),
            ValidationError::UnsatisfiableRequest(
                "3 `v100` accelerators requested, but partition `gpu` has at most 2 per node"
                    .to_string()
            )
        );

        assert_eq!(
            parse(&with("accelerator", None)).unwrap_err(),
            ValidationError::UnsatisfiableRequest(
                "partition `gpu` requires at least one accelerator to be requested".to_string()
            )
        );

        assert_eq!(
            parse(&with("time_limit", Some("3-00:00:00"))).unwrap_err(),
            ValidationError::UnsatisfiableRequest(
                "time limit 3-00:00:00 exceeds the maximum of 2-00:00:00 for partition `gpu`"
                    .to_string()
            )
        );

        assert_eq!(
            parse(&with("memory", Some("2T"))).unwrap_err(),
            ValidationError::UnsatisfiableRequest(
                "memory 2T exceeds the maximum of 1T for partition `gpu`".to_string()
            )
        );
    }

    #[test]
    fn native_batch_script() {
        let request = JobRequest::parse_str(
            r#"#!/bin/bash
#SBATCH --job-name=finetune
#SBATCH --time=2-00:00:00
#SBATCH --partition=gpu
#SBATCH --gres=gpu:a100:1
#SBATCH --mem=128G
#SBATCH --mail-type=ALL
#SBATCH --mail-user=someone@example.edu
environment=cpsc577
command=python finetune.py --config "config file.yaml"
"#,
            &PartitionRegistry::default(),
        )
        .unwrap();

        assert_eq!(request, {
            let mut directives = finetune();
            directives.push(Directive::new("notify_user", "someone@example.edu"));
            directives.push(Directive::new("environment", "cpsc577"));
            directives.push(Directive::new(
                "command",
                r#"python finetune.py --config "config file.yaml""#,
            ));
            parse(&directives).unwrap()
        });
        assert_eq!(request.notification().destination(), Some("someone@example.edu"));

        let (environment, command) = request.payload().unwrap();
        assert_eq!(environment, "cpsc577");
        assert_eq!(command.program(), "python");
        assert_eq!(command.args(), ["finetune.py", "--config", "config file.yaml"]);
    }

    #[test]
    fn payload_requires_environment_and_command() {
        let request = parse(&finetune()).unwrap();
        assert_eq!(
            request.payload().unwrap_err(),
            ValidationError::MissingRequiredDirective("environment")
        );

        let mut directives = finetune();
        directives.push(Directive::new("env", "cpsc577"));
        let request = parse(&directives).unwrap();
        assert_eq!(
            request.payload().unwrap_err(),
            ValidationError::MissingRequiredDirective("command")
        );
    }

    #[test]
    fn quoted_program_keeps_its_arguments() {
        let mut directives = finetune();
        directives.push(Directive::new("environment", "cpsc577"));
        let text = directives
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");

        let request = JobRequest::parse_str(
            &format!("{text}\ncommand=\"/opt/my env/bin/python\" train.py \"cfg.yaml\""),
            &PartitionRegistry::default(),
        )
        .unwrap();
        let (_, command) = request.payload().unwrap();
        assert_eq!(command.program(), "/opt/my env/bin/python");
        assert_eq!(command.args(), ["train.py", "cfg.yaml"]);

        let request = JobRequest::parse_str(
            &format!("{text}\ncommand=\"python finetune.py --epochs 3\""),
            &PartitionRegistry::default(),
        )
        .unwrap();
        let (_, command) = request.payload().unwrap();
        assert_eq!(command.program(), "python");
        assert_eq!(command.args(), ["finetune.py", "--epochs", "3"]);
    }

    #[test]
    fn invalid_commands() {
        let err = parse(&with("command", Some("python 'unterminated"))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "directive `command` has invalid value `python 'unterminated`: unbalanced quotes in \
             command"
        );
    }
}
