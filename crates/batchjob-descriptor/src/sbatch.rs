//! Translation of job requests into Slurm `sbatch` submissions.

use std::fmt::Write as _;

use crate::JobRequest;

/// The prefix of a batch script header directive.
const SBATCH_DIRECTIVE: &str = "#SBATCH";

/// The options to pass to `sbatch` for a job request.
///
/// The options are in a fixed order so that generated scripts are stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbatchDirectives(Vec<String>);

impl SbatchDirectives {
    /// Translates a job request into `sbatch` options.
    pub fn from_request(request: &JobRequest) -> Self {
        let mut options = vec![
            format!("--job-name={name}", name = request.name()),
            format!("--time={limit}", limit = request.time_limit()),
            format!("--partition={partition}", partition = request.partition()),
            // The payload is a single process.
            "--ntasks=1".to_string(),
        ];

        if let Some(accelerator) = request.accelerator() {
            options.push(format!(
                "--gpus={kind}:{count}",
                kind = accelerator.kind,
                count = accelerator.count
            ));
        }

        // Memory is specified per node in mebibytes; the request is rounded up to
        // the next mebibyte.
        if let Some(memory) = request.memory() {
            options.push(format!("--mem={}M", memory.mebibytes()));
        }

        let notification = request.notification();
        if let Some(mail_type) = notification.mail_type() {
            options.push(format!("--mail-type={mail_type}"));
            if let Some(destination) = notification.destination() {
                options.push(format!("--mail-user={destination}"));
            }
        }

        Self(options)
    }

    /// Gets the options as command line arguments.
    pub fn args(&self) -> &[String] {
        &self.0
    }
}

/// Renders a batch script for a job request.
///
/// The script's header carries the resource request; its body replaces the
/// shell with `launcher`, the command line that activates the job's
/// environment and runs the payload on the compute node.
pub fn render_batch_script(request: &JobRequest, launcher: &[String]) -> String {
    let mut script = String::new();

    // Writing to a `String` cannot fail.
    let _ = writeln!(&mut script, "#!/usr/bin/env bash");
    for option in SbatchDirectives::from_request(request).args() {
        let _ = writeln!(&mut script, "{SBATCH_DIRECTIVE} {option}");
    }

    let _ = writeln!(&mut script);
    let _ = writeln!(&mut script, "set -euo pipefail");
    let _ = writeln!(
        &mut script,
        "exec {launcher}",
        launcher = shlex::try_join(launcher.iter().map(String::as_str))
            .unwrap_or_else(|_| launcher.join(" "))
    );
    script
}

/// Parses the job id from `sbatch` output.
///
/// Both the `--parsable` form (`12345` or `12345;cluster`) and the default
/// form (`Submitted batch job 12345`) are recognized.
pub fn parse_job_id(output: &str) -> Option<u64> {
    const MARKER: &str = "Submitted batch job ";

    output.lines().map(str::trim).find_map(|line| {
        if let Some(index) = line.find(MARKER) {
            return line[index + MARKER.len()..].trim().parse().ok();
        }

        let id = line.split(';').next().unwrap_or(line);
        id.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::PartitionRegistry;

    /// Parses the fine-tuning descriptor.
    fn request(extra: &str) -> JobRequest {
        JobRequest::parse_str(
            &format!(
                "name=finetune\ntime_limit=2-00:00:00\npartition=gpu\naccelerator=a100:1\n\
                 memory=128G\nnotify=ALL\n{extra}"
            ),
            &PartitionRegistry::default(),
        )
        .unwrap()
    }

    #[test]
    fn directives() {
        let directives = SbatchDirectives::from_request(&request("notify_user=me@example.edu"));
        assert_eq!(
            directives.args(),
            [
                "--job-name=finetune",
                "--time=2-00:00:00",
                "--partition=gpu",
                "--ntasks=1",
                "--gpus=a100:1",
                "--mem=131072M",
                "--mail-type=ALL",
                "--mail-user=me@example.edu",
            ]
        );
    }

    #[test]
    fn no_notifications() {
        let request = JobRequest::parse_str(
            "name=quick\ntime_limit=01:00:00\npartition=devel\nnotify=NONE\nnotify_user=me",
            &PartitionRegistry::default(),
        )
        .unwrap();
        assert_eq!(
            SbatchDirectives::from_request(&request).args(),
            [
                "--job-name=quick",
                "--time=0-01:00:00",
                "--partition=devel",
                "--ntasks=1",
            ]
        );
    }

    #[test]
    fn header_options_are_single_words() {
        let request = request("notify_user=me@example.edu\nenvironment=cpsc577");
        for option in SbatchDirectives::from_request(&request).args() {
            assert!(
                !option.contains(char::is_whitespace),
                "`{option}` would be split by `sbatch`"
            );
        }

        for descriptor in [
            "#SBATCH --job-name=\"fine tune\"\n",
            "name=fine\ttune\n",
            "name=finetune\n#SBATCH --mail-user=\"me @example.edu\"\n",
        ] {
            assert!(
                JobRequest::parse_str(
                    &format!("{descriptor}time_limit=01:00:00\npartition=devel\n"),
                    &PartitionRegistry::default(),
                )
                .is_err(),
                "`{descriptor}` should be rejected"
            );
        }
    }

    #[test]
    fn script() {
        let script = render_batch_script(
            &request("environment=cpsc577\ncommand=python finetune.py"),
            &[
                "/opt/batchjob/bin/batchjob".to_string(),
                "run".to_string(),
                "/home/me/jobs/finetune.sh".to_string(),
            ],
        );

        assert_eq!(
            script,
            r#"#!/usr/bin/env bash
#SBATCH --job-name=finetune
#SBATCH --time=2-00:00:00
#SBATCH --partition=gpu
#SBATCH --ntasks=1
#SBATCH --gpus=a100:1
#SBATCH --mem=131072M
#SBATCH --mail-type=ALL

set -euo pipefail
exec /opt/batchjob/bin/batchjob run /home/me/jobs/finetune.sh
"#
        );
    }

    #[test]
    fn script_quotes_launcher() {
        let launcher = [
            "batchjob".to_string(),
            "run".to_string(),
            "my jobs/fine'tune.sh".to_string(),
        ];
        let script = render_batch_script(&request(""), &launcher);
        let exec = script
            .lines()
            .last()
            .and_then(|line| line.strip_prefix("exec "))
            .expect("script should end with `exec`");
        assert_eq!(shlex::split(exec).unwrap(), launcher);
    }

    #[test]
    fn job_ids() {
        assert_eq!(parse_job_id("12345\n"), Some(12345));
        assert_eq!(parse_job_id("12345;grace\n"), Some(12345));
        assert_eq!(
            parse_job_id("sbatch: waiting\nSubmitted batch job 67890\n"),
            Some(67890)
        );
        assert_eq!(parse_job_id("sbatch: error: invalid partition"), None);
        assert_eq!(parse_job_id(""), None);
    }
}
