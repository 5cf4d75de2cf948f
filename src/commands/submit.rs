//! Implementation of the `submit` subcommand.
//!
//! Validates a job descriptor and hands its batch script to the scheduler.

use std::path::Path;
use std::path::PathBuf;

use batchjob_descriptor::sbatch::render_batch_script;
use clap::Parser;
use tracing::info;

use crate::commands::CommandResult;
use crate::commands::read_descriptor;
use crate::commands::script::launcher;
use crate::config::Config;
use crate::scheduler::Sbatch;

/// Arguments for the `submit` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The job descriptor to submit.
    #[arg(value_name = "DESCRIPTOR")]
    pub descriptor: PathBuf,

    /// Print the submission command and batch script instead of submitting.
    #[arg(long)]
    pub dry_run: bool,
}

/// Submits a job, printing the id the scheduler assigned to it.
pub async fn submit(args: Args, config: &Config, config_path: Option<&Path>) -> CommandResult {
    let request = read_descriptor(&args.descriptor, config)?;
    let script = render_batch_script(&request, &launcher(&args.descriptor, config, config_path)?);
    let sbatch = Sbatch::new(&config.submit);

    if args.dry_run {
        let command = sbatch.command_line();
        println!(
            "# {command}",
            command = shlex::try_join(command.iter().map(String::as_str))
                .unwrap_or_else(|_| command.join(" "))
        );
        print!("{script}");
        return Ok(());
    }

    let id = sbatch.submit(&script).await?;
    info!(
        "job `{name}` was submitted as batch job {id}",
        name = request.name()
    );
    println!("{id}");
    Ok(())
}
