//! Implementation of the `script` subcommand.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use batchjob_descriptor::sbatch::render_batch_script;
use clap::Parser;

use crate::commands::CommandResult;
use crate::commands::read_descriptor;
use crate::config::Config;

/// Arguments for the `script` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The job descriptor to translate.
    #[arg(value_name = "DESCRIPTOR")]
    pub descriptor: PathBuf,
}

/// Gets the command line that runs a job on its compute node.
///
/// The descriptor and configuration paths are used as given; Slurm starts a
/// batch script in the directory it was submitted from.
pub fn launcher(
    descriptor: &Path,
    config: &Config,
    config_path: Option<&Path>,
) -> CommandResult<Vec<String>> {
    let program = match &config.submit.launcher {
        Some(launcher) => launcher.clone(),
        None => std::env::current_exe()
            .context("failed to determine the path of the `batchjob` executable")?
            .display()
            .to_string(),
    };

    let mut argv = vec![program];
    if let Some(path) = config_path {
        argv.push("--config".to_string());
        argv.push(path.display().to_string());
    }

    argv.push("run".to_string());
    argv.push(descriptor.display().to_string());
    Ok(argv)
}

/// Prints the batch script for a job descriptor.
pub fn script(args: Args, config: &Config, config_path: Option<&Path>) -> CommandResult {
    let request = read_descriptor(&args.descriptor, config)?;
    let launcher = launcher(&args.descriptor, config, config_path)?;
    print!("{}", render_batch_script(&request, &launcher));
    Ok(())
}
