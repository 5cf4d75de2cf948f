//! Implementation of the `validate` subcommand.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::commands::CommandResult;
use crate::commands::read_descriptor;
use crate::config::Config;

/// Arguments for the `validate` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The job descriptor to validate.
    #[arg(value_name = "DESCRIPTOR")]
    pub descriptor: PathBuf,

    /// Do not print the canonical form of the descriptor.
    #[arg(long = "no-print")]
    pub no_print: bool,
}

/// Validates a job descriptor and prints its canonical directives.
pub fn validate(args: Args, config: &Config) -> CommandResult {
    let request = read_descriptor(&args.descriptor, config)?;
    info!(
        "job descriptor `{path}` is valid",
        path = args.descriptor.display()
    );

    if !args.no_print {
        print!("{request}");
    }

    Ok(())
}
