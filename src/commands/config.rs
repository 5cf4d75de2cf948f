//! Implementation of the `config` subcommand.

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;

use crate::commands::CommandResult;
use crate::config::Config;

/// Arguments for the `config` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// The action to perform.
    #[command(subcommand)]
    command: ConfigSubcommand,
}

/// Subcommands for the `config` command.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Prints the default configuration.
    Init,

    /// Prints the configuration in effect.
    Resolve,
}

/// Runs the `config` command.
pub fn config(args: Args, config: &Config) -> CommandResult {
    let default = Config::default();
    let config = match args.command {
        ConfigSubcommand::Init => &default,
        ConfigSubcommand::Resolve => config,
    };

    let text = toml::to_string_pretty(config).context("failed to serialize configuration")?;
    print!("{text}");
    Ok(())
}
