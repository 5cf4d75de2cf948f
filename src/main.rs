//! The batchjob command line tool.

use std::io::IsTerminal;
use std::io::stderr;
use std::path::PathBuf;

use batchjob::commands;
use batchjob::commands::CommandResult;
use batchjob::config::Config;
use clap::Parser;
use clap::Subcommand;
use clap_verbosity_flag::Verbosity;
use colored::Colorize;
use git_testament::git_testament;
use git_testament::render_testament;
use tracing_log::AsTrace;

git_testament!(TESTAMENT);

#[derive(Subcommand)]
enum Commands {
    /// Validates a job descriptor and prints its canonical directives.
    Validate(commands::validate::Args),

    /// Prints the Slurm batch script for a job descriptor.
    Script(commands::script::Args),

    /// Submits a job descriptor to Slurm.
    Submit(commands::submit::Args),

    /// Runs a job: activates its environment, runs its command, and releases
    /// the environment.
    ///
    /// This is what a submitted batch script executes on its compute node.
    /// The process exits with the command's exit code. A command may itself
    /// exit with 65, 69, 78, or 127, the codes `batchjob` uses for
    /// validation, submission, activation, and spawn failures; the job's
    /// stderr names the class of every failure `batchjob` reports.
    Run(commands::run::Args),

    /// Displays the configuration.
    Config(commands::config::Args),
}

#[derive(Parser)]
#[command(author, version = render_testament!(TESTAMENT), propagate_version = true, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// The configuration file to use.
    ///
    /// Defaults to `batchjob.toml` in the current directory or in the user's
    /// configuration directory.
    #[arg(short = 'c', long = "config", global = true, value_name = "PATH")]
    config_file: Option<PathBuf>,

    #[command(flatten)]
    verbose: Verbosity,
}

/// Runs the CLI, returning the exit code of the process.
async fn inner() -> CommandResult<i32> {
    let cli = Cli::parse();

    tracing_log::LogTracer::init().map_err(anyhow::Error::from)?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(cli.verbose.log_level_filter().as_trace())
        .with_writer(std::io::stderr)
        .with_ansi(stderr().is_terminal())
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(anyhow::Error::from)?;

    let (config, config_path) = Config::load(cli.config_file.as_deref())?;
    let config_path = config_path.as_deref();

    match cli.command {
        Commands::Validate(args) => commands::validate::validate(args, &config).map(|_| 0),
        Commands::Script(args) => commands::script::script(args, &config, config_path).map(|_| 0),
        Commands::Submit(args) => commands::submit::submit(args, &config, config_path)
            .await
            .map(|_| 0),
        Commands::Run(args) => commands::run::run(args, &config).await,
        Commands::Config(args) => commands::config::config(args, &config).map(|_| 0),
    }
}

#[tokio::main]
pub async fn main() {
    match inner().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let code = e.exit_code();
            eprintln!(
                "{error}: {e:#}",
                error = if std::io::stderr().is_terminal() {
                    "error".red().bold()
                } else {
                    "error".normal()
                },
                e = anyhow::Error::from(e)
            );
            std::process::exit(code);
        }
    }
}
