// tably CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod daemon_launcher;
mod exit_code;
mod output;

use exit_code::ExitCode;

/// Log filter for CLI diagnostics; logs go to stderr so stdout stays parseable.
const LOG_ENV: &str = "TABLY_LOG";

#[derive(Parser)]
#[command(name = "tably", about = "Shared browser workspaces from the command line")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match commands::run(cli.command) {
        Ok(()) => ExitCode::Success.into(),
        Err(error) => {
            tracing::debug!(error = %format!("{error:#}"), "command failed");
            ExitCode::from_error(&error).into()
        }
    }
}
