// CLI subcommand dispatch.

use std::future::Future;

use anyhow::Context;
use clap::Subcommand;
use serde::Serialize;

use crate::output::{self, OutputFormat};

pub mod bindings;
pub mod check;
pub mod create;
pub mod join;
pub mod leave;
pub mod membership;
pub mod start;
pub mod status;

#[derive(Subcommand)]
pub enum Command {
    /// Show the daemon, its window bindings and store connectivity, or one workspace
    Status(status::StatusArgs),
    /// Check that the daemon can reach its document store
    Check(check::CheckArgs),
    /// Create a workspace in a new browser window
    Create(create::CreateArgs),
    /// Join a workspace by code in a new browser window
    Join(join::JoinArgs),
    /// Stop syncing every window bound to a workspace
    Leave(leave::LeaveArgs),
    /// List window bindings
    Bindings(bindings::BindingsArgs),
    /// Show which workspace a window belongs to
    Membership(membership::MembershipArgs),
    /// Start a headless daemon if none is running
    Start(start::StartArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Status(args) => status::run(args),
        Command::Check(args) => check::run(args),
        Command::Create(args) => create::run(args),
        Command::Join(args) => join::run(args),
        Command::Leave(args) => leave::run(args),
        Command::Bindings(args) => bindings::run(args),
        Command::Membership(args) => membership::run(args),
        Command::Start(args) => start::run(args),
    }
}

pub(crate) fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

/// Run one daemon call and print its result, or the mapped error to stderr.
pub(crate) fn run_and_print<T, Fut, H>(json: bool, call: Fut, human_fn: H) -> anyhow::Result<()>
where
    T: Serialize,
    Fut: Future<Output = anyhow::Result<T>>,
    H: FnOnce(&T) -> String,
{
    let format = OutputFormat::detect(json);
    match block_on(call).and_then(|result| result) {
        Ok(result) => {
            output::print_output(format, &result, human_fn)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

/// Render Unix millis for people; zero means "never written".
pub(crate) fn format_millis(millis: i64) -> String {
    if millis == 0 {
        return "never".to_string();
    }
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}
