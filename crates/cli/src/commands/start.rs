// `tably start`: launch a headless daemon when none answers on the socket.

use clap::Args;
use serde::Serialize;

use crate::client::default_socket_path;
use crate::daemon_launcher::{self, LaunchOutcome};

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub started: bool,
    pub socket: String,
}

pub fn run(args: StartArgs) -> anyhow::Result<()> {
    let socket_path = default_socket_path();
    let socket = socket_path.display().to_string();
    let launch = async move {
        let outcome = daemon_launcher::ensure_daemon_running(&socket_path).await?;
        Ok(report(outcome, socket))
    };
    super::run_and_print(args.json, launch, format_human)
}

fn report(outcome: LaunchOutcome, socket: String) -> StartReport {
    StartReport { started: outcome == LaunchOutcome::Started, socket }
}

fn format_human(report: &StartReport) -> String {
    if report.started {
        format!("Started headless daemon ({}).", report.socket)
    } else {
        format!("Daemon already running ({}).", report.socket)
    }
}
