// `tably leave`: unbind every window of a workspace on this machine.

use clap::Args;
use tably_common::protocol::rpc_methods::{self, LeftWorkspace, WorkspaceParams};
use tably_common::types::WorkspaceCode;

use crate::client::DaemonClient;

#[derive(Debug, Args)]
pub struct LeaveArgs {
    /// Workspace code.
    pub code: WorkspaceCode,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: LeaveArgs) -> anyhow::Result<()> {
    let client = DaemonClient::default();
    super::run_and_print(args.json, call_leave(&client, args.code), format_human)
}

async fn call_leave(client: &DaemonClient, code: WorkspaceCode) -> anyhow::Result<LeftWorkspace> {
    client
        .call_outcome(rpc_methods::WORKSPACE_LEAVE, WorkspaceParams { workspace_id: code })
        .await
}

fn format_human(left: &LeftWorkspace) -> String {
    if left.unbound_windows.is_empty() {
        return format!("No windows were bound to {}.", left.workspace_id);
    }
    let windows: Vec<String> = left.unbound_windows.iter().map(ToString::to_string).collect();
    format!(
        "Left workspace {}. Windows {} keep their tabs but no longer sync.",
        left.workspace_id,
        windows.join(", ")
    )
}
