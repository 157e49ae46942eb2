// `tably join`: open a window that mirrors an existing workspace.

use clap::Args;
use tably_common::protocol::rpc_methods::{self, WorkspaceOpened, WorkspaceParams};
use tably_common::types::WorkspaceCode;

use crate::client::DaemonClient;

#[derive(Debug, Args)]
pub struct JoinArgs {
    /// Six-character workspace code (case-insensitive).
    pub code: WorkspaceCode,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: JoinArgs) -> anyhow::Result<()> {
    let client = DaemonClient::default();
    super::run_and_print(args.json, call_join(&client, args.code), format_human)
}

async fn call_join(client: &DaemonClient, code: WorkspaceCode) -> anyhow::Result<WorkspaceOpened> {
    client
        .call_outcome(rpc_methods::WORKSPACE_JOIN, WorkspaceParams { workspace_id: code })
        .await
}

fn format_human(opened: &WorkspaceOpened) -> String {
    let tabs = match opened.restored_tabs {
        1 => "1 tab".to_string(),
        n => format!("{n} tabs"),
    };
    format!(
        "Joined workspace {} ({}) in window {}, restored {tabs}.",
        opened.workspace_id, opened.name, opened.window_id
    )
}
