// `tably create`: open a new window bound to a fresh workspace.

use clap::Args;
use tably_common::protocol::rpc_methods::{self, CreateWorkspaceParams, WorkspaceOpened};

use crate::client::DaemonClient;

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Display name for the workspace.
    #[arg(long)]
    name: Option<String>,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: CreateArgs) -> anyhow::Result<()> {
    let client = DaemonClient::default();
    let params = CreateWorkspaceParams { name: args.name };
    super::run_and_print(args.json, call_create(&client, params), format_human)
}

async fn call_create(
    client: &DaemonClient,
    params: CreateWorkspaceParams,
) -> anyhow::Result<WorkspaceOpened> {
    client.call_outcome(rpc_methods::WORKSPACE_CREATE, params).await
}

fn format_human(opened: &WorkspaceOpened) -> String {
    format!(
        "Created workspace {} ({}) in window {}.\nShare the code to let others join: tably join {}",
        opened.workspace_id, opened.name, opened.window_id, opened.workspace_id
    )
}
