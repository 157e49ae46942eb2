// `tably membership`: which workspace, if any, a window belongs to.

use clap::Args;
use tably_common::protocol::rpc_methods::{self, Membership, WindowParams};
use tably_common::types::WindowId;

use crate::client::DaemonClient;

#[derive(Debug, Args)]
pub struct MembershipArgs {
    /// Browser window id.
    window: i64,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: MembershipArgs) -> anyhow::Result<()> {
    let client = DaemonClient::default();
    let window = WindowId(args.window);
    super::run_and_print(args.json, call_membership(&client, window), |membership| {
        format_human(window, membership)
    })
}

async fn call_membership(client: &DaemonClient, window: WindowId) -> anyhow::Result<Membership> {
    client
        .call_outcome(rpc_methods::WINDOW_MEMBERSHIP, WindowParams { window_id: window })
        .await
}

fn format_human(window: WindowId, membership: &Membership) -> String {
    match (&membership.workspace_id, membership.is_collaboration) {
        (Some(code), true) => format!("Window {window} syncs with workspace {code}."),
        _ => format!("Window {window} is not part of a workspace."),
    }
}
