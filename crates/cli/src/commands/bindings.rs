// `tably bindings`: list which windows sync with which workspace.

use std::collections::BTreeMap;

use clap::Args;
use serde_json::json;
use tably_common::protocol::rpc_methods::{self, BindingList};

use crate::client::DaemonClient;

#[derive(Debug, Args)]
pub struct BindingsArgs {
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: BindingsArgs) -> anyhow::Result<()> {
    let client = DaemonClient::default();
    super::run_and_print(args.json, call_bindings(&client), format_human)
}

pub(crate) async fn call_bindings(client: &DaemonClient) -> anyhow::Result<BindingList> {
    client.call_outcome(rpc_methods::WINDOW_BINDINGS, json!({})).await
}

pub(crate) fn format_human(list: &BindingList) -> String {
    if list.bindings.is_empty() {
        return "No windows are bound to a workspace.".to_string();
    }

    let mut by_workspace: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for binding in &list.bindings {
        by_workspace
            .entry(binding.workspace_id.as_str())
            .or_default()
            .push(binding.window_id.to_string());
    }

    by_workspace
        .into_iter()
        .map(|(code, windows)| format!("{code}  windows {}", windows.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use tably_common::protocol::rpc_methods::WindowBinding;
    use tably_common::types::{WindowId, WorkspaceCode};

    use super::*;

    fn binding(window: i64, code: &str) -> WindowBinding {
        WindowBinding { window_id: WindowId(window), workspace_id: WorkspaceCode::parse(code).unwrap() }
    }

    #[test]
    fn human_format_groups_windows_by_workspace() {
        let list = BindingList {
            bindings: vec![binding(9, "ZZ0000"), binding(2, "AB12C9"), binding(4, "AB12C9")],
        };
        assert_eq!(format_human(&list), "AB12C9  windows 2, 4\nZZ0000  windows 9");
    }

    #[test]
    fn human_format_empty() {
        let list = BindingList { bindings: Vec::new() };
        assert_eq!(format_human(&list), "No windows are bound to a workspace.");
    }
}
