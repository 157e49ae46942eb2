// `tably status`: daemon overview, or one workspace's document summary.

use clap::Args;
use serde::Serialize;
use serde_json::json;
use tably_common::protocol::rpc_methods::{
    self, BindingList, Connectivity, WorkspaceParams, WorkspaceStatus,
};
use tably_common::types::WorkspaceCode;

use crate::client::DaemonClient;
use crate::output::{self, OutputFormat};

use super::{bindings, check, format_millis};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Show this workspace instead of the daemon overview.
    code: Option<WorkspaceCode>,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonOverview {
    pub socket: String,
    pub bindings: BindingList,
    pub store: Connectivity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StatusReport {
    Daemon(DaemonOverview),
    Workspace(WorkspaceStatus),
}

pub fn run(args: StatusArgs) -> anyhow::Result<()> {
    let client = DaemonClient::default();
    let format = OutputFormat::detect(args.json);
    let report = match super::block_on(call_status(&client, args.code)).and_then(|result| result) {
        Ok(report) => report,
        Err(e) => {
            output::print_anyhow_error(format, &e);
            return Err(e);
        }
    };

    output::print_output(format, &report, format_human)?;
    if let StatusReport::Daemon(overview) = &report {
        if let Some(unreachable) = check::connectivity_error(&overview.store) {
            output::print_warning(
                format,
                "STORE_UNREACHABLE",
                &format!("workspaces will not sync until the store is back: {}", unreachable.detail),
            );
        }
    }
    Ok(())
}

async fn call_status(
    client: &DaemonClient,
    code: Option<WorkspaceCode>,
) -> anyhow::Result<StatusReport> {
    if let Some(code) = code {
        let status: WorkspaceStatus = client
            .call_outcome(rpc_methods::WORKSPACE_STATUS, WorkspaceParams { workspace_id: code })
            .await?;
        return Ok(StatusReport::Workspace(status));
    }

    let _: serde_json::Value = client.call(rpc_methods::RPC_PING, json!({})).await?;
    let bindings = bindings::call_bindings(client).await?;
    let store = check::call_check(client).await?;
    Ok(StatusReport::Daemon(DaemonOverview {
        socket: client.socket_path().display().to_string(),
        bindings,
        store,
    }))
}

fn format_human(report: &StatusReport) -> String {
    match report {
        StatusReport::Daemon(overview) => {
            let mut lines = vec![
                format!("Daemon running ({})", overview.socket),
                format!("  {}", check::format_human(&overview.store)),
            ];
            for line in bindings::format_human(&overview.bindings).lines() {
                lines.push(format!("  {line}"));
            }
            lines.join("\n")
        }
        StatusReport::Workspace(status) => {
            let workspace = &status.workspace;
            let mut lines = vec![format!("{} ({})", workspace.code, workspace.name)];
            if !workspace.is_active {
                lines.push("  Inactive".into());
            }
            lines.push(format!("  Tabs: {}", status.tab_count));
            let writer = status.updated_by.as_ref().map(|w| w.as_str()).unwrap_or("nobody");
            lines.push(format!("  Last update: {} by {writer}", format_millis(status.last_update)));
            lines.push(format!("  Participants: {}", workspace.participants.len()));
            if status.windows.is_empty() {
                lines.push("  No local windows bound.".into());
            } else {
                let windows: Vec<String> = status.windows.iter().map(ToString::to_string).collect();
                lines.push(format!("  Local windows: {}", windows.join(", ")));
            }
            lines.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tably_common::protocol::rpc_methods::{ConnectivityStatus, WindowBinding};
    use tably_common::types::{WindowId, Workspace, WriterId};
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::client::tests::{answer_once, bind_or_skip};

    fn code() -> WorkspaceCode {
        WorkspaceCode::parse("AB12C9").unwrap()
    }

    fn workspace_status() -> WorkspaceStatus {
        let mut workspace = Workspace::new(code(), "Research", WriterId::new("user_1_aaaaaaaaa"));
        workspace.created_at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        WorkspaceStatus {
            workspace,
            tab_count: 3,
            last_update: 1_700_000_000_000,
            updated_by: Some(WriterId::new("user_2_bbbbbbbbb")),
            windows: vec![WindowId(4)],
        }
    }

    #[test]
    fn human_format_workspace() {
        let output = format_human(&StatusReport::Workspace(workspace_status()));
        assert!(output.starts_with("AB12C9 (Research)"));
        assert!(output.contains("Tabs: 3"));
        assert!(output.contains("2023-11-14 22:13:20 UTC by user_2_bbbbbbbbb"));
        assert!(output.contains("Local windows: 4"));
        assert!(!output.contains("Inactive"));
    }

    #[test]
    fn human_format_daemon_overview() {
        let overview = DaemonOverview {
            socket: "/home/me/.tably/daemon.sock".into(),
            bindings: BindingList {
                bindings: vec![WindowBinding { window_id: WindowId(2), workspace_id: code() }],
            },
            store: Connectivity { status: ConnectivityStatus::Connected, detail: None },
        };
        let output = format_human(&StatusReport::Daemon(overview));
        assert_eq!(
            output,
            "Daemon running (/home/me/.tably/daemon.sock)\n  Document store: connected\n  AB12C9  windows 2"
        );
    }

    #[test]
    fn json_report_is_untagged() {
        let value = serde_json::to_value(StatusReport::Workspace(workspace_status())).unwrap();
        assert_eq!(value["workspace"]["code"], "AB12C9");
        assert_eq!(value["tabCount"], 3);
    }

    #[tokio::test]
    async fn workspace_status_calls_one_method() {
        let dir = TempDir::new().unwrap();
        let Some((listener, socket_path)) = bind_or_skip(&dir) else {
            return;
        };
        let mut payload = serde_json::to_value(workspace_status()).unwrap();
        payload["success"] = json!(true);
        let server = answer_once(listener, payload);

        let client = DaemonClient::new(socket_path);
        let report = call_status(&client, Some(code())).await.unwrap();
        assert!(matches!(report, StatusReport::Workspace(ref s) if s.tab_count == 3));
        assert_eq!(server.await.unwrap()["method"], "workspace.status");
    }

    #[tokio::test]
    async fn overview_pings_then_reads_bindings_and_store() {
        let dir = TempDir::new().unwrap();
        let Some((listener, socket_path)) = bind_or_skip(&dir) else {
            return;
        };
        let server = tokio::spawn(async move {
            let mut methods = Vec::new();
            for _ in 0..3 {
                let (stream, _) = listener.accept().await.unwrap();
                let (read_half, mut write_half) = stream.into_split();
                let mut line = Vec::new();
                BufReader::new(read_half).read_until(b'\n', &mut line).await.unwrap();
                let request: serde_json::Value = serde_json::from_slice(&line).unwrap();
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let result = match method.as_str() {
                    "rpc.ping" => json!({ "ok": true }),
                    "window.bindings" => json!({ "success": true, "bindings": [] }),
                    _ => json!({ "success": true, "status": "timeout", "detail": "no answer" }),
                };
                let response =
                    json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }).to_string()
                        + "\n";
                write_half.write_all(response.as_bytes()).await.unwrap();
                methods.push(method);
            }
            methods
        });

        let client = DaemonClient::new(socket_path);
        let StatusReport::Daemon(overview) = call_status(&client, None).await.unwrap() else {
            panic!("expected overview");
        };
        assert!(overview.bindings.bindings.is_empty());
        assert_eq!(overview.store.status, ConnectivityStatus::Timeout);
        assert_eq!(server.await.unwrap(), vec!["rpc.ping", "window.bindings", "store.check"]);
    }
}
