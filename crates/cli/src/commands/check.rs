// `tably check`: can the daemon reach its document store?

use clap::Args;
use serde_json::json;
use tably_common::protocol::rpc_methods::{self, Connectivity, ConnectivityStatus};

use crate::client::DaemonClient;
use crate::exit_code::StoreUnreachable;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let client = DaemonClient::default();
    let format = OutputFormat::detect(args.json);
    let connectivity = match super::block_on(call_check(&client)).and_then(|result| result) {
        Ok(connectivity) => connectivity,
        Err(e) => {
            output::print_anyhow_error(format, &e);
            return Err(e);
        }
    };

    output::print_output(format, &connectivity, format_human)?;
    match connectivity_error(&connectivity) {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

pub(crate) async fn call_check(client: &DaemonClient) -> anyhow::Result<Connectivity> {
    client.call_outcome(rpc_methods::STORE_CHECK, json!({})).await
}

pub(crate) fn connectivity_error(connectivity: &Connectivity) -> Option<StoreUnreachable> {
    match connectivity.status {
        ConnectivityStatus::Connected => None,
        ConnectivityStatus::Unreachable | ConnectivityStatus::Timeout => Some(StoreUnreachable {
            detail: connectivity
                .detail
                .clone()
                .unwrap_or_else(|| status_label(connectivity.status).to_string()),
        }),
    }
}

pub(crate) fn status_label(status: ConnectivityStatus) -> &'static str {
    match status {
        ConnectivityStatus::Connected => "connected",
        ConnectivityStatus::Unreachable => "unreachable",
        ConnectivityStatus::Timeout => "timed out",
    }
}

pub(crate) fn format_human(connectivity: &Connectivity) -> String {
    let mut line = format!("Document store: {}", status_label(connectivity.status));
    if let Some(detail) = &connectivity.detail {
        line.push_str(&format!(" ({detail})"));
    }
    line
}
