// tablyd: tab sync daemon entry point.

use anyhow::Context;
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "tablyd", version, about = "Workspace tab sync daemon")]
struct Args {
    /// Run without a browser, using an in-process simulated one.
    #[arg(long)]
    headless: bool,

    /// Extension origin. The browser passes it when launching a
    /// native-messaging host.
    #[arg(hide = true)]
    origin: Option<String>,

    /// Passed by the browser on Windows.
    #[arg(long = "parent-window", hide = true)]
    parent_window: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries native-messaging frames, so logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if args.headless {
        info!("starting headless tably daemon");
        return tably_daemon::runtime::run_headless()
            .await
            .context("headless daemon terminated unexpectedly");
    }

    info!(origin = args.origin.as_deref().unwrap_or("unknown"), "starting native messaging host");
    tably_daemon::runtime::run_native().await.context("native messaging host terminated unexpectedly")
}
