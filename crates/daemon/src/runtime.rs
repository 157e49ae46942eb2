use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tably_common::protocol::jsonrpc::{Request, RequestId, Response};
use tably_common::protocol::rpc_methods::DAEMON_SHUTDOWN;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::categorize::{select_categorizer, LanguageModel, OllamaModel};
use crate::config::GlobalConfig;
use crate::host::native::DEFAULT_CALL_TIMEOUT;
use crate::host::{MemoryHost, NativeHost, TabHost};
use crate::rpc::methods::RpcServerState;
use crate::rpc::native::serve_native;
use crate::rpc::unix::serve_unix_until_shutdown;
use crate::startup::{
    bind_socket, is_daemon_running, remove_pid_file, write_pid_file, DaemonPaths,
};
use crate::store::meta_db::MetaDb;
use crate::store::{DocumentStore, MemoryDocumentStore, RelayDocumentStore};
use crate::sync::{MembershipRegistry, SyncService};

const TAKEOVER_WAIT_RETRIES: usize = 40;
const TAKEOVER_WAIT_DELAY: Duration = Duration::from_millis(50);
const OUTBOUND_QUEUE: usize = 256;

/// Run without a browser: tabs live in an in-process simulated browser and
/// the daemon is driven over the Unix socket only.
pub async fn run_headless() -> Result<()> {
    run_headless_with(DaemonPaths::resolve()?, GlobalConfig::load()).await
}

/// Run as the extension's native-messaging host on stdin/stdout. The Unix
/// socket is served alongside so the CLI can reach the same daemon.
pub async fn run_native() -> Result<()> {
    run_native_with(
        DaemonPaths::resolve()?,
        GlobalConfig::load(),
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await
}

async fn run_headless_with(paths: DaemonPaths, config: GlobalConfig) -> Result<()> {
    let listener = bind_socket(&paths.socket_path).await?;
    write_pid_file(&paths.pid_path)?;

    let host = Arc::new(MemoryHost::new());
    let service = build_service(&config, &paths, host.clone())?;
    let pump = spawn_event_pump(&host, service.clone());
    spawn_restore(service.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let state = build_state(&config, service.clone(), shutdown_tx.clone()).await;
    spawn_ctrl_c(shutdown_tx);

    info!(socket_path = %paths.socket_path.display(), "headless daemon started");
    let result = serve_unix_until_shutdown(listener, state, shutdown_rx).await;
    pump.abort();
    service.shutdown();
    cleanup_paths(&paths);
    result.context("headless daemon exited with error")
}

async fn run_native_with<R, W>(
    paths: DaemonPaths,
    config: GlobalConfig,
    reader: R,
    writer: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    take_over_running_daemon(&paths.socket_path).await?;

    let listener = bind_socket(&paths.socket_path).await?;
    write_pid_file(&paths.pid_path)?;

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let host = Arc::new(NativeHost::new(outbound_tx.clone(), DEFAULT_CALL_TIMEOUT));
    let service = build_service(&config, &paths, host.clone())?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let state = build_state(&config, service.clone(), shutdown_tx.clone()).await;
    spawn_ctrl_c(shutdown_tx.clone());

    let socket_state = state.clone();
    let socket_server = tokio::spawn(async move {
        if let Err(error) = serve_unix_until_shutdown(listener, socket_state, shutdown_rx).await {
            warn!(?error, "rpc socket server terminated unexpectedly");
        }
    });

    // Host calls only complete once the pipe is being served.
    spawn_restore(service.clone());

    info!(socket_path = %paths.socket_path.display(), "native messaging host started");
    let mut shutdown = shutdown_tx.subscribe();
    let result = tokio::select! {
        result = serve_native(reader, writer, state, host, outbound_tx, outbound_rx) => result,
        _ = shutdown.recv() => {
            info!("shutdown requested, leaving native messaging host");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(());
    let _ = socket_server.await;
    service.shutdown();
    cleanup_paths(&paths);
    result.context("native messaging host exited with error")
}

// ── Wiring ─────────────────────────────────────────────────────────

fn build_service(
    config: &GlobalConfig,
    paths: &DaemonPaths,
    host: Arc<dyn TabHost>,
) -> Result<Arc<SyncService>> {
    let tuning = config.sync.to_tuning();
    let store: Arc<dyn DocumentStore> = match config.store_url.as_deref() {
        Some(url) => Arc::new(
            RelayDocumentStore::new(url, tuning.connect_timeout)
                .with_context(|| format!("invalid store_url `{url}`"))?,
        ),
        None => Arc::new(MemoryDocumentStore::new()),
    };

    let meta_db = MetaDb::open(&paths.meta_db_path)?;
    let registry =
        MembershipRegistry::load(Box::new(meta_db)).context("failed to load window bindings")?;

    let writer = config.writer();
    info!(writer = %writer, store = store.backend_name(), "sync service configured");
    Ok(SyncService::new(store, host, registry, writer, tuning))
}

async fn build_state(
    config: &GlobalConfig,
    service: Arc<SyncService>,
    shutdown: broadcast::Sender<()>,
) -> RpcServerState {
    let model = config.categorizer.model.as_deref().map(|model| {
        Arc::new(OllamaModel::new(config.categorizer.model_url.as_deref(), model))
            as Arc<dyn LanguageModel>
    });
    RpcServerState::new(service)
        .with_categorizer(select_categorizer(model).await)
        .with_shutdown_notifier(shutdown)
}

/// Feed the simulated browser's tab events into the sync engine.
fn spawn_event_pump(host: &MemoryHost, service: Arc<SyncService>) -> JoinHandle<()> {
    let mut events = host.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let handled = service.handle_tab_event(event).await;
            debug!(published = handled.published, reason = ?handled.reason, "tab event handled");
        }
    })
}

fn spawn_restore(service: Arc<SyncService>) {
    tokio::spawn(async move {
        if let Err(error) = service.restore().await {
            warn!(?error, "failed to restore window bindings");
        }
    });
}

fn spawn_ctrl_c(shutdown: broadcast::Sender<()>) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown.send(());
    });
}

// ── Takeover ───────────────────────────────────────────────────────

/// A daemon attached to the extension owns the socket; a headless one
/// already running is asked to exit first.
async fn take_over_running_daemon(socket_path: &Path) -> Result<()> {
    if !is_daemon_running(socket_path).await {
        return Ok(());
    }

    info!(socket_path = %socket_path.display(), "running daemon detected, requesting shutdown");
    request_daemon_shutdown(socket_path).await?;
    wait_for_daemon_shutdown(socket_path).await
}

async fn request_daemon_shutdown(socket_path: &Path) -> Result<()> {
    let request = Request::new(DAEMON_SHUTDOWN, None, RequestId::Number(1));
    let encoded =
        serde_json::to_vec(&request).context("failed to serialize daemon shutdown request")?;
    let mut stream =
        UnixStream::connect(socket_path).await.context("failed to connect to running daemon")?;
    stream.write_all(&encoded).await.context("failed to send daemon shutdown request")?;
    stream.write_all(b"\n").await.context("failed to send daemon shutdown request terminator")?;
    stream.flush().await.context("failed to flush daemon shutdown request")?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let bytes_read =
        reader.read_line(&mut line).await.context("failed to read daemon shutdown response")?;
    if bytes_read == 0 {
        return Ok(());
    }

    let response: Response =
        serde_json::from_str(line.trim()).context("failed to decode daemon shutdown response")?;
    if let Some(error) = response.error {
        return Err(anyhow!("daemon refused shutdown request: {}", error.message));
    }

    Ok(())
}

/// Wait for the old daemon to stop accepting and to remove its socket file,
/// so its cleanup cannot delete the socket we are about to bind.
async fn wait_for_daemon_shutdown(socket_path: &Path) -> Result<()> {
    for _ in 0..TAKEOVER_WAIT_RETRIES {
        if !is_daemon_running(socket_path).await && !socket_path.exists() {
            return Ok(());
        }
        tokio::time::sleep(TAKEOVER_WAIT_DELAY).await;
    }

    // A socket file nobody accepts on is stale; `bind_socket` replaces it.
    if is_daemon_running(socket_path).await {
        return Err(anyhow!(
            "daemon did not exit after takeover request at `{}`",
            socket_path.display()
        ));
    }
    Ok(())
}

fn cleanup_paths(paths: &DaemonPaths) {
    remove_pid_file(&paths.pid_path);
    let _ = std::fs::remove_file(&paths.socket_path);
}
