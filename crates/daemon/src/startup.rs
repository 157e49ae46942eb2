// Daemon startup: PID file, Unix socket creation, readiness signaling.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tracing::info;

use crate::security::{ensure_owner_only_dir, ensure_owner_only_file};

/// Default socket path: ~/.tably/daemon.sock
const SOCKET_NAME: &str = "daemon.sock";
/// PID file: ~/.tably/daemon.pid (diagnostics only)
const PID_FILE_NAME: &str = "daemon.pid";
/// Window bindings database: ~/.tably/meta.db
const META_DB_NAME: &str = "meta.db";

/// Resolved paths for daemon runtime files.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub base_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
    pub meta_db_path: PathBuf,
}

impl DaemonPaths {
    /// Resolve paths under `~/.tably/`, creating the directory.
    pub fn resolve() -> Result<Self> {
        Ok(Self::under(dirs_path()?))
    }

    pub fn under(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            socket_path: base_dir.join(SOCKET_NAME),
            pid_path: base_dir.join(PID_FILE_NAME),
            meta_db_path: base_dir.join(META_DB_NAME),
            base_dir,
        }
    }
}

/// Write the current process PID.
pub fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    let mut file = fs::File::create(path).context("failed to create PID file")?;
    write!(file, "{pid}").context("failed to write PID")?;
    ensure_owner_only_file(path)?;
    info!(pid, path = %path.display(), "wrote PID file");
    Ok(())
}

/// Remove the PID file on shutdown.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %e, "failed to remove PID file");
        }
    }
}

/// Remove stale socket file and bind a new Unix listener.
/// The daemon signals readiness by accepting connections on this socket.
pub async fn bind_socket(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        fs::remove_file(path).context("failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(path).context("failed to bind Unix socket")?;
    ensure_owner_only_file(path)?;
    info!(path = %path.display(), "daemon socket ready");
    Ok(listener)
}

/// Ensure the `~/.tably/` directory exists.
fn dirs_path() -> Result<PathBuf> {
    let tably_dir = crate::config::global_dir().context("could not determine home directory")?;
    fs::create_dir_all(&tably_dir).context("failed to create ~/.tably/")?;
    ensure_owner_only_dir(&tably_dir)?;
    Ok(tably_dir)
}

/// Check if a daemon is already running by connecting to the socket.
pub async fn is_daemon_running(socket_path: &Path) -> bool {
    tokio::net::UnixStream::connect(socket_path).await.is_ok()
}
