use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::client::is_daemon_unavailable_kind;

#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(unix)]
use tokio::time::sleep;

/// Overrides the daemon binary `tably start` launches.
const DAEMON_BIN_ENV: &str = "TABLY_DAEMON_BIN";
const CONNECT_RETRIES: usize = 30;
const RETRY_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    AlreadyRunning,
    Started,
}

/// Start a headless daemon unless one already answers on `socket_path`.
pub async fn ensure_daemon_running(socket_path: &Path) -> Result<LaunchOutcome> {
    #[cfg(unix)]
    {
        match try_connect(socket_path).await {
            Ok(()) => Ok(LaunchOutcome::AlreadyRunning),
            Err(err) if is_daemon_unavailable_kind(err.kind()) => {
                spawn_daemon_process()?;
                wait_for_daemon_socket(socket_path).await?;
                Ok(LaunchOutcome::Started)
            }
            Err(err) => Err(err).with_context(|| {
                format!("failed to connect to daemon socket at `{}`", socket_path.display())
            }),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = socket_path;
        anyhow::bail!("the tably daemon socket is only available on unix")
    }
}

fn daemon_candidates() -> Vec<OsString> {
    if let Some(explicit_binary) = std::env::var_os(DAEMON_BIN_ENV) {
        vec![explicit_binary]
    } else {
        vec![OsString::from("tablyd")]
    }
}

fn spawn_daemon_process() -> Result<()> {
    let mut not_found_candidates = Vec::new();

    for candidate in daemon_candidates() {
        let mut command = Command::new(&candidate);
        command.arg("--headless");
        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
        command.stderr(Stdio::null());

        match command.spawn() {
            Ok(_child) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                not_found_candidates.push(candidate);
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to spawn daemon process with binary `{candidate:?}`")
                });
            }
        }
    }

    Err(anyhow!(
        "unable to find daemon binary (tried: {}); set {DAEMON_BIN_ENV} to its path",
        not_found_candidates
            .iter()
            .map(|name| name.to_string_lossy())
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

#[cfg(unix)]
async fn try_connect(socket_path: &Path) -> io::Result<()> {
    UnixStream::connect(socket_path).await.map(|_| ())
}

#[cfg(unix)]
async fn wait_for_daemon_socket(socket_path: &Path) -> Result<()> {
    let mut last_error: Option<io::Error> = None;

    for _ in 0..CONNECT_RETRIES {
        match try_connect(socket_path).await {
            Ok(()) => return Ok(()),
            Err(err) if is_daemon_unavailable_kind(err.kind()) => {
                last_error = Some(err);
                sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "daemon started but socket connection failed at `{}`",
                        socket_path.display()
                    )
                });
            }
        }
    }

    Err(anyhow!(
        "daemon socket did not become available at `{}` after {} retries; last error: {}",
        socket_path.display(),
        CONNECT_RETRIES,
        last_error.map(|err| err.to_string()).unwrap_or_else(|| "unknown".to_string())
    ))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::client::tests::bind_or_skip;

    #[test]
    fn launches_when_socket_missing_or_refused() {
        assert!(is_daemon_unavailable_kind(io::ErrorKind::NotFound));
        assert!(is_daemon_unavailable_kind(io::ErrorKind::ConnectionRefused));
        assert!(!is_daemon_unavailable_kind(io::ErrorKind::PermissionDenied));
    }

    #[tokio::test]
    async fn running_daemon_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let Some((_listener, socket_path)) = bind_or_skip(&dir) else {
            return;
        };

        let outcome = ensure_daemon_running(&socket_path).await.expect("socket accepts");
        assert_eq!(outcome, LaunchOutcome::AlreadyRunning);
    }
}
