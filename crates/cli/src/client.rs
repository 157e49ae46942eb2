use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tably_common::protocol::jsonrpc::{Request, RequestId, Response};
use tably_common::protocol::rpc_methods::Outcome;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(unix)]
use tokio::time::timeout;

const SOCKET_RELATIVE_PATH: &str = ".tably/daemon.sock";
/// Overrides the socket location, mainly for running against a test daemon.
pub const SOCKET_PATH_ENV: &str = "TABLY_SOCKET";
/// Join restores tabs and create opens a window, so allow more than a ping.
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// The daemon socket is missing or refuses connections.
#[derive(Debug)]
pub struct DaemonUnavailable {
    socket_path: PathBuf,
    source: io::Error,
}

impl DaemonUnavailable {
    fn new(socket_path: PathBuf, source: io::Error) -> Self {
        Self { socket_path, source }
    }
}

impl fmt::Display for DaemonUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "daemon is not running (socket `{}`)", self.socket_path.display())
    }
}

impl std::error::Error for DaemonUnavailable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// A JSON-RPC error object returned by the daemon.
#[derive(Debug)]
pub struct DaemonRpcError {
    pub code: i32,
    pub message: String,
}

impl fmt::Display for DaemonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "daemon json-rpc error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for DaemonRpcError {}

/// The daemon handled the call but the operation failed (`success: false`).
#[derive(Debug)]
pub struct OperationFailed {
    pub method: String,
    pub message: String,
}

impl fmt::Display for OperationFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for OperationFailed {}

#[derive(Debug)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
    next_request_id: AtomicI64,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new(default_socket_path())
    }
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            next_request_id: AtomicI64::new(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Call a workspace operation and unwrap its `Outcome` envelope.
    pub async fn call_outcome<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let outcome: Outcome<R> = self.call(method, params).await?;
        outcome
            .into_result()
            .map_err(|message| anyhow!(OperationFailed { method: method.to_string(), message }))
    }

    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).context("failed to serialize json-rpc params")?;
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);

        match self.call_once(id, method, params.clone()).await {
            Ok(response) => Ok(response),
            // Only retry when nothing reached the daemon; a socket swap during
            // takeover looks like this.
            Err(first_error) if daemon_unavailable(&first_error) => {
                tokio::time::sleep(RETRY_DELAY).await;
                self.call_once(id, method, params).await
            }
            Err(error) => Err(error),
        }
    }

    async fn call_once<R>(&self, id: i64, method: &str, params: serde_json::Value) -> Result<R>
    where
        R: DeserializeOwned,
    {
        #[cfg(unix)]
        {
            let request = Request::new(method, Some(params), RequestId::Number(id));
            let mut payload =
                serde_json::to_vec(&request).context("failed to serialize json-rpc request")?;
            payload.push(b'\n');

            let stream = timeout(self.timeout, UnixStream::connect(&self.socket_path))
                .await
                .context("timed out connecting to daemon socket")?
                .map_err(|err| {
                    if is_daemon_unavailable_kind(err.kind()) {
                        anyhow!(DaemonUnavailable::new(self.socket_path.clone(), err))
                    } else {
                        anyhow!(err)
                    }
                })
                .with_context(|| {
                    format!("failed to connect to daemon socket `{}`", self.socket_path.display())
                })?;

            let (read_half, mut write_half) = stream.into_split();
            timeout(self.timeout, write_half.write_all(&payload))
                .await
                .context("timed out writing json-rpc request")?
                .context("failed writing json-rpc request to daemon socket")?;
            timeout(self.timeout, write_half.flush())
                .await
                .context("timed out flushing json-rpc request")?
                .context("failed flushing json-rpc request to daemon socket")?;

            let mut reader = BufReader::new(read_half);
            let mut response_line = Vec::new();
            timeout(self.timeout, reader.read_until(b'\n', &mut response_line))
                .await
                .context("timed out waiting for json-rpc response")?
                .context("failed reading json-rpc response from daemon socket")?;

            if response_line.is_empty() {
                anyhow::bail!("daemon returned an empty json-rpc response");
            }

            let response: Response = serde_json::from_slice(&response_line)
                .context("failed to decode daemon json-rpc response")?;

            if let Some(error) = response.error {
                return Err(anyhow!(DaemonRpcError { code: error.code, message: error.message }));
            }

            let result =
                response.result.context("daemon json-rpc response missing `result` field")?;
            return serde_json::from_value(result)
                .with_context(|| format!("unexpected `{method}` result shape"));
        }

        #[cfg(not(unix))]
        {
            let _ = (id, method, params);
            anyhow::bail!("the tably daemon socket is only available on unix")
        }
    }
}

pub fn daemon_unavailable(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.downcast_ref::<DaemonUnavailable>().is_some())
}

pub fn default_socket_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os(SOCKET_PATH_ENV) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    socket_path_from_home(&home)
}

pub fn socket_path_from_home(home: &Path) -> PathBuf {
    home.join(SOCKET_RELATIVE_PATH)
}

pub fn is_daemon_unavailable_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused)
}
