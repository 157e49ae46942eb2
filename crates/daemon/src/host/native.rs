// Chrome native-messaging bridge.
//
// Frames are a 4-byte native-endian length followed by UTF-8 JSON. The
// extension and the daemon both send JSON-RPC requests over the same pipe:
// the extension reports tab events and popup actions, the daemon asks the
// extension to perform tab and window primitives. Calls made from here are
// correlated by id through pending oneshot senders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tably_common::protocol::jsonrpc::{Frame, Request, RequestId, Response};
use tably_common::protocol::rpc_methods::{
    HOST_TABS_CREATE, HOST_TABS_QUERY, HOST_TABS_REMOVE, HOST_TABS_UPDATE, HOST_WINDOWS_CREATE,
    HOST_WINDOWS_FOCUS,
};
use tably_common::types::{BrowserTab, TabId, WindowId};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use super::{CreateTab, HostError, TabHost, TabUpdate};
use crate::timeout::with_timeout;

/// Chrome refuses host→extension messages above 1 MiB.
pub const MAX_OUTBOUND_FRAME_BYTES: usize = 1024 * 1024;
/// Chrome caps extension→host messages at 64 MiB.
pub const MAX_INBOUND_FRAME_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("native messaging I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Framing ────────────────────────────────────────────────────────

/// Read one frame payload. `Ok(None)` on a clean end of stream, which is
/// how the browser signals that the extension disconnected.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0_u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error.into()),
    }

    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_INBOUND_FRAME_BYTES {
        return Err(FrameError::TooLarge { len, limit: MAX_INBOUND_FRAME_BYTES });
    }
    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_OUTBOUND_FRAME_BYTES {
        return Err(FrameError::TooLarge { len: payload.len(), limit: MAX_OUTBOUND_FRAME_BYTES });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize a frame, refusing payloads Chrome would drop.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(frame)?;
    if payload.len() > MAX_OUTBOUND_FRAME_BYTES {
        return Err(FrameError::TooLarge { len: payload.len(), limit: MAX_OUTBOUND_FRAME_BYTES });
    }
    Ok(payload)
}

// ── Host calls ─────────────────────────────────────────────────────

type PendingCalls = Arc<Mutex<HashMap<i64, oneshot::Sender<Response>>>>;

/// `TabHost` whose primitives are JSON-RPC requests to the extension.
///
/// Outgoing frames are queued on `outbound`; whoever owns the pipe must feed
/// responses back through [`NativeHost::resolve`].
pub struct NativeHost {
    outbound: mpsc::Sender<Frame>,
    pending: PendingCalls,
    next_id: AtomicI64,
    call_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedWindow {
    #[serde(alias = "windowId")]
    id: WindowId,
}

impl NativeHost {
    pub fn new(outbound: mpsc::Sender<Frame>, call_timeout: Duration) -> Self {
        Self {
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            call_timeout,
        }
    }

    /// Complete the call `response` answers. Returns false for responses
    /// nobody waits for any more (late arrivals after a timeout).
    pub fn resolve(&self, response: Response) -> bool {
        let RequestId::Number(id) = response.id else {
            return false;
        };
        match self.lock_pending().remove(&id) {
            Some(waiter) => waiter.send(response).is_ok(),
            None => false,
        }
    }

    /// Fail every outstanding call, e.g. after the extension went away.
    pub fn disconnect(&self) {
        self.lock_pending().clear();
    }

    pub fn pending_calls(&self) -> usize {
        self.lock_pending().len()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        params: Value,
    ) -> Result<T, HostError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);

        let request = Request::new(operation, Some(params), RequestId::Number(id));
        if self.outbound.send(Frame::Request(request)).await.is_err() {
            self.lock_pending().remove(&id);
            return Err(HostError::Disconnected);
        }

        let response = match with_timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(HostError::Disconnected),
            Err(elapsed) => {
                self.lock_pending().remove(&id);
                return Err(HostError::Timeout { operation, source: elapsed });
            }
        };

        if let Some(error) = response.error {
            return Err(HostError::Rejected { operation, message: error.message });
        }
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| HostError::Decode(format!("{operation}: {e}")))
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<i64, oneshot::Sender<Response>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TabHost for NativeHost {
    async fn query_tabs(&self, window: WindowId) -> Result<Vec<BrowserTab>, HostError> {
        let mut tabs: Vec<BrowserTab> =
            self.call(HOST_TABS_QUERY, json!({ "windowId": window })).await?;
        tabs.sort_by_key(|tab| tab.index);
        Ok(tabs)
    }

    async fn create_tab(&self, request: CreateTab) -> Result<BrowserTab, HostError> {
        let params = serde_json::to_value(&request)
            .map_err(|e| HostError::Decode(format!("{HOST_TABS_CREATE}: {e}")))?;
        self.call(HOST_TABS_CREATE, params).await
    }

    async fn update_tab(&self, tab: TabId, update: TabUpdate) -> Result<BrowserTab, HostError> {
        let mut params = serde_json::to_value(&update)
            .map_err(|e| HostError::Decode(format!("{HOST_TABS_UPDATE}: {e}")))?;
        params["tabId"] = json!(tab);
        self.call(HOST_TABS_UPDATE, params).await
    }

    async fn remove_tab(&self, tab: TabId) -> Result<(), HostError> {
        let _: Value = self.call(HOST_TABS_REMOVE, json!({ "tabId": tab })).await?;
        Ok(())
    }

    async fn create_window(&self) -> Result<WindowId, HostError> {
        let created: CreatedWindow =
            self.call(HOST_WINDOWS_CREATE, json!({ "focused": true })).await?;
        Ok(created.id)
    }

    async fn focus_window(&self, window: WindowId) -> Result<(), HostError> {
        let _: Value = self.call(HOST_WINDOWS_FOCUS, json!({ "windowId": window })).await?;
        Ok(())
    }
}
