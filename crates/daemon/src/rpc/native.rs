use std::sync::Arc;

use anyhow::{Context, Result};
use tably_common::protocol::jsonrpc::{Frame, Response, RpcError, INTERNAL_ERROR};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::host::native::{encode_frame, read_frame, write_frame, FrameError, NativeHost};
use crate::rpc::methods::{handle_raw_request, RpcServerState};

/// Inbound requests waiting for the dispatcher.
const REQUEST_QUEUE: usize = 256;

/// Serve the extension over a native-messaging pipe.
///
/// Requests from the extension are dispatched one at a time, in arrival
/// order, so tab events are handled in the order the browser fired them.
/// Responses from the extension complete calls made through `host`. Every
/// frame written to the pipe, ours or the host's, goes through `outbound`.
///
/// Returns when the extension closes its end.
pub async fn serve_native<R, W>(
    mut reader: R,
    writer: W,
    state: RpcServerState,
    host: Arc<NativeHost>,
    outbound_tx: mpsc::Sender<Frame>,
    outbound_rx: mpsc::Receiver<Frame>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer_task = tokio::spawn(drain_outbound(writer, outbound_rx));

    let (request_tx, request_rx) = mpsc::channel::<Vec<u8>>(REQUEST_QUEUE);
    let dispatcher = tokio::spawn(dispatch_inbound(request_rx, state, outbound_tx));

    let result = loop {
        let payload = match read_frame(&mut reader).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                info!("extension closed the native messaging pipe");
                break Ok(());
            }
            Err(error) => break Err(error).context("failed to read native messaging frame"),
        };

        match serde_json::from_slice::<Frame>(&payload) {
            Ok(Frame::Response(response)) => {
                let id = response.id.clone();
                if !host.resolve(response) {
                    debug!(?id, "dropping response nobody is waiting for");
                }
            }
            // Requests and garbage both go to the dispatcher, which answers
            // malformed input with the proper JSON-RPC error.
            Ok(Frame::Request(_)) | Err(_) => {
                if request_tx.send(payload).await.is_err() {
                    break Ok(());
                }
            }
        }
    };

    host.disconnect();
    dispatcher.abort();
    writer_task.abort();
    result
}

async fn dispatch_inbound(
    mut requests: mpsc::Receiver<Vec<u8>>,
    state: RpcServerState,
    outbound: mpsc::Sender<Frame>,
) {
    while let Some(raw) = requests.recv().await {
        let response = handle_raw_request(&raw, &state).await;
        if outbound.send(Frame::Response(response)).await.is_err() {
            return;
        }
    }
}

async fn drain_outbound<W>(mut writer: W, mut frames: mpsc::Receiver<Frame>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let payload = match encode_frame(&frame) {
            Ok(payload) => payload,
            Err(error) => match replacement_for(&frame, &error) {
                Some(payload) => payload,
                None => {
                    warn!(%error, "dropping unsendable native messaging frame");
                    continue;
                }
            },
        };
        if let Err(error) = write_frame(&mut writer, &payload).await {
            warn!(%error, "native messaging pipe is no longer writable");
            return;
        }
    }
}

/// An oversized or unserializable response still owes the caller an answer.
fn replacement_for(frame: &Frame, error: &FrameError) -> Option<Vec<u8>> {
    let Frame::Response(response) = frame else {
        return None;
    };
    let replacement = Response::error(
        response.id.clone(),
        RpcError { code: INTERNAL_ERROR, message: error.to_string(), data: None },
    );
    encode_frame(&Frame::Response(replacement)).ok()
}
