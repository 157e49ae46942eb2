// State subscription feed over WebSocket (tably-store.v1).
//
// Only workspaces the relay knows can be subscribed; anything else is a 404
// before the upgrade. The first frame is a snapshot of the current document,
// `null` state if none exists yet. Every later commit is sent as one revision frame, in
// commit order. The socket is write-only from the server's side; client
// text frames are ignored.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use tably_common::{protocol::ws::StoreMessage, types::WorkspaceCode};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::{
    api::parse_code,
    error::{
        current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
        RelayError,
    },
    store::{StateFeed, WorkspaceStore},
};

const MAX_FRAME_BYTES: usize = 256 * 1024;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn router(store: Arc<WorkspaceStore>) -> Router {
    Router::new()
        .route("/v1/workspaces/{code}/state/subscribe", get(ws_upgrade))
        .with_state(store)
}

pub async fn ws_upgrade(
    Path(raw_code): Path<String>,
    State(store): State<Arc<WorkspaceStore>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let code = match parse_code(&raw_code) {
        Ok(code) => code,
        Err(error) => return error.into_response(),
    };

    let Some(feed) = store.subscribe(&code).await else {
        return RelayError::new(ErrorCode::NotFound, format!("workspace {code} not found"))
            .into_response();
    };

    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handle_socket(socket, code, feed)).await;
        })
        .into_response()
}

async fn handle_socket(mut socket: WebSocket, code: WorkspaceCode, feed: StateFeed) {
    let request_id = current_request_id().unwrap_or_default();
    let StateFeed { revision, state, mut commits } = feed;
    info!(workspace = %code, revision, request_id = %request_id, "state subscriber connected");

    let snapshot = StoreMessage::Snapshot { workspace_id: code.clone(), revision, state };
    if send_ws_message(&mut socket, &snapshot).await.is_err() {
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.reset(); // skip immediate first tick

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            commit = commits.recv() => {
                match commit {
                    Ok(commit) => {
                        let message = StoreMessage::Revision {
                            workspace_id: code.clone(),
                            revision: commit.revision,
                            state: commit.state,
                        };
                        if send_ws_message(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Documents are whole, so the next commit supersedes the skipped ones.
                        warn!(workspace = %code, skipped, "state subscriber lagged");
                    }
                    Err(RecvError::Closed) => {
                        let closing = StoreMessage::Error {
                            code: "FEED_CLOSED".into(),
                            message: "state feed closed".into(),
                            retryable: true,
                        };
                        let _ = send_ws_message(&mut socket, &closing).await;
                        break;
                    }
                }
            }
            maybe_message = socket.recv() => {
                match maybe_message {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => debug!(workspace = %code, "ignoring client frame"),
                }
            }
        }
    }

    info!(workspace = %code, request_id = %request_id, "state subscriber disconnected");
}

async fn send_ws_message(socket: &mut WebSocket, message: &StoreMessage) -> Result<(), ()> {
    let encoded = serde_json::to_string(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tably_common::types::{StatePatch, Workspace, WriterId};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    use super::*;

    async fn serve(store: Arc<WorkspaceStore>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(store)).await;
        });
        format!("ws://{addr}/v1/workspaces")
    }

    async fn next_store_message<S>(stream: &mut S) -> StoreMessage
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("frame should arrive")
                .expect("stream should stay open")
                .expect("frame should be valid");
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).expect("frame should be a store message");
            }
        }
    }

    fn code() -> WorkspaceCode {
        WorkspaceCode::parse("AB12C9").unwrap()
    }

    #[tokio::test]
    async fn first_frame_is_null_snapshot_for_unwritten_state() {
        let store = Arc::new(WorkspaceStore::new());
        store.put_workspace(Workspace::new(code(), "Research", WriterId::new("w"))).await;
        let base = serve(store).await;

        let (mut stream, _) = connect_async(format!("{base}/AB12C9/state/subscribe"))
            .await
            .expect("websocket should connect");

        assert_eq!(
            next_store_message(&mut stream).await,
            StoreMessage::Snapshot { workspace_id: code(), revision: 0, state: None }
        );
        stream.close(None).await.ok();
    }

    #[tokio::test]
    async fn commits_follow_the_snapshot_in_order() {
        let store = Arc::new(WorkspaceStore::new());
        let writer = WriterId::new("user_1_aaaaaaaaa");
        store.merge_state(&code(), StatePatch::replace_tabs(Vec::new(), &writer, 1)).await;
        let base = serve(store.clone()).await;

        let (mut stream, _) = connect_async(format!("{base}/ab12c9/state/subscribe"))
            .await
            .expect("websocket should connect");

        let StoreMessage::Snapshot { revision, state, .. } = next_store_message(&mut stream).await
        else {
            panic!("expected snapshot first");
        };
        assert_eq!(revision, 1);
        assert_eq!(state.map(|s| s.last_update), Some(1));

        store.merge_state(&code(), StatePatch::replace_tabs(Vec::new(), &writer, 2)).await;
        store.merge_state(&code(), StatePatch::replace_tabs(Vec::new(), &writer, 3)).await;

        for expected in [2, 3] {
            let StoreMessage::Revision { revision, state, .. } =
                next_store_message(&mut stream).await
            else {
                panic!("expected revision frame");
            };
            assert_eq!(revision, expected);
            assert_eq!(state.last_update, expected as i64);
        }
        stream.close(None).await.ok();
    }

    #[tokio::test]
    async fn client_frames_are_ignored() {
        let store = Arc::new(WorkspaceStore::new());
        store.put_workspace(Workspace::new(code(), "Research", WriterId::new("w"))).await;
        let base = serve(store.clone()).await;

        let (mut stream, _) = connect_async(format!("{base}/AB12C9/state/subscribe"))
            .await
            .expect("websocket should connect");
        next_store_message(&mut stream).await;

        stream.send(WsMessage::Text("hello".into())).await.expect("send should succeed");
        store
            .merge_state(&code(), StatePatch::replace_tabs(Vec::new(), &WriterId::new("w"), 9))
            .await;

        assert!(matches!(
            next_store_message(&mut stream).await,
            StoreMessage::Revision { revision: 1, .. }
        ));
    }

    #[tokio::test]
    async fn unknown_workspace_is_refused_before_upgrade() {
        let store = Arc::new(WorkspaceStore::new());
        let base = serve(store.clone()).await;

        let error = connect_async(format!("{base}/ZZ99ZZ/state/subscribe"))
            .await
            .expect_err("upgrade should be refused");
        let tokio_tungstenite::tungstenite::Error::Http(response) = error else {
            panic!("expected an http error, got {error:?}");
        };
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
        assert!(store.subscribe(&WorkspaceCode::parse("ZZ99ZZ").unwrap()).await.is_none());
    }
}
