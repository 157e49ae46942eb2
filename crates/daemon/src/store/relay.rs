// Document store backed by a `tably-relay` server.
//
// Point reads and merge writes go over HTTP; subscriptions use the relay's
// WebSocket feed, which sends a snapshot frame followed by one frame per
// committed revision. A dropped feed is reconnected with exponential
// backoff for as long as the subscriber is alive; the fresh snapshot frame
// brings the subscriber back up to date.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tably_common::protocol::ws::StoreMessage;
use tably_common::types::{StatePatch, Workspace, WorkspaceCode, WorkspaceState};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use super::{DocumentStore, StoreError, Subscription, SUBSCRIPTION_BUFFER};

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Backoff between feed reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay: Duration::from_millis(250), max_delay: Duration::from_secs(30) }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exp = failures.min(7);
        self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedEnd {
    Dropped,
    SubscriberGone,
}

pub struct RelayDocumentStore {
    client: Client,
    base_url: Url,
    connect_timeout: Duration,
    reconnect: ReconnectPolicy,
}

impl RelayDocumentStore {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, StoreError> {
        let mut base_url = validate_relay_url(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| StoreError::Unreachable(format!("failed to build http client: {e}")))?;
        Ok(Self { client, base_url, connect_timeout, reconnect: ReconnectPolicy::default() })
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.base_url.join(path).map_err(|e| StoreError::InvalidUrl(format!("{path}: {e}")))
    }

    fn workspace_url(&self, code: &WorkspaceCode) -> Result<Url, StoreError> {
        self.endpoint(&format!("v1/workspaces/{code}"))
    }

    fn state_url(&self, code: &WorkspaceCode) -> Result<Url, StoreError> {
        self.endpoint(&format!("v1/workspaces/{code}/state"))
    }

    fn subscribe_url(&self, code: &WorkspaceCode) -> Result<Url, StoreError> {
        let mut url = self.endpoint(&format!("v1/workspaces/{code}/state/subscribe"))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| StoreError::InvalidUrl(format!("cannot use {scheme} for {url}")))?;
        Ok(url)
    }
}

#[async_trait]
impl DocumentStore for RelayDocumentStore {
    fn backend_name(&self) -> &'static str {
        "relay"
    }

    async fn get_workspace(&self, code: &WorkspaceCode) -> Result<Option<Workspace>, StoreError> {
        let response = self.client.get(self.workspace_url(code)?).send().await.map_err(unreachable)?;
        read_optional(response).await
    }

    async fn put_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.workspace_url(&workspace.code)?)
            .json(workspace)
            .send()
            .await
            .map_err(unreachable)?;
        ensure_success(response).await.map(|_| ())
    }

    async fn get_state(&self, code: &WorkspaceCode) -> Result<Option<WorkspaceState>, StoreError> {
        let response = self.client.get(self.state_url(code)?).send().await.map_err(unreachable)?;
        read_optional(response).await
    }

    async fn merge_state(
        &self,
        code: &WorkspaceCode,
        patch: StatePatch,
    ) -> Result<WorkspaceState, StoreError> {
        let response = self
            .client
            .patch(self.state_url(code)?)
            .json(&patch)
            .send()
            .await
            .map_err(unreachable)?;
        let response = ensure_success(response).await?;
        decode(response).await
    }

    async fn subscribe(&self, code: &WorkspaceCode) -> Result<Subscription, StoreError> {
        let url = self.subscribe_url(code)?;
        let connect_timeout = self.connect_timeout;
        let policy = self.reconnect;
        let mut stream = connect_feed(&url, connect_timeout).await?;
        info!(workspace = %code, "subscribed to relay state feed");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let workspace = code.clone();
        let pump = tokio::spawn(async move {
            loop {
                if run_feed(stream, &tx, &workspace).await == FeedEnd::SubscriberGone {
                    return;
                }

                let mut failures = 0u32;
                stream = loop {
                    tokio::select! {
                        _ = tx.closed() => return,
                        _ = tokio::time::sleep(policy.delay_after(failures)) => {}
                    }
                    match connect_feed(&url, connect_timeout).await {
                        Ok(stream) => {
                            info!(
                                workspace = %workspace,
                                attempts = failures + 1,
                                "reconnected to relay state feed"
                            );
                            break stream;
                        }
                        Err(error) => {
                            failures = failures.saturating_add(1);
                            warn!(
                                workspace = %workspace,
                                %error,
                                retry_in_ms = policy.delay_after(failures).as_millis() as u64,
                                "relay feed reconnect failed"
                            );
                        }
                    }
                };
            }
        });

        Ok(Subscription::new(rx, pump))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.endpoint("healthz")?).send().await.map_err(unreachable)?;
        ensure_success(response).await.map(|_| ())
    }
}

async fn connect_feed(url: &Url, connect_timeout: Duration) -> Result<FeedStream, StoreError> {
    let (stream, _) = tokio::time::timeout(connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| StoreError::Unreachable(format!("subscription to {url} timed out")))?
        .map_err(|e| StoreError::Unreachable(format!("subscription to {url} failed: {e}")))?;
    Ok(stream)
}

/// Forward documents from one feed connection until it ends.
async fn run_feed(
    stream: FeedStream,
    tx: &mpsc::Sender<WorkspaceState>,
    workspace: &WorkspaceCode,
) -> FeedEnd {
    let (mut write, mut read) = stream.split();
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<StoreMessage>(&text) {
                Ok(StoreMessage::Snapshot { state: None, .. }) => {}
                Ok(StoreMessage::Snapshot { state: Some(state), .. })
                | Ok(StoreMessage::Revision { state, .. }) => {
                    if tx.send(state).await.is_err() {
                        return FeedEnd::SubscriberGone;
                    }
                }
                Ok(StoreMessage::Error { code, message, .. }) => {
                    warn!(workspace = %workspace, %code, %message, "relay closed feed with error");
                    break;
                }
                Err(error) => {
                    warn!(workspace = %workspace, %error, "ignoring malformed feed frame");
                }
            },
            Ok(WsMessage::Ping(data)) => {
                if let Err(error) = write.send(WsMessage::Pong(data)).await {
                    debug!(workspace = %workspace, %error, "failed to answer ping");
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                warn!(workspace = %workspace, %error, "relay feed failed");
                break;
            }
        }
    }
    debug!(workspace = %workspace, "relay feed dropped");
    FeedEnd::Dropped
}

fn unreachable(error: reqwest::Error) -> StoreError {
    StoreError::Unreachable(error.to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected { status: status.as_u16(), message })
}

async fn read_optional<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>, StoreError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response = ensure_success(response).await?;
    decode(response).await.map(Some)
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
    let body = response.bytes().await.map_err(unreachable)?;
    serde_json::from_slice(&body).map_err(|e| StoreError::Decode(e.to_string()))
}

/// `https`, or `http` when pointed at this machine.
pub fn validate_relay_url(value: &str) -> Result<Url, StoreError> {
    let parsed = Url::parse(value)
        .map_err(|error| StoreError::InvalidUrl(format!("`{value}`: {error}")))?;
    match parsed.scheme() {
        "https" => Ok(parsed),
        "http" if is_loopback_host(parsed.host_str()) => Ok(parsed),
        _ => Err(StoreError::InvalidUrl(
            "store_url must use https (http is allowed only for localhost testing)".into(),
        )),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|addr| addr.is_loopback())
}
