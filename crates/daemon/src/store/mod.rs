// Remote workspace documents and local persistence.
//
// `DocumentStore` is the seam to the shared backend: point reads, top-level
// merge writes and a push subscription delivering full documents.

pub mod memory;
pub mod meta_db;
pub mod relay;

use async_trait::async_trait;
use tably_common::types::{StatePatch, Workspace, WorkspaceCode, WorkspaceState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use memory::MemoryDocumentStore;
pub use relay::RelayDocumentStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid store payload: {0}")]
    Decode(String),
    #[error("invalid store url: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short label for logs and status output.
    fn backend_name(&self) -> &'static str;

    async fn get_workspace(&self, code: &WorkspaceCode) -> Result<Option<Workspace>, StoreError>;

    async fn put_workspace(&self, workspace: &Workspace) -> Result<(), StoreError>;

    /// `Ok(None)` when the document does not exist yet.
    async fn get_state(&self, code: &WorkspaceCode) -> Result<Option<WorkspaceState>, StoreError>;

    /// Top-level merge. Fields present in `patch` overwrite, `tabs` replaces
    /// the whole list. Returns the document as committed.
    async fn merge_state(
        &self,
        code: &WorkspaceCode,
        patch: StatePatch,
    ) -> Result<WorkspaceState, StoreError>;

    /// Every revision committed after this call is delivered in commit
    /// order. The current document, if any, is delivered first.
    async fn subscribe(&self, code: &WorkspaceCode) -> Result<Subscription, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Push stream of full state documents. Dropping it stops the feed.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<WorkspaceState>,
    pump: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<WorkspaceState>, pump: JoinHandle<()>) -> Self {
        Self { rx, pump }
    }

    /// Next document, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<WorkspaceState> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Channel depth between a feed's pump task and its consumer.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 64;
