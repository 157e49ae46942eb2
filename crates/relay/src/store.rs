// Workspace documents held by the relay.
//
// Every workspace has two documents: the metadata document and the state
// document. State writes are serialized per store, numbered, and fanned out
// to subscribers in commit order.

use std::collections::HashMap;

use tably_common::types::{StatePatch, Workspace, WorkspaceCode, WorkspaceState};
use tokio::sync::{broadcast, RwLock};

const FEED_CAPACITY: usize = 128;

/// A state document as of one committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedState {
    pub revision: u64,
    pub state: WorkspaceState,
}

/// What a new subscriber starts from, plus the feed of later commits.
pub struct StateFeed {
    pub revision: u64,
    pub state: Option<WorkspaceState>,
    pub commits: broadcast::Receiver<CommittedState>,
}

struct Entry {
    workspace: Option<Workspace>,
    state: Option<WorkspaceState>,
    revision: u64,
    feed: broadcast::Sender<CommittedState>,
}

impl Entry {
    fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self { workspace: None, state: None, revision: 0, feed }
    }
}

#[derive(Default)]
pub struct WorkspaceStore {
    entries: RwLock<HashMap<WorkspaceCode, Entry>>,
}

impl WorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_workspace(&self, workspace: Workspace) {
        let mut entries = self.entries.write().await;
        let code = workspace.code.clone();
        entries.entry(code).or_insert_with(Entry::new).workspace = Some(workspace);
    }

    pub async fn workspace(&self, code: &WorkspaceCode) -> Option<Workspace> {
        self.entries.read().await.get(code).and_then(|entry| entry.workspace.clone())
    }

    pub async fn state(&self, code: &WorkspaceCode) -> Option<CommittedState> {
        let entries = self.entries.read().await;
        let entry = entries.get(code)?;
        entry
            .state
            .clone()
            .map(|state| CommittedState { revision: entry.revision, state })
    }

    /// Apply a top-level merge-write. The state document is created on first
    /// write.
    pub async fn merge_state(&self, code: &WorkspaceCode, patch: StatePatch) -> CommittedState {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(code.clone()).or_insert_with(Entry::new);

        let mut state = entry.state.take().unwrap_or_default();
        patch.apply_to(&mut state);
        entry.state = Some(state.clone());
        entry.revision += 1;

        let committed = CommittedState { revision: entry.revision, state };
        // Send fails only when nobody is subscribed.
        let _ = entry.feed.send(committed.clone());
        committed
    }

    /// Subscribe to a workspace that has at least one document. The read
    /// lock keeps commits out between the starting point and the first feed
    /// item. Unknown workspaces return `None` and leave the map untouched.
    pub async fn subscribe(&self, code: &WorkspaceCode) -> Option<StateFeed> {
        let entries = self.entries.read().await;
        let entry = entries.get(code)?;
        Some(StateFeed {
            revision: entry.revision,
            state: entry.state.clone(),
            commits: entry.feed.subscribe(),
        })
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
