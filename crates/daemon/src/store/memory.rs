// In-process document store with per-document total order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tably_common::types::{StatePatch, Workspace, WorkspaceCode, WorkspaceState};
use tokio::sync::{broadcast, mpsc};

use super::{DocumentStore, StoreError, Subscription, SUBSCRIPTION_BUFFER};

const FANOUT_CAPACITY: usize = 64;

struct Entry {
    workspace: Option<Workspace>,
    state: Option<WorkspaceState>,
    revision: u64,
    fanout: broadcast::Sender<WorkspaceState>,
}

impl Entry {
    fn new() -> Self {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        Self { workspace: None, state: None, revision: 0, fanout }
    }
}

/// Shared-nothing stand-in for the relay. Clones share the same documents,
/// so two sync services built on clones behave like two machines on one
/// backend.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    entries: Arc<Mutex<HashMap<WorkspaceCode, Entry>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unreachable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of committed state writes for `code`.
    pub fn revision(&self, code: &WorkspaceCode) -> u64 {
        self.lock().get(code).map_or(0, |entry| entry.revision)
    }

    /// Current state document without going through the async trait.
    pub fn snapshot(&self, code: &WorkspaceCode) -> Option<WorkspaceState> {
        self.lock().get(code).and_then(|entry| entry.state.clone())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkspaceCode, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get_workspace(&self, code: &WorkspaceCode) -> Result<Option<Workspace>, StoreError> {
        self.check_online()?;
        Ok(self.lock().get(code).and_then(|entry| entry.workspace.clone()))
    }

    async fn put_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        self.check_online()?;
        self.lock().entry(workspace.code.clone()).or_insert_with(Entry::new).workspace =
            Some(workspace.clone());
        Ok(())
    }

    async fn get_state(&self, code: &WorkspaceCode) -> Result<Option<WorkspaceState>, StoreError> {
        self.check_online()?;
        Ok(self.snapshot(code))
    }

    async fn merge_state(
        &self,
        code: &WorkspaceCode,
        patch: StatePatch,
    ) -> Result<WorkspaceState, StoreError> {
        self.check_online()?;
        let mut entries = self.lock();
        let entry = entries.entry(code.clone()).or_insert_with(Entry::new);

        let mut state = entry.state.take().unwrap_or_default();
        patch.apply_to(&mut state);
        entry.state = Some(state.clone());
        entry.revision += 1;
        // No receivers is fine: nobody is subscribed yet.
        let _ = entry.fanout.send(state.clone());
        Ok(state)
    }

    async fn subscribe(&self, code: &WorkspaceCode) -> Result<Subscription, StoreError> {
        self.check_online()?;
        let (mut feed, current) = {
            let mut entries = self.lock();
            let entry = entries.entry(code.clone()).or_insert_with(Entry::new);
            (entry.fanout.subscribe(), entry.state.clone())
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let workspace = code.clone();
        let pump = tokio::spawn(async move {
            if let Some(state) = current {
                if tx.send(state).await.is_err() {
                    return;
                }
            }
            loop {
                match feed.recv().await {
                    Ok(state) => {
                        if tx.send(state).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Documents are whole, so the next one supersedes what was missed.
                        tracing::warn!(workspace = %workspace, skipped, "subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(Subscription::new(rx, pump))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tably_common::identity::SyncIdentity;
    use tably_common::types::{TabRecord, WriterId};

    use super::*;

    fn code() -> WorkspaceCode {
        WorkspaceCode::parse("AB12C9").unwrap()
    }

    fn record(url: &str) -> TabRecord {
        TabRecord {
            sync_id: SyncIdentity::derive(Some(url), Some("t"), false),
            url: url.into(),
            title: "t".into(),
            fav_icon_url: String::new(),
            pinned: false,
            index: 0,
            group_id: None,
            updated_by: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn missing_state_reads_as_none() {
        let store = MemoryDocumentStore::new();
        assert_eq!(store.get_state(&code()).await.unwrap(), None);
        assert_eq!(store.get_workspace(&code()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn merge_overwrites_present_fields_only() {
        let store = MemoryDocumentStore::new();
        let writer = WriterId::new("user_1_a");
        store
            .merge_state(&code(), StatePatch::replace_tabs(vec![record("https://a.test")], &writer, 10))
            .await
            .unwrap();

        let patch = StatePatch { last_update: Some(20), ..StatePatch::default() };
        let merged = store.merge_state(&code(), patch).await.unwrap();

        assert_eq!(merged.tabs.len(), 1);
        assert_eq!(merged.last_update, 20);
        assert_eq!(merged.updated_by, Some(writer));
        assert_eq!(store.revision(&code()), 2);
    }

    #[tokio::test]
    async fn subscription_sees_current_then_later_revisions_in_order() {
        let store = MemoryDocumentStore::new();
        let writer = WriterId::new("user_1_a");
        store.merge_state(&code(), StatePatch::replace_tabs(vec![], &writer, 1)).await.unwrap();

        let mut sub = store.subscribe(&code()).await.unwrap();
        for stamp in 2..=4 {
            store.merge_state(&code(), StatePatch::replace_tabs(vec![], &writer, stamp)).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            let state = tokio::time::timeout(Duration::from_secs(1), sub.next())
                .await
                .expect("document should arrive")
                .expect("feed should be open");
            seen.push(state.last_update);
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn subscription_on_missing_document_waits_for_first_write() {
        let store = MemoryDocumentStore::new();
        let mut sub = store.subscribe(&code()).await.unwrap();

        let writer = WriterId::new("user_1_a");
        store.merge_state(&code(), StatePatch::replace_tabs(vec![], &writer, 9)).await.unwrap();

        let state = tokio::time::timeout(Duration::from_secs(1), sub.next()).await.unwrap().unwrap();
        assert_eq!(state.last_update, 9);
    }

    #[tokio::test]
    async fn clones_share_documents() {
        let store = MemoryDocumentStore::new();
        let other = store.clone();
        let workspace = Workspace::new(code(), "Research", WriterId::new("user_1_a"));
        store.put_workspace(&workspace).await.unwrap();

        assert_eq!(other.get_workspace(&code()).await.unwrap(), Some(workspace));
    }

    #[tokio::test]
    async fn offline_store_is_unreachable() {
        let store = MemoryDocumentStore::new();
        store.set_offline(true);
        assert!(matches!(store.ping().await, Err(StoreError::Unreachable(_))));
        assert!(matches!(store.get_state(&code()).await, Err(StoreError::Unreachable(_))));

        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}
