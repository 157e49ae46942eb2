// Publishes local tab changes into the workspace state document.
//
// Every publish is a whole-document read-modify-write: read the tab list,
// fold the change in, then merge-write the full list stamped with this
// writer. Concurrent writers resolve by last-writer-wins.

use std::fmt;
use std::sync::Arc;

use tably_common::types::{BrowserTab, StatePatch, TabRecord, WindowId, WorkspaceCode, WriterId};
use tably_common::url_policy::is_syncable_tab;
use tracing::{debug, info, warn};

use super::detector::{ChangeEvent, IgnoreReason};
use super::now_millis;
use crate::host::TabHost;
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotBound,
    Initializing,
    Ignored(IgnoreReason),
    /// Parked by the throttle; published later.
    Deferred,
    /// The fold left the document as it was.
    Unchanged,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotBound => f.write_str("window is not part of a workspace"),
            Self::Initializing => f.write_str("window is initializing"),
            Self::Ignored(reason) => f.write_str(reason.as_str()),
            Self::Deferred => f.write_str("throttled, will publish shortly"),
            Self::Unchanged => f.write_str("no change to publish"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { tabs: usize },
    Skipped(SkipReason),
    Failed(String),
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Published { .. } => None,
            Self::Skipped(reason) => Some(reason.to_string()),
            Self::Failed(reason) => Some(reason.clone()),
        }
    }
}

pub struct OutboundSync {
    store: Arc<dyn DocumentStore>,
    host: Arc<dyn TabHost>,
    writer: WriterId,
}

impl OutboundSync {
    pub fn new(store: Arc<dyn DocumentStore>, host: Arc<dyn TabHost>, writer: WriterId) -> Self {
        Self { store, host, writer }
    }

    /// Fold `change` into the workspace document. Never fails the caller;
    /// problems are logged and reported in the outcome.
    pub async fn publish(&self, code: &WorkspaceCode, change: &ChangeEvent) -> PublishOutcome {
        let kind = change.kind().as_str();
        let now = now_millis();

        let tabs = match change {
            ChangeEvent::Reordered { window_id } => match self.local_snapshot(*window_id, now).await {
                Ok(tabs) => tabs,
                Err(reason) => {
                    warn!(workspace = %code, kind, error = %reason, "failed to snapshot window");
                    return PublishOutcome::Failed(reason);
                }
            },
            _ => {
                let current = match self.store.get_state(code).await {
                    Ok(state) => state.map(|state| state.tabs).unwrap_or_default(),
                    Err(error) => {
                        warn!(workspace = %code, kind, %error, "failed to read workspace state");
                        return PublishOutcome::Failed(error.to_string());
                    }
                };
                let folded = fold_change(current.clone(), change, &self.writer, now);
                if folded == current {
                    debug!(workspace = %code, kind, "change already reflected remotely");
                    return PublishOutcome::Skipped(SkipReason::Unchanged);
                }
                folded
            }
        };

        let count = tabs.len();
        match self.store.merge_state(code, StatePatch::replace_tabs(tabs, &self.writer, now)).await {
            Ok(_) => {
                info!(workspace = %code, kind, tabs = count, "published tab change");
                PublishOutcome::Published { tabs: count }
            }
            Err(error) => {
                warn!(workspace = %code, kind, %error, "failed to publish tab change");
                PublishOutcome::Failed(error.to_string())
            }
        }
    }

    async fn local_snapshot(&self, window: WindowId, now: i64) -> Result<Vec<TabRecord>, String> {
        let tabs = self.host.query_tabs(window).await.map_err(|e| e.to_string())?;
        Ok(snapshot_records(&tabs, &self.writer, now))
    }
}

/// Projection of the qualifying tabs of a window, in index order.
pub fn snapshot_records(
    tabs: &[BrowserTab],
    writer: &WriterId,
    now: i64,
) -> Vec<TabRecord> {
    let mut records: Vec<TabRecord> = tabs
        .iter()
        .filter(|tab| is_syncable_tab(tab))
        .map(|tab| tab.to_record(writer, now))
        .collect();
    records.sort_by_key(|record| record.index);
    records
}

/// Apply one change to a tab list.
///
/// `Reordered` leaves the list alone; its order comes from a fresh local
/// snapshot instead (see [`snapshot_records`]).
pub fn fold_change(
    mut tabs: Vec<TabRecord>,
    change: &ChangeEvent,
    writer: &WriterId,
    now: i64,
) -> Vec<TabRecord> {
    match change {
        ChangeEvent::Created { tab } => {
            let record = tab.to_record(writer, now);
            if tabs.iter().all(|existing| existing.sync_id != record.sync_id) {
                tabs.push(record);
            }
        }
        ChangeEvent::Updated { tab, previous, .. } => {
            let record = tab.to_record(writer, now);
            let at_current = tabs.iter().position(|r| r.sync_id == record.sync_id);
            let at_previous = previous
                .as_ref()
                .and_then(|previous| tabs.iter().position(|r| &r.sync_id == previous));
            match (at_current, at_previous) {
                (Some(current), Some(stale)) if current != stale => {
                    tabs[current] = record;
                    tabs.remove(stale);
                }
                (Some(position), _) | (None, Some(position)) => tabs[position] = record,
                (None, None) => tabs.push(record),
            }
        }
        ChangeEvent::Removed { identity, .. } => tabs.retain(|record| &record.sync_id != identity),
        ChangeEvent::Reordered { .. } => return tabs,
    }
    tabs.sort_by_key(|record| record.index);
    tabs
}
