// Reconciles a window against a remote workspace document.
//
// Planning is pure: diff the remote tab list against the qualifying local
// tabs and produce create/update/remove operations. Applying a plan drives
// the host and marks every call as an expected echo so the detector does not
// publish it back. Reconciliation itself never publishes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tably_common::identity::SyncIdentity;
use tably_common::types::{
    BrowserTab, TabId, TabRecord, WindowId, WorkspaceCode, WorkspaceState, WriterId,
};
use tably_common::url_policy::{is_syncable, is_syncable_tab};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::detector::ChangeDetector;
use crate::host::{CreateTab, HostError, TabHost, TabUpdate};
use crate::store::Subscription;

// ── Planning ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCreate {
    pub sync_id: SyncIdentity,
    pub url: String,
    pub title: String,
    pub pinned: bool,
    /// `None` opens the tab at the end of the window.
    pub index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpdate {
    pub tab: TabId,
    pub sync_id: SyncIdentity,
    pub update: TabUpdate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub create: Vec<PlannedCreate>,
    pub update: Vec<PlannedUpdate>,
    pub remove: Vec<TabId>,
    /// Local tabs matched to a remote record by URL alone; no host call needed.
    pub pairs: Vec<(TabId, SyncIdentity)>,
}

impl ReconcilePlan {
    /// True when applying the plan would not touch the browser.
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

/// Diff `remote` against the tabs of one local window.
///
/// `local` is the full window; tabs that do not qualify for sync are left
/// alone. Duplicate remote records collapse onto one local tab.
pub fn plan_reconciliation(remote: &WorkspaceState, local: &[BrowserTab]) -> ReconcilePlan {
    let qualifying: Vec<(&BrowserTab, SyncIdentity)> =
        local.iter().filter(|tab| is_syncable_tab(tab)).map(|tab| (tab, tab.identity())).collect();
    let remote_ids: HashSet<&SyncIdentity> = remote.tabs.iter().map(|record| &record.sync_id).collect();

    let mut by_identity: HashMap<&SyncIdentity, &BrowserTab> = HashMap::new();
    for (tab, identity) in &qualifying {
        by_identity.entry(identity).or_insert(*tab);
    }
    // Local tabs with no remote counterpart, candidates for pairing or removal.
    let mut unmatched: Vec<&BrowserTab> = qualifying
        .iter()
        .filter(|(_, identity)| !remote_ids.contains(identity))
        .map(|(tab, _)| *tab)
        .collect();

    let mut records: Vec<&TabRecord> = remote.tabs.iter().collect();
    records.sort_by_key(|record| record.index);

    let mut plan = ReconcilePlan::default();
    let mut seen: HashSet<&SyncIdentity> = HashSet::new();
    for record in records {
        if !is_syncable(Some(&record.url)) || !seen.insert(&record.sync_id) {
            continue;
        }

        if let Some(tab) = by_identity.get(&record.sync_id) {
            let update = TabUpdate {
                url: (tab.url.as_deref() != Some(record.url.as_str())).then(|| record.url.clone()),
                pinned: (tab.pinned != record.pinned).then_some(record.pinned),
            };
            if !update.is_empty() {
                plan.update.push(PlannedUpdate { tab: tab.id, sync_id: record.sync_id.clone(), update });
            }
            continue;
        }

        let partner = unmatched
            .iter()
            .position(|tab| tab.url.as_deref() == Some(record.url.as_str()) && tab.pinned == record.pinned);
        if let Some(position) = partner {
            let tab = unmatched.remove(position);
            plan.pairs.push((tab.id, record.sync_id.clone()));
            continue;
        }

        let in_range = record.index as usize <= local.len();
        plan.create.push(PlannedCreate {
            sync_id: record.sync_id.clone(),
            url: record.url.clone(),
            title: record.title.clone(),
            pinned: record.pinned,
            index: in_range.then_some(record.index),
        });
    }

    plan.remove = unmatched.into_iter().filter(|tab| !tab.pinned).map(|tab| tab.id).collect();
    plan
}

// ── Applying ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub paired: usize,
    pub failed: usize,
}

impl ReconcileReport {
    pub fn applied(&self) -> usize {
        self.created + self.updated + self.removed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteUpdateOutcome {
    /// The document was written by this process.
    OwnWrite,
    /// Same tab list as the last pass applied to this window.
    AlreadyApplied,
    Reconciled(ReconcileReport),
}

pub struct InboundSync {
    host: Arc<dyn TabHost>,
    detector: Arc<Mutex<ChangeDetector>>,
    writer: WriterId,
    last_applied: Mutex<HashMap<WindowId, Vec<TabRecord>>>,
    window_locks: Mutex<HashMap<WindowId, Arc<tokio::sync::Mutex<()>>>>,
}

impl InboundSync {
    pub fn new(host: Arc<dyn TabHost>, detector: Arc<Mutex<ChangeDetector>>, writer: WriterId) -> Self {
        Self {
            host,
            detector,
            writer,
            last_applied: Mutex::new(HashMap::new()),
            window_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Entry point for documents arriving on a subscription.
    pub async fn on_remote_update(
        &self,
        code: &WorkspaceCode,
        window: WindowId,
        remote: &WorkspaceState,
    ) -> Result<RemoteUpdateOutcome, HostError> {
        if remote.updated_by.as_ref() == Some(&self.writer) {
            debug!(workspace = %code, window = window.0, "skipping own write");
            return Ok(RemoteUpdateOutcome::OwnWrite);
        }
        let unchanged = lock(&self.last_applied).get(&window).is_some_and(|tabs| *tabs == remote.tabs);
        if unchanged {
            debug!(workspace = %code, window = window.0, "remote tab list already applied");
            return Ok(RemoteUpdateOutcome::AlreadyApplied);
        }
        self.reconcile(code, window, remote).await.map(RemoteUpdateOutcome::Reconciled)
    }

    /// Bring `window` in line with `remote`. Only a failed local snapshot is
    /// an error; individual tab operations are logged and skipped.
    pub async fn reconcile(
        &self,
        code: &WorkspaceCode,
        window: WindowId,
        remote: &WorkspaceState,
    ) -> Result<ReconcileReport, HostError> {
        let gate = self.window_lock(window);
        let _serialized = gate.lock().await;

        let local = self.host.query_tabs(window).await?;
        let plan = plan_reconciliation(remote, &local);
        let mut report = ReconcileReport { paired: plan.pairs.len(), ..ReconcileReport::default() };
        {
            let mut detector = lock(&self.detector);
            detector.seed(&local);
            for (tab, identity) in &plan.pairs {
                detector.adopt(*tab, identity.clone());
            }
        }

        for create in plan.create {
            lock(&self.detector).expect_opening(window, &create.url);
            let request = CreateTab {
                window_id: window,
                url: create.url.clone(),
                pinned: create.pinned,
                index: create.index,
                active: false,
            };
            match self.host.create_tab(request).await {
                Ok(tab) => {
                    let mut detector = lock(&self.detector);
                    detector.expect_tab(tab.id);
                    detector.adopt(tab.id, create.sync_id);
                    report.created += 1;
                }
                Err(error) => {
                    warn!(workspace = %code, window = window.0, url = %create.url, %error, "failed to open remote tab");
                    report.failed += 1;
                }
            }
        }

        for planned in plan.update {
            lock(&self.detector).expect_tab(planned.tab);
            match self.host.update_tab(planned.tab, planned.update).await {
                Ok(_) => {
                    lock(&self.detector).adopt(planned.tab, planned.sync_id);
                    report.updated += 1;
                }
                Err(error) => {
                    warn!(workspace = %code, window = window.0, tab = planned.tab.0, %error, "failed to update tab");
                    report.failed += 1;
                }
            }
        }

        for tab in plan.remove {
            lock(&self.detector).expect_tab(tab);
            match self.host.remove_tab(tab).await {
                Ok(()) => {
                    lock(&self.detector).forget(tab);
                    report.removed += 1;
                }
                Err(error) => {
                    warn!(workspace = %code, window = window.0, tab = tab.0, %error, "failed to close tab");
                    report.failed += 1;
                }
            }
        }

        lock(&self.last_applied).insert(window, remote.tabs.clone());
        if report.applied() > 0 || report.failed > 0 {
            info!(
                workspace = %code,
                window = window.0,
                created = report.created,
                updated = report.updated,
                removed = report.removed,
                failed = report.failed,
                "reconciled window"
            );
        }
        Ok(report)
    }

    /// Drop per-window state once a window leaves its workspace.
    pub fn forget_window(&self, window: WindowId) {
        lock(&self.last_applied).remove(&window);
        lock(&self.window_locks).remove(&window);
    }

    fn window_lock(&self, window: WindowId) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.window_locks).entry(window).or_default().clone()
    }
}

/// Wait for the next document and keep absorbing newer ones until the
/// subscription has been quiet for `quiet`. Returns `None` once the
/// subscription ends.
pub async fn next_settled(subscription: &mut Subscription, quiet: Duration) -> Option<WorkspaceState> {
    let mut latest = subscription.next().await?;
    loop {
        match tokio::time::timeout_at(Instant::now() + quiet, subscription.next()).await {
            Ok(Some(newer)) => latest = newer,
            Ok(None) | Err(_) => return Some(latest),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
