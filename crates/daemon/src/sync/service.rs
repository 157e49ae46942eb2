// One sync engine per daemon: every RPC surface (extension, CLI, headless
// runtime) drives the same `SyncService`.
//
// Lock discipline: the registry, guard and detector sit behind std mutexes
// that are only ever held between awaits, never across one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tably_common::protocol::rpc_methods::{
    BindingList, Connectivity, ConnectivityStatus, HostTabEvent, LeftWorkspace, Membership,
    TabEventHandled, WindowBinding, WorkspaceOpened, WorkspaceStatus,
};
use tably_common::types::{
    BrowserTab, StatePatch, WindowId, Workspace, WorkspaceCode, WorkspaceState, WriterId,
};
use tably_common::url_policy::is_syncable_tab;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::detector::{ChangeDetector, ChangeEvent, Detection, IgnoreReason};
use super::guard::InitGuard;
use super::inbound::{next_settled, InboundSync, RemoteUpdateOutcome};
use super::outbound::{OutboundSync, PublishOutcome, SkipReason};
use super::registry::MembershipRegistry;
use super::{now_millis, SyncTuning};
use crate::host::{HostError, TabHost};
use crate::store::{DocumentStore, StoreError, Subscription};
use crate::timeout::{with_timeout, Elapsed};

/// Attempts at drawing a workspace code nobody uses yet.
const CODE_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Workspace not found. Create a workspace first.")]
    WorkspaceNotFound(WorkspaceCode),
    #[error("could not allocate an unused workspace code")]
    CodeSpaceExhausted,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Timeout(#[from] Elapsed),
    #[error("failed to persist window bindings: {0:#}")]
    Bindings(anyhow::Error),
}

pub struct SyncService {
    store: Arc<dyn DocumentStore>,
    host: Arc<dyn TabHost>,
    writer: WriterId,
    tuning: SyncTuning,
    registry: Mutex<MembershipRegistry>,
    guard: Mutex<InitGuard>,
    detector: Arc<Mutex<ChangeDetector>>,
    outbound: OutboundSync,
    inbound: InboundSync,
    subscriptions: Mutex<HashMap<WorkspaceCode, JoinHandle<()>>>,
    this: Weak<SyncService>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        host: Arc<dyn TabHost>,
        registry: MembershipRegistry,
        writer: WriterId,
        tuning: SyncTuning,
    ) -> Arc<Self> {
        let detector = Arc::new(Mutex::new(ChangeDetector::new(tuning.throttle, tuning.echo_ttl)));
        Arc::new_cyclic(|this| Self {
            outbound: OutboundSync::new(store.clone(), host.clone(), writer.clone()),
            inbound: InboundSync::new(host.clone(), detector.clone(), writer.clone()),
            store,
            host,
            writer,
            tuning,
            registry: Mutex::new(registry),
            guard: Mutex::new(InitGuard::new(tuning.max_init_hold)),
            detector,
            subscriptions: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    pub fn writer(&self) -> &WriterId {
        &self.writer
    }

    pub fn tuning(&self) -> SyncTuning {
        self.tuning
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    // ── Workspace lifecycle ────────────────────────────────────────

    /// Create a workspace, open a window for it and start syncing.
    pub async fn create_workspace(&self, name: Option<String>) -> Result<WorkspaceOpened, SyncError> {
        let code = self.unused_code().await?;
        let name = name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Workspace {code}"));

        self.store.put_workspace(&Workspace::new(code.clone(), name.clone(), self.writer.clone())).await?;
        let window = self.host.create_window().await?;
        self.store.merge_state(&code, StatePatch::replace_tabs(Vec::new(), &self.writer, now_millis())).await?;
        self.register_window(code.clone(), window).await?;

        info!(workspace = %code, window = window.0, %name, "created workspace");
        Ok(WorkspaceOpened { workspace_id: code, window_id: window, name, restored_tabs: 0 })
    }

    /// Open a window on an existing workspace and populate it.
    pub async fn join_workspace(&self, code: WorkspaceCode) -> Result<WorkspaceOpened, SyncError> {
        let Some(mut workspace) = self.store.get_workspace(&code).await? else {
            return Err(SyncError::WorkspaceNotFound(code));
        };

        let window = self.host.create_window().await?;
        self.guard().mark(window);

        let state = match self.store.get_state(&code).await? {
            Some(state) => state,
            None => {
                let empty = StatePatch::replace_tabs(Vec::new(), &self.writer, now_millis());
                self.store.merge_state(&code, empty).await?
            }
        };

        if workspace.add_participant(&self.writer) {
            if let Err(error) = self.store.put_workspace(&workspace).await {
                warn!(workspace = %code, %error, "failed to record participant");
            }
        }

        self.register_window(code.clone(), window).await?;

        let restored = match self.inbound.reconcile(&code, window, &state).await {
            Ok(report) => report.created,
            Err(error) => {
                warn!(workspace = %code, window = window.0, %error, "failed to restore workspace tabs");
                0
            }
        };
        self.guard().settle(window, self.tuning.init_settle);

        info!(workspace = %code, window = window.0, restored, "joined workspace");
        Ok(WorkspaceOpened {
            workspace_id: code,
            window_id: window,
            name: workspace.name,
            restored_tabs: restored,
        })
    }

    /// Stop syncing `code` locally. Windows stay open.
    pub fn leave_workspace(&self, code: WorkspaceCode) -> Result<LeftWorkspace, SyncError> {
        if let Some(pump) = self.subscriptions().remove(&code) {
            pump.abort();
        }
        let released = self.registry().unbind_workspace(&code).map_err(SyncError::Bindings)?;
        for window in &released {
            self.release_window(*window);
        }
        info!(workspace = %code, windows = released.len(), "left workspace");
        Ok(LeftWorkspace { workspace_id: code, unbound_windows: released })
    }

    // ── Membership ─────────────────────────────────────────────────

    /// Bind `window` to `code` and make sure the workspace is subscribed.
    /// Safe to repeat.
    pub async fn register_window(&self, code: WorkspaceCode, window: WindowId) -> Result<(), SyncError> {
        let previous = self.registry().bind(window, code.clone()).map_err(SyncError::Bindings)?;
        if previous.as_ref().is_some_and(|previous| *previous != code) {
            self.inbound.forget_window(window);
        }

        match self.host.query_tabs(window).await {
            Ok(tabs) => self.detector().seed(&tabs),
            Err(error) => debug!(window = window.0, %error, "could not seed tab identities"),
        }

        self.ensure_subscription(&code).await?;
        debug!(workspace = %code, window = window.0, "registered window");
        Ok(())
    }

    pub fn check_membership(&self, window: WindowId) -> Membership {
        let workspace_id = self.registry().is_bound(window).cloned();
        Membership { is_collaboration: workspace_id.is_some(), workspace_id }
    }

    pub fn bindings(&self) -> BindingList {
        let bindings = self
            .registry()
            .bindings()
            .map(|(window_id, code)| WindowBinding { window_id, workspace_id: code.clone() })
            .collect();
        BindingList { bindings }
    }

    pub fn mark_initializing(&self, window: WindowId) {
        self.guard().mark(window);
    }

    /// Release the guard immediately.
    pub fn unmark_initializing(&self, window: WindowId) {
        self.guard().clear(window);
    }

    pub fn is_initializing(&self, window: WindowId) -> bool {
        self.guard().is_initializing(window)
    }

    // ── Local changes ──────────────────────────────────────────────

    /// Run one browser notification through detection and publishing.
    pub async fn handle_tab_event(&self, event: HostTabEvent) -> TabEventHandled {
        let outcome = self.process_tab_event(event).await;
        TabEventHandled { published: outcome.is_published(), reason: outcome.reason() }
    }

    async fn process_tab_event(&self, event: HostTabEvent) -> PublishOutcome {
        let window = event.window_id();

        if matches!(event, HostTabEvent::Removed { is_window_closing: true, .. }) {
            self.detector().process(event);
            let unbound = self.registry().unbind(window);
            match unbound {
                Ok(Some(code)) => {
                    self.release_window(window);
                    info!(workspace = %code, window = window.0, "window closed, binding dropped");
                    self.unsubscribe_if_unbound(&code);
                }
                Ok(None) => {}
                Err(error) => warn!(window = window.0, error = %format!("{error:#}"), "failed to drop binding"),
            }
            return PublishOutcome::Skipped(SkipReason::Ignored(IgnoreReason::WindowClosing));
        }

        let code = match self.publish_target(window) {
            Ok(code) => code,
            Err(reason) => {
                debug!(window = window.0, reason = %reason, "tab event not published");
                return PublishOutcome::Skipped(reason);
            }
        };

        let detection = self.detector().process(event);
        match detection {
            Detection::Emit(change) => self.outbound.publish(&code, &change).await,
            Detection::Deferred { retry_at, newly_parked } => {
                if newly_parked {
                    self.schedule_flush(retry_at);
                }
                PublishOutcome::Skipped(SkipReason::Deferred)
            }
            Detection::Ignored(reason) => {
                debug!(workspace = %code, window = window.0, reason = reason.as_str(), "tab event ignored");
                PublishOutcome::Skipped(SkipReason::Ignored(reason))
            }
        }
    }

    /// Workspace a change in `window` would be published to, if any.
    fn publish_target(&self, window: WindowId) -> Result<WorkspaceCode, SkipReason> {
        let Some(code) = self.registry().is_bound(window).cloned() else {
            return Err(SkipReason::NotBound);
        };
        if self.guard().is_initializing(window) {
            return Err(SkipReason::Initializing);
        }
        Ok(code)
    }

    fn schedule_flush(&self, at: Instant) {
        let this = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            if let Some(service) = this.upgrade() {
                service.flush_parked().await;
            }
        });
    }

    /// Publish throttled notifications whose window has lapsed.
    pub async fn flush_parked(&self) -> Vec<PublishOutcome> {
        let ready: Vec<ChangeEvent> = self.detector().flush_due();
        let mut outcomes = Vec::with_capacity(ready.len());
        for change in ready {
            let outcome = match self.publish_target(change.window_id()) {
                Ok(code) => self.outbound.publish(&code, &change).await,
                Err(reason) => PublishOutcome::Skipped(reason),
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    // ── Remote changes ─────────────────────────────────────────────

    async fn ensure_subscription(&self, code: &WorkspaceCode) -> Result<(), StoreError> {
        if self.is_subscribed(code) {
            return Ok(());
        }

        let subscription = self.store.subscribe(code).await?;
        let pump = tokio::spawn(pump_remote(
            self.this.clone(),
            code.clone(),
            subscription,
            self.tuning.debounce,
        ));
        if let Some(replaced) = self.subscriptions().insert(code.clone(), pump) {
            replaced.abort();
        }
        info!(workspace = %code, backend = self.store.backend_name(), "subscribed to workspace");
        Ok(())
    }

    /// Stop the feed of `code` once no local window mirrors it.
    fn unsubscribe_if_unbound(&self, code: &WorkspaceCode) {
        if !self.registry().windows_for(code).is_empty() {
            return;
        }
        if let Some(pump) = self.subscriptions().remove(code) {
            pump.abort();
            info!(workspace = %code, "last window gone, unsubscribed from workspace");
        }
    }

    fn is_subscribed(&self, code: &WorkspaceCode) -> bool {
        self.subscriptions().get(code).is_some_and(|pump| !pump.is_finished())
    }

    async fn apply_remote(&self, code: &WorkspaceCode, state: &WorkspaceState) {
        let windows = self.registry().windows_for(code);
        for window in windows {
            match self.inbound.on_remote_update(code, window, state).await {
                Ok(RemoteUpdateOutcome::Reconciled(report)) => {
                    debug!(workspace = %code, window = window.0, applied = report.applied(), "applied remote update");
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(workspace = %code, window = window.0, %error, "failed to reconcile window");
                }
            }
        }
    }

    /// Reload persisted bindings and resume their subscriptions. Returns
    /// the number of workspaces resumed.
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let (windows, workspaces) = {
            let mut registry = self.registry();
            registry.load_all()?;
            let windows: Vec<WindowId> = registry.bindings().map(|(window, _)| window).collect();
            (windows, registry.workspaces())
        };

        for window in windows {
            if let Ok(tabs) = self.host.query_tabs(window).await {
                self.detector().seed(&tabs);
            }
        }

        let mut resumed = 0;
        for code in workspaces {
            match self.ensure_subscription(&code).await {
                Ok(()) => resumed += 1,
                Err(error) => warn!(workspace = %code, %error, "failed to resume workspace"),
            }
        }
        info!(workspaces = resumed, "restored workspace subscriptions");
        Ok(resumed)
    }

    /// Abort every subscription. Bindings stay persisted.
    pub fn shutdown(&self) {
        for (_, pump) in self.subscriptions().drain() {
            pump.abort();
        }
    }

    // ── Diagnostics ────────────────────────────────────────────────

    pub async fn check_connectivity(&self) -> Connectivity {
        match with_timeout(self.tuning.connect_timeout, self.store.ping()).await {
            Ok(Ok(())) => Connectivity { status: ConnectivityStatus::Connected, detail: None },
            Ok(Err(error)) => {
                Connectivity { status: ConnectivityStatus::Unreachable, detail: Some(error.to_string()) }
            }
            Err(elapsed) => {
                Connectivity { status: ConnectivityStatus::Timeout, detail: Some(elapsed.to_string()) }
            }
        }
    }

    pub async fn workspace_status(&self, code: WorkspaceCode) -> Result<WorkspaceStatus, SyncError> {
        let (workspace, state) = with_timeout(self.tuning.connect_timeout, async {
            let workspace = self.store.get_workspace(&code).await?;
            let state = self.store.get_state(&code).await?;
            Ok::<_, StoreError>((workspace, state))
        })
        .await??;

        let Some(workspace) = workspace else {
            return Err(SyncError::WorkspaceNotFound(code));
        };
        let state = state.unwrap_or_default();
        let windows = self.registry().windows_for(&code);
        Ok(WorkspaceStatus {
            workspace,
            tab_count: state.tabs.len(),
            last_update: state.last_update,
            updated_by: state.updated_by,
            windows,
        })
    }

    /// Qualifying tabs of a window, for callers outside the sync path.
    pub async fn window_tabs(&self, window: WindowId) -> Result<Vec<BrowserTab>, SyncError> {
        let tabs = self.host.query_tabs(window).await?;
        Ok(tabs.into_iter().filter(is_syncable_tab).collect())
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn unused_code(&self) -> Result<WorkspaceCode, SyncError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = WorkspaceCode::generate();
            if self.store.get_workspace(&code).await?.is_none() {
                return Ok(code);
            }
        }
        Err(SyncError::CodeSpaceExhausted)
    }

    fn release_window(&self, window: WindowId) {
        self.inbound.forget_window(window);
        self.guard().clear(window);
    }

    fn registry(&self) -> MutexGuard<'_, MembershipRegistry> {
        self.registry.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn guard(&self) -> MutexGuard<'_, InitGuard> {
        self.guard.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn detector(&self) -> MutexGuard<'_, ChangeDetector> {
        self.detector.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<WorkspaceCode, JoinHandle<()>>> {
        self.subscriptions.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn pump_remote(
    service: Weak<SyncService>,
    code: WorkspaceCode,
    mut subscription: Subscription,
    debounce: std::time::Duration,
) {
    while let Some(state) = next_settled(&mut subscription, debounce).await {
        let Some(service) = service.upgrade() else {
            return;
        };
        service.apply_remote(&code, &state).await;
    }
    warn!(workspace = %code, "workspace subscription ended");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tably_common::protocol::rpc_methods::TabChangeInfo;

    use super::*;
    use crate::host::MemoryHost;
    use crate::store::MemoryDocumentStore;
    use crate::sync::registry::MemoryBindingStore;

    fn service_on(store: Arc<dyn DocumentStore>, host: Arc<MemoryHost>) -> Arc<SyncService> {
        let registry = MembershipRegistry::load(Box::new(MemoryBindingStore::new())).unwrap();
        SyncService::new(store, host, registry, WriterId::new("user_1_local"), SyncTuning::default())
    }

    struct StalledStore;

    #[async_trait]
    impl DocumentStore for StalledStore {
        fn backend_name(&self) -> &'static str {
            "stalled"
        }

        async fn get_workspace(&self, _: &WorkspaceCode) -> Result<Option<Workspace>, StoreError> {
            std::future::pending().await
        }

        async fn put_workspace(&self, _: &Workspace) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn get_state(&self, _: &WorkspaceCode) -> Result<Option<WorkspaceState>, StoreError> {
            std::future::pending().await
        }

        async fn merge_state(&self, _: &WorkspaceCode, _: StatePatch) -> Result<WorkspaceState, StoreError> {
            std::future::pending().await
        }

        async fn subscribe(&self, _: &WorkspaceCode) -> Result<Subscription, StoreError> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn create_binds_a_fresh_window_to_an_empty_workspace() {
        let store = Arc::new(MemoryDocumentStore::new());
        let host = Arc::new(MemoryHost::new());
        let service = service_on(store.clone(), host.clone());

        let opened = service.create_workspace(Some("  Research ".into())).await.unwrap();
        assert_eq!(opened.name, "Research");
        assert_eq!(opened.workspace_id.as_str().len(), 6);

        let membership = service.check_membership(opened.window_id);
        assert!(membership.is_collaboration);
        assert_eq!(membership.workspace_id, Some(opened.workspace_id.clone()));

        let state = store.snapshot(&opened.workspace_id).unwrap();
        assert!(state.tabs.is_empty());
        assert_eq!(state.updated_by, Some(WriterId::new("user_1_local")));
    }

    #[tokio::test]
    async fn default_name_mentions_the_code() {
        let service = service_on(Arc::new(MemoryDocumentStore::new()), Arc::new(MemoryHost::new()));
        let opened = service.create_workspace(None).await.unwrap();
        assert_eq!(opened.name, format!("Workspace {}", opened.workspace_id));
    }

    #[tokio::test]
    async fn join_of_unknown_workspace_fails_without_opening_a_window() {
        let host = Arc::new(MemoryHost::new());
        let service = service_on(Arc::new(MemoryDocumentStore::new()), host.clone());

        let error = service.join_workspace(WorkspaceCode::parse("ZZZZZZ").unwrap()).await.unwrap_err();
        assert_eq!(error.to_string(), "Workspace not found. Create a workspace first.");
        assert!(host.windows().is_empty());
    }

    #[tokio::test]
    async fn events_from_unbound_windows_are_not_published() {
        let host = Arc::new(MemoryHost::new());
        let service = service_on(Arc::new(MemoryDocumentStore::new()), host.clone());
        let window = host.open_window();
        let tab = host.open_tab(window, "https://a.test", "A").unwrap();

        let handled = service.handle_tab_event(HostTabEvent::Created { tab }).await;
        assert!(!handled.published);
        assert_eq!(handled.reason.as_deref(), Some("window is not part of a workspace"));
    }

    #[tokio::test]
    async fn initializing_window_does_not_publish() {
        let store = Arc::new(MemoryDocumentStore::new());
        let host = Arc::new(MemoryHost::new());
        let service = service_on(store.clone(), host.clone());
        let opened = service.create_workspace(None).await.unwrap();

        service.mark_initializing(opened.window_id);
        let tab = host.open_tab(opened.window_id, "https://a.test", "A").unwrap();
        let handled = service.handle_tab_event(HostTabEvent::Created { tab: tab.clone() }).await;
        assert_eq!(handled.reason.as_deref(), Some("window is initializing"));

        service.unmark_initializing(opened.window_id);
        let handled = service.handle_tab_event(HostTabEvent::Created { tab }).await;
        assert!(handled.published);
        assert_eq!(store.snapshot(&opened.workspace_id).unwrap().tabs.len(), 1);
    }

    #[tokio::test]
    async fn closing_a_window_drops_its_binding_but_keeps_remote_tabs() {
        let store = Arc::new(MemoryDocumentStore::new());
        let host = Arc::new(MemoryHost::new());
        let service = service_on(store.clone(), host.clone());
        let opened = service.create_workspace(None).await.unwrap();
        let tab = host.open_tab(opened.window_id, "https://a.test", "A").unwrap();
        service.handle_tab_event(HostTabEvent::Created { tab: tab.clone() }).await;

        let handled = service
            .handle_tab_event(HostTabEvent::Removed {
                tab_id: tab.id,
                window_id: opened.window_id,
                is_window_closing: true,
            })
            .await;
        assert!(!handled.published);
        assert!(!service.check_membership(opened.window_id).is_collaboration);
        assert_eq!(store.snapshot(&opened.workspace_id).unwrap().tabs.len(), 1);
        assert!(!service.is_subscribed(&opened.workspace_id));
    }

    #[tokio::test]
    async fn closing_one_of_two_windows_keeps_the_subscription() {
        let host = Arc::new(MemoryHost::new());
        let service = service_on(Arc::new(MemoryDocumentStore::new()), host.clone());
        let opened = service.create_workspace(None).await.unwrap();
        let extra = host.open_window();
        service.register_window(opened.workspace_id.clone(), extra).await.unwrap();
        let tab = host.open_tab(extra, "https://a.test", "A").unwrap();

        service
            .handle_tab_event(HostTabEvent::Removed { tab_id: tab.id, window_id: extra, is_window_closing: true })
            .await;
        assert!(service.check_membership(opened.window_id).is_collaboration);
        assert!(service.is_subscribed(&opened.workspace_id));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_tab_is_not_brought_back_by_a_throttled_update() {
        let store = Arc::new(MemoryDocumentStore::new());
        let host = Arc::new(MemoryHost::new());
        let service = service_on(store.clone(), host.clone());
        let opened = service.create_workspace(None).await.unwrap();
        service.unmark_initializing(opened.window_id);

        let mut tab = host.open_tab(opened.window_id, "https://a.test", "A").unwrap();
        assert!(service.handle_tab_event(HostTabEvent::Created { tab: tab.clone() }).await.published);

        let mut retitle = |title: &str| {
            tab.title = Some(title.to_string());
            let change = TabChangeInfo { title: tab.title.clone(), ..TabChangeInfo::default() };
            HostTabEvent::Updated { tab: tab.clone(), change }
        };
        assert!(service.handle_tab_event(retitle("A loading")).await.published);
        assert!(!service.handle_tab_event(retitle("A final")).await.published);

        let removed = service
            .handle_tab_event(HostTabEvent::Removed {
                tab_id: tab.id,
                window_id: opened.window_id,
                is_window_closing: false,
            })
            .await;
        assert!(removed.published);
        assert!(store.snapshot(&opened.workspace_id).unwrap().tabs.is_empty());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(service.flush_parked().await.is_empty());
        assert!(store.snapshot(&opened.workspace_id).unwrap().tabs.is_empty());
    }

    #[tokio::test]
    async fn leave_unbinds_every_window_of_the_workspace() {
        let host = Arc::new(MemoryHost::new());
        let service = service_on(Arc::new(MemoryDocumentStore::new()), host.clone());
        let opened = service.create_workspace(None).await.unwrap();
        let extra = host.open_window();
        service.register_window(opened.workspace_id.clone(), extra).await.unwrap();

        let left = service.leave_workspace(opened.workspace_id.clone()).unwrap();
        assert_eq!(left.unbound_windows, vec![opened.window_id, extra]);
        assert!(service.bindings().bindings.is_empty());
        assert_eq!(host.windows().len(), 2);
    }

    #[tokio::test]
    async fn connectivity_reports_unreachable_store() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_offline(true);
        let service = service_on(store, Arc::new(MemoryHost::new()));

        let connectivity = service.check_connectivity().await;
        assert_eq!(connectivity.status, ConnectivityStatus::Unreachable);
        assert!(connectivity.detail.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_and_status_time_out_on_a_stalled_store() {
        let service = service_on(Arc::new(StalledStore), Arc::new(MemoryHost::new()));

        let connectivity = service.check_connectivity().await;
        assert_eq!(connectivity.status, ConnectivityStatus::Timeout);

        let status = service.workspace_status(WorkspaceCode::parse("AB12C9").unwrap()).await;
        assert!(matches!(status, Err(SyncError::Timeout(Elapsed(d))) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn status_reports_document_and_local_windows() {
        let store = Arc::new(MemoryDocumentStore::new());
        let host = Arc::new(MemoryHost::new());
        let service = service_on(store, host.clone());
        let opened = service.create_workspace(Some("Team".into())).await.unwrap();
        let tab = host.open_tab(opened.window_id, "https://a.test", "A").unwrap();
        service.handle_tab_event(HostTabEvent::Created { tab }).await;

        let status = service.workspace_status(opened.workspace_id.clone()).await.unwrap();
        assert_eq!(status.workspace.name, "Team");
        assert_eq!(status.tab_count, 1);
        assert_eq!(status.windows, vec![opened.window_id]);
        assert_eq!(status.updated_by, Some(WriterId::new("user_1_local")));
    }
}
