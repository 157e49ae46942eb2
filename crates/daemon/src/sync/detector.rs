// Normalizes raw browser notifications into sync-relevant changes.
//
// Filtering order for every notification: echo of our own reconciliation,
// URL policy, then the per-(kind, tab) throttle. A throttled notification is
// not lost: the latest one per key is parked and handed back by
// `flush_due` once its window lapses.

use std::collections::HashMap;
use std::time::Duration;

use tably_common::identity::SyncIdentity;
use tably_common::protocol::rpc_methods::{HostTabEvent, TabChangeInfo};
use tably_common::types::{BrowserTab, TabId, WindowId};
use tably_common::url_policy::{is_new_tab_page, is_privileged_url, is_syncable_tab};
use tokio::time::Instant;

use super::throttle::SuppressionTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
    Reordered,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Reordered => "reordered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created {
        tab: BrowserTab,
    },
    Updated {
        tab: BrowserTab,
        changes: TabChangeInfo,
        /// Identity the tab had before this change, when it differs.
        previous: Option<SyncIdentity>,
    },
    Removed {
        tab_id: TabId,
        window_id: WindowId,
        identity: SyncIdentity,
    },
    Reordered {
        window_id: WindowId,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Created { .. } => ChangeKind::Created,
            Self::Updated { .. } => ChangeKind::Updated,
            Self::Removed { .. } => ChangeKind::Removed,
            Self::Reordered { .. } => ChangeKind::Reordered,
        }
    }

    pub fn window_id(&self) -> WindowId {
        match self {
            Self::Created { tab } | Self::Updated { tab, .. } => tab.window_id,
            Self::Removed { window_id, .. } | Self::Reordered { window_id } => *window_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No URL yet, or the browser's own new-tab page.
    NoUrl,
    Privileged,
    /// Favicon, loading status, audio and the like.
    Cosmetic,
    /// Caused by our own reconciliation.
    Echo,
    /// The whole window is going away; its tabs stay in the workspace.
    WindowClosing,
    /// Repeat removal inside the throttle window.
    Duplicate,
    /// Removal of a tab whose identity was never known.
    Untracked,
}

impl IgnoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoUrl => "no syncable url",
            Self::Privileged => "privileged url",
            Self::Cosmetic => "cosmetic update",
            Self::Echo => "echo of reconciliation",
            Self::WindowClosing => "window closing",
            Self::Duplicate => "duplicate notification",
            Self::Untracked => "untracked tab",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Emit(ChangeEvent),
    /// Throttled. The latest notification for the key is parked until
    /// `retry_at`; `newly_parked` is true for the first one in a window,
    /// which is when the caller should schedule a flush.
    Deferred { retry_at: Instant, newly_parked: bool },
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ThrottleKey {
    Tab(ChangeKind, TabId),
    Window(WindowId),
}

/// Marker for a host call the reconciler is about to make.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EchoKey {
    /// Tab creation, before the new tab id is known.
    Opening { window: WindowId, url: String },
    Tab(TabId),
}

pub struct ChangeDetector {
    throttle_ttl: Duration,
    echo_ttl: Duration,
    throttle: SuppressionTable<ThrottleKey>,
    echoes: SuppressionTable<EchoKey>,
    identities: HashMap<TabId, SyncIdentity>,
    parked: HashMap<ThrottleKey, HostTabEvent>,
}

impl ChangeDetector {
    pub fn new(throttle_ttl: Duration, echo_ttl: Duration) -> Self {
        Self {
            throttle_ttl,
            echo_ttl,
            throttle: SuppressionTable::new(),
            echoes: SuppressionTable::new(),
            identities: HashMap::new(),
            parked: HashMap::new(),
        }
    }

    // ── Identity index ─────────────────────────────────────────────

    /// Record the identity of every syncable tab not already known.
    pub fn seed(&mut self, tabs: &[BrowserTab]) {
        for tab in tabs.iter().filter(|tab| is_syncable_tab(tab)) {
            self.identities.entry(tab.id).or_insert_with(|| tab.identity());
        }
    }

    /// Tie a local tab to the remote record it represents.
    pub fn adopt(&mut self, tab: TabId, identity: SyncIdentity) {
        self.identities.insert(tab, identity);
    }

    pub fn forget(&mut self, tab: TabId) {
        self.identities.remove(&tab);
    }

    pub fn identity_of(&self, tab: TabId) -> Option<&SyncIdentity> {
        self.identities.get(&tab)
    }

    // ── Echo markers ───────────────────────────────────────────────

    /// The reconciler is about to open `url` in `window`.
    pub fn expect_opening(&mut self, window: WindowId, url: &str) {
        self.expect_opening_at(window, url, Instant::now());
    }

    pub fn expect_opening_at(&mut self, window: WindowId, url: &str, now: Instant) {
        self.echoes.insert_at(EchoKey::Opening { window, url: url.to_string() }, self.echo_ttl, now);
    }

    /// The reconciler is about to touch (or just created) `tab`.
    pub fn expect_tab(&mut self, tab: TabId) {
        self.expect_tab_at(tab, Instant::now());
    }

    pub fn expect_tab_at(&mut self, tab: TabId, now: Instant) {
        self.echoes.insert_at(EchoKey::Tab(tab), self.echo_ttl, now);
    }

    // ── Detection ──────────────────────────────────────────────────

    pub fn process(&mut self, event: HostTabEvent) -> Detection {
        self.process_at(event, Instant::now())
    }

    pub fn process_at(&mut self, event: HostTabEvent, now: Instant) -> Detection {
        match event {
            HostTabEvent::Created { tab } => self.on_created(tab, now),
            HostTabEvent::Updated { tab, change } => self.on_updated(tab, change, now),
            HostTabEvent::Removed { tab_id, window_id, is_window_closing } => {
                self.on_removed(tab_id, window_id, is_window_closing, now)
            }
            moved @ HostTabEvent::Moved { .. } => {
                let window_id = moved.window_id();
                let key = ThrottleKey::Window(window_id);
                if !self.throttle.try_acquire_at(key.clone(), self.throttle_ttl, now) {
                    return self.park(key, moved, now);
                }
                Detection::Emit(ChangeEvent::Reordered { window_id })
            }
        }
    }

    /// Re-run parked notifications whose throttle window has lapsed.
    pub fn flush_due(&mut self) -> Vec<ChangeEvent> {
        self.flush_due_at(Instant::now())
    }

    pub fn flush_due_at(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let due: Vec<ThrottleKey> = self
            .parked
            .keys()
            .filter(|key| !self.throttle.contains_at(key, now))
            .cloned()
            .collect();

        let mut ready = Vec::new();
        for key in due {
            if let Some(event) = self.parked.remove(&key) {
                if let Detection::Emit(change) = self.process_at(event, now) {
                    ready.push(change);
                }
            }
        }
        ready
    }

    /// Earliest instant at which `flush_due` has work.
    pub fn next_flush(&self) -> Option<Instant> {
        self.parked.keys().filter_map(|key| self.throttle.expiry_of(key)).min()
    }

    fn on_created(&mut self, tab: BrowserTab, now: Instant) -> Detection {
        let opening = tab
            .url
            .as_ref()
            .map(|url| EchoKey::Opening { window: tab.window_id, url: url.clone() });
        let echoed_opening = opening.is_some_and(|key| self.echoes.take_at(&key, now));
        if echoed_opening || self.echoes.contains_at(&EchoKey::Tab(tab.id), now) {
            return Detection::Ignored(IgnoreReason::Echo);
        }
        if let Some(reason) = url_rejection(&tab) {
            return Detection::Ignored(reason);
        }

        let key = ThrottleKey::Tab(ChangeKind::Created, tab.id);
        if !self.throttle.try_acquire_at(key.clone(), self.throttle_ttl, now) {
            return self.park(key, HostTabEvent::Created { tab }, now);
        }
        self.identities.insert(tab.id, tab.identity());
        Detection::Emit(ChangeEvent::Created { tab })
    }

    fn on_updated(&mut self, tab: BrowserTab, change: TabChangeInfo, now: Instant) -> Detection {
        if !change.affects_content() {
            return Detection::Ignored(IgnoreReason::Cosmetic);
        }
        if self.echoes.contains_at(&EchoKey::Tab(tab.id), now) {
            return Detection::Ignored(IgnoreReason::Echo);
        }
        if let Some(reason) = url_rejection(&tab) {
            return Detection::Ignored(reason);
        }

        let key = ThrottleKey::Tab(ChangeKind::Updated, tab.id);
        if !self.throttle.try_acquire_at(key.clone(), self.throttle_ttl, now) {
            return self.park(key, HostTabEvent::Updated { tab, change }, now);
        }
        let current = tab.identity();
        let previous = self.identities.insert(tab.id, current.clone()).filter(|old| *old != current);
        Detection::Emit(ChangeEvent::Updated { tab, changes: change, previous })
    }

    fn on_removed(
        &mut self,
        tab_id: TabId,
        window_id: WindowId,
        is_window_closing: bool,
        now: Instant,
    ) -> Detection {
        // A parked create or update must not replay a tab that is gone.
        self.parked.remove(&ThrottleKey::Tab(ChangeKind::Created, tab_id));
        self.parked.remove(&ThrottleKey::Tab(ChangeKind::Updated, tab_id));

        if is_window_closing {
            self.identities.remove(&tab_id);
            return Detection::Ignored(IgnoreReason::WindowClosing);
        }
        if self.echoes.take_at(&EchoKey::Tab(tab_id), now) {
            self.identities.remove(&tab_id);
            return Detection::Ignored(IgnoreReason::Echo);
        }

        let key = ThrottleKey::Tab(ChangeKind::Removed, tab_id);
        if !self.throttle.try_acquire_at(key, self.throttle_ttl, now) {
            return Detection::Ignored(IgnoreReason::Duplicate);
        }
        match self.identities.remove(&tab_id) {
            Some(identity) => Detection::Emit(ChangeEvent::Removed { tab_id, window_id, identity }),
            None => Detection::Ignored(IgnoreReason::Untracked),
        }
    }

    fn park(&mut self, key: ThrottleKey, event: HostTabEvent, now: Instant) -> Detection {
        let retry_at = self.throttle.expiry_of(&key).unwrap_or(now);
        let newly_parked = self.parked.insert(key, event).is_none();
        Detection::Deferred { retry_at, newly_parked }
    }
}

fn url_rejection(tab: &BrowserTab) -> Option<IgnoreReason> {
    match tab.url.as_deref().map(str::trim) {
        None | Some("") => Some(IgnoreReason::NoUrl),
        Some(url) if is_new_tab_page(url) => Some(IgnoreReason::NoUrl),
        Some(url) if is_privileged_url(url) => Some(IgnoreReason::Privileged),
        Some(_) => None,
    }
}
