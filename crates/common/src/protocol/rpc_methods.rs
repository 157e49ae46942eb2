// RPC method names and their parameter/result shapes.
//
// Every workspace operation resolves to an `Outcome`: `{"success": true, ...}`
// or `{"success": false, "error": "..."}`. Failures never surface as
// JSON-RPC errors; those are reserved for malformed requests.

use serde::{Deserialize, Serialize};

use crate::types::{BrowserTab, TabId, WindowId, Workspace, WorkspaceCode, WriterId};

// ── Daemon-internal ────────────────────────────────────────────────
pub const RPC_PING: &str = "rpc.ping";
pub const DAEMON_SHUTDOWN: &str = "daemon.shutdown";

// ── Workspace ──────────────────────────────────────────────────────
pub const WORKSPACE_CREATE: &str = "workspace.create";
pub const WORKSPACE_JOIN: &str = "workspace.join";
pub const WORKSPACE_LEAVE: &str = "workspace.leave";
pub const WORKSPACE_STATUS: &str = "workspace.status";

// ── Window membership ──────────────────────────────────────────────
pub const WINDOW_REGISTER: &str = "window.register";
pub const WINDOW_MEMBERSHIP: &str = "window.membership";
pub const WINDOW_BINDINGS: &str = "window.bindings";
pub const WINDOW_MARK_INITIALIZING: &str = "window.mark_initializing";
pub const WINDOW_UNMARK_INITIALIZING: &str = "window.unmark_initializing";

// ── Tabs ───────────────────────────────────────────────────────────
pub const TABS_EVENT: &str = "tabs.event";
pub const TABS_CATEGORIZE: &str = "tabs.categorize";

// ── Store ──────────────────────────────────────────────────────────
pub const STORE_CHECK: &str = "store.check";

/// All methods the daemon dispatches.
pub const IMPLEMENTED_METHODS: &[&str] = &[
    RPC_PING,
    DAEMON_SHUTDOWN,
    WORKSPACE_CREATE,
    WORKSPACE_JOIN,
    WORKSPACE_LEAVE,
    WORKSPACE_STATUS,
    WINDOW_REGISTER,
    WINDOW_MEMBERSHIP,
    WINDOW_BINDINGS,
    WINDOW_MARK_INITIALIZING,
    WINDOW_UNMARK_INITIALIZING,
    TABS_EVENT,
    TABS_CATEGORIZE,
    STORE_CHECK,
];

// ── Host primitives (daemon -> extension) ──────────────────────────
pub const HOST_TABS_QUERY: &str = "tabs.query";
pub const HOST_TABS_CREATE: &str = "tabs.create";
pub const HOST_TABS_UPDATE: &str = "tabs.update";
pub const HOST_TABS_REMOVE: &str = "tabs.remove";
pub const HOST_WINDOWS_CREATE: &str = "windows.create";
pub const HOST_WINDOWS_FOCUS: &str = "windows.focus";

pub const HOST_METHODS: &[&str] = &[
    HOST_TABS_QUERY,
    HOST_TABS_CREATE,
    HOST_TABS_UPDATE,
    HOST_TABS_REMOVE,
    HOST_WINDOWS_CREATE,
    HOST_WINDOWS_FOCUS,
];

// ── Result envelope ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(flatten)]
    pub value: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self { success: true, value: Some(value), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, value: None, error: Some(error.into()) }
    }

    pub fn from_result<E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(error) => Self::failed(error.to_string()),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.value) {
            (true, Some(value)) => Ok(value),
            _ => Err(self.error.unwrap_or_else(|| "operation failed".to_string())),
        }
    }
}

/// Empty success payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {}

// ── Params ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceParams {
    #[serde(default, alias = "sessionName")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceParams {
    #[serde(alias = "roomId", alias = "code")]
    pub workspace_id: WorkspaceCode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWindowParams {
    #[serde(alias = "roomId", alias = "code")]
    pub workspace_id: WorkspaceCode,
    pub window_id: WindowId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WindowParams {
    pub window_id: WindowId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategorizeParams {
    pub window_id: WindowId,
}

/// Raw tab lifecycle notification from the browser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HostTabEvent {
    Created {
        tab: BrowserTab,
    },
    Updated {
        tab: BrowserTab,
        change: TabChangeInfo,
    },
    Removed {
        tab_id: TabId,
        window_id: WindowId,
        #[serde(default)]
        is_window_closing: bool,
    },
    Moved {
        tab_id: TabId,
        window_id: WindowId,
        from_index: u32,
        to_index: u32,
    },
}

impl HostTabEvent {
    pub fn window_id(&self) -> WindowId {
        match self {
            Self::Created { tab } | Self::Updated { tab, .. } => tab.window_id,
            Self::Removed { window_id, .. } | Self::Moved { window_id, .. } => *window_id,
        }
    }
}

/// Which fields an `Updated` notification reports as changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TabChangeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audible: Option<bool>,
}

impl TabChangeInfo {
    /// URL or title changed; everything else is cosmetic for sync.
    pub fn affects_content(&self) -> bool {
        self.url.is_some() || self.title.is_some()
    }
}

// ── Results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceOpened {
    pub workspace_id: WorkspaceCode,
    pub window_id: WindowId,
    pub name: String,
    #[serde(default)]
    pub restored_tabs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub is_collaboration: bool,
    #[serde(default)]
    pub workspace_id: Option<WorkspaceCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WindowBinding {
    pub window_id: WindowId,
    pub workspace_id: WorkspaceCode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BindingList {
    pub bindings: Vec<WindowBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeftWorkspace {
    pub workspace_id: WorkspaceCode,
    pub unbound_windows: Vec<WindowId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    Connected,
    Unreachable,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connectivity {
    pub status: ConnectivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub workspace: Workspace,
    pub tab_count: usize,
    pub last_update: i64,
    #[serde(default)]
    pub updated_by: Option<WriterId>,
    #[serde(default)]
    pub windows: Vec<WindowId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TabEventHandled {
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
