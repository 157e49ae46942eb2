// Browser primitives the sync engine drives.
//
// The engine never talks to a browser directly; it goes through `TabHost`,
// which is the extension over native messaging in production and an
// in-process simulation in tests and headless mode.

pub mod memory;
pub mod native;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tably_common::types::{BrowserTab, TabId, WindowId};

use crate::timeout::Elapsed;

pub use memory::{HostOp, MemoryHost};
pub use native::NativeHost;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("no tab with id {0}")]
    NoSuchTab(TabId),
    #[error("no window with id {0}")]
    NoSuchWindow(WindowId),
    #[error("host rejected {operation}: {message}")]
    Rejected { operation: &'static str, message: String },
    #[error("host disconnected")]
    Disconnected,
    #[error("host call {operation} failed: {source}")]
    Timeout { operation: &'static str, source: Elapsed },
    #[error("invalid host payload: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTab {
    pub window_id: WindowId,
    pub url: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Reconciliation opens tabs in the background.
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
}

impl TabUpdate {
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.pinned.is_none()
    }
}

#[async_trait]
pub trait TabHost: Send + Sync {
    /// Tabs of one window in index order.
    async fn query_tabs(&self, window: WindowId) -> Result<Vec<BrowserTab>, HostError>;

    async fn create_tab(&self, request: CreateTab) -> Result<BrowserTab, HostError>;

    async fn update_tab(&self, tab: TabId, update: TabUpdate) -> Result<BrowserTab, HostError>;

    async fn remove_tab(&self, tab: TabId) -> Result<(), HostError>;

    /// Open a new, focused window and return its id.
    async fn create_window(&self) -> Result<WindowId, HostError>;

    async fn focus_window(&self, window: WindowId) -> Result<(), HostError>;
}
