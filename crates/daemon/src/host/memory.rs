// Simulated browser for tests and `--headless` runs.
//
// Behaves like the extension would: every mutation, whether it came from the
// sync engine or from a simulated user action, is reported on the event
// channel as a `HostTabEvent`. Calls made through `TabHost` are additionally
// recorded in the operation log so tests can assert what the engine did.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tably_common::protocol::rpc_methods::{HostTabEvent, TabChangeInfo};
use tably_common::types::{BrowserTab, TabId, WindowId};
use tokio::sync::mpsc;

use super::{CreateTab, HostError, TabHost, TabUpdate};

const NEW_TAB_URL: &str = "chrome://newtab/";

/// Engine-initiated host calls, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    CreateTab { window: WindowId, url: String, pinned: bool },
    UpdateTab { tab: TabId, update: TabUpdate },
    RemoveTab { tab: TabId },
    CreateWindow { window: WindowId },
    FocusWindow { window: WindowId },
}

#[derive(Default)]
struct Browser {
    windows: BTreeMap<WindowId, Vec<BrowserTab>>,
    next_window: i64,
    next_tab: i64,
    ops: Vec<HostOp>,
    page_titles: HashMap<String, String>,
    rejected_urls: HashSet<String>,
    events: Option<mpsc::UnboundedSender<HostTabEvent>>,
}

impl Browser {
    fn emit(&self, event: HostTabEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn open_window(&mut self) -> WindowId {
        self.next_window += 1;
        let window = WindowId(self.next_window);
        self.windows.insert(window, Vec::new());
        window
    }

    fn insert_tab(
        &mut self,
        window: WindowId,
        url: &str,
        title: Option<String>,
        pinned: bool,
        index: Option<u32>,
    ) -> Result<BrowserTab, HostError> {
        self.next_tab += 1;
        let id = TabId(self.next_tab);
        let tabs = self.windows.get_mut(&window).ok_or(HostError::NoSuchWindow(window))?;
        // Pinned tabs always come first, as in a real browser.
        let pinned_count = tabs.iter().filter(|t| t.pinned).count();
        let (lowest, highest) = if pinned { (0, pinned_count) } else { (pinned_count, tabs.len()) };
        let position = index.map_or(highest, |i| i as usize).clamp(lowest, highest);
        let tab = BrowserTab {
            id,
            window_id: window,
            index: position as u32,
            url: Some(url.to_string()),
            title,
            fav_icon_url: None,
            pinned,
            group_id: None,
        };
        tabs.insert(position, tab);
        reindex(tabs);
        let created = tabs[position].clone();
        self.emit(HostTabEvent::Created { tab: created.clone() });
        Ok(created)
    }

    fn locate(&self, tab: TabId) -> Result<(WindowId, usize), HostError> {
        self.windows
            .iter()
            .find_map(|(window, tabs)| tabs.iter().position(|t| t.id == tab).map(|p| (*window, p)))
            .ok_or(HostError::NoSuchTab(tab))
    }

    fn tab_mut(&mut self, tab: TabId) -> Result<&mut BrowserTab, HostError> {
        let (window, position) = self.locate(tab)?;
        self.windows
            .get_mut(&window)
            .and_then(|tabs| tabs.get_mut(position))
            .ok_or(HostError::NoSuchTab(tab))
    }

    fn title_for(&self, url: &str) -> Option<String> {
        self.page_titles.get(url).cloned()
    }

    fn remove(&mut self, tab: TabId, is_window_closing: bool) -> Result<(), HostError> {
        let (window, position) = self.locate(tab)?;
        if let Some(tabs) = self.windows.get_mut(&window) {
            tabs.remove(position);
            reindex(tabs);
        }
        self.emit(HostTabEvent::Removed { tab_id: tab, window_id: window, is_window_closing });
        Ok(())
    }
}

fn reindex(tabs: &mut [BrowserTab]) {
    for (index, tab) in tabs.iter_mut().enumerate() {
        tab.index = index as u32;
    }
}

#[derive(Default)]
pub struct MemoryHost {
    browser: Mutex<Browser>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route notifications to a new receiver. Only the latest receiver is fed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<HostTabEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().events = Some(tx);
        rx
    }

    /// Title the simulated page reports once loaded.
    pub fn set_page_title(&self, url: &str, title: &str) {
        self.lock().page_titles.insert(url.to_string(), title.to_string());
    }

    /// Make `tabs.create` / `tabs.update` fail for this URL.
    pub fn reject_url(&self, url: &str) {
        self.lock().rejected_urls.insert(url.to_string());
    }

    // ── Simulated user actions ─────────────────────────────────────

    pub fn open_window(&self) -> WindowId {
        self.lock().open_window()
    }

    pub fn open_tab(&self, window: WindowId, url: &str, title: &str) -> Result<BrowserTab, HostError> {
        self.lock().insert_tab(window, url, Some(title.to_string()), false, None)
    }

    pub fn open_pinned_tab(
        &self,
        window: WindowId,
        url: &str,
        title: &str,
    ) -> Result<BrowserTab, HostError> {
        self.lock().insert_tab(window, url, Some(title.to_string()), true, None)
    }

    pub fn navigate(&self, tab: TabId, url: &str, title: &str) -> Result<BrowserTab, HostError> {
        let mut browser = self.lock();
        let entry = browser.tab_mut(tab)?;
        entry.url = Some(url.to_string());
        entry.title = Some(title.to_string());
        let updated = entry.clone();
        browser.emit(HostTabEvent::Updated {
            tab: updated.clone(),
            change: TabChangeInfo {
                url: Some(url.to_string()),
                title: Some(title.to_string()),
                ..TabChangeInfo::default()
            },
        });
        Ok(updated)
    }

    /// A notification that changes nothing sync cares about.
    pub fn finish_loading(&self, tab: TabId) -> Result<(), HostError> {
        let browser = self.lock();
        let (window, position) = browser.locate(tab)?;
        let current = browser.windows[&window][position].clone();
        browser.emit(HostTabEvent::Updated {
            tab: current,
            change: TabChangeInfo { status: Some("complete".into()), ..TabChangeInfo::default() },
        });
        Ok(())
    }

    pub fn close_tab(&self, tab: TabId) -> Result<(), HostError> {
        self.lock().remove(tab, false)
    }

    pub fn move_tab(&self, tab: TabId, to_index: u32) -> Result<(), HostError> {
        let mut browser = self.lock();
        let (window, from) = browser.locate(tab)?;
        let tabs = browser.windows.get_mut(&window).ok_or(HostError::NoSuchWindow(window))?;
        let moved = tabs.remove(from);
        let to = (to_index as usize).min(tabs.len());
        tabs.insert(to, moved);
        reindex(tabs);
        browser.emit(HostTabEvent::Moved {
            tab_id: tab,
            window_id: window,
            from_index: from as u32,
            to_index: to as u32,
        });
        Ok(())
    }

    pub fn close_window(&self, window: WindowId) -> Result<(), HostError> {
        let mut browser = self.lock();
        let ids: Vec<TabId> = browser
            .windows
            .get(&window)
            .ok_or(HostError::NoSuchWindow(window))?
            .iter()
            .map(|tab| tab.id)
            .collect();
        for id in ids {
            browser.remove(id, true)?;
        }
        browser.windows.remove(&window);
        Ok(())
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn tabs(&self, window: WindowId) -> Vec<BrowserTab> {
        self.lock().windows.get(&window).cloned().unwrap_or_default()
    }

    pub fn urls(&self, window: WindowId) -> Vec<String> {
        self.tabs(window).into_iter().filter_map(|tab| tab.url).collect()
    }

    pub fn windows(&self) -> Vec<WindowId> {
        self.lock().windows.keys().copied().collect()
    }

    pub fn operations(&self) -> Vec<HostOp> {
        self.lock().ops.clone()
    }

    pub fn clear_operations(&self) {
        self.lock().ops.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Browser> {
        self.browser.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TabHost for MemoryHost {
    async fn query_tabs(&self, window: WindowId) -> Result<Vec<BrowserTab>, HostError> {
        self.lock().windows.get(&window).cloned().ok_or(HostError::NoSuchWindow(window))
    }

    async fn create_tab(&self, request: CreateTab) -> Result<BrowserTab, HostError> {
        let mut browser = self.lock();
        if browser.rejected_urls.contains(&request.url) {
            return Err(HostError::Rejected { operation: "tabs.create", message: request.url });
        }
        let title = browser.title_for(&request.url);
        let tab =
            browser.insert_tab(request.window_id, &request.url, title, request.pinned, request.index)?;
        browser.ops.push(HostOp::CreateTab {
            window: request.window_id,
            url: request.url,
            pinned: request.pinned,
        });
        Ok(tab)
    }

    async fn update_tab(&self, tab: TabId, update: TabUpdate) -> Result<BrowserTab, HostError> {
        let mut browser = self.lock();
        if let Some(url) = &update.url {
            if browser.rejected_urls.contains(url) {
                return Err(HostError::Rejected { operation: "tabs.update", message: url.clone() });
            }
        }
        let title = update.url.as_deref().and_then(|url| browser.title_for(url));
        let entry = browser.tab_mut(tab)?;
        let mut change = TabChangeInfo::default();
        if let Some(url) = &update.url {
            entry.url = Some(url.clone());
            entry.title = title.clone();
            change.url = Some(url.clone());
            change.title = title;
        }
        if let Some(pinned) = update.pinned {
            entry.pinned = pinned;
            change.pinned = Some(pinned);
        }
        let updated = entry.clone();
        browser.emit(HostTabEvent::Updated { tab: updated.clone(), change });
        browser.ops.push(HostOp::UpdateTab { tab, update });
        Ok(updated)
    }

    async fn remove_tab(&self, tab: TabId) -> Result<(), HostError> {
        let mut browser = self.lock();
        browser.remove(tab, false)?;
        browser.ops.push(HostOp::RemoveTab { tab });
        Ok(())
    }

    async fn create_window(&self) -> Result<WindowId, HostError> {
        let mut browser = self.lock();
        let window = browser.open_window();
        browser.insert_tab(window, NEW_TAB_URL, Some("New Tab".into()), false, None)?;
        browser.ops.push(HostOp::CreateWindow { window });
        Ok(window)
    }

    async fn focus_window(&self, window: WindowId) -> Result<(), HostError> {
        let mut browser = self.lock();
        if !browser.windows.contains_key(&window) {
            return Err(HostError::NoSuchWindow(window));
        }
        browser.ops.push(HostOp::FocusWindow { window });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn created_window_holds_a_new_tab_page() {
        let host = MemoryHost::new();
        let window = host.create_window().await.unwrap();

        assert_eq!(host.urls(window), vec![NEW_TAB_URL.to_string()]);
        assert_eq!(host.operations(), vec![HostOp::CreateWindow { window }]);
    }

    #[tokio::test]
    async fn create_tab_clamps_index_and_reindexes() {
        let host = MemoryHost::new();
        let window = host.open_window();
        host.open_tab(window, "https://a.test", "A").unwrap();

        let created = host
            .create_tab(CreateTab {
                window_id: window,
                url: "https://b.test".into(),
                pinned: false,
                index: Some(0),
                active: false,
            })
            .await
            .unwrap();
        let far = host
            .create_tab(CreateTab {
                window_id: window,
                url: "https://c.test".into(),
                pinned: false,
                index: Some(99),
                active: false,
            })
            .await
            .unwrap();

        assert_eq!(created.index, 0);
        assert_eq!(far.index, 2);
        assert_eq!(host.urls(window), vec!["https://b.test", "https://a.test", "https://c.test"]);
    }

    #[tokio::test]
    async fn unpinned_tabs_never_precede_pinned_ones() {
        let host = MemoryHost::new();
        let window = host.open_window();
        host.open_tab(window, "https://a.test", "A").unwrap();
        host.open_pinned_tab(window, "https://mail.test", "Mail").unwrap();

        let created = host
            .create_tab(CreateTab {
                window_id: window,
                url: "https://b.test".into(),
                pinned: false,
                index: Some(0),
                active: false,
            })
            .await
            .unwrap();

        assert_eq!(created.index, 1);
        assert_eq!(host.urls(window), vec!["https://mail.test", "https://b.test", "https://a.test"]);
    }

    #[tokio::test]
    async fn mutations_are_reported_as_events() {
        let host = MemoryHost::new();
        let mut events = host.subscribe();
        let window = host.open_window();

        let tab = host.open_tab(window, "https://a.test", "A").unwrap();
        host.navigate(tab.id, "https://b.test", "B").unwrap();
        host.close_tab(tab.id).unwrap();

        assert!(matches!(events.recv().await, Some(HostTabEvent::Created { .. })));
        let Some(HostTabEvent::Updated { change, .. }) = events.recv().await else {
            panic!("expected update");
        };
        assert!(change.affects_content());
        assert!(matches!(
            events.recv().await,
            Some(HostTabEvent::Removed { is_window_closing: false, .. })
        ));
    }

    #[tokio::test]
    async fn created_tab_takes_known_page_title() {
        let host = MemoryHost::new();
        host.set_page_title("https://a.test", "Alpha");
        let window = host.open_window();

        let tab = host
            .create_tab(CreateTab {
                window_id: window,
                url: "https://a.test".into(),
                pinned: true,
                index: None,
                active: false,
            })
            .await
            .unwrap();
        assert_eq!(tab.title.as_deref(), Some("Alpha"));
        assert!(tab.pinned);
    }

    #[tokio::test]
    async fn rejected_urls_fail_without_side_effects() {
        let host = MemoryHost::new();
        let window = host.open_window();
        host.reject_url("https://blocked.test");

        let result = host
            .create_tab(CreateTab {
                window_id: window,
                url: "https://blocked.test".into(),
                pinned: false,
                index: None,
                active: false,
            })
            .await;
        assert!(matches!(result, Err(HostError::Rejected { .. })));
        assert!(host.tabs(window).is_empty());
        assert!(host.operations().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_errors() {
        let host = MemoryHost::new();
        assert!(matches!(host.remove_tab(TabId(42)).await, Err(HostError::NoSuchTab(_))));
        assert!(matches!(host.query_tabs(WindowId(7)).await, Err(HostError::NoSuchWindow(_))));
        assert!(matches!(host.focus_window(WindowId(7)).await, Err(HostError::NoSuchWindow(_))));
    }

    #[tokio::test]
    async fn closing_window_flags_removals() {
        let host = MemoryHost::new();
        let mut events = host.subscribe();
        let window = host.open_window();
        host.open_tab(window, "https://a.test", "A").unwrap();
        let _ = events.recv().await;

        host.close_window(window).unwrap();
        assert!(matches!(
            events.recv().await,
            Some(HostTabEvent::Removed { is_window_closing: true, .. })
        ));
        assert!(host.windows().is_empty());
    }
}
