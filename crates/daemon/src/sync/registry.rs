// Which local window mirrors which workspace.
//
// The registry is the only authority consulted before any sync work. It is
// loaded from durable storage on construction, so no query can be answered
// from an empty map after a restart, and every mutation is persisted
// immediately.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tably_common::types::{WindowId, WorkspaceCode};
use tracing::info;

/// Durable home of the window→workspace map.
pub trait BindingStore: Send {
    fn load(&self) -> Result<BTreeMap<WindowId, WorkspaceCode>>;
    fn save(&mut self, bindings: &BTreeMap<WindowId, WorkspaceCode>) -> Result<()>;
}

/// Volatile store. Clones share one map, which lets tests simulate a
/// process restart by building a second registry on a clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryBindingStore {
    saved: Arc<Mutex<BTreeMap<WindowId, WorkspaceCode>>>,
}

impl MemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BindingStore for MemoryBindingStore {
    fn load(&self) -> Result<BTreeMap<WindowId, WorkspaceCode>> {
        Ok(self.saved.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn save(&mut self, bindings: &BTreeMap<WindowId, WorkspaceCode>) -> Result<()> {
        *self.saved.lock().unwrap_or_else(|p| p.into_inner()) = bindings.clone();
        Ok(())
    }
}

pub struct MembershipRegistry {
    bindings: BTreeMap<WindowId, WorkspaceCode>,
    store: Box<dyn BindingStore>,
}

impl MembershipRegistry {
    /// Build the registry from whatever `store` holds.
    pub fn load(store: Box<dyn BindingStore>) -> Result<Self> {
        let mut registry = Self { bindings: BTreeMap::new(), store };
        registry.load_all()?;
        Ok(registry)
    }

    /// Replace the in-memory map with the persisted one.
    pub fn load_all(&mut self) -> Result<usize> {
        self.bindings = self.store.load()?;
        info!(windows = self.bindings.len(), "loaded window bindings");
        Ok(self.bindings.len())
    }

    pub fn persist(&mut self) -> Result<()> {
        self.store.save(&self.bindings)
    }

    /// Bind (or rebind) `window`. Returns the previous workspace if it changed.
    pub fn bind(&mut self, window: WindowId, code: WorkspaceCode) -> Result<Option<WorkspaceCode>> {
        let previous = self.bindings.insert(window, code);
        self.persist()?;
        Ok(previous)
    }

    pub fn unbind(&mut self, window: WindowId) -> Result<Option<WorkspaceCode>> {
        let previous = self.bindings.remove(&window);
        if previous.is_some() {
            self.persist()?;
        }
        Ok(previous)
    }

    /// Drop every window bound to `code`; returns the windows released.
    pub fn unbind_workspace(&mut self, code: &WorkspaceCode) -> Result<Vec<WindowId>> {
        let released = self.windows_for(code);
        if released.is_empty() {
            return Ok(released);
        }
        self.bindings.retain(|_, bound| bound != code);
        self.persist()?;
        Ok(released)
    }

    pub fn is_bound(&self, window: WindowId) -> Option<&WorkspaceCode> {
        self.bindings.get(&window)
    }

    pub fn windows_for(&self, code: &WorkspaceCode) -> Vec<WindowId> {
        self.bindings.iter().filter(|(_, bound)| *bound == code).map(|(w, _)| *w).collect()
    }

    pub fn bindings(&self) -> impl Iterator<Item = (WindowId, &WorkspaceCode)> + '_ {
        self.bindings.iter().map(|(window, code)| (*window, code))
    }

    pub fn workspaces(&self) -> BTreeSet<WorkspaceCode> {
        self.bindings.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}
