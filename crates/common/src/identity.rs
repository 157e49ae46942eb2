// Sync Identity: the cross-machine key for a logical tab.
//
// Derived from (url, title prefix, pinned). Native tab ids are process-local
// and the tab index changes on every reorder, so neither participates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of title characters that participate in the identity.
pub const TITLE_PREFIX_CHARS: usize = 20;

/// Stand-in for a tab that has no URL yet.
pub const NEW_TAB_PLACEHOLDER: &str = "newtab";

const PINNED_MARKER: &str = "pinned";

/// Derived key used to correlate the same logical tab across machines.
///
/// This is a heuristic, not a unique key: two tabs with the same URL, the
/// same first [`TITLE_PREFIX_CHARS`] title characters and the same pinned
/// state collapse into one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncIdentity(String);

impl SyncIdentity {
    /// Derive the identity for a tab. Pure and deterministic; missing inputs
    /// degrade to fixed placeholders instead of failing.
    pub fn derive(url: Option<&str>, title: Option<&str>, pinned: bool) -> Self {
        let url = match url {
            Some(url) if !url.trim().is_empty() => url,
            _ => NEW_TAB_PLACEHOLDER,
        };
        let title_prefix: String =
            title.unwrap_or_default().chars().take(TITLE_PREFIX_CHARS).collect();
        let pinned_marker = if pinned { PINNED_MARKER } else { "" };

        Self(format!("{url}_{title_prefix}_{pinned_marker}"))
    }

    /// Wrap an identity received from a remote document as-is.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
