// Boundary filter for URLs that must never enter a workspace document.

use crate::types::BrowserTab;

/// Browser-internal and extension schemes. Matched case-insensitively.
const PRIVILEGED_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "chrome-search://",
    "about:",
    "edge://",
    "brave://",
    "moz-extension://",
    "devtools://",
    "view-source:",
];

/// Default new-tab pages; a tab showing one of these has not loaded anything yet.
const NEW_TAB_PAGES: &[&str] =
    &["chrome://newtab/", "chrome://newtab", "about:newtab", "about:blank", "edge://newtab/"];

pub fn is_privileged_url(url: &str) -> bool {
    let url = url.trim_start();
    PRIVILEGED_PREFIXES.iter().any(|prefix| starts_with_ignore_case(url, prefix))
}

pub fn is_new_tab_page(url: &str) -> bool {
    let url = url.trim();
    NEW_TAB_PAGES.iter().any(|page| url.eq_ignore_ascii_case(page))
}

/// True when a URL may be published to or created from a workspace document.
pub fn is_syncable(url: Option<&str>) -> bool {
    match url {
        Some(url) if !url.trim().is_empty() => !is_new_tab_page(url) && !is_privileged_url(url),
        _ => false,
    }
}

/// Whether a local tab qualifies for synchronization.
pub fn is_syncable_tab(tab: &BrowserTab) -> bool {
    is_syncable(tab.url.as_deref())
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.is_char_boundary(prefix.len())
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
}
