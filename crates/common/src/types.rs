// Core domain types shared across all Tably crates.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::identity::SyncIdentity;

/// Chrome's sentinel for "not in a tab group".
pub const TAB_GROUP_ID_NONE: i64 = -1;

pub const WORKSPACE_CODE_LEN: usize = 6;
pub const WORKSPACE_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const WRITER_SUFFIX_LEN: usize = 9;
const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

// ── Host identifiers ───────────────────────────────────────────────

/// Browser-local window identifier. Meaningless on any other machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub i64);

/// Browser-local tab identifier. Meaningless on any other machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workspace code ─────────────────────────────────────────────────

/// Short, human-shareable workspace identifier: six characters of `A-Z0-9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceCode(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkspaceCodeError {
    #[error("workspace code must be {WORKSPACE_CODE_LEN} characters, got {0}")]
    Length(usize),
    #[error("workspace code contains invalid character `{0}`")]
    InvalidChar(char),
}

impl WorkspaceCode {
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let alphabet_len = WORKSPACE_CODE_ALPHABET.len();
        let code = (0..WORKSPACE_CODE_LEN)
            .map(|_| WORKSPACE_CODE_ALPHABET[rng.gen_range(0..alphabet_len)] as char)
            .collect();
        Self(code)
    }

    /// Parse user input. Surrounding whitespace is ignored and lowercase
    /// letters are accepted, since codes are read aloud and retyped.
    pub fn parse(raw: &str) -> Result<Self, WorkspaceCodeError> {
        let code = raw.trim().to_ascii_uppercase();
        let len = code.chars().count();
        if len != WORKSPACE_CODE_LEN {
            return Err(WorkspaceCodeError::Length(len));
        }
        let is_valid = |c: &char| c.is_ascii() && WORKSPACE_CODE_ALPHABET.contains(&(*c as u8));
        if let Some(bad) = code.chars().find(|c| !is_valid(c)) {
            return Err(WorkspaceCodeError::InvalidChar(bad));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkspaceCode {
    type Error = WorkspaceCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WorkspaceCode> for String {
    fn from(code: WorkspaceCode) -> Self {
        code.0
    }
}

impl fmt::Display for WorkspaceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for WorkspaceCode {
    type Err = WorkspaceCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── Writer identity ────────────────────────────────────────────────

/// Identity stamped into `updatedBy` on every write from this process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriterId(String);

impl WriterId {
    /// `user_{unix_millis}_{9 base36 chars}`.
    pub fn generate() -> Self {
        Self::generate_at(Utc::now(), &mut rand::thread_rng())
    }

    pub fn generate_at<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> Self {
        let suffix: String = (0..WRITER_SUFFIX_LEN)
            .map(|_| BASE36_ALPHABET[rng.gen_range(0..BASE36_ALPHABET.len())] as char)
            .collect();
        Self(format!("user_{}_{suffix}", now.timestamp_millis()))
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Workspace documents ────────────────────────────────────────────

/// Workspace metadata document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub code: WorkspaceCode,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Writer identities that created or joined the workspace.
    #[serde(default)]
    pub participants: Vec<WriterId>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Workspace {
    pub fn new(code: WorkspaceCode, name: impl Into<String>, creator: WriterId) -> Self {
        Self {
            code,
            name: name.into(),
            created_at: Utc::now(),
            participants: vec![creator],
            is_active: true,
        }
    }

    /// Add a participant; returns false when already present.
    pub fn add_participant(&mut self, writer: &WriterId) -> bool {
        if self.participants.contains(writer) {
            return false;
        }
        self.participants.push(writer.clone());
        true
    }
}

fn default_true() -> bool {
    true
}

/// One tab in the workspace state document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TabRecord {
    pub sync_id: SyncIdentity,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fav_icon_url: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<WriterId>,
    /// Unix millis of the write that produced this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// The authoritative tab list of a workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    #[serde(default)]
    pub tabs: Vec<TabRecord>,
    /// Unix millis of the last write.
    #[serde(default)]
    pub last_update: i64,
    #[serde(default)]
    pub updated_by: Option<WriterId>,
}

impl WorkspaceState {
    pub fn find(&self, identity: &SyncIdentity) -> Option<&TabRecord> {
        self.tabs.iter().find(|record| &record.sync_id == identity)
    }
}

/// Top-level merge-write: present fields overwrite, `tabs` replaces the list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tabs: Option<Vec<TabRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<WriterId>,
}

impl StatePatch {
    /// Full-list replacement stamped with the writer and time.
    pub fn replace_tabs(tabs: Vec<TabRecord>, writer: &WriterId, now_millis: i64) -> Self {
        Self { tabs: Some(tabs), last_update: Some(now_millis), updated_by: Some(writer.clone()) }
    }

    pub fn apply_to(self, state: &mut WorkspaceState) {
        if let Some(tabs) = self.tabs {
            state.tabs = tabs;
        }
        if let Some(last_update) = self.last_update {
            state.last_update = last_update;
        }
        if let Some(updated_by) = self.updated_by {
            state.updated_by = Some(updated_by);
        }
    }
}

// ── Local browser tabs ─────────────────────────────────────────────

/// A tab as reported by the host browser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserTab {
    pub id: TabId,
    pub window_id: WindowId,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub group_id: Option<i64>,
}

impl BrowserTab {
    pub fn identity(&self) -> SyncIdentity {
        SyncIdentity::derive(self.url.as_deref(), self.title.as_deref(), self.pinned)
    }

    /// Privacy-filtered projection for the workspace document.
    pub fn to_record(&self, writer: &WriterId, now_millis: i64) -> TabRecord {
        TabRecord {
            sync_id: self.identity(),
            url: self.url.clone().unwrap_or_default(),
            title: self.title.clone().unwrap_or_default(),
            fav_icon_url: self.fav_icon_url.clone().unwrap_or_default(),
            pinned: self.pinned,
            index: self.index,
            group_id: self.group_id.filter(|id| *id != TAB_GROUP_ID_NONE),
            updated_by: Some(writer.clone()),
            timestamp: Some(now_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    use super::*;

    #[test]
    fn generated_codes_use_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let code = WorkspaceCode::generate_with(&mut rng);
            assert_eq!(code.as_str().len(), WORKSPACE_CODE_LEN);
            assert!(WorkspaceCode::parse(code.as_str()).is_ok());
        }
    }

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        assert_eq!(WorkspaceCode::parse(" ab12c9 ").unwrap().as_str(), "AB12C9");
    }

    #[test]
    fn parse_rejects_bad_codes() {
        assert_eq!(WorkspaceCode::parse("ABC"), Err(WorkspaceCodeError::Length(3)));
        assert_eq!(WorkspaceCode::parse("AB-2C9"), Err(WorkspaceCodeError::InvalidChar('-')));
        assert!(WorkspaceCode::parse("ÄB12C9").is_err());
    }

    #[test]
    fn code_deserialization_validates() {
        assert!(serde_json::from_value::<WorkspaceCode>(json!("AB12C9")).is_ok());
        assert!(serde_json::from_value::<WorkspaceCode>(json!("nope")).is_err());
    }

    #[test]
    fn writer_id_has_expected_shape() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let writer = WriterId::generate_at(now, &mut StdRng::seed_from_u64(1));
        let parts: Vec<&str> = writer.as_str().split('_').collect();
        assert_eq!(parts[0], "user");
        assert_eq!(parts[1], "1700000000123");
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn state_document_uses_camel_case_wire_names() {
        let writer = WriterId::new("user_1_abc");
        let tab = BrowserTab {
            id: TabId(4),
            window_id: WindowId(1),
            index: 2,
            url: Some("https://example.com".into()),
            title: Some("Example".into()),
            fav_icon_url: None,
            pinned: false,
            group_id: Some(TAB_GROUP_ID_NONE),
        };
        let state = WorkspaceState {
            tabs: vec![tab.to_record(&writer, 10)],
            last_update: 10,
            updated_by: Some(writer),
        };

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["updatedBy"], "user_1_abc");
        assert_eq!(value["lastUpdate"], 10);
        assert_eq!(value["tabs"][0]["syncId"], "https://example.com_Example_");
        assert_eq!(value["tabs"][0]["favIconUrl"], "");
        assert_eq!(value["tabs"][0]["groupId"], serde_json::Value::Null);
        assert_eq!(value["tabs"][0]["index"], 2);
    }

    #[test]
    fn sparse_remote_document_decodes_with_defaults() {
        let state: WorkspaceState =
            serde_json::from_value(json!({ "tabs": [{ "syncId": "x", "url": "https://x" }] }))
                .unwrap();
        assert_eq!(state.tabs[0].index, 0);
        assert!(!state.tabs[0].pinned);
        assert!(state.updated_by.is_none());
    }

    #[test]
    fn patch_overwrites_only_present_fields() {
        let mut state = WorkspaceState {
            tabs: vec![],
            last_update: 5,
            updated_by: Some(WriterId::new("a")),
        };
        StatePatch { last_update: Some(9), ..Default::default() }.apply_to(&mut state);
        assert_eq!(state.last_update, 9);
        assert_eq!(state.updated_by, Some(WriterId::new("a")));
    }

    #[test]
    fn add_participant_is_idempotent() {
        let code = WorkspaceCode::parse("AB12C9").unwrap();
        let mut workspace = Workspace::new(code, "Team", WriterId::new("a"));
        assert!(workspace.add_participant(&WriterId::new("b")));
        assert!(!workspace.add_participant(&WriterId::new("b")));
        assert_eq!(workspace.participants.len(), 2);
    }
}
