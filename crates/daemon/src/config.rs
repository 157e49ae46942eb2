// Local configuration for the daemon.
//
// Global config: `~/.tably/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tably_common::types::WriterId;

use crate::security::{ensure_owner_only_dir, ensure_owner_only_file};
use crate::sync::SyncTuning;

/// Root directory for tably state: `~/.tably/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tably"))
}

/// Path to the global config file: `~/.tably/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

// ── Global config ──────────────────────────────────────────────────

/// Daemon configuration at `~/.tably/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GlobalConfig {
    /// Document store URL (e.g. `http://127.0.0.1:8787`). Unset means an
    /// in-process store, which only syncs windows of this daemon.
    pub store_url: Option<String>,
    /// Fixed writer identity. A fresh one is generated per process if unset.
    pub writer_id: Option<String>,
    /// Sync timing.
    pub sync: SyncConfig,
    /// Tab categorizer settings.
    pub categorizer: CategorizerConfig,
}

impl GlobalConfig {
    /// Load from `~/.tably/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to `~/.tably/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
            ensure_owner_only_dir(parent)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io).and_then(|_| {
            ensure_owner_only_file(path)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))
        })
    }

    /// The configured writer, or a newly generated one.
    pub fn writer(&self) -> WriterId {
        match self.writer_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => WriterId::new(id),
            _ => WriterId::generate(),
        }
    }
}

/// Sync timing in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub throttle_ms: u64,
    pub debounce_ms: u64,
    pub init_settle_ms: u64,
    pub echo_ttl_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let tuning = SyncTuning::default();
        Self {
            throttle_ms: millis(tuning.throttle),
            debounce_ms: millis(tuning.debounce),
            init_settle_ms: millis(tuning.init_settle),
            echo_ttl_ms: millis(tuning.echo_ttl),
            connect_timeout_ms: millis(tuning.connect_timeout),
        }
    }
}

impl SyncConfig {
    pub fn to_tuning(&self) -> SyncTuning {
        SyncTuning {
            throttle: Duration::from_millis(self.throttle_ms),
            debounce: Duration::from_millis(self.debounce_ms),
            init_settle: Duration::from_millis(self.init_settle_ms),
            echo_ttl: Duration::from_millis(self.echo_ttl_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ..SyncTuning::default()
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Local language model used to group tabs. Without `model` the keyword
/// categorizer is used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct CategorizerConfig {
    /// Model server base URL. Defaults to a local Ollama.
    pub model_url: Option<String>,
    /// Model name (e.g. `llama3.2`).
    pub model: Option<String>,
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_sync_tuning() {
        let cfg = GlobalConfig::default();
        assert!(cfg.store_url.is_none());
        assert!(cfg.writer_id.is_none());
        assert_eq!(cfg.sync.throttle_ms, 1000);
        assert_eq!(cfg.sync.debounce_ms, 500);
        assert_eq!(cfg.sync.init_settle_ms, 2000);
        assert_eq!(cfg.sync.echo_ttl_ms, 3000);
        assert_eq!(cfg.sync.connect_timeout_ms, 5000);
        assert_eq!(cfg.sync.to_tuning(), SyncTuning::default());
    }

    #[test]
    fn roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let cfg = GlobalConfig {
            store_url: Some("http://127.0.0.1:8787".into()),
            writer_id: Some("user_1_fixed".into()),
            sync: SyncConfig { debounce_ms: 250, ..SyncConfig::default() },
            categorizer: CategorizerConfig {
                model_url: Some("http://127.0.0.1:11434".into()),
                model: Some("llama3.2".into()),
            },
        };
        cfg.save_to(&path).unwrap();
        let loaded = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
store_url = "https://relay.example.com"

[sync]
throttle_ms = 250
"#;
        let cfg: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.store_url.as_deref(), Some("https://relay.example.com"));
        let tuning = cfg.sync.to_tuning();
        assert_eq!(tuning.throttle, Duration::from_millis(250));
        assert_eq!(tuning.debounce, Duration::from_millis(500));
        assert!(cfg.categorizer.model.is_none());
    }

    #[test]
    fn unknown_categorizer_keys_are_rejected() {
        let toml_str = r#"
[categorizer]
api_key = "sk-prod"
"#;
        let error = toml::from_str::<GlobalConfig>(toml_str).expect_err("parse should fail");
        assert!(error.to_string().contains("unknown field `api_key`"));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            GlobalConfig::load_from(&dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn configured_writer_is_used_verbatim() {
        let cfg = GlobalConfig { writer_id: Some(" user_1_fixed ".into()), ..Default::default() };
        assert_eq!(cfg.writer(), WriterId::new("user_1_fixed"));

        let blank = GlobalConfig { writer_id: Some("  ".into()), ..Default::default() };
        assert!(blank.writer().as_str().starts_with("user_"));
    }

    #[cfg(unix)]
    #[test]
    fn saved_config_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        GlobalConfig::default().save_to(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn global_dir_is_under_home() {
        let dir = global_dir().expect("home dir should resolve");
        assert!(dir.ends_with(".tably"));
    }
}
