use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tably_common::types::{WindowId, WorkspaceCode};

use crate::security::ensure_owner_only_file;
use crate::sync::registry::BindingStore;

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE window_bindings (
    window_id       INTEGER PRIMARY KEY,
    workspace_id    TEXT NOT NULL,
    bound_at        TEXT NOT NULL
);

CREATE INDEX window_bindings_workspace_idx
    ON window_bindings (workspace_id);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

/// Local SQLite state: window→workspace bindings that must survive a restart.
#[derive(Debug)]
pub struct MetaDb {
    conn: Connection,
}

impl MetaDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create meta.db parent directory `{}`", parent.display())
            })?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("failed to open meta.db at `{}`", path.display()))?;
        ensure_owner_only_file(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            ",
        )
        .context("failed to configure sqlite pragmas for meta.db")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn)
    }

    pub fn load_bindings(&self) -> Result<BTreeMap<WindowId, WorkspaceCode>> {
        let mut stmt = self
            .conn
            .prepare("SELECT window_id, workspace_id FROM window_bindings ORDER BY window_id")
            .context("failed to prepare binding query")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .context("failed to query window bindings")?;

        let mut bindings = BTreeMap::new();
        for row in rows {
            let (window_id, raw_code) = row.context("failed to read window binding row")?;
            match WorkspaceCode::parse(&raw_code) {
                Ok(code) => {
                    bindings.insert(WindowId(window_id), code);
                }
                Err(error) => {
                    tracing::warn!(window = window_id, code = %raw_code, %error, "dropping unreadable binding");
                }
            }
        }
        Ok(bindings)
    }

    /// Replace the stored bindings with `bindings` in one transaction.
    pub fn replace_bindings(&mut self, bindings: &BTreeMap<WindowId, WorkspaceCode>) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start binding transaction")?;
        let existing: BTreeMap<i64, String> = {
            let mut stmt = tx
                .prepare("SELECT window_id, workspace_id FROM window_bindings")
                .context("failed to prepare binding query")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
                .context("failed to query window bindings")?;
            let existing = rows
                .collect::<rusqlite::Result<BTreeMap<i64, String>>>()
                .context("failed to read window bindings")?;
            existing
        };

        for window_id in existing.keys() {
            if !bindings.contains_key(&WindowId(*window_id)) {
                tx.execute("DELETE FROM window_bindings WHERE window_id = ?1", params![window_id])
                    .with_context(|| format!("failed to delete binding for window {window_id}"))?;
            }
        }
        for (window, code) in bindings {
            if existing.get(&window.0).map(String::as_str) == Some(code.as_str()) {
                continue;
            }
            tx.execute(
                "INSERT INTO window_bindings (window_id, workspace_id, bound_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(window_id) DO UPDATE SET
                    workspace_id = excluded.workspace_id,
                    bound_at = excluded.bound_at",
                params![window.0, code.as_str()],
            )
            .with_context(|| format!("failed to store binding for window {window}"))?;
        }

        tx.commit().context("failed to commit window bindings")
    }
}

impl BindingStore for MetaDb {
    fn load(&self) -> Result<BTreeMap<WindowId, WorkspaceCode>> {
        self.load_bindings()
    }

    fn save(&mut self, bindings: &BTreeMap<WindowId, WorkspaceCode>) -> Result<()> {
        self.replace_bindings(bindings)
    }
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply meta.db migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}
