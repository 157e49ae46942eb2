// Owner-only permissions for everything the daemon writes under `~/.tably/`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

const OWNER_ONLY_DIR_MODE: u32 = 0o700;
const OWNER_ONLY_FILE_MODE: u32 = 0o600;

/// Tighten a directory to `0700`. Missing paths are left alone.
pub fn ensure_owner_only_dir(path: &Path) -> Result<()> {
    restrict_mode(path, OWNER_ONLY_DIR_MODE)
}

/// Tighten a file (config, pid file, socket, `meta.db`) to `0600`.
pub fn ensure_owner_only_file(path: &Path) -> Result<()> {
    restrict_mode(path, OWNER_ONLY_FILE_MODE)
}

#[cfg(unix)]
fn restrict_mode(path: &Path, wanted: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !path.exists() {
        return Ok(());
    }

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to read metadata for `{}`", path.display()))?;
    if metadata.permissions().mode() & 0o777 == wanted {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(wanted))
        .with_context(|| format!("failed to set mode {wanted:o} on `{}`", path.display()))
}

#[cfg(not(unix))]
fn restrict_mode(path: &Path, _wanted: u32) -> Result<()> {
    let _ = path;
    Ok(())
}
