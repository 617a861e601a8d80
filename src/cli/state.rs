use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

/// Removes the cache database and its sqlite sidecars. Returns whether
/// anything existed.
pub(crate) fn remove_cache_db_files(path: &Path) -> Result<bool> {
    let mut removed = false;
    for candidate in [
        path.to_path_buf(),
        cache_db_sidecar_path(path, "-wal"),
        cache_db_sidecar_path(path, "-shm"),
        cache_db_sidecar_path(path, "-journal"),
    ] {
        if !candidate.exists() {
            continue;
        }

        fs::remove_file(&candidate)
            .with_context(|| format!("failed to remove cache db file: {}", candidate.display()))?;
        removed = true;
    }

    Ok(removed)
}

fn cache_db_sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}
