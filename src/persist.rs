//! # Persist — Atomic JSON Artifacts
//!
//! Every file the pipeline and learner produce (case metadata, steps,
//! statistics, learned policy, learner state) goes through this module.
//!
//! ## Atomic Writes
//!
//! Documents are written to a sibling `.tmp` file and then renamed over the
//! target. A reader therefore sees either the previous document or the new
//! one, never a half-written file. The rename stays inside one directory so
//! it is atomic on the filesystems we run on.
//!
//! ## Tolerant Reads
//!
//! [`read_json_opt`] treats a missing file as `None` and logs (rather than
//! propagates) parse failures, for artifacts whose absence is a normal state.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_os_string();
    p.push(".tmp");
    PathBuf::from(p)
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Parent directories are created on demand.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())
}

/// Atomically replace `path` with `bytes` (write `.tmp`, then rename).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Read and deserialize a JSON document, failing on absence or bad content.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Read a JSON document that may legitimately not exist yet.
///
/// Missing file → `None`. Unreadable or malformed file → `None` plus a warning.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match read_json(path) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable document");
            None
        }
    }
}

/// SHA-256 hex digest of a byte string.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
