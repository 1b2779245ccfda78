//! # Case Storage — Per-Case JSON Folders
//!
//! ```text
//! <root>/
//!   CASE_0001/
//!     steps.json        written first
//!     metadata.json     completion marker (written last)
//!     statistics.json   per-case statistics
//!   global_statistics.json
//!   learner_state.json
//! ```
//!
//! Writes are whole-file atomic replacements. A folder without
//! `metadata.json` is an unfinished save and is invisible to
//! [`CaseStorage::load_all_cases`].

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::record::{CaseMetadata, CaseRecord, StepRecord, UNKNOWN_CASE};
use crate::persist;

pub const METADATA_FILE: &str = "metadata.json";
pub const STEPS_FILE: &str = "steps.json";
pub const STATISTICS_FILE: &str = "statistics.json";
const CASE_PREFIX: &str = "CASE_";

#[derive(Debug, Clone)]
pub struct CaseStorage {
    root: PathBuf,
}

impl CaseStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn case_dir(&self, case_id: &str) -> PathBuf {
        self.root.join(case_id)
    }

    fn checked_dir(&self, case_id: &str) -> Result<PathBuf> {
        if case_id.is_empty()
            || case_id.contains(['/', '\\'])
            || case_id == "."
            || case_id == ".."
        {
            bail!("invalid case id {case_id:?}");
        }
        Ok(self.case_dir(case_id))
    }

    /// Write `metadata.json`, stamping `saved_at` with the current time.
    pub fn save_metadata(&self, case_id: &str, metadata: &CaseMetadata) -> Result<PathBuf> {
        let path = self.checked_dir(case_id)?.join(METADATA_FILE);
        let mut doc = metadata.clone();
        doc.case_id = case_id.to_string();
        doc.saved_at = Some(chrono::Utc::now().to_rfc3339());
        persist::write_json_atomic(&path, &doc)?;
        debug!(case_id, path = %path.display(), "metadata saved");
        Ok(path)
    }

    pub fn save_steps(&self, case_id: &str, steps: &[StepRecord]) -> Result<PathBuf> {
        let path = self.checked_dir(case_id)?.join(STEPS_FILE);
        persist::write_json_atomic(&path, steps)?;
        debug!(case_id, steps = steps.len(), "steps saved");
        Ok(path)
    }

    /// Store a full record under `case_id`: steps, then metadata.
    pub fn save_record(&self, case_id: &str, record: &CaseRecord) -> Result<PathBuf> {
        self.save_steps(case_id, &record.steps)?;
        self.save_metadata(case_id, &record.metadata())?;
        info!(case_id, steps = record.steps.len(), "case stored");
        Ok(self.case_dir(case_id))
    }

    /// Load one case. A missing `steps.json` loads as no steps.
    pub fn load_case(&self, case_id: &str) -> Result<CaseRecord> {
        let dir = self.checked_dir(case_id)?;
        load_case_dir(&dir)
    }

    /// Every complete case, sorted by case id. Unreadable folders are skipped.
    pub fn load_all_cases(&self) -> Vec<CaseRecord> {
        let dirs = self.case_dirs();
        let mut cases: Vec<CaseRecord> = dirs
            .par_iter()
            .filter_map(|dir| match load_case_dir(dir) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable case");
                    None
                }
            })
            .collect();
        cases.sort_by(|a, b| a.case_id.cmp(&b.case_id));
        cases
    }

    /// Case folders that carry a `metadata.json`, sorted by name.
    pub fn case_dirs(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.join(METADATA_FILE).is_file())
            .collect();
        dirs.sort();
        dirs
    }

    /// Next free `CASE_NNNN` id (highest existing number + 1).
    pub fn next_case_id(&self) -> String {
        let max = fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        e.file_name()
                            .to_str()
                            .and_then(|n| n.strip_prefix(CASE_PREFIX))
                            .and_then(|n| n.parse::<u32>().ok())
                    })
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        format!("{CASE_PREFIX}{:04}", max + 1)
    }

    /// Id to store `record` under: its own id when usable, so a re-ingest
    /// overwrites the stored case. Unknown or unsafe ids get a fresh one.
    pub fn resolve_case_id(&self, record: &CaseRecord) -> String {
        let id = record.case_id.as_str();
        if id != UNKNOWN_CASE && self.checked_dir(id).is_ok() {
            id.to_string()
        } else {
            self.next_case_id()
        }
    }
}

/// Load the case stored in `dir` (metadata required, steps optional).
pub fn load_case_dir(dir: &Path) -> Result<CaseRecord> {
    let metadata: CaseMetadata = persist::read_json(&dir.join(METADATA_FILE))?;
    let steps_path = dir.join(STEPS_FILE);
    let steps: Vec<StepRecord> = if steps_path.exists() {
        persist::read_json(&steps_path)?
    } else {
        Vec::new()
    };
    let mut record = CaseRecord::from_parts(metadata, steps);
    if record.case_id.is_empty() {
        record.case_id = dir
            .file_name()
            .and_then(|n| n.to_str())
            .context("case folder has no name")?
            .to_string();
    }
    Ok(record)
}
