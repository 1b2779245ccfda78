//! # Learner Manager — Case Ingestion and Rebuild Cadence
//!
//! Drives the learning loop after each finished case:
//!
//! ```text
//! log / record → store steps+metadata → processed_cases += 1 → persist state
//!              → statistics.json → (processed_cases % rebuild_interval == 0)
//!                                    → learned_policy.json + global statistics
//! ```
//!
//! `learner_state.json` is the only rebuild trigger. It is written after every
//! stored case, so a restart resumes the cadence where it stopped. Ingestion
//! holds the state lock for the whole sequence; cases are processed one at a
//! time.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

use super::builder::PolicyBuilder;
use super::parser;
use super::record::CaseRecord;
use super::statistics::{CaseStatisticsGenerator, GlobalStatistics, GlobalStatisticsGenerator};
use super::storage::CaseStorage;
use super::updater::PolicyUpdater;
use crate::persist;
use crate::policy::LearnedPolicy;

pub const STATE_FILE: &str = "learner_state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub enabled: bool,
    /// Rebuild the learned policy every N processed cases.
    pub rebuild_interval: u32,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig {
            enabled: true,
            rebuild_interval: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerState {
    #[serde(default)]
    pub processed_cases: u64,
}

/// What one ingestion did.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub case_id: String,
    pub case_dir: PathBuf,
    pub processed_cases: u64,
    /// Present when this case triggered a rebuild that produced a policy.
    pub rebuilt: Option<LearnedPolicy>,
}

pub struct LearnerManager {
    config: LearnerConfig,
    storage: CaseStorage,
    policy_path: PathBuf,
    state: Mutex<LearnerState>,
    rebuilds: AtomicU32,
}

impl LearnerManager {
    pub fn new(config: LearnerConfig, storage: CaseStorage, policy_path: impl Into<PathBuf>) -> Self {
        let state = persist::read_json_opt(&storage.root().join(STATE_FILE)).unwrap_or_default();
        LearnerManager {
            config,
            storage,
            policy_path: policy_path.into(),
            state: Mutex::new(state),
            rebuilds: AtomicU32::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn storage(&self) -> &CaseStorage {
        &self.storage
    }

    pub fn policy_path(&self) -> &Path {
        &self.policy_path
    }

    pub fn state(&self) -> LearnerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rebuilds run by this instance.
    pub fn rebuild_count(&self) -> u32 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    /// Parse a finished case log and ingest it. `Ok(None)` when disabled.
    pub fn process_case(&self, log_path: &Path) -> Result<Option<ProcessOutcome>> {
        if !self.config.enabled {
            info!(log = %log_path.display(), "learner disabled, case not processed");
            return Ok(None);
        }
        if !log_path.is_file() {
            bail!("case log {} not found", log_path.display());
        }
        let record = parser::parse_file(log_path);
        self.ingest(record).map(Some)
    }

    /// Ingest a record built from pipeline events. `Ok(None)` when disabled.
    pub fn process_record(&self, record: CaseRecord) -> Result<Option<ProcessOutcome>> {
        if !self.config.enabled {
            info!(case_id = %record.case_id, "learner disabled, case not processed");
            return Ok(None);
        }
        self.ingest(record).map(Some)
    }

    fn ingest(&self, record: CaseRecord) -> Result<ProcessOutcome> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let case_id = self.storage.resolve_case_id(&record);
        if case_id != record.case_id {
            info!(from = %record.case_id, to = %case_id, "case stored under new id");
        }
        let case_dir = self.storage.save_record(&case_id, &record)?;

        state.processed_cases += 1;
        persist::write_json_atomic(&self.storage.root().join(STATE_FILE), &*state)?;

        if let Err(e) = CaseStatisticsGenerator::generate(&case_dir) {
            warn!(case_id = %case_id, error = %e, "case statistics failed");
        }

        let processed = state.processed_cases;
        let interval = u64::from(self.config.rebuild_interval.max(1));
        info!(case_id = %case_id, processed, interval, "case processed");

        // The case is already stored; a failed rebuild waits for the next one.
        let rebuilt = if processed % interval == 0 {
            self.build_policy().unwrap_or_else(|e| {
                warn!(case_id = %case_id, error = %e, "policy rebuild failed");
                None
            })
        } else {
            None
        };

        Ok(ProcessOutcome {
            case_id,
            case_dir,
            processed_cases: processed,
            rebuilt,
        })
    }

    /// Rebuild `learned_policy.json` and global statistics from every stored case.
    pub fn build_policy(&self) -> Result<Option<LearnedPolicy>> {
        if !self.config.enabled {
            info!("learner disabled, policy rebuild skipped");
            return Ok(None);
        }
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        let updater = PolicyUpdater::new(PolicyBuilder::new(self.storage.clone()), &self.policy_path);
        let policy = updater.update_policy()?;
        if let Err(e) = self.global_statistics() {
            warn!(error = %e, "global statistics failed");
        }
        info!(
            rebuilt = policy.is_some(),
            path = %self.policy_path.display(),
            "policy rebuild finished"
        );
        Ok(policy)
    }

    pub fn global_statistics(&self) -> Result<Option<GlobalStatistics>> {
        GlobalStatisticsGenerator::new(self.storage.clone()).generate()
    }
}
