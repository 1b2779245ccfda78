//! # Learner — Case History to Learned Policy
//!
//! | Module | Role |
//! |--------|------|
//! | [`record`] | `CaseRecord` / `StepRecord` data model |
//! | [`parser`] | case log text → `CaseRecord` (recovery path) |
//! | [`storage`] | per-case JSON folders |
//! | [`statistics`] | per-case and global statistics |
//! | [`builder`] | corpus → `LearnedPolicy` |
//! | [`updater`] | atomic `learned_policy.json` replacement |
//! | [`manager`] | ingestion gate and rebuild cadence |

pub mod builder;
pub mod manager;
pub mod parser;
pub mod record;
pub mod statistics;
pub mod storage;
pub mod updater;

pub use builder::{build_from, PolicyBuilder};
pub use manager::{LearnerConfig, LearnerManager, LearnerState, ProcessOutcome};
pub use record::{CaseMetadata, CaseRecord, StepRecord};
pub use statistics::{
    CaseStatistics, CaseStatisticsGenerator, GlobalStatistics, GlobalStatisticsGenerator,
};
pub use storage::CaseStorage;
pub use updater::PolicyUpdater;
