//! Per-case and corpus-wide statistics.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use super::record::CaseRecord;
use super::storage::{load_case_dir, CaseStorage, STATISTICS_FILE};
use crate::persist;

pub const GLOBAL_STATISTICS_FILE: &str = "global_statistics.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseStatistics {
    pub case_id: String,
    pub baseline_similarity: f64,
    pub final_similarity: f64,
    pub total_improvement: f64,
    pub steps_total: u32,
    pub steps_accepted: u32,
    pub steps_rejected: u32,
    pub best_step: Option<String>,
    pub best_gain: Option<f64>,
    pub worst_step: Option<String>,
    pub worst_gain: Option<f64>,
    pub total_processing_time_ms: f64,
}

impl CaseStatistics {
    /// Steps with no decision count as rejected.
    pub fn from_record(record: &CaseRecord) -> Self {
        let baseline = record.baseline.similarity.unwrap_or(0.0);
        let final_sim = record.final_summary.final_similarity.unwrap_or(baseline);
        let accepted = record.steps.iter().filter(|s| s.is_accepted()).count() as u32;
        let total = record.steps.len() as u32;

        // First maximum / first minimum in execution order.
        let mut best: Option<(&str, f64)> = None;
        let mut worst: Option<(&str, f64)> = None;
        for step in &record.steps {
            let g = step.gain();
            if best.map_or(true, |(_, b)| g > b) {
                best = Some((&step.step_type, g));
            }
            if worst.map_or(true, |(_, w)| g < w) {
                worst = Some((&step.step_type, g));
            }
        }

        Self {
            case_id: record.case_id.clone(),
            baseline_similarity: baseline,
            final_similarity: final_sim,
            total_improvement: final_sim - baseline,
            steps_total: total,
            steps_accepted: accepted,
            steps_rejected: total - accepted,
            best_step: best.map(|(s, _)| s.to_string()),
            best_gain: best.map(|(_, g)| g),
            worst_step: worst.map(|(s, _)| s.to_string()),
            worst_gain: worst.map(|(_, g)| g),
            total_processing_time_ms: record
                .steps
                .iter()
                .filter_map(|s| s.processing_time_ms)
                .sum(),
        }
    }
}

pub struct CaseStatisticsGenerator;

impl CaseStatisticsGenerator {
    /// Compute and write `statistics.json` for the case stored in `case_dir`.
    pub fn generate(case_dir: &Path) -> Result<CaseStatistics> {
        let record = load_case_dir(case_dir)?;
        let stats = CaseStatistics::from_record(&record);
        persist::write_json_atomic(&case_dir.join(STATISTICS_FILE), &stats)?;
        info!(
            case_id = %stats.case_id,
            improvement = format!("{:+.2}", stats.total_improvement),
            accepted = stats.steps_accepted,
            rejected = stats.steps_rejected,
            "case statistics generated"
        );
        Ok(stats)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionUsage {
    pub avg_gain: f64,
    pub accept_rate: f64,
    pub usage_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStatistics {
    pub total_cases: u32,
    pub average_similarity_improvement: f64,
    pub action_statistics: BTreeMap<String, ActionUsage>,
    pub generated_at: Option<String>,
}

impl GlobalStatistics {
    pub fn from_cases(cases: &[CaseRecord]) -> Self {
        #[derive(Default)]
        struct Acc {
            count: u32,
            accepted: u32,
            delta_sum: f64,
        }

        let mut per_action: BTreeMap<String, Acc> = BTreeMap::new();
        let mut improvement_sum = 0.0;
        for case in cases {
            improvement_sum += CaseStatistics::from_record(case).total_improvement;
            for step in &case.steps {
                let acc = per_action.entry(step.step_type.clone()).or_default();
                acc.count += 1;
                acc.delta_sum += step.gain();
                if step.is_accepted() {
                    acc.accepted += 1;
                }
            }
        }

        let action_statistics = per_action
            .into_iter()
            .map(|(name, a)| {
                let n = a.count.max(1) as f64;
                (
                    name,
                    ActionUsage {
                        avg_gain: a.delta_sum / n,
                        accept_rate: a.accepted as f64 / n,
                        usage_count: a.count,
                    },
                )
            })
            .collect();

        Self {
            total_cases: cases.len() as u32,
            average_similarity_improvement: if cases.is_empty() {
                0.0
            } else {
                improvement_sum / cases.len() as f64
            },
            action_statistics,
            generated_at: None,
        }
    }
}

pub struct GlobalStatisticsGenerator {
    storage: CaseStorage,
}

impl GlobalStatisticsGenerator {
    pub fn new(storage: CaseStorage) -> Self {
        Self { storage }
    }

    pub fn output_path(&self) -> PathBuf {
        self.storage.root().join(GLOBAL_STATISTICS_FILE)
    }

    /// Scan every stored case and write `global_statistics.json`.
    ///
    /// An empty corpus writes nothing and returns `None`.
    pub fn generate(&self) -> Result<Option<GlobalStatistics>> {
        let cases = self.storage.load_all_cases();
        if cases.is_empty() {
            info!(root = %self.storage.root().display(), "no cases stored, global statistics skipped");
            return Ok(None);
        }
        let mut stats = GlobalStatistics::from_cases(&cases);
        stats.generated_at = Some(chrono::Utc::now().to_rfc3339());
        persist::write_json_atomic(&self.output_path(), &stats)?;
        info!(
            cases = stats.total_cases,
            actions = stats.action_statistics.len(),
            avg_improvement = format!("{:+.3}", stats.average_similarity_improvement),
            "global statistics generated"
        );
        Ok(Some(stats))
    }
}
