//! Structured reconstruction of one pipeline run.
//!
//! All maps are `BTreeMap` so serialized records are byte-stable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::policy::ActionKind;

pub const UNKNOWN_CASE: &str = "UNKNOWN_CASE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    #[serde(default)]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub strength: Option<String>,
    #[serde(default)]
    pub priority: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intelligence {
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub target_quality: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub actions: Vec<PlannedAction>,
}

/// One executed step. `accepted` is `None` when the log block was truncated
/// before its decision line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub strength: Option<String>,
    #[serde(default)]
    pub before_similarity: Option<f64>,
    #[serde(default)]
    pub after_similarity: Option<f64>,
    #[serde(default)]
    pub delta_similarity: Option<f64>,
    #[serde(default)]
    pub before_score: Option<f64>,
    #[serde(default)]
    pub after_score: Option<f64>,
    #[serde(default)]
    pub accepted: Option<bool>,
    #[serde(default)]
    pub processing_time_ms: Option<f64>,
}

impl StepRecord {
    pub fn new(step_type: &str) -> Self {
        Self {
            step_type: normalize_step_type(step_type),
            ..Default::default()
        }
    }

    /// Missing deltas count as zero gain.
    pub fn gain(&self) -> f64 {
        self.delta_similarity.unwrap_or(0.0)
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted == Some(true)
    }
}

/// Canonical lowercase action name; unknown types are lowercased verbatim.
pub fn normalize_step_type(raw: &str) -> String {
    match raw.parse::<ActionKind>() {
        Ok(kind) => kind.as_str().to_string(),
        Err(_) => raw.trim().to_ascii_lowercase(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalSummary {
    #[serde(default)]
    pub final_similarity: Option<f64>,
    #[serde(default)]
    pub best_score: Option<f64>,
    #[serde(default)]
    pub final_score: Option<f64>,
    #[serde(default)]
    pub accepted_actions: Option<u32>,
    #[serde(default)]
    pub rejected_actions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_log_path: Option<String>,
    #[serde(default)]
    pub baseline: BaselineRecord,
    #[serde(default)]
    pub quality_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub intelligence: Intelligence,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub final_summary: FinalSummary,
}

impl Default for CaseRecord {
    fn default() -> Self {
        Self {
            case_id: UNKNOWN_CASE.to_string(),
            raw_log_path: None,
            baseline: BaselineRecord::default(),
            quality_scores: BTreeMap::new(),
            intelligence: Intelligence::default(),
            steps: Vec::new(),
            final_summary: FinalSummary::default(),
        }
    }
}

impl CaseRecord {
    /// True when nothing at all was recovered.
    pub fn is_empty(&self) -> bool {
        self.baseline == BaselineRecord::default()
            && self.quality_scores.is_empty()
            && self.intelligence == Intelligence::default()
            && self.steps.is_empty()
            && self.final_summary == FinalSummary::default()
    }

    pub fn metadata(&self) -> CaseMetadata {
        CaseMetadata {
            case_id: self.case_id.clone(),
            baseline: self.baseline.clone(),
            quality_scores: self.quality_scores.clone(),
            intelligence: self.intelligence.clone(),
            final_summary: self.final_summary.clone(),
            saved_at: None,
        }
    }

    pub fn from_parts(metadata: CaseMetadata, steps: Vec<StepRecord>) -> Self {
        Self {
            case_id: metadata.case_id,
            raw_log_path: None,
            baseline: metadata.baseline,
            quality_scores: metadata.quality_scores,
            intelligence: metadata.intelligence,
            steps,
            final_summary: metadata.final_summary,
        }
    }
}

/// Case-level document stored as `metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseMetadata {
    #[serde(default)]
    pub case_id: String,
    #[serde(default)]
    pub baseline: BaselineRecord,
    #[serde(default)]
    pub quality_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub intelligence: Intelligence,
    #[serde(default)]
    pub final_summary: FinalSummary,
    /// Injected by storage on save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_type_normalized() {
        assert_eq!(StepRecord::new("DEBLUR").step_type, "deblur");
        assert_eq!(StepRecord::new("FACE_RESTORE").step_type, "super_resolution");
        assert_eq!(StepRecord::new(" Sharpen ").step_type, "sharpen");
    }

    #[test]
    fn default_record_is_empty() {
        let r = CaseRecord::default();
        assert!(r.is_empty());
        assert_eq!(r.case_id, UNKNOWN_CASE);
    }

    #[test]
    fn step_json_uses_type_key() {
        let s = StepRecord::new("denoise");
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["type"], "denoise");
        assert!(v["accepted"].is_null());
    }

    #[test]
    fn metadata_roundtrip_through_parts() {
        let mut r = CaseRecord {
            case_id: "CASE_0003".into(),
            ..Default::default()
        };
        r.baseline.similarity = Some(80.0);
        r.quality_scores.insert("sharpness".into(), 0.32);
        r.steps.push(StepRecord::new("pose"));
        let back = CaseRecord::from_parts(r.metadata(), r.steps.clone());
        assert_eq!(back, r);
    }
}
