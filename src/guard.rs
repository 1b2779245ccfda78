//! # Guard — Identity Non-Regression Gate
//!
//! The safety guard holds one case's identity baseline and vets every
//! enhancement step against it. It is the only component allowed to decide
//! whether a step's output replaces the current image.
//!
//! ## Acceptance Rule
//!
//! ```text
//! accepted = after_similarity >= baseline_similarity - similarity_epsilon
//!        AND after_score - best_score >= -score_epsilon
//! ```
//!
//! Similarity is measured against the immutable case baseline; score is
//! measured against the best state accepted so far. An accepted step becomes
//! the new best state. A rejected step mutates nothing, which is the
//! rollback.
//!
//! ## Failure Semantics
//!
//! - No face in the baseline image: baseline degrades to 0 and
//!   [`Baseline::protected`] is `false`.
//! - No face (or an evaluator error) on a step output: similarity and score
//!   degrade to 0, so a protected case rejects the step by construction.
//!
//! ## Scope
//!
//! One case at a time. `start_case` resets all per-case state.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

// ── Recognition Contract ────────────────────────────────────────

/// Identity metrics for one detected face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceMetrics {
    #[serde(default)]
    pub face_index: u32,
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub masked: bool,
    #[serde(default)]
    pub best_id: Option<String>,
    /// Percent, 0–100.
    #[serde(default)]
    pub best_similarity: f64,
    #[serde(default)]
    pub second_similarity: f64,
    #[serde(default)]
    pub margin: f64,
    #[serde(default)]
    pub face_confidence: f64,
    #[serde(default)]
    pub embedding_quality: f64,
    #[serde(default)]
    pub final_score: Option<f64>,
}

impl FaceMetrics {
    /// Composite confidence, computed when the evaluator did not supply one.
    pub fn score(&self) -> f64 {
        self.final_score.unwrap_or_else(|| {
            composite_score(
                self.best_similarity,
                self.margin,
                self.face_confidence,
                self.embedding_quality,
            )
        })
    }
}

/// `0.55·sim/100 + 0.25·margin/100 + 0.10·face_conf + 0.10·emb_quality`, clamped to [0, 1].
pub fn composite_score(similarity: f64, margin: f64, face_conf: f64, emb_quality: f64) -> f64 {
    let s = 0.55 * (similarity / 100.0)
        + 0.25 * (margin / 100.0)
        + 0.10 * face_conf
        + 0.10 * emb_quality;
    s.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionReport {
    #[serde(default)]
    pub faces: Vec<FaceMetrics>,
    #[serde(default)]
    pub best_face: Option<FaceMetrics>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RecognitionReport {
    /// Build a report, picking the best face by composite score.
    pub fn from_faces(faces: Vec<FaceMetrics>) -> Self {
        let best_face = faces
            .iter()
            .max_by(|a, b| a.score().total_cmp(&b.score()))
            .cloned();
        let warnings = if faces.is_empty() {
            vec!["no_face_detected".to_string()]
        } else {
            vec![]
        };
        Self {
            faces,
            best_face,
            warnings,
        }
    }

    pub fn no_face(warning: impl Into<String>) -> Self {
        Self {
            faces: vec![],
            best_face: None,
            warnings: vec![warning.into()],
        }
    }

    /// Fill in `best_face` for reports that arrived without one.
    pub fn normalized(self) -> Self {
        if self.best_face.is_some() || self.faces.is_empty() {
            return self;
        }
        let warnings = self.warnings;
        Self {
            warnings,
            ..Self::from_faces(self.faces)
        }
    }

    pub fn similarity(&self) -> f64 {
        self.best_face.as_ref().map_or(0.0, |f| f.best_similarity)
    }

    pub fn score(&self) -> f64 {
        self.best_face.as_ref().map_or(0.0, FaceMetrics::score)
    }
}

/// Converts an image into identity metrics against the reference gallery.
pub trait RecognitionEvaluator: Send + Sync {
    fn evaluate(&self, image: &Path, silent: bool) -> Result<RecognitionReport>;
}

// ── Configuration ───────────────────────────────────────────────

/// The `[guard]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub enabled: bool,
    /// Tolerated similarity drift below baseline, in percentage points.
    pub similarity_epsilon: f64,
    /// Tolerated score regression versus the best accepted state.
    pub score_epsilon: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_epsilon: 0.5,
            score_epsilon: 0.01,
        }
    }
}

// ── Decisions ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub similarity: f64,
    pub score: f64,
    /// `false` when no face was found: the guard cannot protect this case.
    pub protected: bool,
}

/// Verdict for one executed step. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardDecision {
    pub step_name: String,
    pub model_name: String,
    pub before_score: f64,
    pub after_score: f64,
    pub before_similarity: f64,
    pub after_similarity: f64,
    pub delta_score: f64,
    pub delta_similarity: f64,
    pub identity_preserved: bool,
    pub score_acceptable: bool,
    pub accepted: bool,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub actions_tried: u32,
    pub accepted_actions: u32,
    pub rejected_actions: u32,
    pub best_score: f64,
    pub final_score: f64,
    pub start_score: f64,
    pub net_improvement: f64,
    pub baseline_similarity: f64,
    pub final_similarity: f64,
    pub similarity_improvement: f64,
}

/// Pure acceptance rule, shared by the guard and its property tests.
pub fn is_acceptable(
    config: &GuardConfig,
    baseline_similarity: f64,
    after_similarity: f64,
    delta_score: f64,
) -> (bool, bool) {
    let identity = after_similarity >= baseline_similarity - config.similarity_epsilon;
    let score = delta_score >= -config.score_epsilon;
    (identity, score)
}

// ── Safety Guard ────────────────────────────────────────────────

struct CaseState {
    baseline: Baseline,
    best_report: RecognitionReport,
    best_score: f64,
    tried: u32,
    accepted: u32,
    rejected: u32,
}

pub struct SafetyGuard {
    evaluator: Arc<dyn RecognitionEvaluator>,
    config: GuardConfig,
    state: Option<CaseState>,
}

impl SafetyGuard {
    pub fn new(evaluator: Arc<dyn RecognitionEvaluator>, config: GuardConfig) -> Self {
        Self {
            evaluator,
            config,
            state: None,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.state.as_ref().map(|s| s.baseline)
    }

    /// Best accepted recognition report of the current case.
    pub fn best_report(&self) -> Option<&RecognitionReport> {
        self.state.as_ref().map(|s| &s.best_report)
    }

    fn evaluate_or_no_face(&self, image: &Path) -> RecognitionReport {
        match self.evaluator.evaluate(image, true) {
            Ok(report) => report.normalized(),
            Err(e) => {
                warn!(image = %image.display(), error = %e, "recognition failed, treating as no face");
                RecognitionReport::no_face(format!("evaluator_error: {e}"))
            }
        }
    }

    fn lock_baseline(&self, image: &Path) -> CaseState {
        let report = self.evaluate_or_no_face(image);
        let protected = report.best_face.is_some();
        let baseline = Baseline {
            similarity: report.similarity(),
            score: report.score(),
            protected,
        };
        if protected {
            info!(
                similarity = baseline.similarity,
                score = baseline.score,
                faces = report.faces.len(),
                "baseline locked"
            );
        } else {
            warn!("no face in baseline image, identity cannot be protected");
        }
        CaseState {
            baseline,
            best_score: baseline.score,
            best_report: report,
            tried: 0,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Measure and lock the case baseline. Resets all per-case counters.
    pub fn start_case(&mut self, image: &Path) -> Baseline {
        let state = self.lock_baseline(image);
        let baseline = state.baseline;
        self.state = Some(state);
        baseline
    }

    /// Evaluate `after_image` and decide whether it may replace the current state.
    ///
    /// `before_image` is not re-evaluated: the last accepted report stands in for it.
    pub fn check_step(
        &mut self,
        step_name: &str,
        before_image: &Path,
        after_image: &Path,
        model_name: &str,
    ) -> (bool, GuardDecision) {
        let t0 = Instant::now();
        let mut state = match self.state.take() {
            Some(state) => state,
            None => {
                warn!("check_step before start_case, locking baseline from input");
                self.lock_baseline(before_image)
            }
        };
        let report = self.evaluate_or_no_face(after_image);

        let after_score = report.score();
        let after_similarity = report.similarity();
        let before_score = state.best_score;
        let before_similarity = state.best_report.similarity();
        let delta_score = after_score - before_score;
        let delta_similarity = after_similarity - before_similarity;

        let (identity_preserved, score_acceptable) = is_acceptable(
            &self.config,
            state.baseline.similarity,
            after_similarity,
            delta_score,
        );
        let accepted = identity_preserved && score_acceptable;

        let decision = GuardDecision {
            step_name: step_name.to_string(),
            model_name: model_name.to_string(),
            before_score,
            after_score,
            before_similarity,
            after_similarity,
            delta_score,
            delta_similarity,
            identity_preserved,
            score_acceptable,
            accepted,
            elapsed_ms: t0.elapsed().as_secs_f64() * 1000.0,
        };

        state.tried += 1;
        if accepted {
            state.accepted += 1;
            state.best_score = after_score;
            state.best_report = report;
            info!(step = step_name, after_similarity, after_score, "step accepted");
        } else {
            state.rejected += 1;
            warn!(
                step = step_name,
                after_similarity,
                delta_score,
                identity_preserved,
                "step rejected, rolled back"
            );
        }
        self.state = Some(state);
        (accepted, decision)
    }

    /// Case totals versus the baseline locked by `start_case`.
    pub fn log_case_summary(&self) -> Option<CaseSummary> {
        let state = self.state.as_ref()?;
        let final_similarity = state.best_report.similarity();
        let summary = CaseSummary {
            actions_tried: state.tried,
            accepted_actions: state.accepted,
            rejected_actions: state.rejected,
            best_score: state.best_score,
            final_score: state.best_score,
            start_score: state.baseline.score,
            net_improvement: state.best_score - state.baseline.score,
            baseline_similarity: state.baseline.similarity,
            final_similarity,
            similarity_improvement: final_similarity - state.baseline.similarity,
        };
        info!(
            tried = summary.actions_tried,
            accepted = summary.accepted_actions,
            rejected = summary.rejected_actions,
            net_improvement = summary.net_improvement,
            similarity_improvement = summary.similarity_improvement,
            "guard case summary"
        );
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Returns a fixed (similarity, score) per image path; unknown paths have no face.
    struct TableEvaluator {
        table: Mutex<HashMap<PathBuf, (f64, f64)>>,
    }

    impl TableEvaluator {
        fn new(entries: &[(&str, f64, f64)]) -> Arc<Self> {
            Arc::new(Self {
                table: Mutex::new(
                    entries
                        .iter()
                        .map(|(p, s, c)| (PathBuf::from(p), (*s, *c)))
                        .collect(),
                ),
            })
        }
    }

    impl RecognitionEvaluator for TableEvaluator {
        fn evaluate(&self, image: &Path, _silent: bool) -> Result<RecognitionReport> {
            let table = self.table.lock().unwrap();
            Ok(match table.get(image) {
                Some(&(sim, score)) => RecognitionReport::from_faces(vec![FaceMetrics {
                    best_similarity: sim,
                    final_score: Some(score),
                    ..Default::default()
                }]),
                None => RecognitionReport::from_faces(vec![]),
            })
        }
    }

    fn guard(entries: &[(&str, f64, f64)]) -> SafetyGuard {
        SafetyGuard::new(TableEvaluator::new(entries), GuardConfig::default())
    }

    #[test]
    fn small_drift_within_tolerance_accepted() {
        let mut g = guard(&[("base", 80.0, 0.700), ("step", 79.6, 0.695)]);
        g.start_case(Path::new("base"));
        let (ok, d) = g.check_step("deblur", Path::new("base"), Path::new("step"), "HiDiff");
        assert!(ok);
        assert!((d.delta_score + 0.005).abs() < 1e-9);
        assert_eq!(d.before_similarity, 80.0);
    }

    #[test]
    fn similarity_drop_rejected_regardless_of_score() {
        let mut g = guard(&[("base", 80.0, 0.70), ("step", 78.0, 0.95)]);
        g.start_case(Path::new("base"));
        let (ok, d) = g.check_step("deblur", Path::new("base"), Path::new("step"), "HiDiff");
        assert!(!ok);
        assert!(!d.identity_preserved);
        assert!(d.score_acceptable);
        // rejected step leaves the best state untouched
        let s = g.log_case_summary().unwrap();
        assert_eq!(s.final_score, 0.70);
        assert_eq!(s.rejected_actions, 1);
    }

    #[test]
    fn score_checked_against_running_best() {
        let mut g = guard(&[
            ("base", 80.0, 0.60),
            ("a", 81.0, 0.80),
            ("b", 82.0, 0.70),
        ]);
        g.start_case(Path::new("base"));
        assert!(g.check_step("x", Path::new("base"), Path::new("a"), "m").0);
        // 0.70 is above baseline 0.60 but below best 0.80 by more than epsilon
        let (ok, d) = g.check_step("y", Path::new("a"), Path::new("b"), "m");
        assert!(!ok);
        assert!((d.delta_score + 0.10).abs() < 1e-9);
        assert_eq!(d.before_similarity, 81.0);
    }

    #[test]
    fn no_face_on_step_rejects() {
        let mut g = guard(&[("base", 75.0, 0.6)]);
        let b = g.start_case(Path::new("base"));
        assert!(b.protected);
        let (ok, d) = g.check_step("pose", Path::new("base"), Path::new("lost"), "m");
        assert!(!ok);
        assert_eq!(d.after_similarity, 0.0);
        assert_eq!(d.after_score, 0.0);
    }

    #[test]
    fn no_face_baseline_is_unprotected() {
        let mut g = guard(&[]);
        let b = g.start_case(Path::new("base"));
        assert!(!b.protected);
        assert_eq!(b.similarity, 0.0);
        assert_eq!(b.score, 0.0);
    }

    #[test]
    fn summary_reports_net_improvement_from_baseline() {
        let mut g = guard(&[("base", 70.0, 0.5), ("a", 72.5, 0.6)]);
        g.start_case(Path::new("base"));
        g.check_step("a", Path::new("base"), Path::new("a"), "m");
        let s = g.log_case_summary().unwrap();
        assert_eq!(s.actions_tried, 1);
        assert_eq!(s.accepted_actions, 1);
        assert!((s.net_improvement - 0.1).abs() < 1e-9);
        assert!((s.similarity_improvement - 2.5).abs() < 1e-9);
    }

    #[test]
    fn start_case_resets_counters() {
        let mut g = guard(&[("base", 70.0, 0.5), ("a", 72.5, 0.6)]);
        g.start_case(Path::new("base"));
        g.check_step("a", Path::new("base"), Path::new("a"), "m");
        g.start_case(Path::new("base"));
        assert_eq!(g.log_case_summary().unwrap().actions_tried, 0);
    }

    #[test]
    fn composite_score_weights() {
        let s = composite_score(100.0, 100.0, 1.0, 1.0);
        assert!((s - 1.0).abs() < 1e-9);
        let s = composite_score(80.0, 20.0, 0.9, 0.5);
        assert!((s - (0.44 + 0.05 + 0.09 + 0.05)).abs() < 1e-9);
    }

    #[test]
    fn best_face_by_score() {
        let report = RecognitionReport::from_faces(vec![
            FaceMetrics {
                face_index: 0,
                best_similarity: 60.0,
                final_score: Some(0.4),
                ..Default::default()
            },
            FaceMetrics {
                face_index: 1,
                best_similarity: 55.0,
                final_score: Some(0.7),
                ..Default::default()
            },
        ]);
        assert_eq!(report.best_face.unwrap().face_index, 1);
        assert!(RecognitionReport::from_faces(vec![])
            .warnings
            .contains(&"no_face_detected".to_string()));
    }
}
