//! Shared test helpers for integration tests.
//!
//! Everything here is offline: facts, recognition and operators are
//! scripted fakes that key off file names.

#![allow(dead_code)]

use anyhow::Result;
use faceguard::events::EventBus;
use faceguard::facts::{
    BlurFacts, BrightnessFacts, ObjectiveFacts, QualityFactsProvider, RawAssessment,
};
use faceguard::guard::{FaceMetrics, GuardConfig, RecognitionEvaluator, RecognitionReport, SafetyGuard};
use faceguard::orchestrator::{Operator, OperatorRegistry, Orchestrator, PipelineConfig};
use faceguard::policy::{Action, ActionKind, PolicyConfig, PolicyEngine};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── Collaborator Fakes ──────────────────────────────────────────

/// Always reports the same raw facts.
pub struct FixedFacts(pub RawAssessment);

impl QualityFactsProvider for FixedFacts {
    fn assess(&self, _image: &Path) -> Result<RawAssessment> {
        Ok(self.0.clone())
    }
}

/// Dark and blurry: plans at least brightness and deblur under both profiles.
pub fn dark_blurry() -> RawAssessment {
    RawAssessment {
        objective: Some(ObjectiveFacts {
            blur: Some(BlurFacts {
                variance: Some(10.0),
            }),
            brightness: Some(BrightnessFacts {
                mean: Some(30.0),
                std: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Similarity by path tag: anything produced by a `bad` operator loses
/// identity, anything else keeps the baseline.
pub struct ScriptedEvaluator {
    pub good_similarity: f64,
    pub bad_similarity: f64,
}

impl Default for ScriptedEvaluator {
    fn default() -> Self {
        ScriptedEvaluator {
            good_similarity: 80.0,
            bad_similarity: 60.0,
        }
    }
}

impl RecognitionEvaluator for ScriptedEvaluator {
    fn evaluate(&self, image: &Path, _silent: bool) -> Result<RecognitionReport> {
        let bad = image.to_string_lossy().contains(".bad");
        let similarity = if bad {
            self.bad_similarity
        } else {
            self.good_similarity
        };
        Ok(RecognitionReport::from_faces(vec![FaceMetrics {
            best_id: Some("subject_01".into()),
            best_similarity: similarity,
            final_score: Some(similarity / 100.0 - 0.1),
            ..Default::default()
        }]))
    }
}

/// Copies its input to `<stem>.<tag>.png` next to it.
pub struct FakeOperator {
    pub tag: &'static str,
}

impl Operator for FakeOperator {
    fn name(&self) -> &str {
        "FakeOperator"
    }

    fn apply(&self, input: &Path, action: &Action) -> Result<PathBuf> {
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("img");
        let out = input.with_file_name(format!("{stem}.{}.{}.png", action.kind(), self.tag));
        std::fs::copy(input, &out)?;
        Ok(out)
    }
}

/// A registry with every action served by `FakeOperator`, `bad` for the
/// kinds listed and `ok` for the rest.
pub fn registry_with_bad(bad: &[ActionKind]) -> OperatorRegistry {
    let mut ops = OperatorRegistry::new();
    for kind in [
        ActionKind::Pose,
        ActionKind::Brightness,
        ActionKind::Contrast,
        ActionKind::Deblur,
        ActionKind::SuperResolution,
        ActionKind::Denoise,
    ] {
        let tag = if bad.contains(&kind) { "bad" } else { "ok" };
        ops.register(kind, Arc::new(FakeOperator { tag }));
    }
    ops
}

pub fn write_image(dir: &Path) -> PathBuf {
    let image = dir.join("probe.png");
    std::fs::write(&image, b"\x89PNG fake").unwrap();
    image
}

pub fn orchestrator(
    raw: RawAssessment,
    operators: OperatorRegistry,
    events: Arc<EventBus>,
    engine: Arc<PolicyEngine>,
) -> Orchestrator {
    let guard = SafetyGuard::new(Arc::new(ScriptedEvaluator::default()), GuardConfig::default());
    Orchestrator::new(
        engine,
        Arc::new(FixedFacts(raw)),
        guard,
        operators,
        events,
        PipelineConfig::default(),
    )
}

pub fn default_engine() -> Arc<PolicyEngine> {
    Arc::new(PolicyEngine::new(PolicyConfig::default(), None))
}

// ── Case Log Fixtures ───────────────────────────────────────────

/// One step of a synthetic case log.
pub struct LogStep {
    pub kind: &'static str,
    pub before: f64,
    pub after: f64,
    pub accepted: bool,
}

impl LogStep {
    pub fn new(kind: &'static str, before: f64, after: f64, accepted: bool) -> Self {
        LogStep {
            kind,
            before,
            after,
            accepted,
        }
    }
}

/// Render a case log in the audit log format.
pub fn case_log(case_id: &str, steps: &[LogStep]) -> String {
    let mut s = String::new();
    let baseline = steps.first().map(|st| st.before).unwrap_or(80.0);
    writeln!(s, "[09:00:00] [CASE] Started {case_id} | mode=forensic | run=r1 | image=/in.png").unwrap();
    writeln!(s, "[09:00:01] [GUARD] [BASELINE METRICS]").unwrap();
    writeln!(s, "[09:00:01] [GUARD]      • Baseline similarity : {baseline:.2}").unwrap();
    writeln!(s, "[09:00:01] [GUARD]      • Baseline score      : 0.7000").unwrap();
    writeln!(s, "[09:00:02] [INTELLIGENCE] ---- QUALITY SCORES ----").unwrap();
    writeln!(s, "[09:00:02] [INTELLIGENCE] Sharpness      : 0.320 | level=HIGH").unwrap();
    writeln!(s, "[09:00:02] [INTELLIGENCE] ---- FACE FACTS ----").unwrap();
    writeln!(s, "[09:00:03] [INTELLIGENCE] • Risk level     : CRITICAL").unwrap();
    writeln!(s, "[09:00:03] [INTELLIGENCE] • Confidence     : 0.660").unwrap();
    for (i, st) in steps.iter().enumerate() {
        let upper = st.kind.to_ascii_uppercase();
        let verdict = if st.accepted { "ACCEPTED" } else { "REJECTED" };
        writeln!(s, "[09:01:00] [PIPELINE] Step #{} | action={} | strength=medium | model=Fake", i + 1, st.kind).unwrap();
        writeln!(s, "[09:01:01] [GUARD]         ENHANCEMENT STEP REPORT : {upper}").unwrap();
        writeln!(s, "[09:01:01] [GUARD]      • Model used      : Fake").unwrap();
        writeln!(s, "[09:01:01] [GUARD]      • Processing time     : 10.00 ms").unwrap();
        writeln!(s, "[09:01:01] [GUARD]      • Before similarity   : {:.2}", st.before).unwrap();
        writeln!(s, "[09:01:01] [GUARD]      • After similarity    : {:.2}", st.after).unwrap();
        writeln!(s, "[09:01:01] [GUARD]      • Final decision      : {verdict}").unwrap();
        writeln!(s, "[09:01:01] [GUARD]               STEP EVALUATION COMPLETE").unwrap();
    }
    s
}

pub fn write_log(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}
