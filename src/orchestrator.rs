//! # Orchestrator — Round Controller
//!
//! Executes a planned case one step at a time, feeding every operator output
//! through the [`SafetyGuard`].
//!
//! ## State Machine
//!
//! ```text
//! Init → FactsReady → Planned → Executing(i) → GuardCheck(i) ─┬→ Executing(i+1)
//!                                                              └→ Done
//! ```
//!
//! An empty plan goes straight to `Done` and returns the input path.
//!
//! ## Modes
//!
//! - **Forensic**: one round. [`Orchestrator::run_qc_stage`] computes and
//!   caches facts and plan so a caller can show the plan before committing;
//!   [`Orchestrator::run_pipeline`] consumes the cached plan.
//! - **Enhancement**: up to `max_rounds`. Before each later round the current
//!   image is re-assessed; the loop stops once overall quality reaches the
//!   profile's `round2_stop_quality` or the round plans nothing.
//!
//! ## Step Semantics
//!
//! - Accepted output becomes the current image. A rejected output leaves the
//!   current image unchanged but is still reported to `on_step`.
//! - `on_step` fires exactly once per executed step, accepted or not.
//! - No operator, an operator error, or a missing output file skips the step.
//! - Cancellation is checked between steps only; an in-flight operator call
//!   always finishes.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::events::{EventBus, PipelineEvent, StepTiming};
use crate::facts::{QualityFacts, QualityFactsProvider, ScoreBuilder};
use crate::guard::{CaseSummary, GuardDecision, SafetyGuard};
use crate::policy::{Action, ActionKind, Decision, PolicyEngine, Profile};

// ── Operators ───────────────────────────────────────────────────

/// One enhancement operator. Must not modify `input`.
pub trait Operator: Send + Sync {
    /// Model name reported in guard decisions and logs.
    fn name(&self) -> &str;
    /// Apply `action` to `input` and return the path of the produced image.
    fn apply(&self, input: &Path, action: &Action) -> Result<PathBuf>;
}

#[derive(Clone, Default)]
pub struct OperatorRegistry {
    operators: HashMap<ActionKind, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ActionKind, operator: Arc<dyn Operator>) -> &mut Self {
        self.operators.insert(kind, operator);
        self
    }

    pub fn get(&self, kind: ActionKind) -> Option<&Arc<dyn Operator>> {
        self.operators.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

// ── Cancellation ────────────────────────────────────────────────

/// Cooperative cancellation token, checked between steps.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ── Configuration & Results ─────────────────────────────────────

/// The `[pipeline]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: Profile,
    /// Round cap for the enhancement profile.
    pub max_rounds: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            mode: Profile::Forensic,
            max_rounds: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    FactsReady,
    Planned,
    Executing(usize),
    GuardCheck(usize),
    Done,
}

/// Cached result of the QC stage.
#[derive(Debug, Clone, Serialize)]
pub struct QcStage {
    pub image: PathBuf,
    pub facts: QualityFacts,
    pub decision: Decision,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutedStep {
    pub index: usize,
    pub round: u32,
    pub kind: ActionKind,
    pub model: String,
    pub strength: Option<String>,
    pub output: PathBuf,
    pub accepted: bool,
    pub processing_ms: f64,
    pub decision: Option<GuardDecision>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub case_id: String,
    pub run_id: String,
    pub final_path: PathBuf,
    pub steps: Vec<ExecutedStep>,
    pub timings: Vec<StepTiming>,
    pub total_ms: f64,
    pub cancelled: bool,
    pub guard_summary: Option<CaseSummary>,
}

impl PipelineOutcome {
    pub fn accepted_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.accepted).count()
    }
}

// ── Orchestrator ────────────────────────────────────────────────

struct RunAccumulator {
    current: PathBuf,
    steps: Vec<ExecutedStep>,
    timings: Vec<StepTiming>,
    cancelled: bool,
}

pub struct Orchestrator {
    engine: Arc<PolicyEngine>,
    facts: Arc<dyn QualityFactsProvider>,
    scorer: ScoreBuilder,
    guard: SafetyGuard,
    operators: OperatorRegistry,
    events: Arc<EventBus>,
    config: PipelineConfig,
    state: PipelineState,
    qc: Option<QcStage>,
    cancel: CancelFlag,
    case_id: String,
    run_id: String,
}

fn default_case_id() -> String {
    format!("CASE_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

impl Orchestrator {
    pub fn new(
        engine: Arc<PolicyEngine>,
        facts: Arc<dyn QualityFactsProvider>,
        guard: SafetyGuard,
        operators: OperatorRegistry,
        events: Arc<EventBus>,
        config: PipelineConfig,
    ) -> Self {
        Orchestrator {
            engine,
            facts,
            scorer: ScoreBuilder,
            guard,
            operators,
            events,
            config,
            state: PipelineState::Init,
            qc: None,
            cancel: CancelFlag::new(),
            case_id: default_case_id(),
            run_id: String::new(),
        }
    }

    pub fn set_case_id(&mut self, case_id: impl Into<String>) {
        self.case_id = case_id.into();
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn set_mode(&mut self, mode: Profile) {
        if self.config.mode != mode {
            self.config.mode = mode;
            self.qc = None;
        }
    }

    pub fn mode(&self) -> Profile {
        self.config.mode
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn guard(&self) -> &SafetyGuard {
        &self.guard
    }

    fn check_image(image: &Path) -> Result<()> {
        if !image.is_file() {
            bail!("input image {} does not exist", image.display());
        }
        File::open(image).with_context(|| format!("opening input image {}", image.display()))?;
        Ok(())
    }

    fn assess(&self, image: &Path) -> QualityFacts {
        match self.facts.assess(image) {
            Ok(raw) => self.scorer.build(&raw),
            Err(e) => {
                warn!(image = %image.display(), error = %e, "quality assessment failed, using neutral facts");
                QualityFacts::default()
            }
        }
    }

    /// Start the case, lock the guard baseline, assess and plan round 1.
    ///
    /// Cached: a second call for the same image returns the first result.
    pub fn run_qc_stage(&mut self, image: &Path) -> Result<QcStage> {
        if let Some(qc) = self.qc.as_ref().filter(|qc| qc.image == image) {
            return Ok(qc.clone());
        }
        Self::check_image(image)?;

        self.state = PipelineState::Init;
        self.cancel.reset();
        self.run_id = uuid::Uuid::new_v4().to_string();
        self.events.emit(PipelineEvent::CaseStarted {
            case_id: self.case_id.clone(),
            run_id: self.run_id.clone(),
            image: image.to_path_buf(),
            profile: self.config.mode,
        });

        if self.guard.config().enabled {
            let baseline = self.guard.start_case(image);
            let report = self.guard.best_report().cloned().unwrap_or_default();
            self.events
                .emit(PipelineEvent::BaselineLocked { baseline, report });
        }

        let facts = self.assess(image);
        self.state = PipelineState::FactsReady;
        self.events.emit(PipelineEvent::QualityAssessed {
            round: 1,
            facts: facts.clone(),
        });

        let decision = self.engine.evaluate(&facts, self.config.mode, 1);
        self.state = PipelineState::Planned;
        self.events.emit(PipelineEvent::PlanReady {
            decision: decision.clone(),
        });

        let qc = QcStage {
            image: image.to_path_buf(),
            facts,
            decision,
        };
        self.qc = Some(qc.clone());
        Ok(qc)
    }

    /// Run the whole case, reusing a cached QC stage for `image` if present.
    pub fn run_pipeline(
        &mut self,
        image: &Path,
        on_step: &mut dyn FnMut(&str, &Path),
    ) -> Result<PipelineOutcome> {
        let start = Instant::now();
        let qc = self.run_qc_stage(image)?;
        self.qc = None;

        let mut acc = RunAccumulator {
            current: image.to_path_buf(),
            steps: Vec::new(),
            timings: Vec::new(),
            cancelled: false,
        };

        self.execute_plan(&qc.decision, &mut acc, on_step);

        // An empty first plan finishes the case in every profile.
        if self.config.mode == Profile::Enhancement && !qc.decision.is_empty() {
            let stop = self.engine.config().enhancement.round2_stop_quality;
            for round in 2..=self.config.max_rounds {
                if acc.cancelled || self.cancel.is_cancelled() {
                    acc.cancelled = true;
                    break;
                }
                let facts = self.assess(&acc.current);
                self.events.emit(PipelineEvent::QualityAssessed {
                    round,
                    facts: facts.clone(),
                });
                if facts.overall >= stop {
                    info!(round, overall = facts.overall, stop, "quality target reached, no further rounds");
                    break;
                }
                let decision = self.engine.evaluate(&facts, Profile::Enhancement, round);
                self.events.emit(PipelineEvent::PlanReady {
                    decision: decision.clone(),
                });
                if decision.is_empty() {
                    break;
                }
                self.execute_plan(&decision, &mut acc, on_step);
            }
        }

        let total_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.events.emit(PipelineEvent::TimingSummary {
            timings: acc.timings.clone(),
            total_ms,
        });

        let guard_summary = if self.guard.config().enabled {
            self.guard.log_case_summary()
        } else {
            None
        };
        if let Some(summary) = &guard_summary {
            self.events.emit(PipelineEvent::CaseSummary {
                summary: summary.clone(),
            });
        }

        self.state = PipelineState::Done;
        self.events.emit(PipelineEvent::CaseFinished {
            case_id: self.case_id.clone(),
            final_path: acc.current.clone(),
            steps: acc.steps.len(),
            cancelled: acc.cancelled,
        });
        info!(
            case_id = %self.case_id,
            steps = acc.steps.len(),
            cancelled = acc.cancelled,
            total_ms,
            "case finished"
        );

        Ok(PipelineOutcome {
            case_id: self.case_id.clone(),
            run_id: self.run_id.clone(),
            final_path: acc.current,
            steps: acc.steps,
            timings: acc.timings,
            total_ms,
            cancelled: acc.cancelled,
            guard_summary,
        })
    }

    fn execute_plan(
        &mut self,
        decision: &Decision,
        acc: &mut RunAccumulator,
        on_step: &mut dyn FnMut(&str, &Path),
    ) {
        for action in &decision.actions {
            if self.cancel.is_cancelled() {
                info!(case_id = %self.case_id, "cancelled between steps");
                acc.cancelled = true;
                return;
            }
            let index = acc.steps.len();
            self.state = PipelineState::Executing(index);
            self.run_step(index, decision.round, action, acc, on_step);
        }
    }

    fn run_step(
        &mut self,
        index: usize,
        round: u32,
        action: &Action,
        acc: &mut RunAccumulator,
        on_step: &mut dyn FnMut(&str, &Path),
    ) {
        let kind = action.kind();
        let strength = action.strength_label();
        let Some(operator) = self.operators.get(kind).cloned() else {
            self.events.emit(PipelineEvent::StepSkipped {
                index,
                kind,
                reason: "no operator registered".into(),
            });
            return;
        };
        let model = operator.name().to_string();
        self.events.emit(PipelineEvent::StepStarted {
            index,
            kind,
            strength: strength.clone(),
            model: model.clone(),
        });

        let t0 = Instant::now();
        let output = match operator.apply(&acc.current, action) {
            Ok(path) if path.is_file() => path,
            Ok(path) => {
                self.events.emit(PipelineEvent::StepSkipped {
                    index,
                    kind,
                    reason: format!("output {} missing", path.display()),
                });
                return;
            }
            Err(e) => {
                self.events.emit(PipelineEvent::StepSkipped {
                    index,
                    kind,
                    reason: format!("operator failed: {e:#}"),
                });
                return;
            }
        };

        self.state = PipelineState::GuardCheck(index);
        let (accepted, decision) = if self.guard.config().enabled {
            let (ok, d) = self
                .guard
                .check_step(kind.as_str(), &acc.current, &output, &model);
            (ok, Some(d))
        } else {
            (true, None)
        };
        let processing_ms = t0.elapsed().as_secs_f64() * 1000.0;

        if accepted {
            acc.current = output.clone();
        }
        on_step(kind.as_str(), &output);

        self.events.emit(PipelineEvent::StepEvaluated {
            index,
            kind,
            model: model.clone(),
            strength: strength.clone(),
            output: output.clone(),
            accepted,
            processing_ms,
            decision: decision.clone(),
        });
        acc.timings.push(StepTiming {
            step: kind.as_str().to_string(),
            elapsed_ms: processing_ms,
        });
        acc.steps.push(ExecutedStep {
            index,
            round,
            kind,
            model,
            strength,
            output,
            accepted,
            processing_ms,
            decision,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{BlurFacts, ObjectiveFacts, RawAssessment};
    use crate::guard::{FaceMetrics, GuardConfig, RecognitionEvaluator, RecognitionReport};
    use crate::policy::PolicyConfig;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct BlurryFacts;

    impl QualityFactsProvider for BlurryFacts {
        fn assess(&self, _image: &Path) -> Result<RawAssessment> {
            Ok(RawAssessment {
                objective: Some(ObjectiveFacts {
                    blur: Some(BlurFacts {
                        variance: Some(40.0),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            })
        }
    }

    struct FailingFacts;

    impl QualityFactsProvider for FailingFacts {
        fn assess(&self, _image: &Path) -> Result<RawAssessment> {
            bail!("provider offline")
        }
    }

    /// Similarity by file name suffix: `*.bad.png` drops identity.
    struct SuffixEvaluator;

    impl RecognitionEvaluator for SuffixEvaluator {
        fn evaluate(&self, image: &Path, _silent: bool) -> Result<RecognitionReport> {
            let bad = image.to_string_lossy().contains(".bad");
            Ok(RecognitionReport::from_faces(vec![FaceMetrics {
                best_similarity: if bad { 60.0 } else { 80.0 },
                final_score: Some(if bad { 0.5 } else { 0.7 }),
                ..Default::default()
            }]))
        }
    }

    /// Copies input to `<input>.<tag>.png`.
    struct CopyOp {
        tag: &'static str,
    }

    impl Operator for CopyOp {
        fn name(&self) -> &str {
            "CopyOp"
        }
        fn apply(&self, input: &Path, _action: &Action) -> Result<PathBuf> {
            let out = input.with_extension(format!("{}.png", self.tag));
            std::fs::copy(input, &out)?;
            Ok(out)
        }
    }

    fn setup(
        facts: Arc<dyn QualityFactsProvider>,
        tag: &'static str,
        guard_enabled: bool,
    ) -> (Orchestrator, TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("in.png");
        std::fs::write(&image, b"img").unwrap();
        let mut ops = OperatorRegistry::new();
        ops.register(ActionKind::Deblur, Arc::new(CopyOp { tag }));
        let guard = SafetyGuard::new(
            Arc::new(SuffixEvaluator),
            GuardConfig {
                enabled: guard_enabled,
                ..Default::default()
            },
        );
        let orch = Orchestrator::new(
            Arc::new(PolicyEngine::new(PolicyConfig::default(), None)),
            facts,
            guard,
            ops,
            Arc::new(EventBus::new()),
            PipelineConfig::default(),
        );
        (orch, dir, image)
    }

    #[test]
    fn neutral_facts_give_empty_plan() {
        let (mut orch, _dir, image) = setup(Arc::new(FailingFacts), "ok", true);
        let mut calls = 0;
        let out = orch.run_pipeline(&image, &mut |_, _| calls += 1).unwrap();
        assert_eq!(out.final_path, image);
        assert!(out.steps.is_empty());
        assert_eq!(calls, 0);
        assert_eq!(orch.state(), PipelineState::Done);
    }

    #[test]
    fn empty_enhancement_plan_skips_later_rounds() {
        let (mut orch, _dir, image) = setup(Arc::new(FailingFacts), "ok", true);
        orch.config.mode = Profile::Enhancement;
        let out = orch.run_pipeline(&image, &mut |_, _| {}).unwrap();
        assert!(out.steps.is_empty());
        assert_eq!(out.final_path, image);

        let kinds: Vec<String> = orch.events.recent_events(50).into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds.iter().filter(|k| *k == "quality_assessed").count(), 1);
        assert_eq!(kinds.iter().filter(|k| *k == "plan_ready").count(), 1);
        assert_eq!(orch.state(), PipelineState::Done);
    }

    #[test]
    fn accepted_step_advances_image() {
        let (mut orch, _dir, image) = setup(Arc::new(BlurryFacts), "ok", true);
        let seen = Mutex::new(vec![]);
        let out = orch
            .run_pipeline(&image, &mut |t, p| seen.lock().unwrap().push((t.to_string(), p.to_path_buf())))
            .unwrap();
        assert_eq!(out.steps.len(), 1);
        assert!(out.steps[0].accepted);
        assert_eq!(out.final_path, image.with_extension("ok.png"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn rejected_step_keeps_image_but_reports_output() {
        let (mut orch, _dir, image) = setup(Arc::new(BlurryFacts), "bad", true);
        let mut outputs = vec![];
        let out = orch
            .run_pipeline(&image, &mut |_, p| outputs.push(p.to_path_buf()))
            .unwrap();
        assert_eq!(out.steps.len(), 1);
        assert!(!out.steps[0].accepted);
        assert_eq!(out.final_path, image);
        assert_eq!(outputs, vec![image.with_extension("bad.png")]);
        let summary = out.guard_summary.unwrap();
        assert_eq!(summary.rejected_actions, 1);
    }

    #[test]
    fn disabled_guard_accepts_everything() {
        let (mut orch, _dir, image) = setup(Arc::new(BlurryFacts), "bad", false);
        let out = orch.run_pipeline(&image, &mut |_, _| {}).unwrap();
        assert!(out.steps[0].accepted);
        assert!(out.steps[0].decision.is_none());
        assert!(out.guard_summary.is_none());
    }

    #[test]
    fn missing_image_is_fatal() {
        let (mut orch, dir, _image) = setup(Arc::new(BlurryFacts), "ok", true);
        assert!(orch
            .run_pipeline(&dir.path().join("missing.png"), &mut |_, _| {})
            .is_err());
    }

    #[test]
    fn qc_stage_is_cached() {
        let (mut orch, _dir, image) = setup(Arc::new(BlurryFacts), "ok", true);
        let a = orch.run_qc_stage(&image).unwrap();
        let b = orch.run_qc_stage(&image).unwrap();
        assert_eq!(a.decision, b.decision);
        let started = orch
            .events()
            .recent_events(50)
            .iter()
            .filter(|e| e.kind == "case_started")
            .count();
        assert_eq!(started, 1);
    }

    #[test]
    fn cancelled_before_first_step() {
        let (mut orch, _dir, image) = setup(Arc::new(BlurryFacts), "ok", true);
        orch.run_qc_stage(&image).unwrap();
        orch.cancel_flag().cancel();
        let out = orch.run_pipeline(&image, &mut |_, _| {}).unwrap();
        assert!(out.cancelled);
        assert!(out.steps.is_empty());
        assert_eq!(out.final_path, image);
    }
}
