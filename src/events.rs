//! # Events — Structured Pipeline Event Bus
//!
//! The orchestrator describes each case as a stream of [`PipelineEvent`]s.
//! Listeners turn that stream into whatever they need: the audit log renders
//! the human-readable case log, the case recorder assembles a
//! [`CaseRecord`](crate::learner::CaseRecord) directly, metrics count steps.
//!
//! ## Event Types
//!
//! | Variant | Emitted When |
//! |---------|-------------|
//! | `CaseStarted` | A case begins, before any evaluation |
//! | `BaselineLocked` | The guard has measured the identity baseline |
//! | `QualityAssessed` | Quality facts are ready for a planning round |
//! | `PlanReady` | The policy engine produced a decision |
//! | `StepStarted` | An operator is about to run |
//! | `StepSkipped` | An action produced no usable output |
//! | `StepEvaluated` | A step has its accept/reject verdict |
//! | `TimingSummary` | All steps have run |
//! | `CaseSummary` | The guard reported case totals |
//! | `CaseFinished` | The pipeline reached `Done` |
//!
//! ## Delivery
//!
//! Emission is synchronous: listeners run on the emitting thread in
//! registration order. A bounded `VecDeque` keeps recent event records.

use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::facts::QualityFacts;
use crate::guard::{Baseline, CaseSummary, GuardDecision, RecognitionReport};
use crate::policy::{ActionKind, Decision, Profile};

#[derive(Clone, Debug, Serialize)]
pub struct StepTiming {
    pub step: String,
    pub elapsed_ms: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    CaseStarted {
        case_id: String,
        run_id: String,
        image: PathBuf,
        profile: Profile,
    },
    BaselineLocked {
        baseline: Baseline,
        report: RecognitionReport,
    },
    QualityAssessed {
        round: u32,
        facts: QualityFacts,
    },
    PlanReady {
        decision: Decision,
    },
    StepStarted {
        index: usize,
        kind: ActionKind,
        strength: Option<String>,
        model: String,
    },
    StepSkipped {
        index: usize,
        kind: ActionKind,
        reason: String,
    },
    StepEvaluated {
        index: usize,
        kind: ActionKind,
        model: String,
        strength: Option<String>,
        output: PathBuf,
        accepted: bool,
        processing_ms: f64,
        /// `None` when the guard is disabled.
        decision: Option<GuardDecision>,
    },
    TimingSummary {
        timings: Vec<StepTiming>,
        total_ms: f64,
    },
    CaseSummary {
        summary: CaseSummary,
    },
    CaseFinished {
        case_id: String,
        final_path: PathBuf,
        steps: usize,
        cancelled: bool,
    },
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::CaseStarted { .. } => "case_started",
            PipelineEvent::BaselineLocked { .. } => "baseline_locked",
            PipelineEvent::QualityAssessed { .. } => "quality_assessed",
            PipelineEvent::PlanReady { .. } => "plan_ready",
            PipelineEvent::StepStarted { .. } => "step_started",
            PipelineEvent::StepSkipped { .. } => "step_skipped",
            PipelineEvent::StepEvaluated { .. } => "step_evaluated",
            PipelineEvent::TimingSummary { .. } => "timing_summary",
            PipelineEvent::CaseSummary { .. } => "case_summary",
            PipelineEvent::CaseFinished { .. } => "case_finished",
        }
    }

    fn message(&self) -> String {
        match self {
            PipelineEvent::CaseStarted {
                case_id, profile, ..
            } => format!("{case_id} ({profile})"),
            PipelineEvent::BaselineLocked { baseline, .. } => format!(
                "similarity={:.2} score={:.4} protected={}",
                baseline.similarity, baseline.score, baseline.protected
            ),
            PipelineEvent::QualityAssessed { round, facts } => {
                format!("round {round} overall={:.3}", facts.overall)
            }
            PipelineEvent::PlanReady { decision } => format!(
                "round {} {} actions",
                decision.round,
                decision.actions.len()
            ),
            PipelineEvent::StepStarted { index, kind, .. } => format!("#{index} {kind}"),
            PipelineEvent::StepSkipped {
                index,
                kind,
                reason,
            } => format!("#{index} {kind}: {reason}"),
            PipelineEvent::StepEvaluated {
                index,
                kind,
                accepted,
                ..
            } => format!(
                "#{index} {kind} {}",
                if *accepted { "accepted" } else { "rejected" }
            ),
            PipelineEvent::TimingSummary { timings, total_ms } => {
                format!("{} steps in {:.1} ms", timings.len(), total_ms)
            }
            PipelineEvent::CaseSummary { summary } => format!(
                "accepted {}/{}",
                summary.accepted_actions, summary.actions_tried
            ),
            PipelineEvent::CaseFinished {
                case_id,
                steps,
                cancelled,
                ..
            } => format!("{case_id} steps={steps} cancelled={cancelled}"),
        }
    }
}

/// Receives every event emitted on a bus.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

#[derive(Clone, Debug, Serialize)]
pub struct EventRecord {
    pub kind: String,
    pub message: String,
    pub elapsed_secs: f64,
}

const RECENT_EVENTS_CAP: usize = 200;

pub struct EventBus {
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
    recent: Mutex<VecDeque<EventRecord>>,
    start: Instant,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            listeners: Mutex::new(Vec::new()),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAP)),
            start: Instant::now(),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: PipelineEvent) {
        let message = event.message();
        match &event {
            PipelineEvent::StepSkipped { .. } => warn!(event = event.kind(), "{}", message),
            PipelineEvent::CaseStarted { .. } | PipelineEvent::CaseFinished { .. } => {
                info!(event = event.kind(), "{}", message)
            }
            _ => debug!(event = event.kind(), "{}", message),
        }
        self.push_record(event.kind(), message);

        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn push_record(&self, kind: &str, message: String) {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() >= RECENT_EVENTS_CAP {
            recent.pop_front();
        }
        recent.push_back(EventRecord {
            kind: kind.to_string(),
            message,
            elapsed_secs: self.start.elapsed().as_secs_f64(),
        });
    }

    /// Most recent records, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<EventRecord> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        let skip = recent.len().saturating_sub(limit);
        recent.iter().skip(skip).cloned().collect()
    }
}
