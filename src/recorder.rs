//! Event listener that assembles a [`CaseRecord`] while the case runs, so
//! the learner can ingest it without reparsing the text log.

use std::sync::Mutex;

use crate::events::{EventListener, PipelineEvent};
use crate::learner::record::{normalize_step_type, CaseRecord, PlannedAction, StepRecord};
use crate::policy::Assessment;

#[derive(Default)]
pub struct CaseRecorder {
    record: Mutex<CaseRecord>,
    quality_seen: Mutex<bool>,
}

impl CaseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the record built so far.
    pub fn snapshot(&self) -> CaseRecord {
        self.record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Take the record and reset for the next case.
    pub fn take(&self) -> CaseRecord {
        *self.quality_seen.lock().unwrap_or_else(|e| e.into_inner()) = false;
        std::mem::take(&mut *self.record.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl EventListener for CaseRecorder {
    fn on_event(&self, event: &PipelineEvent) {
        let mut rec = self.record.lock().unwrap_or_else(|e| e.into_inner());
        match event {
            PipelineEvent::CaseStarted { case_id, .. } => {
                *rec = CaseRecord {
                    case_id: case_id.clone(),
                    ..CaseRecord::default()
                };
                *self.quality_seen.lock().unwrap_or_else(|e| e.into_inner()) = false;
            }
            PipelineEvent::BaselineLocked { baseline, .. } => {
                rec.baseline.similarity = Some(baseline.similarity);
                rec.baseline.score = Some(baseline.score);
            }
            PipelineEvent::QualityAssessed { facts, .. } => {
                // First assessment describes the input image.
                let mut seen = self.quality_seen.lock().unwrap_or_else(|e| e.into_inner());
                if !*seen {
                    for (label, value, _) in facts.score_table() {
                        let key = label.to_ascii_lowercase().replace(' ', "_");
                        rec.quality_scores.insert(key, value);
                    }
                    *seen = true;
                }
            }
            PipelineEvent::PlanReady { decision } => {
                match decision.assessment {
                    Assessment::RiskLevel(r) => {
                        rec.intelligence.risk_level = Some(r.as_str().to_string())
                    }
                    Assessment::TargetQuality(q) => {
                        rec.intelligence.target_quality = Some(q.as_str().to_string())
                    }
                }
                rec.intelligence.confidence = Some(decision.confidence);
                rec.intelligence
                    .actions
                    .extend(decision.actions.iter().map(|a| PlannedAction {
                        action_type: a.kind().as_str().to_string(),
                        strength: a.strength_label().map(|s| s.to_ascii_lowercase()),
                        priority: Some(a.priority()),
                    }));
            }
            PipelineEvent::StepEvaluated {
                kind,
                model,
                strength,
                accepted,
                processing_ms,
                decision,
                ..
            } => {
                let mut step = StepRecord {
                    step_type: normalize_step_type(kind.as_str()),
                    model: Some(model.clone()),
                    strength: Some(
                        strength
                            .as_deref()
                            .unwrap_or("default")
                            .to_ascii_lowercase(),
                    ),
                    accepted: Some(*accepted),
                    processing_time_ms: Some(*processing_ms),
                    ..StepRecord::default()
                };
                if let Some(d) = decision {
                    step.before_similarity = Some(d.before_similarity);
                    step.after_similarity = Some(d.after_similarity);
                    step.delta_similarity = Some(d.delta_similarity);
                    step.before_score = Some(d.before_score);
                    step.after_score = Some(d.after_score);
                    rec.final_summary.final_similarity = Some(d.after_similarity);
                }
                rec.steps.push(step);
            }
            PipelineEvent::CaseSummary { summary } => {
                rec.final_summary.final_similarity = Some(summary.final_similarity);
                rec.final_summary.best_score = Some(summary.best_score);
                rec.final_summary.final_score = Some(summary.final_score);
                rec.final_summary.accepted_actions = Some(summary.accepted_actions);
                rec.final_summary.rejected_actions = Some(summary.rejected_actions);
            }
            PipelineEvent::StepStarted { .. }
            | PipelineEvent::StepSkipped { .. }
            | PipelineEvent::TimingSummary { .. }
            | PipelineEvent::CaseFinished { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{Baseline, CaseSummary, GuardDecision, RecognitionReport};
    use crate::policy::{ActionKind, Profile};
    use std::path::PathBuf;

    #[test]
    fn builds_record_from_events() {
        let r = CaseRecorder::new();
        r.on_event(&PipelineEvent::CaseStarted {
            case_id: "CASE_0007".into(),
            run_id: "r".into(),
            image: PathBuf::from("in.png"),
            profile: Profile::Forensic,
        });
        r.on_event(&PipelineEvent::BaselineLocked {
            baseline: Baseline {
                similarity: 80.0,
                score: 0.7,
                protected: true,
            },
            report: RecognitionReport::default(),
        });
        r.on_event(&PipelineEvent::StepEvaluated {
            index: 0,
            kind: ActionKind::Deblur,
            model: "HiDiff".into(),
            strength: Some("high".into()),
            output: PathBuf::from("out.png"),
            accepted: true,
            processing_ms: 10.0,
            decision: Some(GuardDecision {
                step_name: "deblur".into(),
                model_name: "HiDiff".into(),
                before_score: 0.7,
                after_score: 0.72,
                before_similarity: 80.0,
                after_similarity: 81.0,
                delta_score: 0.02,
                delta_similarity: 1.0,
                identity_preserved: true,
                score_acceptable: true,
                accepted: true,
                elapsed_ms: 1.0,
            }),
        });
        r.on_event(&PipelineEvent::CaseSummary {
            summary: CaseSummary {
                actions_tried: 1,
                accepted_actions: 1,
                rejected_actions: 0,
                best_score: 0.72,
                final_score: 0.72,
                start_score: 0.7,
                net_improvement: 0.02,
                baseline_similarity: 80.0,
                final_similarity: 81.0,
                similarity_improvement: 1.0,
            },
        });
        let rec = r.take();
        assert_eq!(rec.case_id, "CASE_0007");
        assert_eq!(rec.baseline.similarity, Some(80.0));
        assert_eq!(rec.steps.len(), 1);
        assert_eq!(rec.steps[0].step_type, "deblur");
        assert_eq!(rec.steps[0].accepted, Some(true));
        assert_eq!(rec.final_summary.accepted_actions, Some(1));
        assert!(r.snapshot().is_empty());
    }
}
