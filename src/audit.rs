//! # Audit — Human-Readable Case Log
//!
//! Renders [`PipelineEvent`]s into the line-oriented case log that analysts
//! read and that [`learner::parser`](crate::learner::parser) can rebuild a
//! case record from. Every line carries a bracketed section tag
//! (`[CASE]`, `[GUARD]`, `[INTELLIGENCE]`, `[PIPELINE]`), optionally preceded
//! by a `[HH:MM:SS]` wall-clock stamp.
//!
//! ## Format Contract
//!
//! - `[CASE] Started <CASE_ID>` opens a case.
//! - `---- QUALITY SCORES ----` … `---- FACE FACTS ----` brackets `label : value` score lines.
//! - The decision report lists each action as a `Type` line followed by
//!   optional `Strength` and `Priority` lines.
//! - Every executed step is announced with a `strength=<label>` line, then
//!   reported between `ENHANCEMENT STEP REPORT : <TYPE>` and
//!   `STEP EVALUATION COMPLETE`.
//! - Numeric values are always printed with a decimal point so the sign
//!   survives last-number extraction.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::events::{EventListener, PipelineEvent};
use crate::facts::Level;
use crate::guard::GuardDecision;
use crate::policy::{Action, Assessment};

const RULE: &str = "============================================================";

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "n/a".to_string(), |x| format!("{x:.1}"))
}

fn push(lines: &mut Vec<String>, tag: &str, text: impl AsRef<str>) {
    lines.push(format!("[{tag}] {}", text.as_ref()));
}

fn render_action(lines: &mut Vec<String>, i: usize, action: &Action) {
    let tag = "INTELLIGENCE";
    push(lines, tag, format!("• Action #{}", i + 1));
    push(lines, tag, format!("    Type      : {}", action.kind()));
    if let Some(strength) = action.strength_label() {
        push(lines, tag, format!("    Strength  : {strength}"));
    }
    push(lines, tag, format!("    Priority  : {}", action.priority()));
    let params = action.params();
    if !params.is_empty() {
        let json = serde_json::to_string(&params).unwrap_or_default();
        push(lines, tag, format!("    Params    : {json}"));
    }
}

fn render_decision_block(lines: &mut Vec<String>, d: Option<&GuardDecision>, accepted: bool) {
    let tag = "GUARD";
    if let Some(d) = d {
        push(lines, tag, "[SIMILARITY ANALYSIS]");
        push(lines, tag, format!("     • Before similarity   : {:.2}", d.before_similarity));
        push(lines, tag, format!("     • After similarity    : {:.2}", d.after_similarity));
        push(lines, tag, format!("     • Similarity change   : {:.2}", d.delta_similarity));
        push(lines, tag, "[SCORE ANALYSIS]");
        push(lines, tag, format!("     • Before score        : {:.4}", d.before_score));
        push(lines, tag, format!("     • After score         : {:.4}", d.after_score));
        push(lines, tag, format!("     • Score change        : {:.4}", d.delta_score));
        push(lines, tag, "[FORENSIC DECISION]");
        push(lines, tag, format!("     • Identity preserved  : {}", d.identity_preserved));
        push(lines, tag, format!("     • Score acceptable    : {}", d.score_acceptable));
    } else {
        push(lines, tag, "[FORENSIC DECISION]");
        push(lines, tag, "     • Guard               : disabled");
    }
    let verdict = if accepted { "ACCEPTED" } else { "REJECTED" };
    push(lines, tag, format!("     • Final decision      : {verdict}"));
    if accepted {
        push(lines, tag, "     • State updated as new forensic reference");
    } else {
        push(lines, tag, "     • Rollback to previous forensic state");
    }
}

/// Render one event as log lines (without timestamps).
pub fn render(event: &PipelineEvent) -> Vec<String> {
    let mut lines = Vec::new();
    match event {
        PipelineEvent::CaseStarted {
            case_id,
            run_id,
            image,
            profile,
        } => {
            push(
                &mut lines,
                "CASE",
                format!(
                    "Started {case_id} | mode={profile} | run={run_id} | image={}",
                    image.display()
                ),
            );
        }
        PipelineEvent::BaselineLocked { baseline, report } => {
            let t = "GUARD";
            push(&mut lines, t, RULE);
            push(&mut lines, t, "        INITIAL FORENSIC GUARD RECOGNITION REPORT");
            push(&mut lines, t, RULE);
            if report.faces.is_empty() {
                push(&mut lines, t, "     • Status              : No faces detected");
                push(&mut lines, t, "     • Identity protection : UNAVAILABLE");
            } else {
                let masked = report.faces.iter().any(|f| f.masked);
                push(&mut lines, t, format!("     • Faces detected      : {}", report.faces.len()));
                push(&mut lines, t, format!("     • Mask detected       : {masked}"));
                for f in &report.faces {
                    push(&mut lines, t, format!("     • Face index          : {}", f.face_index));
                    push(
                        &mut lines,
                        t,
                        format!(
                            "     • Identity            : {}",
                            f.best_id.as_deref().unwrap_or("unknown")
                        ),
                    );
                    push(&mut lines, t, format!("     • Best similarity     : {:.2}", f.best_similarity));
                    push(&mut lines, t, format!("     • Similarity margin   : {:.2}", f.margin));
                    push(&mut lines, t, format!("     • Composite score     : {:.4}", f.score()));
                }
            }
            push(&mut lines, t, "[BASELINE METRICS]");
            push(&mut lines, t, format!("     • Baseline similarity : {:.2}", baseline.similarity));
            push(&mut lines, t, format!("     • Baseline score      : {:.4}", baseline.score));
            push(&mut lines, t, RULE);
            push(&mut lines, t, "          BASELINE LOCKED FOR CASE");
            push(&mut lines, t, RULE);
        }
        PipelineEvent::QualityAssessed { round, facts } => {
            let t = "INTELLIGENCE";
            push(&mut lines, t, format!("Round {round} quality assessment"));
            push(&mut lines, t, "---- QUALITY SCORES ----");
            for (label, value, level) in facts.score_table() {
                push(&mut lines, t, format!("{label:<15}: {value:.3} | level={level}"));
            }
            push(&mut lines, t, "---- FACE FACTS ----");
            push(&mut lines, t, format!("Face present   : {}", facts.face_present));
            push(&mut lines, t, format!("Face ratio     : {:.4}", facts.largest_face_ratio));
            push(&mut lines, t, format!("Masked         : {}", facts.masked));
            push(&mut lines, t, "---- POSE FACTS ----");
            push(&mut lines, t, format!("Yaw            : {}", fmt_opt(facts.pose.yaw)));
            push(&mut lines, t, format!("Pitch          : {}", fmt_opt(facts.pose.pitch)));
            push(
                &mut lines,
                t,
                format!(
                    "Roll           : {} | level={}",
                    fmt_opt(facts.pose.roll),
                    Level::pose(facts.pose.roll)
                ),
            );
        }
        PipelineEvent::PlanReady { decision } => {
            let t = "INTELLIGENCE";
            push(&mut lines, t, "[DECISION SUMMARY]");
            push(&mut lines, t, format!("• Profile        : {}", decision.profile));
            push(&mut lines, t, format!("• Round          : {}", decision.round));
            match decision.assessment {
                Assessment::RiskLevel(r) => {
                    push(&mut lines, t, format!("• Risk level     : {}", r.as_str()))
                }
                Assessment::TargetQuality(q) => {
                    push(&mut lines, t, format!("• Target quality : {}", q.as_str()))
                }
            }
            push(&mut lines, t, format!("• Confidence     : {:.3}", decision.confidence));
            push(&mut lines, t, format!("• Planned steps  : {}", decision.actions.len()));
            for (i, action) in decision.actions.iter().enumerate() {
                render_action(&mut lines, i, action);
            }
            for note in &decision.notes {
                push(&mut lines, t, format!("• Note: {note}"));
            }
        }
        PipelineEvent::StepStarted {
            index,
            kind,
            strength,
            model,
        } => {
            push(
                &mut lines,
                "PIPELINE",
                format!(
                    "Step #{} | action={kind} | strength={} | model={model}",
                    index + 1,
                    strength.as_deref().unwrap_or("default")
                ),
            );
        }
        PipelineEvent::StepSkipped {
            index,
            kind,
            reason,
        } => {
            push(
                &mut lines,
                "PIPELINE",
                format!("Step #{} skipped | action={kind} | reason={reason}", index + 1),
            );
        }
        PipelineEvent::StepEvaluated {
            kind,
            model,
            output,
            accepted,
            processing_ms,
            decision,
            ..
        } => {
            let t = "GUARD";
            let name = kind.as_str().to_ascii_uppercase();
            push(&mut lines, t, RULE);
            push(&mut lines, t, format!("        ENHANCEMENT STEP REPORT : {name}"));
            push(&mut lines, t, RULE);
            push(&mut lines, t, "[MODEL INFO]");
            push(&mut lines, t, format!("     • Enhancement type : {name}"));
            push(&mut lines, t, format!("     • Model used      : {model}"));
            push(&mut lines, t, "[STEP INFO]");
            push(&mut lines, t, format!("     • Processing time     : {processing_ms:.2} ms"));
            push(&mut lines, t, format!("     • Output              = {}", output.display()));
            render_decision_block(&mut lines, decision.as_ref(), *accepted);
            push(&mut lines, t, RULE);
            push(&mut lines, t, "              STEP EVALUATION COMPLETE");
            push(&mut lines, t, RULE);
        }
        PipelineEvent::TimingSummary { timings, total_ms } => {
            let t = "PIPELINE";
            push(&mut lines, t, "---- TIMING SUMMARY ----");
            for timing in timings {
                push(&mut lines, t, format!("{:<20} {:>10.1} ms", timing.step, timing.elapsed_ms));
            }
            push(&mut lines, t, format!("{:<20} {:>10.1} ms", "TOTAL", total_ms));
        }
        PipelineEvent::CaseSummary { summary: s } => {
            let t = "GUARD";
            push(&mut lines, t, RULE);
            push(&mut lines, t, "          FORENSIC GUARD CASE SUMMARY");
            push(&mut lines, t, RULE);
            push(&mut lines, t, format!("• Actions tried        : {}", s.actions_tried));
            push(&mut lines, t, format!("• Accepted actions     : {}", s.accepted_actions));
            push(&mut lines, t, format!("• Rejected actions     : {}", s.rejected_actions));
            push(&mut lines, t, format!("• Best score reached   : {:.4}", s.best_score));
            push(&mut lines, t, format!("• Final score          : {:.4}", s.final_score));
            push(&mut lines, t, format!("• Net improvement      : {:+.4}", s.net_improvement));
            push(&mut lines, t, format!("• Baseline similarity  : {:.2}", s.baseline_similarity));
            push(&mut lines, t, format!("• Final similarity     : {:.2}", s.final_similarity));
            push(
                &mut lines,
                t,
                format!("• Similarity improvement: {:+.2}", s.similarity_improvement),
            );
            push(&mut lines, t, RULE);
        }
        PipelineEvent::CaseFinished {
            case_id,
            final_path,
            steps,
            cancelled,
        } => {
            let status = if *cancelled { "Cancelled" } else { "Finished" };
            push(
                &mut lines,
                "CASE",
                format!(
                    "{status} {case_id} | steps={steps} | output={}",
                    final_path.display()
                ),
            );
        }
    }
    lines
}

/// In-memory sink, cloneable so tests and callers can read what was written.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap_or_else(|e| e.into_inner())).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Event listener that writes the case log.
pub struct AuditLog {
    sink: Mutex<Box<dyn Write + Send>>,
    timestamps: bool,
}

impl AuditLog {
    pub fn new(sink: Box<dyn Write + Send>, timestamps: bool) -> Self {
        Self {
            sink: Mutex::new(sink),
            timestamps,
        }
    }

    /// Create (or truncate) a log file.
    pub fn to_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("creating audit log {}", path.display()))?;
        Ok(Self::new(Box::new(BufWriter::new(file)), true))
    }

    pub fn in_memory() -> (Self, SharedBuffer) {
        let buf = SharedBuffer::default();
        (Self::new(Box::new(buf.clone()), false), buf)
    }
}

impl EventListener for AuditLog {
    fn on_event(&self, event: &PipelineEvent) {
        let stamp = self
            .timestamps
            .then(|| chrono::Local::now().format("[%H:%M:%S] ").to_string())
            .unwrap_or_default();
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        let mut result = Ok(());
        for line in render(event) {
            result = writeln!(sink, "{stamp}{line}");
            if result.is_err() {
                break;
            }
        }
        if matches!(event, PipelineEvent::CaseFinished { .. }) && result.is_ok() {
            result = sink.flush();
        }
        if let Err(e) = result {
            warn!(error = %e, "audit log write failed");
        }
    }
}
