//! # Case Log Parser
//!
//! Rebuilds a [`CaseRecord`] from the free-text case log. This is the
//! recovery path for historical logs; live runs feed the learner through
//! [`CaseRecorder`](crate::recorder::CaseRecorder) instead.
//!
//! ## Rules
//!
//! - Line scanning only. Nothing here returns an error: a missing file is an
//!   empty record, a missing section is an empty map or list, a truncated
//!   step keeps `accepted = None`.
//! - Every numeric fact line contributes the **last** number on the line.
//!   Lines carry unit suffixes and timestamps, and the value is always
//!   printed last.
//! - A decision line whose value is exactly `ACCEPTED` accepts the step;
//!   any other value rejects it.
//! - Without a `Final similarity` line, the final similarity is backfilled
//!   from the last `After similarity` line in the log.
//! - Parsing is a pure function of the text.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{info, warn};

use super::record::{normalize_step_type, CaseRecord, PlannedAction, StepRecord, UNKNOWN_CASE};

const CASE_MARKER: &str = "[CASE] Started";
const QUALITY_START: &str = "---- QUALITY SCORES ----";
const QUALITY_END: &str = "---- FACE FACTS ----";
const INTELLIGENCE_TAG: &str = "[INTELLIGENCE]";
const STEP_OPEN: &str = "ENHANCEMENT STEP REPORT";
const STEP_CLOSE: &str = "STEP EVALUATION COMPLETE";
/// Lines after an action `Type` line searched for its strength/priority.
const ACTION_LOOKAHEAD: usize = 4;

static FLOAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\d*\.\d+|\d+").expect("valid float regex"));
static INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid int regex"));
static RISK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Risk level\s*:\s*([A-Z_]+)").expect("valid risk regex")
});
static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Target quality\s*:\s*([A-Z_]+)").expect("valid target regex")
});

/// Last number on the line.
pub fn last_float(line: &str) -> Option<f64> {
    FLOAT_RE
        .find_iter(line)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

/// Last run of digits on the line.
pub fn last_int(line: &str) -> Option<u32> {
    INT_RE
        .find_iter(line)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

fn contains_ci(line: &str, needle: &str) -> bool {
    line.to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

fn after_last_colon(line: &str) -> &str {
    line.rsplit(':').next().unwrap_or("").trim()
}

/// Lowercase, keeping only `[a-z0-9_]`.
fn clean_label(raw: &str) -> String {
    raw.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Parse the log file at `path`. Missing or unreadable file → empty record.
pub fn parse_file(path: &Path) -> CaseRecord {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "case log not readable");
            return CaseRecord::default();
        }
    };
    let text = String::from_utf8_lossy(&bytes);
    let mut record = parse(&text);
    record.raw_log_path = Some(path.display().to_string());
    info!(
        case_id = %record.case_id,
        steps = record.steps.len(),
        "case log parsed"
    );
    record
}

/// Parse case log text.
pub fn parse(text: &str) -> CaseRecord {
    let lines: Vec<&str> = text.lines().collect();
    let mut record = CaseRecord {
        case_id: extract_case_id(&lines),
        ..CaseRecord::default()
    };
    extract_baseline(&lines, &mut record);
    extract_quality_scores(&lines, &mut record);
    extract_intelligence(&lines, &mut record);
    record.steps = extract_steps(&lines);
    extract_final_summary(&lines, &mut record);
    record
}

fn extract_case_id(lines: &[&str]) -> String {
    lines
        .iter()
        .filter(|l| l.contains(CASE_MARKER))
        .flat_map(|l| l.split_whitespace())
        .find(|t| t.starts_with("CASE_"))
        .map(|t| t.to_string())
        .unwrap_or_else(|| UNKNOWN_CASE.to_string())
}

fn extract_baseline(lines: &[&str], record: &mut CaseRecord) {
    for line in lines {
        if contains_ci(line, "Baseline similarity") {
            if let Some(v) = last_float(line) {
                record.baseline.similarity = Some(v);
            }
        } else if contains_ci(line, "Baseline score") {
            if let Some(v) = last_float(line) {
                record.baseline.score = Some(v);
            }
        }
    }
}

fn extract_quality_scores(lines: &[&str], record: &mut CaseRecord) {
    let Some(start) = lines.iter().position(|l| l.contains(QUALITY_START)) else {
        return;
    };
    for line in &lines[start + 1..] {
        if line.contains(QUALITY_END) {
            break;
        }
        if !line.contains(':') {
            continue;
        }
        let tail = line.rsplit(']').next().unwrap_or(line);
        let key = tail.split(':').next().unwrap_or("").trim();
        if key.is_empty() {
            continue;
        }
        if let Some(value) = last_float(line) {
            let key = key.to_ascii_lowercase().replace(' ', "_");
            record.quality_scores.insert(key, value);
        }
    }
}

fn extract_intelligence(lines: &[&str], record: &mut CaseRecord) {
    let intel = &mut record.intelligence;
    for (i, line) in lines.iter().enumerate() {
        if !line.contains(INTELLIGENCE_TAG) {
            continue;
        }
        if line.contains("Risk level") {
            if let Some(c) = RISK_RE.captures(line) {
                intel.risk_level = Some(c[1].to_ascii_uppercase());
            }
        } else if line.contains("Target quality") {
            if let Some(c) = TARGET_RE.captures(line) {
                intel.target_quality = Some(c[1].to_ascii_uppercase());
            }
        } else if line.contains("Confidence") {
            intel.confidence = last_float(line);
        } else if line.contains("Type") {
            let mut action = PlannedAction {
                action_type: normalize_step_type(after_last_colon(line)),
                ..PlannedAction::default()
            };
            let end = (i + 1 + ACTION_LOOKAHEAD).min(lines.len());
            for next in &lines[i + 1..end] {
                if next.contains("Type") {
                    break;
                }
                if next.contains("Strength") {
                    action.strength = Some(clean_label(after_last_colon(next)));
                }
                if next.contains("Priority") {
                    action.priority = last_int(next);
                }
            }
            intel.actions.push(action);
        }
    }
}

fn extract_steps(lines: &[&str]) -> Vec<StepRecord> {
    let mut steps = Vec::new();
    let mut current: Option<StepRecord> = None;
    let mut last_strength: Option<String> = None;

    for line in lines {
        let lower = line.to_ascii_lowercase();
        if let Some(pos) = lower.rfind("strength=") {
            let value = lower[pos + "strength=".len()..]
                .split_whitespace()
                .next()
                .unwrap_or("");
            let value = clean_label(value);
            if !value.is_empty() {
                last_strength = Some(value);
            }
        }

        if line.contains(STEP_OPEN) {
            if let Some(open) = current.take() {
                steps.push(open);
            }
            let mut step = StepRecord::new(after_last_colon(line));
            step.strength = last_strength.take();
            current = Some(step);
            continue;
        }

        let Some(step) = current.as_mut() else {
            continue;
        };

        if line.contains("Model used") {
            step.model = Some(after_last_colon(line).to_string());
        } else if line.contains("Before similarity") {
            step.before_similarity = last_float(line);
        } else if line.contains("After similarity") {
            step.after_similarity = last_float(line);
        } else if line.contains("Similarity change") {
            step.delta_similarity = last_float(line);
        } else if line.contains("Before score") {
            step.before_score = last_float(line);
        } else if line.contains("After score") {
            step.after_score = last_float(line);
        } else if line.contains("Processing time") {
            step.processing_time_ms = last_float(line);
        } else if line.contains("Final decision") {
            step.accepted = Some(after_last_colon(line) == "ACCEPTED");
        } else if line.contains(STEP_CLOSE) {
            if let Some(done) = current.take() {
                steps.push(done);
            }
        }
    }
    if let Some(open) = current {
        steps.push(open);
    }

    // Derive the delta from its endpoints whenever both were logged.
    for step in &mut steps {
        if let (Some(before), Some(after)) = (step.before_similarity, step.after_similarity) {
            step.delta_similarity = Some(after - before);
        }
    }
    steps
}

fn extract_final_summary(lines: &[&str], record: &mut CaseRecord) {
    let summary = &mut record.final_summary;
    for line in lines {
        if line.contains("Final similarity") {
            summary.final_similarity = last_float(line);
        } else if line.contains("Best score reached") {
            summary.best_score = last_float(line);
        } else if line.contains("Final score") {
            summary.final_score = last_float(line);
        } else if line.contains("Accepted actions") {
            summary.accepted_actions = last_int(line);
        } else if line.contains("Rejected actions") {
            summary.rejected_actions = last_int(line);
        }
    }
    if summary.final_similarity.is_none() {
        summary.final_similarity = lines
            .iter()
            .rev()
            .filter(|l| contains_ci(l, "After similarity"))
            .find_map(|l| last_float(l));
    }
}
