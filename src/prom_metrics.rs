//! # Prometheus Metrics — Case Pipeline Counters
//!
//! Counts what the pipeline and learner did, in the Prometheus text
//! exposition format. [`Metrics`] is an [`EventListener`]: subscribe it to
//! the event bus and step/case counters follow the pipeline automatically.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `faceguard_steps_total` | Counter | `action`, `outcome` | Steps by action and accepted/rejected/skipped |
//! | `faceguard_cases_finished_total` | Counter | `profile` | Cases that reached `Done` |
//! | `faceguard_cases_learned_total` | Counter | — | Cases ingested by the learner |
//! | `faceguard_policy_rebuilds_total` | Counter | — | Learned policy rebuilds |
//! | `faceguard_baseline_similarity` | Gauge | — | Baseline similarity of the latest case |
//! | `faceguard_step_processing_ms_total` | Counter | `action` | Summed step wall time |

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;
use tracing::warn;

use crate::events::{EventListener, PipelineEvent};
use crate::policy::Profile;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StepLabel {
    pub action: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ActionLabel {
    pub action: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProfileLabel {
    pub profile: String,
}

pub struct Metrics {
    pub registry: Registry,
    pub steps: Family<StepLabel, Counter>,
    pub step_processing_ms: Family<ActionLabel, Counter<f64, AtomicU64>>,
    pub cases_finished: Family<ProfileLabel, Counter>,
    pub cases_learned: Counter,
    pub policy_rebuilds: Counter,
    pub baseline_similarity: Gauge<f64, AtomicU64>,
    current_profile: Mutex<Option<Profile>>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let steps = Family::<StepLabel, Counter>::default();
        registry.register(
            "faceguard_steps",
            "Executed steps by action and outcome",
            steps.clone(),
        );

        let step_processing_ms = Family::<ActionLabel, Counter<f64, AtomicU64>>::default();
        registry.register(
            "faceguard_step_processing_ms",
            "Summed step wall time in milliseconds by action",
            step_processing_ms.clone(),
        );

        let cases_finished = Family::<ProfileLabel, Counter>::default();
        registry.register(
            "faceguard_cases_finished",
            "Cases that ran to completion by profile",
            cases_finished.clone(),
        );

        let cases_learned = Counter::default();
        registry.register(
            "faceguard_cases_learned",
            "Cases ingested by the learner",
            cases_learned.clone(),
        );

        let policy_rebuilds = Counter::default();
        registry.register(
            "faceguard_policy_rebuilds",
            "Learned policy rebuilds",
            policy_rebuilds.clone(),
        );

        let baseline_similarity = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "faceguard_baseline_similarity",
            "Baseline identity similarity of the latest case",
            baseline_similarity.clone(),
        );

        Self {
            registry,
            steps,
            step_processing_ms,
            cases_finished,
            cases_learned,
            policy_rebuilds,
            baseline_similarity,
            current_profile: Mutex::new(None),
        }
    }

    fn count_step(&self, action: &str, outcome: &str) {
        self.steps
            .get_or_create(&StepLabel {
                action: action.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Err(e) = encode(&mut buf, &self.registry) {
            warn!(error = %e, "metrics encoding failed");
        }
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EventListener for Metrics {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::CaseStarted { profile, .. } => {
                *self.current_profile.lock().unwrap_or_else(|e| e.into_inner()) = Some(*profile);
            }
            PipelineEvent::BaselineLocked { baseline, .. } => {
                self.baseline_similarity.set(baseline.similarity);
            }
            PipelineEvent::StepSkipped { kind, .. } => self.count_step(kind.as_str(), "skipped"),
            PipelineEvent::StepEvaluated {
                kind,
                accepted,
                processing_ms,
                ..
            } => {
                let outcome = if *accepted { "accepted" } else { "rejected" };
                self.count_step(kind.as_str(), outcome);
                self.step_processing_ms
                    .get_or_create(&ActionLabel {
                        action: kind.as_str().to_string(),
                    })
                    .inc_by(*processing_ms);
            }
            PipelineEvent::CaseFinished { .. } => {
                let current = *self.current_profile.lock().unwrap_or_else(|e| e.into_inner());
                let profile = current
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                self.cases_finished
                    .get_or_create(&ProfileLabel { profile })
                    .inc();
            }
            _ => {}
        }
    }
}
