//! # Context — Application Wiring
//!
//! [`AppContext`] is built once at startup and owns every long-lived
//! component: policy engine, learner, event bus, metrics and the case
//! recorder. Components receive it (or the piece they need) by reference.
//!
//! ## Event Listeners
//!
//! | Listener | Subscribed | Purpose |
//! |----------|-----------|---------|
//! | [`Metrics`] | always | step/case counters |
//! | [`CaseRecorder`] | always | structured `CaseRecord` for the learner |
//! | [`AuditLog`] | [`AppContext::attach_audit_log`] | text case log |

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::config::Config;
use crate::events::EventBus;
use crate::external::{CommandEvaluator, CommandFactsProvider};
use crate::facts::QualityFactsProvider;
use crate::guard::{RecognitionEvaluator, SafetyGuard};
use crate::learner::{CaseStorage, LearnerManager, ProcessOutcome};
use crate::orchestrator::{OperatorRegistry, Orchestrator};
use crate::policy::{LearnedPolicy, PolicyEngine};
use crate::prom_metrics::Metrics;
use crate::recorder::CaseRecorder;

/// The external programs a case needs.
#[derive(Clone)]
pub struct Collaborators {
    pub facts: Arc<dyn QualityFactsProvider>,
    pub evaluator: Arc<dyn RecognitionEvaluator>,
    pub operators: OperatorRegistry,
}

impl Collaborators {
    /// Subprocess-backed collaborators from `[tools]`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tools = &config.tools;
        if tools.facts_command.is_empty() {
            bail!("tools.facts_command is not configured");
        }
        if tools.evaluator_command.is_empty() && config.guard.enabled {
            bail!("tools.evaluator_command is not configured (required while the guard is enabled)");
        }
        let operators = tools.operator_registry(&config.paths.work_dir);
        if operators.is_empty() {
            warn!("no operators configured, every planned step will be skipped");
        }
        Ok(Collaborators {
            facts: Arc::new(CommandFactsProvider {
                command: tools.facts_command.clone(),
                timeout: tools.timeout(),
            }),
            evaluator: Arc::new(CommandEvaluator {
                command: tools.evaluator_command.clone(),
                timeout: tools.timeout(),
            }),
            operators,
        })
    }
}

pub struct AppContext {
    config: Config,
    collaborators: Collaborators,
    pub engine: Arc<PolicyEngine>,
    pub learner: LearnerManager,
    pub events: Arc<EventBus>,
    pub metrics: Arc<Metrics>,
    pub recorder: Arc<CaseRecorder>,
}

impl AppContext {
    pub fn new(mut config: Config, collaborators: Collaborators) -> Self {
        if config.learner.enabled && !config.guard.enabled {
            warn!("adaptive learning requires the safety guard, learning disabled");
            config.learner.enabled = false;
        }

        let engine = Arc::new(PolicyEngine::new(
            config.policy.clone(),
            Some(config.paths.learned_policy.clone()),
        ));
        let learner = LearnerManager::new(
            config.learner.clone(),
            CaseStorage::new(&config.paths.case_root),
            &config.paths.learned_policy,
        );

        let events = Arc::new(EventBus::new());
        let metrics = Arc::new(Metrics::new());
        let recorder = Arc::new(CaseRecorder::new());
        events.subscribe(metrics.clone());
        events.subscribe(recorder.clone());

        info!(
            guard = config.guard.enabled,
            learner = config.learner.enabled,
            learned_policy = engine.has_learned_policy(),
            "context ready"
        );

        AppContext {
            config,
            collaborators,
            engine,
            learner,
            events,
            metrics,
            recorder,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Render the case log as text into `path`.
    pub fn attach_audit_log(&self, path: &Path) -> Result<()> {
        let log = AuditLog::to_file(path)?;
        self.events.subscribe(Arc::new(log));
        info!(path = %path.display(), "audit log attached");
        Ok(())
    }

    /// A fresh orchestrator for the next case.
    pub fn orchestrator(&self) -> Orchestrator {
        let guard = SafetyGuard::new(
            self.collaborators.evaluator.clone(),
            self.config.guard.clone(),
        );
        let mut orchestrator = Orchestrator::new(
            self.engine.clone(),
            self.collaborators.facts.clone(),
            guard,
            self.collaborators.operators.clone(),
            self.events.clone(),
            self.config.pipeline.clone(),
        );
        orchestrator.set_case_id(self.learner.storage().next_case_id());
        orchestrator
    }

    /// Hand the case just recorded to the learner.
    pub fn finish_case(&self) -> Result<Option<ProcessOutcome>> {
        let record = self.recorder.take();
        let outcome = self.learner.process_record(record)?;
        self.after_ingest(outcome.as_ref());
        Ok(outcome)
    }

    /// Ingest a historical case log.
    pub fn ingest_log(&self, log_path: &Path) -> Result<Option<ProcessOutcome>> {
        let outcome = self.learner.process_case(log_path)?;
        self.after_ingest(outcome.as_ref());
        Ok(outcome)
    }

    fn after_ingest(&self, outcome: Option<&ProcessOutcome>) {
        let Some(outcome) = outcome else {
            return;
        };
        self.metrics.cases_learned.inc();
        if let Some(policy) = &outcome.rebuilt {
            self.metrics.policy_rebuilds.inc();
            self.engine.set_learned_policy(Some(policy.clone()));
        }
    }

    /// Rebuild the learned policy now and activate it.
    pub fn rebuild_policy(&self) -> Result<Option<LearnedPolicy>> {
        let policy = self.learner.build_policy()?;
        if let Some(p) = &policy {
            self.metrics.policy_rebuilds.inc();
            self.engine.set_learned_policy(Some(p.clone()));
        }
        Ok(policy)
    }
}
