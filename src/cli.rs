//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Contains the
//! execution logic for each subcommand: planning, the interactive case run,
//! log parsing, learner maintenance, and rayon configuration.
//!
//! Machine-readable results (decisions, case records, statistics) go to
//! stdout as pretty JSON; progress goes through `tracing` to stderr.

use anyhow::{bail, Context, Result};
use faceguard::config::Config;
use faceguard::context::{AppContext, Collaborators};
use faceguard::external::CommandFactsProvider;
use faceguard::facts::{QualityFactsProvider, RawAssessment, ScoreBuilder};
use faceguard::learner::{parser, CaseStorage, LearnerManager};
use faceguard::policy::{Decision, PolicyEngine, Profile};
use faceguard::session::{CaseSession, SessionEvent};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::LearnAction;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Plan ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct PlanReport<'a> {
    image: &'a Path,
    facts: &'a faceguard::facts::QualityFacts,
    decision: &'a Decision,
}

/// Run the `plan` subcommand: assess, evaluate round 1, print JSON.
///
/// With `facts_file` the provider is not run; the file holds the raw
/// provider report.
pub fn run_plan(
    mut config: Config,
    image: &Path,
    mode: Option<Profile>,
    facts_file: Option<&Path>,
) -> Result<()> {
    if let Some(mode) = mode {
        config.pipeline.mode = mode;
    }

    let raw: RawAssessment = match facts_file {
        Some(path) => faceguard::persist::read_json(path)?,
        None => {
            if !image.is_file() {
                bail!("input image {} does not exist", image.display());
            }
            if config.tools.facts_command.is_empty() {
                bail!("tools.facts_command is not configured (or pass --facts)");
            }
            let provider = CommandFactsProvider {
                command: config.tools.facts_command.clone(),
                timeout: config.tools.timeout(),
            };
            provider.assess(image)?
        }
    };

    let engine = PolicyEngine::new(
        config.policy.clone(),
        Some(config.paths.learned_policy.clone()),
    );
    let facts = ScoreBuilder.build(&raw);
    let decision = engine.evaluate(&facts, config.pipeline.mode, 1);
    info!(
        image = %image.display(),
        mode = %config.pipeline.mode,
        actions = decision.actions.len(),
        "plan ready"
    );
    print_json(&PlanReport {
        image,
        facts: &facts,
        decision: &decision,
    })
}

// ── Run ─────────────────────────────────────────────────────────

pub struct RunOptions {
    pub image: PathBuf,
    pub mode: Option<Profile>,
    pub yes: bool,
    pub no_guard: bool,
    pub learn: bool,
    pub audit_log: Option<PathBuf>,
    pub metrics: bool,
}

fn print_plan(decision: &Decision) {
    println!(
        "Plan ({}, confidence {:.2}): {} action(s)",
        decision.profile,
        decision.confidence,
        decision.actions.len()
    );
    for action in &decision.actions {
        let strength = action.strength_label().unwrap_or_else(|| "-".into());
        println!("  {}. {} [{}]", action.priority(), action.kind(), strength);
    }
    for note in &decision.notes {
        println!("  note: {note}");
    }
}

fn confirm_on_stdin(count: usize) -> Result<bool> {
    print!("Execute {count} action(s)? [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Run the `run` subcommand: one full case through a [`CaseSession`].
pub fn run_case(mut config: Config, opts: RunOptions) -> Result<()> {
    if let Some(mode) = opts.mode {
        config.pipeline.mode = mode;
    }
    if opts.no_guard {
        warn!("safety guard disabled, steps will not be validated");
        config.guard.enabled = false;
    }
    config.learner.enabled = opts.learn;

    let collaborators = Collaborators::from_config(&config)?;
    let ctx = AppContext::new(config, collaborators);
    if let Some(path) = &opts.audit_log {
        ctx.attach_audit_log(path)?;
    }

    let orchestrator = ctx.orchestrator();
    let case_id = orchestrator.case_id().to_string();
    info!(case_id = %case_id, image = %opts.image.display(), "case starting");

    let mut session = CaseSession::spawn(orchestrator, opts.image.clone());
    while let Some(event) = session.next_event() {
        match event {
            SessionEvent::QcReady { decision, .. } => {
                print_plan(&decision);
                if opts.yes || confirm_on_stdin(decision.actions.len())? {
                    session.confirm();
                } else {
                    session.abort();
                }
            }
            SessionEvent::Step { step_type, output } => {
                println!("step {step_type}: {}", output.display());
            }
            SessionEvent::Finished(outcome) => {
                println!(
                    "Finished {}: {}/{} step(s) accepted, final image {}",
                    outcome.case_id,
                    outcome.accepted_steps(),
                    outcome.steps.len(),
                    outcome.final_path.display()
                );
                if let Some(summary) = &outcome.guard_summary {
                    println!(
                        "Similarity {:.2} -> {:.2} ({:+.2}), score net {:+.4}",
                        summary.baseline_similarity,
                        summary.final_similarity,
                        summary.similarity_improvement,
                        summary.net_improvement
                    );
                }
            }
            SessionEvent::Aborted => println!("Aborted, no action executed"),
            SessionEvent::Failed(msg) => warn!(case_id = %case_id, error = %msg, "case failed"),
        }
    }

    let outcome = session
        .join()
        .with_context(|| format!("case {case_id} failed"))?;

    if outcome.is_some() && opts.learn {
        if let Some(processed) = ctx.finish_case()? {
            println!(
                "Learner stored {} ({} case(s) processed{})",
                processed.case_id,
                processed.processed_cases,
                if processed.rebuilt.is_some() {
                    ", policy rebuilt"
                } else {
                    ""
                }
            );
        }
    }

    if opts.metrics {
        print!("{}", ctx.metrics.encode());
    }
    Ok(())
}

// ── Parse Log ───────────────────────────────────────────────────

/// Run the `parse-log` subcommand.
pub fn run_parse_log(log: &Path) -> Result<()> {
    if !log.is_file() {
        bail!("case log {} not found", log.display());
    }
    let record = parser::parse_file(log);
    if record.is_empty() {
        warn!(log = %log.display(), "no case data recognized in log");
    }
    print_json(&record)
}

// ── Learner ─────────────────────────────────────────────────────

fn learner_from_config(config: &Config) -> Result<LearnerManager> {
    if !config.learner.enabled {
        bail!("learning is disabled (learner.enabled = false)");
    }
    if !config.guard.enabled {
        bail!("adaptive learning requires the safety guard (guard.enabled = false)");
    }
    Ok(LearnerManager::new(
        config.learner.clone(),
        CaseStorage::new(&config.paths.case_root),
        &config.paths.learned_policy,
    ))
}

/// Handle the `learn` subcommand and its actions.
pub fn run_learn(config: Config, action: &LearnAction) -> Result<()> {
    match action {
        LearnAction::Ingest { log } => {
            let learner = learner_from_config(&config)?;
            if let Some(outcome) = learner.process_case(log)? {
                println!(
                    "Stored {} in {} ({} case(s) processed)",
                    outcome.case_id,
                    outcome.case_dir.display(),
                    outcome.processed_cases
                );
                if let Some(policy) = &outcome.rebuilt {
                    println!(
                        "Learned policy rebuilt: {} ranked, {} blacklisted",
                        policy.recommended_priorities.len(),
                        policy.bad_actions.len()
                    );
                }
            }
            Ok(())
        }
        LearnAction::Rebuild => {
            let learner = learner_from_config(&config)?;
            match learner.build_policy()? {
                Some(policy) => print_json(&policy),
                None => {
                    println!("No stored cases with steps, policy not rebuilt");
                    Ok(())
                }
            }
        }
        LearnAction::Stats => {
            let storage = CaseStorage::new(&config.paths.case_root);
            match faceguard::learner::GlobalStatisticsGenerator::new(storage).generate()? {
                Some(stats) => print_json(&stats),
                None => {
                    println!("No stored cases");
                    Ok(())
                }
            }
        }
    }
}

// ── Rayon Configuration ─────────────────────────────────────────

/// Configure the rayon global thread pool used by corpus scans.
pub fn configure_rayon(threads: Option<usize>) {
    let num_threads = threads.unwrap_or(0);
    if num_threads > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
        {
            warn!(error = %e, "Could not configure rayon thread pool");
        }
    }
}
