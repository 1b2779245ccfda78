//! Learner loop tests: case logs in, learned policy out, fed back into
//! planning.

mod common;

use common::*;
use faceguard::facts::ScoreBuilder;
use faceguard::learner::{CaseStorage, LearnerConfig, LearnerManager};
use faceguard::policy::{ActionKind, PolicyConfig, PolicyEngine, Profile};
use std::path::Path;

fn manager(root: &Path, interval: u32) -> LearnerManager {
    LearnerManager::new(
        LearnerConfig {
            enabled: true,
            rebuild_interval: interval,
        },
        CaseStorage::new(root.join("cases")),
        root.join("learned_policy.json"),
    )
}

/// Deblur always costs identity and is rejected, brightness helps.
fn deblur_hurts(case_id: &str) -> String {
    case_log(
        case_id,
        &[
            LogStep::new("deblur", 80.0, 77.0, false),
            LogStep::new("brightness", 80.0, 81.5, true),
        ],
    )
}

#[test]
fn twenty_cases_trigger_exactly_one_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let learner = manager(dir.path(), 20);

    for i in 1..=20 {
        let log = write_log(
            dir.path(),
            &format!("case_{i}.log"),
            &deblur_hurts(&format!("CASE_{i:04}")),
        );
        let outcome = learner.process_case(&log).unwrap().expect("learner enabled");
        assert_eq!(outcome.processed_cases, i);
        assert_eq!(outcome.rebuilt.is_some(), i == 20, "case {i}");
    }

    assert_eq!(learner.rebuild_count(), 1);
    assert_eq!(learner.state().processed_cases, 20);
    assert!(dir.path().join("learned_policy.json").is_file());
    assert!(dir.path().join("cases/global_statistics.json").is_file());
    assert_eq!(learner.storage().case_dirs().len(), 20);
}

#[test]
fn harmful_action_is_blacklisted_and_dropped_from_plans() {
    let dir = tempfile::tempdir().unwrap();
    let learner = manager(dir.path(), 5);
    for i in 1..=5 {
        let log = write_log(dir.path(), "case.log", &deblur_hurts(&format!("CASE_{i:04}")));
        learner.process_case(&log).unwrap();
    }

    let policy = faceguard::policy::LearnedPolicy::load(&dir.path().join("learned_policy.json"))
        .expect("policy written on the fifth case");
    assert!(policy.bad_actions.contains("deblur"));
    assert!(!policy.bad_actions.contains("brightness"));
    assert_eq!(policy.recommended_priorities.get("brightness"), Some(&1));
    assert_eq!(policy.recommended_priorities.get("deblur"), Some(&2));

    let stat = &policy.action_stats["deblur"];
    assert_eq!(stat.count, 5);
    assert_eq!(stat.accepted, 0);
    assert!((stat.avg_delta + 3.0).abs() < 1e-9);

    let engine = PolicyEngine::new(
        PolicyConfig::default(),
        Some(dir.path().join("learned_policy.json")),
    );
    assert!(engine.has_learned_policy());
    let facts = ScoreBuilder.build(&dark_blurry());
    for profile in [Profile::Forensic, Profile::Enhancement] {
        let decision = engine.evaluate(&facts, profile, 1);
        assert!(
            decision.actions.iter().all(|a| a.kind() != ActionKind::Deblur),
            "{profile} plan kept deblur"
        );
        assert!(decision
            .actions
            .iter()
            .any(|a| a.kind() == ActionKind::Brightness));
    }
}

#[test]
fn cadence_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let learner = manager(dir.path(), 4);
        for i in 1..=3 {
            let log = write_log(dir.path(), "case.log", &deblur_hurts(&format!("CASE_{i:04}")));
            assert!(learner.process_case(&log).unwrap().unwrap().rebuilt.is_none());
        }
    }

    let learner = manager(dir.path(), 4);
    assert_eq!(learner.state().processed_cases, 3);
    let log = write_log(dir.path(), "case.log", &deblur_hurts("CASE_0004"));
    let outcome = learner.process_case(&log).unwrap().unwrap();
    assert_eq!(outcome.processed_cases, 4);
    assert!(outcome.rebuilt.is_some());
}

#[test]
fn reingesting_a_case_overwrites_it() {
    let dir = tempfile::tempdir().unwrap();
    let learner = manager(dir.path(), 2);
    let log = write_log(
        dir.path(),
        "case.log",
        &case_log("CASE_0001", &[LogStep::new("deblur", 80.0, 77.0, false)]),
    );
    let first = learner.process_case(&log).unwrap().unwrap();
    let second = learner.process_case(&log).unwrap().unwrap();
    assert_eq!(first.case_id, "CASE_0001");
    assert_eq!(second.case_id, "CASE_0001");
    assert_eq!(learner.storage().case_dirs().len(), 1);

    let policy = second.rebuilt.expect("second ingest hits the interval");
    assert_eq!(policy.action_stats["deblur"].count, 1);
    let global = learner.global_statistics().unwrap().unwrap();
    assert_eq!(global.total_cases, 1);
}

#[test]
fn truncated_log_still_counts() {
    let dir = tempfile::tempdir().unwrap();
    let learner = manager(dir.path(), 100);
    let mut text = deblur_hurts("CASE_0009");
    // Cut inside the second step, before its decision line.
    let cut = text.find("Final decision      : ACCEPTED").unwrap();
    text.truncate(cut);
    let log = write_log(dir.path(), "partial.log", &text);

    let outcome = learner.process_case(&log).unwrap().unwrap();
    let case = learner.storage().load_case(&outcome.case_id).unwrap();
    assert_eq!(case.steps.len(), 2);
    assert_eq!(case.steps[0].accepted, Some(false));
    assert_eq!(case.steps[1].accepted, None);
}
