//! Property-based tests for faceguard's decision and learning invariants.
//!
//! # How to run
//!
//! ```bash
//! cargo test --test property_tests
//! PROPTEST_CASES=10000 cargo test --test property_tests
//! ```
//!
//! # Testing strategy
//!
//! - **Guard**: acceptance is exactly the two-threshold rule, and no
//!   accepted step ever lands below the case baseline beyond tolerance.
//! - **Parser**: step deltas equal their endpoints; parsing is total and
//!   deterministic on arbitrary text.
//! - **Builder**: learned ranks are a bijection onto `1..=N`.
//! - **Policy**: plans are sorted, carry unique action types, and stay
//!   dense after the learned post-filter.
//!
//! Each property is named `prop_<function>_<invariant>`.

mod common;

use anyhow::Result;
use common::{case_log, LogStep};
use faceguard::facts::{
    BlurFacts, BrightnessFacts, ContrastFacts, NoiseFacts, ObjectiveFacts, RawAssessment,
    ResolutionFacts, ScoreBuilder,
};
use faceguard::guard::{
    is_acceptable, FaceMetrics, GuardConfig, RecognitionEvaluator, RecognitionReport, SafetyGuard,
};
use faceguard::learner::{builder, parser};
use faceguard::policy::{ActionStat, LearnedPolicy, PolicyConfig, PolicyEngine, Profile};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

// == Guard =====================================================================

/// Replays a fixed sequence of (similarity, score) readings.
struct Replay(Mutex<VecDeque<(f64, f64)>>);

impl RecognitionEvaluator for Replay {
    fn evaluate(&self, _image: &Path, _silent: bool) -> Result<RecognitionReport> {
        let (similarity, score) = self
            .0
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((0.0, 0.0));
        Ok(RecognitionReport::from_faces(vec![FaceMetrics {
            best_similarity: similarity,
            final_score: Some(score),
            ..Default::default()
        }]))
    }
}

proptest! {
    #[test]
    fn prop_is_acceptable_matches_thresholds(
        baseline in 0.0f64..100.0,
        after in 0.0f64..100.0,
        delta in -1.0f64..1.0,
        sim_eps in 0.0f64..5.0,
        score_eps in 0.0f64..0.1,
    ) {
        let config = GuardConfig {
            enabled: true,
            similarity_epsilon: sim_eps,
            score_epsilon: score_eps,
        };
        let (identity, score) = is_acceptable(&config, baseline, after, delta);
        prop_assert_eq!(identity, after >= baseline - sim_eps);
        prop_assert_eq!(score, delta >= -score_eps);
    }

    #[test]
    fn prop_check_step_accepted_never_below_baseline(
        readings in prop::collection::vec((0.0f64..100.0, 0.0f64..1.0), 2..12),
    ) {
        let config = GuardConfig::default();
        let eps = config.similarity_epsilon;
        let score_eps = config.score_epsilon;
        let evaluator = Arc::new(Replay(Mutex::new(readings.iter().copied().collect())));
        let mut guard = SafetyGuard::new(evaluator, config);
        let baseline = guard.start_case(Path::new("in.png"));

        let mut best_score = baseline.score;
        for i in 1..readings.len() {
            let (accepted, d) = guard.check_step("deblur", Path::new("a.png"), Path::new("b.png"), "m");
            prop_assert_eq!(accepted, d.accepted);
            prop_assert_eq!(d.before_score, best_score);
            if accepted {
                prop_assert!(d.after_similarity >= baseline.similarity - eps, "step {}", i);
                prop_assert!(d.delta_score >= -score_eps);
                best_score = d.after_score;
            }
        }
        let summary = guard.log_case_summary().unwrap();
        prop_assert!(summary.final_similarity >= baseline.similarity - eps);
        prop_assert_eq!(summary.accepted_actions + summary.rejected_actions, summary.actions_tried);
    }
}

// == Parser ====================================================================

fn step_kind() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["deblur", "brightness", "contrast", "denoise", "pose", "super_resolution"])
}

proptest! {
    #[test]
    fn prop_parse_delta_is_after_minus_before(
        steps in prop::collection::vec((step_kind(), 0.0f64..100.0, 0.0f64..100.0, any::<bool>()), 0..8),
    ) {
        let log_steps: Vec<LogStep> = steps
            .iter()
            .map(|&(k, b, a, ok)| LogStep::new(k, b, a, ok))
            .collect();
        let record = parser::parse(&case_log("CASE_0100", &log_steps));

        prop_assert_eq!(record.case_id.as_str(), "CASE_0100");
        prop_assert_eq!(record.steps.len(), steps.len());
        for (parsed, &(kind, before, after, ok)) in record.steps.iter().zip(&steps) {
            prop_assert_eq!(parsed.step_type.as_str(), kind);
            prop_assert_eq!(parsed.accepted, Some(ok));
            let (b, a) = (parsed.before_similarity.unwrap(), parsed.after_similarity.unwrap());
            prop_assert!((b - before).abs() < 0.006);
            prop_assert!((a - after).abs() < 0.006);
            prop_assert_eq!(parsed.delta_similarity, Some(a - b));
        }
    }

    #[test]
    fn prop_parse_is_total_and_deterministic(text in "\\PC{0,400}") {
        let first = parser::parse(&text);
        let second = parser::parse(&text);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_last_float_picks_trailing_number(a in 0u32..1000, b in 0u32..1000) {
        let line = format!("Before {a}.5 then {b}.25");
        prop_assert_eq!(parser::last_float(&line), Some(b as f64 + 0.25));
    }
}

// == Builder ===================================================================

proptest! {
    #[test]
    fn prop_rank_actions_is_bijection(
        deltas in prop::collection::btree_map("[a-z_]{1,12}", -10.0f64..10.0, 1..10),
    ) {
        let stats: BTreeMap<String, ActionStat> = deltas
            .iter()
            .map(|(k, d)| (k.clone(), ActionStat { count: 1, accepted: 1, avg_delta: *d, accept_rate: 1.0 }))
            .collect();
        let ranks = builder::rank_actions(&stats);

        prop_assert_eq!(ranks.len(), stats.len());
        let mut values: Vec<u32> = ranks.values().copied().collect();
        values.sort_unstable();
        let expected: Vec<u32> = (1..=stats.len() as u32).collect();
        prop_assert_eq!(values, expected);

        for (a, ra) in &ranks {
            for (b, rb) in &ranks {
                if stats[a].avg_delta > stats[b].avg_delta {
                    prop_assert!(ra < rb);
                }
            }
        }
    }
}

// == Policy ====================================================================

fn raw_assessment() -> impl Strategy<Value = RawAssessment> {
    (
        0.0f64..500.0,
        0.0f64..255.0,
        0.0f64..90.0,
        15.0f64..50.0,
        64u32..2048,
    )
        .prop_map(|(variance, mean, std, psnr, side)| RawAssessment {
            objective: Some(ObjectiveFacts {
                blur: Some(BlurFacts {
                    variance: Some(variance),
                }),
                brightness: Some(BrightnessFacts {
                    mean: Some(mean),
                    std: Some(std),
                }),
                contrast: Some(ContrastFacts {
                    std: Some(std),
                    spread: Some(std * 3.0),
                }),
                noise: Some(NoiseFacts {
                    psnr: Some(psnr),
                    noise: Some((45.0 - psnr) / 3.0),
                }),
                resolution: Some(ResolutionFacts {
                    width: Some(side),
                    height: Some(side * 3 / 4),
                }),
            }),
            ..Default::default()
        })
}

fn kinds() -> Vec<&'static str> {
    vec!["pose", "brightness", "contrast", "deblur", "super_resolution", "denoise"]
}

proptest! {
    #[test]
    fn prop_evaluate_plan_sorted_and_unique(
        raw in raw_assessment(),
        enhancement in any::<bool>(),
        round in 1u32..3,
    ) {
        let engine = PolicyEngine::with_learned(PolicyConfig::default(), None);
        let facts = ScoreBuilder.build(&raw);
        let profile = if enhancement { Profile::Enhancement } else { Profile::Forensic };
        let decision = engine.evaluate(&facts, profile, round);

        prop_assert!((0.0..=1.0).contains(&decision.confidence));
        let priorities: Vec<u32> = decision.actions.iter().map(|a| a.priority()).collect();
        prop_assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
        let unique: HashSet<_> = decision.actions.iter().map(|a| a.kind()).collect();
        prop_assert_eq!(unique.len(), decision.actions.len());
    }

    #[test]
    fn prop_learned_apply_drops_blacklist_and_densifies(
        raw in raw_assessment(),
        blacklist in prop::sample::subsequence(kinds(), 0..4),
        ranks in prop::sample::subsequence(kinds(), 0..6),
    ) {
        let learned = LearnedPolicy {
            bad_actions: blacklist.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            recommended_priorities: ranks
                .iter()
                .rev()
                .enumerate()
                .map(|(i, k)| (k.to_string(), i as u32 + 1))
                .collect(),
            ..Default::default()
        };
        let engine = PolicyEngine::with_learned(PolicyConfig::default(), Some(learned));
        let decision = engine.evaluate(&ScoreBuilder.build(&raw), Profile::Forensic, 1);

        for action in &decision.actions {
            prop_assert!(!blacklist.contains(&action.kind().as_str()));
        }
        let priorities: Vec<u32> = decision.actions.iter().map(|a| a.priority()).collect();
        let dense: Vec<u32> = (1..=decision.actions.len() as u32).collect();
        prop_assert_eq!(priorities, dense);
    }
}
