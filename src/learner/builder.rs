//! # Policy Builder — Statistics to Learned Policy
//!
//! Rebuilds the [`LearnedPolicy`] wholesale from every stored case.
//!
//! | Output | Derivation |
//! |--------|-----------|
//! | `action_stats` | per step type: count, accepted, mean delta, accept rate |
//! | `strength_stats` | same, keyed `"type:strength"` (`default` when unset) |
//! | `order_stats` | for each adjacent pair `a->b`, mean delta of `b` |
//! | `recommended_priorities` | rank by `avg_delta` descending, 1 = best |
//! | `bad_actions` | `avg_delta < 0` and `accept_rate < 0.4` |
//!
//! Ties in `avg_delta` rank alphabetically so the ranking is a total order
//! and always a bijection onto `1..=N`.

use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use super::record::CaseRecord;
use super::storage::CaseStorage;
use crate::policy::{ActionStat, LearnedPolicy, OrderStat};

/// Accept-rate ceiling under which a net-harmful action is blacklisted.
pub const BAD_ACCEPT_RATE: f64 = 0.4;

#[derive(Default)]
struct Tally {
    count: u32,
    accepted: u32,
    delta_sum: f64,
}

impl Tally {
    fn add(&mut self, delta: f64, accepted: bool) {
        self.count += 1;
        self.delta_sum += delta;
        if accepted {
            self.accepted += 1;
        }
    }

    fn stat(&self) -> ActionStat {
        let n = self.count.max(1) as f64;
        ActionStat {
            count: self.count,
            accepted: self.accepted,
            avg_delta: self.delta_sum / n,
            accept_rate: self.accepted as f64 / n,
        }
    }
}

pub struct PolicyBuilder {
    storage: CaseStorage,
}

impl PolicyBuilder {
    pub fn new(storage: CaseStorage) -> Self {
        Self { storage }
    }

    /// Build from the stored corpus. `None` when no case has any step.
    pub fn build(&self) -> Option<LearnedPolicy> {
        let cases = self.storage.load_all_cases();
        let policy = build_from(&cases);
        match &policy {
            Some(p) => info!(
                cases = cases.len(),
                actions = p.action_stats.len(),
                blacklisted = p.bad_actions.len(),
                "learned policy built"
            ),
            None => info!(cases = cases.len(), "no step history, learned policy not built"),
        }
        policy
    }
}

/// Pure build over an in-memory corpus.
pub fn build_from(cases: &[CaseRecord]) -> Option<LearnedPolicy> {
    let mut actions: BTreeMap<String, Tally> = BTreeMap::new();
    let mut strengths: BTreeMap<String, Tally> = BTreeMap::new();
    let mut orders: BTreeMap<String, (f64, u32)> = BTreeMap::new();

    for case in cases {
        for step in &case.steps {
            let delta = step.gain();
            let accepted = step.is_accepted();
            actions
                .entry(step.step_type.clone())
                .or_default()
                .add(delta, accepted);
            let strength = step.strength.as_deref().unwrap_or("default");
            strengths
                .entry(format!("{}:{}", step.step_type, strength))
                .or_default()
                .add(delta, accepted);
        }
        for pair in case.steps.windows(2) {
            let entry = orders
                .entry(format!("{}->{}", pair[0].step_type, pair[1].step_type))
                .or_insert((0.0, 0));
            entry.0 += pair[1].gain();
            entry.1 += 1;
        }
    }

    if actions.is_empty() {
        return None;
    }

    let action_stats: BTreeMap<String, ActionStat> =
        actions.iter().map(|(k, t)| (k.clone(), t.stat())).collect();
    let strength_stats = strengths.iter().map(|(k, t)| (k.clone(), t.stat())).collect();
    let order_stats = orders
        .into_iter()
        .map(|(k, (sum, count))| {
            (
                k,
                OrderStat {
                    avg_gain: sum / count.max(1) as f64,
                    count,
                },
            )
        })
        .collect();

    Some(LearnedPolicy {
        recommended_priorities: rank_actions(&action_stats),
        bad_actions: bad_actions(&action_stats),
        action_stats,
        strength_stats,
        order_stats,
    })
}

/// Dense ranking 1..=N by `avg_delta` descending, ties by name.
pub fn rank_actions(stats: &BTreeMap<String, ActionStat>) -> BTreeMap<String, u32> {
    let mut ordered: Vec<(&String, f64)> = stats.iter().map(|(k, s)| (k, s.avg_delta)).collect();
    ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ordered
        .into_iter()
        .enumerate()
        .map(|(i, (k, _))| (k.clone(), i as u32 + 1))
        .collect()
}

pub fn bad_actions(stats: &BTreeMap<String, ActionStat>) -> BTreeSet<String> {
    stats
        .iter()
        .filter(|(_, s)| s.avg_delta < 0.0 && s.accept_rate < BAD_ACCEPT_RATE)
        .map(|(k, _)| k.clone())
        .collect()
}
