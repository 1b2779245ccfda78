//! Learned policy: statistics-derived priority ranking plus a blacklist.
//!
//! Produced by `learner::PolicyBuilder`, persisted as `learned_policy.json`,
//! and applied by the policy engine as a post-filter over every plan.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};

use super::action::{sort_by_priority, Action};
use crate::persist;

/// Aggregate outcome of one action type (or `type:strength` pair).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStat {
    pub count: u32,
    pub accepted: u32,
    pub avg_delta: f64,
    pub accept_rate: f64,
}

/// Average gain of the action that immediately follows another.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderStat {
    pub avg_gain: f64,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnedPolicy {
    #[serde(default)]
    pub action_stats: BTreeMap<String, ActionStat>,
    #[serde(default)]
    pub strength_stats: BTreeMap<String, ActionStat>,
    /// Keyed `"a->b"`. Persisted for analysis; ordering does not consume it yet.
    #[serde(default)]
    pub order_stats: BTreeMap<String, OrderStat>,
    #[serde(default)]
    pub recommended_priorities: BTreeMap<String, u32>,
    #[serde(default)]
    pub bad_actions: BTreeSet<String>,
}

impl LearnedPolicy {
    /// Load from disk. Absent or unreadable file means "no override".
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable learned policy");
                return None;
            }
        };
        let (policy, digest) = match Self::from_bytes(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable learned policy");
                return None;
            }
        };
        info!(
            path = %path.display(),
            digest = %&digest[..12],
            ranked = policy.recommended_priorities.len(),
            blacklisted = policy.bad_actions.len(),
            "learned policy loaded"
        );
        Some(policy)
    }

    /// Parse one snapshot of the policy file and digest those same bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, String)> {
        let policy: Self = serde_json::from_slice(bytes).context("parsing learned policy")?;
        Ok((policy, persist::sha256_hex(bytes)))
    }

    pub fn is_blacklisted(&self, action: &Action) -> bool {
        self.bad_actions.contains(action.kind().as_str())
    }

    /// Drop blacklisted actions, apply learned ranks, re-sort, then renumber
    /// the surviving plan densely from 1.
    pub fn apply(&self, actions: Vec<Action>, notes: &mut Vec<String>) -> Vec<Action> {
        let mut kept: Vec<Action> = Vec::with_capacity(actions.len());
        for action in actions {
            if self.is_blacklisted(&action) {
                notes.push(format!("Learned policy removed {}.", action.kind()));
                continue;
            }
            kept.push(action);
        }

        for action in kept.iter_mut() {
            if let Some(&rank) = self.recommended_priorities.get(action.kind().as_str()) {
                action.set_priority(rank);
            }
        }
        sort_by_priority(&mut kept);
        for (i, action) in kept.iter_mut().enumerate() {
            action.set_priority(i as u32 + 1);
        }
        if kept.is_empty() && !self.bad_actions.is_empty() {
            warn!("learned policy left an empty plan");
        }
        kept
    }
}
