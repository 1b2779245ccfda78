//! # Policy — Quality Facts to Action Plan
//!
//! Maps a [`QualityFacts`] snapshot to an ordered plan of enhancement
//! [`Action`]s under one of two profiles:
//!
//! - **Forensic**: identity-first. Single round, conservative operators,
//!   reports a [`RiskLevel`].
//! - **Enhancement**: visual-quality-first. Up to two rounds, the second
//!   restricted to cosmetic actions, reports a [`TargetQuality`].
//!
//! ## Learned Override
//!
//! When a [`LearnedPolicy`] is loaded it runs after candidate generation as
//! a hard post-filter: blacklisted action types are removed no matter which
//! threshold produced them, surviving actions take the learned rank as their
//! priority, and the plan is re-sorted and renumbered 1..N. Without a learned
//! policy the native priorities are kept and the plan is sorted ascending.
//!
//! Planning is pure apart from reading the learned policy snapshot; it never
//! fails. An empty plan means "no enhancement needed".

pub mod action;
pub mod enhancement;
pub mod forensic;
pub mod learned;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::RwLock;
use tracing::{debug, info};

pub use action::{Action, ActionKind, BrightnessLevel, BrightnessParams, ClaheParams, Strength};
pub use enhancement::EnhancementPolicyConfig;
pub use forensic::ForensicPolicyConfig;
pub use learned::{ActionStat, LearnedPolicy, OrderStat};

use crate::facts::{QualityFacts, QualityFlags};

// ── Decision Types ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Forensic,
    Enhancement,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Forensic => write!(f, "forensic"),
            Profile::Enhancement => write!(f, "enhancement"),
        }
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forensic" => Ok(Profile::Forensic),
            "enhancement" => Ok(Profile::Enhancement),
            other => Err(format!("unknown mode: {other} (expected forensic|enhancement)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Safe,
    Moderate,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "SAFE",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetQuality {
    Ultra,
    High,
    Medium,
    Low,
}

impl TargetQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetQuality::Ultra => "ULTRA",
            TargetQuality::High => "HIGH",
            TargetQuality::Medium => "MEDIUM",
            TargetQuality::Low => "LOW",
        }
    }
}

/// Profile-specific headline verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    RiskLevel(RiskLevel),
    TargetQuality(TargetQuality),
}

/// Output of one planning round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub profile: Profile,
    pub round: u32,
    pub confidence: f64,
    pub assessment: Assessment,
    pub actions: Vec<Action>,
    pub notes: Vec<String>,
    pub quality_flags: QualityFlags,
}

impl Decision {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        match self.assessment {
            Assessment::RiskLevel(r) => Some(r),
            Assessment::TargetQuality(_) => None,
        }
    }

    pub fn target_quality(&self) -> Option<TargetQuality> {
        match self.assessment {
            Assessment::TargetQuality(t) => Some(t),
            Assessment::RiskLevel(_) => None,
        }
    }
}

// ── Configuration ───────────────────────────────────────────────

/// The `[policy]` section: thresholds for both profiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub forensic: ForensicPolicyConfig,
    pub enhancement: EnhancementPolicyConfig,
}

// ── Policy Engine ───────────────────────────────────────────────

pub struct PolicyEngine {
    config: PolicyConfig,
    learned_path: Option<PathBuf>,
    learned: RwLock<Option<LearnedPolicy>>,
}

impl PolicyEngine {
    /// Build an engine, loading the learned policy from `learned_path` if present.
    pub fn new(config: PolicyConfig, learned_path: Option<PathBuf>) -> Self {
        let learned = learned_path.as_deref().and_then(LearnedPolicy::load);
        Self {
            config,
            learned_path,
            learned: RwLock::new(learned),
        }
    }

    /// Build an engine with an in-memory learned policy and no backing file.
    pub fn with_learned(config: PolicyConfig, learned: Option<LearnedPolicy>) -> Self {
        Self {
            config,
            learned_path: None,
            learned: RwLock::new(learned),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Re-read the learned policy file. Returns whether one is now active.
    pub fn reload_learned_policy(&self) -> bool {
        let Some(path) = self.learned_path.as_deref() else {
            return self.has_learned_policy();
        };
        let fresh = LearnedPolicy::load(path);
        let active = fresh.is_some();
        *self.learned.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        info!(active, "learned policy reloaded");
        active
    }

    pub fn set_learned_policy(&self, policy: Option<LearnedPolicy>) {
        *self.learned.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    pub fn has_learned_policy(&self) -> bool {
        self.learned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn learned_policy(&self) -> Option<LearnedPolicy> {
        self.learned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Plan one round. Never fails; missing facts are already neutral.
    pub fn evaluate(&self, facts: &QualityFacts, profile: Profile, round: u32) -> Decision {
        let (assessment, confidence, mut actions, mut notes) = match profile {
            Profile::Forensic => {
                let p = forensic::plan(&self.config.forensic, facts);
                (Assessment::RiskLevel(p.risk), p.confidence, p.actions, p.notes)
            }
            Profile::Enhancement => {
                let p = enhancement::plan(&self.config.enhancement, facts, round);
                (
                    Assessment::TargetQuality(p.target),
                    p.confidence,
                    p.actions,
                    p.notes,
                )
            }
        };

        let guard = self.learned.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(learned) => actions = learned.apply(actions, &mut notes),
            None => action::sort_by_priority(&mut actions),
        }
        drop(guard);

        debug!(
            %profile,
            round,
            actions = actions.len(),
            confidence,
            "plan evaluated"
        );

        Decision {
            profile,
            round,
            confidence,
            assessment,
            actions,
            notes,
            quality_flags: QualityFlags::from_facts(facts),
        }
    }
}
