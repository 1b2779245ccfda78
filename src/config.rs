//! TOML configuration: parsing, defaults and validation.
//!
//! Every section and field has a default, so an absent file or an empty
//! document yields a working configuration.
//!
//! ```toml
//! [paths]
//! case_root = "learner_cases"
//! learned_policy = "learned_policy.json"
//! work_dir = "work"
//!
//! [guard]
//! similarity_epsilon = 0.5
//!
//! [learner]
//! rebuild_interval = 20
//!
//! [pipeline]
//! mode = "forensic"
//!
//! [policy.forensic]
//! pose_roll_deg = 7.0
//!
//! [tools.operators.deblur]
//! command = ["python", "ops/deblur.py"]
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::external::ToolsConfig;
use crate::guard::GuardConfig;
use crate::learner::LearnerConfig;
use crate::orchestrator::PipelineConfig;
use crate::policy::PolicyConfig;

// ── Configuration Structs ───────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub guard: GuardConfig,
    pub learner: LearnerConfig,
    pub pipeline: PipelineConfig,
    pub policy: PolicyConfig,
    pub tools: ToolsConfig,
}

/// The `[paths]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub case_root: PathBuf,
    pub learned_policy: PathBuf,
    /// Operator outputs land here.
    pub work_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            case_root: PathBuf::from("learner_cases"),
            learned_policy: PathBuf::from("learned_policy.json"),
            work_dir: PathBuf::from("work"),
        }
    }
}

// ── TOML Parsing ────────────────────────────────────────────────

pub fn parse_toml(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_toml(&content).with_context(|| format!("in config {}", path.display()))
}

/// Load `path` if given, otherwise defaults.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => parse_toml_file(p),
        None => Ok(Config::default()),
    }
}

fn ascending(name: &str, values: &[f64]) -> Result<()> {
    if values.windows(2).any(|w| w[0] >= w[1]) {
        bail!("{name} must be strictly ascending, got {values:?}");
    }
    Ok(())
}

fn descending(name: &str, values: &[f64]) -> Result<()> {
    if values.windows(2).any(|w| w[0] <= w[1]) {
        bail!("{name} must be strictly descending, got {values:?}");
    }
    Ok(())
}

/// Reject values no run could use sensibly.
pub fn validate(config: &Config) -> Result<()> {
    let g = &config.guard;
    if !(g.similarity_epsilon >= 0.0) || !(g.score_epsilon >= 0.0) {
        bail!(
            "guard epsilons must be non-negative (similarity={}, score={})",
            g.similarity_epsilon,
            g.score_epsilon
        );
    }
    if config.learner.rebuild_interval == 0 {
        bail!("learner.rebuild_interval must be at least 1");
    }
    if config.pipeline.max_rounds == 0 {
        bail!("pipeline.max_rounds must be at least 1");
    }
    if config.tools.timeout_secs == 0 {
        bail!("tools.timeout_secs must be at least 1");
    }

    let f = &config.policy.forensic;
    if f.moderate_quality >= f.safe_quality {
        bail!(
            "policy.forensic.moderate_quality ({}) must be below safe_quality ({})",
            f.moderate_quality,
            f.safe_quality
        );
    }
    ascending("policy.forensic.brightness_bands", &f.brightness_bands)?;
    ascending("policy.forensic.deblur_ladder", &f.deblur_ladder)?;

    let e = &config.policy.enhancement;
    descending("policy.enhancement.target_bands", &e.target_bands)?;
    ascending("policy.enhancement.deblur_ladder", &e.deblur_ladder)?;
    descending("policy.enhancement.noise_ladder", &e.noise_ladder)?;
    ascending("policy.enhancement.brightness_mean_bands", &e.brightness_mean_bands)?;
    ascending("policy.enhancement.contrast_std_ladder", &e.contrast_std_ladder)?;
    ascending("policy.enhancement.contrast_spread_ladder", &e.contrast_spread_ladder)?;
    ascending("policy.enhancement.superres_scale_bands", &e.superres_scale_bands)?;

    for key in config.tools.operators.keys() {
        if let Err(e) = key.parse::<crate::policy::ActionKind>() {
            bail!("tools.operators: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ActionKind, Profile};

    #[test]
    fn empty_document_is_default() {
        let c = parse_toml("").unwrap();
        assert_eq!(c.paths, PathsConfig::default());
        assert!(c.guard.enabled);
        assert_eq!(c.learner.rebuild_interval, 20);
        assert_eq!(c.pipeline.max_rounds, 2);
    }

    #[test]
    fn sections_override_defaults() {
        let c = parse_toml(
            r#"
[guard]
similarity_epsilon = 1.0

[pipeline]
mode = "enhancement"

[policy.forensic]
pose_roll_deg = 10.0

[policy.enhancement]
cosmetic_actions = ["denoise"]

[tools]
timeout_secs = 30

[tools.operators.face_restore]
command = ["restore", "--fast"]
"#,
        )
        .unwrap();
        assert_eq!(c.guard.similarity_epsilon, 1.0);
        assert_eq!(c.guard.score_epsilon, 0.01);
        assert_eq!(c.pipeline.mode, Profile::Enhancement);
        assert_eq!(c.policy.forensic.pose_roll_deg, 10.0);
        assert_eq!(c.policy.forensic.safe_quality, 0.78);
        assert_eq!(c.policy.enhancement.cosmetic_actions, vec![ActionKind::Denoise]);
        let registry = c.tools.operator_registry(Path::new("work"));
        assert!(registry.get(ActionKind::SuperResolution).is_some());
    }

    #[test]
    fn rejects_negative_epsilon() {
        assert!(parse_toml("[guard]\nscore_epsilon = -0.1\n").is_err());
    }

    #[test]
    fn rejects_zero_interval_and_rounds() {
        assert!(parse_toml("[learner]\nrebuild_interval = 0\n").is_err());
        assert!(parse_toml("[pipeline]\nmax_rounds = 0\n").is_err());
    }

    #[test]
    fn rejects_unordered_ladder() {
        let err = parse_toml("[policy.forensic]\ndeblur_ladder = [0.4, 0.3, 0.6, 0.7]\n").unwrap_err();
        assert!(format!("{err:#}").contains("deblur_ladder"));
    }

    #[test]
    fn rejects_unknown_operator_key() {
        assert!(parse_toml("[tools.operators.sharpen]\ncommand = [\"x\"]\n").is_err());
    }

    #[test]
    fn missing_file_is_error() {
        assert!(load(Some(Path::new("/nonexistent/faceguard.toml"))).is_err());
        assert!(load(None).is_ok());
    }
}
