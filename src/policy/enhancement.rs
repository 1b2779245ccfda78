//! Enhancement (visual-quality-first) planning profile.
//!
//! Round 1 is structural repair. Round 2 is cosmetic refinement restricted
//! to `cosmetic_actions`, and is skipped outright once overall quality has
//! reached `round2_stop_quality`.

use serde::{Deserialize, Serialize};

use super::action::{sort_by_priority, Action, ActionKind, BrightnessLevel, Strength};
use super::forensic::round3;
use super::TargetQuality;
use crate::facts::QualityFacts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementPolicyConfig {
    /// Overall quality bands: [ULTRA, HIGH, MEDIUM] lower bounds.
    pub target_bands: [f64; 3],
    pub round2_stop_quality: f64,
    /// Sharpness upper bounds: [ultra, high, medium, low].
    pub deblur_ladder: [f64; 4],
    /// Noise sigma lower bounds: [extreme, high, medium, low].
    pub noise_ladder: [f64; 4],
    pub cosmetic_noise: f64,
    /// Mean luminance upper bounds: [EXTREME, DARK, MEDIUM].
    pub brightness_mean_bands: [f64; 3],
    /// Luminance std upper bounds: [extreme, high, medium, low].
    pub contrast_std_ladder: [f64; 4],
    /// Histogram spread upper bounds: [extreme, high, medium, low].
    pub contrast_spread_ladder: [f64; 4],
    pub cosmetic_contrast_std: f64,
    pub cosmetic_contrast_spread: f64,
    pub superres_max_resolution: f64,
    /// Resolution upper bounds for x4 and x2 upscaling.
    pub superres_scale_bands: [f64; 2],
    pub cosmetic_actions: Vec<ActionKind>,
}

impl Default for EnhancementPolicyConfig {
    fn default() -> Self {
        Self {
            target_bands: [0.85, 0.70, 0.50],
            round2_stop_quality: 0.82,
            deblur_ladder: [0.30, 0.50, 0.70, 0.82],
            noise_ladder: [9.0, 6.5, 4.5, 3.0],
            cosmetic_noise: 4.5,
            brightness_mean_bands: [25.0, 60.0, 118.0],
            contrast_std_ladder: [22.0, 32.0, 48.0, 60.0],
            contrast_spread_ladder: [55.0, 75.0, 95.0, 115.0],
            cosmetic_contrast_std: 35.0,
            cosmetic_contrast_spread: 80.0,
            superres_max_resolution: 0.70,
            superres_scale_bands: [0.35, 0.55],
            cosmetic_actions: vec![
                ActionKind::Brightness,
                ActionKind::Contrast,
                ActionKind::Denoise,
                ActionKind::Deblur,
            ],
        }
    }
}

pub(crate) struct EnhancementPlan {
    pub target: TargetQuality,
    pub confidence: f64,
    pub actions: Vec<Action>,
    pub notes: Vec<String>,
}

const SHARPNESS: [Strength; 4] = [Strength::Ultra, Strength::High, Strength::Medium, Strength::Low];
const SEVERITY: [Strength; 4] = [
    Strength::Extreme,
    Strength::High,
    Strength::Medium,
    Strength::Low,
];

pub(crate) fn plan(cfg: &EnhancementPolicyConfig, facts: &QualityFacts, round: u32) -> EnhancementPlan {
    let mut actions = Vec::new();
    let mut notes = Vec::new();
    let q = facts.overall;

    let [ultra, high, medium] = cfg.target_bands;
    let target = if q >= ultra {
        notes.push("Image already high quality.".to_string());
        TargetQuality::Ultra
    } else if q >= high {
        notes.push("Minor improvement possible.".to_string());
        TargetQuality::High
    } else if q >= medium {
        notes.push("Moderate recovery needed.".to_string());
        TargetQuality::Medium
    } else {
        notes.push("Full restoration needed.".to_string());
        TargetQuality::Low
    };

    let structural = round <= 1;
    if structural {
        notes.push("Round-1 structural repair active.".to_string());
    } else {
        notes.push("Round-2 cosmetic refinement active.".to_string());
        if q >= cfg.round2_stop_quality {
            notes.push("Cosmetic round skipped (quality high).".to_string());
            return EnhancementPlan {
                target,
                confidence: round3((0.55 + (1.0 - q)).min(1.0)),
                actions,
                notes,
            };
        }
    }

    if structural {
        let idx = cfg.deblur_ladder.iter().position(|&t| facts.sharpness < t);
        if let Some(i) = idx {
            let strength = SHARPNESS[i];
            actions.push(Action::Deblur {
                priority: 1,
                strength,
            });
            notes.push(format!("Deblur scheduled ({}).", strength.as_str()));
        }
    }

    if let Some(noise) = facts.raw.noise_level {
        let strength = if structural {
            cfg.noise_ladder
                .iter()
                .position(|&t| noise >= t)
                .map(|i| SEVERITY[i])
        } else if noise >= cfg.cosmetic_noise {
            Some(Strength::Low)
        } else {
            None
        };
        if let Some(strength) = strength {
            actions.push(Action::Denoise {
                priority: 2,
                strength,
            });
            notes.push(format!("Denoise scheduled ({}).", strength.as_str()));
        }
    }

    if let Some(mean) = facts.raw.brightness_mean.filter(|_| structural) {
        let [extreme, dark, mid] = cfg.brightness_mean_bands;
        let level = if mean < extreme {
            Some(BrightnessLevel::Extreme)
        } else if mean < dark {
            Some(BrightnessLevel::Dark)
        } else if mean < mid {
            Some(BrightnessLevel::Medium)
        } else {
            None
        };
        if let Some(level) = level {
            actions.push(Action::Brightness {
                priority: 3,
                level,
                params: Default::default(),
            });
            notes.push(format!("Brightness correction ({}).", level.as_str()));
        }
    }

    if let (Some(std), Some(spread)) = (facts.raw.contrast_std, facts.raw.contrast_spread) {
        let strength = if structural {
            (0..4)
                .find(|&i| std < cfg.contrast_std_ladder[i] || spread < cfg.contrast_spread_ladder[i])
                .map(|i| SEVERITY[i])
        } else if std < cfg.cosmetic_contrast_std || spread < cfg.cosmetic_contrast_spread {
            Some(Strength::Low)
        } else {
            None
        };
        if let Some(strength) = strength {
            actions.push(Action::Contrast {
                priority: 4,
                strength: Some(strength),
                params: None,
            });
            notes.push(format!("Contrast enhancement ({}).", strength.as_str()));
        }
    }

    if structural && facts.resolution < cfg.superres_max_resolution {
        let scale = superres_scale(&cfg.superres_scale_bands, facts.resolution);
        if scale > 1 {
            actions.push(Action::SuperResolution {
                priority: 5,
                scale: Some(scale),
            });
            notes.push(format!("Super-resolution x{scale} scheduled."));
        }
    }

    if !structural {
        actions.retain(|a| cfg.cosmetic_actions.contains(&a.kind()));
    }
    sort_by_priority(&mut actions);

    EnhancementPlan {
        target,
        confidence: round3((0.45 + (1.0 - q)).min(1.0)),
        actions,
        notes,
    }
}

fn superres_scale(bands: &[f64; 2], resolution: f64) -> u32 {
    if resolution < bands[0] {
        4
    } else if resolution < bands[1] {
        2
    } else {
        1
    }
}
