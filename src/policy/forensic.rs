//! Forensic (identity-first) planning profile.
//!
//! Every threshold is policy data loaded from `[policy.forensic]`.

use serde::{Deserialize, Serialize};

use super::action::{Action, BrightnessLevel, BrightnessParams, ClaheParams, Strength};
use super::RiskLevel;
use crate::facts::QualityFacts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForensicPolicyConfig {
    /// Overall quality at or above which risk is SAFE.
    pub safe_quality: f64,
    /// Overall quality at or above which risk is MODERATE.
    pub moderate_quality: f64,
    /// Minimum |roll| in degrees that schedules pose correction.
    pub pose_roll_deg: f64,
    /// Brightness band upper bounds: [LOW, MEDIUM, HIGH].
    pub brightness_bands: [f64; 3],
    pub contrast_floor: f64,
    /// Sharpness band upper bounds: [ultra, high, medium, low].
    pub deblur_ladder: [f64; 4],
    pub superres_max_sharpness: f64,
    pub superres_min_face_ratio: f64,
    pub denoise_floor: f64,
}

impl Default for ForensicPolicyConfig {
    fn default() -> Self {
        Self {
            safe_quality: 0.78,
            moderate_quality: 0.55,
            pose_roll_deg: 7.0,
            brightness_bands: [0.45, 0.75, 0.95],
            contrast_floor: 0.55,
            deblur_ladder: [0.25, 0.40, 0.60, 0.72],
            superres_max_sharpness: 0.50,
            superres_min_face_ratio: 0.10,
            denoise_floor: 0.30,
        }
    }
}

pub(crate) struct ForensicPlan {
    pub risk: RiskLevel,
    pub confidence: f64,
    pub actions: Vec<Action>,
    pub notes: Vec<String>,
}

pub(crate) fn plan(cfg: &ForensicPolicyConfig, facts: &QualityFacts) -> ForensicPlan {
    let mut actions = Vec::new();
    let mut notes = Vec::new();

    let risk = if facts.overall >= cfg.safe_quality {
        RiskLevel::Safe
    } else if facts.overall >= cfg.moderate_quality {
        RiskLevel::Moderate
    } else {
        RiskLevel::Critical
    };

    // Roll correction first: later scoring assumes an upright face.
    if let Some(roll) = facts.pose.roll {
        if roll.abs() >= cfg.pose_roll_deg {
            actions.push(Action::Pose { priority: 0 });
            notes.push(format!("Head roll {roll:.1}° requires pose correction."));
        }
    }

    let b = facts.brightness;
    let [low, medium, high] = cfg.brightness_bands;
    let brightness = if b < low {
        Some((
            BrightnessLevel::Low,
            BrightnessParams {
                exposure: Some(1.32),
                shadow_lift: Some(0.55),
                clahe: true,
                clahe_clip: Some(1.18),
                mix: Some((0.35, 0.65)),
                saturation: Some(1.08),
                ..Default::default()
            },
        ))
    } else if b < medium {
        Some((
            BrightnessLevel::Medium,
            BrightnessParams {
                exposure: Some(1.20),
                shadow_lift: Some(0.38),
                clahe: false,
                saturation: Some(1.06),
                ..Default::default()
            },
        ))
    } else if b < high {
        Some((
            BrightnessLevel::High,
            BrightnessParams {
                gamma: Some(1.22),
                saturation: Some(1.03),
                ..Default::default()
            },
        ))
    } else {
        None
    };
    if let Some((level, params)) = brightness {
        notes.push(format!("Brightness correction ({}).", level.as_str()));
        actions.push(Action::Brightness {
            priority: 1,
            level,
            params,
        });
    }

    if facts.contrast < cfg.contrast_floor {
        actions.push(Action::Contrast {
            priority: 2,
            strength: None,
            params: Some(ClaheParams {
                clip_limit: 1.8,
                tile_grid: (8, 8),
            }),
        });
        notes.push("Local contrast (CLAHE) scheduled.".to_string());
    }

    if let Some(strength) = deblur_strength(&cfg.deblur_ladder, facts.sharpness) {
        actions.push(Action::Deblur {
            priority: 2,
            strength,
        });
        notes.push(format!("Deblur scheduled ({}).", strength.as_str()));
    }

    if facts.face_present
        && facts.sharpness <= cfg.superres_max_sharpness
        && facts.largest_face_ratio > cfg.superres_min_face_ratio
    {
        actions.push(Action::SuperResolution {
            priority: 5,
            scale: None,
        });
        notes.push("Face restoration scheduled.".to_string());
    }

    if facts.noise < cfg.denoise_floor {
        actions.push(Action::Denoise {
            priority: 3,
            strength: Strength::Low,
        });
        notes.push("Light denoise scheduled.".to_string());
    }

    let confidence = round3((0.5 + facts.overall * 0.5).min(1.0));

    ForensicPlan {
        risk,
        confidence,
        actions,
        notes,
    }
}

fn deblur_strength(ladder: &[f64; 4], sharpness: f64) -> Option<Strength> {
    let [ultra, high, medium, low] = *ladder;
    if sharpness < ultra {
        Some(Strength::Ultra)
    } else if sharpness < high {
        Some(Strength::High)
    } else if sharpness < medium {
        Some(Strength::Medium)
    } else if sharpness < low {
        Some(Strength::Low)
    } else {
        None
    }
}

pub(crate) fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
