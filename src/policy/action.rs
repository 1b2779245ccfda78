//! Closed action vocabulary shared by planning, execution and learning.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Kind tag of an [`Action`]. Also the key used by learned statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Pose,
    Brightness,
    Contrast,
    Deblur,
    SuperResolution,
    Denoise,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::Pose,
        ActionKind::Brightness,
        ActionKind::Contrast,
        ActionKind::Deblur,
        ActionKind::SuperResolution,
        ActionKind::Denoise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Pose => "pose",
            ActionKind::Brightness => "brightness",
            ActionKind::Contrast => "contrast",
            ActionKind::Deblur => "deblur",
            ActionKind::SuperResolution => "super_resolution",
            ActionKind::Denoise => "denoise",
        }
    }

    /// Operator name reported in step logs when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            ActionKind::Pose => "FaceCorrector",
            ActionKind::Brightness => "CLAHE",
            ActionKind::Contrast => "CLAHE",
            ActionKind::Deblur => "HiDiff",
            ActionKind::SuperResolution => "GFPGAN",
            ActionKind::Denoise => "NLM",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    /// Case-insensitive, accepting the legacy operator aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pose" => Ok(ActionKind::Pose),
            "brightness" | "illumination_correction" | "relight" => Ok(ActionKind::Brightness),
            "contrast" => Ok(ActionKind::Contrast),
            "deblur" => Ok(ActionKind::Deblur),
            "super_resolution" | "superres" | "face_restore" | "gfpgan" => {
                Ok(ActionKind::SuperResolution)
            }
            "denoise" => Ok(ActionKind::Denoise),
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

/// Operator strength ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Ultra,
    Extreme,
    High,
    Medium,
    Low,
}

impl Strength {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strength::Ultra => "ultra",
            Strength::Extreme => "extreme",
            Strength::High => "high",
            Strength::Medium => "medium",
            Strength::Low => "low",
        }
    }
}

/// Brightness correction tier. Forensic uses LOW/MEDIUM/HIGH brightness
/// bands; enhancement uses EXTREME/DARK/MEDIUM darkness bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BrightnessLevel {
    Extreme,
    Dark,
    Low,
    Medium,
    High,
}

impl BrightnessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrightnessLevel::Extreme => "EXTREME",
            BrightnessLevel::Dark => "DARK",
            BrightnessLevel::Low => "LOW",
            BrightnessLevel::Medium => "MEDIUM",
            BrightnessLevel::High => "HIGH",
        }
    }
}

/// Parameter bundle for one brightness tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrightnessParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_lift: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(default)]
    pub clahe: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clahe_clip: Option<f64>,
    /// Blend weights (corrected, original) for the CLAHE pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mix: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaheParams {
    pub clip_limit: f64,
    pub tile_grid: (u32, u32),
}

/// One planned enhancement step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Pose {
        priority: u32,
    },
    Brightness {
        priority: u32,
        level: BrightnessLevel,
        #[serde(default)]
        params: BrightnessParams,
    },
    Contrast {
        priority: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strength: Option<Strength>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<ClaheParams>,
    },
    Deblur {
        priority: u32,
        strength: Strength,
    },
    SuperResolution {
        priority: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<u32>,
    },
    Denoise {
        priority: u32,
        strength: Strength,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Pose { .. } => ActionKind::Pose,
            Action::Brightness { .. } => ActionKind::Brightness,
            Action::Contrast { .. } => ActionKind::Contrast,
            Action::Deblur { .. } => ActionKind::Deblur,
            Action::SuperResolution { .. } => ActionKind::SuperResolution,
            Action::Denoise { .. } => ActionKind::Denoise,
        }
    }

    pub fn priority(&self) -> u32 {
        match self {
            Action::Pose { priority }
            | Action::Brightness { priority, .. }
            | Action::Contrast { priority, .. }
            | Action::Deblur { priority, .. }
            | Action::SuperResolution { priority, .. }
            | Action::Denoise { priority, .. } => *priority,
        }
    }

    pub fn set_priority(&mut self, value: u32) {
        match self {
            Action::Pose { priority }
            | Action::Brightness { priority, .. }
            | Action::Contrast { priority, .. }
            | Action::Deblur { priority, .. }
            | Action::SuperResolution { priority, .. }
            | Action::Denoise { priority, .. } => *priority = value,
        }
    }

    /// Strength (or level/scale) as written to logs; `None` for pose.
    pub fn strength_label(&self) -> Option<String> {
        match self {
            Action::Pose { .. } => None,
            Action::Brightness { level, .. } => Some(level.as_str().to_string()),
            Action::Contrast { strength, .. } => {
                Some(strength.map(|s| s.as_str()).unwrap_or("clahe").to_string())
            }
            Action::Deblur { strength, .. } | Action::Denoise { strength, .. } => {
                Some(strength.as_str().to_string())
            }
            Action::SuperResolution { scale, .. } => scale.map(|s| format!("x{s}")),
        }
    }

    /// Variant fields other than `type`/`priority`, as a JSON object.
    pub fn params(&self) -> Map<String, Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(m)) => m,
            _ => Map::new(),
        };
        map.remove("type");
        map.remove("priority");
        map
    }
}

/// Stable sort by ascending priority.
pub fn sort_by_priority(actions: &mut [Action]) {
    actions.sort_by_key(Action::priority);
}
