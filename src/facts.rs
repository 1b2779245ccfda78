//! # Facts — Normalized Image Quality Scores
//!
//! The external quality provider reports raw measurements (Laplacian
//! variance, mean luminance, PSNR, pixel dimensions, face geometry). The
//! policy engine never reads those directly: [`ScoreBuilder`] folds them into
//! a [`QualityFacts`] value of 0–1 scores where 1.0 means "no evidence of a
//! problem".
//!
//! ## Neutral Defaults
//!
//! Every input field is optional. A missing block scores 1.0 so a partially
//! populated report plans conservatively instead of failing. Deserializing a
//! `QualityFacts` with missing keys applies the same rule.
//!
//! ## Scoring Model
//!
//! | Score | Source | Mapping |
//! |-------|--------|---------|
//! | sharpness | face Laplacian variance (fallback: whole image) | 9-step ladder |
//! | noise | PSNR | `(psnr - 20) / 25` |
//! | brightness | mean luminance | darkness only; ≥ 80 scores 1.0 |
//! | contrast | luminance std | `ln(1+std) / ln(81)` |
//! | resolution | long side | 1024 / 640 / 320 steps |
//! | face usability | face sharpness + light | `0.6·s + 0.4·l`, ×0.6 if masked |
//! | overall | all seven | geometric mean, floor 1e-4 |

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ── Raw Provider Report ─────────────────────────────────────────

/// Raw output of a quality facts provider. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAssessment {
    #[serde(default)]
    pub objective: Option<ObjectiveFacts>,
    #[serde(default)]
    pub faces: Option<FaceFacts>,
    #[serde(default)]
    pub perceptual: Option<PerceptualFacts>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectiveFacts {
    #[serde(default)]
    pub blur: Option<BlurFacts>,
    #[serde(default)]
    pub brightness: Option<BrightnessFacts>,
    #[serde(default)]
    pub contrast: Option<ContrastFacts>,
    #[serde(default)]
    pub noise: Option<NoiseFacts>,
    #[serde(default)]
    pub resolution: Option<ResolutionFacts>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlurFacts {
    pub variance: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrightnessFacts {
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContrastFacts {
    pub std: Option<f64>,
    pub spread: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoiseFacts {
    pub psnr: Option<f64>,
    /// Estimated noise sigma on the 0–255 scale.
    pub noise: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionFacts {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceFacts {
    #[serde(default)]
    pub detected: bool,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub largest_face: Option<LargestFace>,
    #[serde(default)]
    pub pose: Option<PoseFacts>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LargestFace {
    pub area_ratio: Option<f64>,
    pub blur_variance: Option<f64>,
    pub brightness: Option<f64>,
    #[serde(default)]
    pub masked: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoseFacts {
    pub worst_yaw: Option<f64>,
    pub worst_pitch: Option<f64>,
    pub worst_roll: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerceptualFacts {
    pub score: Option<f64>,
    pub clip_iqa_score: Option<f64>,
}

/// Converts an image into raw quality measurements.
pub trait QualityFactsProvider: Send + Sync {
    fn assess(&self, image: &Path) -> Result<RawAssessment>;
}

// ── Normalized Facts ────────────────────────────────────────────

fn neutral() -> f64 {
    1.0
}

/// Head pose angles in degrees. `None` when the provider could not estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub yaw: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
}

impl Pose {
    /// Largest absolute angle across the three axes, if any is known.
    pub fn max_abs(&self) -> Option<f64> {
        [self.yaw, self.pitch, self.roll]
            .into_iter()
            .flatten()
            .map(f64::abs)
            .reduce(f64::max)
    }
}

/// Raw measurements some enhancement rules gate on directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMeasures {
    pub brightness_mean: Option<f64>,
    pub contrast_std: Option<f64>,
    pub contrast_spread: Option<f64>,
    pub noise_level: Option<f64>,
}

/// Normalized quality facts for one image. Immutable input to planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFacts {
    #[serde(default = "neutral")]
    pub sharpness: f64,
    #[serde(default = "neutral")]
    pub noise: f64,
    #[serde(default = "neutral")]
    pub brightness: f64,
    #[serde(default = "neutral")]
    pub contrast: f64,
    #[serde(default = "neutral")]
    pub resolution: f64,
    #[serde(default = "neutral")]
    pub perceptual: f64,
    #[serde(default)]
    pub face_present: bool,
    #[serde(default = "neutral")]
    pub face_usability: f64,
    #[serde(default)]
    pub largest_face_ratio: f64,
    #[serde(default = "neutral")]
    pub overall: f64,
    #[serde(default)]
    pub pose: Pose,
    #[serde(default)]
    pub masked: bool,
    #[serde(default)]
    pub raw: RawMeasures,
}

impl Default for QualityFacts {
    fn default() -> Self {
        Self {
            sharpness: 1.0,
            noise: 1.0,
            brightness: 1.0,
            contrast: 1.0,
            resolution: 1.0,
            perceptual: 1.0,
            face_present: false,
            face_usability: 1.0,
            largest_face_ratio: 0.0,
            overall: 1.0,
            pose: Pose::default(),
            masked: false,
            raw: RawMeasures::default(),
        }
    }
}

impl QualityFacts {
    /// Score lines in the order the audit log prints them.
    pub fn score_table(&self) -> [(&'static str, f64, Level); 7] {
        [
            ("Sharpness", self.sharpness, Level::blur(self.sharpness)),
            ("Brightness", self.brightness, Level::brightness(self.brightness)),
            ("Contrast", self.contrast, Level::contrast(self.contrast)),
            ("Noise", self.noise, Level::noise(self.noise)),
            ("Resolution", self.resolution, Level::resolution(self.resolution)),
            (
                "Face usability",
                self.face_usability,
                Level::face_usability(self.face_usability),
            ),
            ("Overall quality", self.overall, Level::overall(self.overall)),
        ]
    }
}

// ── Score Builder ───────────────────────────────────────────────

/// Folds a [`RawAssessment`] into normalized [`QualityFacts`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ScoreBuilder;

impl ScoreBuilder {
    pub fn build(&self, raw: &RawAssessment) -> QualityFacts {
        let obj = raw.objective.clone().unwrap_or_default();
        let faces = raw.faces.as_ref();
        let largest = faces.and_then(|f| f.largest_face.as_ref());

        let face_lap = largest.and_then(|l| l.blur_variance);
        let image_lap = obj.blur.as_ref().and_then(|b| b.variance);
        let sharpness = face_lap.or(image_lap).map(score_sharpness).unwrap_or(1.0);

        let brightness_mean = obj.brightness.as_ref().and_then(|b| b.mean);
        let contrast_std = obj.contrast.as_ref().and_then(|c| c.std);
        let contrast_spread = obj.contrast.as_ref().and_then(|c| c.spread);
        let psnr = obj.noise.as_ref().and_then(|n| n.psnr);
        let noise_level = obj.noise.as_ref().and_then(|n| n.noise);

        let noise = psnr.map(score_noise).unwrap_or(1.0);
        let brightness = brightness_mean.map(score_brightness).unwrap_or(1.0);
        let contrast = contrast_std.map(score_contrast).unwrap_or(1.0);
        let resolution = obj
            .resolution
            .as_ref()
            .and_then(|r| match (r.width, r.height) {
                (None, None) => None,
                (w, h) => Some(score_resolution(w.unwrap_or(0), h.unwrap_or(0))),
            })
            .unwrap_or(1.0);
        let perceptual = raw
            .perceptual
            .as_ref()
            .and_then(|p| p.score.or(p.clip_iqa_score))
            .map(clamp)
            .unwrap_or(1.0);

        let face_present = faces.map(|f| f.detected).unwrap_or(false);
        let masked = largest.map(|l| l.masked).unwrap_or(false);
        let (face_usability, largest_face_ratio) = match faces {
            None => (1.0, 0.0),
            Some(f) if !f.detected => (0.0, 0.0),
            Some(_) => match largest {
                None => (1.0, 0.0),
                Some(l) => (score_face(l), round4(l.area_ratio.unwrap_or(0.0))),
            },
        };

        let pose = faces
            .and_then(|f| f.pose.as_ref())
            .map(|p| Pose {
                yaw: p.worst_yaw,
                pitch: p.worst_pitch,
                roll: p.worst_roll,
            })
            .unwrap_or_default();

        let overall = fuse(&[
            sharpness,
            noise,
            brightness,
            contrast,
            resolution,
            perceptual,
            face_usability,
        ]);

        QualityFacts {
            sharpness,
            noise,
            brightness,
            contrast,
            resolution,
            perceptual,
            face_present,
            face_usability,
            largest_face_ratio,
            overall,
            pose,
            masked,
            raw: RawMeasures {
                brightness_mean,
                contrast_std,
                contrast_spread,
                noise_level,
            },
        }
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn clamp(v: f64) -> f64 {
    round4(v.clamp(0.0, 1.0))
}

/// Laplacian variance → sharpness score.
pub fn score_sharpness(laplacian: f64) -> f64 {
    let lap = laplacian.max(0.0);
    let s = if lap <= 3.0 {
        0.08
    } else if lap <= 7.0 {
        0.18
    } else if lap <= 15.0 {
        0.32
    } else if lap <= 30.0 {
        0.48
    } else if lap <= 60.0 {
        0.62
    } else if lap <= 120.0 {
        0.74
    } else if lap <= 220.0 {
        0.85
    } else if lap <= 400.0 {
        0.92
    } else {
        0.97
    };
    clamp(s)
}

pub fn score_noise(psnr: f64) -> f64 {
    clamp((psnr - 20.0) / 25.0)
}

/// Darkness-only brightness: bright images are never penalized.
pub fn score_brightness(mean: f64) -> f64 {
    if mean <= 0.0 {
        0.0
    } else if mean < 40.0 {
        clamp(mean / 60.0)
    } else if mean < 80.0 {
        clamp(0.65 + (mean - 40.0) / 100.0)
    } else {
        1.0
    }
}

pub fn score_contrast(std: f64) -> f64 {
    if std <= 0.0 {
        return 0.0;
    }
    clamp(std.ln_1p() / 80f64.ln_1p())
}

pub fn score_resolution(width: u32, height: u32) -> f64 {
    match width.max(height) {
        l if l >= 1024 => 1.0,
        l if l >= 640 => 0.8,
        l if l >= 320 => 0.5,
        _ => 0.2,
    }
}

fn score_face(face: &LargestFace) -> f64 {
    let sharp = score_sharpness(face.blur_variance.unwrap_or(0.0));
    let light = score_brightness(face.brightness.unwrap_or(0.0));
    let penalty = if face.masked { 0.6 } else { 1.0 };
    clamp((sharp * 0.6 + light * 0.4) * penalty)
}

/// Geometric mean with a 1e-4 floor per component.
pub fn fuse(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 1.0;
    }
    let log_sum: f64 = scores.iter().map(|s| s.max(1e-4).ln()).sum();
    clamp((log_sum / scores.len() as f64).exp())
}

// ── Levels ──────────────────────────────────────────────────────

/// Coarse label used only for human-readable reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Low,
    Medium,
    High,
    Unknown,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "LOW"),
            Level::Medium => write!(f, "MEDIUM"),
            Level::High => write!(f, "HIGH"),
            Level::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl Level {
    fn ladder(v: f64, low: f64, medium: f64) -> Self {
        if v < low {
            Level::Low
        } else if v < medium {
            Level::Medium
        } else {
            Level::High
        }
    }

    /// Blur severity: inverse of sharpness.
    pub fn blur(sharpness: f64) -> Self {
        if sharpness < 0.40 {
            Level::High
        } else if sharpness < 0.60 {
            Level::Medium
        } else {
            Level::Low
        }
    }

    pub fn brightness(v: f64) -> Self {
        Self::ladder(v, 0.45, 0.75)
    }

    pub fn noise(v: f64) -> Self {
        Self::ladder(v, 0.30, 0.60)
    }

    pub fn contrast(v: f64) -> Self {
        Self::ladder(v, 0.45, 0.70)
    }

    pub fn resolution(v: f64) -> Self {
        Self::ladder(v, 0.45, 0.70)
    }

    pub fn face_usability(v: f64) -> Self {
        Self::ladder(v, 0.40, 0.65)
    }

    pub fn overall(v: f64) -> Self {
        Self::ladder(v, 0.55, 0.78)
    }

    pub fn pose(roll: Option<f64>) -> Self {
        match roll.map(f64::abs) {
            None => Level::Unknown,
            Some(r) if r >= 10.0 => Level::High,
            Some(r) if r >= 5.0 => Level::Medium,
            Some(_) => Level::Low,
        }
    }
}

// ── Quality Flags ───────────────────────────────────────────────

/// Per-dimension "needs attention" flags for front ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub blur_bad: bool,
    pub brightness_bad: bool,
    pub contrast_bad: bool,
    pub resolution_bad: bool,
    pub noise_bad: bool,
    pub pose_bad: bool,
    pub mask_bad: bool,
}

impl QualityFlags {
    pub fn from_facts(f: &QualityFacts) -> Self {
        Self {
            blur_bad: f.sharpness < 0.82,
            brightness_bad: f.brightness < 0.85,
            contrast_bad: f.contrast < 0.60,
            resolution_bad: f.resolution < 0.9,
            noise_bad: f.noise < 0.75,
            pose_bad: f.pose.max_abs().is_some_and(|a| a > 25.0),
            mask_bad: f.masked,
        }
    }
}
