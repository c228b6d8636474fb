//! Confidence-weighted multimodal fusion with dual-path smoothing.
//!
//! Vision carries 0.70 of the weight, biometrics 0.30. When a modality is
//! absent its weight is redistributed over what remains, so the weights in
//! use always sum to 1. Two smoothing paths:
//!
//! - **Critical**: any critical extractor flag clears the score ring and
//!   publishes the raw weighted score unchanged. Smoothing a microsleep
//!   away is the one thing this engine must never do.
//! - **Normal**: exponentially weighted moving average over the last five
//!   raw scores, plus a small boost when the smoothed series is rising
//!   steeply.

use crate::domain::{BioSample, FusionOutput, Score, VisionSample};
use crate::extractors::{bio_score, vision_score};
use crate::{FusionError, Result};

use super::{ScoreRing, TrendBuffer};

/// Tuning for the fusion core.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Vision modality weight before redistribution.
    pub vision_weight: f64,
    /// Biometric modality weight before redistribution.
    pub bio_weight: f64,
    /// Score ring capacity.
    pub window_size: usize,
    /// Trend buffer capacity.
    pub trend_window_size: usize,
    /// EMA weights, most-recent first.
    pub ema_weights: Vec<f64>,
    /// Samples in the slope window.
    pub trend_samples: usize,
    /// Slope above which the trend boost applies.
    pub trend_slope_threshold: f64,
    /// Additive boost for a rising trend.
    pub trend_boost: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            vision_weight: 0.70,
            bio_weight: 0.30,
            window_size: 5,
            trend_window_size: 10,
            ema_weights: vec![0.4, 0.3, 0.2, 0.07, 0.03],
            trend_samples: 5,
            trend_slope_threshold: 0.2,
            trend_boost: 0.05,
        }
    }
}

/// The fusion core. Owns the score ring and the trend buffer; accessed
/// only by the evaluation thread.
#[derive(Debug)]
pub struct FusionCore {
    config: FusionConfig,
    ring: ScoreRing,
    trend: TrendBuffer,
}

impl FusionCore {
    /// Create a fusion core with the given configuration.
    pub fn new(config: FusionConfig) -> Self {
        Self {
            ring: ScoreRing::new(config.window_size),
            trend: TrendBuffer::new(config.trend_window_size),
            config,
        }
    }

    /// Create a fusion core with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(FusionConfig::default())
    }

    /// Fuse whatever modalities are present into one scored output.
    ///
    /// `baseline_hr` / `baseline_hrv` come from the active pilot profile
    /// and back up samples that do not embed their own baselines.
    pub fn fuse(
        &mut self,
        vision: Option<&VisionSample>,
        bio: Option<&BioSample>,
        baseline_hr: f64,
        baseline_hrv: f64,
        now_s: f64,
    ) -> Result<FusionOutput> {
        if vision.is_none() && bio.is_none() {
            return Err(FusionError::InsufficientModalities);
        }

        let vision_assessment = vision.map(vision_score).transpose()?;
        let bio_assessment = bio
            .map(|b| bio_score(b, baseline_hr, baseline_hrv))
            .transpose()?;

        // Redistribute weights over the modalities actually present.
        let mut total_weight = 0.0;
        if vision_assessment.is_some() {
            total_weight += self.config.vision_weight;
        }
        if bio_assessment.is_some() {
            total_weight += self.config.bio_weight;
        }

        let mut raw = 0.0;
        if let Some(ref v) = vision_assessment {
            raw += v.score.value() * (self.config.vision_weight / total_weight);
        }
        if let Some(ref b) = bio_assessment {
            raw += b.score.value() * (self.config.bio_weight / total_weight);
        }
        let raw = Score::new(raw);

        let modality_count = usize::from(vision_assessment.is_some())
            + usize::from(bio_assessment.is_some());
        let quality_bonus = bio_assessment.as_ref().map_or(0.0, |b| b.quality_bonus);
        let confidence = confidence(modality_count, quality_bonus);

        let critical_vision = vision_assessment.as_ref().is_some_and(|v| v.critical);
        let critical_bio = bio_assessment.as_ref().is_some_and(|b| b.critical);
        let is_critical_event = critical_vision || critical_bio;

        let emitted = if is_critical_event {
            // The raw score must reach the classifier undamped; stale
            // history would only dilute it.
            self.ring.clear();
            self.ring.push(raw.value());
            self.trend.push(raw.value());
            raw
        } else {
            self.ring.push(raw.value());
            let smoothed = self.ring.weighted_recent(&self.config.ema_weights);
            self.trend.push(smoothed);

            let boosted = match self.trend.slope(self.config.trend_samples) {
                Some(slope) if slope > self.config.trend_slope_threshold => {
                    tracing::debug!(slope, "rising trend, boosting fusion score");
                    smoothed + self.config.trend_boost
                }
                _ => smoothed,
            };
            Score::new(boosted)
        };

        Ok(FusionOutput {
            fusion_score: emitted,
            raw_score: raw,
            confidence,
            is_critical_event,
            vision: vision.cloned(),
            bio: bio.cloned(),
            timestamp_s: now_s,
        })
    }

    /// Number of scores currently in the ring.
    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }

    /// Drop all smoothing history (service shutdown, pilot change).
    pub fn reset(&mut self) {
        self.ring.clear();
        self.trend.clear();
    }

    /// Get configuration.
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }
}

/// Evidence confidence: half a point per modality present, with the
/// remaining headroom filled proportionally to biometric completeness.
fn confidence(modality_count: usize, quality_bonus: f64) -> Score {
    if modality_count == 0 {
        return Score::ZERO;
    }
    let base = (modality_count as f64 / 2.0).min(1.0);
    Score::new(base + (1.0 - base) * quality_bonus.clamp(0.0, 1.0))
}
