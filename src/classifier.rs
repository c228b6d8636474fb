//! Hysteretic four-stage fatigue classifier.
//!
//! Thresholds scale with pilot sensitivity and evidence confidence, and
//! every decision is made relative to the current stage:
//!
//! - moving up to a stage requires the windowed average to reach that
//!   stage's threshold;
//! - moving down requires the average to fall a full hysteresis band below
//!   the current stage's threshold, which is what stops flapping at a
//!   boundary;
//! - the normal path moves at most one level per evaluation and no more
//!   than once per `min_stage_duration_s`;
//! - the critical path consults the undamped score and may jump straight
//!   to Moderate or Severe, rate-limited only by
//!   `max_critical_alert_rate_s`.

use crate::domain::{FatigueStage, FusionOutput, Score, Sensitivity};
use crate::fusion::ScoreRing;

/// Tuning for the stage classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Base threshold for Mild.
    pub mild_threshold: f64,
    /// Base threshold for Moderate.
    pub moderate_threshold: f64,
    /// Base threshold for Severe.
    pub severe_threshold: f64,
    /// Hysteresis band below a stage's threshold for downward moves.
    pub hysteresis: f64,
    /// Minimum seconds between normal-path stage changes.
    pub min_stage_duration_s: f64,
    /// Minimum seconds between critical-path escalations.
    pub max_critical_alert_rate_s: f64,
    /// Weights over recent smoothed scores, most-recent first.
    pub window_weights: Vec<f64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mild_threshold: 0.25,
            moderate_threshold: 0.50,
            severe_threshold: 0.75,
            hysteresis: 0.10,
            min_stage_duration_s: 2.0,
            max_critical_alert_rate_s: 0.5,
            window_weights: vec![0.5, 0.3, 0.2],
        }
    }
}

/// Outcome of one classifier evaluation.
#[derive(Debug, Clone)]
pub struct StageDecision {
    /// Stage after this evaluation.
    pub stage: FatigueStage,
    /// Whether the stage changed this evaluation.
    pub changed: bool,
    /// Windowed average used for normal-path thresholding.
    pub window_avg: Score,
    /// Effective threshold of the stage decided (0 for Active).
    pub threshold_used: f64,
    /// Whether the critical path produced this decision.
    pub via_critical: bool,
}

/// The stage classifier. Owns the current stage and both rate-limit
/// timestamps; accessed only by the evaluation thread.
#[derive(Debug)]
pub struct StageClassifier {
    config: ClassifierConfig,
    stage: FatigueStage,
    last_stage_change_s: f64,
    last_critical_alert_s: f64,
    window: ScoreRing,
}

impl StageClassifier {
    /// Create a classifier starting at Active.
    ///
    /// `now_s` seeds the rate limiter so the first transition cannot fire
    /// before one full stage duration has elapsed.
    pub fn new(config: ClassifierConfig, now_s: f64) -> Self {
        Self {
            window: ScoreRing::new(config.window_weights.len().max(1)),
            stage: FatigueStage::Active,
            last_stage_change_s: now_s,
            last_critical_alert_s: f64::NEG_INFINITY,
            config,
        }
    }

    /// Current stage.
    pub fn stage(&self) -> FatigueStage {
        self.stage
    }

    /// Monotonic time of the last committed stage change.
    pub fn last_stage_change_s(&self) -> f64 {
        self.last_stage_change_s
    }

    /// Monotonic time of the last critical escalation.
    pub fn last_critical_alert_s(&self) -> f64 {
        self.last_critical_alert_s
    }

    /// Evaluate one fusion output and decide the stage.
    pub fn evaluate(
        &mut self,
        output: &FusionOutput,
        sensitivity: Sensitivity,
        now_s: f64,
    ) -> StageDecision {
        self.window.push(output.fusion_score.value());
        let window_avg = self.window.weighted_recent(&self.config.window_weights);

        let factor =
            sensitivity.threshold_multiplier() * (0.8 + 0.4 * output.confidence.value());
        let thresholds = Thresholds {
            mild: self.config.mild_threshold * factor,
            moderate: self.config.moderate_threshold * factor,
            severe: self.config.severe_threshold * factor,
        };

        // Critical path first: the undamped score decides, and a jump of
        // any size is admissible.
        if output.is_critical_event {
            let proposed = thresholds.stage_for(output.fusion_score.value());
            if proposed >= FatigueStage::Moderate
                && now_s - self.last_critical_alert_s >= self.config.max_critical_alert_rate_s
            {
                self.last_critical_alert_s = now_s;
                let changed = proposed != self.stage;
                if changed {
                    tracing::warn!(
                        from = %self.stage,
                        to = %proposed,
                        score = output.fusion_score.value(),
                        "critical escalation"
                    );
                    self.stage = proposed;
                    self.last_stage_change_s = now_s;
                }
                return StageDecision {
                    stage: self.stage,
                    changed,
                    window_avg: Score::new(window_avg),
                    threshold_used: thresholds.threshold_of(self.stage),
                    via_critical: true,
                };
            }
            // Not escalatable (or rate-limited): fall through to the
            // normal path below.
        }

        let target = self.normal_target(window_avg, &thresholds);
        let proposed = self.stage.step_toward(target);

        let mut changed = false;
        if proposed != self.stage
            && now_s - self.last_stage_change_s >= self.config.min_stage_duration_s
        {
            tracing::info!(
                from = %self.stage,
                to = %proposed,
                window_avg,
                "fatigue stage change"
            );
            self.stage = proposed;
            self.last_stage_change_s = now_s;
            changed = true;
        }

        StageDecision {
            stage: self.stage,
            changed,
            window_avg: Score::new(window_avg),
            threshold_used: thresholds.threshold_of(self.stage),
            via_critical: false,
        }
    }

    /// Hysteretic target for the windowed average.
    fn normal_target(&self, avg: f64, thresholds: &Thresholds) -> FatigueStage {
        let reached = thresholds.stage_for(avg);
        if reached > self.stage {
            return reached;
        }
        if self.stage > FatigueStage::Active
            && avg < thresholds.threshold_of(self.stage) - self.config.hysteresis
        {
            return FatigueStage::from_level(self.stage.level() - 1);
        }
        self.stage
    }

    /// Get configuration.
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }
}

/// Effective (sensitivity- and confidence-scaled) thresholds.
#[derive(Debug, Clone, Copy)]
struct Thresholds {
    mild: f64,
    moderate: f64,
    severe: f64,
}

impl Thresholds {
    fn stage_for(&self, score: f64) -> FatigueStage {
        if score >= self.severe {
            FatigueStage::Severe
        } else if score >= self.moderate {
            FatigueStage::Moderate
        } else if score >= self.mild {
            FatigueStage::Mild
        } else {
            FatigueStage::Active
        }
    }

    fn threshold_of(&self, stage: FatigueStage) -> f64 {
        match stage {
            FatigueStage::Active => 0.0,
            FatigueStage::Mild => self.mild,
            FatigueStage::Moderate => self.moderate,
            FatigueStage::Severe => self.severe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(score: f64, confidence: f64, critical: bool) -> FusionOutput {
        FusionOutput {
            fusion_score: Score::new(score),
            raw_score: Score::new(score),
            confidence: Score::new(confidence),
            is_critical_event: critical,
            vision: None,
            bio: None,
            timestamp_s: 0.0,
        }
    }

    /// Confidence 0.5 gives a scaling factor of exactly 1.0, which keeps
    /// the base thresholds legible in assertions.
    const NEUTRAL_CONF: f64 = 0.5;

    fn classifier() -> StageClassifier {
        StageClassifier::new(ClassifierConfig::default(), 0.0)
    }

    #[test]
    fn test_starts_active_and_holds_on_low_scores() {
        let mut sc = classifier();
        for tick in 0..10 {
            let d = sc.evaluate(
                &output(0.05, NEUTRAL_CONF, false),
                Sensitivity::Medium,
                tick as f64,
            );
            assert_eq!(d.stage, FatigueStage::Active);
            assert!(!d.changed);
        }
    }

    #[test]
    fn test_upward_transition_respects_rate_limit() {
        let mut sc = classifier();
        // Score above the mild threshold from the first tick.
        let d = sc.evaluate(&output(0.40, NEUTRAL_CONF, false), Sensitivity::Medium, 1.0);
        // Window still warming and only 1s since construction: held.
        assert_eq!(d.stage, FatigueStage::Active);

        let d = sc.evaluate(&output(0.40, NEUTRAL_CONF, false), Sensitivity::Medium, 2.0);
        assert_eq!(d.stage, FatigueStage::Mild);
        assert!(d.changed);
        assert_eq!(sc.last_stage_change_s(), 2.0);
    }

    #[test]
    fn test_normal_path_moves_one_level_at_a_time() {
        let mut sc = classifier();
        // Window average jumps straight into severe territory.
        let mut now = 2.0;
        let d = sc.evaluate(&output(0.95, NEUTRAL_CONF, false), Sensitivity::Medium, now);
        assert_eq!(d.stage, FatigueStage::Mild);

        now += 2.0;
        let d = sc.evaluate(&output(0.95, NEUTRAL_CONF, false), Sensitivity::Medium, now);
        assert_eq!(d.stage, FatigueStage::Moderate);

        now += 2.0;
        let d = sc.evaluate(&output(0.95, NEUTRAL_CONF, false), Sensitivity::Medium, now);
        assert_eq!(d.stage, FatigueStage::Severe);
    }

    #[test]
    fn test_hysteresis_blocks_boundary_flapping() {
        let mut sc = classifier();
        // Reach Mild (threshold 0.25).
        sc.evaluate(&output(0.40, NEUTRAL_CONF, false), Sensitivity::Medium, 1.0);
        sc.evaluate(&output(0.40, NEUTRAL_CONF, false), Sensitivity::Medium, 2.0);
        assert_eq!(sc.stage(), FatigueStage::Mild);

        // Window avg decays toward the score fed in; 0.20 sits inside the
        // hysteresis band [0.15, 0.25): no downgrade, ever.
        for tick in 0..20 {
            let d = sc.evaluate(
                &output(0.20, NEUTRAL_CONF, false),
                Sensitivity::Medium,
                4.0 + tick as f64,
            );
            assert_eq!(d.stage, FatigueStage::Mild, "tick {tick}");
        }
    }

    #[test]
    fn test_downward_transition_below_band() {
        let mut sc = classifier();
        sc.evaluate(&output(0.40, NEUTRAL_CONF, false), Sensitivity::Medium, 1.0);
        sc.evaluate(&output(0.40, NEUTRAL_CONF, false), Sensitivity::Medium, 2.0);
        assert_eq!(sc.stage(), FatigueStage::Mild);

        // Feed zeros until the window average drops below 0.15.
        let mut now = 2.0;
        let mut reached_active = false;
        for _ in 0..10 {
            now += 1.0;
            let d = sc.evaluate(&output(0.0, NEUTRAL_CONF, false), Sensitivity::Medium, now);
            if d.stage == FatigueStage::Active {
                reached_active = true;
                break;
            }
        }
        assert!(reached_active);
    }

    #[test]
    fn test_critical_path_jumps_levels() {
        let mut sc = classifier();
        // Critical tick with an undamped score in moderate territory,
        // straight from Active, no rate-limit wait.
        let d = sc.evaluate(&output(0.62, NEUTRAL_CONF, true), Sensitivity::Medium, 0.1);
        assert_eq!(d.stage, FatigueStage::Moderate);
        assert!(d.changed);
        assert!(d.via_critical);
        assert_eq!(sc.last_critical_alert_s(), 0.1);
    }

    #[test]
    fn test_critical_path_direct_to_severe() {
        let mut sc = classifier();
        let d = sc.evaluate(&output(0.90, NEUTRAL_CONF, true), Sensitivity::Medium, 0.1);
        assert_eq!(d.stage, FatigueStage::Severe);
        assert!(d.via_critical);
    }

    #[test]
    fn test_critical_rate_limit() {
        let mut sc = classifier();
        let d = sc.evaluate(&output(0.62, NEUTRAL_CONF, true), Sensitivity::Medium, 0.1);
        assert!(d.via_critical);

        // 0.2s later: inside the critical rate window, falls back to the
        // normal path, which is itself rate-limited -> stage holds.
        let d = sc.evaluate(&output(0.90, NEUTRAL_CONF, true), Sensitivity::Medium, 0.3);
        assert!(!d.via_critical);
        assert_eq!(d.stage, FatigueStage::Moderate);

        // 0.5s after the first alert the critical path reopens.
        let d = sc.evaluate(&output(0.90, NEUTRAL_CONF, true), Sensitivity::Medium, 0.6);
        assert!(d.via_critical);
        assert_eq!(d.stage, FatigueStage::Severe);
    }

    #[test]
    fn test_critical_below_moderate_falls_through() {
        let mut sc = classifier();
        // Critical flag with a score only in mild territory: the bypass
        // does not apply, normal rate limiting does.
        let d = sc.evaluate(&output(0.30, NEUTRAL_CONF, true), Sensitivity::Medium, 0.1);
        assert!(!d.via_critical);
        assert_eq!(d.stage, FatigueStage::Active);

        // Window fills as the score persists; the upgrade is ordinary and
        // rate-limited, not a critical bypass.
        let d = sc.evaluate(&output(0.30, NEUTRAL_CONF, true), Sensitivity::Medium, 2.5);
        assert!(!d.via_critical);
        let d2 = sc.evaluate(&output(0.30, NEUTRAL_CONF, true), Sensitivity::Medium, 3.5);
        assert!(d.stage == FatigueStage::Mild || d2.stage == FatigueStage::Mild);
        assert_eq!(sc.stage(), FatigueStage::Mild);
    }

    #[test]
    fn test_confidence_scales_thresholds() {
        // Same score: low confidence loosens thresholds enough to alert,
        // high confidence demands more.
        let mut low_conf = classifier();
        let d = low_conf.evaluate(&output(0.22, 0.0, false), Sensitivity::Medium, 2.0);
        // factor 0.8 -> mild at 0.20; window avg 0.5 * 0.22 = 0.11: holds.
        assert_eq!(d.stage, FatigueStage::Active);

        for now in [3.0, 4.0, 5.0] {
            low_conf.evaluate(&output(0.22, 0.0, false), Sensitivity::Medium, now);
        }
        // Window filled: avg = 0.22 >= 0.20.
        assert_eq!(low_conf.stage(), FatigueStage::Mild);

        let mut high_conf = classifier();
        for now in [2.0, 3.0, 4.0, 5.0] {
            high_conf.evaluate(&output(0.22, 1.0, false), Sensitivity::Medium, now);
        }
        // factor 1.2 -> mild at 0.30: never reached.
        assert_eq!(high_conf.stage(), FatigueStage::Active);
    }

    #[test]
    fn test_sensitivity_monotonicity() {
        // Identical input stream; High must end at a stage >= Low.
        let stream: Vec<f64> = vec![0.10, 0.20, 0.28, 0.30, 0.32, 0.33, 0.35, 0.35];

        let run = |sensitivity: Sensitivity| {
            let mut sc = classifier();
            let mut now = 0.0;
            for s in &stream {
                now += 2.0;
                sc.evaluate(&output(*s, NEUTRAL_CONF, false), sensitivity, now);
            }
            sc.stage()
        };

        let high = run(Sensitivity::High);
        let medium = run(Sensitivity::Medium);
        let low = run(Sensitivity::Low);
        assert!(high >= medium);
        assert!(medium >= low);
    }

    #[test]
    fn test_stable_input_is_deterministic() {
        let run = || {
            let mut sc = classifier();
            let mut now = 0.0;
            for _ in 0..12 {
                now += 1.0;
                sc.evaluate(&output(0.45, NEUTRAL_CONF, false), Sensitivity::Medium, now);
            }
            sc.stage()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_threshold_used_reported() {
        let mut sc = classifier();
        let d = sc.evaluate(&output(0.62, NEUTRAL_CONF, true), Sensitivity::Medium, 0.1);
        assert_eq!(d.stage, FatigueStage::Moderate);
        assert!((d.threshold_used - 0.50).abs() < 1e-9);
    }
}
