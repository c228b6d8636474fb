//! Fatigue stage ladder.

use serde::{Deserialize, Serialize};

/// The four fatigue stages, ordered by severity.
///
/// Adjacent stages are reachable in both directions; a direct
/// Active -> Severe jump happens only on the critical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatigueStage {
    /// Alert and responsive.
    Active,
    /// Early fatigue indicators.
    Mild,
    /// Escalated fatigue.
    Moderate,
    /// Critical fatigue.
    Severe,
}

impl FatigueStage {
    /// Numeric level, Active = 0 .. Severe = 3.
    pub fn level(&self) -> u8 {
        match self {
            FatigueStage::Active => 0,
            FatigueStage::Mild => 1,
            FatigueStage::Moderate => 2,
            FatigueStage::Severe => 3,
        }
    }

    /// Stage for a numeric level, saturating at Severe.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => FatigueStage::Active,
            1 => FatigueStage::Mild,
            2 => FatigueStage::Moderate,
            _ => FatigueStage::Severe,
        }
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FatigueStage::Active => "active",
            FatigueStage::Mild => "mild",
            FatigueStage::Moderate => "moderate",
            FatigueStage::Severe => "severe",
        }
    }

    /// Move one level toward `target`, or stay put if already there.
    pub fn step_toward(&self, target: FatigueStage) -> FatigueStage {
        let current = self.level();
        let goal = target.level();
        if goal > current {
            FatigueStage::from_level(current + 1)
        } else if goal < current {
            FatigueStage::from_level(current - 1)
        } else {
            *self
        }
    }
}

impl Default for FatigueStage {
    fn default() -> Self {
        FatigueStage::Active
    }
}

impl std::fmt::Display for FatigueStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering() {
        assert!(FatigueStage::Active < FatigueStage::Mild);
        assert!(FatigueStage::Mild < FatigueStage::Moderate);
        assert!(FatigueStage::Moderate < FatigueStage::Severe);
    }

    #[test]
    fn test_step_toward_is_single_level() {
        assert_eq!(
            FatigueStage::Active.step_toward(FatigueStage::Severe),
            FatigueStage::Mild
        );
        assert_eq!(
            FatigueStage::Severe.step_toward(FatigueStage::Active),
            FatigueStage::Moderate
        );
        assert_eq!(
            FatigueStage::Mild.step_toward(FatigueStage::Mild),
            FatigueStage::Mild
        );
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&FatigueStage::Moderate).unwrap(),
            "\"moderate\""
        );
    }
}
