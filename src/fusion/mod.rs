//! Fusion core: weight redistribution, confidence scoring, dual-path
//! smoothing, and trend detection.

pub mod core;
pub mod ring;

pub use self::core::{FusionConfig, FusionCore};
pub use self::ring::{ScoreRing, TrendBuffer};
