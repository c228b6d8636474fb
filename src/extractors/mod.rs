//! Pure feature extractors mapping raw samples to bounded sub-scores and
//! critical flags.

pub mod biometric;
pub mod vision;

pub use biometric::{score as bio_score, BioAssessment};
pub use vision::{score as vision_score, VisionAssessment, VisionDiagnostics};
