//! Domain types for the fatigue fusion engine.

pub mod alert;
pub mod message;
pub mod pilot;
pub mod sample;
pub mod score;
pub mod stage;
pub mod system_state;

pub use alert::{AlertId, FatigueAlert};
pub use message::{AlcoholEvent, IngressMessage, PilotRecord};
pub use pilot::{PilotProfile, Sensitivity};
pub use sample::{BioSample, VisionSample};
pub use score::{FusionOutput, Score};
pub use stage::FatigueStage;
pub use system_state::{StateSnapshot, SystemState};
