pub mod cold_start;
pub mod diversity;
pub mod engagement;
pub mod exploration;
pub mod realtime;
pub mod safety;
pub mod scoring;

pub use cold_start::{ColdStartEngine, ViralityEngine};
pub use diversity::FeedbackLoopStabilizer;
pub use engagement::EngagementShaper;
pub use exploration::{ContextualBandit, ExplorationManager};
pub use realtime::SessionTracker;
pub use safety::FailureModeHandler;
pub use scoring::{ScoringOracle, WeightedObjectiveOracle};
