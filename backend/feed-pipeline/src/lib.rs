pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod utils;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use models::{
    Candidate, FingerprintLookup, Interaction, ItemFeatures, ItemId, Placement, SessionState,
    UserContext, UserId, UserSimilarity,
};
pub use pipeline::{EvictionSummary, FeedPipeline, FeedStage, FeedStats};
pub use services::{ScoringOracle, WeightedObjectiveOracle};
