// ============================================
// Cold Start Module (冷启动模块)
// ============================================
//
// Exposure control for newly ingested items:
// 1. New item is shown to a random cohort of users
// 2. Cohort interactions are normalized against the cohort baseline
// 3. Items beating the baseline get exponentially more exposure
// 4. Underperformers decay
//
// The virality engine wraps the cold-start engine and stamps exposure
// metadata onto item records.

pub mod engine;
pub mod virality;

pub use engine::{CohortBaseline, ColdStartEngine, ColdStartState, ExposureStage};
pub use virality::ViralityEngine;
