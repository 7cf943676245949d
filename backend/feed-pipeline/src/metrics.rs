//! Process-wide Prometheus metrics for the feed pipeline.
//!
//! Registered lazily on the default registry the first time a stage touches them.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, Gauge, IntCounter,
    IntCounterVec,
};

// ============================================================================
// PROMETHEUS METRICS
// ============================================================================

lazy_static! {
    /// Feeds generated (successful requests)
    pub static ref FEED_REQUESTS: IntCounter = register_int_counter!(
        "feed_pipeline_requests_total",
        "Total number of feeds generated"
    )
    .expect("Failed to register feed_pipeline_requests_total");

    /// Candidates whose score was reduced by the spam detector
    pub static ref SPAM_PENALTIES: IntCounter = register_int_counter!(
        "feed_pipeline_spam_penalties_total",
        "Total number of candidates penalized for engagement farming"
    )
    .expect("Failed to register feed_pipeline_spam_penalties_total");

    /// Requests where the user's recent history looked like a similarity loop
    pub static ref LOOP_FLAGS: IntCounter = register_int_counter!(
        "feed_pipeline_loop_flags_total",
        "Total number of loop-exploitation flags"
    )
    .expect("Failed to register feed_pipeline_loop_flags_total");

    /// Feeds whose diversity fell below the over-personalization threshold
    pub static ref OVER_PERSONALIZATION_FLAGS: IntCounter = register_int_counter!(
        "feed_pipeline_over_personalization_flags_total",
        "Total number of over-personalized feeds"
    )
    .expect("Failed to register feed_pipeline_over_personalization_flags_total");

    /// Cold-start exposure transitions (outcome = expand | decay)
    pub static ref COLD_START_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "feed_pipeline_cold_start_transitions_total",
        "Cold-start exposure decisions by outcome",
        &["outcome"]
    )
    .expect("Failed to register feed_pipeline_cold_start_transitions_total");

    /// Last platform-wide diversity score from the homogenization check
    pub static ref PLATFORM_DIVERSITY: Gauge = register_gauge!(
        "feed_pipeline_platform_diversity",
        "Most recent platform-wide content diversity score"
    )
    .expect("Failed to register feed_pipeline_platform_diversity");
}
