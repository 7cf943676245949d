// ============================================
// Real-time Session Module
// ============================================
//
// Within-session signals feeding the pipeline:
// 1. Bounded interaction window per session
// 2. Scroll velocity and engagement averages
// 3. Fatigue estimate used by the engagement stage
//
// In-process (DashMap) state, no persistence

pub mod session_tracker;

pub use session_tracker::SessionTracker;
