// ============================================
// Session Tracker (会话追踪器)
// ============================================
//
// Keeps the bounded interaction window of each live session and derives
// the per-request SessionState from it.
//
// Derived signals:
// - scroll_velocity: interactions per minute across the window span
// - avg_engagement: mean of watch * (1 - skip) + 0.3 * like
// - fatigue_score: (min(1, length / 50) + (1 - engagement of last 5)) / 2

use crate::models::{Interaction, SessionState, UserId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Session length at which length-driven fatigue saturates
const FATIGUE_SATURATION_LENGTH: f64 = 50.0;
/// Interactions considered for the recent-engagement part of fatigue
const FATIGUE_RECENT_WINDOW: usize = 5;

impl SessionState {
    /// Build a snapshot from a session's interaction window (oldest first)
    pub fn from_interactions(
        session_id: impl Into<String>,
        current_length: usize,
        interactions: Vec<Interaction>,
    ) -> Self {
        let scroll_velocity = scroll_velocity(&interactions);
        let avg_engagement = mean_engagement(&interactions);

        let mut fatigue = (current_length as f64 / FATIGUE_SATURATION_LENGTH).min(1.0);
        if !interactions.is_empty() {
            let start = interactions.len().saturating_sub(FATIGUE_RECENT_WINDOW);
            let recent = mean_engagement(&interactions[start..]);
            fatigue = (fatigue + (1.0 - recent)) / 2.0;
        }

        Self {
            session_id: session_id.into(),
            current_length,
            recent_interactions: interactions,
            scroll_velocity,
            avg_engagement,
            fatigue_score: fatigue.clamp(0.0, 1.0),
        }
    }
}

fn scroll_velocity(interactions: &[Interaction]) -> f64 {
    let (Some(first), Some(last)) = (interactions.first(), interactions.last()) else {
        return 0.0;
    };
    if interactions.len() < 2 {
        return 0.0;
    }

    let span_secs = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
    if span_secs <= 0.0 {
        return 0.0;
    }

    interactions.len() as f64 / (span_secs / 60.0)
}

fn mean_engagement(interactions: &[Interaction]) -> f64 {
    if interactions.is_empty() {
        return 0.0;
    }
    interactions.iter().map(Interaction::engagement).sum::<f64>() / interactions.len() as f64
}

#[derive(Debug, Clone)]
struct SessionEntry {
    user_id: UserId,
    last_activity: DateTime<Utc>,
    items_shown: usize,
    interactions: VecDeque<Interaction>,
}

/// In-process session tracker
pub struct SessionTracker {
    sessions: DashMap<String, SessionEntry>,
    /// Maximum interactions kept per session
    max_recent_interactions: usize,
    /// Idle time after which a session is dropped (default: 2 hours)
    session_ttl: Duration,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
            max_recent_interactions: 100,
            session_ttl: Duration::hours(2),
        }
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom idle TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_max_recent_interactions(mut self, max: usize) -> Self {
        self.max_recent_interactions = max.max(1);
        self
    }

    /// Record an interaction against a session, opening it if needed
    pub fn record_interaction(&self, session_id: &str, interaction: Interaction) {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(
                    session_id = session_id,
                    user_id = %interaction.user_id,
                    "Session started"
                );
                SessionEntry {
                    user_id: interaction.user_id,
                    last_activity: interaction.timestamp,
                    items_shown: 0,
                    interactions: VecDeque::with_capacity(self.max_recent_interactions),
                }
            });

        entry.last_activity = entry.last_activity.max(interaction.timestamp);
        entry.interactions.push_back(interaction);
        while entry.interactions.len() > self.max_recent_interactions {
            entry.interactions.pop_front();
        }
    }

    /// Count items delivered to the session
    pub fn record_shown(&self, session_id: &str, user_id: UserId, count: usize) {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                user_id,
                last_activity: Utc::now(),
                items_shown: 0,
                interactions: VecDeque::new(),
            });
        entry.items_shown += count;
    }

    /// Derive the current snapshot; unknown sessions yield an empty state
    pub fn snapshot(&self, session_id: &str) -> SessionState {
        match self.sessions.get(session_id) {
            Some(entry) => {
                let length = entry.items_shown.max(entry.interactions.len());
                let interactions: Vec<Interaction> = entry.interactions.iter().cloned().collect();
                debug!(
                    session_id = session_id,
                    user_id = %entry.user_id,
                    length = length,
                    "Session snapshot"
                );
                SessionState::from_interactions(session_id, length, interactions)
            }
            None => SessionState::new(session_id, 0),
        }
    }

    pub fn end_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Drop sessions idle longer than the TTL; returns how many were removed
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        let ttl = self.session_ttl;
        self.sessions.retain(|_, entry| now - entry.last_activity <= ttl);
        before - self.sessions.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn interaction_at(user: UserId, secs: i64, watch: f64) -> Interaction {
        let mut i = Interaction::new(user, Uuid::new_v4(), watch);
        i.timestamp = DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap();
        i
    }

    #[test]
    fn test_derived_signals() {
        let user = Uuid::new_v4();
        // 4 interactions over 3 minutes
        let interactions: Vec<_> = (0..4).map(|i| interaction_at(user, i * 60, 0.5)).collect();

        let state = SessionState::from_interactions("s", 25, interactions);
        assert!((state.scroll_velocity - 4.0 / 3.0).abs() < 1e-9);
        assert!((state.avg_engagement - 0.5).abs() < 1e-9);
        // (0.5 + (1 - 0.5)) / 2
        assert!((state.fatigue_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_session() {
        let state = SessionState::from_interactions("s", 100, Vec::new());
        assert_eq!(state.scroll_velocity, 0.0);
        assert_eq!(state.avg_engagement, 0.0);
        assert_eq!(state.fatigue_score, 1.0);
    }

    #[test]
    fn test_tracker_bounds_window() {
        let tracker = SessionTracker::new().with_max_recent_interactions(3);
        let user = Uuid::new_v4();
        for i in 0..5 {
            tracker.record_interaction("s1", interaction_at(user, i, 0.9));
        }
        tracker.record_shown("s1", user, 8);

        let state = tracker.snapshot("s1");
        assert_eq!(state.recent_interactions.len(), 3);
        assert_eq!(state.current_length, 8);

        assert_eq!(tracker.snapshot("missing").current_length, 0);
    }

    #[test]
    fn test_evict_idle() {
        let tracker = SessionTracker::new().with_ttl(Duration::minutes(30));
        let user = Uuid::new_v4();
        tracker.record_interaction("s1", interaction_at(user, 0, 0.5));

        let later = DateTime::<Utc>::from_timestamp(1_700_000_000 + 3600, 0).unwrap();
        assert_eq!(tracker.evict_idle(later), 1);
        assert_eq!(tracker.active_sessions(), 0);
    }
}
