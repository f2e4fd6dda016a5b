use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Recent drink activity on one participant card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    /// Events seen since the marker was (re)started.
    pub count: u32,
    pub last_at: Instant,
}

/// Short-lived "something just happened here" markers, keyed by participant.
#[derive(Debug, Default)]
pub struct ActivityMarkers {
    markers: HashMap<Uuid, Activity>,
}

impl ActivityMarkers {
    pub fn record(&mut self, participant_id: Uuid, now: Instant) {
        self.markers
            .entry(participant_id)
            .and_modify(|a| {
                a.count += 1;
                a.last_at = now;
            })
            .or_insert(Activity { count: 1, last_at: now });
    }

    /// Drop markers older than `ttl`. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.markers.len();
        self.markers
            .retain(|_, a| now.saturating_duration_since(a.last_at) < ttl);
        before - self.markers.len()
    }

    pub fn get(&self, participant_id: &Uuid) -> Option<Activity> {
        self.markers.get(participant_id).copied()
    }

    pub fn forget(&mut self, participant_id: &Uuid) {
        self.markers.remove(participant_id);
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}
