//! Route activity tracking
//!
//! Counts forwarded messages per routing rule using a DashMap so the routing
//! thread and MIDI callbacks can record without taking a shared lock.

use dashmap::DashMap;
use std::time::Instant;
use tracing::trace;

/// Snapshot of one rule's traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStats {
    pub source: String,
    pub destination: String,
    pub messages: u64,
    pub last_message: Option<Instant>,
}

#[derive(Debug, Default)]
struct Counter {
    messages: u64,
    last_message: Option<Instant>,
}

/// Activity tracker for the routing patch
#[derive(Debug, Default)]
pub struct RouteActivity {
    /// Key: (source, destination)
    routes: DashMap<(String, String), Counter>,
}

impl RouteActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one forwarded message
    pub fn record(&self, source: &str, destination: &str) {
        let mut entry = self
            .routes
            .entry((source.to_string(), destination.to_string()))
            .or_default();
        entry.messages += 1;
        entry.last_message = Some(Instant::now());

        trace!("Activity: {} >> {} ({})", source, destination, entry.messages);
    }

    /// Messages forwarded from `source` to `destination` so far
    pub fn count(&self, source: &str, destination: &str) -> u64 {
        self.routes
            .get(&(source.to_string(), destination.to_string()))
            .map(|c| c.messages)
            .unwrap_or(0)
    }

    /// All routes that have carried at least one message, sorted by source
    pub fn snapshot(&self) -> Vec<RouteStats> {
        let mut stats: Vec<RouteStats> = self
            .routes
            .iter()
            .map(|entry| {
                let (source, destination) = entry.key();
                RouteStats {
                    source: source.clone(),
                    destination: destination.clone(),
                    messages: entry.value().messages,
                    last_message: entry.value().last_message,
                }
            })
            .collect();
        stats.sort_by(|a, b| a.source.cmp(&b.source));
        stats
    }

    pub fn clear(&self) {
        self.routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let activity = RouteActivity::new();
        assert_eq!(activity.count("a_in", "VMB_a_in"), 0);

        activity.record("a_in", "VMB_a_in");
        activity.record("a_in", "VMB_a_in");
        activity.record("VMB_a_out", "a_out");

        assert_eq!(activity.count("a_in", "VMB_a_in"), 2);
        assert_eq!(activity.count("VMB_a_out", "a_out"), 1);

        let snapshot = activity.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].source, "VMB_a_out");
        assert!(snapshot.iter().all(|s| s.last_message.is_some()));

        activity.clear();
        assert!(activity.snapshot().is_empty());
    }
}
