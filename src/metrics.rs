//! Usage metrics behind an injected collaborator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Kinds of recorded events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Registration,
    Login,
    Upload,
    UploadFailed,
    SeriesBuilt,
    Analysis,
    ChartSaved,
    Export,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Registration => "registration",
            EventKind::Login => "login",
            EventKind::Upload => "upload",
            EventKind::UploadFailed => "uploadFailed",
            EventKind::SeriesBuilt => "seriesBuilt",
            EventKind::Analysis => "analysis",
            EventKind::ChartSaved => "chartSaved",
            EventKind::Export => "export",
        }
    }
}

/// Aggregated counts over a time window.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub window_secs: u64,
    pub total_events: usize,
    pub by_kind: BTreeMap<String, usize>,
    /// Distinct `user` values in event metadata.
    pub active_users: usize,
}

/// Where usage events go.
pub trait MetricsSink: Send + Sync {
    fn record_event(&self, kind: EventKind, metadata: Value);
    fn query_stats(&self, window: Duration) -> UsageStats;
}

#[derive(Clone, Debug)]
struct Event {
    kind: EventKind,
    metadata: Value,
    at: DateTime<Utc>,
}

/// Keeps the most recent events in memory.
pub struct InMemoryMetrics {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl InMemoryMetrics {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
        }
    }
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_event(&self, kind: EventKind, metadata: Value) {
        if self.capacity == 0 {
            return;
        }
        // Metrics are best effort; a poisoned lock just drops the event.
        if let Ok(mut events) = self.events.lock() {
            while events.len() >= self.capacity {
                events.pop_front();
            }
            events.push_back(Event {
                kind,
                metadata,
                at: Utc::now(),
            });
        }
    }

    fn query_stats(&self, window: Duration) -> UsageStats {
        let mut stats = UsageStats {
            window_secs: window.as_secs(),
            ..UsageStats::default()
        };
        let Ok(events) = self.events.lock() else {
            return stats;
        };

        let since = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut users = BTreeSet::new();
        for event in events.iter().filter(|e| e.at >= since) {
            stats.total_events += 1;
            *stats.by_kind.entry(event.kind.as_str().to_string()).or_default() += 1;
            if let Some(user) = event.metadata.get("user").and_then(Value::as_str) {
                users.insert(user.to_string());
            }
        }
        stats.active_users = users.len();
        stats
    }
}
