//! Search progress events and the broadcast EventBus
//!
//! Events are operator-facing status reporting only. Nothing in the
//! pipeline reads them back for control flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// TrialScope event types
///
/// Serialized with an internal `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SearchEvent {
    /// Fan-out started for one query
    SearchStarted {
        search_id: Uuid,
        trial_id: String,
        /// Sources that will be queried
        sources: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A query unit was dispatched to one source
    SourceDispatched {
        search_id: Uuid,
        trial_id: String,
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// One source finished (any status)
    SourceCompleted {
        search_id: Uuid,
        trial_id: String,
        source: String,
        /// "ok", "not_found", "error" or "timeout"
        status: String,
        hit_count: usize,
        elapsed_ms: u64,
        /// Served from the result cache
        cached: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Fan-out finished (all units completed, timed out or cancelled)
    SearchCompleted {
        search_id: Uuid,
        trial_id: String,
        ok_count: usize,
        total: usize,
        elapsed_ms: u64,
        /// True when the caller cancelled or the overall deadline expired
        interrupted: bool,
        timestamp: DateTime<Utc>,
    },

    /// A weight table was updated or reset
    WeightsUpdated {
        /// "sources" or the annotation task name
        table: String,
        /// "set", "replace" or "reset"
        action: String,
        timestamp: DateTime<Utc>,
    },
}

impl SearchEvent {
    /// Event type name (used as the SSE event name)
    pub fn event_type(&self) -> &'static str {
        match self {
            SearchEvent::SearchStarted { .. } => "SearchStarted",
            SearchEvent::SourceDispatched { .. } => "SourceDispatched",
            SearchEvent::SourceCompleted { .. } => "SourceCompleted",
            SearchEvent::SearchCompleted { .. } => "SearchCompleted",
            SearchEvent::WeightsUpdated { .. } => "WeightsUpdated",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SearchEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SearchEvent,
    ) -> Result<usize, broadcast::error::SendError<SearchEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SearchEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatched(source: &str) -> SearchEvent {
        SearchEvent::SourceDispatched {
            search_id: Uuid::new_v4(),
            trial_id: "NCT00000001".to_string(),
            source: source.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit(dispatched("pubmed")).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "SourceDispatched");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(dispatched("pmc")).is_err());
        // Lossy emit never fails
        bus.emit_lossy(dispatched("pmc"));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 10);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(dispatched("openfda")).unwrap();
        assert_eq!(json["type"], "SourceDispatched");
        assert_eq!(json["source"], "openfda");
    }
}
