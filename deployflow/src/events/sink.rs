//! Event sink trait and implementations.

use crate::core::RunEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};

/// Receives run events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    async fn emit(&self, event: &RunEvent);

    /// Emits an event without awaiting. Must never panic.
    fn try_emit(&self, event: &RunEvent);
}

/// Discards all events. Used when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &RunEvent) {}

    fn try_emit(&self, _event: &RunEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &RunEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize run event");
                return;
            }
        };
        // Poll attempts are chatty; keep them at debug regardless of level.
        if self.level == Level::DEBUG || matches!(event, RunEvent::PollAttempt { .. }) {
            debug!(event_type = event.name(), stage = ?event.stage(), event = %payload, "event");
        } else {
            info!(event_type = event.name(), stage = ?event.stage(), event = %payload, "event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &RunEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &RunEvent) {
        self.log_event(event);
    }
}

/// Collects events in memory, for tests and report rendering.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Event names in emission order, e.g. `stage.started`.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.read().iter().map(RunEvent::name).collect()
    }

    /// Events with the given name.
    #[must_use]
    pub fn events_named(&self, name: &str) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.name() == name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }
}

/// Forwards every event to several sinks, in order.
#[derive(Clone, Default)]
pub struct FanOutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOutEventSink {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if there are no sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanOutEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutEventSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[async_trait]
impl EventSink for FanOutEventSink {
    async fn emit(&self, event: &RunEvent) {
        for sink in &self.sinks {
            sink.emit(event).await;
        }
    }

    fn try_emit(&self, event: &RunEvent) {
        for sink in &self.sinks {
            sink.try_emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(n: u32) -> RunEvent {
        RunEvent::PollAttempt {
            subject: "pods in shop".into(),
            attempt: n,
            converged: false,
        }
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks_do_not_panic() {
        NoOpEventSink.emit(&attempt(1)).await;
        let sink = LoggingEventSink::default();
        sink.emit(&attempt(1)).await;
        sink.try_emit(&RunEvent::StageStarted {
            stage: "namespace-ensure".into(),
            index: 2,
        });
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&attempt(1)).await;
        sink.try_emit(&RunEvent::StageStarted {
            stage: "teardown".into(),
            index: 0,
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.names(), vec!["poll.attempt", "stage.started"]);
        assert_eq!(sink.events_named("poll.attempt").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_sink() {
        let a = Arc::new(CollectingEventSink::new());
        let b = Arc::new(CollectingEventSink::new());
        let fan = FanOutEventSink::new().with(a.clone()).with(b.clone());
        assert_eq!(fan.len(), 2);

        fan.emit(&attempt(1)).await;
        fan.try_emit(&attempt(2));

        assert_eq!(a.len(), 2);
        assert_eq!(b.events(), a.events());
    }
}
