use chrono::{DateTime, Local};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// One append-only debug timeline entry. Written for offline post-mortem
/// diagnosis; the engine never reads these back.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub kind: String,
    pub origin: String,
    pub at: DateTime<Local>,
    pub monotonic_ms: u64,
    pub seq: u64,
    pub session_id: String,
    pub payload: String,
}

/// Fire-and-forget sink for timeline events. Must never block and is never
/// awaited for correctness.
pub trait DebugSink: Send + Sync {
    fn record(&self, event: TimelineEvent);
}

/// Discards everything.
pub struct NoopSink;

impl DebugSink for NoopSink {
    fn record(&self, _event: TimelineEvent) {}
}

/// Routes events to the `log` facade at debug level.
pub struct LogSink;

impl DebugSink for LogSink {
    fn record(&self, event: TimelineEvent) {
        debug!(
            "[timeline {} #{}] {} ({}) at {}ms: {}",
            event.session_id, event.seq, event.kind, event.origin, event.monotonic_ms, event.payload
        );
    }
}

/// Per-session wrapper stamping sequence numbers, wall-clock and monotonic
/// times onto events before handing them to the sink.
#[derive(Clone)]
pub struct SessionTimeline {
    sink: Arc<dyn DebugSink>,
    session_id: String,
    seq: Arc<AtomicU64>,
    started: Instant,
}

impl SessionTimeline {
    pub fn new(sink: Arc<dyn DebugSink>, session_id: String) -> Self {
        Self {
            sink,
            session_id,
            seq: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn record(&self, kind: &str, origin: &str, payload: impl Into<String>) {
        let event = TimelineEvent {
            kind: kind.to_string(),
            origin: origin.to_string(),
            at: Local::now(),
            monotonic_ms: self.started.elapsed().as_millis() as u64,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            session_id: self.session_id.clone(),
            payload: payload.into(),
        };
        self.sink.record(event);
    }
}

pub(crate) fn new_session_id() -> String {
    format!("rec-{}", Local::now().format("%Y%m%d-%H%M%S%.3f"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectingSink(Mutex<Vec<TimelineEvent>>);

    impl DebugSink for CollectingSink {
        fn record(&self, event: TimelineEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let timeline = SessionTimeline::new(sink.clone(), "s1".to_string());

        timeline.record("start", "test", "");
        timeline.record("pause", "test", "source=manual");
        timeline.record("stop", "test", "");

        let events = sink.0.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(events.iter().all(|e| e.session_id == "s1"));
    }
}
