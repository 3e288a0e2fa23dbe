use std::time::{Duration, Instant};

/// Narrow time source so elapsed-time accounting is testable without real
/// sleeps. Production code always uses [`SystemClock`].
pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Millisecond-exact pause-aware elapsed time for one session.
///
/// Elapsed is `accumulated + (now - segment_start)` while running and exactly
/// `accumulated` while paused; every pause folds the open segment in, every
/// resume opens a fresh one. Correct across any number of cycles.
#[derive(Debug, Default)]
pub(crate) struct SegmentClock {
    accumulated: Duration,
    segment_start: Option<Instant>,
}

impl SegmentClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: Instant) {
        self.accumulated = Duration::ZERO;
        self.segment_start = Some(now);
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(start) = self.segment_start.take() {
            self.accumulated += now.saturating_duration_since(start);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if self.segment_start.is_none() {
            self.segment_start = Some(now);
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.segment_start {
            Some(start) => self.accumulated + now.saturating_duration_since(start),
            None => self.accumulated,
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.segment_start = None;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Manually advanced clock for deterministic elapsed-time tests.
    pub(crate) struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }
}
