use crate::bridge::CapturePlatform;
use crate::capture::{resolve_source_for_display, window_source_count};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll cadence while running.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A window-count jump larger than this, with an unchanged resolved source,
/// is treated as a virtual-desktop transition that invalidated the surface.
const WINDOW_COUNT_DELTA: usize = 3;

/// Callback fired when the active source for the tracked display changes or
/// must be refreshed in place: `(new_source_id, display_id, force)`.
pub type SourceSwitchCallback = Arc<dyn Fn(&str, &str, bool) + Send + Sync>;

/// Watches which OS capture source corresponds to a display while recording.
///
/// Switching virtual desktops can silently present a different source for the
/// same physical display, or keep the id while the underlying surface goes
/// stale; both cases surface here, never as errors.
pub struct ActiveSourceTracker {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ActiveSourceTracker {
    /// Start polling. A previously running tracker for the same display
    /// should be stopped by the caller first; instances are independent.
    pub fn start(
        platform: Arc<dyn CapturePlatform>,
        display_id: &str,
        initial_source_id: Option<String>,
        on_switch: SourceSwitchCallback,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let display = display_id.to_string();

        info!(
            "Starting active source tracker for display {} (initial source {:?})",
            display, initial_source_id
        );

        let worker = std::thread::spawn(move || {
            let mut state = TrackerState::new(&display, initial_source_id);
            while running_clone.load(Ordering::Relaxed) {
                state.poll_once(platform.as_ref(), on_switch.as_ref());
                spin_sleep::sleep(POLL_INTERVAL);
            }
            debug!("Active source tracker for display {} exiting", display);
        });

        Self {
            running,
            worker: Some(worker),
        }
    }

    /// Cancel the poll loop and discard all transition state.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Active source tracker thread panicked during join");
            }
        }
    }
}

impl Drop for ActiveSourceTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The per-tick logic, split out so transitions are testable without timers.
pub(crate) struct TrackerState {
    display_id: String,
    last_source_id: Option<String>,
    last_window_count: Option<usize>,
}

impl TrackerState {
    pub fn new(display_id: &str, initial_source_id: Option<String>) -> Self {
        Self {
            display_id: display_id.to_string(),
            last_source_id: initial_source_id,
            last_window_count: None,
        }
    }

    pub fn poll_once(
        &mut self,
        platform: &dyn CapturePlatform,
        on_switch: &(dyn Fn(&str, &str, bool) + Send + Sync),
    ) {
        let sources = match platform.enumerate_sources() {
            Ok(sources) => sources,
            Err(e) => {
                debug!("Source enumeration failed, skipping poll tick: {}", e);
                return;
            }
        };
        let displays = match platform.enumerate_displays() {
            Ok(displays) => displays,
            Err(e) => {
                debug!("Display enumeration failed, skipping poll tick: {}", e);
                return;
            }
        };

        let resolved = resolve_source_for_display(&sources, &displays, &self.display_id)
            .or_else(|| {
                // Fall back to the last source that worked, then to any
                // screen-class source at all.
                self.last_source_id.clone().or_else(|| {
                    sources
                        .iter()
                        .find(|s| s.kind == crate::bridge::SourceKind::Screen)
                        .map(|s| s.id.clone())
                })
            });

        let Some(resolved) = resolved else {
            warn!(
                "Could not resolve any capture source for display {}, retrying next tick",
                self.display_id
            );
            return;
        };

        let window_count = window_source_count(&sources);

        if self.last_source_id.as_deref() != Some(resolved.as_str()) {
            info!(
                "Capture source for display {} switched to {} (was {:?})",
                self.display_id, resolved, self.last_source_id
            );
            self.last_source_id = Some(resolved.clone());
            // A real switch invalidates the window-count baseline too.
            self.last_window_count = Some(window_count);
            on_switch(&resolved, &self.display_id, false);
            return;
        }

        match self.last_window_count {
            Some(last) if window_count.abs_diff(last) > WINDOW_COUNT_DELTA => {
                info!(
                    "Window count jumped {} -> {} with unchanged source {}, forcing refresh",
                    last, window_count, resolved
                );
                // Rebaseline immediately so the jump fires exactly once.
                self.last_window_count = Some(window_count);
                on_switch(&resolved, &self.display_id, true);
            }
            Some(_) => {}
            None => {
                self.last_window_count = Some(window_count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockPlatform;
    use crate::bridge::SourceInfo;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(String, String, bool)>>>;

    fn recording_callback(calls: &Calls) -> impl Fn(&str, &str, bool) + Send + Sync {
        let calls = calls.clone();
        move |source, display, force| {
            calls
                .lock()
                .unwrap()
                .push((source.to_string(), display.to_string(), force))
        }
    }

    #[test]
    fn index_swap_fires_exactly_one_switch() {
        let platform = MockPlatform::with_displays(&["d0"]);
        platform.set_sources(vec![
            SourceInfo::screen("s0", "Screen 1"),
            SourceInfo::window("w0", "editor"),
        ]);
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let callback = recording_callback(&calls);
        let mut state = TrackerState::new("d0", Some("s0".to_string()));

        state.poll_once(&platform, &callback);
        assert!(calls.lock().unwrap().is_empty());

        // The platform swaps in a different source at the display's index.
        platform.set_sources(vec![
            SourceInfo::screen("s9", "Screen 1"),
            SourceInfo::window("w0", "editor"),
        ]);
        state.poll_once(&platform, &callback);
        state.poll_once(&platform, &callback);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("s9".to_string(), "d0".to_string(), false));
    }

    #[test]
    fn window_count_jump_forces_refresh_once() {
        let platform = MockPlatform::with_displays(&["d0"]);
        let mut sources = vec![SourceInfo::screen("s0", "Screen 1")];
        for i in 0..2 {
            sources.push(SourceInfo::window(format!("w{}", i), "win"));
        }
        platform.set_sources(sources.clone());

        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let callback = recording_callback(&calls);
        let mut state = TrackerState::new("d0", Some("s0".to_string()));

        // Baseline tick.
        state.poll_once(&platform, &callback);
        assert!(calls.lock().unwrap().is_empty());

        // Six more windows appear while the resolved source stays the same.
        for i in 2..8 {
            sources.push(SourceInfo::window(format!("w{}", i), "win"));
        }
        platform.set_sources(sources.clone());
        state.poll_once(&platform, &callback);
        state.poll_once(&platform, &callback);

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], ("s0".to_string(), "d0".to_string(), true));
    }

    #[test]
    fn small_window_delta_does_not_fire() {
        let platform = MockPlatform::with_displays(&["d0"]);
        let mut sources = vec![SourceInfo::screen("s0", "Screen 1")];
        platform.set_sources(sources.clone());

        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let callback = recording_callback(&calls);
        let mut state = TrackerState::new("d0", Some("s0".to_string()));
        state.poll_once(&platform, &callback);

        for i in 0..3 {
            sources.push(SourceInfo::window(format!("w{}", i), "win"));
        }
        platform.set_sources(sources);
        state.poll_once(&platform, &callback);

        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn resolution_failure_falls_back_to_last_known_good() {
        let platform = MockPlatform::with_displays(&["d0"]);
        platform.set_sources(vec![SourceInfo::screen("s0", "Screen 1")]);

        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let callback = recording_callback(&calls);
        let mut state = TrackerState::new("d0", Some("s0".to_string()));
        state.poll_once(&platform, &callback);

        // Display disappears from the enumeration; resolution fails but the
        // last known good id keeps the tracker quiet instead of erroring.
        platform.set_displays(&["d9"]);
        state.poll_once(&platform, &callback);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_cancels_the_poll_thread() {
        let platform = Arc::new(MockPlatform::with_displays(&["d0"]));
        platform.set_sources(vec![SourceInfo::screen("s0", "Screen 1")]);
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let callback: SourceSwitchCallback = Arc::new(recording_callback(&calls));

        let mut tracker = ActiveSourceTracker::start(
            platform.clone() as Arc<dyn CapturePlatform>,
            "d0",
            Some("s0".to_string()),
            callback,
        );
        tracker.stop();
        // Stopping twice is harmless.
        tracker.stop();
    }
}
