mod clock;
mod config;
mod inner;
mod marks;

// Re-export public types from config
pub use self::config::{CaptureArea, CaptureAreaBuilder};
pub use self::inner::{PauseSource, RecorderState, RecordingArtifact};
pub use self::marks::{DurationMark, MarkToggle};

use self::inner::RecorderInner;
use crate::bridge::CapturePlatform;
use crate::error::Result;
use crate::timeline::DebugSink;
use log::info;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

/// The recording controller: owns the session state machine, pause/resume
/// accounting, duration marks and the capture backend for one session at a
/// time.
pub struct Recorder {
    inner: Mutex<RecorderInner>,
}

impl Recorder {
    /// Create a controller for one capture request.
    pub fn new(platform: Arc<dyn CapturePlatform>, area: CaptureArea) -> Self {
        Self {
            inner: Mutex::new(RecorderInner::new(platform, area)),
        }
    }

    /// Same, with a debug timeline sink attached.
    pub fn with_sink(
        platform: Arc<dyn CapturePlatform>,
        area: CaptureArea,
        sink: Arc<dyn DebugSink>,
    ) -> Self {
        Self {
            inner: Mutex::new(RecorderInner::with_sink_and_clock(
                platform,
                area,
                sink,
                Arc::new(self::clock::SystemClock),
            )),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_sink_and_clock(
        platform: Arc<dyn CapturePlatform>,
        area: CaptureArea,
        sink: Arc<dyn DebugSink>,
        clock: Arc<dyn self::clock::Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(RecorderInner::with_sink_and_clock(
                platform, area, sink, clock,
            )),
        }
    }

    /// Get a configuration builder for a new capture request.
    pub fn builder() -> CaptureAreaBuilder {
        CaptureArea::builder()
    }

    // Begin recording
    pub fn start_recording(&self) -> Result<()> {
        info!("Starting recording");
        self.inner.lock().unwrap().start()
    }

    /// Stop the current recording and hand back the finished artifact.
    pub fn stop_recording(&self) -> Result<RecordingArtifact> {
        info!("Stopping recording");
        self.inner.lock().unwrap().stop()
    }

    /// User-initiated pause. A marking pause upgrades to manual in place.
    pub fn pause_recording(&self, origin: &str) -> Result<()> {
        self.inner.lock().unwrap().pause(PauseSource::Manual, origin)
    }

    pub fn resume_recording(&self, origin: &str) -> Result<()> {
        self.inner.lock().unwrap().resume(origin)
    }

    /// Pause while the user is typing a mark note; no-op if already paused.
    pub fn pause_for_marking(&self, origin: &str) -> Result<()> {
        self.inner.lock().unwrap().pause_for_marking(origin)
    }

    /// Resume only if the current pause was opened for marking. A manual
    /// pause stays put.
    pub fn resume_from_marking(&self, origin: &str) -> Result<()> {
        self.inner.lock().unwrap().resume_from_marking(origin)
    }

    /// Open a duration mark, or close the pending one.
    pub fn toggle_mark(&self, note: Option<String>) -> Result<MarkToggle> {
        self.inner.lock().unwrap().toggle_mark(note)
    }

    /// Hard teardown from any state.
    pub fn reset(&self) {
        self.inner.lock().unwrap().reset()
    }

    pub fn state(&self) -> RecorderState {
        self.inner.lock().unwrap().state()
    }

    pub fn pause_source(&self) -> PauseSource {
        self.inner.lock().unwrap().pause_source()
    }

    /// Pause-aware elapsed time, millisecond exact.
    pub fn elapsed_ms(&self) -> u64 {
        self.inner.lock().unwrap().elapsed_ms()
    }

    /// UI tick counter refreshed in the background while recording.
    pub fn tick_handle(&self) -> Arc<AtomicU64> {
        self.inner.lock().unwrap().tick_handle()
    }

    pub fn marks(&self) -> Vec<DurationMark> {
        self.inner.lock().unwrap().marks()
    }

    pub fn selected_codec(&self) -> Option<String> {
        self.inner.lock().unwrap().selected_codec().map(String::from)
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error().map(String::from)
    }

    pub fn session_id(&self) -> String {
        self.inner.lock().unwrap().session_id().to_string()
    }
}
