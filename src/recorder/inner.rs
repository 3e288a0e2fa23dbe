use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bridge::{CapturePlatform, ClipRecorderOptions, NativeCapture};
use crate::capture::region::{backend_for, CaptureBackendKind, RegionStreamManager};
use crate::capture::tracker::ActiveSourceTracker;
use crate::error::{RecorderError, Result};
use crate::processing::audio_mixer::{
    combine_audio_streams, create_desktop_audio_stream, create_microphone_stream, MixerCleanup,
};
use crate::processing::audio_recorder::AudioRecorder;
use crate::processing::encoding::{
    audio_encoding_for, select_codec, video_bitrate, AudioEncodingConfig,
};
use crate::processing::webm::repair_duration;
use crate::recorder::clock::{Clock, SegmentClock, SystemClock};
use crate::recorder::config::CaptureArea;
use crate::recorder::marks::{DurationMark, MarkLedger, MarkToggle};
use crate::timeline::{new_session_id, DebugSink, NoopSink, SessionTimeline};

/// UI tick refresh cadence. The tick is display-only; duration correctness
/// never depends on it.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Recordings shorter than this at stop time point at a premature-stop defect
/// somewhere upstream.
const SUSPICIOUS_DURATION: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Acquiring,
    Recording,
    Paused,
    Stopping,
    Error,
}

/// Who initiated the current pause. Marking pauses are transient and may be
/// released by mark workflows; manual pauses may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PauseSource {
    #[default]
    None,
    Manual,
    Marking,
}

/// The finished media handed back from `stop`. Exactly one of `blob` and
/// `file_path` is populated, depending on which backend ran.
#[derive(Debug)]
pub struct RecordingArtifact {
    pub blob: Option<Vec<u8>>,
    pub duration_ms: u64,
    pub file_path: Option<PathBuf>,
    pub audio_blob: Option<Vec<u8>>,
    pub audio_config: Option<AudioEncodingConfig>,
    /// Delta between video-session start and audio-recorder start, for
    /// downstream track alignment.
    pub audio_offset_ms: Option<u64>,
}

/// Which capture path the session runs on. A session that entered the native
/// path cannot hold fallback resources, and vice versa; the two completion
/// contracts are incompatible.
enum Backend {
    Native(NativeSession),
    Fallback(FallbackSession),
}

struct NativeSession {
    control: Arc<dyn NativeCapture>,
}

struct FallbackSession {
    region: Arc<RegionStreamManager>,
    tracker: ActiveSourceTracker,
}

struct AudioSession {
    recorder: AudioRecorder,
    mixer_cleanup: Option<MixerCleanup>,
    config: AudioEncodingConfig,
    offset_ms: u64,
    paused: bool,
}

/// Shared with the UI ticker thread.
struct ElapsedShared {
    clock: Arc<dyn Clock>,
    segments: Mutex<SegmentClock>,
    elapsed_ms: Arc<AtomicU64>,
    ticking: AtomicBool,
    shutdown: AtomicBool,
}

impl ElapsedShared {
    fn current_ms(&self) -> u64 {
        self.segments
            .lock()
            .unwrap()
            .elapsed(self.clock.now())
            .as_millis() as u64
    }
}

pub(crate) struct RecorderInner {
    platform: Arc<dyn CapturePlatform>,
    area: CaptureArea,
    sink: Arc<dyn DebugSink>,
    clock: Arc<dyn Clock>,

    state: RecorderState,
    backend: Option<Backend>,
    audio: Option<AudioSession>,
    pause_source: PauseSource,
    pause_in_flight: bool,
    resume_in_flight: bool,
    marks: MarkLedger,
    codec: Option<String>,
    last_error: Option<String>,

    timeline: SessionTimeline,
    elapsed: Arc<ElapsedShared>,
    ticker: Option<JoinHandle<()>>,
}

impl RecorderInner {
    pub fn new(platform: Arc<dyn CapturePlatform>, area: CaptureArea) -> Self {
        Self::with_sink_and_clock(platform, area, Arc::new(NoopSink), Arc::new(SystemClock))
    }

    pub fn with_sink_and_clock(
        platform: Arc<dyn CapturePlatform>,
        area: CaptureArea,
        sink: Arc<dyn DebugSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let elapsed = Arc::new(ElapsedShared {
            clock: clock.clone(),
            segments: Mutex::new(SegmentClock::new()),
            elapsed_ms: Arc::new(AtomicU64::new(0)),
            ticking: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });

        let ticker_shared = elapsed.clone();
        let ticker = std::thread::spawn(move || {
            while !ticker_shared.shutdown.load(Ordering::Relaxed) {
                if ticker_shared.ticking.load(Ordering::Relaxed) {
                    let ms = ticker_shared.current_ms();
                    ticker_shared.elapsed_ms.store(ms, Ordering::Relaxed);
                }
                std::thread::sleep(TICK_INTERVAL);
            }
        });

        let timeline = SessionTimeline::new(sink.clone(), new_session_id());
        Self {
            platform,
            area,
            sink,
            clock,
            state: RecorderState::Idle,
            backend: None,
            audio: None,
            pause_source: PauseSource::None,
            pause_in_flight: false,
            resume_in_flight: false,
            marks: MarkLedger::new(),
            codec: None,
            last_error: None,
            timeline,
            elapsed: elapsed.clone(),
            ticker: Some(ticker),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn pause_source(&self) -> PauseSource {
        self.pause_source
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn selected_codec(&self) -> Option<&str> {
        self.codec.as_deref()
    }

    pub fn session_id(&self) -> &str {
        self.timeline.session_id()
    }

    pub fn marks(&self) -> Vec<DurationMark> {
        self.marks.completed().to_vec()
    }

    /// Pause-aware elapsed time, exact to the millisecond.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.current_ms()
    }

    /// The UI-facing tick counter, refreshed in the background while
    /// recording. Display only; duration accounting never reads it.
    pub fn tick_handle(&self) -> Arc<AtomicU64> {
        self.elapsed.elapsed_ms.clone()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != RecorderState::Idle {
            return Err(RecorderError::RecorderAlreadyStarted);
        }

        self.timeline = SessionTimeline::new(self.sink.clone(), new_session_id());
        self.timeline.record("start", "controller", "acquiring");
        self.state = RecorderState::Acquiring;

        match self.do_start() {
            Ok(()) => {
                self.state = RecorderState::Recording;
                self.pause_source = PauseSource::None;
                self.timeline.record("started", "controller", "");
                Ok(())
            }
            Err(e) => {
                error!("Start failed: {}", e);
                self.timeline.record("start-failed", "controller", e.to_string());
                self.release_everything();
                self.last_error = Some(e.to_string());
                self.state = RecorderState::Error;
                Err(e)
            }
        }
    }

    fn do_start(&mut self) -> Result<()> {
        let area = self.area.clone();
        let codec = select_codec(self.platform.as_ref(), area.fps());
        let (out_width, out_height) = area.output_dimensions();
        let bitrate = video_bitrate(out_width, out_height, area.fps(), area.bits_per_pixel());
        info!(
            "Starting session {}: {}x{} @ {} fps, {} bps, codec {}",
            self.timeline.session_id(),
            out_width,
            out_height,
            area.fps(),
            bitrate,
            codec
        );
        self.codec = Some(codec.clone());

        // Audio streams come first so a required-audio failure aborts before
        // any video resource commits.
        let audio_config = audio_encoding_for(area.quality());
        let mut audio_streams = Vec::new();
        if area.capture_microphone() {
            match create_microphone_stream(
                &self.platform,
                area.microphone_device(),
                audio_config.channels,
            ) {
                Some(stream) => audio_streams.push(stream),
                None if area.require_audio() => {
                    return Err(RecorderError::acquisition(
                        "microphone",
                        "requested microphone could not be acquired",
                    ));
                }
                None => info!("Continuing without microphone audio"),
            }
        }
        if area.capture_desktop_audio() {
            match create_desktop_audio_stream(&self.platform, audio_config.channels) {
                Some(stream) => audio_streams.push(stream),
                None if area.require_audio() => {
                    return Err(RecorderError::acquisition(
                        "desktop audio",
                        "no loopback input device available",
                    ));
                }
                None => info!("Continuing without desktop audio"),
            }
        }

        // Video backend. Entering the native path makes fallback resources
        // unrepresentable for this session, and vice versa.
        let video_started = self.clock.now();
        let backend = match backend_for(self.platform.as_ref()) {
            CaptureBackendKind::NativeFile => {
                let control = self.platform.native_capture().ok_or_else(|| {
                    RecorderError::FailedToStart(
                        "Native capture path vanished between selection and start".to_string(),
                    )
                })?;
                control.start(area.display_id(), area.region(), area.fps())?;
                info!("Native file-based capture started");
                self.timeline.record("backend", "controller", "native-file");
                Backend::Native(NativeSession { control })
            }
            CaptureBackendKind::FallbackStream => {
                let options = ClipRecorderOptions {
                    width: out_width,
                    height: out_height,
                    fps: area.fps(),
                    mime_type: codec,
                    video_bits_per_second: bitrate,
                };
                let clip = self.platform.create_clip_recorder(&options)?;
                let region = Arc::new(RegionStreamManager::acquire(
                    self.platform.clone(),
                    &area,
                    clip,
                    self.timeline.clone(),
                )?);

                let tracker_region = region.clone();
                let tracker = ActiveSourceTracker::start(
                    self.platform.clone(),
                    area.display_id(),
                    Some(region.current_source_id()),
                    Arc::new(move |source_id, display_id, force| {
                        debug!(
                            "Source switch for display {}: {} (force={})",
                            display_id, source_id, force
                        );
                        if let Err(e) = tracker_region.update_source(source_id, force) {
                            warn!("Source switch to {} failed: {}", source_id, e);
                        }
                    }),
                );

                self.timeline.record("backend", "controller", "fallback-stream");
                Backend::Fallback(FallbackSession { region, tracker })
            }
        };
        self.backend = Some(backend);

        // Audio recorder runs in parallel with the video session; its start
        // offset lets the muxing step align the tracks later.
        if !audio_streams.is_empty() {
            let (stream, mixer_cleanup) = if audio_streams.len() >= 2 {
                let mixed = combine_audio_streams(audio_streams)?;
                (mixed.stream, Some(mixed.cleanup))
            } else {
                (audio_streams.remove(0), None)
            };
            let offset_ms = self
                .clock
                .now()
                .saturating_duration_since(video_started)
                .as_millis() as u64;
            self.audio = Some(AudioSession {
                recorder: AudioRecorder::start(stream, audio_config),
                mixer_cleanup,
                config: audio_config,
                offset_ms,
                paused: false,
            });
        }

        // Elapsed ticking begins immediately.
        self.elapsed
            .segments
            .lock()
            .unwrap()
            .start(self.clock.now());
        self.elapsed.elapsed_ms.store(0, Ordering::Relaxed);
        self.elapsed.ticking.store(true, Ordering::Relaxed);
        Ok(())
    }

    pub fn pause(&mut self, source: PauseSource, origin: &str) -> Result<()> {
        if self.state == RecorderState::Paused {
            // A marking pause upgrades to manual in place; the backend pause
            // already happened, so only the recorded source changes.
            if source == PauseSource::Manual && self.pause_source != PauseSource::Manual {
                info!("Upgrading pause source to manual (origin {})", origin);
                self.pause_source = PauseSource::Manual;
                self.timeline.record("pause-upgraded", origin, "manual");
            }
            return Ok(());
        }
        if self.state != RecorderState::Recording {
            debug!("Ignoring pause while {:?}", self.state);
            return Ok(());
        }
        if self.pause_in_flight {
            debug!("Pause already in flight, dropping request");
            return Ok(());
        }

        self.pause_in_flight = true;
        let result = self.issue_video_pause();
        self.pause_in_flight = false;
        if let Err(e) = result {
            warn!("Video pause failed, staying in recording state: {}", e);
            return Err(e);
        }

        // Video pause is the pause of record; audio trouble is logged only.
        if let Some(audio) = self.audio.as_mut() {
            if audio.recorder.is_recording() {
                audio.recorder.pause();
                audio.paused = true;
            }
        }

        let now = self.clock.now();
        self.elapsed.segments.lock().unwrap().pause(now);
        self.elapsed.ticking.store(false, Ordering::Relaxed);
        self.elapsed
            .elapsed_ms
            .store(self.elapsed.current_ms(), Ordering::Relaxed);

        self.pause_source = source;
        self.state = RecorderState::Paused;
        self.timeline
            .record("paused", origin, format!("source={:?}", source));
        info!("Recording paused ({:?}, origin {})", source, origin);
        Ok(())
    }

    pub fn resume(&mut self, origin: &str) -> Result<()> {
        if self.state != RecorderState::Paused {
            debug!("Ignoring resume while {:?}", self.state);
            return Ok(());
        }
        if self.resume_in_flight {
            debug!("Resume already in flight, dropping request");
            return Ok(());
        }

        self.resume_in_flight = true;
        let result = self.issue_video_resume();
        self.resume_in_flight = false;
        if let Err(e) = result {
            warn!("Video resume failed, staying paused: {}", e);
            return Err(e);
        }

        if let Some(audio) = self.audio.as_mut() {
            if audio.paused {
                audio.recorder.resume();
                audio.paused = false;
            }
        }

        self.elapsed
            .segments
            .lock()
            .unwrap()
            .resume(self.clock.now());
        self.elapsed.ticking.store(true, Ordering::Relaxed);

        self.pause_source = PauseSource::None;
        self.state = RecorderState::Recording;
        self.timeline.record("resumed", origin, "");
        info!("Recording resumed (origin {})", origin);
        Ok(())
    }

    /// Pause on behalf of mark-note input. Policy wrapper: never overrides an
    /// existing pause, whatever its source.
    pub fn pause_for_marking(&mut self, origin: &str) -> Result<()> {
        if self.state == RecorderState::Paused {
            return Ok(());
        }
        self.pause(PauseSource::Marking, origin)
    }

    /// Release a marking pause. A manual pause is never released here; manual
    /// dominance is one-way by design.
    pub fn resume_from_marking(&mut self, origin: &str) -> Result<()> {
        if self.state != RecorderState::Paused || self.pause_source != PauseSource::Marking {
            debug!(
                "Ignoring marking resume (state {:?}, source {:?})",
                self.state, self.pause_source
            );
            return Ok(());
        }
        self.resume(origin)
    }

    /// Open a mark at the current elapsed second, or close the pending one.
    pub fn toggle_mark(&mut self, note: Option<String>) -> Result<MarkToggle> {
        if !matches!(self.state, RecorderState::Recording | RecorderState::Paused) {
            return Err(RecorderError::RecorderAlreadyStopped);
        }
        let elapsed_secs = self
            .elapsed
            .segments
            .lock()
            .unwrap()
            .elapsed(self.clock.now())
            .as_secs();
        let outcome = self.marks.toggle(elapsed_secs, note);
        self.timeline
            .record("mark", "controller", format!("{:?} at {}s", outcome, elapsed_secs));
        Ok(outcome)
    }

    pub fn stop(&mut self) -> Result<RecordingArtifact> {
        if !matches!(self.state, RecorderState::Recording | RecorderState::Paused) {
            return Err(RecorderError::RecorderAlreadyStopped);
        }
        self.state = RecorderState::Stopping;
        self.timeline.record("stop", "controller", "");

        let now = self.clock.now();
        let duration = {
            let mut segments = self.elapsed.segments.lock().unwrap();
            segments.pause(now);
            segments.elapsed(now)
        };
        self.elapsed.ticking.store(false, Ordering::Relaxed);
        let duration_ms = duration.as_millis() as u64;

        // A mark left open rides along to the end, same discard rule as a
        // manual close.
        self.marks.finish_pending(duration.as_secs());

        if duration < SUSPICIOUS_DURATION {
            warn!(
                "Recording stopped after only {}ms; this usually means something upstream stopped it prematurely",
                duration_ms
            );
        }

        let backend = self.backend.take();
        let result = match backend {
            Some(Backend::Native(native)) => self.stop_native(native, duration_ms),
            Some(Backend::Fallback(fallback)) => self.stop_fallback(fallback, duration_ms),
            None => Err(RecorderError::Generic(
                "Session has no active capture backend".to_string(),
            )),
        };

        match result {
            Ok(artifact) => {
                info!(
                    "Recording stopped: {}ms, {} marks",
                    artifact.duration_ms,
                    self.marks.completed().len()
                );
                self.timeline
                    .record("stopped", "controller", format!("{}ms", artifact.duration_ms));
                self.pause_source = PauseSource::None;
                self.state = RecorderState::Idle;
                Ok(artifact)
            }
            Err(e) => {
                error!("Stop failed: {}", e);
                self.timeline.record("stop-failed", "controller", e.to_string());
                self.last_error = Some(e.to_string());
                self.state = RecorderState::Error;
                Err(e)
            }
        }
    }

    fn stop_native(
        &mut self,
        native: NativeSession,
        duration_ms: u64,
    ) -> Result<RecordingArtifact> {
        // The native stop must be acknowledged before the file path can be
        // trusted; only then is anything else released.
        let path_result = native
            .control
            .stop()
            .map_err(|e| RecorderError::Finalization(e.to_string()));

        // Audio comes down before anything that could invalidate the path,
        // and regardless of whether the native stop succeeded.
        let (audio_blob, audio_config, audio_offset_ms) = self.stop_audio();

        let file_path = path_result?;
        info!("Native capture finished at {}", file_path.display());

        Ok(RecordingArtifact {
            blob: None,
            duration_ms,
            file_path: Some(file_path),
            audio_blob,
            audio_config,
            audio_offset_ms,
        })
    }

    fn stop_fallback(
        &mut self,
        fallback: FallbackSession,
        duration_ms: u64,
    ) -> Result<RecordingArtifact> {
        let FallbackSession { region, mut tracker } = fallback;

        let blob_result = region
            .finish()
            .map_err(|e| RecorderError::Finalization(e.to_string()))
            .and_then(|blob| {
                // Streamed containers come back with no readable duration;
                // repair is mandatory post-processing, not polish.
                repair_duration(&blob, duration_ms as f64)
            });

        let (audio_blob, audio_config, audio_offset_ms) = self.stop_audio();
        region.cleanup();
        tracker.stop();

        let blob = blob_result?;
        Ok(RecordingArtifact {
            blob: Some(blob),
            duration_ms,
            file_path: None,
            audio_blob,
            audio_config,
            audio_offset_ms,
        })
    }

    fn stop_audio(&mut self) -> (Option<Vec<u8>>, Option<AudioEncodingConfig>, Option<u64>) {
        match self.audio.take() {
            Some(session) => {
                let config = session.config;
                let offset_ms = session.offset_ms;
                let blob = match session.recorder.stop() {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!("Audio recorder failed to finalize: {}", e);
                        None
                    }
                };
                if let Some(cleanup) = session.mixer_cleanup {
                    cleanup.cleanup();
                }
                (blob, Some(config), Some(offset_ms))
            }
            None => (None, None, None),
        }
    }

    /// Hard teardown from any state, including `Error` and mid-stop. Discards
    /// resources without waiting for graceful acknowledgment.
    pub fn reset(&mut self) {
        info!("Resetting recorder from {:?}", self.state);
        self.elapsed.ticking.store(false, Ordering::Relaxed);
        self.release_everything();
        self.elapsed.segments.lock().unwrap().reset();
        self.elapsed.elapsed_ms.store(0, Ordering::Relaxed);
        self.marks.clear();
        self.pause_source = PauseSource::None;
        self.pause_in_flight = false;
        self.resume_in_flight = false;
        self.codec = None;
        self.last_error = None;
        self.timeline.record("reset", "controller", "");
        self.state = RecorderState::Idle;
    }

    fn release_everything(&mut self) {
        if let Some(backend) = self.backend.take() {
            match backend {
                Backend::Native(native) => {
                    if let Err(e) = native.control.stop() {
                        debug!("Native stop during teardown failed: {}", e);
                    }
                }
                Backend::Fallback(fallback) => {
                    let FallbackSession { region, mut tracker } = fallback;
                    region.cleanup();
                    tracker.stop();
                }
            }
        }
        let _ = self.stop_audio();
    }

    fn issue_video_pause(&self) -> Result<()> {
        match self.backend.as_ref() {
            Some(Backend::Native(native)) => native.control.pause(),
            Some(Backend::Fallback(fallback)) => fallback.region.pause_recorder(),
            None => Err(RecorderError::Generic(
                "No capture backend to pause".to_string(),
            )),
        }
    }

    fn issue_video_resume(&self) -> Result<()> {
        match self.backend.as_ref() {
            Some(Backend::Native(native)) => native.control.resume(),
            Some(Backend::Fallback(fallback)) => fallback.region.resume_recorder(),
            None => Err(RecorderError::Generic(
                "No capture backend to resume".to_string(),
            )),
        }
    }
}

impl Drop for RecorderInner {
    fn drop(&mut self) {
        self.release_everything();
        self.elapsed.shutdown.store(true, Ordering::Relaxed);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}
