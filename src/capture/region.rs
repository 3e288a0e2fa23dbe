use crate::bridge::{CapturePlatform, ClipRecorder, DisplayStream};
use crate::capture::freeze::FreezeDetector;
use crate::capture::resolve_source_for_display;
use crate::error::{RecorderError, Result};
use crate::processing::encoding::QualityTier;
use crate::recorder::CaptureArea;
use crate::timeline::SessionTimeline;
use crate::types::{frame_interval, FrameBuffer, Region};
use fast_image_resize::images::Image;
use log::{debug, error, info, warn};
use spin_sleep::SpinSleeper;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Which capture backend a platform gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackendKind {
    /// Native layer writes straight to a file and reports the path.
    NativeFile,
    /// Crop-and-repump pipeline over a full-display stream.
    FallbackStream,
}

pub fn backend_for(platform: &dyn CapturePlatform) -> CaptureBackendKind {
    if platform.native_capture().is_some() {
        CaptureBackendKind::NativeFile
    } else {
        CaptureBackendKind::FallbackStream
    }
}

struct StreamSlot {
    stream: Option<DisplayStream>,
    source_id: String,
    /// First frame of a freshly swapped stream, consumed by the next tick so
    /// the pump never re-emits a stale pre-swap frame.
    pending: Option<FrameBuffer>,
}

struct RegionInner {
    platform: Arc<dyn CapturePlatform>,
    display_id: String,
    /// Capture region in physical pixels.
    region_px: Region,
    tier: QualityTier,
    fps: u32,
    stream_ready_timeout: Duration,
    running: AtomicBool,
    cleaned: AtomicBool,
    /// Single in-flight recovery guard; concurrent swap requests are dropped.
    recovering: AtomicBool,
    slot: Mutex<StreamSlot>,
    recorder: Mutex<Box<dyn ClipRecorder>>,
    freeze: Mutex<FreezeDetector>,
    timeline: SessionTimeline,
}

/// Owns the fallback video pipeline for one session: the full-display stream,
/// the manual frame pump, freeze detection and source-swap recovery. The
/// logical output (the clip recorder) keeps its identity across swaps.
pub struct RegionStreamManager {
    inner: Arc<RegionInner>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RegionStreamManager {
    pub fn acquire(
        platform: Arc<dyn CapturePlatform>,
        area: &CaptureArea,
        recorder: Box<dyn ClipRecorder>,
        timeline: SessionTimeline,
    ) -> Result<Self> {
        let sources = platform
            .enumerate_sources()
            .map_err(|e| RecorderError::acquisition("capture sources", e.to_string()))?;
        let displays = platform
            .enumerate_displays()
            .map_err(|e| RecorderError::acquisition("displays", e.to_string()))?;
        let source_id = resolve_source_for_display(&sources, &displays, area.display_id())
            .ok_or_else(|| RecorderError::NoSourceForDisplay(area.display_id().to_string()))?;

        info!(
            "Acquiring region stream for display {} via source {} ({} fps, {} tier)",
            area.display_id(),
            source_id,
            area.fps(),
            area.quality()
        );

        let stream = platform.open_display_stream(&source_id, area.fps())?;

        let inner = Arc::new(RegionInner {
            platform,
            display_id: area.display_id().to_string(),
            region_px: area.region().scaled(area.scale_factor()),
            tier: area.quality(),
            fps: area.fps(),
            stream_ready_timeout: area.stream_ready_timeout(),
            running: AtomicBool::new(true),
            cleaned: AtomicBool::new(false),
            recovering: AtomicBool::new(false),
            slot: Mutex::new(StreamSlot {
                stream: Some(stream),
                source_id,
                pending: None,
            }),
            recorder: Mutex::new(recorder),
            freeze: Mutex::new(FreezeDetector::new()),
            timeline,
        });

        let pump_inner = inner.clone();
        let pump = std::thread::spawn(move || pump_loop(pump_inner));

        Ok(Self {
            inner,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn current_source_id(&self) -> String {
        self.inner.slot.lock().unwrap().source_id.clone()
    }

    /// Swap the underlying full-display stream to a new source.
    ///
    /// No-op when the id is unchanged and `force` is false. Safe to call
    /// repeatedly; a second request while a swap is in flight is dropped. On
    /// failure the session continues on the stale source and the next
    /// detection cycle retries.
    pub fn update_source(&self, source_id: &str, force: bool) -> Result<()> {
        if self.inner.cleaned.load(Ordering::SeqCst) {
            return Ok(());
        }
        {
            let slot = self.inner.slot.lock().unwrap();
            if !force && slot.source_id == source_id {
                return Ok(());
            }
        }
        if self.inner.recovering.swap(true, Ordering::SeqCst) {
            debug!("Source swap already in flight, dropping request for {}", source_id);
            return Ok(());
        }
        let result = self.inner.swap_stream(source_id);
        self.inner.recovering.store(false, Ordering::SeqCst);
        result
    }

    /// Pause / resume the clip recorder without touching the pump.
    pub fn pause_recorder(&self) -> Result<()> {
        self.inner.recorder.lock().unwrap().pause()
    }

    pub fn resume_recorder(&self) -> Result<()> {
        self.inner.recorder.lock().unwrap().resume()
    }

    /// Stop the pump and finalize the clip recorder, returning the container
    /// bytes. Stream teardown is left to `cleanup`.
    pub fn finish(&self) -> Result<Vec<u8>> {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(pump) = self.pump.lock().unwrap().take() {
            if pump.join().is_err() {
                warn!("Frame pump thread panicked before finish");
            }
        }
        self.inner.recorder.lock().unwrap().finish()
    }

    /// Mandatory teardown. Stops the pump via its flag, joins it, and stops
    /// the underlying stream tracks. Idempotent; never double-stops.
    pub fn cleanup(&self) {
        if self.inner.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Cleaning up region stream manager");
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(pump) = self.pump.lock().unwrap().take() {
            if pump.join().is_err() {
                warn!("Frame pump thread panicked during cleanup");
            }
        }
        let mut slot = self.inner.slot.lock().unwrap();
        if let Some(mut stream) = slot.stream.take() {
            stream.stop();
        }
        slot.pending = None;
    }
}

impl Drop for RegionStreamManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl RegionInner {
    /// Re-resolve the source for our display, falling back to the current id
    /// when the enumeration no longer covers it.
    fn re_resolve(&self) -> String {
        let current = self.slot.lock().unwrap().source_id.clone();
        let resolved = self
            .platform
            .enumerate_sources()
            .ok()
            .and_then(|sources| {
                let displays = self.platform.enumerate_displays().ok()?;
                resolve_source_for_display(&sources, &displays, &self.display_id)
            });
        match resolved {
            Some(id) => id,
            None => {
                debug!(
                    "Re-resolution failed for display {}, retrying current source {}",
                    self.display_id, current
                );
                current
            }
        }
    }

    fn swap_stream(&self, source_id: &str) -> Result<()> {
        info!("Swapping display stream to source {}", source_id);
        let new_stream = self.platform.open_display_stream(source_id, self.fps)?;
        let first = new_stream
            .wait_first_frame(self.stream_ready_timeout)
            .ok_or(RecorderError::Timeout(
                self.stream_ready_timeout,
                "first frame of replacement stream",
            ))?;

        // Only tear the old stream down once the replacement is live, so the
        // logical output never observes a gap in ownership.
        let mut slot = self.slot.lock().unwrap();
        if self.cleaned.load(Ordering::SeqCst) {
            // Cleanup won the race; the session is gone, drop the replacement.
            drop(slot);
            let mut new_stream = new_stream;
            new_stream.stop();
            return Ok(());
        }
        if let Some(mut old) = slot.stream.take() {
            old.stop();
        }
        slot.source_id = source_id.to_string();
        slot.pending = Some(first);
        slot.stream = Some(new_stream);
        drop(slot);

        self.freeze.lock().unwrap().reset();
        self.timeline
            .record("source-swap", "region-stream", format!("source={}", source_id));
        Ok(())
    }

    fn recover(&self, reason: &str) {
        if self.recovering.swap(true, Ordering::SeqCst) {
            debug!("Recovery already in flight, ignoring {}", reason);
            return;
        }
        let source_id = self.re_resolve();
        self.timeline
            .record("recovery", "region-stream", format!("reason={}", reason));
        match self.swap_stream(&source_id) {
            Ok(()) => info!("Recovered capture stream after {} via {}", reason, source_id),
            Err(e) => {
                // Not fatal: keep pumping the stale source, the next freeze or
                // liveness event retries.
                warn!("Recovery after {} failed, continuing on stale source: {}", reason, e);
            }
        }
        self.recovering.store(false, Ordering::SeqCst);
    }
}

fn pump_loop(inner: Arc<RegionInner>) {
    let interval = frame_interval(inner.fps);
    let sleeper = SpinSleeper::default();
    let mut perturb_tick: u64 = 0;

    debug!(
        "Frame pump started at {:?} interval for display {}",
        interval, inner.display_id
    );

    loop {
        // Cancellation flag first: the scheduler cannot preempt a tick.
        if !inner.running.load(Ordering::Relaxed) {
            break;
        }
        let tick_start = Instant::now();

        // Liveness events route into the same recovery path as a freeze.
        let event = {
            let slot = inner.slot.lock().unwrap();
            slot.stream.as_ref().and_then(|s| s.poll_event())
        };
        if let Some(event) = event {
            warn!("Display stream reported {:?}, recovering", event);
            inner.recover("liveness-event");
        }

        // Skip the tick entirely when the source has nothing fresh; pumping
        // anyway would re-emit a stale frame right after a source swap.
        let frame = {
            let mut slot = inner.slot.lock().unwrap();
            slot.pending
                .take()
                .or_else(|| slot.stream.as_ref().and_then(|s| s.latest_frame()))
        };

        if let Some(frame) = frame {
            match crop_and_scale(frame, inner.region_px, inner.tier) {
                Ok(mut out) => {
                    let possibly_frozen = inner.freeze.lock().unwrap().possibly_frozen();
                    if !possibly_frozen {
                        // Keeps downstream change detection alive, but must go
                        // quiet once the freeze detector is suspicious or it
                        // would mask the very condition being watched for.
                        perturb_pixel(&mut out, perturb_tick);
                        perturb_tick = perturb_tick.wrapping_add(1);
                    }
                    let frozen = inner.freeze.lock().unwrap().observe(&out.data);

                    if let Err(e) = inner.recorder.lock().unwrap().write_frame(&out) {
                        warn!("Clip recorder rejected frame: {}", e);
                    }

                    if frozen {
                        warn!("Freeze confirmed on source {}", inner.slot.lock().unwrap().source_id);
                        inner.recover("freeze");
                    }
                }
                Err(e) => {
                    error!("Frame processing failed, dropping frame: {}", e);
                }
            }
        }

        let spent = tick_start.elapsed();
        if spent < interval {
            sleeper.sleep(interval - spent);
        }
    }

    debug!("Frame pump for display {} exited", inner.display_id);
}

/// Crop the physical-pixel region out of a full-display frame and scale it
/// into the quality tier's box, preserving aspect ratio.
fn crop_and_scale(frame: FrameBuffer, region: Region, tier: QualityTier) -> Result<FrameBuffer> {
    let crop_x = region.x.clamp(0, frame.width.saturating_sub(1) as i32) as u32;
    let crop_y = region.y.clamp(0, frame.height.saturating_sub(1) as i32) as u32;
    let crop_w = region.width.min(frame.width - crop_x);
    let crop_h = region.height.min(frame.height - crop_y);
    if crop_w == 0 || crop_h == 0 || frame.data.len() < frame.expected_len() {
        return Err(RecorderError::Generic(format!(
            "Region {:?} does not intersect a {}x{} frame",
            region, frame.width, frame.height
        )));
    }

    let (dst_w, dst_h) = tier.scaled_dimensions(crop_w, crop_h);

    let mut src_data = frame.data;
    let src = Image::from_slice_u8(
        frame.width,
        frame.height,
        &mut src_data,
        fast_image_resize::PixelType::U8x4,
    )
    .map_err(|e| RecorderError::Generic(format!("Failed to wrap source frame: {}", e)))?;

    let mut dst_data = vec![0u8; (dst_w * dst_h * 4) as usize];
    let mut dst = Image::from_slice_u8(
        dst_w,
        dst_h,
        &mut dst_data,
        fast_image_resize::PixelType::U8x4,
    )
    .map_err(|e| RecorderError::Generic(format!("Failed to create output frame: {}", e)))?;

    let options = fast_image_resize::ResizeOptions::new()
        .resize_alg(fast_image_resize::ResizeAlg::Interpolation(
            fast_image_resize::FilterType::Lanczos3,
        ))
        .crop(crop_x as f64, crop_y as f64, crop_w as f64, crop_h as f64);

    fast_image_resize::Resizer::new()
        .resize(&src, &mut dst, &options)
        .map_err(|e| RecorderError::Generic(format!("Resize failed: {}", e)))?;

    Ok(FrameBuffer::new(dst_w, dst_h, dst_data))
}

/// Nudge one color channel by one step at a coordinate that rotates every
/// tick. Invisible on screen, enough to register as change downstream.
fn perturb_pixel(frame: &mut FrameBuffer, tick: u64) {
    let pixels = (frame.width as u64) * (frame.height as u64);
    if pixels == 0 {
        return;
    }
    let index = ((tick.wrapping_mul(31)) % pixels) as usize * 4;
    let channel = &mut frame.data[index];
    *channel = if *channel >= u8::MAX { *channel - 1 } else { *channel + 1 };
}
