mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use types::{
    AudioConstraints, AudioInputInfo, ClipRecorderOptions, DisplayInfo, SourceInfo, SourceKind,
    StreamEvent,
};

use crate::error::Result;
use crate::types::{AudioStreamSpec, FrameBuffer};
use log::warn;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// The platform bridge the engine is compiled against. Implementations wrap
/// whatever the host OS offers; the engine only ever talks to these traits.
pub trait CapturePlatform: Send + Sync {
    /// Displays in platform enumeration order. The order matters: screen
    /// sources correspond to displays by index.
    fn enumerate_displays(&self) -> Result<Vec<DisplayInfo>>;

    /// Capture sources (screens and windows) in platform enumeration order.
    fn enumerate_sources(&self) -> Result<Vec<SourceInfo>>;

    fn enumerate_audio_inputs(&self) -> Result<Vec<AudioInputInfo>>;

    /// Open a full-display video stream for a source id. Frames arrive on the
    /// stream's channel at whatever cadence the platform can sustain.
    fn open_display_stream(&self, source_id: &str, fps: u32) -> Result<DisplayStream>;

    fn open_audio_input(&self, constraints: &AudioConstraints) -> Result<AudioStream>;

    /// Encoder for the fallback path. Frames are pushed explicitly, one per
    /// pump tick.
    fn create_clip_recorder(&self, options: &ClipRecorderOptions)
        -> Result<Box<dyn ClipRecorder>>;

    fn supports_mime_type(&self, mime_type: &str) -> bool;

    /// Present when the platform offers the high-level file-based capture
    /// path. `None` selects the fallback pipeline.
    fn native_capture(&self) -> Option<Arc<dyn NativeCapture>> {
        None
    }
}

/// High-level file-based capture session. The native layer writes frames
/// directly to its own target file; the engine only ever sees the completion
/// path.
pub trait NativeCapture: Send + Sync {
    fn start(&self, display_id: &str, region: crate::types::Region, fps: u32) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    /// Stop capture and block until the native layer acknowledges and hands
    /// back the finished file. The returned path must not be trusted before
    /// this call completes.
    fn stop(&self) -> Result<PathBuf>;
}

/// Fallback-path encoder. One instance per session; `finish` may be called
/// once.
pub trait ClipRecorder: Send {
    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Finalize and return the container bytes.
    fn finish(&mut self) -> Result<Vec<u8>>;

    fn mime_type(&self) -> &str;
}

/// A live full-display video stream plus its teardown. Tracks are OS
/// resources; they outlive heap reachability, so teardown is explicit and
/// idempotent rather than left to drop order.
pub struct DisplayStream {
    frames: Receiver<FrameBuffer>,
    events: Receiver<StreamEvent>,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl DisplayStream {
    pub fn new(
        frames: Receiver<FrameBuffer>,
        events: Receiver<StreamEvent>,
        stop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            frames,
            events,
            stop: Some(Box::new(stop)),
        }
    }

    /// Drain the frame channel, keeping only the newest buffered frame.
    pub fn latest_frame(&self) -> Option<FrameBuffer> {
        let mut latest = None;
        while let Ok(frame) = self.frames.try_recv() {
            latest = Some(frame);
        }
        latest
    }

    /// Block for the first frame of a freshly opened stream, bounded.
    pub fn wait_first_frame(&self, timeout: Duration) -> Option<FrameBuffer> {
        self.frames.recv_timeout(timeout).ok()
    }

    pub fn poll_event(&self) -> Option<StreamEvent> {
        self.events.try_recv().ok()
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for DisplayStream {
    fn drop(&mut self) {
        if self.stop.is_some() {
            warn!("DisplayStream dropped without explicit stop, stopping tracks now");
            self.stop();
        }
    }
}

/// Outcome of a non-blocking audio chunk poll.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPoll {
    Chunk(Vec<f32>),
    Empty,
    /// Producer hung up and the buffer is drained.
    Finished,
}

/// A live audio input stream delivering interleaved f32 sample chunks.
pub struct AudioStream {
    chunks: Receiver<Vec<f32>>,
    spec: AudioStreamSpec,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl AudioStream {
    pub fn new(
        chunks: Receiver<Vec<f32>>,
        spec: AudioStreamSpec,
        stop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            chunks,
            spec,
            stop: Some(Box::new(stop)),
        }
    }

    pub fn spec(&self) -> AudioStreamSpec {
        self.spec
    }

    pub fn poll_chunk(&self) -> ChunkPoll {
        match self.chunks.try_recv() {
            Ok(chunk) => ChunkPoll::Chunk(chunk),
            Err(std::sync::mpsc::TryRecvError::Empty) => ChunkPoll::Empty,
            Err(std::sync::mpsc::TryRecvError::Disconnected) => ChunkPoll::Finished,
        }
    }

    pub fn chunk_timeout(&self, timeout: Duration) -> Option<Vec<f32>> {
        self.chunks.recv_timeout(timeout).ok()
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        if self.stop.is_some() {
            warn!("AudioStream dropped without explicit stop, stopping tracks now");
            self.stop();
        }
    }
}
