//! In-crate mock of the platform bridge for tests. Everything is observable
//! and injectable: source lists, frames, stream events, audio chunks.

use crate::bridge::{
    AudioConstraints, AudioInputInfo, AudioStream, CapturePlatform, ClipRecorder,
    ClipRecorderOptions, DisplayInfo, DisplayStream, NativeCapture, SourceInfo, StreamEvent,
};
use crate::error::{RecorderError, Result};
use crate::types::{AudioStreamSpec, FrameBuffer, Region};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};

pub(crate) struct MockPlatform {
    displays: Mutex<Vec<DisplayInfo>>,
    sources: Mutex<Vec<SourceInfo>>,
    audio_inputs: Mutex<Vec<AudioInputInfo>>,
    audio_available: Mutex<bool>,
    supported_mimes: Mutex<Option<Vec<String>>>,
    native: Mutex<Option<Arc<MockNativeCapture>>>,
    prebuffered_frame: Mutex<Option<FrameBuffer>>,

    opened_streams: AtomicUsize,
    stopped_streams: Arc<AtomicUsize>,
    stream_handles: Mutex<Vec<StreamHandles>>,
    audio_senders: Mutex<Vec<Sender<Vec<f32>>>>,
    last_clip: Mutex<Option<Arc<Mutex<ClipState>>>>,
    last_clip_options: Mutex<Option<ClipRecorderOptions>>,
}

pub(crate) struct StreamHandles {
    pub frames: Sender<FrameBuffer>,
    pub events: Sender<StreamEvent>,
}

impl MockPlatform {
    pub fn with_displays(ids: &[&str]) -> Self {
        let platform = Self {
            displays: Mutex::new(Vec::new()),
            sources: Mutex::new(Vec::new()),
            audio_inputs: Mutex::new(Vec::new()),
            audio_available: Mutex::new(true),
            supported_mimes: Mutex::new(None),
            native: Mutex::new(None),
            prebuffered_frame: Mutex::new(None),
            opened_streams: AtomicUsize::new(0),
            stopped_streams: Arc::new(AtomicUsize::new(0)),
            stream_handles: Mutex::new(Vec::new()),
            audio_senders: Mutex::new(Vec::new()),
            last_clip: Mutex::new(None),
            last_clip_options: Mutex::new(None),
        };
        platform.set_displays(ids);
        platform
    }

    pub fn set_displays(&self, ids: &[&str]) {
        *self.displays.lock().unwrap() = ids
            .iter()
            .map(|id| DisplayInfo {
                id: id.to_string(),
                bounds: Region::new(0, 0, 1920, 1080),
                scale_factor: 1.0,
            })
            .collect();
    }

    pub fn set_sources(&self, sources: Vec<SourceInfo>) {
        *self.sources.lock().unwrap() = sources;
    }

    pub fn set_audio_inputs(&self, inputs: Vec<AudioInputInfo>) {
        *self.audio_inputs.lock().unwrap() = inputs;
    }

    pub fn set_audio_available(&self, available: bool) {
        *self.audio_available.lock().unwrap() = available;
    }

    pub fn set_supported_mimes(&self, mimes: Option<Vec<String>>) {
        *self.supported_mimes.lock().unwrap() = mimes;
    }

    pub fn set_native(&self, native: Arc<MockNativeCapture>) {
        *self.native.lock().unwrap() = Some(native);
    }

    /// Every stream opened from now on starts with this frame buffered, so
    /// first-frame waits complete immediately.
    pub fn buffer_frame_on_open(&self, frame: FrameBuffer) {
        *self.prebuffered_frame.lock().unwrap() = Some(frame);
    }

    pub fn opened_stream_count(&self) -> usize {
        self.opened_streams.load(Ordering::SeqCst)
    }

    pub fn stopped_stream_count(&self) -> usize {
        self.stopped_streams.load(Ordering::SeqCst)
    }

    /// Push a frame into the most recently opened display stream.
    pub fn push_frame(&self, frame: FrameBuffer) {
        if let Some(handles) = self.stream_handles.lock().unwrap().last() {
            let _ = handles.frames.send(frame);
        }
    }

    pub fn push_event(&self, event: StreamEvent) {
        if let Some(handles) = self.stream_handles.lock().unwrap().last() {
            let _ = handles.events.send(event);
        }
    }

    /// Push an audio chunk into every open audio input.
    pub fn push_audio_chunk(&self, chunk: Vec<f32>) {
        for sender in self.audio_senders.lock().unwrap().iter() {
            let _ = sender.send(chunk.clone());
        }
    }

    pub fn last_clip(&self) -> Option<Arc<Mutex<ClipState>>> {
        self.last_clip.lock().unwrap().clone()
    }

    pub fn last_clip_options(&self) -> Option<ClipRecorderOptions> {
        self.last_clip_options.lock().unwrap().clone()
    }
}

impl CapturePlatform for MockPlatform {
    fn enumerate_displays(&self) -> Result<Vec<DisplayInfo>> {
        Ok(self.displays.lock().unwrap().clone())
    }

    fn enumerate_sources(&self) -> Result<Vec<SourceInfo>> {
        Ok(self.sources.lock().unwrap().clone())
    }

    fn enumerate_audio_inputs(&self) -> Result<Vec<AudioInputInfo>> {
        Ok(self.audio_inputs.lock().unwrap().clone())
    }

    fn open_display_stream(&self, _source_id: &str, _fps: u32) -> Result<DisplayStream> {
        self.opened_streams.fetch_add(1, Ordering::SeqCst);
        let (frame_tx, frame_rx) = channel();
        let (event_tx, event_rx) = channel();

        if let Some(frame) = self.prebuffered_frame.lock().unwrap().clone() {
            let _ = frame_tx.send(frame);
        }

        self.stream_handles.lock().unwrap().push(StreamHandles {
            frames: frame_tx,
            events: event_tx,
        });

        let stopped = self.stopped_streams.clone();
        Ok(DisplayStream::new(frame_rx, event_rx, move || {
            stopped.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn open_audio_input(&self, constraints: &AudioConstraints) -> Result<AudioStream> {
        if !*self.audio_available.lock().unwrap() {
            return Err(RecorderError::acquisition(
                "audio input",
                "permission denied",
            ));
        }
        let (tx, rx) = channel();
        self.audio_senders.lock().unwrap().push(tx);
        Ok(AudioStream::new(
            rx,
            AudioStreamSpec::new(constraints.sample_rate, constraints.channel_count),
            || {},
        ))
    }

    fn create_clip_recorder(
        &self,
        options: &ClipRecorderOptions,
    ) -> Result<Box<dyn ClipRecorder>> {
        *self.last_clip_options.lock().unwrap() = Some(options.clone());
        let recorder = MockClipRecorder::with_mime(&options.mime_type);
        *self.last_clip.lock().unwrap() = Some(recorder.state());
        Ok(Box::new(recorder))
    }

    fn supports_mime_type(&self, mime_type: &str) -> bool {
        match self.supported_mimes.lock().unwrap().as_ref() {
            Some(mimes) => mimes.iter().any(|m| m == mime_type),
            None => true,
        }
    }

    fn native_capture(&self) -> Option<Arc<dyn NativeCapture>> {
        self.native
            .lock()
            .unwrap()
            .clone()
            .map(|n| n as Arc<dyn NativeCapture>)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ClipState {
    pub frames_written: usize,
    pub paused: bool,
    pub pause_calls: u32,
    pub resume_calls: u32,
    pub finished: bool,
}

pub(crate) struct MockClipRecorder {
    state: Arc<Mutex<ClipState>>,
    mime: String,
}

impl MockClipRecorder {
    pub fn new() -> Self {
        Self::with_mime("video/webm")
    }

    pub fn with_mime(mime: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClipState::default())),
            mime: mime.to_string(),
        }
    }

    pub fn state(&self) -> Arc<Mutex<ClipState>> {
        self.state.clone()
    }
}

impl ClipRecorder for MockClipRecorder {
    fn write_frame(&mut self, _frame: &FrameBuffer) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.finished {
            return Err(RecorderError::Generic("Recorder already finished".to_string()));
        }
        if !state.paused {
            state.frames_written += 1;
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.paused = true;
        state.pause_calls += 1;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.paused = false;
        state.resume_calls += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        if state.finished {
            return Err(RecorderError::Generic("Recorder already finished".to_string()));
        }
        state.finished = true;
        // A streamed clip without duration metadata, as real incremental
        // recorders produce.
        Ok(crate::processing::webm::tests::synth_streamed_clip())
    }

    fn mime_type(&self) -> &str {
        &self.mime
    }
}

#[derive(Debug, Default)]
pub(crate) struct NativeState {
    pub started: bool,
    pub pause_calls: u32,
    pub resume_calls: u32,
    pub stop_calls: u32,
}

pub(crate) struct MockNativeCapture {
    state: Mutex<NativeState>,
    fail_stop: Mutex<bool>,
    output_path: PathBuf,
}

impl MockNativeCapture {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NativeState::default()),
            fail_stop: Mutex::new(false),
            output_path: PathBuf::from("mock-capture.mp4"),
        }
    }

    pub fn set_fail_stop(&self, fail: bool) {
        *self.fail_stop.lock().unwrap() = fail;
    }

    pub fn snapshot(&self) -> NativeState {
        let state = self.state.lock().unwrap();
        NativeState {
            started: state.started,
            pause_calls: state.pause_calls,
            resume_calls: state.resume_calls,
            stop_calls: state.stop_calls,
        }
    }
}

impl NativeCapture for MockNativeCapture {
    fn start(&self, _display_id: &str, _region: Region, _fps: u32) -> Result<()> {
        self.state.lock().unwrap().started = true;
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.state.lock().unwrap().pause_calls += 1;
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.state.lock().unwrap().resume_calls += 1;
        Ok(())
    }

    fn stop(&self) -> Result<PathBuf> {
        self.state.lock().unwrap().stop_calls += 1;
        if *self.fail_stop.lock().unwrap() {
            return Err(RecorderError::Finalization(
                "native completion callback reported failure".to_string(),
            ));
        }
        Ok(self.output_path.clone())
    }
}
