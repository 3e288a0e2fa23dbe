// Private modules
mod capture;
mod device;
mod error;
mod logger;
mod processing;
mod recorder;
mod timeline;
mod types;

pub mod bridge;

pub use capture::freeze::FreezeDetector;
pub use capture::region::{backend_for, CaptureBackendKind, RegionStreamManager};
pub use capture::tracker::{ActiveSourceTracker, SourceSwitchCallback};
pub use device::audio::{enumerate_audio_input_devices, find_audio_input, find_loopback_device};
pub use error::{RecorderError, Result};
pub use logger::{setup_logger, LoggerConfig};
pub use processing::audio_mixer::{
    combine_audio_streams, create_desktop_audio_stream, create_microphone_stream, MixedAudio,
    MixerCleanup,
};
pub use processing::audio_recorder::AudioRecorder;
pub use processing::encoding::{
    audio_encoding_for, codec_candidates, select_codec, video_bitrate, AudioEncodingConfig,
    QualityTier, BITS_PER_PIXEL_DEFAULT, BITS_PER_PIXEL_ECONOMY, BITS_PER_PIXEL_PREMIUM,
    LOW_FPS_THRESHOLD,
};
pub use processing::webm::repair_duration;
pub use recorder::{
    CaptureArea, CaptureAreaBuilder, DurationMark, MarkToggle, PauseSource, Recorder,
    RecorderState, RecordingArtifact,
};
pub use timeline::{DebugSink, LogSink, NoopSink, SessionTimeline, TimelineEvent};
pub use types::{AudioStreamSpec, FrameBuffer, Region};
