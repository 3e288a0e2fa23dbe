use crate::types::Region;

/// A physical display as reported by the platform.
#[derive(Debug, Clone)]
pub struct DisplayInfo {
    pub id: String,
    pub bounds: Region,
    pub scale_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Screen,
    Window,
}

/// One OS-level capture source. The platform reports screens and windows in a
/// single list whose screen entries follow the same relative order as the
/// display list; index matching between the two lists relies on that order
/// being preserved end to end.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub id: String,
    pub kind: SourceKind,
    pub title: String,
}

impl SourceInfo {
    pub fn screen(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Screen,
            title: title.into(),
        }
    }

    pub fn window(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Window,
            title: title.into(),
        }
    }
}

/// An audio input endpoint as reported by the platform.
#[derive(Debug, Clone)]
pub struct AudioInputInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Standard constraints passed through to the platform when opening an audio
/// input.
#[derive(Debug, Clone)]
pub struct AudioConstraints {
    pub device_id: Option<String>,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            device_id: None,
            channel_count: 2,
            sample_rate: 44_100,
            echo_cancellation: false,
            noise_suppression: false,
        }
    }
}

/// Liveness events emitted by an acquired display stream. Either one routes
/// into the same recovery path as a detected freeze.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Inactive,
    TrackEnded,
}

/// Parameters for a platform clip recorder (the fallback-path encoder).
#[derive(Debug, Clone)]
pub struct ClipRecorderOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub mime_type: String,
    pub video_bits_per_second: u64,
}
