use crate::error::{RecorderError, Result};
use crate::processing::encoding::{QualityTier, BITS_PER_PIXEL_DEFAULT};
use crate::types::Region;
use std::time::Duration;

/// Everything the engine needs to know about one recording request. Built by
/// the host UI, immutable once recording starts.
#[derive(Clone)]
pub struct CaptureArea {
    // Video settings
    display_id: String,
    region: Region,
    scale_factor: f64,
    quality: QualityTier,
    fps: u32,
    bits_per_pixel: f64,

    // Audio settings
    capture_microphone: bool,
    microphone_device: Option<String>,
    capture_desktop_audio: bool,
    require_audio: bool,

    // Tuning
    stream_ready_timeout: Duration,
}

impl Default for CaptureArea {
    fn default() -> Self {
        Self {
            display_id: String::new(),
            region: Region::new(0, 0, 0, 0),
            scale_factor: 1.0,
            quality: QualityTier::Auto,
            fps: 30,
            bits_per_pixel: BITS_PER_PIXEL_DEFAULT,
            capture_microphone: false,
            microphone_device: None,
            capture_desktop_audio: false,
            require_audio: false,
            stream_ready_timeout: Duration::from_secs(5),
        }
    }
}

impl CaptureArea {
    pub fn builder() -> CaptureAreaBuilder {
        CaptureAreaBuilder::default()
    }

    // Getter methods
    pub fn display_id(&self) -> &str {
        &self.display_id
    }
    pub fn region(&self) -> Region {
        self.region
    }
    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }
    pub fn quality(&self) -> QualityTier {
        self.quality
    }
    pub fn fps(&self) -> u32 {
        self.fps
    }
    pub fn bits_per_pixel(&self) -> f64 {
        self.bits_per_pixel
    }
    pub fn capture_microphone(&self) -> bool {
        self.capture_microphone
    }
    pub fn microphone_device(&self) -> Option<&str> {
        self.microphone_device.as_deref()
    }
    pub fn capture_desktop_audio(&self) -> bool {
        self.capture_desktop_audio
    }
    pub fn require_audio(&self) -> bool {
        self.require_audio
    }
    pub fn stream_ready_timeout(&self) -> Duration {
        self.stream_ready_timeout
    }

    pub fn wants_audio(&self) -> bool {
        self.capture_microphone || self.capture_desktop_audio
    }

    /// Output dimensions after tier scaling of the physical-pixel region.
    pub fn output_dimensions(&self) -> (u32, u32) {
        let physical = self.region.scaled(self.scale_factor);
        self.quality.scaled_dimensions(physical.width, physical.height)
    }
}

#[derive(Default)]
pub struct CaptureAreaBuilder {
    area: CaptureArea,
}

impl CaptureAreaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display_id(mut self, id: impl Into<String>) -> Self {
        self.area.display_id = id.into();
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.area.region = region;
        self
    }

    pub fn scale_factor(mut self, scale_factor: f64) -> Self {
        self.area.scale_factor = scale_factor;
        self
    }

    pub fn quality(mut self, quality: QualityTier) -> Self {
        self.area.quality = quality;
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.area.fps = fps;
        self
    }

    pub fn bits_per_pixel(mut self, bits_per_pixel: f64) -> Self {
        self.area.bits_per_pixel = bits_per_pixel;
        self
    }

    pub fn capture_microphone(mut self, enabled: bool) -> Self {
        self.area.capture_microphone = enabled;
        self
    }

    pub fn microphone_device(mut self, device: impl Into<Option<String>>) -> Self {
        self.area.microphone_device = device.into();
        self
    }

    pub fn capture_desktop_audio(mut self, enabled: bool) -> Self {
        self.area.capture_desktop_audio = enabled;
        self
    }

    pub fn require_audio(mut self, required: bool) -> Self {
        self.area.require_audio = required;
        self
    }

    pub fn stream_ready_timeout(mut self, timeout: Duration) -> Self {
        self.area.stream_ready_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<CaptureArea> {
        if self.area.display_id.is_empty() {
            return Err(RecorderError::FailedToStart(
                "No display selected".to_string(),
            ));
        }
        if self.area.region.width == 0 || self.area.region.height == 0 {
            return Err(RecorderError::FailedToStart(format!(
                "Empty capture region {:?}",
                self.area.region
            )));
        }
        if self.area.fps == 0 {
            return Err(RecorderError::FailedToStart("fps must be positive".to_string()));
        }
        if self.area.scale_factor <= 0.0 {
            return Err(RecorderError::FailedToStart(format!(
                "Invalid scale factor {}",
                self.area.scale_factor
            )));
        }
        if self.area.require_audio && !self.area.wants_audio() {
            return Err(RecorderError::FailedToStart(
                "Audio required but no audio source requested".to_string(),
            ));
        }
        Ok(self.area)
    }
}
