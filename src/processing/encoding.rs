use crate::bridge::CapturePlatform;
use log::{debug, info};
use std::fmt;

/// Requested output quality for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityTier {
    /// Keep the region's own resolution.
    #[default]
    Auto,
    P480,
    P720,
    P1080,
}

impl QualityTier {
    /// Bounding box frames are scaled into, `None` for pass-through.
    pub fn target_dimensions(&self) -> Option<(u32, u32)> {
        match self {
            QualityTier::Auto => None,
            QualityTier::P480 => Some((854, 480)),
            QualityTier::P720 => Some((1280, 720)),
            QualityTier::P1080 => Some((1920, 1080)),
        }
    }

    /// Scale `(width, height)` into this tier's box preserving aspect ratio.
    /// The limiting dimension is picked by comparing the source aspect ratio
    /// to the target box aspect ratio.
    pub fn scaled_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let Some((target_w, target_h)) = self.target_dimensions() else {
            return (width, height);
        };
        if width <= target_w && height <= target_h {
            return (width, height);
        }

        let source_ratio = width as f64 / height.max(1) as f64;
        let target_ratio = target_w as f64 / target_h as f64;

        if source_ratio > target_ratio {
            // Wider than the box, width limits.
            let scaled_h = (target_w as f64 / source_ratio).round() as u32;
            (target_w, scaled_h.max(1))
        } else {
            let scaled_w = (target_h as f64 * source_ratio).round() as u32;
            (scaled_w.max(1), target_h)
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::Auto => write!(f, "auto"),
            QualityTier::P480 => write!(f, "480p"),
            QualityTier::P720 => write!(f, "720p"),
            QualityTier::P1080 => write!(f, "1080p"),
        }
    }
}

/// Quality dial presets for the bitrate formula, in bits per pixel per frame.
pub const BITS_PER_PIXEL_ECONOMY: f64 = 0.04;
pub const BITS_PER_PIXEL_DEFAULT: f64 = 0.08;
pub const BITS_PER_PIXEL_PREMIUM: f64 = 0.10;

/// Target video bitrate in bits per second.
pub fn video_bitrate(width: u32, height: u32, fps: u32, bits_per_pixel: f64) -> u64 {
    (width as f64 * height as f64 * fps as f64 * bits_per_pixel).round() as u64
}

/// Derived audio encoding parameters for a quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioEncodingConfig {
    pub channels: u16,
    pub bits_per_second: u32,
}

impl AudioEncodingConfig {
    pub fn label(&self) -> String {
        format!("{}kbps", self.bits_per_second / 1000)
    }
}

/// Total, deterministic tier mapping. `Auto` and anything above 720p use the
/// full-quality configuration.
pub fn audio_encoding_for(tier: QualityTier) -> AudioEncodingConfig {
    match tier {
        QualityTier::P480 => AudioEncodingConfig {
            channels: 1,
            bits_per_second: 32_000,
        },
        QualityTier::P720 => AudioEncodingConfig {
            channels: 2,
            bits_per_second: 64_000,
        },
        QualityTier::P1080 | QualityTier::Auto => AudioEncodingConfig {
            channels: 2,
            bits_per_second: 128_000,
        },
    }
}

/// Below this frame rate some encoders drop frames badly, so the preference
/// order flips to the codec that tolerates sparse input.
pub const LOW_FPS_THRESHOLD: u32 = 24;

const LOW_FPS_CANDIDATES: [&str; 4] = [
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8",
    "video/webm;codecs=h264",
    "video/webm",
];

const STANDARD_CANDIDATES: [&str; 4] = [
    "video/webm;codecs=h264",
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8",
    "video/webm",
];

/// Ordered codec candidates for a frame rate. The final entry is the
/// guaranteed-supported baseline.
pub fn codec_candidates(fps: u32) -> &'static [&'static str] {
    if fps < LOW_FPS_THRESHOLD {
        &LOW_FPS_CANDIDATES
    } else {
        &STANDARD_CANDIDATES
    }
}

/// Walk the candidate list against the platform's encoder support and return
/// the first match, falling back to the baseline container type.
pub fn select_codec(platform: &dyn CapturePlatform, fps: u32) -> String {
    for candidate in codec_candidates(fps) {
        if platform.supports_mime_type(candidate) {
            info!("Selected codec {} for {} fps", candidate, fps);
            return candidate.to_string();
        }
        debug!("Codec {} not supported, trying next candidate", candidate);
    }
    info!("No candidate codec supported, using baseline video/webm");
    "video/webm".to_string()
}
