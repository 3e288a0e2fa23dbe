use crate::bridge::{AudioInputInfo, CapturePlatform};
use crate::error::Result;
use log::{debug, info};

/// Name fragments that identify virtual loopback input devices across the
/// platforms we care about.
const LOOPBACK_NAME_HINTS: [&str; 6] = [
    "stereo mix",
    "loopback",
    "blackhole",
    "soundflower",
    "cable output",
    "monitor of",
];

/// Enumerate all available audio input devices.
pub fn enumerate_audio_input_devices(platform: &dyn CapturePlatform) -> Result<Vec<AudioInputInfo>> {
    platform.enumerate_audio_inputs()
}

/// Resolve a requested device id against the enumeration, falling back to the
/// platform default input when the id is absent or unknown.
pub fn find_audio_input(
    platform: &dyn CapturePlatform,
    device_id: Option<&str>,
) -> Result<Option<AudioInputInfo>> {
    let devices = platform.enumerate_audio_inputs()?;

    if let Some(wanted) = device_id {
        if let Some(device) = devices.iter().find(|d| d.id == wanted) {
            info!("Resolved requested audio input '{}' ({})", device.name, device.id);
            return Ok(Some(device.clone()));
        }
        debug!("Requested audio input {} not present, using default", wanted);
    }

    Ok(devices.into_iter().find(|d| d.is_default))
}

/// Locate the virtual loopback device that carries desktop audio. Absence is
/// an `Option`, not an error; the caller reports it.
pub fn find_loopback_device(platform: &dyn CapturePlatform) -> Option<AudioInputInfo> {
    let devices = match platform.enumerate_audio_inputs() {
        Ok(devices) => devices,
        Err(e) => {
            debug!("Audio input enumeration failed while looking for loopback: {}", e);
            return None;
        }
    };

    devices.into_iter().find(|device| {
        let name = device.name.to_lowercase();
        LOOPBACK_NAME_HINTS.iter().any(|hint| name.contains(hint))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockPlatform;

    fn input(id: &str, name: &str, is_default: bool) -> AudioInputInfo {
        AudioInputInfo {
            id: id.to_string(),
            name: name.to_string(),
            is_default,
        }
    }

    #[test]
    fn loopback_matches_by_name_case_insensitively() {
        let platform = MockPlatform::with_displays(&[]);
        platform.set_audio_inputs(vec![
            input("mic0", "Built-in Microphone", true),
            input("vb0", "BlackHole 2ch", false),
        ]);

        let device = find_loopback_device(&platform).unwrap();
        assert_eq!(device.id, "vb0");
    }

    #[test]
    fn loopback_absence_is_reported_not_thrown() {
        let platform = MockPlatform::with_displays(&[]);
        platform.set_audio_inputs(vec![input("mic0", "Built-in Microphone", true)]);
        assert!(find_loopback_device(&platform).is_none());
    }

    #[test]
    fn unknown_requested_input_falls_back_to_default() {
        let platform = MockPlatform::with_displays(&[]);
        platform.set_audio_inputs(vec![
            input("mic0", "Built-in Microphone", true),
            input("mic1", "USB Microphone", false),
        ]);

        let device = find_audio_input(&platform, Some("gone")).unwrap().unwrap();
        assert_eq!(device.id, "mic0");

        let device = find_audio_input(&platform, Some("mic1")).unwrap().unwrap();
        assert_eq!(device.id, "mic1");
    }
}
