use crate::bridge::{AudioConstraints, AudioStream, CapturePlatform, ChunkPoll};
use crate::device::{find_audio_input, find_loopback_device};
use crate::error::{RecorderError, Result};
use crate::types::AudioStreamSpec;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

// Samplerate API imports
use libsamplerate::{src_delete, src_new, src_process, SRC_DATA, SRC_SINC_BEST_QUALITY};

/// Worker cadence for the mixing graph.
const MIX_INTERVAL: Duration = Duration::from_millis(10);

/// Open a microphone stream. `None` is a soft failure: the caller decides
/// whether a missing microphone is fatal.
pub fn create_microphone_stream(
    platform: &Arc<dyn CapturePlatform>,
    device_id: Option<&str>,
    channel_count: u16,
) -> Option<AudioStream> {
    // Resolve the requested device against the enumeration; an unknown id
    // falls through to the platform default rather than failing the session.
    let resolved = match find_audio_input(platform.as_ref(), device_id) {
        Ok(device) => device.map(|d| d.id),
        Err(e) => {
            warn!("Audio input enumeration failed, passing device id through: {}", e);
            device_id.map(|id| id.to_string())
        }
    };

    let constraints = AudioConstraints {
        device_id: resolved,
        channel_count,
        echo_cancellation: true,
        noise_suppression: true,
        ..AudioConstraints::default()
    };

    match platform.open_audio_input(&constraints) {
        Ok(stream) => {
            info!(
                "Microphone stream opened (device {:?}, {} ch @ {} Hz)",
                device_id,
                stream.spec().channels,
                stream.spec().sample_rate
            );
            Some(stream)
        }
        Err(e) => {
            warn!("Could not open microphone (device {:?}): {}", device_id, e);
            None
        }
    }
}

/// Open the system-audio loopback stream. Desktop audio rides on a virtual
/// loopback input device; when no such device exists that absence is reported
/// here, never thrown.
pub fn create_desktop_audio_stream(
    platform: &Arc<dyn CapturePlatform>,
    channel_count: u16,
) -> Option<AudioStream> {
    let device = match find_loopback_device(platform.as_ref()) {
        Some(device) => device,
        None => {
            warn!("No virtual loopback input device found, desktop audio unavailable");
            return None;
        }
    };

    let constraints = AudioConstraints {
        device_id: Some(device.id.clone()),
        channel_count,
        echo_cancellation: false,
        noise_suppression: false,
        ..AudioConstraints::default()
    };

    match platform.open_audio_input(&constraints) {
        Ok(stream) => {
            info!("Desktop audio stream opened via loopback device '{}'", device.name);
            Some(stream)
        }
        Err(e) => {
            warn!("Could not open loopback device '{}': {}", device.name, e);
            None
        }
    }
}

/// A combined stream plus the explicit teardown of its mixing graph.
pub struct MixedAudio {
    pub stream: AudioStream,
    pub cleanup: MixerCleanup,
}

/// Handle on the mixing worker. Mixing graphs are a limited resource, so
/// skipping `cleanup` is a leak, not merely untidy.
pub struct MixerCleanup {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MixerCleanup {
    /// Disconnect every input, stop the worker and release the graph.
    pub fn cleanup(mut self) {
        self.run_cleanup();
    }

    fn run_cleanup(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Audio mixing worker panicked during cleanup");
            }
        }
    }
}

impl Drop for MixerCleanup {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!("Mixing graph dropped without explicit cleanup");
            self.run_cleanup();
        }
    }
}

/// Mix two or more audio streams into one.
///
/// The output runs at the highest input sample rate and channel count;
/// mismatched inputs are resampled and up/down-mixed on the way in. Inputs
/// that end early fall silent instead of stalling the mix.
pub fn combine_audio_streams(streams: Vec<AudioStream>) -> Result<MixedAudio> {
    if streams.len() < 2 {
        return Err(RecorderError::Generic(format!(
            "Audio mixing needs at least 2 streams, got {}",
            streams.len()
        )));
    }

    let target_rate = streams.iter().map(|s| s.spec().sample_rate).max().unwrap_or(44_100);
    let target_channels = streams.iter().map(|s| s.spec().channels).max().unwrap_or(2).min(2);
    info!(
        "Combining {} audio streams into {} ch @ {} Hz",
        streams.len(),
        target_channels,
        target_rate
    );

    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = stop.clone();
    let (tx, rx) = channel::<Vec<f32>>();

    let worker = std::thread::spawn(move || {
        let mut inputs: Vec<MixerInput> = streams
            .into_iter()
            .map(|stream| MixerInput {
                stream,
                pending: Vec::new(),
                finished: false,
            })
            .collect();

        loop {
            if worker_stop.load(Ordering::Relaxed) {
                break;
            }

            for input in inputs.iter_mut() {
                if input.finished {
                    continue;
                }
                loop {
                    match input.stream.poll_chunk() {
                        ChunkPoll::Chunk(chunk) => {
                            let spec = input.stream.spec();
                            let converted =
                                convert_channels(&chunk, spec.channels, target_channels);
                            let resampled = if spec.sample_rate != target_rate {
                                resample_chunk(
                                    &converted,
                                    target_channels,
                                    spec.sample_rate,
                                    target_rate,
                                )
                            } else {
                                converted
                            };
                            input.pending.extend(resampled);
                        }
                        ChunkPoll::Empty => break,
                        ChunkPoll::Finished => {
                            debug!("Mixer input ended");
                            input.finished = true;
                            break;
                        }
                    }
                }
            }

            let all_done = inputs.iter().all(|i| i.finished && i.pending.is_empty());
            if all_done {
                break;
            }

            // Mix as far as every still-running input can cover; once all
            // inputs have ended, flush whatever is left.
            let ready = inputs
                .iter()
                .filter(|i| !i.finished)
                .map(|i| i.pending.len())
                .min()
                .unwrap_or_else(|| inputs.iter().map(|i| i.pending.len()).max().unwrap_or(0));

            if ready > 0 {
                let mixed = mix_pending(&mut inputs, ready);
                if tx.send(mixed).is_err() {
                    debug!("Mixed stream receiver hung up, stopping mixer");
                    break;
                }
            }

            std::thread::sleep(MIX_INTERVAL);
        }

        // Inputs are OS tracks; stop each one explicitly.
        for input in inputs.iter_mut() {
            input.stream.stop();
        }
        debug!("Audio mixing worker exited");
    });

    let spec = AudioStreamSpec::new(target_rate, target_channels);
    let stream_stop = stop.clone();
    let stream = AudioStream::new(rx, spec, move || {
        stream_stop.store(true, Ordering::Relaxed);
    });

    Ok(MixedAudio {
        stream,
        cleanup: MixerCleanup {
            stop,
            worker: Some(worker),
        },
    })
}

struct MixerInput {
    stream: AudioStream,
    pending: Vec<f32>,
    finished: bool,
}

/// Sum `count` samples from every input that still has data, clamped to the
/// valid range. Finished inputs contribute silence.
fn mix_pending(inputs: &mut [MixerInput], count: usize) -> Vec<f32> {
    let mut mixed = vec![0.0f32; count];
    for input in inputs.iter_mut() {
        let take = count.min(input.pending.len());
        for (i, sample) in input.pending.drain(..take).enumerate() {
            mixed[i] += sample;
        }
    }
    for sample in mixed.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
    mixed
}

/// Up- or down-mix interleaved samples between mono and stereo.
fn convert_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    match (from, to) {
        (from, to) if from == to => samples.to_vec(),
        (1, 2) => samples.iter().flat_map(|&s| [s, s]).collect(),
        (2, 1) => samples
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) * 0.5)
            .collect(),
        (from, to) => {
            warn!("Unsupported channel conversion {} -> {}, passing through", from, to);
            samples.to_vec()
        }
    }
}

/// One-shot sinc resampling of an interleaved chunk. Falls back to the input
/// unchanged when the resampler cannot be created.
fn resample_chunk(input: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == to_rate {
        return input.to_vec();
    }

    let src_ratio = to_rate as f64 / from_rate as f64;
    let input_frames = input.len() / channels.max(1) as usize;
    let output_frames = (input_frames as f64 * src_ratio).ceil() as usize + 8;
    let mut output = vec![0.0f32; output_frames * channels as usize];

    let mut src_data = SRC_DATA {
        data_in: input.as_ptr(),
        data_out: output.as_mut_ptr(),
        input_frames: input_frames as _,
        output_frames: output_frames as _,
        input_frames_used: 0,
        output_frames_gen: 0,
        end_of_input: 1, // One chunk per call
        src_ratio,
    };

    unsafe {
        let mut error = 0;
        let state = src_new(SRC_SINC_BEST_QUALITY as i32, channels as i32, &mut error);
        if state.is_null() {
            warn!("Failed to create resampler, error code: {}", error);
            return input.to_vec();
        }

        let error = src_process(state, &mut src_data);
        src_delete(state);

        if error != 0 {
            warn!("Resampling failed with error code: {}", error);
            return input.to_vec();
        }
    }

    output.truncate(src_data.output_frames_gen as usize * channels as usize);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Sender;

    fn test_stream(spec: AudioStreamSpec) -> (Sender<Vec<f32>>, AudioStream) {
        let (tx, rx) = channel();
        (tx, AudioStream::new(rx, spec, || {}))
    }

    #[test]
    fn channel_conversion_round_trips() {
        assert_eq!(convert_channels(&[0.5, -0.5], 1, 2), vec![0.5, 0.5, -0.5, -0.5]);
        assert_eq!(convert_channels(&[0.4, 0.2], 2, 1), vec![0.3]);
        assert_eq!(convert_channels(&[0.1, 0.2], 2, 2), vec![0.1, 0.2]);
    }

    #[test]
    fn mixing_sums_and_clamps() {
        let mut inputs = vec![
            MixerInput {
                stream: test_stream(AudioStreamSpec::new(44_100, 1)).1,
                pending: vec![0.8, 0.5, -0.9],
                finished: false,
            },
            MixerInput {
                stream: test_stream(AudioStreamSpec::new(44_100, 1)).1,
                pending: vec![0.8, -0.2, -0.9],
                finished: false,
            },
        ];

        let mixed = mix_pending(&mut inputs, 3);
        assert_eq!(mixed, vec![1.0, 0.3, -1.0]);
        assert!(inputs.iter().all(|i| i.pending.is_empty()));
    }

    #[test]
    fn combine_rejects_single_stream() {
        let (_tx, stream) = test_stream(AudioStreamSpec::new(44_100, 2));
        assert!(combine_audio_streams(vec![stream]).is_err());
    }

    #[test]
    fn combined_stream_mixes_two_inputs() {
        let (tx_a, a) = test_stream(AudioStreamSpec::new(48_000, 2));
        let (tx_b, b) = test_stream(AudioStreamSpec::new(48_000, 2));

        let mixed = combine_audio_streams(vec![a, b]).unwrap();
        assert_eq!(mixed.stream.spec(), AudioStreamSpec::new(48_000, 2));

        tx_a.send(vec![0.25, 0.25, 0.25, 0.25]).unwrap();
        tx_b.send(vec![0.5, 0.5, 0.5, 0.5]).unwrap();

        let chunk = mixed
            .stream
            .chunk_timeout(Duration::from_secs(2))
            .expect("mixed chunk should arrive");
        assert!(chunk.iter().all(|&s| (s - 0.75).abs() < 1e-6));

        drop(tx_a);
        drop(tx_b);
        mixed.cleanup.cleanup();
    }

    #[test]
    fn mono_input_is_upmixed_into_the_stereo_target() {
        let (tx_mic, mic) = test_stream(AudioStreamSpec::new(44_100, 1));
        let (tx_sys, sys) = test_stream(AudioStreamSpec::new(44_100, 2));

        let mixed = combine_audio_streams(vec![mic, sys]).unwrap();
        assert_eq!(mixed.stream.spec().channels, 2);

        tx_mic.send(vec![0.5, 0.5]).unwrap();
        tx_sys.send(vec![0.1, 0.2, 0.1, 0.2]).unwrap();

        let chunk = mixed
            .stream
            .chunk_timeout(Duration::from_secs(2))
            .expect("mixed chunk should arrive");
        assert_eq!(chunk.len(), 4);
        assert!((chunk[0] - 0.6).abs() < 1e-6);
        assert!((chunk[1] - 0.7).abs() < 1e-6);

        drop(tx_mic);
        drop(tx_sys);
        mixed.cleanup.cleanup();
    }
}
