use crate::bridge::AudioStream;
use crate::error::{RecorderError, Result};
use crate::processing::encoding::AudioEncodingConfig;
use log::{debug, info, warn};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll cadence of the capture worker.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// Records an audio stream into an in-memory WAV artifact, in parallel with
/// the video session. Pausing discards incoming samples instead of tearing
/// down the stream, so resume is instant.
pub struct AudioRecorder {
    recording: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<Vec<u8>>>>,
    config: AudioEncodingConfig,
}

impl AudioRecorder {
    pub fn start(mut stream: AudioStream, config: AudioEncodingConfig) -> Self {
        let spec = stream.spec();
        let recording = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));
        let worker_recording = recording.clone();
        let worker_stop = stop.clone();

        info!(
            "Starting audio recorder ({} ch @ {} Hz, {})",
            config.channels,
            spec.sample_rate,
            config.label()
        );

        let worker = std::thread::spawn(move || {
            let wav_spec = hound::WavSpec {
                channels: config.channels,
                sample_rate: spec.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut cursor = Cursor::new(Vec::new());
            let mut writer = hound::WavWriter::new(&mut cursor, wav_spec)
                .map_err(|e| RecorderError::Generic(format!("Failed to create WAV writer: {}", e)))?;

            loop {
                if worker_stop.load(Ordering::Relaxed) {
                    break;
                }
                let chunk = match stream.chunk_timeout(RECV_TIMEOUT) {
                    Some(chunk) => Some(chunk),
                    // recv_timeout folds hangup and timeout together; poll to
                    // tell them apart without losing a late chunk.
                    None => match stream.poll_chunk() {
                        crate::bridge::ChunkPoll::Chunk(chunk) => Some(chunk),
                        crate::bridge::ChunkPoll::Empty => None,
                        crate::bridge::ChunkPoll::Finished => {
                            debug!("Audio stream ended before stop was requested");
                            break;
                        }
                    },
                };

                if let Some(chunk) = chunk {
                    if !worker_recording.load(Ordering::Relaxed) {
                        // Paused: samples are consumed and dropped.
                        continue;
                    }
                    let converted = convert_channel_count(&chunk, spec.channels, config.channels);
                    for sample in converted {
                        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        writer.write_sample(value).map_err(|e| {
                            RecorderError::Generic(format!("WAV write failed: {}", e))
                        })?;
                    }
                }
            }

            stream.stop();
            writer
                .finalize()
                .map_err(|e| RecorderError::Generic(format!("WAV finalize failed: {}", e)))?;
            Ok(cursor.into_inner())
        });

        Self {
            recording,
            stop,
            worker: Some(worker),
            config,
        }
    }

    pub fn config(&self) -> AudioEncodingConfig {
        self.config
    }

    pub fn is_recording(&self) -> bool {
        self.worker.is_some() && self.recording.load(Ordering::Relaxed)
    }

    pub fn pause(&self) {
        self.recording.store(false, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.recording.store(true, Ordering::Relaxed);
    }

    /// Stop and return the finished WAV bytes.
    pub fn stop(mut self) -> Result<Vec<u8>> {
        self.stop_worker()
    }

    fn stop_worker(&mut self) -> Result<Vec<u8>> {
        self.stop.store(true, Ordering::Relaxed);
        let Some(worker) = self.worker.take() else {
            return Err(RecorderError::RecorderAlreadyStopped);
        };
        worker
            .join()
            .map_err(|_| RecorderError::Generic("Audio recorder worker panicked".to_string()))?
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!("Audio recorder dropped without stop, discarding its artifact");
            let _ = self.stop_worker();
        }
    }
}

/// Match the stream's channel layout to the encoding config.
fn convert_channel_count(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    match (from, to) {
        (from, to) if from == to => samples.to_vec(),
        (1, 2) => samples.iter().flat_map(|&s| [s, s]).collect(),
        (2, 1) => samples
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) * 0.5)
            .collect(),
        _ => samples.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::encoding::{audio_encoding_for, QualityTier};
    use crate::types::AudioStreamSpec;
    use std::sync::mpsc::channel;

    fn wav_sample_count(bytes: &[u8], channels: u16) -> usize {
        let reader = hound::WavReader::new(Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(reader.spec().channels, channels);
        reader.len() as usize
    }

    #[test]
    fn records_pushed_chunks_into_a_wav() {
        let (tx, rx) = channel();
        let stream = AudioStream::new(rx, AudioStreamSpec::new(48_000, 2), || {});
        let recorder = AudioRecorder::start(stream, audio_encoding_for(QualityTier::P1080));

        tx.send(vec![0.1, 0.1, 0.2, 0.2]).unwrap();
        tx.send(vec![0.3, 0.3]).unwrap();
        // Give the worker a moment to drain before stopping.
        std::thread::sleep(Duration::from_millis(150));

        let bytes = recorder.stop().unwrap();
        assert_eq!(wav_sample_count(&bytes, 2), 6);
    }

    #[test]
    fn paused_samples_are_discarded() {
        let (tx, rx) = channel();
        let stream = AudioStream::new(rx, AudioStreamSpec::new(48_000, 2), || {});
        let recorder = AudioRecorder::start(stream, audio_encoding_for(QualityTier::P1080));

        tx.send(vec![0.1, 0.1]).unwrap();
        std::thread::sleep(Duration::from_millis(150));

        recorder.pause();
        assert!(!recorder.is_recording());
        tx.send(vec![0.2, 0.2, 0.2, 0.2]).unwrap();
        std::thread::sleep(Duration::from_millis(150));

        recorder.resume();
        tx.send(vec![0.3, 0.3]).unwrap();
        std::thread::sleep(Duration::from_millis(150));

        let bytes = recorder.stop().unwrap();
        // Only the unpaused chunks survive.
        assert_eq!(wav_sample_count(&bytes, 2), 4);
    }

    #[test]
    fn mono_config_downmixes_a_stereo_stream() {
        let (tx, rx) = channel();
        let stream = AudioStream::new(rx, AudioStreamSpec::new(44_100, 2), || {});
        let recorder = AudioRecorder::start(stream, audio_encoding_for(QualityTier::P480));

        tx.send(vec![0.2, 0.4, 0.2, 0.4]).unwrap();
        std::thread::sleep(Duration::from_millis(150));

        let bytes = recorder.stop().unwrap();
        assert_eq!(wav_sample_count(&bytes, 1), 2);
    }
}
