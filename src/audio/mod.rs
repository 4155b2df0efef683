//! Audio capture module using cpal for cross-platform microphone access
//!
//! Captures audio from the default input device, downmixes to mono, and
//! resamples to the realtime service rate (24kHz PCM).

mod resampler;
mod types;

pub use types::{AudioChunk, AudioError, CaptureHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use resampler::SampleSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Sample rate expected by the realtime transcription service (24kHz)
pub const CAPTURE_SAMPLE_RATE: u32 = 24000;

/// Capacity of the chunk channel (100ms per chunk, ~40 seconds of backlog)
const CHUNK_CHANNEL_CAPACITY: usize = 400;

/// Start audio capture on a dedicated thread
///
/// Resolves the default input device and configuration synchronously, so a
/// missing or unusable microphone fails here rather than after the stream
/// thread has started. Captured audio is resampled to
/// [`CAPTURE_SAMPLE_RATE`] mono PCM.
///
/// # Returns
/// A tuple containing:
/// - `CaptureHandle` - Used to stop capture and check status
/// - `mpsc::Receiver<AudioChunk>` - Receives audio chunks for the transport
///
/// # Errors
/// Returns `AudioError` if no input device is available or the device
/// configuration is unsupported.
pub fn start_capture() -> Result<(CaptureHandle, mpsc::Receiver<AudioChunk>), AudioError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio input device: {}", device_name);

    let (config, sample_format) = select_input_config(&device)?;
    info!(
        "Audio config: {} channels, {} Hz, {:?}",
        config.channels, config.sample_rate.0, sample_format
    );

    let active = Arc::new(AtomicBool::new(true));
    let active_thread = active.clone();

    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

    // The cpal stream is built on its own thread: Stream is not Send.
    let thread_handle = thread::spawn(move || {
        if let Err(e) = run_capture(device, config, sample_format, active_thread, chunk_tx) {
            error!("Audio capture error: {}", e);
        }
    });

    let handle = CaptureHandle {
        active,
        thread_handle: Some(thread_handle),
    };

    Ok((handle, chunk_rx))
}

/// Pick an input configuration, preferring one that supports the target rate
/// natively so no resampling is needed.
fn select_input_config(device: &Device) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let supported_configs = device
        .supported_input_configs()
        .map_err(|e| AudioError::Config(e.to_string()))?;

    let mut best_config = None;
    let mut found_target_rate = false;

    for config in supported_configs {
        if config.channels() == 0 {
            continue;
        }
        if config.min_sample_rate().0 <= CAPTURE_SAMPLE_RATE
            && config.max_sample_rate().0 >= CAPTURE_SAMPLE_RATE
        {
            best_config = Some(config.with_sample_rate(cpal::SampleRate(CAPTURE_SAMPLE_RATE)));
            found_target_rate = true;
            break;
        } else if best_config.is_none() {
            best_config = Some(config.with_max_sample_rate());
        }
    }

    let supported_config = best_config.ok_or(AudioError::NoSupportedConfig)?;

    if !found_target_rate {
        warn!(
            "{}Hz not supported, capturing at {}Hz and resampling",
            CAPTURE_SAMPLE_RATE,
            supported_config.sample_rate().0
        );
    }

    let sample_format = supported_config.sample_format();
    Ok((supported_config.into(), sample_format))
}

/// Run audio capture on the current thread (blocking)
fn run_capture(
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    active: Arc<AtomicBool>,
    chunk_tx: mpsc::Sender<AudioChunk>,
) -> Result<(), AudioError> {
    let channels = config.channels as usize;

    let mut sink = SampleSink::new(config.sample_rate.0, channels, chunk_tx)
        .map_err(|e| AudioError::Config(e.to_string()))?;

    let err_callback = |err| {
        error!("Audio stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::I16 => {
            let active_stream = active.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    if !active_stream.load(Ordering::SeqCst) {
                        return;
                    }
                    sink.push(data);
                },
                err_callback,
                None,
            )?
        }
        SampleFormat::F32 => {
            let active_stream = active.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    if !active_stream.load(Ordering::SeqCst) {
                        return;
                    }
                    let samples: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                        .collect();
                    sink.push(&samples);
                },
                err_callback,
                None,
            )?
        }
        other => {
            return Err(AudioError::UnsupportedFormat(format!("{:?}", other)));
        }
    };

    stream.play()?;
    info!("Audio capture started");

    // Keep the stream alive until capture is stopped
    while active.load(Ordering::SeqCst) {
        thread::sleep(std::time::Duration::from_millis(100));
    }

    drop(stream);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_capture_creation() {
        // Passes with or without a microphone: machines with one exercise
        // the live path, CI takes the NoInputDevice branch.
        match start_capture() {
            Ok((mut handle, _rx)) => {
                assert!(handle.is_active());
                handle.stop();
                assert!(!handle.is_active());
            }
            Err(AudioError::NoInputDevice) => {
                println!("No audio input device available (expected in CI)");
            }
            Err(e) => {
                panic!("Unexpected error: {}", e);
            }
        }
    }
}
