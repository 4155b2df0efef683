//! Audio types and error definitions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// Audio chunk ready for encoding onto the outbound media track
///
/// Contains PCM audio already resampled to the realtime service rate.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// PCM 16-bit signed samples (mono)
    pub samples: Vec<i16>,
    /// Sample rate in Hz (24000 after resampling)
    pub sample_rate: u32,
}

/// Handle for controlling audio capture from outside the capture thread
///
/// Dropping the handle releases the microphone: the capture thread observes
/// the cleared flag and tears the stream down on its own.
pub struct CaptureHandle {
    pub(crate) active: Arc<AtomicBool>,
    pub(crate) thread_handle: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stop capturing and wait for the capture thread to exit. Idempotent.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            info!("Audio capture stopped");
        }
    }

    /// Check if the microphone stream is still running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        // No join here: drop may run on an async worker thread.
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Errors that can occur during audio capture
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("No supported audio configuration found")]
    NoSupportedConfig,

    #[error("Audio configuration error: {0}")]
    Config(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio stream error: {0}")]
    Stream(#[from] cpal::BuildStreamError),

    #[error("Audio play error: {0}")]
    Play(#[from] cpal::PlayStreamError),
}
