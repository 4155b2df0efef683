//! Sample conversion: mono downmix, resampling, and chunk assembly

use super::types::AudioChunk;
use super::CAPTURE_SAMPLE_RATE;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Chunk size in samples (0.1 seconds of audio at 24kHz = 2400 samples)
pub(crate) const CHUNK_SIZE: usize = 2400;

/// Accumulates raw callback samples into fixed-size 24kHz mono chunks.
///
/// Owned by the cpal input callback, so every method must return quickly and
/// never block: full channels drop the chunk instead of waiting.
pub(crate) struct SampleSink {
    channels: usize,
    resampler: Option<SincFixedIn<f32>>,
    /// Native-rate samples waiting for a full resampler input frame
    input_buf: Vec<i16>,
    input_frames: usize,
    /// Target-rate samples waiting to fill a chunk
    output_buf: Vec<i16>,
    sender: mpsc::Sender<AudioChunk>,
    dropped_chunks: u64,
}

impl SampleSink {
    /// Build a sink converting from the device's native rate and channel
    /// count to mono `CAPTURE_SAMPLE_RATE` chunks.
    pub(crate) fn new(
        native_rate: u32,
        channels: usize,
        sender: mpsc::Sender<AudioChunk>,
    ) -> Result<Self, rubato::ResamplerConstructionError> {
        let (resampler, input_frames) = if native_rate != CAPTURE_SAMPLE_RATE {
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let input_frames = (CHUNK_SIZE as f64 * native_rate as f64
                / CAPTURE_SAMPLE_RATE as f64)
                .ceil() as usize;
            let resampler = SincFixedIn::<f32>::new(
                CAPTURE_SAMPLE_RATE as f64 / native_rate as f64,
                2.0,
                params,
                input_frames,
                1, // mono
            )?;
            (Some(resampler), input_frames)
        } else {
            (None, CHUNK_SIZE)
        };

        Ok(Self {
            channels,
            resampler,
            input_buf: Vec::with_capacity(input_frames * 2),
            input_frames,
            output_buf: Vec::with_capacity(CHUNK_SIZE * 2),
            sender,
            dropped_chunks: 0,
        })
    }

    /// Feed one callback's worth of interleaved samples.
    pub(crate) fn push(&mut self, data: &[i16]) {
        // Convert to mono by averaging channels
        if self.channels > 1 {
            let channels = self.channels;
            self.input_buf.extend(data.chunks(channels).map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            }));
        } else {
            self.input_buf.extend_from_slice(data);
        }

        if self.resampler.is_some() {
            self.resample_buffered();
        } else {
            self.output_buf.append(&mut self.input_buf);
        }

        self.flush_chunks();
    }

    /// Run complete input frames through the resampler.
    fn resample_buffered(&mut self) {
        while self.input_buf.len() >= self.input_frames {
            let frame: Vec<f32> = self
                .input_buf
                .drain(..self.input_frames)
                .map(|s| s as f32 / 32768.0)
                .collect();

            let resampler = match self.resampler.as_mut() {
                Some(r) => r,
                None => return,
            };
            match resampler.process(&[frame], None) {
                Ok(resampled) => {
                    self.output_buf.extend(
                        resampled[0]
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
                    );
                }
                Err(e) => {
                    error!("Resampling error: {}", e);
                }
            }
        }
    }

    /// Send every complete chunk without blocking the audio callback.
    fn flush_chunks(&mut self) {
        while self.output_buf.len() >= CHUNK_SIZE {
            let chunk: Vec<i16> = self.output_buf.drain(..CHUNK_SIZE).collect();
            let audio_chunk = AudioChunk {
                samples: chunk,
                sample_rate: CAPTURE_SAMPLE_RATE,
            };
            if self.sender.try_send(audio_chunk).is_err() {
                self.dropped_chunks += 1;
                warn!(
                    dropped = self.dropped_chunks,
                    "Audio buffer overflow - chunk dropped"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_chunking_at_target_rate() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut sink = SampleSink::new(CAPTURE_SAMPLE_RATE, 1, tx).unwrap();

        let data = vec![7i16; CHUNK_SIZE + 100];
        sink.push(&data);

        let chunk = rx.try_recv().expect("one full chunk");
        assert_eq!(chunk.samples.len(), CHUNK_SIZE);
        assert_eq!(chunk.sample_rate, CAPTURE_SAMPLE_RATE);
        assert!(rx.try_recv().is_err(), "remainder stays buffered");
    }

    #[test]
    fn test_stereo_downmix_averages_channels() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut sink = SampleSink::new(CAPTURE_SAMPLE_RATE, 2, tx).unwrap();

        // Interleaved L/R pairs averaging to 150
        let frame: Vec<i16> = [100i16, 200].repeat(CHUNK_SIZE);
        sink.push(&frame);

        let chunk = rx.try_recv().expect("one full chunk");
        assert!(chunk.samples.iter().all(|&s| s == 150));
    }

    #[test]
    fn test_resampled_chunks_are_target_rate() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut sink = SampleSink::new(48_000, 1, tx).unwrap();

        // Feed two seconds of silence at the native rate
        let data = vec![0i16; 4800];
        for _ in 0..20 {
            sink.push(&data);
        }

        let chunk = rx.try_recv().expect("resampled chunk");
        assert_eq!(chunk.samples.len(), CHUNK_SIZE);
        assert_eq!(chunk.sample_rate, CAPTURE_SAMPLE_RATE);
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let mut sink = SampleSink::new(CAPTURE_SAMPLE_RATE, 1, tx).unwrap();

        let data = vec![0i16; CHUNK_SIZE * 4];
        sink.push(&data);
        assert!(sink.dropped_chunks > 0);
    }
}
