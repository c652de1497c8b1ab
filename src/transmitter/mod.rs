//! Audio output: the emitted sonar tone and WAV playback.

pub mod playback;
pub mod sink;
pub mod tone;

#[cfg(feature = "device")]
pub mod device;

pub use playback::{play_wav, PlaybackError};
pub use sink::{channel_sink, AudioSink, ChannelSink, NullSink, SinkError};
pub use tone::ToneGenerator;

#[cfg(feature = "device")]
pub use device::{DeviceError, DeviceOutput};

use crate::core::cancel::CancellationToken;
use std::time::Duration;

/// Writes generated tones to a sink until told to stop.
pub struct Transmitter<S: AudioSink> {
    sink: S,
    sample_rate: u32,
    amplitude: f32,
    block_size: usize,
}

impl<S: AudioSink> Transmitter<S> {
    pub fn new(sink: S, sample_rate: u32, amplitude: f32, block_size: usize) -> Self {
        Self {
            sink,
            sample_rate,
            amplitude,
            block_size: block_size.max(1),
        }
    }

    /// Emit a continuous sine at `freq` until `token` is cancelled.
    pub fn emit_constant(&mut self, freq: f32, token: &CancellationToken) -> Result<u64, SinkError> {
        let tone = ToneGenerator::constant(freq, self.sample_rate, self.amplitude);
        self.emit(tone, token)
    }

    /// Emit one linear sweep from `low_freq` to `high_freq` over `duration`.
    pub fn emit_sweep(
        &mut self,
        low_freq: f32,
        high_freq: f32,
        duration: Duration,
        token: &CancellationToken,
    ) -> Result<u64, SinkError> {
        let tone = ToneGenerator::sweep(low_freq, high_freq, duration, self.sample_rate, self.amplitude);
        self.emit(tone, token)
    }

    /// Stream `tone` block by block. Returns the number of samples written.
    pub fn emit(&mut self, mut tone: ToneGenerator, token: &CancellationToken) -> Result<u64, SinkError> {
        let mut block = vec![0.0f32; self.block_size];
        let mut written = 0u64;

        while !token.is_cancelled() {
            let n = tone.fill(&mut block);
            if n == 0 {
                break;
            }
            self.sink.write(&block[..n])?;
            written += n as u64;
        }

        tracing::debug!(samples = written, "Tone emission stopped");
        Ok(written)
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
