//! Playback of mono WAV files to an audio sink.

use crate::collector::wav::{WavClip, WavError};
use crate::core::cancel::CancellationToken;
use crate::transmitter::sink::{AudioSink, SinkError};
use std::path::Path;

/// Stream a mono WAV file to `sink` in blocks of `block_size` samples.
///
/// Stops early if `token` is cancelled. Returns the number of samples
/// written. Files that are not mono fail before anything is played.
pub fn play_wav<S: AudioSink>(
    path: impl AsRef<Path>,
    sink: &mut S,
    block_size: usize,
    expected_sample_rate: u32,
    token: &CancellationToken,
) -> Result<u64, PlaybackError> {
    let clip = WavClip::open(path).map_err(PlaybackError::Wav)?;
    if clip.sample_rate != expected_sample_rate {
        tracing::warn!(
            file_rate = clip.sample_rate,
            output_rate = expected_sample_rate,
            "WAV sample rate differs from output rate, playback speed will be off"
        );
    }

    let mut written = 0u64;
    for block in clip.samples.chunks(block_size.max(1)) {
        if token.is_cancelled() {
            break;
        }
        sink.write(block).map_err(PlaybackError::Sink)?;
        written += block.len() as u64;
    }
    Ok(written)
}

/// Playback errors.
#[derive(Debug)]
pub enum PlaybackError {
    Wav(WavError),
    Sink(SinkError),
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::Wav(e) => write!(f, "{e}"),
            PlaybackError::Sink(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PlaybackError {}
