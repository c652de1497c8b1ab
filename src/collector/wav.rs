//! WAV file input: loading mono clips and replaying them as sample batches.
//!
//! Replay feeds a recorded session through the same channel interface as a
//! live microphone, so detection can run offline.

use crate::collector::types::SampleBatch;
use crate::collector::CollectorError;
use crate::core::cancel::CancellationToken;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Channel count every clip must have.
pub const MONO: u16 = 1;

/// A decoded mono WAV file.
#[derive(Debug, Clone)]
pub struct WavClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl WavClip {
    /// Decode a WAV file, rejecting anything that is not mono.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WavError> {
        let reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        if spec.channels != MONO {
            return Err(WavError::ChannelMismatch {
                expected: MONO,
                found: spec.channels,
            });
        }

        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }
}

/// Write mono float samples to a WAV file.
pub fn write_mono(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<(), WavError> {
    let spec = hound::WavSpec {
        channels: MONO,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Capture batches from `input` into a mono WAV file at `path`.
///
/// Capture stops once `max_samples` are collected or the input closes.
/// Cancelling `token` stops it early; what was captured so far is still
/// written. Returns the number of samples written.
pub fn record_to_wav(
    input: &Receiver<SampleBatch>,
    path: impl AsRef<Path>,
    sample_rate: u32,
    max_samples: Option<usize>,
    poll: Duration,
    token: &CancellationToken,
) -> Result<usize, WavError> {
    let mut samples = Vec::new();
    loop {
        if token.is_cancelled() || max_samples.map_or(false, |max| samples.len() >= max) {
            break;
        }
        match input.recv_timeout(poll) {
            Ok(batch) => samples.extend_from_slice(batch.samples()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if let Some(max) = max_samples {
        samples.truncate(max);
    }

    write_mono(path.as_ref(), &samples, sample_rate)?;
    tracing::info!(samples = samples.len(), path = ?path.as_ref(), "Recording written");
    Ok(samples.len())
}

/// Options for replaying a clip.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Nominal samples per batch; actual batches vary around it
    pub batch_size: usize,
    /// Sleep between batches so replay runs at the clip's own pace
    pub realtime: bool,
    /// Batches buffered in the channel
    pub channel_capacity: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            realtime: false,
            channel_capacity: 64,
        }
    }
}

/// Replays a clip as irregular batches on a channel.
///
/// The channel closes when the clip ends, which workers treat as the end
/// of input.
pub struct WavCollector {
    clip: Arc<WavClip>,
    config: ReplayConfig,
    sender: Option<Sender<SampleBatch>>,
    receiver: Receiver<SampleBatch>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WavCollector {
    /// Load `path` for replay.
    pub fn open(path: impl AsRef<Path>, config: ReplayConfig) -> Result<Self, CollectorError> {
        let clip = WavClip::open(path).map_err(CollectorError::Wav)?;
        Ok(Self::from_clip(clip, config))
    }

    pub fn from_clip(clip: WavClip, config: ReplayConfig) -> Self {
        let (sender, receiver) = bounded(config.channel_capacity.max(1));
        Self {
            clip: Arc::new(clip),
            config,
            sender: Some(sender),
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.clip.sample_rate
    }

    /// Start replaying on a background thread.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        let sender = match self.sender.take() {
            Some(sender) => sender,
            None => return Err(CollectorError::AlreadyRunning),
        };
        self.running.store(true, Ordering::SeqCst);

        let clip = Arc::clone(&self.clip);
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        self.handle = Some(thread::spawn(move || replay(&clip, &config, &running, sender)));
        Ok(())
    }

    /// Stop replaying and wait for the replay thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("WAV replay thread panicked");
            }
        }
    }

    /// Check if the collector is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the receiver for sample batches.
    pub fn receiver(&self) -> &Receiver<SampleBatch> {
        &self.receiver
    }
}

impl Drop for WavCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn replay(clip: &WavClip, config: &ReplayConfig, running: &AtomicBool, sender: Sender<SampleBatch>) {
    let base = config.batch_size.max(4);
    // Cycle through uneven sizes the way a driver delivers them
    let sizes = [base, base / 2, base + base / 2, base / 4, base];
    let mut offset = 0;

    for size in sizes.iter().cycle() {
        if offset >= clip.samples.len() || !running.load(Ordering::SeqCst) {
            break;
        }
        let end = (offset + size).min(clip.samples.len());
        let mut batch = SampleBatch::new(clip.samples[offset..end].to_vec());
        offset = end;

        if config.realtime && clip.sample_rate > 0 {
            thread::sleep(Duration::from_secs_f64(
                batch.len() as f64 / clip.sample_rate as f64,
            ));
        }

        loop {
            match sender.send_timeout(batch, Duration::from_millis(100)) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(returned)) => {
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                    batch = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }

    tracing::debug!(samples = offset, "WAV replay finished");
    running.store(false, Ordering::SeqCst);
}

/// WAV decoding errors.
#[derive(Debug)]
pub enum WavError {
    /// The file's channel count differs from the mono format
    ChannelMismatch { expected: u16, found: u16 },
    Format(hound::Error),
}

impl std::fmt::Display for WavError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WavError::ChannelMismatch { expected, found } => write!(
                f,
                "Unsupported number of audio channels: expected {expected}, found {found}"
            ),
            WavError::Format(e) => write!(f, "WAV error: {e}"),
        }
    }
}

impl std::error::Error for WavError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WavError::Format(e) => Some(e),
            WavError::ChannelMismatch { .. } => None,
        }
    }
}

impl From<hound::Error> for WavError {
    fn from(e: hound::Error) -> Self {
        WavError::Format(e)
    }
}
