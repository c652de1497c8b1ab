//! Destinations for emitted audio.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::time::Duration;

/// A writable mono sample stream.
///
/// `write` may block to apply the destination's flow control.
pub trait AudioSink: Send {
    fn write(&mut self, samples: &[f32]) -> Result<(), SinkError>;
}

/// Collects everything written, mostly useful in tests.
impl AudioSink for Vec<f32> {
    fn write(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        self.extend_from_slice(samples);
        Ok(())
    }
}

/// Discards samples, optionally pacing writes to real time.
///
/// Used when nothing can be played (offline replay) so a tone worker still
/// behaves like one attached to a device instead of spinning.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink {
    sample_rate: Option<u32>,
}

impl NullSink {
    /// Discard immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard, sleeping as long as the samples would take to play.
    pub fn paced(sample_rate: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
        }
    }
}

impl AudioSink for NullSink {
    fn write(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        if let Some(rate) = self.sample_rate.filter(|r| *r > 0) {
            std::thread::sleep(Duration::from_secs_f64(samples.len() as f64 / rate as f64));
        }
        Ok(())
    }
}

/// Sends blocks over a bounded channel, typically to a device callback.
///
/// A full channel blocks the writer, which is how the output device's
/// consumption rate paces the transmitter.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<Vec<f32>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Vec<f32>>) -> Self {
        Self { sender }
    }
}

impl AudioSink for ChannelSink {
    fn write(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        self.sender
            .send(samples.to_vec())
            .map_err(|_| SinkError::Disconnected)
    }
}

/// Create a channel sink holding at most `capacity` blocks in flight.
pub fn channel_sink(capacity: usize) -> (ChannelSink, Receiver<Vec<f32>>) {
    let (sender, receiver) = bounded(capacity.max(1));
    (ChannelSink::new(sender), receiver)
}

/// Errors writing to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The consumer side has gone away
    Disconnected,
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Disconnected => write!(f, "Audio output disconnected"),
        }
    }
}

impl std::error::Error for SinkError {}
