//! Live microphone capture through cpal.
//!
//! The input stream is opened on `start` and dropped on `stop` (or when the
//! collector is dropped), so the OS audio handle is released exactly once
//! on every exit path.

use crate::collector::types::SampleBatch;
use crate::collector::CollectorError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Configuration for the input device.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Requested sample rate in Hz
    pub sample_rate: u32,
    /// Batches buffered before new ones are dropped
    pub channel_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channel_capacity: 256,
        }
    }
}

/// Captures mono batches from the default input device.
pub struct DeviceCollector {
    config: CollectorConfig,
    sender: Sender<SampleBatch>,
    receiver: Receiver<SampleBatch>,
    stream: Option<cpal::Stream>,
    overflows: Arc<AtomicU64>,
}

impl DeviceCollector {
    /// Create a new collector. No device is opened until `start`.
    pub fn new(config: CollectorConfig) -> Self {
        let (sender, receiver) = bounded(config.channel_capacity.max(1));
        Self {
            config,
            sender,
            receiver,
            stream: None,
            overflows: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the default input device and start capturing.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.stream.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CollectorError::Device("No default input device found".into()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| CollectorError::Device(e.to_string()))?;

        let channels = supported.channels() as usize;
        let mut stream_config: cpal::StreamConfig = supported.config();
        stream_config.sample_rate = cpal::SampleRate(self.config.sample_rate);

        let sender = self.sender.clone();
        let overflows = Arc::clone(&self.overflows);
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, channels, sender, overflows)
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, channels, sender, overflows)
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, channels, sender, overflows)
            }
            other => {
                return Err(CollectorError::Device(format!(
                    "Unsupported sample format {other:?}"
                )))
            }
        }
        .map_err(|e| CollectorError::Device(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CollectorError::Device(e.to_string()))?;

        tracing::info!(
            sample_rate = self.config.sample_rate,
            channels,
            "Audio input started"
        );
        self.stream = Some(stream);
        Ok(())
    }

    /// Stop capturing and release the device.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(
                overflows = self.overflows.load(Ordering::Relaxed),
                "Audio input stopped"
            );
        }
    }

    /// Get the receiver for sample batches.
    pub fn receiver(&self) -> &Receiver<SampleBatch> {
        &self.receiver
    }

    /// Batches dropped because the channel was full.
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

impl Drop for DeviceCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sender: Sender<SampleBatch>,
    overflows: Arc<AtomicU64>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = channels.max(1);
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let interleaved: Vec<f32> = data
                .iter()
                .map(|&s| <f32 as cpal::Sample>::from_sample(s))
                .collect();
            let batch = SampleBatch::from_interleaved(&interleaved, channels);
            // Never block the audio callback
            if sender.try_send(batch).is_err() {
                overflows.fetch_add(1, Ordering::Relaxed);
            }
        },
        |e| tracing::error!("Audio input stream error: {e}"),
        None,
    )
}
