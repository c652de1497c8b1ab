//! Speaker output through cpal.
//!
//! The output callback drains blocks written to a [`ChannelSink`]. When
//! the transmitter falls behind the callback plays silence rather than
//! blocking the audio thread. The stream is released when the
//! `DeviceOutput` is dropped.

use crate::transmitter::sink::{channel_sink, ChannelSink};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Receiver;

/// An open output stream fed by a channel sink.
pub struct DeviceOutput {
    _stream: cpal::Stream,
    sink: ChannelSink,
}

impl DeviceOutput {
    /// Open the default output device at `sample_rate`, buffering at most
    /// `capacity` blocks between the transmitter and the callback.
    pub fn open(sample_rate: u32, capacity: usize) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DeviceError("No default output device found".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| DeviceError(e.to_string()))?;

        let channels = supported.channels() as usize;
        let mut stream_config: cpal::StreamConfig = supported.config();
        stream_config.sample_rate = cpal::SampleRate(sample_rate);

        let (sink, receiver) = channel_sink(capacity);
        let feeder = BlockFeeder::new(receiver);
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, channels, feeder),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, channels, feeder),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, channels, feeder),
            other => return Err(DeviceError(format!("Unsupported sample format {other:?}"))),
        }
        .map_err(|e| DeviceError(e.to_string()))?;

        stream.play().map_err(|e| DeviceError(e.to_string()))?;
        tracing::info!(sample_rate, channels, "Audio output started");

        Ok(Self {
            _stream: stream,
            sink,
        })
    }

    /// A sink feeding this output. Clones share the same stream.
    pub fn sink(&self) -> ChannelSink {
        self.sink.clone()
    }
}

/// Hands out queued samples one at a time, silence when none are queued.
struct BlockFeeder {
    receiver: Receiver<Vec<f32>>,
    current: Vec<f32>,
    index: usize,
}

impl BlockFeeder {
    fn new(receiver: Receiver<Vec<f32>>) -> Self {
        Self {
            receiver,
            current: Vec::new(),
            index: 0,
        }
    }

    fn next_sample(&mut self) -> f32 {
        if self.index >= self.current.len() {
            match self.receiver.try_recv() {
                Ok(block) => {
                    self.current = block;
                    self.index = 0;
                }
                Err(_) => return 0.0,
            }
        }
        match self.current.get(self.index) {
            Some(&s) => {
                self.index += 1;
                s
            }
            None => 0.0,
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mut feeder: BlockFeeder,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = channels.max(1);
    device.build_output_stream(
        config,
        move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
            for frame in out.chunks_mut(channels) {
                let value = <T as cpal::Sample>::from_sample(feeder.next_sample());
                for ch in frame.iter_mut() {
                    *ch = value;
                }
            }
        },
        |e| tracing::error!("Audio output stream error: {e}"),
        None,
    )
}

/// Output device errors.
#[derive(Debug, Clone)]
pub struct DeviceError(pub String);

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Audio output device error: {}", self.0)
    }
}

impl std::error::Error for DeviceError {}
