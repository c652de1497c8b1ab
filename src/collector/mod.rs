//! Audio input for the Sonar Sensor Agent.
//!
//! Every source delivers [`SampleBatch`]es on a crossbeam channel. A live
//! microphone is available with the `device` feature; WAV replay works on
//! every build.

pub mod types;
pub mod wav;

#[cfg(feature = "device")]
pub mod device;

// Re-export commonly used types
pub use types::SampleBatch;
pub use wav::{record_to_wav, write_mono, ReplayConfig, WavClip, WavCollector, WavError};

#[cfg(feature = "device")]
pub use device::{CollectorConfig, DeviceCollector};

/// Errors that can occur during audio collection.
#[derive(Debug)]
pub enum CollectorError {
    AlreadyRunning,
    Wav(WavError),
    /// The audio device could not be opened or started
    Device(String),
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::AlreadyRunning => write!(f, "Collector is already running"),
            CollectorError::Wav(e) => write!(f, "{e}"),
            CollectorError::Device(e) => write!(f, "Audio input device error: {e}"),
        }
    }
}

impl std::error::Error for CollectorError {}
