//! Sonar Sensor Agent - ultrasonic hand movement detection.
//!
//! The agent plays a near-ultrasonic tone through the speaker and listens
//! to the microphone. A moving hand changes the reflected spectrum around
//! the tone; those changes are grouped into movement episodes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Sonar Sensor Agent                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │  Collector  │──▶│   Framer    │──▶│  Spectrum   │        │
//! │  │ (mic / wav) │   │ (2048 smp)  │   │ (band FFT)  │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │         ▲                                    │              │
//! │         │ echo                               ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │ Transmitter │   │ Calibrator  │──▶│  Movement   │──▶ events
//! │  │   (tone)    │   │ (threshold) │   │  Detector   │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sonar_sensor_agent::collector::{ReplayConfig, WavCollector};
//! use sonar_sensor_agent::transmitter::NullSink;
//! use sonar_sensor_agent::{Config, SonarSession};
//!
//! let config = Config::default();
//! let session = SonarSession::new(config.clone()).expect("invalid configuration");
//!
//! let mut input = WavCollector::open("recording.wav", ReplayConfig::default())
//!     .expect("Failed to open recording");
//! input.start().expect("Failed to start replay");
//!
//! let threshold = session
//!     .calibrate(input.receiver(), NullSink::new(), config.calibration_freq)
//!     .expect("calibration failed");
//! let (events, _rx) = crossbeam_channel::unbounded();
//! session.run_detection(input.receiver(), threshold, &events);
//! println!("longest movement: {} windows", session.read_move_count());
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod stats;
pub mod transmitter;

// Re-export key types at crate root for convenience
pub use collector::{CollectorError, SampleBatch, WavCollector};
pub use config::{Config, ConfigError};
pub use core::{
    CalibrationError, CancellationToken, EpisodeEvent, FrequencyBand, MovementDetector,
    MovementMonitor, SonarSession, SpectralAnalyzer, Spectrum, ThresholdState,
};
pub use stats::{SessionStats, StatsSnapshot};
pub use transmitter::{AudioSink, PlaybackError, ToneGenerator, Transmitter};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
