//! Core signal processing for the Sonar Sensor Agent.
//!
//! This module contains:
//! - Framing of sample batches into fixed-size windows
//! - Band-limited spectra and amplitude thresholding
//! - Noise-adaptive threshold calibration
//! - The movement episode state machine
//! - Session wiring of the worker threads

pub mod calibration;
pub mod cancel;
pub mod detector;
pub mod framing;
pub mod session;
pub mod spectrum;
pub mod threshold;

// Re-export commonly used types
pub use calibration::{CalibrationError, CalibrationStep, Calibrator};
pub use cancel::CancellationToken;
pub use detector::{EpisodeEvent, MovementDetector, MovementMonitor, SharedMovementMonitor};
pub use framing::Framer;
pub use session::{DetectionSummary, SessionReport, SonarSession, StopReason};
pub use spectrum::{threshold, FrequencyBand, SpectralAnalyzer, Spectrum};
pub use threshold::ThresholdState;
