//! Noise-adaptive threshold calibration.
//!
//! While a known test tone is playing, the peak in-band magnitude of each
//! window is folded into an exponential moving average. If the average is
//! still below the minimum allowed amplitude once enough windows have been
//! seen, the speaker is probably muted or too quiet and calibration fails.
//! Otherwise the detection threshold becomes a fixed proportion of the
//! average.

use crate::config::CalibrationConfig;
use crate::core::spectrum::Spectrum;
use crate::core::threshold::ThresholdState;

/// Progress of a calibration run after one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    /// More windows are needed
    Pending,
    /// All windows measured; the derived thresholds
    Complete(ThresholdState),
}

/// Folds per-window peak amplitudes into a detection threshold.
#[derive(Debug, Clone)]
pub struct Calibrator {
    config: CalibrationConfig,
    windows_seen: u32,
    average: f32,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            windows_seen: 0,
            average: 0.0,
        }
    }

    /// Feed the spectrum of the next window.
    pub fn feed(&mut self, spectrum: &Spectrum) -> Result<CalibrationStep, CalibrationError> {
        self.feed_peak(spectrum.peak())
    }

    /// Feed the peak magnitude of the next window.
    pub fn feed_peak(&mut self, peak: f32) -> Result<CalibrationStep, CalibrationError> {
        if self.is_finished() {
            return Ok(CalibrationStep::Complete(self.threshold()));
        }

        let alpha = self.config.moving_average_alpha;
        self.average = if self.windows_seen == 0 {
            peak
        } else {
            self.average * (1.0 - alpha) + alpha * peak
        };

        if self.average < self.config.min_allowed_amp
            && self.windows_seen >= self.config.min_windows_before_check
        {
            return Err(CalibrationError::AmplitudeTooLow {
                average: self.average,
                windows: self.windows_seen + 1,
            });
        }

        self.windows_seen += 1;
        tracing::debug!(
            window = self.windows_seen,
            peak,
            average = self.average,
            "Calibration window"
        );

        if self.is_finished() {
            Ok(CalibrationStep::Complete(self.threshold()))
        } else {
            Ok(CalibrationStep::Pending)
        }
    }

    /// Current moving average of the window peaks.
    pub fn average(&self) -> f32 {
        self.average
    }

    pub fn windows_seen(&self) -> u32 {
        self.windows_seen
    }

    pub fn is_finished(&self) -> bool {
        self.windows_seen >= self.config.windows
    }

    fn threshold(&self) -> ThresholdState {
        ThresholdState::from_reference(self.average, self.config.threshold_proportion)
    }
}

/// Calibration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// The received tone is too quiet; the operator should raise the volume.
    AmplitudeTooLow { average: f32, windows: u32 },
    /// The session was stopped before calibration finished.
    Cancelled,
    /// The audio input closed before enough windows were received.
    InputClosed { windows: u32 },
}

impl std::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationError::AmplitudeTooLow { average, windows } => write!(
                f,
                "Received amplitude {average:.2} too low after {windows} windows, please increase your output volume"
            ),
            CalibrationError::Cancelled => write!(f, "Calibration cancelled"),
            CalibrationError::InputClosed { windows } => {
                write!(f, "Audio input closed after {windows} calibration windows")
            }
        }
    }
}

impl std::error::Error for CalibrationError {}
