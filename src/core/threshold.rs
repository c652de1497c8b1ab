//! Noise-adaptive detection thresholds.

use serde::{Deserialize, Serialize};

/// Threshold used before any calibration has run.
pub const UNCALIBRATED_THRESHOLD: f32 = 1.0;

/// Detection thresholds derived from a calibration run.
///
/// A value of this type is produced once per calibration and then moved
/// into the detector; nothing mutates it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdState {
    /// Averaged peak amplitude measured during calibration, if any
    reference_amplitude: Option<f32>,
    /// Bins below this magnitude are treated as noise
    detection: f32,
}

impl ThresholdState {
    /// A fixed threshold that did not come from calibration.
    pub fn fixed(detection: f32) -> Self {
        Self {
            reference_amplitude: None,
            detection,
        }
    }

    /// Threshold as a proportion of the received reference amplitude.
    pub fn from_reference(reference_amplitude: f32, proportion: f32) -> Self {
        Self {
            reference_amplitude: Some(reference_amplitude),
            detection: reference_amplitude * proportion,
        }
    }

    /// Gate applied to raw spectrum bins.
    pub fn detection(&self) -> f32 {
        self.detection
    }

    /// Stricter gate applied to window-to-window differences.
    pub fn difference(&self) -> f32 {
        2.0 * self.detection
    }

    pub fn reference_amplitude(&self) -> Option<f32> {
        self.reference_amplitude
    }

    pub fn is_calibrated(&self) -> bool {
        self.reference_amplitude.is_some()
    }
}

impl Default for ThresholdState {
    fn default() -> Self {
        Self::fixed(UNCALIBRATED_THRESHOLD)
    }
}
