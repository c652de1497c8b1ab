//! Configuration for the Sonar Sensor Agent.

use crate::core::spectrum::FrequencyBand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the sensor agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Audio sample rate in Hz (input and output)
    pub sample_rate: u32,

    /// Number of samples per analysis window
    pub window_size: usize,

    /// Output amplitude of the emitted tone (0.0 - 1.0)
    pub amplitude: f32,

    /// Frequency of the tone emitted during detection
    pub tone_freq: f32,

    /// Frequency of the tone emitted during calibration
    pub calibration_freq: f32,

    /// Frequency band inspected for echoes
    pub band: BandConfig,

    /// Calibration parameters
    pub calibration: CalibrationConfig,

    /// Number of quiet windows tolerated inside one movement
    pub stall_window_threshold: u32,

    /// Buffered windows kept before the oldest are discarded
    pub max_backlog_windows: usize,

    /// How long workers wait for audio before re-checking cancellation
    #[serde(with = "duration_millis")]
    pub batch_timeout: Duration,

    /// Path for exporting movement episodes
    pub export_path: PathBuf,

    /// Default directory for microphone recordings
    pub recording_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sonar-sensor-agent");

        Self {
            sample_rate: 44_100,
            window_size: 2048,
            amplitude: 0.8,
            tone_freq: 19_000.0,
            calibration_freq: 19_000.0,
            band: BandConfig::default(),
            calibration: CalibrationConfig::default(),
            stall_window_threshold: 1,
            max_backlog_windows: 16,
            batch_timeout: Duration::from_millis(100),
            export_path: data_dir.join("exports"),
            recording_path: data_dir.join("recordings"),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sonar-sensor-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.recording_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check every numeric setting and resolve the analysis band.
    ///
    /// The band is fixed for the lifetime of a session, so this is the
    /// only place a degenerate band can be reported.
    pub fn validate(&self) -> Result<FrequencyBand, ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidValue("sample_rate must be > 0".into()));
        }
        if self.window_size < 2 {
            return Err(ConfigError::InvalidValue("window_size must be >= 2".into()));
        }
        if !(self.amplitude > 0.0 && self.amplitude <= 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "amplitude must be in (0, 1], got {}",
                self.amplitude
            )));
        }
        if self.max_backlog_windows == 0 {
            return Err(ConfigError::InvalidValue(
                "max_backlog_windows must be >= 1".into(),
            ));
        }

        let nyquist = self.sample_rate as f32 / 2.0;
        for (name, freq) in [
            ("tone_freq", self.tone_freq),
            ("calibration_freq", self.calibration_freq),
        ] {
            if !(freq > 0.0 && freq < nyquist) {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be in (0, {nyquist}) Hz, got {freq}"
                )));
            }
        }

        self.calibration.validate()?;

        FrequencyBand::from_hz(
            self.band.low_hz,
            self.band.high_hz,
            self.window_size,
            self.sample_rate,
        )
    }
}

/// Frequency range (in Hz) inspected for echoes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    pub low_hz: f32,
    pub high_hz: f32,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            low_hz: 18_000.0,
            high_hz: 20_000.0,
        }
    }
}

/// Parameters of the noise-adaptive calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Number of windows measured
    pub windows: u32,
    /// Smallest acceptable averaged peak amplitude
    pub min_allowed_amp: f32,
    /// Windows measured before the amplitude check applies
    pub min_windows_before_check: u32,
    /// Weight of the newest window in the moving average
    pub moving_average_alpha: f32,
    /// Detection threshold as a fraction of the averaged peak
    pub threshold_proportion: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            windows: 50,
            min_allowed_amp: 10.0,
            min_windows_before_check: 20,
            moving_average_alpha: 0.2,
            threshold_proportion: 1.0 / 38.0,
        }
    }
}

impl CalibrationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.windows == 0 {
            return Err(ConfigError::InvalidValue(
                "calibration.windows must be >= 1".into(),
            ));
        }
        if !(self.moving_average_alpha > 0.0 && self.moving_average_alpha <= 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "calibration.moving_average_alpha must be in (0, 1], got {}",
                self.moving_average_alpha
            )));
        }
        if self.threshold_proportion <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "calibration.threshold_proportion must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    /// The frequency band maps to an empty bin range.
    DegenerateBand { low_ind: usize, high_ind: usize },
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::DegenerateBand { low_ind, high_ind } => write!(
                f,
                "Frequency band maps to empty bin range [{low_ind}, {high_ind}); movement could never be detected"
            ),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.window_size, 2048);
        assert!((config.amplitude - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.calibration.windows, 50);
        assert_eq!(config.stall_window_threshold, 1);
        assert!((config.calibration.threshold_proportion - 1.0 / 38.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_config_validates() {
        let band = Config::default().validate().unwrap();
        assert_eq!(band.low_ind(), 835);
        assert_eq!(band.high_ind(), 928);
    }

    #[test]
    fn test_degenerate_band_rejected() {
        let mut config = Config::default();
        config.band = BandConfig {
            low_hz: 19_000.0,
            high_hz: 19_005.0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DegenerateBand { .. })
        ));

        config.band = BandConfig {
            low_hz: 20_000.0,
            high_hz: 18_000.0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DegenerateBand { .. })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.amplitude = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = Config::default();
        config.tone_freq = 30_000.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = Config::default();
        config.calibration.moving_average_alpha = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_config_json_roundtrip_keeps_timeout() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"batch_timeout\":100"));
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.batch_timeout, Duration::from_millis(100));
        assert_eq!(parsed.band, config.band);
    }

    #[test]
    fn test_ensure_directories_creates_recording_dir() {
        let root = std::env::temp_dir().join(format!("sonar-config-{}", std::process::id()));
        let config = Config {
            export_path: root.join("exports"),
            recording_path: root.join("recordings"),
            ..Config::default()
        };
        config.ensure_directories().unwrap();
        assert!(config.export_path.is_dir());
        assert!(config.recording_path.is_dir());
        let _ = std::fs::remove_dir_all(&root);
    }
}
