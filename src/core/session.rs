//! Sensing session: wires input, calibration, detection and the tone
//! emitter together on worker threads.
//!
//! ```text
//!   tone worker ──▶ speaker ~~~ air ~~~ microphone ──▶ SampleBatch channel
//!                                                         │
//!                              ┌──────────────────────────┤
//!                              ▼                          ▼
//!                        calibration ── ThresholdState ──▶ detection ──▶ EpisodeEvent channel
//!                                        (bounded(1))          │
//!                                                              └──▶ MovementMonitor
//! ```
//!
//! Detection never reads a window before calibration has handed over its
//! threshold. Every worker polls the session's [`CancellationToken`] at the
//! head of its loop.

use crate::collector::types::SampleBatch;
use crate::config::{Config, ConfigError};
use crate::core::calibration::{CalibrationError, CalibrationStep, Calibrator};
use crate::core::cancel::CancellationToken;
use crate::core::detector::{EpisodeEvent, MovementDetector, MovementMonitor, SharedMovementMonitor};
use crate::core::framing::Framer;
use crate::core::spectrum::{FrequencyBand, SpectralAnalyzer};
use crate::core::threshold::ThresholdState;
use crate::stats::{SessionStats, SharedSessionStats, StatsSnapshot};
use crate::transmitter::{AudioSink, SinkError, ToneGenerator, Transmitter};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

/// Why a detection loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The session token was cancelled
    Cancelled,
    /// The audio input channel closed
    InputClosed,
    /// Calibration never delivered a threshold
    NotCalibrated,
}

/// Outcome of a detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub windows: u64,
    pub episodes: u32,
    pub stop_reason: StopReason,
}

/// Everything worth keeping from a session, exported as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub threshold: Option<ThresholdState>,
    pub episodes: Vec<EpisodeEvent>,
    pub stats: StatsSnapshot,
}

/// A configured sensing session.
///
/// Cheap to clone; clones share the cancellation token, the movement
/// monitor and the statistics.
#[derive(Clone)]
pub struct SonarSession {
    config: Config,
    band: FrequencyBand,
    token: CancellationToken,
    monitor: SharedMovementMonitor,
    stats: SharedSessionStats,
    session_id: Uuid,
    started_at: DateTime<Utc>,
}

impl SonarSession {
    /// Validate `config` and create a session with a fresh token.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::with_token(config, CancellationToken::new())
    }

    /// Validate `config` and create a session stopped by `token`.
    pub fn with_token(config: Config, token: CancellationToken) -> Result<Self, ConfigError> {
        let band = config.validate()?;
        tracing::debug!(
            low_ind = band.low_ind(),
            high_ind = band.high_ind(),
            "Analysis band configured"
        );
        Ok(Self {
            config,
            band,
            token,
            monitor: Arc::new(MovementMonitor::new()),
            stats: Arc::new(SessionStats::new()),
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn band(&self) -> FrequencyBand {
        self.band
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn monitor(&self) -> SharedMovementMonitor {
        Arc::clone(&self.monitor)
    }

    pub fn stats(&self) -> SharedSessionStats {
        Arc::clone(&self.stats)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Stop every worker of this session.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether a movement episode is currently open.
    pub fn is_moving(&self) -> bool {
        self.monitor.is_moving()
    }

    /// Length of the longest unread episode, resetting it to 0.
    pub fn read_move_count(&self) -> u32 {
        self.monitor.read_move_count()
    }

    /// Measure the received level of a `test_freq` tone and derive the
    /// detection threshold.
    ///
    /// The tone plays on its own worker through `sink` and is stopped when
    /// calibration finishes, whatever the outcome. Failure is reported, not
    /// retried; the caller decides whether to try again.
    pub fn calibrate<S>(
        &self,
        input: &Receiver<SampleBatch>,
        sink: S,
        test_freq: f32,
    ) -> Result<ThresholdState, CalibrationError>
    where
        S: AudioSink + 'static,
    {
        let tone_token = self.token.child();
        let tone = self.spawn_tone(
            sink,
            ToneGenerator::constant(test_freq, self.config.sample_rate, self.config.amplitude),
            tone_token.clone(),
        );

        let result = self.measure(input);

        tone_token.cancel();
        match tone.join() {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Calibration tone stopped early: {e}"),
            Err(_) => tracing::warn!("Calibration tone worker panicked"),
        }
        result
    }

    /// Run calibration on a worker and publish its threshold on a channel.
    ///
    /// The channel closes without a value if calibration fails, which a
    /// detector started with [`spawn_detector`](Self::spawn_detector) treats
    /// as "never calibrated".
    pub fn spawn_calibration<S>(
        &self,
        input: Receiver<SampleBatch>,
        sink: S,
        test_freq: f32,
    ) -> (
        JoinHandle<Result<ThresholdState, CalibrationError>>,
        Receiver<ThresholdState>,
    )
    where
        S: AudioSink + 'static,
    {
        let (tx, rx) = bounded(1);
        let session = self.clone();
        let handle = thread::spawn(move || {
            let threshold = session.calibrate(&input, sink, test_freq)?;
            // The detector may already be gone; that is not a calibration failure
            let _ = tx.send(threshold);
            Ok(threshold)
        });
        (handle, rx)
    }

    /// Calibrate on a worker while one tone worker plays the calibration
    /// tone and then carries straight on with the detection tone.
    ///
    /// The tone worker is told to switch before the threshold is published,
    /// so the detector never hears a silent gap at the handoff. When both
    /// tones share a frequency the same sine simply keeps playing. If
    /// calibration fails the tone worker stops; otherwise it runs until the
    /// session stops.
    pub fn spawn_calibration_with_tone<S>(
        &self,
        input: Receiver<SampleBatch>,
        sink: S,
    ) -> (
        JoinHandle<Result<ThresholdState, CalibrationError>>,
        Receiver<ThresholdState>,
        JoinHandle<Result<u64, SinkError>>,
    )
    where
        S: AudioSink + 'static,
    {
        let calibration_tone = ToneGenerator::constant(
            self.config.calibration_freq,
            self.config.sample_rate,
            self.config.amplitude,
        );
        let detection_tone = ToneGenerator::constant(
            self.config.tone_freq,
            self.config.sample_rate,
            self.config.amplitude,
        );
        let continuous = self.config.calibration_freq == self.config.tone_freq;

        // `switch` ends the calibration tone, `abort` ends the worker
        let switch = self.token.child();
        let abort = self.token.child();

        let mut transmitter = self.transmitter(sink);
        let tone = {
            let (switch, abort) = (switch.clone(), abort.clone());
            thread::spawn(move || {
                if continuous {
                    return transmitter.emit(calibration_tone, &abort);
                }
                let mut written = transmitter.emit(calibration_tone, &switch)?;
                if !abort.is_cancelled() {
                    written += transmitter.emit(detection_tone, &abort)?;
                }
                Ok(written)
            })
        };

        let (tx, rx) = bounded(1);
        let session = self.clone();
        let calibration = thread::spawn(move || match session.measure(&input) {
            Ok(threshold) => {
                switch.cancel();
                let _ = tx.send(threshold);
                Ok(threshold)
            }
            Err(e) => {
                abort.cancel();
                switch.cancel();
                Err(e)
            }
        });
        (calibration, rx, tone)
    }

    /// Start a detection worker that waits for a threshold, then classifies
    /// windows until cancelled or the input closes.
    pub fn spawn_detector(
        &self,
        input: Receiver<SampleBatch>,
        thresholds: Receiver<ThresholdState>,
    ) -> (JoinHandle<DetectionSummary>, Receiver<EpisodeEvent>) {
        let (events_tx, events_rx) = unbounded();
        let session = self.clone();
        let handle = thread::spawn(move || match session.await_threshold(&thresholds) {
            Some(threshold) => session.run_detection(&input, threshold, &events_tx),
            None => DetectionSummary {
                windows: 0,
                episodes: 0,
                stop_reason: if session.token.is_cancelled() {
                    StopReason::Cancelled
                } else {
                    StopReason::NotCalibrated
                },
            },
        });
        (handle, events_rx)
    }

    /// Classify windows from `input` with a fixed threshold on the current
    /// thread. Each completed episode is sent on `events`.
    pub fn run_detection(
        &self,
        input: &Receiver<SampleBatch>,
        threshold: ThresholdState,
        events: &Sender<EpisodeEvent>,
    ) -> DetectionSummary {
        let mut detector = MovementDetector::with_monitor(
            SpectralAnalyzer::new(self.band),
            threshold,
            self.config.stall_window_threshold,
            self.config.sample_rate,
            Arc::clone(&self.monitor),
        );
        let mut pump = self.pump(input);
        let mut episodes = 0u32;

        let stop_reason = loop {
            match pump.next_window() {
                Pull::Window(window) => {
                    if let Some(event) = detector.process_window(&window) {
                        episodes += 1;
                        self.stats.record_episode();
                        // Nobody listening is fine; the monitor still has it
                        let _ = events.send(event);
                    }
                }
                Pull::Cancelled => break StopReason::Cancelled,
                Pull::Closed => break StopReason::InputClosed,
            }
        };

        tracing::info!(
            windows = detector.windows_processed(),
            episodes,
            ?stop_reason,
            "Detection stopped"
        );
        DetectionSummary {
            windows: detector.windows_processed(),
            episodes,
            stop_reason,
        }
    }

    /// Build the exportable report for this session.
    pub fn report(&self, threshold: Option<ThresholdState>, episodes: Vec<EpisodeEvent>) -> SessionReport {
        SessionReport {
            session_id: self.session_id,
            started_at: self.started_at,
            threshold,
            episodes,
            stats: self.stats.snapshot(),
        }
    }

    fn measure(&self, input: &Receiver<SampleBatch>) -> Result<ThresholdState, CalibrationError> {
        let result = self.measure_windows(input);
        match &result {
            Ok(threshold) => tracing::info!(
                threshold = threshold.detection(),
                reference = threshold.reference_amplitude().unwrap_or(0.0),
                "Calibration complete"
            ),
            Err(e) => tracing::warn!("Calibration failed: {e}"),
        }
        result
    }

    fn measure_windows(&self, input: &Receiver<SampleBatch>) -> Result<ThresholdState, CalibrationError> {
        let mut analyzer = SpectralAnalyzer::new(self.band);
        let mut calibrator = Calibrator::new(self.config.calibration);
        let mut pump = self.pump(input);

        loop {
            match pump.next_window() {
                Pull::Window(window) => {
                    if let CalibrationStep::Complete(threshold) =
                        calibrator.feed(&analyzer.analyze(&window))?
                    {
                        return Ok(threshold);
                    }
                }
                Pull::Cancelled => return Err(CalibrationError::Cancelled),
                Pull::Closed => {
                    return Err(CalibrationError::InputClosed {
                        windows: calibrator.windows_seen(),
                    })
                }
            }
        }
    }

    fn await_threshold(&self, thresholds: &Receiver<ThresholdState>) -> Option<ThresholdState> {
        loop {
            if self.token.is_cancelled() {
                return None;
            }
            match thresholds.recv_timeout(self.config.batch_timeout) {
                Ok(threshold) => return Some(threshold),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn spawn_tone<S>(
        &self,
        sink: S,
        tone: ToneGenerator,
        token: CancellationToken,
    ) -> JoinHandle<Result<u64, SinkError>>
    where
        S: AudioSink + 'static,
    {
        let mut transmitter = self.transmitter(sink);
        thread::spawn(move || transmitter.emit(tone, &token))
    }

    fn transmitter<S: AudioSink>(&self, sink: S) -> Transmitter<S> {
        Transmitter::new(
            sink,
            self.config.sample_rate,
            self.config.amplitude,
            self.config.window_size,
        )
    }

    fn pump<'a>(&'a self, input: &'a Receiver<SampleBatch>) -> WindowPump<'a> {
        WindowPump {
            input,
            framer: Framer::with_backlog(self.config.window_size, self.config.max_backlog_windows),
            token: &self.token,
            timeout: self.config.batch_timeout,
            stats: &self.stats,
        }
    }
}

enum Pull {
    Window(Vec<f32>),
    Cancelled,
    Closed,
}

/// Pulls batches off the input channel into a framer and yields windows.
struct WindowPump<'a> {
    input: &'a Receiver<SampleBatch>,
    framer: Framer,
    token: &'a CancellationToken,
    timeout: Duration,
    stats: &'a SessionStats,
}

impl WindowPump<'_> {
    fn next_window(&mut self) -> Pull {
        loop {
            if self.token.is_cancelled() {
                return Pull::Cancelled;
            }
            if let Some(window) = self.framer.extract_window() {
                self.stats.record_window();
                return Pull::Window(window);
            }
            match self.input.recv_timeout(self.timeout) {
                Ok(batch) => {
                    self.stats.record_batch(batch.len());
                    let before = self.framer.dropped_samples();
                    self.framer.ingest(&batch);
                    let dropped = self.framer.dropped_samples() - before;
                    if dropped > 0 {
                        self.stats.record_dropped(dropped);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!(
                        partial = self.framer.buffered(),
                        "Input closed, discarding partial window"
                    );
                    return Pull::Closed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BandConfig;
    use crate::transmitter::NullSink;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.sample_rate = 8000;
        config.window_size = 256;
        config.tone_freq = 2000.0;
        config.calibration_freq = 2000.0;
        config.band = BandConfig {
            low_hz: 1500.0,
            high_hz: 2500.0,
        };
        config.batch_timeout = Duration::from_millis(10);
        config
    }

    fn tone(freq: f32, amp: f32, len: usize, sample_rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                amp * (std::f64::consts::TAU * freq as f64 * t).sin() as f32
            })
            .collect()
    }

    #[test]
    fn test_degenerate_band_rejected_at_setup() {
        let mut config = small_config();
        config.band = BandConfig {
            low_hz: 2000.0,
            high_hz: 2000.0,
        };
        assert!(matches!(
            SonarSession::new(config),
            Err(ConfigError::DegenerateBand { .. })
        ));
    }

    #[test]
    fn test_calibration_over_channel() {
        let config = small_config();
        let session = SonarSession::new(config.clone()).unwrap();
        let (tx, rx) = unbounded();
        // 2000 Hz is bin 64 of a 256-sample window at 8 kHz
        let signal = tone(2000.0, 0.5, config.window_size * 60, config.sample_rate);
        for chunk in signal.chunks(100) {
            tx.send(SampleBatch::new(chunk.to_vec())).unwrap();
        }

        let threshold = session.calibrate(&rx, NullSink::new(), 2000.0).unwrap();
        let expected = 0.5 * 128.0 / 38.0;
        assert!((threshold.detection() - expected).abs() / expected < 0.02);
        assert_eq!(session.stats().snapshot().windows_analyzed, 50);
    }

    #[test]
    fn test_calibration_fails_on_silence() {
        let config = small_config();
        let session = SonarSession::new(config.clone()).unwrap();
        let (tx, rx) = unbounded();
        for _ in 0..60 {
            tx.send(SampleBatch::new(vec![0.0; config.window_size])).unwrap();
        }
        drop(tx);

        let result = session.calibrate(&rx, NullSink::new(), 2000.0);
        assert!(matches!(
            result,
            Err(CalibrationError::AmplitudeTooLow { windows: 21, .. })
        ));
    }

    #[test]
    fn test_one_long_batch_is_framed_whole() {
        let config = small_config();
        let session = SonarSession::new(config.clone()).unwrap();
        let (tx, rx) = unbounded();
        // Far more than the backlog cap in a single batch, sender kept open
        tx.send(SampleBatch::new(vec![0.0; config.window_size * 60]))
            .unwrap();

        let result = session.calibrate(&rx, NullSink::new(), 2000.0);
        assert!(matches!(
            result,
            Err(CalibrationError::AmplitudeTooLow { windows: 21, .. })
        ));
        assert_eq!(session.stats().snapshot().samples_dropped, 0);
        drop(tx);
    }

    #[test]
    fn test_calibration_reports_closed_input() {
        let config = small_config();
        let session = SonarSession::new(config.clone()).unwrap();
        let (tx, rx) = unbounded();
        tx.send(SampleBatch::new(tone(2000.0, 0.5, config.window_size * 3, 8000)))
            .unwrap();
        drop(tx);

        assert_eq!(
            session.calibrate(&rx, NullSink::new(), 2000.0),
            Err(CalibrationError::InputClosed { windows: 3 })
        );
    }

    /// Keeps everything written, paced like a device at 8 kHz.
    #[derive(Clone, Default)]
    struct Recorder {
        samples: Arc<std::sync::Mutex<Vec<f32>>>,
    }

    impl AudioSink for Recorder {
        fn write(&mut self, samples: &[f32]) -> Result<(), SinkError> {
            self.samples.lock().unwrap().extend_from_slice(samples);
            NullSink::paced(8000).write(samples)
        }
    }

    #[test]
    fn test_tone_keeps_playing_across_handoff() {
        let config = small_config();
        let session = SonarSession::new(config.clone()).unwrap();
        let (tx, rx) = unbounded();
        for chunk in tone(2000.0, 0.5, config.window_size * 60, 8000).chunks(config.window_size) {
            tx.send(SampleBatch::new(chunk.to_vec())).unwrap();
        }

        let recorder = Recorder::default();
        let (calibration, thresholds, tone_worker) =
            session.spawn_calibration_with_tone(rx, recorder.clone());
        let threshold = calibration.join().unwrap().unwrap();
        assert_eq!(thresholds.recv().unwrap(), threshold);

        thread::sleep(Duration::from_millis(100));
        assert!(!tone_worker.is_finished());
        session.stop();
        let written = tone_worker.join().unwrap().unwrap();

        // One unbroken sine: a restart would reset the phase mid-buffer
        let recorded = recorder.samples.lock().unwrap().clone();
        assert_eq!(recorded.len() as u64, written);
        let mut expected = vec![0.0; recorded.len()];
        ToneGenerator::constant(2000.0, 8000, config.amplitude).fill(&mut expected);
        assert_eq!(recorded, expected);
    }

    #[test]
    fn test_failed_calibration_stops_tone_worker() {
        let config = small_config();
        let session = SonarSession::new(config.clone()).unwrap();
        let (tx, rx) = unbounded();
        for _ in 0..60 {
            tx.send(SampleBatch::new(vec![0.0; config.window_size])).unwrap();
        }
        drop(tx);

        let (calibration, thresholds, tone_worker) =
            session.spawn_calibration_with_tone(rx, NullSink::paced(8000));
        assert!(matches!(
            calibration.join().unwrap(),
            Err(CalibrationError::AmplitudeTooLow { .. })
        ));
        assert!(thresholds.recv().is_err());
        // Finishes without the session being stopped
        assert!(tone_worker.join().unwrap().is_ok());
        assert!(!session.token().is_cancelled());
    }

    #[test]
    fn test_cancelled_session_stops_detector() {
        let session = SonarSession::new(small_config()).unwrap();
        let (_input_tx, input_rx) = unbounded::<SampleBatch>();
        let (threshold_tx, threshold_rx) = bounded(1);
        threshold_tx.send(ThresholdState::fixed(1.0)).unwrap();

        let (handle, _events) = session.spawn_detector(input_rx, threshold_rx);
        session.stop();
        let summary = handle.join().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
    }

    #[test]
    fn test_detector_without_threshold_never_runs() {
        let session = SonarSession::new(small_config()).unwrap();
        let (input_tx, input_rx) = unbounded();
        input_tx.send(SampleBatch::new(vec![0.3; 4096])).unwrap();
        let (threshold_tx, threshold_rx) = bounded::<ThresholdState>(1);
        drop(threshold_tx);

        let (handle, _events) = session.spawn_detector(input_rx, threshold_rx);
        let summary = handle.join().unwrap();
        assert_eq!(summary.stop_reason, StopReason::NotCalibrated);
        assert_eq!(summary.windows, 0);
    }
}
