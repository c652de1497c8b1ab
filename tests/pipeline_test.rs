//! End-to-end tests of calibration and movement detection over synthetic audio

use crossbeam_channel::{unbounded, Sender};
use sonar_sensor_agent::collector::wav::write_mono;
use sonar_sensor_agent::collector::{ReplayConfig, WavCollector};
use sonar_sensor_agent::config::{BandConfig, Config};
use sonar_sensor_agent::core::{SessionReport, StopReason};
use sonar_sensor_agent::transmitter::NullSink;
use sonar_sensor_agent::{SampleBatch, SonarSession};
use std::time::Duration;

const SAMPLE_RATE: u32 = 8000;
const WINDOW: usize = 256;

/// 2000 Hz sits exactly on bin 64 of a 256-sample window at 8 kHz, so a
/// steady tone gives the same magnitude spectrum in every window.
fn test_config() -> Config {
    let mut config = Config::default();
    config.sample_rate = SAMPLE_RATE;
    config.window_size = WINDOW;
    config.tone_freq = 2000.0;
    config.calibration_freq = 2000.0;
    config.band = BandConfig {
        low_hz: 1500.0,
        high_hz: 2500.0,
    };
    config.batch_timeout = Duration::from_millis(10);
    config
}

fn sine(freq: f64, amp: f64, i: usize) -> f64 {
    amp * (std::f64::consts::TAU * freq * i as f64 / SAMPLE_RATE as f64).sin()
}

/// One window of the reflected tone alone.
fn still_window(start: usize) -> Vec<f32> {
    (start..start + WINDOW)
        .map(|i| sine(2000.0, 0.5, i) as f32)
        .collect()
}

/// One window where a moving hand adds Doppler sidebands around the tone.
fn moving_window(start: usize) -> Vec<f32> {
    (start..start + WINDOW)
        .map(|i| (sine(2000.0, 0.5, i) + sine(1750.0, 0.3, i) + sine(2250.0, 0.3, i)) as f32)
        .collect()
}

/// Build a signal from a pattern of `'.'` (still) and `'m'` (moving) windows.
///
/// Repeated `'m'` windows have identical spectra, so movement is written as
/// alternating `"m."` runs.
fn signal(pattern: &str) -> Vec<Vec<f32>> {
    pattern
        .chars()
        .enumerate()
        .map(|(n, c)| match c {
            'm' => moving_window(n * WINDOW),
            _ => still_window(n * WINDOW),
        })
        .collect()
}

fn send_windows(tx: &Sender<SampleBatch>, windows: &[Vec<f32>]) {
    for window in windows {
        tx.send(SampleBatch::new(window.clone())).unwrap();
    }
}

fn calibration_pattern() -> String {
    ".".repeat(50)
}

#[test]
fn test_still_scene_produces_no_movement() {
    let session = SonarSession::new(test_config()).unwrap();
    let (tx, rx) = unbounded();
    send_windows(&tx, &signal(&format!("{}{}", calibration_pattern(), ".".repeat(40))));
    drop(tx);

    let threshold = session.calibrate(&rx, NullSink::new(), 2000.0).unwrap();
    let expected = 0.5 * WINDOW as f32 / 2.0 / 38.0;
    assert!((threshold.detection() - expected).abs() / expected < 0.02);

    let (events_tx, events_rx) = unbounded();
    let summary = session.run_detection(&rx, threshold, &events_tx);
    assert_eq!(summary.stop_reason, StopReason::InputClosed);
    assert_eq!(summary.windows, 40);
    assert_eq!(summary.episodes, 0);
    assert!(events_rx.try_recv().is_err());
    assert_eq!(session.read_move_count(), 0);
}

#[test]
fn test_hand_movement_is_one_episode() {
    let session = SonarSession::new(test_config()).unwrap();
    let (tx, rx) = unbounded();
    let pattern = format!("{}{}m.m.m.{}", calibration_pattern(), ".".repeat(20), ".".repeat(10));
    send_windows(&tx, &signal(&pattern));
    drop(tx);

    let threshold = session.calibrate(&rx, NullSink::new(), 2000.0).unwrap();
    let (events_tx, events_rx) = unbounded();
    let summary = session.run_detection(&rx, threshold, &events_tx);
    assert_eq!(summary.episodes, 1);

    // Six windows differ from their predecessor; one quiet window is
    // tolerated and the second ends the episode.
    let events: Vec<_> = events_rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].length, 7);
    assert_eq!(events[0].ended_at_window, 28);
    assert_eq!(events[0].duration_ms, 224);

    let monitor = session.monitor();
    assert!(monitor.take_movement_flag());
    assert!(!monitor.take_movement_flag());
    assert_eq!(session.read_move_count(), 7);
    assert_eq!(session.read_move_count(), 0);
    assert!(!session.is_moving());
}

#[test]
fn test_threaded_session_hands_threshold_to_detector() {
    let session = SonarSession::new(test_config()).unwrap();
    let (tx, rx) = unbounded();
    let pattern = format!(
        "{}{}m.m.m.{}m.m.m.m.m.{}",
        calibration_pattern(),
        ".".repeat(10),
        ".".repeat(10),
        ".".repeat(10)
    );
    send_windows(&tx, &signal(&pattern));
    drop(tx);

    let (calibration, thresholds) = session.spawn_calibration(rx.clone(), NullSink::new(), 2000.0);
    let (detection, events) = session.spawn_detector(rx, thresholds);

    let threshold = calibration.join().unwrap().unwrap();
    assert!(threshold.is_calibrated());

    let summary = detection.join().unwrap();
    assert_eq!(summary.stop_reason, StopReason::InputClosed);
    assert_eq!(summary.windows, 46);
    assert_eq!(summary.episodes, 2);

    let lengths: Vec<u32> = events.try_iter().map(|e| e.length).collect();
    assert_eq!(lengths, vec![7, 11]);
    // The longer of the two unread episodes wins
    assert_eq!(session.read_move_count(), 11);

    let stats = session.stats().snapshot();
    assert_eq!(stats.windows_analyzed, 96);
    assert_eq!(stats.episodes, 2);
    assert_eq!(stats.samples_dropped, 0);
}

#[test]
fn test_replay_from_wav_file() {
    let path = std::env::temp_dir().join(format!("sonar-pipeline-{}.wav", std::process::id()));
    let pattern = format!("{}{}m.m.m.m.{}", ".".repeat(60), ".".repeat(20), ".".repeat(20));
    let samples: Vec<f32> = signal(&pattern).concat();
    write_mono(&path, &samples, SAMPLE_RATE).unwrap();

    let mut collector = WavCollector::open(&path, ReplayConfig::default()).unwrap();
    assert_eq!(collector.sample_rate(), SAMPLE_RATE);
    collector.start().unwrap();

    let session = SonarSession::new(test_config()).unwrap();
    let threshold = session
        .calibrate(collector.receiver(), NullSink::paced(SAMPLE_RATE), 2000.0)
        .unwrap();
    let (events_tx, events_rx) = unbounded();
    let summary = session.run_detection(collector.receiver(), threshold, &events_tx);
    collector.stop();

    assert_eq!(summary.stop_reason, StopReason::InputClosed);
    // Replay batches are not window aligned, so only the episode count is exact
    let events: Vec<_> = events_rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert!(events[0].length >= 8);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_session_report_serializes() {
    let session = SonarSession::new(test_config()).unwrap();
    let (tx, rx) = unbounded();
    send_windows(&tx, &signal(&format!("{}..m.m....", calibration_pattern())));
    drop(tx);

    let threshold = session.calibrate(&rx, NullSink::new(), 2000.0).unwrap();
    let (events_tx, events_rx) = unbounded();
    session.run_detection(&rx, threshold, &events_tx);
    let report = session.report(Some(threshold), events_rx.try_iter().collect());

    let json = serde_json::to_string(&report).unwrap();
    let parsed: SessionReport = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.session_id, session.session_id());
    assert_eq!(parsed.episodes.len(), 1);
    assert_eq!(parsed.threshold, Some(threshold));
    assert_eq!(parsed.stats.episodes, 1);
}
