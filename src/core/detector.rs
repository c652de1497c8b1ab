//! Movement detection from window-to-window spectral changes.
//!
//! A reflecting hand shifts and reshapes the echo of the emitted tone. Each
//! window's thresholded spectrum is compared with the previous one; when
//! more than one bin changes by at least twice the detection threshold the
//! window counts as active. Runs of active windows, bridged by a small
//! number of quiet "stall" windows, form a movement episode whose length
//! (in windows) is reported when it ends.

use crate::core::spectrum::{SpectralAnalyzer, Spectrum};
use crate::core::threshold::ThresholdState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// A completed movement episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeEvent {
    /// Number of windows in the episode, tolerated stalls included
    pub length: u32,
    /// Index (1-based) of the window that closed the episode
    pub ended_at_window: u64,
    /// Audio time covered by the episode in milliseconds
    pub duration_ms: u64,
    /// Wall-clock time the episode was closed
    pub ended_at: DateTime<Utc>,
}

/// Movement state shared with external readers.
///
/// Written only by the detection worker. `read_move_count` swaps the
/// pending value out atomically, so an episode that ends concurrently is
/// either returned now or by the next read, never lost.
#[derive(Debug, Default)]
pub struct MovementMonitor {
    movement_detected: AtomicBool,
    movement_flag: AtomicBool,
    move_count: AtomicU32,
}

impl MovementMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a movement episode is currently open.
    pub fn is_moving(&self) -> bool {
        self.movement_detected.load(Ordering::SeqCst)
    }

    /// Length of the longest unread episode, resetting it to 0.
    pub fn read_move_count(&self) -> u32 {
        self.move_count.swap(0, Ordering::SeqCst)
    }

    /// Whether an episode has ended since the last call, clearing the flag.
    pub fn take_movement_flag(&self) -> bool {
        self.movement_flag.swap(false, Ordering::SeqCst)
    }

    fn set_moving(&self, moving: bool) {
        self.movement_detected.store(moving, Ordering::SeqCst);
    }

    fn record_episode(&self, length: u32) {
        self.movement_detected.store(false, Ordering::SeqCst);
        // A shorter trailing episode must not replace an unread longer one
        self.move_count.fetch_max(length, Ordering::SeqCst);
        self.movement_flag.store(true, Ordering::SeqCst);
    }
}

/// Thread-safe shared movement monitor.
pub type SharedMovementMonitor = Arc<MovementMonitor>;

/// Run-length state machine over per-window spectral differences.
pub struct MovementDetector {
    analyzer: SpectralAnalyzer,
    threshold: ThresholdState,
    stall_window_threshold: u32,
    sample_rate: u32,
    previous: Spectrum,
    /// Windows in the open episode
    num_moves: u32,
    /// Consecutive quiet windows
    num_stall: u32,
    windows_processed: u64,
    monitor: SharedMovementMonitor,
}

impl MovementDetector {
    pub fn new(
        analyzer: SpectralAnalyzer,
        threshold: ThresholdState,
        stall_window_threshold: u32,
        sample_rate: u32,
    ) -> Self {
        Self::with_monitor(
            analyzer,
            threshold,
            stall_window_threshold,
            sample_rate,
            Arc::new(MovementMonitor::new()),
        )
    }

    /// Create a detector that publishes into an existing monitor.
    pub fn with_monitor(
        analyzer: SpectralAnalyzer,
        threshold: ThresholdState,
        stall_window_threshold: u32,
        sample_rate: u32,
        monitor: SharedMovementMonitor,
    ) -> Self {
        let width = analyzer.band().width();
        Self {
            analyzer,
            threshold,
            stall_window_threshold,
            sample_rate,
            previous: Spectrum::zeros(width),
            num_moves: 0,
            num_stall: 0,
            windows_processed: 0,
            monitor,
        }
    }

    /// Analyse one window and advance the state machine.
    pub fn process_window(&mut self, window: &[f32]) -> Option<EpisodeEvent> {
        let spectrum = self.analyzer.analyze(window);
        self.process_spectrum(&spectrum)
    }

    /// Advance the state machine with an already computed band spectrum.
    pub fn process_spectrum(&mut self, spectrum: &Spectrum) -> Option<EpisodeEvent> {
        self.windows_processed += 1;

        let current = spectrum.thresholded(self.threshold.detection());
        let diff = current
            .abs_diff(&self.previous)
            .thresholded(self.threshold.difference());

        // A lone changed bin is almost always noise
        let active = diff.count_nonzero() > 1;
        let event = self.step(active);

        self.previous = current;
        event
    }

    fn step(&mut self, active: bool) -> Option<EpisodeEvent> {
        if active {
            self.num_moves += 1;
            self.num_stall = 0;
            self.monitor.set_moving(true);
            return None;
        }

        if self.num_moves == 0 {
            return None;
        }

        let mut event = None;
        if self.num_stall < self.stall_window_threshold {
            self.num_moves += 1;
        } else {
            let length = self.num_moves;
            self.monitor.record_episode(length);
            self.num_moves = 0;

            let window_secs = self.analyzer.window_size() as f64 / self.sample_rate as f64;
            tracing::info!(length, "Movement ended");
            event = Some(EpisodeEvent {
                length,
                ended_at_window: self.windows_processed,
                duration_ms: (length as f64 * window_secs * 1000.0).round() as u64,
                ended_at: Utc::now(),
            });
        }
        self.num_stall += 1;
        event
    }

    /// Whether a movement episode is currently open.
    pub fn is_moving(&self) -> bool {
        self.monitor.is_moving()
    }

    /// Length of the longest unread episode, resetting it to 0.
    pub fn read_move_count(&self) -> u32 {
        self.monitor.read_move_count()
    }

    pub fn monitor(&self) -> SharedMovementMonitor {
        Arc::clone(&self.monitor)
    }

    pub fn windows_processed(&self) -> u64 {
        self.windows_processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spectrum::FrequencyBand;

    fn detector() -> MovementDetector {
        let band = FrequencyBand::new(0, 4, 8).unwrap();
        MovementDetector::new(
            SpectralAnalyzer::new(band),
            ThresholdState::fixed(1.0),
            1,
            44_100,
        )
    }

    fn a() -> Spectrum {
        Spectrum::from_bins(vec![10.0, 10.0, 0.0, 0.0])
    }

    fn b() -> Spectrum {
        Spectrum::from_bins(vec![0.0, 0.0, 10.0, 10.0])
    }

    /// Feed spectra and collect `(window index, event)` pairs.
    fn feed(det: &mut MovementDetector, spectra: &[Spectrum]) -> Vec<(usize, EpisodeEvent)> {
        spectra
            .iter()
            .enumerate()
            .filter_map(|(i, s)| det.process_spectrum(s).map(|e| (i + 1, e)))
            .collect()
    }

    #[test]
    fn test_episode_with_tolerated_stall() {
        let mut det = detector();
        // Windows 1-5 active, 6 quiet (tolerated), 7 active,
        // 8 quiet (tolerated again, window 7 reset the stall count), 9 quiet.
        let spectra = [a(), b(), a(), b(), a(), a(), b(), b(), b()];
        let events = feed(&mut det, &spectra[..8]);
        assert!(events.is_empty());
        assert!(det.is_moving());

        let events = feed(&mut det, &spectra[8..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.length, 8);
        assert_eq!(events[0].1.ended_at_window, 9);
        assert!(!det.is_moving());

        assert_eq!(det.read_move_count(), 8);
        assert_eq!(det.read_move_count(), 0);
    }

    #[test]
    fn test_episode_ends_after_stall_budget() {
        let mut det = detector();
        // Windows 1-5 active, 6 quiet (tolerated), 7 quiet (ends episode)
        let events = feed(&mut det, &[a(), b(), a(), b(), a(), a(), a()]);
        assert_eq!(events.len(), 1);
        let (window, event) = &events[0];
        assert_eq!(*window, 7);
        assert_eq!(event.length, 6);
        assert_eq!(event.duration_ms, (6.0 * 8.0 / 44_100.0 * 1000.0_f64).round() as u64);
        assert!(det.monitor().take_movement_flag());
        assert!(!det.monitor().take_movement_flag());
    }

    #[test]
    fn test_first_window_compares_against_silence() {
        let mut det = detector();
        det.process_spectrum(&a());
        assert!(det.is_moving());
    }

    #[test]
    fn test_single_bin_change_is_noise() {
        let mut det = detector();
        let quiet = Spectrum::from_bins(vec![0.0, 0.0, 0.0, 0.0]);
        let one_bin = Spectrum::from_bins(vec![0.0, 50.0, 0.0, 0.0]);
        for s in [&quiet, &one_bin, &quiet, &one_bin] {
            assert!(det.process_spectrum(s).is_none());
            assert!(!det.is_moving());
        }
    }

    #[test]
    fn test_difference_gate_is_stricter() {
        let mut det = detector();
        // Both bins pass the detection threshold (1.0) but change by less than 2.0
        det.process_spectrum(&Spectrum::from_bins(vec![0.0, 0.0, 1.5, 1.5]));
        assert!(!det.is_moving());
        det.process_spectrum(&Spectrum::from_bins(vec![0.0, 0.0, 3.0, 3.0]));
        assert!(!det.is_moving());
        det.process_spectrum(&Spectrum::from_bins(vec![0.0, 0.0, 5.0, 5.0]));
        assert!(det.is_moving());
    }

    #[test]
    fn test_idle_stream_never_moves() {
        let mut det = detector();
        for i in 0..500 {
            let level = (i % 7) as f32 * 0.1;
            let s = Spectrum::from_bins(vec![level, 0.9 - level, level * 0.5, 0.3]);
            assert!(det.process_spectrum(&s).is_none());
            assert!(!det.is_moving());
        }
        assert_eq!(det.read_move_count(), 0);
    }

    #[test]
    fn test_shorter_episode_does_not_overwrite_unread() {
        let mut det = detector();
        // Six-window episode, then a three-window one, with no read in between
        let events = feed(
            &mut det,
            &[a(), b(), a(), b(), a(), a(), a(), b(), a(), a(), a()],
        );
        let lengths: Vec<u32> = events.iter().map(|(_, e)| e.length).collect();
        assert_eq!(lengths, vec![6, 3]);
        assert_eq!(det.read_move_count(), 6);
        assert_eq!(det.read_move_count(), 0);
    }

    #[test]
    fn test_process_window_runs_fft() {
        let mut det = detector();
        assert!(det.process_window(&[0.0; 8]).is_none());
        assert_eq!(det.windows_processed(), 1);
        assert!(!det.is_moving());
    }
}
