//! Band-limited magnitude spectra of analysis windows.
//!
//! Each window is transformed with a real FFT and only the bins inside the
//! configured [`FrequencyBand`] are kept. Magnitudes are unnormalised
//! (`|X[k]|`), so a full-scale sine centred on a bin reads `amp * N / 2`.

use crate::config::ConfigError;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A half-open range of FFT bins `[low_ind, high_ind)`.
///
/// Construction guarantees the range is non-empty and lies inside the
/// real-FFT output of the window it was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyBand {
    low_ind: usize,
    high_ind: usize,
    window_size: usize,
}

impl FrequencyBand {
    /// Build a band directly from bin indices.
    pub fn new(low_ind: usize, high_ind: usize, window_size: usize) -> Result<Self, ConfigError> {
        if high_ind <= low_ind {
            return Err(ConfigError::DegenerateBand { low_ind, high_ind });
        }
        let bins = window_size / 2 + 1;
        if high_ind > bins {
            return Err(ConfigError::InvalidValue(format!(
                "band upper bin {high_ind} exceeds the {bins} bins of a {window_size}-sample window"
            )));
        }
        Ok(Self {
            low_ind,
            high_ind,
            window_size,
        })
    }

    /// Map a frequency range to bins with `floor(freq * window_size / sample_rate)`.
    pub fn from_hz(
        low_hz: f32,
        high_hz: f32,
        window_size: usize,
        sample_rate: u32,
    ) -> Result<Self, ConfigError> {
        let nyquist = sample_rate as f32 / 2.0;
        for freq in [low_hz, high_hz] {
            if !(0.0..=nyquist).contains(&freq) {
                return Err(ConfigError::InvalidValue(format!(
                    "band edge {freq} Hz outside [0, {nyquist}] Hz"
                )));
            }
        }
        Self::new(
            bin_index(low_hz, window_size, sample_rate),
            bin_index(high_hz, window_size, sample_rate),
            window_size,
        )
    }

    pub fn low_ind(&self) -> usize {
        self.low_ind
    }

    pub fn high_ind(&self) -> usize {
        self.high_ind
    }

    /// Number of bins in the band (always > 0).
    pub fn width(&self) -> usize {
        self.high_ind - self.low_ind
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

/// FFT bin containing `freq`.
pub fn bin_index(freq: f32, window_size: usize, sample_rate: u32) -> usize {
    (freq as f64 * window_size as f64 / sample_rate as f64).floor() as usize
}

/// Magnitudes of one window restricted to a band.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Spectrum {
    bins: Vec<f32>,
}

impl Spectrum {
    pub fn from_bins(bins: Vec<f32>) -> Self {
        Self { bins }
    }

    /// All-zero spectrum, used as the predecessor of the first window.
    pub fn zeros(len: usize) -> Self {
        Self {
            bins: vec![0.0; len],
        }
    }

    pub fn bins(&self) -> &[f32] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Largest magnitude in the band (0 for an empty spectrum).
    pub fn peak(&self) -> f32 {
        self.bins.iter().copied().fold(0.0, f32::max)
    }

    /// Copy with every bin strictly below `thresh` set to zero.
    pub fn thresholded(&self, thresh: f32) -> Spectrum {
        threshold(self, thresh)
    }

    /// Per-bin absolute difference. Bins missing from the shorter side count as zero.
    pub fn abs_diff(&self, other: &Spectrum) -> Spectrum {
        let len = self.len().max(other.len());
        let at = |s: &Spectrum, i: usize| s.bins.get(i).copied().unwrap_or(0.0);
        Spectrum {
            bins: (0..len).map(|i| (at(self, i) - at(other, i)).abs()).collect(),
        }
    }

    pub fn count_nonzero(&self) -> usize {
        self.bins.iter().filter(|&&v| v != 0.0).count()
    }
}

/// Zero every bin below `thresh`. Bins equal to `thresh` are kept.
pub fn threshold(spectrum: &Spectrum, thresh: f32) -> Spectrum {
    Spectrum {
        bins: spectrum
            .bins
            .iter()
            .map(|&v| if v < thresh { 0.0 } else { v })
            .collect(),
    }
}

/// Computes band-limited magnitude spectra for fixed-size windows.
pub struct SpectralAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
    band: FrequencyBand,
}

impl SpectralAnalyzer {
    /// Plan the transform for the band's window size.
    pub fn new(band: FrequencyBand) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(band.window_size());
        let input = fft.make_input_vec();
        let output = fft.make_output_vec();
        Self {
            fft,
            input,
            output,
            band,
        }
    }

    pub fn band(&self) -> FrequencyBand {
        self.band
    }

    pub fn window_size(&self) -> usize {
        self.band.window_size()
    }

    /// Magnitude spectrum of `window` over the configured band.
    ///
    /// Windows shorter than the configured size are zero padded and longer
    /// ones truncated; the result always has `band.width()` bins.
    pub fn analyze(&mut self, window: &[f32]) -> Spectrum {
        let n = self.input.len();
        let used = window.len().min(n);
        self.input[..used].copy_from_slice(&window[..used]);
        self.input[used..].fill(0.0);

        if let Err(e) = self.fft.process(&mut self.input, &mut self.output) {
            tracing::warn!("FFT failed, treating window as silent: {e}");
            return Spectrum::zeros(self.band.width());
        }

        Spectrum {
            bins: self.output[self.band.low_ind()..self.band.high_ind()]
                .iter()
                .map(|c| c.norm())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amp: f32, len: usize, sample_rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                amp * (2.0 * std::f64::consts::PI * freq as f64 * t).sin() as f32
            })
            .collect()
    }

    #[test]
    fn test_bin_mapping_floors() {
        assert_eq!(bin_index(18_000.0, 2048, 44_100), 835);
        assert_eq!(bin_index(20_000.0, 2048, 44_100), 928);
        assert_eq!(bin_index(0.0, 2048, 44_100), 0);
    }

    #[test]
    fn test_band_rejects_empty_range() {
        assert_eq!(
            FrequencyBand::new(10, 10, 2048),
            Err(ConfigError::DegenerateBand {
                low_ind: 10,
                high_ind: 10
            })
        );
        assert!(FrequencyBand::new(12, 10, 2048).is_err());
        assert!(FrequencyBand::new(0, 1026, 2048).is_err());
        assert!(FrequencyBand::new(0, 1025, 2048).is_ok());
    }

    #[test]
    fn test_spectrum_length_matches_band() {
        let band = FrequencyBand::from_hz(18_000.0, 20_000.0, 2048, 44_100).unwrap();
        let mut analyzer = SpectralAnalyzer::new(band);
        let spectrum = analyzer.analyze(&vec![0.0; 2048]);
        assert_eq!(spectrum.len(), band.width());
        assert_eq!(spectrum.count_nonzero(), 0);

        // Short windows are padded, not rejected
        let spectrum = analyzer.analyze(&[0.5; 100]);
        assert_eq!(spectrum.len(), band.width());
    }

    #[test]
    fn test_bin_centred_sine_peak() {
        let window_size = 2048;
        let sample_rate = 44_100;
        let bin = 882;
        let freq = bin as f32 * sample_rate as f32 / window_size as f32;
        let band = FrequencyBand::from_hz(18_000.0, 20_000.0, window_size, sample_rate).unwrap();
        let mut analyzer = SpectralAnalyzer::new(band);

        let spectrum = analyzer.analyze(&sine(freq, 0.8, window_size, sample_rate));
        let expected = 0.8 * window_size as f32 / 2.0;
        assert!((spectrum.peak() - expected).abs() / expected < 0.01);

        let peak_bin = spectrum
            .bins()
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0;
        assert_eq!(peak_bin + band.low_ind(), bin);
    }

    #[test]
    fn test_threshold_keeps_ties() {
        let spectrum = Spectrum::from_bins(vec![0.5, 1.0, 1.5, 0.99]);
        let out = threshold(&spectrum, 1.0);
        assert_eq!(out.bins(), &[0.0, 1.0, 1.5, 0.0]);
    }

    #[test]
    fn test_threshold_idempotent() {
        let spectrum = Spectrum::from_bins(vec![3.0, 0.1, 7.5, 2.0, 2.0001, 0.0]);
        for t in [0.0, 1.0, 2.0, 5.0, 100.0] {
            let once = threshold(&spectrum, t);
            let twice = threshold(&once, t);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_abs_diff_and_count() {
        let a = Spectrum::from_bins(vec![1.0, 5.0, 0.0]);
        let b = Spectrum::from_bins(vec![3.0, 5.0, 2.0]);
        let diff = a.abs_diff(&b);
        assert_eq!(diff.bins(), &[2.0, 0.0, 2.0]);
        assert_eq!(diff.count_nonzero(), 2);
        assert_eq!(Spectrum::zeros(4).peak(), 0.0);
    }
}
