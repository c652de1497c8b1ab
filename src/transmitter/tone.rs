//! Tone synthesis for the emitted sonar signal.

use std::f64::consts::TAU;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    /// Endless sine at one frequency
    Constant { freq: f64 },
    /// Linear frequency sweep over a bounded number of samples
    Sweep { low: f64, high: f64, total: u64 },
}

/// Generates sine tones block by block without phase jumps between blocks.
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    shape: Shape,
    sample_rate: f64,
    amplitude: f32,
    /// Samples generated so far
    position: u64,
    /// Running phase of a sweep, in radians
    phase: f64,
}

impl ToneGenerator {
    /// A continuous sine at `freq` Hz.
    pub fn constant(freq: f32, sample_rate: u32, amplitude: f32) -> Self {
        Self {
            shape: Shape::Constant { freq: freq as f64 },
            sample_rate: sample_rate as f64,
            amplitude,
            position: 0,
            phase: 0.0,
        }
    }

    /// A sweep whose instantaneous frequency moves linearly from `low` to
    /// `high` Hz over `duration`.
    pub fn sweep(low: f32, high: f32, duration: Duration, sample_rate: u32, amplitude: f32) -> Self {
        let total = (duration.as_secs_f64() * sample_rate as f64).round() as u64;
        Self {
            shape: Shape::Sweep {
                low: low as f64,
                high: high as f64,
                total,
            },
            sample_rate: sample_rate as f64,
            amplitude,
            position: 0,
            phase: 0.0,
        }
    }

    /// Total samples this generator produces, `None` if unbounded.
    pub fn total_samples(&self) -> Option<u64> {
        match self.shape {
            Shape::Constant { .. } => None,
            Shape::Sweep { total, .. } => Some(total),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.total_samples()
            .map(|total| self.position >= total)
            .unwrap_or(false)
    }

    /// Instantaneous frequency at sample `n`.
    pub fn frequency_at(&self, n: u64) -> f64 {
        match self.shape {
            Shape::Constant { freq } => freq,
            Shape::Sweep { low, high, total } => {
                if total == 0 {
                    return high;
                }
                let progress = (n.min(total) as f64) / total as f64;
                low + (high - low) * progress
            }
        }
    }

    /// Fill `out` with the next samples. Returns how many were written,
    /// which is less than `out.len()` only when a sweep has ended.
    pub fn fill(&mut self, out: &mut [f32]) -> usize {
        let available = match self.total_samples() {
            Some(total) => (total.saturating_sub(self.position) as usize).min(out.len()),
            None => out.len(),
        };

        for sample in &mut out[..available] {
            let value = match self.shape {
                // Absolute sample index keeps a constant tone exact over long runs
                Shape::Constant { freq } => {
                    let t = self.position as f64 / self.sample_rate;
                    (TAU * freq * t).sin()
                }
                Shape::Sweep { .. } => {
                    let v = self.phase.sin();
                    self.phase += TAU * self.frequency_at(self.position) / self.sample_rate;
                    self.phase %= TAU;
                    v
                }
            };
            *sample = self.amplitude * value as f32;
            self.position += 1;
        }
        available
    }
}
