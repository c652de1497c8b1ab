//! Framing of irregular sample batches into fixed-size analysis windows.
//!
//! Audio arrives from the input device in batches of whatever size the
//! driver delivers. The [`Framer`] accumulates them and hands out
//! contiguous, non-overlapping windows in arrival order. Consumed samples
//! are dropped immediately; nothing is kept for replay.

use crate::collector::types::SampleBatch;

/// Default number of whole windows that may sit in the buffer.
pub const DEFAULT_MAX_BACKLOG_WINDOWS: usize = 16;

/// Accumulates samples and yields fixed-length windows.
#[derive(Debug)]
pub struct Framer {
    /// Samples per window
    window_size: usize,
    /// Buffered samples not yet handed out
    buffer: Vec<f32>,
    /// Upper bound on buffered samples
    max_buffered: usize,
    /// Samples discarded because the consumer fell behind
    dropped_samples: u64,
}

impl Framer {
    /// Create a framer producing windows of `window_size` samples.
    pub fn new(window_size: usize) -> Self {
        Self::with_backlog(window_size, DEFAULT_MAX_BACKLOG_WINDOWS)
    }

    /// Create a framer that keeps at most `max_windows` windows buffered.
    pub fn with_backlog(window_size: usize, max_windows: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            buffer: Vec::with_capacity(window_size * 2),
            max_buffered: window_size * max_windows.max(1),
            dropped_samples: 0,
        }
    }

    /// Append a batch. Empty batches are a no-op.
    ///
    /// The backlog cap applies to samples left over from earlier batches:
    /// if they exceed it, whole windows are discarded from the front so the
    /// freshest audio is analysed next. The incoming batch is always kept
    /// in full.
    pub fn ingest(&mut self, batch: &SampleBatch) {
        if batch.is_empty() {
            return;
        }
        self.trim_backlog();
        self.buffer.extend_from_slice(batch.samples());
    }

    fn trim_backlog(&mut self) {
        if self.buffer.len() <= self.max_buffered {
            return;
        }
        let excess = self.buffer.len() - self.max_buffered;
        let drop = (excess + self.window_size - 1) / self.window_size * self.window_size;
        let drop = drop.min(self.buffer.len());
        self.buffer.drain(..drop);
        self.dropped_samples += drop as u64;
        tracing::warn!(
            dropped = drop,
            "Analysis fell behind audio input, discarded oldest windows"
        );
    }

    /// Remove and return the next full window, if one is buffered.
    pub fn extract_window(&mut self) -> Option<Vec<f32>> {
        if self.buffer.len() < self.window_size {
            return None;
        }
        let window: Vec<f32> = self.buffer.drain(..self.window_size).collect();
        Some(window)
    }

    /// Number of samples currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total samples discarded by the backlog cap.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }
}
