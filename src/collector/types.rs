//! Audio sample types exchanged between the collector and the analysis workers.

use chrono::{DateTime, Utc};

/// A batch of mono samples as delivered by an input source.
///
/// Batches have no fixed length; the framer regroups them into windows.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    /// Time the batch was received
    pub received_at: DateTime<Utc>,
    samples: Vec<f32>,
}

impl SampleBatch {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            received_at: Utc::now(),
            samples,
        }
    }

    /// Downmix interleaved frames by keeping the first channel.
    pub fn from_interleaved(data: &[f32], channels: usize) -> Self {
        if channels <= 1 {
            return Self::new(data.to_vec());
        }
        Self::new(data.chunks(channels).map(|frame| frame[0]).collect())
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_channel_downmix() {
        let batch = SampleBatch::from_interleaved(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 2);
        assert_eq!(batch.samples(), &[1.0, 2.0, 3.0]);

        let mono = SampleBatch::from_interleaved(&[0.1, 0.2], 1);
        assert_eq!(mono.len(), 2);
    }
}
