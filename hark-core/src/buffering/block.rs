//! Typed audio block passed from the capture boundary to the VAD stages.

/// Per-block amplitude measurements. Never outlives the block that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeMetrics {
    /// Root-mean-square over every sample of the block.
    pub rms: f32,
    /// Largest absolute sample value. `u16` so that `|i16::MIN|` fits.
    pub peak: u16,
}

/// One fixed-size chunk of interleaved signed 16-bit PCM.
///
/// Immutable once produced by the capture boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    samples: Vec<i16>,
    channels: u16,
}

impl Block {
    pub fn new(samples: Vec<i16>, channels: u16) -> Self {
        Self {
            samples,
            channels: channels.max(1),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of multi-channel frames in the block.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Measured once per block by the capture loop and shared by the VAD
    /// and the visualizer.
    pub fn metrics(&self) -> AmplitudeMetrics {
        AmplitudeMetrics {
            rms: rms(&self.samples),
            peak: peak(&self.samples),
        }
    }
}

/// Root-mean-square of a sample slice, accumulated in f64 so long blocks of
/// full-scale samples do not lose precision.
fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

fn peak(samples: &[i16]) -> u16 {
    samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0)
}
