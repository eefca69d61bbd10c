//! Turns closed speech sessions into emitted segments.

use std::time::Duration;

use tracing::debug;

use crate::vad::SpeechSession;

/// A finished utterance: interleaved 16-bit PCM plus its format.
///
/// Handed to the consumer by value; the engine keeps no reference to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Segment {
    /// Multi-channel frame count.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Concatenates sessions, dropping ones too short to be speech.
#[derive(Debug, Clone)]
pub struct Segmenter {
    sample_rate: u32,
    channels: u16,
    min_segment_blocks: usize,
}

impl Segmenter {
    pub fn new(sample_rate: u32, channels: u16, min_segment_blocks: usize) -> Self {
        Self {
            sample_rate,
            channels,
            min_segment_blocks,
        }
    }

    /// Returns `None` for sessions of `min_segment_blocks` blocks or fewer
    /// (clicks and transients). Otherwise concatenates every block in
    /// arrival order without touching the samples.
    pub fn close(&self, session: SpeechSession) -> Option<Segment> {
        let blocks = session.block_count();
        if blocks <= self.min_segment_blocks {
            debug!(
                blocks,
                min_segment_blocks = self.min_segment_blocks,
                "session too short — discarded"
            );
            return None;
        }

        let mut samples = Vec::with_capacity(session.total_samples());
        for block in session.into_blocks() {
            samples.extend_from_slice(block.samples());
        }

        Some(Segment {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}
