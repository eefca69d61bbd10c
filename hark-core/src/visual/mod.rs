//! Display-only level metering for a waveform/level widget.
//!
//! Nothing here feeds back into VAD decisions. `max_amplitude` is a fixed
//! calibration constant that only scales the display.

use crate::buffering::block::{AmplitudeMetrics, Block};
use crate::ipc::events::VisualizationFrame;

#[derive(Debug, Clone, Copy)]
pub struct VisualizationSampler {
    stride: usize,
    max_amplitude: f32,
}

impl VisualizationSampler {
    pub fn new(stride: usize, max_amplitude: f32) -> Self {
        Self {
            stride: stride.max(1),
            max_amplitude,
        }
    }

    /// `is_speaking` is the state *before* this block is classified.
    pub fn sample(
        &self,
        block: &Block,
        metrics: AmplitudeMetrics,
        is_speaking: bool,
        threshold: f32,
    ) -> VisualizationFrame {
        VisualizationFrame {
            level: self.normalize(metrics.rms),
            waveform: self.decimate(block),
            is_speaking,
            threshold: self.normalize(threshold),
        }
    }

    fn normalize(&self, amplitude: f32) -> f32 {
        (amplitude / self.max_amplitude).clamp(0.0, 1.0)
    }

    /// Every `stride`-th frame, keeping all channels of each kept frame.
    fn decimate(&self, block: &Block) -> Vec<i16> {
        let ch = block.channels() as usize;
        block
            .samples()
            .chunks(ch)
            .step_by(self.stride)
            .flatten()
            .copied()
            .collect()
    }
}
