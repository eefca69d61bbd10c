//! Slowly-adapting ambient noise estimate.

/// Exponential moving average of the peak amplitude of non-speech blocks.
///
/// `floor ← (1 − α)·floor + α·peak`
///
/// The state machine only calls [`update`](Self::update) while Idle, so a
/// loud utterance never inflates the floor and masks its own tail.
#[derive(Debug, Clone)]
pub struct NoiseFloorEstimator {
    floor: f32,
    adaptation_rate: f32,
}

impl NoiseFloorEstimator {
    /// `initial` should be a conservative non-zero guess so a silent stream
    /// does not trigger before the first real block is seen.
    pub fn new(initial: f32, adaptation_rate: f32) -> Self {
        Self {
            floor: initial.max(0.0),
            adaptation_rate: adaptation_rate.clamp(0.0, 1.0),
        }
    }

    pub fn update(&mut self, peak: u16) {
        let a = self.adaptation_rate;
        self.floor = ((1.0 - a) * self.floor + a * peak as f32).max(0.0);
    }

    pub fn floor(&self) -> f32 {
        self.floor
    }
}
