/// Derives the speech/silence boundary from the current noise floor.
///
/// `min_amplitude` is a hard floor so a muted or disconnected input, whose
/// estimated noise floor decays towards zero, cannot make every click a
/// speech onset.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdPolicy {
    ratio: f32,
    min_amplitude: f32,
}

impl ThresholdPolicy {
    pub fn new(ratio: f32, min_amplitude: f32) -> Self {
        Self {
            ratio,
            min_amplitude,
        }
    }

    pub fn threshold(&self, noise_floor: f32) -> f32 {
        (noise_floor * self.ratio).max(self.min_amplitude)
    }
}
