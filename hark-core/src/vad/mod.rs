//! Amplitude-based voice activity detection.
//!
//! Three pieces, leaves first:
//!
//! - [`NoiseFloorEstimator`]: EMA of ambient peak amplitude, frozen during speech.
//! - [`ThresholdPolicy`]: `max(floor * ratio, min_amplitude)`.
//! - [`SpeechStateMachine`]: Idle/Speaking with a silence hangover and a hard
//!   session-length cap. Owns the estimator and the open [`SpeechSession`].

pub mod noise_floor;
pub mod state_machine;
pub mod threshold;

pub use noise_floor::NoiseFloorEstimator;
pub use state_machine::{CloseReason, SpeechSession, SpeechStateMachine, Step};
pub use threshold::ThresholdPolicy;

use serde::{Deserialize, Serialize};

/// Observable state of the speech state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadState {
    /// Waiting for a block louder than the threshold.
    Idle,
    /// A session is open and accumulating blocks.
    Speaking,
}

impl VadState {
    pub fn is_speaking(self) -> bool {
        self == VadState::Speaking
    }
}
