//! Idle/Speaking state machine with hangover and a hard session cap.
//!
//! ## Transitions (per block)
//!
//! ```text
//! Idle     peak >  threshold  → Speaking, session = [block]
//! Idle     peak <= threshold  → Idle, noise floor ← EMA(peak)
//! Speaking any                → append block
//!          peak <  threshold  → silence += 1   (else silence = 0)
//!          silence > max_silence_blocks       → close (Silence)
//!          blocks  > max_session_blocks       → close (MaxDuration)
//! ```
//!
//! The threshold for a block is always derived from the floor as it stood
//! *before* that block. The floor is frozen while Speaking.

use std::fmt;

use tracing::debug;

use super::{NoiseFloorEstimator, ThresholdPolicy, VadState};
use crate::buffering::block::{AmplitudeMetrics, Block};

/// Why a session was closed. Diagnostic only: both reasons are handled
/// identically by the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The hangover window expired.
    Silence,
    /// The session hit `max_session_blocks` without going quiet.
    MaxDuration,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Silence => "silence",
            CloseReason::MaxDuration => "max_duration",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blocks collected between speech onset and speech end.
#[derive(Debug)]
pub struct SpeechSession {
    blocks: Vec<Block>,
    silence_blocks: u32,
}

impl SpeechSession {
    fn open(first: Block) -> Self {
        Self {
            blocks: vec![first],
            silence_blocks: 0,
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Elapsed blocks, including the one that triggered the session.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Consecutive below-threshold blocks at the tail of the session.
    pub fn silence_blocks(&self) -> u32 {
        self.silence_blocks
    }

    pub fn total_samples(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }
}

/// Result of feeding one block to the state machine.
#[derive(Debug)]
pub enum Step {
    /// Stayed Idle; the noise floor absorbed the block.
    Idle,
    /// Idle → Speaking on this block.
    Started,
    /// Still Speaking; block appended.
    Continued,
    /// Speaking → Idle. The session is handed over for segmentation.
    Closed {
        session: SpeechSession,
        reason: CloseReason,
    },
}

pub struct SpeechStateMachine {
    noise: NoiseFloorEstimator,
    policy: ThresholdPolicy,
    max_silence_blocks: u32,
    max_session_blocks: u32,
    session: Option<SpeechSession>,
}

impl SpeechStateMachine {
    pub fn new(
        noise: NoiseFloorEstimator,
        policy: ThresholdPolicy,
        max_silence_blocks: u32,
        max_session_blocks: u32,
    ) -> Self {
        Self {
            noise,
            policy,
            max_silence_blocks,
            max_session_blocks,
            session: None,
        }
    }

    pub fn state(&self) -> VadState {
        if self.session.is_some() {
            VadState::Speaking
        } else {
            VadState::Idle
        }
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise.floor()
    }

    /// Threshold that the next block will be judged against.
    pub fn threshold(&self) -> f32 {
        self.policy.threshold(self.noise.floor())
    }

    /// The open session, if any.
    pub fn session(&self) -> Option<&SpeechSession> {
        self.session.as_ref()
    }

    /// Classify one block. `metrics` must be the block's own measurements.
    pub fn step(&mut self, block: Block, metrics: AmplitudeMetrics) -> Step {
        let peak = metrics.peak;
        let threshold = self.threshold();
        let peak_f = peak as f32;

        let Some(mut session) = self.session.take() else {
            if peak_f > threshold {
                debug!(peak, threshold, "speech start");
                self.session = Some(SpeechSession::open(block));
                return Step::Started;
            }
            self.noise.update(peak);
            return Step::Idle;
        };

        session.blocks.push(block);
        if peak_f < threshold {
            session.silence_blocks += 1;
        } else {
            session.silence_blocks = 0;
        }

        let reason = if session.silence_blocks > self.max_silence_blocks {
            Some(CloseReason::Silence)
        } else if session.block_count() > self.max_session_blocks as usize {
            Some(CloseReason::MaxDuration)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                debug!(
                    blocks = session.block_count(),
                    %reason,
                    "speech ended"
                );
                Step::Closed { session, reason }
            }
            None => {
                self.session = Some(session);
                Step::Continued
            }
        }
    }

    /// Drop the open session without segmenting it. Returns the number of
    /// blocks that were discarded.
    pub fn abandon(&mut self) -> usize {
        self.session
            .take()
            .map(|s| s.block_count())
            .unwrap_or(0)
    }
}
