//! Engine configuration and named tuning profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::audio::StreamParams;
use crate::error::{HarkError, Result};

/// Configuration for `HarkEngine`. Immutable once the engine is built.
///
/// Deserializes from camelCase JSON; missing fields take the
/// [`Profile::Adaptive`] defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Capture sample rate (Hz). Default: 16000.
    pub sample_rate: u32,
    /// Interleaved channel count. Default: 1.
    pub channels: u16,
    /// Frames per block. Default: 1024 (64 ms at 16 kHz).
    pub block_size: usize,
    /// Input device name; `None` uses the system default.
    pub input_device: Option<String>,
    /// Noise floor before any block has been seen. Default: 300.0.
    pub initial_noise_floor: f32,
    /// EMA weight α of each new Idle block's peak. Default: 0.05.
    pub adaptation_rate: f32,
    /// Threshold = noise floor × this ratio (before the hard minimum). Default: 2.0.
    pub speech_threshold_ratio: f32,
    /// Hard lower bound on the threshold. Default: 500.0.
    pub min_amplitude: f32,
    /// Hangover: silent blocks tolerated before a session closes. Default: 10.
    pub max_silence_blocks: u32,
    /// Hard cap on session length in blocks. Default: 150 (~9.6 s).
    pub max_session_blocks: u32,
    /// Sessions of this many blocks or fewer are discarded. Default: 8.
    pub min_segment_blocks: u32,
    /// Visualization waveform keeps every Nth frame. Default: 20.
    pub visual_stride: usize,
    /// Amplitude that maps to a full-scale level meter. Default: 3000.0.
    pub visual_max_amplitude: f32,
}

impl EngineConfig {
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
    pub const DEFAULT_CHANNELS: u16 = 1;
    pub const DEFAULT_BLOCK_SIZE: usize = 1024;
    pub const DEFAULT_INITIAL_NOISE_FLOOR: f32 = 300.0;
    pub const DEFAULT_ADAPTATION_RATE: f32 = 0.05;
    pub const DEFAULT_SPEECH_THRESHOLD_RATIO: f32 = 2.0;
    pub const DEFAULT_MIN_AMPLITUDE: f32 = 500.0;
    pub const DEFAULT_MAX_SILENCE_BLOCKS: u32 = 10;
    pub const DEFAULT_MAX_SESSION_BLOCKS: u32 = 150;
    pub const DEFAULT_MIN_SEGMENT_BLOCKS: u32 = 8;
    pub const DEFAULT_VISUAL_STRIDE: usize = 20;
    pub const DEFAULT_VISUAL_MAX_AMPLITUDE: f32 = 3000.0;

    /// Defaults for a named profile.
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Adaptive => Self::default(),
            Profile::FixedThreshold => Self {
                adaptation_rate: 0.0,
                max_silence_blocks: 30,
                ..Self::default()
            },
        }
    }

    /// Reject values the engine cannot run with. Called by `HarkEngine::new`
    /// and again by `start`, before any thread is spawned.
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(HarkError::InvalidConfig(msg))
        }

        if self.sample_rate == 0 {
            return invalid("sampleRate must be > 0".into());
        }
        if self.channels == 0 {
            return invalid("channels must be > 0".into());
        }
        if self.block_size == 0 {
            return invalid("blockSize must be > 0".into());
        }
        if !self.initial_noise_floor.is_finite() || self.initial_noise_floor <= 0.0 {
            return invalid(format!(
                "initialNoiseFloor must be finite and > 0 (got {})",
                self.initial_noise_floor
            ));
        }
        if !(0.0..=1.0).contains(&self.adaptation_rate) {
            return invalid(format!(
                "adaptationRate must be within [0, 1] (got {})",
                self.adaptation_rate
            ));
        }
        if !self.speech_threshold_ratio.is_finite() || self.speech_threshold_ratio <= 0.0 {
            return invalid(format!(
                "speechThresholdRatio must be finite and > 0 (got {})",
                self.speech_threshold_ratio
            ));
        }
        if !self.min_amplitude.is_finite() || self.min_amplitude < 0.0 {
            return invalid(format!(
                "minAmplitude must be finite and >= 0 (got {})",
                self.min_amplitude
            ));
        }
        if self.max_session_blocks == 0 {
            return invalid("maxSessionBlocks must be > 0".into());
        }
        if self.min_segment_blocks > self.max_session_blocks {
            return invalid(format!(
                "minSegmentBlocks ({}) exceeds maxSessionBlocks ({}): no segment could ever be emitted",
                self.min_segment_blocks, self.max_session_blocks
            ));
        }
        if self.visual_stride == 0 {
            return invalid("visualStride must be > 0".into());
        }
        if !self.visual_max_amplitude.is_finite() || self.visual_max_amplitude <= 0.0 {
            return invalid(format!(
                "visualMaxAmplitude must be finite and > 0 (got {})",
                self.visual_max_amplitude
            ));
        }
        Ok(())
    }

    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            block_size: self.block_size,
            device: self.input_device.clone(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::DEFAULT_SAMPLE_RATE,
            channels: Self::DEFAULT_CHANNELS,
            block_size: Self::DEFAULT_BLOCK_SIZE,
            input_device: None,
            initial_noise_floor: Self::DEFAULT_INITIAL_NOISE_FLOOR,
            adaptation_rate: Self::DEFAULT_ADAPTATION_RATE,
            speech_threshold_ratio: Self::DEFAULT_SPEECH_THRESHOLD_RATIO,
            min_amplitude: Self::DEFAULT_MIN_AMPLITUDE,
            max_silence_blocks: Self::DEFAULT_MAX_SILENCE_BLOCKS,
            max_session_blocks: Self::DEFAULT_MAX_SESSION_BLOCKS,
            min_segment_blocks: Self::DEFAULT_MIN_SEGMENT_BLOCKS,
            visual_stride: Self::DEFAULT_VISUAL_STRIDE,
            visual_max_amplitude: Self::DEFAULT_VISUAL_MAX_AMPLITUDE,
        }
    }
}

/// Named presets of VAD tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Noise floor tracks the room; 10-block hangover.
    #[default]
    Adaptive,
    /// Noise floor frozen at its initial value, so the threshold is
    /// constant; 30-block hangover.
    FixedThreshold,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Adaptive => "adaptive",
            Profile::FixedThreshold => "fixed-threshold",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = HarkError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "adaptive" | "" => Ok(Profile::Adaptive),
            "fixed-threshold" | "fixed_threshold" | "fixed" => Ok(Profile::FixedThreshold),
            other => Err(HarkError::UnknownProfile(other.to_string())),
        }
    }
}
