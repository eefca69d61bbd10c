use thiserror::Error;

/// All errors produced by hark-core.
#[derive(Debug, Error)]
pub enum HarkError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    /// A finite source (e.g. a WAV file) has no more blocks.
    #[error("audio stream ended")]
    StreamEnded,

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown engine profile: {0}")]
    UnknownProfile(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HarkError>;
