//! # hark-core
//!
//! Hands-free voice activity detection and utterance segmentation.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → cpal callback → SPSC RingBuffer → CpalBlockStream::read_block
//!  (or WavSource)                                        │
//!                                          hark-capture thread, one block at a time
//!                                                        │
//!                                 VisualizationSampler ──┼──► on_visualizer
//!                                                        │
//!                                 SpeechStateMachine (noise floor + threshold)
//!                                                        │
//!                                         Segmenter ─────┴──► on_segment
//! ```
//!
//! The audio callback is zero-alloc in steady state. All VAD work happens on
//! the capture thread, which owns its state exclusively.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod segment;
pub mod vad;
pub mod visual;

// Convenience re-exports for downstream crates
pub use audio::{list_input_devices, AudioSource, BlockStream, CpalSource, DeviceInfo, WavSource};
pub use engine::{DiagnosticsSnapshot, EngineConfig, HarkEngine, Profile, StopOutcome};
pub use error::HarkError;
pub use ipc::events::{EngineStatus, EngineStatusEvent, VisualizationFrame};
pub use segment::Segment;
