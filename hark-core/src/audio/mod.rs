//! Capture boundary.
//!
//! The engine never talks to an audio API directly. It asks an
//! [`AudioSource`] to open a [`BlockStream`] and then pulls fixed-size blocks
//! from it, one blocking `read_block` per iteration.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). [`AudioSource::open`] is therefore called *on the capture thread*
//! and a `BlockStream` never crosses a thread boundary; only the source
//! (a factory) has to be `Send + Sync`.

pub mod capture;
pub mod device;
pub mod resample;
pub mod wav;

pub use capture::CpalSource;
pub use device::{list_input_devices, DeviceInfo};
pub use wav::WavSource;

use crate::error::Result;

/// What the engine asks a source for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per block.
    pub block_size: usize,
    /// Input device name. `None` selects the system default.
    pub device: Option<String>,
}

impl StreamParams {
    /// Interleaved samples per block.
    pub fn block_len(&self) -> usize {
        self.block_size * self.channels as usize
    }
}

/// One blocking read.
#[derive(Debug, Clone)]
pub struct ReadBlock {
    /// Interleaved samples; normally exactly `block_len()` long.
    pub samples: Vec<i16>,
    /// The device dropped input since the previous read. Non-fatal.
    pub overflowed: bool,
}

/// Factory for block streams. Shared by the engine across listening sessions.
pub trait AudioSource: Send + Sync + 'static {
    /// Open a stream. Called on the capture thread.
    ///
    /// # Errors
    /// Device selection/open failures (`AudioDevice`, `AudioStream`,
    /// `NoDefaultInputDevice`). The engine surfaces these from `start()`.
    fn open(&self, params: &StreamParams) -> Result<Box<dyn BlockStream>>;
}

/// An open stream owned exclusively by the capture thread.
pub trait BlockStream {
    /// Block until a full block is available.
    ///
    /// # Errors
    /// - `StreamEnded` when a finite source has nothing left.
    /// - Any other error is a device failure and ends the listening session.
    fn read_block(&mut self) -> Result<ReadBlock>;

    /// Release the device. Called once, on the capture thread, before the
    /// stream is dropped.
    fn close(&mut self) {}
}

impl<S: AudioSource + ?Sized> AudioSource for std::sync::Arc<S> {
    fn open(&self, params: &StreamParams) -> Result<Box<dyn BlockStream>> {
        (**self).open(params)
    }
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn open(&self, params: &StreamParams) -> Result<Box<dyn BlockStream>> {
        (**self).open(params)
    }
}
