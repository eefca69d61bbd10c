//! Audio buffering primitives.
//!
//! - [`block::Block`]: the fixed-size unit the VAD consumes.
//! - A lock-free SPSC ring buffer (`ringbuf::HeapRb<f32>`) used by the cpal
//!   source to move samples out of the real-time callback. `push_slice` is
//!   wait-free and safe to call from that callback.

pub mod block;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the capture thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Default capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s of mono 48 kHz.
/// The capture thread reads a block every ~64 ms, so this only fills when a
/// consumer callback stalls the loop for many seconds.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}
