//! Microphone capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** block on a mutex, perform I/O, or allocate in steady
//! state. It converts samples to f32 (down-mixing to mono when the device
//! has more channels than requested) and writes into an SPSC ring buffer
//! producer whose `push_slice` is lock-free.
//!
//! The capture thread owns the consumer half. `read_block` drains it,
//! resamples when the device could not run at the requested rate, converts
//! back to i16 and hands out exactly one block per call.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::{resample::RateConverter, AudioSource, BlockStream, ReadBlock, StreamParams};
use crate::{
    buffering::{
        create_audio_ring, AudioConsumer, AudioProducer, Consumer, Observer, Producer, RING_CAPACITY,
    },
    error::{HarkError, Result},
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};

/// Frames handed to rubato per call when resampling.
const RESAMPLE_CHUNK: usize = 1024;

/// Default poll interval while waiting for the device to fill a block.
const DEFAULT_READ_POLL_MS: u64 = 4;

/// A device that delivers nothing for this long is treated as failed.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

fn read_poll_ms() -> u64 {
    static READ_POLL_MS: OnceLock<u64> = OnceLock::new();
    *READ_POLL_MS.get_or_init(|| {
        std::env::var("HARK_READ_POLL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_READ_POLL_MS)
    })
}

/// f32 in [-1.0, 1.0] → i16. Exact inverse of cpal's i16 → f32 mapping.
fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Opens the system microphone (or the device named in `StreamParams`).
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalSource;

impl CpalSource {
    pub fn new() -> Self {
        Self
    }
}

/// State shared between the real-time callback and the reader.
#[cfg(feature = "audio-cpal")]
#[derive(Default)]
struct CallbackFlags {
    /// `false` once the stream is closed; the callback then no-ops.
    running: AtomicBool,
    /// Set when the ring was full and samples were dropped.
    overflowed: AtomicBool,
    /// Last error reported by cpal's error callback.
    error: Mutex<Option<String>>,
}

/// An open cpal input stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread.
#[cfg(feature = "audio-cpal")]
pub struct CpalBlockStream {
    stream: Stream,
    consumer: AudioConsumer,
    flags: Arc<CallbackFlags>,
    resampler: RateConverter,
    scratch: Vec<f32>,
    pending: Vec<i16>,
    block_len: usize,
}

#[cfg(feature = "audio-cpal")]
impl BlockStream for CpalBlockStream {
    fn read_block(&mut self) -> Result<ReadBlock> {
        let mut idle_since = Instant::now();

        while self.pending.len() < self.block_len {
            if let Some(err) = self.flags.error.lock().take() {
                return Err(HarkError::AudioStream(err));
            }

            let n = self.consumer.pop_slice(&mut self.scratch);
            if n == 0 {
                if idle_since.elapsed() >= READ_TIMEOUT {
                    return Err(HarkError::AudioStream(format!(
                        "no audio received for {:?}",
                        READ_TIMEOUT
                    )));
                }
                std::thread::sleep(Duration::from_millis(read_poll_ms()));
                continue;
            }
            idle_since = Instant::now();

            let converted = self.resampler.process(&self.scratch[..n]);
            self.pending
                .extend(converted.into_iter().map(f32_to_i16));
        }

        let samples: Vec<i16> = self.pending.drain(..self.block_len).collect();
        Ok(ReadBlock {
            samples,
            overflowed: self.flags.overflowed.swap(false, Ordering::AcqRel),
        })
    }

    fn close(&mut self) {
        self.flags.running.store(false, Ordering::Release);
        if let Err(e) = self.stream.pause() {
            warn!("failed to pause input stream: {e}");
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioSource for CpalSource {
    fn open(&self, params: &StreamParams) -> Result<Box<dyn BlockStream>> {
        let host = cpal::default_host();
        let device = super::device::select_input_device(&host, params.device.as_deref())?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let (config, sample_format) = choose_config(&device, params)?;
        let device_channels = config.channels;
        let device_rate = config.sample_rate.0;

        info!(
            sample_rate = device_rate,
            channels = device_channels,
            ?sample_format,
            "audio config selected"
        );

        let (producer, consumer) = create_audio_ring(RING_CAPACITY);
        let flags = Arc::new(CallbackFlags::default());
        flags.running.store(true, Ordering::Release);

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, params.channels, producer, &flags),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, params.channels, producer, &flags),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, params.channels, producer, &flags),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, params.channels, producer, &flags),
            SampleFormat::U8 => build_stream::<u8>(&device, &config, params.channels, producer, &flags),
            fmt => {
                return Err(HarkError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| HarkError::AudioStream(e.to_string()))?;

        let resampler = RateConverter::new(
            device_rate,
            params.sample_rate,
            params.channels,
            RESAMPLE_CHUNK,
        )?;

        Ok(Box::new(CpalBlockStream {
            stream,
            consumer,
            flags,
            resampler,
            scratch: vec![0f32; params.block_len().max(1)],
            pending: Vec::with_capacity(params.block_len() * 2),
            block_len: params.block_len(),
        }))
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioSource for CpalSource {
    fn open(&self, _params: &StreamParams) -> Result<Box<dyn BlockStream>> {
        Err(HarkError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

/// Prefer a config that runs natively at the requested rate and channel
/// count; otherwise fall back to the device default and let the stream
/// down-mix and resample.
#[cfg(feature = "audio-cpal")]
fn choose_config(
    device: &cpal::Device,
    params: &StreamParams,
) -> Result<(StreamConfig, SampleFormat)> {
    let rate = SampleRate(params.sample_rate);

    if let Ok(ranges) = device.supported_input_configs() {
        let native = ranges
            .filter(|r| r.channels() == params.channels)
            .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
            .max_by_key(|r| match r.sample_format() {
                SampleFormat::I16 => 2,
                SampleFormat::F32 => 1,
                _ => 0,
            });
        if let Some(range) = native {
            let supported = range.with_sample_rate(rate);
            let format = supported.sample_format();
            return Ok((stream_config(supported.channels(), rate), format));
        }
    }

    let supported = device
        .default_input_config()
        .map_err(|e| HarkError::AudioDevice(e.to_string()))?;

    if supported.channels() != params.channels && params.channels != 1 {
        return Err(HarkError::AudioDevice(format!(
            "device cannot capture {} channels (default config has {})",
            params.channels,
            supported.channels()
        )));
    }

    warn!(
        requested_rate = params.sample_rate,
        requested_channels = params.channels,
        device_rate = supported.sample_rate().0,
        device_channels = supported.channels(),
        "requested format not supported natively — using device default"
    );

    Ok((
        stream_config(supported.channels(), supported.sample_rate()),
        supported.sample_format(),
    ))
}

#[cfg(feature = "audio-cpal")]
fn stream_config(channels: u16, sample_rate: SampleRate) -> StreamConfig {
    StreamConfig {
        channels,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    }
}

#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    out_channels: u16,
    mut producer: AudioProducer,
    flags: &Arc<CallbackFlags>,
) -> Result<Stream>
where
    T: Sample + SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let in_ch = config.channels as usize;
    let out_ch = out_channels as usize;
    let data_flags = Arc::clone(flags);
    let err_flags = Arc::clone(flags);
    let mut mix_buf: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !data_flags.running.load(Ordering::Relaxed) {
                    return;
                }

                mix_buf.clear();
                if in_ch == out_ch {
                    mix_buf.extend(data.iter().map(|s| f32::from_sample(*s)));
                } else {
                    // Only the N → mono case reaches here (see choose_config).
                    for frame in data.chunks_exact(in_ch) {
                        let sum: f32 = frame.iter().map(|s| f32::from_sample(*s)).sum();
                        mix_buf.push(sum / in_ch as f32);
                    }
                }

                // Whole frames only, so the reader never sees a torn frame.
                let room = producer.vacant_len() / out_ch * out_ch;
                let take = mix_buf.len().min(room);
                producer.push_slice(&mix_buf[..take]);
                if take < mix_buf.len() {
                    data_flags.overflowed.store(true, Ordering::Release);
                }
            },
            move |err| {
                error!("audio stream error: {err}");
                *err_flags.error.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| HarkError::AudioStream(e.to_string()))
}
