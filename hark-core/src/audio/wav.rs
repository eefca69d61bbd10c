//! WAV-file replay source.
//!
//! Feeds a recording through the engine exactly as a microphone would, one
//! block at a time. Useful for tuning thresholds offline and for tests.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavReader};
use tracing::info;

use super::{AudioSource, BlockStream, ReadBlock, StreamParams};
use crate::error::{HarkError, Result};

type SampleIter = Box<dyn Iterator<Item = hound::Result<i16>>>;

/// Replays a WAV file whose format matches the engine configuration.
#[derive(Debug, Clone)]
pub struct WavSource {
    path: PathBuf,
    paced: bool,
}

impl WavSource {
    /// Blocks are delivered as fast as the engine reads them.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            paced: false,
        }
    }

    /// Sleep between blocks so the file plays back in real time.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }
}

impl AudioSource for WavSource {
    fn open(&self, params: &StreamParams) -> Result<Box<dyn BlockStream>> {
        let reader = WavReader::open(&self.path)?;
        let spec = reader.spec();

        if spec.sample_rate != params.sample_rate || spec.channels != params.channels {
            return Err(HarkError::AudioDevice(format!(
                "{}: file is {} Hz / {} ch, engine expects {} Hz / {} ch",
                self.path.display(),
                spec.sample_rate,
                spec.channels,
                params.sample_rate,
                params.channels
            )));
        }

        info!(
            path = %self.path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            "replaying WAV file"
        );

        let samples = into_i16_samples(reader)?;
        let block_duration =
            Duration::from_secs_f64(params.block_size as f64 / params.sample_rate.max(1) as f64);

        Ok(Box::new(WavBlockStream {
            samples,
            block_len: params.block_len(),
            pacing: self.paced.then(|| Pacing {
                next_due: Instant::now(),
                block_duration,
            }),
        }))
    }
}

/// Normalise any integer or float WAV encoding to 16-bit.
fn into_i16_samples(reader: WavReader<BufReader<File>>) -> Result<SampleIter> {
    let spec = reader.spec();
    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => Ok(Box::new(reader.into_samples::<i16>())),
        (SampleFormat::Int, bits) if bits <= 32 => {
            let shift = bits as i32 - 16;
            Ok(Box::new(reader.into_samples::<i32>().map(move |s| {
                s.map(|v| {
                    let scaled = if shift >= 0 { v >> shift } else { v << -shift };
                    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
                })
            })))
        }
        (SampleFormat::Float, 32) => Ok(Box::new(reader.into_samples::<f32>().map(|s| {
            s.map(|v| (v * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        }))),
        (format, bits) => Err(HarkError::AudioDevice(format!(
            "unsupported WAV encoding: {format:?} {bits}-bit"
        ))),
    }
}

struct Pacing {
    next_due: Instant,
    block_duration: Duration,
}

struct WavBlockStream {
    samples: SampleIter,
    block_len: usize,
    pacing: Option<Pacing>,
}

impl BlockStream for WavBlockStream {
    fn read_block(&mut self) -> Result<ReadBlock> {
        let mut samples = Vec::with_capacity(self.block_len);
        for sample in self.samples.by_ref().take(self.block_len) {
            samples.push(sample?);
        }
        if samples.is_empty() {
            return Err(HarkError::StreamEnded);
        }
        // Trailing partial block: pad so every block has the configured size.
        samples.resize(self.block_len, 0);

        if let Some(pacing) = self.pacing.as_mut() {
            let now = Instant::now();
            if pacing.next_due > now {
                std::thread::sleep(pacing.next_due - now);
            }
            pacing.next_due = pacing.next_due.max(now) + pacing.block_duration;
        }

        Ok(ReadBlock {
            samples,
            overflowed: false,
        })
    }
}
