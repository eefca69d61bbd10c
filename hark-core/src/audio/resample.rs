//! Capture-rate to engine-rate conversion on top of rubato's `FastFixedIn`.
//!
//! Devices often refuse to open at 16 kHz, so the capture thread pulls at
//! the device's native rate and converts here before blocks are cut. A
//! converter built for equal rates holds no rubato state and copies input
//! straight through.
//!
//! Samples arrive and leave interleaved. Rubato wants planar buffers, so
//! frames are split per channel while they wait for a full chunk.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{HarkError, Result};

/// Fixed-ratio converter from the device rate to the engine rate.
pub struct RateConverter {
    /// Absent when the device already runs at the engine rate.
    resampler: Option<FastFixedIn<f32>>,
    channels: usize,
    /// Per-channel accumulation of input frames between calls.
    input_buf: Vec<Vec<f32>>,
    /// How many input frames rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[channels][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// Returns `HarkError::AudioDevice` if rubato fails to initialise.
    pub fn new(
        capture_rate: u32,
        target_rate: u32,
        channels: u16,
        chunk_size: usize,
    ) -> Result<Self> {
        let channels = channels.max(1) as usize;
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                channels,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio, no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            channels,
        )
        .map_err(|e| HarkError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();

        tracing::info!(
            capture_rate,
            target_rate,
            channels,
            chunk_size,
            "resampling enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            channels,
            input_buf: vec![Vec::with_capacity(chunk_size * 2); channels],
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; channels],
        })
    }

    /// Feed interleaved samples and collect whatever interleaved output
    /// whole chunks produce. Leftover frames wait for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return samples.to_vec();
        };
        let channels = self.channels;
        let chunk = self.chunk_size;

        for frame in samples.chunks_exact(channels) {
            for (plane, &sample) in self.input_buf.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }

        let mut out = Vec::new();
        while self.input_buf[0].len() >= chunk {
            let planes: Vec<&[f32]> = self.input_buf.iter().map(|p| &p[..chunk]).collect();
            match resampler.process_into_buffer(&planes, &mut self.output_buf, None) {
                Ok((_, frames)) => {
                    let produced = &self.output_buf;
                    out.reserve(frames * channels);
                    out.extend((0..frames).flat_map(|i| produced.iter().map(move |p| p[i])));
                }
                Err(e) => error!("rate conversion failed, chunk dropped: {e}"),
            }
            for plane in &mut self.input_buf {
                plane.drain(..chunk);
            }
        }
        out
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_returns_input_unchanged() {
        let mut conv = RateConverter::new(16_000, 16_000, 2, 1024).expect("converter");
        assert!(conv.is_passthrough());
        let interleaved: Vec<f32> = (0..64).map(|i| (i as f32 / 64.0) - 0.5).collect();
        assert_eq!(conv.process(&interleaved), interleaved);
    }

    #[test]
    fn downsample_by_three_yields_a_third_of_the_frames() {
        let mut conv = RateConverter::new(48_000, 16_000, 1, 1024).expect("converter");
        assert!(!conv.is_passthrough());
        let produced = conv.process(&vec![0.0f32; 1024]).len();
        let diff = produced.abs_diff(1024 / 3);
        assert!(diff <= 10, "produced {produced} frames");
    }

    #[test]
    fn stereo_output_is_whole_frames() {
        let mut conv = RateConverter::new(44_100, 16_000, 2, 1024).expect("converter");
        let out = conv.process(&vec![0.25f32; 1024 * 2]);
        assert!(!out.is_empty());
        assert_eq!(out.len() % 2, 0);
    }

    #[test]
    fn short_input_waits_for_a_full_chunk() {
        let mut conv = RateConverter::new(48_000, 16_000, 1, 1024).expect("converter");
        assert!(conv.process(&vec![0.0f32; 600]).is_empty());
        assert!(!conv.process(&vec![0.0f32; 600]).is_empty());
    }
}
