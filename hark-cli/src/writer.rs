//! Persists emitted segments as WAV files on a dedicated thread.
//!
//! The engine's segment callback only pushes onto a channel; all file I/O
//! happens here so the capture thread never waits on the disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use hark_core::Segment;
use serde::Serialize;
use tracing::{error, info};

/// One line of `--json` output for a written segment.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentWritten {
    pub event: &'static str,
    pub seq: u64,
    pub path: PathBuf,
    pub samples: usize,
    pub duration_ms: u64,
}

pub fn segment_file_name(seq: u64) -> String {
    format!("hark-{seq:04}.wav")
}

/// Write one segment as 16-bit PCM.
pub fn write_segment(dir: &Path, seq: u64, segment: &Segment) -> Result<PathBuf> {
    let path = dir.join(segment_file_name(seq));
    let spec = hound::WavSpec {
        channels: segment.channels,
        sample_rate: segment.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)
        .with_context(|| format!("cannot create {}", path.display()))?;
    for &sample in &segment.samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(path)
}

pub struct SegmentWriter {
    tx: Sender<Segment>,
    handle: JoinHandle<u64>,
}

impl SegmentWriter {
    /// Create `dir` if needed and start the writer thread.
    pub fn spawn(dir: PathBuf, json: bool) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create output directory {}", dir.display()))?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("hark-writer".into())
            .spawn(move || write_loop(&dir, &rx, json))?;
        Ok(Self { tx, handle })
    }

    /// Sender for the engine's segment callback.
    pub fn sender(&self) -> Sender<Segment> {
        self.tx.clone()
    }

    /// Drain the queue and return how many files were written.
    ///
    /// Returns once every sender (including the engine callback's) is gone.
    pub fn finish(self) -> u64 {
        drop(self.tx);
        self.handle.join().unwrap_or_else(|_| {
            error!("segment writer thread panicked");
            0
        })
    }
}

fn write_loop(dir: &Path, rx: &Receiver<Segment>, json: bool) -> u64 {
    let mut written = 0;
    for segment in rx.iter() {
        let seq = written + 1;
        match write_segment(dir, seq, &segment) {
            Ok(path) => {
                written = seq;
                let duration_ms = segment.duration().as_millis() as u64;
                info!(path = %path.display(), duration_ms, "segment written");
                if json {
                    let line = SegmentWritten {
                        event: "segment",
                        seq,
                        path,
                        samples: segment.samples.len(),
                        duration_ms,
                    };
                    match serde_json::to_string(&line) {
                        Ok(line) => println!("{line}"),
                        Err(e) => error!("cannot encode segment event: {e}"),
                    }
                }
            }
            Err(e) => error!("failed to write segment {seq}: {e:#}"),
        }
    }
    written
}
