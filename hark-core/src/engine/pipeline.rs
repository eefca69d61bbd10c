//! Blocking capture loop.
//!
//! ## Per-block stages
//!
//! ```text
//! 1. Check the cancellation token
//! 2. BlockStream::read_block (the only blocking call)
//! 3. VisualizationSampler → visualizer callback (state *before* this block)
//! 4. SpeechStateMachine::step
//! 5. On session close: Segmenter::close → segment callback
//! ```
//!
//! The loop runs on the engine's dedicated capture thread and owns every
//! piece of VAD state, so none of it is locked. The token is re-checked
//! before each callback dispatch: once `stop()` flips it, nothing else
//! reaches the consumer even if a block is mid-flight.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    Arc,
};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    audio::BlockStream,
    buffering::block::Block,
    engine::EngineConfig,
    error::HarkError,
    ipc::events::VisualizationFrame,
    segment::{Segment, Segmenter},
    vad::{CloseReason, NoiseFloorEstimator, SpeechStateMachine, Step, ThresholdPolicy},
    visual::VisualizationSampler,
};

/// Receives each emitted segment. Runs on the capture thread: hand heavy
/// work (transcription, disk I/O) to another thread and return quickly.
pub type SegmentCallback = Box<dyn FnMut(Segment) + Send + 'static>;

/// Receives one frame per processed block. Same threading rules as
/// [`SegmentCallback`].
pub type VisualizerCallback = Box<dyn FnMut(VisualizationFrame) + Send + 'static>;

/// Overflow warnings are logged for the first one and then every Nth.
const OVERFLOW_LOG_EVERY: usize = 100;

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub blocks_in: AtomicUsize,
    pub overflows: AtomicUsize,
    pub speech_blocks: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub closed_on_silence: AtomicUsize,
    pub closed_on_max_duration: AtomicUsize,
    pub segments_emitted: AtomicUsize,
    pub segments_discarded: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_in: self.blocks_in.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            speech_blocks: self.speech_blocks.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            closed_on_silence: self.closed_on_silence.load(Ordering::Relaxed),
            closed_on_max_duration: self.closed_on_max_duration.load(Ordering::Relaxed),
            segments_emitted: self.segments_emitted.load(Ordering::Relaxed),
            segments_discarded: self.segments_discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks_in: usize,
    pub overflows: usize,
    pub speech_blocks: usize,
    pub sessions_opened: usize,
    pub closed_on_silence: usize,
    pub closed_on_max_duration: usize,
    pub segments_emitted: usize,
    pub segments_discarded: usize,
}

/// Noise floor shared across listening sessions as `f32` bits.
///
/// Only the capture thread of the current session writes it.
#[derive(Debug)]
pub struct SharedNoiseFloor(AtomicU32);

impl SharedNoiseFloor {
    pub fn new(initial: f32) -> Self {
        Self(AtomicU32::new(initial.to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, floor: f32) {
        self.0.store(floor.to_bits(), Ordering::Release);
    }
}

/// All context the loop needs, passed as one struct so the thread closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub stream: Box<dyn BlockStream>,
    pub on_segment: SegmentCallback,
    pub on_visualizer: Option<VisualizerCallback>,
    /// Set by `stop()`; never cleared. Unique to one listening session.
    pub cancel: Arc<AtomicBool>,
    pub noise_floor: Arc<SharedNoiseFloor>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Why the loop returned.
#[derive(Debug)]
pub enum PipelineExit {
    /// The cancellation token was observed.
    Cancelled,
    /// A finite source ran out of blocks.
    StreamEnded,
    /// The device failed; listening cannot continue.
    DeviceError(HarkError),
}

fn cancelled(token: &AtomicBool) -> bool {
    token.load(Ordering::Acquire)
}

/// Run the capture loop until cancelled, the stream ends, or the device fails.
///
/// Closes the stream before returning. An open speech session is discarded.
pub fn run(mut ctx: PipelineContext) -> PipelineExit {
    let cfg = &ctx.config;
    let mut vad = SpeechStateMachine::new(
        NoiseFloorEstimator::new(ctx.noise_floor.get(), cfg.adaptation_rate),
        ThresholdPolicy::new(cfg.speech_threshold_ratio, cfg.min_amplitude),
        cfg.max_silence_blocks,
        cfg.max_session_blocks,
    );
    let segmenter = Segmenter::new(cfg.sample_rate, cfg.channels, cfg.min_segment_blocks as usize);
    let sampler = VisualizationSampler::new(cfg.visual_stride, cfg.visual_max_amplitude);
    let channels = cfg.channels;

    info!(
        noise_floor = vad.noise_floor(),
        threshold = vad.threshold(),
        "capture loop started"
    );

    let exit = loop {
        if cancelled(&ctx.cancel) {
            break PipelineExit::Cancelled;
        }

        let read = match ctx.stream.read_block() {
            Ok(read) => read,
            Err(HarkError::StreamEnded) => break PipelineExit::StreamEnded,
            Err(e) => {
                error!(error = %e, "capture read failed — ending listening session");
                break PipelineExit::DeviceError(e);
            }
        };

        // stop() may have landed while we were blocked in read_block.
        if cancelled(&ctx.cancel) {
            break PipelineExit::Cancelled;
        }

        ctx.diagnostics.blocks_in.fetch_add(1, Ordering::Relaxed);
        if read.overflowed {
            let n = ctx.diagnostics.overflows.fetch_add(1, Ordering::Relaxed);
            if n % OVERFLOW_LOG_EVERY == 0 {
                warn!(overflows = n + 1, "input overflow — samples were dropped by the device");
            }
        }

        let block = Block::new(read.samples, channels);
        let metrics = block.metrics();
        let threshold = vad.threshold();

        if let Some(on_visualizer) = ctx.on_visualizer.as_mut() {
            let frame = sampler.sample(&block, metrics, vad.state().is_speaking(), threshold);
            if cancelled(&ctx.cancel) {
                break PipelineExit::Cancelled;
            }
            on_visualizer(frame);
        }

        match vad.step(block, metrics) {
            Step::Idle => {
                if !cancelled(&ctx.cancel) {
                    ctx.noise_floor.set(vad.noise_floor());
                }
            }
            Step::Started => {
                ctx.diagnostics.sessions_opened.fetch_add(1, Ordering::Relaxed);
                ctx.diagnostics.speech_blocks.fetch_add(1, Ordering::Relaxed);
            }
            Step::Continued => {
                ctx.diagnostics.speech_blocks.fetch_add(1, Ordering::Relaxed);
            }
            Step::Closed { session, reason } => {
                ctx.diagnostics.speech_blocks.fetch_add(1, Ordering::Relaxed);
                let counter = match reason {
                    CloseReason::Silence => &ctx.diagnostics.closed_on_silence,
                    CloseReason::MaxDuration => &ctx.diagnostics.closed_on_max_duration,
                };
                counter.fetch_add(1, Ordering::Relaxed);

                let blocks = session.block_count();
                match segmenter.close(session) {
                    Some(segment) => {
                        ctx.diagnostics.segments_emitted.fetch_add(1, Ordering::Relaxed);
                        info!(
                            blocks,
                            %reason,
                            samples = segment.samples.len(),
                            duration_ms = segment.duration().as_millis() as u64,
                            "segment ready"
                        );
                        if cancelled(&ctx.cancel) {
                            break PipelineExit::Cancelled;
                        }
                        (ctx.on_segment)(segment);
                    }
                    None => {
                        ctx.diagnostics.segments_discarded.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    };

    let dropped = vad.abandon();
    if dropped > 0 {
        debug!(blocks = dropped, "open session discarded at shutdown");
    }
    ctx.stream.close();

    let snap = ctx.diagnostics.snapshot();
    info!(
        ?exit,
        blocks_in = snap.blocks_in,
        overflows = snap.overflows,
        sessions_opened = snap.sessions_opened,
        segments_emitted = snap.segments_emitted,
        segments_discarded = snap.segments_discarded,
        noise_floor = vad.noise_floor(),
        "capture loop stopped — diagnostics"
    );

    exit
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use crate::audio::ReadBlock;
    use crate::error::Result;

    const BLOCK: usize = 64;

    /// Replays a fixed script, then ends (or fails).
    struct ScriptedStream {
        blocks: VecDeque<ReadBlock>,
        fail_at_end: bool,
        closed: Arc<AtomicBool>,
    }

    impl BlockStream for ScriptedStream {
        fn read_block(&mut self) -> Result<ReadBlock> {
            match self.blocks.pop_front() {
                Some(b) => Ok(b),
                None if self.fail_at_end => {
                    Err(HarkError::AudioStream("device unplugged".into()))
                }
                None => Err(HarkError::StreamEnded),
            }
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn read(amplitude: i16) -> ReadBlock {
        ReadBlock {
            samples: vec![amplitude; BLOCK],
            overflowed: false,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            block_size: BLOCK,
            max_silence_blocks: 2,
            max_session_blocks: 20,
            min_segment_blocks: 3,
            ..EngineConfig::default()
        }
    }

    struct Harness {
        segments: Arc<Mutex<Vec<Segment>>>,
        frames: Arc<Mutex<Vec<VisualizationFrame>>>,
        closed: Arc<AtomicBool>,
        diagnostics: Arc<PipelineDiagnostics>,
        noise_floor: Arc<SharedNoiseFloor>,
    }

    fn run_script(cfg: EngineConfig, script: Vec<ReadBlock>, fail_at_end: bool) -> (PipelineExit, Harness) {
        let segments = Arc::new(Mutex::new(Vec::new()));
        let frames = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let noise_floor = Arc::new(SharedNoiseFloor::new(cfg.initial_noise_floor));

        let seg_sink = Arc::clone(&segments);
        let frame_sink = Arc::clone(&frames);
        let ctx = PipelineContext {
            config: cfg,
            stream: Box::new(ScriptedStream {
                blocks: script.into(),
                fail_at_end,
                closed: Arc::clone(&closed),
            }),
            on_segment: Box::new(move |s| seg_sink.lock().push(s)),
            on_visualizer: Some(Box::new(move |f| frame_sink.lock().push(f))),
            cancel: Arc::new(AtomicBool::new(false)),
            noise_floor: Arc::clone(&noise_floor),
            diagnostics: Arc::clone(&diagnostics),
        };

        let exit = run(ctx);
        (
            exit,
            Harness {
                segments,
                frames,
                closed,
                diagnostics,
                noise_floor,
            },
        )
    }

    #[test]
    fn utterance_between_silences_emits_one_segment() {
        let mut script: Vec<ReadBlock> = (0..5).map(|_| read(0)).collect();
        script.extend((0..4).map(|_| read(2500)));
        script.extend((0..3).map(|_| read(0)));
        script.extend((0..5).map(|_| read(0)));

        let (exit, h) = run_script(config(), script, false);

        assert!(matches!(exit, PipelineExit::StreamEnded));
        let segments = h.segments.lock();
        assert_eq!(segments.len(), 1);
        // 4 loud + 3 silent (hangover 2 → closes on the 3rd).
        assert_eq!(segments[0].samples.len(), 7 * BLOCK);
        assert!(segments[0].samples[..4 * BLOCK].iter().all(|&s| s == 2500));
        assert_eq!(h.frames.lock().len(), 17);
        assert!(h.closed.load(Ordering::SeqCst));

        let snap = h.diagnostics.snapshot();
        assert_eq!(snap.blocks_in, 17);
        assert_eq!(snap.sessions_opened, 1);
        assert_eq!(snap.closed_on_silence, 1);
        assert_eq!(snap.segments_emitted, 1);
    }

    #[test]
    fn visualizer_reports_state_before_the_block() {
        let script = vec![read(0), read(2500), read(2500)];
        let (_, h) = run_script(config(), script, false);
        let frames = h.frames.lock();
        assert!(!frames[0].is_speaking);
        assert!(!frames[1].is_speaking, "onset block is sampled while still Idle");
        assert!(frames[2].is_speaking);
    }

    #[test]
    fn blip_is_discarded_and_counted() {
        let cfg = EngineConfig {
            min_segment_blocks: 5,
            ..config()
        };
        // 1 loud + 3 silent closes at 4 blocks, not more than 5.
        let script = vec![read(2500), read(0), read(0), read(0), read(0)];
        let (_, h) = run_script(cfg, script, false);
        assert!(h.segments.lock().is_empty());
        let snap = h.diagnostics.snapshot();
        assert_eq!(snap.segments_discarded, 1);
        assert_eq!(snap.segments_emitted, 0);
    }

    #[test]
    fn device_error_ends_loop_and_closes_stream() {
        let script = vec![read(2500), read(2500)];
        let (exit, h) = run_script(config(), script, true);
        assert!(matches!(exit, PipelineExit::DeviceError(HarkError::AudioStream(_))));
        assert!(h.closed.load(Ordering::SeqCst));
        // The open session is dropped, not emitted.
        assert!(h.segments.lock().is_empty());
    }

    #[test]
    fn overflow_is_counted_but_block_still_processed() {
        let mut overflowed = read(0);
        overflowed.overflowed = true;
        let (_, h) = run_script(config(), vec![overflowed, read(0)], false);
        let snap = h.diagnostics.snapshot();
        assert_eq!(snap.overflows, 1);
        assert_eq!(snap.blocks_in, 2);
    }

    #[test]
    fn idle_blocks_publish_noise_floor() {
        let (_, h) = run_script(config(), (0..50).map(|_| read(0)).collect(), false);
        assert!(h.noise_floor.get() < EngineConfig::DEFAULT_INITIAL_NOISE_FLOOR);
    }

    #[test]
    fn pre_cancelled_loop_reads_nothing() {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let ctx = PipelineContext {
            config: config(),
            stream: Box::new(ScriptedStream {
                blocks: vec![read(2500)].into(),
                fail_at_end: false,
                closed: Arc::new(AtomicBool::new(false)),
            }),
            on_segment: Box::new(|_: Segment| panic!("no segment expected")),
            on_visualizer: Some(Box::new(|_: VisualizationFrame| panic!("no frame expected"))),
            cancel: Arc::new(AtomicBool::new(true)),
            noise_floor: Arc::new(SharedNoiseFloor::new(300.0)),
            diagnostics: Arc::clone(&diagnostics),
        };
        assert!(matches!(run(ctx), PipelineExit::Cancelled));
        assert_eq!(diagnostics.snapshot().blocks_in, 0);
    }

    #[test]
    fn vad_keys_on_peak_while_meter_shows_rms() {
        let mut spike = vec![0i16; BLOCK];
        spike[10] = 2400;
        let script = vec![ReadBlock {
            samples: spike,
            overflowed: false,
        }];
        let (_, h) = run_script(config(), script, false);

        // One 2400 sample in 64: rms 300, peak 2400 against a 600 threshold.
        assert_eq!(h.diagnostics.snapshot().sessions_opened, 1);
        let frames = h.frames.lock();
        approx::assert_relative_eq!(frames[0].level, 300.0 / 3000.0, epsilon = 1e-4);
    }

    #[test]
    fn cancel_during_visualizer_suppresses_segment_of_same_block() {
        let cancel = Arc::new(AtomicBool::new(false));
        let segments = Arc::new(Mutex::new(Vec::new()));
        let mut script: Vec<ReadBlock> = (0..4).map(|_| read(2500)).collect();
        script.extend((0..3).map(|_| read(0)));

        let flag = Arc::clone(&cancel);
        let mut seen = 0;
        let sink = Arc::clone(&segments);
        let ctx = PipelineContext {
            config: config(),
            stream: Box::new(ScriptedStream {
                blocks: script.into(),
                fail_at_end: false,
                closed: Arc::new(AtomicBool::new(false)),
            }),
            on_segment: Box::new(move |s| sink.lock().push(s)),
            on_visualizer: Some(Box::new(move |_: VisualizationFrame| {
                seen += 1;
                // The 7th block closes the session.
                if seen == 7 {
                    flag.store(true, Ordering::SeqCst);
                }
            })),
            cancel,
            noise_floor: Arc::new(SharedNoiseFloor::new(300.0)),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        };

        assert!(matches!(run(ctx), PipelineExit::Cancelled));
        assert!(segments.lock().is_empty());
    }
}
