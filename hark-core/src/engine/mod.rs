//! `HarkEngine`: the top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! HarkEngine::new(config, source)   → config validated, status = Idle
//!     └─► start(on_segment, viz)   → stream open on hark-capture, status = Listening
//!         └─► stop()               → token set, thread acked, status = Stopped
//! ```
//!
//! `start()` while listening is a no-op. `stop()` while stopped returns
//! [`StopOutcome::NotRunning`]. Neither panics in the wrong state.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! The stream is therefore opened *inside* the capture thread so it never
//! crosses a thread boundary. A one-shot channel carries the open result
//! back to the `start()` caller.
//!
//! Each listening session gets its own cancellation token. A thread that
//! `stop()` gave up waiting on keeps its (already set) token and cannot be
//! revived by a later `start()`.
//!
//! A session ends with exactly one terminal status. `stop()` and the capture
//! thread race for it through the session's `ended` flag; whoever loses the
//! `compare_exchange` publishes nothing.

pub mod config;
pub mod pipeline;

pub use config::{EngineConfig, Profile};
pub use pipeline::{DiagnosticsSnapshot, SegmentCallback, VisualizerCallback};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    audio::AudioSource,
    error::{HarkError, Result},
    ipc::events::{EngineStatus, EngineStatusEvent},
    segment::Segment,
};

use pipeline::{PipelineContext, PipelineDiagnostics, PipelineExit, SharedNoiseFloor};

/// Status events buffered for a slow (or absent) consumer before new ones are dropped.
const STATUS_CHANNEL_CAP: usize = 64;

/// How long `stop()` waits for the capture thread to acknowledge.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

const CAPTURE_THREAD_NAME: &str = "hark-capture";

/// What `stop()` managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was listening.
    NotRunning,
    /// The capture thread exited and was joined.
    Joined,
    /// The thread was cancelled but not joined: either it did not
    /// acknowledge within the timeout, or `stop()` was called from the
    /// capture thread itself. It delivers no further events either way.
    Detached,
}

/// Current status plus the event channel, shared with the capture thread.
struct StatusCell {
    current: Mutex<EngineStatus>,
    tx: Sender<EngineStatusEvent>,
}

impl StatusCell {
    fn set(&self, status: EngineStatus, detail: Option<String>) {
        *self.current.lock() = status;
        match self.tx.try_send(EngineStatusEvent { status, detail }) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                debug!(?status, "status channel full — event dropped");
            }
        }
    }
}

/// One listening session's thread and its control handles.
struct ActiveSession {
    cancel: Arc<AtomicBool>,
    /// Set by the thread once the capture loop has returned.
    finished: Arc<AtomicBool>,
    /// Claimed by whichever of `stop()` and the thread publishes the terminal status.
    ended: Arc<AtomicBool>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

impl ActiveSession {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// `true` for the single caller that gets to end the session.
fn claim_end(ended: &AtomicBool) -> bool {
    ended
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// The top-level engine handle.
///
/// `HarkEngine` is `Send + Sync`; all fields use interior mutability. Wrap
/// it in an `Arc` to call `stop()` from a callback or another thread.
pub struct HarkEngine {
    config: EngineConfig,
    source: Arc<dyn AudioSource>,
    session: Mutex<Option<ActiveSession>>,
    noise_floor: Arc<SharedNoiseFloor>,
    status: Arc<StatusCell>,
    status_rx: Receiver<EngineStatusEvent>,
    /// Replaced on every `start()` so a detached thread cannot skew the new counters.
    diagnostics: Mutex<Arc<PipelineDiagnostics>>,
}

impl HarkEngine {
    /// Create an engine. Does not open the source; call [`start`](Self::start).
    ///
    /// # Errors
    /// `HarkError::InvalidConfig` if `config` fails validation.
    pub fn new(config: EngineConfig, source: impl AudioSource) -> Result<Self> {
        config.validate()?;
        let (tx, status_rx) = crossbeam_channel::bounded(STATUS_CHANNEL_CAP);

        Ok(Self {
            noise_floor: Arc::new(SharedNoiseFloor::new(config.initial_noise_floor)),
            config,
            source: Arc::new(source),
            session: Mutex::new(None),
            status: Arc::new(StatusCell {
                current: Mutex::new(EngineStatus::Idle),
                tx,
            }),
            status_rx,
            diagnostics: Mutex::new(Arc::new(PipelineDiagnostics::default())),
        })
    }

    /// Open the source and begin listening.
    ///
    /// Blocks until the stream is confirmed open (or fails), then returns.
    /// Both callbacks run on the capture thread, in block order; they must
    /// return quickly.
    ///
    /// Calling `start` while already listening does nothing. The noise floor
    /// carries over from the previous session; counters and any open speech
    /// session do not.
    ///
    /// # Errors
    /// - `HarkError::InvalidConfig` before any thread is spawned.
    /// - Any error from [`AudioSource::open`]; the engine stays stopped.
    pub fn start<F>(&self, on_segment: F, on_visualizer: Option<VisualizerCallback>) -> Result<()>
    where
        F: FnMut(Segment) + Send + 'static,
    {
        self.config.validate()?;

        let mut slot = self.session.lock();
        if slot.as_ref().is_some_and(|s| !s.is_finished()) {
            debug!("start ignored: already listening");
            return Ok(());
        }
        // Reap a session that ended on its own (device error or end of stream).
        if let Some(old) = slot.take() {
            let _ = old.handle.join();
        }

        let diagnostics = Arc::new(PipelineDiagnostics::default());
        *self.diagnostics.lock() = Arc::clone(&diagnostics);

        let cancel = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));

        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        // Clone all shared state before moving into the closure.
        let config = self.config.clone();
        let source = Arc::clone(&self.source);
        let status = Arc::clone(&self.status);
        let noise_floor = Arc::clone(&self.noise_floor);
        let thread_cancel = Arc::clone(&cancel);
        let thread_finished = Arc::clone(&finished);
        let thread_ended = Arc::clone(&ended);
        let on_segment: SegmentCallback = Box::new(on_segment);

        let handle = thread::Builder::new()
            .name(CAPTURE_THREAD_NAME.into())
            .spawn(move || {
                // ── Open the stream (must happen on THIS thread; cpal::Stream is !Send) ──
                let stream = match source.open(&config.stream_params()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        thread_finished.store(true, Ordering::Release);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                // Published before the ack so start() never races a later Stopped.
                status.set(EngineStatus::Listening, None);
                let _ = open_tx.send(Ok(()));

                let exit = pipeline::run(PipelineContext {
                    config,
                    stream,
                    on_segment,
                    on_visualizer,
                    cancel: thread_cancel,
                    noise_floor,
                    diagnostics,
                });

                thread_finished.store(true, Ordering::Release);
                match exit {
                    PipelineExit::Cancelled => {}
                    PipelineExit::StreamEnded if claim_end(&thread_ended) => {
                        info!("audio source ended — listening stopped");
                        status.set(EngineStatus::Stopped, Some("audio stream ended".into()));
                    }
                    PipelineExit::DeviceError(e) if claim_end(&thread_ended) => {
                        status.set(EngineStatus::Error, Some(e.to_string()));
                    }
                    PipelineExit::StreamEnded | PipelineExit::DeviceError(_) => {
                        debug!("session already stopped; exit status not published");
                    }
                }
                let _ = done_tx.send(());
            })?;

        match open_rx.recv() {
            Ok(Ok(())) => {
                *slot = Some(ActiveSession {
                    cancel,
                    finished,
                    ended,
                    done_rx,
                    handle,
                });
                info!(
                    noise_floor = self.noise_floor.get(),
                    sample_rate = self.config.sample_rate,
                    channels = self.config.channels,
                    block_size = self.config.block_size,
                    "engine started — listening"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                self.status.set(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent: the thread panicked.
                let _ = handle.join();
                self.status
                    .set(EngineStatus::Error, Some("capture thread failed to start".into()));
                Err(HarkError::Other(anyhow::anyhow!(
                    "capture thread died before opening the stream"
                )))
            }
        }
    }

    /// Stop listening.
    ///
    /// With `Joined`, no callback fires after this returns. With `Detached`,
    /// a dispatch that passed its cancellation check before the token was set
    /// may still complete, but no later block reaches a callback. Safe to call
    /// from inside a callback (returns `Detached` there).
    ///
    /// If the device failed or the stream ended at the same moment, only one
    /// of the two terminal statuses is published.
    pub fn stop(&self) -> StopOutcome {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return StopOutcome::NotRunning;
        };

        if session.is_finished() {
            let _ = session.handle.join();
            return StopOutcome::NotRunning;
        }

        session.cancel.store(true, Ordering::Release);
        if claim_end(&session.ended) {
            self.status.set(EngineStatus::Stopped, None);
        }
        info!("engine stop requested");

        if thread::current().id() == session.handle.thread().id() {
            debug!("stop called from the capture thread — not joining");
            return StopOutcome::Detached;
        }

        match session.done_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = session.handle.join();
                StopOutcome::Joined
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = STOP_TIMEOUT.as_millis() as u64,
                    "capture thread did not exit in time — detaching"
                );
                StopOutcome::Detached
            }
        }
    }

    /// `true` while a capture loop is running.
    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| !s.is_finished())
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.current.lock()
    }

    /// Receiver for lifecycle events.
    ///
    /// All clones share one queue: each event goes to exactly one receiver.
    pub fn status_events(&self) -> Receiver<EngineStatusEvent> {
        self.status_rx.clone()
    }

    /// Current adaptive noise floor; survives `stop`/`start`.
    pub fn noise_floor(&self) -> f32 {
        self.noise_floor.get()
    }

    /// Counters of the current (or most recent) listening session.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.lock().snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for HarkEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
