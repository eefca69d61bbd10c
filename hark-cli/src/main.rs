//! `hark`: listen, detect speech, write each utterance to a WAV file.
//!
//! Logs go to stderr; with `--json`, stdout carries one JSON object per
//! line (visualization frames, written segments, status changes, and a
//! final summary) for another process to consume.

mod settings;
mod writer;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{after, never, select, Receiver, Sender, TrySendError};
use hark_core::engine::VisualizerCallback;
use hark_core::{
    list_input_devices, AudioSource, CpalSource, EngineStatus, EngineStatusEvent, HarkEngine,
    Profile, VisualizationFrame, WavSource,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use writer::SegmentWriter;

/// Frames waiting for stdout. Beyond this the capture thread drops frames
/// rather than wait on a slow pipe.
const FRAME_QUEUE_CAP: usize = 256;

/// Hands-free speech segmentation. Writes one WAV file per utterance.
#[derive(Debug, Parser)]
#[command(name = "hark", author, version, about)]
struct Args {
    /// Print detected audio input devices and exit
    #[arg(long = "list-devices", default_value_t = false)]
    list_devices: bool,

    /// Preferred audio input device name (falls back to the default)
    #[arg(long, value_name = "NAME")]
    device: Option<String>,

    /// Replay a WAV file instead of capturing from a microphone
    #[arg(long, value_name = "FILE.wav")]
    input: Option<PathBuf>,

    /// Pace `--input` replay in real time
    #[arg(long, default_value_t = false, requires = "input")]
    realtime: bool,

    /// VAD tuning profile: adaptive or fixed-threshold
    #[arg(long, default_value_t = Profile::Adaptive)]
    profile: Profile,

    /// JSON engine config (camelCase keys, missing keys keep the profile's value)
    #[arg(long, value_name = "FILE.json")]
    config: Option<PathBuf>,

    /// Directory for hark-NNNN.wav files [default: <temp dir>/hark]
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Emit events as JSON lines on stdout
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<f64>,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum OutputEvent<'a> {
    Visualization(&'a VisualizationFrame),
    Status(&'a EngineStatusEvent),
    #[serde(rename_all = "camelCase")]
    Summary {
        segments_written: u64,
        noise_floor: f32,
        diagnostics: hark_core::DiagnosticsSnapshot,
    },
}

fn print_json(event: &OutputEvent<'_>) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => error!("cannot encode output event: {e}"),
    }
}

/// Visualizer callback that queues frames for the main thread to print.
/// Never blocks the capture thread; frames are dropped when the queue is full.
fn forward_frames(tx: Sender<VisualizationFrame>) -> VisualizerCallback {
    Box::new(move |frame: VisualizationFrame| {
        if let Err(TrySendError::Full(_)) = tx.try_send(frame) {
            debug!("stdout is behind — visualization frame dropped");
        }
    })
}

fn main() -> ExitCode {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hark=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    if args.list_devices {
        return list_devices(args.json);
    }

    let duration = match args.duration {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => bail!("--duration must be a positive number of seconds (got {secs})"),
        None => None,
    };

    let config = settings::resolve_engine_config(
        args.profile,
        args.config.as_deref(),
        args.device.as_deref(),
        args.input.as_deref(),
    )?;
    let out_dir = args.out_dir.clone().unwrap_or_else(settings::default_out_dir);
    info!(
        profile = %args.profile,
        out_dir = %out_dir.display(),
        device = config.input_device.as_deref().unwrap_or("<default>"),
        "hark starting"
    );

    let source: Box<dyn AudioSource> = match &args.input {
        Some(path) => Box::new(WavSource::new(path).paced(args.realtime)),
        None => Box::new(CpalSource::new()),
    };
    let engine = HarkEngine::new(config, source)?;
    let events = engine.status_events();

    let writer = SegmentWriter::spawn(out_dir, args.json)?;
    let segments = writer.sender();
    let (frame_tx, frames) = crossbeam_channel::bounded::<VisualizationFrame>(FRAME_QUEUE_CAP);
    let on_visualizer = args.json.then(|| forward_frames(frame_tx));

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("cannot install Ctrl+C handler")?;

    engine
        .start(
            move |segment| {
                if segments.send(segment).is_err() {
                    warn!("segment writer is gone — segment dropped");
                }
            },
            on_visualizer,
        )
        .context("cannot start listening")?;

    let deadline = duration.map_or_else(never, after);

    let failure = wait_for_end(&events, &frames, &shutdown_rx, &deadline, args.json);

    let outcome = engine.stop();
    info!(?outcome, "listening stopped");
    let diagnostics = engine.diagnostics_snapshot();
    let noise_floor = engine.noise_floor();
    // Dropping the engine releases the callback's sender so the writer can finish.
    drop(engine);
    for frame in frames.try_iter() {
        print_json(&OutputEvent::Visualization(&frame));
    }
    let written = writer.finish();

    info!(segments_written = written, noise_floor, "done");
    if args.json {
        print_json(&OutputEvent::Summary {
            segments_written: written,
            noise_floor,
            diagnostics,
        });
    }

    match failure {
        Some(detail) => bail!("capture failed: {detail}"),
        None => Ok(()),
    }
}

/// Block until Ctrl+C, the deadline, or the engine stopping on its own,
/// printing visualization frames as they arrive. Returns the error detail if
/// the device failed.
fn wait_for_end(
    events: &Receiver<EngineStatusEvent>,
    frames: &Receiver<VisualizationFrame>,
    shutdown: &Receiver<()>,
    deadline: &Receiver<std::time::Instant>,
    json: bool,
) -> Option<String> {
    let mut frames = frames.clone();
    loop {
        select! {
            recv(frames) -> frame => match frame {
                Ok(frame) => print_json(&OutputEvent::Visualization(&frame)),
                // Callback dropped with the capture thread.
                Err(_) => frames = never(),
            },
            recv(shutdown) -> _ => {
                info!("interrupted");
                return None;
            }
            recv(deadline) -> _ => {
                info!("duration elapsed");
                return None;
            }
            recv(events) -> event => {
                let Ok(event) = event else { return None };
                if json {
                    print_json(&OutputEvent::Status(&event));
                }
                match event.status {
                    EngineStatus::Stopped => return None,
                    EngineStatus::Error => {
                        return Some(event.detail.unwrap_or_else(|| "unknown error".into()));
                    }
                    EngineStatus::Idle | EngineStatus::Listening => {}
                }
            }
        }
    }
}

fn list_devices(json: bool) -> Result<()> {
    let devices = list_input_devices();
    if json {
        println!("{}", serde_json::to_string(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No audio input devices detected.");
        return Ok(());
    }
    println!("Detected audio input devices:");
    for device in devices {
        let mut notes = Vec::new();
        if device.is_default {
            notes.push("default".to_string());
        }
        if device.is_recommended {
            notes.push("recommended".to_string());
        }
        if device.is_loopback_like {
            notes.push("loopback".to_string());
        }
        if let (Some(ch), Some(rate)) = (device.channels, device.default_sample_rate) {
            notes.push(format!("{ch} ch @ {rate} Hz"));
        }
        if notes.is_empty() {
            println!("- {}", device.name);
        } else {
            println!("- {} ({})", device.name, notes.join(", "));
        }
    }
    Ok(())
}
