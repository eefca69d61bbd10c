//! Event types handed to engine consumers.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over its own event bus (JSON lines, IPC, websockets).

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Visualization
// ---------------------------------------------------------------------------

/// One per processed block, for a level meter / waveform widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationFrame {
    /// `rms / max_amplitude`, clamped to [0.0, 1.0].
    pub level: f32,
    /// Decimated samples of the block (every Nth frame).
    pub waveform: Vec<i16>,
    /// Whether a speech session was open when the block arrived.
    pub is_speaking: bool,
    /// Current threshold on the same [0.0, 1.0] scale as `level`.
    pub threshold: f32,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted on the engine's status channel whenever the lifecycle changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. the device error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Nothing has been started yet.
    Idle,
    /// Capture thread running.
    Listening,
    /// Listening ended by `stop()` or by the source running out.
    Stopped,
    /// Capture ended by a device error; `start()` may be called again.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visualization_frame_serializes_with_camel_case_fields() {
        let frame = VisualizationFrame {
            level: 0.25,
            waveform: vec![1, -2, 3],
            is_speaking: true,
            threshold: 0.2,
        };

        let json = serde_json::to_value(&frame).expect("serialize visualization frame");
        assert_eq!(json["isSpeaking"], true);
        assert_eq!(json["waveform"], serde_json::json!([1, -2, 3]));
        let level = json["level"].as_f64().expect("level should serialize as number");
        assert!((level - 0.25).abs() < 1e-6);

        let round_trip: VisualizationFrame =
            serde_json::from_value(json).expect("deserialize visualization frame");
        assert_eq!(round_trip, frame);
    }

    #[test]
    fn status_event_uses_lowercase_status_names() {
        let event = EngineStatusEvent {
            status: EngineStatus::Error,
            detail: Some("device unplugged".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "error");
        assert_eq!(json["detail"], "device unplugged");
    }

    #[test]
    fn engine_status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<EngineStatus>(r#""Listening""#);
        assert!(err.is_err(), "capitalised status must not parse");
    }
}
