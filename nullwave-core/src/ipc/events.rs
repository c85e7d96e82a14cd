//! Event types broadcast by the engine.
//!
//! Serialized as camelCase JSON so hosts can forward them to a UI process
//! unchanged.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted whenever the engine changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the cancellation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Devices open and tasks scheduled, but capture and playback are held.
    Paused,
    /// Capturing and playing the inverted signal.
    Running,
    /// Torn down; a new `start()` is required.
    Stopped,
    /// Start failed — see the event detail.
    Error,
}

// ---------------------------------------------------------------------------
// Cycle counters
// ---------------------------------------------------------------------------

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    /// Blocks read from the microphone and published.
    pub blocks_captured: usize,
    /// Capture cycles skipped because the previous block was still unread.
    pub captures_skipped: usize,
    /// Captured blocks discarded by the handoff.
    pub blocks_dropped: usize,
    pub capture_errors: usize,
    /// Blocks inverted and written to the playback ring.
    pub blocks_played: usize,
    /// Playback cycles that found nothing new (silence gaps).
    pub silence_gaps: usize,
    pub write_errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = EngineStatusEvent {
            status: EngineStatus::Running,
            detail: Some("resumed".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "running");
        assert_eq!(json["detail"], "resumed");

        let round_trip: EngineStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, EngineStatus::Running);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<EngineStatus>(r#""Paused""#).is_err());
    }

    #[test]
    fn diagnostics_snapshot_uses_camel_case() {
        let snapshot = DiagnosticsSnapshot {
            silence_gaps: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(snapshot).expect("serialize snapshot");
        assert_eq!(json["silenceGaps"], 3);
        assert_eq!(json["blocksPlayed"], 0);
    }
}
