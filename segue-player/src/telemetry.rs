//! Telemetry events and the fire-and-forget sink wrapper
//!
//! The engine produces structured lifecycle events; shaping them into
//! payloads and transporting them is the sink's business. A failing sink is
//! logged and otherwise ignored: telemetry never fails a playback call.

use chrono::{DateTime, Utc};
use segue_common::events::EndReason;
use segue_common::model::{MediaProduct, QualityTier, StreamingSessionId};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// User-visible playback actions logged against a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackAction {
    PlaybackStart,
    PlaybackStop,
}

impl std::fmt::Display for PlaybackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackAction::PlaybackStart => write!(f, "PLAYBACK_START"),
            PlaybackAction::PlaybackStop => write!(f, "PLAYBACK_STOP"),
        }
    }
}

/// Structured lifecycle event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum TelemetryEvent {
    StreamingSessionStart {
        session_id: StreamingSessionId,
        product: MediaProduct,
        start_position: f64,
        quality: Option<QualityTier>,
        timestamp: DateTime<Utc>,
    },
    StreamingSessionEnd {
        session_id: StreamingSessionId,
        product: MediaProduct,
        end_reason: EndReason,
        end_position: f64,
        timestamp: DateTime<Utc>,
    },
    PlaybackAction {
        session_id: StreamingSessionId,
        action: PlaybackAction,
        position: f64,
        timestamp: DateTime<Utc>,
    },
    PlaybackProgress {
        session_id: StreamingSessionId,
        position: f64,
        duration: f64,
        timestamp: DateTime<Utc>,
    },
    QualityAdaptation {
        session_id: StreamingSessionId,
        quality: QualityTier,
        timestamp: DateTime<Utc>,
    },
    Stall {
        session_id: StreamingSessionId,
        position: f64,
        timestamp: DateTime<Utc>,
    },
}

impl TelemetryEvent {
    pub fn session_id(&self) -> StreamingSessionId {
        match self {
            TelemetryEvent::StreamingSessionStart { session_id, .. }
            | TelemetryEvent::StreamingSessionEnd { session_id, .. }
            | TelemetryEvent::PlaybackAction { session_id, .. }
            | TelemetryEvent::PlaybackProgress { session_id, .. }
            | TelemetryEvent::QualityAdaptation { session_id, .. }
            | TelemetryEvent::Stall { session_id, .. } => *session_id,
        }
    }

    pub fn action(session_id: StreamingSessionId, action: PlaybackAction, position: f64) -> Self {
        TelemetryEvent::PlaybackAction {
            session_id,
            action,
            position,
            timestamp: Utc::now(),
        }
    }
}

/// Transport failure reported by a sink
#[derive(Error, Debug, Clone)]
#[error("telemetry transport failed: {0}")]
pub struct TelemetryError(pub String);

/// Telemetry collaborator
pub trait TelemetrySink: Send + Sync {
    fn submit(&self, event: TelemetryEvent) -> std::result::Result<(), TelemetryError>;
}

/// Fire-and-forget front of a sink
#[derive(Clone)]
pub struct Telemetry {
    sink: Arc<dyn TelemetrySink>,
}

impl Telemetry {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    /// Submit an event; failures are logged, never returned
    pub fn record(&self, event: TelemetryEvent) {
        let session_id = event.session_id();
        if let Err(e) = self.sink.submit(event) {
            warn!(%session_id, "Dropping telemetry event: {}", e);
        }
    }
}

/// Sink that writes events to the log
///
/// Default transport for the binary; real deployments plug their own sink.
#[derive(Debug, Default)]
pub struct LogTelemetrySink;

impl TelemetrySink for LogTelemetrySink {
    fn submit(&self, event: TelemetryEvent) -> std::result::Result<(), TelemetryError> {
        let json = serde_json::to_string(&event).map_err(|e| TelemetryError(e.to_string()))?;
        debug!(target: "segue_player::telemetry", "{}", json);
        Ok(())
    }
}
