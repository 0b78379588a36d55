//! Telemetry sink that keeps every event in memory

use crate::playback::context::lock;
use crate::telemetry::{PlaybackAction, TelemetryError, TelemetryEvent, TelemetrySink};
use segue_common::model::StreamingSessionId;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        lock(&self.events).clone()
    }

    /// Playback actions logged against `session_id`, in order
    pub fn actions(&self, session_id: StreamingSessionId) -> Vec<PlaybackAction> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                TelemetryEvent::PlaybackAction {
                    session_id: id,
                    action,
                    ..
                } if *id == session_id => Some(*action),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn submit(&self, event: TelemetryEvent) -> Result<(), TelemetryError> {
        lock(&self.events).push(event);
        Ok(())
    }
}
