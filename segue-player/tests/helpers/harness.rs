//! Player over simulated collaborators
//!
//! Catalogue: `A` (5 s), `B` (6 s), `C` (3 s). All run on tokio time, so
//! tests should use `#[tokio::test(start_paused = true)]`.

use segue_common::model::StreamingSessionId;
use segue_player::sim::{RecordingTelemetry, SimBackend, SimulatedDecodeEngine, SimulatedResolver};
use segue_player::{BackendSpec, Player, PlayerSettings};
use std::sync::Arc;

pub struct Harness {
    pub player: Player,
    pub resolver: Arc<SimulatedResolver>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub backend: SimBackend,
}

impl Harness {
    /// Slot engine that currently has `session_id` loaded
    pub fn slot(&self, session_id: StreamingSessionId) -> Arc<SimulatedDecodeEngine> {
        self.backend
            .engine_for(session_id)
            .expect("session is loaded in a slot")
    }

    pub fn current(&self) -> StreamingSessionId {
        self.player
            .current_session_id()
            .expect("player has a current session")
    }
}

pub fn harness() -> Harness {
    harness_with(PlayerSettings::default())
}

pub fn harness_with(settings: PlayerSettings) -> Harness {
    let resolver = Arc::new(SimulatedResolver::new());
    resolver.add_track("A", 5.0);
    resolver.add_track("B", 6.0);
    resolver.add_track("C", 3.0);
    let telemetry = Arc::new(RecordingTelemetry::new());
    let backend = SimBackend::new("sim");

    let player = Player::builder()
        .settings(settings)
        .resolver(resolver.clone())
        .telemetry(telemetry.clone())
        .backend(BackendSpec::new("sim", backend.factory()))
        .build()
        .expect("player builds");

    Harness {
        player,
        resolver,
        telemetry,
        backend,
    }
}
