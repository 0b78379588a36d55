//! Connection recovery
//!
//! On connectivity loss the audible session is captured and a race starts
//! between "playback stopped" and "connectivity came back". Whoever wins,
//! the capture stays until `connection_restored`, which hands it back for a
//! reload only if playback is not audibly running; a session that kept
//! playing from its buffer is never interrupted.

use crate::playback::context::{lock, PlayerContext};
use crate::playback::engine::SessionSnapshot;
use crate::telemetry::TelemetryEvent;
use chrono::Utc;
use segue_common::events::{PlaybackState, SegueEvent};
use segue_common::model::{MediaProduct, StreamingSessionId};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Session captured when connectivity was lost
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryCapture {
    pub session_id: StreamingSessionId,
    pub product: MediaProduct,
    pub position: f64,
}

pub struct ConnectionRecoveryMonitor {
    ctx: Arc<PlayerContext>,
    online: watch::Sender<bool>,
    capture: Mutex<Option<RecoveryCapture>>,
    race: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionRecoveryMonitor {
    pub fn new(ctx: Arc<PlayerContext>) -> Self {
        let (online, _) = watch::channel(true);
        Self {
            ctx,
            online,
            capture: Mutex::new(None),
            race: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn capture(&self) -> Option<RecoveryCapture> {
        lock(&self.capture).clone()
    }

    /// Connectivity went away while `active` was the audible session
    pub fn connection_lost(&self, active: Option<SessionSnapshot>) {
        self.online.send_replace(false);
        self.ctx.emit(SegueEvent::ConnectivityChanged {
            online: false,
            timestamp: Utc::now(),
        });

        let Some(snapshot) = active.filter(|s| s.started) else {
            debug!("Connectivity lost with no started session, nothing to capture");
            return;
        };
        let capture = RecoveryCapture {
            session_id: snapshot.session_id,
            product: snapshot.product,
            position: snapshot.position,
        };
        info!(
            session_id = %capture.session_id,
            position = capture.position,
            "Connectivity lost, capturing session"
        );
        *lock(&self.capture) = Some(capture.clone());

        let ctx = self.ctx.clone();
        let mut state_rx = ctx.watch_state();
        let mut online_rx = self.online.subscribe();
        let race = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = state_rx.wait_for(|state| *state != PlaybackState::Playing) => {
                    info!(session_id = %capture.session_id, "Playback stopped while offline");
                    ctx.telemetry.record(TelemetryEvent::Stall {
                        session_id: capture.session_id,
                        position: capture.position,
                        timestamp: Utc::now(),
                    });
                }
                _ = online_rx.wait_for(|online| *online) => {
                    debug!("Connectivity restored before playback stopped");
                }
                _ = ctx.shutdown.cancelled() => {}
            }
        });
        if let Some(previous) = lock(&self.race).replace(race) {
            previous.abort();
        }
    }

    /// Connectivity is back
    ///
    /// Returns the capture to reload, or `None` when nothing was captured or
    /// playback is still audible.
    pub fn connection_restored(&self) -> Option<RecoveryCapture> {
        self.online.send_replace(true);
        self.ctx.emit(SegueEvent::ConnectivityChanged {
            online: true,
            timestamp: Utc::now(),
        });
        if let Some(race) = lock(&self.race).take() {
            race.abort();
        }

        let capture = lock(&self.capture).take()?;
        if self.ctx.playback_state() == PlaybackState::Playing {
            debug!(session_id = %capture.session_id, "Still playing after reconnect, no reload");
            return None;
        }
        info!(
            session_id = %capture.session_id,
            position = capture.position,
            "Reloading captured session after reconnect"
        );
        Some(capture)
    }

    /// Forget any capture (explicit reset)
    pub fn clear(&self) {
        lock(&self.capture).take();
        if let Some(race) = lock(&self.race).take() {
            race.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerSettings;
    use crate::sim::{RecordingTelemetry, SimulatedResolver};
    use crate::telemetry::Telemetry;
    use std::time::Duration;

    fn monitor() -> (ConnectionRecoveryMonitor, Arc<PlayerContext>, Arc<RecordingTelemetry>) {
        let sink = Arc::new(RecordingTelemetry::new());
        let (ctx, _rx) = PlayerContext::new(
            PlayerSettings::default(),
            Arc::new(SimulatedResolver::new()),
            Telemetry::new(sink.clone()),
        );
        (ConnectionRecoveryMonitor::new(ctx.clone()), ctx, sink)
    }

    fn snapshot(started: bool) -> SessionSnapshot {
        SessionSnapshot {
            session_id: StreamingSessionId::new(),
            product: MediaProduct::track("3"),
            position: 12.0,
            started,
        }
    }

    #[tokio::test]
    async fn test_never_started_session_not_captured() {
        let (monitor, _ctx, _sink) = monitor();
        monitor.connection_lost(Some(snapshot(false)));
        assert!(!monitor.is_online());
        assert!(monitor.capture().is_none());
        assert!(monitor.connection_restored().is_none());
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_no_reload_while_playing() {
        let (monitor, ctx, _sink) = monitor();
        ctx.publish_state(PlaybackState::Playing);
        monitor.connection_lost(Some(snapshot(true)));
        assert!(monitor.capture().is_some());
        assert!(monitor.connection_restored().is_none());
        assert!(monitor.capture().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_while_offline_reloads_and_reports() {
        let (monitor, ctx, sink) = monitor();
        ctx.publish_state(PlaybackState::Playing);
        let lost = snapshot(true);
        monitor.connection_lost(Some(lost.clone()));

        ctx.publish_state(PlaybackState::NotPlaying);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, TelemetryEvent::Stall { session_id, .. } if *session_id == lost.session_id)));

        let capture = monitor.connection_restored().expect("capture handed back");
        assert_eq!(capture.product, lost.product);
        assert_eq!(capture.position, 12.0);
    }
}
