//! Crossfade volume ramp
//!
//! Drives both slot volumes along a fade curve on a per-frame tick. The ramp
//! runs as its own task so the engine driver stays responsive; completion is
//! reported back through the engine's message channel tagged with the
//! generation that started it, so a completion that raced a cancel is
//! recognisable as stale.
//!
//! # Timing
//!
//! Progress is wall-clock based (`elapsed / duration`), not tick-count
//! based, so a late frame skips ahead instead of stretching the ramp.

use crate::playback::decode::DecodeEngine;
use crate::playback::engine::EngineMessage;
use segue_common::FadeCurve;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Ramp parameters
#[derive(Debug, Clone, Copy)]
pub struct RampSpec {
    pub curve: FadeCurve,
    pub duration: Duration,
    pub frame_interval: Duration,
}

/// Running ramp
pub struct RampHandle {
    pub generation: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RampHandle {
    /// Stop the ramp; volumes stay wherever the last frame left them
    pub fn cancel(self) {
        self.token.cancel();
        self.task.abort();
        debug!(generation = self.generation, "Crossfade ramp cancelled");
    }
}

/// Start ramping `outgoing` down and `incoming` up
pub fn spawn_ramp(
    outgoing: Arc<dyn DecodeEngine>,
    incoming: Arc<dyn DecodeEngine>,
    spec: RampSpec,
    generation: u64,
    done: mpsc::UnboundedSender<EngineMessage>,
) -> RampHandle {
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let task = tokio::spawn(async move {
        let started = Instant::now();
        let total = spec.duration.as_secs_f32();
        let mut ticker = interval(spec.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancelled.cancelled() => return,
                _ = ticker.tick() => {
                    let progress = if total > 0.0 {
                        (started.elapsed().as_secs_f32() / total).min(1.0)
                    } else {
                        1.0
                    };
                    let gains = spec.curve.gains(progress);
                    outgoing.set_volume(gains.outgoing);
                    incoming.set_volume(gains.incoming);

                    if progress >= 1.0 {
                        debug!(generation, "Crossfade ramp finished");
                        let _ = done.send(EngineMessage::CrossfadeComplete { generation });
                        return;
                    }
                }
            }
        }
    });

    RampHandle {
        generation,
        token,
        task,
    }
}
