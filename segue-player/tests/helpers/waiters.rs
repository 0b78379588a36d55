//! Bounded waits on player output

use segue_common::events::{EndReason, PlaybackState, SegueEvent};
use segue_common::model::StreamingSessionId;
use segue_player::Player;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;

/// Upper bound for any wait (virtual time under a paused clock)
pub const WAIT: Duration = Duration::from_secs(60);

/// Next event matching `predicate`; earlier events are consumed
pub async fn wait_event<F>(rx: &mut broadcast::Receiver<SegueEvent>, predicate: F) -> SegueEvent
where
    F: Fn(&SegueEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn wait_state(player: &Player, state: PlaybackState) {
    let mut rx = player.watch_state();
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", state))
        .expect("state channel closed");
}

/// Poll until the first engine has a crossfade ramp running
pub async fn wait_crossfade(player: &Player) {
    let coordinator = player.engines()[0].coordinator();
    timeout(WAIT, async {
        while !coordinator.crossfade_running() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out waiting for a crossfade");
}

/// Predicate: transition to `session_id`
pub fn transition_to(session_id: StreamingSessionId) -> impl Fn(&SegueEvent) -> bool {
    move |event| {
        matches!(
            event,
            SegueEvent::MediaProductTransition { playback_context, .. }
                if playback_context.playback_session_id == session_id
        )
    }
}

/// Predicate: `session_id` ended with `reason`
pub fn ended_event(session_id: StreamingSessionId, reason: EndReason) -> impl Fn(&SegueEvent) -> bool {
    move |event| {
        matches!(
            event,
            SegueEvent::MediaProductEnded { session_id: id, end_reason, .. }
                if *id == session_id && *end_reason == reason
        )
    }
}
