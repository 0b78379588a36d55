//! Per-engine playback session state machine
//!
//! Pure bookkeeping: which session this engine is rendering, whether it has
//! actually started, and what the state transition rules say should be
//! reported. The owning `PlaybackEngine` turns the returned
//! `StateTransition` into events and telemetry.
//!
//! **Transition rules:**
//! - same state: ignored
//! - `Idle`/`NotPlaying` → `Stalled`: ignored
//! - `Playing` → `Idle`/`NotPlaying`: progress report, plus a stop action if
//!   the position is short of the duration
//! - `Idle`/`NotPlaying` → `Playing`: a start action if a seek deferred one,
//!   or if the position differs from the session's start position
//! - no current session: ignored

use crate::telemetry::PlaybackAction;
use segue_common::events::PlaybackState;
use segue_common::model::{MediaProduct, StreamingSessionId};

/// Session currently owned by the engine's active slot
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub session_id: StreamingSessionId,
    pub product: MediaProduct,
    /// Position the session was loaded at
    pub start_position: f64,
    /// Became audible at least once
    pub started: bool,
}

/// Reportable outcome of a state change
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub session_id: StreamingSessionId,
    pub old_state: PlaybackState,
    pub new_state: PlaybackState,
    /// Progress report `(position, duration)` when leaving `Playing`
    pub progress: Option<(f64, f64)>,
    pub action: Option<PlaybackAction>,
    pub position: f64,
}

#[derive(Debug)]
pub struct PlaybackSession {
    state: PlaybackState,
    current: Option<CurrentSession>,
    /// Seek finished while not playing; start is logged on the next `Playing`
    pending_seek_start: bool,
    /// A recoverable decode error asked for a reload on the next play
    retry_on_play: bool,
    preload_requested: bool,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSession {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            current: None,
            pending_seek_start: false,
            retry_on_play: false,
            preload_requested: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current(&self) -> Option<&CurrentSession> {
        self.current.as_ref()
    }

    pub fn current_session_id(&self) -> Option<StreamingSessionId> {
        self.current.as_ref().map(|c| c.session_id)
    }

    pub fn is_started(&self) -> bool {
        self.current.as_ref().is_some_and(|c| c.started)
    }

    /// Bind a new session to this engine
    ///
    /// Per-session flags are reset; the state is left alone because a
    /// crossfade hands over while audio keeps playing.
    pub fn set_current(&mut self, session_id: StreamingSessionId, product: MediaProduct, start_position: f64) {
        self.current = Some(CurrentSession {
            session_id,
            product,
            start_position,
            started: false,
        });
        self.pending_seek_start = false;
        self.retry_on_play = false;
        self.preload_requested = false;
    }

    /// Unbind the session if it is still `session_id`
    pub fn clear_current_if(&mut self, session_id: StreamingSessionId) -> bool {
        if self.current_session_id() == Some(session_id) {
            self.current = None;
            self.pending_seek_start = false;
            self.retry_on_play = false;
            true
        } else {
            false
        }
    }

    /// Back to `Idle` without reporting; only once no session is bound
    pub fn reset_state(&mut self) {
        if self.current.is_none() {
            self.state = PlaybackState::Idle;
            self.preload_requested = false;
        }
    }

    /// Mark `session_id` as started; true only the first time
    pub fn mark_started(&mut self, session_id: StreamingSessionId) -> bool {
        match self.current.as_mut() {
            Some(current) if current.session_id == session_id && !current.started => {
                current.started = true;
                self.preload_requested = false;
                true
            }
            _ => false,
        }
    }

    /// Apply a state change and report what it means
    pub fn update_state(
        &mut self,
        new_state: PlaybackState,
        position: f64,
        duration: f64,
    ) -> Option<StateTransition> {
        let current = self.current.as_ref()?;
        let old_state = self.state;
        if old_state == new_state {
            return None;
        }

        use PlaybackState::*;
        let mut transition = StateTransition {
            session_id: current.session_id,
            old_state,
            new_state,
            progress: None,
            action: None,
            position,
        };

        match (old_state, new_state) {
            (NotPlaying | Idle, Stalled) => return None,
            (Playing, NotPlaying | Idle) => {
                transition.progress = Some((position, duration));
                if position < duration {
                    transition.action = Some(PlaybackAction::PlaybackStop);
                }
            }
            (Idle | NotPlaying, Playing) => {
                let deferred = std::mem::take(&mut self.pending_seek_start);
                if deferred || position != current.start_position {
                    transition.action = Some(PlaybackAction::PlaybackStart);
                }
            }
            _ => {}
        }

        self.state = new_state;
        Some(transition)
    }

    /// Stop action for a seek beginning at `position`, if audible
    pub fn seek_start(&mut self, _position: f64) -> Option<PlaybackAction> {
        self.current.as_ref()?;
        (self.state == PlaybackState::Playing).then_some(PlaybackAction::PlaybackStop)
    }

    /// Start action for a seek landing at `position`
    ///
    /// While not playing the start is deferred to the next `Playing`
    /// transition, which consumes it exactly once.
    pub fn seek_end(&mut self, _position: f64) -> Option<PlaybackAction> {
        self.current.as_ref()?;
        if self.state == PlaybackState::Playing {
            Some(PlaybackAction::PlaybackStart)
        } else {
            self.pending_seek_start = true;
            None
        }
    }

    pub fn set_retry_on_play(&mut self) {
        if self.current.is_some() {
            self.retry_on_play = true;
        }
    }

    pub fn take_retry_on_play(&mut self) -> bool {
        std::mem::take(&mut self.retry_on_play)
    }

    /// True once per session when `remaining` drops under `threshold`
    pub fn should_request_preload(&mut self, remaining: f64, threshold: f64, has_next: bool) -> bool {
        if has_next || self.preload_requested || !self.is_started() {
            return false;
        }
        if remaining > 0.0 && remaining <= threshold {
            self.preload_requested = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded() -> (PlaybackSession, StreamingSessionId) {
        let mut session = PlaybackSession::new();
        let id = StreamingSessionId::new();
        session.set_current(id, MediaProduct::track("11"), 0.0);
        (session, id)
    }

    #[test]
    fn test_no_current_session_ignores_updates() {
        let mut session = PlaybackSession::new();
        assert!(session.update_state(PlaybackState::Playing, 0.0, 10.0).is_none());
        assert_eq!(session.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_same_state_ignored() {
        let (mut session, _) = loaded();
        assert!(session.update_state(PlaybackState::NotPlaying, 0.0, 10.0).is_some());
        assert!(session.update_state(PlaybackState::NotPlaying, 0.0, 10.0).is_none());
    }

    #[test]
    fn test_stall_without_playing_ignored() {
        let (mut session, _) = loaded();
        assert!(session.update_state(PlaybackState::Stalled, 0.0, 10.0).is_none());
        assert_eq!(session.state(), PlaybackState::Idle);

        session.update_state(PlaybackState::NotPlaying, 0.0, 10.0);
        assert!(session.update_state(PlaybackState::Stalled, 0.0, 10.0).is_none());
        assert_eq!(session.state(), PlaybackState::NotPlaying);
    }

    #[test]
    fn test_leaving_playing_reports_progress_and_stop() {
        let (mut session, id) = loaded();
        session.update_state(PlaybackState::Playing, 0.0, 10.0);

        let t = session.update_state(PlaybackState::NotPlaying, 4.0, 10.0).unwrap();
        assert_eq!(t.session_id, id);
        assert_eq!(t.progress, Some((4.0, 10.0)));
        assert_eq!(t.action, Some(PlaybackAction::PlaybackStop));
    }

    #[test]
    fn test_reaching_end_reports_no_stop() {
        let (mut session, _) = loaded();
        session.update_state(PlaybackState::Playing, 0.0, 10.0);
        let t = session.update_state(PlaybackState::Idle, 10.0, 10.0).unwrap();
        assert_eq!(t.progress, Some((10.0, 10.0)));
        assert_eq!(t.action, None);
    }

    #[test]
    fn test_start_logged_only_away_from_start_position() {
        let (mut session, _) = loaded();
        let t = session.update_state(PlaybackState::Playing, 0.0, 10.0).unwrap();
        assert_eq!(t.action, None);

        session.update_state(PlaybackState::NotPlaying, 3.0, 10.0);
        let t = session.update_state(PlaybackState::Playing, 3.0, 10.0).unwrap();
        assert_eq!(t.action, Some(PlaybackAction::PlaybackStart));
    }

    #[test]
    fn test_deferred_seek_start_consumed_once() {
        let (mut session, _) = loaded();
        session.update_state(PlaybackState::Playing, 0.0, 10.0);
        session.update_state(PlaybackState::NotPlaying, 2.0, 10.0);

        assert_eq!(session.seek_start(2.0), None);
        assert_eq!(session.seek_end(0.0), None);

        // Back at the start position: the deferred start is the only one
        let t = session.update_state(PlaybackState::Playing, 0.0, 10.0).unwrap();
        assert_eq!(t.action, Some(PlaybackAction::PlaybackStart));

        session.update_state(PlaybackState::NotPlaying, 0.5, 10.0);
        let t = session.update_state(PlaybackState::Playing, 0.0, 10.0).unwrap();
        assert_eq!(t.action, None);
    }

    #[test]
    fn test_seek_while_playing_logs_immediately() {
        let (mut session, _) = loaded();
        session.update_state(PlaybackState::Playing, 0.0, 10.0);
        assert_eq!(session.seek_start(5.0), Some(PlaybackAction::PlaybackStop));
        assert_eq!(session.seek_end(1.0), Some(PlaybackAction::PlaybackStart));
    }

    #[test]
    fn test_mark_started_is_idempotent() {
        let (mut session, id) = loaded();
        assert!(!session.is_started());
        assert!(!session.mark_started(StreamingSessionId::new()));
        assert!(session.mark_started(id));
        assert!(!session.mark_started(id));
        assert!(session.is_started());
    }

    #[test]
    fn test_preload_request_once_per_session() {
        let (mut session, id) = loaded();
        assert!(!session.should_request_preload(5.0, 10.0, false), "not started yet");
        session.mark_started(id);
        assert!(!session.should_request_preload(20.0, 10.0, false));
        assert!(!session.should_request_preload(5.0, 10.0, true));
        assert!(session.should_request_preload(5.0, 10.0, false));
        assert!(!session.should_request_preload(4.0, 10.0, false));

        session.set_current(StreamingSessionId::new(), MediaProduct::track("12"), 0.0);
        let next = session.current_session_id().unwrap();
        session.mark_started(next);
        assert!(session.should_request_preload(4.0, 10.0, false));
    }

    #[test]
    fn test_retry_flag_needs_session() {
        let mut session = PlaybackSession::new();
        session.set_retry_on_play();
        assert!(!session.take_retry_on_play());

        let (mut session, id) = loaded();
        session.set_retry_on_play();
        assert!(session.take_retry_on_play());
        assert!(!session.take_retry_on_play());

        session.set_retry_on_play();
        assert!(session.clear_current_if(id));
        assert!(!session.take_retry_on_play());
    }

    #[test]
    fn test_stalled_survives_unbind_until_reset() {
        let (mut session, id) = loaded();
        session.update_state(PlaybackState::Playing, 1.0, 5.0);
        session.update_state(PlaybackState::Stalled, 1.0, 5.0);

        session.reset_state();
        assert_eq!(session.state(), PlaybackState::Stalled, "bound session blocks reset");

        assert!(session.clear_current_if(id));
        assert_eq!(session.state(), PlaybackState::Stalled);
        session.reset_state();
        assert_eq!(session.state(), PlaybackState::Idle);
    }
}
