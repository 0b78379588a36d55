//! Session metadata store
//!
//! Keyed cache of everything known about a streaming session: the
//! transition recorded when it became audible, the entitlement result and
//! the stream descriptor. The three records are created together and
//! deleted together; `clone_session` is the only way to carry them over to a
//! new id (repeat-one reuses entitlement instead of re-fetching it).

use crate::error::{StoreError, StoreRecord};
use crate::session::info::{PlaybackInfo, StreamInfo};
use chrono::{DateTime, Utc};
use segue_common::model::{MediaProductTransition, QualityTier, StreamingSessionId};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SessionStore {
    transitions: HashMap<StreamingSessionId, MediaProductTransition>,
    playback_infos: HashMap<StreamingSessionId, PlaybackInfo>,
    stream_infos: HashMap<StreamingSessionId, StreamInfo>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Transitions ===

    pub fn save_transition(&mut self, id: StreamingSessionId, transition: MediaProductTransition) {
        self.transitions.insert(id, transition);
    }

    pub fn get_transition(&self, id: &StreamingSessionId) -> Option<&MediaProductTransition> {
        self.transitions.get(id)
    }

    pub fn delete_transition(&mut self, id: &StreamingSessionId) -> Option<MediaProductTransition> {
        self.transitions.remove(id)
    }

    pub fn has_transition(&self, id: &StreamingSessionId) -> bool {
        self.transitions.contains_key(id)
    }

    // === Playback info ===

    pub fn save_playback_info(&mut self, id: StreamingSessionId, info: PlaybackInfo) {
        self.playback_infos.insert(id, info);
    }

    pub fn get_playback_info(&self, id: &StreamingSessionId) -> Option<&PlaybackInfo> {
        self.playback_infos.get(id)
    }

    pub fn has_playback_info(&self, id: &StreamingSessionId) -> bool {
        self.playback_infos.contains_key(id)
    }

    /// Cached entitlement that can still be used at `now`
    pub fn fresh_playback_info(
        &self,
        id: &StreamingSessionId,
        now: DateTime<Utc>,
    ) -> Option<&PlaybackInfo> {
        self.playback_infos.get(id).filter(|info| !info.is_expired(now))
    }

    // === Stream info ===

    pub fn save_stream_info(&mut self, id: StreamingSessionId, info: StreamInfo) {
        self.stream_infos.insert(id, info);
    }

    pub fn get_stream_info(&self, id: &StreamingSessionId) -> Option<&StreamInfo> {
        self.stream_infos.get(id)
    }

    pub fn has_stream_info(&self, id: &StreamingSessionId) -> bool {
        self.stream_infos.contains_key(id)
    }

    pub fn delete_stream_info(&mut self, id: &StreamingSessionId) -> Option<StreamInfo> {
        self.stream_infos.remove(id)
    }

    // === Session-wide operations ===

    /// Patch the duration of a stored transition once the real value is known
    ///
    /// Returns false if no transition exists for `id`.
    pub fn overwrite_duration(&mut self, id: &StreamingSessionId, duration: f64) -> bool {
        match self.transitions.get_mut(id) {
            Some(transition) => {
                transition.playback_context.actual_duration = duration;
                true
            }
            None => false,
        }
    }

    /// Record a mid-stream quality change
    pub fn set_quality(&mut self, id: &StreamingSessionId, quality: QualityTier) -> bool {
        if let Some(stream) = self.stream_infos.get_mut(id) {
            stream.quality = quality;
        }
        match self.transitions.get_mut(id) {
            Some(transition) => {
                transition.playback_context.actual_quality = quality;
                true
            }
            None => false,
        }
    }

    /// Record the last known position of a session
    pub fn update_position(&mut self, id: &StreamingSessionId, position: f64) {
        if let Some(transition) = self.transitions.get_mut(id) {
            transition.playback_context.asset_position = position;
        }
    }

    /// Copy all three records of `from` under `to`, rewriting the session id
    ///
    /// The source must be fully resolved; the copies are independent of the
    /// originals afterwards.
    pub fn clone_session(
        &mut self,
        from: &StreamingSessionId,
        to: StreamingSessionId,
    ) -> Result<(), StoreError> {
        if self.has_transition(&to) || self.has_playback_info(&to) || self.has_stream_info(&to) {
            return Err(StoreError::AlreadyExists(to));
        }

        let missing = |record| StoreError::MissingRecord {
            session_id: *from,
            record,
        };
        let transition = self
            .transitions
            .get(from)
            .ok_or_else(|| missing(StoreRecord::Transition))?;
        let playback_info = self
            .playback_infos
            .get(from)
            .ok_or_else(|| missing(StoreRecord::PlaybackInfo))?;
        let stream_info = self
            .stream_infos
            .get(from)
            .ok_or_else(|| missing(StoreRecord::StreamInfo))?;

        let mut transition = transition.clone();
        transition.playback_context.playback_session_id = to;
        let playback_info = playback_info.with_session_id(to);
        let stream_info = stream_info.with_session_id(to);

        self.transitions.insert(to, transition);
        self.playback_infos.insert(to, playback_info);
        self.stream_infos.insert(to, stream_info);
        debug!(%from, %to, "Cloned session records");
        Ok(())
    }

    /// Remove every record of a session
    pub fn delete_session(&mut self, id: &StreamingSessionId) {
        let removed = self.transitions.remove(id).is_some()
            | self.playback_infos.remove(id).is_some()
            | self.stream_infos.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "Deleted session records");
        }
    }

    /// Ids with at least one record
    pub fn session_ids(&self) -> Vec<StreamingSessionId> {
        let mut ids: Vec<_> = self
            .transitions
            .keys()
            .chain(self.playback_infos.keys())
            .chain(self.stream_infos.keys())
            .copied()
            .collect();
        ids.sort_by_key(|id| id.as_uuid());
        ids.dedup();
        ids
    }

    pub fn len(&self) -> usize {
        self.session_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.playback_infos.is_empty() && self.stream_infos.is_empty()
    }
}
