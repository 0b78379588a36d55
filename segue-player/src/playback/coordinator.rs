//! Dual-buffer preload and crossfade coordinator
//!
//! **Responsibilities:**
//! - Own two interchangeable decode-engine slots: one active (volume 1), one
//!   inactive (volume 0)
//! - Preload the next session into the inactive slot without touching the
//!   active one
//! - Run the crossfade ramp and swap slot roles on completion
//! - Tag each slot with the session it owns so late `Ended` signals can be
//!   told apart from real ones
//!
//! Lifecycle decisions that involve the state machine (ending sessions,
//! telemetry) stay in `PlaybackEngine`; this type only reports what happened
//! to the slots.

use crate::config::PlayerSettings;
use crate::error::{PlayerError, Result};
use crate::playback::context::{lock, PlayerContext};
use crate::playback::crossfade::{spawn_ramp, RampHandle, RampSpec};
use crate::playback::decode::DecodeEngine;
use crate::playback::engine::EngineMessage;
use crate::session::{PlaybackInfo, StreamInfo};
use segue_common::model::{MediaProduct, MediaProductTransition, PlaybackContext, StreamingSessionId};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One of the two slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    pub fn index(self) -> usize {
        match self {
            SlotId::A => 0,
            SlotId::B => 1,
        }
    }

    pub fn other(self) -> SlotId {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }
}

/// Everything needed to make a preloaded session audible
#[derive(Debug, Clone)]
pub struct PreloadPayload {
    pub session_id: StreamingSessionId,
    pub media_product: MediaProduct,
    pub stream_info: StreamInfo,
    pub playback_info: PlaybackInfo,
    /// Definitive transition as committed; the store copy wins on handoff
    pub transition: MediaProductTransition,
}

/// Result of swapping slot roles
pub struct Handoff {
    pub outgoing: Arc<dyn DecodeEngine>,
    pub incoming: Arc<dyn DecodeEngine>,
    /// Session the outgoing slot owned, if any
    pub outgoing_session: Option<StreamingSessionId>,
    pub outgoing_position: f64,
    pub payload: PreloadPayload,
}

/// What an `Ended` signal means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndedDisposition {
    /// Slot no longer owns the reported session
    Stale,
    /// Inactive slot finished; nothing to do
    Inactive,
    /// Outgoing side of a running ramp; completion handles it
    RampInProgress,
    /// Active slot ended with a payload but no ramp: swap now
    ForceCrossfade,
    /// Active slot ended with nothing behind it
    NoNext,
}

struct CoordinatorState {
    active: SlotId,
    owners: [Option<StreamingSessionId>; 2],
    pending_preload: Option<StreamingSessionId>,
    payload: Option<PreloadPayload>,
    ramp: Option<RampHandle>,
    /// Set from ramp start until completion or cancel
    crossfade_started: bool,
    generation: u64,
}

pub struct DualBufferCoordinator {
    ctx: Arc<PlayerContext>,
    slots: [Arc<dyn DecodeEngine>; 2],
    ramp_spec: RampSpec,
    state: Mutex<CoordinatorState>,
}

/// Transition record for `info`
pub fn transition_for(
    product: &MediaProduct,
    info: &PlaybackInfo,
    duration: f64,
    position: f64,
    estimated: bool,
) -> MediaProductTransition {
    MediaProductTransition {
        media_product: product.clone(),
        playback_context: PlaybackContext {
            actual_product_id: info.product_id.clone(),
            actual_product_type: info.product_type,
            actual_duration: duration,
            actual_quality: info.quality,
            codec: info.codec.clone(),
            playback_session_id: info.streaming_session_id,
            asset_position: position,
        },
        estimated,
    }
}

fn decode_error(e: crate::playback::decode::DecodeFault) -> PlayerError {
    PlayerError::Decode(e.to_string())
}

impl DualBufferCoordinator {
    pub fn new(ctx: Arc<PlayerContext>, slots: [Arc<dyn DecodeEngine>; 2]) -> Self {
        let settings: &PlayerSettings = &ctx.settings;
        let ramp_spec = RampSpec {
            curve: settings.fade_curve,
            duration: settings.crossfade_duration(),
            frame_interval: settings.ramp_frame_interval(),
        };
        slots[SlotId::A.index()].set_volume(1.0);
        slots[SlotId::B.index()].set_volume(0.0);

        Self {
            ctx,
            slots,
            ramp_spec,
            state: Mutex::new(CoordinatorState {
                active: SlotId::A,
                owners: [None, None],
                pending_preload: None,
                payload: None,
                ramp: None,
                crossfade_started: false,
                generation: 0,
            }),
        }
    }

    // === Queries ===

    pub fn slot(&self, slot: SlotId) -> Arc<dyn DecodeEngine> {
        self.slots[slot.index()].clone()
    }

    pub fn active_slot(&self) -> SlotId {
        lock(&self.state).active
    }

    pub fn active_engine(&self) -> Arc<dyn DecodeEngine> {
        self.slot(self.active_slot())
    }

    pub fn owner(&self, slot: SlotId) -> Option<StreamingSessionId> {
        lock(&self.state).owners[slot.index()]
    }

    pub fn can_play(&self, codec: &str) -> bool {
        self.slots[0].can_play(codec)
    }

    pub fn backend(&self) -> &str {
        self.slots[0].backend()
    }

    pub fn payload(&self) -> Option<PreloadPayload> {
        lock(&self.state).payload.clone()
    }

    pub fn preloaded_session(&self) -> Option<StreamingSessionId> {
        lock(&self.state).payload.as_ref().map(|p| p.session_id)
    }

    pub fn pending_preload(&self) -> Option<StreamingSessionId> {
        lock(&self.state).pending_preload
    }

    pub fn crossfade_running(&self) -> bool {
        lock(&self.state).crossfade_started
    }

    /// Slot volumes `[A, B]`
    pub fn volumes(&self) -> [f32; 2] {
        [self.slots[0].volume(), self.slots[1].volume()]
    }

    // === Active slot ===

    /// Load a stream into the active slot at `position`
    pub async fn load_active(
        &self,
        session_id: StreamingSessionId,
        stream: &StreamInfo,
        position: f64,
    ) -> Result<()> {
        let (slot, engine) = {
            let mut st = lock(&self.state);
            let slot = st.active;
            st.owners[slot.index()] = Some(session_id);
            (slot, self.slots[slot.index()].clone())
        };

        if let Err(e) = engine.load(stream, position).await {
            let mut st = lock(&self.state);
            if st.owners[slot.index()] == Some(session_id) {
                st.owners[slot.index()] = None;
            }
            return Err(decode_error(e));
        }
        engine.set_volume(1.0);
        debug!(%session_id, ?slot, position, "Loaded active slot");
        Ok(())
    }

    /// Stop and unload the active slot if it still owns `session_id`
    pub async fn release_active(&self, session_id: StreamingSessionId) {
        let engine = {
            let mut st = lock(&self.state);
            let slot = st.active.index();
            if st.owners[slot] != Some(session_id) {
                return;
            }
            st.owners[slot] = None;
            self.slots[slot].clone()
        };
        engine.pause().await;
        engine.unload().await;
    }

    // === Preload ===

    /// Preload `info` into the inactive slot
    ///
    /// A placeholder transition is stored before loading and replaced by the
    /// definitive one once the duration is known. Any failure or
    /// cancellation rolls back everything this call created.
    pub async fn preload(
        &self,
        product: &MediaProduct,
        info: PlaybackInfo,
        token: &CancellationToken,
    ) -> Result<StreamingSessionId> {
        let session_id = info.streaming_session_id;
        let stream = StreamInfo::from(&info);

        let (inactive, displaced) = {
            let mut st = lock(&self.state);
            if st.crossfade_started {
                return Err(PlayerError::InvalidState(
                    "cannot preload while a crossfade is running".into(),
                ));
            }
            let displaced = st.payload.take().map(|p| p.session_id);
            let slot = st.active.other();
            st.owners[slot.index()] = Some(session_id);
            st.pending_preload = Some(session_id);
            (self.slots[slot.index()].clone(), displaced)
        };

        {
            let mut store = self.ctx.store.write().await;
            if let Some(old) = displaced {
                debug!(session_id = %old, "Preload displaced by a newer one");
                store.delete_session(&old);
            }
            let estimate = info
                .duration
                .unwrap_or(self.ctx.settings.estimated_duration_secs);
            store.save_transition(session_id, transition_for(product, &info, estimate, 0.0, true));
            store.save_playback_info(session_id, info.clone());
            store.save_stream_info(session_id, stream.clone());
        }

        let duration = match self.load_inactive(&inactive, &stream, token).await {
            Ok(duration) => duration,
            Err(e) => {
                self.rollback_preload(session_id).await;
                return Err(e);
            }
        };

        let committed = {
            let mut store = self.ctx.store.write().await;
            // Keep quality reported against the placeholder while loading
            let mut transition = transition_for(product, &info, duration, 0.0, false);
            if let Some(placeholder) = store.get_transition(&session_id) {
                transition.playback_context.actual_quality = placeholder.playback_context.actual_quality;
            }
            let committed = {
                let mut st = lock(&self.state);
                if st.pending_preload == Some(session_id) && !token.is_cancelled() {
                    st.pending_preload = None;
                    st.payload = Some(PreloadPayload {
                        session_id,
                        media_product: product.clone(),
                        stream_info: stream,
                        playback_info: info,
                        transition: transition.clone(),
                    });
                    true
                } else {
                    false
                }
            };
            if committed {
                store.save_transition(session_id, transition);
            }
            committed
        };

        if !committed {
            self.rollback_preload(session_id).await;
            return Err(PlayerError::Cancelled);
        }
        info!(%session_id, product_id = %product.product_id, duration, "Preloaded next session");
        Ok(session_id)
    }

    async fn load_inactive(
        &self,
        inactive: &Arc<dyn DecodeEngine>,
        stream: &StreamInfo,
        token: &CancellationToken,
    ) -> Result<f64> {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(PlayerError::Cancelled),
            loaded = inactive.load(stream, 0.0) => loaded.map_err(decode_error)?,
        }
        inactive.set_volume(0.0);
        // One play/pause cycle primes the pipeline
        inactive.play().await.map_err(decode_error)?;
        inactive.pause().await;

        if token.is_cancelled() {
            return Err(PlayerError::Cancelled);
        }
        Ok(inactive
            .duration()
            .or(stream.duration)
            .unwrap_or(self.ctx.settings.estimated_duration_secs))
    }

    async fn rollback_preload(&self, session_id: StreamingSessionId) {
        let release = {
            let mut st = lock(&self.state);
            if st.pending_preload == Some(session_id) {
                st.pending_preload = None;
            }
            if st.payload.as_ref().map(|p| p.session_id) == Some(session_id) {
                st.payload = None;
            }
            let slot = st.active.other().index();
            if st.owners[slot] == Some(session_id) {
                st.owners[slot] = None;
                Some(self.slots[slot].clone())
            } else {
                None
            }
        };
        if let Some(engine) = release {
            engine.unload().await;
        }
        self.ctx.store.write().await.delete_session(&session_id);
        debug!(%session_id, "Rolled back preload");
    }

    /// Drop the buffered session (and any ramp using it)
    ///
    /// Returns the discarded session id; its store entries are removed.
    pub async fn discard_preload(&self) -> Option<StreamingSessionId> {
        self.cancel_crossfade().await;
        let (session_id, engine) = {
            let mut st = lock(&self.state);
            let session_id = st
                .payload
                .take()
                .map(|p| p.session_id)
                .or(st.pending_preload.take())?;
            st.pending_preload = None;
            let slot = st.active.other().index();
            let engine = if st.owners[slot] == Some(session_id) {
                st.owners[slot] = None;
                Some(self.slots[slot].clone())
            } else {
                None
            };
            (session_id, engine)
        };
        if let Some(engine) = engine {
            engine.unload().await;
        }
        self.ctx.store.write().await.delete_session(&session_id);
        debug!(%session_id, "Discarded preloaded session");
        Some(session_id)
    }

    // === Crossfade ===

    /// Remaining time is inside the crossfade window
    pub fn in_crossfade_window(&self, remaining: f64) -> bool {
        remaining > 0.0 && remaining <= self.ctx.settings.crossfade_window_secs + 1e-9
    }

    /// Start the ramp if a payload is ready and none is running
    pub async fn start_crossfade(&self, done: mpsc::UnboundedSender<EngineMessage>) -> bool {
        let (outgoing, incoming, generation) = {
            let mut st = lock(&self.state);
            if st.payload.is_none() || st.crossfade_started {
                return false;
            }
            st.crossfade_started = true;
            st.generation += 1;
            let active = st.active;
            (
                self.slots[active.index()].clone(),
                self.slots[active.other().index()].clone(),
                st.generation,
            )
        };

        incoming.set_volume(0.0);
        if let Err(e) = incoming.play().await {
            warn!("Incoming slot failed to start, skipping crossfade: {}", e);
            let mut st = lock(&self.state);
            if st.generation == generation {
                st.crossfade_started = false;
            }
            return false;
        }

        let handle = spawn_ramp(outgoing, incoming, self.ramp_spec, generation, done);
        let mut st = lock(&self.state);
        if st.generation != generation || !st.crossfade_started {
            handle.cancel();
            return false;
        }
        st.ramp = Some(handle);
        debug!(generation, "Crossfade started");
        true
    }

    /// Swap roles once the ramp of `generation` finished
    pub fn complete_crossfade(&self, generation: u64) -> Option<Handoff> {
        let mut st = lock(&self.state);
        if !st.crossfade_started || st.generation != generation {
            debug!(generation, "Ignoring stale crossfade completion");
            return None;
        }
        st.ramp = None;
        st.crossfade_started = false;
        self.swap(&mut st)
    }

    /// Swap roles immediately after the active slot ended without a ramp
    pub fn force_crossfade(&self) -> Option<Handoff> {
        let mut st = lock(&self.state);
        if st.crossfade_started {
            return None;
        }
        st.generation += 1;
        self.swap(&mut st)
    }

    /// Swap roles to make `session_id` audible in place
    pub fn promote_preloaded(&self, session_id: StreamingSessionId) -> Option<Handoff> {
        let mut st = lock(&self.state);
        if st.payload.as_ref().map(|p| p.session_id) != Some(session_id) {
            return None;
        }
        if let Some(ramp) = st.ramp.take() {
            ramp.cancel();
        }
        st.crossfade_started = false;
        st.generation += 1;
        self.swap(&mut st)
    }

    fn swap(&self, st: &mut CoordinatorState) -> Option<Handoff> {
        let payload = st.payload.take()?;
        let outgoing_slot = st.active;
        let incoming_slot = outgoing_slot.other();
        st.active = incoming_slot;
        st.owners[incoming_slot.index()] = Some(payload.session_id);
        let outgoing_session = st.owners[outgoing_slot.index()].take();

        let outgoing = self.slots[outgoing_slot.index()].clone();
        let incoming = self.slots[incoming_slot.index()].clone();
        incoming.set_volume(1.0);
        outgoing.set_volume(0.0);
        debug!(
            from = ?outgoing_slot,
            to = ?incoming_slot,
            session_id = %payload.session_id,
            "Swapped slot roles"
        );

        Some(Handoff {
            outgoing_position: outgoing.position(),
            outgoing,
            incoming,
            outgoing_session,
            payload,
        })
    }

    /// Abort a running ramp and restore the volume invariant
    pub async fn cancel_crossfade(&self) {
        let incoming = {
            let mut st = lock(&self.state);
            if let Some(ramp) = st.ramp.take() {
                ramp.cancel();
            }
            if !st.crossfade_started {
                return;
            }
            st.crossfade_started = false;
            st.generation += 1;
            let active = st.active;
            self.slots[active.index()].set_volume(1.0);
            self.slots[active.other().index()].set_volume(0.0);
            self.slots[active.other().index()].clone()
        };
        incoming.pause().await;
        if let Err(e) = incoming.seek(0.0).await {
            warn!("Failed to rewind incoming slot: {}", e);
        }
    }

    /// Classify an `Ended` signal from `slot` for `session_id`
    pub fn on_ended(&self, slot: SlotId, session_id: StreamingSessionId) -> EndedDisposition {
        let st = lock(&self.state);
        if st.owners[slot.index()] != Some(session_id) {
            EndedDisposition::Stale
        } else if slot != st.active {
            EndedDisposition::Inactive
        } else if st.crossfade_started {
            EndedDisposition::RampInProgress
        } else if st.payload.is_some() {
            EndedDisposition::ForceCrossfade
        } else {
            EndedDisposition::NoNext
        }
    }

    /// Release both slots and forget everything buffered
    ///
    /// Returns the preloaded (or pending) session that was dropped.
    pub async fn reset(&self) -> Option<StreamingSessionId> {
        let dropped = {
            let mut st = lock(&self.state);
            if let Some(ramp) = st.ramp.take() {
                ramp.cancel();
            }
            st.crossfade_started = false;
            st.generation += 1;
            st.owners = [None, None];
            let dropped = st
                .payload
                .take()
                .map(|p| p.session_id)
                .or(st.pending_preload.take());
            st.pending_preload = None;
            let active = st.active;
            self.slots[active.index()].set_volume(1.0);
            self.slots[active.other().index()].set_volume(0.0);
            dropped
        };
        for engine in &self.slots {
            engine.pause().await;
            engine.unload().await;
        }
        if let Some(session_id) = dropped {
            self.ctx.store.write().await.delete_session(&session_id);
        }
        dropped
    }
}
