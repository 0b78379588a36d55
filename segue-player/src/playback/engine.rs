//! Playback engine - one per decode backend
//!
//! **Responsibilities:**
//! - Forward decode-engine signals from both slots into one message channel
//! - Handle those messages one at a time on a driver task
//! - Drive the session state machine and turn its transitions into
//!   notifications and telemetry
//! - Session lifecycle: started, ended, handoff after a crossfade
//!
//! Control calls (`load`, `play`, `seek`...) run on the caller's task; they
//! only issue decode-engine commands and the resulting signals come back
//! through the driver like any other.

use crate::error::{PlayerError, Result};
use crate::playback::context::{lock, EngineId, PlayerContext, PlayerSignal};
use crate::playback::coordinator::{DualBufferCoordinator, EndedDisposition, Handoff, SlotId};
use crate::playback::decode::{DecodeEngine, DecodeEvent, DecodeFault, DecodeSignal};
use crate::playback::state_machine::{CurrentSession, PlaybackSession, StateTransition};
use crate::session::{PlaybackInfo, StreamInfo};
use crate::telemetry::TelemetryEvent;
use chrono::Utc;
use segue_common::events::{EndReason, ErrorCategory, PlaybackState, SegueEvent};
use segue_common::model::{MediaProduct, QualityTier, StreamingSessionId};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Messages handled by the engine driver
#[derive(Debug)]
pub enum EngineMessage {
    /// Signal from one of the slots
    Decode { slot: SlotId, event: DecodeEvent },
    /// Ramp of `generation` reached full progress
    CrossfadeComplete { generation: u64 },
}

/// What the recovery monitor needs to know about the audible session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: StreamingSessionId,
    pub product: MediaProduct,
    pub position: f64,
    pub started: bool,
}

pub struct PlaybackEngine {
    id: EngineId,
    ctx: Arc<PlayerContext>,
    session: Mutex<PlaybackSession>,
    coordinator: DualBufferCoordinator,
    tx: mpsc::UnboundedSender<EngineMessage>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PlaybackEngine {
    /// Create the engine and spawn its forwarders and driver
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(id: EngineId, ctx: Arc<PlayerContext>, slots: [Arc<dyn DecodeEngine>; 2]) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let receivers = [slots[0].subscribe(), slots[1].subscribe()];
        let coordinator = DualBufferCoordinator::new(ctx.clone(), slots);

        let engine = Arc::new(Self {
            id,
            ctx: ctx.clone(),
            session: Mutex::new(PlaybackSession::new()),
            coordinator,
            tx: tx.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::with_capacity(3);
        for (slot, receiver) in [SlotId::A, SlotId::B].into_iter().zip(receivers) {
            tasks.push(tokio::spawn(forward_slot(
                slot,
                receiver,
                tx.clone(),
                ctx.shutdown.clone(),
            )));
        }
        tasks.push(tokio::spawn(drive(
            Arc::downgrade(&engine),
            rx,
            ctx.shutdown.clone(),
        )));
        *lock(&engine.tasks) = tasks;

        info!(engine = %id, backend = engine.backend(), "Playback engine started");
        engine
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    pub fn backend(&self) -> &str {
        self.coordinator.backend()
    }

    pub fn can_play(&self, codec: &str) -> bool {
        self.coordinator.can_play(codec)
    }

    pub fn coordinator(&self) -> &DualBufferCoordinator {
        &self.coordinator
    }

    pub fn playback_state(&self) -> PlaybackState {
        lock(&self.session).state()
    }

    pub fn current(&self) -> Option<CurrentSession> {
        lock(&self.session).current().cloned()
    }

    pub fn current_session_id(&self) -> Option<StreamingSessionId> {
        lock(&self.session).current_session_id()
    }

    /// Position of the active slot
    pub fn position(&self) -> f64 {
        self.coordinator.active_engine().position()
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let current = self.current()?;
        Some(SessionSnapshot {
            session_id: current.session_id,
            product: current.product,
            position: self.position(),
            started: current.started,
        })
    }

    // === Control ===

    /// Make `info` the current session of this engine, paused at `position`
    pub async fn load(&self, product: &MediaProduct, info: &PlaybackInfo, position: f64) -> Result<StreamingSessionId> {
        let session_id = info.streaming_session_id;
        let stream = StreamInfo::from(info);
        self.coordinator.load_active(session_id, &stream, position).await?;

        lock(&self.session).set_current(session_id, product.clone(), position);
        self.ctx.store.write().await.update_position(&session_id, position);
        self.apply_state(PlaybackState::NotPlaying, position).await;
        self.apply_loudness(session_id).await;
        info!(
            engine = %self.id,
            %session_id,
            product_id = %product.product_id,
            position,
            "Loaded session"
        );
        Ok(session_id)
    }

    pub async fn play(&self) -> Result<()> {
        if self.current_session_id().is_none() {
            return Err(PlayerError::NoActiveSession);
        }
        self.coordinator
            .active_engine()
            .play()
            .await
            .map_err(|e| PlayerError::Decode(e.to_string()))
    }

    pub async fn pause(&self) -> Result<()> {
        if self.current_session_id().is_none() {
            return Err(PlayerError::NoActiveSession);
        }
        self.coordinator.cancel_crossfade().await;
        self.coordinator.active_engine().pause().await;
        Ok(())
    }

    pub async fn seek(&self, position: f64) -> Result<()> {
        let session_id = self.current_session_id().ok_or(PlayerError::NoActiveSession)?;
        let from = self.position();

        let stop = lock(&self.session).seek_start(from);
        if let Some(action) = stop {
            self.ctx
                .telemetry
                .record(TelemetryEvent::action(session_id, action, from));
        }

        self.coordinator.cancel_crossfade().await;
        self.coordinator
            .active_engine()
            .seek(position)
            .await
            .map_err(|e| PlayerError::Decode(e.to_string()))?;

        let start = lock(&self.session).seek_end(position);
        if let Some(action) = start {
            self.ctx
                .telemetry
                .record(TelemetryEvent::action(session_id, action, position));
        }
        self.ctx.store.write().await.update_position(&session_id, position);
        debug!(%session_id, from, to = position, "Seek");
        Ok(())
    }

    /// Whether the current stream must be re-resolved before playing
    ///
    /// Preview-only and expired streams cannot be resumed as they are.
    pub async fn maybe_hard_reload(&self) -> bool {
        let Some(session_id) = self.current_session_id() else {
            return false;
        };
        let store = self.ctx.store.read().await;
        match store.get_stream_info(&session_id) {
            Some(stream) => stream.preview || stream.is_expired(Utc::now()),
            None => false,
        }
    }

    pub fn take_retry_on_play(&self) -> bool {
        lock(&self.session).take_retry_on_play()
    }

    /// Preload into this engine's inactive slot
    pub async fn preload(
        &self,
        product: &MediaProduct,
        info: PlaybackInfo,
        token: &CancellationToken,
    ) -> Result<StreamingSessionId> {
        let session_id = self.coordinator.preload(product, info, token).await?;
        self.apply_loudness(session_id).await;
        Ok(session_id)
    }

    pub async fn discard_preload(&self) -> Option<StreamingSessionId> {
        self.coordinator.discard_preload().await
    }

    /// Make the preloaded `session_id` current in place, paused at `position`
    ///
    /// The session id is preserved; whatever this engine was rendering is
    /// ended as skipped.
    pub async fn promote_preloaded(&self, session_id: StreamingSessionId, position: f64) -> Result<()> {
        let handoff = self.coordinator.promote_preloaded(session_id).ok_or_else(|| {
            PlayerError::InvalidState(format!("session {} is not preloaded", session_id))
        })?;
        let Handoff {
            outgoing,
            incoming,
            outgoing_session,
            outgoing_position,
            payload,
        } = handoff;

        outgoing.pause().await;
        outgoing.unload().await;

        if let Some(old_id) = outgoing_session {
            let started = lock(&self.session)
                .current()
                .is_some_and(|c| c.session_id == old_id && c.started);
            if started {
                self.apply_state(PlaybackState::NotPlaying, outgoing_position).await;
                self.media_product_ended(EndReason::Skip, outgoing_position, old_id)
                    .await;
            } else {
                self.ctx.store.write().await.delete_session(&old_id);
            }
        }

        if position > 0.0 {
            if let Err(e) = incoming.seek(position).await {
                warn!(%session_id, "Seek after promotion failed: {}", e);
            }
        }
        incoming.pause().await;

        lock(&self.session).set_current(session_id, payload.media_product.clone(), position);
        {
            let mut store = self.ctx.store.write().await;
            if !store.has_transition(&session_id) {
                store.save_transition(session_id, payload.transition);
            }
            store.update_position(&session_id, position);
        }
        self.ctx.set_current_session(Some(session_id));
        self.ctx.clear_next_if(session_id);
        self.apply_state(PlaybackState::NotPlaying, position).await;
        info!(engine = %self.id, %session_id, position, "Promoted preloaded session");
        Ok(())
    }

    /// End the current session if it ever started
    ///
    /// A never-started session is left alone. When nothing is buffered
    /// behind it the state drops to `Idle` first.
    pub async fn finish_current_media_product(&self, reason: EndReason) {
        let Some(current) = self.current() else {
            return;
        };
        if !current.started {
            debug!(session_id = %current.session_id, "Session never started, nothing to finish");
            return;
        }
        let position = self.position();
        if self.coordinator.preloaded_session().is_none() {
            self.apply_state(PlaybackState::Idle, position).await;
        }
        self.media_product_ended(reason, position, current.session_id)
            .await;
    }

    /// Unbind and unload the current session, dropping any leftover records
    pub async fn release_current(&self) {
        let Some(session_id) = self.current_session_id() else {
            return;
        };
        let position = self.position();
        self.apply_state(PlaybackState::Idle, position).await;
        self.unbind(session_id).await;
    }

    /// Drop `session_id` from this engine, leaving the state as it is
    async fn unbind(&self, session_id: StreamingSessionId) {
        lock(&self.session).clear_current_if(session_id);
        self.coordinator.release_active(session_id).await;
        self.ctx.store.write().await.delete_session(&session_id);
        self.ctx.clear_current_session_if(session_id);
    }

    /// Finish, release and drop everything buffered
    pub async fn reset(&self) {
        self.finish_current_media_product(EndReason::Skip).await;
        self.release_current().await;
        lock(&self.session).reset_state();
        if let Some(dropped) = self.coordinator.reset().await {
            self.ctx.clear_next_if(dropped);
        }
    }

    /// Re-apply gains after a user volume change
    pub async fn refresh_gain(&self) {
        if let Some(session_id) = self.current_session_id() {
            self.apply_loudness(session_id).await;
        }
        if let Some(session_id) = self.coordinator.preloaded_session() {
            self.apply_loudness(session_id).await;
        }
    }

    /// Stop the forwarders and the driver
    pub fn shutdown(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    // === Message handling ===

    async fn handle_message(&self, message: EngineMessage) {
        match message {
            EngineMessage::Decode { slot, event } => self.handle_decode(slot, event).await,
            EngineMessage::CrossfadeComplete { generation } => {
                if let Some(handoff) = self.coordinator.complete_crossfade(generation) {
                    self.finish_handoff(handoff).await;
                }
            }
        }
    }

    async fn handle_decode(&self, slot: SlotId, event: DecodeEvent) {
        let Some(session_id) = event.session_id else {
            debug!(?slot, signal = ?event.signal, "Signal without a session, ignoring");
            return;
        };
        if self.coordinator.owner(slot) != Some(session_id) {
            debug!(?slot, %session_id, signal = ?event.signal, "Stale signal discarded");
            return;
        }
        if slot != self.coordinator.active_slot() {
            self.handle_inactive(session_id, event).await;
            return;
        }

        let position = event.position;
        match event.signal {
            DecodeSignal::DurationChange(duration) => {
                self.ctx
                    .store
                    .write()
                    .await
                    .overwrite_duration(&session_id, duration);
            }
            DecodeSignal::TimeUpdate => self.on_time_update(session_id, position).await,
            DecodeSignal::Playing => {
                self.media_product_started(session_id).await;
                self.apply_state(PlaybackState::Playing, position).await;
            }
            DecodeSignal::Paused => self.apply_state(PlaybackState::NotPlaying, position).await,
            DecodeSignal::Waiting => self.on_waiting(session_id, position).await,
            DecodeSignal::Ended => self.on_ended(slot, session_id, position).await,
            DecodeSignal::Error(fault) => self.on_fault(session_id, position, fault).await,
            DecodeSignal::QualityChange(quality) => self.on_quality_change(session_id, quality).await,
        }
    }

    async fn handle_inactive(&self, session_id: StreamingSessionId, event: DecodeEvent) {
        match event.signal {
            DecodeSignal::DurationChange(duration) => {
                self.ctx
                    .store
                    .write()
                    .await
                    .overwrite_duration(&session_id, duration);
            }
            DecodeSignal::QualityChange(quality) => self.on_quality_change(session_id, quality).await,
            DecodeSignal::Error(fault) => {
                warn!(%session_id, "Preloaded stream failed, discarding: {}", fault);
                if let Some(dropped) = self.coordinator.discard_preload().await {
                    self.ctx.clear_next_if(dropped);
                }
            }
            _ => {}
        }
    }

    async fn on_time_update(&self, session_id: StreamingSessionId, position: f64) {
        self.ctx.store.write().await.update_position(&session_id, position);
        let duration = self.session_duration(session_id).await;
        if duration <= 0.0 {
            return;
        }
        let remaining = duration - position;

        let has_next = self.ctx.has_next() || self.coordinator.preloaded_session().is_some();
        let threshold = self.ctx.settings.preload_request_threshold_secs;
        let request = lock(&self.session).should_request_preload(remaining, threshold, has_next);
        if request {
            info!(%session_id, remaining, "Requesting next item");
            self.ctx.emit(SegueEvent::PreloadRequested {
                session_id,
                remaining,
                timestamp: Utc::now(),
            });
        }

        if self.playback_state() == PlaybackState::Playing
            && self.coordinator.in_crossfade_window(remaining)
            && self.coordinator.payload().is_some()
            && !self.coordinator.crossfade_running()
        {
            self.coordinator.start_crossfade(self.tx.clone()).await;
        }
    }

    async fn on_waiting(&self, session_id: StreamingSessionId, position: f64) {
        let was_playing = self.playback_state() == PlaybackState::Playing;
        self.apply_state(PlaybackState::Stalled, position).await;
        if was_playing {
            self.ctx.telemetry.record(TelemetryEvent::Stall {
                session_id,
                position,
                timestamp: Utc::now(),
            });
        }
    }

    async fn on_ended(&self, slot: SlotId, session_id: StreamingSessionId, position: f64) {
        match self.coordinator.on_ended(slot, session_id) {
            EndedDisposition::Stale | EndedDisposition::Inactive => {
                debug!(?slot, %session_id, "Ignoring ended signal");
            }
            EndedDisposition::RampInProgress => {
                debug!(%session_id, "Outgoing slot ended during the ramp");
            }
            EndedDisposition::ForceCrossfade => {
                if let Some(handoff) = self.coordinator.force_crossfade() {
                    info!(%session_id, "Ended before the crossfade window, handing off now");
                    if let Err(e) = handoff.incoming.play().await {
                        error!(session_id = %handoff.payload.session_id, "Incoming slot failed to play: {}", e);
                    }
                    self.finish_handoff(handoff).await;
                }
            }
            EndedDisposition::NoNext => {
                self.apply_state(PlaybackState::Idle, position).await;
                self.media_product_ended(EndReason::Completed, position, session_id)
                    .await;
                self.release_current().await;
                self.ctx.signal(PlayerSignal::ActiveEnded { engine: self.id });
            }
        }
    }

    async fn on_fault(&self, session_id: StreamingSessionId, position: f64, fault: DecodeFault) {
        if fault.is_fatal() {
            error!(%session_id, position, "Fatal decode error: {}", fault);
            self.apply_state(PlaybackState::Stalled, position).await;
            self.ctx.emit(SegueEvent::PlaybackError {
                category: ErrorCategory::Decode,
                message: fault.to_string(),
                session_id: Some(session_id),
                timestamp: Utc::now(),
            });
            self.media_product_ended(EndReason::Error, position, session_id)
                .await;
            // Stays Stalled until the next load or reset
            self.unbind(session_id).await;
        } else {
            warn!(%session_id, position, "Recoverable decode error, reloading on next play: {}", fault);
            lock(&self.session).set_retry_on_play();
            self.apply_state(PlaybackState::Stalled, position).await;
        }
    }

    async fn on_quality_change(&self, session_id: StreamingSessionId, quality: QualityTier) {
        let updated = self.ctx.store.write().await.set_quality(&session_id, quality);
        if !updated {
            return;
        }
        info!(%session_id, %quality, "Streaming quality changed");
        self.ctx.telemetry.record(TelemetryEvent::QualityAdaptation {
            session_id,
            quality,
            timestamp: Utc::now(),
        });
        self.ctx.emit(SegueEvent::StreamingQualityChanged {
            session_id,
            quality,
            timestamp: Utc::now(),
        });
    }

    /// Bookkeeping after slot roles were swapped
    async fn finish_handoff(&self, handoff: Handoff) {
        let Handoff {
            outgoing,
            incoming: _,
            outgoing_session,
            outgoing_position,
            payload,
        } = handoff;
        outgoing.pause().await;
        outgoing.unload().await;

        let session_id = payload.session_id;
        lock(&self.session).set_current(session_id, payload.media_product.clone(), 0.0);
        if let Some(old_id) = outgoing_session {
            self.media_product_ended(EndReason::Completed, outgoing_position, old_id)
                .await;
        }
        {
            // Signals seen while buffered (quality, duration) already live in the store
            let mut store = self.ctx.store.write().await;
            if !store.has_transition(&session_id) {
                store.save_transition(session_id, payload.transition);
            }
        }
        self.ctx.set_current_session(Some(session_id));
        self.media_product_started(session_id).await;
    }

    // === Session lifecycle ===

    /// First time `session_id` became audible
    ///
    /// Idempotent: later calls for the same session do nothing.
    async fn media_product_started(&self, session_id: StreamingSessionId) {
        let start_position = {
            let mut session = lock(&self.session);
            if !session.mark_started(session_id) {
                return;
            }
            session.current().map(|c| c.start_position).unwrap_or(0.0)
        };

        self.ctx.set_active_engine(Some(self.id));
        self.ctx.set_current_session(Some(session_id));
        self.ctx.clear_next_if(session_id);
        self.apply_loudness(session_id).await;

        let transition = self.ctx.store.read().await.get_transition(&session_id).cloned();
        let Some(transition) = transition else {
            warn!(%session_id, "Started session has no transition record");
            return;
        };
        info!(
            engine = %self.id,
            %session_id,
            product_id = %transition.media_product.product_id,
            "Media product started"
        );
        self.ctx.emit(SegueEvent::transition(&transition));
        self.ctx.telemetry.record(TelemetryEvent::StreamingSessionStart {
            session_id,
            product: transition.media_product.clone(),
            start_position,
            quality: Some(transition.playback_context.actual_quality),
            timestamp: Utc::now(),
        });
    }

    /// Close `session_id`: notification, telemetry, store cleanup
    ///
    /// Gated on the transition record, so a session is only ever ended once.
    async fn media_product_ended(&self, reason: EndReason, position: f64, session_id: StreamingSessionId) {
        let held_elsewhere = self.ctx.current_session() == Some(session_id)
            && !self.ctx.is_active_or_unclaimed(self.id);

        let transition = {
            let mut store = self.ctx.store.write().await;
            let transition = store.get_transition(&session_id).cloned();
            if transition.is_some() && !held_elsewhere {
                store.delete_session(&session_id);
            }
            transition
        };
        let Some(transition) = transition else {
            debug!(%session_id, "Session already ended");
            return;
        };
        if !held_elsewhere {
            self.ctx.clear_current_session_if(session_id);
        }

        info!(%session_id, %reason, position, "Media product ended");
        self.ctx.emit(SegueEvent::MediaProductEnded {
            media_product: transition.media_product.clone(),
            session_id,
            end_reason: reason,
            end_position: position,
            timestamp: Utc::now(),
        });
        self.ctx.telemetry.record(TelemetryEvent::StreamingSessionEnd {
            session_id,
            product: transition.media_product,
            end_reason: reason,
            end_position: position,
            timestamp: Utc::now(),
        });
        self.ctx.telemetry.record(TelemetryEvent::PlaybackProgress {
            session_id,
            position,
            duration: transition.playback_context.actual_duration,
            timestamp: Utc::now(),
        });

        if let Some(next) = self.coordinator.preloaded_session() {
            self.apply_loudness(next).await;
        }
    }

    // === Helpers ===

    async fn apply_state(&self, new_state: PlaybackState, position: f64) {
        let Some(session_id) = self.current_session_id() else {
            return;
        };
        let duration = self.session_duration(session_id).await;
        let transition = lock(&self.session).update_state(new_state, position, duration);
        if let Some(transition) = transition {
            self.report_transition(transition);
        }
    }

    fn report_transition(&self, transition: StateTransition) {
        let session_id = transition.session_id;
        if let Some((position, duration)) = transition.progress {
            self.ctx.telemetry.record(TelemetryEvent::PlaybackProgress {
                session_id,
                position,
                duration,
                timestamp: Utc::now(),
            });
        }
        if let Some(action) = transition.action {
            self.ctx.telemetry.record(TelemetryEvent::action(
                session_id,
                action,
                transition.position,
            ));
        }

        debug!(
            engine = %self.id,
            %session_id,
            "State {} -> {}",
            transition.old_state,
            transition.new_state
        );
        if self.ctx.is_active_or_unclaimed(self.id) {
            self.ctx.publish_state(transition.new_state);
            self.ctx.emit(SegueEvent::PlaybackStateChanged {
                old_state: transition.old_state,
                new_state: transition.new_state,
                session_id,
                timestamp: Utc::now(),
            });
        }
    }

    async fn session_duration(&self, session_id: StreamingSessionId) -> f64 {
        let stored = self
            .ctx
            .store
            .read()
            .await
            .get_transition(&session_id)
            .map(|t| t.playback_context.actual_duration)
            .filter(|d| *d > 0.0);
        stored
            .or_else(|| self.coordinator.active_engine().duration())
            .unwrap_or(0.0)
    }

    /// Loudness gain times user volume on the slot owning `session_id`
    async fn apply_loudness(&self, session_id: StreamingSessionId) {
        let Some(slot) = [SlotId::A, SlotId::B]
            .into_iter()
            .find(|slot| self.coordinator.owner(*slot) == Some(session_id))
        else {
            return;
        };

        let settings = &self.ctx.settings;
        let loudness = if settings.loudness_normalization {
            self.ctx
                .store
                .read()
                .await
                .get_playback_info(&session_id)
                .and_then(|info| info.loudness)
        } else {
            None
        };
        let gain = loudness
            .map(|l| l.linear_gain(settings.pre_amp_db))
            .unwrap_or(1.0)
            * self.ctx.volume();
        self.coordinator.slot(slot).set_loudness_gain(gain);
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

/// Pump one slot's broadcast signals into the engine channel
async fn forward_slot(
    slot: SlotId,
    mut receiver: broadcast::Receiver<DecodeEvent>,
    tx: mpsc::UnboundedSender<EngineMessage>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(event) => {
                    if tx.send(EngineMessage::Decode { slot, event }).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(?slot, "Decode signals lagged, {} dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Handle engine messages one at a time, in arrival order
async fn drive(
    engine: Weak<PlaybackEngine>,
    mut rx: mpsc::UnboundedReceiver<EngineMessage>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let Some(engine) = engine.upgrade() else {
            break;
        };
        engine.handle_message(message).await;
    }
    debug!("Engine driver stopped");
}
