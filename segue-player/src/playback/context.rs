//! Shared player context
//!
//! State shared by every playback engine of one logical player: the session
//! store, the public event bus, telemetry, the resolver and the few
//! player-wide facts (active engine, logical current session, next item).
//!
//! Small synchronous facts sit behind `std::sync::Mutex` and are never held
//! across an await; the session store sits behind a tokio `RwLock`.

use crate::config::PlayerSettings;
use crate::error::{PlayerError, Result};
use crate::playback::resolver::PlaybackInfoResolver;
use crate::session::{PlaybackInfo, SessionStore};
use crate::telemetry::Telemetry;
use chrono::Utc;
use segue_common::events::{EventBus, PlaybackState, SegueEvent};
use segue_common::model::{MediaProduct, StreamingSessionId};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identity of one playback engine (one per backend)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(pub usize);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine-{}", self.0)
    }
}

/// Next item as known to the player
#[derive(Debug, Clone)]
pub struct NextItem {
    pub product: MediaProduct,
    /// Set once the preload minted its session
    pub session_id: Option<StreamingSessionId>,
}

/// Engine-to-player notifications
#[derive(Debug, Clone)]
pub enum PlayerSignal {
    /// The active slot of `engine` ended with nothing buffered behind it
    ActiveEnded { engine: EngineId },
}

pub struct PlayerContext {
    pub settings: PlayerSettings,

    /// Session metadata
    pub store: RwLock<SessionStore>,

    /// Public notification channel
    pub events: EventBus,

    pub telemetry: Telemetry,

    pub resolver: Arc<dyn PlaybackInfoResolver>,

    /// Cancelled on player shutdown; parent of every operation token
    pub shutdown: CancellationToken,

    /// Engine whose active slot is audible
    active_engine: Mutex<Option<EngineId>>,

    /// Logical current session across engines
    current_session: Mutex<Option<StreamingSessionId>>,

    next: Mutex<Option<NextItem>>,

    /// User volume (0.0-1.0)
    volume: Mutex<f32>,

    state_tx: watch::Sender<PlaybackState>,

    signal_tx: mpsc::UnboundedSender<PlayerSignal>,
}

impl PlayerContext {
    pub fn new(
        settings: PlayerSettings,
        resolver: Arc<dyn PlaybackInfoResolver>,
        telemetry: Telemetry,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PlayerSignal>) {
        let (state_tx, _) = watch::channel(PlaybackState::Idle);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let events = EventBus::new(settings.event_bus_capacity);
        let ctx = Arc::new(Self {
            settings,
            store: RwLock::new(SessionStore::new()),
            events,
            telemetry,
            resolver,
            shutdown: CancellationToken::new(),
            active_engine: Mutex::new(None),
            current_session: Mutex::new(None),
            next: Mutex::new(None),
            volume: Mutex::new(1.0),
            state_tx,
            signal_tx,
        });
        (ctx, signal_rx)
    }

    // === Active engine ===

    pub fn active_engine(&self) -> Option<EngineId> {
        *lock(&self.active_engine)
    }

    pub fn set_active_engine(&self, engine: Option<EngineId>) {
        *lock(&self.active_engine) = engine;
    }

    /// Whether `engine` may publish player-wide state
    pub fn is_active_or_unclaimed(&self, engine: EngineId) -> bool {
        match self.active_engine() {
            Some(active) => active == engine,
            None => true,
        }
    }

    // === Logical current session ===

    pub fn current_session(&self) -> Option<StreamingSessionId> {
        *lock(&self.current_session)
    }

    pub fn set_current_session(&self, session_id: Option<StreamingSessionId>) {
        *lock(&self.current_session) = session_id;
    }

    /// Clear the current session only if it is still `session_id`
    pub fn clear_current_session_if(&self, session_id: StreamingSessionId) {
        let mut current = lock(&self.current_session);
        if *current == Some(session_id) {
            *current = None;
        }
    }

    // === Next item ===

    pub fn next_item(&self) -> Option<NextItem> {
        lock(&self.next).clone()
    }

    pub fn has_next(&self) -> bool {
        lock(&self.next).is_some()
    }

    pub fn set_next_item(&self, next: Option<NextItem>) {
        *lock(&self.next) = next;
    }

    /// Forget the next item if it is bound to `session_id`
    pub fn clear_next_if(&self, session_id: StreamingSessionId) {
        let mut next = lock(&self.next);
        if next.as_ref().and_then(|n| n.session_id) == Some(session_id) {
            *next = None;
        }
    }

    // === Volume ===

    pub fn volume(&self) -> f32 {
        *lock(&self.volume)
    }

    /// Set user volume (clamped to 0.0-1.0)
    pub fn set_volume(&self, volume: f32) -> f32 {
        let clamped = volume.clamp(0.0, 1.0);
        *lock(&self.volume) = clamped;
        clamped
    }

    // === Player-wide state ===

    pub fn playback_state(&self) -> PlaybackState {
        *self.state_tx.borrow()
    }

    pub fn publish_state(&self, state: PlaybackState) {
        self.state_tx.send_replace(state);
    }

    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }

    pub fn signal(&self, signal: PlayerSignal) {
        if self.signal_tx.send(signal).is_err() {
            debug!("Player signal dropped: player is shutting down");
        }
    }

    pub fn emit(&self, event: SegueEvent) {
        self.events.emit_lossy(event);
    }

    /// Entitlement for `session_id`
    ///
    /// A fresh cached entry under the same id is reused (repeat-one clones
    /// the current session first). Otherwise the resolver is asked, racing
    /// against `token`.
    pub async fn resolve_entitlement(
        &self,
        product: &MediaProduct,
        session_id: StreamingSessionId,
        token: &CancellationToken,
    ) -> Result<PlaybackInfo> {
        let cached = self
            .store
            .read()
            .await
            .fresh_playback_info(&session_id, Utc::now())
            .cloned();
        if let Some(info) = cached {
            debug!(%session_id, product_id = %product.product_id, "Reusing cached playback info");
            return Ok(info);
        }

        let quality = self.settings.quality_hint;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(PlayerError::Cancelled),
            result = self.resolver.resolve(product, quality, session_id) => {
                let info = result?;
                Ok(info.with_session_id(session_id))
            }
        }
    }
}
