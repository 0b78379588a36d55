//! Player facade
//!
//! **Responsibilities:**
//! - Build one playback engine per decode backend and the capability table
//!   over them
//! - Route the public surface (`load`, `play`, `set_next`...) to the
//!   dispatcher
//! - Feed connectivity changes to the recovery monitor and act on its verdict
//! - Run the loop that reacts to engine-to-player signals

use crate::config::PlayerSettings;
use crate::error::{PlayerError, Result};
use crate::playback::context::{lock, EngineId, PlayerContext, PlayerSignal};
use crate::playback::decode::DecodeEngineFactory;
use crate::playback::dispatcher::LoadNextDispatcher;
use crate::playback::engine::PlaybackEngine;
use crate::playback::recovery::ConnectionRecoveryMonitor;
use crate::playback::resolver::PlaybackInfoResolver;
use crate::playback::selector::{CapabilityEntry, EngineSelector};
use crate::telemetry::{LogTelemetrySink, Telemetry, TelemetrySink};
use segue_common::events::{PlaybackState, SegueEvent};
use segue_common::model::{MediaProduct, PlaybackContext, ProductType, QualityTier, StreamingSessionId};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One decode backend and what it may be used for
#[derive(Clone)]
pub struct BackendSpec {
    pub name: String,
    pub item_types: Vec<ProductType>,
    pub qualities: Vec<QualityTier>,
    /// Called twice, once per slot
    pub factory: DecodeEngineFactory,
}

impl BackendSpec {
    /// Backend accepting every item type and quality tier
    pub fn new(name: impl Into<String>, factory: DecodeEngineFactory) -> Self {
        Self {
            name: name.into(),
            item_types: vec![ProductType::Track, ProductType::Video],
            qualities: QualityTier::all().to_vec(),
            factory,
        }
    }

    pub fn item_types(mut self, item_types: &[ProductType]) -> Self {
        self.item_types = item_types.to_vec();
        self
    }

    pub fn qualities(mut self, qualities: &[QualityTier]) -> Self {
        self.qualities = qualities.to_vec();
        self
    }
}

/// Result of `connection_restored`
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// Nothing captured, or playback kept going on its own
    Unchanged,
    /// The captured product was reloaded under a new session and resumed
    Resumed {
        previous: StreamingSessionId,
        session_id: StreamingSessionId,
    },
}

#[derive(Default)]
pub struct PlayerBuilder {
    settings: PlayerSettings,
    resolver: Option<Arc<dyn PlaybackInfoResolver>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    backends: Vec<BackendSpec>,
}

impl PlayerBuilder {
    pub fn settings(mut self, settings: PlayerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn PlaybackInfoResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Telemetry transport (defaults to the log sink)
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Append a backend; earlier backends win capability ties
    pub fn backend(mut self, backend: BackendSpec) -> Self {
        self.backends.push(backend);
        self
    }

    /// Validate the settings and start the player
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Player> {
        self.settings.validate()?;
        let resolver = self
            .resolver
            .ok_or_else(|| PlayerError::Config("a playback info resolver is required".into()))?;
        if self.backends.is_empty() {
            return Err(PlayerError::Config("at least one decode backend is required".into()));
        }
        let sink = self
            .telemetry
            .unwrap_or_else(|| Arc::new(LogTelemetrySink));

        let (ctx, signal_rx) = PlayerContext::new(self.settings, resolver, Telemetry::new(sink));

        let mut engines = Vec::with_capacity(self.backends.len());
        let mut entries = Vec::with_capacity(self.backends.len());
        for (index, backend) in self.backends.into_iter().enumerate() {
            let slots = [(backend.factory)(), (backend.factory)()];
            let engine = PlaybackEngine::start(EngineId(index), ctx.clone(), slots);
            entries.push(CapabilityEntry {
                item_types: backend.item_types,
                qualities: backend.qualities,
                engine: engine.clone(),
            });
            engines.push(engine);
        }

        let dispatcher = Arc::new(LoadNextDispatcher::new(
            ctx.clone(),
            EngineSelector::new(entries),
            engines,
        ));
        let signal_task = tokio::spawn(run_signals(
            Arc::downgrade(&dispatcher),
            signal_rx,
            ctx.shutdown.clone(),
        ));

        info!(
            engines = dispatcher.engines().len(),
            "Player started"
        );
        Ok(Player {
            recovery: ConnectionRecoveryMonitor::new(ctx.clone()),
            ctx,
            dispatcher,
            signal_task: Mutex::new(Some(signal_task)),
        })
    }
}

pub struct Player {
    ctx: Arc<PlayerContext>,
    dispatcher: Arc<LoadNextDispatcher>,
    recovery: ConnectionRecoveryMonitor,
    signal_task: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    pub fn builder() -> PlayerBuilder {
        PlayerBuilder::default()
    }

    // === Transport ===

    /// Make `product` current, paused at `position` seconds
    pub async fn load(&self, product: MediaProduct, position: f64) -> Result<StreamingSessionId> {
        self.recovery.clear();
        self.dispatcher.load(product, position).await
    }

    pub async fn play(&self) -> Result<()> {
        self.dispatcher.play().await
    }

    pub async fn pause(&self) -> Result<()> {
        self.dispatcher.pause().await
    }

    pub async fn seek(&self, position: f64) -> Result<()> {
        self.dispatcher.seek(position).await
    }

    /// Buffer `product` behind the current item for a gapless handoff
    pub async fn set_next(&self, product: MediaProduct) -> Result<StreamingSessionId> {
        self.dispatcher.set_next(product).await
    }

    pub async fn reset(&self) {
        self.recovery.clear();
        self.dispatcher.reset().await;
    }

    // === Observation ===

    pub fn playback_state(&self) -> PlaybackState {
        self.ctx.playback_state()
    }

    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.ctx.watch_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SegueEvent> {
        self.ctx.events.subscribe()
    }

    pub fn current_session_id(&self) -> Option<StreamingSessionId> {
        self.dispatcher
            .active_engine()
            .and_then(|engine| engine.current_session_id())
    }

    /// Observable context of the current session at the live position
    pub async fn playback_context(&self) -> Option<PlaybackContext> {
        let engine = self.dispatcher.active_engine()?;
        let session_id = engine.current_session_id()?;
        let store = self.ctx.store.read().await;
        let mut context = store.get_transition(&session_id)?.playback_context.clone();
        context.asset_position = engine.position();
        Some(context)
    }

    pub fn media_product(&self) -> Option<MediaProduct> {
        self.dispatcher
            .active_engine()
            .and_then(|engine| engine.current())
            .map(|current| current.product)
    }

    pub fn next_media_product(&self) -> Option<MediaProduct> {
        self.ctx.next_item().map(|next| next.product)
    }

    /// Session of the next item once its preload has finished
    pub fn preloaded_session(&self) -> Option<StreamingSessionId> {
        self.dispatcher.preloaded_session()
    }

    pub fn engines(&self) -> &[Arc<PlaybackEngine>] {
        self.dispatcher.engines()
    }

    pub fn context(&self) -> &Arc<PlayerContext> {
        &self.ctx
    }

    // === Volume ===

    pub fn volume(&self) -> f32 {
        self.ctx.volume()
    }

    /// Set user volume (clamped to 0.0-1.0); returns the applied value
    pub async fn set_volume(&self, volume: f32) -> f32 {
        let applied = self.ctx.set_volume(volume);
        for engine in self.dispatcher.engines() {
            engine.refresh_gain().await;
        }
        debug!(volume = applied, "Volume set");
        applied
    }

    // === Connectivity ===

    pub fn is_online(&self) -> bool {
        self.recovery.is_online()
    }

    pub fn connection_lost(&self) {
        let snapshot = self
            .dispatcher
            .active_engine()
            .and_then(|engine| engine.snapshot());
        self.recovery.connection_lost(snapshot);
    }

    /// Connectivity is back; reload and resume a captured session that stopped
    pub async fn connection_restored(&self) -> Result<RecoveryOutcome> {
        let Some(capture) = self.recovery.connection_restored() else {
            return Ok(RecoveryOutcome::Unchanged);
        };
        let session_id = self
            .dispatcher
            .reload(capture.product, capture.position)
            .await?;
        self.dispatcher.play().await?;
        info!(previous = %capture.session_id, %session_id, "Resumed after reconnect");
        Ok(RecoveryOutcome::Resumed {
            previous: capture.session_id,
            session_id,
        })
    }

    // === Lifecycle ===

    /// Stop every task the player started
    pub fn shutdown(&self) {
        if self.ctx.shutdown.is_cancelled() {
            return;
        }
        self.ctx.shutdown.cancel();
        self.recovery.clear();
        for engine in self.dispatcher.engines() {
            engine.shutdown();
        }
        if let Some(task) = lock(&self.signal_task).take() {
            task.abort();
        }
        info!("Player shut down");
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// React to engine-to-player signals, one at a time
async fn run_signals(
    dispatcher: Weak<LoadNextDispatcher>,
    mut rx: mpsc::UnboundedReceiver<PlayerSignal>,
    shutdown: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };
        let Some(dispatcher) = dispatcher.upgrade() else {
            break;
        };
        match signal {
            PlayerSignal::ActiveEnded { engine } => {
                if let Err(e) = dispatcher.handle_active_ended(engine).await {
                    warn!(%engine, "Handover after end failed: {}", e);
                }
            }
        }
    }
    debug!("Player signal loop stopped");
}
