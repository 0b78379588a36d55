//! Load / set-next dispatcher
//!
//! Entry point for the two ways a session is created:
//! - `load`: make a product current now (reusing a matching preload in place)
//! - `set_next`: buffer a product behind the current one
//!
//! Identical `set_next` calls join one shared in-flight preload; a different
//! product cancels it. A generation counter lets a newer `load` supersede an
//! older one that is still resolving.

use crate::error::{PlayerError, Result};
use crate::playback::context::{lock, EngineId, NextItem, PlayerContext};
use crate::playback::coordinator::transition_for;
use crate::playback::engine::PlaybackEngine;
use crate::playback::selector::EngineSelector;
use crate::session::StreamInfo;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use segue_common::events::{EndReason, ErrorCategory, PlaybackState, SegueEvent};
use segue_common::model::{MediaProduct, StreamingSessionId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a finished preload lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadTicket {
    pub session_id: StreamingSessionId,
    pub engine: EngineId,
}

type PreloadFuture = Shared<BoxFuture<'static, Result<PreloadTicket>>>;

struct InFlight {
    product: MediaProduct,
    session_id: StreamingSessionId,
    token: CancellationToken,
    future: PreloadFuture,
}

struct Ready {
    product: MediaProduct,
    ticket: PreloadTicket,
}

#[derive(Default)]
struct DispatchState {
    in_flight: Option<InFlight>,
    ready: Option<Ready>,
}

enum Reuse {
    Ready(PreloadTicket),
    InFlight(PreloadFuture),
}

pub struct LoadNextDispatcher {
    ctx: Arc<PlayerContext>,
    selector: EngineSelector,
    engines: Vec<Arc<PlaybackEngine>>,
    state: Mutex<DispatchState>,
    generation: AtomicU64,
}

impl LoadNextDispatcher {
    pub fn new(ctx: Arc<PlayerContext>, selector: EngineSelector, engines: Vec<Arc<PlaybackEngine>>) -> Self {
        Self {
            ctx,
            selector,
            engines,
            state: Mutex::new(DispatchState::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn engines(&self) -> &[Arc<PlaybackEngine>] {
        &self.engines
    }

    pub fn engine(&self, id: EngineId) -> Option<Arc<PlaybackEngine>> {
        self.engines.iter().find(|e| e.id() == id).cloned()
    }

    pub fn active_engine(&self) -> Option<Arc<PlaybackEngine>> {
        self.ctx.active_engine().and_then(|id| self.engine(id))
    }

    /// Session id of the buffered next item, once its preload finished
    pub fn preloaded_session(&self) -> Option<StreamingSessionId> {
        let mut st = lock(&self.state);
        self.prune_stale_ready(&mut st);
        st.ready.as_ref().map(|r| r.ticket.session_id)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Forget a ready preload that a crossfade or reset already consumed
    fn prune_stale_ready(&self, st: &mut DispatchState) {
        let stale = st.ready.as_ref().is_some_and(|ready| {
            self.engine(ready.ticket.engine)
                .map(|engine| engine.coordinator().preloaded_session() != Some(ready.ticket.session_id))
                .unwrap_or(true)
        });
        if stale {
            st.ready = None;
        }
    }

    // === set_next ===

    /// Buffer `product` behind the current session
    ///
    /// Resolves to the session id minted for it. Concurrent calls for the
    /// same item share one preload.
    pub async fn set_next(self: &Arc<Self>, product: MediaProduct) -> Result<StreamingSessionId> {
        let (future, displaced) = {
            let mut st = lock(&self.state);
            self.prune_stale_ready(&mut st);

            if let Some(ready) = st.ready.as_ref().filter(|r| r.product.same_item(&product)) {
                return Ok(ready.ticket.session_id);
            }
            let joined = st
                .in_flight
                .as_ref()
                .filter(|f| f.product.same_item(&product))
                .map(|f| f.future.clone());

            match joined {
                Some(future) => {
                    debug!(product_id = %product.product_id, "Joining in-flight preload");
                    (future, None)
                }
                None => {
                    if let Some(superseded) = st.in_flight.take() {
                        info!(
                            superseded = %superseded.product.product_id,
                            product_id = %product.product_id,
                            "Next item replaced"
                        );
                        superseded.token.cancel();
                    }
                    let displaced = st.ready.take().map(|r| r.ticket);

                    let session_id = StreamingSessionId::new();
                    let token = self.ctx.shutdown.child_token();
                    let task = tokio::spawn(self.clone().preload_next(
                        product.clone(),
                        session_id,
                        token.clone(),
                    ));
                    let future = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(PlayerError::InvalidState(format!("preload task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();

                    st.in_flight = Some(InFlight {
                        product: product.clone(),
                        session_id,
                        token,
                        future: future.clone(),
                    });
                    self.ctx.set_next_item(Some(NextItem {
                        product,
                        session_id: Some(session_id),
                    }));
                    (future, displaced)
                }
            }
        };

        if let Some(ticket) = displaced {
            if let Some(engine) = self.engine(ticket.engine) {
                if engine.coordinator().preloaded_session() == Some(ticket.session_id) {
                    engine.discard_preload().await;
                }
            }
        }

        future.await.map(|ticket| ticket.session_id)
    }

    /// Background body of one preload
    async fn preload_next(
        self: Arc<Self>,
        product: MediaProduct,
        session_id: StreamingSessionId,
        token: CancellationToken,
    ) -> Result<PreloadTicket> {
        let result = self.run_preload(&product, session_id, &token).await;

        let orphaned = {
            let mut st = lock(&self.state);
            let still_next = st
                .in_flight
                .as_ref()
                .is_some_and(|f| f.session_id == session_id);
            if still_next {
                st.in_flight = None;
                if let Ok(ticket) = &result {
                    st.ready = Some(Ready {
                        product: product.clone(),
                        ticket: ticket.clone(),
                    });
                }
            }
            !still_next
        };

        match &result {
            Ok(ticket) if orphaned => {
                debug!(%session_id, "Preload finished after being superseded, discarding");
                if let Some(engine) = self.engine(ticket.engine) {
                    if engine.coordinator().preloaded_session() == Some(session_id) {
                        engine.discard_preload().await;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%session_id, product_id = %product.product_id, "Preload failed: {}", e);
                self.ctx.clear_next_if(session_id);
            }
        }
        result
    }

    async fn run_preload(
        &self,
        product: &MediaProduct,
        session_id: StreamingSessionId,
        token: &CancellationToken,
    ) -> Result<PreloadTicket> {
        // Repeat-one: carry the current entitlement over to the new session
        let repeat = self
            .active_engine()
            .and_then(|engine| engine.current())
            .filter(|current| current.product.same_item(product));
        if let Some(current) = repeat {
            match self
                .ctx
                .store
                .write()
                .await
                .clone_session(&current.session_id, session_id)
            {
                Ok(()) => debug!(from = %current.session_id, to = %session_id, "Repeat-one reuses entitlement"),
                Err(e) => debug!("Cannot reuse current entitlement: {}", e),
            }
        }

        let info = match self.ctx.resolve_entitlement(product, session_id, token).await {
            Ok(info) => info,
            Err(e) => {
                self.ctx.store.write().await.delete_session(&session_id);
                return Err(e);
            }
        };
        let stream = StreamInfo::from(&info);
        let engine = match self.selector.select(info.product_type, &stream) {
            Ok(engine) => engine,
            Err(e) => {
                self.ctx.store.write().await.delete_session(&session_id);
                return Err(e);
            }
        };

        let session_id = engine.preload(product, info, token).await?;
        Ok(PreloadTicket {
            session_id,
            engine: engine.id(),
        })
    }

    // === load ===

    /// Make `product` current at `position`
    ///
    /// A matching preloaded (or still preloading) next item is promoted in
    /// place and keeps its session id.
    pub async fn load(self: &Arc<Self>, product: MediaProduct, position: f64) -> Result<StreamingSessionId> {
        let generation = self.bump_generation();

        let reuse = {
            let mut st = lock(&self.state);
            self.prune_stale_ready(&mut st);
            if let Some(ready) = st.ready.as_ref().filter(|r| r.product.same_item(&product)) {
                Some(Reuse::Ready(ready.ticket.clone()))
            } else {
                st.in_flight
                    .as_ref()
                    .filter(|f| f.product.same_item(&product))
                    .map(|f| Reuse::InFlight(f.future.clone()))
            }
        };

        if let Some(reuse) = reuse {
            let ticket = match reuse {
                Reuse::Ready(ticket) => Ok(ticket),
                Reuse::InFlight(future) => future.await,
            };
            match ticket {
                Ok(ticket) => {
                    if self.is_stale(generation) {
                        return Err(PlayerError::Superseded);
                    }
                    {
                        let mut st = lock(&self.state);
                        if st.ready.as_ref().is_some_and(|r| r.ticket == ticket) {
                            st.ready = None;
                        }
                    }
                    return self.promote(ticket, position).await;
                }
                Err(e) => {
                    debug!(product_id = %product.product_id, "Pending preload unusable, loading fresh: {}", e);
                }
            }
        }

        self.load_fresh(product, position, generation, false).await
    }

    async fn promote(&self, ticket: PreloadTicket, position: f64) -> Result<StreamingSessionId> {
        let engine = self.engine(ticket.engine).ok_or_else(|| {
            PlayerError::InvalidState(format!("unknown {}", ticket.engine))
        })?;
        for other in self.engines.iter().filter(|e| e.id() != engine.id()) {
            other.finish_current_media_product(EndReason::Skip).await;
            other.release_current().await;
        }
        self.ctx.set_active_engine(Some(engine.id()));
        engine.promote_preloaded(ticket.session_id, position).await?;
        info!(session_id = %ticket.session_id, position, "Loaded from preload");
        Ok(ticket.session_id)
    }

    /// Re-run the full load for `product`, never reusing a preload
    ///
    /// The next item stays queued (or keeps preloading) behind the reloaded
    /// session.
    pub async fn reload(self: &Arc<Self>, product: MediaProduct, position: f64) -> Result<StreamingSessionId> {
        let generation = self.bump_generation();
        self.load_fresh(product, position, generation, true).await
    }

    async fn load_fresh(
        &self,
        product: MediaProduct,
        position: f64,
        generation: u64,
        keep_next: bool,
    ) -> Result<StreamingSessionId> {
        if keep_next {
            for engine in &self.engines {
                engine.coordinator().cancel_crossfade().await;
            }
        } else {
            self.drop_next().await;
        }
        for engine in &self.engines {
            engine.finish_current_media_product(EndReason::Skip).await;
            engine.release_current().await;
        }

        let session_id = StreamingSessionId::new();
        let token = self.ctx.shutdown.child_token();
        let info = match self.ctx.resolve_entitlement(&product, session_id, &token).await {
            Ok(info) => info,
            Err(e) => {
                warn!(product_id = %product.product_id, "Load failed to resolve: {}", e);
                self.emit_error(ErrorCategory::Resolve, &e, session_id);
                return Err(e);
            }
        };
        if self.is_stale(generation) {
            debug!(%session_id, "Load superseded while resolving");
            return Err(PlayerError::Superseded);
        }

        let stream = StreamInfo::from(&info);
        let engine = match self.selector.select(info.product_type, &stream) {
            Ok(engine) => engine,
            Err(e) => {
                self.emit_error(ErrorCategory::Unsupported, &e, session_id);
                return Err(e);
            }
        };

        {
            let mut store = self.ctx.store.write().await;
            let duration = info
                .duration
                .unwrap_or(self.ctx.settings.estimated_duration_secs);
            store.save_transition(
                session_id,
                transition_for(&product, &info, duration, position, info.duration.is_none()),
            );
            store.save_playback_info(session_id, info.clone());
            store.save_stream_info(session_id, stream);
        }

        self.ctx.set_active_engine(Some(engine.id()));
        if let Err(e) = engine.load(&product, &info, position).await {
            self.ctx.store.write().await.delete_session(&session_id);
            self.emit_error(ErrorCategory::Decode, &e, session_id);
            return Err(e);
        }

        if self.is_stale(generation) {
            debug!(%session_id, "Load superseded after loading, rolling back");
            if engine.current_session_id() == Some(session_id) {
                engine.release_current().await;
            }
            self.ctx.store.write().await.delete_session(&session_id);
            return Err(PlayerError::Superseded);
        }

        self.ctx.set_current_session(Some(session_id));
        Ok(session_id)
    }

    /// Cancel the in-flight next item and drop any buffered one
    async fn drop_next(&self) {
        let superseded = {
            let mut st = lock(&self.state);
            st.ready = None;
            st.in_flight.take()
        };
        if let Some(in_flight) = superseded {
            in_flight.token.cancel();
        }
        self.ctx.set_next_item(None);
        for engine in &self.engines {
            if let Some(dropped) = engine.discard_preload().await {
                debug!(session_id = %dropped, "Dropped buffered next item");
            }
        }
    }

    fn emit_error(&self, category: ErrorCategory, error: &PlayerError, session_id: StreamingSessionId) {
        self.ctx.emit(SegueEvent::PlaybackError {
            category,
            message: error.to_string(),
            session_id: Some(session_id),
            timestamp: Utc::now(),
        });
    }

    // === Transport ===

    pub async fn play(self: &Arc<Self>) -> Result<()> {
        let engine = self.active_engine().ok_or(PlayerError::NoActiveSession)?;
        let retry = engine.take_retry_on_play();
        if retry || engine.maybe_hard_reload().await {
            let current = engine.current().ok_or(PlayerError::NoActiveSession)?;
            let position = engine.position();
            info!(
                session_id = %current.session_id,
                retry,
                "Reloading stream before play"
            );
            self.reload(current.product, position).await?;
            let engine = self.active_engine().ok_or(PlayerError::NoActiveSession)?;
            return engine.play().await;
        }
        engine.play().await
    }

    pub async fn pause(&self) -> Result<()> {
        let engine = self.active_engine().ok_or(PlayerError::NoActiveSession)?;
        engine.pause().await
    }

    pub async fn seek(&self, position: f64) -> Result<()> {
        let engine = self.active_engine().ok_or(PlayerError::NoActiveSession)?;
        engine.seek(position).await
    }

    /// Stop everything and forget every session
    pub async fn reset(&self) {
        self.bump_generation();
        self.drop_next().await;
        for engine in &self.engines {
            engine.reset().await;
        }
        self.ctx.set_active_engine(None);
        self.ctx.set_current_session(None);
        self.ctx.publish_state(PlaybackState::Idle);
        info!("Player reset");
    }

    /// `engine` ran out with nothing buffered; continue on another engine
    pub async fn handle_active_ended(&self, engine: EngineId) -> Result<()> {
        let ticket = {
            let mut st = lock(&self.state);
            self.prune_stale_ready(&mut st);
            match st.ready.as_ref() {
                Some(ready) if ready.ticket.engine != engine => st.ready.take().map(|r| r.ticket),
                _ => None,
            }
        };
        let Some(ticket) = ticket else {
            debug!(%engine, "Active engine ended with no next item");
            return Ok(());
        };

        let next = self
            .engine(ticket.engine)
            .ok_or_else(|| PlayerError::InvalidState(format!("unknown {}", ticket.engine)))?;
        info!(from = %engine, to = %next.id(), session_id = %ticket.session_id, "Handing over to another engine");
        self.ctx.set_active_engine(Some(next.id()));
        next.promote_preloaded(ticket.session_id, 0.0).await?;
        next.play().await
    }
}
