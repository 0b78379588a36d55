//! Simulated decode engine
//!
//! Renders nothing; a virtual clock advances the position while "playing"
//! and emits the same signals a real engine would. Runs on tokio time, so
//! tests with a paused clock play whole tracks instantly and
//! deterministically.

use crate::playback::context::lock;
use crate::playback::decode::{DecodeEngine, DecodeEngineFactory, DecodeEvent, DecodeFault, DecodeSignal};
use crate::session::StreamInfo;
use async_trait::async_trait;
use segue_common::model::StreamingSessionId;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

const DEFAULT_CODECS: [&str; 3] = ["aac", "flac", "mp3"];
const DEFAULT_TICK_MS: u64 = 50;
const SIGNAL_CAPACITY: usize = 256;

#[derive(Default)]
struct SimState {
    loaded: Option<StreamingSessionId>,
    position_ms: u64,
    duration_ms: Option<u64>,
    playing: bool,
    volume: f32,
    loudness_gain: f32,
    fail_next_load: Option<DecodeFault>,
    fail_next_play: Option<DecodeFault>,
    clock: Option<JoinHandle<()>>,
    clock_generation: u64,
    loads: usize,
}

impl SimState {
    fn stop_clock(&mut self) {
        self.clock_generation += 1;
        if let Some(clock) = self.clock.take() {
            clock.abort();
        }
    }
}

pub struct SimulatedDecodeEngine {
    name: String,
    codecs: Vec<String>,
    tick: Duration,
    state: Arc<Mutex<SimState>>,
    signals: broadcast::Sender<DecodeEvent>,
}

impl SimulatedDecodeEngine {
    pub fn new(name: impl Into<String>) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            name: name.into(),
            codecs: DEFAULT_CODECS.iter().map(|c| c.to_string()).collect(),
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            state: Arc::new(Mutex::new(SimState {
                volume: 1.0,
                loudness_gain: 1.0,
                ..SimState::default()
            })),
            signals,
        }
    }

    pub fn with_codecs(mut self, codecs: &[&str]) -> Self {
        self.codecs = codecs.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn loaded_session(&self) -> Option<StreamingSessionId> {
        lock(&self.state).loaded
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    pub fn loudness_gain(&self) -> f32 {
        lock(&self.state).loudness_gain
    }

    /// Number of successful loads so far
    pub fn load_count(&self) -> usize {
        lock(&self.state).loads
    }

    /// Make the next `load` fail with `fault`
    pub fn fail_next_load(&self, fault: DecodeFault) {
        lock(&self.state).fail_next_load = Some(fault);
    }

    /// Make the next `play` fail with `fault`
    pub fn fail_next_play(&self, fault: DecodeFault) {
        lock(&self.state).fail_next_play = Some(fault);
    }

    /// Emit `signal` for the loaded stream at the current position
    ///
    /// `Error` and `Ended` stop the clock like a real engine would.
    pub fn inject(&self, signal: DecodeSignal) {
        let (session_id, position) = {
            let mut st = lock(&self.state);
            if matches!(signal, DecodeSignal::Error(_) | DecodeSignal::Ended) {
                st.stop_clock();
                st.playing = false;
            }
            (st.loaded, st.position_ms as f64 / 1000.0)
        };
        self.emit(session_id, position, signal);
    }

    /// Emit `signal` tagged with an arbitrary session (stale signal injection)
    pub fn inject_for(&self, session_id: StreamingSessionId, signal: DecodeSignal) {
        let position = lock(&self.state).position_ms as f64 / 1000.0;
        self.emit(Some(session_id), position, signal);
    }

    fn emit(&self, session_id: Option<StreamingSessionId>, position: f64, signal: DecodeSignal) {
        // No subscribers is fine
        let _ = self.signals.send(DecodeEvent {
            session_id,
            position,
            signal,
        });
    }

    fn spawn_clock(&self, generation: u64) -> JoinHandle<()> {
        let state = self.state.clone();
        let signals = self.signals.clone();
        let tick = self.tick;
        let tick_ms = tick.as_millis() as u64;
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                let (session_id, position, ended) = {
                    let mut st = lock(&state);
                    if st.clock_generation != generation || !st.playing {
                        return;
                    }
                    let mut position = st.position_ms + tick_ms;
                    if let Some(duration) = st.duration_ms {
                        position = position.min(duration);
                    }
                    st.position_ms = position;
                    let ended = st.duration_ms.is_some_and(|d| position >= d);
                    if ended {
                        st.playing = false;
                        st.clock = None;
                    }
                    (st.loaded, position as f64 / 1000.0, ended)
                };

                let _ = signals.send(DecodeEvent {
                    session_id,
                    position,
                    signal: DecodeSignal::TimeUpdate,
                });
                if ended {
                    debug!(backend = %name, ?session_id, "Simulated stream ended");
                    let _ = signals.send(DecodeEvent {
                        session_id,
                        position,
                        signal: DecodeSignal::Ended,
                    });
                    return;
                }
            }
        })
    }
}

/// Duration in ms from the stream, or from a `sim://{id}/{ms}` locator
fn stream_duration_ms(stream: &StreamInfo) -> Option<u64> {
    if let Some(duration) = stream.duration {
        return Some((duration * 1000.0).round() as u64);
    }
    stream
        .locator
        .strip_prefix("sim://")
        .and_then(|rest| rest.rsplit('/').next())
        .and_then(|ms| ms.parse().ok())
}

#[async_trait]
impl DecodeEngine for SimulatedDecodeEngine {
    fn backend(&self) -> &str {
        &self.name
    }

    fn can_play(&self, codec: &str) -> bool {
        self.codecs.iter().any(|c| c.eq_ignore_ascii_case(codec))
    }

    async fn load(&self, stream: &StreamInfo, start_position: f64) -> Result<(), DecodeFault> {
        let (session_id, duration) = {
            let mut st = lock(&self.state);
            if let Some(fault) = st.fail_next_load.take() {
                return Err(fault);
            }
            st.stop_clock();
            st.playing = false;
            st.loaded = Some(stream.streaming_session_id);
            st.duration_ms = stream_duration_ms(stream);
            let start_ms = (start_position.max(0.0) * 1000.0).round() as u64;
            st.position_ms = st.duration_ms.map_or(start_ms, |d| start_ms.min(d));
            st.loads += 1;
            (st.loaded, st.duration_ms)
        };
        debug!(backend = %self.name, locator = %stream.locator, start_position, "Simulated load");
        if let Some(duration) = duration {
            self.emit(
                session_id,
                start_position,
                DecodeSignal::DurationChange(duration as f64 / 1000.0),
            );
        }
        Ok(())
    }

    async fn play(&self) -> Result<(), DecodeFault> {
        let (session_id, position) = {
            let mut st = lock(&self.state);
            if st.loaded.is_none() {
                return Err(DecodeFault::fatal("NO_SOURCE", "nothing loaded"));
            }
            if let Some(fault) = st.fail_next_play.take() {
                return Err(fault);
            }
            if st.playing {
                return Ok(());
            }
            st.stop_clock();
            st.playing = true;
            let generation = st.clock_generation;
            st.clock = Some(self.spawn_clock(generation));
            (st.loaded, st.position_ms as f64 / 1000.0)
        };
        self.emit(session_id, position, DecodeSignal::Playing);
        Ok(())
    }

    async fn pause(&self) {
        let paused = {
            let mut st = lock(&self.state);
            st.stop_clock();
            let was_playing = std::mem::replace(&mut st.playing, false);
            was_playing.then(|| (st.loaded, st.position_ms as f64 / 1000.0))
        };
        if let Some((session_id, position)) = paused {
            self.emit(session_id, position, DecodeSignal::Paused);
        }
    }

    async fn seek(&self, position: f64) -> Result<(), DecodeFault> {
        let (session_id, position) = {
            let mut st = lock(&self.state);
            if st.loaded.is_none() {
                return Err(DecodeFault::fatal("NO_SOURCE", "nothing loaded"));
            }
            let target = (position.max(0.0) * 1000.0).round() as u64;
            st.position_ms = st.duration_ms.map_or(target, |d| target.min(d));
            (st.loaded, st.position_ms as f64 / 1000.0)
        };
        self.emit(session_id, position, DecodeSignal::TimeUpdate);
        Ok(())
    }

    async fn unload(&self) {
        let mut st = lock(&self.state);
        st.stop_clock();
        st.playing = false;
        st.loaded = None;
        st.position_ms = 0;
        st.duration_ms = None;
    }

    fn position(&self) -> f64 {
        lock(&self.state).position_ms as f64 / 1000.0
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.state).duration_ms.map(|d| d as f64 / 1000.0)
    }

    fn set_volume(&self, volume: f32) {
        lock(&self.state).volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        lock(&self.state).volume
    }

    fn set_loudness_gain(&self, gain: f32) {
        lock(&self.state).loudness_gain = gain;
    }

    fn subscribe(&self) -> broadcast::Receiver<DecodeEvent> {
        self.signals.subscribe()
    }
}

impl Drop for SimulatedDecodeEngine {
    fn drop(&mut self) {
        lock(&self.state).stop_clock();
    }
}

/// Decode backend made of simulated engines
///
/// Keeps every engine its factory created so tests can reach the slots.
#[derive(Clone)]
pub struct SimBackend {
    name: String,
    codecs: Vec<String>,
    created: Arc<Mutex<Vec<Arc<SimulatedDecodeEngine>>>>,
}

impl SimBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            codecs: DEFAULT_CODECS.iter().map(|c| c.to_string()).collect(),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_codecs(mut self, codecs: &[&str]) -> Self {
        self.codecs = codecs.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> DecodeEngineFactory {
        let backend = self.clone();
        Arc::new(move || {
            let codecs: Vec<&str> = backend.codecs.iter().map(String::as_str).collect();
            let engine = Arc::new(SimulatedDecodeEngine::new(backend.name.clone()).with_codecs(&codecs));
            lock(&backend.created).push(engine.clone());
            engine as Arc<dyn DecodeEngine>
        })
    }

    /// Engines created so far, in creation order (slot A then B)
    pub fn engines(&self) -> Vec<Arc<SimulatedDecodeEngine>> {
        lock(&self.created).clone()
    }

    /// The slot engine that currently has `session_id` loaded
    pub fn engine_for(&self, session_id: StreamingSessionId) -> Option<Arc<SimulatedDecodeEngine>> {
        lock(&self.created)
            .iter()
            .find(|engine| engine.loaded_session() == Some(session_id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use segue_common::model::{ProductType, QualityTier};

    fn stream(ms: u64) -> StreamInfo {
        StreamInfo {
            streaming_session_id: StreamingSessionId::new(),
            product_type: ProductType::Track,
            locator: format!("sim://1/{}", ms),
            codec: "aac".into(),
            quality: QualityTier::High,
            expires_at: Utc::now(),
            duration: None,
            preview: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_to_the_end() {
        let engine = SimulatedDecodeEngine::new("sim");
        let mut rx = engine.subscribe();
        let stream = stream(120);
        engine.load(&stream, 0.0).await.unwrap();
        engine.play().await.unwrap();

        let mut seen = Vec::new();
        loop {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.session_id, Some(stream.streaming_session_id));
            let done = event.signal == DecodeSignal::Ended;
            seen.push(event.signal);
            if done {
                break;
            }
        }
        assert_eq!(seen[0], DecodeSignal::DurationChange(0.12));
        assert_eq!(seen[1], DecodeSignal::Playing);
        assert!(seen.contains(&DecodeSignal::TimeUpdate));
        assert!(!engine.is_playing());
        assert_eq!(engine.position(), 0.12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_clock() {
        let engine = SimulatedDecodeEngine::new("sim");
        engine.load(&stream(10_000), 1.0).await.unwrap();
        engine.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        engine.pause().await;
        let position = engine.position();
        assert!(position > 1.0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.position(), position);
    }

    #[tokio::test]
    async fn test_injected_load_failure_is_one_shot() {
        let engine = SimulatedDecodeEngine::new("sim");
        engine.fail_next_load(DecodeFault::fatal("E", "boom"));
        assert!(engine.load(&stream(100), 0.0).await.is_err());
        assert!(engine.loaded_session().is_none());
        assert!(engine.load(&stream(100), 0.0).await.is_ok());
        assert_eq!(engine.load_count(), 1);
    }
}
