//! Event types for the Segue notification channel
//!
//! Provides the public event definitions and the EventBus every consumer
//! subscribes to.

// Sub-modules (supporting types)
mod playback_types;

pub use playback_types::{EndReason, ErrorCategory, PlaybackState};

use crate::model::{MediaProduct, MediaProductTransition, PlaybackContext, StreamingSessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Segue event types
///
/// Events are broadcast via EventBus and serialize to tagged JSON for
/// transports that forward them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SegueEvent {
    /// Playback state of the active engine changed
    ///
    /// Only the active engine (or the first engine before any is active)
    /// emits this.
    PlaybackStateChanged {
        /// State before change
        old_state: PlaybackState,
        /// State after change
        new_state: PlaybackState,
        /// Session the change applies to
        session_id: StreamingSessionId,
        /// When state changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A session became the audible/visible one
    ///
    /// Triggers:
    /// - UI: now playing
    /// - Telemetry correlation: session id for subsequent reports
    MediaProductTransition {
        /// Product now audible
        media_product: MediaProduct,
        /// Observable context of the new session
        playback_context: PlaybackContext,
        /// When the transition happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A session ended (completed, skipped, or failed)
    MediaProductEnded {
        /// Product captured at the time the session ended
        media_product: MediaProduct,
        /// Ended session
        session_id: StreamingSessionId,
        /// Why it ended
        end_reason: EndReason,
        /// Position (seconds) when it ended
        end_position: f64,
        /// When it ended
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The current item is close to its end and no next item is set
    ///
    /// Emitted at most once per session. Callers answer with `set_next`.
    PreloadRequested {
        /// Session nearing its end
        session_id: StreamingSessionId,
        /// Seconds left in the session
        remaining: f64,
        /// When requested
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Delivered quality changed mid-stream
    StreamingQualityChanged {
        session_id: StreamingSessionId,
        quality: crate::model::QualityTier,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback error surfaced to the application
    PlaybackError {
        /// Which stage failed
        category: ErrorCategory,
        /// Human-readable message
        message: String,
        /// Session affected, if one was established
        session_id: Option<StreamingSessionId>,
        /// When the error occurred
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Network connectivity status changed
    ConnectivityChanged {
        /// Whether network is available
        online: bool,
        /// When status changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SegueEvent {
    /// Build a transition event from a stored transition
    pub fn transition(transition: &MediaProductTransition) -> Self {
        SegueEvent::MediaProductTransition {
            media_product: transition.media_product.clone(),
            playback_context: transition.playback_context.clone(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Event type name (for logging)
    pub fn event_type(&self) -> &'static str {
        match self {
            SegueEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            SegueEvent::MediaProductTransition { .. } => "MediaProductTransition",
            SegueEvent::MediaProductEnded { .. } => "MediaProductEnded",
            SegueEvent::PreloadRequested { .. } => "PreloadRequested",
            SegueEvent::StreamingQualityChanged { .. } => "StreamingQualityChanged",
            SegueEvent::PlaybackError { .. } => "PlaybackError",
            SegueEvent::ConnectivityChanged { .. } => "ConnectivityChanged",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use segue_common::events::{EventBus, SegueEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(SegueEvent::ConnectivityChanged {
///     online: false,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(SegueEvent::ConnectivityChanged { online: false, .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SegueEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SegueEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SegueEvent) {
        tracing::trace!(event = event.event_type(), "emit");
        let _ = self.tx.send(event);
    }
}
