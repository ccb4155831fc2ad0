//! Event types for the Reel event system
//!
//! Provides the shared `PoolEvent` enum and the `EventBus` every feed and the
//! shared pool publish on. UI layers subscribe to render buffering spinners,
//! first-frame placeholders and "unable to play" messages; coordinators
//! subscribe to learn about decoder end-of-stream.

mod pool_types;

pub use pool_types::{EvictionReason, FailureClass, LifecycleState, PlaybackState};

use crate::ids::{FeedId, VideoId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Reel event types
///
/// Events are broadcast via EventBus and can be serialized (one JSON object
/// per event) for logging or a debug overlay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PoolEvent {
    /// Cold initialization started for an index
    PreloadStarted {
        feed_id: FeedId,
        index: usize,
        video_id: VideoId,
    },

    /// Handle initialized and registered with the shared pool
    PreloadReady {
        feed_id: FeedId,
        index: usize,
        video_id: VideoId,
    },

    /// Concurrency cap reached; request re-enqueued after a delay
    PreloadDeferred {
        feed_id: FeedId,
        index: usize,
        delay_ms: u64,
    },

    /// Initialization failed
    PreloadFailed {
        feed_id: FeedId,
        index: usize,
        video_id: VideoId,
        class: FailureClass,
        /// 1-based attempt number that failed
        attempt: u32,
        /// Whether another attempt is scheduled
        will_retry: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Retries exhausted; index stays un-preloaded until reached on demand
    PreloadAbandoned {
        feed_id: FeedId,
        index: usize,
        attempts: u32,
    },

    /// Handle disposed and removed from the shared pool
    HandleEvicted {
        video_id: VideoId,
        reason: EvictionReason,
    },

    /// Audible playback started or stopped on a handle
    PlaybackStateChanged {
        feed_id: FeedId,
        index: usize,
        video_id: VideoId,
        new_state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Decoder buffering flag changed
    BufferingChanged {
        video_id: VideoId,
        buffering: bool,
    },

    /// Priming finished: the first frame is decoded and on the surface
    FirstFrameReady {
        feed_id: FeedId,
        index: usize,
    },

    /// Priming did not finish in time; surface mounted anyway
    SurfaceMountForced {
        feed_id: FeedId,
        index: usize,
    },

    /// The focused index cannot be played (non-retryable failure)
    PlaybackUnavailable {
        feed_id: FeedId,
        index: usize,
        reason: String,
    },

    /// Current video reached its end and auto-advance is enabled
    AdvanceRequested {
        feed_id: FeedId,
        from_index: usize,
    },

    /// Decoder reported end of stream
    DecoderEnded {
        video_id: VideoId,
    },

    /// Page change settled after debounce
    PageSettled {
        feed_id: FeedId,
        index: usize,
    },

    /// Feed observed an app lifecycle transition
    LifecycleChanged {
        feed_id: FeedId,
        old_state: LifecycleState,
        new_state: LifecycleState,
    },
}

impl PoolEvent {
    /// Event type name (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            PoolEvent::PreloadStarted { .. } => "PreloadStarted",
            PoolEvent::PreloadReady { .. } => "PreloadReady",
            PoolEvent::PreloadDeferred { .. } => "PreloadDeferred",
            PoolEvent::PreloadFailed { .. } => "PreloadFailed",
            PoolEvent::PreloadAbandoned { .. } => "PreloadAbandoned",
            PoolEvent::HandleEvicted { .. } => "HandleEvicted",
            PoolEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            PoolEvent::BufferingChanged { .. } => "BufferingChanged",
            PoolEvent::FirstFrameReady { .. } => "FirstFrameReady",
            PoolEvent::SurfaceMountForced { .. } => "SurfaceMountForced",
            PoolEvent::PlaybackUnavailable { .. } => "PlaybackUnavailable",
            PoolEvent::AdvanceRequested { .. } => "AdvanceRequested",
            PoolEvent::DecoderEnded { .. } => "DecoderEnded",
            PoolEvent::PageSettled { .. } => "PageSettled",
            PoolEvent::LifecycleChanged { .. } => "LifecycleChanged",
        }
    }

    /// Serialize as a single JSON line
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!("{{\"type\":\"{}\",\"error\":\"{}\"}}", self.event_type(), e)
        })
    }
}

/// Process-wide event bus
///
/// Thin wrapper over `tokio::sync::broadcast`. Slow subscribers lag and lose
/// the oldest events rather than blocking publishers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PoolEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use reel_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit(&self, event: PoolEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
