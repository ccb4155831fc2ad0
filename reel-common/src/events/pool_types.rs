//! Pool-related type definitions
//!
//! Supporting types carried by pool events: playback state, failure
//! classification, app lifecycle state and eviction reasons.

use serde::{Deserialize, Serialize};

/// Audible playback state of a decoder handle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// Classification of a failed decoder initialization
///
/// Each class maps to one retry policy:
/// - `ResourceExhausted`: evict, then exponential backoff
/// - `Timeout` / `NotFound`: fixed delay
/// - `TransientDecode`: logged, not retried
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum FailureClass {
    /// Decoder could not allocate (out of memory)
    ResourceExhausted,
    /// Initialization did not finish within its timeout
    Timeout,
    /// URL is stale or malformed (4xx)
    NotFound,
    /// Anything else
    TransientDecode,
}

impl FailureClass {
    /// Whether the scheduler retries this class automatically
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureClass::TransientDecode)
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::ResourceExhausted => write!(f, "ResourceExhausted"),
            FailureClass::Timeout => write!(f, "Timeout"),
            FailureClass::NotFound => write!(f, "NotFound"),
            FailureClass::TransientDecode => write!(f, "TransientDecode"),
        }
    }
}

/// App lifecycle state as seen by a feed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum LifecycleState {
    /// App visible and interactive
    Foreground,
    /// App hidden, inactive or paused by the OS
    Background,
    /// Engine detached from any view; terminal until re-attached
    Detached,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Foreground => write!(f, "Foreground"),
            LifecycleState::Background => write!(f, "Background"),
            LifecycleState::Detached => write!(f, "Detached"),
        }
    }
}

/// Why a handle left the pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum EvictionReason {
    /// Index distance from current exceeded the keep range
    Distance,
    /// Pool exceeded its size bound; least recently used went first
    Lru,
    /// Freed ahead of an out-of-memory retry
    MemoryPressure,
    /// Owning feed was disposed with the drop-on-dispose policy
    FeedDisposed,
    /// Replaced by a newer handle for the same identity
    Replaced,
    /// Explicit removal or `clear_all`
    Removed,
}
