//! Internal feed signals
//!
//! Background tasks owned by one feed (preload inits, retries, priming
//! polls) report back to that feed's coordinator over an unbounded mpsc
//! channel. The coordinator applies them to its local state in arrival order.

use reel_common::events::FailureClass;
use reel_common::VideoId;

/// How a priming run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimingOutcome {
    /// First frame decoded; handle paused with volume restored
    FrameReady,
    /// Token superseded (page change, playback started, eviction)
    Cancelled,
    /// No frame within the priming bound
    TimedOut,
}

/// Message from a feed task to its coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    /// Handle initialized and registered in the shared pool
    PreloadReady { index: usize, video_id: VideoId },

    /// Initialization failed
    PreloadFailed {
        index: usize,
        video_id: VideoId,
        class: FailureClass,
        will_retry: bool,
        /// Failure of an on-demand open (never retried)
        on_demand: bool,
    },

    /// Priming task finished
    PrimingFinished {
        index: usize,
        video_id: VideoId,
        token: u64,
        outcome: PrimingOutcome,
    },

    /// Fallback timer fired before the first frame
    SurfaceForced { index: usize },

    /// Debounce window elapsed for a page change
    DebounceElapsed { ticket: u64 },

    /// Delayed autoplay attempt after sign-in
    SignInReplay,
}
