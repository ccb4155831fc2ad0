//! Per-index slot state machine
//!
//! ```text
//! Absent → Initializing → Ready → Priming → Primed → Playing ⇄ Paused
//!                                                        any → Disposed
//! ```
//!
//! `Disposed` is terminal for the handle, not for the index: once the local
//! pool has observed it the slot is cleared back to `Absent`, and a later
//! visit may initialize a fresh handle.

use crate::error::{Error, Result};
use serde::Serialize;

/// Where one index is in its decoder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    #[default]
    Absent,
    Initializing,
    /// Initialized, paused, first frame not yet decoded
    Ready,
    /// Muted playback pulling the first frame
    Priming,
    /// Initialized, paused, first frame on the surface
    Primed,
    Playing,
    Paused,
    Disposed,
}

impl SlotState {
    /// Handle is initialized and resident
    pub fn is_resident(self) -> bool {
        matches!(
            self,
            SlotState::Ready | SlotState::Priming | SlotState::Primed | SlotState::Playing | SlotState::Paused
        )
    }

    /// A frame has been decoded onto the surface at least once
    pub fn has_frame(self) -> bool {
        matches!(self, SlotState::Primed | SlotState::Playing | SlotState::Paused)
    }
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SlotState::Absent => "absent",
            SlotState::Initializing => "initializing",
            SlotState::Ready => "ready",
            SlotState::Priming => "priming",
            SlotState::Primed => "primed",
            SlotState::Playing => "playing",
            SlotState::Paused => "paused",
            SlotState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// Inputs to the slot machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    /// Cold initialization began
    InitStarted,
    /// Initialization failed; index returns to `Absent`
    InitFailed,
    /// A resident handle was found for this identity
    Attached { primed: bool },
    PrimingStarted,
    PrimingFinished,
    PrimingCancelled,
    Play,
    Pause,
    /// Handle disposed (evicted, replaced or feed disposed)
    Disposed,
    /// Disposal observed; slot free again
    Cleared,
}

/// Compute the next state
///
/// Repeated `Play` / `Pause` are accepted as no-ops. Anything not listed is
/// rejected with `Error::InvalidTransition`.
pub fn next(state: SlotState, event: SlotEvent) -> Result<SlotState> {
    use SlotEvent as E;
    use SlotState as S;

    let next = match (state, event) {
        (S::Absent, E::InitStarted) => S::Initializing,
        (S::Initializing, E::InitFailed) => S::Absent,

        // Registration (or a late completion this feed had given up on)
        (S::Absent | S::Initializing, E::Attached { primed: false }) => S::Ready,
        (S::Absent | S::Initializing, E::Attached { primed: true }) => S::Primed,

        (S::Ready, E::PrimingStarted) => S::Priming,
        (S::Priming, E::PrimingFinished) => S::Primed,
        (S::Priming, E::PrimingCancelled) => S::Ready,

        (S::Ready | S::Priming | S::Primed | S::Paused | S::Playing, E::Play) => S::Playing,
        (S::Playing, E::Pause) => S::Paused,
        (S::Ready | S::Primed | S::Paused, E::Pause) => state,

        (S::Disposed, E::Cleared) => S::Absent,
        (S::Absent, E::Cleared) => S::Absent,
        (S::Disposed, E::Disposed) => S::Disposed,
        (s, E::Disposed) if s != S::Absent => S::Disposed,

        (from, event) => {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                event: format!("{:?}", event),
            })
        }
    };
    Ok(next)
}
