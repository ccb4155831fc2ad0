//! Playback coordination: slot states, autoplay gating, lifecycle,
//! debounced page changes and first-frame priming

pub mod coordinator;
pub mod debounce;
pub mod gating;
pub mod lifecycle;
pub mod priming;
pub mod signals;
pub mod slot;

pub use coordinator::{FeedDeps, FeedOptions, PlaybackCoordinator};
pub use gating::{GateDecision, PlayTrigger, PlaybackContext};
pub use lifecycle::{LifecycleAction, LifecycleSignal};
pub use signals::{FeedSignal, PrimingOutcome};
pub use slot::{SlotEvent, SlotState};
