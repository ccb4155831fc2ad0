//! Decoder pool
//!
//! `SharedPool` owns every initialized handle across feeds; `LocalPool` is a
//! feed's index → identity view over it; `eviction` is the pure policy run
//! after each shared-pool mutation.

pub mod eviction;
pub mod handle;
pub mod local;
pub mod shared;

pub use eviction::{Eviction, EvictionCandidate};
pub use handle::{DecoderHandle, HandleSnapshot};
pub use local::{LocalPool, LocalSlot};
pub use shared::{PoolStatsSnapshot, PrimingPoll, SharedPool};
