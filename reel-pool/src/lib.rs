//! # Reel Decoder Pool Library (reel-pool)
//!
//! Decoder pooling and preload scheduling for vertically paged video feeds.
//!
//! **Purpose:** Keep a bounded set of initialized decoders warm across feed
//! instances so the next video starts instantly, while guaranteeing that at
//! most one video is audible and no disposed decoder is ever played.
//!
//! **Architecture:**
//! - `pool`: process-wide `SharedPool` (single owner of every handle),
//!   per-feed `LocalPool` index map, eviction policy
//! - `preload`: per-feed `PreloadScheduler` (concurrency cap, deferral,
//!   failure classification and retry) and decoder event watchers
//! - `playback`: per-feed `PlaybackCoordinator` (debounced paging,
//!   single-active playback, autoplay gating, priming, lifecycle)
//! - `decoder`: collaborator traits the host platform implements
//! - `sim`: deterministic in-process backend for tests and `reel-sim`

pub mod config;
pub mod decoder;
pub mod error;
pub mod playback;
pub mod pool;
pub mod preload;
pub mod sim;

pub use config::PoolConfig;
pub use error::{Error, Result};
pub use playback::{FeedDeps, FeedOptions, PlaybackCoordinator};
pub use pool::SharedPool;
pub use preload::PreloadScheduler;
