//! # Reel Common Library
//!
//! Shared code for every feed surface that uses the decoder pool:
//! - Identity types (`VideoId`, `FeedId`)
//! - Event types (`PoolEvent` enum) and the process-wide `EventBus`
//! - Bootstrap configuration loading (TOML + pool tuning defaults)
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod ids;

pub use error::{Error, Result};
pub use ids::{FeedId, VideoId};
