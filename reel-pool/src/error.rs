//! Error types for reel-pool
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use crate::decoder::DecoderError;
use reel_common::VideoId;
use thiserror::Error;

/// Main error type for reel-pool
#[derive(Error, Debug)]
pub enum Error {
    /// Decoder collaborator failure
    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    /// Handle exists but has not finished initialization
    #[error("Handle not initialized: {0}")]
    NotInitialized(VideoId),

    /// Handle was disposed; it must not be played, paused or seeked
    #[error("Handle disposed: {0}")]
    Disposed(VideoId),

    /// No handle for this identity in the shared pool
    #[error("Handle not resident: {0}")]
    NotResident(VideoId),

    /// Index outside the displayed list
    #[error("Unknown index: {0}")]
    UnknownIndex(usize),

    /// Slot state machine rejected an event
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Feed was disposed
    #[error("Feed disposed")]
    FeedDisposed,

    /// Errors from the common crate (config loading, IO)
    #[error(transparent)]
    Common(#[from] reel_common::Error),
}

/// Convenience Result type using reel-pool Error
pub type Result<T> = std::result::Result<T, Error>;
