//! Collaborator interfaces
//!
//! The pool never talks to a media framework or the network directly. It
//! consumes four seams:
//! - `UrlResolver` picks a playable URL for a feed item (metadata service)
//! - `DecoderBackend` opens a decoder for a URL
//! - `Decoder` is one opened media resource
//! - `ViewTracker` receives start/stop notifications for analytics
//!
//! Per-decoder notifications (buffering, position, end of stream) arrive on a
//! channel taken once from the decoder, never through registered callbacks.

use async_trait::async_trait;
use reel_common::VideoId;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Container format of a playable URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// Single progressive file (e.g. MP4)
    Progressive,
    /// Segmented stream (e.g. HLS); slower to negotiate
    Segmented,
}

/// URL the decoder should open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayableUrl {
    pub url: String,
    pub format: StreamFormat,
}

/// One entry of the displayed video list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub video_id: VideoId,
    pub uploader_id: String,
    pub progressive_url: Option<String>,
    pub segmented_url: Option<String>,
}

impl FeedItem {
    /// Item with only a progressive URL
    pub fn progressive(video_id: impl Into<VideoId>, uploader_id: &str, url: &str) -> Self {
        Self {
            video_id: video_id.into(),
            uploader_id: uploader_id.to_string(),
            progressive_url: Some(url.to_string()),
            segmented_url: None,
        }
    }
}

/// Errors reported by decoder collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecoderError {
    /// Decoder could not allocate its resources
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// URL rejected by the server
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Operation did not complete in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// Operation attempted on a released decoder
    #[error("decoder disposed")]
    Disposed,

    /// Anything else the platform reports
    #[error("{0}")]
    Other(String),
}

/// Notifications a decoder pushes to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    Buffering(bool),
    Position(Duration),
    Ended,
    Error(String),
}

/// One opened media resource
///
/// Implementations must tolerate `dispose` being called once; every other
/// method is only invoked on an initialized, undisposed decoder.
#[async_trait]
pub trait Decoder: Send {
    /// Complete setup (network negotiation, first buffers)
    async fn initialize(&mut self) -> Result<(), DecoderError>;

    async fn play(&mut self) -> Result<(), DecoderError>;

    async fn pause(&mut self) -> Result<(), DecoderError>;

    async fn seek(&mut self, position: Duration) -> Result<(), DecoderError>;

    /// Volume in 0.0..=1.0
    async fn set_volume(&mut self, volume: f32) -> Result<(), DecoderError>;

    async fn set_looping(&mut self, looping: bool) -> Result<(), DecoderError>;

    fn position(&self) -> Duration;

    /// Total duration, once known
    fn duration(&self) -> Option<Duration>;

    fn is_buffering(&self) -> bool;

    /// Take the notification channel (returns None after the first call)
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DecoderEvent>>;

    /// Release the underlying resource
    async fn dispose(&mut self);
}

/// Opens decoders
#[async_trait]
pub trait DecoderBackend: Send + Sync {
    async fn open(&self, url: &PlayableUrl) -> Result<Box<dyn Decoder>, DecoderError>;
}

/// Metadata service that picks the URL to play for an item
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve_playable_url(&self, item: &FeedItem) -> Result<PlayableUrl, DecoderError>;
}

/// Analytics hooks for the current index
pub trait ViewTracker: Send + Sync {
    fn start_view_tracking(&self, video_id: &VideoId, uploader_id: &str);
    fn stop_view_tracking(&self, video_id: &VideoId);
}

/// View tracker that drops every notification
#[derive(Debug, Default)]
pub struct NoopViewTracker;

impl ViewTracker for NoopViewTracker {
    fn start_view_tracking(&self, _video_id: &VideoId, _uploader_id: &str) {}
    fn stop_view_tracking(&self, _video_id: &VideoId) {}
}

/// Resolver that reads URLs straight from the item
///
/// Prefers the segmented stream when the item carries one.
#[derive(Debug, Default)]
pub struct ItemUrlResolver;

#[async_trait]
impl UrlResolver for ItemUrlResolver {
    async fn resolve_playable_url(&self, item: &FeedItem) -> Result<PlayableUrl, DecoderError> {
        if let Some(url) = item.segmented_url.as_ref().filter(|u| !u.is_empty()) {
            return Ok(PlayableUrl {
                url: url.clone(),
                format: StreamFormat::Segmented,
            });
        }
        if let Some(url) = item.progressive_url.as_ref().filter(|u| !u.is_empty()) {
            return Ok(PlayableUrl {
                url: url.clone(),
                format: StreamFormat::Progressive,
            });
        }
        Err(DecoderError::Http {
            status: 404,
            message: format!("no playable URL for {}", item.video_id),
        })
    }
}
