//! Decoder handle
//!
//! Wraps one opened `Decoder` together with the flags the pool tracks for it.
//! A handle lives in exactly one place at a time (a shared pool slot, or the
//! preload task that is still initializing it); it is moved, never cloned.
//!
//! Every decoder operation goes through `ensure_usable`, so a disposed or
//! uninitialized handle is never asked to play, pause or seek.

use crate::decoder::{Decoder, StreamFormat};
use crate::error::{Error, Result};
use reel_common::{FeedId, VideoId};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Read-only view of a handle
#[derive(Debug, Clone, PartialEq)]
pub struct HandleSnapshot {
    pub video_id: VideoId,
    pub initialized: bool,
    pub disposed: bool,
    pub playing: bool,
    pub priming: bool,
    pub primed: bool,
    pub buffering: bool,
    pub volume: f32,
    pub last_index: usize,
    pub owner: FeedId,
    pub format: StreamFormat,
    pub position: Duration,
    pub duration: Option<Duration>,
    pub last_accessed: Instant,
}

/// One opened media resource plus pool bookkeeping
pub struct DecoderHandle {
    video_id: VideoId,
    decoder: Box<dyn Decoder>,
    format: StreamFormat,
    owner: FeedId,
    initialized: bool,
    disposed: bool,
    /// Audible playback
    playing: bool,
    /// Token of the priming run in progress (muted playback)
    priming: Option<u64>,
    /// First frame has been decoded onto the surface
    primed: bool,
    buffering: bool,
    volume: f32,
    last_index: usize,
    last_accessed: Instant,
    access_seq: u64,
}

impl std::fmt::Debug for DecoderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderHandle")
            .field("video_id", &self.video_id)
            .field("initialized", &self.initialized)
            .field("disposed", &self.disposed)
            .field("playing", &self.playing)
            .field("priming", &self.priming)
            .field("last_index", &self.last_index)
            .finish()
    }
}

impl DecoderHandle {
    /// Wrap a freshly opened (not yet initialized) decoder
    pub fn new(
        video_id: VideoId,
        decoder: Box<dyn Decoder>,
        format: StreamFormat,
        owner: FeedId,
        index: usize,
    ) -> Self {
        Self {
            video_id,
            decoder,
            format,
            owner,
            initialized: false,
            disposed: false,
            playing: false,
            priming: None,
            primed: false,
            buffering: false,
            volume: 1.0,
            last_index: index,
            last_accessed: Instant::now(),
            access_seq: 0,
        }
    }

    pub fn video_id(&self) -> &VideoId {
        &self.video_id
    }

    pub fn owner(&self) -> FeedId {
        self.owner
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub fn priming_token(&self) -> Option<u64> {
        self.priming
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn last_index(&self) -> usize {
        self.last_index
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    pub(crate) fn access_seq(&self) -> u64 {
        self.access_seq
    }

    /// Decoder clock (zero once disposed)
    pub fn position(&self) -> Duration {
        if self.disposed {
            return Duration::ZERO;
        }
        self.decoder.position()
    }

    pub fn duration(&self) -> Option<Duration> {
        if self.disposed {
            return None;
        }
        self.decoder.duration()
    }

    /// Live buffering state straight from the decoder
    pub fn decoder_buffering(&self) -> bool {
        !self.disposed && self.decoder.is_buffering()
    }

    /// Mark initialization complete
    pub(crate) fn mark_initialized(&mut self, volume: f32) {
        self.initialized = true;
        self.volume = volume;
    }

    /// Mutable access for the initialization sequence
    pub(crate) fn decoder_mut(&mut self) -> &mut dyn Decoder {
        self.decoder.as_mut()
    }

    /// Record an access for LRU ordering
    pub(crate) fn touch(&mut self, seq: u64) {
        self.last_accessed = Instant::now();
        self.access_seq = seq;
    }

    pub(crate) fn set_last_index(&mut self, index: usize) {
        self.last_index = index;
    }

    /// Returns true when the flag changed
    pub(crate) fn set_buffering(&mut self, buffering: bool) -> bool {
        let changed = self.buffering != buffering;
        self.buffering = buffering;
        changed
    }

    pub(crate) fn set_primed(&mut self) {
        self.primed = true;
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed(self.video_id.clone()));
        }
        if !self.initialized {
            return Err(Error::NotInitialized(self.video_id.clone()));
        }
        Ok(())
    }

    /// Start audible playback at the given volume
    pub(crate) async fn play(&mut self, volume: f32) -> Result<()> {
        self.ensure_usable()?;
        self.priming = None;
        self.decoder.set_volume(volume).await?;
        self.volume = volume;
        self.decoder.play().await?;
        self.playing = true;
        self.primed = true;
        Ok(())
    }

    /// Pause; returns whether the handle had been audibly playing
    pub(crate) async fn pause(&mut self) -> Result<bool> {
        self.ensure_usable()?;
        let was_playing = self.playing;
        self.decoder.pause().await?;
        self.playing = false;
        Ok(was_playing)
    }

    pub(crate) async fn seek(&mut self, position: Duration) -> Result<()> {
        self.ensure_usable()?;
        self.decoder.seek(position).await?;
        Ok(())
    }

    /// Start muted playback from a minimal offset to pull the first frame
    pub(crate) async fn start_priming(&mut self, token: u64, seek_to: Duration) -> Result<()> {
        self.ensure_usable()?;
        self.decoder.set_volume(0.0).await?;
        self.decoder.seek(seek_to).await?;
        self.decoder.play().await?;
        self.priming = Some(token);
        Ok(())
    }

    /// Stop muted playback and restore volume
    pub(crate) async fn stop_priming(&mut self, restore_volume: f32) -> Result<()> {
        self.ensure_usable()?;
        self.priming = None;
        self.decoder.pause().await?;
        self.decoder.set_volume(restore_volume).await?;
        self.volume = restore_volume;
        Ok(())
    }

    /// Release the decoder; idempotent
    pub(crate) async fn dispose(&mut self) {
        if self.disposed {
            warn!("Handle {} disposed twice, ignoring", self.video_id);
            return;
        }
        debug!("Disposing decoder handle {}", self.video_id);
        self.playing = false;
        self.priming = None;
        self.disposed = true;
        self.decoder.dispose().await;
    }

    pub fn snapshot(&self) -> HandleSnapshot {
        HandleSnapshot {
            video_id: self.video_id.clone(),
            initialized: self.initialized,
            disposed: self.disposed,
            playing: self.playing,
            priming: self.priming.is_some(),
            primed: self.primed,
            buffering: self.buffering,
            volume: self.volume,
            last_index: self.last_index,
            owner: self.owner,
            format: self.format,
            position: self.position(),
            duration: self.duration(),
            last_accessed: self.last_accessed,
        }
    }
}
