//! Shared decoder pool
//!
//! Process-wide owner of every initialized decoder handle, keyed by video
//! identity so independent feed instances can reuse each other's decoders.
//!
//! **Responsibilities:**
//! - Single source of truth for handle ownership (one mutex, all mutations serialized)
//! - Eviction after every mutation (distance + LRU, see `eviction`)
//! - Playback primitives that uphold the single-audible-handle rule
//! - First-frame priming primitives (muted playback with cancellation tokens)
//! - Global cap on concurrent cold initializations (semaphore)
//! - Per-identity init claims, so two feeds never cold-open the same video
//!
//! Lock ordering: callers may hold a feed lock while calling in here; this
//! module never calls back into a feed.

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::pool::eviction::{self, Eviction, EvictionCandidate};
use crate::pool::handle::{DecoderHandle, HandleSnapshot};
use reel_common::events::{EventBus, EvictionReason, PoolEvent};
use reel_common::{FeedId, VideoId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Pool statistics for monitoring reuse
#[derive(Debug, Default)]
pub struct PoolStats {
    instant_hits: AtomicU64,
    instant_misses: AtomicU64,
    evictions: AtomicU64,
    disposals: AtomicU64,
}

/// Point-in-time copy of `PoolStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatsSnapshot {
    pub instant_hits: u64,
    pub instant_misses: u64,
    pub evictions: u64,
    pub disposals: u64,
}

impl PoolStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.instant_hits + self.instant_misses;
        if total == 0 {
            0.0
        } else {
            self.instant_hits as f64 / total as f64
        }
    }
}

impl PoolStats {
    fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            instant_hits: self.instant_hits.load(Ordering::Relaxed),
            instant_misses: self.instant_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            disposals: self.disposals.load(Ordering::Relaxed),
        }
    }
}

/// Result of one priming poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimingPoll {
    /// Token no longer current (cancelled, played, or evicted)
    Cancelled,
    /// Still buffering or clock not moving yet
    Pending,
    /// First frame is on the surface
    FrameReady,
}

/// Index the most recently active feed is focused on
#[derive(Debug, Clone)]
struct Focus {
    index: usize,
    video_id: Option<VideoId>,
}

struct PoolState {
    handles: HashMap<VideoId, DecoderHandle>,
    focus: Option<Focus>,
}

/// Process-wide decoder cache
pub struct SharedPool {
    state: Mutex<PoolState>,
    bus: EventBus,
    init_permits: Arc<Semaphore>,
    /// Identities with a cold init running, across all feeds
    init_claims: SyncMutex<HashSet<VideoId>>,
    stats: PoolStats,
    access_seq: AtomicU64,
    priming_seq: AtomicU64,
    keep_range: usize,
    max_pool_size: usize,
    default_volume: f32,
    priming_seek: Duration,
}

impl SharedPool {
    pub fn new(config: &PoolConfig, bus: EventBus) -> Arc<Self> {
        info!(
            "Shared decoder pool created: keep_range={}, max_pool_size={}, max_concurrent_inits={}",
            config.keep_range, config.max_pool_size, config.max_concurrent_inits
        );
        Arc::new(Self {
            state: Mutex::new(PoolState {
                handles: HashMap::new(),
                focus: None,
            }),
            bus,
            init_permits: Arc::new(Semaphore::new(config.max_concurrent_inits)),
            init_claims: SyncMutex::new(HashSet::new()),
            stats: PoolStats::default(),
            access_seq: AtomicU64::new(0),
            priming_seq: AtomicU64::new(0),
            keep_range: config.keep_range,
            max_pool_size: config.max_pool_size,
            default_volume: config.default_volume,
            priming_seek: config.priming_seek,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Permits bounding concurrent cold initializations across all feeds
    pub fn init_permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.init_permits)
    }

    fn claims(&self) -> std::sync::MutexGuard<'_, HashSet<VideoId>> {
        self.init_claims.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the cold init of `video_id`; false if some feed already holds it
    ///
    /// Synchronous so a caller can claim before its first suspension point.
    pub fn try_claim_init(&self, video_id: &VideoId) -> bool {
        self.claims().insert(video_id.clone())
    }

    /// Release a claim once the handle is registered or the init failed
    pub fn release_init(&self, video_id: &VideoId) {
        self.claims().remove(video_id);
    }

    pub fn is_initializing(&self, video_id: &VideoId) -> bool {
        self.claims().contains(video_id)
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    fn next_seq(&self) -> u64 {
        self.access_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up a handle (records an access)
    pub async fn get(&self, video_id: &VideoId) -> Option<HandleSnapshot> {
        let mut state = self.state.lock().await;
        let seq = self.next_seq();
        state.handles.get_mut(video_id).map(|h| {
            h.touch(seq);
            h.snapshot()
        })
    }

    /// Look up a handle that can start playing immediately
    ///
    /// Returns None unless the handle is initialized and not disposed.
    pub async fn get_for_instant_play(&self, video_id: &VideoId) -> Option<HandleSnapshot> {
        let mut state = self.state.lock().await;
        let seq = self.next_seq();
        match state.handles.get_mut(video_id) {
            Some(h) if h.is_initialized() && !h.is_disposed() => {
                h.touch(seq);
                self.stats.instant_hits.fetch_add(1, Ordering::Relaxed);
                Some(h.snapshot())
            }
            _ => {
                self.stats.instant_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Residency check without touching LRU order
    pub async fn contains(&self, video_id: &VideoId) -> bool {
        self.state.lock().await.handles.contains_key(video_id)
    }

    /// Insert a handle
    ///
    /// With `skip_dispose_old == false` any existing handle for the same
    /// identity is disposed first. With `true` the displaced handle is handed
    /// back to the caller, who then owns its disposal.
    pub async fn put(&self, mut handle: DecoderHandle, skip_dispose_old: bool) -> Option<DecoderHandle> {
        let mut state = self.state.lock().await;
        let video_id = handle.video_id().clone();
        handle.touch(self.next_seq());

        let displaced = state.handles.remove(&video_id);
        let returned = match displaced {
            Some(mut old) if !skip_dispose_old => {
                debug!("Replacing resident handle for {}", video_id);
                self.dispose_handle(&mut old, EvictionReason::Replaced).await;
                None
            }
            other => other,
        };

        state.handles.insert(video_id.clone(), handle);
        debug!("Registered handle {} (pool size {})", video_id, state.handles.len());
        self.enforce_bounds(&mut state).await;
        returned
    }

    /// Remove without disposing (ownership moves to the caller)
    pub async fn take(&self, video_id: &VideoId) -> Option<DecoderHandle> {
        self.state.lock().await.handles.remove(video_id)
    }

    /// Dispose and remove; returns whether a handle was resident
    pub async fn remove(&self, video_id: &VideoId) -> bool {
        let mut state = self.state.lock().await;
        self.evict(&mut state, video_id, EvictionReason::Removed).await
    }

    /// Dispose handles further than `keep_range` from `current_index`
    ///
    /// The audibly playing handle is kept regardless of distance.
    pub async fn cleanup_distant(&self, current_index: usize, keep_range: usize) -> Vec<VideoId> {
        let mut state = self.state.lock().await;
        let far: Vec<VideoId> = state
            .handles
            .values()
            .filter(|h| !h.is_playing() && h.last_index().abs_diff(current_index) > keep_range)
            .map(|h| h.video_id().clone())
            .collect();
        for video_id in &far {
            self.evict(&mut state, video_id, EvictionReason::Distance).await;
        }
        far
    }

    /// Dispose everything
    pub async fn clear_all(&self) {
        let mut state = self.state.lock().await;
        let all: Vec<VideoId> = state.handles.keys().cloned().collect();
        info!("Clearing shared pool ({} handles)", all.len());
        for video_id in &all {
            self.evict(&mut state, video_id, EvictionReason::Removed).await;
        }
        state.focus = None;
    }

    /// Report the index a feed settled on; runs eviction
    pub async fn set_focus(&self, index: usize, video_id: Option<VideoId>) -> Vec<Eviction> {
        let mut state = self.state.lock().await;
        state.focus = Some(Focus { index, video_id });
        self.enforce_bounds(&mut state).await
    }

    /// Record that `video_id` is displayed at `index`; runs eviction
    pub async fn bind(&self, video_id: &VideoId, index: usize) -> bool {
        let mut state = self.state.lock().await;
        let seq = self.next_seq();
        let Some(handle) = state.handles.get_mut(video_id) else {
            return false;
        };
        handle.set_last_index(index);
        handle.touch(seq);
        self.enforce_bounds(&mut state).await;
        state.handles.contains_key(video_id)
    }

    /// Free memory ahead of an out-of-memory retry
    ///
    /// Keeps only the focused index, the one after it, and the playing handle.
    pub async fn relieve_pressure(&self) -> usize {
        let mut state = self.state.lock().await;
        let focus = state.focus.as_ref().map(|f| f.index);
        let victims: Vec<VideoId> = state
            .handles
            .values()
            .filter(|h| !h.is_playing())
            .filter(|h| match focus {
                Some(f) => h.last_index() != f && h.last_index() != f + 1,
                None => true,
            })
            .map(|h| h.video_id().clone())
            .collect();
        if !victims.is_empty() {
            warn!("Memory pressure: releasing {} decoder handles", victims.len());
        }
        for video_id in &victims {
            self.evict(&mut state, video_id, EvictionReason::MemoryPressure).await;
        }
        victims.len()
    }

    /// Start audible playback of one handle
    ///
    /// Every other playing handle is paused first, under the same lock, so
    /// two handles are never audible together. Returns the handles paused.
    pub async fn play_exclusive(&self, video_id: &VideoId) -> Result<Vec<VideoId>> {
        let mut state = self.state.lock().await;
        if !state.handles.contains_key(video_id) {
            return Err(Error::NotResident(video_id.clone()));
        }

        let mut paused = Vec::new();
        for (id, handle) in state.handles.iter_mut() {
            if id != video_id && handle.is_playing() {
                match handle.pause().await {
                    Ok(_) => paused.push(id.clone()),
                    Err(e) => warn!("Failed to pause {} before playing {}: {}", id, video_id, e),
                }
            }
        }

        let seq = self.next_seq();
        let handle = state
            .handles
            .get_mut(video_id)
            .ok_or_else(|| Error::NotResident(video_id.clone()))?;
        handle.play(self.default_volume).await?;
        handle.touch(seq);
        debug!("▶️  Playing {} (paused {} others)", video_id, paused.len());
        Ok(paused)
    }

    /// Pause one handle; returns whether it had been playing
    pub async fn pause(&self, video_id: &VideoId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let handle = state
            .handles
            .get_mut(video_id)
            .ok_or_else(|| Error::NotResident(video_id.clone()))?;
        handle.pause().await
    }

    /// Pause every playing handle and stop every priming run
    pub async fn pause_all(&self) -> Vec<VideoId> {
        let mut state = self.state.lock().await;
        let mut paused = Vec::new();
        for (id, handle) in state.handles.iter_mut() {
            if handle.priming_token().is_some() {
                if let Err(e) = handle.stop_priming(self.default_volume).await {
                    warn!("Failed to stop priming {}: {}", id, e);
                }
            }
            if handle.is_playing() {
                match handle.pause().await {
                    Ok(_) => paused.push(id.clone()),
                    Err(e) => warn!("Failed to pause {}: {}", id, e),
                }
            }
        }
        paused
    }

    /// Seek by a signed offset, clamped to the media bounds
    pub async fn seek_relative(&self, video_id: &VideoId, offset_ms: i64) -> Result<Duration> {
        let mut state = self.state.lock().await;
        let handle = state
            .handles
            .get_mut(video_id)
            .ok_or_else(|| Error::NotResident(video_id.clone()))?;

        let current = handle.position();
        let offset = Duration::from_millis(offset_ms.unsigned_abs());
        let mut target = if offset_ms < 0 {
            current.saturating_sub(offset)
        } else {
            current + offset
        };
        if let Some(duration) = handle.duration() {
            target = target.min(duration);
        }
        handle.seek(target).await?;
        Ok(target)
    }

    /// Update the buffering flag from decoder notifications
    pub async fn set_buffering(&self, video_id: &VideoId, buffering: bool) -> bool {
        let mut state = self.state.lock().await;
        state
            .handles
            .get_mut(video_id)
            .map(|h| h.set_buffering(buffering))
            .unwrap_or(false)
    }

    /// Begin muted first-frame acquisition
    ///
    /// Returns the priming token, or None when the handle does not need
    /// priming (already primed, playing, or priming).
    pub async fn begin_priming(&self, video_id: &VideoId) -> Result<Option<u64>> {
        let mut state = self.state.lock().await;
        let handle = state
            .handles
            .get_mut(video_id)
            .ok_or_else(|| Error::NotResident(video_id.clone()))?;
        if handle.is_primed() || handle.is_playing() || handle.priming_token().is_some() {
            return Ok(None);
        }
        let token = self.priming_seq.fetch_add(1, Ordering::Relaxed) + 1;
        handle.start_priming(token, self.priming_seek).await?;
        debug!("Priming {} (token {})", video_id, token);
        Ok(Some(token))
    }

    /// Check priming progress; never mutates the handle
    pub async fn poll_priming(&self, video_id: &VideoId, token: u64) -> PrimingPoll {
        let state = self.state.lock().await;
        match state.handles.get(video_id) {
            Some(h) if h.priming_token() == Some(token) => {
                if h.position() > Duration::ZERO && !h.decoder_buffering() {
                    PrimingPoll::FrameReady
                } else {
                    PrimingPoll::Pending
                }
            }
            _ => PrimingPoll::Cancelled,
        }
    }

    /// Complete priming if `token` is still current: pause and restore volume
    pub async fn finish_priming(&self, video_id: &VideoId, token: u64) -> bool {
        let mut state = self.state.lock().await;
        let Some(handle) = state.handles.get_mut(video_id) else {
            return false;
        };
        if handle.priming_token() != Some(token) {
            return false;
        }
        match handle.stop_priming(self.default_volume).await {
            Ok(()) => {
                handle.set_primed();
                true
            }
            Err(e) => {
                warn!("Failed to finish priming {}: {}", video_id, e);
                false
            }
        }
    }

    /// Abort priming (pause and restore volume); returns whether it was priming
    ///
    /// With `token` set, only that priming run is aborted.
    pub async fn cancel_priming(&self, video_id: &VideoId, token: Option<u64>) -> bool {
        let mut state = self.state.lock().await;
        let Some(handle) = state.handles.get_mut(video_id) else {
            return false;
        };
        match (handle.priming_token(), token) {
            (None, _) => return false,
            (Some(current), Some(expected)) if current != expected => return false,
            _ => {}
        }
        if let Err(e) = handle.stop_priming(self.default_volume).await {
            warn!("Failed to cancel priming {}: {}", video_id, e);
        }
        true
    }

    /// Dispose every handle a feed created (drop-on-dispose policy)
    pub async fn dispose_owned_by(&self, owner: FeedId) -> usize {
        let mut state = self.state.lock().await;
        let owned: Vec<VideoId> = state
            .handles
            .values()
            .filter(|h| h.owner() == owner)
            .map(|h| h.video_id().clone())
            .collect();
        for video_id in &owned {
            self.evict(&mut state, video_id, EvictionReason::FeedDisposed).await;
        }
        if !owned.is_empty() {
            info!("Disposed {} handles owned by feed {}", owned.len(), owner);
        }
        owned.len()
    }

    pub async fn snapshot(&self, video_id: &VideoId) -> Option<HandleSnapshot> {
        self.state.lock().await.handles.get(video_id).map(|h| h.snapshot())
    }

    pub async fn snapshot_all(&self) -> Vec<HandleSnapshot> {
        let state = self.state.lock().await;
        let mut all: Vec<HandleSnapshot> = state.handles.values().map(|h| h.snapshot()).collect();
        all.sort_by_key(|s| s.last_index);
        all
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.handles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.handles.is_empty()
    }

    pub async fn playing_count(&self) -> usize {
        let state = self.state.lock().await;
        state.handles.values().filter(|h| h.is_playing()).count()
    }

    /// Run the eviction policy against the current focus
    async fn enforce_bounds(&self, state: &mut PoolState) -> Vec<Eviction> {
        let (current, keep_range, pinned) = match &state.focus {
            Some(f) => (f.index, self.keep_range, f.video_id.clone()),
            // No feed has settled yet: size bound only
            None => (0, usize::MAX, None),
        };

        let candidates: Vec<EvictionCandidate> = state
            .handles
            .values()
            .map(|h| EvictionCandidate {
                video_id: h.video_id().clone(),
                index: h.last_index(),
                last_accessed: h.last_accessed(),
                access_seq: h.access_seq(),
                playing: h.is_playing(),
                pinned: pinned.as_ref() == Some(h.video_id()),
            })
            .collect();

        let selection = eviction::select(&candidates, current, keep_range, self.max_pool_size);
        for eviction in &selection {
            debug!(
                "Evicting {} ({:?}, focus index {})",
                eviction.video_id, eviction.reason, current
            );
            self.evict(state, &eviction.video_id, eviction.reason).await;
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        selection
    }

    async fn evict(&self, state: &mut PoolState, video_id: &VideoId, reason: EvictionReason) -> bool {
        match state.handles.remove(video_id) {
            Some(mut handle) => {
                self.dispose_handle(&mut handle, reason).await;
                true
            }
            None => false,
        }
    }

    async fn dispose_handle(&self, handle: &mut DecoderHandle, reason: EvictionReason) {
        handle.dispose().await;
        self.stats.disposals.fetch_add(1, Ordering::Relaxed);
        self.bus.emit(PoolEvent::HandleEvicted {
            video_id: handle.video_id().clone(),
            reason,
        });
    }
}
