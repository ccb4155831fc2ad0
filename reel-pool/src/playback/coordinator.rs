//! Playback coordinator
//!
//! One coordinator per feed instance (a screen showing a vertical video
//! list). It is the only component that starts audible playback.
//!
//! **Responsibilities:**
//! - Debounced page changes; the settled index runs
//!   pause-all → acquire-or-preload → autoplay gate → play
//! - Single-active-video rule: every other handle is paused before one plays
//! - Autoplay gating (lifecycle, manual pause, visibility/entry point)
//! - First-frame priming for the current and next index, with a fallback
//!   timer that forces the surface to mount
//! - Lifecycle and sign-in transitions
//! - Disposal policy parameterised by `opened_from_profile`
//!
//! **Concurrency:** feed state sits behind one async mutex. Background work
//! (inits, retries, priming, timers) reports back over a `FeedSignal`
//! channel; shared-pool notifications, including inits another feed ran for
//! an identity this feed is waiting on, arrive on the event bus. Both loops
//! hold only a `Weak` reference and stop on the feed's cancellation token.
//! Lock order is feed state, then shared pool.

use crate::config::PoolConfig;
use crate::decoder::{DecoderBackend, FeedItem, UrlResolver, ViewTracker};
use crate::error::{Error, Result};
use crate::playback::debounce::PageDebouncer;
use crate::playback::gating::{DenyReason, GateDecision, PlayTrigger, PlaybackContext};
use crate::playback::lifecycle::{self, LifecycleAction, LifecycleSignal};
use crate::playback::priming::{self, PrimingRun};
use crate::playback::signals::{FeedSignal, PrimingOutcome};
use crate::playback::slot::{SlotEvent, SlotState};
use crate::pool::{LocalPool, SharedPool};
use crate::preload::{PreloadOutcome, PreloadScheduler};
use reel_common::events::{FailureClass, LifecycleState, PlaybackState, PoolEvent};
use reel_common::{FeedId, VideoId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the feed was opened and what the UI shows initially
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOptions {
    /// Opened from a profile grid; handles are dropped on dispose
    pub opened_from_profile: bool,
    pub opened_from_deep_link: bool,
    pub feed_tab_active: bool,
    pub screen_visible: bool,
    pub initial_index: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            opened_from_profile: false,
            opened_from_deep_link: false,
            feed_tab_active: true,
            screen_visible: true,
            initial_index: 0,
        }
    }
}

/// Collaborators a feed needs
#[derive(Clone)]
pub struct FeedDeps {
    pub shared: Arc<SharedPool>,
    pub backend: Arc<dyn DecoderBackend>,
    pub resolver: Arc<dyn UrlResolver>,
    pub tracker: Arc<dyn ViewTracker>,
}

struct FeedState {
    local: LocalPool,
    context: PlaybackContext,
    lifecycle: LifecycleState,
    debouncer: PageDebouncer,
    /// index → (identity, token) of priming runs this feed started
    priming: HashMap<usize, (VideoId, u64)>,
    /// Identity whose view is being tracked
    tracked: Option<VideoId>,
    signed_in: bool,
    sign_in_autoplay_pending: bool,
    disposed: bool,
}

/// Per-feed playback coordinator
pub struct PlaybackCoordinator {
    feed_id: FeedId,
    config: PoolConfig,
    opened_from_profile: bool,
    shared: Arc<SharedPool>,
    scheduler: PreloadScheduler,
    tracker: Arc<dyn ViewTracker>,
    state: Mutex<FeedState>,
    signals: mpsc::UnboundedSender<FeedSignal>,
    cancel: CancellationToken,
}

impl PlaybackCoordinator {
    /// Create a feed and start its background loops
    ///
    /// Must be called within a tokio runtime. Nothing plays until the first
    /// `on_page_settled`.
    pub fn new(config: PoolConfig, deps: FeedDeps, items: Vec<FeedItem>, options: FeedOptions) -> Arc<Self> {
        let feed_id = FeedId::generate();
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pool_events = deps.shared.bus().subscribe();

        let scheduler = PreloadScheduler::new(
            feed_id,
            Arc::clone(&deps.shared),
            deps.backend,
            deps.resolver,
            config.clone(),
            signals.clone(),
            cancel.clone(),
        );

        let mut context = PlaybackContext::new(options.opened_from_profile, options.opened_from_deep_link);
        context.current_index = options.initial_index;
        context.feed_tab_active = options.feed_tab_active;
        context.is_screen_visible = options.screen_visible;

        info!(
            "Feed {} created: {} items, profile={}, deep_link={}",
            feed_id,
            items.len(),
            options.opened_from_profile,
            options.opened_from_deep_link
        );

        let coordinator = Arc::new(Self {
            feed_id,
            config,
            opened_from_profile: options.opened_from_profile,
            shared: deps.shared,
            scheduler,
            tracker: deps.tracker,
            state: Mutex::new(FeedState {
                local: LocalPool::new(feed_id, items),
                context,
                lifecycle: LifecycleState::Foreground,
                debouncer: PageDebouncer::new(),
                priming: HashMap::new(),
                tracked: None,
                signed_in: false,
                sign_in_autoplay_pending: false,
                disposed: false,
            }),
            signals,
            cancel: cancel.clone(),
        });

        tokio::spawn(signal_loop(Arc::downgrade(&coordinator), signal_rx, cancel.clone()));
        tokio::spawn(pool_event_loop(Arc::downgrade(&coordinator), pool_events, cancel));
        coordinator
    }

    pub fn feed_id(&self) -> FeedId {
        self.feed_id
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &PreloadScheduler {
        &self.scheduler
    }

    // ========================================================================
    // Page changes
    // ========================================================================

    /// Scroll position changed; settles after the debounce window
    pub async fn on_page_changed(&self, index: usize) {
        let ticket = {
            let mut state = self.state.lock().await;
            if state.disposed {
                return;
            }
            // Priming outside the new [index, index + 1] window stops now
            let stale: Vec<(usize, VideoId, u64)> = state
                .priming
                .iter()
                .filter(|(i, _)| **i < index || **i > index + 1)
                .map(|(i, (id, token))| (*i, id.clone(), *token))
                .collect();
            for (i, video_id, token) in stale {
                state.priming.remove(&i);
                self.shared.cancel_priming(&video_id, Some(token)).await;
                if state.local.state(i) == SlotState::Priming {
                    let _ = state.local.apply(i, SlotEvent::PrimingCancelled);
                }
            }
            state.debouncer.schedule(index)
        };
        debug!("Feed {}: page change to {} (ticket {})", self.feed_id, index, ticket);
        self.spawn_timer(self.config.debounce, FeedSignal::DebounceElapsed { ticket });
    }

    /// Scroll came to rest on `index`; settles immediately
    pub async fn on_page_settled(&self, index: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        state.debouncer.cancel();
        self.settle(&mut state, index).await
    }

    async fn settle(&self, state: &mut FeedState, index: usize) -> Result<()> {
        if state.disposed {
            return Err(Error::FeedDisposed);
        }
        let video_id = state.local.video_id(index).cloned().ok_or(Error::UnknownIndex(index))?;
        state.context.current_index = index;
        self.scheduler.set_focus(index);
        info!("📍 Feed {}: settled on index {} ({})", self.feed_id, index, video_id);
        self.shared.bus().emit(PoolEvent::PageSettled {
            feed_id: self.feed_id,
            index,
        });

        // Pause-before-play: nothing stays audible across a settle
        self.pause_everything(state).await;

        for eviction in self.shared.set_focus(index, Some(video_id)).await {
            self.forget(state, &eviction.video_id);
        }

        self.acquire_current(state, index).await?;
        self.fill_window(state, index).await;

        let played = self.try_play(state, index, PlayTrigger::Auto).await?;
        if !played {
            self.prime(state, index).await;
        }
        self.prime(state, index + 1).await;
        self.arm_surface_fallback(state, index);
        Ok(())
    }

    /// Attach the resident handle for the current index or open it now
    async fn acquire_current(&self, state: &mut FeedState, index: usize) -> Result<()> {
        if state.local.reconcile(index, &self.shared).await?.is_some() {
            return Ok(());
        }
        let item = state.local.item(index).cloned().ok_or(Error::UnknownIndex(index))?;

        if self.scheduler.is_in_flight(&item.video_id) {
            self.mark_initializing(state, index);
            return Ok(());
        }
        // On screen now: waiting out a backoff would leave it blank
        if self.scheduler.cancel_retry(index) {
            info!("Feed {}: index {} is on screen, skipping its backoff", self.feed_id, index);
        }
        match self.scheduler.open_on_demand(index, &item).await {
            PreloadOutcome::Started | PreloadOutcome::InFlight => self.mark_initializing(state, index),
            PreloadOutcome::AlreadyReady => {
                state.local.reconcile(index, &self.shared).await?;
            }
            other => debug!("Feed {}: on-demand open of {} -> {:?}", self.feed_id, index, other),
        }
        Ok(())
    }

    /// Request preloads for the forward window
    async fn fill_window(&self, state: &mut FeedState, index: usize) {
        let end = index + self.config.preload_window;
        for i in index + 1..=end {
            let Some(item) = state.local.item(i).cloned() else {
                break;
            };
            match state.local.reconcile(i, &self.shared).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    warn!("Feed {}: reconcile of index {} failed: {}", self.feed_id, i, e);
                    continue;
                }
            }
            match self.scheduler.request_preload(i, &item).await {
                PreloadOutcome::Started | PreloadOutcome::InFlight => self.mark_initializing(state, i),
                PreloadOutcome::AlreadyReady => {
                    let _ = state.local.reconcile(i, &self.shared).await;
                }
                outcome => debug!("Feed {}: preload of index {} -> {:?}", self.feed_id, i, outcome),
            }
        }
    }

    fn mark_initializing(&self, state: &mut FeedState, index: usize) {
        if state.local.state(index) == SlotState::Absent {
            let _ = state.local.apply(index, SlotEvent::InitStarted);
        }
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Gate, then play `index` after pausing every other handle
    async fn try_play(&self, state: &mut FeedState, index: usize, trigger: PlayTrigger) -> Result<bool> {
        if let GateDecision::Deny(reason) = state.context.autoplay_decision(index, trigger) {
            debug!("Feed {}: {:?} play of index {} denied: {:?}", self.feed_id, trigger, index, reason);
            return Ok(false);
        }
        if !state.local.state(index).is_resident() {
            debug!("Feed {}: index {} has no ready handle yet", self.feed_id, index);
            return Ok(false);
        }
        let video_id = state.local.video_id(index).cloned().ok_or(Error::UnknownIndex(index))?;

        state.priming.remove(&index);
        let paused = match self.shared.play_exclusive(&video_id).await {
            Ok(paused) => paused,
            Err(Error::NotResident(_)) => {
                state.local.drop_binding(&video_id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        for id in &paused {
            self.note_paused(state, id);
        }

        state.local.apply(index, SlotEvent::Play)?;
        self.emit_playback(index, &video_id, PlaybackState::Playing);
        if index == state.context.current_index {
            self.start_tracking(state, index, &video_id);
        }
        info!("▶️  Feed {}: playing index {} ({:?})", self.feed_id, index, trigger);
        Ok(true)
    }

    /// Pause every playing handle and abandon every priming run
    async fn pause_everything(&self, state: &mut FeedState) {
        for video_id in self.shared.pause_all().await {
            self.note_paused(state, &video_id);
        }
        for (index, _) in std::mem::take(&mut state.priming) {
            if state.local.state(index) == SlotState::Priming {
                let _ = state.local.apply(index, SlotEvent::PrimingCancelled);
            }
        }
    }

    async fn pause_index(&self, state: &mut FeedState, index: usize) {
        let Some(video_id) = state.local.video_id(index).cloned() else {
            return;
        };
        match self.shared.pause(&video_id).await {
            Ok(true) => self.note_paused(state, &video_id),
            Ok(false) => {}
            Err(e) => debug!("Feed {}: pause of index {} skipped: {}", self.feed_id, index, e),
        }
    }

    /// Reflect a pause the shared pool performed
    fn note_paused(&self, state: &mut FeedState, video_id: &VideoId) {
        if let Some(index) = state.local.index_of(video_id) {
            if state.local.state(index) == SlotState::Playing {
                let _ = state.local.apply(index, SlotEvent::Pause);
            }
            self.emit_playback(index, video_id, PlaybackState::Paused);
        }
        if state.tracked.as_ref() == Some(video_id) {
            self.tracker.stop_view_tracking(video_id);
            state.tracked = None;
        }
    }

    fn start_tracking(&self, state: &mut FeedState, index: usize, video_id: &VideoId) {
        if state.tracked.as_ref() == Some(video_id) {
            return;
        }
        if let Some(previous) = state.tracked.take() {
            self.tracker.stop_view_tracking(&previous);
        }
        let uploader = state.local.item(index).map(|i| i.uploader_id.as_str()).unwrap_or_default();
        self.tracker.start_view_tracking(video_id, uploader);
        state.tracked = Some(video_id.clone());
    }

    fn emit_playback(&self, index: usize, video_id: &VideoId, new_state: PlaybackState) {
        self.shared.bus().emit(PoolEvent::PlaybackStateChanged {
            feed_id: self.feed_id,
            index,
            video_id: video_id.clone(),
            new_state,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Explicit tap; returns whether the index is now playing
    pub async fn toggle_play_pause(&self, index: usize) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.disposed {
            return Err(Error::FeedDisposed);
        }
        let video_id = state.local.video_id(index).cloned().ok_or(Error::UnknownIndex(index))?;

        match self.shared.snapshot(&video_id).await {
            Some(snapshot) if snapshot.playing => {
                self.shared.pause(&video_id).await?;
                state.context.mark_user_paused(index);
                self.note_paused(&mut state, &video_id);
                info!("⏸️  Feed {}: user paused index {}", self.feed_id, index);
                Ok(false)
            }
            Some(snapshot) if snapshot.initialized => {
                state.context.clear_user_paused(index);
                state.local.reconcile(index, &self.shared).await?;
                self.try_play(&mut state, index, PlayTrigger::UserTap).await
            }
            _ => {
                // Not ready yet; autoplay takes over once it is
                state.context.clear_user_paused(index);
                Ok(false)
            }
        }
    }

    /// Seek by a signed offset; returns the clamped position
    pub async fn seek_relative(&self, index: usize, offset_ms: i64) -> Result<Duration> {
        let state = self.state.lock().await;
        if state.disposed {
            return Err(Error::FeedDisposed);
        }
        let video_id = state.local.video_id(index).cloned().ok_or(Error::UnknownIndex(index))?;
        self.shared.seek_relative(&video_id, offset_ms).await
    }

    // ========================================================================
    // Context changes
    // ========================================================================

    pub async fn on_visibility_changed(&self, visible: bool) {
        let mut state = self.state.lock().await;
        if state.disposed || state.context.is_screen_visible == visible {
            return;
        }
        state.context.is_screen_visible = visible;
        debug!("Feed {}: screen visible={}", self.feed_id, visible);
        self.reevaluate_visibility(&mut state).await;
    }

    pub async fn set_feed_tab_active(&self, active: bool) {
        let mut state = self.state.lock().await;
        if state.disposed || state.context.feed_tab_active == active {
            return;
        }
        state.context.feed_tab_active = active;
        debug!("Feed {}: tab active={}", self.feed_id, active);
        self.reevaluate_visibility(&mut state).await;
    }

    async fn reevaluate_visibility(&self, state: &mut FeedState) {
        let current = state.context.current_index;
        match state.context.autoplay_decision(current, PlayTrigger::Auto) {
            GateDecision::Allow => {
                if let Err(e) = self.try_play(state, current, PlayTrigger::Auto).await {
                    warn!("Feed {}: resume of index {} failed: {}", self.feed_id, current, e);
                }
            }
            GateDecision::Deny(DenyReason::NotVisible) => self.pause_index(state, current).await,
            GateDecision::Deny(_) => {}
        }
    }

    pub async fn on_lifecycle_changed(&self, signal: LifecycleSignal) {
        let mut state = self.state.lock().await;
        if state.disposed {
            return;
        }
        let old_state = state.lifecycle;
        let (new_state, actions) = lifecycle::transition(old_state, signal);
        state.lifecycle = new_state;
        if new_state != old_state {
            info!("Feed {}: lifecycle {:?} -> {:?}", self.feed_id, old_state, new_state);
            self.shared.bus().emit(PoolEvent::LifecycleChanged {
                feed_id: self.feed_id,
                old_state,
                new_state,
            });
        }

        for action in actions {
            match action {
                LifecycleAction::PauseAll => self.pause_everything(&mut state).await,
                LifecycleAction::MarkLifecyclePaused => state.context.is_lifecycle_paused = true,
                LifecycleAction::ClearLifecyclePaused => state.context.is_lifecycle_paused = false,
                LifecycleAction::ReevaluateCurrent => {
                    let current = state.context.current_index;
                    match self.try_play(&mut state, current, PlayTrigger::Auto).await {
                        Ok(true) => {}
                        Ok(false) => self.prime(&mut state, current).await,
                        Err(e) => warn!("Feed {}: resume of index {} failed: {}", self.feed_id, current, e),
                    }
                    self.prime(&mut state, current + 1).await;
                }
            }
        }
    }

    /// Sign-in arms one delayed autoplay attempt
    pub async fn on_signed_in_changed(&self, signed_in: bool) {
        let mut state = self.state.lock().await;
        if state.disposed {
            return;
        }
        let was_signed_in = state.signed_in;
        state.signed_in = signed_in;
        if signed_in && !was_signed_in {
            state.sign_in_autoplay_pending = true;
            drop(state);
            self.spawn_timer(self.config.sign_in_autoplay_delay, FeedSignal::SignInReplay);
        } else if !signed_in {
            state.sign_in_autoplay_pending = false;
        }
    }

    /// Ad presentation changed: manual pauses no longer apply
    pub async fn on_ad_type_changed(&self) {
        let mut state = self.state.lock().await;
        if state.disposed {
            return;
        }
        state.context.clear_all_user_paused();
        let current = state.context.current_index;
        if state.local.state(current) == SlotState::Playing {
            return;
        }
        if let Err(e) = self.try_play(&mut state, current, PlayTrigger::Auto).await {
            warn!("Feed {}: replay after ad change failed: {}", self.feed_id, e);
        }
    }

    /// Replace the displayed list and re-settle on the (clamped) current index
    pub async fn set_items(&self, items: Vec<FeedItem>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.disposed {
            return Err(Error::FeedDisposed);
        }
        for (index, (video_id, token)) in std::mem::take(&mut state.priming) {
            self.shared.cancel_priming(&video_id, Some(token)).await;
            if state.local.state(index) == SlotState::Priming {
                let _ = state.local.apply(index, SlotEvent::PrimingCancelled);
            }
        }
        state.local.set_items(items);
        self.scheduler.reset();
        // Indices are reinterpreted
        state.context.clear_all_user_paused();
        info!("Feed {}: list refreshed ({} items)", self.feed_id, state.local.len());

        if state.local.is_empty() {
            return Ok(());
        }
        let index = state.context.current_index.min(state.local.len() - 1);
        self.settle(&mut state, index).await
    }

    /// Tear the feed down
    ///
    /// Pauses this feed's handles and stops all feed tasks. Opened from a
    /// profile, every handle this feed created is disposed (including inits
    /// that complete later); otherwise they stay pooled for reuse.
    pub async fn dispose(&self) {
        let mut state = self.state.lock().await;
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.debouncer.cancel();

        for (_, (video_id, token)) in std::mem::take(&mut state.priming) {
            self.shared.cancel_priming(&video_id, Some(token)).await;
        }
        for index in state.local.bound_indices() {
            self.pause_index(&mut state, index).await;
        }
        if let Some(video_id) = state.tracked.take() {
            self.tracker.stop_view_tracking(&video_id);
        }

        self.scheduler.shutdown(self.opened_from_profile);
        let released = if self.opened_from_profile {
            self.shared.dispose_owned_by(self.feed_id).await
        } else {
            0
        };
        info!("Feed {} disposed ({} handles released)", self.feed_id, released);
    }

    // ========================================================================
    // Priming
    // ========================================================================

    /// Start priming `index` if it is in the current/next window and ready
    async fn prime(&self, state: &mut FeedState, index: usize) {
        let current = state.context.current_index;
        if index < current || index > current + 1 || state.local.state(index) != SlotState::Ready {
            return;
        }
        let Some(video_id) = state.local.video_id(index).cloned() else {
            return;
        };

        match self.shared.begin_priming(&video_id).await {
            Ok(Some(token)) => {
                let _ = state.local.apply(index, SlotEvent::PrimingStarted);
                state.priming.insert(index, (video_id.clone(), token));
                tokio::spawn(priming::run(
                    Arc::clone(&self.shared),
                    self.signals.clone(),
                    self.cancel.clone(),
                    PrimingRun {
                        index,
                        video_id,
                        token,
                        poll_interval: self.config.priming_poll,
                        bound: self.config.init_timeout_progressive,
                    },
                ));
            }
            Ok(None) => {
                // Primed elsewhere (another feed, or an earlier visit)
                if self.shared.snapshot(&video_id).await.is_some_and(|s| s.primed) {
                    let _ = state.local.apply(index, SlotEvent::PrimingStarted);
                    let _ = state.local.apply(index, SlotEvent::PrimingFinished);
                    self.emit_first_frame(index);
                }
            }
            Err(e) => debug!("Feed {}: priming of index {} skipped: {}", self.feed_id, index, e),
        }
    }

    fn emit_first_frame(&self, index: usize) {
        self.shared.bus().emit(PoolEvent::FirstFrameReady {
            feed_id: self.feed_id,
            index,
        });
    }

    fn arm_surface_fallback(&self, state: &FeedState, index: usize) {
        for i in [index, index + 1] {
            if i < state.local.len() && !state.local.state(i).has_frame() && !state.local.surface_forced(i) {
                self.spawn_timer(self.config.surface_fallback, FeedSignal::SurfaceForced { index: i });
            }
        }
    }

    fn spawn_timer(&self, delay: Duration, signal: FeedSignal) {
        let signals = self.signals.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = signals.send(signal);
                }
            }
        });
    }

    // ========================================================================
    // Background notifications
    // ========================================================================

    async fn handle_signal(&self, signal: FeedSignal) {
        let mut state = self.state.lock().await;
        if state.disposed {
            return;
        }
        match signal {
            FeedSignal::PreloadReady { index, video_id } => {
                self.on_preload_ready(&mut state, index, &video_id).await;
            }
            FeedSignal::PreloadFailed {
                index,
                video_id,
                class,
                will_retry,
                on_demand,
            } => {
                self.on_preload_failed(&mut state, index, &video_id, class, will_retry, on_demand)
                    .await;
            }
            FeedSignal::PrimingFinished {
                index,
                video_id,
                token,
                outcome,
            } => {
                if state.priming.get(&index) != Some(&(video_id, token)) {
                    return;
                }
                state.priming.remove(&index);
                if state.local.state(index) != SlotState::Priming {
                    return;
                }
                if outcome == PrimingOutcome::FrameReady {
                    let _ = state.local.apply(index, SlotEvent::PrimingFinished);
                    self.emit_first_frame(index);
                } else {
                    let _ = state.local.apply(index, SlotEvent::PrimingCancelled);
                }
            }
            FeedSignal::SurfaceForced { index } => {
                let current = state.context.current_index;
                if index < current || index > current + 1 || state.local.state(index).has_frame() {
                    return;
                }
                if state.local.set_surface_forced(index) {
                    debug!("Feed {}: forcing surface mount for index {}", self.feed_id, index);
                    self.shared.bus().emit(PoolEvent::SurfaceMountForced {
                        feed_id: self.feed_id,
                        index,
                    });
                }
            }
            FeedSignal::DebounceElapsed { ticket } => {
                if let Some(index) = state.debouncer.fire(ticket) {
                    if let Err(e) = self.settle(&mut state, index).await {
                        warn!("Feed {}: settle on {} failed: {}", self.feed_id, index, e);
                    }
                }
            }
            FeedSignal::SignInReplay => {
                if !std::mem::take(&mut state.sign_in_autoplay_pending) {
                    return;
                }
                let current = state.context.current_index;
                if state.local.state(current) == SlotState::Playing {
                    debug!("Feed {}: index {} already playing at sign-in replay", self.feed_id, current);
                    return;
                }
                match self.try_play(&mut state, current, PlayTrigger::SignInReplay).await {
                    Ok(true) => state.context.clear_all_user_paused(),
                    Ok(false) => debug!("Feed {}: sign-in replay did not start playback", self.feed_id),
                    Err(e) => warn!("Feed {}: sign-in replay failed: {}", self.feed_id, e),
                }
            }
        }
    }

    /// Index showing `video_id`, preferring the index the task reported
    fn resolve_index(state: &FeedState, index: usize, video_id: &VideoId) -> Option<usize> {
        if state.local.video_id(index) == Some(video_id) {
            Some(index)
        } else {
            state.local.index_of(video_id)
        }
    }

    async fn on_preload_ready(&self, state: &mut FeedState, index: usize, video_id: &VideoId) {
        let Some(index) = Self::resolve_index(state, index, video_id) else {
            return;
        };
        match state.local.reconcile(index, &self.shared).await {
            Ok(Some(_)) => {}
            _ => return,
        }
        // A background completion never plays an index the user has left
        if index == state.context.current_index {
            match self.try_play(state, index, PlayTrigger::Auto).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => warn!("Feed {}: autoplay of index {} failed: {}", self.feed_id, index, e),
            }
        }
        self.prime(state, index).await;
    }

    async fn on_preload_failed(
        &self,
        state: &mut FeedState,
        index: usize,
        video_id: &VideoId,
        class: FailureClass,
        will_retry: bool,
        on_demand: bool,
    ) {
        let Some(index) = Self::resolve_index(state, index, video_id) else {
            return;
        };
        if state.local.state(index) == SlotState::Initializing {
            let _ = state.local.apply(index, SlotEvent::InitFailed);
        }
        // Background failures are silent
        if index != state.context.current_index {
            return;
        }
        if on_demand {
            warn!("Feed {}: index {} unavailable ({})", self.feed_id, index, class);
            self.shared.bus().emit(PoolEvent::PlaybackUnavailable {
                feed_id: self.feed_id,
                index,
                reason: class.to_string(),
            });
            return;
        }
        let Some(item) = state.local.item(index).cloned() else {
            return;
        };
        if will_retry {
            self.scheduler.cancel_retry(index);
        }
        info!("Feed {}: preload of current index {} failed, opening on demand", self.feed_id, index);
        if let PreloadOutcome::Started | PreloadOutcome::InFlight = self.scheduler.open_on_demand(index, &item).await {
            self.mark_initializing(state, index);
        }
    }

    async fn handle_pool_event(&self, event: PoolEvent) {
        let mut state = self.state.lock().await;
        if state.disposed {
            return;
        }
        match event {
            // Another feed finished (or failed) an init this feed was waiting on
            PoolEvent::PreloadReady { feed_id, video_id, .. } if feed_id != self.feed_id => {
                if let Some(index) = self.waiting_index(&state, &video_id) {
                    self.on_preload_ready(&mut state, index, &video_id).await;
                }
            }
            PoolEvent::PreloadFailed {
                feed_id,
                video_id,
                class,
                ..
            } if feed_id != self.feed_id => {
                if let Some(index) = self.waiting_index(&state, &video_id) {
                    self.on_preload_failed(&mut state, index, &video_id, class, false, false)
                        .await;
                }
            }
            PoolEvent::HandleEvicted { video_id, .. } => {
                // Replaced handles are still resident under the same identity
                if !self.shared.contains(&video_id).await {
                    self.forget(&mut state, &video_id);
                }
            }
            PoolEvent::BufferingChanged { video_id, buffering } => {
                if let Some(index) = state.local.index_of(&video_id) {
                    state.local.set_buffering(index, buffering);
                }
            }
            PoolEvent::DecoderEnded { video_id } => {
                let current = state.context.current_index;
                if self.config.auto_advance
                    && state.local.video_id(current) == Some(&video_id)
                    && state.local.state(current) == SlotState::Playing
                {
                    info!("Feed {}: index {} finished, requesting advance", self.feed_id, current);
                    self.shared.bus().emit(PoolEvent::AdvanceRequested {
                        feed_id: self.feed_id,
                        from_index: current,
                    });
                }
            }
            _ => {}
        }
    }

    /// Index of this feed still initializing `video_id`
    fn waiting_index(&self, state: &FeedState, video_id: &VideoId) -> Option<usize> {
        state
            .local
            .index_of(video_id)
            .filter(|i| state.local.state(*i) == SlotState::Initializing)
    }

    /// Drop local knowledge of a disposed handle
    fn forget(&self, state: &mut FeedState, video_id: &VideoId) {
        if let Some(index) = state.local.drop_binding(video_id) {
            state.priming.remove(&index);
            debug!("Feed {}: index {} lost its handle {}", self.feed_id, index, video_id);
        }
        if state.tracked.as_ref() == Some(video_id) {
            self.tracker.stop_view_tracking(video_id);
            state.tracked = None;
        }
    }

    // ========================================================================
    // Observables
    // ========================================================================

    pub async fn current_index(&self) -> usize {
        self.state.lock().await.context.current_index
    }

    pub async fn slot_state(&self, index: usize) -> SlotState {
        self.state.lock().await.local.state(index)
    }

    pub async fn is_buffering(&self, index: usize) -> bool {
        self.state.lock().await.local.is_buffering(index)
    }

    /// Audible playback, as the shared pool sees it
    pub async fn is_playing(&self, index: usize) -> bool {
        let video_id = {
            let state = self.state.lock().await;
            state.local.video_id(index).cloned()
        };
        match video_id {
            Some(video_id) => self.shared.snapshot(&video_id).await.is_some_and(|s| s.playing),
            None => false,
        }
    }

    pub async fn first_frame_ready(&self, index: usize) -> bool {
        self.state.lock().await.local.state(index).has_frame()
    }

    /// Whether the UI should mount the decoder surface for `index`
    pub async fn should_mount_surface(&self, index: usize) -> bool {
        let state = self.state.lock().await;
        state.local.state(index).has_frame() || state.local.surface_forced(index)
    }

    pub async fn is_user_paused(&self, index: usize) -> bool {
        self.state.lock().await.context.is_user_paused(index)
    }

    pub async fn is_lifecycle_paused(&self) -> bool {
        self.state.lock().await.context.is_lifecycle_paused
    }

    pub async fn lifecycle_state(&self) -> LifecycleState {
        self.state.lock().await.lifecycle
    }
}

async fn signal_loop(
    coordinator: Weak<PlaybackCoordinator>,
    mut signals: mpsc::UnboundedReceiver<FeedSignal>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.handle_signal(signal).await;
    }
}

async fn pool_event_loop(
    coordinator: Weak<PlaybackCoordinator>,
    mut events: broadcast::Receiver<PoolEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Feed event listener lagged, skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        if !matches!(
            event,
            PoolEvent::HandleEvicted { .. }
                | PoolEvent::BufferingChanged { .. }
                | PoolEvent::DecoderEnded { .. }
                | PoolEvent::PreloadReady { .. }
                | PoolEvent::PreloadFailed { .. }
        ) {
            continue;
        }
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.handle_pool_event(event).await;
    }
}
