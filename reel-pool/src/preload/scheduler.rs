//! Preload scheduler
//!
//! Keeps the indices ahead of the current one initialized, one cold
//! initialization task per identity across all feeds (claimed in the shared
//! pool).
//!
//! **Responsibilities:**
//! - Global concurrency cap on cold inits (shared semaphore); over the cap a
//!   request is re-enqueued after `defer_delay` instead of blocking, at most
//!   one deferral per index
//! - Deferred and retry requests are dropped once their index has left the
//!   window `[focus, focus + preload_window]` of the feed's latest settle
//! - Init sequence: resolve URL → open → initialize with timeout → register
//! - Failure classification, retry with backoff, abandonment after
//!   `max_attempts`
//! - On-demand opens for the focused index (no cap, no retry)
//!
//! An init that is already running is never cancelled by a page change: the
//! decoder is registered with the shared pool wherever the user has scrolled
//! to. Only feed disposal with the drop policy releases it on completion.

use crate::config::PoolConfig;
use crate::decoder::{DecoderBackend, DecoderError, FeedItem, UrlResolver};
use crate::playback::signals::FeedSignal;
use crate::pool::{DecoderHandle, SharedPool};
use crate::preload::retry::{classify, RetryPolicy, RetryState};
use crate::preload::watcher::spawn_watcher;
use reel_common::events::{EventBus, FailureClass, PoolEvent};
use reel_common::{FeedId, VideoId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a preload request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadOutcome {
    /// Identity already has an initialized handle
    AlreadyReady,
    /// An init for this identity is running (possibly in another feed)
    InFlight,
    /// A cold init was started
    Started,
    /// Concurrency cap reached; re-enqueued
    Deferred,
    /// A backoff timer is pending for this index
    RetryPending,
    /// Index is outside the feed's preload window
    OutOfWindow,
    /// Retries exhausted; only an on-demand open will try again
    Abandoned,
    /// Feed is shutting down or the request was superseded
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitMode {
    Preload,
    /// Re-issued after the concurrency cap was hit
    Deferred,
    Retry,
    OnDemand,
}

#[derive(Debug, Default)]
struct Tracking {
    /// Index of the feed's latest settle
    focus: Option<usize>,
    deferred: HashSet<usize>,
    pending_retry: HashSet<usize>,
    abandoned: HashSet<VideoId>,
    retries: RetryState,
}

impl Tracking {
    fn in_window(&self, index: usize, window: usize) -> bool {
        match self.focus {
            Some(focus) => index >= focus && index <= focus + window,
            None => true,
        }
    }
}

struct Inner {
    feed_id: FeedId,
    shared: Arc<SharedPool>,
    backend: Arc<dyn DecoderBackend>,
    resolver: Arc<dyn UrlResolver>,
    config: PoolConfig,
    policy: RetryPolicy,
    bus: EventBus,
    signals: mpsc::UnboundedSender<FeedSignal>,
    tracking: Mutex<Tracking>,
    cancel: CancellationToken,
    dispose_on_cancel: AtomicBool,
}

/// Per-feed preload scheduler (cheap to clone)
#[derive(Clone)]
pub struct PreloadScheduler {
    inner: Arc<Inner>,
}

impl PreloadScheduler {
    pub fn new(
        feed_id: FeedId,
        shared: Arc<SharedPool>,
        backend: Arc<dyn DecoderBackend>,
        resolver: Arc<dyn UrlResolver>,
        config: PoolConfig,
        signals: mpsc::UnboundedSender<FeedSignal>,
        cancel: CancellationToken,
    ) -> Self {
        let bus = shared.bus().clone();
        let policy = config.retry_policy();
        Self {
            inner: Arc::new(Inner {
                feed_id,
                shared,
                backend,
                resolver,
                config,
                policy,
                bus,
                signals,
                tracking: Mutex::new(Tracking::default()),
                cancel,
                dispose_on_cancel: AtomicBool::new(false),
            }),
        }
    }

    pub fn feed_id(&self) -> FeedId {
        self.inner.feed_id
    }

    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        // Poisoning is ignored: Tracking is plain sets
        self.inner.tracking.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make sure `item` at `index` is (or will be) initialized
    pub async fn request_preload(&self, index: usize, item: &FeedItem) -> PreloadOutcome {
        self.request(index, item.clone(), InitMode::Preload).await
    }

    /// Open `item` now for the focused index
    ///
    /// Bypasses the concurrency cap, pending backoff and abandonment; a
    /// failure is reported once and never retried.
    pub async fn open_on_demand(&self, index: usize, item: &FeedItem) -> PreloadOutcome {
        self.request(index, item.clone(), InitMode::OnDemand).await
    }

    /// A cold init for `video_id` is running in any feed
    pub fn is_in_flight(&self, video_id: &VideoId) -> bool {
        self.inner.shared.is_initializing(video_id)
    }

    /// Record the index the feed settled on
    pub fn set_focus(&self, index: usize) {
        self.tracking().focus = Some(index);
    }

    /// Drop a pending backoff for `index`; returns whether one was pending
    ///
    /// The backoff timer finds its entry gone and does nothing.
    pub fn cancel_retry(&self, index: usize) -> bool {
        let mut tracking = self.tracking();
        tracking.retries.clear(index);
        tracking.pending_retry.remove(&index)
    }

    pub fn is_abandoned(&self, video_id: &VideoId) -> bool {
        self.tracking().abandoned.contains(video_id)
    }

    pub fn retry_pending(&self, index: usize) -> bool {
        self.tracking().pending_retry.contains(&index)
    }

    /// Failures recorded for `index` in the current retry cycle
    pub fn attempts(&self, index: usize) -> u32 {
        self.tracking().retries.attempts(index)
    }

    /// Forget index-keyed retry state after the list was replaced
    ///
    /// Pending backoff timers find their index gone and drop the request.
    pub fn reset(&self) {
        let mut tracking = self.tracking();
        tracking.pending_retry.clear();
        tracking.deferred.clear();
        tracking.abandoned.clear();
        tracking.retries.clear_all();
    }

    /// Stop scheduling; with `dispose_in_flight` inits that complete later
    /// are released instead of registered
    pub fn shutdown(&self, dispose_in_flight: bool) {
        self.inner.dispose_on_cancel.store(dispose_in_flight, Ordering::SeqCst);
        self.inner.cancel.cancel();
    }

    async fn request(&self, index: usize, item: FeedItem, mode: InitMode) -> PreloadOutcome {
        if self.inner.cancel.is_cancelled() {
            return PreloadOutcome::Cancelled;
        }
        let video_id = item.video_id.clone();

        // Claim the identity before the first suspension point
        {
            let mut tracking = self.tracking();
            match mode {
                InitMode::Retry if !tracking.pending_retry.remove(&index) => {
                    return PreloadOutcome::Cancelled;
                }
                InitMode::Deferred if !tracking.deferred.remove(&index) => {
                    return PreloadOutcome::Cancelled;
                }
                InitMode::Preload if tracking.pending_retry.contains(&index) => {
                    return PreloadOutcome::RetryPending;
                }
                InitMode::Preload if tracking.abandoned.contains(&video_id) => {
                    return PreloadOutcome::Abandoned;
                }
                InitMode::Preload if tracking.deferred.contains(&index) => {
                    return PreloadOutcome::Deferred;
                }
                _ => {}
            }
            if mode != InitMode::OnDemand && !tracking.in_window(index, self.inner.config.preload_window) {
                if mode == InitMode::Retry {
                    tracking.retries.clear(index);
                }
                debug!(
                    "Feed {}: index {} left the preload window, dropping {:?} request",
                    self.inner.feed_id, index, mode
                );
                return PreloadOutcome::OutOfWindow;
            }
            if !self.inner.shared.try_claim_init(&video_id) {
                if mode == InitMode::Retry {
                    tracking.retries.clear(index);
                }
                return PreloadOutcome::InFlight;
            }
        }

        if self.inner.shared.get_for_instant_play(&video_id).await.is_some() {
            self.inner.shared.release_init(&video_id);
            self.tracking().retries.clear(index);
            return PreloadOutcome::AlreadyReady;
        }

        let permit = match mode {
            InitMode::OnDemand => None,
            InitMode::Preload | InitMode::Deferred | InitMode::Retry => {
                match self.inner.shared.init_permits().try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        self.inner.shared.release_init(&video_id);
                        let next_mode = {
                            let mut tracking = self.tracking();
                            if mode == InitMode::Retry {
                                tracking.pending_retry.insert(index);
                                InitMode::Retry
                            } else {
                                tracking.deferred.insert(index);
                                InitMode::Deferred
                            }
                        };
                        let delay = self.inner.config.defer_delay;
                        debug!(
                            "Feed {}: init cap reached, deferring index {} by {:?}",
                            self.inner.feed_id, index, delay
                        );
                        self.inner.bus.emit(PoolEvent::PreloadDeferred {
                            feed_id: self.inner.feed_id,
                            index,
                            delay_ms: delay.as_millis() as u64,
                        });
                        self.schedule(index, item, next_mode, delay);
                        return PreloadOutcome::Deferred;
                    }
                }
            }
        };

        self.spawn_init(index, item, permit, mode);
        PreloadOutcome::Started
    }

    /// Re-issue a request after `delay` unless the feed is cancelled first
    fn schedule(&self, index: usize, item: FeedItem, mode: InitMode, delay: Duration) {
        let scheduler = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let outcome = scheduler.request(index, item, mode).await;
                    debug!("Re-issued request for index {}: {:?}", index, outcome);
                }
            }
        });
    }

    fn spawn_init(&self, index: usize, item: FeedItem, permit: Option<OwnedSemaphorePermit>, mode: InitMode) {
        info!(
            "Feed {}: initializing index {} ({}){}",
            self.inner.feed_id,
            index,
            item.video_id,
            if mode == InitMode::OnDemand { " on demand" } else { "" }
        );
        self.inner.bus.emit(PoolEvent::PreloadStarted {
            feed_id: self.inner.feed_id,
            index,
            video_id: item.video_id.clone(),
        });
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_init(index, item, permit, mode).await;
        });
    }

    async fn run_init(&self, index: usize, item: FeedItem, permit: Option<OwnedSemaphorePermit>, mode: InitMode) {
        let started = Instant::now();
        let result = self.open_and_initialize(index, &item).await;
        drop(permit);

        match result {
            Ok(handle) => self.register(index, handle, started).await,
            Err(e) => {
                self.inner.shared.release_init(&item.video_id);
                self.handle_failure(index, item, e, mode).await;
            }
        }
    }

    /// Resolve, open and initialize; the decoder is disposed on any failure
    /// after it was opened
    async fn open_and_initialize(&self, index: usize, item: &FeedItem) -> Result<DecoderHandle, DecoderError> {
        let config = &self.inner.config;
        let url = self.inner.resolver.resolve_playable_url(item).await?;
        let mut decoder = self.inner.backend.open(&url).await?;

        let timeout = config.init_timeout(url.format);
        let init = match tokio::time::timeout(timeout, decoder.initialize()).await {
            Ok(result) => result,
            Err(_) => Err(DecoderError::Timeout(format!(
                "initialization of {} exceeded {:?}",
                item.video_id, timeout
            ))),
        };
        let init = match init {
            Ok(()) => decoder.set_looping(!config.auto_advance).await,
            Err(e) => Err(e),
        };
        if let Err(e) = init {
            decoder.dispose().await;
            return Err(e);
        }

        let mut handle = DecoderHandle::new(item.video_id.clone(), decoder, url.format, self.inner.feed_id, index);
        handle.mark_initialized(config.default_volume);
        Ok(handle)
    }

    /// Hand the handle to the shared pool, then release the init claim
    async fn register(&self, index: usize, mut handle: DecoderHandle, started: Instant) {
        let video_id = handle.video_id().clone();

        if self.inner.cancel.is_cancelled() && self.inner.dispose_on_cancel.load(Ordering::SeqCst) {
            info!("Feed {} disposed during init of {}; releasing decoder", self.inner.feed_id, video_id);
            handle.dispose().await;
            self.inner.shared.release_init(&video_id);
            return;
        }

        {
            let mut tracking = self.tracking();
            tracking.retries.clear(index);
            tracking.abandoned.remove(&video_id);
        }

        let events = handle.decoder_mut().take_events();
        self.inner.shared.put(handle, false).await;
        self.inner.shared.release_init(&video_id);
        if let Some(events) = events {
            spawn_watcher(
                Arc::clone(&self.inner.shared),
                video_id.clone(),
                events,
                self.inner.config.near_end_threshold,
            );
        }

        info!(
            "✅ Feed {}: index {} ({}) ready in {}ms",
            self.inner.feed_id,
            index,
            video_id,
            started.elapsed().as_millis()
        );
        self.inner.bus.emit(PoolEvent::PreloadReady {
            feed_id: self.inner.feed_id,
            index,
            video_id: video_id.clone(),
        });
        // Receiver gone means the feed was disposed; the handle stays pooled
        let _ = self.inner.signals.send(FeedSignal::PreloadReady { index, video_id });
    }

    async fn handle_failure(&self, index: usize, item: FeedItem, error: DecoderError, mode: InitMode) {
        let class = classify(&error);
        let video_id = item.video_id.clone();

        if mode == InitMode::OnDemand {
            warn!("Feed {}: on-demand open of {} failed ({}): {}", self.inner.feed_id, video_id, class, error);
            self.emit_failed(index, &video_id, class, 1, false);
            let _ = self.inner.signals.send(FeedSignal::PreloadFailed {
                index,
                video_id,
                class,
                will_retry: false,
                on_demand: true,
            });
            return;
        }

        let (attempt, delay) = {
            let mut tracking = self.tracking();
            let attempt = tracking.retries.record_failure(index, class);
            let delay = self.inner.policy.delay_for(class, attempt);
            match delay {
                Some(_) => {
                    tracking.pending_retry.insert(index);
                }
                None => {
                    tracking.retries.clear(index);
                    tracking.abandoned.insert(video_id.clone());
                }
            }
            (attempt, delay)
        };

        warn!(
            "Feed {}: init of index {} ({}) failed, attempt {} ({}): {}",
            self.inner.feed_id, index, video_id, attempt, class, error
        );
        self.emit_failed(index, &video_id, class, attempt, delay.is_some());

        match delay {
            Some(delay) => {
                if class == FailureClass::ResourceExhausted {
                    self.inner.shared.relieve_pressure().await;
                }
                info!("Retrying index {} in {:?}", index, delay);
                self.schedule(index, item, InitMode::Retry, delay);
            }
            None if class.is_retryable() => {
                warn!("Feed {}: giving up on index {} after {} attempts", self.inner.feed_id, index, attempt);
                self.inner.bus.emit(PoolEvent::PreloadAbandoned {
                    feed_id: self.inner.feed_id,
                    index,
                    attempts: attempt,
                });
            }
            None => {}
        }

        let _ = self.inner.signals.send(FeedSignal::PreloadFailed {
            index,
            video_id,
            class,
            will_retry: delay.is_some(),
            on_demand: false,
        });
    }

    fn emit_failed(&self, index: usize, video_id: &VideoId, class: FailureClass, attempt: u32, will_retry: bool) {
        self.inner.bus.emit(PoolEvent::PreloadFailed {
            feed_id: self.inner.feed_id,
            index,
            video_id: video_id.clone(),
            class,
            attempt,
            will_retry,
            timestamp: chrono::Utc::now(),
        });
    }
}
