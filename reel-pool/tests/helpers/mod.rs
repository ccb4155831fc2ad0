//! Test helpers for reel-pool integration tests
//!
//! Provides reusable test infrastructure components:
//! - Harness: shared pool + simulated backend + event log, one per test
//! - RecordingTracker: captures view-tracking calls
//! - advance: move the paused tokio clock forward

#![allow(dead_code)]

use reel_common::events::{EventBus, PoolEvent};
use reel_common::VideoId;
use reel_pool::decoder::{FeedItem, ItemUrlResolver, ViewTracker};
use reel_pool::playback::{FeedDeps, FeedOptions, PlaybackCoordinator};
use reel_pool::sim::{self, SimBackend};
use reel_pool::{PoolConfig, SharedPool};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// View-tracking call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    Start(VideoId),
    Stop(VideoId),
}

/// View tracker that records every call
#[derive(Debug, Default)]
pub struct RecordingTracker {
    calls: Mutex<Vec<TrackerCall>>,
}

impl RecordingTracker {
    pub fn calls(&self) -> Vec<TrackerCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ViewTracker for RecordingTracker {
    fn start_view_tracking(&self, video_id: &VideoId, _uploader_id: &str) {
        self.calls.lock().unwrap().push(TrackerCall::Start(video_id.clone()));
    }

    fn stop_view_tracking(&self, video_id: &VideoId) {
        self.calls.lock().unwrap().push(TrackerCall::Stop(video_id.clone()));
    }
}

/// Everything one test needs: pool, backend, and a log of pool events
pub struct Harness {
    pub config: PoolConfig,
    pub backend: SimBackend,
    pub shared: Arc<SharedPool>,
    pub tracker: Arc<RecordingTracker>,
    events: broadcast::Receiver<PoolEvent>,
    log: Vec<PoolEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self::with_backend(config, SimBackend::new())
    }

    pub fn with_backend(config: PoolConfig, backend: SimBackend) -> Self {
        let bus = EventBus::new(4096);
        let events = bus.subscribe();
        let shared = SharedPool::new(&config, bus);
        Self {
            config,
            backend,
            shared,
            tracker: Arc::new(RecordingTracker::default()),
            events,
            log: Vec::new(),
        }
    }

    pub fn deps(&self) -> FeedDeps {
        FeedDeps {
            shared: Arc::clone(&self.shared),
            backend: Arc::new(self.backend.clone()),
            resolver: Arc::new(ItemUrlResolver),
            tracker: self.tracker.clone(),
        }
    }

    /// Home feed of `n` simulated items (`v0..`)
    pub fn feed(&self, n: usize) -> Arc<PlaybackCoordinator> {
        self.feed_with(sim::feed_items(n), FeedOptions::default())
    }

    pub fn feed_with(&self, items: Vec<FeedItem>, options: FeedOptions) -> Arc<PlaybackCoordinator> {
        PlaybackCoordinator::new(self.config.clone(), self.deps(), items, options)
    }

    /// Every event emitted so far
    pub fn events(&mut self) -> &[PoolEvent] {
        while let Ok(event) = self.events.try_recv() {
            self.log.push(event);
        }
        &self.log
    }

    /// Forget the events seen so far
    pub fn clear_events(&mut self) {
        self.events();
        self.log.clear();
    }

    /// Indices settled, in order
    pub fn settled_indices(&mut self) -> Vec<usize> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                PoolEvent::PageSettled { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }
}

pub fn id(label: &str) -> VideoId {
    VideoId::new(label)
}

/// Advance the paused clock, letting every woken task run
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Items with explicit labels, for list-refresh tests
pub fn items(labels: &[&str]) -> Vec<FeedItem> {
    labels
        .iter()
        .map(|label| FeedItem::progressive(*label, "uploader", &format!("sim://{}", label)))
        .collect()
}
