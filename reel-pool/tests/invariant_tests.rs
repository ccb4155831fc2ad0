//! Pool-wide invariants under churn
//!
//! - At most one handle audible at any time, across feeds
//! - No play/pause/seek reaches a disposed or uninitialized decoder
//! - Retries always terminate
//! - One cold init per identity across feeds
//! - Deferred and retried requests stay inside the preload window

mod helpers;

use helpers::{advance, id, items, Harness};
use reel_common::events::PoolEvent;
use reel_pool::playback::FeedOptions;
use reel_pool::playback::SlotState;
use reel_pool::sim::{SimCall, SimFailure};
use reel_pool::PoolConfig;

fn tight_config() -> PoolConfig {
    PoolConfig {
        preload_window: 1,
        keep_range: 1,
        max_pool_size: 2,
        ..PoolConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_erratic_scrolling_never_overlaps_audio() {
    let h = Harness::new();
    let feed = h.feed(12);
    feed.on_page_settled(0).await.unwrap();

    let script: [(usize, u64); 12] = [
        (1, 20),
        (2, 400),
        (1, 30),
        (5, 10),
        (6, 250),
        (7, 80),
        (3, 600),
        (4, 0),
        (11, 200),
        (10, 90),
        (9, 400),
        (8, 700),
    ];
    for (index, dwell) in script {
        feed.on_page_changed(index).await;
        advance(dwell).await;
        assert!(h.shared.playing_count().await <= 1);
    }
    advance(1_000).await;

    assert_eq!(feed.current_index().await, 8);
    assert!(feed.is_playing(8).await);
    assert_eq!(h.backend.max_audible(), 1);
    assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());
}

#[tokio::test(start_paused = true)]
async fn test_tight_pool_never_touches_disposed_decoders() {
    let h = Harness::with_config(tight_config());
    let feed = h.feed(8);

    for round in 0..3 {
        for index in [0, 3, 1, 4, 2, 7, 6, 5] {
            feed.on_page_settled(index).await.unwrap();
            advance(60 + round * 70).await;
            if feed.is_playing(index).await {
                feed.toggle_play_pause(index).await.unwrap();
                feed.toggle_play_pause(index).await.unwrap();
                feed.seek_relative(index, 500).await.unwrap();
            }
            assert!(h.shared.len().await <= 2);
        }
    }
    advance(3_000).await;

    assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());
    assert_eq!(h.backend.max_audible(), 1);
    // Only pooled handles hold decoders once everything has settled
    assert_eq!(h.backend.live_decoders(), h.shared.len().await);
}

#[tokio::test(start_paused = true)]
async fn test_two_feeds_share_single_audible_slot() {
    let h = Harness::new();
    let home = h.feed(6);
    home.on_page_settled(0).await.unwrap();
    advance(300).await;
    assert!(home.is_playing(0).await);

    let profile = h.feed_with(
        items(&["p0", "p1", "v1"]),
        FeedOptions {
            opened_from_profile: true,
            ..FeedOptions::default()
        },
    );
    profile.on_page_settled(0).await.unwrap();
    advance(300).await;

    assert!(profile.is_playing(0).await);
    assert!(!home.is_playing(0).await, "settling another feed pauses every handle");
    assert_eq!(h.shared.playing_count().await, 1);

    // The profile feed reuses the home feed's decoder for v1
    profile.on_page_settled(2).await.unwrap();
    advance(300).await;
    assert!(profile.is_playing(2).await);
    assert_eq!(h.backend.opens_for("v1").len(), 1);
    assert_eq!(h.backend.audible(), vec!["v1".to_string()]);
    assert_eq!(h.backend.max_audible(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_two_feeds_settling_together_open_once() {
    let config = PoolConfig {
        max_concurrent_inits: 4,
        ..PoolConfig::default()
    };
    let h = Harness::with_config(config);
    let home = h.feed(6);
    let profile = h.feed_with(
        items(&["x", "v1"]),
        FeedOptions {
            opened_from_profile: true,
            ..FeedOptions::default()
        },
    );

    let (a, b) = tokio::join!(home.on_page_settled(0), profile.on_page_settled(0));
    a.unwrap();
    b.unwrap();
    advance(400).await;

    assert_eq!(h.backend.opens_for("v1").len(), 1);
    assert!(!h
        .backend
        .calls_for("v1")
        .iter()
        .any(|c| matches!(c, SimCall::Dispose { .. })));
    assert!(profile.slot_state(1).await.is_resident(), "waiting feed picked up the other's init");
    assert!(home.slot_state(1).await.is_resident());

    profile.on_page_settled(1).await.unwrap();
    assert!(profile.is_playing(1).await, "instant start from the shared handle");
    assert_eq!(h.backend.opens_for("v1").len(), 1);
    assert!(h.backend.violations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_far_jump_drops_stale_deferred_and_retry_requests() {
    let config = PoolConfig {
        max_concurrent_inits: 1,
        ..PoolConfig::default()
    };
    let mut h = Harness::with_config(config);
    h.backend.fail_next("v1", SimFailure::Hang);
    let feed = h.feed(12);

    // v1 holds the only permit; v2 is deferred behind it
    feed.on_page_settled(0).await.unwrap();
    advance(100).await;
    feed.on_page_settled(8).await.unwrap();
    advance(250).await;

    for round in 0..40 {
        advance(1_000).await;
        if round % 10 == 0 {
            // Re-settling must not start a second deferral loop
            feed.on_page_settled(8).await.unwrap();
        }
    }

    assert!(h.backend.opens_for("v2").is_empty(), "index 2 left the window before a permit freed");
    assert_eq!(h.backend.opens_for("v1").len(), 1, "timed-out init is not retried out of window");
    assert!(!feed.scheduler().retry_pending(1));
    assert!(h.shared.contains(&id("v9")).await);
    assert!(h.shared.contains(&id("v10")).await);
    assert_eq!(feed.slot_state(9).await, SlotState::Primed);

    // One loop per index, re-issued every defer_delay until v1 timed out
    let deferrals = h
        .events()
        .iter()
        .filter(|e| matches!(e, PoolEvent::PreloadDeferred { index: 9, .. }))
        .count();
    assert!((1..=22).contains(&deferrals), "{} deferrals for index 9", deferrals);
    assert!(h.backend.violations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_not_found_retries_terminate() {
    let h = Harness::new();
    h.backend.fail_times("v1", SimFailure::Http(404), 10);
    let feed = h.feed(4);

    feed.on_page_settled(0).await.unwrap();
    for _ in 0..30 {
        advance(1_000).await;
    }

    let opens = h.backend.opens_for("v1");
    assert_eq!(opens.len(), h.config.max_attempts as usize);
    assert!(feed.scheduler().is_abandoned(&id("v1")));
    assert!(!feed.scheduler().retry_pending(1));

    // Re-settling on the neighbour does not re-preload an abandoned identity
    feed.on_page_settled(0).await.unwrap();
    advance(5_000).await;
    assert_eq!(h.backend.opens_for("v1").len(), opens.len());
    assert!(h.backend.violations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_decode_failure_is_not_retried() {
    let h = Harness::new();
    h.backend.fail_next("v2", SimFailure::Other("codec crashed".into()));
    let feed = h.feed(4);

    feed.on_page_settled(0).await.unwrap();
    advance(20_000).await;

    assert_eq!(h.backend.opens_for("v2").len(), 1);
    assert!(!feed.scheduler().retry_pending(2));
    assert!(!h.backend.is_live("v2"));
}
