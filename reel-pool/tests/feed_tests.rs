//! Feed coordinator behaviour: on-demand opens, priming, surface fallback,
//! sign-in replay, list refresh, disposal policies, view tracking

mod helpers;

use helpers::{advance, id, items, Harness, TrackerCall};
use reel_common::events::{PlaybackState, PoolEvent};
use reel_pool::playback::{FeedOptions, SlotState};
use reel_pool::sim::{SimBackend, SimCall, SimFailure};
use reel_pool::PoolConfig;
use std::time::Duration;

fn profile() -> FeedOptions {
    FeedOptions {
        opened_from_profile: true,
        ..FeedOptions::default()
    }
}

// ============================================================================
// On-demand opens
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_on_demand_open_bypasses_saturated_cap() {
    let mut h = Harness::new();
    h.backend.fail_next("v1", SimFailure::Hang);
    h.backend.fail_next("v2", SimFailure::Hang);
    let feed = h.feed(10);

    feed.on_page_settled(0).await.unwrap();
    advance(200).await;
    assert!(feed.is_playing(0).await);
    assert_eq!(h.shared.init_permits().available_permits(), 0);

    feed.on_page_settled(6).await.unwrap();
    advance(150).await;

    assert!(feed.is_playing(6).await, "current index opens without waiting for a permit");
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, PoolEvent::PreloadDeferred { index: 7, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_on_demand_failure_reports_unavailable_once() {
    let mut h = Harness::new();
    h.backend.fail_next("v0", SimFailure::Http(404));
    let feed = h.feed(4);

    feed.on_page_settled(0).await.unwrap();
    advance(300).await;

    let unavailable = h
        .events()
        .iter()
        .filter(|e| matches!(e, PoolEvent::PlaybackUnavailable { index: 0, .. }))
        .count();
    assert_eq!(unavailable, 1);
    assert_eq!(feed.slot_state(0).await, SlotState::Absent);

    advance(30_000).await;
    assert_eq!(h.backend.opens_for("v0").len(), 1, "on-demand opens are not retried");
    assert!(!feed.is_playing(0).await);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_init_times_out_and_releases_decoder() {
    let config = PoolConfig {
        init_timeout_progressive: Duration::from_secs(2),
        ..PoolConfig::default()
    };
    let mut h = Harness::with_config(config);
    h.backend.fail_next("v1", SimFailure::Hang);
    let feed = h.feed(4);

    feed.on_page_settled(0).await.unwrap();
    advance(2_500).await;

    assert!(h.events().iter().any(|e| matches!(
        e,
        PoolEvent::PreloadFailed { index: 1, will_retry: true, .. }
    )));
    assert!(feed.scheduler().retry_pending(1));

    // Fixed-delay retry succeeds
    advance(4_000).await;
    assert!(h.shared.contains(&id("v1")).await);
    assert_eq!(h.backend.opens_for("v1").len(), 2);
    assert_eq!(h.backend.live_decoders(), h.shared.len().await);
}

#[tokio::test(start_paused = true)]
async fn test_current_index_skips_pending_backoff() {
    let h = Harness::new();
    h.backend.fail_next("v1", SimFailure::OutOfMemory);
    let feed = h.feed(6);

    feed.on_page_settled(0).await.unwrap();
    advance(400).await;
    assert!(feed.scheduler().retry_pending(1), "memory backoff armed for index 1");

    feed.on_page_settled(1).await.unwrap();
    advance(300).await;
    assert!(feed.is_playing(1).await, "on screen within the backoff");
    assert_eq!(h.backend.opens_for("v1").len(), 2);
    assert!(!feed.scheduler().retry_pending(1));

    // The cancelled backoff never fires a third open
    advance(15_000).await;
    assert_eq!(h.backend.opens_for("v1").len(), 2);
    assert!(h.backend.violations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_current_index_failing_preload_opens_on_demand() {
    let h = Harness::new();
    h.backend.fail_next("v1", SimFailure::OutOfMemory);
    let feed = h.feed(6);

    // Settled on 1 while its preload is still running
    feed.on_page_settled(0).await.unwrap();
    feed.on_page_settled(1).await.unwrap();
    assert_eq!(feed.slot_state(1).await, SlotState::Initializing);

    advance(400).await;
    assert!(feed.is_playing(1).await);
    assert_eq!(h.backend.opens_for("v1").len(), 2);
    assert!(!feed.scheduler().retry_pending(1));

    advance(15_000).await;
    assert_eq!(h.backend.opens_for("v1").len(), 2);
}

// ============================================================================
// Priming and surface fallback
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_next_index_is_primed_muted() {
    let mut h = Harness::new();
    let feed = h.feed(6);

    feed.on_page_settled(0).await.unwrap();
    advance(400).await;

    assert!(feed.first_frame_ready(1).await);
    assert_eq!(feed.slot_state(1).await, SlotState::Primed);
    assert!(feed.should_mount_surface(1).await);
    assert_eq!(feed.slot_state(2).await, SlotState::Ready, "only current and next are primed");

    let v1 = h.shared.snapshot(&id("v1")).await.unwrap();
    assert!(v1.primed && !v1.playing && !v1.priming);
    assert_eq!(v1.volume, 1.0, "volume restored after priming");

    let plays: Vec<f32> = h
        .backend
        .calls_for("v1")
        .into_iter()
        .filter_map(|c| match c {
            SimCall::Play { volume, .. } => Some(volume),
            _ => None,
        })
        .collect();
    assert_eq!(plays, vec![0.0]);
    assert_eq!(h.backend.audible(), vec!["v0".to_string()]);
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, PoolEvent::FirstFrameReady { index: 1, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_page_change_cancels_priming_outside_window() {
    let backend = SimBackend::new().with_buffering_delay(Duration::from_secs(5));
    let h = Harness::with_backend(PoolConfig::default(), backend);
    let feed = h.feed(8);

    feed.on_page_settled(0).await.unwrap();
    advance(300).await;
    assert_eq!(feed.slot_state(1).await, SlotState::Priming);

    feed.on_page_changed(4).await;
    assert_eq!(feed.slot_state(1).await, SlotState::Ready);
    let v1 = h.shared.snapshot(&id("v1")).await;
    assert!(v1.map_or(true, |s| !s.priming));
}

#[tokio::test(start_paused = true)]
async fn test_surface_mount_forced_without_first_frame() {
    let mut h = Harness::new();
    h.backend.fail_next("v1", SimFailure::Hang);
    let feed = h.feed(4);

    feed.on_page_settled(0).await.unwrap();
    advance(500).await;
    assert!(!feed.should_mount_surface(1).await);

    advance(300).await;
    assert!(feed.should_mount_surface(1).await);
    assert!(!feed.first_frame_ready(1).await);

    let forced: Vec<usize> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            PoolEvent::SurfaceMountForced { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(forced, vec![1], "index 0 had its frame before the fallback fired");
}

// ============================================================================
// Context changes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sign_in_replays_autoplay_once() {
    let h = Harness::new();
    let feed = h.feed(4);
    feed.on_page_settled(0).await.unwrap();
    advance(300).await;

    // Something outside the feed (audio focus loss) paused the video
    h.shared.pause(&id("v0")).await.unwrap();
    assert!(!feed.is_playing(0).await);

    feed.on_signed_in_changed(true).await;
    advance(100).await;
    assert!(!feed.is_playing(0).await, "replay waits for the sign-in delay");
    advance(500).await;
    assert!(feed.is_playing(0).await);

    h.shared.pause(&id("v0")).await.unwrap();
    advance(2_000).await;
    assert!(!feed.is_playing(0).await, "replay is one-shot");
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_before_delay_cancels_replay() {
    let h = Harness::new();
    let feed = h.feed(4);
    feed.on_page_settled(0).await.unwrap();
    advance(300).await;
    h.shared.pause(&id("v0")).await.unwrap();

    feed.on_signed_in_changed(true).await;
    advance(100).await;
    feed.on_signed_in_changed(false).await;
    advance(1_000).await;

    assert!(!feed.is_playing(0).await);
}

#[tokio::test(start_paused = true)]
async fn test_hidden_tab_gates_autoplay_until_visible() {
    let h = Harness::new();
    let feed = h.feed_with(
        helpers::items(&["v0", "v1", "v2"]),
        FeedOptions {
            feed_tab_active: false,
            ..FeedOptions::default()
        },
    );

    feed.on_page_settled(0).await.unwrap();
    advance(400).await;
    assert!(!feed.is_playing(0).await);
    assert!(feed.first_frame_ready(0).await, "current index primed while gated");

    feed.set_feed_tab_active(true).await;
    assert!(feed.is_playing(0).await);

    feed.on_visibility_changed(false).await;
    assert!(!feed.is_playing(0).await);
    assert!(!feed.is_user_paused(0).await, "visibility pauses are not manual");

    feed.on_visibility_changed(true).await;
    assert!(feed.is_playing(0).await);
}

#[tokio::test(start_paused = true)]
async fn test_ad_type_change_clears_manual_pause() {
    let h = Harness::new();
    let feed = h.feed(3);
    feed.on_page_settled(0).await.unwrap();
    advance(300).await;

    feed.toggle_play_pause(0).await.unwrap();
    assert!(feed.is_user_paused(0).await);

    feed.on_ad_type_changed().await;
    assert!(!feed.is_user_paused(0).await);
    assert!(feed.is_playing(0).await);
}

#[tokio::test(start_paused = true)]
async fn test_context_replays_skip_already_playing_index() {
    let mut h = Harness::new();
    let feed = h.feed(3);
    feed.on_page_settled(0).await.unwrap();
    advance(300).await;
    assert!(feed.is_playing(0).await);

    let plays = |events: &[PoolEvent]| {
        events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    PoolEvent::PlaybackStateChanged {
                        index: 0,
                        new_state: PlaybackState::Playing,
                        ..
                    }
                )
            })
            .count()
    };
    let before = plays(h.events());

    feed.on_ad_type_changed().await;
    feed.on_signed_in_changed(true).await;
    advance(600).await;

    assert!(feed.is_playing(0).await);
    assert_eq!(plays(h.events()), before, "no second Playing for an index already playing");
}

#[tokio::test(start_paused = true)]
async fn test_seek_clamps_to_media_bounds() {
    let backend = SimBackend::new().with_media_duration(Duration::from_secs(10));
    let h = Harness::with_backend(PoolConfig::default(), backend);
    let feed = h.feed(2);
    feed.on_page_settled(0).await.unwrap();
    advance(300).await;

    assert_eq!(feed.seek_relative(0, -60_000).await.unwrap(), Duration::ZERO);
    assert_eq!(feed.seek_relative(0, 60_000).await.unwrap(), Duration::from_secs(10));
}

fn advances(events: &[PoolEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            PoolEvent::AdvanceRequested { from_index, .. } => Some(*from_index),
            _ => None,
        })
        .collect()
}

fn ends_of(events: &[PoolEvent], label: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PoolEvent::DecoderEnded { video_id } if video_id == &id(label)))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_auto_advance_fires_once_near_end() {
    let config = PoolConfig {
        auto_advance: true,
        ..PoolConfig::default()
    };
    let backend = SimBackend::new().with_media_duration(Duration::from_secs(2));
    let mut h = Harness::with_backend(config, backend);
    let feed = h.feed(3);

    // Plays from t=100ms; 200ms threshold puts the end window at t=1.9s
    feed.on_page_settled(0).await.unwrap();
    advance(1_750).await;
    assert!(feed.is_playing(0).await);
    assert!(advances(h.events()).is_empty(), "index 1 was primed meanwhile");

    advance(300).await;
    assert_eq!(advances(h.events()), vec![0]);

    // Reaching the real end does not request a second advance
    advance(2_000).await;
    assert_eq!(advances(h.events()), vec![0]);
    assert_eq!(ends_of(h.events(), "v0"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auto_advance_ignores_index_left_behind() {
    let config = PoolConfig {
        auto_advance: true,
        ..PoolConfig::default()
    };
    let backend = SimBackend::new().with_media_duration(Duration::from_secs(2));
    let mut h = Harness::with_backend(config, backend);
    let feed = h.feed(4);

    feed.on_page_settled(0).await.unwrap();
    advance(1_000).await;
    feed.on_page_settled(1).await.unwrap();
    advance(3_000).await;

    assert_eq!(ends_of(h.events(), "v0"), 0, "paused before its end window");
    assert_eq!(advances(h.events()), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_looping_reports_each_pass_without_advancing() {
    let backend = SimBackend::new().with_media_duration(Duration::from_secs(2));
    let mut h = Harness::with_backend(PoolConfig::default(), backend);
    let feed = h.feed(3);

    feed.on_page_settled(0).await.unwrap();
    advance(6_000).await;

    assert!(feed.is_playing(0).await);
    assert_eq!(ends_of(h.events(), "v0"), 3);
    assert!(advances(h.events()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_buffering_flag_follows_decoder() {
    let backend = SimBackend::new().with_buffering_delay(Duration::from_millis(400));
    let mut h = Harness::with_backend(PoolConfig::default(), backend);
    let feed = h.feed(2);

    feed.on_page_settled(0).await.unwrap();
    advance(200).await;
    assert!(feed.is_playing(0).await);
    assert!(feed.is_buffering(0).await);

    advance(500).await;
    assert!(!feed.is_buffering(0).await);
    assert!(h.events().iter().any(|e| matches!(
        e,
        PoolEvent::BufferingChanged { buffering: false, .. }
    )));
}

// ============================================================================
// List refresh and disposal
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_set_items_follows_identity() {
    let h = Harness::new();
    let feed = h.feed(5);
    feed.on_page_settled(1).await.unwrap();
    advance(300).await;
    assert!(feed.is_playing(1).await);

    feed.set_items(items(&["fresh", "v0", "v1", "v2", "v3", "v4"])).await.unwrap();
    advance(300).await;

    assert_eq!(feed.current_index().await, 1);
    assert!(feed.is_playing(1).await, "index 1 now shows v0");
    assert_eq!(h.backend.audible(), vec!["v0".to_string()]);
    assert_eq!(feed.slot_state(2).await, SlotState::Paused, "v1 kept its slot at its new index");
    assert_eq!(h.backend.opens_for("v1").len(), 1);
    assert_eq!(h.backend.opens_for("v2").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_set_items_clamps_current_index() {
    let h = Harness::new();
    let feed = h.feed(6);
    feed.on_page_settled(5).await.unwrap();
    advance(300).await;

    feed.set_items(items(&["v0", "v1"])).await.unwrap();
    advance(300).await;
    assert_eq!(feed.current_index().await, 1);
    assert!(feed.is_playing(1).await);
}

#[tokio::test(start_paused = true)]
async fn test_home_feed_dispose_keeps_handles_pooled() {
    let h = Harness::new();
    let feed = h.feed(5);
    feed.on_page_settled(0).await.unwrap();
    advance(400).await;
    let resident = h.shared.len().await;
    assert_eq!(resident, 3);

    feed.dispose().await;
    assert_eq!(h.shared.len().await, resident);
    assert_eq!(h.shared.playing_count().await, 0);
    assert!(feed.on_page_settled(1).await.is_err());

    // A new feed over the same list starts instantly from the pool
    let again = h.feed(5);
    again.on_page_settled(0).await.unwrap();
    assert!(again.is_playing(0).await);
    assert_eq!(h.backend.opens_for("v0").len(), 1);
    assert!(h.shared.stats().instant_hits >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_profile_feed_dispose_releases_everything_it_created() {
    let h = Harness::new();
    let feed = h.feed_with(helpers::items(&["p0", "p1", "p2", "p3"]), profile());
    feed.on_page_settled(0).await.unwrap();
    advance(400).await;
    assert_eq!(h.backend.live_decoders(), 3);

    feed.dispose().await;
    advance(100).await;
    assert_eq!(h.backend.live_decoders(), 0);
    assert!(h.shared.is_empty().await);
    assert!(h.backend.violations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_profile_feed_disposed_mid_init_releases_late_completions() {
    let h = Harness::new();
    let feed = h.feed_with(helpers::items(&["p0", "p1", "p2"]), profile());
    feed.on_page_settled(0).await.unwrap();
    advance(50).await;

    feed.dispose().await;
    advance(500).await;

    assert_eq!(h.backend.opens_for("p0").len(), 1);
    assert_eq!(h.backend.live_decoders(), 0);
    assert!(h.shared.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_view_tracking_follows_current_video() {
    let h = Harness::new();
    let feed = h.feed(4);
    feed.on_page_settled(0).await.unwrap();
    advance(300).await;

    feed.on_page_changed(1).await;
    advance(300).await;
    feed.dispose().await;

    assert_eq!(
        h.tracker.calls(),
        vec![
            TrackerCall::Start(id("v0")),
            TrackerCall::Stop(id("v0")),
            TrackerCall::Start(id("v1")),
            TrackerCall::Stop(id("v1")),
        ]
    );
}
