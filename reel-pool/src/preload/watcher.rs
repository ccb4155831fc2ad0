//! Per-handle decoder event watcher
//!
//! Consumes the notification channel taken from a decoder at registration.
//! Runs until the decoder drops its sender (on dispose).

use crate::decoder::DecoderEvent;
use crate::pool::SharedPool;
use reel_common::events::{EventBus, PoolEvent};
use reel_common::VideoId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Position is within `threshold` of the end
pub fn near_end(position: Duration, duration: Duration, threshold: Duration) -> bool {
    duration > Duration::ZERO && position + threshold >= duration
}

/// Spawn the watcher task for one registered handle
pub fn spawn_watcher(
    shared: Arc<SharedPool>,
    video_id: VideoId,
    events: mpsc::UnboundedReceiver<DecoderEvent>,
    near_end_threshold: Duration,
) {
    tokio::spawn(watch(shared, video_id, events, near_end_threshold));
}

async fn watch(
    shared: Arc<SharedPool>,
    video_id: VideoId,
    mut events: mpsc::UnboundedReceiver<DecoderEvent>,
    near_end_threshold: Duration,
) {
    let bus: EventBus = shared.bus().clone();
    // One end notification per play-through; re-armed when the clock leaves
    // the end window (loop wrap or seek back)
    let mut end_reported = false;

    while let Some(event) = events.recv().await {
        match event {
            DecoderEvent::Buffering(buffering) => {
                if shared.set_buffering(&video_id, buffering).await {
                    bus.emit(PoolEvent::BufferingChanged {
                        video_id: video_id.clone(),
                        buffering,
                    });
                }
            }
            DecoderEvent::Position(position) => {
                let Some(duration) = shared.snapshot(&video_id).await.and_then(|s| s.duration) else {
                    continue;
                };
                if near_end(position, duration, near_end_threshold) {
                    if !end_reported {
                        end_reported = true;
                        bus.emit(PoolEvent::DecoderEnded {
                            video_id: video_id.clone(),
                        });
                    }
                } else {
                    end_reported = false;
                }
            }
            DecoderEvent::Ended => {
                if !end_reported {
                    end_reported = true;
                    bus.emit(PoolEvent::DecoderEnded {
                        video_id: video_id.clone(),
                    });
                }
            }
            DecoderEvent::Error(message) => {
                warn!("Decoder {} reported: {}", video_id, message);
            }
        }
    }
    debug!("Event channel for {} closed", video_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_near_end_threshold() {
        let duration = Duration::from_secs(10);
        let threshold = Duration::from_millis(200);
        assert!(!near_end(Duration::from_millis(9_700), duration, threshold));
        assert!(near_end(Duration::from_millis(9_800), duration, threshold));
        assert!(near_end(duration, duration, threshold));
    }

    #[test]
    fn test_unknown_duration_is_never_near_end() {
        assert!(!near_end(Duration::ZERO, Duration::ZERO, Duration::from_millis(200)));
    }
}
