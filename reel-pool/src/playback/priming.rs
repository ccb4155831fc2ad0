//! First-frame priming task
//!
//! Polls a muted, playing handle until its clock moves and it stops
//! buffering, then pauses it and restores volume. Every poll re-checks the
//! priming token, so a page change or playback start silently ends the run.

use crate::playback::signals::{FeedSignal, PrimingOutcome};
use crate::pool::{PrimingPoll, SharedPool};
use reel_common::VideoId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One priming run
pub struct PrimingRun {
    pub index: usize,
    pub video_id: VideoId,
    pub token: u64,
    pub poll_interval: Duration,
    /// Give up after this long without a frame
    pub bound: Duration,
}

/// Poll until the first frame is ready, the token is superseded, or the bound elapses
pub async fn run(
    shared: Arc<SharedPool>,
    signals: mpsc::UnboundedSender<FeedSignal>,
    cancel: CancellationToken,
    job: PrimingRun,
) {
    let started = Instant::now();
    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                shared.cancel_priming(&job.video_id, Some(job.token)).await;
                break PrimingOutcome::Cancelled;
            }
            _ = tokio::time::sleep(job.poll_interval) => {}
        }

        match shared.poll_priming(&job.video_id, job.token).await {
            PrimingPoll::Cancelled => break PrimingOutcome::Cancelled,
            PrimingPoll::FrameReady => {
                if shared.finish_priming(&job.video_id, job.token).await {
                    break PrimingOutcome::FrameReady;
                }
                break PrimingOutcome::Cancelled;
            }
            PrimingPoll::Pending => {}
        }

        if started.elapsed() >= job.bound {
            shared.cancel_priming(&job.video_id, Some(job.token)).await;
            break PrimingOutcome::TimedOut;
        }
    };

    debug!(
        "Priming {} (index {}) ended after {}ms: {:?}",
        job.video_id,
        job.index,
        started.elapsed().as_millis(),
        outcome
    );
    let _ = signals.send(FeedSignal::PrimingFinished {
        index: job.index,
        video_id: job.video_id,
        token: job.token,
        outcome,
    });
}
