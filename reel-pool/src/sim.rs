//! Simulated decoder backend
//!
//! In-process `DecoderBackend` whose decoders run on the tokio clock, so a
//! paused test runtime makes every delay deterministic. Used by the
//! `reel-sim` binary and the test suites.
//!
//! **What it records:**
//! - Every decoder call, in order (`calls`)
//! - Open timestamps per label (`opens_for`), to check backoff spacing
//! - Contract violations: play/pause/seek on a disposed or uninitialized decoder
//! - High-water mark of simultaneously audible decoders (`max_audible`)
//!
//! Failures are scripted per label and consumed one per `initialize`. A
//! playing decoder buffers for `buffering_delay`, then reports its position
//! every `position_interval` and `Ended` at the end of non-looping media.

use crate::decoder::{Decoder, DecoderBackend, DecoderError, DecoderEvent, FeedItem, PlayableUrl};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

/// Scripted initialization failure
#[derive(Debug, Clone, PartialEq)]
pub enum SimFailure {
    OutOfMemory,
    Http(u16),
    /// `initialize` never completes
    Hang,
    Other(String),
}

/// One recorded decoder call
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Open { label: String },
    Initialize { label: String },
    Play { label: String, volume: f32 },
    Pause { label: String },
    Seek { label: String, position: Duration },
    SetVolume { label: String, volume: f32 },
    SetLooping { label: String, looping: bool },
    Dispose { label: String },
}

impl SimCall {
    pub fn label(&self) -> &str {
        match self {
            SimCall::Open { label }
            | SimCall::Initialize { label }
            | SimCall::Play { label, .. }
            | SimCall::Pause { label }
            | SimCall::Seek { label, .. }
            | SimCall::SetVolume { label, .. }
            | SimCall::SetLooping { label, .. }
            | SimCall::Dispose { label } => label,
        }
    }
}

#[derive(Debug)]
struct DecoderStatus {
    label: String,
    playing: bool,
    volume: f32,
    disposed: bool,
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<SimCall>,
    opens: Vec<(String, Instant)>,
    failures: HashMap<String, VecDeque<SimFailure>>,
    decoders: HashMap<u64, DecoderStatus>,
    violations: Vec<String>,
    max_audible: usize,
}

impl Recorder {
    fn audible(&self) -> Vec<String> {
        self.decoders
            .values()
            .filter(|d| !d.disposed && d.playing && d.volume > 0.0)
            .map(|d| d.label.clone())
            .collect()
    }

    fn update_audible(&mut self) {
        self.max_audible = self.max_audible.max(self.audible().len());
    }
}

/// Simulated backend (cheap to clone; clones share the recorder)
#[derive(Debug, Clone)]
pub struct SimBackend {
    recorder: Arc<Mutex<Recorder>>,
    next_id: Arc<AtomicU64>,
    init_delay: Duration,
    buffering_delay: Duration,
    position_interval: Duration,
    media_duration: Duration,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    pub fn new() -> Self {
        Self {
            recorder: Arc::new(Mutex::new(Recorder::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            init_delay: Duration::from_millis(100),
            buffering_delay: Duration::from_millis(30),
            position_interval: Duration::from_millis(100),
            media_duration: Duration::from_secs(15),
        }
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn with_buffering_delay(mut self, delay: Duration) -> Self {
        self.buffering_delay = delay;
        self
    }

    /// Zero disables position reports
    pub fn with_position_interval(mut self, interval: Duration) -> Self {
        self.position_interval = interval;
        self
    }

    pub fn with_media_duration(mut self, duration: Duration) -> Self {
        self.media_duration = duration;
        self
    }

    pub fn media_duration(&self) -> Duration {
        self.media_duration
    }

    fn recorder(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `times` initializations of `label`
    pub fn fail_times(&self, label: &str, failure: SimFailure, times: usize) {
        let mut recorder = self.recorder();
        let queue = recorder.failures.entry(label.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(failure.clone());
        }
    }

    pub fn fail_next(&self, label: &str, failure: SimFailure) {
        self.fail_times(label, failure, 1);
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.recorder().calls.clone()
    }

    pub fn calls_for(&self, label: &str) -> Vec<SimCall> {
        self.recorder().calls.iter().filter(|c| c.label() == label).cloned().collect()
    }

    /// Times at which `label` was opened
    pub fn opens_for(&self, label: &str) -> Vec<Instant> {
        self.recorder()
            .opens
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn violations(&self) -> Vec<String> {
        self.recorder().violations.clone()
    }

    /// Labels currently playing with volume above zero
    pub fn audible(&self) -> Vec<String> {
        let mut audible = self.recorder().audible();
        audible.sort();
        audible
    }

    pub fn max_audible(&self) -> usize {
        self.recorder().max_audible
    }

    /// Decoders opened and not yet disposed
    pub fn live_decoders(&self) -> usize {
        self.recorder().decoders.values().filter(|d| !d.disposed).count()
    }

    pub fn is_live(&self, label: &str) -> bool {
        self.recorder()
            .decoders
            .values()
            .any(|d| d.label == label && !d.disposed)
    }
}

fn label_of(url: &str) -> String {
    url.strip_prefix("sim://").unwrap_or(url).to_string()
}

/// `n` progressive items `v0..v{n-1}` with `sim://` URLs
pub fn feed_items(n: usize) -> Vec<FeedItem> {
    (0..n)
        .map(|i| FeedItem::progressive(format!("v{}", i), &format!("uploader-{}", i % 3), &format!("sim://v{}", i)))
        .collect()
}

#[async_trait]
impl DecoderBackend for SimBackend {
    async fn open(&self, url: &PlayableUrl) -> Result<Box<dyn Decoder>, DecoderError> {
        let label = label_of(&url.url);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut recorder = self.recorder();
            recorder.calls.push(SimCall::Open { label: label.clone() });
            recorder.opens.push((label.clone(), Instant::now()));
            recorder.decoders.insert(
                id,
                DecoderStatus {
                    label: label.clone(),
                    playing: false,
                    volume: 1.0,
                    disposed: false,
                },
            );
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(SimDecoder {
            id,
            label,
            backend: self.clone(),
            initialized: false,
            disposed: false,
            playing: false,
            looping: true,
            base_position: Duration::ZERO,
            play_started: None,
            generation: Arc::new(AtomicU64::new(0)),
            events_tx: Some(tx),
            events_rx: Some(rx),
        }))
    }
}

/// One simulated decoder
pub struct SimDecoder {
    id: u64,
    label: String,
    backend: SimBackend,
    initialized: bool,
    disposed: bool,
    playing: bool,
    looping: bool,
    base_position: Duration,
    play_started: Option<Instant>,
    /// Bumped on pause/seek/dispose to silence stale timers
    generation: Arc<AtomicU64>,
    events_tx: Option<mpsc::UnboundedSender<DecoderEvent>>,
    events_rx: Option<mpsc::UnboundedReceiver<DecoderEvent>>,
}

impl SimDecoder {
    fn record(&self, call: SimCall) {
        self.backend.recorder().calls.push(call);
    }

    fn check_usable(&self, op: &str) {
        if self.disposed || !self.initialized {
            let reason = if self.disposed { "disposed" } else { "uninitialized" };
            self.backend
                .recorder()
                .violations
                .push(format!("{} on {} decoder {}", op, reason, self.label));
        }
    }

    fn update_status(&self, volume: Option<f32>) {
        let mut recorder = self.backend.recorder();
        if let Some(status) = recorder.decoders.get_mut(&self.id) {
            status.playing = self.playing;
            status.disposed = self.disposed;
            if let Some(volume) = volume {
                status.volume = volume;
            }
        }
        recorder.update_audible();
    }

    fn raw_position(&self) -> Duration {
        match self.play_started {
            Some(started) if self.playing => self.base_position + started.elapsed(),
            _ => self.base_position,
        }
    }

    /// Buffer briefly, then drive the clock until pause/seek/dispose
    ///
    /// Reports `Position` every `position_interval` (wrapping when looping)
    /// and `Ended` once non-looping media runs out.
    fn spawn_playback_timers(&self) {
        let Some(tx) = self.events_tx.clone() else {
            return;
        };
        let generation = Arc::clone(&self.generation);
        let expected = generation.load(Ordering::SeqCst);
        let current = move || generation.load(Ordering::SeqCst) == expected;
        let buffering_delay = self.backend.buffering_delay;
        let interval = self.backend.position_interval;
        let duration = self.backend.media_duration;
        let base = self.base_position;
        let started = self.play_started.unwrap_or_else(Instant::now);
        let looping = self.looping;

        let _ = tx.send(DecoderEvent::Buffering(true));
        tokio::spawn(async move {
            tokio::time::sleep(buffering_delay).await;
            if !current() {
                return;
            }
            let _ = tx.send(DecoderEvent::Buffering(false));
            if duration.is_zero() {
                return;
            }

            if interval.is_zero() {
                if looping {
                    return;
                }
                tokio::time::sleep_until(started + duration.saturating_sub(base)).await;
                if current() {
                    let _ = tx.send(DecoderEvent::Ended);
                }
                return;
            }

            let mut ticker = tokio::time::interval_at(started + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                let now = ticker.tick().await;
                if !current() {
                    return;
                }
                let raw = base + now.saturating_duration_since(started);
                if !looping && raw >= duration {
                    let _ = tx.send(DecoderEvent::Position(duration));
                    let _ = tx.send(DecoderEvent::Ended);
                    return;
                }
                let position = if looping {
                    Duration::from_nanos((raw.as_nanos() % duration.as_nanos()) as u64)
                } else {
                    raw
                };
                if tx.send(DecoderEvent::Position(position)).is_err() {
                    return;
                }
            }
        });
    }
}

#[async_trait]
impl Decoder for SimDecoder {
    async fn initialize(&mut self) -> Result<(), DecoderError> {
        self.record(SimCall::Initialize { label: self.label.clone() });
        let failure = self
            .backend
            .recorder()
            .failures
            .get_mut(&self.label)
            .and_then(|q| q.pop_front());

        if failure == Some(SimFailure::Hang) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.backend.init_delay).await;

        match failure {
            None => {
                self.initialized = true;
                Ok(())
            }
            Some(SimFailure::OutOfMemory) => Err(DecoderError::OutOfMemory(format!(
                "MediaCodec NO_MEMORY opening {}",
                self.label
            ))),
            Some(SimFailure::Http(status)) => Err(DecoderError::Http {
                status,
                message: format!("GET {}", self.label),
            }),
            Some(SimFailure::Other(message)) => Err(DecoderError::Other(message)),
            Some(SimFailure::Hang) => Err(DecoderError::Timeout(self.label.clone())),
        }
    }

    async fn play(&mut self) -> Result<(), DecoderError> {
        self.check_usable("play");
        let volume = self
            .backend
            .recorder()
            .decoders
            .get(&self.id)
            .map(|d| d.volume)
            .unwrap_or(1.0);
        self.record(SimCall::Play {
            label: self.label.clone(),
            volume,
        });
        if self.disposed {
            return Err(DecoderError::Disposed);
        }
        if !self.playing {
            self.playing = true;
            self.play_started = Some(Instant::now());
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.spawn_playback_timers();
        }
        self.update_status(None);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), DecoderError> {
        self.check_usable("pause");
        self.record(SimCall::Pause { label: self.label.clone() });
        if self.disposed {
            return Err(DecoderError::Disposed);
        }
        if self.playing {
            self.base_position = self.raw_position().min(self.backend.media_duration);
            self.playing = false;
            self.play_started = None;
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.update_status(None);
        Ok(())
    }

    async fn seek(&mut self, position: Duration) -> Result<(), DecoderError> {
        self.check_usable("seek");
        self.record(SimCall::Seek {
            label: self.label.clone(),
            position,
        });
        if self.disposed {
            return Err(DecoderError::Disposed);
        }
        self.base_position = position.min(self.backend.media_duration);
        if self.playing {
            // Restart the clock from the new position
            self.play_started = Some(Instant::now());
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.spawn_playback_timers();
        }
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<(), DecoderError> {
        self.record(SimCall::SetVolume {
            label: self.label.clone(),
            volume,
        });
        if self.disposed {
            return Err(DecoderError::Disposed);
        }
        self.update_status(Some(volume));
        Ok(())
    }

    async fn set_looping(&mut self, looping: bool) -> Result<(), DecoderError> {
        self.record(SimCall::SetLooping {
            label: self.label.clone(),
            looping,
        });
        self.looping = looping;
        Ok(())
    }

    fn position(&self) -> Duration {
        let duration = self.backend.media_duration;
        let raw = self.raw_position();
        if duration.is_zero() {
            return raw;
        }
        if self.looping {
            Duration::from_nanos((raw.as_nanos() % duration.as_nanos()) as u64)
        } else {
            raw.min(duration)
        }
    }

    fn duration(&self) -> Option<Duration> {
        self.initialized.then_some(self.backend.media_duration)
    }

    fn is_buffering(&self) -> bool {
        match self.play_started {
            Some(started) if self.playing => started.elapsed() < self.backend.buffering_delay,
            _ => false,
        }
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DecoderEvent>> {
        self.events_rx.take()
    }

    async fn dispose(&mut self) {
        self.record(SimCall::Dispose { label: self.label.clone() });
        if self.disposed {
            self.backend
                .recorder()
                .violations
                .push(format!("double dispose of {}", self.label));
            return;
        }
        self.disposed = true;
        self.playing = false;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.events_tx = None;
        self.update_status(None);
    }
}
