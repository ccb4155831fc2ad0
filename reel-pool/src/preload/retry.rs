//! Failure classification and retry backoff
//!
//! **Policy by class:**
//! - `ResourceExhausted`: relieve memory pressure, then back off
//!   `base + step * (attempt - 1)` (10s, 15s, 20s with defaults)
//! - `Timeout` / `NotFound`: fixed delay
//! - `TransientDecode`: logged, never retried
//!
//! `max_attempts` counts failed attempts. Once reached, the retry entry is
//! cleared and the index is left for on-demand initialization.

use crate::decoder::DecoderError;
use reel_common::events::FailureClass;
use std::collections::HashMap;
use std::time::Duration;

/// Substrings platform decoders use to report allocation failure
const OOM_SIGNATURES: &[&str] = &["OutOfMemory", "NO_MEMORY", "OOM", "MemoryError"];

/// Map a decoder error to its failure class
pub fn classify(error: &DecoderError) -> FailureClass {
    match error {
        DecoderError::OutOfMemory(_) => FailureClass::ResourceExhausted,
        DecoderError::Timeout(_) => FailureClass::Timeout,
        DecoderError::Http { status, .. } if (400..500).contains(status) => FailureClass::NotFound,
        DecoderError::Http { .. } | DecoderError::Disposed => FailureClass::TransientDecode,
        DecoderError::Other(message) => classify_message(message),
    }
}

fn classify_message(message: &str) -> FailureClass {
    if OOM_SIGNATURES.iter().any(|sig| message.contains(sig)) {
        return FailureClass::ResourceExhausted;
    }
    if let Some(status) = http_status_in(message) {
        if (400..500).contains(&status) {
            return FailureClass::NotFound;
        }
    }
    let lower = message.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        return FailureClass::Timeout;
    }
    FailureClass::TransientDecode
}

/// First three-digit HTTP status in a message mentioning HTTP or a status
fn http_status_in(message: &str) -> Option<u16> {
    let lower = message.to_ascii_lowercase();
    if !lower.contains("http") && !lower.contains("status") {
        return None;
    }
    lower
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|status| (100..600).contains(status))
}

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub oom_backoff_base: Duration,
    pub oom_backoff_step: Duration,
    pub fixed_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt, given the 1-based number of the
    /// attempt that just failed; None means give up
    pub fn delay_for(&self, class: FailureClass, failed_attempt: u32) -> Option<Duration> {
        if !class.is_retryable() || failed_attempt >= self.max_attempts {
            return None;
        }
        match class {
            FailureClass::ResourceExhausted => {
                Some(self.oom_backoff_base + self.oom_backoff_step * failed_attempt.saturating_sub(1))
            }
            FailureClass::Timeout | FailureClass::NotFound => Some(self.fixed_delay),
            FailureClass::TransientDecode => None,
        }
    }
}

/// Failure bookkeeping for one index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryEntry {
    pub attempts: u32,
    pub last_class: FailureClass,
}

/// index → attempts and last failure class
#[derive(Debug, Default)]
pub struct RetryState {
    entries: HashMap<usize, RetryEntry>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure; returns the number of failures so far
    pub fn record_failure(&mut self, index: usize, class: FailureClass) -> u32 {
        let entry = self.entries.entry(index).or_insert(RetryEntry {
            attempts: 0,
            last_class: class,
        });
        entry.attempts += 1;
        entry.last_class = class;
        entry.attempts
    }

    pub fn clear(&mut self, index: usize) {
        self.entries.remove(&index);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn attempts(&self, index: usize) -> u32 {
        self.entries.get(&index).map(|e| e.attempts).unwrap_or(0)
    }

    pub fn entry(&self, index: usize) -> Option<RetryEntry> {
        self.entries.get(&index).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            oom_backoff_base: Duration::from_secs(10),
            oom_backoff_step: Duration::from_secs(5),
            fixed_delay: Duration::from_secs(3),
        }
    }

    #[test]
    fn test_classify_typed_errors() {
        assert_eq!(
            classify(&DecoderError::OutOfMemory("codec".into())),
            FailureClass::ResourceExhausted
        );
        assert_eq!(
            classify(&DecoderError::Http { status: 403, message: "expired".into() }),
            FailureClass::NotFound
        );
        assert_eq!(
            classify(&DecoderError::Http { status: 503, message: "busy".into() }),
            FailureClass::TransientDecode
        );
        assert_eq!(classify(&DecoderError::Timeout("init".into())), FailureClass::Timeout);
    }

    #[test]
    fn test_classify_free_form_messages() {
        let cases = [
            ("MediaCodec: NO_MEMORY while configuring", FailureClass::ResourceExhausted),
            ("java.lang.OutOfMemoryError", FailureClass::ResourceExhausted),
            ("Source error: HTTP 404 Not Found", FailureClass::NotFound),
            ("Response status code: 410", FailureClass::NotFound),
            ("HTTP 500 upstream", FailureClass::TransientDecode),
            ("connection timed out", FailureClass::Timeout),
            ("unsupported codec profile", FailureClass::TransientDecode),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(&DecoderError::Other(message.into())), expected, "{}", message);
        }
    }

    #[test]
    fn test_oom_backoff_increases_then_stops() {
        let p = policy();
        assert_eq!(p.delay_for(FailureClass::ResourceExhausted, 1), Some(Duration::from_secs(10)));
        assert_eq!(p.delay_for(FailureClass::ResourceExhausted, 2), Some(Duration::from_secs(15)));
        assert_eq!(p.delay_for(FailureClass::ResourceExhausted, 3), None);
    }

    #[test]
    fn test_fixed_delay_classes_and_non_retryable() {
        let p = policy();
        assert_eq!(p.delay_for(FailureClass::Timeout, 1), Some(Duration::from_secs(3)));
        assert_eq!(p.delay_for(FailureClass::NotFound, 2), Some(Duration::from_secs(3)));
        assert_eq!(p.delay_for(FailureClass::TransientDecode, 1), None);
    }

    #[test]
    fn test_retry_state_counts_and_clears() {
        let mut state = RetryState::new();
        assert_eq!(state.record_failure(4, FailureClass::ResourceExhausted), 1);
        assert_eq!(state.record_failure(4, FailureClass::Timeout), 2);
        assert_eq!(state.entry(4).unwrap().last_class, FailureClass::Timeout);
        state.clear(4);
        assert_eq!(state.attempts(4), 0);
        assert!(state.is_empty());
    }
}
