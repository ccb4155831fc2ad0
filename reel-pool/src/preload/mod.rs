//! Preloading: cold initialization, retry/backoff and decoder event watching

pub mod retry;
pub mod scheduler;
pub mod watcher;

pub use retry::{classify, RetryPolicy, RetryState};
pub use scheduler::{PreloadOutcome, PreloadScheduler};
