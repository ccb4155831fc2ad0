//! Page-change debouncer
//!
//! Each page change supersedes the previous one. Timers carry the ticket
//! they were started with; only the newest ticket fires.

use tracing::trace;

#[derive(Debug, Default)]
pub struct PageDebouncer {
    generation: u64,
    pending: Option<(u64, usize)>,
}

impl PageDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a page change; returns the ticket its timer must present
    pub fn schedule(&mut self, index: usize) -> u64 {
        self.generation += 1;
        if let Some((_, previous)) = self.pending {
            trace!("Page change to {} supersedes pending {}", index, previous);
        }
        self.pending = Some((self.generation, index));
        self.generation
    }

    /// Timer elapsed; returns the index to settle if `ticket` is still newest
    pub fn fire(&mut self, ticket: u64) -> Option<usize> {
        match self.pending {
            Some((current, index)) if current == ticket => {
                self.pending = None;
                Some(index)
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}
