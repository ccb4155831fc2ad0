//! Per-feed view over the shared pool
//!
//! Maps each displayed index to the identity shown there and tracks the
//! feed-local flags (slot state, buffering, forced surface mount). Handles
//! themselves always live in `SharedPool`; the local pool only remembers
//! which identity each index refers to.

use crate::decoder::FeedItem;
use crate::error::{Error, Result};
use crate::playback::slot::{self, SlotEvent, SlotState};
use crate::pool::handle::HandleSnapshot;
use crate::pool::shared::SharedPool;
use reel_common::{FeedId, VideoId};
use std::collections::HashMap;
use tracing::debug;

/// Feed-local bookkeeping for one index
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSlot {
    pub video_id: VideoId,
    pub state: SlotState,
    pub buffering: bool,
    pub surface_forced: bool,
}

/// Index → identity map of one feed instance
#[derive(Debug)]
pub struct LocalPool {
    feed_id: FeedId,
    items: Vec<FeedItem>,
    slots: HashMap<usize, LocalSlot>,
}

impl LocalPool {
    pub fn new(feed_id: FeedId, items: Vec<FeedItem>) -> Self {
        Self {
            feed_id,
            items,
            slots: HashMap::new(),
        }
    }

    pub fn feed_id(&self) -> FeedId {
        self.feed_id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, index: usize) -> Option<&FeedItem> {
        self.items.get(index)
    }

    pub fn video_id(&self, index: usize) -> Option<&VideoId> {
        self.items.get(index).map(|i| &i.video_id)
    }

    /// Index currently displaying `video_id`
    pub fn index_of(&self, video_id: &VideoId) -> Option<usize> {
        self.items.iter().position(|i| &i.video_id == video_id)
    }

    pub fn slot(&self, index: usize) -> Option<&LocalSlot> {
        self.slots.get(&index)
    }

    pub fn state(&self, index: usize) -> SlotState {
        self.slots.get(&index).map(|s| s.state).unwrap_or_default()
    }

    pub fn is_buffering(&self, index: usize) -> bool {
        self.slots.get(&index).map(|s| s.buffering).unwrap_or(false)
    }

    pub fn surface_forced(&self, index: usize) -> bool {
        self.slots.get(&index).map(|s| s.surface_forced).unwrap_or(false)
    }

    /// Indices that currently hold a slot
    pub fn bound_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.slots.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Replace the displayed list
    ///
    /// Slots follow their identity to its new index; identities no longer
    /// displayed lose their slot (the handle stays in the shared pool).
    pub fn set_items(&mut self, items: Vec<FeedItem>) {
        let mut by_id: HashMap<VideoId, LocalSlot> = self
            .slots
            .drain()
            .map(|(_, slot)| (slot.video_id.clone(), slot))
            .collect();

        for (index, item) in items.iter().enumerate() {
            if let Some(slot) = by_id.remove(&item.video_id) {
                self.slots.insert(index, slot);
            }
        }
        if !by_id.is_empty() {
            debug!("Feed {}: {} identities left the list", self.feed_id, by_id.len());
        }
        self.items = items;
    }

    /// Drive the slot machine for an index
    ///
    /// A slot that reaches `Absent` is removed.
    pub fn apply(&mut self, index: usize, event: SlotEvent) -> Result<SlotState> {
        let current = self.state(index);
        let next = slot::next(current, event)?;

        if next == SlotState::Absent {
            self.slots.remove(&index);
            return Ok(next);
        }

        match self.slots.get_mut(&index) {
            Some(slot) => slot.state = next,
            None => {
                let video_id = self.video_id(index).cloned().ok_or(Error::UnknownIndex(index))?;
                self.slots.insert(
                    index,
                    LocalSlot {
                        video_id,
                        state: next,
                        buffering: false,
                        surface_forced: false,
                    },
                );
            }
        }
        Ok(next)
    }

    pub fn set_buffering(&mut self, index: usize, buffering: bool) {
        if let Some(slot) = self.slots.get_mut(&index) {
            slot.buffering = buffering;
        }
    }

    /// Returns false when the index has no slot to mount
    pub fn set_surface_forced(&mut self, index: usize) -> bool {
        match self.slots.get_mut(&index) {
            Some(slot) => {
                slot.surface_forced = true;
                true
            }
            None => false,
        }
    }

    /// Forget the slot bound to an evicted identity; returns its index
    pub fn drop_binding(&mut self, video_id: &VideoId) -> Option<usize> {
        let index = self
            .slots
            .iter()
            .find(|(_, s)| &s.video_id == video_id)
            .map(|(i, _)| *i)?;
        self.clear_disposed(index);
        Some(index)
    }

    /// Walk a slot through `Disposed` back to `Absent`
    fn clear_disposed(&mut self, index: usize) {
        if let Err(e) = self.apply(index, SlotEvent::Disposed) {
            debug!("Feed {}: slot {} not disposable: {}", self.feed_id, index, e);
        }
        if let Err(e) = self.apply(index, SlotEvent::Cleared) {
            debug!("Feed {}: slot {} not clearable: {}", self.feed_id, index, e);
            self.slots.remove(&index);
        }
    }

    /// Find the handle for `index` in the shared pool by identity
    ///
    /// A resident, initialized handle is re-bound to this index and the slot
    /// attached to it. A slot that claims residency but whose handle is gone
    /// is cleared.
    pub async fn reconcile(&mut self, index: usize, shared: &SharedPool) -> Result<Option<HandleSnapshot>> {
        let video_id = self.video_id(index).cloned().ok_or(Error::UnknownIndex(index))?;

        match shared.get_for_instant_play(&video_id).await {
            Some(snapshot) => {
                shared.bind(&video_id, index).await;
                if !self.state(index).is_resident() {
                    self.apply(index, SlotEvent::Attached { primed: snapshot.primed })?;
                    debug!("Feed {}: reusing resident handle {} at index {}", self.feed_id, video_id, index);
                }
                Ok(Some(snapshot))
            }
            None => {
                if self.state(index).is_resident() {
                    self.clear_disposed(index);
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[&str]) -> Vec<FeedItem> {
        ids.iter()
            .map(|id| FeedItem::progressive(*id, "uploader", &format!("sim://{}", id)))
            .collect()
    }

    #[test]
    fn test_apply_creates_and_clears_slots() {
        let mut local = LocalPool::new(FeedId::generate(), items(&["a", "b"]));
        assert_eq!(local.apply(1, SlotEvent::InitStarted).unwrap(), SlotState::Initializing);
        assert_eq!(local.slot(1).unwrap().video_id, VideoId::new("b"));

        local.apply(1, SlotEvent::Attached { primed: false }).unwrap();
        assert_eq!(local.apply(1, SlotEvent::Disposed).unwrap(), SlotState::Disposed);
        assert_eq!(local.state(1), SlotState::Disposed);
        assert_eq!(local.apply(1, SlotEvent::Cleared).unwrap(), SlotState::Absent);
        assert_eq!(local.state(1), SlotState::Absent);
    }

    #[test]
    fn test_apply_rejects_unknown_index() {
        let mut local = LocalPool::new(FeedId::generate(), items(&["a"]));
        assert!(matches!(local.apply(5, SlotEvent::InitStarted), Err(Error::UnknownIndex(5))));
    }

    #[test]
    fn test_set_items_moves_slots_with_identity() {
        let mut local = LocalPool::new(FeedId::generate(), items(&["a", "b", "c"]));
        local.apply(2, SlotEvent::Attached { primed: true }).unwrap();
        local.apply(0, SlotEvent::Attached { primed: false }).unwrap();

        local.set_items(items(&["new", "c", "b"]));

        assert_eq!(local.state(1), SlotState::Primed);
        assert_eq!(local.slot(1).unwrap().video_id, VideoId::new("c"));
        assert_eq!(local.state(0), SlotState::Absent, "'a' left the list");
        assert_eq!(local.index_of(&VideoId::new("b")), Some(2));
    }

    #[test]
    fn test_drop_binding_returns_index() {
        let mut local = LocalPool::new(FeedId::generate(), items(&["a", "b"]));
        local.apply(1, SlotEvent::Attached { primed: false }).unwrap();
        assert_eq!(local.drop_binding(&VideoId::new("b")), Some(1));
        assert_eq!(local.state(1), SlotState::Absent, "disposed slot is cleared");
        assert_eq!(local.drop_binding(&VideoId::new("b")), None);
    }
}
