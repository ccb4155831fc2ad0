//! Autoplay gating
//!
//! An automatic `Playing` transition needs all of:
//! 1. app foregrounded (`!is_lifecycle_paused`)
//! 2. index not manually paused
//! 3. opened from a profile, from a deep link, or feed tab active and screen visible
//!
//! A user tap skips rules 2 and 3 (the caller clears the manual pause) but
//! still obeys rule 1.

use std::collections::BTreeSet;

/// What asked for playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayTrigger {
    /// Page settle, resume, preload completion
    Auto,
    /// Explicit tap on the video
    UserTap,
    /// One-shot replay after sign-in
    SignInReplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    LifecyclePaused,
    UserPaused,
    /// Only the current index may autoplay
    NotCurrent,
    /// Neither profile/deep-link entry nor a visible active tab
    NotVisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
}

/// Per-feed playback context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackContext {
    pub current_index: usize,
    pub is_screen_visible: bool,
    pub is_lifecycle_paused: bool,
    pub opened_from_profile: bool,
    pub opened_from_deep_link: bool,
    pub feed_tab_active: bool,
    /// Indices the user explicitly paused
    pub user_paused: BTreeSet<usize>,
}

impl PlaybackContext {
    pub fn new(opened_from_profile: bool, opened_from_deep_link: bool) -> Self {
        Self {
            current_index: 0,
            is_screen_visible: true,
            is_lifecycle_paused: false,
            opened_from_profile,
            opened_from_deep_link,
            feed_tab_active: true,
            user_paused: BTreeSet::new(),
        }
    }

    /// Rule 3
    fn context_allows(&self) -> bool {
        self.opened_from_profile || self.opened_from_deep_link || (self.feed_tab_active && self.is_screen_visible)
    }

    pub fn autoplay_decision(&self, index: usize, trigger: PlayTrigger) -> GateDecision {
        if self.is_lifecycle_paused {
            return GateDecision::Deny(DenyReason::LifecyclePaused);
        }
        if trigger == PlayTrigger::UserTap {
            return GateDecision::Allow;
        }
        if index != self.current_index {
            return GateDecision::Deny(DenyReason::NotCurrent);
        }
        if self.user_paused.contains(&index) {
            return GateDecision::Deny(DenyReason::UserPaused);
        }
        if !self.context_allows() {
            return GateDecision::Deny(DenyReason::NotVisible);
        }
        GateDecision::Allow
    }

    pub fn is_user_paused(&self, index: usize) -> bool {
        self.user_paused.contains(&index)
    }

    pub fn mark_user_paused(&mut self, index: usize) {
        self.user_paused.insert(index);
    }

    /// Returns whether the index had been manually paused
    pub fn clear_user_paused(&mut self, index: usize) -> bool {
        self.user_paused.remove(&index)
    }

    pub fn clear_all_user_paused(&mut self) {
        self.user_paused.clear();
    }
}
