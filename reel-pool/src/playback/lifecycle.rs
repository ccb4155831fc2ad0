//! App lifecycle state machine
//!
//! Pure transitions returning the actions a feed must apply, so pause and
//! resume effects can be tested without a UI runtime.

use reel_common::events::LifecycleState;

/// Platform lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Resumed,
    Inactive,
    Hidden,
    Paused,
    Detached,
}

/// Effect of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Pause every playing handle
    PauseAll,
    /// Set `is_lifecycle_paused`
    MarkLifecyclePaused,
    /// Clear `is_lifecycle_paused`
    ClearLifecyclePaused,
    /// Re-run autoplay gating for the current index only
    ReevaluateCurrent,
}

/// Compute the next lifecycle state and its actions
pub fn transition(state: LifecycleState, signal: LifecycleSignal) -> (LifecycleState, Vec<LifecycleAction>) {
    use LifecycleAction::*;
    use LifecycleSignal as S;
    use LifecycleState::*;

    match (state, signal) {
        (Foreground, S::Resumed) => (Foreground, vec![]),
        (Background | Detached, S::Resumed) => (Foreground, vec![ClearLifecyclePaused, ReevaluateCurrent]),

        (Foreground, S::Inactive | S::Hidden | S::Paused) => (Background, vec![PauseAll, MarkLifecyclePaused]),
        (Background, S::Inactive | S::Hidden | S::Paused) => (Background, vec![]),
        (Detached, S::Inactive | S::Hidden | S::Paused) => (Detached, vec![]),

        (Foreground | Background, S::Detached) => (Detached, vec![PauseAll, MarkLifecyclePaused]),
        (Detached, S::Detached) => (Detached, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backgrounding_pauses_and_marks() {
        for signal in [LifecycleSignal::Inactive, LifecycleSignal::Hidden, LifecycleSignal::Paused] {
            let (next, actions) = transition(LifecycleState::Foreground, signal);
            assert_eq!(next, LifecycleState::Background);
            assert_eq!(
                actions,
                vec![LifecycleAction::PauseAll, LifecycleAction::MarkLifecyclePaused]
            );
        }
    }

    #[test]
    fn test_resume_reevaluates_current_only_once() {
        let (next, actions) = transition(LifecycleState::Background, LifecycleSignal::Resumed);
        assert_eq!(next, LifecycleState::Foreground);
        assert_eq!(
            actions,
            vec![LifecycleAction::ClearLifecyclePaused, LifecycleAction::ReevaluateCurrent]
        );

        let (_, again) = transition(next, LifecycleSignal::Resumed);
        assert!(again.is_empty());
    }

    #[test]
    fn test_repeated_background_signals_are_idempotent() {
        let (next, _) = transition(LifecycleState::Foreground, LifecycleSignal::Inactive);
        let (next, actions) = transition(next, LifecycleSignal::Paused);
        assert_eq!(next, LifecycleState::Background);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_detach_from_background_still_marks_paused() {
        let (next, actions) = transition(LifecycleState::Background, LifecycleSignal::Detached);
        assert_eq!(next, LifecycleState::Detached);
        assert!(actions.contains(&LifecycleAction::MarkLifecyclePaused));
    }
}
