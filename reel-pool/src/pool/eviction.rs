//! Eviction policy
//!
//! Pure selection of handles to drop. Two passes:
//! 1. Distance: anything further than `keep_range` from the current index.
//! 2. LRU: if the pool is still above `max_pool_size`, oldest access first.
//!
//! A candidate that is audibly playing is never selected. A pinned candidate
//! (the handle bound to the current index) is never selected either.

use reel_common::events::EvictionReason;
use reel_common::VideoId;
use tokio::time::Instant;

/// Input row for the policy
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub video_id: VideoId,
    /// Last index this handle was bound to
    pub index: usize,
    pub last_accessed: Instant,
    /// Tie-breaker for equal timestamps (monotonic access counter)
    pub access_seq: u64,
    pub playing: bool,
    pub pinned: bool,
}

/// One selected handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub video_id: VideoId,
    pub reason: EvictionReason,
}

/// Select handles to drop
///
/// Returns distance evictions first (ordered by index), then LRU evictions
/// (oldest first).
pub fn select(
    pool: &[EvictionCandidate],
    current_index: usize,
    keep_range: usize,
    max_pool_size: usize,
) -> Vec<Eviction> {
    let protected = |c: &EvictionCandidate| c.playing || c.pinned;

    let mut by_distance: Vec<&EvictionCandidate> = pool
        .iter()
        .filter(|c| !protected(c) && c.index.abs_diff(current_index) > keep_range)
        .collect();
    by_distance.sort_by_key(|c| c.index);

    let mut selected: Vec<Eviction> = by_distance
        .iter()
        .map(|c| Eviction {
            video_id: c.video_id.clone(),
            reason: EvictionReason::Distance,
        })
        .collect();

    let remaining = pool.len() - selected.len();
    if remaining > max_pool_size {
        let mut excess = remaining - max_pool_size;
        let mut by_age: Vec<&EvictionCandidate> = pool
            .iter()
            .filter(|c| !protected(c) && !by_distance.iter().any(|d| d.video_id == c.video_id))
            .collect();
        by_age.sort_by_key(|c| (c.last_accessed, c.access_seq));

        for candidate in by_age {
            if excess == 0 {
                break;
            }
            selected.push(Eviction {
                video_id: candidate.video_id.clone(),
                reason: EvictionReason::Lru,
            });
            excess -= 1;
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn candidate(id: &str, index: usize, age_rank: u64) -> EvictionCandidate {
        let base = Instant::now();
        EvictionCandidate {
            video_id: VideoId::new(id),
            index,
            last_accessed: base + Duration::from_millis(age_rank),
            access_seq: age_rank,
            playing: false,
            pinned: false,
        }
    }

    fn ids(selection: &[Eviction]) -> Vec<&str> {
        selection.iter().map(|e| e.video_id.as_str()).collect()
    }

    #[test]
    fn test_nothing_selected_within_bounds() {
        let pool = vec![candidate("a", 4, 1), candidate("b", 5, 2), candidate("c", 6, 3)];
        assert!(select(&pool, 5, 3, 5).is_empty());
    }

    #[test]
    fn test_distance_selects_far_handles_both_directions() {
        let pool = vec![
            candidate("far-back", 0, 1),
            candidate("edge", 2, 2),
            candidate("cur", 5, 3),
            candidate("far-ahead", 9, 4),
        ];
        let selection = select(&pool, 5, 3, 10);
        assert_eq!(ids(&selection), vec!["far-back", "far-ahead"]);
        assert!(selection.iter().all(|e| e.reason == EvictionReason::Distance));
    }

    #[test]
    fn test_lru_trims_to_max_size_oldest_first() {
        let pool = vec![
            candidate("old", 3, 1),
            candidate("mid", 4, 2),
            candidate("new", 5, 3),
            candidate("newer", 6, 4),
        ];
        let selection = select(&pool, 5, 3, 2);
        assert_eq!(ids(&selection), vec!["old", "mid"]);
        assert!(selection.iter().all(|e| e.reason == EvictionReason::Lru));
    }

    #[test]
    fn test_lru_counts_distance_evictions_first() {
        let pool = vec![
            candidate("gone", 0, 5),
            candidate("a", 5, 1),
            candidate("b", 6, 2),
            candidate("c", 7, 3),
        ];
        // Distance removes one; three remain against a bound of two
        let selection = select(&pool, 5, 3, 2);
        assert_eq!(ids(&selection), vec!["gone", "a"]);
    }

    #[test]
    fn test_playing_handle_never_selected() {
        let mut playing = candidate("playing", 0, 0);
        playing.playing = true;
        let pool = vec![playing, candidate("x", 9, 1), candidate("y", 9, 2)];

        let selection = select(&pool, 9, 1, 1);
        assert!(!ids(&selection).contains(&"playing"));
        // Bound cannot be met without the playing handle; best effort
        assert_eq!(ids(&selection), vec!["x", "y"]);
    }

    #[test]
    fn test_pinned_handle_survives_lru() {
        let mut current = candidate("current", 5, 0);
        current.pinned = true;
        let pool = vec![current, candidate("a", 6, 1), candidate("b", 7, 2)];

        let selection = select(&pool, 5, 3, 2);
        assert_eq!(ids(&selection), vec!["a"]);
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_access_sequence() {
        let now = Instant::now();
        let mk = |id: &str, seq: u64| EvictionCandidate {
            video_id: VideoId::new(id),
            index: 1,
            last_accessed: now,
            access_seq: seq,
            playing: false,
            pinned: false,
        };
        let pool = vec![mk("second", 2), mk("first", 1), mk("third", 3)];
        let selection = select(&pool, 1, 3, 2);
        assert_eq!(ids(&selection), vec!["first"]);
    }
}
