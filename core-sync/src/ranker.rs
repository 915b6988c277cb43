//! Candidate ordering.
//!
//! Every strategy is one comparison function; the sort is stable, so ties keep
//! their selection order and ranking the same input twice yields the same
//! output.

use core_library::LibraryEntry;
use core_runtime::config::RankingStrategy;
use std::cmp::Ordering;

/// Order `entries` by `strategy`. `now_ms` is only read by
/// [`RankingStrategy::NearestNextUpdate`].
pub fn rank(mut entries: Vec<LibraryEntry>, strategy: RankingStrategy, now_ms: i64) -> Vec<LibraryEntry> {
    entries.sort_by(|a, b| compare(strategy, a, b, now_ms));
    entries
}

fn compare(strategy: RankingStrategy, a: &LibraryEntry, b: &LibraryEntry, now_ms: i64) -> Ordering {
    match strategy {
        RankingStrategy::Alphabetical => a.title.cmp(&b.title),
        RankingStrategy::LeastRecentlyUpdated => a.last_synced_at.cmp(&b.last_synced_at),
        RankingStrategy::NearestNextUpdate => a
            .next_sync_at
            .abs_diff(now_ms)
            .cmp(&b.next_sync_at.abs_diff(now_ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_000_000;

    fn entry(id: i64, title: &str, last_synced_at: i64, next_sync_at: i64) -> LibraryEntry {
        let mut entry = LibraryEntry::new(1, format!("/{}", id), title);
        entry.id = id;
        entry.last_synced_at = last_synced_at;
        entry.next_sync_at = next_sync_at;
        entry
    }

    fn ids(entries: &[LibraryEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.id).collect()
    }

    fn library() -> Vec<LibraryEntry> {
        vec![
            entry(1, "banana", 300, NOW + 50),
            entry(2, "Apple", 100, NOW - 10),
            entry(3, "apple", 200, NOW + 10),
            entry(4, "Cherry", 100, NOW - 500),
        ]
    }

    #[test]
    fn test_alphabetical_is_case_sensitive_ordinal() {
        let ranked = rank(library(), RankingStrategy::Alphabetical, NOW);
        assert_eq!(ids(&ranked), vec![2, 4, 3, 1]);
    }

    #[test]
    fn test_least_recently_updated_first() {
        let ranked = rank(library(), RankingStrategy::LeastRecentlyUpdated, NOW);
        // 2 and 4 tie at 100 and keep their input order
        assert_eq!(ids(&ranked), vec![2, 4, 3, 1]);
    }

    #[test]
    fn test_nearest_next_update_either_direction() {
        let ranked = rank(library(), RankingStrategy::NearestNextUpdate, NOW);
        // 2 (10 overdue) and 3 (10 ahead) tie and keep input order
        assert_eq!(ids(&ranked), vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        for strategy in [
            RankingStrategy::Alphabetical,
            RankingStrategy::LeastRecentlyUpdated,
            RankingStrategy::NearestNextUpdate,
        ] {
            let first = rank(library(), strategy, NOW);
            let second = rank(library(), strategy, NOW);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(rank(vec![], RankingStrategy::NearestNextUpdate, NOW).is_empty());
    }
}
