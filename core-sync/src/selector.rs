//! # Entry Selection
//!
//! Filters the library down to the candidates of a sync run.
//!
//! ## Overview
//!
//! Selection is a pure function of the library snapshot, the scope of the run
//! and the configured category and restriction preferences:
//!
//! - `Entry(id)` selects that single entry, bypassing category rules and
//!   restrictions (an explicit request always runs).
//! - `Category(id)` selects the members of one category.
//! - `Library` selects the members of the included categories (all entries if
//!   none are included) minus the members of any excluded category.
//!
//! Season-grouped entries hold no episodes of their own. With season updates
//! enabled they are replaced by their non-favorite seasons, which inherit the
//! parent's categories when they have none; otherwise they are skipped.
//!
//! For content syncs, entries are then checked against the restrictions. The
//! result is deduplicated by entry id and keeps library order, so selecting an
//! already selected list changes nothing.

use chrono::{DateTime, Utc};
use core_library::{EntryStatus, FetchType, LibraryEntry, UpdateStrategy};
use core_runtime::config::{EntryRestrictions, LibrarySyncConfig, RankingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::schedule::{fetch_window, FetchWindow};

// ============================================================================
// Scope Types
// ============================================================================

/// What a run refreshes for each candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTarget {
    /// Episode list (and metadata when enabled)
    #[default]
    Content,
    /// Entry metadata only
    Metadata,
    /// Tracker links only
    Trackers,
}

impl SyncTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTarget::Content => "content",
            SyncTarget::Metadata => "metadata",
            SyncTarget::Trackers => "trackers",
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which part of the library a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ScopeFilter {
    #[default]
    Library,
    Category(i64),
    Entry(i64),
}

/// Trigger of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncScope {
    pub filter: ScopeFilter,
    pub target: SyncTarget,
    /// Overrides the configured ranking strategy for this run.
    pub strategy: Option<RankingStrategy>,
}

impl SyncScope {
    pub fn library() -> Self {
        Self::default()
    }

    pub fn category(id: i64) -> Self {
        Self {
            filter: ScopeFilter::Category(id),
            ..Self::default()
        }
    }

    pub fn entry(id: i64) -> Self {
        Self {
            filter: ScopeFilter::Entry(id),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: SyncTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_strategy(mut self, strategy: RankingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

// ============================================================================
// Skip Reasons
// ============================================================================

/// Why an entry was left out of a content sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Update strategy is not "always update"
    NotAlwaysUpdate,
    /// Publishing finished
    Completed,
    /// Unseen episodes remain
    NotCaughtUp,
    /// Never started
    NotStarted,
    /// Next expected update is beyond the fetch window
    NotInReleasePeriod,
    /// Groups seasons and season updates are off
    SeasonGroup,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotAlwaysUpdate => "not_always_update",
            SkipReason::Completed => "completed",
            SkipReason::NotCaughtUp => "not_caught_up",
            SkipReason::NotStarted => "not_started",
            SkipReason::NotInReleasePeriod => "not_in_release_period",
            SkipReason::SeasonGroup => "season_group",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a selection with the reasons behind every skip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub selected: Vec<LibraryEntry>,
    pub skipped: Vec<(LibraryEntry, SkipReason)>,
}

// ============================================================================
// Entry Selector
// ============================================================================

/// Category and restriction rules of a sync, applied to library snapshots.
#[derive(Debug, Clone)]
pub struct EntrySelector {
    include_categories: Vec<i64>,
    exclude_categories: Vec<i64>,
    restrictions: EntryRestrictions,
    window: FetchWindow,
    update_seasons: bool,
    /// Seasons by parent id
    seasons: HashMap<i64, Vec<LibraryEntry>>,
}

impl EntrySelector {
    pub fn new(
        include_categories: Vec<i64>,
        exclude_categories: Vec<i64>,
        restrictions: EntryRestrictions,
        window: FetchWindow,
    ) -> Self {
        Self {
            include_categories,
            exclude_categories,
            restrictions,
            window,
            update_seasons: false,
            seasons: HashMap::new(),
        }
    }

    /// Replace season-grouped entries by their seasons in `seasons`, keyed by
    /// parent id.
    pub fn with_seasons(mut self, seasons: HashMap<i64, Vec<LibraryEntry>>) -> Self {
        self.update_seasons = true;
        self.seasons = seasons;
        self
    }

    /// Selector for the preferences in `config`, with the fetch window around `now`.
    pub fn from_config(config: &LibrarySyncConfig, now: DateTime<Utc>) -> Self {
        Self::new(
            config.include_categories.clone(),
            config.exclude_categories.clone(),
            config.restrictions,
            fetch_window(now),
        )
    }

    pub fn select(&self, library: &[LibraryEntry], scope: &SyncScope) -> Vec<LibraryEntry> {
        self.select_detailed(library, scope).selected
    }

    pub fn select_detailed(&self, library: &[LibraryEntry], scope: &SyncScope) -> Selection {
        let mut seen = HashSet::new();
        let mut selection = Selection::default();

        for entry in library {
            if !self.in_scope(entry, &scope.filter) {
                continue;
            }

            if entry.fetch_type == FetchType::Seasons && !self.update_seasons {
                if seen.insert(entry.id) {
                    selection.skipped.push((entry.clone(), SkipReason::SeasonGroup));
                }
                continue;
            }

            for candidate in self.expand(entry) {
                if !seen.insert(candidate.id) {
                    continue;
                }

                let skip = match (scope.target, scope.filter) {
                    (_, ScopeFilter::Entry(_)) => None,
                    (SyncTarget::Content, _) => self.restriction_for(&candidate),
                    _ => None,
                };

                match skip {
                    Some(reason) => selection.skipped.push((candidate, reason)),
                    None => selection.selected.push(candidate),
                }
            }
        }

        if !selection.skipped.is_empty() {
            log_skipped(&selection.skipped);
        }

        selection
    }

    /// The entry itself, or the seasons standing in for a season group.
    fn expand(&self, entry: &LibraryEntry) -> Vec<LibraryEntry> {
        if entry.fetch_type != FetchType::Seasons {
            return vec![entry.clone()];
        }

        self.seasons
            .get(&entry.id)
            .map(|seasons| {
                seasons
                    .iter()
                    .filter(|s| s.fetch_type == FetchType::Episodes && !s.favorite)
                    .map(|s| {
                        let mut season = s.clone();
                        if season.categories.is_empty() {
                            season.categories = entry.categories.clone();
                        }
                        season
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn in_scope(&self, entry: &LibraryEntry, filter: &ScopeFilter) -> bool {
        match filter {
            // A season selected through its group stays selected by the group's id
            ScopeFilter::Entry(id) => {
                entry.id == *id || (entry.parent_id == Some(*id) && !entry.favorite)
            }
            ScopeFilter::Category(id) => entry.effective_categories().contains(id),
            ScopeFilter::Library => {
                let categories = entry.effective_categories();
                let included = self.include_categories.is_empty()
                    || categories
                        .iter()
                        .any(|id| self.include_categories.contains(id));
                let excluded = categories
                    .iter()
                    .any(|id| self.exclude_categories.contains(id));
                included && !excluded
            }
        }
    }

    fn restriction_for(&self, entry: &LibraryEntry) -> Option<SkipReason> {
        let r = &self.restrictions;

        if entry.update_strategy != UpdateStrategy::AlwaysUpdate {
            Some(SkipReason::NotAlwaysUpdate)
        } else if r.skip_completed && entry.status == EntryStatus::Completed {
            Some(SkipReason::Completed)
        } else if r.skip_unseen && entry.progress.unseen != 0 {
            Some(SkipReason::NotCaughtUp)
        } else if r.skip_unstarted && entry.progress.total > 0 && !entry.progress.has_started() {
            Some(SkipReason::NotStarted)
        } else if r.skip_outside_release_period && entry.next_sync_at > self.window.upper {
            Some(SkipReason::NotInReleasePeriod)
        } else {
            None
        }
    }
}

fn log_skipped(skipped: &[(LibraryEntry, SkipReason)]) {
    let mut by_reason: BTreeMap<SkipReason, Vec<&str>> = BTreeMap::new();
    for (entry, reason) in skipped {
        by_reason.entry(*reason).or_default().push(entry.title.as_str());
    }

    for (reason, mut titles) in by_reason {
        titles.sort_unstable();
        debug!(reason = %reason, count = titles.len(), "Skipped entries: [{}]", titles.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::ViewingProgress;

    const NOW: i64 = 1_700_000_000_000;

    fn entry(id: i64, title: &str, categories: Vec<i64>) -> LibraryEntry {
        let mut entry = LibraryEntry::new(1, format!("/title/{}", id), title);
        entry.id = id;
        entry.favorite = true;
        entry.categories = categories;
        entry
    }

    fn selector(include: Vec<i64>, exclude: Vec<i64>, restrictions: EntryRestrictions) -> EntrySelector {
        let now = DateTime::<Utc>::from_timestamp_millis(NOW).unwrap();
        EntrySelector::new(include, exclude, restrictions, fetch_window(now))
    }

    fn ids(entries: &[LibraryEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_empty_library() {
        let selector = selector(vec![], vec![], EntryRestrictions::default());
        assert!(selector.select(&[], &SyncScope::library()).is_empty());
    }

    #[test]
    fn test_include_and_exclude_categories() {
        let library = vec![
            entry(1, "A", vec![1]),
            entry(2, "B", vec![1, 2]),
            entry(3, "C", vec![3]),
            entry(4, "D", vec![]),
        ];

        let selector = selector(vec![1], vec![2], EntryRestrictions::default());
        assert_eq!(ids(&selector.select(&library, &SyncScope::library())), vec![1]);

        let everything_but_2 = self::selector(vec![], vec![2], EntryRestrictions::default());
        assert_eq!(
            ids(&everything_but_2.select(&library, &SyncScope::library())),
            vec![1, 3, 4]
        );
    }

    #[test]
    fn test_uncategorized_entries_are_in_default_category() {
        let library = vec![entry(1, "A", vec![]), entry(2, "B", vec![5])];
        let selector = selector(vec![], vec![], EntryRestrictions::default());

        assert_eq!(ids(&selector.select(&library, &SyncScope::category(0))), vec![1]);
    }

    #[test]
    fn test_category_scope_ignores_preferences() {
        let library = vec![entry(1, "A", vec![2]), entry(2, "B", vec![3])];
        let selector = selector(vec![3], vec![2], EntryRestrictions::default());

        assert_eq!(ids(&selector.select(&library, &SyncScope::category(2))), vec![1]);
    }

    #[test]
    fn test_skip_completed_for_content_only() {
        let mut done = entry(1, "Done", vec![]);
        done.status = EntryStatus::Completed;
        let library = vec![done, entry(2, "Airing", vec![])];
        let selector = selector(vec![], vec![], EntryRestrictions::default());

        let selection = selector.select_detailed(&library, &SyncScope::library());
        assert_eq!(ids(&selection.selected), vec![2]);
        assert_eq!(selection.skipped.len(), 1);
        assert_eq!(selection.skipped[0].1, SkipReason::Completed);

        let metadata = SyncScope::library().with_target(SyncTarget::Metadata);
        assert_eq!(ids(&selector.select(&library, &metadata)), vec![1, 2]);
    }

    #[test]
    fn test_restrictions() {
        let mut fetch_once = entry(1, "Once", vec![]);
        fetch_once.update_strategy = UpdateStrategy::OnlyFetchOnce;

        let mut behind = entry(2, "Behind", vec![]);
        behind.progress = ViewingProgress { total: 5, unseen: 2 };

        let mut unstarted = entry(3, "Unstarted", vec![]);
        unstarted.progress = ViewingProgress { total: 4, unseen: 4 };

        let mut later = entry(4, "Later", vec![]);
        later.next_sync_at = NOW + 10 * 86_400_000;

        let mut fresh = entry(5, "Fresh", vec![]);
        fresh.progress = ViewingProgress { total: 0, unseen: 0 };

        let library = vec![fetch_once, behind, unstarted, later, fresh];
        let restrictions = EntryRestrictions {
            skip_completed: true,
            skip_unseen: true,
            skip_unstarted: true,
            skip_outside_release_period: true,
        };
        let selection = selector(vec![], vec![], restrictions)
            .select_detailed(&library, &SyncScope::library());

        assert_eq!(ids(&selection.selected), vec![5]);
        let reasons: Vec<SkipReason> = selection.skipped.iter().map(|(_, r)| *r).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::NotAlwaysUpdate,
                SkipReason::NotCaughtUp,
                SkipReason::NotCaughtUp,
                SkipReason::NotInReleasePeriod,
            ]
        );
    }

    #[test]
    fn test_unstarted_only_skip() {
        let mut unstarted = entry(1, "Unstarted", vec![]);
        unstarted.progress = ViewingProgress { total: 4, unseen: 4 };
        let restrictions = EntryRestrictions {
            skip_unstarted: true,
            ..EntryRestrictions::default()
        };

        let selection = selector(vec![], vec![], restrictions)
            .select_detailed(&[unstarted], &SyncScope::library());
        assert_eq!(selection.skipped[0].1, SkipReason::NotStarted);
    }

    #[test]
    fn test_entry_scope_bypasses_restrictions() {
        let mut done = entry(7, "Done", vec![2]);
        done.status = EntryStatus::Completed;
        let library = vec![entry(1, "A", vec![]), done];
        let selector = selector(vec![], vec![2], EntryRestrictions::default());

        assert_eq!(ids(&selector.select(&library, &SyncScope::entry(7))), vec![7]);
        assert!(selector.select(&library, &SyncScope::entry(99)).is_empty());
    }

    #[test]
    fn test_deduplicates_by_id() {
        let library = vec![
            entry(1, "A", vec![1]),
            entry(1, "A", vec![2]),
            entry(2, "B", vec![1]),
        ];
        let selector = selector(vec![], vec![], EntryRestrictions::default());
        assert_eq!(ids(&selector.select(&library, &SyncScope::library())), vec![1, 2]);
    }

    fn season_group(id: i64, categories: Vec<i64>) -> LibraryEntry {
        let mut group = entry(id, "Show", categories);
        group.fetch_type = FetchType::Seasons;
        group
    }

    fn season(id: i64, parent_id: i64, title: &str) -> LibraryEntry {
        let mut season = entry(id, title, vec![]);
        season.favorite = false;
        season.parent_id = Some(parent_id);
        season
    }

    #[test]
    fn test_season_group_skipped_without_season_updates() {
        let library = vec![season_group(1, vec![]), entry(2, "B", vec![])];
        let selection = selector(vec![], vec![], EntryRestrictions::default())
            .select_detailed(&library, &SyncScope::library());

        assert_eq!(ids(&selection.selected), vec![2]);
        assert_eq!(selection.skipped[0].1, SkipReason::SeasonGroup);
    }

    #[test]
    fn test_season_group_expands_into_seasons() {
        let mut favorite_season = season(12, 1, "Season 2");
        favorite_season.favorite = true;
        let mut nested = season(13, 1, "Specials");
        nested.fetch_type = FetchType::Seasons;
        let mut finished = season(14, 1, "Season 0");
        finished.status = EntryStatus::Completed;

        let seasons = HashMap::from([(
            1,
            vec![season(11, 1, "Season 1"), favorite_season, nested, finished],
        )]);
        let library = vec![season_group(1, vec![5]), entry(2, "B", vec![5])];
        let selector = selector(vec![5], vec![], EntryRestrictions::default()).with_seasons(seasons);

        let selection = selector.select_detailed(&library, &SyncScope::library());
        assert_eq!(ids(&selection.selected), vec![11, 2]);
        assert_eq!(selection.selected[0].categories, vec![5]);
        assert_eq!(ids(&selection.skipped.iter().map(|(e, _)| e.clone()).collect::<Vec<_>>()), vec![14]);

        // Selecting the result again, by category or by the group's id, is stable
        let once = selector.select(&library, &SyncScope::category(5));
        assert_eq!(selector.select(&once, &SyncScope::category(5)), once);
        let by_group = selector.select(&library, &SyncScope::entry(1));
        assert_eq!(ids(&by_group), vec![11, 14]);
        assert_eq!(selector.select(&by_group, &SyncScope::entry(1)), by_group);
    }

    #[test]
    fn test_selection_is_idempotent() {
        let mut done = entry(3, "C", vec![1]);
        done.status = EntryStatus::Completed;
        let library = vec![
            entry(1, "A", vec![1]),
            entry(2, "B", vec![2]),
            done,
            entry(4, "D", vec![1, 3]),
            entry(1, "A", vec![1]),
        ];

        let scopes = [
            SyncScope::library(),
            SyncScope::category(1),
            SyncScope::entry(4),
            SyncScope::library().with_target(SyncTarget::Trackers),
        ];
        let selector = selector(vec![1, 2], vec![3], EntryRestrictions::default());

        for scope in scopes {
            let once = selector.select(&library, &scope);
            let twice = selector.select(&once, &scope);
            assert_eq!(once, twice, "scope {:?}", scope);
        }
    }
}
