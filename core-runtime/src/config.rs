//! # Library Sync Configuration
//!
//! User-facing preferences that decide which library entries a sync run
//! touches, in what order, and what happens after new episodes are found.
//!
//! ## Overview
//!
//! [`LibrarySyncConfig`] is built through [`LibrarySyncConfigBuilder`], which
//! applies defaults and validates the result before handing it out. Invalid
//! values fail fast with [`Error::Config`] and an actionable message.
//!
//! All types here are `serde` serializable so hosts can persist them next to
//! their own settings.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::{LibrarySyncConfig, RankingStrategy};
//!
//! let config = LibrarySyncConfig::builder()
//!     .include_categories(vec![2, 3])
//!     .exclude_categories(vec![5])
//!     .ranking_strategy(RankingStrategy::NearestNextUpdate)
//!     .max_concurrent_entries(2)
//!     .build()
//!     .expect("valid config");
//!
//! assert!(config.restrictions.skip_completed);
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::LibrarySyncConfig;
//!
//! LibrarySyncConfig::builder()
//!     .max_concurrent_entries(0)
//!     .build()
//!     .expect("concurrency must be at least one");
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest per-run fetch concurrency accepted by the builder.
pub const MAX_CONCURRENT_ENTRIES: usize = 4;

/// Entries queued against a single source above this count produce a warning.
pub const DEFAULT_SOURCE_WARNING_THRESHOLD: usize = 60;

pub const DEFAULT_FAILURE_LOG_FILE_NAME: &str = "library_update_errors.txt";

// ============================================================================
// Ranking Strategy
// ============================================================================

/// Order in which the selected candidates are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    /// Ascending title, case-sensitive ordinal comparison.
    #[default]
    Alphabetical,
    /// Entries synced longest ago first.
    LeastRecentlyUpdated,
    /// Entries whose expected update is closest to now (either direction) first.
    NearestNextUpdate,
}

impl RankingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingStrategy::Alphabetical => "alphabetical",
            RankingStrategy::LeastRecentlyUpdated => "least_recently_updated",
            RankingStrategy::NearestNextUpdate => "nearest_next_update",
        }
    }
}

impl FromStr for RankingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "alphabetical" => Ok(RankingStrategy::Alphabetical),
            "least_recently_updated" => Ok(RankingStrategy::LeastRecentlyUpdated),
            "nearest_next_update" => Ok(RankingStrategy::NearestNextUpdate),
            _ => Err(Error::Config(format!("Unknown ranking strategy: {}", s))),
        }
    }
}

impl fmt::Display for RankingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Restrictions & Policies
// ============================================================================

/// Per-entry conditions under which a content sync skips an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRestrictions {
    /// Skip entries whose publishing status is completed.
    pub skip_completed: bool,
    /// Skip entries that still have unseen episodes.
    pub skip_unseen: bool,
    /// Skip entries with episodes none of which were ever started.
    pub skip_unstarted: bool,
    /// Skip entries whose next expected update lies beyond the fetch window.
    pub skip_outside_release_period: bool,
}

impl Default for EntryRestrictions {
    fn default() -> Self {
        Self {
            skip_completed: true,
            skip_unseen: false,
            skip_unstarted: false,
            skip_outside_release_period: false,
        }
    }
}

/// Which entries with new episodes get handed to the download queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoDownloadPolicy {
    pub enabled: bool,
    /// Category ids to download from; empty means every category.
    pub include_categories: Vec<i64>,
    /// Category ids never downloaded from. Wins over `include_categories`.
    pub exclude_categories: Vec<i64>,
}

impl AutoDownloadPolicy {
    /// Whether an entry with the given favorite flag and categories qualifies.
    ///
    /// Entries without categories are treated as members of the default category `0`.
    pub fn allows(&self, favorite: bool, categories: &[i64]) -> bool {
        if !self.enabled || !favorite {
            return false;
        }

        let default_category = [0];
        let categories = if categories.is_empty() {
            &default_category[..]
        } else {
            categories
        };

        if categories
            .iter()
            .any(|id| self.exclude_categories.contains(id))
        {
            return false;
        }

        self.include_categories.is_empty()
            || categories
                .iter()
                .any(|id| self.include_categories.contains(id))
    }
}

// ============================================================================
// Library Sync Configuration
// ============================================================================

/// Preferences consumed by the library sync engine.
///
/// Use [`LibrarySyncConfig::builder`] to construct validated instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySyncConfig {
    /// Category ids to sync; empty means the whole library.
    pub include_categories: Vec<i64>,
    /// Category ids never synced by a library-wide run.
    pub exclude_categories: Vec<i64>,
    pub restrictions: EntryRestrictions,
    pub ranking_strategy: RankingStrategy,
    /// Number of entries fetched concurrently. `1` processes strictly in order.
    pub max_concurrent_entries: usize,
    /// Fetch and merge entry metadata before the content list.
    pub refresh_metadata: bool,
    pub auto_download: AutoDownloadPolicy,
    /// Refresh tracker links after each successful content sync.
    pub auto_refresh_trackers: bool,
    /// Sync the non-favorite seasons of season-grouped entries in their place.
    /// When off, season-grouped entries are left out of runs.
    pub update_seasons: bool,
    /// Consecutive storage failures that abort the remainder of a run.
    pub max_consecutive_storage_failures: usize,
    pub source_warning_threshold: usize,
    /// File name of the failure log written to the host cache directory.
    pub failure_log_file_name: String,
}

impl Default for LibrarySyncConfig {
    fn default() -> Self {
        Self {
            include_categories: Vec::new(),
            exclude_categories: Vec::new(),
            restrictions: EntryRestrictions::default(),
            ranking_strategy: RankingStrategy::default(),
            max_concurrent_entries: 1,
            refresh_metadata: false,
            auto_download: AutoDownloadPolicy::default(),
            auto_refresh_trackers: false,
            update_seasons: false,
            max_consecutive_storage_failures: 3,
            source_warning_threshold: DEFAULT_SOURCE_WARNING_THRESHOLD,
            failure_log_file_name: DEFAULT_FAILURE_LOG_FILE_NAME.to_string(),
        }
    }
}

impl LibrarySyncConfig {
    pub fn builder() -> LibrarySyncConfigBuilder {
        LibrarySyncConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Concurrency is within `1..=MAX_CONCURRENT_ENTRIES`
    /// - The storage failure guard is at least 1
    /// - The failure log file name is a bare, non-empty file name
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_entries == 0 {
            return Err(Error::Config(
                "max_concurrent_entries must be at least 1".to_string(),
            ));
        }

        if self.max_concurrent_entries > MAX_CONCURRENT_ENTRIES {
            return Err(Error::Config(format!(
                "max_concurrent_entries must not exceed {} to keep source request rates polite",
                MAX_CONCURRENT_ENTRIES
            )));
        }

        if self.max_consecutive_storage_failures == 0 {
            return Err(Error::Config(
                "max_consecutive_storage_failures must be at least 1".to_string(),
            ));
        }

        let name = self.failure_log_file_name.trim();
        if name.is_empty() {
            return Err(Error::Config(
                "failure_log_file_name cannot be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(Error::Config(format!(
                "failure_log_file_name must be a file name, got a path: {}",
                name
            )));
        }

        Ok(())
    }
}

/// Builder for [`LibrarySyncConfig`].
#[derive(Debug, Default)]
pub struct LibrarySyncConfigBuilder {
    include_categories: Option<Vec<i64>>,
    exclude_categories: Option<Vec<i64>>,
    restrictions: Option<EntryRestrictions>,
    ranking_strategy: Option<RankingStrategy>,
    max_concurrent_entries: Option<usize>,
    refresh_metadata: Option<bool>,
    auto_download: Option<AutoDownloadPolicy>,
    auto_refresh_trackers: Option<bool>,
    update_seasons: Option<bool>,
    max_consecutive_storage_failures: Option<usize>,
    source_warning_threshold: Option<usize>,
    failure_log_file_name: Option<String>,
}

impl LibrarySyncConfigBuilder {
    pub fn include_categories(mut self, ids: Vec<i64>) -> Self {
        self.include_categories = Some(ids);
        self
    }

    pub fn exclude_categories(mut self, ids: Vec<i64>) -> Self {
        self.exclude_categories = Some(ids);
        self
    }

    pub fn restrictions(mut self, restrictions: EntryRestrictions) -> Self {
        self.restrictions = Some(restrictions);
        self
    }

    pub fn ranking_strategy(mut self, strategy: RankingStrategy) -> Self {
        self.ranking_strategy = Some(strategy);
        self
    }

    /// Sets the number of entries processed concurrently.
    ///
    /// Default: 1
    pub fn max_concurrent_entries(mut self, count: usize) -> Self {
        self.max_concurrent_entries = Some(count);
        self
    }

    pub fn refresh_metadata(mut self, enabled: bool) -> Self {
        self.refresh_metadata = Some(enabled);
        self
    }

    pub fn auto_download(mut self, policy: AutoDownloadPolicy) -> Self {
        self.auto_download = Some(policy);
        self
    }

    pub fn auto_refresh_trackers(mut self, enabled: bool) -> Self {
        self.auto_refresh_trackers = Some(enabled);
        self
    }

    /// Expand season-grouped entries into their seasons.
    ///
    /// Default: false
    pub fn update_seasons(mut self, enabled: bool) -> Self {
        self.update_seasons = Some(enabled);
        self
    }

    /// Sets how many consecutive storage failures abort a run.
    ///
    /// Default: 3
    pub fn max_consecutive_storage_failures(mut self, count: usize) -> Self {
        self.max_consecutive_storage_failures = Some(count);
        self
    }

    pub fn source_warning_threshold(mut self, count: usize) -> Self {
        self.source_warning_threshold = Some(count);
        self
    }

    pub fn failure_log_file_name(mut self, name: impl Into<String>) -> Self {
        self.failure_log_file_name = Some(name.into());
        self
    }

    /// Builds and validates the final configuration.
    pub fn build(self) -> Result<LibrarySyncConfig> {
        let defaults = LibrarySyncConfig::default();

        let config = LibrarySyncConfig {
            include_categories: self.include_categories.unwrap_or(defaults.include_categories),
            exclude_categories: self.exclude_categories.unwrap_or(defaults.exclude_categories),
            restrictions: self.restrictions.unwrap_or(defaults.restrictions),
            ranking_strategy: self.ranking_strategy.unwrap_or(defaults.ranking_strategy),
            max_concurrent_entries: self
                .max_concurrent_entries
                .unwrap_or(defaults.max_concurrent_entries),
            refresh_metadata: self.refresh_metadata.unwrap_or(defaults.refresh_metadata),
            auto_download: self.auto_download.unwrap_or(defaults.auto_download),
            auto_refresh_trackers: self
                .auto_refresh_trackers
                .unwrap_or(defaults.auto_refresh_trackers),
            update_seasons: self.update_seasons.unwrap_or(defaults.update_seasons),
            max_consecutive_storage_failures: self
                .max_consecutive_storage_failures
                .unwrap_or(defaults.max_consecutive_storage_failures),
            source_warning_threshold: self
                .source_warning_threshold
                .unwrap_or(defaults.source_warning_threshold),
            failure_log_file_name: self
                .failure_log_file_name
                .unwrap_or(defaults.failure_log_file_name),
        };

        config.validate()?;

        Ok(config)
    }
}
