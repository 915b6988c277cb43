//! Library store trait and SQLite implementation

use crate::error::{LibraryError, Result};
use crate::models::{
    Category, EntryStatus, Episode, FetchType, HistoryRecord, LibraryEntry, TrackLink,
    UpdateStrategy, ViewingProgress,
};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{query, query_as, Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use tracing::debug;

const ENTRY_COLUMNS: &str = r#"
    e.id, e.source_id, e.url, e.title, e.author, e.artist, e.description, e.genre,
    e.thumbnail_url, e.status, e.favorite, e.initialized, e.update_strategy, e.fetch_type,
    e.parent_id, e.last_synced_at, e.next_sync_at, e.fetch_interval, e.date_added, e.version,
    COALESCE(p.total, 0) AS total_episodes, COALESCE(p.unseen, 0) AS unseen_episodes
"#;

const PROGRESS_JOIN: &str = r#"
    LEFT JOIN (
        SELECT entry_id,
               COUNT(*) AS total,
               SUM(CASE WHEN seen = 0 THEN 1 ELSE 0 END) AS unseen
        FROM episodes
        GROUP BY entry_id
    ) p ON p.entry_id = e.id
"#;

/// Episode writes produced by reconciling one entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeChanges {
    /// Brand-new rows; `id` is ignored and assigned by storage.
    pub to_insert: Vec<Episode>,
    /// Existing rows, matched by `id`.
    pub to_update: Vec<Episode>,
}

impl EpisodeChanges {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty()
    }
}

/// Result of [`LibraryStore::commit_entry_sync`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedSync {
    /// The entry as stored after the commit, with its id.
    pub entry: LibraryEntry,
    /// Inserted episodes with their storage-assigned ids.
    pub inserted: Vec<Episode>,
}

/// Storage collaborator for the sync engine.
///
/// Every method runs in its own transaction.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// All favorite entries with their categories and viewing progress.
    async fn list_library(&self) -> Result<Vec<LibraryEntry>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<LibraryEntry>>;

    /// Seasons grouped under `parent_id`, favorite or not, in id order.
    async fn children_of(&self, parent_id: i64) -> Result<Vec<LibraryEntry>>;

    /// Find an entry by its natural identity.
    async fn find_by_identity(&self, source_id: i64, url: &str) -> Result<Option<LibraryEntry>>;

    /// Episodes of an entry, in source order.
    async fn episodes_for_entry(&self, entry_id: i64) -> Result<Vec<Episode>>;

    async fn track_links_for_entry(&self, entry_id: i64) -> Result<Vec<TrackLink>>;

    async fn history_for_entry(&self, entry_id: i64) -> Result<Vec<HistoryRecord>>;

    /// Insert or update an entry keyed by `(source_id, url)`.
    ///
    /// Categories are not touched; use [`LibraryStore::set_entry_categories`].
    async fn upsert_entry(&self, entry: &LibraryEntry) -> Result<LibraryEntry>;

    /// Insert new episodes and update existing ones.
    ///
    /// Returns the inserted episodes with their ids. Updated rows get their
    /// version bumped.
    async fn upsert_episodes(&self, inserts: &[Episode], updates: &[Episode]) -> Result<Vec<Episode>>;

    async fn upsert_track_links(&self, inserts: &[TrackLink], updates: &[TrackLink]) -> Result<()>;

    /// Insert or update history. An insert for an episode that already has a
    /// record keeps the later timestamp.
    async fn upsert_history(&self, inserts: &[HistoryRecord], updates: &[HistoryRecord]) -> Result<()>;

    /// Persist an entry and its episode changes all-or-nothing.
    ///
    /// Episodes to insert are attached to the stored entry's id.
    async fn commit_entry_sync(
        &self,
        entry: &LibraryEntry,
        episodes: &EpisodeChanges,
    ) -> Result<CommittedSync>;

    async fn list_categories(&self) -> Result<Vec<Category>>;

    async fn insert_category(&self, name: &str, order: i64) -> Result<Category>;

    /// Replace the category memberships of an entry.
    async fn set_entry_categories(&self, entry_id: i64, category_ids: &[i64]) -> Result<()>;
}

/// SQLite implementation of [`LibraryStore`]
pub struct SqliteLibraryStore {
    pool: SqlitePool,
}

impl SqliteLibraryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn categories_by_entry(&self) -> Result<HashMap<i64, Vec<i64>>> {
        let rows: Vec<(i64, i64)> = query_as(
            "SELECT entry_id, category_id FROM entry_categories ORDER BY entry_id, category_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut map: HashMap<i64, Vec<i64>> = HashMap::new();
        for (entry_id, category_id) in rows {
            map.entry(entry_id).or_default().push(category_id);
        }
        Ok(map)
    }

    async fn categories_for(&self, entry_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = query_as(
            "SELECT category_id FROM entry_categories WHERE entry_id = ? ORDER BY category_id",
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn fetch_entry(&self, filter: &str, binds: EntryFilter<'_>) -> Result<Option<LibraryEntry>> {
        let sql = format!(
            "SELECT {} FROM entries e {} WHERE {}",
            ENTRY_COLUMNS, PROGRESS_JOIN, filter
        );
        let mut q = query(&sql);
        q = match binds {
            EntryFilter::Id(id) => q.bind(id),
            EntryFilter::Identity(source_id, url) => q.bind(source_id).bind(url),
        };

        let Some(row) = q.fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let mut entry = map_entry_row(&row)?;
        entry.categories = self.categories_for(entry.id).await?;
        Ok(Some(entry))
    }

    async fn require_entry(&self, id: i64) -> Result<LibraryEntry> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "LibraryEntry".to_string(),
                id: id.to_string(),
            })
    }
}

enum EntryFilter<'a> {
    Id(i64),
    Identity(i64, &'a str),
}

fn map_entry_row(row: &SqliteRow) -> Result<LibraryEntry> {
    let genre_json: String = row.try_get("genre")?;
    let genre: Vec<String> = serde_json::from_str(&genre_json)
        .map_err(|e| LibraryError::Serialization(format!("Invalid genre list: {}", e)))?;

    Ok(LibraryEntry {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        artist: row.try_get("artist")?,
        description: row.try_get("description")?,
        genre,
        thumbnail_url: row.try_get("thumbnail_url")?,
        status: EntryStatus::from_code(row.try_get("status")?),
        favorite: row.try_get("favorite")?,
        initialized: row.try_get("initialized")?,
        update_strategy: UpdateStrategy::from_code(row.try_get("update_strategy")?),
        fetch_type: FetchType::from_code(row.try_get("fetch_type")?),
        parent_id: row.try_get("parent_id")?,
        last_synced_at: row.try_get("last_synced_at")?,
        next_sync_at: row.try_get("next_sync_at")?,
        fetch_interval: row.try_get("fetch_interval")?,
        date_added: row.try_get("date_added")?,
        version: row.try_get("version")?,
        categories: Vec::new(),
        progress: ViewingProgress {
            total: row.try_get("total_episodes")?,
            unseen: row.try_get("unseen_episodes")?,
        },
    })
}

fn validate_entry(entry: &LibraryEntry) -> Result<()> {
    entry.validate().map_err(|e| LibraryError::InvalidInput {
        field: "LibraryEntry".to_string(),
        message: e,
    })
}

// =============================================================================
// Transaction helpers
// =============================================================================

async fn write_entry(tx: &mut Transaction<'_, Sqlite>, entry: &LibraryEntry) -> Result<i64> {
    let genre = serde_json::to_string(&entry.genre)
        .map_err(|e| LibraryError::Serialization(e.to_string()))?;

    query(
        r#"
        INSERT INTO entries (
            source_id, url, title, author, artist, description, genre, thumbnail_url,
            status, favorite, initialized, update_strategy, fetch_type, parent_id,
            last_synced_at, next_sync_at, fetch_interval, date_added, version
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id, url) DO UPDATE SET
            title = excluded.title,
            author = excluded.author,
            artist = excluded.artist,
            description = excluded.description,
            genre = excluded.genre,
            thumbnail_url = excluded.thumbnail_url,
            status = excluded.status,
            favorite = excluded.favorite,
            initialized = excluded.initialized,
            update_strategy = excluded.update_strategy,
            fetch_type = excluded.fetch_type,
            parent_id = excluded.parent_id,
            last_synced_at = excluded.last_synced_at,
            next_sync_at = excluded.next_sync_at,
            fetch_interval = excluded.fetch_interval,
            version = excluded.version
        "#,
    )
    .bind(entry.source_id)
    .bind(&entry.url)
    .bind(&entry.title)
    .bind(&entry.author)
    .bind(&entry.artist)
    .bind(&entry.description)
    .bind(genre)
    .bind(&entry.thumbnail_url)
    .bind(entry.status.code())
    .bind(entry.favorite)
    .bind(entry.initialized)
    .bind(entry.update_strategy.code())
    .bind(entry.fetch_type.code())
    .bind(entry.parent_id)
    .bind(entry.last_synced_at)
    .bind(entry.next_sync_at)
    .bind(entry.fetch_interval)
    .bind(entry.date_added)
    .bind(entry.version)
    .execute(&mut **tx)
    .await?;

    let (id,): (i64,) = query_as("SELECT id FROM entries WHERE source_id = ? AND url = ?")
        .bind(entry.source_id)
        .bind(&entry.url)
        .fetch_one(&mut **tx)
        .await?;

    Ok(id)
}

async fn insert_episode(tx: &mut Transaction<'_, Sqlite>, episode: &Episode) -> Result<i64> {
    let result = query(
        r#"
        INSERT INTO episodes (
            entry_id, url, name, episode_number, source_order, date_upload, date_fetch,
            seen, bookmark, fillermark, last_position_ms, total_duration_ms, scanlator,
            version, last_modified_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(episode.entry_id)
    .bind(&episode.url)
    .bind(&episode.name)
    .bind(episode.episode_number)
    .bind(episode.source_order)
    .bind(episode.date_upload)
    .bind(episode.date_fetch)
    .bind(episode.seen)
    .bind(episode.bookmark)
    .bind(episode.fillermark)
    .bind(episode.last_position_ms)
    .bind(episode.total_duration_ms)
    .bind(&episode.scanlator)
    .bind(episode.version)
    .bind(episode.last_modified_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn update_episode(tx: &mut Transaction<'_, Sqlite>, episode: &Episode) -> Result<()> {
    let result = query(
        r#"
        UPDATE episodes
        SET url = ?, name = ?, episode_number = ?, source_order = ?, date_upload = ?,
            date_fetch = ?, seen = ?, bookmark = ?, fillermark = ?, last_position_ms = ?,
            total_duration_ms = ?, scanlator = ?, last_modified_at = ?,
            version = version + 1
        WHERE id = ?
        "#,
    )
    .bind(&episode.url)
    .bind(&episode.name)
    .bind(episode.episode_number)
    .bind(episode.source_order)
    .bind(episode.date_upload)
    .bind(episode.date_fetch)
    .bind(episode.seen)
    .bind(episode.bookmark)
    .bind(episode.fillermark)
    .bind(episode.last_position_ms)
    .bind(episode.total_duration_ms)
    .bind(&episode.scanlator)
    .bind(episode.last_modified_at)
    .bind(episode.id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LibraryError::NotFound {
            entity_type: "Episode".to_string(),
            id: episode.id.to_string(),
        });
    }

    Ok(())
}

async fn write_episodes(
    tx: &mut Transaction<'_, Sqlite>,
    entry_id: Option<i64>,
    inserts: &[Episode],
    updates: &[Episode],
) -> Result<Vec<Episode>> {
    let mut inserted = Vec::with_capacity(inserts.len());
    for episode in inserts {
        let mut episode = episode.clone();
        if let Some(entry_id) = entry_id {
            episode.entry_id = entry_id;
        }
        episode.id = insert_episode(tx, &episode).await?;
        inserted.push(episode);
    }

    for episode in updates {
        update_episode(tx, episode).await?;
    }

    Ok(inserted)
}

#[async_trait]
impl LibraryStore for SqliteLibraryStore {
    async fn list_library(&self) -> Result<Vec<LibraryEntry>> {
        let sql = format!(
            "SELECT {} FROM entries e {} WHERE e.favorite = 1 ORDER BY e.id",
            ENTRY_COLUMNS, PROGRESS_JOIN
        );
        let rows = query(&sql).fetch_all(&self.pool).await?;
        let mut categories = self.categories_by_entry().await?;

        rows.iter()
            .map(|row| {
                let mut entry = map_entry_row(row)?;
                entry.categories = categories.remove(&entry.id).unwrap_or_default();
                Ok(entry)
            })
            .collect()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<LibraryEntry>> {
        self.fetch_entry("e.id = ?", EntryFilter::Id(id)).await
    }

    async fn children_of(&self, parent_id: i64) -> Result<Vec<LibraryEntry>> {
        let sql = format!(
            "SELECT {} FROM entries e {} WHERE e.parent_id = ? ORDER BY e.id",
            ENTRY_COLUMNS, PROGRESS_JOIN
        );
        let rows = query(&sql).bind(parent_id).fetch_all(&self.pool).await?;

        let mut children = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut entry = map_entry_row(row)?;
            entry.categories = self.categories_for(entry.id).await?;
            children.push(entry);
        }
        debug!(parent_id, count = children.len(), "Loaded seasons");
        Ok(children)
    }

    async fn find_by_identity(&self, source_id: i64, url: &str) -> Result<Option<LibraryEntry>> {
        self.fetch_entry(
            "e.source_id = ? AND e.url = ?",
            EntryFilter::Identity(source_id, url),
        )
        .await
    }

    async fn episodes_for_entry(&self, entry_id: i64) -> Result<Vec<Episode>> {
        let episodes = query_as::<_, Episode>(
            "SELECT * FROM episodes WHERE entry_id = ? ORDER BY source_order, id",
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(episodes)
    }

    async fn track_links_for_entry(&self, entry_id: i64) -> Result<Vec<TrackLink>> {
        let links = query_as::<_, TrackLink>(
            "SELECT * FROM track_links WHERE entry_id = ? ORDER BY tracker_id",
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    async fn history_for_entry(&self, entry_id: i64) -> Result<Vec<HistoryRecord>> {
        let history = query_as::<_, HistoryRecord>(
            r#"
            SELECT h.id, h.episode_id, ep.url AS episode_url, h.seen_at
            FROM history h
            INNER JOIN episodes ep ON ep.id = h.episode_id
            WHERE ep.entry_id = ?
            ORDER BY h.seen_at DESC
            "#,
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(history)
    }

    async fn upsert_entry(&self, entry: &LibraryEntry) -> Result<LibraryEntry> {
        validate_entry(entry)?;

        let mut tx = self.pool.begin().await?;
        let id = write_entry(&mut tx, entry).await?;
        tx.commit().await?;

        debug!(entry_id = id, title = %entry.title, "Upserted library entry");
        self.require_entry(id).await
    }

    async fn upsert_episodes(&self, inserts: &[Episode], updates: &[Episode]) -> Result<Vec<Episode>> {
        let mut tx = self.pool.begin().await?;
        let inserted = write_episodes(&mut tx, None, inserts, updates).await?;
        tx.commit().await?;

        debug!(
            inserted = inserted.len(),
            updated = updates.len(),
            "Upserted episodes"
        );
        Ok(inserted)
    }

    async fn upsert_track_links(&self, inserts: &[TrackLink], updates: &[TrackLink]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for link in inserts {
            query(
                r#"
                INSERT INTO track_links (
                    entry_id, tracker_id, remote_id, library_id, title, last_episode_seen,
                    total_episodes, status, score, remote_url
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(link.entry_id)
            .bind(link.tracker_id)
            .bind(link.remote_id)
            .bind(link.library_id)
            .bind(&link.title)
            .bind(link.last_episode_seen)
            .bind(link.total_episodes)
            .bind(link.status)
            .bind(link.score)
            .bind(&link.remote_url)
            .execute(&mut *tx)
            .await?;
        }

        for link in updates {
            let result = query(
                r#"
                UPDATE track_links
                SET remote_id = ?, library_id = ?, title = ?, last_episode_seen = ?,
                    total_episodes = ?, status = ?, score = ?, remote_url = ?
                WHERE id = ?
                "#,
            )
            .bind(link.remote_id)
            .bind(link.library_id)
            .bind(&link.title)
            .bind(link.last_episode_seen)
            .bind(link.total_episodes)
            .bind(link.status)
            .bind(link.score)
            .bind(&link.remote_url)
            .bind(link.id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(LibraryError::NotFound {
                    entity_type: "TrackLink".to_string(),
                    id: link.id.to_string(),
                });
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_history(&self, inserts: &[HistoryRecord], updates: &[HistoryRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in inserts {
            query(
                r#"
                INSERT INTO history (episode_id, seen_at)
                VALUES (?, ?)
                ON CONFLICT(episode_id) DO UPDATE SET
                    seen_at = MAX(history.seen_at, excluded.seen_at)
                "#,
            )
            .bind(record.episode_id)
            .bind(record.seen_at)
            .execute(&mut *tx)
            .await?;
        }

        for record in updates {
            query("UPDATE history SET seen_at = ? WHERE id = ?")
                .bind(record.seen_at)
                .bind(record.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn commit_entry_sync(
        &self,
        entry: &LibraryEntry,
        episodes: &EpisodeChanges,
    ) -> Result<CommittedSync> {
        validate_entry(entry)?;

        let mut tx = self.pool.begin().await?;
        let entry_id = write_entry(&mut tx, entry).await?;
        let inserted =
            write_episodes(&mut tx, Some(entry_id), &episodes.to_insert, &episodes.to_update)
                .await?;
        tx.commit().await?;

        debug!(
            entry_id,
            inserted = inserted.len(),
            updated = episodes.to_update.len(),
            "Committed entry sync"
        );

        Ok(CommittedSync {
            entry: self.require_entry(entry_id).await?,
            inserted,
        })
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let categories = query_as::<_, Category>(
            "SELECT id, name, sort_order, flags FROM categories ORDER BY sort_order, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(categories)
    }

    async fn insert_category(&self, name: &str, order: i64) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "Category".to_string(),
                message: "Category name cannot be empty".to_string(),
            });
        }

        let result = query("INSERT INTO categories (name, sort_order, flags) VALUES (?, ?, 0)")
            .bind(name)
            .bind(order)
            .execute(&self.pool)
            .await?;

        Ok(Category {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            order,
            flags: 0,
        })
    }

    async fn set_entry_categories(&self, entry_id: i64, category_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        query("DELETE FROM entry_categories WHERE entry_id = ?")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        for category_id in category_ids {
            query("INSERT OR IGNORE INTO entry_categories (entry_id, category_id) VALUES (?, ?)")
                .bind(entry_id)
                .bind(category_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
