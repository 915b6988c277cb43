//! Integration tests for restoring exported entries into the library

use core_library::db::create_test_pool;
use core_library::{Episode, HistoryRecord, LibraryEntry, LibraryStore, SqliteLibraryStore, TrackLink};
use core_runtime::events::EventBus;
use core_sync::{LibraryRestorer, RemoteSnapshot, RestoreBundle};
use std::sync::Arc;

async fn setup() -> (Arc<SqliteLibraryStore>, LibraryRestorer) {
    let pool = create_test_pool().await.unwrap();
    let store = Arc::new(SqliteLibraryStore::new(pool));
    let restorer = LibraryRestorer::new(store.clone(), Arc::new(EventBus::new(64)));
    (store, restorer)
}

fn episode(url: &str, number: f64, order: i64) -> Episode {
    let mut episode = Episode::new(0, url, format!("Episode {}", number));
    episode.episode_number = number;
    episode.source_order = order;
    episode
}

fn history(url: &str, seen_at: i64) -> HistoryRecord {
    HistoryRecord {
        id: 0,
        episode_id: 0,
        episode_url: url.to_string(),
        seen_at,
    }
}

fn full_bundle() -> RestoreBundle {
    let mut snapshot = RemoteSnapshot::new(1, "/series/dungeon-meshi", "Dungeon Meshi");
    snapshot.author = Some("Ryoko Kui".to_string());
    snapshot.favorite = true;
    snapshot.initialized = true;
    snapshot.version = Some(3);

    let mut seen = episode("/dm/1", 1.0, 1);
    seen.seen = true;
    let mut link = TrackLink::new(0, 2, 4501);
    link.title = "Dungeon Meshi".to_string();
    link.last_episode_seen = 1.0;
    link.status = 1;

    RestoreBundle {
        entry: snapshot,
        episodes: vec![episode("/dm/2", 2.0, 0), seen],
        track_links: vec![link],
        history: vec![history("/dm/1", 1_700_000_000_000), history("/dm/unknown", 1)],
        categories: vec!["Reading".to_string(), " Favorites ".to_string()],
    }
}

#[tokio::test]
async fn test_restore_new_entry() {
    let (store, restorer) = setup().await;

    let outcome = restorer.restore(full_bundle()).await.unwrap();

    assert!(outcome.entry_written);
    assert_eq!(outcome.episodes_inserted, 2);
    assert_eq!(outcome.track_links_written, 1);
    // History for an episode the bundle does not carry is dropped
    assert_eq!(outcome.history_written, 1);
    assert_eq!(outcome.categories_created, 2);
    assert_eq!(outcome.categories_added, 2);

    let entry = store.find_by_id(outcome.entry_id).await.unwrap().unwrap();
    assert!(entry.favorite);
    assert_eq!(entry.version, 3);
    assert_eq!(entry.author.as_deref(), Some("Ryoko Kui"));
    assert_eq!(entry.categories.len(), 2);

    let names: Vec<String> = store
        .list_categories()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert!(names.contains(&"Reading".to_string()));
    assert!(names.contains(&"Favorites".to_string()));

    let episodes = store.episodes_for_entry(entry.id).await.unwrap();
    assert_eq!(episodes.len(), 2);
    assert!(episodes.iter().all(|e| e.entry_id == entry.id));

    let records = store.history_for_entry(entry.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].episode_url, "/dm/1");
}

#[tokio::test]
async fn test_restoring_twice_is_noop() {
    let (store, restorer) = setup().await;
    let first = restorer.restore(full_bundle()).await.unwrap();
    let before = store.find_by_id(first.entry_id).await.unwrap().unwrap();

    let second = restorer.restore(full_bundle()).await.unwrap();

    assert!(second.is_noop(), "unexpected writes: {:?}", second);
    assert_eq!(second.entry_id, first.entry_id);
    assert_eq!(store.find_by_id(first.entry_id).await.unwrap().unwrap(), before);
}

#[tokio::test]
async fn test_restore_keeps_local_progress() {
    let (store, restorer) = setup().await;

    let mut local = LibraryEntry::new(1, "/series/dungeon-meshi", "Dungeon Meshi");
    local.favorite = true;
    local.version = 5;
    let local = store.upsert_entry(&local).await.unwrap();

    let mut watched = Episode::new(local.id, "/dm/2", "Episode 2");
    watched.episode_number = 2.0;
    watched.seen = true;
    watched.last_position_ms = 1_200;
    store.upsert_episodes(&[watched], &[]).await.unwrap();
    store
        .upsert_history(
            &[HistoryRecord {
                id: 0,
                episode_id: store.episodes_for_entry(local.id).await.unwrap()[0].id,
                episode_url: "/dm/2".to_string(),
                seen_at: 1_800_000_000_000,
            }],
            &[],
        )
        .await
        .unwrap();

    let mut bundle = full_bundle();
    bundle.entry.author = Some("Someone Else".to_string());
    bundle.history.push(history("/dm/2", 1_000));

    let outcome = restorer.restore(bundle).await.unwrap();
    assert_eq!(outcome.entry_id, local.id);

    // The stored entry is newer than the bundle
    let entry = store.find_by_id(local.id).await.unwrap().unwrap();
    assert_eq!(entry.version, 5);
    assert_eq!(entry.author, None);

    let episodes = store.episodes_for_entry(local.id).await.unwrap();
    let second = episodes.iter().find(|e| e.url == "/dm/2").unwrap();
    assert!(second.seen);
    assert_eq!(second.last_position_ms, 1_200);

    let records = store.history_for_entry(local.id).await.unwrap();
    let record = records.iter().find(|r| r.episode_url == "/dm/2").unwrap();
    assert_eq!(record.seen_at, 1_800_000_000_000);
}
