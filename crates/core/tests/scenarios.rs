//! End-to-end behaviour through the public API.

use std::sync::Arc;

use chordcache_core::cache::{ArtistResult, SearchDescriptor, StoreSearch};
use chordcache_core::{AppConfig, ChordCache, ChordSheet, ManualClock, SearchResults, SearchType, search_key};
use chrono::Duration;
use tokio_rusqlite::{params, rusqlite};

fn engine() -> (ChordCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    (ChordCache::in_memory(clock.clone()), clock)
}

fn artist_search(name: &str) -> StoreSearch {
    StoreSearch {
        search_key: search_key(SearchType::Artist, name, ""),
        results: SearchResults::Artists(vec![ArtistResult { name: name.into(), path: name.to_lowercase() }]),
        search: SearchDescriptor { search_type: SearchType::Artist, query: name.into(), data_source: "test".into() },
    }
}

#[tokio::test]
async fn cached_sheet_expires_after_seven_days() {
    let (cache, clock) = engine();
    cache.sheets().put(&ChordSheet::new("Oasis", "Wonderwall"), false, None).await.unwrap();

    clock.advance(Duration::days(7) - Duration::milliseconds(1));
    assert!(cache.sheets().get("oasis-wonderwall").await.unwrap().is_some());

    clock.advance(Duration::milliseconds(2));
    assert!(cache.sheets().get("oasis-wonderwall").await.unwrap().is_none());
}

#[tokio::test]
async fn saved_sheet_never_expires() {
    let (cache, clock) = engine();
    let record = cache.sheets().put(&ChordSheet::new("Oasis", "Wonderwall"), true, None).await.unwrap();
    assert_eq!(record.expires_at, None);

    clock.advance(Duration::days(1000));
    let found = cache.sheets().get("oasis-wonderwall").await.unwrap().unwrap();
    assert!(found.saved);
    assert_eq!(cache.purge_expired().await.unwrap().sheets, 0);
}

#[tokio::test]
async fn search_cache_evicts_one_entry_past_capacity() {
    let (cache, clock) = engine();
    let search = cache.search_cache();
    assert_eq!(search.limits().max_items, 100);

    for i in 0..100 {
        let evicted = search.store_results(artist_search(&format!("artist {i}"))).await.unwrap();
        assert!(evicted.is_empty());
        clock.advance(Duration::milliseconds(1));
    }

    let evicted = search.store_results(artist_search("artist 100")).await.unwrap();
    assert_eq!(evicted, vec!["artist:artist_0".to_string()]);
    assert_eq!(search.stats().await.unwrap().entries, 100);
    assert!(search.get("artist:artist_100").await.unwrap().is_some());
}

#[tokio::test]
async fn legacy_duplicates_collapse_into_one_saved_record() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("chordcache.sqlite");
    let config = AppConfig { db_path: db_path.clone(), ..Default::default() };
    let cache = ChordCache::with_clock(&config, Arc::new(ManualClock::at_epoch()));

    // Open once so migrations run, then write rows the way an older release did.
    cache.stats().await.unwrap();
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "INSERT INTO chord_sheets (path, artist, title, saved, timestamp, access_count) VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params!["natiruts-quero_ser_feliz_tambem", "Natiruts", "Quero Ser Feliz Também", 0, 2],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO chord_sheets (path, artist, title, song_chords, saved, timestamp, access_count) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params!["natiruts_quero_ser_feliz_tambem", "natiruts", "quero_ser_feliz_tambem", "G D Em C", 1, 0],
        )
        .unwrap();
    }

    let report = cache.run_duplicate_cleanup().await.unwrap();
    assert_eq!(report.merged_count, 1);
    assert_eq!(report.deleted_count, 1);
    assert_eq!(report.kept_count, 1);

    let saved = cache.sheets().get_all_saved().await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].path, "natiruts-quero_ser_feliz_tambem");
    assert!(saved[0].access_count >= 2);
    assert_eq!(saved[0].sheet.song_chords, "G D Em C");

    let again = cache.run_duplicate_cleanup().await.unwrap();
    assert_eq!(again.merged_count, 0);
    assert!(again.groups.is_empty());
}

#[tokio::test]
async fn equivalent_spellings_share_a_record() {
    let (cache, _clock) = engine();
    cache.sheets().put(&ChordSheet::new("João Gilberto", "Garota de Ipanema"), false, None).await.unwrap();
    cache.sheets().put(&ChordSheet::new("joao gilberto", "GAROTA DE IPANEMA"), false, None).await.unwrap();

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.sheets.total, 1);
    assert!(cache.sheets().get(("JOÃO GILBERTO", "garota de ipanema")).await.unwrap().is_some());
}

#[tokio::test]
async fn cache_write_does_not_erase_saved_content() {
    let (cache, _clock) = engine();
    let saved = ChordSheet::new("Oasis", "Wonderwall").with_chords("Em7 G Dsus4 A7sus4");
    cache.sheets().put(&saved, true, None).await.unwrap();

    // A later fetch came back without chords.
    let record = cache.sheets().put(&ChordSheet::new("Oasis", "Wonderwall"), false, None).await.unwrap();
    assert!(record.saved);
    assert_eq!(record.sheet.song_chords, "Em7 G Dsus4 A7sus4");
}

#[tokio::test]
async fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig { db_path: dir.path().join("chordcache.sqlite"), ..Default::default() };
    let clock = Arc::new(ManualClock::at_epoch());

    let cache = ChordCache::with_clock(&config, clock.clone());
    cache.sheets().put(&ChordSheet::new("Blur", "Song 2"), true, None).await.unwrap();
    cache.close().await;

    let reopened = ChordCache::with_clock(&config, clock);
    let saved = reopened.sheets().get_all_saved().await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].sheet.title, "Song 2");
    assert!(!reopened.connection().is_degraded());
}
