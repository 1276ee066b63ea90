//! Expiry and sweep behaviour of the caches over the filesystem blob store.

use std::sync::Arc;

use serde_json::json;
use time::macros::datetime;

use newscache::cache::{ArticleCache, CacheConfig, CacheManager, FeedCache, Freshness, evaluate};
use newscache::domain::{ArticleRecord, FeedMetadata, FeedSnapshot};
use newscache::infra::storage::{BlobStore, LocalBlobStore};
use newscache::util::ManualClock;

fn local_store(dir: &tempfile::TempDir) -> Arc<dyn BlobStore> {
    Arc::new(LocalBlobStore::new(dir.path().join("blobs")).expect("blob root"))
}

fn article(shortcode: &str) -> ArticleRecord {
    ArticleRecord {
        url: format!("https://yle.fi/a/{shortcode}"),
        shortcode: shortcode.to_string(),
        title: "Otsikko".to_string(),
        paragraphs: vec!["Kappale yksi.".to_string(), "Kappale kaksi.".to_string()],
        scraped_at: "2024-01-01T00:00:00Z".to_string(),
        ..ArticleRecord::default()
    }
}

#[tokio::test]
async fn article_entry_lives_for_its_ttl_on_disk() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = local_store(&dir);
    let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC)));
    let cache = ArticleCache::new(store, clock.clone(), &CacheConfig::default()).unwrap();

    let key = cache.save("fi", &article("74-1")).await.expect("save");
    assert_eq!(key, "cache/yle/articles/74-1_fi.json");
    assert!(dir.path().join("blobs/cache/yle/articles/74-1_fi.json").is_file());

    clock.set(datetime!(2024-01-01 00:30 UTC));
    assert!(cache.check_valid("74-1", "fi").await);
    assert_eq!(
        cache.get_fresh("74-1", "fi").await.map(|a| a.paragraphs.len()),
        Some(2)
    );

    clock.set(datetime!(2024-01-01 01:30 UTC));
    assert!(!cache.check_valid("74-1", "fi").await);
    assert!(cache.get_fresh("74-1", "fi").await.is_none());
}

#[tokio::test]
async fn sweep_removes_only_the_expired_entry() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = local_store(&dir);
    let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC)));
    let manager = CacheManager::new("test", store.clone(), clock.clone());

    manager
        .save("cache/yle/old.json", &json!({ "n": 1 }), 1)
        .await
        .expect("save old");
    clock.set(datetime!(2024-01-01 02:00 UTC));
    manager
        .save("cache/yle/new.json", &json!({ "n": 2 }), 1)
        .await
        .expect("save new");

    let removed = manager.cleanup_expired("cache/yle/", 1).await.expect("sweep");
    assert_eq!(removed, 1);
    assert!(!store.exists("cache/yle/old.json").await.unwrap());
    assert!(store.exists("cache/yle/new.json").await.unwrap());
}

#[tokio::test]
async fn feed_without_explicit_expiry_falls_back_to_fetch_time() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = local_store(&dir);
    let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:45 UTC)));

    // Written by an older producer that only recorded the fetch instant.
    let legacy = json!({
        "feed_metadata": { "title": "Yle", "fetch_timestamp": "2024-01-01T00:00:00+00:00" },
        "items": []
    });
    store
        .write(
            "cache/yle/paauutiset.json",
            serde_json::to_vec(&legacy).unwrap().into(),
        )
        .await
        .unwrap();

    let feeds = FeedCache::new(store.clone(), clock.clone(), &CacheConfig::default()).unwrap();
    assert!(feeds.check_valid().await);

    let raw = store.read(feeds.key()).await.unwrap().expect("entry");
    let document: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&raw).unwrap();
    assert_eq!(
        evaluate(&document, datetime!(2024-01-01 01:00 UTC), 1),
        Freshness::Stale
    );

    clock.set(datetime!(2024-01-01 01:00 UTC));
    assert!(!feeds.check_valid().await);
}

#[tokio::test]
async fn saved_feed_round_trips_with_stamps() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = local_store(&dir);
    let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 12:00 UTC)));
    let feeds = FeedCache::new(store, clock, &CacheConfig::default()).unwrap();

    let snapshot = FeedSnapshot {
        feed_metadata: FeedMetadata {
            title: "Yle Uutiset | Pääuutiset".to_string(),
            fetch_timestamp: "2024-06-01T12:00:00Z".to_string(),
            ..FeedMetadata::default()
        },
        ..FeedSnapshot::default()
    };
    feeds.save(&snapshot).await.expect("save");

    let stored = feeds.get().await.expect("stored feed");
    assert_eq!(stored.feed_metadata.title, "Yle Uutiset | Pääuutiset");
    assert_eq!(stored.cache_ttl_hours, Some(1));
    assert_eq!(stored.created_at.as_deref(), Some("2024-06-01T12:00:00Z"));
    assert_eq!(stored.expires_at.as_deref(), Some("2024-06-01T13:00:00Z"));
}
