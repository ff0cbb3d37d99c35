//! Duplicate clustering engine tests (catalog-backed)

mod helpers;

use djlm_analysis::db::InMemoryCatalog;
use djlm_analysis::duplicates::DuplicateClusteringEngine;
use djlm_analysis::error::AnalysisError;
use djlm_common::config::DEFAULT_DUPLICATE_THRESHOLD;
use djlm_common::events::{EngineEvent, EventBus};
use djlm_common::models::Track;
use std::sync::Arc;

use helpers::BrokenCatalog;

fn track(path: &str, title: &str, artist: &str, duration_ms: u64, size: u64) -> Track {
    let mut t = Track::new(path, format!("hash-{path}"), duration_ms);
    t.title = Some(title.to_string());
    t.artist = Some(artist.to_string());
    t.size_bytes = Some(size);
    t
}

#[tokio::test]
async fn test_track_a_example() {
    let a = track("/music/track_a.mp3", "Track A", "DJ Example", 210_000, 8_000_000);
    let b = track("/music/track_a (1).mp3", "Track A", "DJ Example", 212_000, 8_300_000);
    let other = track("/music/other.mp3", "Something Else", "Nobody", 95_000, 2_000_000);
    let catalog = Arc::new(InMemoryCatalog::with_tracks(vec![a.clone(), other, b.clone()]));

    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let engine = DuplicateClusteringEngine::new(catalog, events.clone(), DEFAULT_DUPLICATE_THRESHOLD);

    let groups = engine.find_duplicates().await.unwrap();

    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.tracks.len(), 2);
    assert_eq!(group.tracks[0].id, a.id);
    assert_eq!(group.tracks[0].similarity, 1.0);
    assert_eq!(group.tracks[1].id, b.id);
    assert!(group.tracks[1].similarity >= 0.99);
    assert!(group.reason.contains("Same artist"));

    assert!(matches!(
        rx.try_recv(),
        Ok(EngineEvent::DuplicateScanStarted { track_count: 3, .. })
    ));
    assert!(matches!(
        rx.try_recv(),
        Ok(EngineEvent::DuplicateScanCompleted { group_count: 1, .. })
    ));
}

#[tokio::test]
async fn test_empty_catalog_has_no_groups() {
    let engine = DuplicateClusteringEngine::new(
        Arc::new(InMemoryCatalog::new()),
        EventBus::new(16),
        DEFAULT_DUPLICATE_THRESHOLD,
    );
    assert!(engine.find_duplicates().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_catalog_failure_emits_failed_event() {
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let engine = DuplicateClusteringEngine::new(
        Arc::new(BrokenCatalog),
        events.clone(),
        DEFAULT_DUPLICATE_THRESHOLD,
    );

    let err = engine.find_duplicates().await.unwrap_err();
    assert!(matches!(err, AnalysisError::Catalog(_)));

    match rx.try_recv() {
        Ok(EngineEvent::DuplicateScanFailed { error, .. }) => assert!(error.contains("catalog offline")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_threshold_is_exclusive() {
    // Title and artist only: 0.4 * 1.0 + 0.3 * 0.0 over 0.7 = 0.571...
    let mut a = Track::new("/a.mp3", "", 0);
    a.title = Some("Same".into());
    a.artist = Some("abc".into());
    let mut b = Track::new("/b.mp3", "", 0);
    b.title = Some("Same".into());
    b.artist = Some("xyz".into());
    let catalog = Arc::new(InMemoryCatalog::with_tracks(vec![a, b]));

    let strict = DuplicateClusteringEngine::new(catalog.clone(), EventBus::new(16), 0.6);
    assert!(strict.find_duplicates().await.unwrap().is_empty());

    let loose = DuplicateClusteringEngine::new(catalog, EventBus::new(16), 0.5);
    assert_eq!(loose.find_duplicates().await.unwrap().len(), 1);
}
