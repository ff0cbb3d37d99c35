//! SQLite catalog tests
//!
//! Each test opens a fresh database file in a temp dir.

mod helpers;

use djlm_analysis::db::{Catalog, SqliteCatalog};
use djlm_common::models::{AnalysisRecord, CuePoint, CueType, Track, TrackAttributes};
use djlm_common::Error;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use helpers::{completed_record, job};

async fn open_catalog(dir: &TempDir) -> SqliteCatalog {
    SqliteCatalog::open(&dir.path().join("djlm.db")).await.unwrap()
}

fn sample_track(path: &str) -> Track {
    let mut track = Track::new(path, format!("sha-{path}"), 185_000);
    track.size_bytes = Some(7_400_000);
    track.title = Some("Night Drive".to_string());
    track.artist = Some("Parallel Lines".to_string());
    track
}

#[tokio::test]
async fn test_open_creates_database_in_missing_directory() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("djlm.db");

    SqliteCatalog::open(&db_path).await.unwrap();

    assert!(db_path.exists());
}

#[tokio::test]
async fn test_track_upsert_and_lookup() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;

    let first = sample_track("/music/b.flac");
    let second = sample_track("/music/a.mp3");
    catalog.upsert_track(&first).await.unwrap();
    catalog.upsert_track(&second).await.unwrap();

    assert_eq!(catalog.get_track(first.id).await.unwrap(), Some(first.clone()));
    assert!(catalog.get_track(Uuid::new_v4()).await.unwrap().is_none());

    // Insertion order, not path order
    let all = catalog.all_tracks().await.unwrap();
    assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![first.id, second.id]);

    // Upsert on an existing id overwrites in place
    let mut renamed = first.clone();
    renamed.title = Some("Night Drive (Extended)".to_string());
    catalog.upsert_track(&renamed).await.unwrap();

    let all = catalog.all_tracks().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0], renamed);
}

#[tokio::test]
async fn test_attribute_update_keeps_unset_fields() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;

    let mut track = sample_track("/music/a.mp3");
    track.key = Some("Am".to_string());
    catalog.upsert_track(&track).await.unwrap();

    catalog
        .update_track_attributes(
            track.id,
            &TrackAttributes {
                bpm: Some(124),
                key: None,
                energy: Some(80),
            },
        )
        .await
        .unwrap();

    let stored = catalog.get_track(track.id).await.unwrap().unwrap();
    assert_eq!(stored.bpm, Some(124));
    assert_eq!(stored.key.as_deref(), Some("Am"));
    assert_eq!(stored.energy, Some(80));
}

#[tokio::test]
async fn test_attribute_update_for_unknown_track() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;

    let err = catalog
        .update_track_attributes(Uuid::new_v4(), &TrackAttributes::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_analysis_record_lifecycle() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    let track = sample_track("/music/a.mp3");
    catalog.upsert_track(&track).await.unwrap();

    let mut analysis_job = job(track.id, &track.path, "energy");
    analysis_job.parameters.insert("hop_length".into(), json!(512));

    let mut record = AnalysisRecord::pending(&analysis_job);
    catalog.upsert_analysis(&record).await.unwrap();

    let stored = catalog.analyses_for_track(track.id).await.unwrap();
    assert_eq!(stored, vec![record.clone()]);

    // Failing the same record updates it in place
    record.fail("worker exited with code 1");
    catalog.upsert_analysis(&record).await.unwrap();

    let completed = completed_record(
        track.id,
        "tempo",
        json!({"tempo": 126.5, "beat_positions": [0.47, 0.95]}),
    );
    catalog.upsert_analysis(&completed).await.unwrap();

    let stored = catalog.analyses_for_track(track.id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0], record);
    assert_eq!(stored[0].parameters["hop_length"], json!(512));
    assert_eq!(stored[1], completed);

    assert!(catalog.analyses_for_track(Uuid::new_v4()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cues_ordered_by_position_and_deleted_per_track() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    let track_id = Uuid::new_v4();
    let other_id = Uuid::new_v4();

    let outro = CuePoint::new(track_id, CueType::Outro, 150_000, Some("Outro".into()), 0.8);
    let intro = CuePoint::new(track_id, CueType::Intro, 1_200, Some("Intro".into()), 0.9);
    let unlabeled = CuePoint::new(track_id, CueType::Custom, 64_000, None, 0.8);
    let elsewhere = CuePoint::new(other_id, CueType::Drop, 30_000, Some("Drop".into()), 0.3);

    for cue in [&outro, &intro, &unlabeled, &elsewhere] {
        catalog.insert_cue(cue).await.unwrap();
    }

    let stored = catalog.cues_for_track(track_id).await.unwrap();
    assert_eq!(stored, vec![intro, unlabeled, outro]);

    assert_eq!(catalog.delete_cues_for_track(track_id).await.unwrap(), 3);
    assert!(catalog.cues_for_track(track_id).await.unwrap().is_empty());
    assert_eq!(catalog.cues_for_track(other_id).await.unwrap(), vec![elsewhere]);
    assert_eq!(catalog.delete_cues_for_track(track_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let track = sample_track("/music/a.mp3");
    let cue = CuePoint::new(track.id, CueType::Drop, 45_000, Some("Drop".into()), 0.85);

    {
        let catalog = open_catalog(&dir).await;
        catalog.upsert_track(&track).await.unwrap();
        catalog.insert_cue(&cue).await.unwrap();
        catalog.pool().close().await;
    }

    let catalog = open_catalog(&dir).await;
    assert_eq!(catalog.get_track(track.id).await.unwrap(), Some(track.clone()));
    assert_eq!(catalog.cues_for_track(track.id).await.unwrap(), vec![cue]);
}
