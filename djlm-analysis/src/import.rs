//! Catalog import
//!
//! Registers audio files as catalog tracks: content hash, file size, and
//! duration/title/artist when lofty can read them. Analysis never creates
//! tracks; this is the only way the CLI populates a catalog.

use djlm_common::models::Track;
use djlm_common::{Error, Result};
use lofty::prelude::*;
use lofty::probe::Probe;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::db::Catalog;

/// SHA-256 of a file's contents, lower-case hex
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024]; // 1MB chunks

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Build a track from a file on disk
///
/// Unreadable tags are not an error: the track is registered with unknown
/// duration and no title or artist.
pub fn read_track(path: &Path) -> Result<Track> {
    let path = std::fs::canonicalize(path)?;
    let size_bytes = std::fs::metadata(&path)?.len();
    let hash = hash_file(&path)?;

    let mut track = Track::new(path.clone(), hash, 0);
    track.size_bytes = Some(size_bytes);

    match Probe::open(&path).and_then(|probe| probe.read()) {
        Ok(tagged_file) => {
            track.duration_ms = tagged_file.properties().duration().as_millis() as u64;
            if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
                track.title = tag.title().map(|s| s.to_string());
                track.artist = tag.artist().map(|s| s.to_string());
            }
        }
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "Could not read audio metadata");
        }
    }

    tracing::debug!(
        file = %path.display(),
        duration_ms = track.duration_ms,
        title = ?track.title,
        artist = ?track.artist,
        "Read track"
    );

    Ok(track)
}

/// Import `paths` into `catalog`
///
/// A path already in the catalog keeps its track id and analyzed attributes;
/// its hash, size and tag metadata are refreshed. Files that cannot be read
/// are logged and skipped.
pub async fn import_files(catalog: &dyn Catalog, paths: &[PathBuf]) -> Result<Vec<Track>> {
    let existing: HashMap<PathBuf, Track> = catalog
        .all_tracks()
        .await?
        .into_iter()
        .map(|t| (t.path.clone(), t))
        .collect();

    let mut imported = Vec::new();
    for path in paths {
        let owned = path.clone();
        let read = tokio::task::spawn_blocking(move || read_track(&owned))
            .await
            .map_err(|e| Error::Internal(format!("Import task failed: {}", e)))?;

        let mut track = match read {
            Ok(track) => track,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping file");
                continue;
            }
        };

        if let Some(previous) = existing.get(&track.path) {
            track.id = previous.id;
            track.bpm = previous.bpm;
            track.key = previous.key.clone();
            track.energy = previous.energy;
        }

        catalog.upsert_track(&track).await?;
        tracing::info!(track_id = %track.id, file = %track.path.display(), "Track imported");
        imported.push(track);
    }

    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryCatalog;
    use tempfile::TempDir;

    #[test]
    fn test_hash_matches_sha256() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.bin");
        std::fs::write(&path, b"test content").unwrap();

        let expected = format!("{:x}", Sha256::digest(b"test content"));
        assert_eq!(hash_file(&path).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_import_keeps_id_on_reimport() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("not_really.mp3");
        std::fs::write(&path, b"no audio frames here").unwrap();

        let catalog = InMemoryCatalog::new();
        let first = import_files(&catalog, &[path.clone()]).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].duration_ms, 0);
        assert_eq!(first[0].size_bytes, Some(20));

        std::fs::write(&path, b"different bytes now!").unwrap();
        let second = import_files(&catalog, &[path]).await.unwrap();

        assert_eq!(second[0].id, first[0].id);
        assert_ne!(second[0].hash, first[0].hash);
        assert_eq!(catalog.all_tracks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let catalog = InMemoryCatalog::new();
        let imported = import_files(&catalog, &[PathBuf::from("/nonexistent/x.mp3")])
            .await
            .unwrap();
        assert!(imported.is_empty());
    }
}
