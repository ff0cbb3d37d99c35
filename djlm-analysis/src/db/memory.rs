//! In-memory catalog

use async_trait::async_trait;
use djlm_common::models::{AnalysisRecord, CuePoint, Track, TrackAttributes};
use djlm_common::{Error, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Catalog;

#[derive(Default)]
struct State {
    /// Insertion order doubles as catalog order
    tracks: Vec<Track>,
    analyses: Vec<AnalysisRecord>,
    cues: HashMap<Uuid, Vec<CuePoint>>,
}

/// Catalog kept entirely in memory
#[derive(Default)]
pub struct InMemoryCatalog {
    state: RwLock<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with `tracks`
    pub fn with_tracks(tracks: Vec<Track>) -> Self {
        Self {
            state: RwLock::new(State {
                tracks,
                ..Default::default()
            }),
        }
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_track(&self, id: Uuid) -> Result<Option<Track>> {
        let state = self.state.read().await;
        Ok(state.tracks.iter().find(|t| t.id == id).cloned())
    }

    async fn all_tracks(&self) -> Result<Vec<Track>> {
        Ok(self.state.read().await.tracks.clone())
    }

    async fn upsert_track(&self, track: &Track) -> Result<()> {
        let mut state = self.state.write().await;
        match state.tracks.iter_mut().find(|t| t.id == track.id) {
            Some(existing) => *existing = track.clone(),
            None => state.tracks.push(track.clone()),
        }
        Ok(())
    }

    async fn update_track_attributes(&self, id: Uuid, attributes: &TrackAttributes) -> Result<()> {
        let mut state = self.state.write().await;
        let track = state
            .tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("track {}", id)))?;
        attributes.apply_to(track);
        Ok(())
    }

    async fn upsert_analysis(&self, record: &AnalysisRecord) -> Result<()> {
        let mut state = self.state.write().await;
        match state.analyses.iter_mut().find(|a| a.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => state.analyses.push(record.clone()),
        }
        Ok(())
    }

    async fn analyses_for_track(&self, track_id: Uuid) -> Result<Vec<AnalysisRecord>> {
        let state = self.state.read().await;
        Ok(state
            .analyses
            .iter()
            .filter(|a| a.track_id == track_id)
            .cloned()
            .collect())
    }

    async fn insert_cue(&self, cue: &CuePoint) -> Result<()> {
        let mut state = self.state.write().await;
        state.cues.entry(cue.track_id).or_default().push(cue.clone());
        Ok(())
    }

    async fn cues_for_track(&self, track_id: Uuid) -> Result<Vec<CuePoint>> {
        let state = self.state.read().await;
        let mut cues = state.cues.get(&track_id).cloned().unwrap_or_default();
        cues.sort_by_key(|c| c.position_ms);
        Ok(cues)
    }

    async fn delete_cues_for_track(&self, track_id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        Ok(state
            .cues
            .remove(&track_id)
            .map(|c| c.len() as u64)
            .unwrap_or(0))
    }
}
