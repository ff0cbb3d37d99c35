//! Catalog storage access
//!
//! The engine only talks to storage through the [`Catalog`] trait. Two
//! implementations ship with the crate: [`SqliteCatalog`] (the application
//! database) and [`InMemoryCatalog`] (tests and dry runs).

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryCatalog;
pub use sqlite::{init_database_pool, SqliteCatalog};

use async_trait::async_trait;
use djlm_common::models::{AnalysisRecord, CuePoint, Track, TrackAttributes};
use djlm_common::Result;
use uuid::Uuid;

/// Catalog storage consumed by the analysis engine
///
/// Storage is externally synchronized: the engine performs read-then-write
/// sequences without optimistic concurrency control.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch one track
    async fn get_track(&self, id: Uuid) -> Result<Option<Track>>;

    /// All tracks in catalog order
    async fn all_tracks(&self) -> Result<Vec<Track>>;

    /// Insert or replace a track (catalog import only, never called by the engine)
    async fn upsert_track(&self, track: &Track) -> Result<()>;

    /// Overlay the set fields of `attributes` onto a track
    async fn update_track_attributes(&self, id: Uuid, attributes: &TrackAttributes) -> Result<()>;

    /// Insert or update an analysis record by id
    async fn upsert_analysis(&self, record: &AnalysisRecord) -> Result<()>;

    /// Analyses of one track, oldest first
    async fn analyses_for_track(&self, track_id: Uuid) -> Result<Vec<AnalysisRecord>>;

    /// Append one cue point
    async fn insert_cue(&self, cue: &CuePoint) -> Result<()>;

    /// Cue points of one track ordered by position
    async fn cues_for_track(&self, track_id: Uuid) -> Result<Vec<CuePoint>>;

    /// Remove every cue of a track, returning how many were removed
    async fn delete_cues_for_track(&self, track_id: Uuid) -> Result<u64>;
}
