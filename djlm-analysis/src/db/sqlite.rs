//! SQLite catalog
//!
//! Tracks, analysis records and cue points live in the shared `djlm.db` in
//! the root folder. Ids are stored as UUID text, timestamps as RFC 3339 and
//! payloads as JSON text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use djlm_common::models::{
    AnalysisRecord, CuePoint, Track, TrackAttributes,
};
use djlm_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::Catalog;

/// Open (or create) the database and ensure the catalog tables exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            hash TEXT NOT NULL,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            size_bytes INTEGER,
            title TEXT,
            artist TEXT,
            bpm INTEGER,
            musical_key TEXT,
            energy INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            track_id TEXT NOT NULL,
            analyzer TEXT NOT NULL,
            parameters TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL,
            result TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cue_points (
            id TEXT PRIMARY KEY,
            track_id TEXT NOT NULL,
            cue_type TEXT NOT NULL,
            position_ms INTEGER NOT NULL,
            label TEXT,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analyses_track ON analyses(track_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cue_points_track ON cue_points(track_id)")
        .execute(pool)
        .await?;

    tracing::info!("Catalog tables initialized (tracks, analyses, cue_points)");

    Ok(())
}

/// Catalog backed by SQLite
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Open the database file at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            pool: init_database_pool(db_path).await?,
        })
    }

    /// Wrap an existing pool, creating the catalog tables if needed
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        init_tables(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::InvalidInput(format!("Invalid UUID in database: {}", e)))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp in database: {}", e)))
}

fn to_db_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn track_from_row(row: &SqliteRow) -> Result<Track> {
    let id: String = row.try_get("id")?;
    let path: String = row.try_get("path")?;
    let duration_ms: i64 = row.try_get("duration_ms")?;
    let size_bytes: Option<i64> = row.try_get("size_bytes")?;
    let bpm: Option<i64> = row.try_get("bpm")?;
    let energy: Option<i64> = row.try_get("energy")?;

    Ok(Track {
        id: parse_uuid(&id)?,
        path: PathBuf::from(path),
        hash: row.try_get("hash")?,
        duration_ms: duration_ms.max(0) as u64,
        size_bytes: size_bytes.map(|s| s.max(0) as u64),
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
        bpm: bpm.map(|b| b.clamp(0, u32::MAX as i64) as u32),
        key: row.try_get("musical_key")?,
        energy: energy.map(|e| e.clamp(0, 100) as u8),
    })
}

fn analysis_from_row(row: &SqliteRow) -> Result<AnalysisRecord> {
    let id: String = row.try_get("id")?;
    let track_id: String = row.try_get("track_id")?;
    let parameters: String = row.try_get("parameters")?;
    let status: String = row.try_get("status")?;
    let result: Option<String> = row.try_get("result")?;
    let created_at: String = row.try_get("created_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(AnalysisRecord {
        id: parse_uuid(&id)?,
        track_id: parse_uuid(&track_id)?,
        analyzer: row.try_get("analyzer")?,
        parameters: serde_json::from_str(&parameters)?,
        status: status.parse()?,
        result: result.map(|r| serde_json::from_str(&r)).transpose()?,
        error: row.try_get("error")?,
        created_at: parse_timestamp(&created_at)?,
        completed_at: completed_at.map(|t| parse_timestamp(&t)).transpose()?,
    })
}

fn cue_from_row(row: &SqliteRow) -> Result<CuePoint> {
    let id: String = row.try_get("id")?;
    let track_id: String = row.try_get("track_id")?;
    let cue_type: String = row.try_get("cue_type")?;
    let position_ms: i64 = row.try_get("position_ms")?;
    let confidence: f64 = row.try_get("confidence")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(CuePoint {
        id: parse_uuid(&id)?,
        track_id: parse_uuid(&track_id)?,
        cue_type: cue_type.parse()?,
        position_ms: position_ms.max(0) as u64,
        label: row.try_get("label")?,
        confidence: confidence as f32,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn get_track(&self, id: Uuid) -> Result<Option<Track>> {
        let row = sqlx::query("SELECT * FROM tracks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(track_from_row).transpose()
    }

    async fn all_tracks(&self) -> Result<Vec<Track>> {
        let rows = sqlx::query("SELECT * FROM tracks ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(track_from_row).collect()
    }

    async fn upsert_track(&self, track: &Track) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tracks (id, path, hash, duration_ms, size_bytes, title, artist, bpm, musical_key, energy)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                hash = excluded.hash,
                duration_ms = excluded.duration_ms,
                size_bytes = excluded.size_bytes,
                title = excluded.title,
                artist = excluded.artist,
                bpm = excluded.bpm,
                musical_key = excluded.musical_key,
                energy = excluded.energy
            "#,
        )
        .bind(track.id.to_string())
        .bind(track.path.to_string_lossy().into_owned())
        .bind(&track.hash)
        .bind(to_db_int(track.duration_ms))
        .bind(track.size_bytes.map(to_db_int))
        .bind(&track.title)
        .bind(&track.artist)
        .bind(track.bpm.map(i64::from))
        .bind(&track.key)
        .bind(track.energy.map(i64::from))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_track_attributes(&self, id: Uuid, attributes: &TrackAttributes) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tracks SET
                bpm = COALESCE(?, bpm),
                musical_key = COALESCE(?, musical_key),
                energy = COALESCE(?, energy)
            WHERE id = ?
            "#,
        )
        .bind(attributes.bpm.map(i64::from))
        .bind(&attributes.key)
        .bind(attributes.energy.map(i64::from))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("track {}", id)));
        }
        Ok(())
    }

    async fn upsert_analysis(&self, record: &AnalysisRecord) -> Result<()> {
        let parameters = serde_json::to_string(&record.parameters)?;
        let result = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO analyses (id, track_id, analyzer, parameters, status, result, error, created_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                result = excluded.result,
                error = excluded.error,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.track_id.to_string())
        .bind(&record.analyzer)
        .bind(parameters)
        .bind(record.status.as_str())
        .bind(result)
        .bind(&record.error)
        .bind(record.created_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn analyses_for_track(&self, track_id: Uuid) -> Result<Vec<AnalysisRecord>> {
        let rows = sqlx::query("SELECT * FROM analyses WHERE track_id = ? ORDER BY created_at, rowid")
            .bind(track_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(analysis_from_row).collect()
    }

    async fn insert_cue(&self, cue: &CuePoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cue_points (id, track_id, cue_type, position_ms, label, confidence, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(cue.id.to_string())
        .bind(cue.track_id.to_string())
        .bind(cue.cue_type.as_str())
        .bind(to_db_int(cue.position_ms))
        .bind(&cue.label)
        .bind(f64::from(cue.confidence))
        .bind(cue.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cues_for_track(&self, track_id: Uuid) -> Result<Vec<CuePoint>> {
        let rows = sqlx::query("SELECT * FROM cue_points WHERE track_id = ? ORDER BY position_ms, rowid")
            .bind(track_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(cue_from_row).collect()
    }

    async fn delete_cues_for_track(&self, track_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cue_points WHERE track_id = ?")
            .bind(track_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
