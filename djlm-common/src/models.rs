//! Catalog domain models
//!
//! Tracks are owned by the catalog. Analysis records and cue points are
//! produced by the analysis engine and persisted through the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Catalog track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Stable track identifier
    pub id: Uuid,
    /// Audio file location
    pub path: PathBuf,
    /// Content hash (SHA-256, hex)
    pub hash: String,
    /// Duration in milliseconds, 0 when unknown
    pub duration_ms: u64,
    /// File size in bytes
    pub size_bytes: Option<u64>,
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Rounded tempo
    pub bpm: Option<u32>,
    /// Musical key as reported by the key analyzer
    pub key: Option<String>,
    /// Energy on a 0-100 scale
    pub energy: Option<u8>,
}

impl Track {
    /// Create a track with no analyzed attributes
    pub fn new(path: impl Into<PathBuf>, hash: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            hash: hash.into(),
            duration_ms,
            size_bytes: None,
            title: None,
            artist: None,
            bpm: None,
            key: None,
            energy: None,
        }
    }

    /// Lower-cased file extension, if any
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// Current analyzed attributes
    pub fn attributes(&self) -> TrackAttributes {
        TrackAttributes {
            bpm: self.bpm,
            key: self.key.clone(),
            energy: self.energy,
        }
    }
}

/// Analyzer-derived track attributes
///
/// `None` fields are left untouched when applied to a track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackAttributes {
    pub bpm: Option<u32>,
    pub key: Option<String>,
    pub energy: Option<u8>,
}

impl TrackAttributes {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.bpm.is_none() && self.key.is_none() && self.energy.is_none()
    }

    /// Overlay set fields onto `track`, returning whether anything changed
    pub fn apply_to(&self, track: &mut Track) -> bool {
        let mut changed = false;
        if let Some(bpm) = self.bpm {
            changed |= track.bpm != Some(bpm);
            track.bpm = Some(bpm);
        }
        if let Some(key) = &self.key {
            changed |= track.key.as_ref() != Some(key);
            track.key = Some(key.clone());
        }
        if let Some(energy) = self.energy {
            changed |= track.energy != Some(energy);
            track.energy = Some(energy);
        }
        changed
    }

    /// Merge `other` on top of `self`
    pub fn merge(&mut self, other: TrackAttributes) {
        if other.bpm.is_some() {
            self.bpm = other.bpm;
        }
        if other.key.is_some() {
            self.key = other.key;
        }
        if other.energy.is_some() {
            self.energy = other.energy;
        }
    }
}

/// Analyzers known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    Tempo,
    Key,
    Energy,
    Metadata,
    Duplicate,
}

impl AnalyzerKind {
    pub const ALL: [AnalyzerKind; 5] = [
        AnalyzerKind::Tempo,
        AnalyzerKind::Key,
        AnalyzerKind::Energy,
        AnalyzerKind::Metadata,
        AnalyzerKind::Duplicate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerKind::Tempo => "tempo",
            AnalyzerKind::Key => "key",
            AnalyzerKind::Energy => "energy",
            AnalyzerKind::Metadata => "metadata",
            AnalyzerKind::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalyzerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalyzerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown analyzer '{}'", s)))
    }
}

/// One analyzer invocation for one track
///
/// Immutable once submitted; `id` is shared with the persisted [`AnalysisRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub track_id: Uuid,
    /// Absolute path of the audio file
    pub audio_path: PathBuf,
    /// Analyzer name, validated by the dispatcher
    pub analyzer: String,
    /// Passed through to the analyzer process unmodified
    pub parameters: Map<String, Value>,
}

/// Analysis lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    /// Completed and failed are terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnalysisStatus::Pending)
    }
}

impl FromStr for AnalysisStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnalysisStatus::Pending),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown analysis status '{}'", other))),
        }
    }
}

/// Successful output of one analyzer run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub job_id: Uuid,
    pub track_id: Uuid,
    pub analyzer: String,
    /// Analyzer-specific payload parsed from the `RESULT:` line
    pub payload: Value,
    pub status: AnalysisStatus,
    pub completed_at: DateTime<Utc>,
}

/// Persisted analysis record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub track_id: Uuid,
    pub analyzer: String,
    pub parameters: Map<String, Value>,
    pub status: AnalysisStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisRecord {
    /// Fresh pending record for `job`
    pub fn pending(job: &AnalysisJob) -> Self {
        Self {
            id: job.id,
            track_id: job.track_id,
            analyzer: job.analyzer.clone(),
            parameters: job.parameters.clone(),
            status: AnalysisStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self, result: &AnalysisResult) {
        self.status = AnalysisStatus::Completed;
        self.result = Some(result.payload.clone());
        self.error = None;
        self.completed_at = Some(result.completed_at);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = AnalysisStatus::Failed;
        self.result = None;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

/// Cue point category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CueType {
    Intro,
    Outro,
    Drop,
    Break,
    Custom,
}

impl CueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CueType::Intro => "intro",
            CueType::Outro => "outro",
            CueType::Drop => "drop",
            CueType::Break => "break",
            CueType::Custom => "custom",
        }
    }
}

impl FromStr for CueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intro" => Ok(CueType::Intro),
            "outro" => Ok(CueType::Outro),
            "drop" => Ok(CueType::Drop),
            "break" => Ok(CueType::Break),
            "custom" => Ok(CueType::Custom),
            other => Err(Error::InvalidInput(format!("unknown cue type '{}'", other))),
        }
    }
}

/// Timestamped marker on a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuePoint {
    pub id: Uuid,
    pub track_id: Uuid,
    pub cue_type: CueType,
    /// Position in milliseconds, within `[0, track duration]`
    pub position_ms: u64,
    pub label: Option<String>,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl CuePoint {
    pub fn new(
        track_id: Uuid,
        cue_type: CueType,
        position_ms: u64,
        label: Option<String>,
        confidence: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_id,
            cue_type,
            position_ms,
            label,
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

/// Track summary inside a duplicate group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMember {
    pub id: Uuid,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub path: PathBuf,
    /// Similarity to the group's anchor track (anchor is 1.0)
    pub similarity: f64,
}

/// Cluster of probable duplicates (recomputed on every scan)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub tracks: Vec<DuplicateMember>,
    pub reason: String,
}
