//! Error types for djlm-analysis
//!
//! Two kinds are fatal to a whole `analyze_track` call (`TrackNotFound`,
//! `FileMissing`). Dispatcher failures are fatal to one analyzer invocation
//! only; the orchestrator records them and moves on.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Analysis engine error type
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Track id not present in the catalog
    #[error("Track not found: {0}")]
    TrackNotFound(Uuid),

    /// Track's audio file is no longer accessible
    #[error("Audio file missing: {}", .0.display())]
    FileMissing(PathBuf),

    /// Analyzer name has no script mapping
    #[error("Unknown analyzer: {0}")]
    UnknownAnalyzer(String),

    /// Analyzer process could not be started
    #[error("Failed to spawn {analyzer} analyzer: {source}")]
    SpawnError {
        analyzer: String,
        #[source]
        source: std::io::Error,
    },

    /// Analyzer exceeded its time budget and was killed
    #[error("Analyzer {analyzer} timed out after {}ms", .timeout.as_millis())]
    WorkerTimeout { analyzer: String, timeout: Duration },

    /// Analyzer exited unsuccessfully
    #[error("Analyzer {analyzer} exited with code {code:?}: {stderr}")]
    WorkerExitError {
        analyzer: String,
        /// `None` when terminated by a signal
        code: Option<i32>,
        stderr: String,
    },

    /// Analyzer exited cleanly without a `RESULT:` line
    #[error("Analyzer {0} produced no result")]
    NoResultProduced(String),

    /// `RESULT:` payload was not valid JSON
    #[error("Analyzer {analyzer} produced a malformed result: {source}")]
    MalformedResult {
        analyzer: String,
        #[source]
        source: serde_json::Error,
    },

    /// Cue derivation needs a completed tempo analysis
    #[error("Track {0} has no completed tempo analysis")]
    TempoAnalysisRequired(Uuid),

    /// Job was terminated by `cancel_all`
    #[error("Analysis job {0} was cancelled")]
    Cancelled(Uuid),

    /// A job with this id is already running
    #[error("Analysis job {0} is already active")]
    JobAlreadyActive(Uuid),

    /// Analyzer I/O failed after spawn (pipes, wait)
    #[error("Analyzer {analyzer} I/O error: {source}")]
    WorkerIo {
        analyzer: String,
        #[source]
        source: std::io::Error,
    },

    /// Catalog storage error
    #[error("Catalog error: {0}")]
    Catalog(#[from] djlm_common::Error),
}

impl AnalysisError {
    /// Errors that abort a whole `analyze_track` call
    pub fn is_fatal_to_track(&self) -> bool {
        matches!(
            self,
            AnalysisError::TrackNotFound(_) | AnalysisError::FileMissing(_)
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, AnalysisError>;
