//! Analysis orchestrator
//!
//! Runs the enabled analyzers for a track one after another, persists one
//! record per analyzer, and folds completed results into the track's BPM, key
//! and energy. Batches of tracks are admitted `max_workers` at a time.
//!
//! [`AnalysisOrchestrator::shutdown`] is final: no analyzer is started after
//! it, running ones are killed, and per-track loops and batches stop early.

use chrono::Utc;
use djlm_common::config::AnalysisConfig;
use djlm_common::events::{EngineEvent, EventBus};
use djlm_common::models::{
    AnalysisJob, AnalysisRecord, AnalysisStatus, AnalyzerKind, Track, TrackAttributes,
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::Catalog;
use crate::dispatcher::AnalyzerBackend;
use crate::error::{AnalysisError, EngineResult};
use crate::tags::{TagUpdate, TagWriter};

/// Outcome of one `analyze_track` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackAnalysisSummary {
    pub track_id: Uuid,
    /// Analyzers whose record ended `completed`
    pub completed: Vec<String>,
    /// Analyzers whose record ended `failed`, with the error text
    pub failed: Vec<(String, String)>,
    /// Requested analyzers that are not enabled
    pub skipped: Vec<String>,
    /// Attribute values written to the track, when anything changed
    pub updated: Option<TrackAttributes>,
    /// Shutdown stopped the loop before every requested analyzer ran
    pub interrupted: bool,
}

/// Outcome of a multi-track batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Track attributes carried by a completed analyzer payload
///
/// - tempo: `tempo` rounded to whole BPM
/// - key: `key`
/// - energy: `energy_stats.mean` (0-1) scaled to 0-100
pub fn extract_attributes(analyzer: &str, payload: &Value) -> TrackAttributes {
    let mut attributes = TrackAttributes::default();

    match analyzer.parse::<AnalyzerKind>() {
        Ok(AnalyzerKind::Tempo) => {
            attributes.bpm = payload
                .get("tempo")
                .and_then(Value::as_f64)
                .filter(|t| t.is_finite() && *t > 0.0)
                .map(|t| t.round() as u32);
        }
        Ok(AnalyzerKind::Key) => {
            attributes.key = payload
                .get("key")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string);
        }
        Ok(AnalyzerKind::Energy) => {
            attributes.energy = payload
                .get("energy_stats")
                .and_then(|stats| stats.get("mean"))
                .and_then(Value::as_f64)
                .filter(|m| m.is_finite())
                .map(|mean| (mean * 100.0).round().clamp(0.0, 100.0) as u8);
        }
        _ => {}
    }

    attributes
}

pub struct AnalysisOrchestrator {
    catalog: Arc<dyn Catalog>,
    backend: Arc<dyn AnalyzerBackend>,
    tag_writer: Arc<dyn TagWriter>,
    events: EventBus,
    config: AnalysisConfig,
    shutdown: CancellationToken,
}

impl AnalysisOrchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        backend: Arc<dyn AnalyzerBackend>,
        tag_writer: Arc<dyn TagWriter>,
        events: EventBus,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            catalog,
            backend,
            tag_writer,
            events,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run `analyzer_names` (enabled ones only, in order) against one track
    ///
    /// Only a missing track or a missing audio file fails the call; analyzer
    /// failures are recorded on their analysis record and the loop continues.
    pub async fn analyze_track(
        &self,
        track_id: Uuid,
        analyzer_names: &[String],
    ) -> EngineResult<TrackAnalysisSummary> {
        let track = self
            .catalog
            .get_track(track_id)
            .await?
            .ok_or(AnalysisError::TrackNotFound(track_id))?;

        if !tokio::fs::try_exists(&track.path).await.unwrap_or(false) {
            return Err(AnalysisError::FileMissing(track.path.clone()));
        }

        let mut summary = TrackAnalysisSummary {
            track_id,
            ..Default::default()
        };
        let mut attributes = TrackAttributes::default();

        for analyzer in analyzer_names {
            if self.shutdown.is_cancelled() {
                tracing::info!(track_id = %track_id, next = %analyzer, "Shutdown requested, stopping track analysis");
                summary.interrupted = true;
                break;
            }

            if !self.config.is_enabled(analyzer) {
                tracing::debug!(track_id = %track_id, analyzer = %analyzer, "Analyzer not enabled, skipping");
                summary.skipped.push(analyzer.clone());
                continue;
            }

            match self.run_analyzer(&track, analyzer).await? {
                Ok(payload) => {
                    attributes.merge(extract_attributes(analyzer, &payload));
                    summary.completed.push(analyzer.clone());
                }
                Err(error) => summary.failed.push((analyzer.clone(), error)),
            }
        }

        let mut updated_track = track.clone();
        if attributes.apply_to(&mut updated_track) {
            self.catalog
                .update_track_attributes(track_id, &attributes)
                .await?;

            tracing::info!(
                track_id = %track_id,
                bpm = ?updated_track.bpm,
                key = ?updated_track.key,
                energy = ?updated_track.energy,
                "Track attributes updated"
            );

            if self.config.write_tags {
                self.write_tags(&updated_track).await;
            }

            summary.updated = Some(attributes);
        }

        tracing::info!(
            track_id = %track_id,
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "Track analysis finished"
        );

        Ok(summary)
    }

    /// One analyzer invocation with its record lifecycle
    ///
    /// The outer error is a catalog failure; the inner one is the analyzer's
    /// own failure, already persisted on the record.
    async fn run_analyzer(
        &self,
        track: &Track,
        analyzer: &str,
    ) -> EngineResult<Result<Value, String>> {
        let job = AnalysisJob {
            id: Uuid::new_v4(),
            track_id: track.id,
            audio_path: track.path.clone(),
            analyzer: analyzer.to_string(),
            parameters: self.config.parameters_for(analyzer),
        };

        let mut record = AnalysisRecord::pending(&job);
        self.catalog.upsert_analysis(&record).await?;

        self.events.emit_lossy(EngineEvent::AnalysisStarted {
            job_id: job.id,
            track_id: track.id,
            analyzer: analyzer.to_string(),
            timestamp: Utc::now(),
        });

        let job_id = job.id;
        let outcome = match self.backend.run(job, self.config.timeout()).await {
            Ok(result) if result.status == AnalysisStatus::Completed => {
                record.complete(&result);
                Ok(result.payload)
            }
            Ok(result) => {
                let error = format!("Analyzer {} reported status {}", analyzer, result.status.as_str());
                record.fail(error.clone());
                Err(error)
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    track_id = %track.id,
                    analyzer = %analyzer,
                    error = %e,
                    "Analyzer failed"
                );
                record.fail(e.to_string());
                Err(e.to_string())
            }
        };

        // Retry once; a lost terminal write must not abort the remaining analyzers
        if let Err(first) = self.catalog.upsert_analysis(&record).await {
            tracing::warn!(job_id = %job_id, error = %first, "Storing analysis outcome failed, retrying");
            if let Err(e) = self.catalog.upsert_analysis(&record).await {
                tracing::error!(
                    job_id = %job_id,
                    track_id = %track.id,
                    analyzer = %analyzer,
                    error = %e,
                    "Analysis outcome not stored"
                );
            }
        }

        self.events.emit_lossy(EngineEvent::AnalysisCompleted {
            job_id,
            track_id: track.id,
            analyzer: analyzer.to_string(),
            status: record.status,
            error: record.error.clone(),
            timestamp: Utc::now(),
        });

        Ok(outcome)
    }

    /// Best-effort tag write; failures are logged only
    async fn write_tags(&self, track: &Track) {
        let writer = Arc::clone(&self.tag_writer);
        let path = track.path.clone();
        let update = TagUpdate {
            bpm: track.bpm,
            key: track.key.clone(),
            energy: track.energy,
        };

        match tokio::task::spawn_blocking(move || writer.write_tags(&path, &update)).await {
            Ok(Ok(())) => tracing::debug!(track_id = %track.id, "Tags written"),
            Ok(Err(e)) => {
                tracing::warn!(track_id = %track.id, path = %track.path.display(), error = %e, "Tag write failed")
            }
            Err(e) => tracing::warn!(track_id = %track.id, error = %e, "Tag write task failed"),
        }
    }

    /// Analyze several tracks, counting per-track outcomes
    pub async fn analyze_selected_tracks(
        &self,
        track_ids: &[Uuid],
        analyzer_names: &[String],
    ) -> BatchSummary {
        let batch_id = Uuid::new_v4();
        let total = track_ids.len();

        self.events.emit_lossy(EngineEvent::BatchStarted {
            batch_id,
            total,
            timestamp: Utc::now(),
        });
        tracing::info!(batch_id = %batch_id, total, "Analysis batch started");

        // Tracks not yet admitted at shutdown count as failed
        let outcomes: Vec<bool> = stream::iter(track_ids.iter().copied())
            .take_while(|_| futures::future::ready(!self.shutdown.is_cancelled()))
            .map(|track_id| async move {
                match self.analyze_track(track_id, analyzer_names).await {
                    Ok(summary) => !summary.interrupted,
                    Err(e) => {
                        tracing::error!(track_id = %track_id, error = %e, "Track analysis failed");
                        false
                    }
                }
            })
            .buffer_unordered(self.config.max_workers.max(1))
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        let failed = total - succeeded;

        self.events.emit_lossy(EngineEvent::BatchCompleted {
            batch_id,
            succeeded,
            failed,
            timestamp: Utc::now(),
        });
        tracing::info!(batch_id = %batch_id, succeeded, failed, "Analysis batch completed");

        BatchSummary {
            batch_id,
            total,
            succeeded,
            failed,
        }
    }

    /// Stop all analysis: kill in-flight analyzer processes and start no more
    pub fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        let cancelled = self.backend.cancel_all();
        tracing::info!(cancelled, "Analysis orchestrator shut down");
        cancelled
    }
}
