//! Shared test utilities
//!
//! Stand-in analyzer scripts (run with `sh`), an in-process fake backend, tag
//! writer doubles and catalog fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use djlm_analysis::db::{Catalog, InMemoryCatalog};
use djlm_analysis::dispatcher::{AnalyzerBackend, ScriptTable};
use djlm_analysis::error::{AnalysisError, EngineResult};
use djlm_analysis::tags::{TagError, TagUpdate, TagWriter};
use djlm_common::models::{
    AnalysisJob, AnalysisRecord, AnalysisResult, AnalysisStatus, CuePoint, Track,
    TrackAttributes,
};
use djlm_common::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Write `body` as a shell script in `dir`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    path
}

/// Script table that runs `<analyzer>.sh` files from `dir` through `sh`
pub fn sh_scripts(dir: &Path, analyzers: &[&str]) -> ScriptTable {
    analyzers.iter().fold(
        ScriptTable::new(dir, Some("sh".to_string())),
        |table, analyzer| table.with_script(*analyzer, format!("{}.sh", analyzer)),
    )
}

pub fn job(track_id: Uuid, audio_path: &Path, analyzer: &str) -> AnalysisJob {
    AnalysisJob {
        id: Uuid::new_v4(),
        track_id,
        audio_path: audio_path.to_path_buf(),
        analyzer: analyzer.to_string(),
        parameters: Map::new(),
    }
}

/// Track backed by a real (non-audio) file in `dir`
pub fn track_on_disk(dir: &Path, name: &str, duration_ms: u64) -> Track {
    let path = dir.join(name);
    std::fs::write(&path, b"fake audio").unwrap();
    Track::new(path, format!("hash-{}", name), duration_ms)
}

/// Completed analysis record carrying `payload`
pub fn completed_record(track_id: Uuid, analyzer: &str, payload: Value) -> AnalysisRecord {
    let job = job(track_id, Path::new("/music/x.mp3"), analyzer);
    let mut record = AnalysisRecord::pending(&job);
    record.complete(&AnalysisResult {
        job_id: job.id,
        track_id,
        analyzer: analyzer.to_string(),
        payload,
        status: AnalysisStatus::Completed,
        completed_at: Utc::now(),
    });
    record
}

/// Scripted behavior of one analyzer in [`FakeBackend`]
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Payload(Value),
    NoResult,
    ExitError(i32, &'static str),
}

/// In-process backend answering from a table of canned responses
///
/// Records every job and the peak number of concurrent jobs per track.
#[derive(Default)]
pub struct FakeBackend {
    responses: HashMap<String, FakeResponse>,
    delay: Duration,
    pub jobs: Mutex<Vec<AnalysisJob>>,
    running: Mutex<HashMap<Uuid, usize>>,
    pub peak_per_track: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, analyzer: &str, response: FakeResponse) -> Self {
        self.responses.insert(analyzer.to_string(), response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    fn enter(&self, track_id: Uuid) {
        let mut running = self.running.lock().unwrap();
        let count = running.entry(track_id).or_insert(0);
        *count += 1;
        self.peak_per_track.fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, track_id: Uuid) {
        let mut running = self.running.lock().unwrap();
        if let Some(count) = running.get_mut(&track_id) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl AnalyzerBackend for FakeBackend {
    async fn run(&self, job: AnalysisJob, _timeout: Duration) -> EngineResult<AnalysisResult> {
        self.jobs.lock().unwrap().push(job.clone());
        self.enter(job.track_id);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.leave(job.track_id);

        match self.responses.get(&job.analyzer) {
            Some(FakeResponse::Payload(payload)) => Ok(AnalysisResult {
                job_id: job.id,
                track_id: job.track_id,
                analyzer: job.analyzer.clone(),
                payload: payload.clone(),
                status: AnalysisStatus::Completed,
                completed_at: Utc::now(),
            }),
            Some(FakeResponse::ExitError(code, stderr)) => Err(AnalysisError::WorkerExitError {
                analyzer: job.analyzer.clone(),
                code: Some(*code),
                stderr: stderr.to_string(),
            }),
            Some(FakeResponse::NoResult) | None => {
                Err(AnalysisError::NoResultProduced(job.analyzer.clone()))
            }
        }
    }

    fn cancel_all(&self) -> usize {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn active_job_count(&self) -> usize {
        self.running.lock().unwrap().values().sum()
    }
}

/// Tag writer that remembers every update
#[derive(Default)]
pub struct RecordingTagWriter {
    pub writes: Mutex<Vec<(PathBuf, TagUpdate)>>,
}

impl TagWriter for RecordingTagWriter {
    fn write_tags(&self, path: &Path, update: &TagUpdate) -> std::result::Result<(), TagError> {
        self.writes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), update.clone()));
        Ok(())
    }
}

/// Tag writer that always fails
#[derive(Default)]
pub struct FailingTagWriter {
    pub attempts: AtomicUsize,
}

impl TagWriter for FailingTagWriter {
    fn write_tags(&self, path: &Path, _update: &TagUpdate) -> std::result::Result<(), TagError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TagError::Unsupported(path.display().to_string()))
    }
}

/// Catalog whose every operation fails
pub struct BrokenCatalog;

fn broken<T>() -> Result<T> {
    Err(Error::Internal("catalog offline".to_string()))
}

#[async_trait]
impl Catalog for BrokenCatalog {
    async fn get_track(&self, _id: Uuid) -> Result<Option<Track>> {
        broken()
    }
    async fn all_tracks(&self) -> Result<Vec<Track>> {
        broken()
    }
    async fn upsert_track(&self, _track: &Track) -> Result<()> {
        broken()
    }
    async fn update_track_attributes(&self, _id: Uuid, _attributes: &TrackAttributes) -> Result<()> {
        broken()
    }
    async fn upsert_analysis(&self, _record: &AnalysisRecord) -> Result<()> {
        broken()
    }
    async fn analyses_for_track(&self, _track_id: Uuid) -> Result<Vec<AnalysisRecord>> {
        broken()
    }
    async fn insert_cue(&self, _cue: &CuePoint) -> Result<()> {
        broken()
    }
    async fn cues_for_track(&self, _track_id: Uuid) -> Result<Vec<CuePoint>> {
        broken()
    }
    async fn delete_cues_for_track(&self, _track_id: Uuid) -> Result<u64> {
        broken()
    }
}

/// In-memory catalog that rejects the next `n` terminal analysis writes
pub struct FlakyCatalog {
    pub inner: InMemoryCatalog,
    terminal_failures: AtomicUsize,
}

impl FlakyCatalog {
    pub fn new(inner: InMemoryCatalog, terminal_failures: usize) -> Self {
        Self {
            inner,
            terminal_failures: AtomicUsize::new(terminal_failures),
        }
    }
}

#[async_trait]
impl Catalog for FlakyCatalog {
    async fn get_track(&self, id: Uuid) -> Result<Option<Track>> {
        self.inner.get_track(id).await
    }
    async fn all_tracks(&self) -> Result<Vec<Track>> {
        self.inner.all_tracks().await
    }
    async fn upsert_track(&self, track: &Track) -> Result<()> {
        self.inner.upsert_track(track).await
    }
    async fn update_track_attributes(&self, id: Uuid, attributes: &TrackAttributes) -> Result<()> {
        self.inner.update_track_attributes(id, attributes).await
    }
    async fn upsert_analysis(&self, record: &AnalysisRecord) -> Result<()> {
        let rejected = record.status.is_terminal()
            && self
                .terminal_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if rejected {
            return Err(Error::Internal("database is locked".to_string()));
        }
        self.inner.upsert_analysis(record).await
    }
    async fn analyses_for_track(&self, track_id: Uuid) -> Result<Vec<AnalysisRecord>> {
        self.inner.analyses_for_track(track_id).await
    }
    async fn insert_cue(&self, cue: &CuePoint) -> Result<()> {
        self.inner.insert_cue(cue).await
    }
    async fn cues_for_track(&self, track_id: Uuid) -> Result<Vec<CuePoint>> {
        self.inner.cues_for_track(track_id).await
    }
    async fn delete_cues_for_track(&self, track_id: Uuid) -> Result<u64> {
        self.inner.delete_cues_for_track(track_id).await
    }
}
