//! Process dispatcher
//!
//! Runs one external analyzer process per job: spawn, stream stdout for
//! progress and result lines, enforce the time budget, interpret the exit
//! status. Every running job is tracked in a [`JobRegistry`] so shutdown can
//! terminate all of them at once.

pub mod pool;
pub mod protocol;
pub mod registry;
pub mod scripts;

pub use pool::WorkerPool;
pub use protocol::{parse_progress_line, parse_result_line, ProgressTracker};
pub use registry::JobRegistry;
pub use scripts::ScriptTable;

use async_trait::async_trait;
use chrono::Utc;
use djlm_common::events::{EngineEvent, EventBus};
use djlm_common::models::{AnalysisJob, AnalysisResult, AnalysisStatus};
use serde_json::Value;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};

use crate::error::{AnalysisError, EngineResult};

/// Something that can run an analysis job to completion
///
/// [`ProcessDispatcher`] runs external processes; [`WorkerPool`] bounds any
/// backend's concurrency; tests supply in-process fakes.
#[async_trait]
pub trait AnalyzerBackend: Send + Sync {
    /// Run `job`, failing with `WorkerTimeout` after `timeout`
    async fn run(&self, job: AnalysisJob, timeout: Duration) -> EngineResult<AnalysisResult>;

    /// Terminate every in-flight job, returning how many were signalled
    fn cancel_all(&self) -> usize;

    fn active_job_count(&self) -> usize;
}

/// How the process wait ended
enum Outcome {
    Exited(std::io::Result<(ExitStatus, Option<String>)>),
    TimedOut,
    Cancelled,
}

/// Spawns analyzer scripts as child processes
pub struct ProcessDispatcher {
    scripts: ScriptTable,
    registry: JobRegistry,
    events: EventBus,
}

impl ProcessDispatcher {
    pub fn new(scripts: ScriptTable, events: EventBus) -> Self {
        Self {
            scripts,
            registry: JobRegistry::new(),
            events,
        }
    }

    pub fn scripts(&self) -> &ScriptTable {
        &self.scripts
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn is_active(&self, job_id: uuid::Uuid) -> bool {
        self.registry.is_active(job_id)
    }

    pub fn active_jobs(&self) -> Vec<uuid::Uuid> {
        self.registry.active_jobs()
    }

    /// Stream stdout until EOF, then reap the child
    ///
    /// Returns the exit status and the first `RESULT:` payload seen.
    async fn read_until_exit(
        &self,
        job: &AnalysisJob,
        stdout: ChildStdout,
        child: &mut Child,
    ) -> std::io::Result<(ExitStatus, Option<String>)> {
        let mut segments = BufReader::new(stdout).split(b'\n');
        let mut tracker = ProgressTracker::new();
        let mut result_line = None;

        while let Some(segment) = segments.next_segment().await? {
            let line = String::from_utf8_lossy(&segment);

            if let Some(value) = parse_progress_line(&line) {
                if let Some(progress) = tracker.observe(value) {
                    tracing::debug!(job_id = %job.id, progress, "Analyzer progress");
                    self.events.emit_lossy(EngineEvent::AnalysisProgress {
                        job_id: job.id,
                        track_id: job.track_id,
                        progress,
                    });
                }
                continue;
            }

            match parse_result_line(&line) {
                Some(json) if result_line.is_none() => result_line = Some(json.to_string()),
                Some(_) => tracing::debug!(job_id = %job.id, "Ignoring extra RESULT line"),
                None => {}
            }
        }

        let status = child.wait().await?;
        Ok((status, result_line))
    }

    fn interpret(
        job: AnalysisJob,
        status: ExitStatus,
        result_line: Option<String>,
        stderr: String,
    ) -> EngineResult<AnalysisResult> {
        if !status.success() {
            return Err(AnalysisError::WorkerExitError {
                analyzer: job.analyzer,
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        let json = result_line.ok_or_else(|| AnalysisError::NoResultProduced(job.analyzer.clone()))?;
        let payload: Value =
            serde_json::from_str(&json).map_err(|source| AnalysisError::MalformedResult {
                analyzer: job.analyzer.clone(),
                source,
            })?;

        Ok(AnalysisResult {
            job_id: job.id,
            track_id: job.track_id,
            analyzer: job.analyzer,
            payload,
            status: AnalysisStatus::Completed,
            completed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl AnalyzerBackend for ProcessDispatcher {
    async fn run(&self, job: AnalysisJob, timeout: Duration) -> EngineResult<AnalysisResult> {
        let mut command = self.scripts.command_for(&job)?;
        let active = self.registry.register(job.id)?;

        tracing::info!(
            job_id = %job.id,
            track_id = %job.track_id,
            analyzer = %job.analyzer,
            audio_path = %job.audio_path.display(),
            "Spawning analyzer"
        );

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| AnalysisError::SpawnError {
            analyzer: job.analyzer.clone(),
            source,
        })?;

        let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(AnalysisError::WorkerIo {
                analyzer: job.analyzer.clone(),
                source: std::io::Error::other("analyzer pipes not captured"),
            });
        };

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let outcome = {
            let exited = self.read_until_exit(&job, stdout, &mut child);
            tokio::select! {
                result = exited => Outcome::Exited(result),
                _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
                _ = active.token().cancelled() => Outcome::Cancelled,
            }
        };

        match outcome {
            Outcome::Exited(Ok((status, result_line))) => {
                drop(active);
                let stderr = stderr_task.await.unwrap_or_default();
                tracing::debug!(
                    job_id = %job.id,
                    exit_code = ?status.code(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Analyzer exited"
                );
                Self::interpret(job, status, result_line, stderr)
            }
            Outcome::Exited(Err(source)) => {
                drop(active);
                let _ = child.kill().await;
                stderr_task.abort();
                Err(AnalysisError::WorkerIo {
                    analyzer: job.analyzer,
                    source,
                })
            }
            Outcome::TimedOut => {
                drop(active);
                if let Err(e) = child.kill().await {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to kill timed-out analyzer");
                }
                stderr_task.abort();
                tracing::warn!(
                    job_id = %job.id,
                    analyzer = %job.analyzer,
                    timeout_ms = timeout.as_millis() as u64,
                    "Analyzer timed out"
                );
                Err(AnalysisError::WorkerTimeout {
                    analyzer: job.analyzer,
                    timeout,
                })
            }
            Outcome::Cancelled => {
                drop(active);
                if let Err(e) = child.kill().await {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to kill cancelled analyzer");
                }
                stderr_task.abort();
                tracing::info!(job_id = %job.id, analyzer = %job.analyzer, "Analyzer cancelled");
                Err(AnalysisError::Cancelled(job.id))
            }
        }
    }

    fn cancel_all(&self) -> usize {
        let count = self.registry.cancel_all();
        if count > 0 {
            tracing::info!(count, "Cancelling active analyzers");
        }
        count
    }

    fn active_job_count(&self) -> usize {
        self.registry.len()
    }
}
