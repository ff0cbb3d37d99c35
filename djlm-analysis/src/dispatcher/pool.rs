//! Bounded worker pool
//!
//! Caps the number of live analyzer processes. Jobs beyond the cap wait in
//! FIFO order (tokio's semaphore is fair) and are admitted as slots free up.
//! The job timeout starts at spawn, so queue time does not count against it.
//! `cancel_all` closes the pool: queued and later jobs fail with `Cancelled`.

use async_trait::async_trait;
use djlm_common::models::{AnalysisJob, AnalysisResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::AnalyzerBackend;
use crate::error::{AnalysisError, EngineResult};

pub struct WorkerPool<B> {
    inner: B,
    slots: Arc<Semaphore>,
    max_workers: usize,
    queued: Arc<AtomicUsize>,
}

impl<B: AnalyzerBackend> WorkerPool<B> {
    /// Wrap `inner` with `max_workers` execution slots (at least one)
    pub fn new(inner: B, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner,
            slots: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Jobs waiting for a slot
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// Counts a job as queued until dropped
struct QueuedGuard(Arc<AtomicUsize>);

impl QueuedGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for QueuedGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<B: AnalyzerBackend> AnalyzerBackend for WorkerPool<B> {
    async fn run(&self, job: AnalysisJob, timeout: Duration) -> EngineResult<AnalysisResult> {
        let permit = {
            let _queued = QueuedGuard::enter(&self.queued);
            self.slots.acquire().await
        };
        let _permit = permit.map_err(|_| AnalysisError::Cancelled(job.id))?;

        tracing::debug!(
            job_id = %job.id,
            analyzer = %job.analyzer,
            available_slots = self.available_slots(),
            "Worker slot acquired"
        );

        self.inner.run(job, timeout).await
    }

    fn cancel_all(&self) -> usize {
        self.slots.close();
        self.inner.cancel_all()
    }

    fn active_job_count(&self) -> usize {
        self.inner.active_job_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use djlm_common::models::AnalysisStatus;
    use serde_json::{json, Map};
    use std::path::PathBuf;
    use uuid::Uuid;

    /// Backend that records peak concurrency
    #[derive(Default)]
    struct SlowBackend {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl AnalyzerBackend for SlowBackend {
        async fn run(&self, job: AnalysisJob, _timeout: Duration) -> EngineResult<AnalysisResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            Ok(AnalysisResult {
                job_id: job.id,
                track_id: job.track_id,
                analyzer: job.analyzer,
                payload: json!({}),
                status: AnalysisStatus::Completed,
                completed_at: Utc::now(),
            })
        }

        fn cancel_all(&self) -> usize {
            0
        }

        fn active_job_count(&self) -> usize {
            self.running.load(Ordering::SeqCst)
        }
    }

    fn job() -> AnalysisJob {
        AnalysisJob {
            id: Uuid::new_v4(),
            track_id: Uuid::new_v4(),
            audio_path: PathBuf::from("/music/a.mp3"),
            analyzer: "tempo".to_string(),
            parameters: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_pool_caps_concurrency() {
        let pool = Arc::new(WorkerPool::new(SlowBackend::default(), 2));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.run(job(), Duration::from_secs(5)).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(pool.inner().peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available_slots(), 2);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_refuses_queued_and_later_jobs() {
        let pool = Arc::new(WorkerPool::new(SlowBackend::default(), 1));

        let running = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run(job(), Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiting_job = job();
        let waiting_id = waiting_job.id;
        let waiting = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run(waiting_job, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.queued(), 1);

        pool.cancel_all();

        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(AnalysisError::Cancelled(id)) if id == waiting_id));
        assert!(running.await.unwrap().is_ok());

        let late = job();
        let late_id = late.id;
        let result = pool.run(late, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(AnalysisError::Cancelled(id)) if id == late_id));
        assert_eq!(pool.inner().peak.load(Ordering::SeqCst), 1);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_zero_workers_means_one_slot() {
        let pool = WorkerPool::new(SlowBackend::default(), 0);
        assert_eq!(pool.max_workers(), 1);
        assert_eq!(pool.available_slots(), 1);
    }
}
