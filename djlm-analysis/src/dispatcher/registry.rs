//! Active job registry
//!
//! Arena of cancellation handles keyed by job id, owned by the dispatcher.
//! Entries are removed by a drop guard so a job leaves the registry on every
//! exit path (result, error, timeout, cancellation).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AnalysisError, EngineResult};

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        // Critical sections never panic; recover the map if one ever did
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `job_id`, returning a guard that unregisters on drop
    pub fn register(&self, job_id: Uuid) -> EngineResult<ActiveJob> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job_id) {
            return Err(AnalysisError::JobAlreadyActive(job_id));
        }

        let token = CancellationToken::new();
        jobs.insert(job_id, token.clone());

        Ok(ActiveJob {
            job_id,
            token,
            registry: self.clone(),
        })
    }

    pub fn is_active(&self, job_id: Uuid) -> bool {
        self.lock().contains_key(&job_id)
    }

    pub fn active_jobs(&self) -> Vec<Uuid> {
        self.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Signal every registered job, returning how many were signalled
    pub fn cancel_all(&self) -> usize {
        let jobs = self.lock();
        for token in jobs.values() {
            token.cancel();
        }
        jobs.len()
    }

    fn remove(&self, job_id: Uuid) {
        self.lock().remove(&job_id);
    }
}

/// Registration of one running job
#[derive(Debug)]
pub struct ActiveJob {
    job_id: Uuid,
    token: CancellationToken,
    registry: JobRegistry,
}

impl ActiveJob {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.registry.remove(self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_unregisters_on_drop() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();

        let guard = registry.register(id).unwrap();
        assert!(registry.is_active(id));
        assert_eq!(registry.active_jobs(), vec![id]);

        drop(guard);
        assert!(!registry.is_active(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();

        let _guard = registry.register(id).unwrap();
        assert!(matches!(
            registry.register(id),
            Err(AnalysisError::JobAlreadyActive(dup)) if dup == id
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cancel_all_signals_every_token() {
        let registry = JobRegistry::new();
        let a = registry.register(Uuid::new_v4()).unwrap();
        let b = registry.register(Uuid::new_v4()).unwrap();

        assert_eq!(registry.cancel_all(), 2);
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
    }
}
